use crate::models::{ApiResponse, IncrementUsageRequest, UsageResponse};
use crate::services::{EntitlementResolver, UsageMeter};
use actix_web::{HttpResponse, ResponseError, Result, web};

/// GET /api/v1/entitlements/{user_id}/{feature}
///
/// Read-only: answering "may this user do X" never consumes quota.
pub async fn check_entitlement(
    resolver: web::Data<EntitlementResolver>,
    path: web::Path<(i64, String)>,
) -> Result<HttpResponse> {
    let (user_id, feature) = path.into_inner();

    match resolver.check_and_describe(user_id, &feature).await {
        Ok(decision) => Ok(HttpResponse::Ok().json(ApiResponse::success(decision))),
        Err(e) => Ok(e.error_response()),
    }
}

/// POST /api/v1/usage/{user_id}/{feature}
pub async fn increment_usage(
    meter: web::Data<UsageMeter>,
    path: web::Path<(i64, String)>,
    request: web::Json<IncrementUsageRequest>,
) -> Result<HttpResponse> {
    let (user_id, feature) = path.into_inner();
    let request = request.into_inner();
    let period_key = UsageMeter::current_period_key();

    match meter
        .increment(
            user_id,
            &feature,
            &period_key,
            request.delta,
            request.idempotency_key.as_deref(),
        )
        .await
    {
        Ok(count) => Ok(HttpResponse::Ok().json(ApiResponse::success(UsageResponse {
            user_id,
            feature,
            period_key,
            count,
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

/// GET /api/v1/usage/{user_id}/{feature}
pub async fn get_usage(
    meter: web::Data<UsageMeter>,
    path: web::Path<(i64, String)>,
) -> Result<HttpResponse> {
    let (user_id, feature) = path.into_inner();
    let period_key = UsageMeter::current_period_key();

    match meter.get_usage(user_id, &feature, &period_key).await {
        Ok(count) => Ok(HttpResponse::Ok().json(ApiResponse::success(UsageResponse {
            user_id,
            feature,
            period_key,
            count,
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn entitlement_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route(
                "/entitlements/{user_id}/{feature}",
                web::get().to(check_entitlement),
            )
            .route("/usage/{user_id}/{feature}", web::get().to(get_usage))
            .route("/usage/{user_id}/{feature}", web::post().to(increment_usage)),
    );
}
