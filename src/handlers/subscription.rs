use crate::error::AppError;
use crate::models::{ActivatePaidRequest, ApiResponse, SubscriptionResponse};
use crate::services::{RenewalReconciler, SubscriptionService};
use actix_web::{HttpResponse, ResponseError, Result, web};

/// GET /api/v1/subscriptions/{user_id}
pub async fn get_subscription(
    subscriptions: web::Data<SubscriptionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    match subscriptions.current_for_user(user_id).await {
        Ok(Some(sub)) => {
            Ok(HttpResponse::Ok().json(ApiResponse::success(SubscriptionResponse::from(sub))))
        }
        Ok(None) => Ok(AppError::NotFound(format!(
            "User {user_id} has no subscription"
        ))
        .error_response()),
        Err(e) => Ok(e.error_response()),
    }
}

/// POST /api/v1/subscriptions/{user_id}/signup
///
/// Idempotent free signup; repeated calls return the existing row.
pub async fn signup_free(
    subscriptions: web::Data<SubscriptionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    match subscriptions.signup_free(user_id).await {
        Ok(sub) => {
            Ok(HttpResponse::Ok().json(ApiResponse::success(SubscriptionResponse::from(sub))))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// POST /api/v1/subscriptions/{user_id}/activate
pub async fn activate_paid(
    subscriptions: web::Data<SubscriptionService>,
    path: web::Path<i64>,
    request: web::Json<ActivatePaidRequest>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    match subscriptions.activate_paid(user_id, &request.plan_id).await {
        Ok(sub) => {
            Ok(HttpResponse::Ok().json(ApiResponse::success(SubscriptionResponse::from(sub))))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// POST /api/v1/subscriptions/{user_id}/cancel
pub async fn cancel_subscription(
    subscriptions: web::Data<SubscriptionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    match subscriptions.cancel(user_id).await {
        Ok(sub) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            SubscriptionResponse::from(sub),
            "Subscription stays active until the end of the paid period".to_string(),
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

/// POST /internal/subscriptions/{id}/reinstate
///
/// Support tooling for suspended subscriptions; not exposed publicly.
pub async fn reinstate_subscription(
    subscriptions: web::Data<SubscriptionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let subscription_id = path.into_inner();

    match subscriptions.reinstate(subscription_id).await {
        Ok(sub) => {
            Ok(HttpResponse::Ok().json(ApiResponse::success(SubscriptionResponse::from(sub))))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// POST /internal/reconcile
///
/// Manual sweep trigger. Safe to call while the background loop runs,
/// every state change goes through the guarded transition path.
pub async fn trigger_reconcile(
    reconciler: web::Data<RenewalReconciler>,
) -> Result<HttpResponse> {
    match reconciler.run_sweep().await {
        Ok(report) => Ok(HttpResponse::Ok().json(ApiResponse::success(report))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn subscription_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/subscriptions")
            .route("/{user_id}", web::get().to(get_subscription))
            .route("/{user_id}/signup", web::post().to(signup_free))
            .route("/{user_id}/activate", web::post().to(activate_paid))
            .route("/{user_id}/cancel", web::post().to(cancel_subscription)),
    );
    cfg.service(
        web::scope("/internal")
            .route("/reconcile", web::post().to(trigger_reconcile))
            .route(
                "/subscriptions/{id}/reinstate",
                web::post().to(reinstate_subscription),
            ),
    );
}
