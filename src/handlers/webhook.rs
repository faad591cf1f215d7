use crate::external::ChargeStatus;
use crate::services::RenewalReconciler;
use actix_web::{HttpResponse, Result, web};
use log::{error, info};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GatewayWebhookPayload {
    pub gateway_reference: String,
    pub status: ChargeStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// POST /webhook/gateway
///
/// Push delivery of charge outcomes. The same outcome also arrives via
/// polling, so a replayed or out-of-order webhook must be harmless.
pub async fn gateway_webhook(
    reconciler: web::Data<RenewalReconciler>,
    payload: web::Json<GatewayWebhookPayload>,
) -> Result<HttpResponse> {
    let payload = payload.into_inner();
    info!(
        "gateway webhook: charge {} is {:?}",
        payload.gateway_reference, payload.status
    );

    match reconciler
        .apply_outcome(&payload.gateway_reference, payload.status)
        .await
    {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "received": true
        }))),
        Err(e) => {
            error!(
                "failed to process gateway webhook for charge {}: {e}",
                payload.gateway_reference
            );
            // 200 so the gateway does not retry forever; the polling sweep
            // picks the outcome up regardless
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "received": true,
                "error": format!("Processing failed: {}", e)
            })))
        }
    }
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhook").route("/gateway", web::post().to(gateway_webhook)));
}
