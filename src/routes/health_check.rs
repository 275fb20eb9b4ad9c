use actix_web::HttpResponse;
use serde_json::json;

pub async fn health_check() -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    HttpResponse::Ok().json(json!({ "status": "available" }))
}
