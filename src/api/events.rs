use crate::sync::realtime::{Realtime, event_stream};
use actix_web::{HttpResponse, Responder, http::header, web};
use tracing::debug;

/// Server-sent stream of attendance changes
#[utoipa::path(
    get,
    path = "/api/events",
    responses(
        (status = 200, description = "One `data:` frame per change", content_type = "text/event-stream")
    ),
    tag = "Sync",
    security(("bearer_auth" = []))
)]
pub async fn events(realtime: web::Data<Realtime>) -> impl Responder {
    debug!("Event subscriber connected");

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(event_stream(realtime.subscribe()))
}
