use crate::{
    api::attendance::PoolSink,
    sync::{
        offline_queue::{FlushReport, OfflineQueue, QueueStatus},
        realtime::Realtime,
    },
};
use actix_web::{HttpResponse, Responder, web};
use sqlx::MySqlPool;

/// Pending offline submissions
#[utoipa::path(
    get,
    path = "/api/sync/status",
    responses((status = 200, description = "Offline queue state", body = QueueStatus)),
    tag = "Sync",
    security(("bearer_auth" = []))
)]
pub async fn status(queue: web::Data<OfflineQueue>) -> impl Responder {
    HttpResponse::Ok().json(queue.status().await)
}

/// Replays the offline queue now instead of waiting for the next tick
#[utoipa::path(
    post,
    path = "/api/sync/flush",
    responses((status = 200, description = "What the replay achieved", body = FlushReport)),
    tag = "Sync",
    security(("bearer_auth" = []))
)]
pub async fn flush(
    queue: web::Data<OfflineQueue>,
    pool: web::Data<MySqlPool>,
    realtime: web::Data<Realtime>,
) -> impl Responder {
    let sink = PoolSink {
        pool: pool.get_ref().clone(),
        realtime: realtime.get_ref().clone(),
    };
    HttpResponse::Ok().json(queue.flush(&sink).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};
    use std::sync::Arc;

    #[actix_web::test]
    async fn status_reports_an_empty_queue() {
        let queue = Arc::new(OfflineQueue::in_memory());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(queue))
                .route("/sync/status", web::get().to(status)),
        )
        .await;

        let req = test::TestRequest::get().uri("/sync/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["queue_size"], 0);
        assert!(body["oldest_queued_at"].is_null());
    }
}
