use crate::{
    api::{attendance, events, floors, reports, students, sync},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;
use tracing::warn;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = 60_000 / u64::from(requests_per_min);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms.max(1))
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            warn!(requests_per_min, "Invalid rate limit, using governor defaults");
            GovernorConfig::default()
        });
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let register_limiter = Arc::new(build_limiter(config.rate_register_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/register")
                    .wrap(register_limiter.clone())
                    .route(web::post().to(handlers::register)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(web::resource("/me").route(web::get().to(handlers::me)))
            .service(web::resource("/events").route(web::get().to(events::events)))
            .service(web::resource("/dashboard").route(web::get().to(attendance::dashboard)))
            // /floors
            .service(
                web::scope("/floors")
                    .service(web::resource("").route(web::get().to(floors::list_floors)))
                    .service(
                        web::resource("/{floor_number}/rooms")
                            .route(web::get().to(floors::list_rooms)),
                    )
                    .service(
                        web::resource("/{floor_number}/rooms/{room_number}/students")
                            .route(web::get().to(floors::room_students)),
                    ),
            )
            .service(web::resource("/rooms").route(web::post().to(floors::create_room)))
            // /students
            .service(
                web::scope("/students")
                    .service(
                        web::resource("")
                            .route(web::get().to(students::list_students))
                            .route(web::post().to(students::create_student)),
                    )
                    // before /{id} so "upload" is not taken for an id
                    .service(
                        web::resource("/upload")
                            .app_data(web::PayloadConfig::new(config.upload_limit_bytes))
                            .route(web::post().to(students::upload_students)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(students::get_student))
                            .route(web::put().to(students::update_student))
                            .route(web::delete().to(students::delete_student)),
                    ),
            )
            // /attendance
            .service(
                web::scope("/attendance")
                    .service(web::resource("").route(web::get().to(attendance::list_records)))
                    .service(
                        web::resource("/submit").route(web::post().to(attendance::submit_attendance)),
                    )
                    .service(web::resource("/today").route(web::get().to(attendance::today_records)))
                    .service(web::resource("/history").route(web::get().to(attendance::history))),
            )
            // /reports
            .service(
                web::scope("/reports")
                    .service(
                        web::resource("/attendance").route(web::get().to(reports::attendance_report)),
                    )
                    .service(
                        web::resource("/daily-summary").route(web::get().to(reports::daily_summary)),
                    ),
            )
            // /sync
            .service(
                web::scope("/sync")
                    .service(web::resource("/status").route(web::get().to(sync::status)))
                    .service(web::resource("/flush").route(web::post().to(sync::flush))),
            ),
    );
}

// LOGIN
//  ├─ access_token (ACCESS_TOKEN_TTL)
//  └─ refresh_token (REFRESH_TOKEN_TTL)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new token pair, old refresh token revoked
