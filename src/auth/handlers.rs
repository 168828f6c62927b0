use crate::{
    auth::{
        auth::{AuthUser, bearer_token},
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, verify_password},
    },
    config::Config,
    error::{AppError, is_unique_violation},
    model::{role::Role, user::User},
    models::{Claims, LoginReqDto, RegisterReqDto, TokenPair, TokenType},
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};

fn token_error(e: jsonwebtoken::errors::Error) -> AppError {
    error!(error = %e, "Failed to sign token");
    AppError::Internal
}

/// Issues an access/refresh pair and records the refresh jti.
async fn issue_token_pair(
    pool: &MySqlPool,
    config: &Config,
    user_id: u64,
    username: &str,
    role: u8,
) -> Result<TokenPair, AppError> {
    let access_token = generate_access_token(
        user_id,
        username.to_string(),
        role,
        &config.jwt_secret,
        config.access_token_ttl,
    )
    .map_err(token_error)?;

    let (refresh_token, refresh_claims) = generate_refresh_token(
        user_id,
        username.to_string(),
        role,
        &config.jwt_secret,
        config.refresh_token_ttl,
    )
    .map_err(token_error)?;

    debug!(user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(pool)
    .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

fn refresh_claims_from(req: &HttpRequest, config: &Config) -> Option<Claims> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)?;

    verify_token(token, &config.jwt_secret)
        .ok()
        .filter(|claims| claims.token_type == TokenType::Refresh)
}

/// Registers a new warden account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterReqDto,
    responses(
        (status = 201, description = "Warden registered", body = Object, example = json!({
            "message": "User registered successfully"
        })),
        (status = 400, description = "Username or password empty"),
        (status = 409, description = "Username already taken")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_register", skip(pool, user), fields(username = %user.username))]
pub async fn register(
    user: web::Json<RegisterReqDto>,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    let username = user.username.trim().to_lowercase();

    if username.is_empty() || user.password.is_empty() {
        return Err(AppError::bad_request(
            "Username and password must not be empty",
        ));
    }

    let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE username = ?")
        .bind(&username)
        .fetch_one(pool.get_ref())
        .await?;

    if taken > 0 {
        return Err(AppError::conflict("Username already taken"));
    }

    let hashed = hash_password(&user.password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        AppError::Internal
    })?;

    // unique key still guards the race between the check and the insert
    let result = sqlx::query("INSERT INTO users (username, password, role_id) VALUES (?, ?, ?)")
        .bind(&username)
        .bind(hashed)
        .bind(Role::Warden.id())
        .execute(pool.get_ref())
        .await;

    match result {
        Ok(_) => {
            info!("Warden registered");
            Ok(HttpResponse::Created().json(json!({
                "message": "User registered successfully"
            })))
        }
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict("Username already exists")),
        Err(e) => Err(e.into()),
    }
}

/// Exchanges credentials for an access/refresh token pair
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Logged in", body = TokenPair),
        (status = 400, description = "Username or password missing"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account disabled")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        return Err(AppError::bad_request("Username or password required"));
    }

    let username = user.username.trim().to_lowercase();

    let db_user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password, role_id, is_active
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(&username)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| {
        info!("Invalid credentials: user not found");
        AppError::Unauthorized("Invalid credentials".to_string())
    })?;

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    if !db_user.is_active {
        info!(user_id = db_user.id, "Login refused: account disabled");
        return Err(AppError::Forbidden("Account disabled".to_string()));
    }

    let pair = issue_token_pair(
        pool.get_ref(),
        &config,
        db_user.id,
        &db_user.username,
        db_user.role_id,
    )
    .await?;

    // non-fatal
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = db_user.id, "Login successful");

    Ok(HttpResponse::Ok().json(pair))
}

fn rotation_claimed(rows_affected: u64) -> bool {
    rows_affected == 1
}

fn refreshable_user(user: Option<User>) -> Result<User, AppError> {
    match user {
        Some(user) if user.is_active => Ok(user),
        Some(user) => {
            info!(user_id = user.id, "Refresh refused: account disabled");
            Err(AppError::Forbidden("Account disabled".to_string()))
        }
        None => Err(AppError::Unauthorized("Invalid refresh token".to_string())),
    }
}

/// Rotates a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or revoked"),
        (status = 403, description = "Account disabled")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let claims = refresh_claims_from(&req, &config)
        .ok_or_else(|| AppError::Unauthorized("Invalid refresh token".to_string()))?;

    // single statement, so two refreshes racing on one token cannot both win
    let claimed = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked = TRUE
        WHERE jti = ? AND user_id = ? AND revoked = FALSE AND expires_at > NOW()
        "#,
    )
    .bind(&claims.jti)
    .bind(claims.user_id)
    .execute(pool.get_ref())
    .await?
    .rows_affected();

    if !rotation_claimed(claimed) {
        info!(jti = %claims.jti, "Refresh refused: unknown, expired or revoked token");
        return Err(AppError::Unauthorized("Invalid refresh token".to_string()));
    }

    // role and status may have changed since the token was issued
    let db_user = sqlx::query_as::<_, User>(
        "SELECT id, username, password, role_id, is_active FROM users WHERE id = ?",
    )
    .bind(claims.user_id)
    .fetch_optional(pool.get_ref())
    .await?;
    let db_user = refreshable_user(db_user)?;

    let pair = issue_token_pair(
        pool.get_ref(),
        &config,
        db_user.id,
        &db_user.username,
        db_user.role_id,
    )
    .await?;

    Ok(HttpResponse::Ok().json(pair))
}

/// Revokes a refresh token. Always answers 204.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some(claims) = refresh_claims_from(&req, &config) else {
        return HttpResponse::NoContent().finish();
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

/// Returns the authenticated user
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Current user", body = Object, example = json!({
            "user_id": 2,
            "username": "warden.north",
            "role": "warden"
        })),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(auth: AuthUser) -> impl Responder {
    HttpResponse::Ok().json(auth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, ResponseError, http::StatusCode, test as http};

    fn user(is_active: bool) -> User {
        User {
            id: 4,
            username: "warden.north".to_string(),
            password: String::new(),
            role_id: Role::Admin.id(),
            is_active,
        }
    }

    #[test]
    fn only_the_request_that_revoked_the_token_may_rotate() {
        assert!(rotation_claimed(1));
        // a concurrent refresh already flipped `revoked`
        assert!(!rotation_claimed(0));
    }

    #[test]
    fn refresh_uses_the_current_account_state() {
        let fresh = refreshable_user(Some(user(true))).unwrap();
        assert_eq!(fresh.role_id, Role::Admin.id());

        let disabled = refreshable_user(Some(user(false))).unwrap_err();
        assert_eq!(disabled.status_code(), StatusCode::FORBIDDEN);

        let gone = refreshable_user(None).unwrap_err();
        assert_eq!(gone.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn refresh_without_a_refresh_token_is_unauthorized() {
        let config = Config::for_tests();
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://hosteltrack@127.0.0.1:1/hosteltrack")
            .unwrap();
        let access = generate_access_token(4, "warden.north".to_string(), 2, &config.jwt_secret, 60)
            .unwrap();

        let app = http::init_service(
            App::new()
                .app_data(web::Data::new(pool))
                .app_data(web::Data::new(config))
                .route("/auth/refresh", web::post().to(refresh_token)),
        )
        .await;

        // an access token must not be accepted in place of a refresh token
        let req = http::TestRequest::post()
            .uri("/auth/refresh")
            .insert_header(("Authorization", format!("Bearer {access}")))
            .to_request();
        let resp = http::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
