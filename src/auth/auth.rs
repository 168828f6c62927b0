use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::{model::role::Role, models::TokenType};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

/// Pulls the bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

/// Decodes an access token into the user it was issued to.
pub fn authenticate(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let claims = verify_token(token, secret)
        .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;

    if claims.token_type != TokenType::Access {
        return Err(AppError::Unauthorized("Access token required".to_string()));
    }

    let role = Role::from_id(claims.role)
        .ok_or_else(|| AppError::Unauthorized("Invalid role".to_string()))?;

    Ok(AuthUser {
        user_id: claims.user_id,
        username: claims.sub,
        role,
    })
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // set by auth_middleware on protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token)
        {
            Some(t) => t,
            None => return ready(Err(AppError::Unauthorized("Missing token".to_string()))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => {
                tracing::error!("Config missing from app data");
                return ready(Err(AppError::Internal));
            }
        };

        ready(authenticate(token, &config.jwt_secret))
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin only".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{generate_access_token, generate_refresh_token};

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }

    #[test]
    fn refresh_tokens_cannot_authenticate_requests() {
        let (refresh, _) = generate_refresh_token(1, "w".into(), 2, "s", 60).unwrap();
        assert!(matches!(
            authenticate(&refresh, "s"),
            Err(AppError::Unauthorized(_))
        ));

        let access = generate_access_token(1, "w".into(), 2, "s", 60).unwrap();
        let user = authenticate(&access, "s").unwrap();
        assert_eq!(user.role, Role::Warden);
        assert!(user.require_admin().is_err());
    }
}
