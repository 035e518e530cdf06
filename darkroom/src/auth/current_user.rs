use crate::{
    AppState,
    api::models::users::CurrentUser,
    config::Config,
    db::{
        errors::DbError,
        handlers::Users,
        models::users::UserCreateDBRequest,
    },
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::PgPool;
use tracing::{debug, info, instrument, trace};

/// Extract user from API key in Authorization header if present and valid
/// Returns:
/// - None: No Authorization header or not a Bearer token
/// - Some(Ok(user)): Valid API key found and user authenticated
/// - Some(Err(error)): Bearer token present but invalid
#[instrument(skip(parts, db))]
async fn try_api_key_auth(parts: &Parts, db: &PgPool) -> Option<Result<CurrentUser>> {
    let auth_header = match parts.headers.get(axum::http::header::AUTHORIZATION) {
        Some(header) => header,
        None => return None,
    };

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    let api_key = match auth_str.strip_prefix("Bearer ") {
        Some(key) => key,
        None => return None, // Not a Bearer token
    };

    let mut conn = match db.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Some(Err(DbError::from(e).into())),
    };

    let user = match sqlx::query_as::<_, CurrentUser>(
        r#"
        SELECT u.id, u.email
        FROM api_keys ak
        INNER JOIN users u ON ak.user_id = u.id
        WHERE ak.secret = $1
        "#,
    )
    .bind(api_key)
    .fetch_optional(&mut *conn)
    .await
    {
        Ok(result) => result,
        Err(e) => return Some(Err(DbError::from(e).into())),
    };

    match user {
        Some(user) => Some(Ok(user)),
        None => Some(Err(Error::Unauthenticated {
            message: Some("Invalid API key".to_string()),
        })),
    }
}

/// Extract user from the trusted proxy identity header if present
/// Returns:
/// - None: No proxy header present (or proxy auth disabled)
/// - Some(Ok(user)): Known user, or a freshly provisioned one
/// - Some(Err(error)): Header present but lookup/provisioning failed
#[instrument(skip(parts, config, db))]
async fn try_proxy_header_auth(parts: &Parts, config: &Config, db: &PgPool) -> Option<Result<CurrentUser>> {
    let email = match parts
        .headers
        .get(&config.auth.proxy_header.header_name)
        .and_then(|h| h.to_str().ok())
    {
        Some(email) => email,
        None => return None,
    };

    let mut conn = match db.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Some(Err(DbError::from(e).into())),
    };
    let mut users = Users::new(&mut conn);

    match users.get_by_email(email).await {
        Ok(Some(user)) => Some(Ok(CurrentUser {
            id: user.id,
            email: user.email,
        })),
        Ok(None) if config.auth.proxy_header.auto_create_users => {
            let request = UserCreateDBRequest {
                email: email.to_string(),
            };
            match users.provision(&request, config.credits.initial_credits).await {
                Ok(user) => {
                    info!(user_id = %user.id, "provisioned first-seen proxy user");
                    Some(Ok(CurrentUser {
                        id: user.id,
                        email: user.email,
                    }))
                }
                Err(e) => Some(Err(Error::Database(e))),
            }
        }
        Ok(None) => Some(Err(Error::Unauthenticated {
            message: Some("Unknown user".to_string()),
        })),
        Err(e) => Some(Err(Error::Database(e))),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match try_api_key_auth(parts, &state.db).await {
            Some(Ok(user)) => {
                debug!("Found API key authenticated user: {}", user.id);
                return Ok(user);
            }
            Some(Err(e)) => {
                trace!("API key authentication failed: {:?}", e);
                return Err(e);
            }
            None => {}
        }

        // Fall back to proxy header authentication
        if state.config.auth.proxy_header.enabled {
            match try_proxy_header_auth(parts, &state.config, &state.db).await {
                Some(Ok(user)) => {
                    debug!("Found proxy header authenticated user: {}", user.id);
                    return Ok(user);
                }
                Some(Err(e)) => {
                    trace!("Proxy header authentication failed: {:?}", e);
                    return Err(e);
                }
                None => {}
            }
        }

        Err(Error::Unauthenticated { message: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Credits;
    use sqlx::PgPool;

    fn proxy_config() -> Config {
        let mut config = Config::default();
        config.auth.proxy_header.enabled = true;
        config
    }

    fn parts_with_header(name: &str, value: &str) -> Parts {
        axum::http::Request::builder()
            .uri("/api/jobs")
            .header(name, value)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[sqlx::test]
    async fn first_seen_proxy_user_is_provisioned_with_starter_credits(pool: PgPool) {
        let config = proxy_config();
        let parts = parts_with_header("x-darkroom-user", "fresh@example.com");

        let user = try_proxy_header_auth(&parts, &config, &pool).await.unwrap().unwrap();
        assert_eq!(user.email, "fresh@example.com");

        {
            let mut conn = pool.acquire().await.unwrap();
            let balance = Credits::new(&mut conn).balance(user.id).await.unwrap();
            assert_eq!(balance, config.credits.initial_credits);
        }

        // A second request resolves the same account without another grant
        let again = try_proxy_header_auth(&parts, &config, &pool).await.unwrap().unwrap();
        assert_eq!(again.id, user.id);

        let mut conn = pool.acquire().await.unwrap();
        let balance = Credits::new(&mut conn).balance(user.id).await.unwrap();
        assert_eq!(balance, config.credits.initial_credits);
    }

    #[sqlx::test]
    async fn unknown_proxy_user_is_rejected_when_auto_create_is_off(pool: PgPool) {
        let mut config = proxy_config();
        config.auth.proxy_header.auto_create_users = false;
        let parts = parts_with_header("x-darkroom-user", "nobody@example.com");

        let err = try_proxy_header_auth(&parts, &config, &pool).await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[sqlx::test]
    async fn absent_header_falls_through(pool: PgPool) {
        let config = proxy_config();
        let parts = axum::http::Request::builder().uri("/").body(()).unwrap().into_parts().0;

        assert!(try_proxy_header_auth(&parts, &config, &pool).await.is_none());
    }
}
