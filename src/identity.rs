use crate::config::{OAuthIdentity, OAuthSettings};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::UserRecord;
use chrono::{Duration, Utc};
use reqwest::Url;
use std::sync::Arc;
use uuid::Uuid;

/// The hosted user service the router delegates OAuth and cookie sessions to.
pub trait UserService: Send + Sync {
    fn oauth_redirect_url(&self, provider: &str) -> AppResult<String>;
    /// Trades an authorization code for an opaque session token.
    fn exchange_code(&self, code: &str) -> AppResult<String>;
    fn current_user(&self, token: &str) -> AppResult<Option<UserRecord>>;
    fn delete_session(&self, token: &str) -> AppResult<()>;
}

/// Local stand-in for the hosted service: every accepted code signs in the
/// configured identity, and sessions live in the dashboard database.
pub struct DemoUserService {
    db: Arc<Database>,
    oauth: OAuthSettings,
    identity: OAuthIdentity,
    session_ttl: Duration,
}

impl DemoUserService {
    pub fn new(db: Arc<Database>, oauth: OAuthSettings, identity: OAuthIdentity, session_ttl_days: u32) -> Self {
        Self {
            db,
            oauth,
            identity,
            session_ttl: Duration::days(i64::from(session_ttl_days)),
        }
    }
}

impl UserService for DemoUserService {
    fn oauth_redirect_url(&self, provider: &str) -> AppResult<String> {
        if provider != "google" {
            return Err(AppError::NotFound(format!("Unsupported OAuth provider '{}'", provider)));
        }
        let state = Uuid::new_v4().to_string();
        let url = Url::parse_with_params(
            &self.oauth.authorize_url,
            &[
                ("client_id", self.oauth.client_id.as_str()),
                ("redirect_uri", self.oauth.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|error| AppError::Internal(format!("invalid OAuth authorize url: {}", error)))?;
        Ok(url.to_string())
    }

    fn exchange_code(&self, code: &str) -> AppResult<String> {
        if code.trim().is_empty() {
            return Err(AppError::BadRequest("No authorization code provided".to_string()));
        }
        let user = self
            .db
            .upsert_user(&self.identity.email, &self.identity.name, &self.identity.role)?;
        let token = Uuid::new_v4().to_string();
        self.db
            .insert_user_session(&token, &user.id, Utc::now() + self.session_ttl)?;
        tracing::info!(user_id = %user.id, "issued user session");
        Ok(token)
    }

    fn current_user(&self, token: &str) -> AppResult<Option<UserRecord>> {
        self.db.find_user_by_session(token, Utc::now())
    }

    fn delete_session(&self, token: &str) -> AppResult<()> {
        if !self.db.delete_user_session(token)? {
            tracing::debug!("logout for unknown session token");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DemoUserService, UserService};
    use crate::config::{OAuthIdentity, OAuthSettings};
    use crate::db::Database;
    use std::sync::Arc;

    fn service() -> (tempfile::TempDir, DemoUserService) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let service = DemoUserService::new(db, OAuthSettings::default(), OAuthIdentity::default(), 60);
        (dir, service)
    }

    #[test]
    fn redirect_url_carries_client_and_encoded_callback() {
        let (_dir, service) = service();
        let url = service.oauth_redirect_url("google").expect("redirect url");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=dataflow-dashboard"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5173%2Fauth%2Fcallback"));
        assert!(url.contains("state="));
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let (_dir, service) = service();
        assert!(service.oauth_redirect_url("github").is_err());
    }

    #[test]
    fn code_exchange_round_trips_through_current_user() {
        let (_dir, service) = service();
        let token = service.exchange_code("auth-code-123").expect("exchange");
        let user = service.current_user(&token).expect("lookup").expect("user present");
        assert_eq!(user.email, OAuthIdentity::default().email);

        service.delete_session(&token).expect("delete");
        assert!(service.current_user(&token).expect("lookup").is_none());
        service.delete_session(&token).expect("second delete is harmless");
    }

    #[test]
    fn blank_code_is_rejected() {
        let (_dir, service) = service();
        let err = service.exchange_code("  ").expect_err("blank code");
        assert!(err.to_string().contains("No authorization code provided"));
    }
}
