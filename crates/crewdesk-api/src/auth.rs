use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use crewdesk_gateway::Dispatcher;
use crewdesk_types::api::Claims;
use crewdesk_types::models::GlobalRole;

use crate::error::ChatError;
use crate::store::MessageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: MessageStore,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub heartbeat: Duration,
}

/// The authenticated identity behind a request or realtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub username: String,
    pub role: GlobalRole,
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
        }
    }
}

/// Decode and validate an HS256 token issued by the auth service.
pub fn verify_caller(token: &str, secret: &str) -> Result<Caller, ChatError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("token rejected: {}", e);
        ChatError::Unauthenticated
    })?;

    Ok(data.claims.into())
}

/// Mint a token the way the auth service does. Used by tests and local tooling.
pub fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    role: GlobalRole,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-for-unit-tests";

    #[test]
    fn token_round_trips_identity() {
        let id = Uuid::new_v4();
        let token = create_token(SECRET, id, "ada", GlobalRole::Admin).unwrap();
        let caller = verify_caller(&token, SECRET).unwrap();
        assert_eq!(caller.user_id, id);
        assert_eq!(caller.username, "ada");
        assert_eq!(caller.role, GlobalRole::Admin);
    }

    #[test]
    fn wrong_secret_is_unauthenticated() {
        let token = create_token(SECRET, Uuid::new_v4(), "ada", GlobalRole::Member).unwrap();
        assert!(matches!(
            verify_caller(&token, "another-secret"),
            Err(ChatError::Unauthenticated)
        ));
    }

    #[test]
    fn expired_token_is_unauthenticated() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "ada".into(),
            role: GlobalRole::Member,
            exp: (chrono::Utc::now() - chrono::Duration::hours(2)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(matches!(verify_caller(&token, SECRET), Err(ChatError::Unauthenticated)));
    }

    #[test]
    fn garbage_is_unauthenticated() {
        assert!(matches!(verify_caller("not.a.jwt", SECRET), Err(ChatError::Unauthenticated)));
    }
}
