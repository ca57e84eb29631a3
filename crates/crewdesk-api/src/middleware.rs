use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::{AppState, verify_caller};
use crate::error::ChatError;

/// Extract and validate the bearer token, then stash the `Caller` for handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ChatError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ChatError::Unauthenticated)?;

    let caller = verify_caller(token, &state.jwt_secret)?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
