use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{
    error::AppError,
    services::identity::{AuthError, AuthMode, DEFAULT_BYPASS_USER},
    state::SharedState,
};

/// Header naming the caller when authentication is bypassed.
pub const DEBUG_USER_HEADER: &str = "x-debug-userid";

/// Identity of the authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

impl CallerIdentity {
    /// Operations may only act on the caller's own identity.
    pub fn ensure_subject(&self, user_id: &str) -> Result<(), AppError> {
        if self.0 == user_id {
            Ok(())
        } else {
            Err(AppError::BadRequest(
                "token userId does not match request userId".into(),
            ))
        }
    }
}

/// Resolve the caller identity for every `/api` request.
pub async fn require_identity(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match state.auth() {
        AuthMode::Bypass => req
            .headers()
            .get(DEBUG_USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_BYPASS_USER)
            .to_owned(),
        AuthMode::Provider(provider) => {
            let credential = bearer_credential(req.headers()).ok_or(AuthError::MissingCredential)?;
            provider.verify(&credential).await?
        }
    };

    debug!(user_id = %identity, path = %req.uri().path(), "caller authenticated");
    req.extensions_mut().insert(CallerIdentity(identity));
    Ok(next.run(req).await)
}

fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credential) = value.split_once(' ')?;
    let credential = credential.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !credential.is_empty()).then(|| credential.to_owned())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn parses_bearer_credentials_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_credential(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_credential(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  token-1 "));
        assert_eq!(bearer_credential(&headers).as_deref(), Some("token-1"));
    }

    #[test]
    fn subject_must_match_caller() {
        let caller = CallerIdentity("alice".into());
        assert!(caller.ensure_subject("alice").is_ok());
        assert!(matches!(
            caller.ensure_subject("bob"),
            Err(AppError::BadRequest(_))
        ));
    }
}
