//! Turning a bearer credential into a user identity.

use std::{collections::HashMap, env, sync::Arc};

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{info, warn};

const AUTH_BYPASS_ENV: &str = "AUTH_BYPASS";
const USERINFO_URL_ENV: &str = "AUTH_USERINFO_URL";

/// Identity used in bypass mode when the request does not name one.
pub const DEFAULT_BYPASS_USER: &str = "local-user";

/// Failure to establish the caller's identity.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer token on the request.
    #[error("missing bearer credential")]
    MissingCredential,
    /// The provider does not accept the token.
    #[error("credential rejected")]
    Rejected,
    /// The provider could not be reached or answered garbage.
    #[error("identity provider unavailable: {0}")]
    Provider(String),
    /// Authentication settings are invalid.
    #[error("authentication is not configured: {0}")]
    Misconfigured(String),
}

/// Verifies a credential and returns the identity it belongs to.
pub trait IdentityProvider: Send + Sync {
    /// Resolve `credential` to a user identity.
    fn verify(&self, credential: &str) -> BoxFuture<'static, Result<String, AuthError>>;
}

/// How `/api` requests are authenticated.
#[derive(Clone)]
pub enum AuthMode {
    /// Development mode: the identity is taken from the `X-Debug-UserId` header.
    Bypass,
    /// Every request is verified by the provider.
    Provider(Arc<dyn IdentityProvider>),
}

impl AuthMode {
    /// Select the authentication mode from `AUTH_BYPASS` and `AUTH_USERINFO_URL`.
    pub fn from_env() -> Result<Self, AuthError> {
        let bypass = env::var(AUTH_BYPASS_ENV)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if bypass {
            warn!("authentication bypass enabled; identities are taken from X-Debug-UserId");
            return Ok(AuthMode::Bypass);
        }

        let endpoint = env::var(USERINFO_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                AuthError::Misconfigured(format!("set {USERINFO_URL_ENV} or {AUTH_BYPASS_ENV}=true"))
            })?;
        Self::userinfo(endpoint)
    }

    #[cfg(feature = "userinfo-auth")]
    fn userinfo(endpoint: String) -> Result<Self, AuthError> {
        info!(endpoint = %endpoint, "verifying credentials against userinfo endpoint");
        Ok(AuthMode::Provider(Arc::new(UserInfoIdentityProvider::new(
            endpoint,
        ))))
    }

    #[cfg(not(feature = "userinfo-auth"))]
    fn userinfo(endpoint: String) -> Result<Self, AuthError> {
        info!(endpoint = %endpoint, "userinfo endpoint configured without provider support");
        Err(AuthError::Misconfigured(
            "built without the `userinfo-auth` feature".into(),
        ))
    }
}

/// Fixed credential table.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, String>,
}

impl StaticIdentityProvider {
    /// Provider accepting exactly the given `token -> user` pairs.
    pub fn new<I, K, V>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, user)| (token.into(), user.into()))
                .collect(),
        }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn verify(&self, credential: &str) -> BoxFuture<'static, Result<String, AuthError>> {
        let resolved = self.tokens.get(credential).cloned();
        Box::pin(async move { resolved.ok_or(AuthError::Rejected) })
    }
}

#[cfg(feature = "userinfo-auth")]
pub use self::userinfo::UserInfoIdentityProvider;

#[cfg(feature = "userinfo-auth")]
mod userinfo {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use dashmap::DashMap;
    use futures::future::BoxFuture;
    use reqwest::{Client, StatusCode};
    use serde::Deserialize;
    use tracing::debug;

    use super::{AuthError, IdentityProvider};

    const CACHE_TTL: Duration = Duration::from_secs(60);

    #[derive(Deserialize)]
    struct UserInfo {
        sub: String,
    }

    #[derive(Clone)]
    struct CachedIdentity {
        user_id: String,
        expires_at: Instant,
    }

    /// Resolves credentials through an OpenID Connect userinfo endpoint.
    ///
    /// Accepted credentials are cached for a minute.
    #[derive(Clone)]
    pub struct UserInfoIdentityProvider {
        client: Client,
        endpoint: String,
        cache: Arc<DashMap<String, CachedIdentity>>,
    }

    impl UserInfoIdentityProvider {
        /// Provider calling the userinfo `endpoint`.
        pub fn new(endpoint: String) -> Self {
            Self {
                client: Client::new(),
                endpoint,
                cache: Arc::new(DashMap::new()),
            }
        }
    }

    impl IdentityProvider for UserInfoIdentityProvider {
        fn verify(&self, credential: &str) -> BoxFuture<'static, Result<String, AuthError>> {
            let client = self.client.clone();
            let endpoint = self.endpoint.clone();
            let cache = self.cache.clone();
            let credential = credential.to_owned();

            Box::pin(async move {
                if let Some(cached) = cache.get(&credential) {
                    if cached.expires_at > Instant::now() {
                        return Ok(cached.user_id.clone());
                    }
                }
                cache.remove_if(&credential, |_, cached| cached.expires_at <= Instant::now());

                let response = client
                    .get(&endpoint)
                    .bearer_auth(&credential)
                    .send()
                    .await
                    .map_err(|err| AuthError::Provider(err.to_string()))?;

                match response.status() {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        return Err(AuthError::Rejected);
                    }
                    status if !status.is_success() => {
                        return Err(AuthError::Provider(format!(
                            "userinfo endpoint answered {status}"
                        )));
                    }
                    _ => {}
                }

                let info: UserInfo = response
                    .json()
                    .await
                    .map_err(|err| AuthError::Provider(err.to_string()))?;
                if info.sub.trim().is_empty() {
                    return Err(AuthError::Rejected);
                }

                debug!(user_id = %info.sub, "credential verified");
                cache.insert(
                    credential,
                    CachedIdentity {
                        user_id: info.sub.clone(),
                        expires_at: Instant::now() + CACHE_TTL,
                    },
                );
                Ok(info.sub)
            })
        }
    }
}
