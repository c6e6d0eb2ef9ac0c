//! Connection authentication
//!
//! The server trusts an upstream identity system; it only needs to map a
//! bearer token presented at connect time to a user id. Deployments plug
//! their verifier in through [`Authenticator`]; the bundled
//! [`StaticTokenAuthenticator`] covers development and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use huddle_call_engine::types::UserId;

/// Resolves a connect-time bearer token to a user identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `None` means the token is unknown and the connection is refused
    async fn authenticate(&self, token: &str) -> Option<UserId>;
}

/// Fixed token-to-user table
pub struct StaticTokenAuthenticator {
    tokens: DashMap<String, UserId>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    pub fn add_token(&self, token: impl Into<String>, user_id: UserId) {
        self.tokens.insert(token.into(), user_id);
    }

    /// Parse `user=token` pairs, comma separated
    pub fn from_spec(spec: &str) -> anyhow::Result<Self> {
        let auth = Self::new();
        for pair in spec.split(',').filter(|p| !p.trim().is_empty()) {
            let (user, token) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("bad token spec entry: {pair}"))?;
            auth.add_token(token.trim(), UserId::from(user.trim()));
        }
        Ok(auth)
    }
}

impl Default for StaticTokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).map(|entry| entry.clone())
    }
}
