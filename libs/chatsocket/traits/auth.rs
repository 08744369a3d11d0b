use async_trait::async_trait;
use parking_lot::Mutex;

/// Trait for supplying the auth token used on connect
///
/// The client asks for a token before every connection attempt. After the
/// server rejects a connection with an auth/policy close code, the client
/// calls `token(true)` exactly once before the next attempt and uses the
/// returned value for that attempt.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return the current token
    ///
    /// # Arguments
    /// * `force_refresh` - `true` when the previous connection was rejected
    ///   and a fresh credential is required
    ///
    /// # Returns
    /// * `Some(token)` - Use this token for the next attempt
    /// * `None` - Connect without a token
    async fn token(&self, force_refresh: bool) -> Option<String>;
}

/// A token provider that never supplies a token
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn token(&self, _force_refresh: bool) -> Option<String> {
        None
    }
}

/// A fixed token, returned for both normal and forced lookups
pub struct StaticToken {
    token: Mutex<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(token.into()),
        }
    }

    /// Replace the token handed out on the next lookup
    pub fn set(&self, token: impl Into<String>) {
        *self.token.lock() = token.into();
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _force_refresh: bool) -> Option<String> {
        Some(self.token.lock().clone())
    }
}
