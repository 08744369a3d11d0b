use async_trait::async_trait;
use std::collections::HashMap;

/// HTTP headers to send with the connection request
pub type Headers = HashMap<String, String>;

/// Trait for providing HTTP headers dynamically
///
/// Called on every connection and reconnection, so headers can carry
/// values that change between attempts (session ids, client version,
/// tenant routing keys).
///
/// # Example
/// ```ignore
/// struct ClientInfo {
///     version: String,
/// }
///
/// #[async_trait::async_trait]
/// impl HeaderProvider for ClientInfo {
///     async fn get_headers(&self) -> Headers {
///         let mut headers = Headers::new();
///         headers.insert("X-Client-Version".to_string(), self.version.clone());
///         headers
///     }
/// }
/// ```
#[async_trait]
pub trait HeaderProvider: Send + Sync {
    /// Generate headers to send with the connection request
    async fn get_headers(&self) -> Headers;
}

/// A no-op header provider that doesn't add any headers
pub struct NoHeaders;

#[async_trait]
impl HeaderProvider for NoHeaders {
    async fn get_headers(&self) -> Headers {
        HashMap::new()
    }
}

/// A fixed set of headers
pub struct StaticHeaders(pub Headers);

#[async_trait]
impl HeaderProvider for StaticHeaders {
    async fn get_headers(&self) -> Headers {
        self.0.clone()
    }
}
