//! Pack transport.
//!
//! A transport turns a pack URL into a byte stream of the compressed pack.
//! [`HttpTransport`] is the real implementation; tests supply their own.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Fetch-by-URL capability used by the pack fetcher.
pub trait PackTransport: Send + Sync {
    /// Open a stream of the resource at `url`.
    ///
    /// With `bypass_proxy`, the request goes directly to the server even if
    /// a proxy is configured. Failures to connect or non-success responses
    /// should be reported as [`SyncError::Transport`] so they are retried.
    fn open(&self, url: &str, bypass_proxy: bool) -> SyncResult<Box<dyn Read + Send>>;
}

/// Proxy settings for [`HttpTransport`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// Proxy URL, with or without scheme and credentials.
    pub url: String,
    /// User name, used when the URL carries no credentials.
    pub user: Option<String>,
    /// Password, used when the URL carries no credentials.
    pub password: Option<String>,
}

impl ProxySettings {
    /// Proxy at `url` with no separate credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
        }
    }

    /// Set credentials applied when the URL has none.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// The proxy URL with a scheme, defaulting to `http://`.
    fn normalized_url(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("http://{}", self.url)
        }
    }

    /// Whether the URL embeds `user[:password]@`.
    fn has_embedded_credentials(&self) -> bool {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let authority = rest.split('/').next().unwrap_or(rest);
        authority.contains('@')
    }
}

/// HTTP transport backed by a blocking reqwest client.
///
/// Holds two clients: one routed through the configured proxy and one that
/// always connects directly, for manifests that ask to bypass the proxy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    direct: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout and no proxy.
    pub fn new() -> SyncResult<Self> {
        Self::with_options(Duration::from_secs(DEFAULT_TIMEOUT_SECS), None)
    }

    /// Create a transport with a custom timeout and optional proxy.
    pub fn with_options(timeout: Duration, proxy: Option<&ProxySettings>) -> SyncResult<Self> {
        let direct = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| SyncError::Transport {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        let client = match proxy {
            Some(settings) => {
                let url = settings.normalized_url();
                let mut proxy = reqwest::Proxy::all(&url).map_err(|e| SyncError::Transport {
                    url: url.clone(),
                    reason: format!("invalid proxy: {}", e),
                })?;
                if !settings.has_embedded_credentials() {
                    if let Some(user) = &settings.user {
                        proxy = proxy.basic_auth(user, settings.password.as_deref().unwrap_or(""));
                    }
                }
                debug!(proxy = %url, "Using HTTP proxy");

                Client::builder()
                    .timeout(timeout)
                    .proxy(proxy)
                    .build()
                    .map_err(|e| SyncError::Transport {
                        url,
                        reason: format!("failed to create HTTP client: {}", e),
                    })?
            }
            None => direct.clone(),
        };

        Ok(Self {
            client,
            direct,
            timeout,
        })
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl PackTransport for HttpTransport {
    fn open(&self, url: &str, bypass_proxy: bool) -> SyncResult<Box<dyn Read + Send>> {
        let client = if bypass_proxy { &self.direct } else { &self.client };

        let response = client.get(url).send().map_err(|e| SyncError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(SyncError::Transport {
                url: url.to_string(),
                reason: format!("HTTP status {}", response.status()),
            });
        }

        Ok(Box::new(response))
    }
}
