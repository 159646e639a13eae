//! The GET primitive the updater downloads through.
//!
//! [`HttpTransport`] is the seam tests use to serve archives and version
//! markers from memory. [`DefaultTransport`] uses `reqwest` for `http(s)://`
//! and reads the file directly for `file://` URLs.

use crate::constants::HTTP_REQUEST_TIMEOUT;
use reqwest::Url;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// A failed GET.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: u16,
    },

    #[error("Request to {url} failed: {reason}")]
    Request {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported URL: {url}")]
    Unsupported {
        url: String,
    },
}

impl TransportError {
    /// Whether the same request may succeed if tried again.
    ///
    /// Connect errors, timeouts, 5xx and 429 are transient. Other 4xx responses
    /// and local file errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Status {
                status,
                ..
            } => *status == 429 || *status >= 500,
            Self::Request {
                retryable,
                ..
            } => *retryable,
            Self::Local {
                ..
            }
            | Self::Unsupported {
                ..
            } => false,
        }
    }
}

/// Fetches the body of a URL.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// `reqwest` for `http(s)://`, the local filesystem for `file://`.
#[derive(Debug, Clone)]
pub struct DefaultTransport {
    client: reqwest::Client,
}

impl DefaultTransport {
    /// Build a client with the default per-request timeout.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .user_agent(concat!("safeup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                reason: format!("cannot build HTTP client: {e}"),
                retryable: false,
            })?;
        Ok(Self {
            client,
        })
    }

    async fn get_http(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.client.get(url).send().await.map_err(|e| request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| request_error(url, &e))?;
        debug!(url, bytes = body.len(), "Downloaded");
        Ok(body.to_vec())
    }
}

impl HttpTransport for DefaultTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::Unsupported {
            url: url.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => self.get_http(url).await,
            "file" => {
                let path = parsed.to_file_path().map_err(|()| TransportError::Unsupported {
                    url: url.to_string(),
                })?;
                tokio::fs::read(&path).await.map_err(|source| TransportError::Local {
                    path,
                    source,
                })
            }
            _ => Err(TransportError::Unsupported {
                url: url.to_string(),
            }),
        }
    }
}

fn request_error(url: &str, error: &reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        reason: error.to_string(),
        retryable: error.is_timeout() || error.is_connect() || error.is_body(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_retryable_classification() {
        let status = |status| TransportError::Status {
            url: "u".into(),
            status,
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(
            !TransportError::Unsupported {
                url: "ftp://x".into()
            }
            .is_retryable()
        );
    }

    #[tokio::test]
    async fn test_reads_file_urls() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("VERSION");
        std::fs::write(&path, "1.2.3\n").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let body = DefaultTransport::new().unwrap().get(url.as_str()).await.unwrap();
        assert_eq!(body, b"1.2.3\n");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_retryable() {
        let temp = TempDir::new().unwrap();
        let url = Url::from_file_path(temp.path().join("missing.zip")).unwrap();

        let err = DefaultTransport::new().unwrap().get(url.as_str()).await.unwrap_err();
        assert!(matches!(err, TransportError::Local { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = DefaultTransport::new().unwrap().get("ftp://example.com/x").await.unwrap_err();
        assert!(matches!(err, TransportError::Unsupported { .. }));
    }
}
