use std::time::Duration;
use async_trait::async_trait;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connection failure, timeout or broken body
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Retrieves descriptor documents.
///
/// Implementations must honor `timeout` for the whole request.
#[async_trait]
pub trait DescriptorFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// `DescriptorFetcher` over plain HTTP GET
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DescriptorFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let transport = |source: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use axum::{routing::get, Router};

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn app() -> Router {
        Router::new()
            .route("/desc.xml", get(|| async { "<root><device/></root>" }))
            .route(
                "/slow.xml",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "<root/>"
                }),
            )
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let addr = serve(app()).await;
        let body = HttpFetcher::new()
            .fetch(&format!("http://{}/desc.xml", addr), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(body, b"<root><device/></root>");
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let addr = serve(app()).await;
        let err = HttpFetcher::new()
            .fetch(&format!("http://{}/missing.xml", addr), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let addr = serve(app()).await;
        let started = std::time::Instant::now();
        let err = HttpFetcher::new()
            .fetch(&format!("http://{}/slow.xml", addr), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let err = HttpFetcher::new()
            .fetch("not a url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
