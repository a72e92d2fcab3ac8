//! Peer Client
//!
//! HTTP client for talking to other nodes. Every call takes an explicit
//! timeout because the different callers bound their requests differently:
//! replication attempts, health probes, and election broadcasts each carry
//! their own configured deadline.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// HTTP client for peer-to-peer calls
#[derive(Clone)]
pub struct PeerClient {
    client: reqwest::Client,
}

impl PeerClient {
    /// Create a new peer client
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    fn map_send_error(address: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::TransportTimeout(address.to_string())
        } else {
            Error::Transport {
                address: address.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// POST a JSON body to a peer and decode the JSON response
    pub async fn post_json<B, R>(
        &self,
        address: &str,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(Self::url(address, path))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| Self::map_send_error(address, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::PeerRejected {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<R>().await.map_err(|e| Error::Transport {
            address: address.to_string(),
            reason: format!("invalid response body: {}", e),
        })
    }

    /// GET a JSON resource from a peer
    pub async fn get_json<R>(&self, address: &str, path: &str, timeout: Duration) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let response = self
            .client
            .get(Self::url(address, path))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(address, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::PeerRejected {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<R>().await.map_err(|e| Error::Transport {
            address: address.to_string(),
            reason: format!("invalid response body: {}", e),
        })
    }

    /// Probe a peer's health endpoint, succeeding on any 2xx
    pub async fn check_health(&self, address: &str, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .get(Self::url(address, "/health"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(address, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::PeerRejected {
                address: address.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_get_json() {
        let router = Router::new().route(
            "/role",
            get(|| async { Json(serde_json::json!({"role": "replica", "epoch": 3})) }),
        );
        let base = serve(router).await;

        let client = PeerClient::new();
        let value: serde_json::Value = client
            .get_json(&base, "/role", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value["epoch"], 3);
    }

    #[tokio::test]
    async fn test_non_success_is_rejection() {
        let router = Router::new().route(
            "/health",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(router).await;

        let client = PeerClient::new();
        let err = client
            .check_health(&base, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeerRejected { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        let client = PeerClient::new();
        // Port 9 is discard; nothing listens there in the test environment
        let err = client
            .check_health("http://127.0.0.1:9", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
