//! EIP-1193 over HTTP JSON-RPC.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use aa_session_core::traits::{Eip1193Provider, RpcError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

/// Default request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

/// JSON-RPC client for chain nodes and bundlers.
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a client for `url` with the default timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(url: Url) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    /// Create a client sharing an existing `reqwest::Client`.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, url: Url) -> Self {
        Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        }
    }

}

/// Statuses worth retrying: server faults, timeouts and rate limiting.
fn is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl Eip1193Provider for HttpRpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let params = if params.is_null() { json!([]) } else { params };
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::debug!("JSON-RPC {method} -> {}", self.url.host_str().unwrap_or("?"));
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        if is_transient(status) {
            return Err(RpcError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(RpcError::Rpc {
                code: i64::from(status.as_u16()),
                message: status.canonical_reason().unwrap_or("HTTP error").to_string(),
            });
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| RpcError::InvalidResponse(format!("{method}: missing result")))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{Json, Router, http::StatusCode, routing::post};

    use super::*;

    async fn fake_node(Json(req): Json<Value>) -> (StatusCode, Json<Value>) {
        let id = req["id"].clone();
        match req["method"].as_str() {
            Some("eth_chainId") => (
                StatusCode::OK,
                Json(json!({ "jsonrpc": "2.0", "id": id, "result": "0x13881" })),
            ),
            Some("eth_getBalance") => {
                assert_eq!(req["params"][1], "latest");
                (
                    StatusCode::OK,
                    Json(json!({ "jsonrpc": "2.0", "id": id, "result": "0x14d1120d7b160000" })),
                )
            }
            Some("eth_accounts") => {
                assert_eq!(req["params"], json!([]));
                (StatusCode::OK, Json(json!({ "jsonrpc": "2.0", "id": id })))
            }
            Some("boom") => (StatusCode::BAD_GATEWAY, Json(json!({}))),
            Some("forbidden") => (StatusCode::UNAUTHORIZED, Json(json!({}))),
            Some("throttled") => (StatusCode::TOO_MANY_REQUESTS, Json(json!({}))),
            Some("slow") => (StatusCode::REQUEST_TIMEOUT, Json(json!({}))),
            _ => (
                StatusCode::OK,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": "method not found" }
                })),
            ),
        }
    }

    async fn serve() -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(fake_node));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn test_result_is_returned() {
        let client = HttpRpcClient::new(serve().await).unwrap();
        let chain = client.request("eth_chainId", Value::Null).await.unwrap();
        assert_eq!(chain, "0x13881");
        let balance = client
            .request("eth_getBalance", json!(["0x0000000000000000000000000000000000000000", "latest"]))
            .await
            .unwrap();
        assert_eq!(balance, "0x14d1120d7b160000");
    }

    #[tokio::test]
    async fn test_error_object_maps_to_rpc_error() {
        let client = HttpRpcClient::new(serve().await).unwrap();
        let err = tokio_test::assert_err!(client.request("eth_nope", json!([])).await);
        assert_eq!(
            err,
            RpcError::Rpc {
                code: -32601,
                message: "method not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_result_is_invalid() {
        let client = HttpRpcClient::new(serve().await).unwrap();
        let err = client.request("eth_accounts", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_http_status_mapping() {
        let client = HttpRpcClient::new(serve().await).unwrap();
        assert!(matches!(
            client.request("boom", json!([])).await,
            Err(RpcError::Transport(_))
        ));
        assert!(matches!(
            client.request("forbidden", json!([])).await,
            Err(RpcError::Rpc { code: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_throttling_and_timeouts_are_transport_errors() {
        let client = HttpRpcClient::new(serve().await).unwrap();
        assert!(matches!(
            client.request("throttled", json!([])).await,
            Err(RpcError::Transport(_))
        ));
        assert!(matches!(
            client.request("slow", json!([])).await,
            Err(RpcError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = HttpRpcClient::new(Url::parse(&format!("http://{addr}/")).unwrap()).unwrap();
        assert!(matches!(
            client.request("eth_chainId", json!([])).await,
            Err(RpcError::Transport(_))
        ));
    }
}
