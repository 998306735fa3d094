//! `RpcTransport`: the seam between the pool and concrete clients.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One upstream endpoint.
///
/// Implementations must be `Send + Sync` and are stored as
/// `Arc<dyn RpcTransport>` inside an [`EndpointPool`](crate::EndpointPool).
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// One request, one response. HTTP-level failures are errors; a JSON-RPC
    /// error object is returned inside the response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Endpoint URL, used as the pool key in logs and metrics.
    fn url(&self) -> &str;
}

impl dyn RpcTransport {
    /// Call `method` and deserialize the result.
    ///
    /// A JSON-RPC error object in the response becomes [`TransportError::Rpc`].
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let resp = self.send(JsonRpcRequest::new(id, method, params)).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}
