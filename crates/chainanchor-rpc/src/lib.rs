//! chainanchor-rpc — upstream JSON-RPC access for the indexing pipeline.
//!
//! # Architecture
//!
//! ```text
//! caller ── EndpointPool::with_endpoint(op)
//!               ├── select()      round-robin, skips disabled / cooling
//!               ├── op(transport) HttpRpcClient (reqwest) or any RpcTransport
//!               └── classify(err) RateLimited → cooldown, try next
//!                                 FatalEndpoint → disable, try next
//!                                 Other → propagate
//! ```

pub mod classify;
pub mod error;
pub mod http;
pub mod pool;
pub mod request;
pub mod retry;
pub mod transport;

pub use classify::{classify, is_log_limit_error, FailureClass};
pub use error::TransportError;
pub use http::HttpRpcClient;
pub use pool::{EndpointHealth, EndpointPool, PoolConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::RpcTransport;
