//! pairwatch-http: HTTP collaborators: GoPlus trust checks and factory validation.

pub mod goplus;
pub mod rpc;
pub mod validate;

pub use goplus::GoPlusTrustCheck;
pub use rpc::{HttpRpcClient, RpcTransport};
pub use validate::validate_factories;
