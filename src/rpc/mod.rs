//! JSON-RPC 2.0 layer.

mod dispatcher;
mod protocol;

pub use dispatcher::{Dispatcher, MethodInfo, METHODS};
pub use protocol::{ErrorCode, Outcome, RpcError, RpcResponse, JSONRPC_VERSION};
