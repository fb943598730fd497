//! Gateway: the HTTP front door for inbound commands and the RPC listener for skill packages.
//!
//! Two ports on one bind address. `POST /` and `POST /twilio` feed the dispatcher; `POST /rpc`
//! on the RPC port answers `{ id, method, params }` requests.

mod protocol;
mod rpc;
mod server;

pub use protocol::{CommandForm, RpcRequest, RpcResponse, TwilioForm};
pub use rpc::handle_rpc;
pub use server::{build_state, http_router, rpc_router, run_gateway, GatewayState};
