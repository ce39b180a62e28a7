//! Pull wire protocol: JSON-RPC control messages, frame decoding and the
//! envelope-to-event mapping.

pub mod codec;
pub mod constants;
mod dedup;
mod rpc_id;

pub use codec::{ProtocolCodec, Publication, ServerCommand};
pub use constants::{close_code, method};
pub use dedup::RecentMessageIds;
pub use rpc_id::RpcIdCounter;
