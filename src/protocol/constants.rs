//! Wire constants of the pull protocol.

pub const JSON_RPC_VERSION: &str = "2.0";

/// Bare keyword liveness checks exchanged outside JSON-RPC.
pub const PING_KEYWORD: &str = "ping";
pub const PONG_KEYWORD: &str = "pong";

/// Query-string constants sent on every connect.
pub const PROTOCOL_VERSION: &str = "2";
pub const WIRE_FORMAT: &str = "json";
pub const CONNECTION_MODE: &str = "pull";

/// Web revision assumed until the server announces one.
pub const DEFAULT_REVISION: i64 = 19;

/// `Sec-WebSocket-Protocol` value requested by the client.
pub const SUBPROTOCOL: &str = "binary";

pub mod method {
    pub const PUSH: &str = "push";
    pub const MESSAGE: &str = "message";
    pub const STATE: &str = "state";
    pub const CONFIG: &str = "config";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const ACK: &str = "ack";
    pub const PUBLISH: &str = "publish";
    pub const SUBSCRIBE_STATUS: &str = "subscribeStatusChange";
    pub const UNSUBSCRIBE_STATUS: &str = "unsubscribeStatusChange";
}

/// WebSocket close codes used by the server and by us.
pub mod close_code {
    pub const NORMAL_CLOSURE: u16 = 1000;
    pub const SERVER_DIE: u16 = 1001;
    pub const CONFIG_REPLACED: u16 = 3000;
    pub const CHANNEL_EXPIRED: u16 = 3001;
    pub const SERVER_RESTARTED: u16 = 3002;
    pub const CONFIG_EXPIRED: u16 = 3003;
    pub const MANUAL: u16 = 3004;
    pub const STUCK: u16 = 3005;
    pub const WRONG_CHANNEL_ID: u16 = 4010;

    /// Codes after which the session data must be refreshed before reconnecting.
    pub fn requires_refresh(code: u16) -> bool {
        matches!(code, CONFIG_REPLACED | CHANNEL_EXPIRED | CONFIG_EXPIRED)
    }
}

/// Params keys that identify the chat a frame belongs to, in lookup order.
pub const CHANNEL_ID_KEYS: [&str; 4] = ["group_id", "chat_id", "dialog_id", "channel_id"];
