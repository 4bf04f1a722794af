use crate::demo::DemoError;
use crate::msg::MsgError;
use crate::net::NetError;
use crate::protocol::PROTOCOL_VERSION;

/// Conditions that end the current session. None of them end the process.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server is protocol {0} instead of {PROTOCOL_VERSION}")]
    BadProtocolVersion(i32),
    #[error("bad maxclients ({0}) from server")]
    BadMaxClients(i32),
    #[error("server sent too many model precaches")]
    TooManyModels,
    #[error("server sent too many sound precaches")]
    TooManySounds,
    #[error("model {0} not found")]
    ModelNotFound(String),
    #[error("received signon {received} when at {current}")]
    SignonOutOfOrder { received: i32, current: u8 },
    #[error("bad server message")]
    BadServerMessage,
    #[error("illegible server message (opcode {0})")]
    IllegibleMessage(i32),
    #[error("server disconnected")]
    ServerDisconnected,
    #[error("lost server connection")]
    LostConnection,
    #[error("{0} is an invalid entity number")]
    BadEntityNumber(i32),
    #[error("colormap {0} out of range")]
    BadColormap(i32),
    #[error("svc_updatestat: {0} is invalid")]
    BadStat(i32),
    #[error("svc_lightstyle {0} out of range")]
    BadLightStyle(i32),
    #[error("{op} for player {index} out of range")]
    BadPlayer { op: &'static str, index: i32 },
    #[error("sound entity {0} out of range")]
    BadSoundEntity(i32),
    #[error("too many static entities")]
    TooManyStatics,
    #[error("bad temp entity type {0}")]
    BadTempEntity(i32),
    #[error("keepalive: failed to read from server")]
    KeepaliveFailed,
    #[error("keepalive: received a reliable message while loading")]
    KeepaliveReliable,
    #[error("keepalive: datagram wasn't a nop")]
    KeepaliveNotNop,
    #[error("connect to {0} failed")]
    ConnectFailed(String),
    #[error(transparent)]
    Msg(#[from] MsgError),
    #[error(transparent)]
    Demo(#[from] DemoError),
    #[error(transparent)]
    Net(#[from] NetError),
}
