pub mod client;
pub mod command;
pub mod config;
pub mod demo;
pub mod host;
pub mod msg;
pub mod net;
pub mod protocol;
pub mod server;

pub use client::{ClientError, ClientEvent, ClientSession, UserCmd};
pub use command::{Command, CommandError};
pub use config::{ClientConfig, ConfigError, NetConfig, ServerConfig};
pub use demo::{DemoError, DemoReader, DemoWriter};
pub use host::{Host, HostError};
pub use msg::{MessageBuffer, MessageReader, MsgError};
pub use net::{
    Clock, ConnectionId, LoopbackDriver, ManualClock, NetError, NetManager, Received, SendStatus,
    SystemClock,
};
pub use protocol::{DEFAULT_PORT, PROTOCOL_VERSION};
pub use server::{LocalServer, ServerError, ServerEvent};
