//! Client session: turns server messages into interpolated world state and
//! drives the signon handshake.

mod entity;
mod error;
mod events;
mod lerp;
pub mod loader;
mod parse;
mod session;
mod state;

pub use entity::{EntityState, EntitySnapshot, EntityUpdate};
pub use error::ClientError;
pub use events::{ClientEvent, DecodedMessage, TempEntity};
pub use loader::{ListLoader, ModelInfo, NullLoader, ResourceLoader};
pub use session::ClientSession;
pub use state::{
    Beam, CLIENT_MESSAGE_SIZE, ClientState, ClientStatic, ConnectionState, Scoreboard, UserCmd,
};
