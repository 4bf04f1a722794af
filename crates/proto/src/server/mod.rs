//! Server half of the protocol: message encoders and a minimal listen
//! server that walks clients through signon.

pub mod encode;
mod events;
mod local;
mod world;

pub use events::{DisconnectReason, ServerEvent};
pub use local::{LocalServer, MoveCommand, ServerClient, ServerError};
pub use world::{Orbit, ServerEntity, World};
