#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected { slot: usize, address: String },
    ClientSpawned { slot: usize, name: String },
    ClientDisconnected { slot: usize, reason: DisconnectReason },
    ConnectionDenied { address: String },
    Say { slot: usize, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Dropped,
    BadMessage,
    Overflowed,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Dropped => "lost connection",
            DisconnectReason::BadMessage => "sent a bad message",
            DisconnectReason::Overflowed => "overflowed",
            DisconnectReason::Shutdown => "server shut down",
        }
    }
}
