use super::clock::Clock;
use super::connection::{ConnectionId, ConnectionPool};
use super::error::NetError;
use super::hostcache::HostCache;
use crate::config::NetConfig;
use crate::msg::MessageBuffer;

/// Outcome of polling a connection for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Dead,
    Nothing,
    Reliable,
    Unreliable,
}

impl Received {
    pub fn code(self) -> i32 {
        match self {
            Received::Dead => -1,
            Received::Nothing => 0,
            Received::Reliable => 1,
            Received::Unreliable => 2,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Received::Reliable,
            2 => Received::Unreliable,
            0 => Received::Nothing,
            _ => Received::Dead,
        }
    }

    pub fn has_message(self) -> bool {
        matches!(self, Received::Reliable | Received::Unreliable)
    }
}

/// Outcome of handing a message to a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Dead,
    /// Not sent, but the connection is still alive.
    Rejected,
    Sent,
}

impl SendStatus {
    pub fn code(self) -> i32 {
        match self {
            SendStatus::Dead => -1,
            SendStatus::Rejected => 0,
            SendStatus::Sent => 1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => SendStatus::Sent,
            0 => SendStatus::Rejected,
            _ => SendStatus::Dead,
        }
    }
}

/// What a running local server advertises to host searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalServerInfo {
    pub hostname: String,
    pub map: String,
    pub max_users: u8,
}

/// Manager state lent to a driver for the duration of one call.
pub struct DriverContext<'a> {
    pub pool: &'a mut ConnectionPool,
    /// Scratch buffer that receives every incoming message.
    pub net_message: &'a mut MessageBuffer,
    pub host_cache: &'a mut HostCache,
    pub clock: &'a dyn Clock,
    pub net_time: f64,
    pub host_time: f64,
    pub driver_index: usize,
    pub hostport: u16,
    pub max_clients: usize,
    pub config: &'a NetConfig,
    pub local_server: Option<&'a LocalServerInfo>,
}

impl DriverContext<'_> {
    pub fn refresh_time(&mut self) -> f64 {
        self.net_time = self.clock.now();
        self.net_time
    }

    /// Connections accepted on the server side.
    pub fn server_connections(&self) -> usize {
        self.pool
            .active()
            .filter(|id| self.pool.get(*id).is_some_and(|c| c.server_side))
            .count()
    }

    /// Replaces the scratch message with `data`.
    pub fn load_message(&mut self, data: &[u8]) -> Result<(), NetError> {
        self.net_message.clear();
        self.net_message.write(data)?;
        Ok(())
    }
}

/// A transport backend. Every call is non-blocking except the bounded
/// connect handshake of real network drivers.
pub trait Driver {
    fn name(&self) -> &'static str;

    /// Returns false when the driver cannot run on this host.
    fn init(&mut self, ctx: &mut DriverContext<'_>) -> bool;

    fn initialized(&self) -> bool;

    fn listen(&mut self, ctx: &mut DriverContext<'_>, enable: bool) -> Result<(), NetError>;

    fn search_for_hosts(&mut self, ctx: &mut DriverContext<'_>, xmit: bool);

    fn connect(
        &mut self,
        ctx: &mut DriverContext<'_>,
        host: &str,
    ) -> Result<Option<ConnectionId>, NetError>;

    fn check_new_connections(
        &mut self,
        ctx: &mut DriverContext<'_>,
    ) -> Result<Option<ConnectionId>, NetError>;

    /// On `Reliable`/`Unreliable` the payload is left in `ctx.net_message`.
    fn get_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<Received, NetError>;

    fn send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        data: &[u8],
    ) -> Result<SendStatus, NetError>;

    fn send_unreliable_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        data: &[u8],
    ) -> Result<SendStatus, NetError>;

    fn can_send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<bool, NetError>;

    fn can_send_unreliable_message(
        &mut self,
        _ctx: &mut DriverContext<'_>,
        _id: ConnectionId,
    ) -> Result<bool, NetError> {
        Ok(true)
    }

    /// Tears down driver state for `id`. The manager frees the slot.
    fn close(&mut self, ctx: &mut DriverContext<'_>, id: ConnectionId);

    fn shutdown(&mut self, ctx: &mut DriverContext<'_>);

    /// In-process drivers are not counted in statistics.
    fn is_local(&self) -> bool {
        false
    }

    /// Whether silent connections on this driver are dropped.
    fn times_out(&self) -> bool {
        !self.is_local()
    }

    fn log_stats(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for code in -1..=2 {
            assert_eq!(Received::from_code(code).code(), code);
        }
        for code in -1..=1 {
            assert_eq!(SendStatus::from_code(code).code(), code);
        }
        assert!(Received::Unreliable.has_message());
        assert!(!Received::Nothing.has_message());
    }
}
