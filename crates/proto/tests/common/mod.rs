#![allow(dead_code)]

use std::collections::VecDeque;

use nq::config::{ClientConfig, NetConfig, ServerConfig};
use nq::net::{ConnectionId, Driver, DriverContext, LoopbackDriver, ManualClock, NetError, Received, SendStatus};
use nq::client::ListLoader;
use nq::{Host, NetManager};

pub fn loopback_config() -> NetConfig {
    NetConfig {
        enable_datagram: false,
        ..Default::default()
    }
}

pub fn loopback_manager(clock: &ManualClock) -> NetManager {
    NetManager::with_drivers(
        loopback_config(),
        vec![Box::new(LoopbackDriver::new())],
        Box::new(clock.clone()),
    )
}

pub fn single_player_config() -> ServerConfig {
    ServerConfig {
        max_clients: 1,
        ..Default::default()
    }
}

pub fn known_models(config: &ServerConfig) -> ListLoader {
    ListLoader::new(config.models.iter().cloned())
}

pub fn loopback_host(clock: &ManualClock) -> Host {
    loopback_host_with(clock, ClientConfig::default())
}

pub fn loopback_host_with(clock: &ManualClock, client_config: ClientConfig) -> Host {
    let server_config = single_player_config();
    let loader = known_models(&server_config);
    Host::new(
        loopback_manager(clock),
        client_config,
        server_config,
        Box::new(loader),
    )
}

/// A remote peer played from a script: one incoming connection, then the
/// queued results for every `get_message`. Sends always succeed.
pub struct ScriptedDriver {
    address: String,
    pending_connect: bool,
    incoming: VecDeque<(Received, Vec<u8>)>,
}

impl ScriptedDriver {
    pub fn new(address: &str, incoming: Vec<(Received, Vec<u8>)>) -> Self {
        Self {
            address: address.to_string(),
            pending_connect: true,
            incoming: incoming.into(),
        }
    }
}

impl Driver for ScriptedDriver {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn init(&mut self, _ctx: &mut DriverContext<'_>) -> bool {
        true
    }

    fn initialized(&self) -> bool {
        true
    }

    fn listen(&mut self, _ctx: &mut DriverContext<'_>, _enable: bool) -> Result<(), NetError> {
        Ok(())
    }

    fn search_for_hosts(&mut self, _ctx: &mut DriverContext<'_>, _xmit: bool) {}

    fn connect(
        &mut self,
        _ctx: &mut DriverContext<'_>,
        _host: &str,
    ) -> Result<Option<ConnectionId>, NetError> {
        Ok(None)
    }

    fn check_new_connections(
        &mut self,
        ctx: &mut DriverContext<'_>,
    ) -> Result<Option<ConnectionId>, NetError> {
        if !self.pending_connect {
            return Ok(None);
        }
        self.pending_connect = false;
        Ok(ctx.pool.allocate(&self.address, ctx.driver_index, ctx.net_time))
    }

    fn get_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        _id: ConnectionId,
    ) -> Result<Received, NetError> {
        match self.incoming.pop_front() {
            Some((received, payload)) => {
                if received.has_message() {
                    ctx.load_message(&payload)?;
                }
                Ok(received)
            }
            None => Ok(Received::Nothing),
        }
    }

    fn send_message(
        &mut self,
        _ctx: &mut DriverContext<'_>,
        _id: ConnectionId,
        _data: &[u8],
    ) -> Result<SendStatus, NetError> {
        Ok(SendStatus::Sent)
    }

    fn send_unreliable_message(
        &mut self,
        _ctx: &mut DriverContext<'_>,
        _id: ConnectionId,
        _data: &[u8],
    ) -> Result<SendStatus, NetError> {
        Ok(SendStatus::Sent)
    }

    fn can_send_message(
        &mut self,
        _ctx: &mut DriverContext<'_>,
        _id: ConnectionId,
    ) -> Result<bool, NetError> {
        Ok(true)
    }

    fn close(&mut self, _ctx: &mut DriverContext<'_>, _id: ConnectionId) {}

    fn shutdown(&mut self, _ctx: &mut DriverContext<'_>) {}
}

pub fn scripted_manager(clock: &ManualClock, incoming: Vec<(Received, Vec<u8>)>) -> NetManager {
    NetManager::with_drivers(
        loopback_config(),
        vec![Box::new(ScriptedDriver::new("10.0.0.7:26000", incoming))],
        Box::new(clock.clone()),
    )
}
