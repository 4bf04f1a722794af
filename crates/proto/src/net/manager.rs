use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::connection::{Connection, ConnectionId, ConnectionPool};
use super::datagram::DatagramDriver;
use super::driver::{Driver, DriverContext, LocalServerInfo, Received, SendStatus};
use super::error::NetError;
use super::hostcache::HostCache;
use super::loopback::{LOCAL_ADDRESS, LoopbackDriver};
use super::schedule::{PollProcedure, Schedule};
use super::stats::NetStats;
use super::vcr::{VcrOp, VcrPlayback, VcrRecorder};
use crate::config::NetConfig;
use crate::msg::MessageBuffer;
use crate::protocol::NET_MAXMESSAGE;

const SLIST_SEND_WINDOW: f64 = 0.5;
const SLIST_SEND_INTERVAL: f64 = 0.75;
const SLIST_POLL_INTERVAL: f64 = 0.1;
const SLIST_DURATION: f64 = 1.5;

#[derive(Debug, Default)]
struct SlistState {
    in_progress: bool,
    silent: bool,
    local: bool,
    start_time: f64,
}

/// Owns the drivers and connections and forwards every transport call to
/// the driver that owns the connection.
pub struct NetManager {
    drivers: Vec<Box<dyn Driver>>,
    pool: ConnectionPool,
    net_message: MessageBuffer,
    host_cache: HostCache,
    schedule: Schedule,
    slist: SlistState,
    stats: NetStats,
    clock: Box<dyn Clock>,
    config: NetConfig,
    net_time: f64,
    host_time: f64,
    hostport: u16,
    max_clients: usize,
    listening: bool,
    local_server: Option<LocalServerInfo>,
    recorder: Option<VcrRecorder>,
}

impl NetManager {
    /// Manager with the loopback and datagram drivers on the system clock.
    pub fn new(config: NetConfig) -> Self {
        let drivers: Vec<Box<dyn Driver>> = vec![
            Box::new(LoopbackDriver::new()),
            Box::new(DatagramDriver::new()),
        ];
        Self::with_drivers(config, drivers, Box::new(SystemClock::new()))
    }

    /// Manager replaying a call log. The log stands in for every driver.
    pub fn with_playback(config: NetConfig, playback: VcrPlayback, clock: Box<dyn Clock>) -> Self {
        Self::with_drivers(config, vec![Box::new(playback)], clock)
    }

    pub fn with_drivers(
        config: NetConfig,
        drivers: Vec<Box<dyn Driver>>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let capacity = config.max_clients_limit + 1;
        let net_time = clock.now();
        let mut manager = Self {
            drivers,
            pool: ConnectionPool::new(capacity),
            net_message: MessageBuffer::new(NET_MAXMESSAGE),
            host_cache: HostCache::new(),
            schedule: Schedule::new(),
            slist: SlistState {
                local: true,
                ..Default::default()
            },
            stats: NetStats::default(),
            clock,
            hostport: config.hostport,
            max_clients: config.max_clients_limit,
            listening: false,
            config,
            net_time,
            host_time: 0.0,
            local_server: None,
            recorder: None,
        };

        for index in 0..manager.drivers.len() {
            if let Some((driver, mut ctx)) = manager.split(index) {
                if driver.init(&mut ctx) {
                    log::debug!("{} driver initialized", driver.name());
                } else {
                    log::info!("{} driver unavailable", driver.name());
                }
            }
        }

        if manager.config.listen
            && let Err(err) = manager.listen(true)
        {
            log::warn!("could not listen: {err}");
        }
        manager
    }

    fn split(&mut self, index: usize) -> Option<(&mut Box<dyn Driver>, DriverContext<'_>)> {
        let driver = self.drivers.get_mut(index)?;
        let ctx = DriverContext {
            pool: &mut self.pool,
            net_message: &mut self.net_message,
            host_cache: &mut self.host_cache,
            clock: &*self.clock,
            net_time: self.net_time,
            host_time: self.host_time,
            driver_index: index,
            hostport: self.hostport,
            max_clients: self.max_clients,
            config: &self.config,
            local_server: self.local_server.as_ref(),
        };
        Some((driver, ctx))
    }

    fn set_net_time(&mut self) -> f64 {
        self.net_time = self.clock.now();
        self.net_time
    }

    pub fn net_time(&self) -> f64 {
        self.net_time
    }

    /// Logical frame time stamped on call log records.
    pub fn set_host_time(&mut self, time: f64) {
        self.host_time = time;
    }

    pub fn host_time(&self) -> f64 {
        self.host_time
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// The most recently received message.
    pub fn message(&self) -> &MessageBuffer {
        &self.net_message
    }

    pub fn message_mut(&mut self) -> &mut MessageBuffer {
        &mut self.net_message
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.pool.get(id)
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.pool.contains(id)
    }

    pub fn active_connections(&self) -> Vec<ConnectionId> {
        self.pool.active().collect()
    }

    pub fn free_connections(&self) -> usize {
        self.pool.free_count()
    }

    pub fn host_cache(&self) -> &HostCache {
        &self.host_cache
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    pub fn driver_names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn hostport(&self) -> u16 {
        self.hostport
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn local_server(&self) -> Option<&LocalServerInfo> {
        self.local_server.as_ref()
    }

    pub fn set_local_server(&mut self, info: Option<LocalServerInfo>) {
        self.local_server = info;
    }

    pub fn start_recording(&mut self, recorder: VcrRecorder) {
        self.recorder = Some(recorder);
    }

    pub fn stop_recording(&mut self) -> Result<(), NetError> {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish()?;
        }
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    fn is_local(&self, connection: &Connection) -> bool {
        self.drivers
            .get(connection.driver)
            .is_none_or(|d| d.is_local())
    }

    pub fn listen(&mut self, enable: bool) -> Result<(), NetError> {
        self.listening = enable;
        for index in 0..self.drivers.len() {
            if let Some((driver, mut ctx)) = self.split(index)
                && driver.initialized()
            {
                driver.listen(&mut ctx, enable)?;
            }
        }
        Ok(())
    }

    /// Changes the listen port, reopening the listening socket if needed.
    pub fn set_hostport(&mut self, port: u16) -> Result<(), NetError> {
        if !(1..=65534).contains(&port) {
            log::warn!("bad port {port}, must be between 1 and 65534");
            return Ok(());
        }
        self.hostport = port;
        if self.listening {
            self.listen(false)?;
            self.listen(true)?;
        }
        Ok(())
    }

    /// Sets the number of server slots, toggling listening to match.
    /// Refused while a local server is running.
    pub fn set_max_clients(&mut self, requested: usize) -> Result<usize, NetError> {
        if self.local_server.is_some() {
            log::warn!("maxplayers can not be changed while a server is running");
            return Ok(self.max_clients);
        }
        let mut n = requested.max(1);
        if n > self.config.max_clients_limit {
            n = self.config.max_clients_limit;
            log::info!("\"maxplayers\" set to \"{n}\"");
        }
        if n == 1 && self.listening {
            self.listen(false)?;
        }
        if n > 1 && !self.listening {
            self.listen(true)?;
        }
        self.max_clients = n;
        Ok(n)
    }

    /// Starts a host search. Results land in the host cache and are logged
    /// when the search finishes unless `silent`.
    pub fn slist(&mut self, silent: bool) {
        if self.slist.in_progress {
            return;
        }
        self.slist.silent = silent;
        if !silent {
            log::info!("looking for servers...");
        }
        self.slist.in_progress = true;
        self.slist.start_time = self.clock.now();
        self.schedule_procedure(PollProcedure::SlistSend, 0.0);
        self.schedule_procedure(PollProcedure::SlistPoll, SLIST_POLL_INTERVAL);
        self.host_cache.clear();
    }

    pub fn slist_in_progress(&self) -> bool {
        self.slist.in_progress
    }

    fn schedule_procedure(&mut self, procedure: PollProcedure, offset: f64) {
        let at = self.clock.now() + offset;
        self.schedule.schedule(procedure, at);
    }

    /// Runs every background procedure that is due.
    pub fn poll(&mut self) {
        self.set_net_time();
        while let Some(procedure) = self.schedule.take_due(self.clock.now()) {
            match procedure {
                PollProcedure::SlistSend => self.slist_send(),
                PollProcedure::SlistPoll => self.slist_poll(),
            }
        }
    }

    fn search_all(&mut self, xmit: bool) {
        let include_local = self.slist.local;
        for index in 0..self.drivers.len() {
            if index == 0 && !include_local {
                continue;
            }
            if let Some((driver, mut ctx)) = self.split(index)
                && driver.initialized()
            {
                driver.search_for_hosts(&mut ctx, xmit);
            }
        }
    }

    fn slist_send(&mut self) {
        self.search_all(true);
        if self.clock.now() - self.slist.start_time < SLIST_SEND_WINDOW {
            self.schedule_procedure(PollProcedure::SlistSend, SLIST_SEND_INTERVAL);
        }
    }

    fn slist_poll(&mut self) {
        self.search_all(false);
        if self.clock.now() - self.slist.start_time < SLIST_DURATION {
            self.schedule_procedure(PollProcedure::SlistPoll, SLIST_POLL_INTERVAL);
            return;
        }
        if !self.slist.silent {
            self.host_cache.log_table();
            if self.host_cache.is_empty() {
                log::info!("no servers found");
            }
        }
        self.slist.in_progress = false;
        self.slist.silent = false;
        self.slist.local = true;
    }

    /// Opens a connection. `None`, an empty string or `"local"` connect to
    /// the in-process server; other names are resolved through the host
    /// cache before each driver is tried in order.
    pub fn connect(&mut self, host: Option<&str>) -> Result<Option<ConnectionId>, NetError> {
        self.set_net_time();
        let host = host.map(str::trim).filter(|h| !h.is_empty());

        let (target, driver_count) = match host {
            None => (LOCAL_ADDRESS.to_string(), 1),
            Some(h) if h.eq_ignore_ascii_case(LOCAL_ADDRESS) => (LOCAL_ADDRESS.to_string(), 1),
            Some(h) => {
                if self.host_cache.is_empty() {
                    self.slist(true);
                    while self.slist.in_progress {
                        self.poll();
                        self.clock.sleep(Duration::from_millis(10));
                    }
                }
                let target = self
                    .host_cache
                    .resolve(h)
                    .map_or_else(|| h.to_string(), |e| e.cname.clone());
                (target, self.drivers.len())
            }
        };

        for index in 0..driver_count {
            let Some((driver, mut ctx)) = self.split(index) else {
                break;
            };
            if !driver.initialized() {
                continue;
            }
            if let Some(id) = driver.connect(&mut ctx, &target)? {
                log::info!("connected to {target} via {}", driver.name());
                return Ok(Some(id));
            }
        }

        if host.is_some() && !self.host_cache.is_empty() {
            self.host_cache.log_table();
        }
        Ok(None)
    }

    /// Accepts one pending connection from any listening driver. Loopback is
    /// always checked.
    pub fn check_new_connections(&mut self) -> Result<Option<ConnectionId>, NetError> {
        self.set_net_time();
        let host_time = self.host_time;
        let listening = self.listening;

        for index in 0..self.drivers.len() {
            let Some((driver, mut ctx)) = self.split(index) else {
                break;
            };
            if !driver.initialized() || (index > 0 && !listening) {
                continue;
            }
            let Some(id) = driver.check_new_connections(&mut ctx)? else {
                continue;
            };

            let (session, address) = match self.pool.get_mut(id) {
                Some(connection) => {
                    connection.server_side = true;
                    (connection.session_id, connection.address.clone())
                }
                None => continue,
            };
            if let Some(recorder) = &mut self.recorder {
                recorder.record_connect(host_time, Some((session, &address)))?;
            }
            return Ok(Some(id));
        }

        if let Some(recorder) = &mut self.recorder {
            recorder.record_connect(host_time, None)?;
        }
        Ok(None)
    }

    /// Reads the next message for `id` into the scratch message. A
    /// connection silent for longer than the message timeout is closed and
    /// reported dead.
    pub fn get_message(&mut self, id: ConnectionId) -> Result<Received, NetError> {
        let Some(connection) = self.pool.get(id) else {
            log::debug!("get_message on closed connection {id}");
            return Ok(Received::Dead);
        };
        if connection.disconnected {
            log::debug!("get_message on disconnected connection {id}");
            return Ok(Received::Dead);
        }
        let driver_index = connection.driver;
        let session = connection.session_id;

        self.set_net_time();
        let Some((driver, mut ctx)) = self.split(driver_index) else {
            return Ok(Received::Dead);
        };
        let received = driver.get_message(&mut ctx, id)?;
        let times_out = driver.times_out();
        let local = driver.is_local();
        let net_time = self.net_time;

        match received {
            Received::Nothing => {
                let timeout = self.config.message_timeout;
                if times_out
                    && self
                        .pool
                        .get(id)
                        .is_some_and(|c| c.is_timed_out(net_time, timeout))
                {
                    log::info!("connection {id} timed out");
                    self.close(id);
                    return Ok(Received::Dead);
                }
            }
            Received::Reliable | Received::Unreliable if !local => {
                if let Some(connection) = self.pool.get_mut(id) {
                    connection.touch(net_time);
                }
                if received == Received::Reliable {
                    self.stats.messages_received += 1;
                } else {
                    self.stats.unreliable_messages_received += 1;
                }
            }
            _ => {}
        }

        if let Some(recorder) = &mut self.recorder {
            let payload = if received.has_message() {
                self.net_message.as_slice()
            } else {
                &[]
            };
            recorder.record_get_message(self.host_time, session, received.code(), payload)?;
        }
        Ok(received)
    }

    pub fn send_message(&mut self, id: ConnectionId, data: &[u8]) -> Result<SendStatus, NetError> {
        self.send(id, data, false)
    }

    pub fn send_unreliable_message(
        &mut self,
        id: ConnectionId,
        data: &[u8],
    ) -> Result<SendStatus, NetError> {
        self.send(id, data, true)
    }

    fn send(
        &mut self,
        id: ConnectionId,
        data: &[u8],
        unreliable: bool,
    ) -> Result<SendStatus, NetError> {
        let Some(connection) = self.pool.get(id) else {
            log::debug!("send on closed connection {id}");
            return Ok(SendStatus::Dead);
        };
        if connection.disconnected {
            return Ok(SendStatus::Dead);
        }
        let driver_index = connection.driver;
        let session = connection.session_id;

        self.set_net_time();
        let Some((driver, mut ctx)) = self.split(driver_index) else {
            return Ok(SendStatus::Dead);
        };
        let status = if unreliable {
            driver.send_unreliable_message(&mut ctx, id, data)?
        } else {
            driver.send_message(&mut ctx, id, data)?
        };
        let local = driver.is_local();

        if status == SendStatus::Sent && !local {
            if unreliable {
                self.stats.unreliable_messages_sent += 1;
            } else {
                self.stats.messages_sent += 1;
            }
        }

        if let Some(recorder) = &mut self.recorder {
            let op = if unreliable {
                VcrOp::SendUnreliable
            } else {
                VcrOp::SendMessage
            };
            recorder.record_result(self.host_time, op, session, status.code())?;
        }
        Ok(status)
    }

    pub fn can_send_message(&mut self, id: ConnectionId) -> Result<bool, NetError> {
        let Some(connection) = self.pool.get(id) else {
            return Ok(false);
        };
        if connection.disconnected {
            return Ok(false);
        }
        let driver_index = connection.driver;
        let session = connection.session_id;

        self.set_net_time();
        let Some((driver, mut ctx)) = self.split(driver_index) else {
            return Ok(false);
        };
        let ready = driver.can_send_message(&mut ctx, id)?;

        if let Some(recorder) = &mut self.recorder {
            recorder.record_result(
                self.host_time,
                VcrOp::CanSendMessage,
                session,
                i32::from(ready),
            )?;
        }
        Ok(ready)
    }

    pub fn can_send_unreliable_message(&mut self, id: ConnectionId) -> Result<bool, NetError> {
        let Some(connection) = self.pool.get(id) else {
            return Ok(false);
        };
        if connection.disconnected {
            return Ok(false);
        }
        let driver_index = connection.driver;
        self.set_net_time();
        let Some((driver, mut ctx)) = self.split(driver_index) else {
            return Ok(false);
        };
        driver.can_send_unreliable_message(&mut ctx, id)
    }

    /// Closes `id` and returns its slot to the pool. Later calls on the id
    /// report it dead.
    pub fn close(&mut self, id: ConnectionId) {
        let Some(connection) = self.pool.get_mut(id) else {
            return;
        };
        if connection.disconnected {
            return;
        }
        connection.disconnected = true;
        let driver_index = connection.driver;

        self.set_net_time();
        if let Some((driver, mut ctx)) = self.split(driver_index) {
            driver.close(&mut ctx, id);
        }
        self.pool.release(id);
    }

    /// Reliably delivers `data` to every server-side connection, pumping
    /// until each has been serviced twice (sent, then confirmed) or
    /// `deadline` seconds pass. Returns how many connections are still
    /// pending.
    pub fn send_to_all(&mut self, data: &[u8], deadline: f64) -> Result<usize, NetError> {
        struct Pending {
            id: ConnectionId,
            sent: bool,
            confirmed: bool,
        }

        let mut pending = Vec::new();
        for id in self.active_connections() {
            let Some(connection) = self.pool.get(id) else {
                continue;
            };
            if !connection.server_side {
                continue;
            }
            if self.is_local(connection) {
                self.send_message(id, data)?;
                continue;
            }
            pending.push(Pending {
                id,
                sent: false,
                confirmed: false,
            });
        }

        let start = self.clock.now();
        let mut count = pending.len();
        while count > 0 {
            count = 0;
            for entry in &mut pending {
                if !entry.sent {
                    if self.can_send_message(entry.id)? {
                        entry.sent = true;
                        self.send_message(entry.id, data)?;
                    } else {
                        self.get_message(entry.id)?;
                    }
                    count += 1;
                    continue;
                }
                if !entry.confirmed {
                    if self.can_send_message(entry.id)? {
                        entry.confirmed = true;
                    } else {
                        self.get_message(entry.id)?;
                    }
                    count += 1;
                }
            }
            if self.clock.now() - start > deadline {
                break;
            }
            if count > 0 {
                self.clock.sleep(Duration::from_millis(1));
            }
        }
        Ok(count)
    }

    /// Logs traffic counters, or the state of one connection.
    pub fn log_stats(&self, connection: Option<ConnectionId>) {
        match connection.and_then(|id| self.pool.get(id).map(|c| (id, c))) {
            Some((id, c)) => {
                log::info!("connection {id} ({})", c.address);
                log::info!("canSend = {}", c.can_send);
                log::info!("sendSeq = {}", c.send_sequence);
                log::info!("recvSeq = {}", c.receive_sequence);
            }
            None => {
                self.stats.log_summary();
                for driver in &self.drivers {
                    driver.log_stats();
                }
                for id in self.pool.active() {
                    if let Some(c) = self.pool.get(id) {
                        log::info!("{id} {} canSend={}", c.address, c.can_send);
                    }
                }
            }
        }
    }

    /// Closes every connection and shuts the drivers down.
    pub fn shutdown(&mut self) -> Result<(), NetError> {
        for id in self.active_connections() {
            self.close(id);
        }
        for index in 0..self.drivers.len() {
            if let Some((driver, mut ctx)) = self.split(index)
                && driver.initialized()
            {
                driver.shutdown(&mut ctx);
            }
        }
        self.schedule.clear();
        self.stop_recording()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::clock::ManualClock;

    fn loopback_manager(clock: &ManualClock) -> NetManager {
        let config = NetConfig {
            enable_datagram: false,
            ..Default::default()
        };
        NetManager::with_drivers(
            config,
            vec![Box::new(LoopbackDriver::new())],
            Box::new(clock.clone()),
        )
    }

    #[test]
    fn test_local_connect_pairs_with_server() {
        let clock = ManualClock::new(0.0);
        let mut net = loopback_manager(&clock);

        let client = net.connect(None).unwrap().unwrap();
        let server = net.check_new_connections().unwrap().unwrap();
        assert!(net.connection(server).unwrap().server_side);
        assert!(!net.connection(client).unwrap().server_side);
        assert!(net.check_new_connections().unwrap().is_none());
    }

    #[test]
    fn test_reliable_send_waits_for_peer() {
        let clock = ManualClock::new(0.0);
        let mut net = loopback_manager(&clock);
        let client = net.connect(Some("local")).unwrap().unwrap();
        let server = net.check_new_connections().unwrap().unwrap();

        assert_eq!(net.send_message(client, b"one").unwrap(), SendStatus::Sent);
        assert!(!net.can_send_message(client).unwrap());
        assert_eq!(net.get_message(server).unwrap(), Received::Reliable);
        assert_eq!(net.message().as_slice(), b"one");
        assert!(net.can_send_message(client).unwrap());
    }

    #[test]
    fn test_loopback_stats_not_counted() {
        let clock = ManualClock::new(0.0);
        let mut net = loopback_manager(&clock);
        let client = net.connect(None).unwrap().unwrap();
        let server = net.check_new_connections().unwrap().unwrap();
        net.send_unreliable_message(client, b"x").unwrap();
        assert_eq!(net.get_message(server).unwrap(), Received::Unreliable);
        assert_eq!(net.stats(), &NetStats::default());
    }

    #[test]
    fn test_closed_connection_is_dead() {
        let clock = ManualClock::new(0.0);
        let mut net = loopback_manager(&clock);
        let client = net.connect(None).unwrap().unwrap();
        let server = net.check_new_connections().unwrap().unwrap();

        net.close(client);
        assert!(!net.is_active(client));
        assert_eq!(net.send_message(client, b"x").unwrap(), SendStatus::Dead);
        assert_eq!(net.get_message(client).unwrap(), Received::Dead);
        assert_eq!(net.send_message(server, b"x").unwrap(), SendStatus::Dead);
    }

    #[test]
    fn test_send_to_all_delivers_to_local_client() {
        let clock = ManualClock::new(0.0);
        let mut net = loopback_manager(&clock);
        let client = net.connect(None).unwrap().unwrap();
        net.check_new_connections().unwrap().unwrap();

        assert_eq!(net.send_to_all(b"bye", 5.0).unwrap(), 0);
        assert_eq!(net.get_message(client).unwrap(), Received::Reliable);
        assert_eq!(net.message().as_slice(), b"bye");
    }

    #[test]
    fn test_slist_finds_local_server() {
        let clock = ManualClock::new(10.0);
        let mut net = loopback_manager(&clock);
        net.set_local_server(Some(LocalServerInfo {
            hostname: "arena".to_string(),
            map: "e1m1".to_string(),
            max_users: 4,
        }));

        net.slist(false);
        assert!(net.slist_in_progress());
        for _ in 0..20 {
            net.poll();
            clock.advance(0.1);
        }
        assert!(!net.slist_in_progress());
        let entry = net.host_cache().resolve("ARENA").unwrap();
        assert_eq!(entry.cname, "local");
        assert_eq!(entry.map, "e1m1");
    }

    #[test]
    fn test_max_clients_clamped() {
        let clock = ManualClock::new(0.0);
        let mut net = loopback_manager(&clock);
        assert_eq!(net.set_max_clients(0).unwrap(), 1);
        assert_eq!(net.set_max_clients(99).unwrap(), 16);
        assert!(net.is_listening());
        assert_eq!(net.set_max_clients(1).unwrap(), 1);
        assert!(!net.is_listening());
    }
}
