use std::collections::VecDeque;
use std::time::Duration;

use glam::Vec3;

use super::encode::{
    PlayerStatus, write_baseline, write_cd_track, write_client_data, write_entity_update,
    write_light_style, write_print, write_server_info, write_set_angle, write_set_view,
    write_signon_num, write_static, write_time, write_update_colors, write_update_frags,
    write_update_name,
};
use super::events::{DisconnectReason, ServerEvent};
use super::world::World;
use crate::config::ServerConfig;
use crate::msg::{MessageBuffer, MessageReader, MsgError};
use crate::net::{ConnectionId, LocalServerInfo, NetError, NetManager, Received, SendStatus};
use crate::protocol::{
    Buttons, ClientOp, GAME_COOP, GAME_DEATHMATCH, MAX_DATAGRAM, MAX_MODELS, MAX_MSGLEN,
    MAX_SOUNDS, PROTOCOL_VERSION, ServerOp,
};

/// Size of the buffer holding baselines and statics for `prespawn`.
const SIGNON_SIZE: usize = 8000;
/// Idle clients still loading get a nop this often.
const NOP_INTERVAL: f64 = 5.0;
/// How long shutdown waits for pending reliable messages to drain.
const FLUSH_DEADLINE: f64 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("too many {kind} precaches ({count})")]
    TooManyPrecaches { kind: &'static str, count: usize },
    #[error("message buffer: {0}")]
    Msg(#[from] MsgError),
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Latest `clc_move` from a client.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveCommand {
    pub time: f32,
    pub angles: Vec3,
    pub forward: f32,
    pub side: f32,
    pub up: f32,
    pub buttons: Buttons,
    pub impulse: u8,
}

pub struct ServerClient {
    pub connection: ConnectionId,
    pub address: String,
    pub name: String,
    pub colors: u8,
    pub frags: i16,
    pub spawned: bool,
    /// A signon stage is queued in `message` and must go out before
    /// anything else.
    pub send_signon: bool,
    /// Reliable data for this client, flushed when the connection allows.
    pub message: MessageBuffer,
    pub last_message: f64,
    pub spawn_parms: String,
    pub last_move: MoveCommand,
    pub status: PlayerStatus,
}

enum Verdict {
    Keep,
    Drop(DisconnectReason),
}

/// Minimal protocol-side server: runs the signon handshake and streams a
/// scripted world. It has no game rules.
pub struct LocalServer {
    config: ServerConfig,
    clients: Vec<Option<ServerClient>>,
    world: World,
    signon: MessageBuffer,
    time: f64,
    pending_events: VecDeque<ServerEvent>,
}

impl LocalServer {
    /// Starts the server on `net`: sizes the client table, advertises the
    /// map to host searches and prepares the prespawn data.
    pub fn spawn(net: &mut NetManager, config: ServerConfig) -> Result<Self, ServerError> {
        if config.models.len() >= MAX_MODELS {
            return Err(ServerError::TooManyPrecaches {
                kind: "model",
                count: config.models.len(),
            });
        }
        if config.sounds.len() >= MAX_SOUNDS {
            return Err(ServerError::TooManyPrecaches {
                kind: "sound",
                count: config.sounds.len(),
            });
        }

        net.set_local_server(None);
        let max_clients = net.set_max_clients(config.max_clients)?;
        net.set_local_server(Some(LocalServerInfo {
            hostname: net.config().hostname.clone(),
            map: config.map.clone(),
            max_users: max_clients as u8,
        }));

        let world = World::new(&config, max_clients);
        let mut signon = MessageBuffer::new(SIGNON_SIZE);
        for (num, ent) in world.entities.iter().enumerate() {
            write_baseline(&mut signon, num as u16, &ent.baseline)?;
        }
        for state in &world.statics {
            write_static(&mut signon, state)?;
        }

        log::info!("server spawned on {} ({max_clients} slots)", config.map);
        let mut clients = Vec::with_capacity(max_clients);
        clients.resize_with(max_clients, || None);

        Ok(Self {
            config,
            clients,
            world,
            signon,
            time: 1.0,
            pending_events: VecDeque::new(),
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn max_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, slot: usize) -> Option<&ServerClient> {
        self.clients.get(slot).and_then(Option::as_ref)
    }

    pub fn client_count(&self) -> usize {
        self.clients.iter().flatten().count()
    }

    pub fn spawned_count(&self) -> usize {
        self.clients.iter().flatten().filter(|c| c.spawned).count()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// One server frame: accept, read clients, advance the world by
    /// `frametime` and send every client its messages.
    pub fn frame(&mut self, net: &mut NetManager, frametime: f64) -> Result<(), ServerError> {
        self.accept_clients(net)?;
        self.read_clients(net)?;

        self.time += frametime;
        self.world.advance(self.time);
        self.move_players(frametime as f32);

        self.send_client_messages(net)
    }

    fn accept_clients(&mut self, net: &mut NetManager) -> Result<(), ServerError> {
        while let Some(id) = net.check_new_connections()? {
            let address = net
                .connection(id)
                .map(|c| c.address.clone())
                .unwrap_or_default();
            let Some(slot) = self.clients.iter().position(Option::is_none) else {
                log::warn!("no free client slot for {address}");
                net.close(id);
                self.pending_events
                    .push_back(ServerEvent::ConnectionDenied { address });
                continue;
            };

            log::info!("client {address} connected");
            let mut client = ServerClient {
                connection: id,
                address: address.clone(),
                name: "unconnected".to_string(),
                colors: 0,
                frags: 0,
                spawned: false,
                send_signon: false,
                message: MessageBuffer::with_overflow(MAX_MSGLEN),
                last_message: net.clock().now(),
                spawn_parms: String::new(),
                last_move: MoveCommand::default(),
                status: PlayerStatus::default(),
            };
            self.send_server_info(&mut client, slot)?;
            self.clients[slot] = Some(client);
            self.pending_events
                .push_back(ServerEvent::ClientConnected { slot, address });
        }
        Ok(())
    }

    fn send_server_info(&self, client: &mut ServerClient, slot: usize) -> Result<(), MsgError> {
        let msg = &mut client.message;
        write_print(msg, &format!("\x02\nVERSION {PROTOCOL_VERSION} SERVER\n"))?;
        let game_type = if self.config.deathmatch {
            GAME_DEATHMATCH
        } else {
            GAME_COOP
        };
        write_server_info(
            msg,
            self.clients.len() as u8,
            game_type,
            &self.config.level_name,
            &self.config.models,
            &self.config.sounds,
        )?;
        write_cd_track(msg, 0, 0)?;
        write_set_view(msg, World::player_entity(slot) as u16)?;
        write_signon_num(msg, 1)?;
        client.send_signon = true;
        client.spawned = false;
        Ok(())
    }

    fn read_clients(&mut self, net: &mut NetManager) -> Result<(), ServerError> {
        for slot in 0..self.clients.len() {
            loop {
                let Some(id) = self.clients[slot].as_ref().map(|c| c.connection) else {
                    break;
                };
                match net.get_message(id)? {
                    Received::Dead => {
                        self.drop_client(net, slot, DisconnectReason::Dropped)?;
                        break;
                    }
                    Received::Nothing => break,
                    Received::Reliable | Received::Unreliable => {}
                }
                let data = net.message().as_slice().to_vec();
                if let Verdict::Drop(reason) = self.execute_client_message(slot, &data)? {
                    self.drop_client(net, slot, reason)?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn execute_client_message(&mut self, slot: usize, data: &[u8]) -> Result<Verdict, ServerError> {
        let mut reader = MessageReader::new(data);
        loop {
            if reader.bad_read() {
                log::warn!("bad read from client {slot}");
                return Ok(Verdict::Drop(DisconnectReason::BadMessage));
            }
            let cmd = reader.read_byte();
            if cmd == -1 {
                return Ok(Verdict::Keep);
            }
            match ClientOp::from_byte(cmd as u8) {
                Some(ClientOp::Nop) => {}
                Some(ClientOp::StringCmd) => {
                    let text = reader.read_string();
                    self.execute_string_cmd(slot, &text)?;
                }
                Some(ClientOp::Move) => {
                    let mut command = MoveCommand {
                        time: reader.read_float(),
                        ..Default::default()
                    };
                    for axis in 0..3 {
                        command.angles[axis] = reader.read_angle();
                    }
                    command.forward = reader.read_short() as f32;
                    command.side = reader.read_short() as f32;
                    command.up = reader.read_short() as f32;
                    command.buttons = Buttons::from_bits_retain(reader.read_byte() as u8);
                    command.impulse = reader.read_byte() as u8;
                    if let Some(client) = self.clients[slot].as_mut() {
                        client.last_move = command;
                    }
                }
                Some(ClientOp::Disconnect) => {
                    return Ok(Verdict::Drop(DisconnectReason::Graceful));
                }
                Some(ClientOp::Bad) | None => {
                    log::warn!("client {slot} sent illegible command {cmd}");
                    return Ok(Verdict::Drop(DisconnectReason::BadMessage));
                }
            }
        }
    }

    fn execute_string_cmd(&mut self, slot: usize, text: &str) -> Result<(), ServerError> {
        let (cmd, args) = split_command(text);
        log::debug!("client {slot}: {cmd} {args}");
        match cmd {
            "prespawn" => self.prespawn(slot)?,
            "spawn" => self.spawn_client(slot, args)?,
            "begin" => {
                if let Some(client) = self.clients[slot].as_mut() {
                    client.spawned = true;
                    self.pending_events.push_back(ServerEvent::ClientSpawned {
                        slot,
                        name: client.name.clone(),
                    });
                }
            }
            "name" => {
                let mut name = args.trim_matches('"').to_string();
                name.truncate(15);
                if let Some(client) = self.clients[slot].as_mut() {
                    if client.name != name && client.name != "unconnected" {
                        log::info!("{} renamed to {name}", client.name);
                    }
                    client.name = name.clone();
                }
                self.broadcast(|msg| write_update_name(msg, slot as u8, &name))?;
            }
            "color" => {
                let mut parts = args.split_whitespace().map(|p| p.parse::<u8>().unwrap_or(0));
                let top = parts.next().unwrap_or(0).min(13);
                let bottom = parts.next().unwrap_or(top).min(13);
                let colors = (top << 4) | bottom;
                if let Some(client) = self.clients[slot].as_mut() {
                    client.colors = colors;
                }
                self.broadcast(|msg| write_update_colors(msg, slot as u8, colors))?;
            }
            "say" => {
                let text = args.trim_matches('"').to_string();
                let name = self.clients[slot]
                    .as_ref()
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                let line = format!("\x01{name}: {text}\n");
                self.broadcast(|msg| write_print(msg, &line))?;
                self.pending_events.push_back(ServerEvent::Say { slot, text });
            }
            _ => log::debug!("client {slot} sent unknown command {cmd:?}"),
        }
        Ok(())
    }

    fn prespawn(&mut self, slot: usize) -> Result<(), ServerError> {
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        if client.spawned {
            log::warn!("prespawn not valid, client {slot} already spawned");
            return Ok(());
        }
        client.message.write(self.signon.as_slice())?;
        write_signon_num(&mut client.message, 2)?;
        client.send_signon = true;
        Ok(())
    }

    fn spawn_client(&mut self, slot: usize, parms: &str) -> Result<(), ServerError> {
        let roster: Vec<(u8, String, i16, u8)> = self
            .clients
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u8, c.name.clone(), c.frags, c.colors)))
            .collect();

        let num = World::player_entity(slot);
        let player_model = self.world.player_model();
        let time = self.time;
        let Some(client) = self.clients[slot].as_mut() else {
            return Ok(());
        };
        if client.spawned {
            log::warn!("spawn not valid, client {slot} already spawned");
            return Ok(());
        }
        client.spawn_parms = parms.to_string();

        let angles = match self.world.entities.get_mut(num) {
            Some(ent) => {
                ent.state.model_index = player_model;
                ent.state.origin = Vec3::new(0.0, -64.0 * slot as f32, 24.0);
                ent.state.angles
            }
            None => Vec3::ZERO,
        };

        let msg = &mut client.message;
        write_time(msg, time)?;
        for (i, name, frags, colors) in &roster {
            write_update_name(msg, *i, name)?;
            write_update_frags(msg, *i, *frags)?;
            write_update_colors(msg, *i, *colors)?;
        }
        for (index, map) in &self.world.light_styles {
            write_light_style(msg, *index, map)?;
        }
        write_set_angle(msg, angles)?;
        write_client_data(msg, &client.status)?;
        write_signon_num(msg, 3)?;
        client.send_signon = true;
        Ok(())
    }

    /// Appends to the reliable message of every connected client.
    fn broadcast<F>(&mut self, mut write: F) -> Result<(), ServerError>
    where
        F: FnMut(&mut MessageBuffer) -> Result<(), MsgError>,
    {
        for client in self.clients.iter_mut().flatten() {
            write(&mut client.message)?;
        }
        Ok(())
    }

    fn move_players(&mut self, dt: f32) {
        for (slot, client) in self.clients.iter_mut().enumerate() {
            let Some(client) = client.as_mut().filter(|c| c.spawned) else {
                continue;
            };
            let Some(ent) = self.world.entities.get_mut(World::player_entity(slot)) else {
                continue;
            };
            let command = client.last_move;
            let yaw = command.angles.y.to_radians();
            let forward = Vec3::new(yaw.cos(), yaw.sin(), 0.0);
            let right = Vec3::new(yaw.sin(), -yaw.cos(), 0.0);
            let velocity = forward * command.forward + right * command.side + Vec3::Z * command.up;
            ent.state.origin += velocity * dt;
            ent.state.angles = Vec3::new(0.0, command.angles.y, 0.0);
            client.status.velocity = velocity;
        }
    }

    fn send_client_messages(&mut self, net: &mut NetManager) -> Result<(), ServerError> {
        let now = net.clock().now();
        for slot in 0..self.clients.len() {
            let Some(client) = self.clients[slot].as_mut() else {
                continue;
            };
            let id = client.connection;

            if client.spawned {
                let datagram = self.build_datagram(slot)?;
                if net.send_unreliable_message(id, datagram.as_slice())? == SendStatus::Dead {
                    self.drop_client(net, slot, DisconnectReason::Dropped)?;
                    continue;
                }
            } else if !client.send_signon {
                if now - client.last_message > NOP_INTERVAL {
                    net.send_unreliable_message(id, &[ServerOp::Nop as u8])?;
                    client.last_message = now;
                }
                continue;
            }

            let Some(client) = self.clients[slot].as_mut() else {
                continue;
            };
            if client.message.overflowed() {
                log::warn!("reliable message overflowed for {}", client.name);
                self.drop_client(net, slot, DisconnectReason::Overflowed)?;
                continue;
            }
            if client.message.is_empty() || !net.can_send_message(id)? {
                continue;
            }
            if net.send_message(id, client.message.as_slice())? == SendStatus::Dead {
                self.drop_client(net, slot, DisconnectReason::Dropped)?;
                continue;
            }
            client.message.clear();
            client.last_message = now;
            client.send_signon = false;
        }
        Ok(())
    }

    /// Time, the client's own status and every visible entity.
    fn build_datagram(&self, slot: usize) -> Result<MessageBuffer, ServerError> {
        let mut msg = MessageBuffer::new(MAX_DATAGRAM);
        write_time(&mut msg, self.time)?;
        if let Some(client) = self.client(slot) {
            write_client_data(&mut msg, &client.status)?;
        }
        for (num, ent) in self.world.entities.iter().enumerate().skip(1) {
            if ent.state.model_index == 0 {
                continue;
            }
            if msg.remaining() < 16 {
                break;
            }
            write_entity_update(&mut msg, num as u16, &ent.state, &ent.baseline, false)?;
        }
        Ok(msg)
    }

    fn drop_client(
        &mut self,
        net: &mut NetManager,
        slot: usize,
        reason: DisconnectReason,
    ) -> Result<(), ServerError> {
        let Some(mut client) = self.clients[slot].take() else {
            return Ok(());
        };
        log::info!("client {} {}", client.name, reason.as_str());

        if reason != DisconnectReason::Dropped && net.can_send_message(client.connection)? {
            client.message.clear();
            client.message.write_byte(ServerOp::Disconnect as u8)?;
            net.send_message(client.connection, client.message.as_slice())?;
        }
        net.close(client.connection);

        if let Some(ent) = self.world.entities.get_mut(World::player_entity(slot)) {
            ent.state = ent.baseline;
        }
        self.broadcast(|msg| {
            write_update_name(msg, slot as u8, "")?;
            write_update_frags(msg, slot as u8, 0)?;
            write_update_colors(msg, slot as u8, 0)
        })?;
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { slot, reason });
        Ok(())
    }

    /// Drains pending reliable data, tells every client the server is going
    /// away and closes all connections. Returns how many clients never
    /// confirmed the disconnect.
    pub fn shutdown(&mut self, net: &mut NetManager) -> Result<usize, ServerError> {
        let start = net.clock().now();
        loop {
            let mut pending = 0;
            for slot in 0..self.clients.len() {
                let Some(client) = self.clients[slot].as_mut() else {
                    continue;
                };
                if client.message.is_empty() {
                    continue;
                }
                let id = client.connection;
                if net.can_send_message(id)? {
                    net.send_message(id, client.message.as_slice())?;
                    client.message.clear();
                } else if net.get_message(id)? == Received::Dead {
                    client.message.clear();
                } else {
                    pending += 1;
                }
            }
            if pending == 0 || net.clock().now() - start > FLUSH_DEADLINE {
                break;
            }
            net.clock().sleep(Duration::from_millis(1));
        }

        let unconfirmed = net.send_to_all(&[ServerOp::Disconnect as u8], self.config.shutdown_deadline)?;
        if unconfirmed > 0 {
            log::warn!("{unconfirmed} clients did not confirm the shutdown");
        }

        for slot in 0..self.clients.len() {
            if let Some(client) = self.clients[slot].take() {
                net.close(client.connection);
                self.pending_events.push_back(ServerEvent::ClientDisconnected {
                    slot,
                    reason: DisconnectReason::Shutdown,
                });
            }
        }
        net.set_local_server(None);
        log::info!("server on {} shut down", self.config.map);
        Ok(unconfirmed)
    }
}

/// Splits `name args` and drops the trailing newline some commands carry.
fn split_command(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((cmd, args)) => (cmd, args.trim()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("name \"ranger\"\n"), ("name", "\"ranger\""));
        assert_eq!(split_command("prespawn"), ("prespawn", ""));
        assert_eq!(split_command("spawn  1 2 3"), ("spawn", "1 2 3"));
    }

    #[test]
    fn test_precache_limit() {
        let config = crate::config::NetConfig {
            enable_datagram: false,
            ..Default::default()
        };
        let mut net = NetManager::with_drivers(
            config,
            vec![Box::new(crate::net::LoopbackDriver::new())],
            Box::new(crate::net::ManualClock::new(0.0)),
        );
        let server_config = ServerConfig {
            models: (0..MAX_MODELS).map(|i| format!("progs/m{i}.mdl")).collect(),
            ..Default::default()
        };
        assert!(matches!(
            LocalServer::spawn(&mut net, server_config),
            Err(ServerError::TooManyPrecaches { kind: "model", .. })
        ));
    }
}
