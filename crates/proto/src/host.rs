//! The host ties one network manager to a client session and an optional
//! local server, and executes console commands against them.

use crate::client::{ClientError, ClientEvent, ClientSession, ResourceLoader, UserCmd};
use crate::command::{Command, CommandError, tokenize};
use crate::config::{ClientConfig, ServerConfig};
use crate::net::{NetError, NetManager};
use crate::server::{LocalServer, ServerError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Commands a server may stuff into the client that the host treats as
/// no-ops.
const IGNORED_STUFFED: &[&str] = &["reconnect", "changing", "bf", "fov", "v_cshift"];

pub struct Host {
    net: NetManager,
    client: ClientSession,
    server: Option<LocalServer>,
    server_config: ServerConfig,
    loader: Box<dyn ResourceLoader>,
    realtime: f64,
    quit: bool,
}

impl Host {
    pub fn new(
        net: NetManager,
        client_config: ClientConfig,
        server_config: ServerConfig,
        loader: Box<dyn ResourceLoader>,
    ) -> Self {
        Self {
            net,
            client: ClientSession::new(client_config),
            server: None,
            server_config,
            loader,
            realtime: 0.0,
            quit: false,
        }
    }

    pub fn net(&self) -> &NetManager {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut NetManager {
        &mut self.net
    }

    pub fn client(&self) -> &ClientSession {
        &self.client
    }

    pub fn server(&self) -> Option<&LocalServer> {
        self.server.as_ref()
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Parses and runs one console line. Blank lines and comments are
    /// ignored.
    pub fn execute_line(&mut self, line: &str) -> Result<(), HostError> {
        if tokenize(line).is_empty() {
            return Ok(());
        }
        let command: Command = line.parse()?;
        self.execute(command)
    }

    pub fn execute(&mut self, command: Command) -> Result<(), HostError> {
        log::debug!("executing {}", command.name());
        match command {
            Command::Record { name, map, track } => {
                let map_given = map.is_some();
                if let Some(map) = map {
                    self.start_map(&map)?;
                }
                self.client.record(&name, map_given, track)?;
            }
            Command::Stop => self.client.stop_recording()?,
            Command::PlayDemo(name) => {
                self.shutdown_server()?;
                self.client.play_demo(&mut self.net, &name)?;
            }
            Command::TimeDemo(name) => {
                self.shutdown_server()?;
                self.client.time_demo(&mut self.net, &name)?;
            }
            Command::Connect(host) => {
                if self.client.is_playing_demo() {
                    self.client.disconnect(&mut self.net);
                }
                let target = (host != "local").then_some(host.as_str());
                self.client.connect(&mut self.net, target)?;
            }
            Command::Disconnect => {
                self.client.disconnect(&mut self.net);
                self.shutdown_server()?;
            }
            Command::Map(map) => self.start_map(&map)?,
            Command::Listen(None) => {
                log::info!("\"listen\" is \"{}\"", u8::from(self.net.is_listening()));
            }
            Command::Listen(Some(enable)) => self.net.listen(enable)?,
            Command::MaxPlayers(None) => {
                log::info!("\"maxplayers\" is \"{}\"", self.net.max_clients());
            }
            Command::MaxPlayers(Some(n)) => {
                if self.server.is_some() {
                    log::warn!("maxplayers can not be changed while a server is running");
                } else {
                    let n = self.net.set_max_clients(n)?;
                    self.server_config.max_clients = n;
                    self.server_config.deathmatch = n > 1;
                }
            }
            Command::Port(None) => {
                log::info!("\"port\" is \"{}\"", self.net.hostport());
            }
            Command::Port(Some(port)) => self.net.set_hostport(port)?,
            Command::Slist => self.net.slist(false),
            Command::NetStats(None) => self.net.log_stats(None),
            Command::NetStats(Some(target)) => {
                let matches: Vec<_> = self
                    .net
                    .active_connections()
                    .into_iter()
                    .filter(|&id| {
                        target == "*"
                            || self
                                .net
                                .connection(id)
                                .is_some_and(|c| c.address.eq_ignore_ascii_case(&target))
                    })
                    .collect();
                if matches.is_empty() {
                    log::info!("no connection matches {target}");
                }
                for id in matches {
                    self.net.log_stats(Some(id));
                }
            }
            Command::Quit => {
                self.client.disconnect(&mut self.net);
                self.shutdown_server()?;
                self.quit = true;
            }
        }
        Ok(())
    }

    /// Runs one host frame: network polls, the local server, then the
    /// client. A client error has already disconnected the session when it
    /// is returned.
    pub fn frame(&mut self, frametime: f64, cmd: &UserCmd) -> Result<(), HostError> {
        self.realtime += frametime;
        self.net.set_host_time(self.realtime);
        self.net.poll();

        if let Some(server) = &mut self.server {
            server.frame(&mut self.net, frametime)?;
            for event in server.drain_events() {
                log::debug!("server: {event:?}");
            }
        }

        let result = self
            .client
            .frame(&mut self.net, frametime, cmd, self.loader.as_mut());
        self.handle_client_events();
        Ok(result?)
    }

    fn handle_client_events(&mut self) {
        let events: Vec<ClientEvent> = self.client.drain_events().collect();
        for event in events {
            match event {
                ClientEvent::Print(text) => log::info!("{}", text.trim_end()),
                ClientEvent::CenterPrint(text) => log::info!("{}", text.trim_end()),
                ClientEvent::StuffText(text) => {
                    for line in text.split(['\n', ';']) {
                        self.execute_stuffed(line);
                    }
                }
                ClientEvent::LevelLoaded { level_name } => log::info!("entered {level_name}"),
                ClientEvent::SignonComplete => log::info!("signon complete"),
                ClientEvent::DemoFinished => log::info!("demo finished"),
                other => log::trace!("client event: {other:?}"),
            }
        }
    }

    /// Runs a command line sent by the server. Unknown commands are only
    /// logged since the server may target subsystems this host lacks.
    fn execute_stuffed(&mut self, line: &str) {
        let args = tokenize(line);
        let Some(verb) = args.first() else { return };
        if IGNORED_STUFFED.contains(&verb.as_str()) {
            log::trace!("ignoring stuffed {verb}");
            return;
        }
        match self.execute_line(line) {
            Ok(()) => {}
            Err(HostError::Command(CommandError::Unknown(verb))) => {
                log::debug!("stuffed command {verb} not handled");
            }
            Err(err) => log::warn!("stuffed command failed: {err}"),
        }
    }

    fn start_map(&mut self, map: &str) -> Result<(), HostError> {
        self.client.disconnect(&mut self.net);
        self.shutdown_server()?;

        let config = ServerConfig {
            map: map.to_string(),
            ..self.server_config.clone()
        };
        self.server = Some(LocalServer::spawn(&mut self.net, config)?);
        self.client.connect(&mut self.net, None)?;
        Ok(())
    }

    fn shutdown_server(&mut self) -> Result<(), HostError> {
        if let Some(mut server) = self.server.take() {
            server.shutdown(&mut self.net)?;
        }
        Ok(())
    }

    /// Stops everything: client, local server, call log and drivers.
    pub fn shutdown(&mut self) -> Result<(), HostError> {
        self.client.disconnect(&mut self.net);
        self.shutdown_server()?;
        self.net.shutdown()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ListLoader;
    use crate::config::NetConfig;
    use crate::net::{LoopbackDriver, ManualClock};
    use crate::protocol::SIGNONS;

    fn host(clock: &ManualClock) -> Host {
        let net_config = NetConfig {
            enable_datagram: false,
            ..Default::default()
        };
        let net = NetManager::with_drivers(
            net_config,
            vec![Box::new(LoopbackDriver::new())],
            Box::new(clock.clone()),
        );
        let server_config = ServerConfig {
            max_clients: 1,
            ..Default::default()
        };
        let loader = ListLoader::new(server_config.models.iter().cloned());
        Host::new(net, ClientConfig::default(), server_config, Box::new(loader))
    }

    fn run(host: &mut Host, clock: &ManualClock, frames: usize) {
        for _ in 0..frames {
            clock.advance(0.05);
            host.frame(0.05, &UserCmd::default()).unwrap();
        }
    }

    #[test]
    fn test_map_reaches_signon() {
        let clock = ManualClock::new(1.0);
        let mut host = host(&clock);
        host.execute_line("map start").unwrap();
        assert!(host.server().is_some());
        assert!(host.client().is_connected());

        run(&mut host, &clock, 40);
        assert_eq!(host.client().signon(), SIGNONS);
        assert_eq!(host.server().map(LocalServer::spawned_count), Some(1));
    }

    #[test]
    fn test_disconnect_stops_server() {
        let clock = ManualClock::new(1.0);
        let mut host = host(&clock);
        host.execute_line("map start").unwrap();
        run(&mut host, &clock, 10);

        host.execute_line("disconnect").unwrap();
        assert!(host.server().is_none());
        assert!(!host.client().is_connected());
        assert!(host.net().local_server().is_none());
    }

    #[test]
    fn test_maxplayers_refused_while_running() {
        let clock = ManualClock::new(1.0);
        let mut host = host(&clock);
        host.execute_line("maxplayers 4").unwrap();
        assert_eq!(host.net().max_clients(), 4);

        host.execute_line("map start").unwrap();
        host.execute_line("maxplayers 2").unwrap();
        assert_eq!(host.net().max_clients(), 4);
    }

    #[test]
    fn test_blank_and_unknown_lines() {
        let clock = ManualClock::new(1.0);
        let mut host = host(&clock);
        host.execute_line("  // nothing").unwrap();
        assert!(matches!(
            host.execute_line("jump"),
            Err(HostError::Command(CommandError::Unknown(_)))
        ));
        host.execute_line("quit").unwrap();
        assert!(host.should_quit());
    }
}
