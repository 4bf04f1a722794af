use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use nq::config::{NetConfig, ServerConfig};
use nq::net::{NetError, SystemClock, VcrError, VcrPlayback, VcrRecorder};
use nq::server::{LocalServer, ServerError, ServerEvent};
use nq::{Command, NetManager};

#[derive(Parser)]
#[command(name = "nq-server")]
#[command(about = "Dedicated NetQuake protocol 15 server")]
struct Args {
    #[arg(long, help = "Server settings (TOML)")]
    config: Option<PathBuf>,

    #[arg(long, help = "Network settings (TOML)")]
    net_config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    map: Option<String>,

    #[arg(short = 'n', long)]
    max_clients: Option<usize>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(long, help = "Record every transport call to this file")]
    record: Option<PathBuf>,

    #[arg(long, conflicts_with = "record", help = "Replay a recorded call log")]
    playback: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut net_config = match &args.net_config {
        Some(path) => NetConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => NetConfig::default(),
    };
    let mut config = match &args.config {
        Some(path) => {
            ServerConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        net_config.hostport = port;
    }
    if let Some(map) = args.map {
        config.map = map;
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate.max(1);
    }
    // A dedicated server has no local client, so it always listens.
    net_config.listen = true;

    let replaying = args.playback.is_some();
    let mut net = match &args.playback {
        Some(path) => {
            let playback = VcrPlayback::open(path)
                .with_context(|| format!("opening call log {}", path.display()))?;
            log::info!("replaying {} (recorded as {:?})", path.display(), playback.argv());
            NetManager::with_playback(net_config, playback, Box::new(SystemClock::new()))
        }
        None => NetManager::new(net_config),
    };
    if let Some(path) = &args.record {
        let argv: Vec<String> = std::env::args().collect();
        let recorder = VcrRecorder::create(path, &argv)
            .with_context(|| format!("creating call log {}", path.display()))?;
        net.start_recording(recorder);
        log::info!("recording transport calls to {}", path.display());
    }

    let mut running = true;
    let console = nq::command::stdin_lines();

    let tick_rate = config.tick_rate;
    let mut server = LocalServer::spawn(&mut net, config)?;
    log::info!(
        "{} on port {} ({})",
        net.config().hostname,
        net.hostport(),
        net.driver_names().join(", ")
    );

    let frametime = 1.0 / f64::from(tick_rate);
    let tick = Duration::from_secs_f64(frametime);
    let mut host_time = 0.0;
    let mut accumulator = Duration::ZERO;
    let mut last = Instant::now();

    while running {
        for line in console.try_iter() {
            running &= execute_console(&line, &mut net, &server);
        }

        if replaying {
            accumulator = tick;
        } else {
            let now = Instant::now();
            accumulator += now - last;
            last = now;
        }

        while accumulator >= tick {
            accumulator -= tick;
            // Logical time keeps recorded and replayed call logs in step.
            host_time += frametime;
            net.set_host_time(host_time);
            net.poll();
            match server.frame(&mut net, frametime) {
                Ok(()) => {}
                Err(ServerError::Net(NetError::Vcr(VcrError::EndOfPlayback))) => {
                    log::info!("call log replay complete");
                    running = false;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
            log_events(&mut server);
        }

        if !replaying {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    log::info!("shutting down");
    if !replaying {
        server.shutdown(&mut net)?;
        log_events(&mut server);
    }
    net.shutdown()?;
    Ok(())
}

fn log_events(server: &mut LocalServer) {
    for event in server.drain_events() {
        match event {
            ServerEvent::ClientConnected { slot, address } => {
                log::info!("client {slot} connected from {address}");
            }
            ServerEvent::ClientSpawned { slot, name } => {
                log::info!("{name} entered the game (slot {slot})");
            }
            ServerEvent::ClientDisconnected { slot, reason } => {
                log::info!("client {slot} {}", reason.as_str());
            }
            ServerEvent::ConnectionDenied { address } => {
                log::warn!("server is full, refused {address}");
            }
            ServerEvent::Say { slot, text } => log::info!("client {slot}: {text}"),
        }
    }
}

/// Runs one console line. Returns false once the server should stop.
fn execute_console(line: &str, net: &mut NetManager, server: &LocalServer) -> bool {
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(nq::CommandError::Empty) => return true,
        Err(err) => {
            log::warn!("{err}");
            return true;
        }
    };
    let result = match command {
        Command::Quit => return false,
        Command::Listen(Some(enable)) => net.listen(enable),
        Command::Port(Some(port)) => net.set_hostport(port),
        Command::MaxPlayers(_) => {
            log::info!(
                "{} of {} slots in use; maxplayers can not be changed while a server is running",
                server.client_count(),
                server.max_clients()
            );
            Ok(())
        }
        Command::NetStats(None) => {
            net.log_stats(None);
            Ok(())
        }
        Command::NetStats(Some(_)) => {
            for id in net.active_connections() {
                net.log_stats(Some(id));
            }
            Ok(())
        }
        other => {
            log::warn!("{} is not available on a dedicated server", other.name());
            Ok(())
        }
    };
    if let Err(err) = result {
        log::warn!("{err}");
    }
    true
}
