use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use nq::client::{NullLoader, UserCmd};
use nq::config::{ClientConfig, NetConfig, ServerConfig};
use nq::{Host, HostError, NetManager};

#[derive(Parser)]
#[command(name = "nq_client")]
#[command(about = "Headless NetQuake protocol 15 client")]
struct Args {
    #[arg(long, help = "Client settings (TOML)")]
    config: Option<PathBuf>,

    #[arg(long, help = "Network settings (TOML)")]
    net_config: Option<PathBuf>,

    #[arg(long, help = "Settings for servers started with `map` (TOML)")]
    server_config: Option<PathBuf>,

    #[arg(short, long, help = "Server to connect to, or \"local\"")]
    connect: Option<String>,

    #[arg(short = 'x', long = "exec", help = "Console command to run at startup (repeatable)")]
    commands: Vec<String>,

    #[arg(long, default_value_t = 72.0, help = "Host frames per second")]
    fps: f64,

    #[arg(long, help = "Quit after this many frames")]
    frames: Option<u64>,

    #[arg(long, help = "Player name")]
    name: Option<String>,
}

fn load<T>(path: &Option<PathBuf>, read: fn(&PathBuf) -> Result<T, nq::ConfigError>) -> Result<T>
where
    T: Default,
{
    match path {
        Some(path) => read(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(T::default()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let net_config: NetConfig = load(&args.net_config, |p| NetConfig::load(p))?;
    let server_config: ServerConfig = load(&args.server_config, |p| ServerConfig::load(p))?;
    let mut client_config: ClientConfig = load(&args.config, |p| ClientConfig::load(p))?;
    if let Some(name) = args.name {
        client_config.name = name;
    }

    let net = NetManager::new(net_config);
    log::info!("drivers: {}", net.driver_names().join(", "));
    let mut host = Host::new(net, client_config, server_config, Box::new(NullLoader));

    let mut startup = args.commands;
    if let Some(server) = args.connect {
        startup.push(format!("connect \"{server}\""));
    }
    for line in &startup {
        run_line(&mut host, line);
    }

    let console = nq::command::stdin_lines();
    let frametime = 1.0 / args.fps.max(1.0);
    let tick = Duration::from_secs_f64(frametime);
    let cmd = UserCmd::default();
    let mut frames = 0u64;
    let mut last = Instant::now();

    while !host.should_quit() {
        for line in console.try_iter() {
            run_line(&mut host, &line);
        }

        let timedemo = host.client().static_state().timedemo.is_some();
        let elapsed = last.elapsed();
        if !timedemo && elapsed < tick {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }
        last = Instant::now();

        match host.frame(elapsed.as_secs_f64().min(0.1), &cmd) {
            Ok(()) => {}
            Err(HostError::Client(err)) => log::warn!("session ended: {err}"),
            Err(err) => log::error!("{err}"),
        }

        frames += 1;
        if args.frames.is_some_and(|limit| frames >= limit) {
            break;
        }
    }

    host.shutdown()?;
    Ok(())
}

fn run_line(host: &mut Host, line: &str) {
    if let Err(err) = host.execute_line(line) {
        log::warn!("{line}: {err}");
    }
}
