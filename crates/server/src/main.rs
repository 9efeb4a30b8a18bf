mod console;
mod events;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use leapfrog::{FixedTimestep, Protocol, ServerConfig, SessionConfig, SessionManager};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "leapfrog-server")]
#[command(about = "Leapfrog authoritative host")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short = 'p', long, default_value_t = leapfrog::DEFAULT_TCP_PORT)]
    tcp_port: u16,

    #[arg(short = 'u', long, default_value_t = leapfrog::DEFAULT_UDP_PORT)]
    udp_port: u16,

    #[arg(short, long, default_value_t = leapfrog::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value_t = 120, help = "Ticks between full snapshots")]
    full_sync_interval: u32,

    #[arg(short, long, default_value = "pond")]
    scene: String,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            tcp_port: self.tcp_port,
            udp_port: self.udp_port,
            max_clients: self.max_clients,
            tick_rate: self.tick_rate,
            full_sync_interval: self.full_sync_interval,
            scene_name: self.scene.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.server_config();

    let registry = leapfrog::player::object_registry()?;
    let protocol = Arc::new(Protocol::new(registry)?);
    let mut manager = SessionManager::new(protocol);

    manager
        .switch(SessionConfig::Host(config.clone()))
        .await
        .with_context(|| format!("failed to host on {}:{}", config.bind, config.tcp_port))?;

    run(&mut manager, config.tick_rate).await?;

    log::info!("Server shutting down");
    manager.end(leapfrog::net::REASON_SERVER_SHUTDOWN).await;
    Ok(())
}

async fn run(manager: &mut SessionManager, tick_rate: u32) -> Result<()> {
    let session = manager
        .active_mut()
        .context("host session is not active")?;

    let mut timestep = FixedTimestep::new(tick_rate);
    let mut interval = tokio::time::interval(Duration::from_millis(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_frame = Instant::now();
    let mut last_stats = Instant::now();

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for ctrl-c")?;
                return Ok(());
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => console::execute(session, &line).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("Console input closed: {}", e);
                    stdin_open = false;
                }
            },
            _ = interval.tick() => {
                let now = Instant::now();
                let steps = timestep.advance((now - last_frame).as_secs_f32());
                last_frame = now;

                for _ in 0..steps {
                    for event in session.update(timestep.dt()).await {
                        events::log_event(&event);
                    }
                }

                if last_stats.elapsed() >= STATS_INTERVAL {
                    last_stats = Instant::now();
                    events::log_stats(session).await;
                }
            }
        }
    }
}
