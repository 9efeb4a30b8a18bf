mod script;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::MissedTickBehavior;

use leapfrog::net::REASON_CLIENT_REQUESTED;
use leapfrog::player::Pawn;
use leapfrog::{
    ClientConfig, FixedTimestep, Protocol, Session, SessionConfig, SessionEvent, SessionManager,
};
use script::ScriptedInput;

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "leapfrog-client")]
#[command(about = "Headless Leapfrog client driven by scripted input")]
struct Args {
    #[arg(long, default_value = "127.0.0.1", help = "Host name or address of the server")]
    host: String,

    #[arg(short, long, default_value_t = leapfrog::DEFAULT_TCP_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 0, help = "Local UDP port (0 picks one)")]
    udp_port: u16,

    #[arg(short, long, default_value_t = leapfrog::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, help = "Seconds to play before leaving")]
    duration: Option<u64>,

    #[arg(long, default_value_t = 10, help = "Handshake timeout in seconds")]
    timeout: u64,

    #[arg(long, help = "Chat message to send after joining")]
    say: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let registry = leapfrog::player::object_registry()?;
    let protocol = Arc::new(Protocol::new(registry)?);
    let mut manager = SessionManager::new(protocol);

    let config = SessionConfig::Client {
        host: args.host.clone(),
        tcp_port: args.port,
        config: ClientConfig {
            handshake_timeout: Duration::from_secs(args.timeout),
            local_udp_port: args.udp_port,
        },
    };
    let session = manager
        .switch(config)
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    log::info!("Joined {}:{} as client {}", args.host, args.port, session.local_client_id());

    if let Some(message) = &args.say {
        session.send_chat(message).await?;
    }

    let disconnected = play(session, &args).await?;
    if !disconnected {
        manager.end(REASON_CLIENT_REQUESTED).await;
    }
    Ok(())
}

/// Returns `true` if the server ended the session.
async fn play(session: &mut Session, args: &Args) -> Result<bool> {
    let mut timestep = FixedTimestep::new(args.tick_rate);
    let mut script = ScriptedInput::new(std::f32::consts::TAU / timestep.tick_rate() as f32 / 4.0);

    let mut interval = tokio::time::interval(Duration::from_millis(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let started = Instant::now();
    let mut last_frame = started;
    let mut last_status = started;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for ctrl-c")?;
                return Ok(false);
            }
            _ = interval.tick() => {
                let now = Instant::now();
                let steps = timestep.advance((now - last_frame).as_secs_f32());
                last_frame = now;

                for _ in 0..steps {
                    session.submit_input(&script.sample());
                    for event in session.update(timestep.dt()).await {
                        if let SessionEvent::Disconnected { reason } = &event {
                            log::warn!("Disconnected: {}", reason);
                            return Ok(true);
                        }
                        log_event(&event);
                    }
                }

                if last_status.elapsed() >= STATUS_INTERVAL {
                    last_status = now;
                    log_status(session);
                }

                if args
                    .duration
                    .is_some_and(|secs| started.elapsed() >= Duration::from_secs(secs))
                {
                    log::info!("Play time over");
                    return Ok(false);
                }
            }
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Chat { client_id, message } => {
            log::info!("[chat] {}: {}", client_id, message);
        }
        SessionEvent::SceneChanged {
            scene_epoch,
            scene_name,
        } => {
            log::info!("Entered scene '{}' (epoch {})", scene_name, scene_epoch);
        }
        SessionEvent::SnapshotApplied { tick } => log::trace!("Applied snapshot {}", tick),
        other => log::debug!("{:?}", other),
    }
}

fn log_status(session: &Session) {
    let pawn = session
        .scene()
        .find_pawn(session.local_client_id())
        .and_then(|object| object.downcast_ref::<Pawn>());

    match pawn {
        Some(pawn) => log::info!(
            "{} at ({:.2}, {:.2}) height {:.2} health {} | acked {} in flight {}",
            pawn.name,
            pawn.position.x,
            pawn.position.y,
            pawn.height,
            pawn.health,
            session.sequencer().last_acked(),
            session.sequencer().in_flight(),
        ),
        None => log::info!("Waiting for pawn"),
    }

    if let Some(connection) = session.connection() {
        let stats = connection.stats().snapshot();
        log::info!(
            "udp {}/{} (dropped {}) | {} B out, {} B in",
            stats.unreliable_sent,
            stats.unreliable_received,
            stats.unreliable_dropped,
            stats.bytes_sent,
            stats.bytes_received,
        );
    }
}
