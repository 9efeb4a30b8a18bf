//! Operator commands read from stdin. Anything that is not a command is sent
//! as chat from the host.

use leapfrog::Session;

const KICK_REASON: &str = "kicked by host";

pub async fn execute(session: &mut Session, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let Some(command) = line.strip_prefix('/') else {
        if let Err(e) = session.send_chat(line).await {
            log::warn!("Chat failed: {}", e);
        }
        return;
    };

    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("scene") => match parts.next() {
            Some(name) => {
                if let Err(e) = session.change_scene(name).await {
                    log::warn!("Scene change failed: {}", e);
                }
            }
            None => log::warn!("Usage: /scene <name>"),
        },
        Some("kick") => {
            let Some(client_id) = parts.next().and_then(|id| id.parse::<i32>().ok()) else {
                log::warn!("Usage: /kick <client id> [reason]");
                return;
            };
            let reason = parts.collect::<Vec<_>>().join(" ");
            let reason = if reason.is_empty() {
                KICK_REASON
            } else {
                reason.as_str()
            };
            let kicked = match session.host_server() {
                Some(server) => server.kick(client_id, reason).await,
                None => false,
            };
            if !kicked {
                log::warn!("No client {}", client_id);
            }
        }
        Some("clients") => {
            if let Some(server) = session.host_server() {
                let ids = server.client_ids().await;
                log::info!("{} connected: {:?}", ids.len(), ids);
            }
        }
        Some(other) => log::warn!("Unknown command /{}", other),
        None => {}
    }
}
