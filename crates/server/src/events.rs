use leapfrog::{Session, SessionEvent};

pub fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ClientJoined { client_id } => {
            log::info!("Client {} joined", client_id);
        }
        SessionEvent::ClientLeft { client_id, reason } => {
            log::info!("Client {} left: {}", client_id, reason);
        }
        SessionEvent::Chat { client_id, message } => {
            log::info!("[chat] {}: {}", client_id, message);
        }
        SessionEvent::SceneChanged {
            scene_epoch,
            scene_name,
        } => {
            log::info!("Scene is now '{}' (epoch {})", scene_name, scene_epoch);
        }
        SessionEvent::Disconnected { reason } => {
            log::warn!("Disconnected: {}", reason);
        }
        SessionEvent::SnapshotApplied { .. } => {}
    }
}

pub async fn log_stats(session: &Session) {
    let Some(server) = session.host_server() else {
        return;
    };

    let stats = server.stats().snapshot();
    log::info!(
        "tick {} | {} clients | {} objects | tcp {}/{} udp {}/{} (dropped {}) | {} B out, {} B in",
        session.tick(),
        server.client_count().await,
        session.scene().node_count(),
        stats.reliable_sent,
        stats.reliable_received,
        stats.unreliable_sent,
        stats.unreliable_received,
        stats.unreliable_dropped,
        stats.bytes_sent,
        stats.bytes_received,
    );
}
