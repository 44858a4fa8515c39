//! Outbound half of a simulation connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::net::correlator::{Correlated, RequestCorrelator};
use crate::net::framing::{write_frame, FramingError};
use crate::net::protocol::{commands, encode_command, GameAbilityEvent, ProtocolError};

pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Simulation not connected")]
    NotConnected,
    #[error("Failed to encode {command}: {source}")]
    Encode {
        command: String,
        #[source]
        source: ProtocolError,
    },
    #[error("Write failed: {0}")]
    Write(#[from] FramingError),
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),
}

/// Outcome of a location/ability validity round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbilityCheck {
    Valid,
    Invalid,
    TimedOut,
    /// The query could not be sent
    Unavailable,
}

/// What the rest of the core needs from a simulation connection
#[async_trait]
pub trait SimulationLink: Send + Sync {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), LinkError>;

    /// Send `BATTLE:ABILITY` and wait for the simulation's verdict
    async fn check_ability(&self, event: GameAbilityEvent) -> AbilityCheck;
}

/// Encode and send `{battleCommand, payload}`
pub async fn send_command<T: Serialize + Sync>(
    link: &dyn SimulationLink,
    command: &str,
    payload: &T,
) -> Result<(), LinkError> {
    let frame = encode_command(command, payload).map_err(|source| LinkError::Encode {
        command: command.to_string(),
        source,
    })?;
    link.send_frame(frame).await
}

/// Socket writer plus the correlator for round trips on it
pub struct SimConnection {
    writer: Mutex<Option<FrameWriter>>,
    connected: AtomicBool,
    correlator: RequestCorrelator<bool>,
    write_timeout: Duration,
    check_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl SimConnection {
    pub fn new(write_timeout: Duration, check_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            correlator: RequestCorrelator::new(),
            write_timeout,
            check_timeout,
            metrics,
        }
    }

    /// Install the writer for a freshly accepted connection
    pub async fn attach(&self, writer: FrameWriter) {
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
    }

    pub async fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deliver an inbound `BATTLE:ABILITY_CHECK_RESPONSE`
    pub fn resolve_check(&self, event_id: Uuid, is_valid: bool) {
        if !self.correlator.resolve(&event_id, is_valid) {
            debug!("Late or unknown ability check reply {}", event_id);
        }
    }

    pub fn pending_checks(&self) -> usize {
        self.correlator.pending()
    }
}

#[async_trait]
impl SimulationLink for SimConnection {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), LinkError> {
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(LinkError::NotConnected)?;

        let result = match tokio::time::timeout(self.write_timeout, write_frame(stream, &frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LinkError::Write(e)),
            Err(_) => Err(LinkError::WriteTimeout(self.write_timeout)),
        };

        match &result {
            Ok(()) => Metrics::incr(&self.metrics.frames_sent),
            Err(e) => {
                Metrics::incr(&self.metrics.write_failures);
                warn!("Failed to write frame to simulation: {}", e);
            }
        }
        result
    }

    async fn check_ability(&self, event: GameAbilityEvent) -> AbilityCheck {
        let id = event.event_id;
        let frame = match encode_command(commands::BATTLE_ABILITY, &event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode ability check {}: {}", id, e);
                return AbilityCheck::Unavailable;
            }
        };

        let outcome = self
            .correlator
            .request(id, self.check_timeout, || self.send_frame(frame))
            .await;

        let check = match outcome {
            Ok(Correlated::Reply(true)) => AbilityCheck::Valid,
            Ok(Correlated::Reply(false)) => AbilityCheck::Invalid,
            Ok(Correlated::TimedOut) | Ok(Correlated::Dropped) => AbilityCheck::TimedOut,
            Ok(Correlated::Duplicate) => {
                warn!("Ability check {} is already in flight", id);
                AbilityCheck::Unavailable
            }
            Err(_) => AbilityCheck::Unavailable,
        };

        let counter = match check {
            AbilityCheck::Valid => &self.metrics.location_checks_ok,
            AbilityCheck::Invalid => &self.metrics.location_checks_invalid,
            AbilityCheck::TimedOut | AbilityCheck::Unavailable => &self.metrics.location_checks_timed_out,
        };
        Metrics::incr(counter);
        check
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::GameLocation;
    use crate::net::framing::FrameStream;

    fn connection() -> Arc<SimConnection> {
        Arc::new(SimConnection::new(
            Duration::from_secs(1),
            Duration::from_millis(200),
            Arc::new(Metrics::new()),
        ))
    }

    fn event() -> GameAbilityEvent {
        GameAbilityEvent {
            is_triggered: true,
            game_client_ability_id: 8,
            war_machine_hash: Some("hash".into()),
            participant_id: Some(1),
            event_id: Uuid::new_v4(),
            game_location: Some(GameLocation::new(1, 2)),
        }
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let conn = connection();
        let result = send_command(conn.as_ref(), commands::BATTLE_INIT, &serde_json::json!({})).await;
        assert!(matches!(result, Err(LinkError::NotConnected)));
        assert_eq!(conn.check_ability(event()).await, AbilityCheck::Unavailable);
        assert_eq!(conn.pending_checks(), 0);
    }

    #[tokio::test]
    async fn test_check_round_trip() {
        let conn = connection();
        let (client, mut sim) = tokio::io::duplex(4096);
        conn.attach(Box::new(client)).await;

        let responder = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let mut frames = FrameStream::new(&mut sim);
                let frame = frames.next_frame().await.unwrap();
                let value: serde_json::Value = serde_json::from_slice(&frame[1..]).unwrap();
                let id: Uuid = serde_json::from_value(value["payload"]["eventID"].clone()).unwrap();
                conn.resolve_check(id, false);
            })
        };

        assert_eq!(conn.check_ability(event()).await, AbilityCheck::Invalid);
        responder.await.unwrap();
        assert_eq!(conn.pending_checks(), 0);
    }

    #[tokio::test]
    async fn test_check_times_out() {
        let conn = connection();
        let (client, _sim) = tokio::io::duplex(4096);
        conn.attach(Box::new(client)).await;

        let ev = event();
        let id = ev.event_id;
        assert_eq!(conn.check_ability(ev).await, AbilityCheck::TimedOut);
        assert_eq!(conn.pending_checks(), 0);

        // Reply after the timeout is a no-op
        conn.resolve_check(id, true);
    }

    #[tokio::test]
    async fn test_detach() {
        let conn = connection();
        let (client, _sim) = tokio::io::duplex(64);
        conn.attach(Box::new(client)).await;
        assert!(conn.is_connected());

        conn.detach().await;
        assert!(!conn.is_connected());
    }
}
