//! Arena: one simulation connection and the battle running on it
//!
//! The read loop is the only task that feeds inbound frames into the current
//! battle. The current battle is an `Arc` swapped as a whole; callers take a
//! snapshot with [`Arena::current_battle`] and work on that.

pub mod commands;
pub mod manager;
pub mod server;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::battle::{Battle, BattleDeps, BattleError, BattleStage, SessionTemplate};
use crate::config::ServerConfig;
use crate::game::types::{BattleId, PlayerId};
use crate::metrics::Metrics;
use crate::net::framing::{FrameStream, FramingError};
use crate::net::link::{send_command, LinkError, SimConnection};
use crate::net::protocol::{commands as cmd, decode_frame, InboundCommand, InboundFrame};
use crate::queue::{BattleQueue, QueueError};
use crate::services::payments::PaymentsClient;
use crate::services::pubsub::{keys, publish_event, topics, Publisher};
use crate::voting::{AbilityCatalog, ContributionRateLimiter};

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("No battle on this arena")]
    NoBattle,
    #[error(transparent)]
    Battle(#[from] BattleError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("Connection error: {0}")]
    Framing(#[from] FramingError),
    #[error("Bind failed: {0}")]
    Bind(#[source] std::io::Error),
}

/// Process-wide collaborators every arena shares
#[derive(Clone)]
pub struct ArenaServices {
    pub payments: Arc<dyn PaymentsClient>,
    pub publisher: Arc<dyn Publisher>,
    pub catalog: Arc<AbilityCatalog>,
    pub metrics: Arc<Metrics>,
    pub ai_players: Arc<HashSet<PlayerId>>,
}

pub struct Arena {
    id: Uuid,
    link: Arc<SimConnection>,
    queue: Arc<BattleQueue>,
    deps: BattleDeps,
    current: RwLock<Option<Arc<Battle>>>,
    cooling_down: AtomicBool,
    battle_counter: AtomicU64,
    cooldown: Duration,
    begin_lock: tokio::sync::Mutex<()>,
    limiter: ContributionRateLimiter,
    metrics: Arc<Metrics>,
}

impl Arena {
    pub fn new(id: Uuid, queue: Arc<BattleQueue>, services: ArenaServices, config: &ServerConfig) -> Arc<Self> {
        let link = Arc::new(SimConnection::new(
            config.write_timeout,
            config.location_check_timeout,
            services.metrics.clone(),
        ));
        let deps = BattleDeps {
            arena_id: id,
            link: link.clone(),
            ctx_template: SessionTemplate {
                timings: config.vote.clone(),
                collaborator_timeout: config.collaborator_timeout,
                payments: services.payments,
            },
            catalog: services.catalog,
            publisher: services.publisher,
            metrics: services.metrics.clone(),
            ai_players: services.ai_players,
            game_client_min_build: config.game_client_min_build,
        };

        Arc::new(Self {
            id,
            link,
            queue,
            deps,
            current: RwLock::new(None),
            cooling_down: AtomicBool::new(false),
            battle_counter: AtomicU64::new(0),
            cooldown: config.battle_end_cooldown,
            begin_lock: tokio::sync::Mutex::new(()),
            limiter: ContributionRateLimiter::from_timings(&config.vote),
            metrics: services.metrics,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn link(&self) -> &Arc<SimConnection> {
        &self.link
    }

    /// Snapshot of the current battle
    pub fn current_battle(&self) -> Option<Arc<Battle>> {
        self.current.read().clone()
    }

    /// Connected, not cooling down, and no battle in progress
    pub fn is_idle(&self) -> bool {
        self.link.is_connected()
            && !self.cooling_down.load(Ordering::Acquire)
            && self
                .current_battle()
                .map_or(true, |b| b.stage() == BattleStage::End)
    }

    /// Compose a battle from the active queue and announce it
    ///
    /// `Ok(None)` when the arena is busy or the queue cannot fill a roster.
    pub async fn begin_battle(self: &Arc<Self>) -> Result<Option<BattleId>, ArenaError> {
        let _guard = self.begin_lock.lock().await;
        if !self.is_idle() {
            return Ok(None);
        }

        let id = Uuid::new_v4();
        let Some(roster) = self.queue.compose_battle(id).await? else {
            debug!("Arena {}: queue cannot fill a battle yet", self.id);
            return Ok(None);
        };

        let number = self.battle_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let battle = Arc::new(Battle::new(id, number, roster, self.deps.clone()));
        if let Some(previous) = self.current.write().replace(battle.clone()) {
            previous.abort();
        }

        info!("Arena {}: battle {} (#{}) composed", self.id, id, number);
        self.announce(&battle).await?;
        Ok(Some(id))
    }

    /// Send `BATTLE:INIT`. Only an encode failure is an error; a failed write
    /// is retried by the next connection resending INIT.
    async fn announce(&self, battle: &Battle) -> Result<(), ArenaError> {
        let payload = battle.init_payload();
        match send_command(self.link.as_ref(), cmd::BATTLE_INIT, &payload).await {
            Ok(()) => {}
            Err(e @ LinkError::Encode { .. }) => return Err(e.into()),
            Err(e) => warn!("Arena {}: BATTLE:INIT for {} not delivered: {}", self.id, battle.id(), e),
        }
        publish_event(
            self.deps.publisher.as_ref(),
            topics::arena_battle(self.id),
            keys::BATTLE_INIT,
            &payload,
        );
        Ok(())
    }

    /// Serve one simulation connection until it closes
    ///
    /// Malformed frames are dropped; only I/O errors end the connection.
    pub async fn serve<S>(self: Arc<Self>, stream: S) -> Result<(), ArenaError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut frames = FrameStream::new(reader);
        self.link.attach(Box::new(writer)).await;
        Metrics::incr(&self.metrics.connections_active);
        info!("Arena {}: simulation connected", self.id);

        match self.current_battle() {
            Some(battle) if battle.stage() == BattleStage::Start => {
                info!("Arena {}: resuming battle {}", self.id, battle.id());
                self.announce(&battle).await?;
            }
            _ => {
                if let Err(e) = self.begin_battle().await {
                    warn!("Arena {}: could not begin battle: {}", self.id, e);
                }
            }
        }

        let result = loop {
            match frames.next_frame().await {
                Ok(frame) => {
                    Metrics::incr(&self.metrics.frames_received);
                    self.handle_frame(frame).await;
                }
                Err(FramingError::ConnectionClosed) => break Ok(()),
                Err(e) => break Err(ArenaError::from(e)),
            }
        };

        self.link.detach().await;
        Metrics::decr(&self.metrics.connections_active);
        info!("Arena {}: simulation disconnected", self.id);
        result
    }

    async fn handle_frame(self: &Arc<Self>, frame: &[u8]) {
        let outcome = match decode_frame(frame) {
            Ok(InboundFrame::Tick(body)) => match self.current_battle() {
                Some(battle) => battle.tick(body).map(|_| ()).map_err(ArenaError::from),
                None => Ok(()),
            },
            Ok(InboundFrame::Command(command)) => self.dispatch(command).await,
            Ok(InboundFrame::Ignored(kind)) => {
                trace!("Ignoring {:?} frame", kind);
                Ok(())
            }
            Err(e) => {
                Metrics::incr(&self.metrics.frames_dropped);
                warn!("Arena {}: dropped malformed frame: {}", self.id, e);
                return;
            }
        };

        if let Err(e) = outcome {
            Metrics::incr(&self.metrics.frames_dropped);
            warn!("Arena {}: frame rejected: {}", self.id, e);
        }
    }

    async fn dispatch(self: &Arc<Self>, command: InboundCommand) -> Result<(), ArenaError> {
        if let InboundCommand::AbilityCheckResponse(reply) = command {
            self.link.resolve_check(reply.event_id, reply.is_valid);
            return Ok(());
        }
        if let InboundCommand::Unknown(name) = command {
            debug!("Arena {}: unhandled command {}", self.id, name);
            return Ok(());
        }

        let battle = self.current_battle().ok_or(ArenaError::NoBattle)?;
        match command {
            InboundCommand::Start(payload) => battle.start(&payload)?,
            InboundCommand::MapDetails(payload) => battle.set_map(payload.battle_id, payload.details)?,
            InboundCommand::WarMachineDestroyed(payload) => {
                battle.destroyed(payload)?;
            }
            InboundCommand::End(payload) => {
                battle.end(&payload)?;
                self.cooling_down.store(true, Ordering::Release);
                if let Err(e) = self.queue.settle_battle(battle.id()).await {
                    warn!("Arena {}: settling battle {} failed: {}", self.id, battle.id(), e);
                }
                self.schedule_next_battle();
            }
            InboundCommand::AbilityCheckResponse(_) | InboundCommand::Unknown(_) => {}
        }
        Ok(())
    }

    fn schedule_next_battle(self: &Arc<Self>) {
        self.limiter.prune();
        let arena = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(arena.cooldown).await;
            arena.cooling_down.store(false, Ordering::Release);
            match arena.begin_battle().await {
                Ok(Some(id)) => debug!("Arena {}: next battle {}", arena.id, id),
                Ok(None) => debug!("Arena {}: idle after cooldown", arena.id),
                Err(e) => warn!("Arena {}: next battle failed: {}", arena.id, e),
            }
        });
    }

    /// Stop the current battle's background work
    pub fn shutdown(&self) {
        if let Some(battle) = self.current_battle() {
            battle.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::battle::war_machine::test_profile;
    use crate::game::types::Faction;
    use crate::net::framing::write_frame;
    use crate::net::protocol::MessageType;
    use crate::queue::system::tests::{harness, Harness};
    use tokio::io::DuplexStream;

    pub(crate) fn arena(h: &Harness) -> Arc<Arena> {
        let config = ServerConfig::default();
        Arena::new(
            Uuid::new_v4(),
            h.queue.clone(),
            ArenaServices {
                payments: h.payments.clone(),
                publisher: h.publisher.clone(),
                catalog: Arc::new(AbilityCatalog::standard()),
                metrics: h.metrics.clone(),
                ai_players: Arc::new(HashSet::new()),
            },
            &config,
        )
    }

    pub(crate) async fn fill_active(h: &Harness) {
        for faction in Faction::ALL {
            for i in 0..h.queue.config().faction_mech_limit {
                h.queue.join(test_profile(faction, &format!("{}{}", faction, i))).await.unwrap();
            }
        }
        h.queue.promote().await.unwrap();
    }

    fn json(command: &str, payload: serde_json::Value) -> Vec<u8> {
        let mut frame = vec![MessageType::Json as u8];
        frame.extend_from_slice(
            serde_json::json!({ "battleCommand": command, "payload": payload })
                .to_string()
                .as_bytes(),
        );
        frame
    }

    async fn read_command(client: &mut DuplexStream) -> serde_json::Value {
        let mut frames = FrameStream::new(client);
        let frame = frames.next_frame().await.unwrap();
        assert_eq!(frame[0], MessageType::Json as u8);
        serde_json::from_slice(&frame[1..]).unwrap()
    }

    fn start_frame(init: &serde_json::Value) -> Vec<u8> {
        let payload = &init["payload"];
        let machines: Vec<_> = payload["warMachines"]
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, wm)| serde_json::json!({ "hash": wm["hash"], "participantID": i + 1 }))
            .collect();
        json(
            cmd::BATTLE_START,
            serde_json::json!({ "battleID": payload["battleID"], "warMachines": machines }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_battle_lifecycle_over_connection() {
        let h = harness();
        fill_active(&h).await;
        let arena = arena(&h);

        let (server, mut client) = tokio::io::duplex(1 << 16);
        let serving = tokio::spawn(arena.clone().serve(server));

        let init = read_command(&mut client).await;
        assert_eq!(init["battleCommand"], cmd::BATTLE_INIT);
        let battle_id = init["payload"]["battleID"].as_str().unwrap().to_string();
        assert_eq!(init["payload"]["warMachines"].as_array().unwrap().len(), 9);

        // Garbage must not take the connection down
        write_frame(&mut client, &[0xFF, 1, 2]).await.unwrap();
        write_frame(&mut client, &[MessageType::Json as u8, b'{']).await.unwrap();
        write_frame(&mut client, &start_frame(&init)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let battle = arena.current_battle().unwrap();
        assert_eq!(battle.id().to_string(), battle_id);
        assert!(battle.is_started());
        assert_eq!(h.metrics.frames_dropped.load(Ordering::Relaxed), 2);
        assert!(!arena.is_idle());

        // Queue up the next battle while this one runs
        fill_active(&h).await;

        write_frame(
            &mut client,
            &json(
                cmd::BATTLE_END,
                serde_json::json!({ "battleID": battle_id, "winningWarMachines": [], "winCondition": "LAST_ONE_STANDING" }),
            ),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(battle.stage(), BattleStage::End);
        assert!(!arena.is_idle());

        // After the cooldown a fresh battle is announced
        let next = read_command(&mut client).await;
        assert_eq!(next["battleCommand"], cmd::BATTLE_INIT);
        assert_ne!(next["payload"]["battleID"].as_str().unwrap(), battle_id);
        assert_eq!(arena.current_battle().unwrap().number(), 2);

        drop(client);
        serving.await.unwrap().unwrap();
        assert!(!arena.link().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resends_current_battle() {
        let h = harness();
        fill_active(&h).await;
        let arena = arena(&h);

        let (server, mut client) = tokio::io::duplex(1 << 16);
        let serving = tokio::spawn(arena.clone().serve(server));
        let first = read_command(&mut client).await;
        drop(client);
        serving.await.unwrap().unwrap();

        let (server, mut client) = tokio::io::duplex(1 << 16);
        let serving = tokio::spawn(arena.clone().serve(server));
        let again = read_command(&mut client).await;
        assert_eq!(first["payload"]["battleID"], again["payload"]["battleID"]);
        assert_eq!(arena.current_battle().unwrap().number(), 1);

        drop(client);
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_until_queue_fills() {
        let h = harness();
        let arena = arena(&h);
        assert!(!arena.is_idle());

        let (server, _client) = tokio::io::duplex(1 << 16);
        let serving = tokio::spawn(arena.clone().serve(server));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(arena.current_battle().is_none());
        assert!(arena.is_idle());
        assert_eq!(arena.begin_battle().await.unwrap(), None);

        fill_active(&h).await;
        assert!(arena.begin_battle().await.unwrap().is_some());
        assert!(!arena.is_idle());
        assert_eq!(arena.begin_battle().await.unwrap(), None);
        serving.abort();
    }
}
