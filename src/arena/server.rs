//! TCP listener for one arena's simulation process

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::arena::{Arena, ArenaError};

pub struct ArenaServer {
    arena: Arc<Arena>,
    listener: TcpListener,
}

impl ArenaServer {
    pub async fn bind(arena: Arc<Arena>, addr: SocketAddr) -> Result<Self, ArenaError> {
        let listener = TcpListener::bind(addr).await.map_err(ArenaError::Bind)?;
        Ok(Self { arena, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ArenaError> {
        self.listener.local_addr().map_err(ArenaError::Bind)
    }

    /// Accept simulation connections one at a time, for the process lifetime
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Arena {} listening on {}", self.arena.id(), addr);
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Arena {}: accept failed: {}", self.arena.id(), e);
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Arena {}: set_nodelay for {} failed: {}", self.arena.id(), peer, e);
            }

            info!("Arena {}: simulation connected from {}", self.arena.id(), peer);
            if let Err(e) = self.arena.clone().serve(stream).await {
                warn!("Arena {}: connection from {} closed: {}", self.arena.id(), peer, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::tests::{arena, fill_active};
    use crate::net::framing::FrameStream;
    use crate::net::protocol::{commands, MessageType};
    use crate::queue::system::tests::harness;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_simulation_receives_init_over_tcp() {
        let h = harness();
        fill_active(&h).await;
        let arena = arena(&h);

        let server = ArenaServer::bind(arena.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        let sim = TcpStream::connect(addr).await.unwrap();
        let mut frames = FrameStream::new(sim);
        let frame = frames.next_frame().await.unwrap();
        assert_eq!(frame[0], MessageType::Json as u8);
        let msg: serde_json::Value = serde_json::from_slice(&frame[1..]).unwrap();
        assert_eq!(msg["battleCommand"], commands::BATTLE_INIT);
        assert_eq!(
            msg["payload"]["battleID"].as_str().unwrap(),
            arena.current_battle().unwrap().id().to_string()
        );

        handle.abort();
    }
}
