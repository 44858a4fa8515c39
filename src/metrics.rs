//! Prometheus-compatible metrics endpoint
//!
//! Exposes arena, queue and voting counters in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    // Simulation socket
    pub connections_active: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_sent: AtomicU64,
    pub write_failures: AtomicU64,
    pub ticks_processed: AtomicU64,

    // Battle lifecycle
    pub battles_started: AtomicU64,
    pub battles_ended: AtomicU64,
    pub war_machines_destroyed: AtomicU64,

    // Queue
    pub queue_ticks: AtomicU64,
    pub queue_ticks_skipped: AtomicU64,
    pub queue_promotions: AtomicU64,
    pub queue_culled: AtomicU64,
    pub refunds_issued: AtomicU64,
    pub refunds_failed: AtomicU64,

    // Voting
    pub contributions: AtomicU64,
    pub contributions_rejected: AtomicU64,
    pub abilities_triggered: AtomicU64,
    pub location_checks_ok: AtomicU64,
    pub location_checks_invalid: AtomicU64,
    pub location_checks_timed_out: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            ticks_processed: AtomicU64::new(0),
            battles_started: AtomicU64::new(0),
            battles_ended: AtomicU64::new(0),
            war_machines_destroyed: AtomicU64::new(0),
            queue_ticks: AtomicU64::new(0),
            queue_ticks_skipped: AtomicU64::new(0),
            queue_promotions: AtomicU64::new(0),
            queue_culled: AtomicU64::new(0),
            refunds_issued: AtomicU64::new(0),
            refunds_failed: AtomicU64::new(0),
            contributions: AtomicU64::new(0),
            contributions_rejected: AtomicU64::new(0),
            abilities_triggered: AtomicU64::new(0),
            location_checks_ok: AtomicU64::new(0),
            location_checks_invalid: AtomicU64::new(0),
            location_checks_timed_out: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Saturating decrement for gauges
    pub fn decr(counter: &AtomicU64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("mech_arena_connections_active", "Connected simulation processes", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("mech_arena_frames_received_total", "Frames read from simulation sockets", "counter",
            self.frames_received.load(Ordering::Relaxed));
        metric!("mech_arena_frames_dropped_total", "Frames dropped on decode or dispatch errors", "counter",
            self.frames_dropped.load(Ordering::Relaxed));
        metric!("mech_arena_frames_sent_total", "Frames written to simulation sockets", "counter",
            self.frames_sent.load(Ordering::Relaxed));
        metric!("mech_arena_write_failures_total", "Failed or timed out socket writes", "counter",
            self.write_failures.load(Ordering::Relaxed));
        metric!("mech_arena_ticks_processed_total", "Tick frames applied to a battle", "counter",
            self.ticks_processed.load(Ordering::Relaxed));

        metric!("mech_arena_battles_started_total", "Battles initialised", "counter",
            self.battles_started.load(Ordering::Relaxed));
        metric!("mech_arena_battles_ended_total", "Battles finalised", "counter",
            self.battles_ended.load(Ordering::Relaxed));
        metric!("mech_arena_war_machines_destroyed_total", "War machines destroyed", "counter",
            self.war_machines_destroyed.load(Ordering::Relaxed));

        metric!("mech_arena_queue_ticks_total", "Scheduler ticks run", "counter",
            self.queue_ticks.load(Ordering::Relaxed));
        metric!("mech_arena_queue_ticks_skipped_total", "Scheduler ticks without promotion", "counter",
            self.queue_ticks_skipped.load(Ordering::Relaxed));
        metric!("mech_arena_queue_promotions_total", "Mechs promoted from backlog", "counter",
            self.queue_promotions.load(Ordering::Relaxed));
        metric!("mech_arena_queue_culled_total", "Active queue entries culled at startup", "counter",
            self.queue_culled.load(Ordering::Relaxed));
        metric!("mech_arena_refunds_issued_total", "Fee refunds completed", "counter",
            self.refunds_issued.load(Ordering::Relaxed));
        metric!("mech_arena_refunds_failed_total", "Fee refunds left flagged for reconciliation", "counter",
            self.refunds_failed.load(Ordering::Relaxed));

        metric!("mech_arena_contributions_total", "Accepted ability contributions", "counter",
            self.contributions.load(Ordering::Relaxed));
        metric!("mech_arena_contributions_rejected_total", "Rejected ability contributions", "counter",
            self.contributions_rejected.load(Ordering::Relaxed));
        metric!("mech_arena_abilities_triggered_total", "Abilities triggered in the simulation", "counter",
            self.abilities_triggered.load(Ordering::Relaxed));

        #[cfg(feature = "metrics_extended")]
        {
            metric!("mech_arena_location_checks_ok_total", "Location checks accepted", "counter",
                self.location_checks_ok.load(Ordering::Relaxed));
            metric!("mech_arena_location_checks_invalid_total", "Location checks rejected", "counter",
                self.location_checks_invalid.load(Ordering::Relaxed));
            metric!("mech_arena_location_checks_timed_out_total", "Location checks without reply", "counter",
                self.location_checks_timed_out.load(Ordering::Relaxed));
        }

        metric!("mech_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "network": {
                "connections": load(&self.connections_active),
                "frames_received": load(&self.frames_received),
                "frames_dropped": load(&self.frames_dropped),
                "frames_sent": load(&self.frames_sent),
                "write_failures": load(&self.write_failures),
                "ticks_processed": load(&self.ticks_processed),
            },
            "battles": {
                "started": load(&self.battles_started),
                "ended": load(&self.battles_ended),
                "war_machines_destroyed": load(&self.war_machines_destroyed),
            },
            "queue": {
                "ticks": load(&self.queue_ticks),
                "ticks_skipped": load(&self.queue_ticks_skipped),
                "promotions": load(&self.queue_promotions),
                "culled": load(&self.queue_culled),
                "refunds_issued": load(&self.refunds_issued),
                "refunds_failed": load(&self.refunds_failed),
            },
            "voting": {
                "contributions": load(&self.contributions),
                "contributions_rejected": load(&self.contributions_rejected),
                "abilities_triggered": load(&self.abilities_triggered),
                "location_checks_ok": load(&self.location_checks_ok),
                "location_checks_invalid": load(&self.location_checks_invalid),
                "location_checks_timed_out": load(&self.location_checks_timed_out),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `/metrics`, `/metrics/json` and `/health` until the process exits
///
/// Only binding can fail; a bad scrape connection is logged and dropped.
pub async fn serve_metrics(metrics: Arc<Metrics>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics endpoint on http://{}/metrics", listener.local_addr()?);

    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Metrics accept failed: {}", e);
                continue;
            }
        };
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut request = [0u8; 1024];
            let n = match socket.read(&mut request).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    debug!("Metrics scrape from {} failed: {}", peer, e);
                    return;
                }
            };

            let response = route(&String::from_utf8_lossy(&request[..n]), &metrics);
            if let Err(e) = socket.write_all(response.as_bytes()).await {
                debug!("Metrics reply to {} failed: {}", peer, e);
            }
        });
    }
}

fn route(request: &str, metrics: &Metrics) -> String {
    let respond = |content_type: &str, body: String| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    };

    // Longest prefix first
    if request.starts_with("GET /metrics/json") {
        respond("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        respond("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        respond("text/plain", "OK".to_string())
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        Metrics::add(&metrics.queue_promotions, 9);
        Metrics::incr(&metrics.refunds_failed);

        let output = metrics.to_prometheus();

        assert!(output.contains("mech_arena_queue_promotions_total 9"));
        assert!(output.contains("mech_arena_refunds_failed_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.battles_started);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["battles"]["started"], 1);
        assert_eq!(value["queue"]["promotions"], 0);
    }

    #[test]
    fn test_gauge_decrement_saturates() {
        let metrics = Metrics::new();
        Metrics::decr(&metrics.connections_active);
        assert_eq!(metrics.connections_active.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        assert!(route("GET /metrics/json HTTP/1.1", &metrics).contains("application/json"));
        assert!(route("GET /metrics HTTP/1.1", &metrics).contains("mech_arena_uptime_seconds"));
        assert!(route("GET /health HTTP/1.1", &metrics).ends_with("OK"));
        assert!(route("POST /x HTTP/1.1", &metrics).starts_with("HTTP/1.1 404"));
    }
}
