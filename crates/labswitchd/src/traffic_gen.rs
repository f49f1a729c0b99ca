//! Synthetic traffic generation.
//!
//! A named pattern selects the mean inter-packet interval and the packet
//! size distribution. One jittered repeating timer drives generation ticks;
//! each tick a random subset of up ports receives one synthetic packet
//! event, committed through the store and published to subscribers.
//! Exactly one generation loop is active at a time: switching patterns
//! cancels the current loop's timer before the new one starts.

use crate::error::SimError;
use crate::events::{Event, EventBroadcaster, EventKind};
use crate::store::{ChangeKind, StateStore};
use chrono::{DateTime, Utc};
use labswitch_types::SwitchStatus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default packet size clamp.
pub const DEFAULT_MIN_SIZE: u32 = 64;
pub const DEFAULT_MAX_SIZE: u32 = 1518;

/// Probability that an up port receives a packet on a given tick.
pub const PORT_PICK_PROBABILITY: f64 = 0.3;

/// Outer cycle and window length of the burst pattern.
const BURST_CYCLE: Duration = Duration::from_secs(10);
const BURST_WINDOW: Duration = Duration::from_secs(1);

/// Synthetic traffic type attached to packet events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficType {
    Tcp,
    Udp,
    Icmp,
    Broadcast,
    Multicast,
}

impl TrafficType {
    const ALL: [TrafficType; 5] = [
        TrafficType::Tcp,
        TrafficType::Udp,
        TrafficType::Icmp,
        TrafficType::Broadcast,
        TrafficType::Multicast,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            TrafficType::Tcp => "tcp",
            TrafficType::Udp => "udp",
            TrafficType::Icmp => "icmp",
            TrafficType::Broadcast => "broadcast",
            TrafficType::Multicast => "multicast",
        }
    }

    fn random<R: Rng>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// Parameters of a custom traffic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomTraffic {
    /// Base inter-packet interval in milliseconds
    pub interval_ms: u64,
    /// Minimum packet size
    pub min_size: u32,
    /// Maximum packet size
    pub max_size: u32,
    /// Optional per-tick packet cap
    pub burst_count: Option<u32>,
}

/// Named traffic load pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficPattern {
    None,
    Low,
    Medium,
    High,
    Burst,
    Custom(CustomTraffic),
}

impl TrafficPattern {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrafficPattern::None => "none",
            TrafficPattern::Low => "low",
            TrafficPattern::Medium => "medium",
            TrafficPattern::High => "high",
            TrafficPattern::Burst => "burst",
            TrafficPattern::Custom(_) => "custom",
        }
    }

    /// Steady-state generation parameters, if the pattern has any.
    ///
    /// `None` for the idle pattern; the burst pattern supplies its window
    /// parameters via [`TrafficPattern::burst_window_params`] instead.
    pub fn params(&self) -> Option<GenParams> {
        match self {
            TrafficPattern::None | TrafficPattern::Burst => None,
            TrafficPattern::Low => Some(GenParams::new(Duration::from_millis(1000), 500.0, 100.0)),
            TrafficPattern::Medium => Some(GenParams::new(Duration::from_millis(100), 1000.0, 200.0)),
            TrafficPattern::High => Some(GenParams::new(Duration::from_millis(10), 1500.0, 500.0)),
            TrafficPattern::Custom(custom) => {
                let mean = (f64::from(custom.min_size) + f64::from(custom.max_size)) / 2.0;
                let std_dev = (f64::from(custom.max_size) - f64::from(custom.min_size)).abs() / 6.0;
                Some(GenParams {
                    interval: Duration::from_millis(custom.interval_ms.max(1)),
                    mean_size: mean,
                    std_dev,
                    min_size: custom.min_size,
                    max_size: custom.max_size,
                    per_tick_cap: custom.burst_count,
                })
            }
        }
    }

    /// High-rate parameters of the burst pattern's one-second window.
    pub fn burst_window_params() -> GenParams {
        GenParams::new(Duration::from_millis(1), 2000.0, 1000.0)
    }
}

impl FromStr for TrafficPattern {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(TrafficPattern::None),
            "low" => Ok(TrafficPattern::Low),
            "medium" => Ok(TrafficPattern::Medium),
            "high" => Ok(TrafficPattern::High),
            "burst" => Ok(TrafficPattern::Burst),
            other => Err(SimError::Validation(format!(
                "invalid traffic pattern: {}",
                other
            ))),
        }
    }
}

/// Resolved generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenParams {
    /// Base tick interval (jittered at runtime)
    pub interval: Duration,
    /// Mean packet size
    pub mean_size: f64,
    /// Packet size standard deviation
    pub std_dev: f64,
    /// Size clamp lower bound
    pub min_size: u32,
    /// Size clamp upper bound
    pub max_size: u32,
    /// Optional per-tick packet cap
    pub per_tick_cap: Option<u32>,
}

impl GenParams {
    fn new(interval: Duration, mean_size: f64, std_dev: f64) -> Self {
        Self {
            interval,
            mean_size,
            std_dev,
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            per_tick_cap: None,
        }
    }
}

struct ActiveLoop {
    pattern: TrafficPattern,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Per-lab synthetic traffic generator.
pub struct TrafficGenerator {
    store: Arc<StateStore>,
    broadcaster: Arc<EventBroadcaster>,
    active: Mutex<ActiveLoop>,
}

impl TrafficGenerator {
    pub fn new(store: Arc<StateStore>, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            active: Mutex::new(ActiveLoop {
                pattern: TrafficPattern::None,
                cancel: CancellationToken::new(),
                handle: None,
            }),
        }
    }

    /// Switches the active pattern.
    ///
    /// The current loop's timer is cancelled before the new loop starts, so
    /// a stale tick can never commit traffic for a superseded pattern.
    pub fn set_pattern(&self, pattern: TrafficPattern) {
        let mut active = self.active.lock().expect("traffic lock poisoned");
        active.cancel.cancel();
        let cancel = CancellationToken::new();

        let handle = match &pattern {
            TrafficPattern::None => None,
            TrafficPattern::Burst => Some(tokio::spawn(Self::run_burst(
                Arc::clone(&self.store),
                Arc::clone(&self.broadcaster),
                cancel.clone(),
            ))),
            other => other.params().map(|params| {
                tokio::spawn(Self::run_steady(
                    Arc::clone(&self.store),
                    Arc::clone(&self.broadcaster),
                    params,
                    cancel.clone(),
                ))
            }),
        };

        info!(pattern = pattern.as_str(), "traffic pattern set");
        active.pattern = pattern;
        active.cancel = cancel;
        active.handle = handle;
    }

    /// Stops generation entirely.
    pub fn stop(&self) {
        self.set_pattern(TrafficPattern::None);
    }

    /// The currently active pattern.
    pub fn pattern(&self) -> TrafficPattern {
        self.active
            .lock()
            .expect("traffic lock poisoned")
            .pattern
            .clone()
    }

    #[cfg(test)]
    fn active_cancel(&self) -> CancellationToken {
        self.active
            .lock()
            .expect("traffic lock poisoned")
            .cancel
            .clone()
    }

    async fn run_steady(
        store: Arc<StateStore>,
        broadcaster: Arc<EventBroadcaster>,
        params: GenParams,
        cancel: CancellationToken,
    ) {
        let mut rng = StdRng::from_entropy();
        debug!(interval_ms = params.interval.as_millis() as u64, "traffic generation started");
        loop {
            let delay = jittered_interval(&mut rng, params.interval);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() {
                break;
            }
            Self::generate_once(&store, &broadcaster, &params, &mut rng, Utc::now());
        }
        debug!("traffic generation stopped");
    }

    async fn run_burst(
        store: Arc<StateStore>,
        broadcaster: Arc<EventBroadcaster>,
        cancel: CancellationToken,
    ) {
        let mut rng = StdRng::from_entropy();
        let params = TrafficPattern::burst_window_params();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(BURST_CYCLE) => {}
            }
            // One second of high-rate generation, then quiet again.
            let window_end = Instant::now() + BURST_WINDOW;
            while Instant::now() < window_end {
                let delay = jittered_interval(&mut rng, params.interval);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if cancel.is_cancelled() {
                    return;
                }
                Self::generate_once(&store, &broadcaster, &params, &mut rng, Utc::now());
            }
        }
        debug!("burst generation stopped");
    }

    /// Runs one generation tick.
    ///
    /// For every online switch with at least one up port, a ~30% random
    /// subset of up ports each receive one synthetic packet, bounded by the
    /// optional per-tick cap. One switch's failure never halts the others.
    /// Returns the number of packets emitted.
    pub fn generate_once<R: Rng>(
        store: &StateStore,
        broadcaster: &EventBroadcaster,
        params: &GenParams,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> u32 {
        let snapshot = store.read();
        let mut emitted = 0u32;

        for (switch_id, switch) in &snapshot.state.switches {
            if switch.status != SwitchStatus::Online {
                continue;
            }
            if let Some(cap) = params.per_tick_cap {
                if emitted >= cap {
                    break;
                }
            }

            let mut packets: Vec<(u8, u64, TrafficType)> = Vec::new();
            for port in switch.up_ports() {
                if let Some(cap) = params.per_tick_cap {
                    if emitted + packets.len() as u32 >= cap {
                        break;
                    }
                }
                if !rng.gen_bool(PORT_PICK_PROBABILITY) {
                    continue;
                }
                let size = sample_packet_size(rng, params);
                packets.push((port.id, size, TrafficType::random(rng)));
            }
            if packets.is_empty() {
                continue;
            }

            let result = store.update(
                ChangeKind::TrafficUpdated {
                    switch_id: switch_id.clone(),
                },
                |state| {
                    let stats = state.traffic.entry(switch_id.clone()).or_default();
                    for (port_id, size, _) in &packets {
                        stats.record_packet(*port_id, now, *size);
                    }
                    Ok(())
                },
            );
            if let Err(e) = result {
                warn!(switch = %switch_id, error = %e, "traffic commit failed");
                continue;
            }

            emitted += packets.len() as u32;
            for (port_id, size, traffic_type) in &packets {
                broadcaster.publish(Event::for_switch(
                    EventKind::TrafficPacket,
                    switch_id.clone(),
                    json!({
                        "portId": port_id,
                        "size": size,
                        "trafficType": traffic_type.as_str(),
                    }),
                ));
            }
        }
        emitted
    }
}

/// Applies +/-10% jitter to the base interval.
fn jittered_interval<R: Rng>(rng: &mut R, base: Duration) -> Duration {
    let factor = 0.9 + rng.gen::<f64>() * 0.2;
    base.mul_f64(factor).max(Duration::from_millis(1))
}

/// Draws a packet size from a normal distribution via the Box-Muller
/// transform, clamped to the pattern's size bounds.
fn sample_packet_size<R: Rng>(rng: &mut R, params: &GenParams) -> u64 {
    let mut u: f64 = 0.0;
    while u <= f64::EPSILON {
        u = rng.gen();
    }
    let mut v: f64 = 0.0;
    while v <= f64::EPSILON {
        v = rng.gen();
    }
    let normal = (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos();
    let size = params.mean_size + params.std_dev * normal;
    (size.max(f64::from(params.min_size)).min(f64::from(params.max_size))).floor() as u64
}
