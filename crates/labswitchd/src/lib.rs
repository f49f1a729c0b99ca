//! # labswitchd - managed switch simulator
//!
//! Simulates the dynamic runtime behavior of a managed network switch for a
//! virtual lab: port link-state changes, VLAN membership, simplified
//! Spanning-Tree convergence, and synthetic traffic load, so operator
//! tooling can be exercised against realistic time-varying device state
//! without hardware.
//!
//! ## Architecture
//!
//! - [`StateStore`]: authoritative in-memory model with serialized updates,
//!   monotonic revisions, and debounced durable persistence
//! - [`StpSimulator`]: per-switch/port Spanning-Tree state machine driven by
//!   an explicit deadline scheduler
//! - [`TrafficGenerator`]: statistically distributed synthetic load with
//!   rolling rate metrics
//! - [`FlowAggregator`]: decoded NetFlow-boundary records folded into port
//!   counters
//! - [`EventBroadcaster`]: best-effort fan-out keyed by switch identity
//!
//! Request handlers and protocol listeners read and write exclusively
//! through the store; the simulators run as independent scheduled tasks
//! committing through the same serialized update path.

pub mod config;
pub mod error;
pub mod events;
pub mod flow_agg;
pub mod ops;
pub mod persistence;
pub mod store;
pub mod stp_sim;
pub mod traffic_gen;

pub use config::SimdConfig;
pub use error::{Result, SimError};
pub use events::{Event, EventBroadcaster, EventKind};
pub use flow_agg::{FlowAggregator, FlowRecord};
pub use ops::{SwitchPatch, SwitchSpec, SwitchView, VlanPatch};
pub use store::{ChangeKind, NetworkState, Snapshot, StateStore, StoreEvent};
pub use stp_sim::StpSimulator;
pub use traffic_gen::{CustomTraffic, TrafficGenerator, TrafficPattern};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The assembled simulator: store, schedulers, and fan-out wired together.
pub struct Simulator {
    config: SimdConfig,
    store: Arc<StateStore>,
    broadcaster: Arc<EventBroadcaster>,
    stp: Arc<StpSimulator>,
    traffic: Arc<TrafficGenerator>,
    flows: Arc<FlowAggregator>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl Simulator {
    /// Loads the durable snapshot (or starts empty) and wires the
    /// components together. Store listeners run in registration order:
    /// the event broadcaster first, then the Spanning-Tree simulator.
    pub async fn new(config: SimdConfig) -> Result<Self> {
        config.validate()?;
        let initial = persistence::load_or_default(&config.data_file).await?;
        let store = Arc::new(StateStore::new(initial));
        let broadcaster = Arc::new(EventBroadcaster::new());

        let stp = Arc::new(StpSimulator::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            config.forward_delay(),
            config.topology_change_window(),
        ));
        // Subscribers see the committed change before any derived STP
        // recompute lands.
        {
            let broadcaster = Arc::clone(&broadcaster);
            store.subscribe_changes(move |event| {
                if let Some(event) = Event::from_change(event) {
                    broadcaster.publish(event);
                }
            });
        }
        {
            let stp = Arc::clone(&stp);
            store.subscribe_changes(move |event| stp.handle_change(event, Instant::now()));
        }

        let traffic = Arc::new(TrafficGenerator::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
        ));
        let flows = Arc::new(FlowAggregator::new(Arc::clone(&store)));

        Ok(Self {
            config,
            store,
            broadcaster,
            stp,
            traffic,
            flows,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            started_at: Instant::now(),
        })
    }

    /// Spawns the background tasks and activates the default traffic
    /// pattern.
    pub fn start(&mut self) -> Result<()> {
        let pattern: TrafficPattern = self.config.default_pattern.parse()?;

        self.stp.initialize(Instant::now());

        self.tasks.push(persistence::spawn_saver(
            Arc::clone(&self.store),
            self.config.data_file.clone(),
            self.config.autosave_interval(),
            self.config.save_debounce(),
            self.cancel.child_token(),
        ));
        self.tasks.push(Arc::clone(&self.stp).run(
            self.config.stp_tick(),
            self.config.hello_time(),
            self.cancel.child_token(),
        ));
        self.traffic.set_pattern(pattern);

        info!("simulator started");
        Ok(())
    }

    /// Stops all subsystems: the traffic loop and every scheduled task are
    /// cancelled before the final state save completes.
    pub async fn shutdown(mut self) {
        self.traffic.stop();
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("simulator stopped");
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn stp(&self) -> &Arc<StpSimulator> {
        &self.stp
    }

    pub fn traffic(&self) -> &Arc<TrafficGenerator> {
        &self.traffic
    }

    pub fn flows(&self) -> &Arc<FlowAggregator> {
        &self.flows
    }

    /// Daemon uptime, exposed to the SNMP boundary.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
