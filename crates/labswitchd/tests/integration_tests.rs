//! End-to-end tests for the assembled simulator.

use labswitchd::ops::{SwitchPatch, SwitchSpec};
use labswitchd::store::{ChangeKind, NetworkState, StateStore};
use labswitchd::traffic_gen::{TrafficGenerator, TrafficPattern};
use labswitchd::{
    EventBroadcaster, EventKind, FlowAggregator, FlowRecord, SimdConfig, Simulator, StpSimulator,
};
use labswitch_types::{LinkStatus, PortPatch, PortSpeed, StpPortState, VlanId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_config(dir: &tempfile::TempDir) -> SimdConfig {
    SimdConfig {
        data_file: dir.path().join("state.json"),
        default_pattern: "none".to_string(),
        ..SimdConfig::default()
    }
}

async fn simulator(dir: &tempfile::TempDir) -> Simulator {
    let sim = Simulator::new(test_config(dir)).await.unwrap();
    sim.store()
        .create_switch(SwitchSpec {
            id: "SW001".to_string(),
            ..SwitchSpec::default()
        })
        .unwrap();
    sim
}

#[tokio::test]
async fn revision_strictly_increases_under_concurrent_updates() {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulator(&dir).await;
    let store = Arc::clone(sim.store());

    let mut handles = Vec::new();
    for worker in 0..4u8 {
        let store = Arc::clone(&store);
        handles.push(tokio::task::spawn_blocking(move || {
            let mut seen = store.read().revision;
            for i in 0..50u8 {
                let port = worker * 10 + (i % 10) + 1;
                store
                    .update_port("SW001", port, &PortPatch::link(LinkStatus::Up))
                    .unwrap();
                let revision = store.read().revision;
                assert!(revision > seen, "revision went backwards");
                seen = revision;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn vlan_delete_reassigns_members_and_default_is_permanent() {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulator(&dir).await;
    let store = sim.store();

    store.create_vlan("SW001", 100, "servers").unwrap();
    let v100 = VlanId::new(100).unwrap();
    store
        .update_port(
            "SW001",
            7,
            &PortPatch {
                untagged_vlan: Some(v100),
                tagged_vlans: Some([v100].into_iter().collect()),
                ..PortPatch::default()
            },
        )
        .unwrap();

    store.delete_vlan("SW001", v100).unwrap();
    let view = store.get_switch_view("SW001").unwrap();
    let port = view.switch.port(7).unwrap();
    assert_eq!(port.untagged_vlan, VlanId::DEFAULT);
    assert!(port.tagged_vlans.is_empty());

    assert!(store.delete_vlan("SW001", VlanId::DEFAULT).is_err());
}

#[tokio::test]
async fn link_down_reflects_disabled_within_one_update() {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulator(&dir).await;
    let store = sim.store();

    // From disabled, through a mid-progression state, and from forwarding:
    // a link-down lands in Disabled with no tick in between.
    store
        .update_port("SW001", 5, &PortPatch::link(LinkStatus::Up))
        .unwrap();
    let view = store.get_switch_view("SW001").unwrap();
    assert_eq!(
        view.stp.unwrap().ports[&5].state,
        StpPortState::Blocking,
        "link-up enters the progression at blocking"
    );

    store
        .update_port("SW001", 5, &PortPatch::link(LinkStatus::Down))
        .unwrap();
    let view = store.get_switch_view("SW001").unwrap();
    assert_eq!(view.stp.unwrap().ports[&5].state, StpPortState::Disabled);
}

#[tokio::test]
async fn link_up_walks_exactly_two_half_intervals_to_forwarding() {
    // Drive the scheduler directly with synthetic instants.
    let store = Arc::new(StateStore::new(NetworkState::default()));
    let broadcaster = Arc::new(EventBroadcaster::new());
    let stp = Arc::new(StpSimulator::new(
        Arc::clone(&store),
        Arc::clone(&broadcaster),
        Duration::from_secs(15),
        chrono::Duration::seconds(30),
    ));
    store
        .create_switch(SwitchSpec {
            id: "SW001".to_string(),
            ..SwitchSpec::default()
        })
        .unwrap();

    let base = Instant::now();
    let half = Duration::from_millis(7_500);
    stp.initialize(base);

    store
        .update_port("SW001", 5, &PortPatch::link(LinkStatus::Up))
        .unwrap();
    stp.handle_change(
        &labswitchd::StoreEvent {
            revision: 0,
            kind: ChangeKind::PortUpdated {
                switch_id: "SW001".to_string(),
                port_id: 5,
            },
        },
        base,
    );

    let state_of = |store: &StateStore| store.read().state.stp["SW001"].ports[&5].state;

    assert_eq!(state_of(&store), StpPortState::Blocking);
    stp.tick(base, chrono::Utc::now());
    assert_eq!(state_of(&store), StpPortState::Listening);
    stp.tick(base + half, chrono::Utc::now());
    assert_eq!(state_of(&store), StpPortState::Learning);
    stp.tick(base + half + half, chrono::Utc::now());
    assert_eq!(state_of(&store), StpPortState::Forwarding);

    // Reaching forwarding raised the topology-change flag.
    assert!(store.read().state.stp["SW001"].topology_change);
}

#[tokio::test]
async fn path_cost_tracks_speed_changes() {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulator(&dir).await;
    let store = sim.store();

    let view = store.get_switch_view("SW001").unwrap();
    assert_eq!(view.stp.unwrap().ports[&5].path_cost, 4);

    store
        .update_port("SW001", 5, &PortPatch::speed(PortSpeed::G10))
        .unwrap();
    let view = store.get_switch_view("SW001").unwrap();
    assert_eq!(view.stp.unwrap().ports[&5].path_cost, 2);
}

#[tokio::test]
async fn high_pattern_outpaces_low_on_the_same_ports() {
    let rate_after = |pattern: TrafficPattern| {
        let dir = tempfile::tempdir().unwrap();
        async move {
            let sim = simulator(&dir).await;
            let store = sim.store();
            for port in 1..=8 {
                store
                    .update_port("SW001", port, &PortPatch::link(LinkStatus::Up))
                    .unwrap();
            }
            let params = pattern.params().unwrap();
            let mut rng = StdRng::seed_from_u64(1);
            let mut now = chrono::Utc::now();
            for _ in 0..50 {
                TrafficGenerator::generate_once(store, sim.broadcaster(), &params, &mut rng, now);
                now += chrono::Duration::from_std(params.interval).unwrap();
            }
            store.get_switch_view("SW001").unwrap().traffic.unwrap().packet_rate
        }
    };

    let high = rate_after(TrafficPattern::High).await;
    let low = rate_after(TrafficPattern::Low).await;
    assert!(
        high > low,
        "high pattern rate {} should exceed low pattern rate {}",
        high,
        low
    );
}

#[tokio::test]
async fn unresolved_flow_records_leave_counters_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulator(&dir).await;
    let flows: &Arc<FlowAggregator> = sim.flows();

    let before = sim.store().get_switch_view("SW001").unwrap().traffic.unwrap();

    flows
        .ingest(&FlowRecord {
            src_addr: "10.1.1.1".parse().unwrap(),
            dst_addr: "10.1.1.2".parse().unwrap(),
            src_port: 40000,
            dst_port: 53,
            protocol: 17,
            bytes: 1200,
            packets: 3,
            ingress_port: Some(199),
            egress_port: None,
        })
        .unwrap();

    assert_eq!(flows.unresolved(), 1);
    let after = sim.store().get_switch_view("SW001").unwrap().traffic.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn update_port_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulator(&dir).await;
    let store = sim.store();

    let patch = PortPatch {
        status: Some(LinkStatus::Up),
        poe: Some(true),
        speed: Some(PortSpeed::M100),
        ..PortPatch::default()
    };
    let first = store.update_port("SW001", 9, &patch).unwrap();
    let second = store.update_port("SW001", 9, &patch).unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.speed, second.speed);
    assert_eq!(first.poe, second.poe);
    assert_eq!(first.untagged_vlan, second.untagged_vlan);
    assert_eq!(first.tagged_vlans, second.tagged_vlans);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut sim = simulator(&dir).await;
        sim.store().create_vlan("SW001", 30, "lab-data").unwrap();
        sim.store()
            .update_port("SW001", 3, &PortPatch::link(LinkStatus::Up))
            .unwrap();
        sim.start().unwrap();
        sim.shutdown().await;
    }

    let sim = Simulator::new(test_config(&dir)).await.unwrap();
    let view = sim.store().get_switch_view("SW001").unwrap();
    assert!(view.switch.has_vlan(VlanId::new(30).unwrap()));
    assert_eq!(view.switch.port(3).unwrap().status, LinkStatus::Up);
    assert!(view.stp.is_some());
}

#[tokio::test]
async fn hello_timer_emits_bpdu_notifications() {
    let dir = tempfile::tempdir().unwrap();
    let sim = simulator(&dir).await;
    sim.stp().initialize(Instant::now());

    let mut events = sim.broadcaster().subscribe("SW001");
    sim.stp().emit_hellos();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::StpBpduSent);
    assert!(event.payload["rootBridgeId"].is_string());
    assert!(event.payload["rootPathCost"].is_number());
}

#[tokio::test]
async fn switch_lifecycle_events_reach_global_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Simulator::new(test_config(&dir)).await.unwrap();
    let mut all = sim.broadcaster().subscribe_all();

    sim.store()
        .create_switch(SwitchSpec {
            id: "SW001".to_string(),
            ..SwitchSpec::default()
        })
        .unwrap();

    // First store commit is the creation; derived STP commits follow.
    let event = all.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::SwitchCreated);
    assert_eq!(event.switch_id.as_deref(), Some("SW001"));

    sim.store()
        .update_switch(
            "SW001",
            &SwitchPatch {
                status: Some(labswitch_types::SwitchStatus::Maintenance),
                ..SwitchPatch::default()
            },
        )
        .unwrap();
    sim.store().delete_switch("SW001").unwrap();

    let kinds: Vec<EventKind> = std::iter::from_fn(|| all.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&EventKind::SwitchUpdated));
    assert!(kinds.contains(&EventKind::SwitchDeleted));
}
