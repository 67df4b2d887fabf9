//! Convergence checks against simulated neighbor tables.
//!
//! Real-time runs go through `ConvergenceCheck::wait`; the stability
//! scenario steps a mocked clock through `Scheduler::run_pending`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use converge_core::{
    BarrierError, ConditionBarrier, ConvergenceCheck, ConvergenceConfig, ConvergenceError,
    InterfaceState, NeighborSource, NeighborState, PeerRecord, PollingCondition, Scheduler,
    SchedulerError, StabilityCriteria, StabilityProbe,
};
use quanta::{Clock, Instant};

fn peer(router_id: &str, duration: Duration, ifstate: &InterfaceState) -> PeerRecord {
    PeerRecord {
        router_id: router_id.to_string(),
        priority: 1,
        dead_time: Duration::from_secs(35),
        state: NeighborState::Full,
        role: InterfaceState::PointToPoint,
        duration,
        interface: "eth0".to_string(),
        interface_state: ifstate.clone(),
    }
}

/// A node whose adjacencies all came up at one instant.
struct SimNode {
    peers: Vec<&'static str>,
    up_since: Instant,
    ifstate: InterfaceState,
}

/// Neighbor tables that age on the clock they were built with.
struct SimNetwork {
    clock: Clock,
    nodes: Mutex<HashMap<String, SimNode>>,
}

impl SimNetwork {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    fn add_node(&self, name: &str, peers: Vec<&'static str>, ifstate: InterfaceState) {
        let node = SimNode {
            peers,
            up_since: self.clock.now(),
            ifstate,
        };
        self.nodes.lock().unwrap().insert(name.to_string(), node);
    }

    fn set_ifstate(&self, name: &str, ifstate: InterfaceState) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(name) {
            node.ifstate = ifstate;
        }
    }
}

impl NeighborSource for SimNetwork {
    fn neighbors(&self, node: &str) -> anyhow::Result<Vec<PeerRecord>> {
        let nodes = self.nodes.lock().unwrap();
        let sim = nodes
            .get(node)
            .ok_or_else(|| anyhow::anyhow!("vtysh: node {node} is not running"))?;
        let age = self.clock.now().duration_since(sim.up_since);
        Ok(sim
            .peers
            .iter()
            .map(|id| peer(id, age, &sim.ifstate))
            .collect())
    }
}

fn line_topology(clock: Clock) -> Arc<SimNetwork> {
    let net = Arc::new(SimNetwork::new(clock));
    net.add_node("n1", vec!["0.0.0.2"], InterfaceState::PointToPoint);
    net.add_node("n2", vec!["0.0.0.1", "0.0.0.3"], InterfaceState::PointToPoint);
    net.add_node("n3", vec!["0.0.0.2"], InterfaceState::PointToPoint);
    net
}

fn nodes(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// ─── Real-time orchestration ─────────────────────────────────────────────────

#[test]
fn line_topology_converges_after_stable_duration() {
    let net = line_topology(Clock::new());
    let check = ConvergenceCheck::new(
        nodes(&["n1", "n2", "n3"]),
        StabilityCriteria {
            min_peers: 1,
            stable_duration: Duration::from_millis(300),
        },
        Duration::from_millis(50),
    );

    let report = check.wait(net, Duration::from_secs(5)).unwrap();
    assert_eq!(report.nodes, 3);
    assert!(report.elapsed >= Duration::from_millis(250), "{:?}", report.elapsed);
    assert!(report.elapsed < Duration::from_secs(3), "{:?}", report.elapsed);
}

#[test]
fn waiting_interface_reports_not_converged() {
    let net = line_topology(Clock::new());
    net.set_ifstate("n2", InterfaceState::Waiting);
    let check = ConvergenceCheck::new(
        nodes(&["n1", "n2", "n3"]),
        StabilityCriteria {
            min_peers: 1,
            stable_duration: Duration::from_millis(10),
        },
        Duration::from_millis(20),
    );

    let start = Instant::now();
    let err = check.wait(net, Duration::from_millis(400)).unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(400));
    match err {
        ConvergenceError::NotConverged { pending, timeout } => {
            assert_eq!(pending, vec!["n2".to_string()]);
            assert_eq!(timeout, Duration::from_millis(400));
        }
        other => panic!("expected NotConverged, got {other:?}"),
    }
}

#[test]
fn too_few_peers_never_converges() {
    let net = line_topology(Clock::new());
    let check = ConvergenceCheck::new(
        nodes(&["n1", "n2"]),
        StabilityCriteria {
            min_peers: 2,
            stable_duration: Duration::ZERO,
        },
        Duration::from_millis(20),
    );

    let err = check.wait(net, Duration::from_millis(200)).unwrap_err();
    assert!(
        matches!(err, ConvergenceError::NotConverged { ref pending, .. } if pending == &["n1"]),
        "{err:?}"
    );
}

#[test]
fn failing_poll_aborts_instead_of_waiting_out_the_timeout() {
    let net = line_topology(Clock::new());
    // n1 is young, so the waiter's own sweep stops there and the scheduler
    // is the first to query the missing node.
    let check = ConvergenceCheck::new(
        nodes(&["n1", "missing"]),
        StabilityCriteria {
            min_peers: 1,
            stable_duration: Duration::from_secs(60),
        },
        Duration::from_millis(30),
    );

    let start = Instant::now();
    let err = check.wait(net, Duration::from_secs(10)).unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(3));
    match err {
        ConvergenceError::Scheduler(SchedulerError::Callback(source)) => {
            let chain = format!("{source:#}");
            assert!(chain.contains("missing"), "{chain}");
        }
        other => panic!("expected scheduler failure, got {other:?}"),
    }
}

#[test]
fn broken_first_node_fails_the_wait_directly() {
    let net = line_topology(Clock::new());
    let check = ConvergenceCheck::new(
        nodes(&["ghost", "n1"]),
        StabilityCriteria::default(),
        Duration::from_secs(1),
    );

    let err = check.wait(net, Duration::from_secs(10)).unwrap_err();
    assert!(
        matches!(err, ConvergenceError::Barrier(BarrierError::Predicate { ref name, .. }) if name == "ghost"),
        "{err:?}"
    );
}

#[test]
fn check_from_config() {
    let cfg = ConvergenceConfig::from_toml_str(
        r#"
            nodes = ["n1", "n3"]
            stable_duration_secs = 0
            poll_interval_ms = 100
            timeout_secs = 5
        "#,
    )
    .unwrap();
    let check = ConvergenceCheck::from_config(&cfg);
    assert_eq!(check.nodes(), &["n1".to_string(), "n3".to_string()]);

    let report = check.wait(line_topology(Clock::new()), cfg.timeout).unwrap();
    assert_eq!(report.nodes, 2);
}

// ─── Resource release ────────────────────────────────────────────────────────

#[test]
fn source_is_released_after_converged_wait_with_polls_queued() {
    let net = line_topology(Clock::new());
    // Already stable: the waiter's sweep satisfies every node long before
    // the first poll is due.
    let check = ConvergenceCheck::new(
        nodes(&["n1", "n2"]),
        StabilityCriteria {
            min_peers: 1,
            stable_duration: Duration::ZERO,
        },
        Duration::from_secs(30),
    );

    check.wait(net.clone(), Duration::from_secs(5)).unwrap();
    assert_eq!(Arc::strong_count(&net), 1);
}

#[test]
fn source_is_released_after_timeout() {
    let net = line_topology(Clock::new());
    let check = ConvergenceCheck::new(
        nodes(&["n1", "n2"]),
        StabilityCriteria {
            min_peers: 5,
            stable_duration: Duration::ZERO,
        },
        Duration::from_millis(20),
    );

    let err = check.wait(net.clone(), Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, ConvergenceError::NotConverged { .. }), "{err:?}");
    assert_eq!(Arc::strong_count(&net), 1);
}

#[test]
fn source_is_released_after_failing_poll() {
    let net = line_topology(Clock::new());
    let check = ConvergenceCheck::new(
        nodes(&["n1", "missing"]),
        StabilityCriteria {
            min_peers: 1,
            stable_duration: Duration::from_secs(60),
        },
        Duration::from_millis(20),
    );

    check.wait(net.clone(), Duration::from_secs(10)).unwrap_err();
    assert_eq!(Arc::strong_count(&net), 1);
}

#[test]
fn unbounded_timeout_is_accepted() {
    let net = line_topology(Clock::new());
    let check = ConvergenceCheck::new(
        nodes(&["n1", "n3"]),
        StabilityCriteria {
            min_peers: 1,
            stable_duration: Duration::ZERO,
        },
        Duration::from_millis(50),
    );

    let report = check.wait(net, Duration::from_secs(u64::MAX)).unwrap();
    assert_eq!(report.nodes, 2);
}

// ─── Deterministic stability scenario ────────────────────────────────────────

#[test]
fn polling_condition_turns_true_once_adjacency_ages_past_stable_duration() {
    let (clock, mock) = Clock::mock();
    let scheduler = Scheduler::with_clock(clock.clone());
    let barrier = Arc::new(ConditionBarrier::new());
    let net = Arc::new(SimNetwork::new(clock));
    net.add_node("n1", vec!["0.0.0.2"], InterfaceState::Designated);

    let probe = StabilityProbe::new(
        net.clone(),
        "n1",
        StabilityCriteria {
            min_peers: 1,
            stable_duration: Duration::from_secs(10),
        },
    );
    let cond =
        PollingCondition::start("n1", probe, Duration::from_secs(3), &barrier, &scheduler).unwrap();

    // Polls at 3s, 6s, 9s see a young adjacency.
    for _ in 0..3 {
        mock.increment(Duration::from_secs(3));
        assert_eq!(scheduler.run_pending().unwrap(), 1);
        assert!(!cond.last_sample());
        assert!(!barrier.is_complete());
    }

    // Old enough at 12s, but the interface went back to Waiting.
    net.set_ifstate("n1", InterfaceState::Waiting);
    mock.increment(Duration::from_secs(3));
    scheduler.run_pending().unwrap();
    assert!(!barrier.is_complete());

    net.set_ifstate("n1", InterfaceState::Designated);
    mock.increment(Duration::from_secs(3));
    scheduler.run_pending().unwrap();
    assert!(cond.last_sample());
    assert!(barrier.is_complete());
    assert_eq!(scheduler.pending_events(), 0);
}
