use std::sync::Arc;
use std::time::Duration;

use quorum_calc::config::Config;
use quorum_calc::network::{LocalTransport, Transport};
use quorum_calc::raft::{ElectionOutcome, HeartbeatOutcome, NodeRole, NodeStatus, TickAction};
use quorum_calc::CalculatorNode;
use tokio::time::{sleep, Instant};

fn addr(id: u64) -> String {
    format!("127.0.0.1:{}", 8000 + id)
}

async fn cluster(
    size: u64,
    tweak: impl Fn(&mut Config),
) -> (Arc<LocalTransport>, Vec<Arc<CalculatorNode>>) {
    let transport = Arc::new(LocalTransport::new());
    let shared: Arc<dyn Transport> = transport.clone();
    let mut nodes = Vec::new();
    for id in 1..=size {
        let mut config = Config {
            node_id: id,
            cluster_size: size,
            ..Config::default()
        };
        tweak(&mut config);
        let node = Arc::new(CalculatorNode::new(&config, Arc::clone(&shared)).expect("node"));
        transport.register(&node).await;
        nodes.push(node);
    }
    (transport, nodes)
}

async fn statuses(nodes: &[Arc<CalculatorNode>]) -> Vec<NodeStatus> {
    let mut out = Vec::new();
    for node in nodes {
        out.push(node.status().await);
    }
    out
}

#[tokio::test]
async fn three_node_cluster_elects_one_leader() {
    let (_transport, nodes) = cluster(3, |_| {}).await;

    let outcome = nodes[0].raft().start_election().await;
    assert_eq!(outcome, ElectionOutcome::Won { votes: 3 });

    let all = statuses(&nodes).await;
    assert_eq!(all[0].role, NodeRole::Leader);
    for follower in &all[1..] {
        assert_eq!(follower.role, NodeRole::Follower);
        assert_eq!(follower.term, 1);
        assert_eq!(follower.voted_for, Some(1));
        assert_eq!(follower.leader_id, Some(1));
        assert_eq!(follower.leader_address.as_deref(), Some(addr(1).as_str()));
    }
}

#[tokio::test]
async fn rival_candidate_in_same_term_is_refused() {
    let (_transport, nodes) = cluster(3, |_| {}).await;

    // Node 3 times out first and votes for itself in term 1.
    let round = nodes[2].raft().node.lock().await.begin_election();
    assert_eq!(round.term, 1);

    // Node 2 runs for the same term: node 1 grants, node 3 refuses.
    let outcome = nodes[1].raft().start_election().await;
    assert_eq!(outcome, ElectionOutcome::Won { votes: 2 });

    let all = statuses(&nodes).await;
    assert_eq!(all[1].role, NodeRole::Leader);
    assert_eq!(all[2].voted_for, Some(3));
    assert_eq!(all[2].role, NodeRole::Follower);
    assert_eq!(all[2].leader_id, Some(2));
}

#[tokio::test]
async fn newer_term_replaces_the_leader() {
    let (_transport, nodes) = cluster(3, |_| {}).await;
    assert!(matches!(
        nodes[0].raft().start_election().await,
        ElectionOutcome::Won { .. }
    ));

    let outcome = nodes[1].raft().start_election().await;
    assert_eq!(outcome, ElectionOutcome::Won { votes: 3 });

    let all = statuses(&nodes).await;
    assert_eq!(all[0].role, NodeRole::Follower);
    assert_eq!(all[0].term, 2);
    assert_eq!(all[0].leader_id, Some(2));
    assert_eq!(all[2].leader_id, Some(2));
}

#[tokio::test]
async fn followers_elect_new_leader_after_leader_failure() {
    let (transport, nodes) = cluster(3, |_| {}).await;
    assert!(matches!(
        nodes[0].raft().start_election().await,
        ElectionOutcome::Won { .. }
    ));

    transport.disconnect(&addr(1)).await;

    // The announcement heartbeat counts for the first tick.
    assert_eq!(
        nodes[1].raft().node.lock().await.on_tick(),
        TickAction::LivenessConfirmed
    );
    nodes[1].raft().tick().await;

    let all = statuses(&nodes).await;
    assert_eq!(all[1].role, NodeRole::Leader);
    assert_eq!(all[1].term, 2);
    assert_eq!(all[2].leader_id, Some(2));
    assert_eq!(all[2].term, 2);

    // The old leader still believes in term 1 until it hears back.
    assert_eq!(all[0].role, NodeRole::Leader);
    transport.reconnect(&addr(1)).await;
    let outcome = nodes[0]
        .raft()
        .broadcast_heartbeats()
        .await
        .expect("still leader when the round starts");
    assert_eq!(outcome, HeartbeatOutcome::SteppedDown { term: 2 });

    let old = nodes[0].status().await;
    assert_eq!(old.role, NodeRole::Follower);
    assert_eq!(old.term, 2);
}

#[tokio::test]
async fn silent_members_are_dropped_and_view_is_pushed() {
    let (transport, nodes) = cluster(3, |c| c.update_system = true).await;
    assert!(matches!(
        nodes[0].raft().start_election().await,
        ElectionOutcome::Won { .. }
    ));

    transport.disconnect(&addr(3)).await;
    let outcome = nodes[0]
        .raft()
        .broadcast_heartbeats()
        .await
        .expect("leader");
    match outcome {
        HeartbeatOutcome::Reconfigured { view, dropped } => {
            assert_eq!(dropped, vec![3]);
            assert_eq!(view.ids(), vec![1, 2]);
        }
        other => panic!("expected reconfiguration, got {other:?}"),
    }

    for node in &nodes[..2] {
        let view = node.status().await.cluster;
        assert_eq!(view.member_count(), 2);
        assert_eq!(view.ids(), vec![1, 2]);
    }
    // The dropped node never heard about it.
    assert_eq!(nodes[2].status().await.cluster.member_count(), 3);

    // With two members left the leader still holds quorum on its own follower.
    let outcome = nodes[0].raft().broadcast_heartbeats().await.expect("leader");
    assert_eq!(outcome, HeartbeatOutcome::AllFollowing);
}

#[tokio::test]
async fn leader_without_quorum_steps_down() {
    let (transport, nodes) = cluster(3, |_| {}).await;
    assert!(matches!(
        nodes[0].raft().start_election().await,
        ElectionOutcome::Won { .. }
    ));

    transport.disconnect(&addr(2)).await;
    let outcome = nodes[0].raft().broadcast_heartbeats().await.expect("leader");
    assert!(
        matches!(outcome, HeartbeatOutcome::Degraded { ref missing, .. } if missing == &vec![2]),
        "{outcome:?}"
    );
    assert_eq!(nodes[0].status().await.cluster.member_count(), 3);

    transport.disconnect(&addr(3)).await;
    let outcome = nodes[0].raft().broadcast_heartbeats().await.expect("leader");
    assert_eq!(outcome, HeartbeatOutcome::LostQuorum { acks: vec![] });

    let status = nodes[0].status().await;
    assert_eq!(status.role, NodeRole::Follower);
    assert_eq!(status.leader_id, None);
    assert!(nodes[0].raft().broadcast_heartbeats().await.is_err());
}

#[tokio::test]
async fn isolated_candidate_loses() {
    let (transport, nodes) = cluster(3, |_| {}).await;
    transport.disconnect(&addr(2)).await;
    transport.disconnect(&addr(3)).await;

    let outcome = nodes[0].raft().start_election().await;
    assert_eq!(outcome, ElectionOutcome::Lost { votes: 1 });
    let status = nodes[0].status().await;
    assert_eq!(status.role, NodeRole::Follower);
    assert_eq!(status.term, 1);
}

#[tokio::test]
async fn slow_heartbeat_rounds_do_not_trigger_elections() {
    let (transport, nodes) = cluster(3, |c| {
        c.tick_interval_ms = 100;
        c.election_jitter_ms = 0;
        c.rpc_timeout_ms = 60;
    })
    .await;
    assert!(matches!(
        nodes[0].raft().start_election().await,
        ElectionOutcome::Won { .. }
    ));

    // Every heartbeat round now waits out the full deadline on node 3.
    transport.silence(&addr(3)).await;
    let timers = vec![nodes[0].start(), nodes[1].start()];
    sleep(Duration::from_millis(1500)).await;
    for timer in timers {
        timer.abort();
    }

    let all = statuses(&nodes).await;
    assert_eq!(all[0].role, NodeRole::Leader);
    assert_eq!(all[0].term, 1);
    assert_eq!(all[1].role, NodeRole::Follower);
    assert_eq!(all[1].term, 1, "follower started an election");
    assert_eq!(all[1].leader_id, Some(1));
}

#[tokio::test]
async fn timers_converge_on_a_single_leader() {
    let (_transport, nodes) = cluster(3, |c| {
        c.tick_interval_ms = 40;
        c.election_jitter_ms = 120;
    })
    .await;
    let timers: Vec<_> = nodes.iter().map(|n| n.start()).collect();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut settled = None;
    while Instant::now() < deadline {
        sleep(Duration::from_millis(50)).await;
        let all = statuses(&nodes).await;
        let leaders: Vec<&NodeStatus> =
            all.iter().filter(|s| s.role == NodeRole::Leader).collect();
        if leaders.len() == 1 {
            let leader = leaders[0];
            let followed = all
                .iter()
                .filter(|s| s.id != leader.id)
                .all(|s| s.leader_id == Some(leader.id) && s.term == leader.term);
            if followed {
                settled = Some(leader.id);
                break;
            }
        }
    }

    for timer in timers {
        timer.abort();
    }
    assert!(settled.is_some(), "no stable leader within the deadline");
}
