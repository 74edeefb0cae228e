mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use support::{
    mock_peer, no_write_deadline, quiet_settings, start, wait_for_clients, SinkMode, WAIT,
};
use tokio_util::sync::CancellationToken;
use vigil_core::types::{PeerId, TaskStatus};
use vigil_hub::{Hub, HubSettings, InboundFrame};
use vigil_protocol::{Envelope, InitialSnapshot, SystemStatus, TaskUpdate};

fn task(id: &str) -> Envelope {
    Envelope::task_update(TaskUpdate::new(id, "note", TaskStatus::Success))
}

#[tokio::test]
async fn both_peers_receive_one_broadcast() {
    let (hub, _run) = start(quiet_settings());
    let (a, mut remote_a) = mock_peer(SinkMode::Healthy);
    let (b, mut remote_b) = mock_peer(SinkMode::Healthy);

    hub.register(a);
    hub.register(b);
    wait_for_clients(&hub, 2).await;

    let envelope = task("t1");
    let expected = serde_json::to_value(&envelope).unwrap();
    assert!(hub.broadcast(envelope));

    for remote in [&mut remote_a, &mut remote_b] {
        let got = remote.next_json().await.expect("envelope delivered");
        assert_eq!(got, expected);
        assert_eq!(got["data"]["task_id"], "t1");
        assert_eq!(got["data"]["status"], "success");
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(remote_a.drain_json().is_empty());
    assert!(remote_b.drain_json().is_empty());
    assert_eq!(hub.client_count(), 2);
}

#[tokio::test]
async fn envelopes_arrive_in_broadcast_order() {
    let (hub, _run) = start(quiet_settings());
    let (peer, mut remote) = mock_peer(SinkMode::Healthy);
    hub.register(peer.with_queue_capacity(32));
    wait_for_clients(&hub, 1).await;

    for i in 0..32 {
        assert!(hub.broadcast(task(&format!("t{i}"))));
    }
    for i in 0..32 {
        let got = remote.next_json().await.expect("envelope delivered");
        assert_eq!(got["data"]["task_id"], format!("t{i}"));
    }
}

#[tokio::test]
async fn capacity_one_peer_is_dropped_on_back_to_back_broadcasts() {
    let (hub, _run) = start(no_write_deadline());
    let (peer, remote) = mock_peer(SinkMode::Stalled);
    hub.register(peer.with_queue_capacity(1));
    wait_for_clients(&hub, 1).await;

    hub.broadcast(task("t1"));
    hub.broadcast(task("t2"));
    hub.broadcast(task("t3"));

    wait_for_clients(&hub, 0).await;
    assert_eq!(hub.client_count(), 0);

    tokio::time::timeout(WAIT, async {
        while !remote.is_torn_down() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("overflowed peer torn down");
}

#[tokio::test]
async fn slow_peer_does_not_affect_others() {
    let (hub, _run) = start(no_write_deadline());
    let (slow, _slow_remote) = mock_peer(SinkMode::Stalled);
    let (fast, mut fast_remote) = mock_peer(SinkMode::Healthy);
    hub.register(slow.with_queue_capacity(1));
    hub.register(fast);
    wait_for_clients(&hub, 2).await;

    for i in 0..5 {
        hub.broadcast(task(&format!("t{i}")));
    }

    wait_for_clients(&hub, 1).await;
    for i in 0..5 {
        let got = fast_remote.next_json().await.expect("fast peer keeps receiving");
        assert_eq!(got["data"]["task_id"], format!("t{i}"));
    }
    let peers = hub.peers().await;
    assert_eq!(peers.len(), 1);
}

#[tokio::test]
async fn stalled_peer_stays_until_its_queue_overflows() {
    let (hub, _run) = start(no_write_deadline());
    let (peer, _remote) = mock_peer(SinkMode::Stalled);
    hub.register(peer.with_queue_capacity(4));
    wait_for_clients(&hub, 1).await;

    // one frame held by the stalled writer, the rest fit in the queue
    for i in 0..3 {
        assert!(hub.broadcast(task(&format!("t{i}"))));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hub.client_count(), 1);

    for i in 3..8 {
        hub.broadcast(task(&format!("t{i}")));
    }
    wait_for_clients(&hub, 0).await;
}

#[tokio::test]
async fn stalled_writer_is_dropped_when_probe_lane_stays_full() {
    let settings = HubSettings {
        probe_interval: Duration::from_millis(100),
        ..no_write_deadline()
    };
    let (hub, _run) = start(settings);
    let (peer, remote) = mock_peer(SinkMode::Stalled);
    hub.register(peer);
    wait_for_clients(&hub, 1).await;

    // tick one's probe blocks the writer, tick two fills the lane, tick three evicts
    wait_for_clients(&hub, 0).await;
    tokio::time::timeout(WAIT, async {
        while !remote.is_torn_down() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stalled peer torn down");
}

#[tokio::test]
async fn unregister_twice_is_same_as_once() {
    let (hub, _run) = start(quiet_settings());
    let (a, remote_a) = mock_peer(SinkMode::Healthy);
    let (b, mut remote_b) = mock_peer(SinkMode::Healthy);
    let id_a = a.id().clone();
    hub.register(a);
    hub.register(b);
    wait_for_clients(&hub, 2).await;

    hub.unregister(&id_a);
    hub.unregister(&id_a);
    hub.unregister(&PeerId::from("never-registered"));
    wait_for_clients(&hub, 1).await;

    hub.broadcast(task("after"));
    let got = remote_b.next_json().await.expect("hub still serving");
    assert_eq!(got["data"]["task_id"], "after");
    assert_eq!(hub.client_count(), 1);
    drop(remote_a);
}

#[tokio::test]
async fn registry_size_tracks_registrations() {
    let (hub, _run) = start(quiet_settings());
    let mut remotes = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..10 {
        let (peer, remote) = mock_peer(SinkMode::Healthy);
        ids.push(peer.id().clone());
        hub.register(peer);
        remotes.push(remote);
    }
    // interleave removals with the registrations still in flight
    for id in ids.iter().take(4) {
        hub.unregister(id);
    }
    hub.unregister(&ids[0]);

    wait_for_clients(&hub, 6).await;
    let listed = hub.peers().await;
    assert_eq!(listed.len(), 6);
    for removed in ids.iter().take(4) {
        assert!(listed.iter().all(|p| &p.id != removed));
    }
}

#[tokio::test]
async fn shutdown_tears_down_every_peer() {
    let (hub, run) = start(quiet_settings());
    let mut remotes = Vec::new();
    for _ in 0..3 {
        let (peer, remote) = mock_peer(SinkMode::Healthy);
        hub.register(peer);
        remotes.push(remote);
    }
    let (stuck, stuck_remote) = mock_peer(SinkMode::Stalled);
    hub.register(stuck);
    remotes.push(stuck_remote);
    wait_for_clients(&hub, 4).await;
    hub.broadcast(task("pending"));

    hub.shutdown();
    tokio::time::timeout(WAIT, run)
        .await
        .expect("hub stops promptly")
        .expect("hub task did not panic");

    assert_eq!(hub.client_count(), 0);
    assert!(!hub.is_running());
    for remote in &remotes {
        assert!(remote.is_torn_down());
    }
    assert!(!hub.broadcast(task("late")));
    assert!(hub.peers().await.is_empty());
}

#[tokio::test]
async fn parent_token_stops_hub() {
    let root = CancellationToken::new();
    let (hub, handle) = Hub::new(quiet_settings(), &root);
    let run = tokio::spawn(hub.run());
    let (peer, remote) = mock_peer(SinkMode::Healthy);
    handle.register(peer);
    wait_for_clients(&handle, 1).await;

    root.cancel();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert!(remote.is_torn_down());
}

#[tokio::test]
async fn failed_probe_write_removes_peer() {
    let settings = HubSettings {
        probe_interval: Duration::from_millis(100),
        ..quiet_settings()
    };
    let (hub, _run) = start(settings);
    let (dead, _dead_remote) = mock_peer(SinkMode::BrokenPings);
    hub.register(dead);
    wait_for_clients(&hub, 1).await;

    // one interval for the tick plus slack for the write attempt
    tokio::time::timeout(Duration::from_millis(400), async {
        let mut rx = hub.watch_clients();
        rx.wait_for(|n| *n == 0).await.unwrap();
    })
    .await
    .expect("peer with broken probe removed within one interval");
}

#[tokio::test]
async fn silent_peer_expires_while_responsive_peer_stays() {
    let settings = HubSettings {
        probe_interval: Duration::from_millis(100),
        pong_timeout: Some(Duration::from_millis(250)),
        ..quiet_settings()
    };
    let (hub, _run) = start(settings);
    let (silent, _silent_remote) = mock_peer(SinkMode::Healthy);
    let (alive, mut alive_remote) = mock_peer(SinkMode::Healthy);
    let alive_id = alive.id().clone();
    hub.register(silent);
    hub.register(alive);
    wait_for_clients(&hub, 2).await;

    let responder = tokio::spawn(async move {
        while let Some(frame) = alive_remote.written.recv().await {
            if frame == vigil_hub::OutboundFrame::Ping {
                alive_remote.send(InboundFrame::Pong);
            }
        }
    });

    wait_for_clients(&hub, 1).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let peers = hub.peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, alive_id);
    assert!(peers[0].last_liveness_at >= peers[0].registered_at);
    responder.abort();
}

#[tokio::test]
async fn peer_close_unregisters_it() {
    let (hub, _run) = start(quiet_settings());
    let (peer, remote) = mock_peer(SinkMode::Healthy);
    hub.register(peer);
    wait_for_clients(&hub, 1).await;

    remote.send(InboundFrame::Data);
    remote.send(InboundFrame::Close);
    wait_for_clients(&hub, 0).await;
}

#[tokio::test]
async fn dropped_connection_unregisters_it() {
    let (hub, _run) = start(quiet_settings());
    let (peer, remote) = mock_peer(SinkMode::Healthy);
    hub.register(peer);
    wait_for_clients(&hub, 1).await;

    drop(remote);
    wait_for_clients(&hub, 0).await;
}

#[tokio::test]
async fn greeting_is_delivered_before_broadcasts() {
    let (hub, _run) = start(quiet_settings());
    let (peer, mut remote) = mock_peer(SinkMode::Healthy);
    hub.register_with_greeting(peer, || Envelope::initial(InitialSnapshot::default()));
    hub.broadcast(task("t1"));

    let first = remote.next_json().await.unwrap();
    assert_eq!(first["type"], "initial");
    assert_eq!(first["data"]["canvases"], json!([]));
    let second = remote.next_json().await.unwrap();
    assert_eq!(second["type"], "task_update");
}

#[tokio::test]
async fn greeting_is_built_when_hub_registers_peer() {
    let (hub, handle) = Hub::new(quiet_settings(), &CancellationToken::new());
    let active = Arc::new(AtomicU32::new(0));
    let (peer, mut remote) = mock_peer(SinkMode::Healthy);

    let seen = Arc::clone(&active);
    handle.register_with_greeting(peer, move || {
        Envelope::initial(InitialSnapshot {
            system: SystemStatus {
                active_tasks: seen.load(Ordering::SeqCst),
                ..Default::default()
            },
            ..Default::default()
        })
    });
    // state changes after the call but before the loop handles it
    active.store(3, Ordering::SeqCst);
    let _run = tokio::spawn(hub.run());

    let first = remote.next_json().await.unwrap();
    assert_eq!(first["type"], "initial");
    assert_eq!(first["data"]["system"]["active_tasks"], 3);
}

#[tokio::test]
async fn send_to_reaches_only_target() {
    let (hub, _run) = start(quiet_settings());
    let (a, mut remote_a) = mock_peer(SinkMode::Healthy);
    let (b, mut remote_b) = mock_peer(SinkMode::Healthy);
    let id_a = a.id().clone();
    hub.register(a);
    hub.register(b);
    wait_for_clients(&hub, 2).await;

    hub.send_to(&id_a, Envelope::error("QUOTA", "too many tabs"));
    let got = remote_a.next_json().await.unwrap();
    assert_eq!(got["data"]["code"], "QUOTA");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(remote_b.drain_json().is_empty());
}

#[tokio::test]
async fn duplicate_identity_replaces_previous_peer() {
    let (hub, _run) = start(quiet_settings());
    let id = PeerId::from("dashboard-1");
    let (first, first_remote) = mock_peer(SinkMode::Healthy);
    let (second, mut second_remote) = mock_peer(SinkMode::Healthy);

    hub.register(first.with_id(id.clone()));
    wait_for_clients(&hub, 1).await;
    hub.register(second.with_id(id.clone()));
    hub.broadcast(task("t1"));

    let got = second_remote.next_json().await.unwrap();
    assert_eq!(got["data"]["task_id"], "t1");
    assert_eq!(hub.client_count(), 1);

    tokio::time::timeout(WAIT, async {
        while !first_remote.is_torn_down() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replaced peer torn down");
    // the old reader must not evict its replacement
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.client_count(), 1);
}

#[tokio::test]
async fn broadcast_sheds_instead_of_blocking() {
    let settings = HubSettings {
        broadcast_buffer: 2,
        ..quiet_settings()
    };
    // never run: nothing drains the inbox
    let (_hub, handle) = Hub::new(settings, &CancellationToken::new());

    assert!(handle.broadcast(task("t1")));
    assert!(handle.broadcast(task("t2")));
    assert!(!handle.broadcast(task("t3")));
}
