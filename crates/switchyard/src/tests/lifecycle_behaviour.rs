//! Restart and drain behaviour of a running generation.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tokio::sync::mpsc;

use switchyard_config::ListenerKind;
use switchyard_wire::{Request, Version};

use crate::process::{Lifecycle, LifecycleSignal, LifecycleState};

use super::support::{
    FramedPeer, HealthEvent, RecordingHealthReporter, RecordingRestarter, registry, service, start,
};

struct Generation {
    lifecycle: Lifecycle,
    reporter: Arc<RecordingHealthReporter>,
}

fn generation(drain_timeout: Duration) -> Generation {
    let service = service(registry());
    let tcp = start(ListenerKind::Tcp, "edge", Arc::clone(&service)).expect("tcp starts");
    let http = start(ListenerKind::Http, "web", service).expect("http starts");
    let reporter = Arc::new(RecordingHealthReporter::default());
    let lifecycle = Lifecycle::new(vec![tcp, http], drain_timeout, reporter.clone());
    Generation {
        lifecycle,
        reporter,
    }
}

#[fixture]
fn budget() -> Duration {
    Duration::from_secs(2)
}

#[rstest]
#[tokio::test]
async fn restart_hands_every_listener_to_the_successor(budget: Duration) {
    let Generation {
        lifecycle,
        reporter,
    } = generation(budget);
    let expected: Vec<(String, i32)> = lifecycle
        .instances()
        .iter()
        .map(|instance| {
            let fd: BorrowedFd<'_> = instance.handoff_fd();
            (instance.name().to_owned(), fd.as_raw_fd())
        })
        .collect();
    let mut state = lifecycle.subscribe();
    let restarter = RecordingRestarter::default();

    let (signals, receiver) = mpsc::channel(4);
    signals
        .send(LifecycleSignal::Restart)
        .await
        .expect("queue restart");
    signals
        .send(LifecycleSignal::Shutdown)
        .await
        .expect("queue shutdown");

    let drained = lifecycle.run(receiver, &restarter).await;

    assert!(drained);
    let calls = restarter.calls.lock().expect("restarter mutex poisoned");
    assert_eq!(calls.as_slice(), &[expected]);
    // once before the restart and once before draining
    assert_eq!(restarter.reaps.load(Ordering::SeqCst), 2);
    assert_eq!(*state.borrow_and_update(), LifecycleState::Exited);
    assert_eq!(
        reporter.events(),
        vec![
            HealthEvent::RestartSpawned(4242),
            HealthEvent::DrainStarted,
            HealthEvent::DrainFinished(true),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn failed_restarts_keep_the_generation_running(budget: Duration) {
    let Generation {
        mut lifecycle,
        reporter,
    } = generation(budget);
    let restarter = RecordingRestarter {
        fail: true,
        ..RecordingRestarter::default()
    };

    let (signals, mut receiver) = mpsc::channel(4);
    signals
        .send(LifecycleSignal::Restart)
        .await
        .expect("queue restart");
    drop(signals);
    lifecycle
        .serve_until_shutdown(&mut receiver, &restarter)
        .await;

    assert_eq!(lifecycle.state(), LifecycleState::Running);
    assert!(matches!(
        reporter.events().as_slice(),
        [HealthEvent::RestartFailed(message)] if message.contains("restarts disabled")
    ));

    let mut peer = FramedPeer::connect(lifecycle.instances()[0].local_addr()).await;
    let response = peer.round_trip(&Request::new(Version::V4, "sys.ping")).await;
    assert_eq!(response.result_code, 0);
    drop(peer);

    assert!(lifecycle.drain().await);
    assert_eq!(lifecycle.state(), LifecycleState::Exited);
}

#[rstest]
#[tokio::test]
async fn drain_waits_for_in_flight_requests(budget: Duration) {
    let Generation {
        mut lifecycle,
        reporter,
    } = generation(budget);
    let mut peer = FramedPeer::connect(lifecycle.instances()[0].local_addr()).await;
    peer.send(&Request::new(Version::V4, "test.slow").with_trace_id("slow"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(lifecycle.in_flight() >= 1);

    let (drained, response) = tokio::join!(lifecycle.drain(), peer.next_response());

    assert!(drained);
    assert_eq!(response.trace_id.as_ref(), b"slow");
    let body: serde_json::Value = serde_json::from_slice(&response.body).expect("json body");
    assert_eq!(body, json!({"slept": true}));
    assert_eq!(lifecycle.in_flight(), 0);
    assert!(reporter.events().contains(&HealthEvent::DrainFinished(true)));
}

#[rstest]
#[tokio::test]
async fn drain_gives_up_after_the_budget() {
    let Generation {
        mut lifecycle,
        reporter,
    } = generation(Duration::from_millis(50));
    let mut peer = FramedPeer::connect(lifecycle.instances()[0].local_addr()).await;
    peer.send(&Request::new(Version::V4, "test.slow")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!lifecycle.drain().await);
    assert_eq!(lifecycle.state(), LifecycleState::Exited);
    assert_eq!(
        reporter.events().last(),
        Some(&HealthEvent::DrainFinished(false))
    );
}
