use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use transfer_coordinator::transfer::events::QueuePublisher;
use transfer_coordinator::transfer::mock::{MockDataPlane, MockProtocolGateway};
use transfer_coordinator::transfer::{
    Dispatcher, DispatcherConfig, InMemoryTransferStore, LeaseManager, MessageKind, RetryConfig,
    RetryScheduler, StateMachine, TransferCoordinator, TransferProcessState, TransferRequest,
    TransferStore,
};

fn request(i: usize) -> TransferRequest {
    TransferRequest::new(
        format!("http://provider-{}/v1/protocol", i % 3),
        format!("contract-{}", i),
        "asset-1",
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_worker_wins_a_lease() {
    let store = Arc::new(InMemoryTransferStore::new());
    let coordinator = TransferCoordinator::new(store.clone());
    let p = coordinator.create(request(0)).await.unwrap();

    let mut handles = Vec::new();
    for w in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .acquire(p.id, &format!("worker-{}", w), Duration::from_secs(30))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    // Leasing is not a domain write
    let stored = store.find(p.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
}

/// Several dispatchers race over the same entities: every outbound request
/// goes out once and every transition is published once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_dispatchers_act_once_per_transition() {
    const PROCESSES: usize = 20;
    const DISPATCHERS: usize = 4;

    let store = Arc::new(InMemoryTransferStore::new());
    let coordinator = TransferCoordinator::new(store.clone());
    let gateway = Arc::new(MockProtocolGateway::new());
    let machine = Arc::new(StateMachine::new(
        gateway.clone(),
        Arc::new(MockDataPlane::new()),
    ));
    let events = Arc::new(QueuePublisher::new(1024));

    let mut ids = Vec::new();
    for i in 0..PROCESSES {
        ids.push(coordinator.create(request(i)).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for w in 0..DISPATCHERS {
        let scheduler = RetryScheduler::new(RetryConfig {
            base_delay_ms: 50,
            max_delay_ms: 200,
            max_attempts: 1_000,
            jitter: true,
        });
        let dispatcher = Dispatcher::new(store.clone(), store.clone(), machine.clone(), scheduler)
            .with_worker_id(format!("node-{}", w))
            .with_publisher(events.clone())
            .with_lease_ttl(Duration::from_secs(30))
            .with_config(DispatcherConfig {
                batch_size: 8,
                concurrency: 4,
                ..Default::default()
            });
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                dispatcher.run_once().await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for id in &ids {
        let p = store.find(*id).await.unwrap().unwrap();
        assert_eq!(p.state, TransferProcessState::Requested, "{}", p);
        assert!(p.lease.is_none(), "lease left behind on {}", p.id);
        assert_eq!(gateway.sent_for(*id), vec![MessageKind::Request]);
    }
    assert_eq!(gateway.effect_count(MessageKind::Request), PROCESSES);

    let mut per_process: HashMap<_, Vec<_>> = HashMap::new();
    for event in events.drain() {
        per_process.entry(event.process_id).or_default().push(event);
    }
    assert_eq!(per_process.len(), PROCESSES);
    for events in per_process.values() {
        let path: Vec<_> = events
            .iter()
            .map(|e| (e.previous_state, e.new_state))
            .collect();
        assert_eq!(
            path,
            vec![
                (
                    TransferProcessState::Initial,
                    TransferProcessState::Requesting
                ),
                (
                    TransferProcessState::Requesting,
                    TransferProcessState::Requested
                ),
            ]
        );
        assert!(events[0].version < events[1].version);
    }
}
