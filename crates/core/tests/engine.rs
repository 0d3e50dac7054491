//! Engine lifecycle: events in, chain insertion out, clean shutdown.

use istanbul_core::mocks::{genesis, MockBackend, MockRegistry};
use istanbul_core::{Backend, Config, Engine};
use istanbul_types::Proposal;
use std::sync::Arc;
use std::time::Duration;

/// A single-validator committee has a quorum of one: the engine should
/// carry a submitted proposal through all three phases against itself and
/// hand it to the chain.
#[tokio::test]
async fn single_validator_commits_through_the_event_loop() {
    let registry = MockRegistry::new(1);
    let backend = MockBackend::new(Arc::clone(&registry), 0);

    let engine = Engine::new(Config::default(), Arc::clone(&backend) as Arc<dyn Backend>);
    // Loop the node's own broadcasts back into its queue, as a real
    // network layer would.
    backend.set_loopback(engine.event_sender());
    let sender = engine.event_sender();
    let handle = engine.start();

    let proposal = Proposal::new(1, genesis().hash(), 0, b"solo-block".to_vec());
    sender
        .submit_request(proposal.clone())
        .await
        .expect("engine running");

    // Wait for the loop to work through the phases.
    let mut committed = Vec::new();
    for _ in 0..100 {
        committed = backend.committed();
        if !committed.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].proposal, proposal);
    assert_eq!(committed[0].signers.count(), 1);

    handle.stop().await;
}

/// After stop, the event sender reports the core as gone.
#[tokio::test]
async fn stop_closes_the_event_channel() {
    let registry = MockRegistry::new(1);
    let backend = MockBackend::new(Arc::clone(&registry), 0);

    let engine = Engine::new(Config::default(), Arc::clone(&backend) as Arc<dyn Backend>);
    let sender = engine.event_sender();
    let handle = engine.start();
    handle.stop().await;

    let proposal = Proposal::new(1, genesis().hash(), 0, Vec::new());
    assert!(sender.submit_request(proposal).await.is_err());
}