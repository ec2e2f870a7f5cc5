//! Unit tests for the round driver
//!
//! Two local sessions of the simulated engine talk over an in-memory relay;
//! the relay and engine wrappers from `support` make replays and silent
//! counterparts observable.

use crate::support::{EchoRelay, TrackedEngine, fast_config};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;
use vault_tss_core::{
    DriverState, EncryptedTransport, EncryptionKey, Error, KeyType, MemoryRelay, PartyId,
    ProtocolEngine, ProtocolMessage, Relay, RoundDriver, SessionKind, SimulatedEngine,
    engine::SessionGuard,
    transport::{body_hash, frame},
};

fn parties() -> Vec<PartyId> {
    vec!["a".to_string(), "b".to_string()]
}

fn driver(relay: Arc<dyn Relay>, key: &EncryptionKey, party: &str) -> RoundDriver {
    RoundDriver::new(
        relay,
        EncryptedTransport::new(key).unwrap(),
        "session",
        party,
        fast_config(),
    )
}

// ============================================================================
// Dedup
// ============================================================================

#[tokio::test]
async fn test_replayed_messages_reach_engine_once() {
    let relay = Arc::new(EchoRelay {
        inner: MemoryRelay::new(),
    });
    let (engine, applied) = TrackedEngine::new(Arc::new(SimulatedEngine::new(KeyType::Ecdsa)));
    let setup = engine.keygen_setup(2, &parties(), None).unwrap();
    let key = EncryptionKey::generate();

    let sa = SessionGuard::create(&engine, SessionKind::Keygen, &setup, "a", None).unwrap();
    let sb = SessionGuard::create(&engine, SessionKind::Keygen, &setup, "b", None).unwrap();
    let mut da = driver(relay.clone(), &key, "a");
    let mut db = driver(relay.clone(), &key, "b");
    let (ra, rb) = tokio::join!(da.run(sa), db.run(sb));
    assert!(ra.is_ok());
    assert!(rb.is_ok());

    // Two rounds with one peer: two unique messages per party
    assert_eq!(applied.load(Ordering::SeqCst), 4);
    for stats in [da.stats(), db.stats()] {
        assert_eq!(stats.applied, 2);
        assert!(stats.duplicates >= 1);
        assert_eq!(stats.rejected, 0);
    }
}

#[tokio::test]
async fn test_rejected_message_is_not_retried() {
    let relay = MemoryRelay::new();
    let (engine, applied) = TrackedEngine::new(Arc::new(SimulatedEngine::new(KeyType::Eddsa)));
    let setup = engine.keygen_setup(2, &parties(), None).unwrap();
    let key = EncryptionKey::generate();
    let transport = EncryptedTransport::new(&key).unwrap();

    let garbage = frame(b"not a protocol message");
    relay.inject(
        "",
        ProtocolMessage {
            session_id: "session".to_string(),
            from: "b".to_string(),
            to: vec!["a".to_string()],
            body: transport.encrypt(&garbage).unwrap(),
            hash: body_hash(&garbage),
            sequence_no: 0,
        },
    );

    let shared: Arc<dyn Relay> = Arc::new(relay.clone());
    let sa = SessionGuard::create(&engine, SessionKind::Keygen, &setup, "a", None).unwrap();
    let sb = SessionGuard::create(&engine, SessionKind::Keygen, &setup, "b", None).unwrap();
    let mut da = driver(shared.clone(), &key, "a");
    let mut db = driver(shared, &key, "b");
    let (ra, rb) = tokio::join!(da.run(sa), db.run(sb));

    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(da.stats().rejected, 1);
    assert_eq!(applied.load(Ordering::SeqCst), 5);
    // The rejected message is left on the relay
    assert_eq!(relay.pending_count("session", "a", ""), 1);
}

// ============================================================================
// Timeout
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_counterpart_times_out_and_releases_session() {
    let relay = MemoryRelay::new();
    let engine = SimulatedEngine::new(KeyType::Eddsa);
    let setup = engine.keygen_setup(2, &parties(), None).unwrap();
    let session = SessionGuard::create(&engine, SessionKind::Keygen, &setup, "a", None).unwrap();

    let mut driver = RoundDriver::new(
        Arc::new(relay.clone()),
        EncryptedTransport::new(&EncryptionKey::generate()).unwrap(),
        "session",
        "a",
        fast_config().with_protocol_timeout(Duration::from_secs(2)),
    )
    .with_message_tag("eddsa")
    .with_stage("eddsa keygen");

    let started = Instant::now();
    let err = driver.run(session).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        &err,
        Error::ProtocolTimeout { session_id, stage } if session_id == "session" && stage == "eddsa keygen"
    ));
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2100));
    assert_eq!(driver.state(), DriverState::TimedOut);
    assert_eq!(engine.live_handles(), 0);

    // The opening round still went out on the run's tag
    assert_eq!(driver.stats().sent, 1);
    assert_eq!(relay.pending_count("session", "b", "eddsa"), 1);
    assert_eq!(relay.pending_count("session", "b", ""), 0);
}

#[tokio::test]
async fn test_bad_setup_leaves_no_handle() {
    let engine = SimulatedEngine::new(KeyType::Ecdsa);
    let result = SessionGuard::create(&engine, SessionKind::Keygen, b"{}", "a", None);

    assert!(result.is_err());
    assert_eq!(engine.live_handles(), 0);
}
