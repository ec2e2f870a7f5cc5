//! Invariant: engine handles never outlive the call that created them
//!
//! Key shares and sessions are loaded into the engine for the duration of a
//! run and must be released whether the run succeeds, times out or fails
//! before the exchange starts.

use crate::support::{Deployment, MuteCoSigner, digest, fast_config};
use std::sync::Arc;
use std::time::Duration;
use vault_tss_core::{Error, KeyType, TssParty};

#[tokio::test]
async fn test_no_live_handles_after_successful_flows() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;
    assert_eq!(deployment.live_handles(), 0);

    deployment
        .device
        .keysign(&vault, &[digest(1), digest(2)], "m/0'/1", KeyType::Ecdsa, "secret")
        .await
        .unwrap();
    deployment.server.wait_idle().await.unwrap();
    assert_eq!(deployment.live_handles(), 0);

    deployment
        .device
        .reshare(&vault, None, "secret", "")
        .await
        .unwrap();
    deployment.server.wait_idle().await.unwrap();
    deployment.verifier.wait_idle().await.unwrap();
    assert_eq!(deployment.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_live_handles_after_protocol_timeout() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;

    // The co-signer joins the session but never exchanges a message
    let mute = MuteCoSigner {
        party_id: "server".to_string(),
        relay: deployment.relay.clone(),
    };
    let device = TssParty::new(
        "device",
        deployment.relay.clone(),
        deployment.engines.clone(),
        Arc::new(mute),
    )
    .with_config(fast_config().with_protocol_timeout(Duration::from_secs(2)));

    let err = device
        .keysign(&vault, &[digest(3)], "", KeyType::Ecdsa, "secret")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolTimeout { ref stage, .. } if stage == "keysign"));
    assert_eq!(deployment.live_handles(), 0);
}

#[tokio::test]
async fn test_no_live_handles_after_setup_failure() {
    let deployment = Deployment::random();
    let mut vault = deployment.keygen().await;

    // No session party was a signer, so there is no old quorum to move from
    vault.signers = vec!["ghost-1".to_string(), "ghost-2".to_string()];

    let err = deployment
        .device
        .reshare(&vault, None, "secret", "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SetupConstructionFailed { ref stage, .. } if stage == "ECDSA reshare"));
    assert_eq!(deployment.live_handles(), 0);
}
