//! Integration tests for two-party keygen
//!
//! The device runs the orchestrator; the fast-vault server is an in-process
//! co-signer on the same in-memory relay.

use crate::support::{Deployment, MuteCoSigner, RefusingCoSigner, fast_config};
use std::sync::Arc;
use std::time::Duration;
use vault_tss_core::{
    Engines, Error, KeyType, LIB_TYPE_DKLS, LocalVault, MemoryRelay, ProtocolEngine, TssParty,
};

#[tokio::test]
async fn test_keygen_produces_both_keys() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;

    assert_eq!(vault.name, "test vault");
    assert_eq!(vault.local_party_id, "device");
    assert_eq!(vault.signers, vec!["device", "server"]);
    assert_eq!(vault.lib_type, LIB_TYPE_DKLS);
    assert!(vault.reshare_prefix.is_empty());

    // Compressed secp256k1 point and raw ed25519 point
    assert_eq!(vault.public_key_ecdsa.len(), 66);
    assert_eq!(vault.public_key_eddsa.len(), 64);
    assert_eq!(vault.hex_chain_code.len(), 64);

    for key_type in KeyType::all() {
        assert!(vault.keyshare_for(vault.public_key(key_type)).is_ok());
    }
    assert_eq!(vault.key_shares.len(), 2);
}

#[tokio::test]
async fn test_keygen_is_deterministic_for_a_fixed_engine_seed() {
    let first = Deployment::seeded(7).keygen().await;
    let second = Deployment::seeded(7).keygen().await;
    let other = Deployment::seeded(8).keygen().await;

    assert_eq!(first.public_key_ecdsa, second.public_key_ecdsa);
    assert_eq!(first.public_key_eddsa, second.public_key_eddsa);
    assert_ne!(first.public_key_ecdsa, other.public_key_ecdsa);

    // EdDSA shares carry no chain code, so they replay byte for byte
    let eddsa_share = |vault: &LocalVault| {
        vault
            .keyshare_for(&vault.public_key_eddsa)
            .unwrap()
            .clone()
    };
    assert_eq!(eddsa_share(&first), eddsa_share(&second));

    // The chain code is the device's own randomness
    assert_ne!(first.hex_chain_code, second.hex_chain_code);
}

#[tokio::test]
async fn test_keygen_chain_code_reaches_the_engine() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;

    let engine = deployment.engine(KeyType::Ecdsa);
    let share = vault.keyshare_for(&vault.public_key_ecdsa).unwrap();
    let handle = engine.load_keyshare(&share.to_bytes().unwrap()).unwrap();
    let chain_code = engine.chain_code(handle).unwrap().map(hex::encode);
    engine.free_keyshare(handle).unwrap();
    assert_eq!(chain_code.as_deref(), Some(vault.hex_chain_code.as_str()));

    // The co-signer's share was built from the same setup
    let server_vault = deployment
        .server
        .vault("server", &vault.public_key_ecdsa)
        .unwrap();
    let server_share = server_vault
        .keyshare_for(&server_vault.public_key_ecdsa)
        .unwrap();
    let handle = engine
        .load_keyshare(&server_share.to_bytes().unwrap())
        .unwrap();
    let server_chain_code = engine.chain_code(handle).unwrap().map(hex::encode);
    engine.free_keyshare(handle).unwrap();
    assert_eq!(server_chain_code, chain_code);
}

#[tokio::test]
async fn test_keygen_completes_session_on_relay() {
    let deployment = Deployment::random();
    deployment.keygen().await;

    // Completion is best-effort but the in-memory relay always accepts it
    let sessions = deployment.relay.session_ids();
    assert_eq!(sessions.len(), 1);
    let mut completed = deployment.relay.completed_parties(&sessions[0]);
    completed.sort();
    assert_eq!(completed, vec!["device", "server"]);
}

#[tokio::test]
async fn test_refused_join_fails_keygen() {
    let relay = Arc::new(MemoryRelay::new());
    let device = TssParty::new(
        "device",
        relay,
        Arc::new(Engines::simulated()),
        Arc::new(RefusingCoSigner),
    )
    .with_config(fast_config());

    let err = device.keygen("vault", "secret", "").await.unwrap_err();
    assert!(matches!(err, Error::CoSigner(ref msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_empty_name_is_rejected() {
    let deployment = Deployment::random();
    let err = deployment.device.keygen("", "secret", "").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test(start_paused = true)]
async fn test_missing_cosigner_times_out_rendezvous() {
    let relay = Arc::new(MemoryRelay::new());
    let absent = MuteCoSigner {
        party_id: "server".to_string(),
        relay: Arc::new(MemoryRelay::new()),
    };
    let device = TssParty::new(
        "device",
        relay,
        Arc::new(Engines::simulated()),
        Arc::new(absent),
    )
    .with_config(fast_config().with_rendezvous_timeout(Duration::from_secs(3)));

    let err = device.keygen("vault", "secret", "").await.unwrap_err();
    assert!(matches!(
        err,
        Error::RendezvousTimeout {
            expected: 2,
            joined: 1,
            ..
        }
    ));
}
