//! Unit tests for the in-process co-signer

use crate::support::{Deployment, digest, fast_config};
use std::sync::Arc;
use vault_tss_core::{
    CoSigner, Engines, Error, KeysignRequest, LIB_TYPE_DKLS, LocalCoSigner, MemoryRelay, Relay,
    ReshareRequest,
};

fn reshare_request(session_id: &str) -> ReshareRequest {
    ReshareRequest {
        name: "vault".to_string(),
        public_key: "02ff".to_string(),
        session_id: session_id.to_string(),
        hex_encryption_key: "11".repeat(32),
        hex_chain_code: "22".repeat(32),
        local_party_id: "device".to_string(),
        old_parties: vec!["device".to_string(), "server".to_string()],
        encryption_password: "secret".to_string(),
        email: "owner@example.com".to_string(),
        old_reshare_prefix: String::new(),
        lib_type: LIB_TYPE_DKLS,
        plugin_id: Some("plugin-1".to_string()),
    }
}

fn keysign_request(public_key: &str, password: &str) -> KeysignRequest {
    KeysignRequest {
        public_key: public_key.to_string(),
        messages: vec![digest(1)],
        session: "session".to_string(),
        hex_encryption_key: "11".repeat(32),
        derive_path: String::new(),
        is_ecdsa: true,
        vault_password: password.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_join_registers_parties_in_order() {
    let relay = Arc::new(MemoryRelay::new());
    relay.register_session("session", "device").await.unwrap();

    let verifier = LocalCoSigner::with_parties(
        vec!["verifier".to_string(), "plugin".to_string()],
        relay.clone(),
        Arc::new(Engines::simulated()),
        fast_config(),
    );
    verifier.join_reshare(&reshare_request("session")).await.unwrap();

    assert_eq!(
        relay.session_parties("session").await.unwrap(),
        vec!["device", "verifier", "plugin"]
    );

    // Nobody starts the session, so both followers give up
    let err = verifier.wait_idle().await.unwrap_err();
    assert!(matches!(err, Error::ProtocolTimeout { ref stage, .. } if stage == "session start"));
}

#[tokio::test]
async fn test_keysign_for_unknown_vault_is_refused_before_joining() {
    let relay = Arc::new(MemoryRelay::new());
    let server = LocalCoSigner::new(
        "server",
        relay.clone(),
        Arc::new(Engines::simulated()),
        fast_config(),
    );

    let err = server
        .join_keysign(&keysign_request("02ff", "secret"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CoSigner(_)));
    assert!(relay.session_parties("session").await.unwrap().is_empty());
    server.wait_idle().await.unwrap();
}

#[tokio::test]
async fn test_keysign_password_is_checked() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;
    let guarded = deployment.server.as_ref().clone().with_password("right");

    let err = guarded
        .join_keysign(&keysign_request(&vault.public_key_ecdsa, "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CoSigner(ref msg) if msg.contains("password")));
}

#[tokio::test]
async fn test_keygen_leaves_matching_vault_on_server() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;

    let server_vault = deployment
        .server
        .vault("server", &vault.public_key_ecdsa)
        .unwrap();
    assert_eq!(server_vault.public_key_eddsa, vault.public_key_eddsa);
    assert_eq!(server_vault.hex_chain_code, vault.hex_chain_code);
    assert_eq!(server_vault.signers, vault.signers);
    assert_eq!(server_vault.local_party_id, "server");
    assert_ne!(server_vault.key_shares, vault.key_shares);
}

#[tokio::test]
async fn test_restored_vault_lets_fresh_cosigner_sign() {
    let deployment = Deployment::random();
    let vault = deployment.keygen().await;

    let held = deployment.server.vaults();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].0, "server");

    // A new co-signer on the same relay only knows what it is handed
    let restored = Arc::new(LocalCoSigner::new(
        "server",
        deployment.relay.clone(),
        deployment.engines.clone(),
        fast_config(),
    ));
    restored.insert_vault("server", held[0].1.clone());

    let device = vault_tss_core::TssParty::new(
        "device",
        deployment.relay.clone(),
        deployment.engines.clone(),
        restored.clone(),
    )
    .with_config(fast_config());
    let results = device
        .keysign(&vault, &[digest(3)], "", vault_tss_core::KeyType::Ecdsa, "secret")
        .await
        .unwrap();
    restored.wait_idle().await.unwrap();
    assert_eq!(results.len(), 1);
}
