#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the gateway's public surface: vault access through
//! the kernel, saved-host resolution, and the guarantee that rejected
//! session builds leave no trace in the store.

use std::sync::Arc;

use {
    gangway_gateway::{
        CreateSessionInput, Gateway, GatewayConfig, GatewayError,
        hosts::SavedHostInput,
    },
    gangway_store::{MemoryStore, Store, keys},
    gangway_vault::{KdfParams, SecretEntry, Vault},
};

fn gateway_on(
    store: Arc<MemoryStore>,
    allow: &[&str],
) -> Arc<Gateway<MemoryStore>> {
    let mut config = GatewayConfig::default();
    config.allow_list = allow.iter().map(|s| (*s).to_string()).collect();
    let vault = Arc::new(Vault::with_params(
        Arc::clone(&store),
        KdfParams::insecure_fast(),
    ));
    Gateway::with_vault(store, config, vault)
}

#[tokio::test]
async fn vault_flow_through_the_kernel() {
    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_on(Arc::clone(&store), &[]);

    let phrase = gateway.vault().init("u1", "p@ss", None).await.unwrap();
    assert!(!phrase.is_empty());

    let unlock = gateway.vault().unlock("u1", "p@ss").await.unwrap();
    gateway
        .vault()
        .with_secrets(&unlock.token, "u1", |s| {
            s.insert("k", SecretEntry {
                password: Some("sshpw".to_string()),
                ..Default::default()
            });
        })
        .await
        .unwrap();
    gateway.vault().lock(&unlock.token).await;

    let unlock = gateway.vault().unlock("u1", "p@ss").await.unwrap();
    let entry = gateway
        .vault()
        .with_secrets(&unlock.token, "u1", |s| s.get("k").cloned())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.password.as_deref(), Some("sshpw"));
}

#[tokio::test]
async fn rejected_builds_leave_the_store_untouched() {
    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_on(Arc::clone(&store), &["10.0.0.5"]);

    let attempts = vec![
        // Disallowed host.
        CreateSessionInput {
            host: Some("evil.example".to_string()),
            username: Some("root".to_string()),
            password: Some("pw".to_string()),
            ..Default::default()
        },
        // Missing credentials.
        CreateSessionInput {
            host: Some("10.0.0.5".to_string()),
            username: Some("root".to_string()),
            ..Default::default()
        },
        // Routable forward bind.
        CreateSessionInput {
            command: Some("ssh root@10.0.0.5 -L 0.0.0.0:7000:db:5432".to_string()),
            password: Some("pw".to_string()),
            ..Default::default()
        },
    ];

    for input in attempts {
        gateway.create_session("u1", input).await.unwrap_err();
    }

    // No audit lines, no known-hosts record, no sessions.
    assert!(store.object_keys().await.is_empty());
    let audit_key = keys::audit(&gangway_common::time::today_stamp());
    assert!(store.lines(&audit_key).await.is_empty());
    assert!(
        store
            .get_json(&keys::known_hosts("u1"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(gateway.list_sessions("u1").await.is_empty());
}

#[tokio::test]
async fn saved_host_resolution_feeds_the_build() {
    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_on(Arc::clone(&store), &["10.0.0.5"]);

    let saved = gateway
        .saved_hosts()
        .create("u1", SavedHostInput {
            label: "prod".to_string(),
            host: "blocked.example".to_string(),
            port: 22,
            username: "deploy".to_string(),
            secret_id: None,
        })
        .await
        .unwrap();

    // The saved host resolved (no MissingTarget) and then hit the
    // allow-list, proving precedence ran before any dial.
    let err = gateway
        .create_session("u1", CreateSessionInput {
            host_id: Some(saved.id.clone()),
            password: Some("pw".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::HostNotAllowed));

    // Explicit host overrides the saved one.
    let err = gateway
        .create_session("u1", CreateSessionInput {
            host_id: Some(saved.id),
            host: Some("also-blocked.example".to_string()),
            password: Some("pw".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::HostNotAllowed));
}

#[tokio::test]
async fn secret_resolution_requires_token_and_known_id() {
    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_on(Arc::clone(&store), &["10.0.0.5"]);

    gateway.vault().init("u1", "p@ss", None).await.unwrap();
    let token = gateway.vault().unlock("u1", "p@ss").await.unwrap().token;

    // Token present but the secret id does not exist.
    let err = gateway
        .create_session("u1", CreateSessionInput {
            host: Some("10.0.0.5".to_string()),
            username: Some("root".to_string()),
            secret_id: Some("nope".to_string()),
            vault_token: Some(token),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnknownSecret(_)));

    // No token at all.
    let err = gateway
        .create_session("u1", CreateSessionInput {
            host: Some("10.0.0.5".to_string()),
            username: Some("root".to_string()),
            secret_id: Some("nope".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::VaultTokenRequired));
}
