use relay_server::server::status_lines;
use relay_shared::config::RelayConfig;
use relay_tests::TestRelay;

/// Smoke test: relay can start and stop without clients.
#[tokio::test]
async fn relay_starts_and_stops() -> anyhow::Result<()> {
    let relay = TestRelay::spawn(RelayConfig::default()).await?;
    assert!(relay.registry.is_empty());
    assert_eq!(status_lines(&relay.registry), vec!["Players: 0".to_string()]);
    relay.stop().await
}

/// Every connection gets its own id in the welcome.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clients_get_distinct_ids() -> anyhow::Result<()> {
    let relay = TestRelay::spawn(RelayConfig::default()).await?;
    let a = relay.client().await?;
    let b = relay.client().await?;
    assert_ne!(a.id, b.id);
    assert!(!a.id.as_str().is_empty());
    // Connecting alone does not create an entity.
    assert!(relay.registry.is_empty());
    drop((a, b));
    relay.stop().await
}
