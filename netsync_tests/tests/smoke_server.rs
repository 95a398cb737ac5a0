use netsync_server::server::bind_ephemeral;

/// Smoke test: server can run a few ticks without clients.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(64).await?;
    server.run_for_ticks(3).await?;
    assert_eq!(server.tick(), 3);
    assert!(server.runtime().peers().is_empty());
    Ok(())
}

/// The console answers without a connected client.
#[tokio::test]
async fn console_status_and_spawn() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(64).await?;
    let status = server.exec_console("status");
    assert!(status.iter().any(|l| l == "Clients: 0"));

    assert_eq!(server.exec_console("spawn 5"), vec!["Spawned #5"]);
    assert_eq!(server.exec_console("spawn 5"), vec!["Entity #5 already exists"]);
    assert_eq!(server.exec_console("cease 5"), vec!["Ceased #5"]);
    assert_eq!(server.exec_console("cease 5"), vec!["No entity #5"]);
    Ok(())
}
