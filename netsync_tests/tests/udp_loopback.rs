use std::time::Duration;

use netsync_client::client::{ClientState, ReplicationClient};
use netsync_server::server::{bind_ephemeral, ReplicationServer};
use netsync_tests::init_tracing;

/// Steps both sides until `done` holds, giving up after a few seconds.
async fn pump_until(
    server: &mut ReplicationServer,
    client: &mut ReplicationClient,
    mut done: impl FnMut(&ReplicationServer, &ReplicationClient) -> bool,
) -> anyhow::Result<bool> {
    for _ in 0..400 {
        server.step()?;
        client.step();
        if done(server, client) {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_mirrors_the_arena_over_udp() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, cfg) = bind_ephemeral(64).await?;
    let mut client = ReplicationClient::connect(&cfg).await?;

    let joined = pump_until(&mut server, &mut client, |_, c| {
        c.state() == ClientState::Connected && c.scores().is_some()
    })
    .await?;
    assert!(joined, "client never synchronized");
    assert_eq!(server.runtime().peers().len(), 1);

    let moving = pump_until(&mut server, &mut client, |_, c| {
        c.beacon_position().is_some()
    })
    .await?;
    assert!(moving, "beacon never replicated");

    let me = client.identity().expect("welcomed");
    client.ping()?;
    let scored = pump_until(&mut server, &mut client, |s, c| {
        c.scores().is_some_and(|scores| scores.contains(&(me.0, 1)))
            && s.scores().contains(&(me.0, 1))
    })
    .await?;
    assert!(scored, "ping never reached the scoreboard");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quitting_client_leaves_the_server() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, cfg) = bind_ephemeral(64).await?;
    let mut client = ReplicationClient::connect(&cfg).await?;

    let joined = pump_until(&mut server, &mut client, |s, _| {
        s.runtime().peers().len() == 1
    })
    .await?;
    assert!(joined);

    client.exec_console("quit");
    assert!(client.should_quit());
    let left = pump_until(&mut server, &mut client, |s, _| s.runtime().peers().is_empty()).await?;
    assert!(left, "server kept the departed client");
    Ok(())
}
