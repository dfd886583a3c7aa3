use anyhow::Result;
use chainlet::error::StartupError;
use chainlet::{ChainletError, Node, NodeHandle, NodeStatus};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(20);

fn spawn_node(node: Node, shutdown: &CancellationToken) -> JoinHandle<chainlet::Result<()>> {
    tokio::spawn(node.run(shutdown.clone()))
}

/// Poll `check` until it holds or `timeout` passes
async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    false
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_node_without_peers_picks_target() -> Result<()> {
    let node = Node::builder().listen_timeout(TICK).start().await?;
    let handle = node.handle();

    assert_ne!(node.local_addr().port(), 0);
    assert_eq!(
        node.id().to_string(),
        format!("127.0.0.1:{}", node.local_addr().port())
    );
    let target = handle.target().await.expect("target chosen at startup");
    assert!((1..=10).contains(&target));
    assert_eq!(handle.status().await, NodeStatus::Starting);
    assert!(handle.peer_ids().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_startup_peer_is_fatal() {
    let result = Node::builder().peers(["localhost"]).start().await;
    assert!(matches!(
        result,
        Err(ChainletError::Startup(StartupError::InvalidPeerAddress { .. }))
    ));
}

#[tokio::test]
async fn test_unreachable_startup_peer_is_fatal() {
    let addr = format!("127.0.0.1:{}", free_port());
    let result = Node::builder().peers([addr]).start().await;
    assert!(matches!(
        result,
        Err(ChainletError::Startup(StartupError::PeerUnreachable { .. }))
    ));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = Node::builder().sync_cycle(0).start().await;
    assert!(matches!(result, Err(ChainletError::Config(_))));
}

#[tokio::test]
async fn test_run_and_shutdown_transitions() -> Result<()> {
    let node = Node::builder().listen_timeout(TICK).start().await?;
    let handle = node.handle();
    let shutdown = CancellationToken::new();
    let task = spawn_node(node, &shutdown);

    let h = &handle;
    assert!(
        wait_until(Duration::from_secs(2), || async move {
            h.status().await == NodeStatus::Running
        })
        .await
    );
    shutdown.cancel();
    task.await??;
    assert_eq!(handle.status().await, NodeStatus::Stopped);
    Ok(())
}

async fn chain_is_prefix(follower: &NodeHandle, leader: &NodeHandle, min_len: usize) -> bool {
    let theirs = follower.blocks().await;
    let ours = leader.blocks().await;
    theirs.len() >= min_len && ours.len() >= theirs.len() && ours[..theirs.len()] == theirs[..]
}

#[tokio::test]
async fn test_two_nodes_sync_and_part() -> Result<()> {
    let shutdown_a = CancellationToken::new();
    let shutdown_b = CancellationToken::new();

    // Inbound connections restart the listen timeout, so A ticks faster
    // than B polls it or A would rarely get to mine.
    let a = Node::builder()
        .listen_timeout(Duration::from_millis(10))
        .start()
        .await?;
    let a_handle = a.handle();
    let a_addr = a.id().to_string();
    let a_task = spawn_node(a, &shutdown_a);

    // B only follows; every block it holds must come from A.
    let b = Node::builder()
        .listen_timeout(Duration::from_millis(50))
        .mining_enabled(false)
        .peers([a_addr.clone()])
        .start()
        .await?;
    let b_handle = b.handle();
    let b_id = b.id().clone();
    assert_eq!(b_handle.target().await, None);
    let b_task = spawn_node(b, &shutdown_b);

    let (leader, follower, b_id) = (&a_handle, &b_handle, &b_id);

    assert!(
        wait_until(Duration::from_secs(5), || async move {
            leader.peer_ids().await.contains(b_id)
        })
        .await,
        "A should register B after PEER_INIT"
    );
    assert!(
        wait_until(Duration::from_secs(10), || async move {
            follower.target().await == leader.target().await
        })
        .await,
        "B should learn A's magic number"
    );
    assert!(
        wait_until(Duration::from_secs(20), || chain_is_prefix(follower, leader, 3)).await,
        "B should converge on A's chain"
    );

    shutdown_b.cancel();
    b_task.await??;
    assert!(
        wait_until(Duration::from_secs(5), || async move {
            leader.peer_ids().await.is_empty()
        })
        .await,
        "A should drop B after PEER_REMV"
    );

    shutdown_a.cancel();
    a_task.await??;
    Ok(())
}

#[tokio::test]
async fn test_corrupt_frame_only_affects_its_connection() -> Result<()> {
    use chainlet::{MessageData, MessageType, PeerHandle, PeerId, TcpTransport};
    use tokio::io::AsyncWriteExt;

    let node = Node::builder().listen_timeout(TICK).start().await?;
    let handle = node.handle();
    let node_addr = node.local_addr();
    let shutdown = CancellationToken::new();
    let task = spawn_node(node, &shutdown);

    let mut raw = tokio::net::TcpStream::connect(node_addr).await?;
    raw.write_all(&[0, 0, 0, 3, 0xff, 0xff, 0xff]).await?;
    raw.shutdown().await?;
    drop(raw);

    let visitor = PeerId::from_parts("127.0.0.1", free_port());
    let target = PeerHandle::new("127.0.0.1", node_addr.port());
    target
        .deliver(&TcpTransport::new(), &visitor, MessageType::PeerInit, MessageData::None)
        .await?;

    let (h, visitor) = (&handle, &visitor);
    assert!(
        wait_until(Duration::from_secs(5), || async move {
            h.peer_ids().await.contains(visitor)
        })
        .await
    );

    shutdown.cancel();
    task.await??;
    Ok(())
}
