use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ckv_client::protocol::{MessageCode, Payload, Registry};
use ckv_client::{
    Address, ClientError, ClientResult, Credentials, Job, Pool, PoolConfig, PoolPhase,
};
use ckv_server::{DevServer, ServerOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

const STEP: Duration = Duration::from_secs(3);

/// Pool logs are visible with `RUST_LOG=ckv_client=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start_server(delay_ms: u64) -> DevServer {
    init_tracing();
    let options = ServerOptions {
        response_delay: Duration::from_millis(delay_ms),
        ..ServerOptions::default()
    };
    DevServer::bind("127.0.0.1:0", options).await.expect("bind")
}

fn config_for(server: &DevServer) -> PoolConfig {
    let addr = server.local_addr();
    PoolConfig::with_addresses(vec![Address::new(addr.ip().to_string(), addr.port())])
}

fn ping(pool: &Pool, registry: &Registry) -> oneshot::Receiver<ClientResult<Payload>> {
    let (tx, rx) = oneshot::channel();
    let job = Job::message(registry, MessageCode::PingReq, &Payload::Empty, move |result| {
        let _ = tx.send(result);
    })
    .expect("job");
    pool.send(job);
    rx
}

async fn outcome(rx: oneshot::Receiver<ClientResult<Payload>>) -> ClientResult<Payload> {
    timeout(STEP, rx)
        .await
        .expect("job timed out")
        .expect("callback dropped")
}

/// Polls `condition` until it holds or the step timeout passes.
async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + STEP;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn job_sent_before_connect_is_queued() {
    let server = start_server(0).await;
    let registry = Arc::new(Registry::standard());
    let pool = Pool::new(config_for(&server), registry.clone()).expect("pool");
    assert_eq!(pool.phase(), PoolPhase::Unconnected);

    let rx = ping(&pool, &registry);
    assert_eq!(pool.queued(), 1);
    assert_eq!(pool.connections(), 0);

    pool.connect();
    assert_eq!(pool.connections(), 1);
    assert_eq!(outcome(rx).await.expect("ping"), Payload::Empty);
    assert_eq!(pool.queued(), 0);
    assert_eq!(pool.connections(), 1);

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

#[tokio::test]
async fn send_after_close_fails() {
    let server = start_server(0).await;
    let registry = Arc::new(Registry::standard());
    let pool = Pool::new(config_for(&server), registry.clone()).expect("pool");
    pool.connect();
    pool.close();
    assert_eq!(pool.phase(), PoolPhase::Closed);

    let err = outcome(ping(&pool, &registry)).await.unwrap_err();
    assert_eq!(err.to_string(), "connection closed");
    assert_eq!(pool.connections(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn sequential_jobs_reuse_one_connection() {
    let server = start_server(0).await;
    let registry = Arc::new(Registry::standard());
    let pool = Pool::new(config_for(&server), registry.clone()).expect("pool");
    pool.connect();

    for _ in 0..5 {
        outcome(ping(&pool, &registry)).await.expect("ping");
        // Let the free signal reach the pool before the next send.
        eventually(|| pool.available() == 1).await;
    }
    assert_eq!(pool.connections(), 1);
    assert_eq!(server.stats().connections_total, 1);

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

#[tokio::test]
async fn connections_never_exceed_max() {
    let server = start_server(100).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.max_connections = 2;
    let pool = Pool::new(config, registry.clone()).expect("pool");
    pool.connect();

    let pending: Vec<_> = (0..6).map(|_| ping(&pool, &registry)).collect();
    assert_eq!(pool.connections(), 2);
    assert!(pool.queued() >= 4);

    for rx in pending {
        outcome(rx).await.expect("ping");
        assert!(pool.connections() <= 2);
    }
    assert_eq!(server.stats().connections_total, 2);

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

#[tokio::test]
async fn min_connections_open_at_startup() {
    let server = start_server(0).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.min_connections = 3;
    let pool = Pool::new(config, registry).expect("pool");

    pool.connect();
    assert_eq!(pool.connections(), 3);
    timeout(STEP, pool.wait_connected())
        .await
        .expect("connect timed out")
        .expect("connect");
    eventually(|| pool.available() == 3).await;

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

#[tokio::test]
async fn minimum_is_restored_after_disconnect() {
    let server = start_server(0).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.min_connections = 2;
    let pool = Pool::new(config, registry.clone()).expect("pool");
    pool.connect();
    timeout(STEP, pool.wait_connected())
        .await
        .expect("connect timed out")
        .expect("connect");
    eventually(|| server.stats().connections == 2).await;

    server.disconnect_all();
    eventually(|| server.stats().connections_total == 4).await;
    eventually(|| pool.available() == 2).await;
    assert_eq!(pool.connections(), 2);

    outcome(ping(&pool, &registry)).await.expect("ping");

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

#[tokio::test]
async fn idle_connections_above_minimum_are_evicted() {
    let server = start_server(50).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.min_connections = 1;
    config.idle_timeout = Duration::from_millis(300);
    let pool = Pool::new(config, registry.clone()).expect("pool");
    pool.connect();
    timeout(STEP, pool.wait_connected())
        .await
        .expect("connect timed out")
        .expect("connect");
    eventually(|| pool.available() == 1).await;

    let pending: Vec<_> = (0..3).map(|_| ping(&pool, &registry)).collect();
    for rx in pending {
        outcome(rx).await.expect("ping");
    }
    // Nothing is evicted before it has been idle for the full timeout.
    assert_eq!(pool.connections(), 3);

    eventually(|| pool.connections() == 1).await;
    sleep(Duration::from_millis(400)).await;
    assert_eq!(pool.connections(), 1);

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

#[tokio::test]
async fn close_fails_in_flight_and_queued_jobs() {
    let server = start_server(500).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.min_connections = 2;
    config.max_connections = 2;
    let pool = Pool::new(config, registry.clone()).expect("pool");
    pool.connect();
    timeout(STEP, pool.wait_connected())
        .await
        .expect("connect timed out")
        .expect("connect");
    eventually(|| pool.available() == 2).await;

    let first = ping(&pool, &registry);
    let second = ping(&pool, &registry);
    let queued = ping(&pool, &registry);
    assert_eq!(pool.available(), 0);
    assert_eq!(pool.queued(), 1);

    pool.close();
    assert_eq!(pool.phase(), PoolPhase::Closing);
    for rx in [queued, first, second] {
        let err = outcome(rx).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    timeout(STEP, pool.wait_closed()).await.expect("close");
    assert_eq!(pool.phase(), PoolPhase::Closed);
    assert_eq!(pool.connections(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn handshake_errors_reach_the_error_channel() {
    let server = start_server(0).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.min_connections = 1;
    config.credentials = Some(Credentials::new("user", "secret"));
    let pool = Pool::new(config, registry).expect("pool");
    let mut errors = pool.errors();

    pool.connect();
    let err = timeout(STEP, errors.recv())
        .await
        .expect("error timed out")
        .expect("error channel");
    assert!(matches!(err, ClientError::Server { .. }));

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

#[tokio::test]
async fn wait_connected_fails_when_closed_first() {
    let server = start_server(0).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.min_connections = 1;
    let pool = Pool::new(config, registry).expect("pool");

    pool.close();
    let result = timeout(STEP, pool.wait_connected()).await.expect("timed out");
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    server.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let registry = Arc::new(Registry::standard());
    let mut config = PoolConfig::default();
    config.min_connections = 30;
    assert!(matches!(
        Pool::new(config, registry),
        Err(ClientError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn in_use_connection_is_never_evicted() {
    let server = start_server(400).await;
    let registry = Arc::new(Registry::standard());
    let mut config = config_for(&server);
    config.idle_timeout = Duration::from_millis(100);
    let pool = Pool::new(config, registry.clone()).expect("pool");
    pool.connect();

    let rx = ping(&pool, &registry);
    sleep(Duration::from_millis(250)).await;
    // Idle timer has fired more than once while the request was in flight.
    assert_eq!(pool.connections(), 1);
    assert_eq!(pool.available(), 0);

    assert_eq!(outcome(rx).await.expect("ping"), Payload::Empty);
    // Above the floor of zero, so it goes once idle for the full timeout.
    eventually(|| pool.connections() == 0).await;
    assert_eq!(server.stats().connections_total, 1);

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
    server.shutdown().await;
}

/// Listener whose first connection answers any request with a frame of an
/// unknown message code; later connections stay quiet until closed.
async fn spawn_flaky_listener() -> (Address, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                if first && stream.read(&mut buf).await.unwrap_or(0) > 0 {
                    let _ = stream.write_all(&[0, 0, 0, 1, 3]).await;
                }
                while stream.read(&mut buf).await.unwrap_or(0) > 0 {}
            });
        }
    });
    (Address::new(addr.ip().to_string(), addr.port()), accepts)
}

#[tokio::test]
async fn error_close_is_replaced_without_floor_or_queue() {
    init_tracing();
    let (address, accepts) = spawn_flaky_listener().await;
    let registry = Arc::new(Registry::standard());
    let mut config = PoolConfig::with_addresses(vec![address]);
    config.reconnect_delay = Duration::from_millis(20);
    let pool = Pool::new(config, registry.clone()).expect("pool");
    let mut errors = pool.errors();
    pool.connect();
    assert_eq!(pool.connections(), 0);

    let err = outcome(ping(&pool, &registry)).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    let relayed = timeout(STEP, errors.recv())
        .await
        .expect("error timed out")
        .expect("error channel");
    assert!(relayed.is_connection_error());

    eventually(|| accepts.load(Ordering::SeqCst) == 2).await;
    eventually(|| pool.available() == 1).await;
    assert_eq!(pool.connections(), 1);
    assert_eq!(pool.queued(), 0);

    pool.close();
    timeout(STEP, pool.wait_closed()).await.expect("close");
}
