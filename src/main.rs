use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use slotkeeper::config::Config;
use slotkeeper::notify::NotifyHub;
use slotkeeper::observability::{self, CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use slotkeeper::scheduler::Scheduler;
use slotkeeper::store::Database;
use slotkeeper::{compactor, wire};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;
    let tls = config.tls_acceptor()?;
    let policy = config.policy()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(Database::open(config.wal_path(), Arc::new(NotifyHub::new()))?);
    let scheduler = Arc::new(Scheduler::new(db.clone(), policy));
    tokio::spawn(compactor::run_compactor(db, config.compact_threshold));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "slotkeeper on {addr} (data {}, utc offset {}, up to {} connections, tls {})",
        config.data_dir.display(),
        policy.utc_offset,
        config.max_connections,
        if tls.is_some() { "on" } else { "off" },
    );

    let slots = Arc::new(Semaphore::new(config.max_connections));
    serve(listener, &config, scheduler, tls, slots.clone(), shutdown_signal()?).await;
    drain(&slots, config.max_connections).await;

    info!("slotkeeper stopped");
    Ok(())
}

/// Accept clients until `shutdown` resolves. Each connection holds one
/// semaphore permit; clients past the limit are dropped.
async fn serve(
    listener: TcpListener,
    config: &Config,
    scheduler: Arc<Scheduler<Database>>,
    tls: Option<TlsAcceptor>,
    slots: Arc<Semaphore>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutting down, no longer accepting");
                return;
            }
        };

        let Ok(permit) = slots.clone().try_acquire_owned() else {
            warn!("at {} connections, turning away {peer}", config.max_connections);
            metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
            drop(socket);
            continue;
        };

        info!("client {peer} connected");
        metrics::counter!(CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        let scheduler = scheduler.clone();
        let password = config.password.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            if let Err(e) = wire::process_connection(socket, scheduler, password, tls).await {
                error!("client {peer}: {e}");
            }
            metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;
    })
}

/// Give open connections up to `DRAIN_TIMEOUT` to finish.
async fn drain(slots: &Semaphore, max_connections: usize) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while slots.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let open = max_connections - slots.available_permits();
            warn!("gave up waiting on {open} open connections");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections closed");
}
