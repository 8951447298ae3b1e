#![warn(rust_2018_idioms)]

use std::str::FromStr;

use flexi_logger::{LogSpecBuilder, LoggerHandle};
use futures::future::{select, Either};
use futures::pin_mut;
use log::{error, info, warn, LevelFilter};
use tokio::sync::{mpsc, oneshot};

use cardroom_server::{run, settings};

fn main() -> anyhow::Result<()> {
    let settings = settings::load()?;
    let _logger = setup_logger(&settings.logging)?;
    let mut signal_rx = setup_signal()?;
    let runtime = setup_runtime(&settings.runtime)?;

    runtime.block_on(async move {
        // Spin up the server.
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            match run(settings.server, settings.game, shutdown_rx).await {
                Ok(stats) => info!(
                    "accepted {} connections and started {} games",
                    stats.total_accepted_connections, stats.games_started
                ),
                Err(e) => error!("server stopped: {}", e),
            }
        });
        // Forward receiving signal to shutdown notification.
        let signal = async move {
            signal_rx.recv().await;
            info!("sending shutdown notice");
            shutdown_tx.send(()).ok();
        };
        pin_mut!(signal);
        // Wait either for receiving the signal, or for the server task to
        // stop unexpectedly (e.g. due to a panic).
        let completed = select(signal, server).await;
        match completed {
            // We've received the signal, and need to wait for the server to
            // shutdown gracefully.
            Either::Left((_, server)) => {
                if let Err(e) = server.await {
                    error!("server task: {}", e);
                }
            }
            // The server stopped but signal still hasn't been received, so
            // there's an error.
            Either::Right((res, _)) => {
                error!("server stopped unexpectedly");
                if let Err(e) = res {
                    error!("server task: {}", e);
                }
            }
        };
    });
    info!("good-bye, world!");
    Ok(())
}

fn setup_logger(l: &settings::Logging) -> anyhow::Result<LoggerHandle> {
    let mut spec_builder = LogSpecBuilder::new();
    spec_builder.default(LevelFilter::from_str(&l.level)?);
    let spec = spec_builder.build();
    let handle = flexi_logger::Logger::with(spec)
        .format(flexi_logger::default_format)
        .start()?;
    Ok(handle)
}

fn setup_signal() -> anyhow::Result<mpsc::UnboundedReceiver<()>> {
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("received interrupt signal");
        signal_tx.send(()).ok();
    })?;
    Ok(signal_rx)
}

fn setup_runtime(r: &settings::Runtime) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = if r.threaded {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        let worker_threads = if r.worker_threads == 0 {
            warn!("worker_threads must be positive; adjusting to 1");
            1
        } else {
            r.worker_threads
        };
        builder.worker_threads(worker_threads);
        builder
    } else {
        tokio::runtime::Builder::new_current_thread()
    };
    let max_blocking_threads = if r.max_blocking_threads == 0 {
        warn!("max_blocking_threads must be positive; adjusting to 1");
        1
    } else {
        r.max_blocking_threads
    };
    builder
        .enable_all()
        .max_blocking_threads(max_blocking_threads)
        .thread_name(r.thread_name.clone());
    Ok(builder.build()?)
}
