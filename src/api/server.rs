//! Control server
//!
//! Line-oriented command loop over stdio:
//! - Reads one JSON command per line from stdin
//! - Writes every notification as one JSON line to stdout
//! - Stops on end of input, Ctrl+C or SIGTERM, then flushes pending toggles

use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use crate::api::commands::CommandDispatcher;
use crate::core::event_bus::{Notification, NotificationBus, Notifier};
use crate::plugin::manager::ModuleManager;
use crate::plugin::scheduler::RetryReport;

/// stdio command server
pub struct ControlServer {
    manager: Arc<ModuleManager>,
    bus: Arc<NotificationBus>,
    dispatcher: CommandDispatcher,
}

impl ControlServer {
    /// The manager is expected to report into `bus`
    pub fn new(manager: Arc<ModuleManager>, bus: Arc<NotificationBus>) -> Self {
        let dispatcher = CommandDispatcher::new(manager.clone(), Notifier::new(bus.clone()));
        Self {
            manager,
            bus,
            dispatcher,
        }
    }

    /// Serve stdin/stdout until input ends or a shutdown signal arrives
    pub async fn serve(self) -> anyhow::Result<Option<RetryReport>> {
        info!("Control server ready, reading commands from stdin");
        self.serve_with(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
            .await
    }

    pub async fn serve_with<R, W, F>(
        self,
        input: R,
        mut output: W,
        shutdown: F,
    ) -> anyhow::Result<Option<RetryReport>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut notifications = self.bus.subscribe_stream();
        let mut lines = BufReader::new(input).lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatcher.handle_line(&line),
                    Ok(None) => {
                        info!("Command input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read command input");
                        break;
                    }
                },
                received = notifications.recv() => match received {
                    Some(notification) => write_notification(&mut output, &notification).await?,
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }

        info!("Control server shutting down");
        let flush = self.manager.flush();
        self.manager.host().release_all();
        let report = match flush {
            Some(flush) => Some(flush.wait().await),
            None => None,
        };

        while let Ok(notification) = notifications.try_recv() {
            write_notification(&mut output, &notification).await?;
        }
        output.flush().await?;

        if let Some(report) = &report {
            info!(
                resolved = report.resolved.len(),
                unresolved = report.unresolved.len(),
                "Control server shut down"
            );
        }
        Ok(report)
    }
}

async fn write_notification<W>(output: &mut W, notification: &Notification) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(notification)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
