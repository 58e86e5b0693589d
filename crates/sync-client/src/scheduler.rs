//! Periodic autosave, push and pull timers.
//!
//! Each activity runs in its own task on a fixed interval. A tick that fires
//! while the previous one of the same kind is still running is dropped, not
//! queued: missed ticks are skipped and the client's in-flight guards reject
//! overlapping cycles.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{CycleOutcome, SyncClient};

pub struct Scheduler {
    client: Arc<SyncClient>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    /// Spawn the autosave, push and pull timers for `client`.
    pub fn start(client: Arc<SyncClient>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = client.config().clone();

        let autosave = {
            let client = Arc::clone(&client);
            spawn_timer(
                "autosave",
                config.autosave_interval(),
                shutdown_rx.clone(),
                move || {
                    let client = Arc::clone(&client);
                    async move { client.autosave_tick() }
                },
            )
        };

        let push = {
            let client = Arc::clone(&client);
            spawn_timer("push", config.push_interval(), shutdown_rx.clone(), move || {
                let client = Arc::clone(&client);
                async move {
                    // Failures are already reported through the event bus.
                    if let Ok(CycleOutcome::Skipped) = client.push_cycle().await {
                        debug!("Push tick skipped");
                    }
                }
            })
        };

        let pull = {
            let client = Arc::clone(&client);
            spawn_timer("pull", config.pull_interval(), shutdown_rx, move || {
                let client = Arc::clone(&client);
                async move {
                    if let Ok(CycleOutcome::Skipped) = client.pull_cycle().await {
                        debug!("Pull tick skipped");
                    }
                }
            })
        };

        info!(
            "Scheduler started (autosave {:?}, push {:?}, pull {:?})",
            config.autosave_interval(),
            config.push_interval(),
            config.pull_interval()
        );

        Self {
            client,
            shutdown_tx,
            tasks: vec![("autosave", autosave), ("push", push), ("pull", pull)],
        }
    }

    /// Stop the timers, wait up to the grace period for in-flight work, abort
    /// what is left, then save if anything is still unsaved.
    pub async fn shutdown(self) -> crate::client::Result<()> {
        let _ = self.shutdown_tx.send(true);
        let grace = self.client.config().shutdown_grace();

        for (name, mut handle) in self.tasks {
            if timeout(grace, &mut handle).await.is_err() {
                warn!("{} task did not stop within {:?}, aborting", name, grace);
                handle.abort();
            }
        }

        if self.client.needs_save() {
            self.client.save(false)?;
        }
        info!("Scheduler stopped");
        Ok(())
    }
}

fn spawn_timer<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; start one period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                _ = shutdown.changed() => {
                    debug!("{} timer stopping", name);
                    break;
                }
            }
        }
    })
}
