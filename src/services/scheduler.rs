// src/services/scheduler.rs

use std::{future::Future, time::Duration};

use chrono::Utc;
use rand::Rng;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, timeout},
};

use crate::{error::AppError, state::AppState};

/// Owns the two periodic background jobs: the expired-session sweeper and
/// the exam publisher.
///
/// Each instance runs its own timers. Several processes sharing one database
/// will sweep concurrently; the conditional update in `complete_session`
/// keeps that safe, but work may be duplicated.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(state: &AppState) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let cfg = state.config.scheduler.clone();

        let sweeper = state.sweeper();
        let sweep = tokio::spawn(run_every(
            "sweeper",
            cfg.sweep_interval,
            jitter(cfg.max_startup_jitter),
            rx.clone(),
            move || {
                let sweeper = sweeper.clone();
                async move { sweeper.sweep(Utc::now()).await.map(|_| ()) }
            },
        ));

        let publisher = state.publisher();
        let publish = tokio::spawn(run_every(
            "publisher",
            cfg.publish_interval,
            jitter(cfg.max_startup_jitter),
            rx,
            move || {
                let publisher = publisher.clone();
                async move { publisher.publish_due(Utc::now()).await.map(|_| ()) }
            },
        ));

        tracing::info!(
            "Scheduler started (sweep every {:?}, publish every {:?})",
            cfg.sweep_interval,
            cfg.publish_interval
        );

        Self {
            shutdown,
            tasks: vec![sweep, publish],
        }
    }

    /// Signals both loops and waits for them. A job mid-run is given a few
    /// seconds to finish before it is aborted.
    pub async fn stop(self) {
        // Receivers only disappear once the loops have already exited.
        let _ = self.shutdown.send(true);

        for task in self.tasks {
            let abort = task.abort_handle();
            match timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Scheduler task ended abnormally: {:?}", e),
                Err(_) => {
                    tracing::warn!("Scheduler task did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    initial_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send,
{
    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {}
        _ = shutdown.changed() => return,
    }

    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = job().await {
                    tracing::error!("Scheduled {} run failed: {:?}", name, e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("Scheduled {} loop exited", name);
}
