//! # Hub Agent
//!
//! Runs the periodic jobs of the hub until shutdown.
//!
//! ## Jobs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              HubAgent                                   │
//! │                                                                         │
//! │  ┌──────────────────────┐ ┌──────────────────────┐ ┌─────────────────┐ │
//! │  │ local command sweep  │ │ remote command sweep │ │ fallback pull   │ │
//! │  │ every sweep_interval │ │ every sweep_interval │ │ every N secs    │ │
//! │  │ expire what we sent  │ │ expire what we got,  │ │ push-disabled   │ │
//! │  │                      │ │ tell the issuer      │ │ remotes only    │ │
//! │  └──────────────────────┘ └──────────────────────┘ └─────────────────┘ │
//! │                                                                         │
//! │  SHUTDOWN:                                                              │
//! │  cancel token → loops exit after the current run → dispatches drained  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::HubContext;
use crate::error::SyncResult;
use crate::pull::{DateRange, PullSelection};

/// Starts the periodic jobs.
pub struct HubAgent;

impl HubAgent {
    pub fn start(ctx: HubContext) -> AgentHandle {
        let sweep_every = Duration::from_secs(ctx.config.commands.sweep_interval_secs.max(1));
        let mut jobs = vec![
            spawn_job(ctx.clone(), "local_command_sweep", sweep_every, Duration::ZERO, |ctx| async move {
                ctx.commands().sweep_local_commands(Utc::now()).await.map(drop)
            }),
            spawn_job(ctx.clone(), "remote_command_sweep", sweep_every, Duration::ZERO, |ctx| async move {
                ctx.commands().sweep_remote_commands(Utc::now()).await.map(drop)
            }),
        ];

        let schedule = &ctx.config.schedule;
        if schedule.fallback_pull_interval_secs > 0 {
            let every = Duration::from_secs(schedule.fallback_pull_interval_secs);
            let window = chrono::Duration::seconds(schedule.fallback_window_secs as i64);
            jobs.push(spawn_job(ctx.clone(), "fallback_pull", every, every, move |ctx| async move {
                let reports = ctx
                    .puller()
                    .pull_all(PullSelection::PushDisabledOnly, DateRange::trailing(window))
                    .await;
                let received: usize = reports.iter().map(|(_, r)| r.received).sum();
                debug!(modules = reports.len(), received, "Fallback pull finished");
                Ok(())
            }));
        } else {
            info!("Fallback pull disabled");
        }

        info!(jobs = jobs.len(), "Hub agent started");
        AgentHandle { ctx, jobs }
    }
}

/// Runs `job` every `every`, first after `delay`, until the hub shuts down.
fn spawn_job<F, Fut>(
    ctx: HubContext,
    name: &'static str,
    every: Duration,
    delay: Duration,
    job: F,
) -> (&'static str, JoinHandle<()>)
where
    F: Fn(HubContext) -> Fut + Send + 'static,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + delay, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = job(ctx.clone()).await {
                        error!(job = name, error = %e, "Periodic job failed");
                    }
                }
                _ = ctx.shutdown.cancelled() => {
                    debug!(job = name, "Periodic job stopping");
                    break;
                }
            }
        }
    });
    (name, handle)
}

/// Handle to the running agent.
pub struct AgentHandle {
    ctx: HubContext,
    jobs: Vec<(&'static str, JoinHandle<()>)>,
}

impl AgentHandle {
    pub fn is_running(&self) -> bool {
        !self.ctx.shutdown.is_cancelled()
    }

    /// Stops the jobs and waits up to `drain_timeout` for in-flight dispatches.
    ///
    /// Returns false when dispatches were abandoned.
    pub async fn shutdown(self, drain_timeout: Duration) -> bool {
        info!("Hub agent shutting down");
        self.ctx.shutdown.cancel();

        for (name, job) in self.jobs {
            if let Err(e) = job.await {
                error!(job = name, error = %e, "Periodic job panicked");
            }
        }

        let drained = self.ctx.dispatcher.drain(drain_timeout).await;
        if !drained {
            warn!(in_flight = self.ctx.dispatcher.in_flight(), "Abandoning in-flight dispatches");
        }
        info!("Hub agent stopped");
        drained
    }
}
