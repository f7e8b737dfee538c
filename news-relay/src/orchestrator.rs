use crate::config::Config;
use crate::deliver::Deliverer;
use crate::fetcher::Fetcher;
use crate::filter::ItemFilter;
use crate::pipeline::IngestPipeline;
use crate::render::Renderer;
use crate::scheduler::{JobKind, JobScheduler};
use crate::store::NewsStore;
use crate::types::{MessageSink, PageSource, RelayError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Running,
    Stopped,
}

/// Drives the scheduled jobs on a single task. Owns the store and closes it on the way out.
pub struct Orchestrator {
    state: RelayState,
    destination: String,
    retention_days: u32,
    utc_offset_minutes: i32,
    tick_interval: Duration,
    failure_cooldown: Duration,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    pipeline: IngestPipeline,
    deliverer: Deliverer,
    scheduler: JobScheduler,
    store: NewsStore,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        pipeline: IngestPipeline,
        deliverer: Deliverer,
        scheduler: JobScheduler,
        store: NewsStore,
    ) -> Self {
        for job in scheduler.jobs() {
            debug!("Scheduled job {}: {}", job.kind, job.schedule);
        }

        Self {
            state: RelayState::Idle,
            destination: config.telegram.chat_id.clone(),
            retention_days: config.schedule.retention_days,
            utc_offset_minutes: config.schedule.timezone_offset_minutes,
            tick_interval: config.schedule.tick_interval(),
            failure_cooldown: config.schedule.failure_cooldown(),
            max_consecutive_failures: config.schedule.max_consecutive_failures.max(1),
            consecutive_failures: 0,
            pipeline,
            deliverer,
            scheduler,
            store,
        }
    }

    /// Wire up fetcher, filter, renderer and deliverer from `config` around an open store.
    pub fn from_parts(
        config: &Config,
        source: Arc<dyn PageSource>,
        sink: Arc<dyn MessageSink>,
        store: NewsStore,
    ) -> Result<Self> {
        let (pipeline, deliverer, scheduler) = build_parts(config, source, sink)?;
        Ok(Self::new(config, pipeline, deliverer, scheduler, store))
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn store(&self) -> &NewsStore {
        &self.store
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run until `token` is cancelled, then shut down.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        self.start().await;

        loop {
            self.tick(Utc::now()).await;

            let pause = self.next_pause();
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Stop requested");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    pub async fn start(&mut self) {
        if self.state != RelayState::Idle {
            return;
        }
        if !self.deliverer.deliver_startup_notice(&self.destination).await {
            warn!("Startup notice was not delivered");
        }
        self.state = RelayState::Running;
        info!("News relay running, posting to {}", self.destination);
    }

    /// Run every due job to completion. A failed store ping counts as a loop failure
    /// and skips the jobs.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.store.ping().await {
            self.consecutive_failures += 1;
            error!("Store health check failed ({} in a row): {}", self.consecutive_failures, e);
            return;
        }
        self.consecutive_failures = 0;

        for job in self.scheduler.due_jobs(now) {
            debug!(job = %job, "Running job");
            if let Err(e) = self.run_job(job).await {
                error!(job = %job, "Job failed: {}", e);
                let notice = format!("Job {} failed: {}", job, e);
                self.deliverer.deliver_error_notice(&self.destination, &notice).await;
            }
            self.scheduler.mark_run(job, now);
        }
    }

    /// Sleep before the next tick: the tick interval, or the cooldown once failures pile up.
    pub fn next_pause(&mut self) -> Duration {
        if self.consecutive_failures >= self.max_consecutive_failures {
            warn!(
                "{} consecutive loop failures, cooling down for {:?}",
                self.consecutive_failures, self.failure_cooldown
            );
            self.consecutive_failures = 0;
            return self.failure_cooldown;
        }
        self.tick_interval
    }

    pub async fn run_job(&self, job: JobKind) -> Result<()> {
        match job {
            JobKind::Ingest => {
                self.pipeline.run_cycle(&self.store, &self.deliverer, &self.destination).await;
                Ok(())
            }
            JobKind::Digest => {
                let groups = self.store.daily_digest(self.utc_offset_minutes).await?;
                if !self.deliverer.deliver_digest(&self.destination, &groups).await {
                    return Err(RelayError::General("daily digest was not delivered".to_string()));
                }
                Ok(())
            }
            JobKind::Stats => {
                let stats = self.store.statistics().await?;
                if !self.deliverer.deliver_statistics(&self.destination, &stats).await {
                    return Err(RelayError::General("statistics were not delivered".to_string()));
                }
                Ok(())
            }
            JobKind::Cleanup => {
                let removed = self.store.cleanup(self.retention_days).await?;
                info!("Cleanup removed {} items", removed);
                Ok(())
            }
        }
    }

    pub async fn shutdown(mut self) {
        self.state = RelayState::Stopped;
        if !self.deliverer.deliver_shutdown_notice(&self.destination).await {
            warn!("Shutdown notice was not delivered");
        }
        self.store.close().await;
        info!("News relay stopped");
    }
}

/// Open the store and run the relay until `token` is cancelled.
///
/// If the store cannot be opened the shutdown notice is still attempted before the
/// error is returned.
pub async fn launch(
    config: &Config,
    source: Arc<dyn PageSource>,
    sink: Arc<dyn MessageSink>,
    token: CancellationToken,
) -> Result<()> {
    let (pipeline, deliverer, scheduler) = build_parts(config, source, sink)?;

    let store = match NewsStore::open(&config.store.database_file).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open store {}: {}", config.store.database_file, e);
            deliverer.deliver_shutdown_notice(&config.telegram.chat_id).await;
            return Err(e);
        }
    };

    Orchestrator::new(config, pipeline, deliverer, scheduler, store).run(token).await
}

fn build_parts(
    config: &Config,
    source: Arc<dyn PageSource>,
    sink: Arc<dyn MessageSink>,
) -> Result<(IngestPipeline, Deliverer, JobScheduler)> {
    let fetcher = Fetcher::new(source, config.fetch.clone())?;
    let filter = ItemFilter::new(&config.filter);
    let pipeline = IngestPipeline::new(fetcher, filter, config);
    let deliverer = Deliverer::new(sink, Renderer::new(&config.delivery));
    let scheduler = JobScheduler::from_config(&config.schedule, Utc::now())?;
    Ok((pipeline, deliverer, scheduler))
}
