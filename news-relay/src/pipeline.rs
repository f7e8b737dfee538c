use crate::config::Config;
use crate::deliver::Deliverer;
use crate::fetcher::Fetcher;
use crate::filter::ItemFilter;
use crate::store::NewsStore;
use crate::types::{CycleReport, RawItem, Result};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// One ingest cycle: fetch, filter, validate, dedupe, deliver, mark sent.
pub struct IngestPipeline {
    fetcher: Fetcher,
    filter: ItemFilter,
    base_url: String,
    max_pages: u32,
    redeliver_batch: u32,
}

impl IngestPipeline {
    pub fn new(fetcher: Fetcher, filter: ItemFilter, config: &Config) -> Self {
        Self {
            fetcher,
            filter,
            base_url: config.fetch.base_url.clone(),
            max_pages: config.fetch.max_pages,
            redeliver_batch: config.delivery.redeliver_batch,
        }
    }

    pub fn filter_mut(&mut self) -> &mut ItemFilter {
        &mut self.filter
    }

    /// Storage faults skip the item and delivery failures leave it unsent; neither stops the batch.
    pub async fn run_cycle(
        &self,
        store: &NewsStore,
        deliverer: &Deliverer,
        destination: &str,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let mut attempted: HashSet<i64> = HashSet::new();

        let items = self.fetcher.fetch_all(&self.base_url, self.max_pages).await;
        report.fetched = items.len();

        for item in items {
            if !self.filter.accepts(&item) {
                report.filtered += 1;
                continue;
            }
            if let Err(reason) = self.filter.validate(&item) {
                warn!(link = %item.link, "Skipping invalid item {:?}: {}", item.title, reason);
                report.invalid += 1;
                continue;
            }
            report.accepted += 1;

            let hash = item.content_hash();
            let id = match store.insert(&item, &hash).await {
                Ok(Some(id)) => id,
                Ok(None) => continue,
                Err(e) => {
                    error!(link = %item.link, "Failed to store item: {}", e);
                    report.storage_errors += 1;
                    continue;
                }
            };

            report.new += 1;
            attempted.insert(id);
            debug!(link = %item.link, "New item {} stored", id);

            if self.deliver_and_mark(store, deliverer, destination, id, &item, &mut report).await {
                report.sent += 1;
            }
        }

        if self.redeliver_batch > 0 {
            self.redeliver(store, deliverer, destination, &attempted, &mut report).await;
        }

        info!("Ingest cycle finished: {}", report);
        report
    }

    /// Retry older rows that never made it to the sink.
    async fn redeliver(
        &self,
        store: &NewsStore,
        deliverer: &Deliverer,
        destination: &str,
        attempted: &HashSet<i64>,
        report: &mut CycleReport,
    ) {
        let pending = match store.unsent_batch(self.redeliver_batch).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Failed to load unsent items: {}", e);
                report.storage_errors += 1;
                return;
            }
        };

        for row in pending.iter().filter(|row| !attempted.contains(&row.id)) {
            let item = RawItem::from(row);
            if self.deliver_and_mark(store, deliverer, destination, row.id, &item, report).await {
                report.redelivered += 1;
            }
        }
    }

    async fn deliver_and_mark(
        &self,
        store: &NewsStore,
        deliverer: &Deliverer,
        destination: &str,
        id: i64,
        item: &RawItem,
        report: &mut CycleReport,
    ) -> bool {
        if !deliverer.deliver(destination, item).await {
            report.failed += 1;
            return false;
        }

        match store.mark_sent(id).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("Item {} was already marked sent", id);
                true
            }
            Err(e) => {
                error!(link = %item.link, "Delivered but failed to mark item {} sent: {}", id, e);
                report.storage_errors += 1;
                true
            }
        }
    }
}

/// Convenience for one-shot use from the CLI.
pub async fn run_once(
    pipeline: &IngestPipeline,
    store: &NewsStore,
    deliverer: &Deliverer,
    destination: &str,
) -> Result<CycleReport> {
    store.ping().await?;
    Ok(pipeline.run_cycle(store, deliverer, destination).await)
}
