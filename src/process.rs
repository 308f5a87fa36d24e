use chrono::Local;

use crate::checkpoint::CheckpointStore;
use crate::config::{ScrapConfig, SearchConfig};
use crate::limiter::RateLimiter;
use crate::manifest::{load_manifest, WorkItem};
use crate::request::{
    ArtifactKind, FetchOutcome, Fetcher, HttpTransport, StorageLayout, Transport,
};
use crate::{info_time, Result};

/// Entry point of the `run` subcommand: works through the whole manifest once.
pub async fn process_site(config: &ScrapConfig) -> Result<()> {
    let start_time = Local::now();
    tracing::info!("Started scraping");

    let layout = StorageLayout::new(
        &config.storage.spectra_dir,
        &config.storage.structure_dir,
    );
    layout.create_dirs().await?;

    let limiter = RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit.window(),
    );
    let fetcher = Fetcher::new(HttpTransport::new(&config.source)?, limiter, layout);

    let formulae = CheckpointStore::open(&config.storage.done_formulae).await?;
    let records = CheckpointStore::open(&config.storage.done_ids).await?;
    for store in [&formulae, &records] {
        tracing::info!("{} already done in {}", store.len(), store.path().display());
    }
    let items = load_manifest(&config.storage.manifest).await?;

    let mut runner = Runner::new(fetcher, formulae, records, config.search.clone());
    let summary = runner.run(&items).await?;
    info_time!(start_time, "Done Scraping Data! {}", summary);

    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub already_done: usize,
    pub saved: usize,
    pub skipped: usize,
    pub not_found: usize,
}

impl RunSummary {
    fn count(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Saved => self.saved += 1,
            FetchOutcome::Skipped => self.skipped += 1,
            FetchOutcome::NotFound => self.not_found += 1,
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed: {}, already done: {}, saved: {}, on disk: {}, not found: {}",
            self.processed, self.already_done, self.saved, self.skipped, self.not_found
        )
    }
}

/// Drives the fetcher over the work list, one item at a time.
///
/// An item is checkpointed only after every artifact for it was attempted, so an
/// error leaves it unmarked and the next run starts it over.
pub struct Runner<T> {
    fetcher: Fetcher<T>,
    formulae: CheckpointStore,
    records: CheckpointStore,
    search: SearchConfig,
}

impl<T: Transport> Runner<T> {
    pub fn new(
        fetcher: Fetcher<T>,
        formulae: CheckpointStore,
        records: CheckpointStore,
        search: SearchConfig,
    ) -> Self {
        Self {
            fetcher,
            formulae,
            records,
            search,
        }
    }

    /// Processes every formula, then every raw record id, skipping checkpointed items.
    pub async fn run(&mut self, items: &[WorkItem]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let (formulae, records): (Vec<&WorkItem>, Vec<&WorkItem>) = items
            .iter()
            .partition(|item| matches!(item, WorkItem::Formula(_)));

        self.run_phase("formulas", &formulae, &mut summary).await?;
        self.run_phase("IDs", &records, &mut summary).await?;

        Ok(summary)
    }

    async fn run_phase(
        &mut self,
        label: &str,
        items: &[&WorkItem],
        summary: &mut RunSummary,
    ) -> Result<()> {
        let phase_start = Local::now();
        tracing::info!("Processing {} {label}...", items.len());

        for (n, item) in items.iter().enumerate() {
            if self.store(item).is_done(item.key()) {
                summary.already_done += 1;
                continue;
            }
            tracing::info!("[{}/{}] {item}", n + 1, items.len());
            self.process_item(item, summary).await?;

            self.store_mut(item).mark_done(item.key()).await?;
            summary.processed += 1;
        }

        info_time!(phase_start, "Done with {label}!");
        Ok(())
    }

    async fn process_item(&mut self, item: &WorkItem, summary: &mut RunSummary) -> Result<()> {
        match item {
            WorkItem::Formula(formula) => {
                let ids = self.fetcher.search_by_formula(formula, &self.search).await?;
                for id in ids {
                    self.fetch_record(&id, summary).await?;
                }
            }
            WorkItem::Record(id) => self.fetch_record(id, summary).await?,
        }
        Ok(())
    }

    async fn fetch_record(&mut self, record_id: &str, summary: &mut RunSummary) -> Result<()> {
        let outcome = self
            .fetcher
            .fetch_artifact(record_id, ArtifactKind::Structure)
            .await?;
        summary.count(outcome);

        for stype in &self.search.spectrum_types {
            let outcome = self
                .fetcher
                .fetch_artifact(record_id, ArtifactKind::Spectrum(*stype))
                .await?;
            summary.count(outcome);
        }
        Ok(())
    }

    fn store(&self, item: &WorkItem) -> &CheckpointStore {
        match item {
            WorkItem::Formula(_) => &self.formulae,
            WorkItem::Record(_) => &self.records,
        }
    }

    fn store_mut(&mut self, item: &WorkItem) -> &mut CheckpointStore {
        match item {
            WorkItem::Formula(_) => &mut self.formulae,
            WorkItem::Record(_) => &mut self.records,
        }
    }
}
