//! Orchestrates one fetch-decode-validate-store cycle across feeds.
//!
//! Feeds are processed concurrently under a semaphore. Each feed runs in its
//! own task and fails on its own; one unreachable endpoint never takes the
//! cycle down. The only whole-cycle errors are bad input (unknown line or
//! feed id, caught before any network activity) and every attempted feed
//! failing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, warn};

use crate::fetch::{FetchError, FetchOptions, HttpClient, fetch_feed};
use crate::model::DecodedFeed;
use crate::output::append_record;
use crate::parser::{DecodeError, decode_feed};
use crate::registry::{FeedDescriptor, FeedRegistry, InputError};
use crate::stats::{RunRecord, Totals};
use crate::store::{FileStore, StoreError};
use crate::validate::{ValidationReport, Validator};

/// Which feeds one cycle should cover.
#[derive(Debug, Clone)]
pub enum FeedSelection {
    /// Line codes, resolved to the minimal covering feed set.
    Lines(Vec<String>),
    /// Explicit feed ids.
    Feeds(Vec<String>),
    /// Every feed in the registry.
    All,
}

/// Why one feed's cycle failed. Validation findings are not failures; they
/// ride along in the report.
#[derive(Debug, Error)]
pub enum FeedFailure {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// Per-feed result of one cycle.
#[derive(Debug)]
pub enum FeedOutcome {
    Success {
        decoded: DecodedFeed,
        report: ValidationReport,
    },
    Failed(FeedFailure),
    /// Not attempted because cancellation was requested first.
    Skipped,
}

/// Everything one cycle produced, keyed by feed id.
#[derive(Debug)]
pub struct AggregateResult {
    pub per_feed: BTreeMap<String, FeedOutcome>,
    pub totals: Totals,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("every attempted feed failed")]
    AllFeedsFailed { result: AggregateResult },
}

/// Knobs for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// In-flight feed cap.
    pub concurrency: usize,
    pub fetch: FetchOptions,
    /// Run-log directory; `None` disables the CSV record.
    pub csv_dir: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch: FetchOptions::default(),
            csv_dir: None,
        }
    }
}

pub struct Pipeline {
    registry: FeedRegistry,
    client: Arc<dyn HttpClient>,
    store: FileStore,
    validator: Arc<Validator>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        registry: FeedRegistry,
        client: Arc<dyn HttpClient>,
        store: FileStore,
        validator: Validator,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            client,
            store,
            validator: Arc::new(validator),
            options,
        }
    }

    /// Runs one full cycle over the selected feeds.
    pub async fn run(&self, selection: FeedSelection) -> Result<AggregateResult, PipelineError> {
        self.run_with_cancel(selection, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Runs one cycle, honoring a cancellation flag.
    ///
    /// Once the flag is set, feeds that have not started yet complete as
    /// [`FeedOutcome::Skipped`]. Feeds already in flight run to completion
    /// and their results are kept.
    pub async fn run_with_cancel(
        &self,
        selection: FeedSelection,
        cancel: Arc<AtomicBool>,
    ) -> Result<AggregateResult, PipelineError> {
        let feeds = self.resolve(&selection)?;
        info!(feed_count = feeds.len(), "starting collection cycle");

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = Vec::with_capacity(feeds.len());

        for feed in feeds {
            let sem = semaphore.clone();
            let cancel = cancel.clone();
            let client = self.client.clone();
            let store = self.store.clone();
            let validator = self.validator.clone();
            let fetch_options = self.options.fetch.clone();
            let csv_dir = self.options.csv_dir.clone();

            let feed_span = tracing::info_span!("process_feed", feed_id = %feed.id);
            let task = tokio::spawn(
                async move {
                    // The permit is intentionally taken before the cancel
                    // check so a flag set mid-cycle skips the whole queue.
                    let _permit = match sem.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return (feed.id, FeedOutcome::Skipped),
                    };
                    if cancel.load(Ordering::SeqCst) {
                        info!("cancelled before fetch, skipping");
                        return (feed.id.clone(), FeedOutcome::Skipped);
                    }

                    let outcome = process_feed(
                        client.as_ref(),
                        &store,
                        &validator,
                        &fetch_options,
                        csv_dir.as_deref(),
                        &feed,
                    )
                    .await;
                    (feed.id, outcome)
                }
                .instrument(feed_span),
            );
            tasks.push(task);
        }

        let mut per_feed = BTreeMap::new();
        for task in tasks {
            match task.await {
                Ok((feed_id, outcome)) => {
                    per_feed.insert(feed_id, outcome);
                }
                Err(e) => error!(error = %e, "feed task was aborted"),
            }
        }

        let mut totals = Totals::default();
        let mut succeeded = 0usize;
        for outcome in per_feed.values() {
            match outcome {
                FeedOutcome::Success { report, .. } => {
                    succeeded += 1;
                    totals.absorb(report);
                }
                FeedOutcome::Failed(_) => totals.feeds_failed += 1,
                FeedOutcome::Skipped => totals.feeds_skipped += 1,
            }
        }

        let result = AggregateResult { per_feed, totals };
        if succeeded == 0 && result.totals.feeds_failed > 0 {
            return Err(PipelineError::AllFeedsFailed { result });
        }

        info!(
            trips = result.totals.total_trips,
            vehicles = result.totals.total_vehicles,
            failed = result.totals.feeds_failed,
            skipped = result.totals.feeds_skipped,
            "collection cycle finished"
        );
        Ok(result)
    }

    fn resolve(&self, selection: &FeedSelection) -> Result<Vec<FeedDescriptor>, InputError> {
        let feeds = match selection {
            FeedSelection::Lines(lines) => self.registry.resolve_lines(lines)?,
            FeedSelection::Feeds(ids) => self.registry.resolve_feeds(ids)?,
            FeedSelection::All => self.registry.all().iter().collect(),
        };
        Ok(feeds.into_iter().cloned().collect())
    }
}

/// One feed's cycle: fetch, persist raw, decode, validate, persist parsed,
/// append the run log.
async fn process_feed(
    client: &dyn HttpClient,
    store: &FileStore,
    validator: &Validator,
    fetch_options: &FetchOptions,
    csv_dir: Option<&std::path::Path>,
    feed: &FeedDescriptor,
) -> FeedOutcome {
    let payload = match fetch_feed(client, feed, fetch_options).await {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "feed fetch failed");
            return FeedOutcome::Failed(e.into());
        }
    };

    if let Err(e) = store.save_raw(&feed.id, payload.fetched_at, &payload.bytes) {
        error!(error = %e, "raw snapshot write failed");
        return FeedOutcome::Failed(e.into());
    }

    let decoded = match decode_feed(&payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            error!(error = %e, "feed decode failed");
            return FeedOutcome::Failed(e.into());
        }
    };

    let report = validator.validate(&decoded, feed, Utc::now());
    if !report.is_valid {
        warn!(issues = report.issues.len(), "feed failed validation");
    }

    if let Err(e) = store.save_parsed(&feed.id, payload.fetched_at, &decoded, &report) {
        error!(error = %e, "parsed snapshot write failed");
        return FeedOutcome::Failed(e.into());
    }

    // The run log is an observability aid, never worth failing the feed.
    if let Some(dir) = csv_dir {
        let path = dir
            .join(format!("feed_id={}", feed.id))
            .join(format!("date={}.csv", payload.fetched_at.format("%Y-%m-%d")));
        let record = RunRecord::from_cycle(&payload, &report);
        if let Err(e) = append_record(&path, &record) {
            warn!(error = %e, path = %path.display(), "run log append failed");
        }
    }

    info!(
        trips = report.stats.trip_count,
        vehicles = report.stats.vehicle_count,
        valid = report.is_valid,
        "feed processed"
    );
    FeedOutcome::Success { decoded, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::mock::{MockClient, MockResponse};
    use crate::registry::FeedDescriptor;

    fn test_pipeline(script: Vec<MockResponse>, dir: &std::path::Path) -> Pipeline {
        let registry = FeedRegistry::from_descriptors(vec![FeedDescriptor {
            id: "l".to_string(),
            endpoint: "http://mock.test/gtfs-l".to_string(),
            lines: ["L".to_string()].into_iter().collect(),
        }]);
        Pipeline::new(
            registry,
            Arc::new(MockClient::new(script)),
            FileStore::new(dir).unwrap(),
            Validator::default(),
            PipelineOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_unknown_line_fails_before_any_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(vec![], dir.path());

        let err = pipeline
            .run(FeedSelection::Lines(vec!["X9".to_string()]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Input(InputError::UnknownLine(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_selection_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(vec![], dir.path());

        let err = pipeline
            .run(FeedSelection::Feeds(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Input(InputError::EmptySelection)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempted_feeds_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // Four attempts, all 500: retries exhaust and the only feed fails.
        let pipeline = test_pipeline(
            vec![
                MockResponse::Status(500, vec![]),
                MockResponse::Status(500, vec![]),
                MockResponse::Status(500, vec![]),
                MockResponse::Status(500, vec![]),
            ],
            dir.path(),
        );

        let err = pipeline.run(FeedSelection::All).await.unwrap_err();

        match err {
            PipelineError::AllFeedsFailed { result } => {
                assert_eq!(result.totals.feeds_failed, 1);
                assert!(matches!(
                    result.per_feed.get("l"),
                    Some(FeedOutcome::Failed(FeedFailure::Fetch(
                        FetchError::HttpStatus { status: 500 }
                    )))
                ));
            }
            other => panic!("expected AllFeedsFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(vec![], dir.path());
        let cancel = Arc::new(AtomicBool::new(true));

        let result = pipeline
            .run_with_cancel(FeedSelection::All, cancel)
            .await
            .unwrap();

        assert_eq!(result.totals.feeds_skipped, 1);
        assert_eq!(result.totals.feeds_failed, 0);
        assert!(matches!(
            result.per_feed.get("l"),
            Some(FeedOutcome::Skipped)
        ));
    }
}
