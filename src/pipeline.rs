//! Extract → transform → load orchestration.
//!
//! A [`Pipeline`] owns the CRM session, the upsert client and the dedup
//! strategy for the life of the process. [`Pipeline::run_cycle`] performs
//! one pass; [`Pipeline::run_loop`] repeats it on a fixed interval.
//!
//! # Cycle stages
//!
//! ```text
//! Idle → ReadingLedger → Extracting → Transforming → Loading → UpdatingLedger → Idle
//!                 └──────────────┴──────────────┴─────────┴───────────┴──→ Failed
//! ```
//!
//! A failure aborts the cycle at the stage it happened in. Nothing is
//! recorded as synced unless the upsert call succeeded, so a rejected batch
//! leaves the ledger file exactly as it was.

use anyhow::Result;
use chrono::{Local, Utc};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::crm::{KnowledgeSource, SalesforceClient};
use crate::dedup::Dedup;
use crate::models::CycleReport;
use crate::transform::transform_all;
use crate::upsert::{DocumentSink, UpsertClient, UpsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReadingLedger,
    Extracting,
    Transforming,
    Loading,
    UpdatingLedger,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::ReadingLedger => "reading ledger",
            Stage::Extracting => "extracting",
            Stage::Transforming => "transforming",
            Stage::Loading => "loading",
            Stage::UpdatingLedger => "updating ledger",
        };
        f.write_str(name)
    }
}

/// A failed cycle and the stage it failed in.
#[derive(Debug)]
pub struct CycleError {
    pub stage: Stage,
    pub cause: anyhow::Error,
}

impl CycleError {
    fn at(stage: Stage) -> impl FnOnce(anyhow::Error) -> CycleError {
        move |cause| CycleError { stage, cause }
    }
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cycle failed while {}: {:#}", self.stage, self.cause)
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Counts from a dry run: nothing is upserted or recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DryRunReport {
    pub extracted: usize,
    pub skipped: usize,
    pub would_submit: usize,
}

pub struct Pipeline {
    source: Box<dyn KnowledgeSource>,
    sink: Box<dyn DocumentSink>,
    dedup: Dedup,
    results_log: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(source: Box<dyn KnowledgeSource>, sink: Box<dyn DocumentSink>, dedup: Dedup) -> Self {
        Self {
            source,
            sink,
            dedup,
            results_log: None,
        }
    }

    /// Build the production pipeline: Salesforce source, HTTP upsert sink,
    /// and the configured dedup strategy.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = SalesforceClient::new(&config.crm)?;
        let sink = UpsertClient::new(&config.upsert)?;
        let dedup = Dedup::from_config(&config.pipeline);
        Ok(Self::new(Box::new(source), Box::new(sink), dedup)
            .with_results_log(config.pipeline.results_log.clone()))
    }

    /// Append a line per cycle to this file.
    pub fn with_results_log(mut self, path: Option<PathBuf>) -> Self {
        self.results_log = path;
        self
    }

    pub fn dedup(&self) -> &Dedup {
        &self.dedup
    }

    /// Run one full cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("cycle", id = %cycle_id, dedup = self.dedup.name());
        self.cycle(cycle_id).instrument(span).await
    }

    async fn cycle(&mut self, cycle_id: String) -> Result<CycleReport, CycleError> {
        let started_at = Utc::now();

        tracing::debug!(stage = %Stage::ReadingLedger);
        let state = self
            .dedup
            .prepare()
            .map_err(CycleError::at(Stage::ReadingLedger))?;

        tracing::debug!(stage = %Stage::Extracting);
        let records = self
            .source
            .fetch_online()
            .await
            .map_err(CycleError::at(Stage::Extracting))?;
        tracing::info!(extracted = records.len(), "extracted online articles");

        tracing::debug!(stage = %Stage::Transforming);
        let (documents, record_ids) = transform_all(&records, |r| state.should_skip(r));
        let skipped = records.len() - documents.len();
        tracing::info!(
            documents = documents.len(),
            skipped,
            "transformed articles"
        );

        tracing::debug!(stage = %Stage::Loading);
        let outcome = self
            .sink
            .upsert(&documents)
            .await
            .map_err(|e| CycleError::at(Stage::Loading)(e.into()))?;

        let (loaded, flag_failures) = match outcome {
            UpsertOutcome::NothingToDo => {
                tracing::info!("no new articles to sync");
                (0, 0)
            }
            UpsertOutcome::Upserted(ids) => {
                tracing::debug!(stage = %Stage::UpdatingLedger);
                let summary = self
                    .dedup
                    .record(state, &record_ids, &ids, self.source.as_mut())
                    .await
                    .map_err(CycleError::at(Stage::UpdatingLedger))?;
                (ids.len(), summary.failed)
            }
        };

        let report = CycleReport {
            cycle_id,
            extracted: records.len(),
            skipped,
            submitted: documents.len(),
            loaded,
            flag_failures,
            started_at,
            finished_at: Utc::now(),
        };

        self.append_results_log(&report);
        Ok(report)
    }

    /// Extract and transform without upserting or recording anything.
    pub async fn dry_run(&mut self) -> Result<DryRunReport> {
        let state = self.dedup.prepare()?;
        let records = self.source.fetch_online().await?;
        let (documents, _) = transform_all(&records, |r| state.should_skip(r));
        Ok(DryRunReport {
            extracted: records.len(),
            skipped: records.len() - documents.len(),
            would_submit: documents.len(),
        })
    }

    /// Run a cycle, sleep `interval`, repeat until `shutdown` resolves.
    ///
    /// Failed cycles are logged and the next one starts one interval later,
    /// with no backoff.
    pub async fn run_loop<F>(&mut self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            match self.run_cycle().await {
                Ok(report) => log_report(&report),
                Err(e) => tracing::error!(stage = %e.stage, error = %e, "cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, leaving sync loop");
                    return;
                }
            }
        }
    }

    fn append_results_log(&self, report: &CycleReport) {
        let Some(path) = &self.results_log else {
            return;
        };
        let line = format!(
            "{} - Articles extracted: {}, Articles inserted: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            report.extracted,
            report.loaded
        );
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), error = %e, "could not append to results log");
        }
    }
}

/// Log a finished cycle at info level.
pub fn log_report(report: &CycleReport) {
    tracing::info!(
        cycle = %report.cycle_id,
        extracted = report.extracted,
        skipped = report.skipped,
        loaded = report.loaded,
        flag_failures = report.flag_failures,
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "cycle finished"
    );
}
