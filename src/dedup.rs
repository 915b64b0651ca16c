//! Dedup strategies.
//!
//! One cycle asks its strategy two things: which extracted records to skip
//! before transformation, and how to remember the records that were just
//! upserted.
//!
//! | Strategy   | Skips when                              | After upsert                    |
//! |------------|-----------------------------------------|---------------------------------|
//! | `ledger`   | record id is a key in the ledger file   | ledger rewritten with new pairs |
//! | `crm_flag` | `retrievalAPISynced__c` is true         | one PATCH per record to the CRM |
//! | `none`     | never                                   | nothing                         |

use anyhow::{bail, Result};

use crate::config::{DedupMode, PipelineConfig};
use crate::crm::KnowledgeSource;
use crate::ledger::{Ledger, LedgerStore};
use crate::models::SourceRecord;

pub enum Dedup {
    Ledger(LedgerStore),
    CrmFlag,
    None,
}

/// Per-cycle dedup state, created by [`Dedup::prepare`].
pub enum DedupState {
    Ledger(Ledger),
    CrmFlag,
    None,
}

/// What [`Dedup::record`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordSummary {
    pub recorded: usize,
    pub failed: usize,
}

impl Dedup {
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.dedup {
            DedupMode::Ledger => Dedup::Ledger(LedgerStore::new(&config.ledger_path)),
            DedupMode::CrmFlag => Dedup::CrmFlag,
            DedupMode::None => Dedup::None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dedup::Ledger(_) => "ledger",
            Dedup::CrmFlag => "crm_flag",
            Dedup::None => "none",
        }
    }

    /// Load whatever this strategy needs for one cycle.
    pub fn prepare(&self) -> Result<DedupState> {
        Ok(match self {
            Dedup::Ledger(store) => DedupState::Ledger(store.load()?),
            Dedup::CrmFlag => DedupState::CrmFlag,
            Dedup::None => DedupState::None,
        })
    }

    /// Remember a successful upsert.
    ///
    /// `record_ids` and `external_ids` are index-aligned. For the ledger the
    /// whole file is rewritten once. For the CRM flag each record is patched
    /// separately; a failed patch is logged and counted, not propagated,
    /// since the documents are already upserted.
    pub async fn record(
        &self,
        state: DedupState,
        record_ids: &[String],
        external_ids: &[String],
        source: &mut dyn KnowledgeSource,
    ) -> Result<RecordSummary> {
        match (self, state) {
            (Dedup::Ledger(store), DedupState::Ledger(mut ledger)) => {
                ledger.extend_positional(record_ids, external_ids)?;
                store.save(&ledger)?;
                Ok(RecordSummary {
                    recorded: record_ids.len(),
                    failed: 0,
                })
            }
            (Dedup::CrmFlag, DedupState::CrmFlag) => {
                let mut summary = RecordSummary::default();
                for record_id in record_ids {
                    match source.mark_synced(record_id).await {
                        Ok(()) => summary.recorded += 1,
                        Err(e) => {
                            tracing::warn!(record_id = %record_id, error = %e, "failed to set synced flag");
                            summary.failed += 1;
                        }
                    }
                }
                Ok(summary)
            }
            (Dedup::None, DedupState::None) => Ok(RecordSummary::default()),
            (strategy, _) => bail!(
                "dedup state was not prepared by the '{}' strategy",
                strategy.name()
            ),
        }
    }
}

impl DedupState {
    pub fn should_skip(&self, record: &SourceRecord) -> bool {
        match self {
            DedupState::Ledger(ledger) => ledger.contains(&record.id),
            DedupState::CrmFlag => record.is_synced(),
            DedupState::None => false,
        }
    }
}
