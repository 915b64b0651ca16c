//! File-backed dedup ledger.
//!
//! Maps a CRM record id to the document id the upsert API assigned to it.
//! Stored as one flat JSON object, read at cycle start and rewritten in full
//! after a successful upsert.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// In-memory ledger snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeMap<String, String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.entries.contains_key(record_id)
    }

    pub fn get(&self, record_id: &str) -> Option<&str> {
        self.entries.get(record_id).map(String::as_str)
    }

    pub fn insert(&mut self, record_id: impl Into<String>, external_id: impl Into<String>) {
        self.entries.insert(record_id.into(), external_id.into());
    }

    /// Record a batch by pairing ids positionally.
    ///
    /// The two slices must be the same length; a mismatch means the upsert
    /// response cannot be trusted and nothing is recorded.
    pub fn extend_positional(&mut self, record_ids: &[String], external_ids: &[String]) -> Result<()> {
        if record_ids.len() != external_ids.len() {
            bail!(
                "cannot pair {} record ids with {} external ids",
                record_ids.len(),
                external_ids.len()
            );
        }
        for (record_id, external_id) in record_ids.iter().zip(external_ids) {
            self.insert(record_id.clone(), external_id.clone());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Location of the ledger file on disk.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the ledger. A missing file is an empty ledger; a file that
    /// exists but does not parse is an error and is left untouched.
    pub fn load(&self) -> Result<Ledger> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Ledger::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read ledger file: {}", self.path.display())
                })
            }
        };

        let entries: BTreeMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("Ledger file is corrupt: {}", self.path.display()))?;
        Ok(Ledger { entries })
    }

    /// Rewrite the whole ledger: write a sibling temp file, then rename it
    /// over the target.
    pub fn save(&self, ledger: &Ledger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string(&ledger.entries)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write ledger file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace ledger file: {}", self.path.display()))?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
