//! Persistent cooldown ledger.
//!
//! The ledger maps a rule [`Fingerprint`] to the epoch-millisecond instant
//! after which the rule may notify again. It is stored as a flat JSON
//! object and rewritten wholesale, through a temp file and rename, every
//! time a cooldown is recorded.

use crate::error::{AlertError, Result};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use watchpost_common::fingerprint::Fingerprint;
use watchpost_common::types::Rule;

/// In-memory view of the ledger file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CooldownLedger {
    entries: BTreeMap<Fingerprint, i64>,
}

/// Ledger values as found on disk. Older ledgers may hold fractional
/// millis from fractional cooldown hours.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredMillis {
    Integer(i64),
    Fractional(f64),
}

impl<'de> Deserialize<'de> for CooldownLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = BTreeMap::<Fingerprint, StoredMillis>::deserialize(deserializer)?;
        let mut entries = BTreeMap::new();
        for (fingerprint, millis) in stored {
            let millis = match millis {
                StoredMillis::Integer(millis) => millis,
                StoredMillis::Fractional(millis) if millis.is_finite() => {
                    let rounded = millis.round() as i64;
                    tracing::debug!(
                        fingerprint = %fingerprint,
                        stored = millis,
                        rounded,
                        "Rounded fractional cooldown instant"
                    );
                    rounded
                }
                StoredMillis::Fractional(millis) => {
                    return Err(D::Error::custom(format!(
                        "cooldown instant for {fingerprint} is not finite: {millis}"
                    )));
                }
            };
            entries.insert(fingerprint, millis);
        }
        Ok(Self { entries })
    }
}

impl CooldownLedger {
    /// True iff `fingerprint` was never notified or its cooldown ended
    /// strictly before `now`.
    pub fn is_eligible(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> bool {
        match self.entries.get(fingerprint) {
            None => true,
            Some(until) => *until < now.timestamp_millis(),
        }
    }

    /// Epoch millis at which `fingerprint` becomes eligible again.
    pub fn eligible_again_at(&self, fingerprint: &Fingerprint) -> Option<i64> {
        self.entries.get(fingerprint).copied()
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, eligible_again_at: i64) {
        self.entries.insert(fingerprint, eligible_again_at);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &i64)> {
        self.entries.iter()
    }
}

/// Reads the ledger at `path`. A missing file is an empty ledger.
///
/// # Errors
///
/// Any other I/O failure or a document that is not a map of fingerprint
/// to epoch millis is returned and must abort the cycle.
pub fn load(path: &Path) -> Result<CooldownLedger> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No cooldown ledger yet, starting empty");
            return Ok(CooldownLedger::default());
        }
        Err(source) => {
            return Err(AlertError::LedgerRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if content.trim().is_empty() {
        return Ok(CooldownLedger::default());
    }

    serde_json::from_str(&content).map_err(|source| AlertError::LedgerCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Ledger plus the file it is persisted to.
pub struct CooldownStore {
    path: PathBuf,
    ledger: CooldownLedger,
    dirty: bool,
}

impl CooldownStore {
    /// Loads the ledger once for a cycle. See [`load`] for error semantics.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = load(&path)?;
        tracing::debug!(path = %path.display(), entries = ledger.len(), "Cooldown ledger loaded");
        Ok(Self {
            path,
            ledger,
            dirty: false,
        })
    }

    /// Replaces whatever is at `path` with an empty ledger without reading
    /// it first, so a corrupt or unreadable ledger can still be cleared.
    pub fn reset(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            path: path.into(),
            ledger: CooldownLedger::default(),
            dirty: true,
        };
        store.persist()?;
        tracing::info!(path = %store.path.display(), "Cooldown ledger reset");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&self) -> &CooldownLedger {
        &self.ledger
    }

    pub fn is_eligible(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> bool {
        self.ledger.is_eligible(fingerprint, now)
    }

    /// Starts a cooldown of `rule.cooldown_hours` for `fingerprint` and
    /// persists the whole ledger.
    ///
    /// Returns `Ok(false)` without touching the ledger while an existing
    /// cooldown is still running, so a rule that stays satisfied never
    /// extends its own cooldown.
    ///
    /// # Errors
    ///
    /// [`AlertError::Configuration`] for an invalid cooldown length, and
    /// [`AlertError::LedgerWrite`] when persisting fails. In the latter
    /// case the entry stays in memory and is written by the next
    /// successful persist or [`CooldownStore::flush`].
    pub fn record_cooldown(
        &mut self,
        fingerprint: &Fingerprint,
        rule: &Rule,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !self.ledger.is_eligible(fingerprint, now) {
            return Ok(false);
        }

        let cooldown_ms = rule.cooldown_millis().ok_or_else(|| {
            AlertError::Configuration(format!(
                "cooldown_hours must be a non-negative number, got {}",
                rule.cooldown_hours
            ))
        })?;
        let until = now.timestamp_millis().saturating_add(cooldown_ms);

        self.ledger.insert(fingerprint.clone(), until);
        self.dirty = true;
        tracing::info!(
            fingerprint = %fingerprint,
            url = %rule.url,
            eligible_again_at = until,
            "Cooldown recorded"
        );

        self.persist()?;
        Ok(true)
    }

    /// Clears every cooldown and persists the empty ledger.
    pub fn invalidate_all(&mut self) -> Result<()> {
        let cleared = self.ledger.len();
        self.ledger.clear();
        self.dirty = true;
        self.persist()?;
        tracing::info!(path = %self.path.display(), cleared, "Cooldown ledger reset");
        Ok(())
    }

    /// Whether a previous persist failed and entries await writing.
    pub fn has_pending_writes(&self) -> bool {
        self.dirty
    }

    /// Persists the ledger if an earlier write failed.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        write_atomic(&self.path, &self.ledger).map_err(|source| AlertError::LedgerWrite {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }
}

fn write_atomic(path: &Path, ledger: &CooldownLedger) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(ledger).map_err(std::io::Error::other)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
