// src/dispatch/ledger.rs
//! Per-day quota ledger: `YYYY-MM-DD -> identity id -> IdentityRecord`.
//!
//! Entries for a date are only ever added or escalated. An identity with no
//! record for today is available. The on-disk format stays readable by the
//! older tracking file (`{"2026-01-14": {"3": {"exhausted": true, ...}}}`).

use chrono::NaiveDateTime;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const DEFAULT_LEDGER_PATH: &str = "data/youtube_quota_tracking.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },
    #[error("ledger task did not finish: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LedgerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhausted_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errors: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<NaiveDateTime>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl IdentityRecord {
    /// Combine two observations of the same day; never de-escalates.
    fn absorb(&mut self, other: &IdentityRecord) {
        if other.exhausted && !self.exhausted {
            self.exhausted = true;
            self.exhausted_at = other.exhausted_at;
        }
        if other.errors > self.errors {
            self.errors = other.errors;
            self.last_error = other.last_error.clone();
            self.last_error_at = other.last_error_at;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaLedger(pub BTreeMap<String, BTreeMap<u32, IdentityRecord>>);

impl QuotaLedger {
    pub fn record(&self, day: &str, id: u32) -> Option<&IdentityRecord> {
        self.0.get(day)?.get(&id)
    }

    pub fn is_exhausted(&self, day: &str, id: u32) -> bool {
        self.record(day, id).is_some_and(|r| r.exhausted)
    }

    pub fn error_count(&self, day: &str, id: u32) -> u32 {
        self.record(day, id).map(|r| r.errors).unwrap_or(0)
    }

    pub fn day(&self, day: &str) -> Option<&BTreeMap<u32, IdentityRecord>> {
        self.0.get(day)
    }

    fn entry(&mut self, day: &str, id: u32) -> &mut IdentityRecord {
        self.0
            .entry(day.to_string())
            .or_default()
            .entry(id)
            .or_default()
    }

    /// Returns `true` when this call changed the record.
    pub fn mark_exhausted(&mut self, day: &str, id: u32, at: NaiveDateTime) -> bool {
        let r = self.entry(day, id);
        if r.exhausted {
            return false;
        }
        r.exhausted = true;
        r.exhausted_at = Some(at);
        true
    }

    pub fn record_error(&mut self, day: &str, id: u32, message: &str, at: NaiveDateTime) -> u32 {
        let r = self.entry(day, id);
        r.errors = r.errors.saturating_add(1);
        r.last_error = Some(message.to_string());
        r.last_error_at = Some(at);
        r.errors
    }

    /// Union of two ledgers, escalating per record.
    pub fn merge(&mut self, other: &QuotaLedger) {
        for (day, ids) in &other.0 {
            for (id, rec) in ids {
                self.entry(day, *id).absorb(rec);
            }
        }
    }
}

/// Persistence seam for the ledger. `update` is the only way the dispatcher
/// writes; file-backed stores run it as one locked read-modify-write.
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> Result<QuotaLedger, LedgerError>;

    fn save(&self, ledger: &QuotaLedger) -> Result<(), LedgerError>;

    /// Apply `f` to the freshest ledger and persist it; returns the result.
    fn update(&self, f: &mut dyn FnMut(&mut QuotaLedger)) -> Result<QuotaLedger, LedgerError> {
        let mut ledger = self.load()?;
        f(&mut ledger);
        self.save(&ledger)?;
        Ok(ledger)
    }
}

/* ----------------------------
JSON file store
---------------------------- */

/// JSON ledger guarded by an advisory `flock` on `<ledger>.lock`.
/// Writes go through a temp file and `rename`, so readers never see a
/// half-written ledger.
#[derive(Debug, Clone)]
pub struct JsonFileLedgerStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock = path.clone().into_os_string();
        lock.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<(), LedgerError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| LedgerError::io(dir, e))?;
        }
        Ok(())
    }

    fn lock(&self, arg: FlockArg) -> Result<Flock<File>, LedgerError> {
        self.ensure_parent()?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| LedgerError::io(&self.lock_path, e))?;
        Flock::lock(file, arg).map_err(|(_, errno)| LedgerError::Lock {
            path: self.lock_path.clone(),
            source: errno,
        })
    }

    fn read_unlocked(&self) -> Result<QuotaLedger, LedgerError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(QuotaLedger::default()),
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };
        if data.trim().is_empty() {
            return Ok(QuotaLedger::default());
        }
        serde_json::from_str(&data).map_err(|source| LedgerError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_unlocked(&self, ledger: &QuotaLedger) -> Result<(), LedgerError> {
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(ledger).map_err(|source| LedgerError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let mut f = File::create(&tmp).map_err(|e| LedgerError::io(&tmp, e))?;
        f.write_all(json.as_bytes())
            .and_then(|_| f.sync_all())
            .map_err(|e| LedgerError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| LedgerError::io(&self.path, e))
    }
}

impl LedgerStore for JsonFileLedgerStore {
    fn load(&self) -> Result<QuotaLedger, LedgerError> {
        let _guard = self.lock(FlockArg::LockShared)?;
        self.read_unlocked()
    }

    /// Merges into whatever is on disk so a stale snapshot cannot erase
    /// records another process wrote in the meantime.
    fn save(&self, ledger: &QuotaLedger) -> Result<(), LedgerError> {
        let _guard = self.lock(FlockArg::LockExclusive)?;
        let mut current = self.read_unlocked()?;
        current.merge(ledger);
        self.write_unlocked(&current)
    }

    fn update(&self, f: &mut dyn FnMut(&mut QuotaLedger)) -> Result<QuotaLedger, LedgerError> {
        let _guard = self.lock(FlockArg::LockExclusive)?;
        let mut ledger = self.read_unlocked()?;
        f(&mut ledger);
        self.write_unlocked(&ledger)?;
        Ok(ledger)
    }
}

/* ----------------------------
In-memory store
---------------------------- */

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<QuotaLedger>,
}

impl MemoryLedgerStore {
    pub fn new(seed: QuotaLedger) -> Self {
        Self {
            inner: Mutex::new(seed),
        }
    }

    pub fn snapshot(&self) -> QuotaLedger {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<QuotaLedger, LedgerError> {
        Ok(self.snapshot())
    }

    fn save(&self, ledger: &QuotaLedger) -> Result<(), LedgerError> {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner()) = ledger.clone();
        Ok(())
    }

    fn update(&self, f: &mut dyn FnMut(&mut QuotaLedger)) -> Result<QuotaLedger, LedgerError> {
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut g);
        Ok(g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 14)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn reads_legacy_tracking_format() {
        let raw = r#"{
          "2026-01-14": {
            "1": {"exhausted": true, "exhausted_at": "2026-01-14T09:12:44.123456"},
            "3": {"exhausted": false}
          }
        }"#;
        let l: QuotaLedger = serde_json::from_str(raw).unwrap();
        assert!(l.is_exhausted("2026-01-14", 1));
        assert!(!l.is_exhausted("2026-01-14", 3));
        assert!(!l.is_exhausted("2026-01-14", 2));
        assert!(!l.is_exhausted("2026-01-15", 1));
    }

    #[test]
    fn marks_escalate_and_never_reset() {
        let mut l = QuotaLedger::default();
        assert!(l.mark_exhausted("2026-01-14", 2, ts(8)));
        assert!(!l.mark_exhausted("2026-01-14", 2, ts(9)));
        assert_eq!(l.record("2026-01-14", 2).unwrap().exhausted_at, Some(ts(8)));
        assert_eq!(l.record_error("2026-01-14", 2, "boom", ts(10)), 1);
        assert!(l.is_exhausted("2026-01-14", 2));
    }

    #[test]
    fn merge_keeps_the_stronger_record() {
        let mut a = QuotaLedger::default();
        a.record_error("d", 1, "x", ts(1));
        a.record_error("d", 1, "y", ts(2));
        let mut b = QuotaLedger::default();
        b.mark_exhausted("d", 1, ts(3));
        b.record_error("d", 1, "z", ts(4));
        b.mark_exhausted("d", 2, ts(5));

        a.merge(&b);
        let r = a.record("d", 1).unwrap();
        assert!(r.exhausted);
        assert_eq!(r.errors, 2);
        assert_eq!(r.last_error.as_deref(), Some("y"));
        assert!(a.is_exhausted("d", 2));
    }

    #[test]
    fn file_store_round_trips_under_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("quota.json");
        let store = JsonFileLedgerStore::new(&path);

        assert_eq!(store.load().unwrap(), QuotaLedger::default());
        store
            .update(&mut |l| {
                l.mark_exhausted("2026-01-14", 4, ts(7));
            })
            .unwrap();
        assert!(path.exists());
        assert!(tmp.path().join("nested").join("quota.json.lock").exists());

        // a stale snapshot saved later does not erase the record
        store.save(&QuotaLedger::default()).unwrap();
        assert!(store.load().unwrap().is_exhausted("2026-01-14", 4));
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_ledger() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("quota.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonFileLedgerStore::new(&path).load().unwrap_err();
        assert!(matches!(err, LedgerError::Parse { .. }));
    }
}
