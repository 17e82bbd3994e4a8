// src/dispatch/mod.rs
//! Quota-aware dispatch across several upload identities that share one
//! channel but each carry their own daily upload quota.
//!
//! Identities are tried in configuration order. A quota failure marks the
//! identity exhausted for the rest of the local day (persisted immediately)
//! and moves on; any other failure, including a timeout, is counted in the
//! ledger's error column and also moves on. Nothing is retried within one
//! call, and nothing is retried across days automatically.

pub mod ledger;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::{date_key, Clock, SystemClock};
use crate::publish::{
    Artifact, DefaultQuotaClassifier, PublishClient, PublishError, QuotaClassifier, VideoMetadata,
};
pub use ledger::{
    IdentityRecord, JsonFileLedgerStore, LedgerError, LedgerStore, MemoryLedgerStore, QuotaLedger,
};

/// One pre-authenticated upload credential. The dispatcher never looks
/// inside `credential`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: u32,
    pub label: String,
    pub credential: PathBuf,
}

impl Identity {
    pub fn new(id: u32, credential: impl Into<PathBuf>) -> Self {
        Self {
            id,
            label: format!("account {id}"),
            credential: credential.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Upper bound on real attempts; defaults to the pool size.
    pub max_attempts: Option<usize>,
    /// Try identities even if today's ledger says they are exhausted or errored.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Published {
    pub video_id: String,
    pub identity: u32,
    pub attempts: usize,
}

impl Published {
    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no upload identities configured")]
    NoIdentities,
    #[error(
        "all identities exhausted, try again after rollover \
         (attempted {attempted:?}, skipped {skipped:?})"
    )]
    PoolExhausted { attempted: Vec<u32>, skipped: Vec<u32> },
    #[error("attempt limit reached after {attempts} attempt(s)")]
    AttemptLimitReached { attempts: usize },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DispatchError {
    /// Terminal "no quota left today" outcomes, as opposed to broken setup.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            DispatchError::PoolExhausted { .. } | DispatchError::AttemptLimitReached { .. }
        )
    }
}

/// Tunables from `[dispatch]`.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub attempt_timeout: Duration,
    pub error_skip_threshold: u32,
    pub min_uploads_per_identity: u32,
    pub max_uploads_per_identity: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(900),
            error_skip_threshold: 3,
            min_uploads_per_identity: 6,
            max_uploads_per_identity: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IdentityStatus {
    Available,
    Exhausted,
    Errored { errors: u32 },
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityStatus::Available => f.write_str("available"),
            IdentityStatus::Exhausted => f.write_str("exhausted"),
            IdentityStatus::Errored { errors } => write!(f, "errored ({errors} failures)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityReport {
    pub date: String,
    pub total: usize,
    pub available: usize,
    pub exhausted: usize,
    pub errored: usize,
    pub estimated_min_uploads: u32,
    pub estimated_max_uploads: u32,
    pub per_identity: Vec<(u32, IdentityStatus)>,
}

enum Outcome {
    Success(String),
    Quota(String),
    Failed(String),
}

pub struct QuotaAwareDispatcher {
    pool: Vec<Identity>,
    client: Arc<dyn PublishClient>,
    store: Arc<dyn LedgerStore>,
    classifier: Arc<dyn QuotaClassifier>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl QuotaAwareDispatcher {
    pub fn new(
        pool: Vec<Identity>,
        client: Arc<dyn PublishClient>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            pool,
            client,
            store,
            classifier: Arc::new(DefaultQuotaClassifier),
            clock: Arc::new(SystemClock),
            settings: DispatchSettings::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn QuotaClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn pool(&self) -> &[Identity] {
        &self.pool
    }

    /// Pool members marked exhausted on `day`. Records for identities
    /// outside the pool are ignored.
    fn exhausted_in_pool(&self, ledger: &QuotaLedger, day: &str) -> usize {
        self.pool
            .iter()
            .filter(|i| ledger.is_exhausted(day, i.id))
            .count()
    }

    /// Ledger reads and writes take a file lock, so they run on the
    /// blocking pool.
    async fn load_ledger(&self) -> Result<QuotaLedger, DispatchError> {
        let store = Arc::clone(&self.store);
        let ledger = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(LedgerError::from)??;
        Ok(ledger)
    }

    async fn update_ledger<F>(&self, mut f: F) -> Result<QuotaLedger, DispatchError>
    where
        F: FnMut(&mut QuotaLedger) + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let ledger = tokio::task::spawn_blocking(move || store.update(&mut f))
            .await
            .map_err(LedgerError::from)??;
        Ok(ledger)
    }

    fn status_of(&self, ledger: &QuotaLedger, day: &str, id: u32) -> IdentityStatus {
        if ledger.is_exhausted(day, id) {
            return IdentityStatus::Exhausted;
        }
        let errors = ledger.error_count(day, id);
        if errors >= self.settings.error_skip_threshold.max(1) {
            IdentityStatus::Errored { errors }
        } else {
            IdentityStatus::Available
        }
    }

    /// Publish through the first identity that accepts the upload.
    pub async fn publish(
        &self,
        artifact: &Artifact,
        metadata: &VideoMetadata,
        options: &PublishOptions,
    ) -> Result<Published, DispatchError> {
        if self.pool.is_empty() {
            error!(target: "dispatch", "no upload identities configured");
            return Err(DispatchError::NoIdentities);
        }

        let now = self.clock.now();
        let day = date_key(now.date_naive());
        let mut ledger = self.load_ledger().await?;
        let max_attempts = options.max_attempts.unwrap_or(self.pool.len());

        info!(
            target: "dispatch",
            pool = self.pool.len(),
            max_attempts,
            force = options.force,
            %day,
            "starting dispatch"
        );

        let mut attempts = 0usize;
        let mut attempted = Vec::new();
        let mut skipped = Vec::new();

        for identity in &self.pool {
            let status = self.status_of(&ledger, &day, identity.id);
            if status != IdentityStatus::Available && !options.force {
                info!(target: "dispatch", identity = identity.id, %status, "skipping identity");
                skipped.push(identity.id);
                continue;
            }

            if attempts >= max_attempts {
                warn!(target: "dispatch", attempts, "attempt limit reached");
                return Err(DispatchError::AttemptLimitReached { attempts });
            }
            attempts += 1;
            attempted.push(identity.id);

            info!(
                target: "dispatch",
                identity = identity.id,
                attempt = attempts,
                max_attempts,
                "attempting publish"
            );

            match self.attempt(identity, artifact, metadata).await {
                Outcome::Success(video_id) => {
                    metrics::counter!("dispatch_attempts_total", "outcome" => "success")
                        .increment(1);
                    info!(target: "dispatch", identity = identity.id, %video_id, "publish succeeded");
                    return Ok(Published {
                        video_id,
                        identity: identity.id,
                        attempts,
                    });
                }
                Outcome::Quota(msg) => {
                    metrics::counter!("dispatch_attempts_total", "outcome" => "quota").increment(1);
                    warn!(target: "dispatch", identity = identity.id, error = %msg, "quota exhausted");
                    let at = self.clock.now().naive_local();
                    let (id, key) = (identity.id, day.clone());
                    ledger = self
                        .update_ledger(move |l| {
                            l.mark_exhausted(&key, id, at);
                        })
                        .await?;
                    let exhausted = self.exhausted_in_pool(&ledger, &day);
                    metrics::gauge!("dispatch_exhausted_identities").set(exhausted as f64);
                }
                Outcome::Failed(msg) => {
                    metrics::counter!("dispatch_attempts_total", "outcome" => "error").increment(1);
                    error!(target: "dispatch", identity = identity.id, error = %msg, "publish failed");
                    let at = self.clock.now().naive_local();
                    let (id, key) = (identity.id, day.clone());
                    ledger = self
                        .update_ledger(move |l| {
                            l.record_error(&key, id, &msg, at);
                        })
                        .await?;
                }
            }
        }

        error!(
            target: "dispatch",
            ?attempted,
            ?skipped,
            "all identities exhausted, try again after rollover"
        );
        Err(DispatchError::PoolExhausted { attempted, skipped })
    }

    async fn attempt(
        &self,
        identity: &Identity,
        artifact: &Artifact,
        metadata: &VideoMetadata,
    ) -> Outcome {
        let call = self.client.attempt_publish(identity, artifact, metadata);
        match tokio::time::timeout(self.settings.attempt_timeout, call).await {
            Ok(Ok(id)) => Outcome::Success(id.0),
            Ok(Err(e)) if self.classifier.is_quota_error(&e) => Outcome::Quota(e.to_string()),
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => {
                metrics::counter!("dispatch_attempts_total", "outcome" => "timeout").increment(1);
                Outcome::Failed(
                    PublishError::Timeout(self.settings.attempt_timeout).to_string(),
                )
            }
        }
    }

    /// Read-only view of today's capacity. Never calls the publish client.
    pub fn estimate_remaining_capacity(&self) -> Result<CapacityReport, DispatchError> {
        let day = date_key(self.clock.today());
        let ledger = self.store.load()?;

        let per_identity: Vec<(u32, IdentityStatus)> = self
            .pool
            .iter()
            .map(|i| (i.id, self.status_of(&ledger, &day, i.id)))
            .collect();
        let count = |pred: fn(&IdentityStatus) -> bool| {
            per_identity.iter().filter(|(_, s)| pred(s)).count()
        };
        let available = count(|s| *s == IdentityStatus::Available);
        let exhausted = count(|s| *s == IdentityStatus::Exhausted);
        let errored = count(|s| matches!(s, IdentityStatus::Errored { .. }));

        Ok(CapacityReport {
            date: day,
            total: self.pool.len(),
            available,
            exhausted,
            errored,
            estimated_min_uploads: available as u32 * self.settings.min_uploads_per_identity,
            estimated_max_uploads: available as u32 * self.settings.max_uploads_per_identity,
            per_identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::publish::PublishedId;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct Script {
        calls: Mutex<Vec<u32>>,
        failures: Vec<(u32, PublishError)>,
    }

    #[async_trait]
    impl PublishClient for Script {
        async fn attempt_publish(
            &self,
            identity: &Identity,
            _artifact: &Artifact,
            _metadata: &VideoMetadata,
        ) -> Result<PublishedId, PublishError> {
            self.calls.lock().unwrap().push(identity.id);
            match self.failures.iter().find(|(id, _)| *id == identity.id) {
                Some((_, PublishError::Api { status, message })) => Err(PublishError::Api {
                    status: *status,
                    message: message.clone(),
                }),
                Some(_) => Err(PublishError::Other("unexpected".into())),
                None => Ok(PublishedId(format!("vid-{}", identity.id))),
            }
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()
    }

    fn dispatcher(client: Arc<Script>, store: Arc<MemoryLedgerStore>) -> QuotaAwareDispatcher {
        let pool = (1..=3).map(|i| Identity::new(i, format!("t{i}.json"))).collect();
        QuotaAwareDispatcher::new(pool, client, store).with_clock(Arc::new(FixedClock::on(day())))
    }

    fn quota(id: u32) -> (u32, PublishError) {
        (
            id,
            PublishError::Api {
                status: 403,
                message: "uploadLimitExceeded".into(),
            },
        )
    }

    fn fatal(id: u32) -> (u32, PublishError) {
        (
            id,
            PublishError::Api {
                status: 500,
                message: "backend error".into(),
            },
        )
    }

    #[tokio::test]
    async fn errored_identities_are_counted_not_exhausted() {
        let client = Arc::new(Script {
            calls: Mutex::new(Vec::new()),
            failures: vec![fatal(1)],
        });
        let store = Arc::new(MemoryLedgerStore::default());
        let d = dispatcher(client.clone(), store.clone());
        let out = d
            .publish(&Artifact::new("v.mp4"), &VideoMetadata::new("t"), &PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(out.identity, 2);
        let l = store.snapshot();
        let rec = l.record("2026-02-02", 1).unwrap();
        assert!(!rec.exhausted);
        assert_eq!(rec.errors, 1);
        assert!(rec.last_error.as_deref().unwrap().contains("backend error"));
    }

    #[tokio::test]
    async fn error_threshold_skips_identity() {
        let mut seed = QuotaLedger::default();
        let at = day().and_hms_opt(1, 0, 0).unwrap();
        for _ in 0..3 {
            seed.record_error("2026-02-02", 1, "x", at);
        }
        let client = Arc::new(Script {
            calls: Mutex::new(Vec::new()),
            failures: vec![],
        });
        let store = Arc::new(MemoryLedgerStore::new(seed));
        let d = dispatcher(client.clone(), store);
        let out = d
            .publish(&Artifact::new("v.mp4"), &VideoMetadata::new("t"), &PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(out.identity, 2);
        assert_eq!(*client.calls.lock().unwrap(), vec![2]);
        let cap = d.estimate_remaining_capacity().unwrap();
        assert_eq!(cap.errored, 1);
        assert_eq!(cap.available, 2);
    }

    #[tokio::test]
    async fn attempt_limit_stops_before_remaining_identities() {
        let client = Arc::new(Script {
            calls: Mutex::new(Vec::new()),
            failures: vec![quota(1), quota(2)],
        });
        let store = Arc::new(MemoryLedgerStore::default());
        let d = dispatcher(client.clone(), store.clone());
        let opts = PublishOptions {
            max_attempts: Some(2),
            force: false,
        };
        let err = d
            .publish(&Artifact::new("v.mp4"), &VideoMetadata::new("t"), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::AttemptLimitReached { attempts: 2 }));
        assert!(err.is_exhaustion());
        assert_eq!(*client.calls.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn force_retries_exhausted_identities() {
        let mut seed = QuotaLedger::default();
        seed.mark_exhausted("2026-02-02", 1, day().and_hms_opt(1, 0, 0).unwrap());
        let client = Arc::new(Script {
            calls: Mutex::new(Vec::new()),
            failures: vec![],
        });
        let d = dispatcher(client.clone(), Arc::new(MemoryLedgerStore::new(seed)));
        let opts = PublishOptions {
            max_attempts: None,
            force: true,
        };
        let out = d
            .publish(&Artifact::new("v.mp4"), &VideoMetadata::new("t"), &opts)
            .await
            .unwrap();
        assert_eq!(out.identity, 1);
    }

    #[tokio::test]
    async fn empty_pool_is_no_identities() {
        let client = Arc::new(Script {
            calls: Mutex::new(Vec::new()),
            failures: vec![],
        });
        let store = Arc::new(MemoryLedgerStore::default());
        let d = QuotaAwareDispatcher::new(Vec::new(), client, store);
        let err = d
            .publish(&Artifact::new("v.mp4"), &VideoMetadata::new("t"), &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoIdentities));
        assert!(!err.is_exhaustion());
    }

    #[test]
    fn exhausted_gauge_counts_pool_members_only() {
        let client = Arc::new(Script {
            calls: Mutex::new(Vec::new()),
            failures: vec![],
        });
        let d = dispatcher(client, Arc::new(MemoryLedgerStore::default()));
        let at = day().and_hms_opt(1, 0, 0).unwrap();
        let mut l = QuotaLedger::default();
        l.mark_exhausted("2026-02-02", 1, at);
        // retired account still in today's ledger
        l.mark_exhausted("2026-02-02", 9, at);
        l.mark_exhausted("2026-02-01", 2, at);
        assert_eq!(d.exhausted_in_pool(&l, "2026-02-02"), 1);
        assert_eq!(d.estimate_remaining_capacity().unwrap().exhausted, 0);
    }

    /// Records which threads touched the ledger.
    #[derive(Default)]
    struct ThreadLog {
        inner: MemoryLedgerStore,
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl LedgerStore for ThreadLog {
        fn load(&self) -> Result<QuotaLedger, LedgerError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.inner.load()
        }

        fn save(&self, ledger: &QuotaLedger) -> Result<(), LedgerError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.inner.save(ledger)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ledger_io_stays_off_the_runtime_thread() {
        let client = Arc::new(Script {
            calls: Mutex::new(Vec::new()),
            failures: vec![quota(1), fatal(2)],
        });
        let store = Arc::new(ThreadLog::default());
        let pool = (1..=3).map(|i| Identity::new(i, format!("t{i}.json"))).collect();
        let d = QuotaAwareDispatcher::new(pool, client, store.clone())
            .with_clock(Arc::new(FixedClock::on(day())));
        let out = d
            .publish(&Artifact::new("v.mp4"), &VideoMetadata::new("t"), &PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(out.identity, 3);

        let runtime_thread = std::thread::current().id();
        let threads = store.threads.lock().unwrap();
        // initial load, then a load+save per recorded failure
        assert_eq!(threads.len(), 5);
        assert!(threads.iter().all(|t| *t != runtime_thread));
        let l = store.inner.snapshot();
        assert!(l.is_exhausted("2026-02-02", 1));
        assert_eq!(l.error_count("2026-02-02", 2), 1);
    }
}
