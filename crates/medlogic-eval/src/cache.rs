//! Evaluation cache
//!
//! Results are memoized under a [`LogicCacheKey`] of one of two shapes:
//!
//! - RULE: the criteria and arguments a rule was evaluated with
//! - DATA_ELEMENT: the data source and criteria of a raw read
//!
//! Each key carries an absolute expiration computed when the key is built.
//! Expiration is not part of key identity: two keys built at different
//! times for the same evaluation are equal.
//!
//! The cache guarantees a single computation per key at a time. Concurrent
//! requests for a key that is being computed block until the value is
//! ready. Entries are never served once the clock reaches their expiration.
//! Expired entries are swept out when new entries are inserted, at most
//! once per quarter of the map's size in insertions.

use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use medlogic_diagnostics::EvalResult;
use medlogic_model::LogicDataSource;
use medlogic_types::{LogicCriteria, LogicResult, PatientId, RuleArgs};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// What a cache entry memoizes
///
/// The patient is part of both shapes so that results for different
/// patients never share an entry. RULE keys also carry the registry
/// revision they were built against, so results of a replaced rule are
/// never served.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Rule {
        patient_id: PatientId,
        criteria: LogicCriteria,
        args: RuleArgs,
        revision: u64,
    },
    DataElement {
        patient_id: PatientId,
        source: String,
        criteria: LogicCriteria,
    },
}

/// Cache key with an absolute expiration
#[derive(Debug, Clone)]
pub struct LogicCacheKey {
    kind: KeyKind,
    expires: DateTime<Utc>,
}

impl LogicCacheKey {
    /// RULE key expiring `ttl` from now
    pub fn rule(
        patient_id: PatientId,
        criteria: LogicCriteria,
        args: RuleArgs,
        ttl: TimeDelta,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            kind: KeyKind::Rule {
                patient_id,
                criteria,
                args,
                revision: 0,
            },
            expires: expiry(clock.now(), ttl),
        }
    }

    /// Tie a RULE key to a registry revision; DATA_ELEMENT keys are unchanged
    pub fn at_revision(mut self, revision: u64) -> Self {
        if let KeyKind::Rule { revision: r, .. } = &mut self.kind {
            *r = revision;
        }
        self
    }

    /// DATA_ELEMENT key expiring after the source's default ttl
    pub fn data_element(
        patient_id: PatientId,
        source: &dyn LogicDataSource,
        criteria: LogicCriteria,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            kind: KeyKind::DataElement {
                patient_id,
                source: source.name().to_string(),
                criteria,
            },
            expires: expiry(clock.now(), source.default_ttl()),
        }
    }

    pub fn kind(&self) -> &KeyKind {
        &self.kind
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

/// `now + ttl`, saturating at the representable range
fn expiry(now: DateTime<Utc>, ttl: TimeDelta) -> DateTime<Utc> {
    match now.checked_add_signed(ttl) {
        Some(expires) => expires,
        None if ttl < TimeDelta::zero() => DateTime::<Utc>::MIN_UTC,
        None => DateTime::<Utc>::MAX_UTC,
    }
}

impl PartialEq for LogicCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for LogicCacheKey {}

impl Hash for LogicCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl fmt::Display for LogicCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            KeyKind::Rule {
                patient_id,
                criteria,
                ..
            } => write!(f, "RULE[{patient_id}:{criteria}]"),
            KeyKind::DataElement {
                patient_id,
                source,
                criteria,
            } => write!(f, "DATA_ELEMENT[{patient_id}:{source}:{criteria}]"),
        }
    }
}

struct Slot {
    expires: DateTime<Utc>,
    value: OnceCell<LogicResult>,
}

/// Slot map plus what the sweep needs to decide when to run
#[derive(Default)]
struct Slots {
    map: HashMap<KeyKind, Arc<Slot>>,
    /// Earliest expiration in `map`, when known
    earliest: Option<DateTime<Utc>>,
    inserts: usize,
}

impl Slots {
    fn insert(&mut self, now: DateTime<Utc>, kind: KeyKind, slot: Arc<Slot>) {
        if self.earliest.is_some_and(|e| e <= now) && self.inserts * 4 >= self.map.len() {
            let removed = self.sweep(now);
            debug!("Swept {removed} expired cache entries");
        }
        self.earliest = Some(self.earliest.map_or(slot.expires, |e| e.min(slot.expires)));
        self.inserts += 1;
        self.map.insert(kind, slot);
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.map.len();
        self.map.retain(|_, slot| now < slot.expires);
        self.earliest = self.map.values().map(|slot| slot.expires).min();
        self.inserts = 0;
        before - self.map.len()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Single-flight result cache
pub struct LogicCache {
    clock: Arc<dyn Clock>,
    slots: Mutex<Slots>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LogicCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slots: Mutex::new(Slots::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Live slot for the key, replacing a missing or expired one
    fn slot(&self, key: &LogicCacheKey) -> Arc<Slot> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        match slots.map.get(&key.kind) {
            Some(slot) if now < slot.expires => slot.clone(),
            _ => {
                let slot = Arc::new(Slot {
                    expires: key.expires,
                    value: OnceCell::new(),
                });
                slots.insert(now, key.kind.clone(), slot.clone());
                slot
            }
        }
    }

    /// Cached value for the key, computing it on a miss
    ///
    /// Errors from `compute` are returned to the caller and not cached; the
    /// next request for the key computes again.
    pub fn get_or_compute(
        &self,
        key: &LogicCacheKey,
        compute: impl FnOnce() -> EvalResult<LogicResult>,
    ) -> EvalResult<LogicResult> {
        let slot = self.slot(key);
        let mut computed = false;
        let value = slot.value.get_or_try_init(|| {
            computed = true;
            compute()
        })?;
        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache miss: {key}");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit: {key}");
        }
        Ok(value.clone())
    }

    /// Unexpired cached value, without computing
    pub fn get(&self, key: &LogicCacheKey) -> Option<LogicResult> {
        let now = self.clock.now();
        let slots = self.slots.lock();
        slots
            .map
            .get(&key.kind)
            .filter(|slot| now < slot.expires)
            .and_then(|slot| slot.value.get().cloned())
    }

    /// Drop the entry for a key; returns whether one was present
    pub fn invalidate(&self, key: &LogicCacheKey) -> bool {
        self.slots.lock().map.remove(&key.kind).is_some()
    }

    /// Drop every entry for a patient
    pub fn invalidate_patient(&self, id: PatientId) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.map.len();
        slots.map.retain(|kind, _| match kind {
            KeyKind::Rule { patient_id, .. } | KeyKind::DataElement { patient_id, .. } => {
                *patient_id != id
            }
        });
        before - slots.map.len()
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        debug!("Clearing {} cache entries", slots.map.len());
        slots.clear();
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.slots.lock().sweep(now)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().map.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl fmt::Debug for LogicCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
