//! Evaluation context shared by every rule evaluation
//!
//! Rules reach data through [`LogicContext::read`] and other rules through
//! [`LogicContext::eval`]. A rule that ends up evaluating itself for the
//! same patient on the same thread fails with [`LogicError::InvalidToken`]
//! naming the chain of tokens.

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use log::debug;
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_model::{LogicDataSource, ReadRequest};
use medlogic_types::{LogicCriteria, LogicResult, Patient, PatientId, TrueConcept};
use parking_lot::RwLock;
use std::cell::RefCell;
use std::sync::Arc;

use crate::cache::{Clock, LogicCache, LogicCacheKey};
use crate::registry::RuleRegistry;
use crate::rule::RuleRef;
use crate::rules::{REFERENCE_PREFIX, ReferenceRule};

thread_local! {
    static EVALUATING: RefCell<Vec<(PatientId, String)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a token as being evaluated for a patient on this thread
struct Evaluating;

impl Evaluating {
    fn enter(patient_id: PatientId, token: &str) -> EvalResult<Self> {
        EVALUATING.with_borrow_mut(|stack| {
            if let Some(pos) = stack
                .iter()
                .position(|(p, t)| *p == patient_id && t == token)
            {
                let chain: Vec<&str> = stack[pos..]
                    .iter()
                    .map(|(_, t)| t.as_str())
                    .chain([token])
                    .collect();
                return Err(LogicError::invalid_token(
                    token,
                    format!("circular dependency: {}", chain.join(" -> ")),
                ));
            }
            stack.push((patient_id, token.to_string()));
            Ok(Evaluating)
        })
    }
}

impl Drop for Evaluating {
    fn drop(&mut self) {
        EVALUATING.with_borrow_mut(|stack| {
            stack.pop();
        });
    }
}

/// Registry, data sources, cache, clock and index date used while
/// evaluating rules
pub struct LogicContext {
    registry: Arc<RuleRegistry>,
    data_sources: RwLock<IndexMap<String, Arc<dyn LogicDataSource>>>,
    cache: LogicCache,
    clock: Arc<dyn Clock>,
    index_date: RwLock<Option<DateTime<Utc>>>,
    true_concept: TrueConcept,
    cache_enabled: bool,
    rule_ttl: TimeDelta,
}

impl LogicContext {
    pub fn new(registry: Arc<RuleRegistry>, clock: Arc<dyn Clock>, true_concept: TrueConcept) -> Self {
        Self {
            registry,
            data_sources: RwLock::new(IndexMap::new()),
            cache: LogicCache::new(clock.clone()),
            clock,
            index_date: RwLock::new(None),
            true_concept,
            cache_enabled: true,
            rule_ttl: TimeDelta::minutes(30),
        }
    }

    /// Cache lifetime of results of rules that do not declare one
    pub fn with_rule_ttl(mut self, ttl: TimeDelta) -> Self {
        self.rule_ttl = ttl;
        self
    }

    /// Enable or disable memoization of reads and rule results
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &LogicCache {
        &self.cache
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn true_concept(&self) -> &TrueConcept {
        &self.true_concept
    }

    /// Register a data source under its name, replacing any previous one
    pub fn register_data_source(&self, source: Arc<dyn LogicDataSource>) {
        let name = source.name().to_string();
        debug!("Registering data source '{name}'");
        if self.data_sources.write().insert(name, source).is_some() {
            // Cached reads may come from the replaced source
            self.cache.clear();
        }
    }

    /// Unregister a data source and drop everything cached from it
    pub fn remove_data_source(&self, name: &str) -> EvalResult<Arc<dyn LogicDataSource>> {
        let source = self
            .data_sources
            .write()
            .shift_remove(name)
            .ok_or_else(|| LogicError::data_source_not_found(name))?;
        debug!("Removed data source '{name}'");
        self.cache.clear();
        Ok(source)
    }

    pub fn data_source(&self, name: &str) -> EvalResult<Arc<dyn LogicDataSource>> {
        self.data_sources
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LogicError::data_source_not_found(name))
    }

    pub fn has_data_source(&self, name: &str) -> bool {
        self.data_sources.read().contains_key(name)
    }

    /// Names of the registered data sources, in registration order
    pub fn data_sources(&self) -> Vec<String> {
        self.data_sources.read().keys().cloned().collect()
    }

    /// Instant evaluations are relative to: the configured index date, or now
    pub fn index_date(&self) -> DateTime<Utc> {
        (*self.index_date.read()).unwrap_or_else(|| self.clock.now())
    }

    /// Fix the index date, or follow the clock with `None`
    ///
    /// Cached results were computed against the previous index date and are
    /// dropped.
    pub fn set_index_date(&self, date: Option<DateTime<Utc>>) {
        *self.index_date.write() = date;
        self.cache.clear();
    }

    /// Rule for a token; reference tokens must name a registered data source
    pub fn rule(&self, token: &str) -> EvalResult<RuleRef> {
        if token.starts_with(REFERENCE_PREFIX) {
            let rule = ReferenceRule::parse(token)?;
            if !self.has_data_source(rule.source()) {
                return Err(LogicError::data_source_not_found(rule.source()));
            }
            return Ok(Arc::new(rule));
        }
        self.registry.get_rule(token)
    }

    /// Evaluate the criteria's token with its parameters, then narrow and
    /// aggregate the result as the criteria say
    ///
    /// Results are memoized as RULE entries tied to the current registry
    /// revision.
    pub fn eval(&self, patient: &Patient, criteria: &LogicCriteria) -> EvalResult<LogicResult> {
        let revision = self.registry.revision();
        let rule = self.rule(criteria.token())?;
        let args = criteria.parameters();
        rule.validate_args(args)?;

        let _evaluating = Evaluating::enter(patient.id, criteria.token())?;
        let compute = || {
            let raw = rule.eval(self, patient, args)?;
            if criteria.is_plain() {
                Ok(raw)
            } else {
                criteria.apply(&raw, self.index_date())
            }
        };

        if !self.cache_enabled {
            return compute();
        }
        let ttl = rule.ttl().unwrap_or(self.rule_ttl);
        let key = LogicCacheKey::rule(patient.id, criteria.clone(), args.clone(), ttl, self.clock())
            .at_revision(revision);
        self.cache.get_or_compute(&key, compute)
    }

    /// Read `key` from a data source, memoized as a DATA_ELEMENT entry
    pub fn read(
        &self,
        source_name: &str,
        patient: &Patient,
        key: &str,
        criteria: Option<&LogicCriteria>,
    ) -> EvalResult<LogicResult> {
        let source = self.data_source(source_name)?;
        let request = ReadRequest::new(patient, key, self.index_date()).with_criteria(criteria);
        if !self.cache_enabled {
            return source.read(&request);
        }

        let element = criteria
            .cloned()
            .unwrap_or_else(|| LogicCriteria::new(key))
            .with_token(key);
        let cache_key = LogicCacheKey::data_element(patient.id, source.as_ref(), element, self.clock());
        self.cache.get_or_compute(&cache_key, || source.read(&request))
    }
}

impl std::fmt::Debug for LogicContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicContext")
            .field("data_sources", &self.data_sources())
            .field("index_date", &*self.index_date.read())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
