//! Logic service facade
//!
//! [`LogicService`] ties the registry, the evaluation context and the cache
//! together. A request goes caller -> service -> registry (token to rule) ->
//! cache (RULE key) -> rule -> data source (DATA_ELEMENT key).

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, error};
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_model::{ConceptDictionary, ConceptSource, LogicDataSource};
use medlogic_types::{
    Cohort, Concept, LogicCriteria, LogicResult, Patient, PatientId, RuleArgs, TrueConcept,
};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::{CacheStats, Clock, SystemClock};
use crate::config::LogicConfig;
use crate::context::LogicContext;
use crate::registry::{RegistrySeed, RuleRegistry};
use crate::rule::{Rule, RuleRef};
use crate::rules::ConceptRule;

/// Results of one patient, by token in request order
pub type PatientResults = IndexMap<String, LogicResult>;

/// A single isolated failure during cohort evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalFailure {
    pub patient_id: PatientId,
    pub token: String,
    pub error: String,
    pub code: String,
}

impl EvalFailure {
    fn new(patient_id: PatientId, token: &str, error: &LogicError) -> Self {
        Self {
            patient_id,
            token: token.to_string(),
            error: error.to_string(),
            code: error.code().to_string(),
        }
    }
}

/// Cohort evaluation outcome
///
/// Every patient of the cohort appears in `results`. A token that failed for
/// a patient is missing from that patient's map and listed in `failures`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortResult {
    pub results: IndexMap<PatientId, PatientResults>,
    pub failures: Vec<EvalFailure>,
}

impl CohortResult {
    pub fn get(&self, patient_id: PatientId, token: &str) -> Option<&LogicResult> {
        self.results.get(&patient_id).and_then(|r| r.get(token))
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Builder for [`LogicService`]
pub struct LogicServiceBuilder {
    config: LogicConfig,
    concepts: Option<Arc<dyn ConceptSource>>,
    data_sources: Vec<Arc<dyn LogicDataSource>>,
    clock: Arc<dyn Clock>,
    index_date: Option<DateTime<Utc>>,
}

impl LogicServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: LogicConfig::default(),
            concepts: None,
            data_sources: Vec::new(),
            clock: Arc::new(SystemClock),
            index_date: None,
        }
    }

    pub fn config(mut self, config: LogicConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concepts(mut self, concepts: Arc<dyn ConceptSource>) -> Self {
        self.concepts = Some(concepts);
        self
    }

    pub fn data_source(mut self, source: Arc<dyn LogicDataSource>) -> Self {
        self.data_sources.push(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn index_date(mut self, date: DateTime<Utc>) -> Self {
        self.index_date = Some(date);
        self
    }

    pub fn build(self) -> EvalResult<LogicService> {
        self.config.validate()?;
        let concepts = self
            .concepts
            .unwrap_or_else(|| Arc::new(ConceptDictionary::new()));

        let truth_source = concepts.clone();
        let truth_name = self.config.true_concept_name.clone();
        let true_concept = TrueConcept::new(move || {
            truth_source
                .concept_by_name(&truth_name)
                .ok_or_else(|| LogicError::concept_not_found(truth_name.as_str()))
        });

        let registry = Arc::new(RuleRegistry::with_seed(RegistrySeed {
            concepts: concepts.clone(),
            classes: self.config.seed_concept_classes.clone(),
            data_source: self.config.default_data_source.clone(),
        }));

        let context = LogicContext::new(registry.clone(), self.clock, true_concept)
            .with_cache_enabled(self.config.cache_enabled)
            .with_rule_ttl(self.config.rule_ttl());
        for source in self.data_sources {
            context.register_data_source(source);
        }
        if self.index_date.is_some() {
            context.set_index_date(self.index_date);
        }

        Ok(LogicService {
            registry,
            context: Arc::new(context),
            concepts,
            config: Arc::new(self.config),
        })
    }
}

impl Default for LogicServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for evaluating clinical rules
///
/// Cloning is cheap; clones share the registry, data sources and cache.
#[derive(Clone)]
pub struct LogicService {
    registry: Arc<RuleRegistry>,
    context: Arc<LogicContext>,
    concepts: Arc<dyn ConceptSource>,
    config: Arc<LogicConfig>,
}

impl LogicService {
    pub fn builder() -> LogicServiceBuilder {
        LogicServiceBuilder::new()
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn context(&self) -> &LogicContext {
        &self.context
    }

    pub fn config(&self) -> &LogicConfig {
        &self.config
    }

    // Evaluation

    pub fn eval(&self, patient: &Patient, token: &str) -> EvalResult<LogicResult> {
        self.eval_criteria(patient, &LogicCriteria::new(token))
    }

    pub fn eval_with_args(
        &self,
        patient: &Patient,
        token: &str,
        args: &RuleArgs,
    ) -> EvalResult<LogicResult> {
        self.eval_criteria(
            patient,
            &LogicCriteria::new(token).with_parameters(args.clone()),
        )
    }

    /// Evaluate the criteria's token with its parameters, then narrow and
    /// aggregate the result as the criteria say
    pub fn eval_criteria(
        &self,
        patient: &Patient,
        criteria: &LogicCriteria,
    ) -> EvalResult<LogicResult> {
        self.context.eval(patient, criteria)
    }

    /// [`LogicService::eval_criteria`] for criteria in text form
    pub fn eval_query(&self, patient: &Patient, query: &str) -> EvalResult<LogicResult> {
        self.eval_criteria(patient, &self.parse_criteria(query)?)
    }

    /// Parse the text form of criteria, e.g. `LAST 2 {CD4 COUNT} WITHIN 1 year`
    pub fn parse_criteria(&self, query: &str) -> EvalResult<LogicCriteria> {
        query.parse()
    }

    /// Evaluate a concept directly, whether or not it has a token
    pub fn eval_concept(&self, patient: &Patient, concept: &Concept) -> EvalResult<LogicResult> {
        let rule = ConceptRule::new(concept.clone(), self.config.default_data_source.as_str());
        rule.eval(&self.context, patient, &RuleArgs::new())
    }

    /// Evaluate a concept, then narrow and aggregate as `criteria` say
    ///
    /// The criteria's token is ignored.
    pub fn eval_concept_criteria(
        &self,
        patient: &Patient,
        concept: &Concept,
        criteria: &LogicCriteria,
    ) -> EvalResult<LogicResult> {
        let raw = self.eval_concept(patient, concept)?;
        criteria.apply(&raw, self.context.index_date())
    }

    /// Evaluate several tokens for one patient, stopping at the first error
    pub fn eval_many<S: AsRef<str>>(
        &self,
        patient: &Patient,
        tokens: &[S],
        args: &RuleArgs,
    ) -> EvalResult<PatientResults> {
        let mut results = PatientResults::new();
        for token in tokens {
            let token = token.as_ref();
            results.insert(token.to_string(), self.eval_with_args(patient, token, args)?);
        }
        Ok(results)
    }

    /// One plain criteria per token, all sharing `args`
    fn criteria_for<S: AsRef<str>>(tokens: &[S], args: &RuleArgs) -> Vec<LogicCriteria> {
        tokens
            .iter()
            .map(|t| LogicCriteria::new(t.as_ref()).with_parameters(args.clone()))
            .collect()
    }

    /// Resolve every token and check the arguments before any evaluation
    fn prepare(&self, criteria: &[LogicCriteria]) -> EvalResult<()> {
        for c in criteria {
            self.get_rule(c.token())?.validate_args(c.parameters())?;
        }
        Ok(())
    }

    fn eval_patient(
        &self,
        patient: &Patient,
        criteria: &[LogicCriteria],
    ) -> (PatientResults, Vec<EvalFailure>) {
        let mut results = PatientResults::new();
        let mut failures = Vec::new();
        for c in criteria {
            let label = c.to_string();
            match self.eval_criteria(patient, c) {
                Ok(result) => {
                    results.insert(label, result);
                }
                Err(e) => {
                    error!("Evaluating '{label}' for patient {} failed: {e}", patient.id);
                    failures.push(EvalFailure::new(patient.id, &label, &e));
                }
            }
        }
        (results, failures)
    }

    /// Evaluate tokens for every patient of a cohort
    ///
    /// Unknown tokens and invalid arguments fail the whole call before
    /// anything is evaluated. Failures during evaluation are isolated per
    /// patient and token.
    pub fn eval_cohort<S: AsRef<str>>(
        &self,
        cohort: &Cohort,
        tokens: &[S],
        args: &RuleArgs,
    ) -> EvalResult<CohortResult> {
        self.eval_cohort_criteria(cohort, &Self::criteria_for(tokens, args))
    }

    /// [`LogicService::eval_cohort`] for full criteria
    ///
    /// Results are keyed by the criteria's display form, which is the bare
    /// token for criteria without aggregation, dates or value filter.
    pub fn eval_cohort_criteria(
        &self,
        cohort: &Cohort,
        criteria: &[LogicCriteria],
    ) -> EvalResult<CohortResult> {
        self.prepare(criteria)?;
        let mut outcome = CohortResult::default();
        for patient in cohort.iter() {
            let (results, failures) = self.eval_patient(patient, criteria);
            outcome.results.insert(patient.id, results);
            outcome.failures.extend(failures);
        }
        debug!(
            "Evaluated {} criteria for {} patient(s), {} failure(s)",
            criteria.len(),
            cohort.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    /// [`LogicService::eval_cohort`] with one blocking task per patient
    pub async fn eval_cohort_concurrent<S: AsRef<str>>(
        &self,
        cohort: &Cohort,
        tokens: &[S],
        args: &RuleArgs,
    ) -> EvalResult<CohortResult> {
        self.eval_cohort_criteria_concurrent(cohort, Self::criteria_for(tokens, args))
            .await
    }

    /// [`LogicService::eval_cohort_criteria`] with one blocking task per patient
    pub async fn eval_cohort_criteria_concurrent(
        &self,
        cohort: &Cohort,
        criteria: Vec<LogicCriteria>,
    ) -> EvalResult<CohortResult> {
        self.prepare(&criteria)?;

        let criteria: Arc<[LogicCriteria]> = criteria.into();
        let handles: Vec<_> = cohort
            .iter()
            .cloned()
            .map(|patient| {
                let service = self.clone();
                let criteria = criteria.clone();
                tokio::task::spawn_blocking(move || {
                    let (results, failures) = service.eval_patient(&patient, &criteria);
                    (patient.id, results, failures)
                })
            })
            .collect();

        let mut outcome = CohortResult::default();
        for handle in handles {
            let (patient_id, results, failures) = handle
                .await
                .map_err(|e| LogicError::internal(format!("Evaluation task failed: {e}")))?;
            outcome.results.insert(patient_id, results);
            outcome.failures.extend(failures);
        }
        Ok(outcome)
    }

    /// Truth value of a result against the configured true concept
    pub fn to_boolean(&self, result: &LogicResult) -> bool {
        result.to_boolean(self.context.true_concept())
    }

    // Registry

    /// Rule for a token; reference tokens must name a registered data source
    pub fn get_rule(&self, token: &str) -> EvalResult<RuleRef> {
        self.context.rule(token)
    }

    /// Rules the token's rule evaluates, resolved by token in declared order
    pub fn dependencies(&self, token: &str) -> EvalResult<IndexMap<String, RuleRef>> {
        self.get_rule(token)?
            .dependencies()
            .into_iter()
            .map(|dep| self.get_rule(&dep).map(|rule| (dep, rule)))
            .collect()
    }

    /// Register a token backed by a rule built from a registered class name
    pub fn add_token(&self, token: &str, class_name: &str) -> EvalResult<()> {
        let rule = self.registry.create_rule(class_name)?;
        self.registry.add_rule(token, rule)
    }

    /// Register a token backed by a concept of the dictionary
    pub fn add_token_concept(&self, token: &str, concept_name: &str) -> EvalResult<()> {
        let concept = self
            .concepts
            .concept_by_name(concept_name)
            .ok_or_else(|| LogicError::concept_not_found(concept_name))?;
        let rule = ConceptRule::new(concept, self.config.default_data_source.as_str());
        self.registry.add_rule(token, Arc::new(rule))
    }

    /// Replace the rule behind a registered token
    ///
    /// Results cached for the previous rule are never served again.
    pub fn update_token(&self, token: &str, class_name: &str) -> EvalResult<()> {
        let rule = self.registry.create_rule(class_name)?;
        self.registry.update_rule(token, rule)?;
        self.context.cache().clear();
        Ok(())
    }

    /// Remove a token and drop its cached results
    pub fn remove_token(&self, token: &str) -> EvalResult<()> {
        self.registry.remove_rule(token)?;
        self.context.cache().clear();
        Ok(())
    }

    // Data sources

    pub fn register_data_source(&self, source: Arc<dyn LogicDataSource>) {
        self.context.register_data_source(source);
    }

    /// Unregister a data source; results read from it are dropped
    pub fn remove_data_source(&self, name: &str) -> EvalResult<Arc<dyn LogicDataSource>> {
        self.context.remove_data_source(name)
    }

    pub fn data_source(&self, name: &str) -> EvalResult<Arc<dyn LogicDataSource>> {
        self.context.data_source(name)
    }

    pub fn data_sources(&self) -> Vec<String> {
        self.context.data_sources()
    }

    // Cache and index date

    pub fn clear_cache(&self) {
        self.context.cache().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.context.cache().stats()
    }

    pub fn index_date(&self) -> DateTime<Utc> {
        self.context.index_date()
    }

    pub fn set_index_date(&self, date: Option<DateTime<Utc>>) {
        self.context.set_index_date(date);
    }
}

impl std::fmt::Debug for LogicService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicService")
            .field("registry", &self.registry)
            .field("context", &self.context)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
