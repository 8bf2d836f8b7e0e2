//! Token registry for rules
//!
//! The registry maps tokens to rules and keeps two tag indices, token to
//! tags and tag to tokens. Both indices are only ever changed together under
//! one write lock, so they always agree.
//!
//! Tokens starting with `%%` are never stored. [`RuleRegistry::get_rule`]
//! resolves them on the fly to a [`ReferenceRule`].
//!
//! The registry seeds itself on first use with the built-in demographic
//! rules and, when a [`RegistrySeed`] is configured, one concept rule per
//! concept in the seeded classes.
//!
//! Every change to the token map bumps [`RuleRegistry::revision`]. Cached
//! rule results are keyed by the revision they were computed at.

use log::{debug, warn};
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_model::ConceptSource;
use medlogic_types::Datatype;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::rule::{RuleParameterInfo, RuleRef};
use crate::rules::{BmiRule, BuiltinRule, ConceptRule, REFERENCE_PREFIX, ReferenceRule};

/// Builds a rule for a registered class name
pub type RuleFactory = Arc<dyn Fn() -> EvalResult<RuleRef> + Send + Sync>;

/// Tag attached to the built-in demographic tokens
pub const DEMOGRAPHICS_TAG: &str = "demographics";

/// Where concept tokens are seeded from
#[derive(Clone)]
pub struct RegistrySeed {
    pub concepts: Arc<dyn ConceptSource>,
    pub classes: Vec<String>,
    /// Data source the seeded concept rules read from
    pub data_source: String,
}

#[derive(Default)]
struct RegistryState {
    rules: HashMap<String, RuleRef>,
    token_tags: HashMap<String, BTreeSet<String>>,
    tag_tokens: HashMap<String, BTreeSet<String>>,
}

impl RegistryState {
    fn insert(&mut self, token: &str, rule: RuleRef) -> EvalResult<()> {
        if self.rules.contains_key(token) {
            return Err(LogicError::duplicate_token(token));
        }
        self.rules.insert(token.to_string(), rule);
        Ok(())
    }

    fn tag(&mut self, token: &str, tag: &str) {
        self.token_tags
            .entry(token.to_string())
            .or_default()
            .insert(tag.to_string());
        self.tag_tokens
            .entry(tag.to_string())
            .or_default()
            .insert(token.to_string());
    }

    fn untag(&mut self, token: &str, tag: &str) {
        if let Some(tags) = self.token_tags.get_mut(token) {
            tags.remove(tag);
            if tags.is_empty() {
                self.token_tags.remove(token);
            }
        }
        if let Some(tokens) = self.tag_tokens.get_mut(tag) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.tag_tokens.remove(tag);
            }
        }
    }

    fn remove(&mut self, token: &str) -> EvalResult<RuleRef> {
        let rule = self
            .rules
            .remove(token)
            .ok_or_else(|| LogicError::token_not_found(token))?;
        let tags = self.token_tags.get(token).cloned().unwrap_or_default();
        for tag in &tags {
            self.untag(token, tag);
        }
        Ok(rule)
    }
}

fn check_token(token: &str) -> EvalResult<()> {
    if token.trim().is_empty() {
        return Err(LogicError::invalid_token(token, "token is empty"));
    }
    if token.starts_with(REFERENCE_PREFIX) {
        return Err(LogicError::invalid_token(
            token,
            "reference tokens are resolved on the fly and cannot be registered",
        ));
    }
    Ok(())
}

/// Registry of rules by token
pub struct RuleRegistry {
    state: RwLock<RegistryState>,
    factories: RwLock<HashMap<String, RuleFactory>>,
    seed: Option<RegistrySeed>,
    initialized: OnceCell<()>,
    revision: AtomicU64,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// Registry seeded with the built-in rules only
    pub fn new() -> Self {
        let mut factories: HashMap<String, RuleFactory> = HashMap::new();
        for builtin in BuiltinRule::ALL {
            let factory: RuleFactory = Arc::new(move || Ok(Arc::new(builtin) as RuleRef));
            factories.insert(builtin.class_name().to_string(), factory);
        }
        let bmi: RuleFactory = Arc::new(|| Ok(Arc::new(BmiRule::default()) as RuleRef));
        factories.insert(BmiRule::CLASS_NAME.to_string(), bmi);
        Self {
            state: RwLock::new(RegistryState::default()),
            factories: RwLock::new(factories),
            seed: None,
            initialized: OnceCell::new(),
            revision: AtomicU64::new(0),
        }
    }

    /// Registry that also seeds concept tokens from `seed`
    pub fn with_seed(seed: RegistrySeed) -> Self {
        Self {
            seed: Some(seed),
            ..Self::new()
        }
    }

    /// Number of changes made to the token map so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    fn ensure_initialized(&self) {
        self.initialized.get_or_init(|| self.seed_tokens());
    }

    /// One-time seeding; individual failures are logged and skipped
    fn seed_tokens(&self) {
        let mut state = self.state.write();

        for builtin in BuiltinRule::ALL {
            let token = builtin.token();
            match state.insert(token, Arc::new(builtin)) {
                Ok(()) => state.tag(token, DEMOGRAPHICS_TAG),
                Err(e) => warn!("Cannot seed built-in token '{token}': {e}"),
            }
        }

        if let Some(seed) = &self.seed {
            for class in &seed.classes {
                let concepts = match seed.concepts.concepts_by_class(class) {
                    Ok(concepts) => concepts,
                    Err(e) => {
                        warn!("Cannot seed concept class '{class}': {e}");
                        continue;
                    }
                };
                for concept in concepts {
                    let token = concept.name.clone();
                    let rule = Arc::new(ConceptRule::new(concept, seed.data_source.as_str()));
                    match state.insert(&token, rule) {
                        Ok(()) => state.tag(&token, class),
                        Err(e) => warn!("Cannot seed concept token '{token}': {e}"),
                    }
                }
            }
        }

        debug!("Rule registry initialized with {} tokens", state.rules.len());
    }

    /// Rule for a token
    ///
    /// `%%source.key` tokens yield a fresh [`ReferenceRule`] without touching
    /// the registry.
    pub fn get_rule(&self, token: &str) -> EvalResult<RuleRef> {
        if token.trim().is_empty() {
            return Err(LogicError::invalid_token(token, "token is empty"));
        }
        if token.starts_with(REFERENCE_PREFIX) {
            return Ok(Arc::new(ReferenceRule::parse(token)?));
        }
        self.ensure_initialized();
        self.state
            .read()
            .rules
            .get(token)
            .cloned()
            .ok_or_else(|| LogicError::token_not_found(token))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.ensure_initialized();
        self.state.read().rules.contains_key(token)
    }

    pub fn add_rule(&self, token: &str, rule: RuleRef) -> EvalResult<()> {
        check_token(token)?;
        self.ensure_initialized();
        self.state.write().insert(token, rule)?;
        self.bump();
        debug!("Added rule '{token}'");
        Ok(())
    }

    /// Add a rule and tag it, as one atomic change
    pub fn add_rule_with_tags<S: AsRef<str>>(
        &self,
        token: &str,
        tags: &[S],
        rule: RuleRef,
    ) -> EvalResult<()> {
        check_token(token)?;
        self.ensure_initialized();
        let mut state = self.state.write();
        state.insert(token, rule)?;
        for tag in tags {
            state.tag(token, tag.as_ref());
        }
        self.bump();
        debug!("Added rule '{token}' with {} tag(s)", tags.len());
        Ok(())
    }

    pub fn update_rule(&self, token: &str, rule: RuleRef) -> EvalResult<()> {
        self.ensure_initialized();
        let mut state = self.state.write();
        match state.rules.get_mut(token) {
            Some(slot) => {
                *slot = rule;
                self.bump();
                debug!("Updated rule '{token}'");
                Ok(())
            }
            None => Err(LogicError::token_not_found(token)),
        }
    }

    /// Remove a token together with its tags
    pub fn remove_rule(&self, token: &str) -> EvalResult<RuleRef> {
        self.ensure_initialized();
        let rule = self.state.write().remove(token)?;
        self.bump();
        debug!("Removed rule '{token}'");
        Ok(rule)
    }

    /// Tag a registered token; tagging twice is a no-op
    pub fn add_token_tag(&self, token: &str, tag: &str) -> EvalResult<()> {
        self.ensure_initialized();
        let mut state = self.state.write();
        if !state.rules.contains_key(token) {
            return Err(LogicError::token_not_found(token));
        }
        state.tag(token, tag);
        Ok(())
    }

    /// Untag a token; removing an absent tag is a no-op
    pub fn remove_token_tag(&self, token: &str, tag: &str) {
        self.ensure_initialized();
        self.state.write().untag(token, tag);
    }

    /// Registered tokens containing `partial` (case-sensitive)
    pub fn find_tokens(&self, partial: &str) -> BTreeSet<String> {
        self.ensure_initialized();
        self.state
            .read()
            .rules
            .keys()
            .filter(|t| t.contains(partial))
            .cloned()
            .collect()
    }

    /// Known tags containing `partial` (case-sensitive)
    pub fn find_tags(&self, partial: &str) -> BTreeSet<String> {
        self.ensure_initialized();
        self.state
            .read()
            .tag_tokens
            .keys()
            .filter(|t| t.contains(partial))
            .cloned()
            .collect()
    }

    pub fn all_tokens(&self) -> BTreeSet<String> {
        self.find_tokens("")
    }

    pub fn tokens_with_tag(&self, tag: &str) -> BTreeSet<String> {
        self.ensure_initialized();
        self.state
            .read()
            .tag_tokens
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    pub fn token_tags(&self, token: &str) -> BTreeSet<String> {
        self.ensure_initialized();
        self.state
            .read()
            .token_tags
            .get(token)
            .cloned()
            .unwrap_or_default()
    }

    pub fn default_datatype(&self, token: &str) -> EvalResult<Option<Datatype>> {
        Ok(self.get_rule(token)?.default_datatype())
    }

    pub fn parameter_list(&self, token: &str) -> EvalResult<Vec<RuleParameterInfo>> {
        Ok(self.get_rule(token)?.parameters())
    }

    pub fn len(&self) -> usize {
        self.ensure_initialized();
        self.state.read().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a factory under a class name, replacing any previous one
    pub fn register_factory(&self, class_name: impl Into<String>, factory: RuleFactory) {
        self.factories.write().insert(class_name.into(), factory);
    }

    /// Build a rule from a registered class name
    pub fn create_rule(&self, class_name: &str) -> EvalResult<RuleRef> {
        let factory = self
            .factories
            .read()
            .get(class_name)
            .cloned()
            .ok_or_else(|| {
                LogicError::rule_construction(class_name, "no rule factory registered")
            })?;
        factory()
    }

    /// Registered factory class names, sorted
    pub fn factory_names(&self) -> BTreeSet<String> {
        self.factories.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("initialized", &self.initialized.get().is_some())
            .field("revision", &self.revision())
            .field("factories", &self.factory_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_seeded_lazily() {
        let registry = RuleRegistry::new();
        assert!(registry.initialized.get().is_none());
        assert!(registry.contains("AGE"));
        assert_eq!(
            registry.tokens_with_tag(DEMOGRAPHICS_TAG).len(),
            BuiltinRule::ALL.len()
        );
    }

    #[test]
    fn test_changes_bump_revision() {
        let registry = RuleRegistry::new();
        let start = registry.revision();

        registry.add_rule("SEX", Arc::new(BuiltinRule::Gender)).unwrap();
        registry.update_rule("SEX", Arc::new(BuiltinRule::VitalStatus)).unwrap();
        registry.add_token_tag("SEX", "demo").unwrap();
        assert_eq!(registry.revision(), start + 2);

        assert!(registry.update_rule("NOPE", Arc::new(BuiltinRule::Age)).is_err());
        registry.remove_rule("SEX").unwrap();
        assert_eq!(registry.revision(), start + 3);
    }

    #[test]
    fn test_reference_tokens_cannot_be_registered() {
        let registry = RuleRegistry::new();
        let err = registry
            .add_rule("%%obs.CD4", Arc::new(BuiltinRule::Age))
            .unwrap_err();
        assert!(matches!(err, LogicError::InvalidToken { .. }));
    }

    #[test]
    fn test_unknown_factory() {
        let registry = RuleRegistry::new();
        assert!(registry.create_rule("age").is_ok());
        assert!(registry.create_rule("bmi").is_ok());
        let err = registry.create_rule("egfr").unwrap_err();
        assert!(matches!(err, LogicError::RuleConstruction { .. }));
    }
}
