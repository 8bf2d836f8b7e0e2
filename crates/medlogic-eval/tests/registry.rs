//! Rule Registry Tests
//!
//! Tests for: add/get/update/remove, duplicate and missing tokens, reference
//! tokens, tag indices, partial-match search, seeding from a dictionary,
//! rule factories

use medlogic_eval::{
    BuiltinRule, ConceptRule, DEMOGRAPHICS_TAG, LogicError, RegistrySeed, RuleRef, RuleRegistry,
};
use medlogic_model::ConceptDictionary;
use medlogic_types::{Concept, ConceptDatatype, Datatype};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use std::collections::BTreeSet;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn concept_rule(id: i32, name: &str) -> RuleRef {
    Arc::new(ConceptRule::new(
        Concept::new(id, name, ConceptDatatype::Numeric),
        "obs",
    ))
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn dictionary() -> ConceptDictionary {
    ConceptDictionary::from_concepts([
        Concept::new(5497, "CD4 COUNT", ConceptDatatype::Numeric).with_class("Test"),
        Concept::new(5089, "WEIGHT (KG)", ConceptDatatype::Numeric).with_class("Finding"),
        Concept::new(1065, "YES", ConceptDatatype::NotApplicable).with_class("Misc"),
        Concept::new(856, "HIV VIRAL LOAD", ConceptDatatype::Numeric).with_class("Test"),
    ])
}

fn seeded(classes: &[&str]) -> RuleRegistry {
    RuleRegistry::with_seed(RegistrySeed {
        concepts: Arc::new(dictionary()),
        classes: classes.iter().map(|c| c.to_string()).collect(),
        data_source: "obs".to_string(),
    })
}

// ============================================================================
// Add / Get / Update / Remove
// ============================================================================

#[test]
fn test_add_then_get_returns_same_rule() {
    let registry = RuleRegistry::new();
    let rule = concept_rule(5497, "CD4 COUNT");
    registry.add_rule("CD4", rule.clone()).unwrap();

    let found = registry.get_rule("CD4").unwrap();
    assert!(Arc::ptr_eq(&found, &rule));
    assert!(registry.contains("CD4"));
}

#[test]
fn test_add_duplicate_token_fails() {
    let registry = RuleRegistry::new();
    registry.add_rule("CD4", concept_rule(5497, "CD4 COUNT")).unwrap();

    let err = registry
        .add_rule("CD4", concept_rule(1, "OTHER"))
        .unwrap_err();
    assert!(matches!(err, LogicError::DuplicateToken { .. }));
}

#[test]
fn test_builtin_tokens_cannot_be_added_again() {
    let registry = RuleRegistry::new();
    let err = registry
        .add_rule("AGE", Arc::new(BuiltinRule::Age))
        .unwrap_err();
    assert!(matches!(err, LogicError::DuplicateToken { .. }));
}

#[rstest]
#[case("")]
#[case("   ")]
#[case("%%obs.CD4 COUNT")]
fn test_add_rejects_invalid_tokens(#[case] token: &str) {
    let registry = RuleRegistry::new();
    let err = registry
        .add_rule(token, concept_rule(5497, "CD4 COUNT"))
        .unwrap_err();
    assert!(matches!(err, LogicError::InvalidToken { .. }));
}

#[test]
fn test_get_unknown_token() {
    let registry = RuleRegistry::new();
    let err = registry.get_rule("NOPE").unwrap_err();
    assert!(matches!(err, LogicError::TokenNotFound { .. }));
    assert!(err.to_string().contains("NOPE"));
}

#[test]
fn test_get_empty_token_is_invalid() {
    let registry = RuleRegistry::new();
    assert!(matches!(
        registry.get_rule("").unwrap_err(),
        LogicError::InvalidToken { .. }
    ));
}

#[test]
fn test_update_replaces_rule() {
    let registry = RuleRegistry::new();
    registry.add_rule("CD4", concept_rule(5497, "CD4 COUNT")).unwrap();
    let replacement = concept_rule(5498, "CD4 PERCENT");
    registry.update_rule("CD4", replacement.clone()).unwrap();

    assert!(Arc::ptr_eq(&registry.get_rule("CD4").unwrap(), &replacement));
}

#[test]
fn test_update_unknown_token_fails() {
    let registry = RuleRegistry::new();
    let err = registry
        .update_rule("CD4", concept_rule(5497, "CD4 COUNT"))
        .unwrap_err();
    assert!(matches!(err, LogicError::TokenNotFound { .. }));
}

#[test]
fn test_remove_drops_rule_and_tags() {
    let registry = RuleRegistry::new();
    registry
        .add_rule_with_tags("CD4", &["hiv", "lab"], concept_rule(5497, "CD4 COUNT"))
        .unwrap();

    registry.remove_rule("CD4").unwrap();

    assert!(!registry.contains("CD4"));
    assert!(registry.token_tags("CD4").is_empty());
    assert!(registry.tokens_with_tag("hiv").is_empty());
    assert!(registry.find_tags("").is_disjoint(&set(&["hiv", "lab"])));
}

#[test]
fn test_remove_unknown_token_fails() {
    let registry = RuleRegistry::new();
    assert!(matches!(
        registry.remove_rule("CD4").unwrap_err(),
        LogicError::TokenNotFound { .. }
    ));
}

// ============================================================================
// Reference Tokens
// ============================================================================

#[test]
fn test_reference_token_bypasses_registry() {
    let registry = RuleRegistry::new();
    let before = registry.len();

    let rule = registry.get_rule("%%person.gender").unwrap();
    assert_eq!(rule.default_datatype(), None);
    assert_eq!(registry.len(), before);
    assert!(!registry.contains("%%person.gender"));
}

#[rstest]
#[case("%%")]
#[case("%%person")]
#[case("%%.gender")]
#[case("%%person.")]
fn test_malformed_reference_token(#[case] token: &str) {
    let registry = RuleRegistry::new();
    assert!(matches!(
        registry.get_rule(token).unwrap_err(),
        LogicError::InvalidToken { .. }
    ));
}

// ============================================================================
// Tags
// ============================================================================

#[test]
fn test_tags_are_symmetric() {
    let registry = RuleRegistry::new();
    registry.add_rule("CD4", concept_rule(5497, "CD4 COUNT")).unwrap();
    registry.add_rule("VL", concept_rule(856, "HIV VIRAL LOAD")).unwrap();

    registry.add_token_tag("CD4", "hiv").unwrap();
    registry.add_token_tag("VL", "hiv").unwrap();
    registry.add_token_tag("CD4", "immunology").unwrap();

    assert_eq!(registry.tokens_with_tag("hiv"), set(&["CD4", "VL"]));
    assert_eq!(registry.token_tags("CD4"), set(&["hiv", "immunology"]));

    registry.remove_token_tag("CD4", "hiv");
    assert_eq!(registry.tokens_with_tag("hiv"), set(&["VL"]));
    assert_eq!(registry.token_tags("CD4"), set(&["immunology"]));
}

#[test]
fn test_remove_absent_tag_is_noop() {
    let registry = RuleRegistry::new();
    registry.add_rule("CD4", concept_rule(5497, "CD4 COUNT")).unwrap();
    registry.remove_token_tag("CD4", "never-added");
    registry.remove_token_tag("UNKNOWN", "never-added");
    assert!(registry.token_tags("CD4").is_empty());
}

#[test]
fn test_tag_unknown_token_fails() {
    let registry = RuleRegistry::new();
    assert!(matches!(
        registry.add_token_tag("CD4", "hiv").unwrap_err(),
        LogicError::TokenNotFound { .. }
    ));
}

#[test]
fn test_builtins_carry_demographics_tag() {
    let registry = RuleRegistry::new();
    assert_eq!(
        registry.tokens_with_tag(DEMOGRAPHICS_TAG),
        set(&["AGE", "BIRTHDATE", "GENDER", "VITAL STATUS"])
    );
}

// ============================================================================
// Search
// ============================================================================

#[test]
fn test_find_tokens_is_substring_and_case_sensitive() {
    let registry = RuleRegistry::new();
    registry.add_rule("CD4 COUNT", concept_rule(5497, "CD4 COUNT")).unwrap();
    registry.add_rule("CD4 PERCENT", concept_rule(5498, "CD4 PERCENT")).unwrap();

    assert_eq!(registry.find_tokens("CD4"), set(&["CD4 COUNT", "CD4 PERCENT"]));
    assert_eq!(registry.find_tokens("COUNT"), set(&["CD4 COUNT"]));
    assert!(registry.find_tokens("cd4").is_empty());
}

#[test]
fn test_find_tags() {
    let registry = RuleRegistry::new();
    registry
        .add_rule_with_tags("CD4", &["hiv-care", "lab"], concept_rule(5497, "CD4 COUNT"))
        .unwrap();

    assert_eq!(registry.find_tags("hiv"), set(&["hiv-care"]));
    assert!(registry.find_tags("HIV").is_empty());
}

#[test]
fn test_default_datatype_and_parameters() {
    let registry = RuleRegistry::new();
    registry.add_rule("CD4", concept_rule(5497, "CD4 COUNT")).unwrap();

    assert_eq!(registry.default_datatype("CD4").unwrap(), Some(Datatype::Numeric));
    assert_eq!(registry.default_datatype("GENDER").unwrap(), Some(Datatype::Text));

    let params = registry.parameter_list("AGE").unwrap();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].name, "units");
    assert!(!params[0].required);
    assert!(registry.parameter_list("CD4").unwrap().is_empty());
}

// ============================================================================
// Seeding
// ============================================================================

#[test]
fn test_seed_registers_concepts_of_listed_classes() {
    let registry = seeded(&["Test", "Finding"]);

    assert!(registry.contains("CD4 COUNT"));
    assert!(registry.contains("HIV VIRAL LOAD"));
    assert!(registry.contains("WEIGHT (KG)"));
    assert!(!registry.contains("YES"));
    assert_eq!(registry.tokens_with_tag("Test"), set(&["CD4 COUNT", "HIV VIRAL LOAD"]));
    assert_eq!(registry.token_tags("WEIGHT (KG)"), set(&["Finding"]));
}

#[test]
fn test_seed_skips_unknown_classes() {
    let registry = seeded(&["Drug"]);
    assert_eq!(registry.len(), BuiltinRule::ALL.len());
}

#[test]
fn test_seeded_token_can_be_removed() {
    let registry = seeded(&["Test"]);
    registry.remove_rule("CD4 COUNT").unwrap();
    assert!(!registry.contains("CD4 COUNT"));
    assert_eq!(registry.tokens_with_tag("Test"), set(&["HIV VIRAL LOAD"]));
}

// ============================================================================
// Factories
// ============================================================================

#[test]
fn test_builtin_factories() {
    let registry = RuleRegistry::new();
    assert_eq!(
        registry.factory_names(),
        set(&["age", "birthdate", "bmi", "gender", "vital_status"])
    );
    let rule = registry.create_rule("gender").unwrap();
    assert_eq!(rule.default_datatype(), Some(Datatype::Text));
}

#[test]
fn test_custom_factory() {
    let registry = RuleRegistry::new();
    registry.register_factory(
        "cd4",
        Arc::new(|| Ok(concept_rule(5497, "CD4 COUNT"))),
    );
    let rule = registry.create_rule("cd4").unwrap();
    registry.add_rule("MY CD4", rule).unwrap();
    assert!(registry.contains("MY CD4"));
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum TagOp {
    Add(usize, usize),
    Remove(usize, usize),
}

fn tag_op() -> impl Strategy<Value = TagOp> {
    prop_oneof![
        (0..4usize, 0..3usize).prop_map(|(t, g)| TagOp::Add(t, g)),
        (0..4usize, 0..3usize).prop_map(|(t, g)| TagOp::Remove(t, g)),
    ]
}

proptest! {
    #[test]
    fn prop_tag_indices_agree(ops in prop::collection::vec(tag_op(), 0..40)) {
        let tokens = ["A", "B", "C", "D"];
        let tags = ["x", "y", "z"];
        let registry = RuleRegistry::new();
        for (i, token) in tokens.iter().enumerate() {
            registry.add_rule(token, concept_rule(i as i32, token)).unwrap();
        }

        for op in ops {
            match op {
                TagOp::Add(t, g) => registry.add_token_tag(tokens[t], tags[g]).unwrap(),
                TagOp::Remove(t, g) => registry.remove_token_tag(tokens[t], tags[g]),
            }
        }

        for token in tokens {
            for tag in registry.token_tags(token) {
                prop_assert!(registry.tokens_with_tag(&tag).contains(token));
            }
        }
        for tag in tags {
            for token in registry.tokens_with_tag(tag) {
                prop_assert!(registry.token_tags(&token).contains(tag));
            }
        }
    }
}
