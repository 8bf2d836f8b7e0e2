//! In-memory concept dictionary

use indexmap::IndexMap;
use log::debug;
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_types::{Concept, ConceptId};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

use crate::provider::ConceptSource;

/// Concept dictionary backed by a map from id to concept
///
/// Name lookups try an exact match first and fall back to an ASCII
/// case-insensitive match.
#[derive(Debug, Clone, Default)]
pub struct ConceptDictionary {
    concepts: Arc<RwLock<IndexMap<ConceptId, Concept>>>,
}

impl ConceptDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dictionary holding `concepts`; later ids replace earlier ones
    pub fn from_concepts(concepts: impl IntoIterator<Item = Concept>) -> Self {
        let dictionary = Self::new();
        for concept in concepts {
            dictionary.add(concept);
        }
        dictionary
    }

    /// Load a JSON array of concepts
    pub fn from_json(json: &str) -> EvalResult<Self> {
        let concepts: Vec<Concept> = serde_json::from_str(json)
            .map_err(|e| LogicError::configuration(format!("Invalid concept dictionary: {e}")))?;
        Ok(Self::from_concepts(concepts))
    }

    /// Load a JSON array of concepts from a file
    pub fn from_file(path: impl AsRef<Path>) -> EvalResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LogicError::configuration(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Add or replace a concept
    pub fn add(&self, concept: Concept) {
        debug!("Adding concept {} ({})", concept.name, concept.id);
        self.concepts.write().insert(concept.id, concept);
    }

    pub fn len(&self) -> usize {
        self.concepts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.read().is_empty()
    }

    /// All concepts in insertion order
    pub fn concepts(&self) -> Vec<Concept> {
        self.concepts.read().values().cloned().collect()
    }
}

impl ConceptSource for ConceptDictionary {
    fn concept_by_name(&self, name: &str) -> Option<Concept> {
        let concepts = self.concepts.read();
        concepts
            .values()
            .find(|c| c.name == name)
            .or_else(|| concepts.values().find(|c| c.name.eq_ignore_ascii_case(name)))
            .cloned()
    }

    fn concept_by_id(&self, id: ConceptId) -> Option<Concept> {
        self.concepts.read().get(&id).cloned()
    }

    fn concepts_by_class(&self, class: &str) -> EvalResult<Vec<Concept>> {
        Ok(self
            .concepts
            .read()
            .values()
            .filter(|c| c.class.as_deref() == Some(class))
            .cloned()
            .collect())
    }
}
