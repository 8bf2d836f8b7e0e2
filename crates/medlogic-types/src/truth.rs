//! The concept that coded results compare against in `to_boolean`

use log::warn;
use medlogic_diagnostics::EvalResult;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

use crate::concept::Concept;

/// Resolver used to look up the "true" concept on first use
pub type ConceptResolver = Arc<dyn Fn() -> EvalResult<Concept> + Send + Sync>;

/// Lazily resolved "true" concept
///
/// Resolution happens at most once successfully. A failed resolution leaves
/// the cell empty so the next call tries again.
pub struct TrueConcept {
    cell: OnceCell<Concept>,
    resolver: ConceptResolver,
}

impl TrueConcept {
    pub fn new(resolver: impl Fn() -> EvalResult<Concept> + Send + Sync + 'static) -> Self {
        Self {
            cell: OnceCell::new(),
            resolver: Arc::new(resolver),
        }
    }

    /// Already resolved concept
    pub fn fixed(concept: Concept) -> Self {
        let resolver_concept = concept.clone();
        Self {
            cell: OnceCell::with_value(concept),
            resolver: Arc::new(move || Ok(resolver_concept.clone())),
        }
    }

    /// Resolve the concept, blocking concurrent callers until done
    pub fn get(&self) -> EvalResult<&Concept> {
        self.cell.get_or_try_init(|| (self.resolver)())
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Whether `concept` is the true concept
    ///
    /// Resolution failures are logged and count as no match.
    pub fn matches(&self, concept: &Concept) -> bool {
        match self.get() {
            Ok(truth) => truth.id == concept.id,
            Err(e) => {
                warn!("Cannot resolve true concept: {e}");
                false
            }
        }
    }
}

impl fmt::Debug for TrueConcept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrueConcept")
            .field("resolved", &self.cell.get())
            .finish_non_exhaustive()
    }
}
