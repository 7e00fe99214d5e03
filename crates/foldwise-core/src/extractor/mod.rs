//! Feature extraction for rerankers.
//!
//! Extraction is two-phase. [`Extractor::preprocess`] sees every query and
//! document the run will touch and builds whatever shared state it needs
//! (vocabulary, IDF, token caches). [`Extractor::vectorize`] then turns a
//! single `(qid, doc_id)` pair into a dense feature vector. Samplers always
//! call `preprocess` before the first `vectorize`.

mod bag_of_words;

pub use bag_of_words::{BagOfWordsExtractor, BagOfWordsState, FEATURE_NAMES};

use crate::error::PipelineError;
use std::collections::{BTreeMap, BTreeSet};

/// Dense features for one query/document pair.
pub type FeatureVector = Vec<f64>;

/// Turns query and document ids into model inputs.
pub trait Extractor: Send {
    fn name(&self) -> &str;

    /// Builds shared state for the given queries and documents.
    ///
    /// # Errors
    ///
    /// `MissingQuery` if a qid has no topic text.
    fn preprocess(
        &mut self,
        qids: &BTreeSet<String>,
        doc_ids: &BTreeSet<String>,
        topics: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError>;

    /// Features for one pair.
    ///
    /// # Errors
    ///
    /// `MissingDocument` if the document was not preprocessed or is absent
    /// from the collection; `MissingQuery` likewise for the query.
    fn vectorize(&self, qid: &str, doc_id: &str) -> Result<FeatureVector, PipelineError>;

    /// Length of every vector returned by `vectorize`.
    fn dim(&self) -> usize;

    /// Whether `preprocess` has completed.
    fn is_preprocessed(&self) -> bool;
}

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Character trigrams of each token wrapped in `#` boundary markers.
///
/// `"abc"` becomes `#ab`, `abc`, `bc#`.
pub fn trigrams(tokens: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for token in tokens {
        let chars: Vec<char> = std::iter::once('#')
            .chain(token.chars())
            .chain(std::iter::once('#'))
            .collect();
        out.extend(chars.windows(3).map(|w| w.iter().collect::<String>()));
    }
    out
}
