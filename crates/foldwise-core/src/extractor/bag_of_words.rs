//! Bag-of-words interaction features.
//!
//! Terms are unigrams or boundary-marked character trigrams. Query terms are
//! weighted by a BM25-style IDF computed over the preprocessed documents:
//!
//! ```text
//! idf(t) = ln(1 + (N - df(t) + 0.5) / (df(t) + 0.5))
//! ```

use super::{tokenize, trigrams, Extractor, FeatureVector};
use crate::benchmark::Collection;
use crate::cache::{CacheKey, CacheStore};
use crate::config::{BagOfWordsConfig, TermMode};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Names of the features produced by [`BagOfWordsExtractor::vectorize`].
pub const FEATURE_NAMES: [&str; 5] = [
    "matched_idf",
    "query_coverage",
    "matched_log_tf",
    "log_doc_len",
    "bias",
];

/// Preprocessed vocabulary and term lists, cached between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BagOfWordsState {
    pub qid_terms: HashMap<String, Vec<String>>,
    pub doc_terms: HashMap<String, Vec<String>>,
    /// Distinct terms over queries and documents
    pub vocab_size: usize,
    /// IDF of every query term
    pub idf: HashMap<String, f64>,
}

pub struct BagOfWordsExtractor {
    config: BagOfWordsConfig,
    collection: Arc<dyn Collection>,
    cache: Option<(Arc<dyn CacheStore>, String)>,
    state: Option<BagOfWordsState>,
}

impl BagOfWordsExtractor {
    pub fn new(config: BagOfWordsConfig, collection: Arc<dyn Collection>) -> Self {
        Self {
            config,
            collection,
            cache: None,
            state: None,
        }
    }

    /// Caches preprocessed state in `store`.
    ///
    /// `scope` identifies the collection (e.g. the benchmark name) and is
    /// part of the cache key.
    pub fn with_cache(mut self, store: Arc<dyn CacheStore>, scope: impl Into<String>) -> Self {
        self.cache = Some((store, scope.into()));
        self
    }

    pub fn state(&self) -> Option<&BagOfWordsState> {
        self.state.as_ref()
    }

    /// Distinct terms seen during preprocessing.
    pub fn vocab_size(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.vocab_size)
    }

    fn terms(&self, text: &str, max_tokens: usize) -> Vec<String> {
        let mut tokens = tokenize(text);
        tokens.truncate(max_tokens);
        match self.config.datamode {
            TermMode::Unigram => tokens,
            TermMode::Trigram => trigrams(&tokens),
        }
    }

    /// Digest of everything `build_state` reads: config, every topic text
    /// and every document text (or its absence).
    fn cache_key(
        &self,
        scope: &str,
        qids: &BTreeSet<String>,
        doc_ids: &BTreeSet<String>,
        topics: &BTreeMap<String, String>,
    ) -> Result<CacheKey, PipelineError> {
        let mut key = CacheKey::builder("bagofwords").str(scope).config(&self.config)?;
        for qid in qids {
            let text = topics
                .get(qid)
                .ok_or_else(|| PipelineError::MissingQuery { qid: qid.clone() })?;
            key = key.entry(qid, Some(text));
        }
        for doc_id in doc_ids {
            key = key.entry(doc_id, self.collection.document(doc_id));
        }
        Ok(key.finish())
    }

    fn build_state(
        &self,
        qids: &BTreeSet<String>,
        doc_ids: &BTreeSet<String>,
        topics: &BTreeMap<String, String>,
    ) -> Result<BagOfWordsState, PipelineError> {
        let mut qid_terms = HashMap::with_capacity(qids.len());
        for qid in qids {
            let text = topics
                .get(qid)
                .ok_or_else(|| PipelineError::MissingQuery { qid: qid.clone() })?;
            qid_terms.insert(qid.clone(), self.terms(text, self.config.maxqlen));
        }

        let mut doc_terms = HashMap::with_capacity(doc_ids.len());
        let mut missing = 0usize;
        for doc_id in doc_ids {
            match self.collection.document(doc_id) {
                Some(text) => {
                    doc_terms.insert(doc_id.clone(), self.terms(text, self.config.maxdoclen));
                }
                None => missing += 1,
            }
        }
        if missing > 0 {
            warn!("{} of {} documents not found in collection", missing, doc_ids.len());
        }

        let vocab_size = qid_terms
            .values()
            .chain(doc_terms.values())
            .flatten()
            .collect::<HashSet<&String>>()
            .len();

        let query_vocab: HashSet<&String> = qid_terms.values().flatten().collect();
        let mut df: HashMap<&String, usize> = HashMap::new();
        for terms in doc_terms.values() {
            let unique: HashSet<&String> = terms.iter().filter(|t| query_vocab.contains(t)).collect();
            for term in unique {
                *df.entry(term).or_default() += 1;
            }
        }
        let n = doc_terms.len() as f64;
        let idf = query_vocab
            .iter()
            .map(|t| {
                let df = df.get(*t).copied().unwrap_or(0) as f64;
                ((*t).clone(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        Ok(BagOfWordsState {
            qid_terms,
            doc_terms,
            vocab_size,
            idf,
        })
    }
}

impl Extractor for BagOfWordsExtractor {
    fn name(&self) -> &str {
        "bagofwords"
    }

    fn preprocess(
        &mut self,
        qids: &BTreeSet<String>,
        doc_ids: &BTreeSet<String>,
        topics: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let key = match &self.cache {
            Some((_, scope)) => Some(self.cache_key(scope, qids, doc_ids, topics)?),
            None => None,
        };

        if let (Some((store, _)), Some(key)) = (&self.cache, &key) {
            if let Some(bytes) = store.get(key)? {
                self.state = Some(serde_json::from_slice(&bytes)?);
                info!("Vocabulary loaded from cache ({} terms)", self.vocab_size());
                return Ok(());
            }
        }

        let state = self.build_state(qids, doc_ids, topics)?;
        info!("Vocabulary constructed with {} terms", state.vocab_size);

        if let (Some((store, _)), Some(key)) = (&self.cache, &key) {
            store.put(key, &serde_json::to_vec(&state)?)?;
            debug!("Cached extractor state under {}", key);
        }
        self.state = Some(state);
        Ok(())
    }

    fn vectorize(&self, qid: &str, doc_id: &str) -> Result<FeatureVector, PipelineError> {
        let state = self.state.as_ref().ok_or_else(|| PipelineError::MissingQuery {
            qid: qid.to_string(),
        })?;
        let query = state
            .qid_terms
            .get(qid)
            .ok_or_else(|| PipelineError::MissingQuery { qid: qid.to_string() })?;
        let doc = state
            .doc_terms
            .get(doc_id)
            .ok_or_else(|| PipelineError::MissingDocument {
                doc_id: doc_id.to_string(),
            })?;

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for term in doc {
            *tf.entry(term.as_str()).or_default() += 1;
        }

        let unique_query: BTreeSet<&str> = query.iter().map(String::as_str).collect();
        let mut matched_idf = 0.0;
        let mut matched_log_tf = 0.0;
        let mut matched = 0usize;
        for term in &unique_query {
            if let Some(count) = tf.get(term) {
                matched += 1;
                matched_idf += state.idf.get(*term).copied().unwrap_or(0.0);
                matched_log_tf += (1.0 + *count as f64).ln();
            }
        }
        let coverage = if unique_query.is_empty() {
            0.0
        } else {
            matched as f64 / unique_query.len() as f64
        };

        Ok(vec![
            matched_idf,
            coverage,
            matched_log_tf,
            (1.0 + doc.len() as f64).ln(),
            1.0,
        ])
    }

    fn dim(&self) -> usize {
        FEATURE_NAMES.len()
    }

    fn is_preprocessed(&self) -> bool {
        self.state.is_some()
    }
}
