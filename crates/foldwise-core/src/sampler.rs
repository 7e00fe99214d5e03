//! Training and prediction datasets built from a run.
//!
//! Datasets hold only ids; features are pulled from the extractor as the
//! dataset is iterated, so the extractor must be preprocessed over every
//! query and document of the run first. [`Sampler::prepare`] and
//! [`PredSampler::prepare`] refuse an extractor that has not been.
//!
//! | Dataset | Yields | Missing document |
//! |---------|--------|------------------|
//! | [`TrainDataset`] | `(qid, positive, negative)` triplets, endlessly | warn and skip |
//! | [`PredDataset`] | every `(qid, doc_id)` of the run once | error |

use crate::config::{SamplerConfig, SamplerMode};
use crate::error::{ConfigurationError, PipelineError};
use crate::extractor::{Extractor, FeatureVector};
use crate::run::{Qrels, Run};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, VecDeque};
use tracing::{error, instrument, warn};

const MAX_EMPTY_RANDOM_PASSES: usize = 32;

/// One training triplet with features.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub qid: String,
    pub pos_doc_id: String,
    pub neg_doc_id: String,
    pub pos_features: FeatureVector,
    pub neg_features: FeatureVector,
}

/// One document to score.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionExample {
    pub qid: String,
    pub doc_id: String,
    pub features: FeatureVector,
}

// ============================================================================
// Training
// ============================================================================

/// How triplets are drawn in each pass over the queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripletPolicy {
    /// Queries shuffled, one random positive and negative each
    Random { seed: u64 },
    /// Every positive × negative combination, queries in sorted order
    Exhaustive,
}

/// Builds a training dataset from a run.
pub trait Sampler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Partitions each query's documents into positives (grade ≥
    /// `relevance_level`) and negatives (everything else, including
    /// unjudged documents).
    ///
    /// Queries missing from `qrels`, or lacking either class, are skipped
    /// with a warning.
    fn prepare<'a>(
        &self,
        run: &Run,
        qrels: &Qrels,
        extractor: &'a dyn Extractor,
        relevance_level: i32,
    ) -> Result<TrainDataset<'a>, PipelineError>;
}

/// Random triplets from a seeded RNG.
#[derive(Debug, Clone)]
pub struct TripletSampler {
    pub seed: u64,
}

/// All unique triplets, pass after pass.
#[derive(Debug, Clone, Default)]
pub struct ExhaustiveSampler;

impl Sampler for TripletSampler {
    fn name(&self) -> &'static str {
        "triplet"
    }

    #[instrument(skip_all, fields(sampler = "triplet", queries = run.len()))]
    fn prepare<'a>(
        &self,
        run: &Run,
        qrels: &Qrels,
        extractor: &'a dyn Extractor,
        relevance_level: i32,
    ) -> Result<TrainDataset<'a>, PipelineError> {
        TrainDataset::new(
            run,
            qrels,
            extractor,
            relevance_level,
            TripletPolicy::Random { seed: self.seed },
        )
    }
}

impl Sampler for ExhaustiveSampler {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    #[instrument(skip_all, fields(sampler = "exhaustive", queries = run.len()))]
    fn prepare<'a>(
        &self,
        run: &Run,
        qrels: &Qrels,
        extractor: &'a dyn Extractor,
        relevance_level: i32,
    ) -> Result<TrainDataset<'a>, PipelineError> {
        TrainDataset::new(run, qrels, extractor, relevance_level, TripletPolicy::Exhaustive)
    }
}

/// Builds the sampler named by the config.
pub fn sampler_from_config(config: &SamplerConfig) -> Box<dyn Sampler> {
    match config.mode {
        SamplerMode::Triplet => Box::new(TripletSampler { seed: config.seed }),
        SamplerMode::Exhaustive => Box::new(ExhaustiveSampler),
    }
}

fn ensure_preprocessed(extractor: &dyn Extractor) -> Result<(), PipelineError> {
    if extractor.is_preprocessed() {
        Ok(())
    } else {
        Err(ConfigurationError::Invalid(format!(
            "extractor '{}' must be preprocessed before sampling",
            extractor.name()
        ))
        .into())
    }
}

/// Training triplets over the queries that have both classes.
pub struct TrainDataset<'a> {
    extractor: &'a dyn Extractor,
    policy: TripletPolicy,
    positives: BTreeMap<String, Vec<String>>,
    negatives: BTreeMap<String, Vec<String>>,
    total_samples: usize,
}

impl<'a> TrainDataset<'a> {
    pub fn new(
        run: &Run,
        qrels: &Qrels,
        extractor: &'a dyn Extractor,
        relevance_level: i32,
        policy: TripletPolicy,
    ) -> Result<Self, PipelineError> {
        ensure_preprocessed(extractor)?;

        let mut positives = BTreeMap::new();
        let mut negatives = BTreeMap::new();
        let mut total_samples = 0usize;

        for (qid, docs) in run.iter() {
            let Some(judgments) = qrels.get(qid) else {
                warn!("Skipping qid={} that was missing from the qrels", qid);
                continue;
            };
            let (pos, neg): (Vec<String>, Vec<String>) = docs
                .iter()
                .map(|d| d.doc_id.clone())
                .partition(|doc_id| judgments.get(doc_id).is_some_and(|g| *g >= relevance_level));

            if pos.is_empty() || neg.is_empty() {
                warn!(
                    "Removing training qid={} with {} positive docs and {} negative docs",
                    qid,
                    pos.len(),
                    neg.len()
                );
                continue;
            }
            total_samples += pos.len() * neg.len();
            positives.insert(qid.to_string(), pos);
            negatives.insert(qid.to_string(), neg);
        }

        Ok(Self {
            extractor,
            policy,
            positives,
            negatives,
            total_samples,
        })
    }

    /// Number of unique triplets.
    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    /// Queries that yield triplets, sorted.
    pub fn qids(&self) -> impl Iterator<Item = &str> {
        self.positives.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.positives.is_empty()
    }

    /// Triplets in one pass.
    pub fn pass_len(&self) -> usize {
        match self.policy {
            TripletPolicy::Random { .. } => self.positives.len(),
            TripletPolicy::Exhaustive => self.total_samples,
        }
    }

    /// Endless stream of triplets, starting from the first pass.
    ///
    /// Each call restarts from the same seed. The stream yields
    /// `EmptyTrainingSet` (and then ends) if a full pass produces nothing.
    pub fn iter(&self) -> TrainIter<'_, 'a> {
        let seed = match self.policy {
            TripletPolicy::Random { seed } => seed,
            TripletPolicy::Exhaustive => 0,
        };
        TrainIter {
            dataset: self,
            rng: StdRng::seed_from_u64(seed),
            pending: VecDeque::new(),
            passes: 0,
            empty_passes: 0,
            yielded_this_pass: 0,
            done: false,
        }
    }

    // Random passes may draw only missing documents by chance, so they get
    // more attempts before the set is declared empty.
    fn max_empty_passes(&self) -> usize {
        match self.policy {
            TripletPolicy::Random { .. } => MAX_EMPTY_RANDOM_PASSES,
            TripletPolicy::Exhaustive => 1,
        }
    }

    fn next_pass(&self, rng: &mut StdRng) -> VecDeque<(String, String, String)> {
        let mut qids: Vec<&String> = self.positives.keys().collect();
        match self.policy {
            TripletPolicy::Random { .. } => {
                qids.shuffle(rng);
                qids.into_iter()
                    .filter_map(|qid| {
                        let pos = self.positives.get(qid)?.choose(rng)?;
                        let neg = self.negatives.get(qid)?.choose(rng)?;
                        Some((qid.clone(), pos.clone(), neg.clone()))
                    })
                    .collect()
            }
            TripletPolicy::Exhaustive => {
                let mut pass = VecDeque::with_capacity(self.total_samples);
                for qid in qids {
                    let (Some(pos), Some(neg)) = (self.positives.get(qid), self.negatives.get(qid)) else {
                        continue;
                    };
                    for p in pos {
                        for n in neg {
                            pass.push_back((qid.clone(), p.clone(), n.clone()));
                        }
                    }
                }
                pass
            }
        }
    }
}

pub struct TrainIter<'d, 'a> {
    dataset: &'d TrainDataset<'a>,
    rng: StdRng,
    pending: VecDeque<(String, String, String)>,
    passes: usize,
    empty_passes: usize,
    yielded_this_pass: usize,
    done: bool,
}

impl Iterator for TrainIter<'_, '_> {
    type Item = Result<TrainingExample, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let Some((qid, pos, neg)) = self.pending.pop_front() else {
                if self.passes > 0 && self.yielded_this_pass == 0 {
                    self.empty_passes += 1;
                } else {
                    self.empty_passes = 0;
                }
                if self.dataset.is_empty() || self.empty_passes >= self.dataset.max_empty_passes() {
                    self.done = true;
                    return Some(Err(PipelineError::EmptyTrainingSet));
                }
                self.pending = self.dataset.next_pass(&mut self.rng);
                self.yielded_this_pass = 0;
                self.passes += 1;
                continue;
            };

            let extractor = self.dataset.extractor;
            let features = extractor
                .vectorize(&qid, &pos)
                .and_then(|p| extractor.vectorize(&qid, &neg).map(|n| (p, n)));
            match features {
                Ok((pos_features, neg_features)) => {
                    self.yielded_this_pass += 1;
                    return Some(Ok(TrainingExample {
                        qid,
                        pos_doc_id: pos,
                        neg_doc_id: neg,
                        pos_features,
                        neg_features,
                    }));
                }
                Err(PipelineError::MissingDocument { .. }) => {
                    warn!(
                        "Skipping training pair with missing features: qid={} posid={} negid={}",
                        qid, pos, neg
                    );
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ============================================================================
// Prediction
// ============================================================================

/// Builds prediction datasets. Relevance is ignored.
#[derive(Debug, Clone, Default)]
pub struct PredSampler;

impl PredSampler {
    pub fn prepare<'a>(&self, run: &Run, extractor: &'a dyn Extractor) -> Result<PredDataset<'a>, PipelineError> {
        PredDataset::new(run, extractor)
    }
}

/// Every `(qid, doc_id)` pair of a run, in run order.
pub struct PredDataset<'a> {
    extractor: &'a dyn Extractor,
    pairs: Vec<(String, String)>,
}

impl<'a> PredDataset<'a> {
    pub fn new(run: &Run, extractor: &'a dyn Extractor) -> Result<Self, PipelineError> {
        ensure_preprocessed(extractor)?;
        let pairs = run
            .iter()
            .flat_map(|(qid, docs)| docs.iter().map(move |d| (qid.to_string(), d.doc_id.clone())))
            .collect();
        Ok(Self { extractor, pairs })
    }

    /// Pairs without vectorising.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(q, d)| (q.as_str(), d.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Vectorised examples. A missing document is an error here, since a
    /// silently dropped pair would change the evaluated ranking.
    pub fn iter(&self) -> impl Iterator<Item = Result<PredictionExample, PipelineError>> + '_ {
        self.pairs.iter().map(move |(qid, doc_id)| {
            let features = self.extractor.vectorize(qid, doc_id).map_err(|e| {
                error!("Got no features for prediction: qid={} docid={}", qid, doc_id);
                e
            })?;
            Ok(PredictionExample {
                qid: qid.clone(),
                doc_id: doc_id.clone(),
                features,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::InMemoryCollection;
    use crate::config::BagOfWordsConfig;
    use crate::extractor::BagOfWordsExtractor;
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashSet};
    use std::sync::Arc;

    fn run(entries: &[(&str, &str, f64)]) -> Run {
        entries
            .iter()
            .map(|(q, d, s)| (q.to_string(), d.to_string(), *s))
            .collect()
    }

    fn qrels(entries: &[(&str, &str, i32)]) -> Qrels {
        entries
            .iter()
            .map(|(q, d, g)| (q.to_string(), d.to_string(), *g))
            .collect()
    }

    /// Extractor preprocessed over every query and document of `run`.
    fn extractor_for(run: &Run, collection_docs: &[&str]) -> BagOfWordsExtractor {
        let collection: InMemoryCollection = collection_docs
            .iter()
            .map(|d| (d.to_string(), format!("text of {d}")))
            .collect();
        let mut extractor = BagOfWordsExtractor::new(BagOfWordsConfig::default(), Arc::new(collection));
        let qids: BTreeSet<String> = run.query_ids().map(String::from).collect();
        let docs: BTreeSet<String> = run.doc_ids().into_iter().map(String::from).collect();
        let topics = qids.iter().map(|q| (q.clone(), format!("query {q}"))).collect();
        extractor.preprocess(&qids, &docs, &topics).unwrap();
        extractor
    }

    fn sample_run() -> Run {
        run(&[
            ("q1", "a", 3.0),
            ("q1", "b", 2.0),
            ("q1", "c", 1.0),
            ("q2", "d", 1.0),
            ("q3", "e", 1.0),
            ("q3", "f", 0.5),
        ])
    }

    fn sample_qrels() -> Qrels {
        // q2 has no negatives, q3 no positives, q4 is not in the run
        qrels(&[
            ("q1", "a", 1),
            ("q1", "b", 0),
            ("q2", "d", 2),
            ("q3", "e", 0),
            ("q4", "z", 1),
        ])
    }

    #[test]
    fn test_sparse_queries_are_skipped() {
        let run = sample_run();
        let extractor = extractor_for(&run, &["a", "b", "c", "d", "e", "f"]);
        let dataset = TripletSampler { seed: 1 }
            .prepare(&run, &sample_qrels(), &extractor, 1)
            .unwrap();

        assert_eq!(dataset.qids().collect::<Vec<_>>(), vec!["q1"]);
        // q1: positive a; negatives b (judged 0) and c (unjudged)
        assert_eq!(dataset.total_samples(), 2);
    }

    #[test]
    fn test_query_missing_from_qrels_is_skipped() {
        let run = run(&[("q9", "a", 1.0), ("q1", "a", 1.0), ("q1", "b", 0.5)]);
        let extractor = extractor_for(&run, &["a", "b"]);
        let dataset = ExhaustiveSampler
            .prepare(&run, &sample_qrels(), &extractor, 1)
            .unwrap();
        assert_eq!(dataset.qids().collect::<Vec<_>>(), vec!["q1"]);
    }

    #[test]
    fn test_exhaustive_pass_enumerates_every_triplet() {
        let run = sample_run();
        let extractor = extractor_for(&run, &["a", "b", "c", "d", "e", "f"]);
        let dataset = ExhaustiveSampler
            .prepare(&run, &sample_qrels(), &extractor, 1)
            .unwrap();

        let pass: Vec<(String, String)> = dataset
            .iter()
            .take(dataset.pass_len())
            .map(|ex| {
                let ex = ex.unwrap();
                (ex.pos_doc_id, ex.neg_doc_id)
            })
            .collect();
        assert_eq!(
            pass,
            vec![("a".to_string(), "b".to_string()), ("a".to_string(), "c".to_string())]
        );
    }

    #[test]
    fn test_random_sampling_is_reproducible() {
        let run = sample_run();
        let extractor = extractor_for(&run, &["a", "b", "c", "d", "e", "f"]);
        let dataset = TripletSampler { seed: 42 }
            .prepare(&run, &sample_qrels(), &extractor, 1)
            .unwrap();

        let draw = || -> Vec<String> {
            dataset
                .iter()
                .take(20)
                .map(|ex| ex.unwrap().neg_doc_id)
                .collect()
        };
        let first = draw();
        assert_eq!(first, draw());
        let negs: HashSet<&String> = first.iter().collect();
        assert!(negs.iter().all(|n| *n == "b" || *n == "c"));
    }

    #[test]
    fn test_missing_document_skipped_in_training() {
        let run = run(&[("q1", "a", 3.0), ("q1", "b", 2.0), ("q1", "gone", 1.0)]);
        // "gone" is not in the collection
        let extractor = extractor_for(&run, &["a", "b"]);
        let dataset = ExhaustiveSampler
            .prepare(&run, &qrels(&[("q1", "a", 1)]), &extractor, 1)
            .unwrap();

        let examples: Vec<TrainingExample> = dataset
            .iter()
            .take(3)
            .map(Result::unwrap)
            .collect();
        assert!(examples.iter().all(|ex| ex.neg_doc_id == "b"));
    }

    #[test]
    fn test_empty_training_set_errors_once() {
        let run = run(&[("q1", "a", 1.0)]);
        let extractor = extractor_for(&run, &["a"]);
        let dataset = TripletSampler { seed: 1 }
            .prepare(&run, &qrels(&[("q1", "a", 1)]), &extractor, 1)
            .unwrap();
        assert!(dataset.is_empty());

        let mut iter = dataset.iter();
        assert!(matches!(iter.next(), Some(Err(PipelineError::EmptyTrainingSet))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_all_documents_missing_ends_stream() {
        let run = run(&[("q1", "a", 1.0), ("q1", "b", 0.5)]);
        let extractor = extractor_for(&run, &[]);
        let dataset = ExhaustiveSampler
            .prepare(&run, &qrels(&[("q1", "a", 1)]), &extractor, 1)
            .unwrap();
        let results: Vec<_> = dataset.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(PipelineError::EmptyTrainingSet)));
    }

    #[test]
    fn test_prediction_covers_every_pair_once() {
        let run = sample_run();
        let extractor = extractor_for(&run, &["a", "b", "c", "d", "e", "f"]);
        let dataset = PredSampler.prepare(&run, &extractor).unwrap();

        assert_eq!(dataset.len(), run.num_entries());
        let pairs: Vec<(&str, &str)> = dataset.pairs().collect();
        assert_eq!(pairs[0], ("q1", "a"));
        assert_eq!(pairs[3], ("q2", "d"));
        assert_eq!(dataset.iter().filter(|r| r.is_ok()).count(), 6);
    }

    #[test]
    fn test_prediction_missing_document_is_error() {
        let run = run(&[("q1", "a", 1.0), ("q1", "gone", 0.5)]);
        let extractor = extractor_for(&run, &["a"]);
        let dataset = PredSampler.prepare(&run, &extractor).unwrap();

        let results: Vec<_> = dataset.iter().collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(PipelineError::MissingDocument { .. })));
    }

    #[test]
    fn test_requires_preprocessed_extractor() {
        let extractor = BagOfWordsExtractor::new(
            BagOfWordsConfig::default(),
            Arc::new(InMemoryCollection::default()),
        );
        assert!(PredSampler.prepare(&sample_run(), &extractor).is_err());
        assert!(TripletSampler { seed: 1 }
            .prepare(&sample_run(), &sample_qrels(), &extractor, 1)
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_positives_meet_relevance_level(
            grades in prop::collection::vec(-1i32..3, 2..8),
            level in 1i32..3,
            seed in any::<u64>(),
        ) {
            let mut r = Run::new();
            let mut j = Vec::new();
            for (i, g) in grades.iter().enumerate() {
                r.insert("q1", format!("d{i}"), -(i as f64));
                j.push(("q1".to_string(), format!("d{i}"), *g));
            }
            let judged: Qrels = j.into_iter().collect();
            let docs: Vec<String> = (0..grades.len()).map(|i| format!("d{i}")).collect();
            let doc_refs: Vec<&str> = docs.iter().map(String::as_str).collect();
            let extractor = extractor_for(&r, &doc_refs);

            let dataset = TripletSampler { seed }.prepare(&r, &judged, &extractor, level).unwrap();
            if !dataset.is_empty() {
                for example in dataset.iter().take(10) {
                    let example = example.unwrap();
                    let pos = judged.grade("q1", &example.pos_doc_id).unwrap();
                    let neg = judged.grade("q1", &example.neg_doc_id).unwrap();
                    prop_assert!(pos >= level);
                    prop_assert!(neg < level);
                }
            }
        }
    }
}
