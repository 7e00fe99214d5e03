//! Ranked runs and relevance judgments.
//!
//! A [`Run`] maps query ids to ranked document lists. The order of each
//! list is significant: it is the rank order produced upstream, and the
//! run store writes and reads it back verbatim.
//!
//! [`Qrels`] holds graded relevance judgments and is never mutated after
//! loading; split-restricted views are built with [`Qrels::for_queries`].

mod store;

pub use store::{load, load_qrels, load_topics, save, truncate};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A document and its score within one query's ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: String,
    pub score: f64,
}

impl ScoredDoc {
    pub fn new(doc_id: impl Into<String>, score: f64) -> Self {
        Self {
            doc_id: doc_id.into(),
            score,
        }
    }
}

/// Query id -> ranked documents.
///
/// Query ids iterate in sorted order; documents iterate in rank order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    queries: BTreeMap<String, Vec<ScoredDoc>>,
}

impl Run {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `doc_id` to the ranking of `qid`.
    ///
    /// If the document is already ranked for this query its score is
    /// replaced in place, keeping its position. Each call scans the query's
    /// ranking; use [`Extend`] or [`Run::merge`] for bulk updates.
    pub fn insert(&mut self, qid: impl Into<String>, doc_id: impl Into<String>, score: f64) {
        let doc_id = doc_id.into();
        let docs = self.queries.entry(qid.into()).or_default();
        match docs.iter_mut().find(|d| d.doc_id == doc_id) {
            Some(existing) => existing.score = score,
            None => docs.push(ScoredDoc { doc_id, score }),
        }
    }

    /// Appends without the duplicate check. Callers guarantee uniqueness.
    pub(crate) fn push_unchecked(&mut self, qid: &str, doc: ScoredDoc) {
        match self.queries.get_mut(qid) {
            Some(docs) => docs.push(doc),
            None => {
                self.queries.insert(qid.to_string(), vec![doc]);
            }
        }
    }

    /// Registers a query with an empty ranking if it is not present.
    ///
    /// Used when pooling test queries so that queries without results still
    /// count (as zero) in the evaluation.
    pub fn ensure_query(&mut self, qid: impl Into<String>) {
        self.queries.entry(qid.into()).or_default();
    }

    /// Ranking for one query, in rank order.
    pub fn get(&self, qid: &str) -> Option<&[ScoredDoc]> {
        self.queries.get(qid).map(Vec::as_slice)
    }

    pub fn contains_query(&self, qid: &str) -> bool {
        self.queries.contains_key(qid)
    }

    /// Iterates `(qid, ranking)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ScoredDoc])> {
        self.queries.iter().map(|(q, d)| (q.as_str(), d.as_slice()))
    }

    pub fn query_ids(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    /// Distinct document ids across all queries.
    pub fn doc_ids(&self) -> BTreeSet<&str> {
        self.queries
            .values()
            .flat_map(|docs| docs.iter().map(|d| d.doc_id.as_str()))
            .collect()
    }

    /// Number of queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Total number of (query, document) entries.
    pub fn num_entries(&self) -> usize {
        self.queries.values().map(Vec::len).sum()
    }

    /// Copy of this run limited to the given queries, rankings untouched.
    pub fn restrict(&self, qids: &BTreeSet<String>) -> Run {
        let queries = self
            .queries
            .iter()
            .filter(|(qid, _)| qids.contains(*qid))
            .map(|(qid, docs)| (qid.clone(), docs.clone()))
            .collect();
        Run { queries }
    }

    /// Copy of this run with each ranking re-sorted by descending score.
    ///
    /// The sort is stable, so ties keep their current relative order.
    pub fn sorted(&self) -> Run {
        let mut run = self.clone();
        for docs in run.queries.values_mut() {
            docs.sort_by(|a, b| b.score.total_cmp(&a.score));
        }
        run
    }

    /// Merges another run into this one. Scores from `other` win on overlap.
    ///
    /// Documents new to a query are appended in `other`'s order.
    pub fn merge(&mut self, other: &Run) {
        for (qid, docs) in other.iter() {
            let ranking = self.queries.entry(qid.to_string()).or_default();
            let mut positions = positions(ranking);
            for doc in docs {
                upsert(ranking, &mut positions, doc.doc_id.clone(), doc.score);
            }
        }
    }
}

/// Doc id -> index within one ranking.
fn positions(ranking: &[ScoredDoc]) -> HashMap<String, usize> {
    ranking
        .iter()
        .enumerate()
        .map(|(i, d)| (d.doc_id.clone(), i))
        .collect()
}

fn upsert(ranking: &mut Vec<ScoredDoc>, positions: &mut HashMap<String, usize>, doc_id: String, score: f64) {
    match positions.get(&doc_id) {
        Some(&i) => ranking[i].score = score,
        None => {
            positions.insert(doc_id.clone(), ranking.len());
            ranking.push(ScoredDoc { doc_id, score });
        }
    }
}

/// Bulk insert with the semantics of [`Run::insert`], indexing each touched
/// query once instead of scanning its ranking per document.
impl Extend<(String, String, f64)> for Run {
    fn extend<I: IntoIterator<Item = (String, String, f64)>>(&mut self, iter: I) {
        let mut index: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for (qid, doc_id, score) in iter {
            let ranking = self.queries.entry(qid.clone()).or_default();
            let positions = index.entry(qid).or_insert_with(|| positions(ranking));
            upsert(ranking, positions, doc_id, score);
        }
    }
}

impl FromIterator<(String, String, f64)> for Run {
    fn from_iter<I: IntoIterator<Item = (String, String, f64)>>(iter: I) -> Self {
        let mut run = Run::new();
        run.extend(iter);
        run
    }
}

/// Graded relevance judgments: query id -> (document id -> grade).
///
/// Grades are signed; anything below the benchmark's relevance level is
/// non-relevant for binary metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Qrels {
    judgments: HashMap<String, HashMap<String, i32>>,
}

impl Qrels {
    pub fn new(judgments: HashMap<String, HashMap<String, i32>>) -> Self {
        Self { judgments }
    }

    /// Judgments for one query.
    pub fn get(&self, qid: &str) -> Option<&HashMap<String, i32>> {
        self.judgments.get(qid)
    }

    /// Grade of a document for a query, if judged.
    pub fn grade(&self, qid: &str, doc_id: &str) -> Option<i32> {
        self.judgments.get(qid).and_then(|docs| docs.get(doc_id)).copied()
    }

    pub fn contains_query(&self, qid: &str) -> bool {
        self.judgments.contains_key(qid)
    }

    /// Iterates `(qid, judgments)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashMap<String, i32>)> {
        self.judgments.iter().map(|(q, j)| (q.as_str(), j))
    }

    /// Number of judged queries.
    pub fn len(&self) -> usize {
        self.judgments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }

    /// Total number of judgments.
    pub fn num_judgments(&self) -> usize {
        self.judgments.values().map(HashMap::len).sum()
    }

    /// Judgments for the given queries. Queries without judgments are kept
    /// with an empty map, so they carry zero weight in evaluation.
    pub fn for_queries<'a, I>(&self, qids: I) -> Qrels
    where
        I: IntoIterator<Item = &'a String>,
    {
        let judgments = qids
            .into_iter()
            .map(|qid| (qid.clone(), self.judgments.get(qid).cloned().unwrap_or_default()))
            .collect();
        Qrels { judgments }
    }

    /// Judgments for the given queries, dropping queries that have none.
    pub fn judged_subset<'a, I>(&self, qids: I) -> Qrels
    where
        I: IntoIterator<Item = &'a String>,
    {
        let judgments = qids
            .into_iter()
            .filter_map(|qid| self.judgments.get(qid).map(|j| (qid.clone(), j.clone())))
            .collect();
        Qrels { judgments }
    }
}

impl FromIterator<(String, String, i32)> for Qrels {
    fn from_iter<I: IntoIterator<Item = (String, String, i32)>>(iter: I) -> Self {
        let mut judgments: HashMap<String, HashMap<String, i32>> = HashMap::new();
        for (qid, doc_id, grade) in iter {
            judgments.entry(qid).or_default().insert(doc_id, grade);
        }
        Qrels { judgments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_preserves_rank_order() {
        let mut run = Run::new();
        run.insert("q1", "d3", 0.2);
        run.insert("q1", "d1", 0.9);
        run.insert("q1", "d2", 0.5);

        let docs: Vec<&str> = run.get("q1").unwrap().iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(docs, vec!["d3", "d1", "d2"]);
    }

    #[test]
    fn test_insert_duplicate_updates_in_place() {
        let mut run = Run::new();
        run.insert("q1", "d1", 0.9);
        run.insert("q1", "d2", 0.5);
        run.insert("q1", "d1", 0.1);

        let docs = run.get("q1").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0], ScoredDoc::new("d1", 0.1));
    }

    #[test]
    fn test_sorted_is_stable_on_ties() {
        let mut run = Run::new();
        run.insert("q1", "a", 0.5);
        run.insert("q1", "b", 0.9);
        run.insert("q1", "c", 0.5);

        let sorted = run.sorted();
        let docs: Vec<&str> = sorted.get("q1").unwrap().iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(docs, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_restrict_and_merge() {
        let mut run = Run::new();
        run.insert("q1", "d1", 1.0);
        run.insert("q2", "d2", 1.0);
        run.insert("q3", "d3", 1.0);

        let mut pooled = run.restrict(&qids(&["q1"]));
        assert_eq!(pooled.len(), 1);

        pooled.merge(&run.restrict(&qids(&["q3"])));
        assert_eq!(pooled.query_ids().collect::<Vec<_>>(), vec!["q1", "q3"]);
        assert_eq!(pooled.num_entries(), 2);
    }

    #[test]
    fn test_qrels_for_queries_keeps_unjudged_as_empty() {
        let qrels: Qrels = vec![("q1".to_string(), "d1".to_string(), 1)]
            .into_iter()
            .collect();

        let dev = qrels.for_queries(&qids(&["q1", "q9"]));
        assert_eq!(dev.len(), 2);
        assert!(dev.get("q9").unwrap().is_empty());

        let judged = qrels.judged_subset(&qids(&["q1", "q9"]));
        assert_eq!(judged.len(), 1);
        assert_eq!(judged.grade("q1", "d1"), Some(1));
    }

    #[test]
    fn test_merge_overlapping_rankings() {
        let mut base: Run = (0..2000)
            .map(|i| ("q1".to_string(), format!("d{i}"), 1.0))
            .collect();
        let other: Run = (1000..3000)
            .rev()
            .map(|i| ("q1".to_string(), format!("d{i}"), 2.0))
            .collect();
        base.merge(&other);

        let docs = base.get("q1").unwrap();
        assert_eq!(docs.len(), 3000);
        assert_eq!(docs[0], ScoredDoc::new("d0", 1.0));
        assert_eq!(docs[1500], ScoredDoc::new("d1500", 2.0));
        // new documents follow in the merged run's order
        assert_eq!(docs[2000].doc_id, "d2999");
        assert_eq!(docs[2999].doc_id, "d2000");
    }

    #[test]
    fn test_extend_matches_repeated_insert() {
        let entries = [("q1", "d1", 0.9), ("q2", "d1", 0.3), ("q1", "d2", 0.5), ("q1", "d1", 0.1)];
        let mut inserted = Run::new();
        inserted.insert("q1", "d0", 1.0);
        let mut extended = inserted.clone();

        for (qid, doc, score) in entries {
            inserted.insert(qid, doc, score);
        }
        extended.extend(entries.iter().map(|(q, d, s)| (q.to_string(), d.to_string(), *s)));

        assert_eq!(extended, inserted);
        assert_eq!(extended.get("q1").unwrap()[1], ScoredDoc::new("d1", 0.1));
    }
}
