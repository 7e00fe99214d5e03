//! Cross-validation folds.
//!
//! Folds are read once from a JSON file shaped like
//!
//! ```json
//! {"s1": {"train_qids": ["q1"], "predict": {"dev": ["q2"], "test": ["q3"]}}}
//! ```
//!
//! and are read-only afterwards. Loading rejects fold names that cannot be
//! used as a path segment and folds whose train and test sets overlap.

use crate::error::{ConfigurationError, ParseError, PipelineError, Split};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Query ids assigned to one fold's splits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train_qids: BTreeSet<String>,
    pub predict: PredictSplits,
}

/// Held-out splits of a fold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictSplits {
    pub dev: BTreeSet<String>,
    pub test: BTreeSet<String>,
}

impl Fold {
    pub fn new(
        train: impl IntoIterator<Item = impl Into<String>>,
        dev: impl IntoIterator<Item = impl Into<String>>,
        test: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            train_qids: train.into_iter().map(Into::into).collect(),
            predict: PredictSplits {
                dev: dev.into_iter().map(Into::into).collect(),
                test: test.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn qids(&self, split: Split) -> &BTreeSet<String> {
        match split {
            Split::Train => &self.train_qids,
            Split::Dev => &self.predict.dev,
            Split::Test => &self.predict.test,
        }
    }

    /// Union of train and dev, the queries a first-stage run is tuned on.
    pub fn tuning_qids(&self) -> BTreeSet<String> {
        self.train_qids.union(&self.predict.dev).cloned().collect()
    }
}

/// Named folds of a benchmark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Folds {
    folds: BTreeMap<String, Fold>,
}

impl Folds {
    /// Builds a fold set, validating every fold.
    pub fn new(folds: BTreeMap<String, Fold>) -> Result<Self, ConfigurationError> {
        for (name, fold) in &folds {
            validate_fold_name(name)?;
            let overlap: Vec<&String> = fold
                .train_qids
                .intersection(&fold.predict.test)
                .collect();
            if let Some(example) = overlap.first() {
                return Err(ConfigurationError::OverlappingSplits {
                    fold: name.clone(),
                    count: overlap.len(),
                    example: (*example).clone(),
                });
            }
        }
        Ok(Self { folds })
    }

    /// Loads folds from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let folds: BTreeMap<String, Fold> = serde_json::from_str(&text)
            .map_err(|e| ParseError::new(path, e.line(), e.to_string()))?;
        Ok(Self::new(folds)?)
    }

    /// Fold names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.folds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    /// Looks up a fold by name.
    pub fn get(&self, name: &str) -> Result<&Fold, ConfigurationError> {
        self.folds
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownFold {
                fold: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Query ids of one split of one fold.
    pub fn split(&self, name: &str, split: Split) -> Result<&BTreeSet<String>, ConfigurationError> {
        Ok(self.get(name)?.qids(split))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fold)> {
        self.folds.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// Union of every fold's test queries.
    pub fn all_test_qids(&self) -> BTreeSet<String> {
        self.folds
            .values()
            .flat_map(|f| f.predict.test.iter().cloned())
            .collect()
    }
}

/// Fold names become directory names, so they must be a single plain segment.
pub fn validate_fold_name(name: &str) -> Result<(), ConfigurationError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if invalid {
        return Err(ConfigurationError::InvalidFoldName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn two_folds() -> Folds {
        let mut map = BTreeMap::new();
        map.insert("s1".to_string(), Fold::new(["q1", "q2"], ["q3"], ["q4"]));
        map.insert("s2".to_string(), Fold::new(["q3", "q4"], ["q1"], ["q2"]));
        Folds::new(map).unwrap()
    }

    #[test]
    fn test_split_lookup() {
        let folds = two_folds();
        assert_eq!(folds.names().collect::<Vec<_>>(), vec!["s1", "s2"]);
        assert!(folds.split("s1", Split::Test).unwrap().contains("q4"));
        assert_eq!(folds.split("s2", Split::Dev).unwrap().len(), 1);
        assert_eq!(folds.all_test_qids().len(), 2);
    }

    #[test]
    fn test_unknown_fold_lists_available() {
        let folds = two_folds();
        let err = folds.split("s9", Split::Train).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("s9"));
        assert!(msg.contains("s1, s2"));
    }

    #[test]
    fn test_rejects_overlapping_train_test() {
        let mut map = BTreeMap::new();
        map.insert("s1".to_string(), Fold::new(["q1", "q2"], ["q3"], ["q2"]));
        let err = Folds::new(map).unwrap_err();
        assert!(matches!(err, ConfigurationError::OverlappingSplits { count: 1, .. }));
    }

    #[test]
    fn test_rejects_path_like_names() {
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(validate_fold_name(name).is_err(), "{name:?} accepted");
        }
        assert!(validate_fold_name("s1").is_ok());
        assert!(validate_fold_name("fold.1").is_ok());
    }

    #[test]
    fn test_load_json_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folds.json");
        std::fs::write(
            &path,
            r#"{"s1": {"train_qids": ["q1"], "predict": {"dev": ["q2"], "test": ["q3"]}}}"#,
        )
        .unwrap();

        let folds = Folds::load(&path).unwrap();
        let fold = folds.get("s1").unwrap();
        assert!(fold.train_qids.contains("q1"));
        assert_eq!(fold.tuning_qids().len(), 2);
    }

    #[test]
    fn test_load_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folds.json");
        std::fs::write(&path, r#"{"s1": {"train_qids": "q1"}}"#).unwrap();
        assert!(matches!(Folds::load(&path), Err(PipelineError::Parse(_))));
    }

    proptest! {
        #[test]
        fn prop_accepted_folds_have_disjoint_train_test(
            train in prop::collection::btree_set("q[0-9]", 0..6),
            test in prop::collection::btree_set("q[0-9]", 0..6),
        ) {
            let mut map = BTreeMap::new();
            map.insert("s1".to_string(), Fold::new(train, Vec::<String>::new(), test));
            if let Ok(folds) = Folds::new(map) {
                let train = folds.split("s1", Split::Train).unwrap();
                let test = folds.split("s1", Split::Test).unwrap();
                prop_assert!(train.is_disjoint(test));
            }
        }
    }
}
