//! Line-oriented run, qrels and topics files.
//!
//! | File   | Line format                                 |
//! |--------|---------------------------------------------|
//! | run    | `<qid> Q0 <docid> <rank> <score> <tag>`     |
//! | qrels  | `<qid> 0 <docid> <grade>`                   |
//! | topics | `<qid>\t<text>`                             |
//!
//! Blank lines are ignored everywhere. Runs are read in file order and never
//! re-sorted; the rank column is validated but not used for ordering.

use super::{Qrels, Run};
use crate::cache::{persist, temp_file_for};
use crate::error::{ParseError, PipelineError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Tag written in the last column of saved runs.
pub const DEFAULT_RUN_TAG: &str = "foldwise";

// ============================================================================
// Reading
// ============================================================================

/// Loads a run file.
///
/// A document repeated within one query keeps its first position and takes
/// the last score seen.
///
/// # Errors
///
/// `PipelineError::Parse` on a line without six fields or with a
/// non-numeric rank or score; `PipelineError::Io` if the file can't be read.
pub fn load(path: &Path) -> Result<Run, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut entries = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PipelineError::io(path, e))?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(ParseError::new(
                path,
                line_no,
                format!("expected 6 fields, got {}", fields.len()),
            )
            .into());
        }
        let (qid, doc_id) = (fields[0], fields[2]);
        fields[3]
            .parse::<usize>()
            .map_err(|_| ParseError::new(path, line_no, format!("invalid rank '{}'", fields[3])))?;
        let score = fields[4]
            .parse::<f64>()
            .map_err(|_| ParseError::new(path, line_no, format!("invalid score '{}'", fields[4])))?;

        entries.push((qid.to_string(), doc_id.to_string(), score));
    }
    let run: Run = entries.into_iter().collect();

    debug!(
        "Loaded run {} ({} queries, {} entries)",
        path.display(),
        run.len(),
        run.num_entries()
    );
    Ok(run)
}

/// Loads a qrels file. Grades may be negative.
pub fn load_qrels(path: &Path) -> Result<Qrels, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut judgments: HashMap<String, HashMap<String, i32>> = HashMap::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PipelineError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(ParseError::new(
                path,
                idx + 1,
                format!("expected 4 fields, got {}", fields.len()),
            )
            .into());
        }
        let grade = fields[3].parse::<i32>().map_err(|_| {
            ParseError::new(path, idx + 1, format!("invalid grade '{}'", fields[3]))
        })?;
        judgments
            .entry(fields[0].to_string())
            .or_default()
            .insert(fields[2].to_string(), grade);
    }

    Ok(Qrels::new(judgments))
}

/// Loads a topics file of `<qid>\t<text>` lines.
pub fn load_topics(path: &Path) -> Result<BTreeMap<String, String>, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut topics = BTreeMap::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PipelineError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let (qid, text) = line
            .split_once('\t')
            .ok_or_else(|| ParseError::new(path, idx + 1, "expected '<qid>\\t<text>'"))?;
        let qid = qid.trim();
        if qid.is_empty() {
            return Err(ParseError::new(path, idx + 1, "empty query id").into());
        }
        topics.insert(qid.to_string(), text.trim().to_string());
    }

    Ok(topics)
}

// ============================================================================
// Writing
// ============================================================================

/// Saves a run in rank order, creating parent directories if missing.
///
/// The file is written to a uniquely named sibling temp file, synced, then
/// renamed over the destination, so readers never observe a partial run and
/// concurrent writers never share a temp file.
pub fn save(run: &Run, path: &Path) -> Result<(), PipelineError> {
    let tmp = temp_file_for(path)?;
    let tmp_path = tmp.path().to_path_buf();
    let mut writer = BufWriter::new(tmp);
    for (qid, docs) in run.iter() {
        for (rank, doc) in docs.iter().enumerate() {
            writeln!(
                writer,
                "{} Q0 {} {} {} {}",
                qid,
                doc.doc_id,
                rank + 1,
                doc.score,
                DEFAULT_RUN_TAG
            )
            .map_err(|e| PipelineError::io(&tmp_path, e))?;
        }
    }
    let tmp = writer
        .into_inner()
        .map_err(|e| PipelineError::io(&tmp_path, e.into_error()))?;
    persist(tmp, path)?;

    debug!("Saved run {} ({} entries)", path.display(), run.num_entries());
    Ok(())
}

// ============================================================================
// Truncation
// ============================================================================

/// Restricts a run to `qids` and keeps the first `max_docs` entries of each
/// remaining query, in their existing order.
///
/// Pure; the input run is not modified.
pub fn truncate(run: &Run, qids: &BTreeSet<String>, max_docs: usize) -> Run {
    let mut out = Run::new();
    for (qid, docs) in run.iter() {
        if !qids.contains(qid) {
            continue;
        }
        out.ensure_query(qid);
        for doc in docs.iter().take(max_docs) {
            out.push_unchecked(qid, doc.clone());
        }
    }
    out
}
