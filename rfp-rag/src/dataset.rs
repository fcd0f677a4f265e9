//! CSV and JSONL tables exchanged with the pipeline: the full-text corpus,
//! chunk tables, labelled evaluation queries and evaluation outputs.
//!
//! Header names are matched exactly, after stripping a leading UTF-8 byte
//! order mark. A missing input file is [`RagError::NotFound`]; a table
//! without a required column is [`RagError::ConfigError`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::{Chunk, SourceDocument};
use crate::error::{RagError, Result};
use crate::eval::{EvalFailure, EvalQuery, EvalRecord, RelevanceLevel, parse_gold_ids};
use crate::judge::JudgeScores;

/// Longest judge rationale kept in result tables; the JSONL log keeps it whole.
pub const RATIONALE_MAX_CHARS: usize = 300;

/// Column names of the full-text corpus table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusColumns {
    pub doc_id: String,
    pub text: String,
    /// Optional column copied into each document's source tag.
    pub source: Option<String>,
}

impl Default for CorpusColumns {
    fn default() -> Self {
        Self { doc_id: "doc_id".into(), text: "full_text".into(), source: Some("project_id".into()) }
    }
}

struct Table {
    reader: csv::Reader<File>,
    columns: HashMap<String, usize>,
}

impl Table {
    fn open(path: &Path, required: &[&str]) -> Result<Self> {
        if !path.is_file() {
            return Err(RagError::NotFound(format!("table {}", path.display())));
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: csv::StringRecord = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| (if i == 0 { h.trim_start_matches('\u{feff}') } else { h }).trim().to_string())
            .collect();
        reader.set_headers(headers.clone());

        let columns: HashMap<String, usize> =
            headers.iter().enumerate().map(|(i, h)| (h.to_string(), i)).collect();
        let missing: Vec<&str> =
            required.iter().copied().filter(|c| !columns.contains_key(*c)).collect();
        if !missing.is_empty() {
            return Err(RagError::ConfigError(format!(
                "{} is missing required columns {missing:?} (required: {required:?})",
                path.display()
            )));
        }
        Ok(Self { reader, columns })
    }

    fn index(&self, column: &str) -> Option<usize> {
        self.columns.get(column).copied()
    }
}

fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<&str> {
    index.and_then(|i| record.get(i)).map(str::trim).filter(|s| !s.is_empty())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Read the full-text corpus. Rows with an empty text cell become documents
/// without text, which the chunker skips.
pub fn read_corpus(path: &Path, columns: &CorpusColumns) -> Result<Vec<SourceDocument>> {
    let mut table = Table::open(path, &[columns.doc_id.as_str(), columns.text.as_str()])?;
    let id_idx = table.index(&columns.doc_id);
    let text_idx = table.index(&columns.text);
    let source_idx = columns.source.as_deref().and_then(|c| table.index(c));

    let mut documents = Vec::new();
    for record in table.reader.records() {
        let record = record?;
        let Some(doc_id) = cell(&record, id_idx) else {
            debug!(line = ?record.position().map(|p| p.line()), "skipping corpus row without id");
            continue;
        };
        // Text keeps its inner whitespace; only blank cells are dropped.
        let text = text_idx.and_then(|i| record.get(i)).filter(|t| !t.trim().is_empty());
        documents.push(SourceDocument {
            doc_id: doc_id.to_string(),
            text: text.map(String::from),
            source_tag: cell(&record, source_idx).map(String::from),
        });
    }

    info!(path = %path.display(), documents = documents.len(), "read corpus");
    Ok(documents)
}

#[derive(Serialize, Deserialize)]
struct ChunkRow {
    doc_id: String,
    chunk_id: usize,
    text: String,
    #[serde(default)]
    source: Option<String>,
}

/// Write a chunk table with columns `doc_id, chunk_id, text, source`.
pub fn write_chunks(path: &Path, chunks: &[Chunk]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for chunk in chunks {
        writer.serialize(ChunkRow {
            doc_id: chunk.doc_id.clone(),
            chunk_id: chunk.chunk_index,
            text: chunk.text.clone(),
            source: chunk.source_tag.clone(),
        })?;
    }
    writer.flush()?;
    info!(path = %path.display(), chunks = chunks.len(), "wrote chunk table");
    Ok(())
}

/// Read a chunk table written by [`write_chunks`].
pub fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let mut table = Table::open(path, &["doc_id", "chunk_id", "text"])?;
    let chunks = table
        .reader
        .deserialize::<ChunkRow>()
        .map(|row| {
            let row = row?;
            Ok(Chunk {
                doc_id: row.doc_id,
                chunk_index: row.chunk_id,
                text: row.text,
                source_tag: row.source.filter(|s| !s.trim().is_empty()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(path = %path.display(), chunks = chunks.len(), "read chunk table");
    Ok(chunks)
}

/// Read labelled queries: `query_id`, `query_text` and the gold column of
/// `level` (`gold_project_ids` or `gold_doc_ids`).
pub fn read_eval_queries(path: &Path, level: RelevanceLevel) -> Result<Vec<EvalQuery>> {
    let gold_column = level.gold_column();
    let mut table = Table::open(path, &["query_id", "query_text", gold_column])?;
    let id_idx = table.index("query_id");
    let text_idx = table.index("query_text");
    let gold_idx = table.index(gold_column);

    let mut queries = Vec::new();
    for (row, record) in table.reader.records().enumerate() {
        let record = record?;
        let raw_id = cell(&record, id_idx).unwrap_or_default();
        let query_id = raw_id.parse::<i64>().map_err(|_| {
            RagError::ConfigError(format!(
                "{} row {}: query_id '{raw_id}' is not an integer",
                path.display(),
                row + 1
            ))
        })?;
        queries.push(EvalQuery {
            query_id,
            query_text: cell(&record, text_idx).unwrap_or_default().to_string(),
            gold_ids: cell(&record, gold_idx).map(parse_gold_ids).unwrap_or_default(),
        });
    }

    info!(path = %path.display(), queries = queries.len(), "read evaluation queries");
    Ok(queries)
}

/// Column names of the result table for cut-off `k`.
pub fn eval_result_headers(k: usize, level: RelevanceLevel) -> Vec<String> {
    vec![
        "query_id".into(),
        "query_text".into(),
        level.gold_column().into(),
        level.retrieved_column(k),
        format!("hit@{k}"),
        format!("mrr@{k}"),
        "first_gold_rank".into(),
        "judge_accuracy".into(),
        "judge_completeness".into(),
        "judge_professionalism".into(),
        "judge_rationale".into(),
        "status".into(),
        "error".into(),
    ]
}

/// `status` cell of a query that completed.
pub const STATUS_OK: &str = "ok";

fn join_ids<'a>(ids: impl IntoIterator<Item = &'a String>) -> String {
    ids.into_iter().map(String::as_str).collect::<Vec<_>>().join("|")
}

fn record_row(record: &EvalRecord) -> [String; 13] {
    let judge = |f: fn(&JudgeScores) -> String| record.judge.as_ref().map(f).unwrap_or_default();
    [
        record.query_id.to_string(),
        record.query_text.clone(),
        join_ids(&record.gold_ids),
        join_ids(&record.retrieved_ids),
        format!("{:.1}", record.metrics.hit),
        record.metrics.mrr.to_string(),
        record.metrics.first_gold_rank.map_or(-1, |r| r as i64).to_string(),
        judge(|j| j.accuracy.to_string()),
        judge(|j| j.completeness.to_string()),
        judge(|j| j.professionalism.to_string()),
        judge(|j| j.rationale.chars().take(RATIONALE_MAX_CHARS).collect()),
        STATUS_OK.to_string(),
        String::new(),
    ]
}

fn failure_row(failure: &EvalFailure) -> [String; 13] {
    [
        failure.query_id.to_string(),
        failure.query_text.clone(),
        join_ids(&failure.gold_ids),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        format!("failed@{}", failure.state),
        failure.error.clone(),
    ]
}

/// Write one row per query, completed or failed, ordered by `query_id`.
///
/// Judge columns are empty for records that were not judged and
/// `first_gold_rank` is `-1` when no gold id was found. Failed queries keep
/// their gold ids, leave every score column empty and carry
/// `failed@{STATE}` in `status` with the error message in `error`.
pub fn write_eval_results(
    path: &Path,
    records: &[EvalRecord],
    failures: &[EvalFailure],
    k: usize,
    level: RelevanceLevel,
) -> Result<()> {
    create_parent(path)?;
    let mut rows: Vec<(i64, [String; 13])> = records
        .iter()
        .map(|r| (r.query_id, record_row(r)))
        .chain(failures.iter().map(|f| (f.query_id, failure_row(f))))
        .collect();
    rows.sort_by_key(|(id, _)| *id);

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(eval_result_headers(k, level))?;
    for (_, row) in &rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!(
        path = %path.display(),
        rows = rows.len(),
        failed = failures.len(),
        "wrote evaluation results"
    );
    Ok(())
}

#[derive(Serialize)]
struct JudgmentLine<'a> {
    query_id: i64,
    query_text: &'a str,
    answer: Option<&'a str>,
    judge: Option<&'a JudgeScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_at: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Line-delimited JSON log of raw answers and judge output, one line per
/// query, flushed as each line is written. Failed queries get a line with
/// `failed_at` and `error` set.
pub struct JudgmentLog {
    writer: BufWriter<File>,
    lines: usize,
}

impl JudgmentLog {
    /// Create (or truncate) the log at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        create_parent(path)?;
        Ok(Self { writer: BufWriter::new(File::create(path)?), lines: 0 })
    }

    pub fn append(&mut self, record: &EvalRecord) -> Result<()> {
        self.write_line(&JudgmentLine {
            query_id: record.query_id,
            query_text: &record.query_text,
            answer: record.answer.as_deref(),
            judge: record.judge.as_ref(),
            failed_at: None,
            error: None,
        })
    }

    pub fn append_failure(&mut self, failure: &EvalFailure) -> Result<()> {
        self.write_line(&JudgmentLine {
            query_id: failure.query_id,
            query_text: &failure.query_text,
            answer: None,
            judge: None,
            failed_at: Some(&failure.state),
            error: Some(&failure.error),
        })
    }

    fn write_line(&mut self, line: &JudgmentLine<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.lines += 1;
        Ok(())
    }

    /// Number of lines written so far.
    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }
}
