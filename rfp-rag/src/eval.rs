//! Batch evaluation of retrieval (Hit@K, MRR@K) and answer quality (judge
//! scores) over a labelled query set.
//!
//! Each query runs to completion before the next starts:
//! `Pending → Retrieved → Answered → Judged → Recorded`. The answer and judge
//! steps run only when a generator (and judge) is configured, and the answer
//! reuses the documents already retrieved for scoring instead of searching
//! again. Summary means are computed once, after every query has finished.
//!
//! # Example
//!
//! ```rust,ignore
//! let evaluator = Evaluator::new(retriever, EvalOptions::default())
//!     .with_generator(Arc::new(DummyGenerator))
//!     .with_judge(Arc::new(DummyJudge));
//! let report = evaluator.run(&queries).await?;
//! println!("Hit@5 = {:.4}", report.summary.map_or(0.0, |s| s.hit_at_k));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::document::RetrievedDocument;
use crate::error::{RagError, Result};
use crate::generation::Generator;
use crate::judge::{Judge, JudgeScores};
use crate::rag::RagService;
use crate::retriever::Retriever;

/// Gold-id separators, in priority order.
pub const GOLD_SEPARATORS: [char; 3] = ['|', ',', ';'];

/// A labelled evaluation query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalQuery {
    pub query_id: i64,
    pub query_text: String,
    /// Identifiers counted as relevant (project ids or doc ids, depending on
    /// the [`RelevanceLevel`] of the run).
    pub gold_ids: BTreeSet<String>,
}

/// Parse a delimited list of gold ids.
///
/// The separator is the first of `|`, `,`, `;` that occurs in the input;
/// the others are then treated as ordinary characters. Input with none of
/// them is a single id. Pieces are trimmed and blanks dropped.
///
/// ```
/// use rfp_rag::eval::parse_gold_ids;
///
/// let ids = parse_gold_ids("P1 | P2,x");
/// assert!(ids.contains("P1") && ids.contains("P2,x"));
/// assert!(parse_gold_ids("  ").is_empty());
/// ```
pub fn parse_gold_ids(raw: &str) -> BTreeSet<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return BTreeSet::new();
    }
    match GOLD_SEPARATORS.iter().find(|sep| raw.contains(**sep)) {
        Some(sep) => {
            raw.split(*sep).map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
        }
        None => BTreeSet::from([raw.to_string()]),
    }
}

/// The granularity at which retrieved documents are matched against gold ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceLevel {
    /// Match on the document's source tag (its project id).
    #[default]
    Project,
    /// Match on the document id.
    Document,
}

impl RelevanceLevel {
    /// The id a retrieved document contributes at this level, if any.
    pub fn key<'a>(&self, doc: &'a RetrievedDocument) -> Option<&'a str> {
        let key = match self {
            Self::Project => doc.metadata.source_tag.as_deref(),
            Self::Document => Some(doc.metadata.doc_id.as_str()),
        };
        key.filter(|k| !k.trim().is_empty())
    }

    /// Column holding the gold ids in evaluation tables.
    pub fn gold_column(&self) -> &'static str {
        match self {
            Self::Project => "gold_project_ids",
            Self::Document => "gold_doc_ids",
        }
    }

    /// Column holding the ranked retrieved ids for cut-off `k`.
    pub fn retrieved_column(&self, k: usize) -> String {
        match self {
            Self::Project => format!("retrieved_projects_top{k}"),
            Self::Document => format!("retrieved_docs_top{k}"),
        }
    }
}

/// Ranked ids of `documents` at `level`, skipping documents without one.
pub fn retrieved_ids(documents: &[RetrievedDocument], level: RelevanceLevel) -> Vec<String> {
    documents.iter().filter_map(|doc| level.key(doc)).map(String::from).collect()
}

/// Hit@K and MRR@K for one query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankMetrics {
    /// 1.0 if a gold id appears in the top K, else 0.0.
    pub hit: f64,
    /// Reciprocal rank of the first gold id in the top K, else 0.0.
    pub mrr: f64,
    /// 1-based rank of the first gold id in the top K.
    pub first_gold_rank: Option<usize>,
}

/// Score a ranked id list against a gold set at cut-off `k`.
pub fn hit_mrr_at_k<S: AsRef<str>>(retrieved: &[S], gold: &BTreeSet<String>, k: usize) -> RankMetrics {
    let first_gold_rank = retrieved
        .iter()
        .take(k)
        .position(|id| gold.contains(id.as_ref()))
        .map(|pos| pos + 1);

    match first_gold_rank {
        Some(rank) => RankMetrics { hit: 1.0, mrr: 1.0 / rank as f64, first_gold_rank },
        None => RankMetrics { hit: 0.0, mrr: 0.0, first_gold_rank: None },
    }
}

/// Where a query is in its evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Pending,
    Retrieved,
    Answered,
    Judged,
    Recorded,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Retrieved => "RETRIEVED",
            Self::Answered => "ANSWERED",
            Self::Judged => "JUDGED",
            Self::Recorded => "RECORDED",
        };
        f.write_str(name)
    }
}

/// The outcome of one evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub query_id: i64,
    pub query_text: String,
    pub gold_ids: BTreeSet<String>,
    /// Ranked ids within the top K, at the run's relevance level.
    pub retrieved_ids: Vec<String>,
    pub metrics: RankMetrics,
    pub answer: Option<String>,
    pub judge: Option<JudgeScores>,
}

/// A query that failed with a recoverable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalFailure {
    pub query_id: i64,
    pub query_text: String,
    pub gold_ids: BTreeSet<String>,
    /// The last state the query reached before failing.
    pub state: String,
    pub error: String,
}

/// Mean judge scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgeMeans {
    pub accuracy: f64,
    pub completeness: f64,
    pub professionalism: f64,
}

/// Aggregates over every successfully evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub k: usize,
    /// Queries that contributed to the means.
    pub count: usize,
    /// Queries that failed and were left out.
    pub failed: usize,
    pub hit_at_k: f64,
    pub mrr_at_k: f64,
    /// Present only if at least one record was judged.
    pub judge: Option<JudgeMeans>,
}

impl EvalSummary {
    /// Reduce records into arithmetic means.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyInput`] if `records` is empty.
    pub fn from_records(records: &[EvalRecord], failed: usize, k: usize) -> Result<Self> {
        if records.is_empty() {
            return Err(RagError::EmptyInput(format!(
                "no evaluated queries to summarise ({failed} failed)"
            )));
        }
        let hit_at_k = mean(records.iter().map(|r| r.metrics.hit));
        let mrr_at_k = mean(records.iter().map(|r| r.metrics.mrr));
        let judged: Vec<&JudgeScores> = records.iter().filter_map(|r| r.judge.as_ref()).collect();
        let judge = (!judged.is_empty()).then(|| JudgeMeans {
            accuracy: mean(judged.iter().map(|j| f64::from(j.accuracy))),
            completeness: mean(judged.iter().map(|j| f64::from(j.completeness))),
            professionalism: mean(judged.iter().map(|j| f64::from(j.professionalism))),
        });

        Ok(Self { k, count: records.len(), failed, hit_at_k, mrr_at_k, judge })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Everything an evaluation run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub records: Vec<EvalRecord>,
    pub failures: Vec<EvalFailure>,
    /// `None` only when the run was cancelled before any query finished.
    pub summary: Option<EvalSummary>,
    pub cancelled: bool,
}

/// Progress notifications emitted while a run is in flight.
#[derive(Debug)]
pub enum EvalEvent<'a> {
    Recorded { index: usize, total: usize, record: &'a EvalRecord },
    Failed { index: usize, total: usize, failure: &'a EvalFailure },
}

/// A shared flag that stops an evaluation before its next query starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Evaluation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Cut-off K for retrieval and Hit/MRR.
    pub top_k: usize,
    /// How many of the retrieved documents are passed to the generator.
    pub rag_top_k: usize,
    pub relevance: RelevanceLevel,
    /// Abort on the first failed query, even a recoverable one.
    pub fail_fast: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self { top_k: 5, rag_top_k: 5, relevance: RelevanceLevel::Project, fail_fast: false }
    }
}

/// Drives labelled queries through retrieval, generation and judging.
pub struct Evaluator {
    retriever: Retriever,
    rag: Option<RagService>,
    judge: Option<Arc<dyn Judge>>,
    options: EvalOptions,
    cancel: CancelFlag,
}

impl Evaluator {
    /// A retrieval-only evaluator.
    pub fn new(retriever: Retriever, options: EvalOptions) -> Self {
        Self { retriever, rag: None, judge: None, options, cancel: CancelFlag::new() }
    }

    /// Generate an answer for every query from its retrieved documents.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.rag = Some(RagService::new(self.retriever.clone(), generator));
        self
    }

    /// Score every generated answer. Requires a generator.
    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Evaluate `queries` in order and summarise.
    pub async fn run(&self, queries: &[EvalQuery]) -> Result<EvalReport> {
        self.run_with(queries, |_| Ok(())).await
    }

    /// Like [`run`](Self::run), calling `on_event` after each query.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyInput`] if `queries` is empty or every query failed.
    /// - [`RagError::ConfigError`] for invalid options or a judge without a
    ///   generator.
    /// - The first non-recoverable per-query error (any error with
    ///   `fail_fast`), or an error returned by `on_event`.
    pub async fn run_with<F>(&self, queries: &[EvalQuery], mut on_event: F) -> Result<EvalReport>
    where
        F: FnMut(EvalEvent<'_>) -> Result<()>,
    {
        self.validate()?;
        if queries.is_empty() {
            return Err(RagError::EmptyInput("no queries to evaluate".into()));
        }

        let total = queries.len();
        let mut records = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut cancelled = false;

        for (index, query) in queries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(completed = index, total, "evaluation cancelled");
                cancelled = true;
                break;
            }

            let mut state = QueryState::Pending;
            match self.evaluate(query, &mut state).await {
                Ok(record) => {
                    records.push(record);
                    if let Some(record) = records.last() {
                        on_event(EvalEvent::Recorded { index, total, record })?;
                    }
                }
                Err(e) if e.is_recoverable() && !self.options.fail_fast => {
                    warn!(query_id = query.query_id, %state, error = %e, "query failed, continuing");
                    failures.push(EvalFailure {
                        query_id: query.query_id,
                        query_text: query.query_text.clone(),
                        gold_ids: query.gold_ids.clone(),
                        state: state.to_string(),
                        error: e.to_string(),
                    });
                    if let Some(failure) = failures.last() {
                        on_event(EvalEvent::Failed { index, total, failure })?;
                    }
                }
                Err(e) => {
                    error!(query_id = query.query_id, %state, error = %e, "query failed, aborting run");
                    return Err(e);
                }
            }
        }

        let summary = if cancelled && records.is_empty() {
            None
        } else {
            Some(EvalSummary::from_records(&records, failures.len(), self.options.top_k)?)
        };

        if let Some(summary) = &summary {
            info!(
                count = summary.count,
                failed = summary.failed,
                hit = summary.hit_at_k,
                mrr = summary.mrr_at_k,
                cancelled,
                "evaluation finished"
            );
        }
        Ok(EvalReport { records, failures, summary, cancelled })
    }

    fn validate(&self) -> Result<()> {
        if self.options.top_k == 0 || self.options.rag_top_k == 0 {
            return Err(RagError::ConfigError("evaluation top_k values must be greater than zero".into()));
        }
        if self.judge.is_some() && self.rag.is_none() {
            return Err(RagError::ConfigError("a judge needs a generator to produce answers".into()));
        }
        Ok(())
    }

    async fn evaluate(&self, query: &EvalQuery, state: &mut QueryState) -> Result<EvalRecord> {
        let k = self.options.top_k;
        debug!(query_id = query.query_id, state = %state, "evaluating query");

        let documents = self.retriever.search(&query.query_text, Some(k), None).await?;
        *state = QueryState::Retrieved;
        let mut retrieved = retrieved_ids(&documents, self.options.relevance);
        retrieved.truncate(k);
        let metrics = hit_mrr_at_k(&retrieved, &query.gold_ids, k);
        debug!(query_id = query.query_id, state = %state, hit = metrics.hit, mrr = metrics.mrr, "retrieved");

        let mut answer = None;
        let mut judge = None;
        if let Some(rag) = &self.rag {
            let context: Vec<RetrievedDocument> =
                documents.iter().take(self.options.rag_top_k).cloned().collect();
            let (text, _) = rag.answer_query(&query.query_text, None, Some(context)).await?;
            *state = QueryState::Answered;
            debug!(query_id = query.query_id, state = %state, answer_len = text.len(), "answered");

            if let Some(judge_backend) = &self.judge {
                let scores = judge_backend.judge(&query.query_text, &text).await?;
                *state = QueryState::Judged;
                debug!(
                    query_id = query.query_id,
                    state = %state,
                    accuracy = scores.accuracy,
                    completeness = scores.completeness,
                    professionalism = scores.professionalism,
                    "judged"
                );
                judge = Some(scores);
            }
            answer = Some(text);
        }

        *state = QueryState::Recorded;
        debug!(query_id = query.query_id, state = %state, "recorded");
        Ok(EvalRecord {
            query_id: query.query_id,
            query_text: query.query_text.clone(),
            gold_ids: query.gold_ids.clone(),
            retrieved_ids: retrieved,
            metrics,
            answer,
            judge,
        })
    }
}
