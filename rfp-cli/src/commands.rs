use std::path::PathBuf;

use anyhow::{Context, Result};
use rfp_rag::dataset::{self, CorpusColumns, JudgmentLog};
use rfp_rag::{
    CancelFlag, EvalEvent, EvalOptions, EvalReport, Evaluator, Indexer, RagService,
    RecursiveChunker, RelevanceLevel, RetrievedDocument, Settings, backends, chunk_corpus,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{info, warn};

use crate::EvalArgs;

/// Printed instead of an answer when the question is blank.
pub const EMPTY_QUESTION: &str = "Please enter a question.";

pub(crate) fn chunk(settings: &Settings, corpus: Option<PathBuf>, out: Option<PathBuf>) -> Result<()> {
    let corpus = corpus.unwrap_or_else(|| settings.corpus_path.clone());
    let out = out.unwrap_or_else(|| settings.chunks_path(settings.mode));

    let documents = dataset::read_corpus(&corpus, &CorpusColumns::default())?;
    let chunker = RecursiveChunker::new(settings.rag.chunk_size, settings.rag.chunk_overlap);
    let chunks = chunk_corpus(&chunker, &documents);
    dataset::write_chunks(&out, &chunks)?;

    println!(
        "Wrote {} chunks from {} documents to {}",
        chunks.len(),
        documents.len(),
        out.display()
    );
    Ok(())
}

pub(crate) async fn index(
    settings: &Settings,
    chunks: Option<PathBuf>,
    collection: Option<String>,
    in_place: bool,
    keep_previous: bool,
) -> Result<()> {
    let path = chunks.unwrap_or_else(|| settings.chunks_path(settings.mode));
    let chunks = dataset::read_chunks(&path)?;
    let name = collection.unwrap_or_else(|| settings.vector_store.collection.clone());

    let indexer = Indexer::builder()
        .embedding_provider(backends::embedding_provider(settings)?)
        .vector_store(backends::vector_store(settings)?)
        .batch_size(settings.rag.batch_size)
        .mode(settings.mode)
        .retain_previous(keep_previous)
        .build()?;

    let report = if in_place {
        indexer.load(&name, &chunks).await?
    } else {
        indexer.rebuild(&name, &chunks).await?
    };

    println!(
        "Indexed {} chunks ({} skipped, {} dimensions) into {}",
        report.indexed, report.skipped, report.dimensions, report.collection
    );
    if let Some(alias) = &report.alias {
        match (&report.previous, report.previous_deleted) {
            (Some(previous), true) => println!("{alias} -> {} (deleted {previous})", report.collection),
            (Some(previous), false) => println!("{alias} -> {} (kept {previous})", report.collection),
            (None, _) => println!("{alias} -> {}", report.collection),
        }
    }
    Ok(())
}

fn print_documents(documents: &[RetrievedDocument]) {
    for (rank, doc) in documents.iter().enumerate() {
        println!(
            "{:>2}. [{:.4}] doc_id={} chunk_id={} source={}",
            rank + 1,
            doc.score,
            doc.metadata.doc_id,
            doc.metadata.chunk_index,
            doc.metadata.source_tag.as_deref().unwrap_or("-"),
        );
        println!("    {}", rfp_rag::generation::preview(&doc.text, 160));
    }
}

pub(crate) async fn search(
    settings: &Settings,
    query: &str,
    k: Option<usize>,
    collection: Option<&str>,
) -> Result<()> {
    let retriever = backends::retriever(settings)?;
    let documents = retriever.search(query, k, collection).await?;
    if documents.is_empty() {
        println!("No results in {}", collection.unwrap_or(retriever.collection()));
    }
    print_documents(&documents);
    Ok(())
}

async fn answer_once(service: &RagService, question: &str, k: Option<usize>) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        println!("{EMPTY_QUESTION}");
        return Ok(());
    }
    let (answer, documents) = service.answer_query(question, k, None).await?;
    println!("{answer}\n");
    println!("Sources:");
    print_documents(&documents);
    Ok(())
}

pub(crate) async fn ask(settings: &Settings, question: Option<String>, k: Option<usize>) -> Result<()> {
    let service = RagService::new(backends::retriever(settings)?, backends::generator(settings)?);
    if let Some(question) = question {
        return answer_once(&service, &question, k).await;
    }

    let mut editor = DefaultEditor::new()?;
    println!("Ask about the indexed RFP documents. Ctrl-D to quit.");
    loop {
        match editor.readline("question> ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                if let Err(e) = answer_once(&service, &line, k).await {
                    eprintln!("error: {e:#}");
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub(crate) async fn eval(settings: &Settings, args: &EvalArgs) -> Result<()> {
    let level = RelevanceLevel::from(args.level);
    let queries_path = args.queries.clone().unwrap_or_else(|| settings.eval.path.clone());
    let out = args.out.clone().unwrap_or_else(|| settings.eval.out.clone());
    let judgments_out = args.judgments_out.clone().unwrap_or_else(|| settings.eval.judgments_out.clone());

    let queries = dataset::read_eval_queries(&queries_path, level)?;
    let options = EvalOptions {
        top_k: args.k.unwrap_or(settings.eval.top_k),
        rag_top_k: args.rag_k.unwrap_or(settings.rag.top_k),
        relevance: level,
        fail_fast: args.fail_fast,
    };
    let k = options.top_k;

    let cancel = CancelFlag::new();
    let mut evaluator =
        Evaluator::new(backends::retriever(settings)?, options).with_cancel_flag(cancel.clone());
    let mut log = None;
    if !args.retrieval_only {
        evaluator = evaluator.with_generator(backends::generator(settings)?);
        if !args.no_judge {
            evaluator = evaluator.with_judge(backends::judge(settings)?);
        }
        log = Some(JudgmentLog::create(&judgments_out)?);
    }

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current query");
            cancel.cancel();
        }
    });

    info!(queries = queries.len(), k, level = ?level, "starting evaluation");
    let report = evaluator
        .run_with(&queries, |event| {
            match event {
                EvalEvent::Recorded { index, total, record } => {
                    println!(
                        "[{}/{}] query_id={} hit@{k}={:.0} mrr@{k}={:.3}",
                        index + 1,
                        total,
                        record.query_id,
                        record.metrics.hit,
                        record.metrics.mrr
                    );
                    if let Some(log) = log.as_mut() {
                        log.append(record)?;
                    }
                }
                EvalEvent::Failed { index, total, failure } => {
                    println!(
                        "[{}/{}] query_id={} FAILED at {}: {}",
                        index + 1,
                        total,
                        failure.query_id,
                        failure.state,
                        failure.error
                    );
                    if let Some(log) = log.as_mut() {
                        log.append_failure(failure)?;
                    }
                }
            }
            Ok(())
        })
        .await;
    watcher.abort();
    let report = report.context("evaluation aborted")?;

    dataset::write_eval_results(&out, &report.records, &report.failures, k, level)?;
    print_summary(&report);
    println!("Results: {}", out.display());
    if log.is_some() {
        println!("Judgements: {}", judgments_out.display());
    }
    Ok(())
}

fn print_summary(report: &EvalReport) {
    println!();
    println!("==== Evaluation summary ====");
    if report.cancelled {
        println!("(cancelled, partial results)");
    }
    let Some(summary) = &report.summary else {
        println!("No query finished before cancellation.");
        return;
    };
    println!("Queries evaluated : {} ({} failed)", summary.count, summary.failed);
    println!("Hit@{:<2}           : {:.4}", summary.k, summary.hit_at_k);
    println!("MRR@{:<2}           : {:.4}", summary.k, summary.mrr_at_k);
    if let Some(judge) = &summary.judge {
        println!("Judge accuracy    : {:.3}", judge.accuracy);
        println!("Judge completeness: {:.3}", judge.completeness);
        println!("Judge professional: {:.3}", judge.professionalism);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use super::*;
    use crate::Level;

    fn settings(dir: &std::path::Path) -> Settings {
        let map: HashMap<String, String> = [
            ("DATA_DIR", dir.join("data")),
            ("OUTPUTS_DIR", dir.join("outputs")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.display().to_string()))
        .chain([("EMBEDDING_DIM".to_string(), "32".to_string())])
        .collect();
        Settings::from_lookup(|key| map.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn chunk_index_eval_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(
            &settings.corpus_path,
            "doc_id,project_id,full_text\nD1,P1,network maintenance for the city hall\nD2,P2,cloud migration of the records system\n",
        )
        .unwrap();
        fs::write(
            &settings.eval.path,
            "query_id,query_text,gold_project_ids\n1,network maintenance for the city hall,P1\n2,cloud migration,P2|P9\n",
        )
        .unwrap();

        chunk(&settings, None, None).unwrap();
        assert!(settings.chunks_path(settings.mode).is_file());
        index(&settings, None, None, false, false).await.unwrap();
        assert!(settings.vector_store.snapshot_path.is_file());

        let args = EvalArgs {
            queries: None,
            k: Some(2),
            rag_k: None,
            level: Level::Project,
            retrieval_only: false,
            no_judge: false,
            fail_fast: false,
            out: None,
            judgments_out: None,
        };
        eval(&settings, &args).await.unwrap();

        let results = fs::read_to_string(&settings.eval.out).unwrap();
        assert!(results.starts_with("query_id,query_text,gold_project_ids,retrieved_projects_top2,hit@2"));
        assert_eq!(results.lines().count(), 3);
        // Identical text embeds identically, so the first query ranks its gold first.
        assert!(results.lines().nth(1).unwrap().contains(",1.0,1,1,"));
        assert_eq!(fs::read_to_string(&settings.eval.judgments_out).unwrap().lines().count(), 2);
    }
}
