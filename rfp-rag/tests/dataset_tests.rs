use std::collections::BTreeSet;
use std::fs;

use rfp_rag::dataset::{
    CorpusColumns, JudgmentLog, RATIONALE_MAX_CHARS, eval_result_headers, read_chunks,
    STATUS_OK, read_corpus, read_eval_queries, write_chunks, write_eval_results,
};
use rfp_rag::eval::RankMetrics;
use rfp_rag::{Chunk, EvalFailure, EvalRecord, JudgeScores, RagError, RelevanceLevel};

fn record(id: i64, rank: Option<usize>, judge: Option<JudgeScores>) -> EvalRecord {
    EvalRecord {
        query_id: id,
        query_text: format!("question {id}"),
        gold_ids: BTreeSet::from(["P1".to_string(), "P2".to_string()]),
        retrieved_ids: vec!["P9".into(), "P1".into()],
        metrics: RankMetrics {
            hit: if rank.is_some() { 1.0 } else { 0.0 },
            mrr: rank.map_or(0.0, |r| 1.0 / r as f64),
            first_gold_rank: rank,
        },
        answer: Some("an answer".into()),
        judge,
    }
}

#[test]
fn chunk_tables_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunks").join("chunks_recursive.csv");
    let chunks = vec![
        Chunk { doc_id: "20240101".into(), chunk_index: 0, text: "첫 문단, \"인용\"\n둘째 줄".into(), source_tag: Some("P1".into()) },
        Chunk { doc_id: "20240101".into(), chunk_index: 1, text: "tail".into(), source_tag: None },
    ];

    write_chunks(&path, &chunks).unwrap();
    let header = fs::read_to_string(&path).unwrap();
    assert!(header.starts_with("doc_id,chunk_id,text,source"));
    assert_eq!(read_chunks(&path).unwrap(), chunks);
}

#[test]
fn corpus_reader_handles_bom_and_blank_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.csv");
    fs::write(
        &path,
        "\u{feff}doc_id,project_id,full_text,extra\nA1,P1,\"line one\nline two\",x\nA2,,   ,y\n,P3,orphan,z\n",
    )
    .unwrap();

    let docs = read_corpus(&path, &CorpusColumns::default()).unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].doc_id, "A1");
    assert_eq!(docs[0].text.as_deref(), Some("line one\nline two"));
    assert_eq!(docs[0].source_tag.as_deref(), Some("P1"));
    assert_eq!(docs[1].text, None);
    assert_eq!(docs[1].source_tag, None);
}

#[test]
fn corpus_columns_can_be_renamed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.csv");
    fs::write(&path, "id,body\nX,hello\n").unwrap();

    let columns = CorpusColumns { doc_id: "id".into(), text: "body".into(), source: None };
    let docs = read_corpus(&path, &columns).unwrap();
    assert_eq!(docs[0].text.as_deref(), Some("hello"));

    let err = read_corpus(&path, &CorpusColumns::default()).unwrap_err();
    assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("full_text")));
}

#[test]
fn missing_files_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_chunks(&dir.path().join("absent.csv")).unwrap_err();
    assert!(matches!(err, RagError::NotFound(_)));
}

#[test]
fn eval_queries_parse_gold_lists_per_level() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval.csv");
    fs::write(
        &path,
        "query_id,query_text,gold_project_ids,gold_doc_ids\n1,network upgrade,P1|P2,D1\n2,cloud migration,,\"D2, D3\"\n",
    )
    .unwrap();

    let projects = read_eval_queries(&path, RelevanceLevel::Project).unwrap();
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].query_id, 1);
    assert_eq!(projects[0].gold_ids, BTreeSet::from(["P1".to_string(), "P2".to_string()]));
    assert!(projects[1].gold_ids.is_empty());

    let documents = read_eval_queries(&path, RelevanceLevel::Document).unwrap();
    assert_eq!(documents[1].gold_ids, BTreeSet::from(["D2".to_string(), "D3".to_string()]));
}

#[test]
fn non_integer_query_id_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval.csv");
    fs::write(&path, "query_id,query_text,gold_project_ids\nq-1,text,P1\n").unwrap();

    let err = read_eval_queries(&path, RelevanceLevel::Project).unwrap_err();
    assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("q-1")));
}

#[test]
fn result_headers_carry_the_cutoff() {
    let headers = eval_result_headers(10, RelevanceLevel::Project);
    assert_eq!(&headers[11..], ["status", "error"]);
    assert_eq!(&headers[2..7], ["gold_project_ids", "retrieved_projects_top10", "hit@10", "mrr@10", "first_gold_rank"]);
    assert_eq!(eval_result_headers(3, RelevanceLevel::Document)[3], "retrieved_docs_top3");
}

#[test]
fn result_rows_mark_misses_and_truncate_rationale() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("eval_results.csv");
    let long = JudgeScores {
        accuracy: 5,
        completeness: 4,
        professionalism: 3,
        rationale: "x".repeat(RATIONALE_MAX_CHARS + 50),
    };
    let records = vec![record(1, Some(2), Some(long)), record(2, None, None)];

    write_eval_results(&path, &records, &[], 5, RelevanceLevel::Project).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);

    assert_eq!(&rows[0][2], "P1|P2");
    assert_eq!(&rows[0][3], "P9|P1");
    assert_eq!(&rows[0][4], "1.0");
    assert_eq!(&rows[0][5], "0.5");
    assert_eq!(&rows[0][6], "2");
    assert_eq!(&rows[0][7], "5");
    assert_eq!(rows[0][10].chars().count(), RATIONALE_MAX_CHARS);
    assert_eq!(&rows[0][11], STATUS_OK);
    assert_eq!(&rows[0][12], "");

    assert_eq!(&rows[1][4], "0.0");
    assert_eq!(&rows[1][6], "-1");
    assert_eq!(&rows[1][7], "");
    assert_eq!(&rows[1][10], "");
}

#[test]
fn judgment_log_writes_one_json_line_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("judgments.jsonl");
    let scores = JudgeScores {
        accuracy: 4,
        completeness: 4,
        professionalism: 5,
        rationale: "covers the scope".into(),
    };

    let mut log = JudgmentLog::create(&path).unwrap();
    assert!(log.is_empty());
    log.append(&record(1, Some(1), Some(scores))).unwrap();
    log.append(&record(2, None, None)).unwrap();
    assert_eq!(log.len(), 2);

    let lines: Vec<serde_json::Value> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["query_id"], 1);
    assert_eq!(lines[0]["answer"], "an answer");
    assert_eq!(lines[0]["judge"]["professionalism"], 5);
    assert!(lines[1]["judge"].is_null());
}

fn failure(id: i64) -> EvalFailure {
    EvalFailure {
        query_id: id,
        query_text: format!("question {id}"),
        gold_ids: BTreeSet::from(["P3".to_string()]),
        state: "ANSWERED".into(),
        error: "backend 'judge' unavailable: timed out".into(),
    }
}

#[test]
fn failed_queries_appear_in_results_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("eval_results.csv");
    let records = vec![record(3, Some(1), None), record(1, None, None)];

    write_eval_results(&results, &records, &[failure(2)], 5, RelevanceLevel::Project).unwrap();

    let mut reader = csv::Reader::from_path(&results).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    let ids: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(ids, ["1", "2", "3"]);

    let failed = &rows[1];
    assert_eq!(&failed[2], "P3");
    assert_eq!(&failed[4], "");
    assert_eq!(&failed[6], "");
    assert_eq!(&failed[11], "failed@ANSWERED");
    assert!(failed[12].contains("timed out"));
    assert_eq!(&rows[0][11], STATUS_OK);

    let log_path = dir.path().join("judgments.jsonl");
    let mut log = JudgmentLog::create(&log_path).unwrap();
    log.append(&record(1, None, None)).unwrap();
    log.append_failure(&failure(2)).unwrap();
    assert_eq!(log.len(), 2);

    let lines: Vec<serde_json::Value> = fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines[0].get("error").is_none());
    assert_eq!(lines[1]["query_id"], 2);
    assert_eq!(lines[1]["failed_at"], "ANSWERED");
    assert!(lines[1]["answer"].is_null());
    assert!(lines[1]["error"].as_str().unwrap().contains("timed out"));
}
