mod common;

use common::{eventually, sample_record, test_pool, FixedAnalyzer};
use std::sync::Arc;
use std::time::Duration;
use voxline_server::postcall::analyze_conversation;
use voxline_server::sink::StoreSink;
use voxline_store::{get_conversation, save_conversation};
use voxline_types::LeadTemperature;
use voxline_voice::{SinkError, TranscriptSink};

#[tokio::test]
async fn flush_stores_record_then_analysis() {
    let (_dir, pool) = test_pool();
    let analyzer = Arc::new(FixedAnalyzer::new());
    let sink = StoreSink::new(pool.clone()).with_analyzer(analyzer.clone());

    sink.flush(sample_record("CA1")).await.expect("flush should succeed");

    // The conversation row exists as soon as flush returns.
    let conn = pool.get().unwrap();
    let stored = get_conversation(&conn, "CA1").unwrap().expect("stored");
    assert_eq!(stored.messages.len(), 3);
    drop(conn);

    let analysis = eventually(|| {
        let conn = pool.get().unwrap();
        get_conversation(&conn, "CA1").unwrap().and_then(|c| c.analysis)
    })
    .await
    .expect("analysis should be attached");
    assert_eq!(analysis.lead_temperature, LeadTemperature::Hot);
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test]
async fn duplicate_flush_is_a_storage_error() {
    let (_dir, pool) = test_pool();
    let sink = StoreSink::new(pool.clone());

    sink.flush(sample_record("CA1")).await.unwrap();
    let err = sink.flush(sample_record("CA1")).await.unwrap_err();
    assert!(matches!(err, SinkError::Storage(_)));
}

#[tokio::test]
async fn analysis_failure_leaves_conversation_unanalyzed() {
    let (_dir, pool) = test_pool();
    let analyzer = Arc::new(FixedAnalyzer::failing());
    let sink = StoreSink::new(pool.clone()).with_analyzer(analyzer.clone());

    sink.flush(sample_record("CA1")).await.expect("flush is unaffected");

    assert!(eventually(|| (analyzer.calls() == 1).then_some(())).await.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let conn = pool.get().unwrap();
    let stored = get_conversation(&conn, "CA1").unwrap().unwrap();
    assert!(stored.analysis.is_none());
}

#[tokio::test]
async fn analysis_skips_calls_without_caller_speech() {
    let (_dir, pool) = test_pool();
    let analyzer = Arc::new(FixedAnalyzer::new());

    let mut record = sample_record("CA-silent");
    record.messages.retain(|m| m.role == voxline_types::Role::Assistant);
    let id = {
        let conn = pool.get().unwrap();
        save_conversation(&conn, &record).unwrap()
    };

    let result = analyze_conversation(pool, analyzer.clone(), id, &record)
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(analyzer.calls(), 0);
}

#[tokio::test]
async fn analysis_for_a_missing_conversation_errors() {
    let (_dir, pool) = test_pool();
    let analyzer = Arc::new(FixedAnalyzer::new());

    let err = analyze_conversation(pool, analyzer, 9_999, &sample_record("CA-gone"))
        .await
        .unwrap_err();
    assert!(err.contains("9999"), "unexpected error: {err}");
}
