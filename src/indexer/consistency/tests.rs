use super::*;
use crate::config::Config;
use crate::embeddings::{EmbeddingService, GenerationService};
use crate::store::{EmbeddingRecord, MemoryStore, NewDocument};
use async_trait::async_trait;
use std::sync::Arc;

struct UnitEmbedder;

#[async_trait]
impl EmbeddingService for UnitEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

struct EchoGenerator;

#[async_trait]
impl GenerationService for EchoGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok("Câu trả lời.".to_string())
    }
}

fn record(owner: &str, segment: &str) -> EmbeddingRecord {
    EmbeddingRecord {
        owner_id: owner.to_string(),
        segment: segment.to_string(),
        vector: vec![1.0, 0.0],
    }
}

async fn inconsistent_store() -> Result<Arc<MemoryStore>> {
    let store = Arc::new(MemoryStore::new());
    for id in ["doc-1", "doc-2"] {
        store
            .create_document(NewDocument {
                id: id.to_string(),
                title: format!("Title of {id}"),
                source: None,
            })
            .await?;
    }
    store
        .insert_embeddings(vec![
            record("doc-1", "kept"),
            record("gone-b", "orphan one"),
            record("gone-a", "orphan two"),
            record("gone-b", "orphan three"),
        ])
        .await?;
    Ok(store)
}

fn orchestrator_for(store: &Arc<MemoryStore>) -> AnswerOrchestrator {
    AnswerOrchestrator::new(
        &Config::default(),
        Arc::clone(store) as Arc<dyn DocumentStore>,
        Arc::new(UnitEmbedder),
        Arc::new(EchoGenerator),
    )
}

#[tokio::test]
async fn reports_orphans_and_empty_documents() -> Result<()> {
    let store = inconsistent_store().await?;
    let orchestrator = orchestrator_for(&store);
    let validator = ConsistencyValidator::new(store.as_ref(), &orchestrator);

    let report = validator.validate_consistency().await?;

    assert_eq!(report.documents, 2);
    assert_eq!(report.embeddings, 4);
    assert_eq!(report.orphaned_owners, vec!["gone-a", "gone-b"]);
    assert_eq!(report.orphaned_embeddings, 3);
    assert_eq!(report.empty_documents, vec!["doc-2"]);
    assert!(!report.is_consistent);
    assert_eq!(report.total_issues(), 3);
    Ok(())
}

#[tokio::test]
async fn cleanup_removes_orphans_and_invalidates_index() -> Result<()> {
    let store = inconsistent_store().await?;
    let orchestrator = orchestrator_for(&store);
    let validator = ConsistencyValidator::new(store.as_ref(), &orchestrator);

    assert_eq!(orchestrator.index().snapshot().await?.len(), 4);

    let report = validator.validate_consistency().await?;
    let cleaned = validator
        .cleanup_orphaned_embeddings(&report.orphaned_owners)
        .await?;

    assert_eq!(cleaned, 3);
    // Within the TTL, only an invalidation can make the index see the deletion
    let snapshot = orchestrator.index().snapshot().await?;
    assert_eq!(snapshot.records(), &[record("doc-1", "kept")]);

    let after = validator.validate_consistency().await?;
    assert!(after.orphaned_owners.is_empty());
    Ok(())
}

#[tokio::test]
async fn cleanup_of_nothing_is_a_no_op() -> Result<()> {
    let store = inconsistent_store().await?;
    let orchestrator = orchestrator_for(&store);
    let validator = ConsistencyValidator::new(store.as_ref(), &orchestrator);

    assert_eq!(validator.cleanup_orphaned_embeddings(&[]).await?, 0);
    assert_eq!(
        validator
            .cleanup_orphaned_embeddings(&["never-existed".to_string()])
            .await?,
        0
    );
    assert_eq!(store.list_all_embeddings().await?.len(), 4);
    Ok(())
}

#[test]
fn report_summaries() {
    let consistent = ConsistencyReport {
        documents: 3,
        embeddings: 42,
        orphaned_owners: vec![],
        orphaned_embeddings: 0,
        empty_documents: vec![],
        is_consistent: true,
    };
    assert_eq!(consistent.total_issues(), 0);
    assert_eq!(
        consistent.summary(),
        "Store is consistent: 3 documents, 42 embeddings"
    );

    let inconsistent = ConsistencyReport {
        documents: 3,
        embeddings: 42,
        orphaned_owners: vec!["gone".to_string()],
        orphaned_embeddings: 5,
        empty_documents: vec!["doc-3".to_string()],
        is_consistent: false,
    };
    let summary = inconsistent.summary();
    assert!(summary.contains("5 orphaned embeddings from 1 missing documents"));
    assert!(summary.contains("1 documents without embeddings"));
}
