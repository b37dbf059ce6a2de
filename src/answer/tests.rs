use super::conversation::GREETING_REPLY;
use super::*;
use crate::store::{Document, EmbeddingRecord, MemoryStore, NewDocument};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

const PHO_SEGMENT: &str = "Phở là một món ăn truyền thống của Việt Nam";
const PHO_ANSWER: &str = "Trả lời: phở là món ăn truyền thống của Việt Nam.";

/// Looks texts up in a fixed table, answering `[0, 1]` for anything else
struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fail: bool,
    calls: AtomicUsize,
}

impl StubEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| ((*text).to_string(), vector.clone()))
                .collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("embedding service unavailable"));
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0, 1.0]))
    }
}

enum Reply {
    Text(&'static str),
    Error,
    Panic,
}

struct StubGenerator {
    reply: Reply,
    calls: AtomicUsize,
}

impl StubGenerator {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("Câu hỏi:"));
        match self.reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Error => Err(anyhow!("generation service unavailable")),
            Reply::Panic => panic!("generator exploded"),
        }
    }
}

/// Memory store whose question log takes far too long to read
struct SlowQuestionStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowQuestionStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document> {
        self.inner.create_document(document).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(id).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        self.inner.list_documents().await
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        self.inner.delete_document(id).await
    }

    async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        self.inner.insert_embeddings(records).await
    }

    async fn list_all_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        self.inner.list_all_embeddings().await
    }

    async fn list_embeddings_by_owner(&self, owner_id: &str) -> Result<Vec<EmbeddingRecord>> {
        self.inner.list_embeddings_by_owner(owner_id).await
    }

    async fn delete_embeddings_by_owner(&self, owner_id: &str) -> Result<u64> {
        self.inner.delete_embeddings_by_owner(owner_id).await
    }

    async fn list_questions(&self) -> Result<Vec<QuestionRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_questions().await
    }

    async fn save_question(&self, question: QuestionRecord) -> Result<()> {
        self.inner.save_question(question).await
    }
}

/// Memory store whose embeddings take far too long to load; records whether
/// a load ever ran to completion
struct SlowSnapshotStore {
    inner: MemoryStore,
    delay: Duration,
    loads_completed: AtomicUsize,
}

#[async_trait]
impl DocumentStore for SlowSnapshotStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document> {
        self.inner.create_document(document).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(id).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        self.inner.list_documents().await
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        self.inner.delete_document(id).await
    }

    async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        self.inner.insert_embeddings(records).await
    }

    async fn list_all_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        tokio::time::sleep(self.delay).await;
        self.loads_completed.fetch_add(1, Ordering::SeqCst);
        self.inner.list_all_embeddings().await
    }

    async fn list_embeddings_by_owner(&self, owner_id: &str) -> Result<Vec<EmbeddingRecord>> {
        self.inner.list_embeddings_by_owner(owner_id).await
    }

    async fn delete_embeddings_by_owner(&self, owner_id: &str) -> Result<u64> {
        self.inner.delete_embeddings_by_owner(owner_id).await
    }

    async fn list_questions(&self) -> Result<Vec<QuestionRecord>> {
        self.inner.list_questions().await
    }

    async fn save_question(&self, question: QuestionRecord) -> Result<()> {
        self.inner.save_question(question).await
    }
}

/// Slow embedder that remembers every text it was asked to embed
struct RecordingEmbedder {
    seen: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl EmbeddingService for RecordingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(text.to_string());
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(vec![1.0, 0.0])
    }
}

fn segment(owner: &str, text: &str, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        owner_id: owner.to_string(),
        segment: text.to_string(),
        vector,
    }
}

fn orchestrator(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    embedder: &Arc<StubEmbedder>,
    generator: &Arc<StubGenerator>,
) -> AnswerOrchestrator {
    AnswerOrchestrator::new(
        config,
        store,
        Arc::clone(embedder) as Arc<dyn EmbeddingService>,
        Arc::clone(generator) as Arc<dyn GenerationService>,
    )
}

async fn pho_store() -> Result<Arc<MemoryStore>> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_embeddings(vec![segment("doc-1", PHO_SEGMENT, vec![1.0, 0.0])])
        .await?;
    Ok(store)
}

fn pho_embedder() -> Arc<StubEmbedder> {
    Arc::new(StubEmbedder::new(&[
        ("phở là gì", vec![0.8, 0.6]),
        ("bánh mì là gì", vec![1.0, 0.0]),
        ("phở là gì vậy", vec![0.4, 0.916_515]),
        ("phở ngon ở đâu", vec![0.4, 0.916_515]),
    ]))
}

#[tokio::test]
async fn empty_corpus_returns_no_information_message() {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        &embedder,
        &generator,
    );

    assert_eq!(qa.answer("bất kỳ câu hỏi", None).await, NO_INFORMATION_MESSAGE);
    assert_eq!(generator.calls(), 0);
    assert!(qa.response_cache().is_empty());
}

#[tokio::test]
async fn definition_found_in_corpus_is_synthesized() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    let answer = qa.answer("Phở là gì", None).await;

    assert_eq!(answer, "Phở là món ăn truyền thống của Việt Nam.");
    assert_ne!(answer, NO_INFORMATION_MESSAGE);
    assert_eq!(generator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn definition_with_absent_subject_returns_no_information() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    // Perfect vector similarity does not matter when the subject is missing
    assert_eq!(qa.answer("Bánh mì là gì", None).await, NO_INFORMATION_MESSAGE);
    assert_eq!(generator.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn definitions_use_the_stricter_threshold() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    // Similarity 0.4 clears the general threshold but not the definition one
    assert_eq!(qa.answer("Phở là gì vậy", None).await, NO_INFORMATION_MESSAGE);
    assert_ne!(qa.answer("Phở ngon ở đâu", None).await, NO_INFORMATION_MESSAGE);
    assert_eq!(generator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn cached_answer_is_byte_identical() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    let first = qa.answer("Phở là gì", None).await;
    let embed_calls = embedder.calls();
    let second = qa.answer("  PHỞ   là gì ", None).await;

    assert_eq!(first, second);
    assert_eq!(generator.calls(), 1);
    assert_eq!(embedder.calls(), embed_calls);
    Ok(())
}

#[tokio::test]
async fn small_talk_bypasses_search() {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        &embedder,
        &generator,
    );

    assert_eq!(qa.answer("Xin chào!", None).await, GREETING_REPLY);
    assert_eq!(embedder.calls(), 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn similar_question_reuses_stored_answer() -> Result<()> {
    let store = pho_store().await?;
    store
        .save_question(QuestionRecord {
            question_text: "Phở là gì".to_string(),
            answer_text: "Câu trả lời đã lưu.".to_string(),
            created_at: Utc::now().naive_utc(),
            owner_id: None,
        })
        .await?;

    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), store, &embedder, &generator);

    assert_eq!(qa.answer("Phở là gì", None).await, "Câu trả lời đã lưu.");
    assert_eq!(generator.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn stored_answers_of_other_documents_are_not_reused() -> Result<()> {
    let store = pho_store().await?;
    store
        .save_question(QuestionRecord {
            question_text: "Phở là gì".to_string(),
            answer_text: "Câu trả lời của tài liệu khác.".to_string(),
            created_at: Utc::now().naive_utc(),
            owner_id: Some("doc-2".to_string()),
        })
        .await?;

    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), store, &embedder, &generator);

    assert_eq!(
        qa.answer("Phở là gì", Some("doc-1")).await,
        "Phở là món ăn truyền thống của Việt Nam."
    );
    assert_eq!(generator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn segment_search_is_scoped_to_the_owner() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    assert_eq!(
        qa.answer("Phở là gì", Some("doc-2")).await,
        NO_INFORMATION_MESSAGE
    );
    Ok(())
}

#[tokio::test]
async fn new_answers_are_persisted_only_with_an_owner() -> Result<()> {
    let store = pho_store().await?;
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(
        &Config::default(),
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        &embedder,
        &generator,
    );

    qa.answer("Phở là gì", None).await;
    assert!(store.list_questions().await?.is_empty());

    qa.answer("Phở là gì", Some("doc-1")).await;
    let questions = store.list_questions().await?;
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].question_text, "Phở là gì");
    assert_eq!(questions[0].answer_text, "Phở là món ăn truyền thống của Việt Nam.");
    assert_eq!(questions[0].owner_id.as_deref(), Some("doc-1"));
    Ok(())
}

#[tokio::test]
async fn rejected_generation_falls_back_to_context() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_embeddings(vec![segment(
            "doc-1",
            "Phở là một món ăn truyền thống. Nước dùng được ninh từ xương. Bánh phở làm từ gạo.",
            vec![1.0, 0.0],
        )])
        .await?;

    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(
        "Xin lỗi, tài liệu không có thông tin về câu hỏi này.",
    )));
    let qa = orchestrator(
        &Config::default(),
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        &embedder,
        &generator,
    );

    assert_eq!(
        qa.answer("Phở là gì", Some("doc-1")).await,
        "Phở là một món ăn truyền thống. Nước dùng được ninh từ xương."
    );
    assert_eq!(generator.calls(), 1);
    // Context fallbacks are not worth reusing
    assert!(store.list_questions().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn generation_error_falls_back_to_context() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Error));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    assert_eq!(qa.answer("Phở là gì", None).await, PHO_SEGMENT);
    Ok(())
}

#[tokio::test]
async fn embedding_outage_uses_keyword_search() -> Result<()> {
    let embedder = Arc::new(StubEmbedder::failing());
    let generator = Arc::new(StubGenerator::new(Reply::Text(
        "Phở truyền thống có nước dùng trong.",
    )));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    assert_eq!(
        qa.answer("Phở truyền thống", None).await,
        "Phở truyền thống có nước dùng trong."
    );
    assert!(qa.embedding_cache().is_empty());
    Ok(())
}

#[tokio::test]
async fn slow_question_search_does_not_stall_segment_search() -> Result<()> {
    let store = Arc::new(SlowQuestionStore {
        inner: MemoryStore::new(),
        delay: Duration::from_secs(30),
    });
    store
        .insert_embeddings(vec![segment("doc-1", PHO_SEGMENT, vec![1.0, 0.0])])
        .await?;

    let mut config = Config::default();
    config.retrieval.question_search_timeout_ms = 50;

    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&config, store, &embedder, &generator);

    let started = Instant::now();
    let answer = qa.answer("Phở là gì", None).await;

    assert_eq!(answer, "Phở là món ăn truyền thống của Việt Nam.");
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn panics_become_the_generic_message() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Panic));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    assert_eq!(qa.answer("Phở là gì", None).await, GENERIC_FAILURE_MESSAGE);

    // Shared state is still usable afterwards
    assert_eq!(qa.answer("xin chào", None).await, GREETING_REPLY);
    assert_eq!(qa.answer("Bánh mì là gì", None).await, NO_INFORMATION_MESSAGE);
    assert!(qa.response_cache().is_empty());
    Ok(())
}

#[tokio::test]
async fn invalidate_caches_picks_up_new_segments() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(
        &Config::default(),
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        &embedder,
        &generator,
    );

    assert_eq!(qa.answer("Phở là gì", None).await, NO_INFORMATION_MESSAGE);

    store
        .insert_embeddings(vec![segment("doc-1", PHO_SEGMENT, vec![1.0, 0.0])])
        .await?;
    // The snapshot is still within its TTL
    assert_eq!(qa.answer("Phở là gì", None).await, NO_INFORMATION_MESSAGE);

    qa.invalidate_caches().await;
    assert_eq!(
        qa.answer("Phở là gì", None).await,
        "Phở là món ăn truyền thống của Việt Nam."
    );
    Ok(())
}

#[tokio::test]
async fn clear_response_cache_forces_regeneration() -> Result<()> {
    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), pho_store().await?, &embedder, &generator);

    qa.answer("Phở là gì", None).await;
    assert_eq!(qa.response_cache().len(), 1);

    qa.clear_response_cache();
    assert!(qa.response_cache().is_empty());

    qa.answer("Phở là gì", None).await;
    assert_eq!(generator.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn mixed_dimensions_are_compared_over_common_prefix() -> Result<()> {
    let long: Vec<f32> = (0..768)
        .map(|i| if i < 128 { 1.0 } else { (i % 5) as f32 })
        .collect();
    let store = Arc::new(MemoryStore::new());
    store
        .insert_embeddings(vec![segment("doc-1", PHO_SEGMENT, long)])
        .await?;

    let embedder = Arc::new(StubEmbedder::new(&[("phở là gì", vec![1.0; 128])]));
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(&Config::default(), store, &embedder, &generator);

    assert_eq!(
        qa.answer("Phở là gì", None).await,
        "Phở là món ăn truyền thống của Việt Nam."
    );
    Ok(())
}

#[test]
fn question_normalization() {
    assert_eq!(normalize_question("  Phở   LÀ gì?!  "), "phở là gì?!");
    assert_eq!(
        normalize_question("“Phở” (món ăn) là gì?"),
        "phở món ăn là gì?"
    );
    assert_eq!(normalize_question("a-b, c. d"), "a-b, c. d");
    assert_eq!(normalize_question("\t\n"), "");
}

#[test]
fn cache_keys_include_owner_scope() {
    assert_eq!(response_cache_key("phở là gì", None), "phở là gì");
    assert_ne!(
        response_cache_key("phở là gì", Some("doc-1")),
        response_cache_key("phở là gì", Some("doc-2"))
    );
}

#[tokio::test]
async fn query_is_embedded_once_per_question() -> Result<()> {
    let embedder = Arc::new(RecordingEmbedder {
        seen: std::sync::Mutex::new(Vec::new()),
    });
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = AnswerOrchestrator::new(
        &Config::default(),
        pho_store().await?,
        Arc::clone(&embedder) as Arc<dyn EmbeddingService>,
        Arc::clone(&generator) as Arc<dyn GenerationService>,
    );

    let answer = qa.answer("Phở là gì?", None).await;

    assert_eq!(answer, "Phở là món ăn truyền thống của Việt Nam.");
    let seen = embedder
        .seen
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    assert_eq!(seen, vec!["phở là gì?".to_string()]);
    Ok(())
}

#[tokio::test]
async fn slow_segment_search_is_aborted_and_stored_answers_still_served() -> Result<()> {
    let store = Arc::new(SlowSnapshotStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(300),
        loads_completed: AtomicUsize::new(0),
    });
    store
        .insert_embeddings(vec![segment("doc-1", PHO_SEGMENT, vec![1.0, 0.0])])
        .await?;
    store
        .save_question(QuestionRecord {
            question_text: "Phở là gì".to_string(),
            answer_text: "Phở là món ăn đã được trả lời trước đó.".to_string(),
            created_at: Utc::now().naive_utc(),
            owner_id: None,
        })
        .await?;

    let mut config = Config::default();
    config.retrieval.segment_search_timeout_ms = 50;

    let embedder = pho_embedder();
    let generator = Arc::new(StubGenerator::new(Reply::Text(PHO_ANSWER)));
    let qa = orchestrator(
        &config,
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        &embedder,
        &generator,
    );

    let started = Instant::now();
    let answer = qa.answer("Phở là gì", None).await;

    assert_eq!(answer, "Phở là món ăn đã được trả lời trước đó.");
    assert!(started.elapsed() < Duration::from_millis(300));

    // An aborted task never finishes loading the snapshot
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.loads_completed.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls(), 0);
    Ok(())
}
