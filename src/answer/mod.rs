// Answer module
// Turns one question into one answer: small-talk short-circuit, response cache,
// parallel question/segment search, threshold gate, generation and caching

pub mod conversation;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{EmbeddingCache, ResponseCache};
use crate::config::{AnswerConfig, Config, RetrievalConfig};
use crate::embeddings::{Embedding, EmbeddingService, GenerationService};
use crate::retrieval::prompt::{build_prompt, is_acceptable_answer, leading_sentences, normalize_answer};
use crate::retrieval::{
    MatchResult, QuestionType, VectorIndex, by_score_descending, classify, cosine_similarity,
    definition_subject, keyword_rank, rank,
};
use crate::store::{DocumentStore, QuestionRecord};

/// Returned whenever nothing in the corpus is good enough to answer from
pub const NO_INFORMATION_MESSAGE: &str =
    "Xin lỗi, tôi không tìm thấy thông tin liên quan đến câu hỏi của bạn trong tài liệu.";

/// Returned when answering fails unexpectedly; details only go to the log
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Xin lỗi, đã có lỗi xảy ra khi xử lý câu hỏi của bạn. Vui lòng thử lại sau.";

/// Sentences of context returned when generated text is rejected
const FALLBACK_SENTENCES: usize = 2;

/// Steps a question passes through, used to tag log lines and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ConversationalCheck,
    CacheCheck,
    ParallelSearch,
    Gate,
    Synthesize,
    CacheStore,
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConversationalCheck => "conversational check",
            Self::CacheCheck => "cache check",
            Self::ParallelSearch => "parallel search",
            Self::Gate => "gate",
            Self::Synthesize => "synthesize",
            Self::CacheStore => "cache store",
        };
        f.write_str(name)
    }
}

/// A previously answered question similar to the one being asked
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionMatch {
    pub record: QuestionRecord,
    pub score: f32,
}

/// How an answer was produced
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    /// Stored answer of a similar earlier question
    Reused(String),
    /// Accepted output of the generation service
    Generated(String),
    /// Leading sentences of the best context after generation was rejected
    ContextFallback(String),
    NoInformation,
}

/// Entry point of the answer engine.
///
/// Owns the shared caches and the vector index; one instance serves every
/// concurrent request of the process.
pub struct AnswerOrchestrator {
    store: Arc<dyn DocumentStore>,
    generator: Arc<dyn GenerationService>,
    embeddings: Arc<EmbeddingCache>,
    index: Arc<VectorIndex>,
    responses: ResponseCache,
    workers: Arc<Semaphore>,
    retrieval: RetrievalConfig,
    answer_config: AnswerConfig,
}

impl AnswerOrchestrator {
    #[inline]
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn GenerationService>,
    ) -> Self {
        let retrieval = config.retrieval.clone();

        let embeddings = Arc::new(EmbeddingCache::new(
            embedder,
            config.cache.embedding_capacity,
            retrieval.embedding_timeout(),
            retrieval.fallback_dimension,
        ));
        let index = Arc::new(VectorIndex::new(Arc::clone(&store), retrieval.index_ttl()));

        Self {
            store,
            generator,
            embeddings,
            index,
            responses: ResponseCache::new(config.cache.response_capacity),
            workers: Arc::new(Semaphore::new(retrieval.worker_pool_size.max(1))),
            retrieval,
            answer_config: config.answer.clone(),
        }
    }

    /// Answer a question, optionally scoped to one document.
    ///
    /// Never fails: errors and panics are logged and turned into
    /// [`GENERIC_FAILURE_MESSAGE`].
    #[inline]
    pub async fn answer(&self, question: &str, owner_id: Option<&str>) -> String {
        match AssertUnwindSafe(self.try_answer(question, owner_id))
            .catch_unwind()
            .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                error!("Failed to answer question {:?}: {:#}", question, e);
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            Err(panic) => {
                error!(
                    "Panic while answering question {:?}: {}",
                    question,
                    panic_message(panic.as_ref())
                );
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        }
    }

    /// Drop the index snapshot and every cached answer.
    ///
    /// Must be called after anything writes embeddings to the store.
    #[inline]
    pub async fn invalidate_caches(&self) {
        self.index.invalidate().await;
        self.responses.clear();
        info!("Answer caches invalidated");
    }

    #[inline]
    pub fn clear_response_cache(&self) {
        self.responses.clear();
        info!("Response cache cleared");
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn response_cache(&self) -> &ResponseCache {
        &self.responses
    }

    #[inline]
    pub fn embedding_cache(&self) -> &EmbeddingCache {
        &self.embeddings
    }

    async fn try_answer(&self, question: &str, owner_id: Option<&str>) -> Result<String> {
        let normalized = normalize_question(question);
        debug!(stage = %Stage::ConversationalCheck, "Answering {:?}", normalized);

        if let Some(reply) = conversation::canned_reply(&normalized) {
            debug!("Answered small talk without searching");
            return Ok(reply.to_string());
        }
        if normalized.is_empty() {
            return Ok(NO_INFORMATION_MESSAGE.to_string());
        }

        let cache_key = response_cache_key(&normalized, owner_id);
        if let Some(cached) = self.responses.get(&cache_key) {
            debug!(stage = %Stage::CacheCheck, "Response cache hit");
            return Ok(cached);
        }

        let (question_matches, segment_matches) = self
            .parallel_search(&normalized, owner_id)
            .await
            .with_context(|| format!("{} failed", Stage::ParallelSearch))?;
        debug!(
            stage = %Stage::ParallelSearch,
            "Found {} similar questions and {} segments",
            question_matches.len(),
            segment_matches.len()
        );

        let outcome = match question_matches.into_iter().next() {
            Some(best) => {
                info!(
                    "Reusing answer of {:?} (similarity {:.3})",
                    best.record.question_text, best.score
                );
                Outcome::Reused(best.record.answer_text)
            }
            None if self.passes_gate(&normalized, &segment_matches) => {
                self.synthesize(&normalized, &segment_matches).await
            }
            None => Outcome::NoInformation,
        };

        Ok(self.store_outcome(outcome, question, cache_key, owner_id).await)
    }

    /// Run question and segment search side by side on the worker pool.
    ///
    /// Each branch has its own timeout. A branch that fails or runs out of
    /// time contributes nothing and is aborted.
    async fn parallel_search(
        &self,
        query: &str,
        owner_id: Option<&str>,
    ) -> Result<(Vec<QuestionMatch>, Vec<MatchResult>)> {
        // Both branches compare against the same query vector
        let query_embedding = Arc::new(self.embeddings.get_or_compute(query).await);

        let question_branch = {
            let workers = Arc::clone(&self.workers);
            let store = Arc::clone(&self.store);
            let embeddings = Arc::clone(&self.embeddings);
            let query_embedding = Arc::clone(&query_embedding);
            let owner_id = owner_id.map(str::to_string);
            let floor = self.retrieval.question_match_threshold;

            tokio::spawn(async move {
                let _permit = workers
                    .acquire_owned()
                    .await
                    .context("Worker pool closed")?;
                search_questions(
                    store.as_ref(),
                    &embeddings,
                    &query_embedding,
                    owner_id.as_deref(),
                    floor,
                )
                .await
            })
        };

        let segment_branch = {
            let workers = Arc::clone(&self.workers);
            let index = Arc::clone(&self.index);
            let query_embedding = Arc::clone(&query_embedding);
            let query = query.to_string();
            let owner_id = owner_id.map(str::to_string);
            let threshold = self.retrieval.general_threshold;
            let top_k = self.retrieval.segment_top_k;

            tokio::spawn(async move {
                let _permit = workers
                    .acquire_owned()
                    .await
                    .context("Worker pool closed")?;
                search_segments(
                    &index,
                    &query,
                    &query_embedding,
                    owner_id.as_deref(),
                    threshold,
                    top_k,
                )
                .await
            })
        };

        let (questions, segments) = tokio::join!(
            join_branch(
                "question search",
                question_branch,
                self.retrieval.question_search_timeout()
            ),
            join_branch(
                "segment search",
                segment_branch,
                self.retrieval.segment_search_timeout()
            ),
        );

        Ok((questions, segments))
    }

    /// Whether the best segments are good enough to answer from.
    ///
    /// Definitions need their subject to appear in the retrieved text and a
    /// stricter score, since a near miss produces a confidently wrong answer.
    fn passes_gate(&self, question: &str, segments: &[MatchResult]) -> bool {
        let Some(best) = segments.first() else {
            debug!(stage = %Stage::Gate, "No segment matched");
            return false;
        };

        let question_type = classify(question);
        if question_type != QuestionType::Definition {
            let passed = best.score >= self.retrieval.general_threshold;
            debug!(
                stage = %Stage::Gate,
                "{} question, best score {:.3}, passed: {}",
                question_type, best.score, passed
            );
            return passed;
        }

        let Some(subject) = definition_subject(question) else {
            debug!(stage = %Stage::Gate, "No definition subject found in question");
            return false;
        };
        let subject_found = segments
            .iter()
            .any(|m| m.record.segment.to_lowercase().contains(&subject));
        let passed = subject_found && best.score >= self.retrieval.definition_threshold;

        debug!(
            stage = %Stage::Gate,
            "Definition of {:?}, subject found: {}, best score {:.3}, passed: {}",
            subject, subject_found, best.score, passed
        );
        passed
    }

    async fn synthesize(&self, question: &str, segments: &[MatchResult]) -> Outcome {
        let contexts: Vec<&str> = segments
            .iter()
            .take(self.answer_config.context_segments.max(1))
            .map(|m| m.record.segment.as_str())
            .collect();
        let question_type = classify(question);
        let prompt = build_prompt(question_type, question, &contexts);

        let timeout = self.answer_config.generation_timeout();
        let generated = match tokio::time::timeout(timeout, self.generator.generate(&prompt)).await
        {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!(stage = %Stage::Synthesize, "Generation failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!(stage = %Stage::Synthesize, "Generation timed out after {:?}", timeout);
                None
            }
        };

        match generated {
            Some(text) if is_acceptable_answer(&text) => {
                let answer = normalize_answer(&text, self.answer_config.max_answer_chars);
                if answer.is_empty() {
                    self.context_fallback(&contexts)
                } else {
                    Outcome::Generated(answer)
                }
            }
            Some(_) => {
                debug!(stage = %Stage::Synthesize, "Generated answer rejected, using context");
                self.context_fallback(&contexts)
            }
            None => self.context_fallback(&contexts),
        }
    }

    fn context_fallback(&self, contexts: &[&str]) -> Outcome {
        contexts
            .first()
            .map(|context| leading_sentences(context, FALLBACK_SENTENCES))
            .filter(|sentences| !sentences.is_empty())
            .map_or(Outcome::NoInformation, Outcome::ContextFallback)
    }

    async fn store_outcome(
        &self,
        outcome: Outcome,
        question: &str,
        cache_key: String,
        owner_id: Option<&str>,
    ) -> String {
        let answer = match outcome {
            Outcome::NoInformation => return NO_INFORMATION_MESSAGE.to_string(),
            Outcome::Generated(answer) => {
                if let Some(owner_id) = owner_id {
                    self.persist_question(question, &answer, owner_id).await;
                }
                answer
            }
            Outcome::Reused(answer) | Outcome::ContextFallback(answer) => answer,
        };

        self.responses.put(cache_key, answer.clone());
        debug!(stage = %Stage::CacheStore, "Cached answer ({} chars)", answer.chars().count());
        answer
    }

    async fn persist_question(&self, question: &str, answer: &str, owner_id: &str) {
        let record = QuestionRecord {
            question_text: question.trim().to_string(),
            answer_text: answer.to_string(),
            created_at: Utc::now().naive_utc(),
            owner_id: Some(owner_id.to_string()),
        };

        if let Err(e) = self.store.save_question(record).await {
            warn!(
                stage = %Stage::CacheStore,
                "Failed to save answered question for {}: {:#}", owner_id, e
            );
        }
    }
}

/// Lower-case, drop punctuation other than `. , ? ! -` and collapse whitespace
#[inline]
pub fn normalize_question(question: &str) -> String {
    let kept: String = question
        .to_lowercase()
        .chars()
        .filter(|c| !is_stripped_punctuation(*c))
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_stripped_punctuation(c: char) -> bool {
    if matches!(c, '.' | ',' | '?' | '!' | '-') {
        return false;
    }
    c.is_ascii_punctuation()
        || matches!(
            c,
            '“' | '”' | '‘' | '’' | '«' | '»' | '…' | '–' | '—' | '¿' | '¡'
        )
}

// Answers depend on the document scope, so the scope is part of the key
fn response_cache_key(normalized: &str, owner_id: Option<&str>) -> String {
    owner_id.map_or_else(
        || normalized.to_string(),
        |owner_id| format!("{owner_id}\u{1f}{normalized}"),
    )
}

async fn search_questions(
    store: &dyn DocumentStore,
    embeddings: &EmbeddingCache,
    query_embedding: &Embedding,
    owner_id: Option<&str>,
    floor: f32,
) -> Result<Vec<QuestionMatch>> {
    if query_embedding.is_fallback() {
        debug!("Skipping question search, query embedding is a fallback vector");
        return Ok(Vec::new());
    }

    let questions = store
        .list_questions()
        .await
        .context("Failed to list answered questions")?;

    let mut matches = Vec::new();
    for record in questions {
        let in_scope = match (owner_id, record.owner_id.as_deref()) {
            (Some(wanted), Some(owner)) => wanted == owner,
            _ => true,
        };
        if !in_scope {
            continue;
        }

        let candidate = embeddings.get_or_compute(&record.question_text).await;
        if candidate.is_fallback() {
            continue;
        }

        let score = cosine_similarity(&query_embedding.vector, &candidate.vector);
        if score >= floor {
            matches.push(QuestionMatch { record, score });
        }
    }

    matches.sort_by(|a, b| by_score_descending(a.score, b.score));
    Ok(matches)
}

async fn search_segments(
    index: &VectorIndex,
    query: &str,
    query_embedding: &Embedding,
    owner_id: Option<&str>,
    threshold: f32,
    top_k: usize,
) -> Result<Vec<MatchResult>> {
    let snapshot = index.snapshot().await?;
    let snapshot = match owner_id {
        Some(owner_id) => Arc::new(snapshot.scoped_to(owner_id)),
        None => snapshot,
    };

    if query_embedding.is_fallback() {
        debug!("Query embedding is a fallback vector, using keyword search");
        return Ok(keyword_rank(query, &snapshot, top_k));
    }

    let matches = rank(&query_embedding.vector, &snapshot, threshold, top_k);
    if matches.is_empty() {
        debug!("No segment cleared the similarity threshold, using keyword search");
        return Ok(keyword_rank(query, &snapshot, top_k));
    }

    Ok(matches)
}

async fn join_branch<T>(
    name: &'static str,
    mut handle: JoinHandle<Result<Vec<T>>>,
    limit: Duration,
) -> Vec<T> {
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(Ok(matches))) => matches,
        Ok(Ok(Err(e))) => {
            warn!("{} failed: {:#}", name, e);
            Vec::new()
        }
        Ok(Err(e)) => {
            warn!("{} task did not complete: {}", name, e);
            Vec::new()
        }
        Err(_) => {
            handle.abort();
            warn!("{} timed out after {:?}", name, limit);
            Vec::new()
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
