// Retrieval module
// In-memory vector index, cosine/keyword ranking, question classification and
// prompt building for the answer engine

pub mod classifier;
pub mod index;
pub mod prompt;
pub mod similarity;

pub use classifier::{QuestionType, classify, definition_subject};
pub use index::{VectorIndex, VectorIndexSnapshot};
pub use similarity::{MatchResult, by_score_descending, cosine_similarity, keyword_rank, rank};
