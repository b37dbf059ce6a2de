use super::LruStore;

/// Final answers keyed by normalized question text.
pub struct ResponseCache {
    entries: LruStore<String, String>,
}

impl ResponseCache {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruStore::new(capacity),
        }
    }

    #[inline]
    pub fn get(&self, normalized_question: &str) -> Option<String> {
        self.entries.get(&normalized_question.to_string())
    }

    #[inline]
    pub fn put(&self, normalized_question: String, answer: String) {
        self.entries.put(normalized_question, answer);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn clear(&self) {
        self.entries.clear();
    }
}
