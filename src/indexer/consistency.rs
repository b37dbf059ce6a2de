// Store consistency validation
// Finds embeddings whose document is gone and documents left without embeddings

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::answer::AnswerOrchestrator;
use crate::store::DocumentStore;

/// Consistency check results for the document store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of stored documents
    pub documents: usize,
    /// Number of stored embeddings, orphans included
    pub embeddings: usize,
    /// Owners referenced by embeddings that have no document, sorted
    pub orphaned_owners: Vec<String>,
    /// Number of embeddings belonging to those owners
    pub orphaned_embeddings: usize,
    /// Documents that have no embeddings and can never be retrieved
    pub empty_documents: Vec<String>,
    /// Overall consistency status
    pub is_consistent: bool,
}

/// Performs consistency validation and orphan cleanup
pub struct ConsistencyValidator<'a> {
    store: &'a dyn DocumentStore,
    orchestrator: &'a AnswerOrchestrator,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(store: &'a dyn DocumentStore, orchestrator: &'a AnswerOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Compare stored embeddings against stored documents
    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Starting store consistency validation");

        let documents = self
            .store
            .list_documents()
            .await
            .context("Failed to list documents")?;
        let embeddings = self
            .store
            .list_all_embeddings()
            .await
            .context("Failed to list embeddings")?;
        debug!(
            "Found {} documents and {} embeddings",
            documents.len(),
            embeddings.len()
        );

        let document_ids: HashSet<String> = documents.iter().map(|d| d.id.clone()).collect();
        let orphans = self
            .store
            .find_orphaned_embeddings(&document_ids)
            .await
            .context("Failed to find orphaned embeddings")?;

        let orphaned_owners: BTreeSet<String> =
            orphans.iter().map(|r| r.owner_id.clone()).collect();

        let mut per_owner: HashMap<&str, usize> = HashMap::new();
        for record in &embeddings {
            *per_owner.entry(record.owner_id.as_str()).or_default() += 1;
        }
        let empty_documents: Vec<String> = documents
            .iter()
            .filter(|d| !per_owner.contains_key(d.id.as_str()))
            .map(|d| d.id.clone())
            .collect();

        let is_consistent = orphans.is_empty() && empty_documents.is_empty();

        let report = ConsistencyReport {
            documents: documents.len(),
            embeddings: embeddings.len(),
            orphaned_owners: orphaned_owners.into_iter().collect(),
            orphaned_embeddings: orphans.len(),
            empty_documents,
            is_consistent,
        };

        if report.is_consistent {
            info!("Store consistency validation passed");
        } else {
            warn!("Store consistency validation found issues");
            log_consistency_issues(&report);
        }

        Ok(report)
    }

    /// Delete every embedding of the given orphaned owners.
    ///
    /// Returns the number of deleted embeddings. The answer caches are
    /// invalidated whenever anything was deleted.
    #[inline]
    pub async fn cleanup_orphaned_embeddings(&self, owner_ids: &[String]) -> Result<u64> {
        if owner_ids.is_empty() {
            return Ok(0);
        }

        info!(
            "Cleaning up orphaned embeddings of {} owners",
            owner_ids.len()
        );

        let mut cleaned_count = 0;
        for owner_id in owner_ids {
            match self.store.delete_embeddings_by_owner(owner_id).await {
                Ok(0) => {
                    warn!("No orphaned embeddings found for deletion: {}", owner_id);
                }
                Ok(count) => {
                    cleaned_count += count;
                    debug!("Cleaned up {} orphaned embeddings of {}", count, owner_id);
                }
                Err(e) => {
                    error!("Failed to delete orphaned embeddings of {}: {}", owner_id, e);
                }
            }
        }

        if cleaned_count > 0 {
            self.orchestrator.invalidate_caches().await;
        }

        info!(
            "Successfully cleaned up {} orphaned embeddings",
            cleaned_count
        );
        Ok(cleaned_count)
    }
}

fn log_consistency_issues(report: &ConsistencyReport) {
    if !report.orphaned_owners.is_empty() {
        warn!(
            "Found {} orphaned embeddings from {} missing documents",
            report.orphaned_embeddings,
            report.orphaned_owners.len()
        );
    }

    for document_id in &report.empty_documents {
        warn!("Document {} has no embeddings", document_id);
    }
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Store is consistent: {} documents, {} embeddings",
                self.documents, self.embeddings
            )
        } else {
            format!(
                "Store inconsistencies found: {} orphaned embeddings from {} missing documents, {} documents without embeddings",
                self.orphaned_embeddings,
                self.orphaned_owners.len(),
                self.empty_documents.len()
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.orphaned_owners.len() + self.empty_documents.len()
    }
}
