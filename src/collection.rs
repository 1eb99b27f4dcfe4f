use std::sync::Arc;

use crate::clients::VectorIndex;
use crate::models::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Collection was absent and has been created.
    Created,
    /// Collection was dropped (if present) and created fresh.
    Recreated,
    /// Collection already existed and was left untouched.
    Existing,
}

/// Keeps the target collection in the configured shape.
pub struct CollectionManager {
    index: Arc<dyn VectorIndex>,
    spec: CollectionSpec,
    validate_existing: bool,
}

impl CollectionManager {
    pub fn new(index: Arc<dyn VectorIndex>, spec: CollectionSpec, validate_existing: bool) -> Self {
        Self { index, spec, validate_existing }
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    /// `reset = true` drops and recreates; otherwise creates only if absent.
    /// An existing collection whose dimension or distance differs from the
    /// configured shape fails with `ConfigMismatch` unless validation is disabled.
    pub async fn ensure(&self, reset: bool) -> Result<EnsureOutcome> {
        if reset {
            match self.index.delete_collection().await {
                Ok(true) => tracing::info!(collection = %self.spec.name, "Deleted existing collection"),
                Ok(false) => tracing::info!(collection = %self.spec.name, "Collection did not exist; nothing to delete"),
                Err(e) => tracing::warn!(collection = %self.spec.name, error = %e, "Collection could not be deleted; attempting create anyway"),
            }
            self.index.create_collection(self.spec.dimension, self.spec.distance).await?;
            tracing::info!(collection = %self.spec.name, dimension = self.spec.dimension, distance = %self.spec.distance, "Collection recreated");
            return Ok(EnsureOutcome::Recreated);
        }

        match self.index.collection_info().await? {
            None => {
                self.index.create_collection(self.spec.dimension, self.spec.distance).await?;
                tracing::info!(collection = %self.spec.name, dimension = self.spec.dimension, "Collection created");
                Ok(EnsureOutcome::Created)
            }
            Some(info) => {
                if self.validate_existing {
                    self.validate(&info)?;
                }
                tracing::info!(collection = %self.spec.name, points = info.points_count, "Collection already exists");
                Ok(EnsureOutcome::Existing)
            }
        }
    }

    fn validate(&self, info: &CollectionInfo) -> Result<()> {
        let mut problems = Vec::new();
        if info.dimension != self.spec.dimension {
            problems.push(format!("dimension {} != configured {}", info.dimension, self.spec.dimension));
        }
        if info.distance != self.spec.distance {
            problems.push(format!("distance {} != configured {}", info.distance, self.spec.distance));
        }
        if problems.is_empty() {
            return Ok(());
        }
        let msg = format!("collection '{}': {}; rerun with reset to recreate it", self.spec.name, problems.join(", "));
        tracing::error!(collection = %self.spec.name, error = %msg, "Collection shape does not match configuration");
        Err(RetrievalError::ConfigMismatch(msg))
    }
}
