use crate::config::RetryPolicy;
use crate::core::definition::ItemDefinition;
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Enrichment source unavailable: {0}")]
    Unavailable(String),

    #[error("Enrichment gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Best-effort tag annotator for definitions that have not been enriched yet.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn labels(&self, definition: &ItemDefinition) -> Result<Vec<String>, EnrichError>;
}

/// Run `enricher` against `definition` unless it was already enriched,
/// retrying failed lookups under `policy`.
///
/// On success the tags are replaced and the definition is marked requeried.
/// On failure the definition is left untouched and `Exhausted` is returned.
pub async fn enrich_definition(
    enricher: &dyn Enricher,
    definition: &mut ItemDefinition,
    policy: &RetryPolicy,
) -> Result<(), EnrichError> {
    if definition.requeried {
        return Ok(());
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match enricher.labels(definition).await {
            Ok(labels) => {
                definition.tags = normalize_tags(labels);
                definition.requeried = true;
                tracing::debug!(identifier = %definition.md5, attempt, tags = ?definition.tags, "enriched definition");
                return Ok(());
            }
            Err(e) if attempt >= max_attempts => {
                return Err(EnrichError::Exhausted {
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.delay();
                tracing::debug!(identifier = %definition.md5, attempt, error = %e, ?delay, "enrichment failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Lowercase, trim, drop empties and repeats; first occurrence wins.
fn normalize_tags(labels: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .map(|label| label.trim().to_lowercase())
        .filter(|label| !label.is_empty() && seen.insert(label.clone()))
        .collect()
}
