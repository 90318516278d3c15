//! Stable per-tab identity.

use std::sync::{Arc, OnceLock};

use crate::store::{keys, TabScopedStore};

/// Hands out the tab id, generating and persisting it on first use.
pub struct TabIdProvider {
    store: Arc<dyn TabScopedStore>,
    cached: OnceLock<String>,
}

impl TabIdProvider {
    pub fn new(store: Arc<dyn TabScopedStore>) -> Self {
        Self {
            store,
            cached: OnceLock::new(),
        }
    }

    pub fn tab_id(&self) -> &str {
        self.cached.get_or_init(|| {
            if let Some(existing) = self.store.get(keys::TAB_ID) {
                if !existing.trim().is_empty() {
                    return existing;
                }
            }

            let generated = format!("tab-{}", ulid::Ulid::new().to_string().to_lowercase());
            if let Err(err) = self.store.set(keys::TAB_ID, &generated) {
                // The id still holds for this process; only reload stability is lost.
                tracing::warn!(error = %err, "Failed to persist tab id");
            }
            tracing::debug!(tab_id = %generated, "Allocated tab id");
            generated
        })
    }
}
