//! Token persistence.
//!
//! Stores the current token pair and the client identity sent with every
//! grant. Writes replace the whole record (last write wins); readers never
//! observe a partially written pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AuthError, Result};
use crate::token::TokenPair;

// ============================================================================
// TokenStore Trait
// ============================================================================

/// Storage for token material.
#[async_trait]
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Load the stored pair, if any.
    async fn load(&self) -> Result<Option<TokenPair>>;

    /// Replace the stored pair.
    async fn save(&self, tokens: &TokenPair) -> Result<()>;

    /// Erase the stored pair. The client id survives.
    async fn clear(&self) -> Result<()>;

    /// Stable client identity, generated on first use.
    async fn client_id(&self) -> Result<String>;
}

/// Shared token store for use across async contexts.
pub type SharedTokenStore = Arc<dyn TokenStore>;

/// On-disk/in-memory record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredState {
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    tokens: Option<TokenPair>,
}

fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// FileTokenStore
// ============================================================================

/// JSON-file token store for production use.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cached: RwLock<Option<StoredState>>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Get the token file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_state(&self) -> Result<StoredState> {
        {
            let cache = self.cached.read().await;
            if let Some(state) = cache.as_ref() {
                return Ok(state.clone());
            }
        }

        let mut cache = self.cached.write().await;
        if let Some(state) = cache.as_ref() {
            return Ok(state.clone());
        }

        let state = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AuthError::Serialization(format!("Failed to parse token file: {}", e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredState::default(),
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "Failed to read token file: {}",
                    e
                )));
            }
        };

        *cache = Some(state.clone());
        Ok(state)
    }

    /// Apply `update` and persist; the cache is swapped only after the rename lands.
    ///
    /// An unparseable file is replaced rather than blocking every later write.
    async fn write_state(&self, update: impl FnOnce(&mut StoredState)) -> Result<()> {
        let mut state = match self.read_state().await {
            Ok(state) => state,
            Err(AuthError::Serialization(reason)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %reason,
                    "Token file is corrupt, overwriting it"
                );
                StoredState::default()
            }
            Err(e) => return Err(e),
        };
        let mut cache = self.cached.write().await;
        // Re-read under the write lock so concurrent updates are not lost.
        if let Some(current) = cache.as_ref() {
            state = current.clone();
        }
        update(&mut state);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AuthError::Storage(format!("Failed to create token directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| AuthError::Serialization(format!("Failed to serialize tokens: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AuthError::Storage(format!("Failed to write token file: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AuthError::Storage(format!("Failed to replace token file: {}", e)))?;

        *cache = Some(state);
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.read_state().await?.tokens)
    }

    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        let tokens = tokens.clone();
        self.write_state(|state| state.tokens = Some(tokens)).await?;
        tracing::debug!(path = %self.path.display(), "Tokens saved");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.write_state(|state| state.tokens = None).await?;
        tracing::debug!(path = %self.path.display(), "Tokens cleared");
        Ok(())
    }

    async fn client_id(&self) -> Result<String> {
        match self.read_state().await {
            Ok(StoredState {
                client_id: Some(id),
                ..
            }) => return Ok(id),
            Ok(_) | Err(AuthError::Serialization(_)) => {}
            Err(e) => return Err(e),
        }

        let mut assigned = None;
        self.write_state(|state| {
            let id = state.client_id.get_or_insert_with(generate_client_id);
            assigned = Some(id.clone());
        })
        .await?;
        assigned.ok_or_else(|| AuthError::Storage("Client id was not persisted".to_string()))
    }
}

// ============================================================================
// InMemoryTokenStore
// ============================================================================

/// In-memory token store, for tests and short-lived embedders.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    state: parking_lot::RwLock<StoredState>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            state: parking_lot::RwLock::new(StoredState {
                client_id: None,
                tokens: Some(tokens),
            }),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.state.read().tokens.clone())
    }

    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        self.state.write().tokens = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.state.write().tokens = None;
        Ok(())
    }

    async fn client_id(&self) -> Result<String> {
        Ok(self
            .state
            .write()
            .client_id
            .get_or_insert_with(generate_client_id)
            .clone())
    }
}

/// Create a shared file-based token store.
pub fn create_token_store(path: &Path) -> SharedTokenStore {
    Arc::new(FileTokenStore::new(path))
}

/// Create a shared in-memory token store.
pub fn create_memory_token_store() -> SharedTokenStore {
    Arc::new(InMemoryTokenStore::new())
}
