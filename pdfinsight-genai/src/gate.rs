use std::env;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use pdfinsight_core::CredentialGate;
use tracing::{debug, info};

/// Shared slot holding the API key, readable by the client and writable by the gate.
#[derive(Clone, Default)]
pub struct ApiKey(Arc<RwLock<Option<String>>>);

impl ApiKey {
    pub fn new(key: Option<String>) -> Self {
        let key = key.map(|k| k.trim().to_owned()).filter(|k| !k.is_empty());
        Self(Arc::new(RwLock::new(key)))
    }

    pub fn from_env(var: &str) -> Self {
        let key = env::var(var).ok();
        debug!(var, found = key.is_some(), "looked up API key");
        Self::new(key)
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.0.read().is_some()
    }

    /// Blank keys are ignored.
    pub fn set(&self, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        *self.0.write() = Some(key.to_owned());
        true
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_set() { "<set>" } else { "<unset>" };
        f.debug_tuple("ApiKey").field(&state).finish()
    }
}

/// Interactive source for a key when none is configured.
#[async_trait]
pub trait KeyPrompt: Send + Sync {
    /// `None` when the user declined.
    async fn ask(&self) -> Result<Option<String>>;
}

pub struct ApiKeyGate {
    key: ApiKey,
    prompt: Arc<dyn KeyPrompt>,
}

impl ApiKeyGate {
    pub fn new(key: ApiKey, prompt: Arc<dyn KeyPrompt>) -> Self {
        Self { key, prompt }
    }

    pub fn key(&self) -> ApiKey {
        self.key.clone()
    }
}

#[async_trait]
impl CredentialGate for ApiKeyGate {
    async fn has_credential(&self) -> bool {
        self.key.is_set()
    }

    async fn select_credential(&self) -> Result<()> {
        if let Some(answer) = self.prompt.ask().await? {
            if self.key.set(&answer) {
                info!("API key selected");
            }
        }
        Ok(())
    }
}
