//! The LLM prose adapter seam.

use async_trait::async_trait;

/// External adapter backing `prose { ... }` bodies.
///
/// The engine renders the body to a prompt and hands it off; providers,
/// retries, and model selection all live on the embedder's side of this
/// trait.
#[async_trait]
pub trait ProseAdapter: Send + Sync + std::fmt::Debug {
    async fn complete(&self, prompt: &str) -> Result<String, String>;
}

/// Default adapter for runs with no LLM configured: every call errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProseAdapter;

#[async_trait]
impl ProseAdapter for NullProseAdapter {
    async fn complete(&self, _prompt: &str) -> Result<String, String> {
        Err("no prose adapter configured".to_string())
    }
}
