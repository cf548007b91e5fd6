//! Backend adapters: one capability, two upstream protocols.
//!
//! Both adapters turn a normalized [`BackendRequest`] into a lazy sequence of
//! text deltas. The gateway never sees which protocol produced them.

pub mod cloud;
pub mod local;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::agents::FixedPrompt;
use crate::errors::GatewayResult;
use crate::history::Message;

pub use cloud::CloudBackend;
pub use local::LocalBackend;

/// Normalized request handed to an adapter.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Present only for agents bound to a server-side stored prompt.
    pub fixed_prompt: Option<FixedPrompt>,
    /// Raw user text; the stored-prompt call uses it as its sole input.
    pub input: String,
}

/// Ordered, lazy sequence of assistant text fragments.
pub type DeltaStream = Pin<Box<dyn Stream<Item = GatewayResult<String>> + Send>>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Open the upstream call and return its delta stream.
    ///
    /// Errors returned here happened before any fragment was produced
    /// (missing credential, unreachable endpoint, rejected request); failures
    /// after that point arrive as items of the stream.
    async fn stream_chat(&self, request: BackendRequest) -> GatewayResult<DeltaStream>;
}

/// Wrap an already-complete reply as a one-fragment stream.
pub(crate) fn single_fragment(text: String) -> DeltaStream {
    Box::pin(futures::stream::once(async move { Ok(text) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_single_fragment_yields_once() {
        let mut stream = single_fragment("whole reply".to_string());
        assert_eq!(stream.next().await.unwrap().unwrap(), "whole reply");
        assert!(stream.next().await.is_none());
    }
}
