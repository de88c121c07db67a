//! Streaming emulation for synchronous-only backends.
//!
//! [`BufferedStream`] wraps any [`ChatBackend`]: `stream` runs one buffered
//! `generate` and replays it as the canonical event sequence, so callers see
//! the exact same event ordering native streamers produce. The decorator is
//! applied by the registry; orchestration code never knows which kind it got.

use std::sync::Arc;

use crate::traits::{ChatBackend, GenerateRequest, GenerateResponse};
use lq_domain::error::Result;
use lq_domain::stream::{BoxStream, StreamEvent};

pub struct BufferedStream {
    inner: Arc<dyn ChatBackend>,
}

impl BufferedStream {
    pub fn new(inner: Arc<dyn ChatBackend>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl ChatBackend for BufferedStream {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        self.inner.generate(req).await
    }

    async fn stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.inner.generate(req).await?;

        tracing::debug!(
            provider = %self.inner.provider_id(),
            chars = response.content.len(),
            "emulating stream from buffered response"
        );

        let stream = async_stream::stream! {
            yield Ok(StreamEvent::StreamStart {
                warnings: response.warnings.clone(),
            });
            if !response.content.is_empty() {
                yield Ok(StreamEvent::TextDelta {
                    id: "0".to_string(),
                    text: response.content.clone(),
                });
            }
            yield Ok(StreamEvent::Finish {
                reason: response.finish_reason,
                usage: response.usage.clone(),
            });
        };

        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }
}
