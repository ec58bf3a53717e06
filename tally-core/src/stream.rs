//! Incremental text responses.

use crate::error::{AiError, GatewayFailure};
use crate::provider::ChatCompletionStream;
use futures::stream::{FusedStream, Stream, StreamExt};
use futures::{ready, task::Context};
use pin_project::pin_project;
use std::pin::Pin;
use std::task::Poll;

/// Finite, non-restartable stream of text fragments.
///
/// Each provider chunk becomes exactly one fragment; chunks without text
/// become `""`. The stream ends after the provider's last chunk or after the
/// first error, and stays ended. Dropping it mid-way cancels the underlying
/// response; nothing is ever re-requested.
#[pin_project]
pub struct TokenStream {
    #[pin]
    inner: Box<ChatCompletionStream>,
    finished: bool,
    fragments: usize,
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream")
            .field("finished", &self.finished)
            .field("fragments", &self.fragments)
            .finish()
    }
}

impl TokenStream {
    pub fn new(inner: Box<ChatCompletionStream>) -> Self {
        Self {
            inner,
            finished: false,
            fragments: 0,
        }
    }

    /// Whether end-of-stream (or an error) has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of fragments yielded so far.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Drain the remaining fragments into one string.
    pub async fn collect_text(mut self) -> Result<String, GatewayFailure> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for TokenStream {
    type Item = Result<String, GatewayFailure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.fragments += 1;
                let fragment = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .unwrap_or_default();
                Poll::Ready(Some(Ok(fragment)))
            }
            Some(Err(err)) => {
                *this.finished = true;
                tracing::error!("token stream aborted: {:?}", err);
                Poll::Ready(Some(Err(GatewayFailure::from(&err))))
            }
            None => {
                *this.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl FusedStream for TokenStream {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

/// Build a token stream from in-memory chunk results.
///
/// Mostly useful for providers that fake streaming and for tests.
pub fn token_stream_from_chunks(
    chunks: Vec<Result<crate::types::ChatCompletionChunk, AiError>>,
) -> TokenStream {
    let stream = async_stream::stream! {
        for chunk in chunks {
            yield chunk;
        }
    };
    TokenStream::new(Box::new(Box::pin(stream)))
}
