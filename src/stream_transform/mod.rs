//! Stream transformations applied to a run's full stream.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::RociError;
use crate::types::{ProviderMetadata, TextStreamPart};

/// A full-stream subscription, as seen by transforms.
pub type PartStream = BoxStream<'static, Result<TextStreamPart, RociError>>;

/// Trait for transforming a stream of canonical parts.
pub trait StreamTransform: Send + Sync {
    /// Transform the stream.
    fn transform(&self, stream: PartStream) -> PartStream;
}

/// Apply `transforms` in order.
pub fn apply_transforms(stream: PartStream, transforms: &[Arc<dyn StreamTransform>]) -> PartStream {
    transforms
        .iter()
        .fold(stream, |stream, transform| transform.transform(stream))
}

/// Filter parts based on a predicate.
pub struct FilterTransform {
    predicate: Arc<dyn Fn(&TextStreamPart) -> bool + Send + Sync>,
}

impl FilterTransform {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&TextStreamPart) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl StreamTransform for FilterTransform {
    fn transform(&self, stream: PartStream) -> PartStream {
        let predicate = self.predicate.clone();
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            while let Some(item) = inner.next().await {
                match item {
                    Ok(part) => {
                        if (predicate)(&part) {
                            yield Ok(part);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Map/transform the text of each text delta.
pub struct MapTransform {
    mapper: Arc<dyn Fn(String) -> String + Send + Sync>,
}

impl MapTransform {
    pub fn new<F>(mapper: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        Self {
            mapper: Arc::new(mapper),
        }
    }
}

impl StreamTransform for MapTransform {
    fn transform(&self, stream: PartStream) -> PartStream {
        let mapper = self.mapper.clone();
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            while let Some(item) = inner.next().await {
                match item {
                    Ok(TextStreamPart::TextDelta { id, text, provider_metadata }) => {
                        let text = if text.is_empty() { text } else { (mapper)(text) };
                        yield Ok(TextStreamPart::TextDelta { id, text, provider_metadata });
                    }
                    Ok(part) => yield Ok(part),
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Text deltas for one id, held back until flushed.
struct PendingText {
    id: String,
    text: String,
    provider_metadata: Option<ProviderMetadata>,
}

impl PendingText {
    fn into_part(self) -> TextStreamPart {
        TextStreamPart::TextDelta {
            id: self.id,
            text: self.text,
            provider_metadata: self.provider_metadata,
        }
    }
}

/// Append a delta to `pending`, returning whatever must be flushed first.
fn coalesce(
    pending: &mut Option<PendingText>,
    id: String,
    text: String,
    provider_metadata: Option<ProviderMetadata>,
) -> Option<TextStreamPart> {
    match pending {
        Some(current) if current.id == id => {
            current.text.push_str(&text);
            None
        }
        _ => pending
            .replace(PendingText {
                id,
                text,
                provider_metadata,
            })
            .map(PendingText::into_part),
    }
}

/// Buffer text deltas of the same id until a minimum size, then emit.
///
/// Any other part flushes the buffer before it is forwarded.
pub struct BufferTransform {
    min_chars: usize,
}

impl BufferTransform {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl StreamTransform for BufferTransform {
    fn transform(&self, stream: PartStream) -> PartStream {
        let min_chars = self.min_chars;
        let transformed = async_stream::stream! {
            let mut pending: Option<PendingText> = None;
            let mut inner = std::pin::pin!(stream);

            while let Some(item) = inner.next().await {
                match item {
                    Ok(TextStreamPart::TextDelta { id, text, provider_metadata }) => {
                        if let Some(flushed) = coalesce(&mut pending, id, text, provider_metadata) {
                            yield Ok(flushed);
                        }
                        if pending.as_ref().is_some_and(|p| p.text.len() >= min_chars) {
                            if let Some(ready) = pending.take() {
                                yield Ok(ready.into_part());
                            }
                        }
                    }
                    Ok(part) => {
                        if let Some(ready) = pending.take() {
                            yield Ok(ready.into_part());
                        }
                        yield Ok(part);
                    }
                    Err(e) => {
                        if let Some(ready) = pending.take() {
                            yield Ok(ready.into_part());
                        }
                        yield Err(e);
                        break;
                    }
                }
            }

            // Flush remaining buffer
            if let Some(ready) = pending.take() {
                yield Ok(ready.into_part());
            }
        };

        Box::pin(transformed)
    }
}

/// Throttle text delta emissions to at most one per interval.
///
/// Deltas arriving within the interval are merged; any other part flushes
/// them first.
pub struct ThrottleTransform {
    interval: std::time::Duration,
}

impl ThrottleTransform {
    pub fn new(interval: std::time::Duration) -> Self {
        Self { interval }
    }
}

impl StreamTransform for ThrottleTransform {
    fn transform(&self, stream: PartStream) -> PartStream {
        let interval = self.interval;
        let transformed = async_stream::stream! {
            let mut pending: Option<PendingText> = None;
            let mut last_emit: Option<tokio::time::Instant> = None;
            let mut inner = std::pin::pin!(stream);

            while let Some(item) = inner.next().await {
                match item {
                    Ok(TextStreamPart::TextDelta { id, text, provider_metadata }) => {
                        if let Some(flushed) = coalesce(&mut pending, id, text, provider_metadata) {
                            yield Ok(flushed);
                            last_emit = Some(tokio::time::Instant::now());
                        }
                        let due = last_emit.map_or(true, |at| at.elapsed() >= interval);
                        if due {
                            if let Some(ready) = pending.take() {
                                yield Ok(ready.into_part());
                                last_emit = Some(tokio::time::Instant::now());
                            }
                        }
                    }
                    Ok(part) => {
                        if let Some(ready) = pending.take() {
                            yield Ok(ready.into_part());
                        }
                        yield Ok(part);
                    }
                    Err(e) => {
                        if let Some(ready) = pending.take() {
                            yield Ok(ready.into_part());
                        }
                        yield Err(e);
                        break;
                    }
                }
            }

            if let Some(ready) = pending.take() {
                yield Ok(ready.into_part());
            }
        };

        Box::pin(transformed)
    }
}
