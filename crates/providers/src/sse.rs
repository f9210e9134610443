//! Shared SSE plumbing for the streaming adapters.
//!
//! Both adapters receive a `reqwest::Response`, buffer chunks, split on the
//! `\n\n` event boundary, pull out `data:` payloads, and hand each payload
//! to a provider-specific parser producing [`CompletionEvent`]s.

use maestro_domain::error::{Error, Result};
use maestro_domain::stream::{BoxStream, CompletionEvent};

/// Drain complete `data:` payloads from an SSE buffer, leaving any
/// trailing partial event in place for the next chunk.
pub(crate) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }
    payloads
}

/// Build an event stream from an SSE response and a parser closure.
///
/// The closure is `FnMut` because the Anthropic adapter keeps tool-call
/// assembly state across payloads. The stream flushes a trailing partial
/// event at EOF and guarantees a terminal `Done` even if the provider
/// never sent one.
pub(crate) fn sse_event_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<CompletionEvent>>
where
    F: FnMut(&str) -> Vec<Result<CompletionEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_sse_data(&mut buffer) {
                        for event in parse(&payload) {
                            if matches!(&event, Ok(CompletionEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for payload in drain_sse_data(&mut buffer) {
                            for event in parse(&payload) {
                                if matches!(&event, Ok(CompletionEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Provider {
                        provider: "stream".into(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(CompletionEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
                metadata: None,
            });
        }
    };

    Box::pin(stream)
}
