use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use serde_json::Value;
use tokio::time::{Instant, Sleep};

use crate::error::LlmError;

/// Parse raw SSE text into (event_type, data) pairs.
///
/// Frames without an `event:` line are reported as `message`. Multiple
/// `data:` lines in one frame are joined with `\n`.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    let mut flush = |event: &mut String, data: &mut Vec<&str>| {
        if !data.is_empty() || !event.is_empty() {
            let name = if event.is_empty() { "message".to_string() } else { std::mem::take(event) };
            events.push((name, data.join("\n")));
            data.clear();
        }
    };

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim_start().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() {
            flush(&mut current_event, &mut data_lines);
        }
    }
    flush(&mut current_event, &mut data_lines);

    events
}

/// Text delta carried by one chat-completions stream chunk.
fn delta_content(data: &str) -> Result<Option<String>, LlmError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| LlmError::MalformedResponse(format!("stream chunk: {e}")))?;
    if let Some(err) = value.get("error") {
        return Err(LlmError::StreamInterrupted(err.to_string()));
    }
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string))
}

pin_project! {
    /// Turns a chat-completions SSE byte stream into text chunks.
    ///
    /// Ends at `data: [DONE]` or when the body ends. Yields an error if no
    /// bytes arrive within the idle timeout.
    pub struct SseTextStream<S> {
        #[pin]
        inner: S,
        #[pin]
        idle_deadline: Sleep,
        idle_duration: Duration,
        buffer: String,
        pending: VecDeque<Result<String, LlmError>>,
        done: bool,
    }
}

impl<S> SseTextStream<S> {
    pub fn new(inner: S, idle_timeout: Duration) -> Self {
        Self {
            inner,
            idle_deadline: tokio::time::sleep(idle_timeout),
            idle_duration: idle_timeout,
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

fn drain_frames(
    frames: &str,
    pending: &mut VecDeque<Result<String, LlmError>>,
    done: &mut bool,
) {
    for (_, data) in parse_sse_lines(frames) {
        if *done {
            return;
        }
        if data.trim() == "[DONE]" {
            *done = true;
            return;
        }
        match delta_content(&data) {
            Ok(Some(text)) if !text.is_empty() => pending.push_back(Ok(text)),
            Ok(_) => {}
            Err(e) => {
                *done = true;
                pending.push_back(Err(e));
            }
        }
    }
}

impl<S, E> Stream for SseTextStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<String, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = Instant::now() + *this.idle_duration;
                    this.idle_deadline.as_mut().reset(deadline);

                    this.buffer
                        .push_str(&String::from_utf8_lossy(&bytes).replace("\r\n", "\n"));
                    while let Some(pos) = this.buffer.find("\n\n") {
                        let frame: String = this.buffer.drain(..pos + 2).collect();
                        drain_frames(&frame, this.pending, this.done);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(LlmError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    let remaining = std::mem::take(this.buffer);
                    drain_frames(&remaining, this.pending, this.done);
                    *this.done = true;
                }
                Poll::Pending => {
                    if this.idle_deadline.as_mut().poll(cx).is_ready() {
                        *this.done = true;
                        return Poll::Ready(Some(Err(LlmError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            this.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
