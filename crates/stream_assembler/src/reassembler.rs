//! The reassembler state machine.
//!
//! Fragments are appended to a raw byte buffer and decoded late: an
//! incomplete trailing UTF-8 sequence stays buffered until the next
//! fragment completes it, so a flush boundary can never split a multi-byte
//! character. The decoded buffer is scanned for the rightmost paragraph
//! boundary not yet emitted, and a flush is honored only once the debounce
//! window has elapsed since the last emission. The terminator flushes the
//! remainder unconditionally.

use tokio::time::Instant;

use crate::error::StreamFailure;
use crate::policy::FlushPolicy;

/// Lifecycle of one reassembled response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblerState {
    /// Buffering fragments, nothing emitted yet.
    Accumulating,
    /// At least one chunk has been emitted.
    Emitting,
    /// Terminator received and remainder flushed.
    Done,
    /// The underlying transport signaled a hard error.
    Failed(StreamFailure),
}

impl ReassemblerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

pub struct StreamReassembler {
    policy: FlushPolicy,
    /// Undecoded bytes; at most one incomplete trailing sequence.
    raw: Vec<u8>,
    /// Decoded completion text accumulated so far.
    text: String,
    /// Byte offset into `text` already emitted as chunks.
    emitted: usize,
    last_flush: Instant,
    state: ReassemblerState,
}

impl StreamReassembler {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            raw: Vec::new(),
            text: String::new(),
            emitted: 0,
            last_flush: Instant::now(),
            state: ReassemblerState::Accumulating,
        }
    }

    pub fn state(&self) -> &ReassemblerState {
        &self.state
    }

    /// Full decoded completion accumulated so far, emitted or not.
    pub fn completion(&self) -> &str {
        &self.text
    }

    /// Feed a raw byte fragment.
    ///
    /// Returns an error only for bytes that can never decode (invalid
    /// UTF-8, as opposed to a not-yet-complete sequence, which is simply
    /// kept buffered).
    pub fn push_bytes(&mut self, fragment: &[u8]) -> Result<(), StreamFailure> {
        debug_assert!(!self.state.is_terminal(), "push after terminal state");
        self.raw.extend_from_slice(fragment);
        match std::str::from_utf8(&self.raw) {
            Ok(decoded) => {
                self.text.push_str(decoded);
                self.raw.clear();
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete trailing sequence; decode the valid prefix and
                // retry the tail on the next fragment.
                let valid = e.valid_up_to();
                self.text
                    .push_str(&String::from_utf8_lossy(&self.raw[..valid]));
                self.raw.drain(..valid);
            }
            Err(_) => {
                let failure =
                    StreamFailure::ProtocolError("invalid UTF-8 in backend stream".to_string());
                self.state = ReassemblerState::Failed(failure.clone());
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Feed an already-decoded text delta.
    pub fn push_text(&mut self, delta: &str) {
        debug_assert!(!self.state.is_terminal(), "push after terminal state");
        self.text.push_str(delta);
    }

    /// Emit the next chunk if a boundary exists and the debounce window has
    /// elapsed since the last emission.
    pub fn poll_chunk(&mut self) -> Option<String> {
        if self.state.is_terminal() {
            return None;
        }
        if self.last_flush.elapsed() < self.policy.debounce {
            return None;
        }
        let tail = &self.text[self.emitted..];
        let rel = tail.rfind(&self.policy.boundary)?;
        let end = self.emitted + rel + self.policy.boundary.len();
        let chunk = self.text[self.emitted..end].to_string();
        self.emitted = end;
        self.last_flush = Instant::now();
        self.state = ReassemblerState::Emitting;
        Some(chunk)
    }

    /// Terminator received: flush whatever remains, ignoring the debounce.
    pub fn finish(&mut self) -> Option<String> {
        if self.state.is_terminal() {
            return None;
        }
        if !self.raw.is_empty() {
            // The stream ended mid-sequence; salvage rather than drop.
            tracing::warn!(
                buffered = self.raw.len(),
                "stream terminated with undecodable trailing bytes"
            );
            let tail = String::from_utf8_lossy(&self.raw).into_owned();
            self.text.push_str(&tail);
            self.raw.clear();
        }
        self.state = ReassemblerState::Done;
        if self.emitted < self.text.len() {
            let chunk = self.text[self.emitted..].to_string();
            self.emitted = self.text.len();
            Some(chunk)
        } else {
            None
        }
    }

    /// Abort on a hard transport error.
    pub fn fail(&mut self, reason: StreamFailure) {
        self.state = ReassemblerState::Failed(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    fn reassembler() -> StreamReassembler {
        StreamReassembler::new(FlushPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_with_elapsed_debounce_emits_two_chunks() {
        let mut r = reassembler();
        r.push_text("a\n\n");
        time::advance(Duration::from_millis(1100)).await;

        assert_eq!(r.poll_chunk(), Some("a\n\n".to_string()));
        assert_eq!(*r.state(), ReassemblerState::Emitting);

        r.push_text("b");
        assert_eq!(r.finish(), Some("b".to_string()));
        assert_eq!(*r.state(), ReassemblerState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn no_elapsed_time_coalesces_into_one_flush() {
        let mut r = reassembler();
        r.push_text("a\n\n");
        // Debounce has not elapsed: the boundary is not honored.
        assert_eq!(r.poll_chunk(), None);

        r.push_text("b");
        assert_eq!(r.finish(), Some("a\n\nb".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_up_to_rightmost_boundary() {
        let mut r = reassembler();
        r.push_text("one\n\ntwo\n\nthree");
        time::advance(Duration::from_millis(1100)).await;

        assert_eq!(r.poll_chunk(), Some("one\n\ntwo\n\n".to_string()));
        assert_eq!(r.finish(), Some("three".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_applies_between_emissions() {
        let mut r = reassembler();
        r.push_text("one\n\n");
        time::advance(Duration::from_millis(1100)).await;
        assert!(r.poll_chunk().is_some());

        r.push_text("two\n\n");
        assert_eq!(r.poll_chunk(), None);

        time::advance(Duration::from_millis(1100)).await;
        assert_eq!(r.poll_chunk(), Some("two\n\n".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn split_multibyte_sequence_is_buffered_not_dropped() {
        let mut r = reassembler();
        let bytes = "你好".as_bytes(); // 6 bytes, 3 per char
        r.push_bytes(&bytes[..4]).unwrap();
        assert_eq!(r.completion(), "你");

        r.push_bytes(&bytes[4..]).unwrap();
        assert_eq!(r.completion(), "你好");
        assert_eq!(r.finish(), Some("你好".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_utf8_is_a_protocol_error() {
        let mut r = reassembler();
        let err = r.push_bytes(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, StreamFailure::ProtocolError(_)));
        assert!(r.state().is_terminal());
        assert_eq!(r.finish(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream_finishes_with_no_chunk() {
        let mut r = reassembler();
        assert_eq!(r.finish(), None);
        assert_eq!(*r.state(), ReassemblerState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_state_records_reason() {
        let mut r = reassembler();
        r.push_text("partial");
        r.fail(StreamFailure::RateLimited);
        assert_eq!(
            *r.state(),
            ReassemblerState::Failed(StreamFailure::RateLimited)
        );
        // A failed stream stops emitting.
        assert_eq!(r.poll_chunk(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_boundary_is_respected() {
        let policy = FlushPolicy::new("\r\n\r\n", Duration::from_millis(10));
        let mut r = StreamReassembler::new(policy);
        r.push_text("head\r\n\r\nbody");
        time::advance(Duration::from_millis(20)).await;

        assert_eq!(r.poll_chunk(), Some("head\r\n\r\n".to_string()));
        assert_eq!(r.finish(), Some("body".to_string()));
    }
}
