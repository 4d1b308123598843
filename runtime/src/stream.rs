// stream.rs — Monotonic input streams and views
//
// A `Stream` is an append-only byte sequence shared between a host (which
// feeds chunks and eventually freezes the stream) and a parser running in a
// fiber (which consumes through `View`s). The sequence only ever grows;
// between a yield and a resume the host may have appended bytes or frozen
// the stream, never removed or reordered anything.
//
// Suspension is implemented here: the `extract`/`match_literal` primitives
// yield the current fiber when the stream holds too few bytes and is not
// frozen, and retry after resume. Generated parse code never sees the
// yield.

use std::sync::{Arc, Mutex};

use crate::error::{Error, ParseError, UsageError};
use crate::fiber;

// ── Stream ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    frozen: bool,
}

/// Shared append-only byte stream. Cloning shares the underlying buffer.
///
/// Host and fiber never run concurrently (cooperative hand-off), so a plain
/// mutex is uncontended; it exists to make the sharing sound.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    inner: Arc<Mutex<Inner>>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let s = Self::new();
        s.append(data).unwrap();
        s
    }

    /// Append a chunk. Fails once the stream is frozen.
    pub fn append(&self, data: &[u8]) -> Result<(), UsageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.frozen {
            return Err(UsageError::FeedAfterFreeze);
        }
        inner.data.extend_from_slice(data);
        Ok(())
    }

    /// Mark the end of input. Idempotent.
    pub fn freeze(&self) {
        self.inner.lock().unwrap().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.lock().unwrap().frozen
    }

    /// Total number of bytes ever appended.
    pub fn len(&self) -> u64 {
        self.inner.lock().unwrap().data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View covering the whole stream from offset zero.
    pub fn view(&self) -> View {
        View {
            stream: self.clone(),
            offset: 0,
        }
    }
}

// ── View ─────────────────────────────────────────────────────────────────

/// Outcome of a non-suspending read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Requested bytes are available.
    Ready(Vec<u8>),
    /// Not enough bytes yet; the stream may still grow.
    NeedMore,
    /// Not enough bytes and the stream is frozen.
    Eod,
}

/// A suffix of a stream, starting at an absolute offset. Cheap to clone and
/// advance; all views of a stream observe the same growing data.
#[derive(Debug, Clone)]
pub struct View {
    stream: Stream,
    offset: u64,
}

impl View {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes currently available from this view's position.
    pub fn available(&self) -> u64 {
        self.stream.len().saturating_sub(self.offset)
    }

    pub fn is_frozen(&self) -> bool {
        self.stream.is_frozen()
    }

    /// A new view `n` bytes further into the stream.
    pub fn advance(&self, n: u64) -> View {
        View {
            stream: self.stream.clone(),
            offset: self.offset + n,
        }
    }

    /// Copy out the currently available bytes without consuming.
    pub fn peek_available(&self) -> Vec<u8> {
        let inner = self.stream.inner.lock().unwrap();
        inner.data[self.offset.min(inner.data.len() as u64) as usize..].to_vec()
    }

    /// Attempt to read exactly `n` bytes without suspending.
    pub fn try_read(&self, n: u64) -> ReadOutcome {
        let inner = self.stream.inner.lock().unwrap();
        let start = self.offset as usize;
        let end = start + n as usize;
        if end <= inner.data.len() {
            ReadOutcome::Ready(inner.data[start..end].to_vec())
        } else if inner.frozen {
            ReadOutcome::Eod
        } else {
            ReadOutcome::NeedMore
        }
    }

    /// Read exactly `n` bytes, yielding the current fiber until they arrive.
    /// Hitting a frozen stream short of `n` bytes is a parse error.
    pub fn extract(&self, n: u64) -> Result<Vec<u8>, Error> {
        loop {
            match self.try_read(n) {
                ReadOutcome::Ready(bytes) => return Ok(bytes),
                ReadOutcome::NeedMore => {
                    crate::rt_debug!(
                        "fibers",
                        "extract({n}) short at offset {}, yielding",
                        self.offset
                    );
                    fiber::yield_now()?;
                }
                ReadOutcome::Eod => {
                    return Err(ParseError::new(
                        format!("unexpected end of input, needed {n} bytes"),
                        Some(self.offset),
                    )
                    .into());
                }
            }
        }
    }

    /// Match an exact literal at the view's position, consuming nothing on
    /// failure. Suspends like `extract`.
    pub fn match_literal(&self, literal: &[u8]) -> Result<(), Error> {
        let got = self.extract(literal.len() as u64)?;
        if got == literal {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected literal {:?}", String::from_utf8_lossy(literal)),
                Some(self.offset),
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read() {
        let s = Stream::new();
        s.append(b"abcd").unwrap();
        let v = s.view();
        assert_eq!(v.try_read(2), ReadOutcome::Ready(b"ab".to_vec()));
        let v2 = v.advance(2);
        assert_eq!(v2.try_read(2), ReadOutcome::Ready(b"cd".to_vec()));
    }

    #[test]
    fn short_read_distinguishes_open_and_frozen() {
        let s = Stream::new();
        s.append(b"ab").unwrap();
        let v = s.view();
        assert_eq!(v.try_read(4), ReadOutcome::NeedMore);
        s.freeze();
        assert_eq!(v.try_read(4), ReadOutcome::Eod);
        // Still readable below the boundary.
        assert_eq!(v.try_read(2), ReadOutcome::Ready(b"ab".to_vec()));
    }

    #[test]
    fn append_after_freeze_rejected() {
        let s = Stream::new();
        s.freeze();
        assert_eq!(s.append(b"x"), Err(UsageError::FeedAfterFreeze));
    }

    #[test]
    fn views_observe_growth() {
        let s = Stream::new();
        let v = s.view();
        assert_eq!(v.available(), 0);
        s.append(b"xyz").unwrap();
        assert_eq!(v.available(), 3);
        assert_eq!(v.advance(1).peek_available(), b"yz".to_vec());
    }
}
