// parser.rs — Host-facing incremental parsing
//
// `ResumableParser` wraps a generated parse function in a fiber and a
// stream: the host feeds chunks, the parser runs until it either completes
// or suspends on insufficient input, and `finish` freezes the stream so a
// final resume can observe end-of-data.

use crate::error::{Error, UsageError};
use crate::fiber::{Resumable, Value};
use crate::stream::{Stream, View};

pub struct ResumableParser {
    stream: Stream,
    resumable: Resumable,
    started: bool,
    finished: bool,
}

impl ResumableParser {
    /// Wrap a parse entry point. The function receives a view over the
    /// stream this parser owns and may suspend through the stream
    /// primitives at any depth.
    pub fn new<F, T>(parse: F) -> Self
    where
        F: FnOnce(View) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let stream = Stream::new();
        let view = stream.view();
        Self {
            stream,
            resumable: Resumable::new(move || parse(view)),
            started: false,
            finished: false,
        }
    }

    /// Feed one chunk and run the parser until it suspends or completes.
    /// Returns whether the parse has completed.
    pub fn feed(&mut self, data: &[u8]) -> Result<bool, Error> {
        if self.resumable.completed() {
            return Ok(true);
        }
        self.stream.append(data).map_err(Error::from)?;
        self.pump()
    }

    /// Freeze the stream and run the parser to its verdict. Calling twice
    /// is a usage error.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.finished {
            return Err(UsageError::DoubleFinish.into());
        }
        self.finished = true;
        self.stream.freeze();
        if !self.resumable.completed() {
            self.pump()?;
        }
        Ok(())
    }

    /// Cancel the parse; unwinds the fiber.
    pub fn abort(&mut self) {
        self.resumable.abort();
    }

    pub fn completed(&self) -> bool {
        self.resumable.completed()
    }

    /// The parse result, once completed.
    pub fn get<T: 'static>(&mut self) -> Option<T> {
        self.resumable.get::<T>()
    }

    fn pump(&mut self) -> Result<bool, Error> {
        if !self.started {
            self.started = true;
            self.resumable.run()?;
        } else {
            self.resumable.resume()?;
        }
        Ok(self.resumable.completed())
    }
}

/// Convenience: run a parse function over a complete, frozen input.
pub fn parse_all<F, T>(parse: F, data: &[u8]) -> Result<T, Error>
where
    F: FnOnce(View) -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    let mut p = ResumableParser::new(parse);
    p.feed(data)?;
    p.finish()?;
    p.get::<T>()
        .ok_or_else(|| Error::Internal("parser completed without result".into()))
}

// Re-exported for generated code.
pub type ParseValue = Value;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::unpack::{unpack_uint, ByteOrder};

    // A hand-written stand-in for a generated parser: one 2-byte big-endian
    // length field, then that many payload bytes.
    fn length_prefixed(view: View) -> Result<Vec<u8>, Error> {
        let header = view.extract(2)?;
        let (len, _) = unpack_uint(&header, 2, ByteOrder::Big)?;
        let body = view.advance(2).extract(len)?;
        Ok(body)
    }

    #[test]
    fn whole_input_at_once() {
        let result = parse_all(length_prefixed, b"\x00\x03abc").unwrap();
        assert_eq!(result, b"abc".to_vec());
    }

    #[test]
    fn byte_at_a_time_matches_whole_input() {
        let input = b"\x00\x03abc";
        let mut p = ResumableParser::new(length_prefixed);
        for &b in input.iter() {
            p.feed(&[b]).unwrap();
        }
        assert!(p.completed());
        assert_eq!(p.get::<Vec<u8>>(), Some(b"abc".to_vec()));
    }

    #[test]
    fn truncated_input_is_a_parse_error() {
        let mut p = ResumableParser::new(length_prefixed);
        p.feed(b"\x00\x05ab").unwrap();
        let err = p.finish().unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError { .. })));
    }

    #[test]
    fn double_finish_is_a_usage_error() {
        let mut p = ResumableParser::new(length_prefixed);
        p.feed(b"\x00\x00").unwrap();
        p.finish().unwrap();
        assert!(matches!(
            p.finish(),
            Err(Error::Usage(UsageError::DoubleFinish))
        ));
    }

    #[test]
    fn abort_mid_parse() {
        let mut p = ResumableParser::new(length_prefixed);
        p.feed(b"\x00\x09a").unwrap();
        assert!(!p.completed());
        p.abort();
        assert!(p.completed());
        assert_eq!(p.get::<Vec<u8>>(), None);
    }
}
