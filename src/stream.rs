//! Byte sinks for the stdout channel.
//!
//! Generated text is streamed to the consumer as it is produced, framed by
//! literal marker lines so the raw token bytes never need escaping. The same
//! bytes are simultaneously captured in memory for the stderr summary, so the
//! live stream and the captured text can never diverge.
//!
//! Sinks are plain `io::Write` adapters and compose: the chat handler stacks
//! a `TeeSink` over a `FramingSink` (real stdout) and a `CaptureSink`.

use std::io::{self, Write};

/// Literal line emitted before the first generated byte.
pub const STREAM_START_MARKER: &str = "[LLM_STREAM_START]";
/// Literal line emitted after generation finishes.
pub const STREAM_END_MARKER: &str = "[LLM_STREAM_END]";

// ============================================================================
// FramingSink
// ============================================================================

/// Write-through sink that frames a streamed payload with marker lines.
///
/// Idle until the first non-empty write, which emits the start marker and
/// switches to streaming. Every write is flushed immediately so the consumer
/// sees tokens as they arrive. [`FramingSink::end_stream`] emits the end
/// marker and returns to idle; if nothing was ever written, no markers are
/// emitted at all.
pub struct FramingSink<W: Write> {
    out: W,
    streaming: bool,
}

impl<W: Write> FramingSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streaming: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Close the frame if one is open. Idempotent.
    pub fn end_stream(&mut self) -> io::Result<()> {
        if self.streaming {
            writeln!(self.out, "{STREAM_END_MARKER}")?;
            self.out.flush()?;
            self.streaming = false;
        }
        Ok(())
    }
}

impl<W: Write> Write for FramingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.streaming {
            writeln!(self.out, "{STREAM_START_MARKER}")?;
            self.out.flush()?;
            self.streaming = true;
        }
        self.out.write_all(buf)?;
        self.out.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

// ============================================================================
// CaptureSink
// ============================================================================

/// Accumulates every byte in memory, no framing.
#[derive(Debug, Default)]
pub struct CaptureSink {
    buf: Vec<u8>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Captured bytes as text. Generated output is expected to be UTF-8;
    /// anything else is replaced rather than dropped.
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// TeeSink
// ============================================================================

/// Fans every write out to two sinks so both see the identical byte stream.
pub struct TeeSink<A: Write, B: Write> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> TeeSink<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Write, B: Write> Write for TeeSink<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_emits_start_marker_once() {
        let mut out = Vec::new();
        let mut sink = FramingSink::new(&mut out);
        sink.write_all(b"he").expect("write");
        sink.write_all(b"llo").expect("write");
        sink.end_stream().expect("end");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "[LLM_STREAM_START]\nhello[LLM_STREAM_END]\n"
        );
    }

    #[test]
    fn no_markers_without_writes() {
        let mut out = Vec::new();
        let mut sink = FramingSink::new(&mut out);
        sink.end_stream().expect("end");
        assert!(out.is_empty());
    }

    #[test]
    fn empty_write_does_not_open_the_frame() {
        let mut out = Vec::new();
        let mut sink = FramingSink::new(&mut out);
        sink.write_all(b"").expect("write");
        assert!(!sink.is_streaming());
        sink.end_stream().expect("end");
        assert!(out.is_empty());
    }

    #[test]
    fn end_stream_is_idempotent() {
        let mut out = Vec::new();
        let mut sink = FramingSink::new(&mut out);
        sink.write_all(b"x").expect("write");
        sink.end_stream().expect("end");
        sink.end_stream().expect("end again");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches(STREAM_END_MARKER).count(), 1);
    }

    #[test]
    fn framing_restarts_after_end_stream() {
        let mut out = Vec::new();
        let mut sink = FramingSink::new(&mut out);
        sink.write_all(b"a").expect("write");
        sink.end_stream().expect("end");
        sink.write_all(b"b").expect("write");
        sink.end_stream().expect("end");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches(STREAM_START_MARKER).count(), 2);
        assert_eq!(text.matches(STREAM_END_MARKER).count(), 2);
    }

    #[test]
    fn tee_duplicates_every_byte() {
        let mut live = Vec::new();
        let mut capture = CaptureSink::new();
        {
            let mut tee = TeeSink::new(&mut live, &mut capture);
            tee.write_all(b"hel").expect("write");
            tee.write_all(b"lo").expect("write");
            tee.flush().expect("flush");
        }
        assert_eq!(live, b"hello");
        assert_eq!(capture.as_bytes(), b"hello");
    }

    #[test]
    fn tee_over_framing_keeps_capture_unframed() {
        let mut out = Vec::new();
        let mut framing = FramingSink::new(&mut out);
        let mut capture = CaptureSink::new();
        {
            let mut tee = TeeSink::new(&mut framing, &mut capture);
            tee.write_all(b"hi").expect("write");
        }
        framing.end_stream().expect("end");
        assert_eq!(capture.into_string(), "hi");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "[LLM_STREAM_START]\nhi[LLM_STREAM_END]\n"
        );
    }
}
