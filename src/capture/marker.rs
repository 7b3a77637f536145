//! Decoder for the engine's error stream.
//!
//! The engine mixes control markers with free-form diagnostics on stderr.
//! Reads may split a line anywhere, so diagnostics are buffered until a
//! line terminator (`\n` or `\r`) arrives. The ready marker is reported as
//! soon as it appears, terminated or not.

/// Written by the engine on stderr once audio capture has begun
pub const READY_MARKER: &str = "READY_TO_RECORD";

/// Longest unterminated text kept before it is flushed as a diagnostic
const MAX_PENDING: usize = 4096;

/// Tagged event decoded from one stderr line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StderrEvent {
    /// The ready marker
    Ready,
    /// Anything else the engine printed
    Diagnostic(String),
}

impl StderrEvent {
    pub fn classify(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            None
        } else if line.contains(READY_MARKER) {
            Some(StderrEvent::Ready)
        } else {
            Some(StderrEvent::Diagnostic(line.to_string()))
        }
    }
}

#[derive(Debug, Default)]
pub struct MarkerDecoder {
    pending: String,
}

impl MarkerDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk, returning events for every completed line and for
    /// a ready marker still waiting on its terminator
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StderrEvent> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.pending.find(|c: char| c == '\n' || c == '\r') {
            let line: String = self.pending.drain(..=pos).collect();
            events.extend(StderrEvent::classify(&line));
        }

        while let Some(pos) = self.pending.find(READY_MARKER) {
            self.pending.drain(..pos + READY_MARKER.len());
            events.push(StderrEvent::Ready);
        }

        if self.pending.len() > MAX_PENDING {
            // Keep a tail that could still grow into the marker
            let mut split = self.pending.len() - (READY_MARKER.len() - 1);
            while !self.pending.is_char_boundary(split) {
                split -= 1;
            }
            let overflow: String = self.pending.drain(..split).collect();
            events.extend(StderrEvent::classify(&overflow));
        }

        events
    }

    /// Flush a trailing line that never got its terminator (stream closed)
    pub fn finish(&mut self) -> Option<StderrEvent> {
        let rest = std::mem::take(&mut self.pending);
        StderrEvent::classify(&rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_marker_line() {
        let mut decoder = MarkerDecoder::new();
        let events = decoder.feed(b"READY_TO_RECORD\n");
        assert_eq!(events, vec![StderrEvent::Ready]);
    }

    #[test]
    fn test_marker_split_across_reads() {
        let mut decoder = MarkerDecoder::new();

        assert!(decoder.feed(b"READY_TO").is_empty());
        assert_eq!(decoder.feed(b"_RECORD\n"), vec![StderrEvent::Ready]);
    }

    #[test]
    fn test_diagnostics_and_marker_in_one_chunk() {
        let mut decoder = MarkerDecoder::new();
        let events = decoder.feed(b"Config: Threshold=0.01, Duration=3s\nREADY_TO_RECORD\n\n");

        assert_eq!(
            events,
            vec![
                StderrEvent::Diagnostic("Config: Threshold=0.01, Duration=3s".to_string()),
                StderrEvent::Ready,
            ]
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = MarkerDecoder::new();
        assert_eq!(decoder.feed(b"READY_TO_RECORD\r\n"), vec![StderrEvent::Ready]);
    }

    #[test]
    fn test_unterminated_marker() {
        let mut decoder = MarkerDecoder::new();
        assert_eq!(decoder.feed(b"READY_TO_RECORD"), vec![StderrEvent::Ready]);

        // The line ending that follows later does not repeat it
        assert!(decoder.feed(b"\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_unterminated_marker_split_across_reads() {
        let mut decoder = MarkerDecoder::new();
        assert!(decoder.feed(b"READY_").is_empty());
        assert_eq!(decoder.feed(b"TO_RECORD"), vec![StderrEvent::Ready]);
    }

    #[test]
    fn test_carriage_return_ends_line() {
        let mut decoder = MarkerDecoder::new();
        let events = decoder.feed(b"Loading 10%\rLoading 100%\r");

        assert_eq!(
            events,
            vec![
                StderrEvent::Diagnostic("Loading 10%".to_string()),
                StderrEvent::Diagnostic("Loading 100%".to_string()),
            ]
        );
    }

    #[test]
    fn test_pending_is_bounded() {
        let mut decoder = MarkerDecoder::new();
        let mut noise = vec![b'.'; MAX_PENDING * 2];
        noise.extend_from_slice(b"READY_TO");

        let events = decoder.feed(&noise);
        assert_eq!(events.len(), 1);
        assert!(decoder.pending.len() < READY_MARKER.len());

        // A marker cut by the flush is still completed by the next read
        assert_eq!(decoder.feed(b"_RECORD"), vec![StderrEvent::Ready]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = MarkerDecoder::new();
        assert!(decoder.feed(b"Processing...").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(StderrEvent::Diagnostic("Processing...".to_string()))
        );
        assert_eq!(decoder.finish(), None);
    }
}
