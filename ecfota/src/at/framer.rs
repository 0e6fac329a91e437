//! Line framing for the AT byte stream.

/// Splits an incoming byte stream into lines.
///
/// Bytes arrive in arbitrary chunks; anything after the last `\n` is held
/// until a later [`LineFramer::push`] completes it.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and iterate over every line they complete.
    ///
    /// Lines are yielded without the `\n` and without trailing `\r`s.
    /// Lines left unread when the iterator is dropped stay buffered and are
    /// returned by the next call.
    pub fn push(&mut self, data: &[u8]) -> Lines<'_> {
        self.buffer
            .extend_from_slice(data);
        Lines { framer: self }
    }

    /// Bytes of the incomplete trailing line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Discard any buffered partial line.
    pub fn clear(&mut self) {
        self.buffer
            .clear();
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self
            .buffer
            .iter()
            .position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self
            .buffer
            .drain(..=end)
            .collect();
        let text = String::from_utf8_lossy(&raw[..end]);
        Some(
            text.trim_end_matches('\r')
                .to_string(),
        )
    }
}

/// Iterator over the complete lines currently buffered in a [`LineFramer`].
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer
            .next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] =
        b"AT+CSQ\r\r\n+CSQ: 20,99\r\n\r\nOK\r\n+QIND: \"FOTA\",\"UPDATING\",7\r\nRDY\r\npart";

    fn collect_whole(data: &[u8]) -> Vec<String> {
        let mut framer = LineFramer::new();
        framer
            .push(data)
            .collect()
    }

    fn collect_chunked(data: &[u8], chunk: usize) -> Vec<String> {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for piece in data.chunks(chunk) {
            lines.extend(framer.push(piece));
        }
        lines
    }

    #[test]
    fn test_splits_on_newline_and_strips_cr() {
        let lines = collect_whole(b"AT\r\r\nOK\r\n");
        assert_eq!(lines, vec!["AT", "OK"]);
    }

    #[test]
    fn test_empty_lines_are_preserved() {
        let lines = collect_whole(b"\r\nOK\r\n");
        assert_eq!(lines, vec!["", "OK"]);
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"+CREG: 0,").count(), 0);
        assert_eq!(framer.pending(), b"+CREG: 0,");

        let lines: Vec<String> = framer
            .push(b"1\r\n")
            .collect();
        assert_eq!(lines, vec!["+CREG: 0,1"]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let whole = collect_whole(STREAM);
        for chunk in 1..=STREAM.len() {
            assert_eq!(collect_chunked(STREAM, chunk), whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_multibyte_utf8_split_across_reads() {
        let text = "版本\r\n".as_bytes();
        let lines = collect_chunked(text, 1);
        assert_eq!(lines, vec!["版本"]);
    }

    #[test]
    fn test_unread_lines_survive_dropped_iterator() {
        let mut framer = LineFramer::new();
        let first = framer
            .push(b"A\r\nB\r\n")
            .next();
        assert_eq!(first.as_deref(), Some("A"));

        let rest: Vec<String> = framer
            .push(b"")
            .collect();
        assert_eq!(rest, vec!["B"]);
    }

    #[test]
    fn test_clear_discards_partial() {
        let mut framer = LineFramer::new();
        let _ = framer.push(b"garbage");
        framer.clear();
        let lines: Vec<String> = framer
            .push(b"OK\r\n")
            .collect();
        assert_eq!(lines, vec!["OK"]);
    }
}
