//! Byte-level line scanning
//!
//! Splits a file's raw bytes into line ranges without allocating a string per
//! line, and offers a cheap shape check so that lines cut short by a writer
//! appending concurrently never reach the JSON decoder.

use std::ops::Range;

/// Iterator over the byte ranges of newline-separated lines.
///
/// Ranges exclude the `\n` terminator and a trailing `\r`. A final line
/// without terminator is yielded as well; empty lines are skipped.
pub struct LineScanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LineScanner<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Slice of the underlying buffer for a yielded range
    pub fn slice(&self, range: Range<usize>) -> &'a [u8] {
        &self.bytes[range]
    }
}

impl Iterator for LineScanner<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let end = match self.bytes[start..].iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    self.pos = start + offset + 1;
                    start + offset
                }
                None => {
                    self.pos = self.bytes.len();
                    self.bytes.len()
                }
            };

            let end = if end > start && self.bytes[end - 1] == b'\r' {
                end - 1
            } else {
                end
            };

            if end > start {
                return Some(start..end);
            }
        }

        None
    }
}

/// Trim ASCII whitespace from both ends without copying
pub fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// True when the trimmed line starts with `{` and ends with `}`
pub fn looks_like_object(line: &[u8]) -> bool {
    let trimmed = trim_ascii(line);
    trimmed.len() >= 2 && trimmed[0] == b'{' && trimmed[trimmed.len() - 1] == b'}'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[u8]) -> Vec<&[u8]> {
        let scanner = LineScanner::new(input);
        let ranges: Vec<_> = LineScanner::new(input).collect();
        ranges.into_iter().map(|r| scanner.slice(r)).collect()
    }

    #[test]
    fn test_splits_on_newlines() {
        assert_eq!(
            lines(b"{\"a\":1}\n{\"b\":2}\n"),
            vec![&b"{\"a\":1}"[..], &b"{\"b\":2}"[..]]
        );
    }

    #[test]
    fn test_final_line_without_newline() {
        assert_eq!(lines(b"one\ntwo"), vec![&b"one"[..], &b"two"[..]]);
    }

    #[test]
    fn test_skips_empty_lines_and_strips_cr() {
        assert_eq!(lines(b"\n\r\nfirst\r\n\n\nsecond"), vec![&b"first"[..], &b"second"[..]]);
    }

    #[test]
    fn test_empty_input() {
        assert!(lines(b"").is_empty());
        assert!(lines(b"\n\n").is_empty());
    }

    #[test]
    fn test_looks_like_object() {
        assert!(looks_like_object(b"{\"a\":1}"));
        assert!(looks_like_object(b"   {}  "));
        assert!(!looks_like_object(b"{\"a\":1"));
        assert!(!looks_like_object(b"null"));
        assert!(!looks_like_object(b"{"));
        assert!(!looks_like_object(b""));
        assert!(!looks_like_object(b"[{}]"));
    }

    #[test]
    fn test_trim_ascii() {
        assert_eq!(trim_ascii(b"  x y \t"), b"x y");
        assert_eq!(trim_ascii(b"   "), b"");
    }
}
