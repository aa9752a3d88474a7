//! Incremental line splitting and terminal-output cleanup

use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)")
        .expect("valid ansi regex")
});

/// Remove ANSI color/cursor escape sequences.
pub fn strip_ansi(input: &str) -> String {
    ANSI_RE.replace_all(input, "").into_owned()
}

/// Normalize a raw output line for matching: no escapes, no carriage
/// returns, no trailing whitespace.
pub fn clean_line(raw: &str) -> String {
    let stripped = strip_ansi(raw);
    let mut clean = stripped.replace('\r', "");
    let keep = clean.trim_end().len();
    clean.truncate(keep);
    clean
}

/// Longest fragment held without a newline before it is emitted as a line
pub const MAX_FRAGMENT_BYTES: usize = 64 * 1024;

/// Splits a byte stream into lines as chunks arrive.
///
/// A trailing fragment without a newline is held until the next chunk or
/// until [`LineSplitter::finish`] is called. Output that never ends a line
/// (`\r`-only progress bars) is flushed once the fragment reaches
/// [`MAX_FRAGMENT_BYTES`].
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();

        if let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') {
            let rest = self.buf.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.buf, rest);
            lines.extend(
                complete[..complete.len() - 1]
                    .split(|b| *b == b'\n')
                    .map(|line| String::from_utf8_lossy(line).into_owned()),
            );
        }

        if self.buf.len() >= MAX_FRAGMENT_BYTES {
            let held = std::mem::take(&mut self.buf);
            lines.push(String::from_utf8_lossy(&held).into_owned());
        }
        lines
    }

    /// Flush the held fragment at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_lines_carry_over() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"hel").is_empty());
        assert_eq!(splitter.push(b"lo\nwor"), vec!["hello"]);
        assert_eq!(splitter.push(b"ld\n\nnext"), vec!["world", ""]);
        assert_eq!(splitter.finish(), Some("next".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        let text = "✓ ok\n".as_bytes();
        assert!(splitter.push(&text[..1]).is_empty());
        assert_eq!(splitter.push(&text[1..]), vec!["✓ ok"]);
    }

    #[test]
    fn test_unterminated_output_is_flushed_at_cap() {
        let mut splitter = LineSplitter::new();
        let progress = "\r50%".repeat(MAX_FRAGMENT_BYTES / 4);

        assert!(splitter.push(&progress.as_bytes()[..100]).is_empty());
        let lines = splitter.push(&progress.as_bytes()[100..]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_FRAGMENT_BYTES);
        assert_eq!(splitter.finish(), None);

        assert_eq!(splitter.push(b"done\n"), vec!["done"]);
    }

    #[test]
    fn test_clean_line() {
        assert_eq!(clean_line("\u{1b}[32m✓\u{1b}[39m passed  \r"), "✓ passed");
        assert_eq!(clean_line("\u{1b}[2K\u{1b}[1A[1/2] run"), "[1/2] run");
        assert_eq!(clean_line("   \r"), "");
    }
}
