//! ASCII armor: the binary file as padded base64 between marker lines
//!
//! ```text
//! -----BEGIN AGE ENCRYPTED FILE-----
//! <base64, 64 columns per line, last line may be short and padded>
//! -----END AGE ENCRYPTED FILE-----
//! ```

use std::io::{self, BufRead, Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ArmorError;
use crate::format::{BYTES_PER_LINE, COLUMNS_PER_LINE};

const BEGIN_MARKER: &str = "-----BEGIN AGE ENCRYPTED FILE-----";
const END_MARKER: &str = "-----END AGE ENCRYPTED FILE-----";

/// Whether `input` starts with the armor begin marker. Consumes nothing.
pub fn is_armored<R: BufRead>(input: &mut R) -> io::Result<bool> {
    let buf = input.fill_buf()?;
    let n = buf.len().min(BEGIN_MARKER.len());
    Ok(n > 0 && buf[..n] == BEGIN_MARKER.as_bytes()[..n])
}

/// Armors everything written to it. [`ArmoredWriter::finish`] writes the
/// final line and the end marker.
pub struct ArmoredWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> ArmoredWriter<W> {
    /// Write the begin marker and start armoring.
    pub fn wrap_output(mut inner: W) -> io::Result<Self> {
        inner.write_all(BEGIN_MARKER.as_bytes())?;
        inner.write_all(b"\n")?;
        Ok(Self {
            inner,
            pending: Vec::with_capacity(BYTES_PER_LINE * 2),
        })
    }

    fn write_line(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut line = STANDARD.encode(bytes);
        line.push('\n');
        self.inner.write_all(line.as_bytes())
    }

    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.write_line(&rest)?;
        }
        self.inner.write_all(END_MARKER.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ArmoredWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(data);
        while self.pending.len() >= BYTES_PER_LINE {
            let line: Vec<u8> = self.pending.drain(..BYTES_PER_LINE).collect();
            self.write_line(&line)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Start,
    Body { saw_short_line: bool },
    Done,
}

/// Strips armor from `inner`.
///
/// Every data line but the last must be exactly 64 columns, and only
/// whitespace may follow the end marker. `\r\n` line endings are accepted.
pub struct ArmoredReader<R: BufRead> {
    inner: R,
    state: ReadState,
    decoded: Vec<u8>,
    pos: usize,
}

impl<R: BufRead> ArmoredReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: ReadState::Start,
            decoded: Vec::new(),
            pos: 0,
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = self
            .inner
            .read_line(&mut line)
            .map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData => ArmorError::InvalidLine.into(),
                _ => e,
            })?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
        Ok(Some(trimmed.to_owned()))
    }

    /// Decode the next data line, or consume the end marker.
    fn fill(&mut self) -> io::Result<()> {
        loop {
            match self.state {
                ReadState::Start => {
                    let line = self.read_line()?.ok_or(ArmorError::InvalidBeginMarker)?;
                    if line != BEGIN_MARKER {
                        return Err(ArmorError::InvalidBeginMarker.into());
                    }
                    self.state = ReadState::Body {
                        saw_short_line: false,
                    };
                }
                ReadState::Body { saw_short_line } => {
                    let line = self.read_line()?.ok_or(ArmorError::MissingEndMarker)?;
                    if line == END_MARKER {
                        self.check_trailing()?;
                        self.state = ReadState::Done;
                        return Ok(());
                    }
                    if saw_short_line || line.is_empty() || line.len() > COLUMNS_PER_LINE {
                        return Err(ArmorError::InvalidLine.into());
                    }
                    self.decoded = STANDARD
                        .decode(&line)
                        .map_err(|_| ArmorError::InvalidLine)?;
                    self.pos = 0;
                    self.state = ReadState::Body {
                        saw_short_line: line.len() < COLUMNS_PER_LINE || line.ends_with('='),
                    };
                    return Ok(());
                }
                ReadState::Done => return Ok(()),
            }
        }
    }

    fn check_trailing(&mut self) -> io::Result<()> {
        let mut rest = Vec::new();
        self.inner.read_to_end(&mut rest)?;
        if rest.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(ArmorError::TrailingData.into())
        }
    }
}

impl<R: BufRead> Read for ArmoredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.decoded.len() {
            if self.state == ReadState::Done {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = buf.len().min(self.decoded.len() - self.pos);
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armor(data: &[u8]) -> String {
        let mut writer = ArmoredWriter::wrap_output(Vec::new()).unwrap();
        writer.write_all(data).unwrap();
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    fn dearmor(text: &str) -> Result<Vec<u8>, ArmorError> {
        let mut out = Vec::new();
        ArmoredReader::new(text.as_bytes())
            .read_to_end(&mut out)
            .map_err(|e| {
                *e.into_inner()
                    .expect("armor error")
                    .downcast::<ArmorError>()
                    .expect("armor error")
            })?;
        Ok(out)
    }

    #[test]
    fn test_exact_output() {
        let text = armor(b"hello");
        assert_eq!(
            text,
            "-----BEGIN AGE ENCRYPTED FILE-----\naGVsbG8=\n-----END AGE ENCRYPTED FILE-----\n"
        );
    }

    #[test]
    fn test_line_width() {
        let text = armor(&[0xA5; 100]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1].len(), COLUMNS_PER_LINE);
        assert_eq!(lines[2].len(), COLUMNS_PER_LINE);
        assert_eq!(lines[3], "paWlpQ==");
    }

    #[test]
    fn test_roundtrip() {
        for len in [0, 1, 47, 48, 49, 96, 1000] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            assert_eq!(dearmor(&armor(&data)).unwrap(), data, "length {len}");
        }
    }

    #[test]
    fn test_crlf_and_trailing_whitespace() {
        let text = armor(&[7u8; 60]).replace('\n', "\r\n") + "\n\t  \n";
        assert_eq!(dearmor(&text).unwrap(), vec![7u8; 60]);
    }

    #[test]
    fn test_is_armored() {
        let text = armor(b"x");
        assert!(is_armored(&mut text.as_bytes()).unwrap());
        assert!(!is_armored(&mut &b"age-encryption.org/v1\n"[..]).unwrap());
        assert!(!is_armored(&mut &b""[..]).unwrap());
    }

    #[test]
    fn test_missing_markers() {
        assert_eq!(dearmor("aGVsbG8=\n").unwrap_err(), ArmorError::InvalidBeginMarker);
        assert_eq!(dearmor("").unwrap_err(), ArmorError::InvalidBeginMarker);

        let text = armor(b"hello");
        let truncated = text.replace("-----END AGE ENCRYPTED FILE-----\n", "");
        assert_eq!(dearmor(&truncated).unwrap_err(), ArmorError::MissingEndMarker);
    }

    #[test]
    fn test_trailing_garbage() {
        let text = armor(b"hello") + "more";
        assert_eq!(dearmor(&text).unwrap_err(), ArmorError::TrailingData);
    }

    #[test]
    fn test_short_line_must_be_last() {
        let text = format!(
            "{BEGIN_MARKER}\naGVsbG8=\naGVsbG8=\n{END_MARKER}\n"
        );
        assert_eq!(dearmor(&text).unwrap_err(), ArmorError::InvalidLine);
    }

    #[test]
    fn test_overlong_and_invalid_lines() {
        let long = "A".repeat(COLUMNS_PER_LINE + 4);
        let text = format!("{BEGIN_MARKER}\n{long}\n{END_MARKER}\n");
        assert_eq!(dearmor(&text).unwrap_err(), ArmorError::InvalidLine);

        let text = format!("{BEGIN_MARKER}\naGVsbG8\n{END_MARKER}\n");
        assert_eq!(dearmor(&text).unwrap_err(), ArmorError::InvalidLine);

        let text = format!("{BEGIN_MARKER}\n\n{END_MARKER}\n");
        assert_eq!(dearmor(&text).unwrap_err(), ArmorError::InvalidLine);
    }
}
