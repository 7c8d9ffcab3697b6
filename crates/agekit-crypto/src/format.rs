//! Header wire format: intro line, recipient stanzas, MAC line
//!
//! ```text
//! age-encryption.org/v1
//! -> <type> <arg1> <arg2> ...
//! <base64(body), 64 columns per line, unpadded>
//! --- <base64(mac)>
//! ```
//!
//! A stanza body ends at its first line shorter than 64 columns. A body whose
//! length is a multiple of 48 bytes (including zero) ends with an empty line.
//! Parsing is strict, so re-encoding a parsed header reproduces its bytes.

use std::io::{BufRead, Read, Write};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

use crate::error::FormatError;
use crate::keys::MAC_SIZE;

pub const INTRO: &str = "age-encryption.org/v1";
const STANZA_PREFIX: &str = "->";
const FOOTER_PREFIX: &str = "---";

/// Base64 columns per stanza body line
pub const COLUMNS_PER_LINE: usize = 64;

/// Raw bytes per full stanza body line
pub const BYTES_PER_LINE: usize = COLUMNS_PER_LINE / 4 * 3;

/// Longest header line accepted by the parser, excluding the newline
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// One recipient's wrapped copy of the file key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    pub tag: String,
    pub args: Vec<String>,
    pub body: Vec<u8>,
}

impl Stanza {
    pub fn new(tag: impl Into<String>, args: Vec<String>, body: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            args,
            body,
        }
    }

    /// Check the type and arguments are non-empty printable ASCII without spaces.
    pub fn validate(&self) -> Result<(), FormatError> {
        std::iter::once(&self.tag)
            .chain(&self.args)
            .find(|s| !is_valid_string(s))
            .map_or(Ok(()), |s| Err(FormatError::InvalidStanzaString(s.clone())))
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(STANZA_PREFIX.as_bytes());
        for arg in std::iter::once(&self.tag).chain(&self.args) {
            out.push(b' ');
            out.extend_from_slice(arg.as_bytes());
        }
        out.push(b'\n');

        // The final line is always short, so exact multiples get an empty one.
        let mut lines = self.body.chunks_exact(BYTES_PER_LINE);
        for line in lines.by_ref() {
            out.extend_from_slice(STANDARD_NO_PAD.encode(line).as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(STANDARD_NO_PAD.encode(lines.remainder()).as_bytes());
        out.push(b'\n');
    }

    /// The stanza's exact header bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// A parsed or freshly built header. Immutable once the MAC is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    stanzas: Vec<Stanza>,
    mac: [u8; MAC_SIZE],
}

impl Header {
    pub fn from_parts(stanzas: Vec<Stanza>, mac: [u8; MAC_SIZE]) -> Self {
        Self { stanzas, mac }
    }

    pub fn into_parts(self) -> (Vec<Stanza>, [u8; MAC_SIZE]) {
        (self.stanzas, self.mac)
    }

    pub fn stanzas(&self) -> &[Stanza] {
        &self.stanzas
    }

    pub fn mac(&self) -> &[u8; MAC_SIZE] {
        &self.mac
    }

    /// The bytes covered by the header MAC: everything before the space that
    /// precedes the MAC itself.
    pub fn encode_without_mac(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 * (self.stanzas.len() + 1));
        out.extend_from_slice(INTRO.as_bytes());
        out.push(b'\n');
        for stanza in &self.stanzas {
            stanza.encode_into(&mut out);
        }
        out.extend_from_slice(FOOTER_PREFIX.as_bytes());
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.encode_without_mac();
        out.push(b' ');
        out.extend_from_slice(STANDARD_NO_PAD.encode(self.mac).as_bytes());
        out.push(b'\n');
        out
    }

    pub fn write_to<W: Write>(&self, output: &mut W) -> std::io::Result<()> {
        output.write_all(&self.encode())
    }

    /// Parse a header, consuming `input` up to and including the MAC line's
    /// newline. The payload is left unread in `input`.
    pub fn read_from<R: BufRead>(input: &mut R) -> Result<Self, FormatError> {
        let mut lines = LineReader::new(input);

        match lines.next_line()? {
            Some((_, line)) if line == INTRO.as_bytes() => {}
            _ => return Err(FormatError::UnexpectedIntro),
        }

        let mut stanzas = Vec::new();
        loop {
            let (lineno, line) = lines.next_line()?.ok_or(FormatError::UnexpectedEof)?;

            if line.starts_with(FOOTER_PREFIX.as_bytes()) {
                let mac = parse_closing_line(line)
                    .ok_or(FormatError::MalformedClosingLine { line: lineno })?;
                tracing::debug!(stanzas = stanzas.len(), "parsed age header");
                return Ok(Self { stanzas, mac });
            }

            let (tag, args) = parse_opening_line(line, lineno)?;
            let body = read_body(&mut lines)?;
            stanzas.push(Stanza { tag, args, body });
        }
    }
}

/// Decode an unpadded base64 header field.
pub fn decode_string(s: &str) -> Result<Vec<u8>, FormatError> {
    if s.contains(['\n', '\r']) {
        return Err(FormatError::UnexpectedNewline);
    }
    STANDARD_NO_PAD
        .decode(s)
        .map_err(|_| FormatError::InvalidBase64 { line: 0 })
}

/// Encode a header field as unpadded base64.
pub fn encode_string(data: &[u8]) -> String {
    STANDARD_NO_PAD.encode(data)
}

fn is_valid_string(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| (33..=126).contains(&b))
}

fn parse_opening_line(line: &[u8], lineno: usize) -> Result<(String, Vec<String>), FormatError> {
    if !line.starts_with(STANZA_PREFIX.as_bytes()) {
        return Err(FormatError::MalformedOpeningLine { line: lineno });
    }
    let malformed = FormatError::MalformedStanza { line: lineno };
    let line = std::str::from_utf8(line).map_err(|_| malformed)?;

    let mut parts = line.split(' ');
    if parts.next() != Some(STANZA_PREFIX) {
        return Err(FormatError::MalformedStanza { line: lineno });
    }
    let args: Vec<String> = parts.map(str::to_owned).collect();
    if args.is_empty() || !args.iter().all(|a| is_valid_string(a)) {
        return Err(FormatError::MalformedStanza { line: lineno });
    }

    let mut args = args.into_iter();
    let tag = args.next().unwrap_or_default();
    Ok((tag, args.collect()))
}

fn read_body<R: BufRead>(lines: &mut LineReader<'_, R>) -> Result<Vec<u8>, FormatError> {
    let mut body = Vec::new();
    loop {
        let (lineno, line) = lines.next_line()?.ok_or(FormatError::UnexpectedEof)?;

        if line.len() > COLUMNS_PER_LINE {
            return Err(FormatError::MalformedBodyLineSize { line: lineno });
        }
        let text = std::str::from_utf8(line).map_err(|_| FormatError::InvalidBase64 { line: lineno })?;
        let decoded = decode_string(text).map_err(|e| match e {
            FormatError::InvalidBase64 { .. } => FormatError::InvalidBase64 { line: lineno },
            other => other,
        })?;

        body.extend_from_slice(&decoded);
        if decoded.len() < BYTES_PER_LINE {
            return Ok(body);
        }
    }
}

fn parse_closing_line(line: &[u8]) -> Option<[u8; MAC_SIZE]> {
    let line = std::str::from_utf8(line).ok()?;
    let mut parts = line.split(' ');
    if parts.next() != Some(FOOTER_PREFIX) {
        return None;
    }
    let encoded = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    decode_string(encoded).ok()?.try_into().ok()
}

/// Reads `\n`-terminated lines, tracking 1-based line numbers.
struct LineReader<'a, R> {
    input: &'a mut R,
    buf: Vec<u8>,
    line: usize,
}

impl<'a, R: BufRead> LineReader<'a, R> {
    fn new(input: &'a mut R) -> Self {
        Self {
            input,
            buf: Vec::with_capacity(COLUMNS_PER_LINE + 1),
            line: 0,
        }
    }

    /// The next line number and line without its newline, or `None` at a
    /// clean EOF. A final line missing its newline is an error, and so is a
    /// line over [`MAX_LINE_LEN`] bytes.
    fn next_line(&mut self) -> Result<Option<(usize, &[u8])>, FormatError> {
        self.buf.clear();
        let limit = (MAX_LINE_LEN + 1) as u64;
        let n = (&mut *self.input).take(limit).read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() != Some(&b'\n') {
            if n as u64 == limit {
                return Err(FormatError::LineTooLong {
                    line: self.line + 1,
                    max: MAX_LINE_LEN,
                });
            }
            return Err(FormatError::UnexpectedEof);
        }
        self.line += 1;
        self.buf.pop();
        Ok(Some((self.line, &self.buf)))
    }
}
