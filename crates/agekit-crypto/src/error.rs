//! Error types for header parsing, key wrapping, and the payload stream

use std::io;

use thiserror::Error;

/// Header encoding errors. Always fatal to the parse.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected intro line (not an age v1 file)")]
    UnexpectedIntro,

    #[error("line {line}: stanza must start with \"->\"")]
    MalformedOpeningLine { line: usize },

    #[error("line {line}: malformed stanza arguments")]
    MalformedStanza { line: usize },

    #[error("line {line}: stanza body line longer than 64 columns")]
    MalformedBodyLineSize { line: usize },

    #[error("line {line}: malformed closing line")]
    MalformedClosingLine { line: usize },

    #[error("line {line}: invalid base64")]
    InvalidBase64 { line: usize },

    #[error("unexpected newline in base64 field")]
    UnexpectedNewline,

    #[error("header ended before the closing line")]
    UnexpectedEof,

    #[error("line {line}: header line longer than {max} bytes")]
    LineTooLong { line: usize, max: usize },

    #[error("stanza has an invalid type or argument: {0:?}")]
    InvalidStanzaString(String),

    #[error("I/O error reading header: {0}")]
    Io(#[from] io::Error),
}

/// One-shot AEAD failures on wrapped file keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AeadError {
    #[error("ciphertext has the wrong size for the expected plaintext")]
    IncorrectCiphertextSize,

    #[error("authentication tag mismatch")]
    AuthenticationFailure,

    #[error("AEAD seal failed")]
    SealFailure,
}

/// A key derivation function rejected its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("key derivation failed: invalid parameters")]
pub struct KdfError;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("no recipients given")]
    NoRecipients,

    #[error("a passphrase recipient must be the only recipient of a file")]
    ScryptRecipientMustBeOnlyOne,

    #[error("passphrase must not be empty")]
    EmptyPassphrase,

    #[error("scrypt work factor {0} out of range")]
    InvalidWorkFactor(u8),

    #[error("recipient public key is a low-order point")]
    LowOrderRecipient,

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("no identities given")]
    NoIdentities,

    #[error("no identity matched any of the recipients")]
    IncorrectIdentity,

    #[error("header MAC mismatch")]
    BadHeaderMac,

    #[error("malformed scrypt stanza")]
    InvalidScryptStanza,

    #[error("invalid scrypt work factor")]
    InvalidScryptWorkFactor,

    #[error("scrypt work factor {found} exceeds the configured maximum {max}")]
    WorkFactorTooLarge { found: u32, max: u8 },

    #[error("an scrypt stanza must be the only stanza in the header")]
    ScryptStanzaMustBeOnlyOne,

    #[error("passphrase must not be empty")]
    EmptyPassphrase,

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Payload stream failures.
///
/// The stream types implement `std::io::Read`/`Write`, so these travel inside
/// `io::Error`; [`StreamError::from_io`] recovers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream truncated: missing final chunk")]
    UnexpectedEof,

    #[error("final chunk is empty")]
    LastChunkEmpty,

    #[error("trailing data after the final chunk")]
    TrailingData,

    #[error("chunk failed authentication")]
    DecryptFailure,

    #[error("chunk encryption failed")]
    EncryptFailure,

    #[error("payload writer failed on an earlier write")]
    WriterFailed,
}

impl StreamError {
    /// Extract a `StreamError` carried by an `io::Error`, if any.
    pub fn from_io(err: &io::Error) -> Option<Self> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<StreamError>())
            .copied()
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match err {
            StreamError::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            StreamError::EncryptFailure | StreamError::WriterFailed => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key encoding: {0}")]
    Encoding(#[from] agekit_bech32::Error),

    #[error("unexpected key prefix {found:?} (expected {expected:?})")]
    WrongPrefix { expected: &'static str, found: String },

    #[error("key has {0} bytes (expected 32)")]
    InvalidLength(usize),
}

#[derive(Debug, Error)]
pub enum IdentityFileError {
    #[error("failed to parse secret key at line {0}")]
    ParseErrorAtLine(usize),

    #[error("no secret keys found")]
    NoSecretKeysFound,

    #[error("I/O error reading identities: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArmorError {
    #[error("missing armor begin marker")]
    InvalidBeginMarker,

    #[error("malformed armor line")]
    InvalidLine,

    #[error("missing armor end marker")]
    MissingEndMarker,

    #[error("trailing data after armor end marker")]
    TrailingData,
}

impl From<ArmorError> for io::Error {
    fn from(err: ArmorError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}
