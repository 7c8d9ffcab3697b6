//! Chunked ChaCha20-Poly1305 payload encryption
//!
//! Payload format (after the 16-byte payload nonce):
//! ```text
//! [chunk 0: ≤64 KiB ciphertext][16-byte tag] ... [last chunk][16-byte tag]
//! chunk nonce = counter (11 bytes, big-endian) || last flag (1 byte, 0x01 on the last chunk)
//! ```
//!
//! Every chunk but the last holds exactly [`CHUNK_SIZE`] bytes of plaintext.
//! The last chunk may only be empty when it is also the first, so an empty
//! file still carries one authenticated chunk. The last-chunk flag in the
//! nonce stops truncation at a chunk boundary from going unnoticed.

use std::cmp;
use std::io::{self, Read, Write};

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce as AeadNonce,
};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::error::StreamError;
use crate::{KEY_SIZE, TAG_SIZE};

/// Plaintext bytes per chunk (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

const COUNTER_SIZE: usize = 11;

/// Chunk nonce: 88-bit big-endian counter and a last-chunk flag byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Nonce([u8; 12]);

impl Nonce {
    /// Advance the counter. Panics instead of ever reusing a nonce.
    fn increment_counter(&mut self) {
        for byte in self.0[..COUNTER_SIZE].iter_mut().rev() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                return;
            }
        }
        panic!("stream nonce counter overflowed");
    }

    fn is_zero(&self) -> bool {
        self.0[..COUNTER_SIZE].iter().all(|&b| b == 0)
    }

    fn with_last(self, last: bool) -> [u8; 12] {
        let mut bytes = self.0;
        bytes[COUNTER_SIZE] = u8::from(last);
        bytes
    }
}

/// Cipher plus chunk position, shared by both directions.
struct Stream {
    cipher: ChaCha20Poly1305,
    nonce: Nonce,
}

impl Stream {
    fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            nonce: Nonce::default(),
        }
    }

    /// Seal a chunk at the current position without advancing.
    fn seal(&self, chunk: &[u8], last: bool) -> Result<Vec<u8>, StreamError> {
        let nonce = self.nonce.with_last(last);
        self.cipher
            .encrypt(AeadNonce::from_slice(&nonce), chunk)
            .map_err(|_| StreamError::EncryptFailure)
    }

    /// Open a chunk at the current position without advancing.
    fn open(&self, chunk: &[u8], last: bool) -> Result<Zeroizing<Vec<u8>>, StreamError> {
        let nonce = self.nonce.with_last(last);
        self.cipher
            .decrypt(AeadNonce::from_slice(&nonce), chunk)
            .map(Zeroizing::new)
            .map_err(|_| StreamError::DecryptFailure)
    }
}

/// Encrypts everything written to it into `inner` as a chunked payload.
///
/// A full chunk is only sealed once more data arrives, because the writer
/// cannot know whether it is the last one. [`StreamWriter::finish`] must be
/// called to seal the final chunk; dropping the writer without it leaves a
/// truncated payload that will fail to decrypt.
///
/// If the inner writer fails, the payload written so far is unusable and
/// every later call fails with [`StreamError::WriterFailed`].
pub struct StreamWriter<W: Write> {
    inner: W,
    stream: Stream,
    chunk: Zeroizing<Vec<u8>>,
    failed: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, key: &[u8; KEY_SIZE]) -> Self {
        Self {
            inner,
            stream: Stream::new(key),
            chunk: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE)),
            failed: false,
        }
    }

    /// Seal and write the buffered chunk. The nonce only advances once the
    /// sealed bytes are fully written.
    fn flush_chunk(&mut self, last: bool) -> io::Result<()> {
        if self.failed {
            return Err(StreamError::WriterFailed.into());
        }
        let sealed = self.stream.seal(&self.chunk, last)?;
        if let Err(e) = self.inner.write_all(&sealed) {
            self.failed = true;
            return Err(e);
        }
        trace!(len = self.chunk.len(), last, "sealed payload chunk");
        self.stream.nonce.increment_counter();
        self.chunk.clear();
        Ok(())
    }

    /// Seal the final chunk (possibly empty) and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_chunk(true)?;
        self.inner.flush()?;
        debug!("payload stream finished");
        Ok(self.inner)
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, mut data: &[u8]) -> io::Result<usize> {
        if self.failed {
            return Err(StreamError::WriterFailed.into());
        }
        let mut written = 0;
        while !data.is_empty() {
            if self.chunk.len() == CHUNK_SIZE {
                match self.flush_chunk(false) {
                    Ok(()) => {}
                    // Report the bytes already taken; later calls fail.
                    Err(_) if written > 0 => return Ok(written),
                    Err(e) => return Err(e),
                }
            }
            let n = cmp::min(data.len(), CHUNK_SIZE - self.chunk.len());
            self.chunk.extend_from_slice(&data[..n]);
            written += n;
            data = &data[n..];
        }
        Ok(written)
    }

    /// Flushes the inner writer only. Buffered plaintext stays buffered.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypts a chunked payload read from `inner`.
///
/// Chunks are authenticated before any of their plaintext is returned. The
/// reader returns EOF only after a chunk flagged as last has been verified
/// and no bytes follow it. Errors are sticky: once a read fails, every later
/// read fails the same way.
pub struct StreamReader<R: Read> {
    inner: R,
    stream: Stream,
    encrypted: Vec<u8>,
    plaintext: Zeroizing<Vec<u8>>,
    pos: usize,
    done: bool,
    failed: Option<StreamError>,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R, key: &[u8; KEY_SIZE]) -> Self {
        Self {
            inner,
            stream: Stream::new(key),
            encrypted: vec![0u8; ENCRYPTED_CHUNK_SIZE],
            plaintext: Zeroizing::new(Vec::new()),
            pos: 0,
            done: false,
            failed: None,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        let n = read_full(&mut self.inner, &mut self.encrypted)?;
        if n == 0 {
            return Err(self.fail(StreamError::UnexpectedEof));
        }
        if n == TAG_SIZE && !self.stream.nonce.is_zero() {
            return Err(self.fail(StreamError::LastChunkEmpty));
        }
        let chunk = &self.encrypted[..n];

        // Only a short chunk is known to be last. A full one is tried as a
        // middle chunk first, then as the last.
        let opened = if n < ENCRYPTED_CHUNK_SIZE {
            self.stream.open(chunk, true).map(|p| (p, true))
        } else {
            self.stream
                .open(chunk, false)
                .map(|p| (p, false))
                .or_else(|_| self.stream.open(chunk, true).map(|p| (p, true)))
        };
        let (plaintext, last) = match opened {
            Ok(opened) => opened,
            Err(e) => return Err(self.fail(e)),
        };

        if last {
            let mut extra = [0u8; 1];
            if read_full(&mut self.inner, &mut extra)? != 0 {
                return Err(self.fail(StreamError::TrailingData));
            }
            self.done = true;
            debug!("payload stream verified");
        } else {
            self.stream.nonce.increment_counter();
        }

        trace!(len = plaintext.len(), last, "opened payload chunk");
        self.plaintext = plaintext;
        self.pos = 0;
        Ok(())
    }

    fn fail(&mut self, err: StreamError) -> io::Error {
        self.failed = Some(err);
        self.plaintext = Zeroizing::new(Vec::new());
        self.pos = 0;
        err.into()
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.failed {
            return Err(err.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.plaintext.len() {
            if self.done {
                return Ok(0);
            }
            self.next_chunk()?;
        }

        let n = cmp::min(buf.len(), self.plaintext.len() - self.pos);
        buf[..n].copy_from_slice(&self.plaintext[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Fill `buf` from `reader`, stopping early only at EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];

    fn seal_all(plaintext: &[u8]) -> Vec<u8> {
        let mut writer = StreamWriter::new(Vec::new(), &KEY);
        writer.write_all(plaintext).unwrap();
        writer.finish().unwrap()
    }

    fn open_all(ciphertext: &[u8]) -> Result<Vec<u8>, StreamError> {
        let mut reader = StreamReader::new(ciphertext, &KEY);
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .map_err(|e| StreamError::from_io(&e).expect("stream error"))?;
        Ok(out)
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_roundtrip_chunk_boundaries() {
        for len in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE] {
            let plaintext = data(len);
            let sealed = seal_all(&plaintext);
            assert_eq!(open_all(&sealed).unwrap(), plaintext, "length {len}");
        }
    }

    #[test]
    fn test_ciphertext_sizes() {
        assert_eq!(seal_all(b"").len(), TAG_SIZE);
        assert_eq!(seal_all(&data(CHUNK_SIZE)).len(), ENCRYPTED_CHUNK_SIZE);
        assert_eq!(
            seal_all(&data(CHUNK_SIZE + 1)).len(),
            ENCRYPTED_CHUNK_SIZE + 1 + TAG_SIZE
        );
        assert_eq!(
            seal_all(&data(3 * CHUNK_SIZE)).len(),
            3 * ENCRYPTED_CHUNK_SIZE
        );
    }

    #[test]
    fn test_small_writes_match_one_write() {
        let plaintext = data(CHUNK_SIZE * 2 + 100);
        let mut writer = StreamWriter::new(Vec::new(), &KEY);
        for piece in plaintext.chunks(1000) {
            writer.write_all(piece).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), seal_all(&plaintext));
    }

    #[test]
    fn test_empty_input_is_one_chunk() {
        let sealed = seal_all(b"");
        assert!(open_all(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_missing_final_chunk() {
        assert_eq!(open_all(b"").unwrap_err(), StreamError::UnexpectedEof);

        // Dropping the final chunk of a two-chunk stream leaves a full chunk
        // sealed as non-last.
        let sealed = seal_all(&data(CHUNK_SIZE + 10));
        let truncated = &sealed[..ENCRYPTED_CHUNK_SIZE];
        assert_eq!(open_all(truncated).unwrap_err(), StreamError::UnexpectedEof);
    }

    #[test]
    fn test_truncated_chunk_fails() {
        let sealed = seal_all(&data(1000));
        let result = open_all(&sealed[..sealed.len() - 1]);
        assert_eq!(result.unwrap_err(), StreamError::DecryptFailure);
    }

    #[test]
    fn test_trailing_data_after_full_last_chunk() {
        let mut sealed = seal_all(&data(CHUNK_SIZE));
        sealed.push(0);
        assert_eq!(open_all(&sealed).unwrap_err(), StreamError::TrailingData);
    }

    #[test]
    fn test_trailing_data_after_short_last_chunk() {
        // Extra bytes are read as part of the short chunk and break its tag.
        let mut sealed = seal_all(&data(10));
        sealed.push(0);
        assert_eq!(open_all(&sealed).unwrap_err(), StreamError::DecryptFailure);
    }

    #[test]
    fn test_trailing_data_withholds_plaintext() {
        let mut sealed = seal_all(&data(CHUNK_SIZE));
        sealed.extend_from_slice(b"junk");
        let mut reader = StreamReader::new(&sealed[..], &KEY);
        let mut buf = [0u8; 16];
        assert!(reader.read(&mut buf).is_err());
        // Sticky
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(StreamError::from_io(&err), Some(StreamError::TrailingData));
    }

    #[test]
    fn test_empty_last_chunk_after_data() {
        // Seal a full chunk as non-last followed by an empty last chunk.
        let mut stream = Stream::new(&KEY);
        let mut sealed = stream.seal(&data(CHUNK_SIZE), false).unwrap();
        stream.nonce.increment_counter();
        sealed.extend(stream.seal(b"", true).unwrap());
        assert_eq!(open_all(&sealed).unwrap_err(), StreamError::LastChunkEmpty);
    }

    #[test]
    fn test_tag_sized_last_chunk_rejected_by_length() {
        let stream = Stream::new(&KEY);
        let mut sealed = stream.seal(&data(CHUNK_SIZE), false).unwrap();
        sealed.extend_from_slice(&[0xAA; TAG_SIZE]);
        assert_eq!(open_all(&sealed).unwrap_err(), StreamError::LastChunkEmpty);
    }

    /// Fails the first write it sees, then accepts everything.
    struct FailOnce {
        failed: bool,
    }

    impl Write for FailOnce {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::new(io::ErrorKind::Other, "transient"));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_inner_write_failure_is_sticky() {
        let inner = FailOnce { failed: false };
        let mut writer = StreamWriter::new(inner, &KEY);
        let plaintext = data(2 * CHUNK_SIZE);

        // The first chunk is accepted; sealing it on the next boundary fails.
        assert_eq!(writer.write(&plaintext).unwrap(), CHUNK_SIZE);
        assert!(writer.stream.nonce.is_zero());

        let err = writer.write(&plaintext[CHUNK_SIZE..]).unwrap_err();
        assert_eq!(StreamError::from_io(&err), Some(StreamError::WriterFailed));
        assert!(writer.stream.nonce.is_zero());

        let err = writer.finish().map(|_| ()).unwrap_err();
        assert_eq!(StreamError::from_io(&err), Some(StreamError::WriterFailed));
    }

    #[test]
    fn test_first_write_failure_reports_error() {
        let inner = FailOnce { failed: false };
        let mut writer = StreamWriter::new(inner, &KEY);
        writer.write_all(&data(CHUNK_SIZE)).unwrap();
        let err = writer.write(b"more").unwrap_err();
        assert_eq!(err.to_string(), "transient");
    }

    #[test]
    fn test_tampered_chunk() {
        let mut sealed = seal_all(&data(CHUNK_SIZE * 2));
        sealed[CHUNK_SIZE + 100] ^= 0x01;
        assert_eq!(open_all(&sealed).unwrap_err(), StreamError::DecryptFailure);
    }

    #[test]
    fn test_wrong_key() {
        let sealed = seal_all(b"hello");
        let mut reader = StreamReader::new(&sealed[..], &[8u8; KEY_SIZE]);
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(StreamError::from_io(&err), Some(StreamError::DecryptFailure));
    }

    #[test]
    fn test_swapped_chunks() {
        let sealed = seal_all(&data(CHUNK_SIZE * 2 + 1));
        let mut swapped = sealed[ENCRYPTED_CHUNK_SIZE..2 * ENCRYPTED_CHUNK_SIZE].to_vec();
        swapped.extend_from_slice(&sealed[..ENCRYPTED_CHUNK_SIZE]);
        swapped.extend_from_slice(&sealed[2 * ENCRYPTED_CHUNK_SIZE..]);
        assert_eq!(open_all(&swapped).unwrap_err(), StreamError::DecryptFailure);
    }

    #[test]
    fn test_nonce_layout() {
        let mut nonce = Nonce::default();
        assert!(nonce.is_zero());
        nonce.increment_counter();
        assert_eq!(nonce.with_last(false), [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0]);
        assert_eq!(nonce.with_last(true), [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1]);

        let mut nonce = Nonce([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0]);
        nonce.increment_counter();
        assert_eq!(nonce.0, [0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "overflowed")]
    fn test_nonce_counter_overflow_panics() {
        let mut nonce = Nonce([0xFF; 12]);
        nonce.increment_counter();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn stream_roundtrip_arbitrary_writes(
            plaintext in proptest::collection::vec(any::<u8>(), 0..3 * CHUNK_SIZE),
            piece in 1usize..20_000,
        ) {
            let mut writer = StreamWriter::new(Vec::new(), &KEY);
            for part in plaintext.chunks(piece) {
                writer.write_all(part).unwrap();
            }
            let sealed = writer.finish().unwrap();
            prop_assert_eq!(open_all(&sealed).unwrap(), plaintext);
        }
    }
}
