//! File key, key derivation, and one-shot wrapping of the file key

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{AeadError, KdfError};
use crate::format::Header;
use crate::{FILE_KEY_SIZE, KEY_SIZE, TAG_SIZE};

/// A derived 256-bit symmetric key. Zeroized on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_SIZE]>;

/// Length of the header MAC in bytes (HMAC-SHA256)
pub const MAC_SIZE: usize = 32;

/// A per-file 128-bit key. Zeroized on drop.
#[derive(Clone)]
pub struct FileKey {
    bytes: [u8; FILE_KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; FILE_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; FILE_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 128-bit file key.
pub fn generate_file_key() -> FileKey {
    let mut bytes = [0u8; FILE_KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    FileKey::from_bytes(bytes)
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
pub(crate) fn hkdf_derive(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> Result<DerivedKey, KdfError> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, okm.as_mut()).map_err(|_| KdfError)?;
    Ok(okm)
}

/// Derive the header MAC key from the file key.
pub fn derive_header_mac_key(file_key: &FileKey) -> Result<DerivedKey, KdfError> {
    hkdf_derive(None, file_key.as_bytes(), b"header")
}

/// Derive the payload stream key from the file key and the payload nonce.
pub fn derive_stream_key(file_key: &FileKey, nonce: &[u8]) -> Result<DerivedKey, KdfError> {
    hkdf_derive(Some(nonce), file_key.as_bytes(), b"payload")
}

/// HMAC-SHA256 over the header bytes up to and including `---`.
pub fn header_mac(file_key: &FileKey, header: &Header) -> Result<[u8; MAC_SIZE], KdfError> {
    let mut mac = header_hmac(file_key)?;
    mac.update(&header.encode_without_mac());
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of the header's MAC line against the file key.
pub fn verify_header_mac(file_key: &FileKey, header: &Header) -> Result<bool, KdfError> {
    let mut mac = header_hmac(file_key)?;
    mac.update(&header.encode_without_mac());
    Ok(mac.verify_slice(header.mac()).is_ok())
}

fn header_hmac(file_key: &FileKey) -> Result<Hmac<Sha256>, KdfError> {
    let key = derive_header_mac_key(file_key)?;
    // HMAC accepts keys of any length.
    <Hmac<Sha256> as Mac>::new_from_slice(key.as_ref()).map_err(|_| KdfError)
}

/// Wrap (encrypt) the file key under a single-use key.
///
/// The nonce is all zeros: every caller derives `key` from fresh randomness,
/// so no key is ever used twice.
/// Output: `[ciphertext][16-byte tag]`
pub fn wrap_key(key: &[u8; KEY_SIZE], file_key: &FileKey) -> Result<Vec<u8>, AeadError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(&Nonce::default(), file_key.as_bytes().as_ref())
        .map_err(|_| AeadError::SealFailure)
}

/// Decrypt a message of an expected fixed size.
///
/// The size is pinned to mitigate multi-key attacks, where a ciphertext is
/// crafted to decrypt under several keys. Short ciphertexts can only target two.
pub fn aead_decrypt(
    key: &[u8; KEY_SIZE],
    size: usize,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, AeadError> {
    if ciphertext.len() != size + TAG_SIZE {
        return Err(AeadError::IncorrectCiphertextSize);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(&Nonce::default(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| AeadError::AuthenticationFailure)
}

/// Unwrap (decrypt) a file key produced by [`wrap_key`].
pub fn unwrap_key(key: &[u8; KEY_SIZE], wrapped: &[u8]) -> Result<FileKey, AeadError> {
    let plaintext = aead_decrypt(key, FILE_KEY_SIZE, wrapped)?;
    let mut bytes = [0u8; FILE_KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    Ok(FileKey::from_bytes(bytes))
}
