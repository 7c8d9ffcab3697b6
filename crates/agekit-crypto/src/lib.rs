//! agekit-crypto: the age v1 file encryption engine
//!
//! File layout:
//! ```text
//! age-encryption.org/v1
//! -> X25519 <ephemeral public key, base64>
//! <wrapped file key, base64, 64 columns>
//! --- <header MAC, base64>
//! [16 bytes: payload nonce][ChaCha20-Poly1305 chunks...]
//! ```
//!
//! Key hierarchy:
//! ```text
//! File Key (128-bit, random per file)
//!   ├── wrapped once per recipient (X25519 agreement or scrypt passphrase) → stanza
//!   ├── Header MAC key: HKDF-SHA256(ikm=file_key, info="header") → HMAC-SHA256 over header
//!   └── Stream key: HKDF-SHA256(salt=payload_nonce, ikm=file_key, info="payload")
//!       └── Chunk AEAD: ChaCha20-Poly1305, 64 KiB chunks, counter nonce + last-chunk flag
//! ```

pub mod armor;
pub mod engine;
pub mod error;
pub mod format;
pub mod identity_file;
pub mod keys;
pub mod recipient;
pub mod scrypt;
pub mod stream;
pub mod x25519;

pub use armor::{is_armored, ArmoredReader, ArmoredWriter};
pub use engine::{decrypt_bytes, encrypt_bytes, Decryptor, Encryptor};
pub use error::{
    AeadError, ArmorError, DecryptError, EncryptError, FormatError, IdentityFileError, KdfError,
    KeyError, StreamError,
};
pub use format::{Header, Stanza};
pub use identity_file::{parse_identities, read_identity_file};
pub use keys::{generate_file_key, FileKey};
pub use recipient::{Identity, Recipient, UnwrapError};
pub use scrypt::{ScryptIdentity, ScryptRecipient};
pub use stream::{StreamReader, StreamWriter, CHUNK_SIZE};
pub use x25519::{X25519Identity, X25519Recipient};

/// Size of a file key in bytes (128-bit)
pub const FILE_KEY_SIZE: usize = 16;

/// Size of a derived symmetric key (wrapping, MAC, stream) in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the random payload nonce written after the header
pub const PAYLOAD_NONCE_SIZE: usize = 16;
