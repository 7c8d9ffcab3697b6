//! Passphrase recipients and identities (scrypt)
//!
//! ```text
//! wrap_key = scrypt(passphrase, salt = "age-encryption.org/v1/scrypt" || salt16, N = 2^log_n, r = 8, p = 1)
//! stanza   = -> scrypt base64(salt16) log_n
//!            base64(ChaCha20-Poly1305(wrap_key, zero nonce, file_key))
//! ```
//!
//! A passphrase recipient must be alone in its header, otherwise the file key
//! would also be available to parties who never knew the passphrase.

use agekit_core::config::{ScryptConfig, MAX_WORK_FACTOR, MIN_WORK_FACTOR};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{DecryptError, EncryptError, KdfError};
use crate::format::{decode_string, encode_string, Stanza};
use crate::keys::{unwrap_key, wrap_key, DerivedKey, FileKey};
use crate::recipient::{Identity, Recipient, UnwrapError};
use crate::{FILE_KEY_SIZE, KEY_SIZE, TAG_SIZE};

pub const STANZA_TAG: &str = "scrypt";
const SALT_LABEL: &[u8] = b"age-encryption.org/v1/scrypt";
const SALT_SIZE: usize = 16;

/// Encrypts to a passphrase.
pub struct ScryptRecipient {
    passphrase: SecretString,
    work_factor: u8,
}

impl ScryptRecipient {
    /// A recipient with the default work factor.
    pub fn new(passphrase: SecretString) -> Result<Self, EncryptError> {
        Self::from_config(passphrase, &ScryptConfig::default())
    }

    pub fn from_config(passphrase: SecretString, config: &ScryptConfig) -> Result<Self, EncryptError> {
        if passphrase.expose_secret().is_empty() {
            return Err(EncryptError::EmptyPassphrase);
        }
        Self { passphrase, work_factor: 0 }.with_work_factor(config.work_factor)
    }

    /// Override log2 N. Higher is slower for both sides.
    pub fn with_work_factor(mut self, log_n: u8) -> Result<Self, EncryptError> {
        if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&log_n) {
            return Err(EncryptError::InvalidWorkFactor(log_n));
        }
        self.work_factor = log_n;
        Ok(self)
    }

    pub fn work_factor(&self) -> u8 {
        self.work_factor
    }
}

impl Recipient for ScryptRecipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        debug!(work_factor = self.work_factor, "deriving passphrase wrapping key");
        let wrapping_key = derive_wrapping_key(&self.passphrase, &salt, self.work_factor)?;
        let body = wrap_key(&wrapping_key, file_key)?;

        Ok(vec![Stanza::new(
            STANZA_TAG,
            vec![encode_string(&salt), self.work_factor.to_string()],
            body,
        )])
    }

    fn is_exclusive(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for ScryptRecipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScryptRecipient")
            .field("work_factor", &self.work_factor)
            .finish_non_exhaustive()
    }
}

/// Decrypts files encrypted to a passphrase.
///
/// Refuses stanzas whose work factor exceeds `max_work_factor`, so a hostile
/// file cannot force unbounded work onto the decrypting side.
pub struct ScryptIdentity {
    passphrase: SecretString,
    max_work_factor: u8,
}

impl ScryptIdentity {
    pub fn new(passphrase: SecretString) -> Result<Self, DecryptError> {
        Self::from_config(passphrase, &ScryptConfig::default())
    }

    pub fn from_config(passphrase: SecretString, config: &ScryptConfig) -> Result<Self, DecryptError> {
        if passphrase.expose_secret().is_empty() {
            return Err(DecryptError::EmptyPassphrase);
        }
        Ok(Self {
            passphrase,
            max_work_factor: config.max_work_factor,
        })
    }

    pub fn with_max_work_factor(mut self, max: u8) -> Self {
        self.max_work_factor = max;
        self
    }
}

impl Identity for ScryptIdentity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError> {
        if stanza.tag != STANZA_TAG {
            return Err(UnwrapError::Mismatch);
        }
        let [salt, work_factor] = stanza.args.as_slice() else {
            return Err(DecryptError::InvalidScryptStanza.into());
        };
        let salt: [u8; SALT_SIZE] = decode_string(salt)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(DecryptError::InvalidScryptStanza)?;

        let log_n = parse_work_factor(work_factor)?;
        if log_n > u32::from(self.max_work_factor) {
            warn!(
                work_factor = log_n,
                max = self.max_work_factor,
                "refusing scrypt stanza above the work factor limit"
            );
            return Err(DecryptError::WorkFactorTooLarge {
                found: log_n,
                max: self.max_work_factor,
            }
            .into());
        }
        if stanza.body.len() != FILE_KEY_SIZE + TAG_SIZE {
            return Err(DecryptError::InvalidScryptStanza.into());
        }
        // Bounded by max_work_factor above.
        let log_n = u8::try_from(log_n).map_err(|_| DecryptError::InvalidScryptWorkFactor)?;

        debug!(work_factor = log_n, "deriving passphrase wrapping key");
        let wrapping_key = derive_wrapping_key(&self.passphrase, &salt, log_n)
            .map_err(|_| DecryptError::InvalidScryptWorkFactor)?;
        unwrap_key(&wrapping_key, &stanza.body).map_err(|_| UnwrapError::Mismatch)
    }
}

impl std::fmt::Debug for ScryptIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScryptIdentity")
            .field("max_work_factor", &self.max_work_factor)
            .finish_non_exhaustive()
    }
}

/// Accept only `[1-9][0-9]*`. Values too large for u32 saturate.
fn parse_work_factor(s: &str) -> Result<u32, DecryptError> {
    let canonical = !s.is_empty() && !s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit());
    if !canonical {
        return Err(DecryptError::InvalidScryptWorkFactor);
    }
    Ok(s.parse().unwrap_or(u32::MAX))
}

fn derive_wrapping_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    log_n: u8,
) -> Result<DerivedKey, KdfError> {
    let mut full_salt = Vec::with_capacity(SALT_LABEL.len() + SALT_SIZE);
    full_salt.extend_from_slice(SALT_LABEL);
    full_salt.extend_from_slice(salt);

    let params = ::scrypt::Params::new(log_n, 8, 1, KEY_SIZE).map_err(|_| KdfError)?;
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    ::scrypt::scrypt(
        passphrase.expose_secret().as_bytes(),
        &full_salt,
        &params,
        key.as_mut(),
    )
    .map_err(|_| KdfError)?;
    Ok(key)
}
