//! X25519 recipients and identities
//!
//! Wrap:
//! ```text
//! ephemeral secret e, E = e·G
//! shared = e·R                       (R = recipient public key)
//! wrap_key = HKDF-SHA256(salt = E || R, ikm = shared, info = "age-encryption.org/v1/X25519")
//! stanza  = -> X25519 base64(E)
//!           base64(ChaCha20-Poly1305(wrap_key, zero nonce, file_key))
//! ```
//!
//! Key strings: recipients are Bech32 with prefix `age`, identities are
//! uppercase Bech32 with prefix `AGE-SECRET-KEY-`.

use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use tracing::debug;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{EncryptError, KdfError, KeyError};
use crate::format::{decode_string, encode_string, Stanza};
use crate::keys::{hkdf_derive, unwrap_key, wrap_key, DerivedKey, FileKey};
use crate::recipient::{Identity, Recipient, UnwrapError};
use crate::{FILE_KEY_SIZE, KEY_SIZE, TAG_SIZE};

pub const STANZA_TAG: &str = "X25519";
const WRAP_LABEL: &[u8] = b"age-encryption.org/v1/X25519";

const PUBLIC_KEY_PREFIX: &str = "age";
const SECRET_KEY_PREFIX: &str = "AGE-SECRET-KEY-";

const ENCRYPTED_FILE_KEY_SIZE: usize = FILE_KEY_SIZE + TAG_SIZE;

/// An X25519 public key that file keys can be wrapped to.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct X25519Recipient(PublicKey);

impl X25519Recipient {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(PublicKey::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }
}

impl fmt::Display for X25519Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded =
            agekit_bech32::encode(PUBLIC_KEY_PREFIX, self.0.as_bytes()).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl fmt::Debug for X25519Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Recipient({self})")
    }
}

impl FromStr for X25519Recipient {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_key(s, PUBLIC_KEY_PREFIX)?;
        Ok(Self::from_bytes(*bytes))
    }
}

impl Recipient for X25519Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.0);
        if !shared.was_contributory() {
            return Err(EncryptError::LowOrderRecipient);
        }

        let wrapping_key = derive_wrapping_key(&ephemeral_public, &self.0, shared.as_bytes())?;
        let body = wrap_key(&wrapping_key, file_key)?;

        Ok(vec![Stanza::new(
            STANZA_TAG,
            vec![encode_string(ephemeral_public.as_bytes())],
            body,
        )])
    }
}

/// An X25519 secret key.
#[derive(Clone)]
pub struct X25519Identity {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519Identity {
    /// Generate a fresh identity from the OS random source.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The recipient that file keys for this identity are wrapped to.
    pub fn to_public(&self) -> X25519Recipient {
        X25519Recipient(self.public)
    }

    /// The `AGE-SECRET-KEY-1…` string for this identity.
    pub fn to_key_string(&self) -> Result<SecretString, KeyError> {
        let bytes = Zeroizing::new(self.secret.to_bytes());
        let encoded = agekit_bech32::encode(SECRET_KEY_PREFIX, bytes.as_ref())?;
        Ok(SecretString::from(encoded))
    }
}

impl fmt::Debug for X25519Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X25519Identity")
            .field("public", &self.to_public())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl FromStr for X25519Identity {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_key(s, SECRET_KEY_PREFIX)?;
        Ok(Self::from_bytes(*bytes))
    }
}

impl Identity for X25519Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError> {
        if stanza.tag != STANZA_TAG {
            return Err(UnwrapError::Mismatch);
        }
        // Malformed X25519 stanzas are treated as addressed to someone else.
        let [arg] = stanza.args.as_slice() else {
            return Err(UnwrapError::Mismatch);
        };
        let ephemeral_bytes: [u8; KEY_SIZE] = decode_string(arg)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(UnwrapError::Mismatch)?;
        if stanza.body.len() != ENCRYPTED_FILE_KEY_SIZE {
            return Err(UnwrapError::Mismatch);
        }

        let ephemeral_public = PublicKey::from(ephemeral_bytes);
        let shared = self.secret.diffie_hellman(&ephemeral_public);
        if !shared.was_contributory() {
            debug!("skipping X25519 stanza with a low-order ephemeral key");
            return Err(UnwrapError::Mismatch);
        }

        let wrapping_key = derive_wrapping_key(&ephemeral_public, &self.public, shared.as_bytes())
            .map_err(|e| UnwrapError::Fatal(e.into()))?;
        unwrap_key(&wrapping_key, &stanza.body).map_err(|_| UnwrapError::Mismatch)
    }
}

fn derive_wrapping_key(
    ephemeral: &PublicKey,
    recipient: &PublicKey,
    shared: &[u8; KEY_SIZE],
) -> Result<DerivedKey, KdfError> {
    let mut salt = [0u8; 2 * KEY_SIZE];
    salt[..KEY_SIZE].copy_from_slice(ephemeral.as_bytes());
    salt[KEY_SIZE..].copy_from_slice(recipient.as_bytes());
    hkdf_derive(Some(&salt), shared, WRAP_LABEL)
}

/// Decode a Bech32 key string, matching the prefix case-insensitively.
fn decode_key(s: &str, expected: &'static str) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyError> {
    let (hrp, data) = agekit_bech32::decode(s)?;
    let data = Zeroizing::new(data);
    if !hrp.eq_ignore_ascii_case(expected) {
        return Err(KeyError::WrongPrefix {
            expected,
            found: hrp,
        });
    }
    let bytes: [u8; KEY_SIZE] = data
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidLength(data.len()))?;
    Ok(Zeroizing::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_file_key;
    use secrecy::ExposeSecret;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let identity = X25519Identity::generate();
        let file_key = generate_file_key();

        let stanzas = identity.to_public().wrap_file_key(&file_key).unwrap();
        assert_eq!(stanzas.len(), 1);
        assert_eq!(stanzas[0].tag, STANZA_TAG);
        assert_eq!(stanzas[0].args.len(), 1);
        assert_eq!(stanzas[0].body.len(), ENCRYPTED_FILE_KEY_SIZE);

        let unwrapped = identity.unwrap_stanzas(&stanzas).unwrap();
        assert_eq!(unwrapped.as_bytes(), file_key.as_bytes());
    }

    #[test]
    fn test_ephemeral_key_changes_per_wrap() {
        let recipient = X25519Identity::generate().to_public();
        let file_key = generate_file_key();
        let a = recipient.wrap_file_key(&file_key).unwrap();
        let b = recipient.wrap_file_key(&file_key).unwrap();
        assert_ne!(a[0].args, b[0].args);
        assert_ne!(a[0].body, b[0].body);
    }

    #[test]
    fn test_other_identity_mismatches() {
        let stanzas = X25519Identity::generate()
            .to_public()
            .wrap_file_key(&generate_file_key())
            .unwrap();
        let result = X25519Identity::generate().unwrap_stanzas(&stanzas);
        assert!(matches!(result, Err(UnwrapError::Mismatch)));
    }

    #[test]
    fn test_malformed_stanzas_mismatch() {
        let identity = X25519Identity::generate();
        let good = identity
            .to_public()
            .wrap_file_key(&generate_file_key())
            .unwrap()
            .remove(0);

        let mut wrong_tag = good.clone();
        wrong_tag.tag = "scrypt".into();
        let mut no_args = good.clone();
        no_args.args.clear();
        let mut extra_arg = good.clone();
        extra_arg.args.push("x".into());
        let mut bad_b64 = good.clone();
        bad_b64.args[0] = "!!!".into();
        let mut short_key = good.clone();
        short_key.args[0] = encode_string(&[1u8; 31]);
        let mut short_body = good.clone();
        short_body.body.pop();
        let mut low_order = good.clone();
        low_order.args[0] = encode_string(&[0u8; KEY_SIZE]);

        for stanza in [wrong_tag, no_args, extra_arg, bad_b64, short_key, short_body, low_order] {
            assert!(
                matches!(identity.unwrap_stanza(&stanza), Err(UnwrapError::Mismatch)),
                "{stanza:?} must not match"
            );
        }
    }

    #[test]
    fn test_low_order_recipient_rejected() {
        let recipient = X25519Recipient::from_bytes([0u8; KEY_SIZE]);
        let result = recipient.wrap_file_key(&generate_file_key());
        assert!(matches!(result, Err(EncryptError::LowOrderRecipient)));
    }

    #[test]
    fn test_key_string_roundtrip() {
        let identity = X25519Identity::generate();
        let secret = identity.to_key_string().unwrap();
        assert!(secret.expose_secret().starts_with("AGE-SECRET-KEY-1"));
        assert_eq!(secret.expose_secret().to_uppercase(), secret.expose_secret());

        let parsed: X25519Identity = secret.expose_secret().parse().unwrap();
        assert_eq!(parsed.to_public(), identity.to_public());

        let lower: X25519Identity = secret.expose_secret().to_lowercase().parse().unwrap();
        assert_eq!(lower.to_public(), identity.to_public());

        let public = identity.to_public().to_string();
        assert!(public.starts_with("age1"));
        let parsed: X25519Recipient = public.parse().unwrap();
        assert_eq!(parsed, identity.to_public());
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let identity = X25519Identity::generate();
        let public = identity.to_public().to_string();
        assert!(matches!(
            public.parse::<X25519Identity>(),
            Err(KeyError::WrongPrefix { .. })
        ));
        let secret = identity.to_key_string().unwrap();
        assert!(matches!(
            secret.expose_secret().parse::<X25519Recipient>(),
            Err(KeyError::WrongPrefix { .. })
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = agekit_bech32::encode("age", &[1u8; 31]).unwrap();
        assert!(matches!(
            short.parse::<X25519Recipient>(),
            Err(KeyError::InvalidLength(31))
        ));
    }

    #[test]
    fn test_corrupted_key_string_rejected() {
        let mut public = X25519Identity::generate().to_public().to_string();
        let last = public.pop().unwrap();
        public.push(if last == 'q' { 'p' } else { 'q' });
        assert!(matches!(
            public.parse::<X25519Recipient>(),
            Err(KeyError::Encoding(_))
        ));
    }

    #[test]
    fn test_identity_debug_redacted() {
        let identity = X25519Identity::generate();
        let debug = format!("{identity:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("AGE-SECRET-KEY"));
    }
}
