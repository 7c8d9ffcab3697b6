//! Recipient and identity traits: the seams between the engine and key types

use crate::error::{DecryptError, EncryptError};
use crate::format::Stanza;
use crate::keys::FileKey;

/// Wraps a file key for one party, producing the header stanzas that carry it.
pub trait Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError>;

    /// Whether this recipient must be the only one in a header.
    fn is_exclusive(&self) -> bool {
        false
    }
}

/// Why an identity could not recover the file key from a stanza.
#[derive(Debug)]
pub enum UnwrapError {
    /// Not addressed to this identity. Trial decryption moves on.
    Mismatch,
    /// The stanza is addressed to this identity but unusable. Aborts decryption.
    Fatal(DecryptError),
}

impl From<DecryptError> for UnwrapError {
    fn from(err: DecryptError) -> Self {
        UnwrapError::Fatal(err)
    }
}

/// Recovers a file key from the stanzas addressed to it.
pub trait Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError>;

    /// Try every stanza in order. The first match wins; the first fatal
    /// error stops the search.
    fn unwrap_stanzas(&self, stanzas: &[Stanza]) -> Result<FileKey, UnwrapError> {
        for stanza in stanzas {
            match self.unwrap_stanza(stanza) {
                Err(UnwrapError::Mismatch) => continue,
                result => return result,
            }
        }
        Err(UnwrapError::Mismatch)
    }
}

impl<T: Identity + ?Sized> Identity for Box<T> {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError> {
        (**self).unwrap_stanza(stanza)
    }

    fn unwrap_stanzas(&self, stanzas: &[Stanza]) -> Result<FileKey, UnwrapError> {
        (**self).unwrap_stanzas(stanzas)
    }
}

impl<T: Recipient + ?Sized> Recipient for Box<T> {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        (**self).wrap_file_key(file_key)
    }

    fn is_exclusive(&self) -> bool {
        (**self).is_exclusive()
    }
}
