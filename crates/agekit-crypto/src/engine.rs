//! Encryptor and Decryptor: file key generation, header, payload stream

use std::io::{BufRead, Read, Write};

use agekit_core::config::ScryptConfig;
use rand::RngCore;
use secrecy::SecretString;
use tracing::debug;

use crate::error::{DecryptError, EncryptError, StreamError};
use crate::format::Header;
use crate::keys::{derive_stream_key, generate_file_key, header_mac, verify_header_mac, FileKey, MAC_SIZE};
use crate::recipient::{Identity, Recipient, UnwrapError};
use crate::scrypt::{ScryptRecipient, STANZA_TAG as SCRYPT_TAG};
use crate::stream::{StreamReader, StreamWriter};
use crate::PAYLOAD_NONCE_SIZE;

/// Encrypts files to a fixed set of recipients.
pub struct Encryptor {
    recipients: Vec<Box<dyn Recipient>>,
}

impl Encryptor {
    /// Fails if there are no recipients, or if an exclusive (passphrase)
    /// recipient is mixed with any other.
    pub fn with_recipients(recipients: Vec<Box<dyn Recipient>>) -> Result<Self, EncryptError> {
        if recipients.is_empty() {
            return Err(EncryptError::NoRecipients);
        }
        if recipients.len() > 1 && recipients.iter().any(|r| r.is_exclusive()) {
            return Err(EncryptError::ScryptRecipientMustBeOnlyOne);
        }
        Ok(Self { recipients })
    }

    /// Encrypt to a single passphrase at the default work factor.
    pub fn with_passphrase(passphrase: SecretString) -> Result<Self, EncryptError> {
        Self::with_passphrase_config(passphrase, &ScryptConfig::default())
    }

    pub fn with_passphrase_config(
        passphrase: SecretString,
        config: &ScryptConfig,
    ) -> Result<Self, EncryptError> {
        let recipient = ScryptRecipient::from_config(passphrase, config)?;
        Self::with_recipients(vec![Box::new(recipient)])
    }

    fn build_header(&self, file_key: &FileKey) -> Result<Header, EncryptError> {
        let mut stanzas = Vec::with_capacity(self.recipients.len());
        for recipient in &self.recipients {
            stanzas.extend(recipient.wrap_file_key(file_key)?);
        }
        for stanza in &stanzas {
            stanza.validate()?;
        }

        let unsigned = Header::from_parts(stanzas, [0u8; MAC_SIZE]);
        let mac = header_mac(file_key, &unsigned)?;
        let (stanzas, _) = unsigned.into_parts();
        Ok(Header::from_parts(stanzas, mac))
    }

    /// Write the header and payload nonce to `output`, returning a writer
    /// that encrypts the payload. Call [`StreamWriter::finish`] when done.
    pub fn wrap_output<W: Write>(&self, mut output: W) -> Result<StreamWriter<W>, EncryptError> {
        let file_key = generate_file_key();
        let header = self.build_header(&file_key)?;
        header.write_to(&mut output)?;

        let mut nonce = [0u8; PAYLOAD_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        output.write_all(&nonce)?;

        let stream_key = derive_stream_key(&file_key, &nonce)?;
        debug!(stanzas = header.stanzas().len(), "wrote age header");
        Ok(StreamWriter::new(output, &stream_key))
    }
}

/// A file whose header has been parsed but not yet decrypted.
pub struct Decryptor<R: BufRead> {
    input: R,
    header: Header,
}

impl<R: BufRead> Decryptor<R> {
    /// Parse the header from `input`. Nothing past the MAC line is read.
    pub fn new(mut input: R) -> Result<Self, DecryptError> {
        let header = Header::read_from(&mut input)?;
        Ok(Self { input, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Whether the file was encrypted to a passphrase.
    pub fn is_scrypt(&self) -> bool {
        self.header.stanzas().iter().any(|s| s.tag == SCRYPT_TAG)
    }

    /// Try each identity against the header, verify the MAC with the
    /// recovered file key, and return a reader over the plaintext.
    pub fn decrypt<'a>(
        mut self,
        identities: impl IntoIterator<Item = &'a dyn Identity>,
    ) -> Result<StreamReader<R>, DecryptError> {
        if self.is_scrypt() && self.header.stanzas().len() != 1 {
            return Err(DecryptError::ScryptStanzaMustBeOnlyOne);
        }

        let file_key = self.unwrap_file_key(identities)?;
        if !verify_header_mac(&file_key, &self.header)? {
            return Err(DecryptError::BadHeaderMac);
        }

        let mut nonce = [0u8; PAYLOAD_NONCE_SIZE];
        self.input.read_exact(&mut nonce)?;
        let stream_key = derive_stream_key(&file_key, &nonce)?;
        Ok(StreamReader::new(self.input, &stream_key))
    }

    fn unwrap_file_key<'a>(
        &self,
        identities: impl IntoIterator<Item = &'a dyn Identity>,
    ) -> Result<FileKey, DecryptError> {
        let stanzas = self.header.stanzas();
        let mut tried = 0usize;
        for identity in identities {
            tried += 1;
            match identity.unwrap_stanzas(stanzas) {
                Ok(file_key) => {
                    debug!(identity = tried, "identity matched a stanza");
                    return Ok(file_key);
                }
                Err(UnwrapError::Mismatch) => {
                    debug!(identity = tried, "identity matched no stanza");
                }
                Err(UnwrapError::Fatal(err)) => return Err(err),
            }
        }
        Err(if tried == 0 {
            DecryptError::NoIdentities
        } else {
            DecryptError::IncorrectIdentity
        })
    }
}

/// Encrypt `plaintext` in memory.
pub fn encrypt_bytes(
    recipients: Vec<Box<dyn Recipient>>,
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptError> {
    let encryptor = Encryptor::with_recipients(recipients)?;
    let mut writer = encryptor.wrap_output(Vec::with_capacity(plaintext.len() + 256))?;
    writer.write_all(plaintext)?;
    Ok(writer.finish()?)
}

/// Decrypt `ciphertext` in memory. Payload failures surface as
/// [`DecryptError::Stream`].
pub fn decrypt_bytes<'a>(
    identities: impl IntoIterator<Item = &'a dyn Identity>,
    ciphertext: &[u8],
) -> Result<Vec<u8>, DecryptError> {
    let mut reader = Decryptor::new(ciphertext)?.decrypt(identities)?;
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    reader.read_to_end(&mut plaintext).map_err(|err| match StreamError::from_io(&err) {
        Some(stream) => DecryptError::Stream(stream),
        None => DecryptError::Io(err),
    })?;
    Ok(plaintext)
}
