//! Identity files: one `AGE-SECRET-KEY-1…` per line
//!
//! Blank lines and lines starting with `#` are skipped. Surrounding
//! whitespace is ignored.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::IdentityFileError;
use crate::x25519::X25519Identity;

/// Parse every identity in `input`. Fails on the first bad line (1-based)
/// or if the file holds no keys at all.
pub fn parse_identities<R: BufRead>(input: R) -> Result<Vec<X25519Identity>, IdentityFileError> {
    let mut identities = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => IdentityFileError::ParseErrorAtLine(index + 1),
            _ => IdentityFileError::Io(e),
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let identity = line
            .parse::<X25519Identity>()
            .map_err(|_| IdentityFileError::ParseErrorAtLine(index + 1))?;
        identities.push(identity);
    }

    if identities.is_empty() {
        return Err(IdentityFileError::NoSecretKeysFound);
    }
    Ok(identities)
}

/// Read and parse an identity file from disk.
pub fn read_identity_file(path: &Path) -> Result<Vec<X25519Identity>, IdentityFileError> {
    let identities = parse_identities(BufReader::new(File::open(path)?))?;
    debug!(path = %path.display(), count = identities.len(), "loaded identity file");
    Ok(identities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    fn key_line() -> (X25519Identity, String) {
        let identity = X25519Identity::generate();
        let line = identity.to_key_string().unwrap().expose_secret().to_owned();
        (identity, line)
    }

    #[test]
    fn test_parse_with_comments() {
        let (a, a_line) = key_line();
        let (b, b_line) = key_line();
        let text = format!(
            "# created: 2024-01-01\n# public key: {}\n{a_line}\n\n   \n  {b_line}  \n",
            a.to_public()
        );

        let identities = parse_identities(text.as_bytes()).unwrap();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].to_public(), a.to_public());
        assert_eq!(identities[1].to_public(), b.to_public());
    }

    #[test]
    fn test_bad_line_reports_number() {
        let (_, line) = key_line();
        let text = format!("# comment\n{line}\n\nAGE-SECRET-KEY-1NOTAKEY\n");
        assert!(matches!(
            parse_identities(text.as_bytes()),
            Err(IdentityFileError::ParseErrorAtLine(4))
        ));
    }

    #[test]
    fn test_public_key_is_not_an_identity() {
        let (identity, _) = key_line();
        let text = identity.to_public().to_string();
        assert!(matches!(
            parse_identities(text.as_bytes()),
            Err(IdentityFileError::ParseErrorAtLine(1))
        ));
    }

    #[test]
    fn test_non_utf8_line_reports_number() {
        let (_, line) = key_line();
        let mut text = format!("# comment\n{line}\n").into_bytes();
        text.extend_from_slice(b"\xff\xfe\n");
        assert!(matches!(
            parse_identities(&text[..]),
            Err(IdentityFileError::ParseErrorAtLine(3))
        ));
    }

    #[test]
    fn test_no_keys() {
        assert!(matches!(
            parse_identities(&b"# nothing here\n\n"[..]),
            Err(IdentityFileError::NoSecretKeysFound)
        ));
        assert!(matches!(
            parse_identities(&b""[..]),
            Err(IdentityFileError::NoSecretKeysFound)
        ));
    }

    #[test]
    fn test_read_identity_file() {
        let (identity, line) = key_line();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{line}").unwrap();

        let identities = read_identity_file(file.path()).unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].to_public(), identity.to_public());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_identity_file(&dir.path().join("missing.txt")),
            Err(IdentityFileError::Io(_))
        ));
    }
}
