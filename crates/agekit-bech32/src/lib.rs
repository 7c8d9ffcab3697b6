//! agekit-bech32: the checksummed key string codec
//!
//! Key material is printed as `<hrp>1<data><checksum>`:
//! - `hrp`: human-readable prefix (printable ASCII, e.g. `age` or `AGE-SECRET-KEY-`)
//! - `data`: the payload bytes repacked into 5-bit groups, one alphabet symbol each
//! - `checksum`: 6 symbols of BCH remainder over the expanded prefix and data
//!
//! Strings are single-case. An upper-case prefix produces an upper-case string.
//! Unlike BIP 173 there is no 90-character length limit.

use thiserror::Error;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
const CHECKSUM_LEN: usize = 6;
const SEPARATOR: u8 = b'1';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("string mixes upper and lower case")]
    MixedCase,
    #[error("separator missing or misplaced")]
    InvalidPosition,
    #[error("invalid character")]
    InvalidCharacter,
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("invalid human-readable prefix")]
    InvalidHrp,
    #[error("value out of range for bit conversion")]
    InvalidDataRange,
    #[error("more than 4 bits of padding")]
    IllegalZeroPadding,
    #[error("non-zero padding bits")]
    NonZeroPadding,
}

/// Encode `data` under the prefix `hrp`.
pub fn encode(hrp: &str, data: &[u8]) -> Result<String, Error> {
    if hrp.is_empty() || !hrp.bytes().all(is_printable) {
        return Err(Error::InvalidHrp);
    }
    let upper = hrp.bytes().any(|b| b.is_ascii_uppercase());
    if upper && hrp.bytes().any(|b| b.is_ascii_lowercase()) {
        return Err(Error::MixedCase);
    }

    let mut values = convert_bits(data, 8, 5, true)?;
    let checksum = create_checksum(hrp, &values);
    values.extend_from_slice(&checksum);

    let mut out = String::with_capacity(hrp.len() + 1 + values.len());
    out.push_str(&hrp.to_ascii_lowercase());
    out.push(char::from(SEPARATOR));
    out.extend(values.iter().map(|&v| char::from(CHARSET[usize::from(v)])));

    if upper {
        out.make_ascii_uppercase();
    }
    Ok(out)
}

/// Decode a string into its prefix (case as written) and payload bytes.
pub fn decode(s: &str) -> Result<(String, Vec<u8>), Error> {
    let bytes = s.as_bytes();
    let has_lower = bytes.iter().any(u8::is_ascii_lowercase);
    let has_upper = bytes.iter().any(u8::is_ascii_uppercase);
    if has_lower && has_upper {
        return Err(Error::MixedCase);
    }

    let pos = bytes
        .iter()
        .rposition(|&b| b == SEPARATOR)
        .ok_or(Error::InvalidPosition)?;
    if pos < 1 || pos + CHECKSUM_LEN + 1 > bytes.len() {
        return Err(Error::InvalidPosition);
    }

    let (hrp, rest) = bytes.split_at(pos);
    if !hrp.iter().copied().all(is_printable) {
        return Err(Error::InvalidCharacter);
    }
    // Checked printable ASCII above.
    let hrp = String::from_utf8_lossy(hrp).into_owned();

    let values = rest[1..]
        .iter()
        .map(|&c| {
            CHARSET
                .iter()
                .position(|&x| x == c.to_ascii_lowercase())
                .map(|i| i as u8)
                .ok_or(Error::InvalidCharacter)
        })
        .collect::<Result<Vec<u8>, Error>>()?;

    if !verify_checksum(&hrp, &values) {
        return Err(Error::InvalidChecksum);
    }

    let payload = &values[..values.len() - CHECKSUM_LEN];
    let data = convert_bits(payload, 5, 8, false)?;
    Ok((hrp, data))
}

fn is_printable(b: u8) -> bool {
    (33..=126).contains(&b)
}

fn polymod(values: impl IntoIterator<Item = u8>) -> u32 {
    let mut chk: u32 = 1;
    for v in values {
        let top = chk >> 25;
        chk = ((chk & 0x1ff_ffff) << 5) ^ u32::from(v);
        for (i, g) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

/// High bits of each prefix byte, a zero separator, then the low bits.
fn expand_hrp(hrp: &str) -> Vec<u8> {
    let lower = hrp.to_ascii_lowercase();
    let mut out = Vec::with_capacity(lower.len() * 2 + 1);
    out.extend(lower.bytes().map(|b| b >> 5));
    out.push(0);
    out.extend(lower.bytes().map(|b| b & 31));
    out
}

fn verify_checksum(hrp: &str, values: &[u8]) -> bool {
    polymod(expand_hrp(hrp).into_iter().chain(values.iter().copied())) == 1
}

fn create_checksum(hrp: &str, values: &[u8]) -> [u8; CHECKSUM_LEN] {
    let input = expand_hrp(hrp)
        .into_iter()
        .chain(values.iter().copied())
        .chain([0u8; CHECKSUM_LEN]);
    let m = polymod(input) ^ 1;

    let mut out = [0u8; CHECKSUM_LEN];
    for (i, v) in out.iter_mut().enumerate() {
        *v = ((m >> (5 * (5 - i))) & 31) as u8;
    }
    out
}

/// Regroup a stream of `from`-bit values into `to`-bit values.
///
/// With `pad`, a trailing partial group is filled with zero bits. Without it,
/// leftover bits must be fewer than `from` and all zero.
fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>, Error> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to) - 1;
    let max_acc: u32 = (1 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for &value in data {
        let v = u32::from(value);
        if v >> from != 0 {
            return Err(Error::InvalidDataRange);
        }
        acc = ((acc << from) | v) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & maxv) as u8);
        }
    } else if bits >= from {
        return Err(Error::IllegalZeroPadding);
    } else if (acc << (to - bits)) & maxv != 0 {
        return Err(Error::NonZeroPadding);
    }

    Ok(out)
}
