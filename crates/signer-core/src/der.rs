//! DER decoding for the material returned by a remote custody service.
//!
//! Custody services (AWS KMS, GCP KMS, HSM proxies) return two kinds of
//! ASN.1 DER structures:
//!
//! - ECDSA signatures: `SEQUENCE { r INTEGER, s INTEGER }`
//! - Public keys as `SubjectPublicKeyInfo`:
//!
//! ```text
//! 30 len                      SEQUENCE
//!    30 len                   SEQUENCE (AlgorithmIdentifier)
//!       06 07 2a8648ce3d0201  OID id-ecPublicKey
//!       06 05 2b8104000a      OID secp256k1
//!    03 42 00 04 x y          BIT STRING (uncompressed point)
//! ```
//!
//! # Example
//!
//! ```
//! use kms_evm_signer_core::der::decode_signature;
//! use alloy_primitives::U256;
//!
//! // r = 1, s = 2
//! let der = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02];
//! let sig = decode_signature(&der).unwrap();
//! assert_eq!(sig.r, U256::from(1));
//! assert_eq!(sig.s, U256::from(2));
//! ```

use alloy_primitives::U256;

use crate::crypto::SECP256K1_N;
use crate::error::{Error, Result};

/// ASN.1 universal tags used by the custody structures.
mod tag {
    pub(super) const INTEGER: u8 = 0x02;
    pub(super) const BIT_STRING: u8 = 0x03;
    pub(super) const OBJECT_IDENTIFIER: u8 = 0x06;
    pub(super) const SEQUENCE: u8 = 0x30;
}

/// `id-ecPublicKey` (1.2.840.10045.2.1).
const ID_EC_PUBLIC_KEY: [u8; 7] = [0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];

/// `secp256k1` (1.3.132.0.10).
const SECP256K1_OID: [u8; 5] = [0x2B, 0x81, 0x04, 0x00, 0x0A];

/// Length of an uncompressed SEC1 point (`0x04 || x || y`).
pub const UNCOMPRESSED_POINT_LEN: usize = 65;

/// An ECDSA signature as decoded from DER, before canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    /// The R component.
    pub r: U256,
    /// The S component, possibly in the upper half of the curve order.
    pub s: U256,
}

/// Decodes a DER `SEQUENCE { r INTEGER, s INTEGER }` signature.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the structure is malformed, carries trailing
/// bytes, or if either integer is negative, zero, or not below the curve
/// order.
pub fn decode_signature(der: &[u8]) -> Result<RawSignature> {
    let mut outer = DerReader::new(der);
    let body = outer.read_element(tag::SEQUENCE, "signature sequence")?;
    outer.finish("signature")?;

    let mut body = DerReader::new(body);
    let r = body.read_element(tag::INTEGER, "r")?;
    let s = body.read_element(tag::INTEGER, "s")?;
    body.finish("signature sequence")?;

    Ok(RawSignature {
        r: parse_scalar(r, "r")?,
        s: parse_scalar(s, "s")?,
    })
}

/// Decodes a DER `SubjectPublicKeyInfo` into a raw uncompressed point.
///
/// # Returns
///
/// The 65-byte point `0x04 || x || y`.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the BIT STRING is absent or malformed, if the
/// key is not an uncompressed point, or if the algorithm is not
/// `id-ecPublicKey` over `secp256k1`.
pub fn decode_public_key(der: &[u8]) -> Result<[u8; UNCOMPRESSED_POINT_LEN]> {
    let mut outer = DerReader::new(der);
    let spki = outer.read_element(tag::SEQUENCE, "public key sequence")?;
    outer.finish("public key")?;

    let mut spki = DerReader::new(spki);
    let algorithm = spki.read_element(tag::SEQUENCE, "algorithm identifier")?;
    let bit_string = spki.read_element(tag::BIT_STRING, "public key bit string")?;
    spki.finish("public key sequence")?;

    check_algorithm(algorithm)?;

    let (&unused_bits, point) = bit_string
        .split_first()
        .ok_or_else(|| Error::Decode("empty public key bit string".to_string()))?;
    if unused_bits != 0 {
        return Err(Error::Decode(format!(
            "public key bit string has {unused_bits} unused bits"
        )));
    }

    let point: [u8; UNCOMPRESSED_POINT_LEN] = point.try_into().map_err(|_| {
        Error::Decode(format!(
            "expected {UNCOMPRESSED_POINT_LEN}-byte uncompressed point, got {} bytes",
            point.len()
        ))
    })?;
    if point[0] != 0x04 {
        return Err(Error::Decode(format!(
            "unsupported point prefix {:#04x}",
            point[0]
        )));
    }

    Ok(point)
}

fn check_algorithm(algorithm: &[u8]) -> Result<()> {
    let mut reader = DerReader::new(algorithm);
    let oid = reader.read_element(tag::OBJECT_IDENTIFIER, "algorithm oid")?;
    let curve = reader.read_element(tag::OBJECT_IDENTIFIER, "curve oid")?;
    reader.finish("algorithm identifier")?;

    if oid != ID_EC_PUBLIC_KEY {
        return Err(Error::Decode("key algorithm is not id-ecPublicKey".to_string()));
    }
    if curve != SECP256K1_OID {
        return Err(Error::Decode("key curve is not secp256k1".to_string()));
    }
    Ok(())
}

/// Converts a DER INTEGER body into a scalar in `[1, n)`.
fn parse_scalar(bytes: &[u8], what: &str) -> Result<U256> {
    let (&first, _) = bytes
        .split_first()
        .ok_or_else(|| Error::Decode(format!("empty {what} integer")))?;
    if first & 0x80 != 0 {
        return Err(Error::Decode(format!("negative {what} integer")));
    }

    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let value = U256::try_from_be_slice(&bytes[start..])
        .ok_or_else(|| Error::Decode(format!("{what} exceeds 256 bits")))?;

    if value.is_zero() || value >= SECP256K1_N {
        return Err(Error::Decode(format!("{what} out of range")));
    }
    Ok(value)
}

/// A forward-only reader over DER TLV elements.
struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reads one element with the expected tag and returns its contents.
    fn read_element(&mut self, expected: u8, what: &str) -> Result<&'a [u8]> {
        let found = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::Decode(format!("missing {what}")))?;
        if found != expected {
            return Err(Error::Decode(format!("invalid {what} tag {found:#04x}")));
        }
        self.pos += 1;

        let len = self.read_length(what)?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::Decode(format!("{what} length overflow")))?;

        let contents = &self.data[self.pos..end];
        self.pos = end;
        Ok(contents)
    }

    /// Reads a definite length in short or long form (at most two octets).
    fn read_length(&mut self, what: &str) -> Result<usize> {
        let first = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::Decode(format!("missing {what} length")))?;
        self.pos += 1;

        if first < 0x80 {
            return Ok(usize::from(first));
        }

        let count = usize::from(first & 0x7F);
        if count == 0 || count > 2 {
            return Err(Error::Decode(format!("unsupported {what} length form")));
        }
        let octets = self
            .data
            .get(self.pos..self.pos + count)
            .ok_or_else(|| Error::Decode(format!("truncated {what} length")))?;
        self.pos += count;

        let len = octets
            .iter()
            .fold(0usize, |acc, &octet| (acc << 8) | usize::from(octet));
        if len < 0x80 || octets[0] == 0 {
            return Err(Error::Decode(format!("non-minimal {what} length")));
        }
        Ok(len)
    }

    fn finish(&self, what: &str) -> Result<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(Error::Decode(format!(
                "{} trailing bytes after {what}",
                self.data.len() - self.pos
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::SigningKey;
    use k256::pkcs8::EncodePublicKey;

    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[0x11; 32]).unwrap()
    }

    #[test]
    fn decode_signature_simple() {
        let der = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02];
        let sig = decode_signature(&der).unwrap();

        assert_eq!(sig.r, U256::from(1));
        assert_eq!(sig.s, U256::from(2));
    }

    #[test]
    fn decode_signature_with_leading_zero() {
        let der = [0x30, 0x08, 0x02, 0x02, 0x00, 0x80, 0x02, 0x02, 0x00, 0x90];
        let sig = decode_signature(&der).unwrap();

        assert_eq!(sig.r, U256::from(0x80));
        assert_eq!(sig.s, U256::from(0x90));
    }

    #[test]
    fn decode_signature_from_k256() {
        let digest = [0x42u8; 32];
        let (signature, _) = test_key().sign_prehash_recoverable(&digest).unwrap();
        let der = signature.to_der();

        let decoded = decode_signature(der.as_bytes()).unwrap();
        let (r, s) = signature.split_bytes();
        assert_eq!(decoded.r, U256::from_be_slice(&r));
        assert_eq!(decoded.s, U256::from_be_slice(&s));
    }

    #[test]
    fn decode_signature_invalid_tag() {
        let der = [0x31, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02];
        assert!(matches!(decode_signature(&der), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_signature_truncated() {
        let der = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02];
        assert!(matches!(decode_signature(&der), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_signature_missing_s() {
        let der = [0x30, 0x03, 0x02, 0x01, 0x01];
        assert!(matches!(decode_signature(&der), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_signature_trailing_bytes() {
        let der = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02, 0x00];
        assert!(matches!(decode_signature(&der), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_signature_rejects_negative_and_zero() {
        let negative = [0x30, 0x06, 0x02, 0x01, 0x81, 0x02, 0x01, 0x02];
        assert!(matches!(decode_signature(&negative), Err(Error::Decode(_))));

        let zero = [0x30, 0x06, 0x02, 0x01, 0x00, 0x02, 0x01, 0x02];
        assert!(matches!(decode_signature(&zero), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_signature_rejects_scalar_above_order() {
        let mut der = vec![0x30, 0x26, 0x02, 0x21, 0x00];
        der.extend_from_slice(&SECP256K1_N.to_be_bytes::<32>());
        der.extend_from_slice(&[0x02, 0x01, 0x01]);

        let err = decode_signature(&der).unwrap_err();
        assert!(err.to_string().contains("r out of range"));
    }

    #[test]
    fn decode_signature_rejects_oversized_integer() {
        let mut der = vec![0x30, 0x27, 0x02, 0x22, 0x01];
        der.extend_from_slice(&[0u8; 33]);
        der.extend_from_slice(&[0x02, 0x01, 0x01]);

        let err = decode_signature(&der).unwrap_err();
        assert!(err.to_string().contains("exceeds 256 bits"));
    }

    #[test]
    fn decode_public_key_from_k256() {
        let key = test_key();
        let der = key.verifying_key().to_public_key_der().unwrap();

        let point = decode_public_key(der.as_bytes()).unwrap();
        let expected = key.verifying_key().to_encoded_point(false);
        assert_eq!(&point[..], expected.as_bytes());
        assert_eq!(point[0], 0x04);
    }

    #[test]
    fn decode_public_key_missing_bit_string() {
        let der = [
            0x30, 0x10, 0x30, 0x0E, 0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01, 0x06,
            0x03, 0x2B, 0x81, 0x04,
        ];
        assert!(matches!(decode_public_key(&der), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_public_key_rejects_other_curve() {
        let key = test_key();
        let mut der = key
            .verifying_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();
        // Last byte of the secp256k1 OID (0x0A) sits right before the bit string.
        let curve_end = der.iter().position(|&b| b == tag::BIT_STRING).unwrap() - 1;
        der[curve_end] = 0x22;

        let err = decode_public_key(&der).unwrap_err();
        assert!(err.to_string().contains("secp256k1"));
    }

    #[test]
    fn decode_public_key_rejects_compressed_point() {
        let key = test_key();
        let compressed = key.verifying_key().to_encoded_point(true);

        let mut bit_string = vec![0x00];
        bit_string.extend_from_slice(compressed.as_bytes());
        let mut spki = vec![
            0x30, 0x10, 0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01, 0x06, 0x05, 0x2B,
            0x81, 0x04, 0x00, 0x0A, tag::BIT_STRING,
        ];
        spki.push(bit_string.len() as u8);
        spki.extend_from_slice(&bit_string);
        let mut der = vec![tag::SEQUENCE, spki.len() as u8];
        der.extend_from_slice(&spki);

        let err = decode_public_key(&der).unwrap_err();
        assert!(err.to_string().contains("uncompressed point"));
    }

    #[test]
    fn reader_long_form_length() {
        let mut data = vec![tag::SEQUENCE, 0x81, 0x80];
        data.extend_from_slice(&[0xAB; 0x80]);

        let mut reader = DerReader::new(&data);
        let contents = reader.read_element(tag::SEQUENCE, "blob").unwrap();
        assert_eq!(contents.len(), 0x80);
        assert!(reader.finish("blob").is_ok());
    }

    #[test]
    fn reader_rejects_non_minimal_length() {
        let data = [tag::SEQUENCE, 0x81, 0x01, 0x00];
        let mut reader = DerReader::new(&data);
        assert!(reader.read_element(tag::SEQUENCE, "blob").is_err());
    }
}
