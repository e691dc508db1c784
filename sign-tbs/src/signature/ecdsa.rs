//! ECDSA signature value codec.
//!
//! CMS carries ECDSA signatures as DER `SEQUENCE { r INTEGER, s INTEGER }` while XML-DSig uses the
//! fixed width concatenation `r || s`. Both encodings of the same signature must convert losslessly.

use crate::asn1::{self, Asn1Error};
use num_bigint_dig::BigUint;
use thiserror::Error;

/// Key lengths in bits for which a fixed width block size can be derived
pub const DEFAULT_SUPPORTED_KEY_LENGTHS: [usize; 5] = [160, 224, 256, 384, 521];

// r and s may each be up to two bytes shorter than the block when their leading bytes are zero
const MAX_BLOCK_SLACK: usize = 4;

#[derive(Debug, Error)]
pub enum EcdsaCodecError {
    /// signature value is not a valid ECDSA signature
    #[error("malformed ECDSA signature: {context}")]
    MalformedSignature { context: String },

    /// no supported key length fits r and s
    #[error("unsupported key length: r ({r_len} bytes) and s ({s_len} bytes) fit none of the supported key lengths {supported:?}")]
    UnsupportedKeyLength {
        r_len: usize,
        s_len: usize,
        supported: Vec<usize>,
    },
}

impl EcdsaCodecError {
    fn malformed(context: impl Into<String>) -> Self {
        Self::MalformedSignature {
            context: context.into(),
        }
    }
}

impl From<Asn1Error> for EcdsaCodecError {
    fn from(e: Asn1Error) -> Self {
        Self::malformed(e.to_string())
    }
}

/// The integer pair of an ECDSA signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EcdsaSigValue {
    r: BigUint,
    s: BigUint,
}

impl EcdsaSigValue {
    pub fn new(r: BigUint, s: BigUint) -> Self {
        Self { r, s }
    }

    /// Builds the pair from unsigned big-endian magnitudes.
    pub fn from_bytes_be(r: &[u8], s: &[u8]) -> Self {
        Self::new(BigUint::from_bytes_be(r), BigUint::from_bytes_be(s))
    }

    pub fn r(&self) -> &BigUint {
        &self.r
    }

    pub fn s(&self) -> &BigUint {
        &self.s
    }

    /// DER `SEQUENCE { INTEGER r, INTEGER s }`
    pub fn to_der(&self) -> Result<Vec<u8>, EcdsaCodecError> {
        let r = asn1::der_unsigned_integer(&self.r.to_bytes_be())?;
        let s = asn1::der_unsigned_integer(&self.s.to_bytes_be())?;
        Ok(asn1::der_sequence(&[r, s], "ECDSA signature value")?)
    }

    /// Decodes a DER `SEQUENCE` holding exactly two non-negative INTEGERs.
    pub fn from_der(der: &[u8]) -> Result<Self, EcdsaCodecError> {
        const ELEMENT: &str = "ECDSA signature value";

        let elements = asn1::parse_sequence(der, ELEMENT)?;
        let [r, s] = elements.as_slice() else {
            return Err(EcdsaCodecError::malformed(format!(
                "expected 2 integers, got {} elements",
                elements.len()
            )));
        };

        Ok(Self::new(parse_component(r, "r")?, parse_component(s, "s")?))
    }

    /// Splits `r || s` exactly in half, each half read as an unsigned big-endian integer.
    pub fn from_fixed_width(concatenated: &[u8]) -> Result<Self, EcdsaCodecError> {
        if concatenated.is_empty() || concatenated.len() % 2 != 0 {
            return Err(EcdsaCodecError::malformed(format!(
                "concatenated r and s must have a non-zero even length, got {} bytes",
                concatenated.len()
            )));
        }

        let (r, s) = concatenated.split_at(concatenated.len() / 2);
        Ok(Self::from_bytes_be(r, s))
    }
}

fn parse_component(der: &[u8], name: &str) -> Result<BigUint, EcdsaCodecError> {
    let content = asn1::parse_integer(der, "ECDSA signature component")?;

    if content[0] & 0x80 != 0 {
        return Err(EcdsaCodecError::malformed(format!("{name} is negative")));
    }

    Ok(BigUint::from_bytes_be(&content))
}

/// Number of magnitude bytes, a zero value having no data bytes.
fn data_len(value: &BigUint) -> usize {
    if value.bits() == 0 {
        0
    } else {
        value.to_bytes_be().len()
    }
}

/// Conversion between the DER and the fixed width encodings of ECDSA signature values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignatureCodec {
    supported_key_lengths: Vec<usize>,
}

impl Default for EcdsaSignatureCodec {
    fn default() -> Self {
        Self {
            supported_key_lengths: DEFAULT_SUPPORTED_KEY_LENGTHS.to_vec(),
        }
    }
}

impl EcdsaSignatureCodec {
    /// Codec selecting block sizes from the given key lengths in bits.
    pub fn with_supported_key_lengths(mut supported_key_lengths: Vec<usize>) -> Self {
        supported_key_lengths.sort_unstable();
        supported_key_lengths.dedup();
        Self { supported_key_lengths }
    }

    pub fn supported_key_lengths(&self) -> &[usize] {
        &self.supported_key_lengths
    }

    pub fn encode_der(&self, signature: &EcdsaSigValue) -> Result<Vec<u8>, EcdsaCodecError> {
        signature.to_der()
    }

    pub fn decode_der(&self, der: &[u8]) -> Result<EcdsaSigValue, EcdsaCodecError> {
        EcdsaSigValue::from_der(der)
    }

    pub fn from_fixed_width(&self, concatenated: &[u8]) -> Result<EcdsaSigValue, EcdsaCodecError> {
        EcdsaSigValue::from_fixed_width(concatenated)
    }

    /// Size in bytes of each of the two halves of the fixed width encoding.
    ///
    /// The first key length whose byte size holds both integers, with less than
    /// four bytes of combined leading zero slack, is selected.
    pub fn block_size(&self, signature: &EcdsaSigValue) -> Result<usize, EcdsaCodecError> {
        let r_len = data_len(&signature.r);
        let s_len = data_len(&signature.s);

        self.supported_key_lengths
            .iter()
            .map(|bits| (bits + 7) / 8)
            .filter(|byte_len| *byte_len >= r_len && *byte_len >= s_len)
            .find(|byte_len| 2 * byte_len - (r_len + s_len) < MAX_BLOCK_SLACK)
            .ok_or_else(|| EcdsaCodecError::UnsupportedKeyLength {
                r_len,
                s_len,
                supported: self.supported_key_lengths.clone(),
            })
    }

    /// Big-endian `r || s`, each left padded with zeros to the block size.
    pub fn to_fixed_width(&self, signature: &EcdsaSigValue) -> Result<Vec<u8>, EcdsaCodecError> {
        let block_size = self.block_size(signature)?;

        let mut concatenated = vec![0; 2 * block_size];
        for (value, block) in [&signature.r, &signature.s]
            .into_iter()
            .zip(concatenated.chunks_exact_mut(block_size))
        {
            if value.bits() == 0 {
                continue;
            }
            let bytes = value.to_bytes_be();
            block[block_size - bytes.len()..].copy_from_slice(&bytes);
        }

        Ok(concatenated)
    }
}
