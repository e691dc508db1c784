//! Raw public key primitives used once the TBS bytes are prepared.
//!
//! RSA operations work on caller supplied, already padded blocks. ECDSA operations work on digests
//! so that the signing orchestrator controls hashing.

use crate::hash::HashAlgorithm;
use crate::key::{PrivateKey, PrivateKeyKind, PublicKey, PublicKeyKind};
use crate::signature::ecdsa::{EcdsaCodecError, EcdsaSigValue};
use crate::signature::pkcs1::{self, Pkcs1Error};
use crate::signature::{KeyType, SignatureAlgorithm};

use num_bigint_dig::BigUint;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

// minimum length of the 0xFF padding string of an EMSA-PKCS1-v1_5 block
const PKCS1_MIN_PADDING_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA error
    #[error("RSA error: {context}")]
    Rsa { context: String },

    /// EC error
    #[error("EC error: {context}")]
    Ec { context: String },

    /// key doesn't match the requested operation
    #[error("{operation} requires a {expected} key, got a {actual} key")]
    KeyTypeMismatch {
        operation: &'static str,
        expected: KeyType,
        actual: KeyType,
    },

    /// input rejected before any cryptographic operation
    #[error("invalid input for {operation}: {context}")]
    InvalidInput { operation: &'static str, context: String },

    #[error(transparent)]
    EcdsaCodec(#[from] EcdsaCodecError),

    #[error(transparent)]
    Pkcs1(#[from] Pkcs1Error),
}

impl CryptoError {
    fn ec(context: impl fmt::Display) -> Self {
        Self::Ec {
            context: context.to_string(),
        }
    }
}

impl From<rsa::errors::Error> for CryptoError {
    fn from(e: rsa::errors::Error) -> Self {
        Self::Rsa { context: e.to_string() }
    }
}

fn rsa_private_key<'a>(key: &'a PrivateKey, operation: &'static str) -> Result<&'a RsaPrivateKey, CryptoError> {
    match key.as_kind() {
        PrivateKeyKind::Rsa(key) => Ok(key),
        _ => Err(CryptoError::KeyTypeMismatch {
            operation,
            expected: KeyType::Rsa,
            actual: key.key_type(),
        }),
    }
}

fn rsa_public_key<'a>(key: &'a PublicKey, operation: &'static str) -> Result<&'a RsaPublicKey, CryptoError> {
    match key.as_kind() {
        PublicKeyKind::Rsa(key) => Ok(key),
        _ => Err(CryptoError::KeyTypeMismatch {
            operation,
            expected: KeyType::Rsa,
            actual: key.key_type(),
        }),
    }
}

/// Interprets `input` as an integer smaller than the modulus `n`.
fn rsa_representative(input: &[u8], n: &BigUint, operation: &'static str) -> Result<BigUint, CryptoError> {
    let representative = BigUint::from_bytes_be(input);
    if &representative >= n {
        return Err(CryptoError::InvalidInput {
            operation,
            context: "representative out of range of the modulus".to_owned(),
        });
    }
    Ok(representative)
}

/// Left pads the big-endian encoding of `value` to `len` bytes.
fn i2osp(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let bytes = if value.bits() == 0 { &[][..] } else { &bytes[..] };

    let mut output = vec![0; len.saturating_sub(bytes.len())];
    output.extend_from_slice(bytes);
    output
}

/// RSA private key operation over a pre-padded block (RSASP1).
///
/// The exponentiation is blinded, uses the CRT parameters and is checked against the public key.
pub fn rsa_raw_sign(data: &[u8], key: &PrivateKey) -> Result<Vec<u8>, CryptoError> {
    const OPERATION: &str = "RSA raw sign";

    let key = rsa_private_key(key, OPERATION)?;
    let representative = rsa_representative(data, key.n(), OPERATION)?;
    let signature = rsa::hazmat::rsa_decrypt_and_check(key, Some(&mut OsRng), &representative)?;

    Ok(i2osp(&signature, key.size()))
}

/// RSA public key operation (RSAVP1), returning the padded block carried by the signature.
pub fn rsa_raw_verify(signature: &[u8], key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    const OPERATION: &str = "RSA raw verify";

    let key = rsa_public_key(key, OPERATION)?;
    if signature.len() != key.size() {
        return Err(CryptoError::InvalidInput {
            operation: OPERATION,
            context: format!("signature is {} bytes, modulus is {} bytes", signature.len(), key.size()),
        });
    }

    let representative = rsa_representative(signature, key.n(), OPERATION)?;
    let block = representative.modpow(key.e(), key.n());

    Ok(i2osp(&block, key.size()))
}

/// Signs a DER DigestInfo with EMSA-PKCS1-v1_5 (block type 1) padding.
pub fn rsa_sign_digest_info(digest_info: &[u8], key: &PrivateKey) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_private_key(key, "RSA PKCS#1 v1.5 sign")?;
    Ok(key.sign_with_rng(&mut OsRng, Pkcs1v15Sign::new_unprefixed(), digest_info)?)
}

/// Recovers the DigestInfo from an RSA PKCS#1 v1.5 signature by stripping the type 1 padding.
pub fn rsa_recover_digest_info(signature: &[u8], key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let block = rsa_raw_verify(signature, key)?;

    let malformed = |context: &str| Pkcs1Error::MalformedPadding {
        context: context.to_owned(),
    };

    let padded = match block.as_slice() {
        [0x00, 0x01, padded @ ..] => padded,
        _ => return Err(malformed("block type 1 header not found").into()),
    };

    let separator = padded
        .iter()
        .position(|byte| *byte != 0xFF)
        .ok_or_else(|| malformed("separator not found"))?;

    if padded[separator] != 0x00 {
        return Err(malformed("unexpected padding byte").into());
    }

    if separator < PKCS1_MIN_PADDING_LEN {
        return Err(malformed("padding string too short").into());
    }

    Ok(padded[separator + 1..].to_vec())
}

/// Verifies an RSA PKCS#1 v1.5 signature against an already computed digest.
pub fn rsa_verify_digest(
    digest: &[u8],
    signature: &[u8],
    hash: HashAlgorithm,
    key: &PublicKey,
) -> Result<bool, CryptoError> {
    let digest_info = rsa_recover_digest_info(signature, key)?;
    Ok(pkcs1::verify_digest_info(&digest_info, digest, hash)?)
}

/// Hashes `data` with the digest of `algorithm` and signs the result.
pub fn ecdsa_sign(data: &[u8], key: &PrivateKey, algorithm: &SignatureAlgorithm) -> Result<EcdsaSigValue, CryptoError> {
    if algorithm.key_type() != KeyType::Ec {
        return Err(CryptoError::InvalidInput {
            operation: "ECDSA sign",
            context: format!("{algorithm} is not an ECDSA algorithm"),
        });
    }

    ecdsa_sign_digest(&algorithm.digest().digest(data), key)
}

/// Left pads a digest shorter than the curve field with zeros.
///
/// The prehash API rejects digests shorter than half the field size. Leading zeros keep the
/// integer value of the digest, so the signature is the one standard ECDSA produces.
fn field_sized_prehash(digest: &[u8], field_size: usize) -> Cow<'_, [u8]> {
    if digest.len() >= field_size {
        return Cow::Borrowed(digest);
    }

    let mut padded = vec![0; field_size - digest.len()];
    padded.extend_from_slice(digest);
    Cow::Owned(padded)
}

/// Signs a prehashed digest.
///
/// The underlying signer produces a DER signature which is decoded into its integer pair.
pub fn ecdsa_sign_digest(digest: &[u8], key: &PrivateKey) -> Result<EcdsaSigValue, CryptoError> {
    use p256::ecdsa::signature::hazmat::PrehashSigner;

    let field_size = key.ec_curve().map(|curve| curve.field_bytes_size()).ok_or(CryptoError::KeyTypeMismatch {
        operation: "ECDSA sign",
        expected: KeyType::Ec,
        actual: key.key_type(),
    })?;
    let prehash = field_sized_prehash(digest, field_size);

    let der = match key.as_kind() {
        PrivateKeyKind::EcP256(secret) => {
            let signing_key = p256::ecdsa::SigningKey::from(secret);
            let signature: p256::ecdsa::Signature = signing_key.sign_prehash(&prehash).map_err(CryptoError::ec)?;
            signature.to_der().as_bytes().to_vec()
        }
        PrivateKeyKind::EcP384(secret) => {
            let signing_key = p384::ecdsa::SigningKey::from(secret);
            let signature: p384::ecdsa::Signature = signing_key.sign_prehash(&prehash).map_err(CryptoError::ec)?;
            signature.to_der().as_bytes().to_vec()
        }
        PrivateKeyKind::Rsa(_) => {
            return Err(CryptoError::KeyTypeMismatch {
                operation: "ECDSA sign",
                expected: KeyType::Ec,
                actual: KeyType::Rsa,
            })
        }
    };

    Ok(EcdsaSigValue::from_der(&der)?)
}

/// Verifies a signature over `digest` without hashing it again.
///
/// Signatures that can't belong to the key's curve verify as `false`.
pub fn ecdsa_verify_digest(digest: &[u8], signature: &EcdsaSigValue, key: &PublicKey) -> Result<bool, CryptoError> {
    use p256::ecdsa::signature::hazmat::PrehashVerifier;

    let field_size = key.ec_curve().map(|curve| curve.field_bytes_size()).ok_or(CryptoError::KeyTypeMismatch {
        operation: "ECDSA verify",
        expected: KeyType::Ec,
        actual: key.key_type(),
    })?;

    let r = signature.r().to_bytes_be();
    let s = signature.s().to_bytes_be();
    if r.len() > field_size || s.len() > field_size {
        return Ok(false);
    }

    let prehash = field_sized_prehash(digest, field_size);

    let mut fixed = vec![0; 2 * field_size];
    fixed[field_size - r.len()..field_size].copy_from_slice(&r);
    fixed[2 * field_size - s.len()..].copy_from_slice(&s);

    let verified = match key.as_kind() {
        PublicKeyKind::EcP256(public_key) => {
            let Ok(signature) = p256::ecdsa::Signature::from_slice(&fixed) else {
                return Ok(false);
            };
            p256::ecdsa::VerifyingKey::from(public_key)
                .verify_prehash(&prehash, &signature)
                .is_ok()
        }
        PublicKeyKind::EcP384(public_key) => {
            let Ok(signature) = p384::ecdsa::Signature::from_slice(&fixed) else {
                return Ok(false);
            };
            p384::ecdsa::VerifyingKey::from(public_key)
                .verify_prehash(&prehash, &signature)
                .is_ok()
        }
        PublicKeyKind::Rsa(_) => false,
    };

    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::ecdsa::EcdsaSignatureCodec;
    use crate::signature::pkcs1::build_digest_info;
    use crate::signature::{resolve_signature_algorithm, DefaultAlgorithmRegistry};
    use rsa::traits::SignatureScheme as _;
    use rstest::rstest;

    fn rsa_keys() -> (PrivateKey, PublicKey) {
        let private_key = PrivateKey::from_pem_str(sign_tbs_test_data::RSA_2048_PK_1).unwrap();
        let public_key = PublicKey::from_pem_str(sign_tbs_test_data::RSA_2048_PK_1_PUB).unwrap();
        (private_key, public_key)
    }

    #[test]
    fn rsa_raw_roundtrip() {
        let (private_key, public_key) = rsa_keys();

        let mut block = vec![0x00, 0x01];
        block.extend_from_slice(&[0x42; 254]);

        let signature = rsa_raw_sign(&block, &private_key).unwrap();
        assert_eq!(signature.len(), 256);
        assert_eq!(rsa_raw_verify(&signature, &public_key).unwrap(), block);
    }

    #[test]
    fn rsa_raw_sign_rejects_out_of_range_input() {
        let (private_key, _) = rsa_keys();
        let err = rsa_raw_sign(&[0xFF; 256], &private_key).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidInput { .. }));
    }

    #[test]
    fn rsa_digest_info_signature_is_standard_pkcs1() {
        let (private_key, public_key) = rsa_keys();
        let digest = HashAlgorithm::SHA2_256.digest(b"to be signed");
        let digest_info = build_digest_info(HashAlgorithm::SHA2_256, &digest).unwrap();

        let signature = rsa_sign_digest_info(&digest_info, &private_key).unwrap();

        // the rsa crate builds its own DigestInfo prefix and must accept ours
        let rsa_public_key = rsa_public_key(&public_key, "test").unwrap();
        Pkcs1v15Sign::new::<sha2::Sha256>()
            .verify(rsa_public_key, &digest, &signature)
            .unwrap();

        assert_eq!(rsa_recover_digest_info(&signature, &public_key).unwrap(), digest_info);
        assert!(rsa_verify_digest(&digest, &signature, HashAlgorithm::SHA2_256, &public_key).unwrap());
        assert!(!rsa_verify_digest(&digest, &signature, HashAlgorithm::SHA2_384, &public_key).unwrap());
    }

    #[test]
    fn raw_sign_with_manual_padding_matches_pkcs1_signature() {
        let (private_key, _) = rsa_keys();
        let digest = HashAlgorithm::SHA2_512.digest(b"to be signed");
        let digest_info = build_digest_info(HashAlgorithm::SHA2_512, &digest).unwrap();

        let mut block = vec![0x00, 0x01];
        block.resize(256 - digest_info.len() - 1, 0xFF);
        block.push(0x00);
        block.extend_from_slice(&digest_info);

        let raw = rsa_raw_sign(&block, &private_key).unwrap();
        let padded = rsa_sign_digest_info(&digest_info, &private_key).unwrap();
        assert_eq!(raw, padded);
    }

    #[test]
    fn recover_rejects_unpadded_block() {
        let (private_key, public_key) = rsa_keys();
        let signature = rsa_raw_sign(&[0x00, 0x02, 0x11, 0x22], &private_key).unwrap();
        let err = rsa_recover_digest_info(&signature, &public_key).unwrap_err();
        assert!(matches!(err, CryptoError::Pkcs1(Pkcs1Error::MalformedPadding { .. })));
    }

    #[rstest]
    #[case(sign_tbs_test_data::EC_NIST256_PK_1, HashAlgorithm::SHA2_256, 32)]
    #[case(sign_tbs_test_data::EC_NIST384_PK_1, HashAlgorithm::SHA2_384, 48)]
    #[case(sign_tbs_test_data::EC_NIST256_PK_1, HashAlgorithm::SHA2_512, 32)]
    #[case(sign_tbs_test_data::EC_NIST256_PK_1, HashAlgorithm::SHA1, 32)]
    #[case(sign_tbs_test_data::EC_NIST384_PK_1, HashAlgorithm::SHA1, 48)]
    fn ecdsa_sign_then_verify(#[case] pem: &str, #[case] hash: HashAlgorithm, #[case] block_size: usize) {
        let private_key = PrivateKey::from_pem_str(pem).unwrap();
        let public_key = private_key.to_public_key();
        let algorithm = resolve_signature_algorithm(hash, KeyType::Ec, &DefaultAlgorithmRegistry::new()).unwrap();

        let data = b"the quick brown fox";
        let signature = ecdsa_sign(data, &private_key, &algorithm).unwrap();
        assert!(ecdsa_verify_digest(&hash.digest(data), &signature, &public_key).unwrap());
        assert!(!ecdsa_verify_digest(&hash.digest(b"other data"), &signature, &public_key).unwrap());

        // RFC 6979 signatures are deterministic
        assert_eq!(ecdsa_sign(data, &private_key, &algorithm).unwrap(), signature);

        let codec = EcdsaSignatureCodec::default();
        let fixed = codec.to_fixed_width(&signature).unwrap();
        assert_eq!(fixed.len(), 2 * block_size);
        assert_eq!(codec.from_fixed_width(&fixed).unwrap(), signature);
    }

    #[test]
    fn ecdsa_sha1_on_p384_matches_padded_digest() {
        let private_key = PrivateKey::from_pem_str(sign_tbs_test_data::EC_NIST384_PK_1).unwrap();
        let public_key = private_key.to_public_key();
        let algorithm =
            resolve_signature_algorithm(HashAlgorithm::SHA1, KeyType::Ec, &DefaultAlgorithmRegistry::new()).unwrap();
        assert_eq!(algorithm.uri(), "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha1");

        let digest = HashAlgorithm::SHA1.digest(b"data");
        let signature = ecdsa_sign(b"data", &private_key, &algorithm).unwrap();

        let mut padded = vec![0; 48 - digest.len()];
        padded.extend_from_slice(&digest);
        assert_eq!(ecdsa_sign_digest(&padded, &private_key).unwrap(), signature);
        assert!(ecdsa_verify_digest(&digest, &signature, &public_key).unwrap());
        assert!(ecdsa_verify_digest(&padded, &signature, &public_key).unwrap());
    }

    #[test]
    fn ecdsa_sign_with_rsa_key_fails() {
        let (private_key, _) = rsa_keys();
        let err = ecdsa_sign_digest(&[0; 32], &private_key).unwrap_err();
        assert!(matches!(err, CryptoError::KeyTypeMismatch { expected: KeyType::Ec, .. }));
    }

    #[test]
    fn ecdsa_verify_rejects_oversized_components() {
        let public_key = PublicKey::from_pem_str(sign_tbs_test_data::EC_NIST256_PK_1_PUB).unwrap();
        let signature = EcdsaSigValue::from_bytes_be(&[0x01; 33], &[0x01; 32]);
        assert!(!ecdsa_verify_digest(&[0; 32], &signature, &public_key).unwrap());
    }
}
