//! PKCS#1 v1.5 `DigestInfo` (RFC 8017, section 9.2)

use crate::asn1::{self, AlgorithmIdentifier, Asn1Error};
use crate::hash::HashAlgorithm;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Pkcs1Error {
    /// padded digest can't be decoded as a DigestInfo
    #[error("malformed PKCS#1 padding: {context}")]
    MalformedPadding { context: String },

    /// DigestInfo couldn't be encoded
    #[error(transparent)]
    Asn1(#[from] Asn1Error),
}

/// `DigestInfo ::= SEQUENCE { digestAlgorithm AlgorithmIdentifier, digest OCTET STRING }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestInfo {
    pub digest_algorithm: AlgorithmIdentifier,
    pub digest: Vec<u8>,
}

impl DigestInfo {
    /// Uses the NULL parameters encoding required by RFC 8017 for every hash algorithm.
    pub fn new(hash: HashAlgorithm, digest: Vec<u8>) -> Self {
        Self {
            digest_algorithm: AlgorithmIdentifier::new_with_null_parameters(hash.oid()),
            digest,
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>, Pkcs1Error> {
        let algorithm = self.digest_algorithm.to_der()?;
        let digest = asn1::der_octet_string(&self.digest)?;
        Ok(asn1::der_sequence(&[algorithm, digest], "digest info")?)
    }

    pub fn from_der(der: &[u8]) -> Result<Self, Pkcs1Error> {
        const ELEMENT: &str = "digest info";

        let malformed = |e: Asn1Error| Pkcs1Error::MalformedPadding { context: e.to_string() };

        let elements = asn1::parse_sequence(der, ELEMENT).map_err(malformed)?;
        let [algorithm, digest] = elements.as_slice() else {
            return Err(Pkcs1Error::MalformedPadding {
                context: format!("expected 2 elements, got {}", elements.len()),
            });
        };

        Ok(Self {
            digest_algorithm: AlgorithmIdentifier::from_der(algorithm).map_err(malformed)?,
            digest: asn1::parse_octet_string(digest, ELEMENT).map_err(malformed)?,
        })
    }
}

/// DER encoded DigestInfo for `digest`, ready to be padded and signed with a raw RSA operation.
pub fn build_digest_info(hash: HashAlgorithm, digest: &[u8]) -> Result<Vec<u8>, Pkcs1Error> {
    DigestInfo::new(hash, digest.to_vec()).to_der()
}

/// Checks a recovered DigestInfo against the expected digest and hash algorithm.
///
/// A mismatch is reported as `Ok(false)`. Only undecodable input is an error. Algorithms are
/// compared by OID since encoders differ on NULL parameters.
pub fn verify_digest_info(
    padded_digest: &[u8],
    expected_digest: &[u8],
    expected_hash: HashAlgorithm,
) -> Result<bool, Pkcs1Error> {
    let digest_info = DigestInfo::from_der(padded_digest)?;

    if digest_info.digest != expected_digest {
        log::debug!("digest value does not match padded data");
        return Ok(false);
    }

    if *digest_info.digest_algorithm.oid() != expected_hash.oid() {
        log::debug!("hash algorithm in padded data does not match {expected_hash:?}");
        return Ok(false);
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oids;
    use rstest::rstest;

    #[test]
    fn sha256_digest_info_prefix() {
        let digest = HashAlgorithm::SHA2_256.digest(b"hello");
        let der = build_digest_info(HashAlgorithm::SHA2_256, &digest).unwrap();

        // RFC 8017 section 9.2, note 1
        let prefix = hex::decode("3031300d060960864801650304020105000420").unwrap();
        assert_eq!(&der[..prefix.len()], prefix.as_slice());
        assert_eq!(&der[prefix.len()..], digest.as_slice());
    }

    #[rstest]
    #[case(HashAlgorithm::SHA1)]
    #[case(HashAlgorithm::SHA2_384)]
    #[case(HashAlgorithm::SHA2_512)]
    fn verify_matching(#[case] hash: HashAlgorithm) {
        let digest = hash.digest(b"data to be signed");
        let der = build_digest_info(hash, &digest).unwrap();
        assert!(verify_digest_info(&der, &digest, hash).unwrap());
    }

    #[test]
    fn wrong_digest_is_false() {
        let digest = HashAlgorithm::SHA2_256.digest(b"a");
        let der = build_digest_info(HashAlgorithm::SHA2_256, &digest).unwrap();
        let other = HashAlgorithm::SHA2_256.digest(b"b");
        assert!(!verify_digest_info(&der, &other, HashAlgorithm::SHA2_256).unwrap());
    }

    #[test]
    fn wrong_algorithm_is_false() {
        let digest = HashAlgorithm::SHA2_256.digest(b"a");
        let der = build_digest_info(HashAlgorithm::SHA2_256, &digest).unwrap();
        assert!(!verify_digest_info(&der, &digest, HashAlgorithm::SHA2_384).unwrap());
    }

    #[test]
    fn absent_parameters_are_accepted() {
        let digest = HashAlgorithm::SHA2_256.digest(b"a");
        let digest_info = DigestInfo {
            digest_algorithm: AlgorithmIdentifier::new_without_parameters(oids::sha256()),
            digest: digest.clone(),
        };
        let der = digest_info.to_der().unwrap();
        assert!(verify_digest_info(&der, &digest, HashAlgorithm::SHA2_256).unwrap());
    }

    #[rstest]
    #[case::garbage(&[0xDE, 0xAD, 0xBE, 0xEF])]
    #[case::empty_sequence(&[0x30, 0x00])]
    #[case::digest_not_octet_string(&[0x30, 0x0A, 0x30, 0x05, 0x06, 0x03, 0x2B, 0x0E, 0x03, 0x02, 0x01, 0x00])]
    fn structural_failure_is_error(#[case] der: &[u8]) {
        let err = verify_digest_info(der, &[0; 32], HashAlgorithm::SHA2_256).unwrap_err();
        assert!(matches!(err, Pkcs1Error::MalformedPadding { .. }));
    }
}
