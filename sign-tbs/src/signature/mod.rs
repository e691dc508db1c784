//! Signature algorithms, value codecs and raw cryptographic primitives

pub mod crypto;
pub mod ecdsa;
pub mod pkcs1;

use crate::asn1::AlgorithmIdentifier;
use crate::hash::HashAlgorithm;
use crate::oids;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Rsa,
    Ec,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Ec => write!(f, "EC"),
        }
    }
}

/// A signature algorithm as registered with the service.
///
/// Identified by its XML-DSig URI. The CMS object identifier is optional since some registered
/// algorithms are only usable for XML signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureAlgorithm {
    uri: String,
    key_type: KeyType,
    digest: HashAlgorithm,
    order: u32,
    oid: Option<String>,
}

impl SignatureAlgorithm {
    pub fn new(uri: impl Into<String>, key_type: KeyType, digest: HashAlgorithm, order: u32) -> Self {
        Self {
            uri: uri.into(),
            key_type,
            digest,
            order,
            oid: None,
        }
    }

    pub fn with_oid(mut self, oid: impl Into<String>) -> Self {
        self.oid = Some(oid.into());
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn digest(&self) -> HashAlgorithm {
        self.digest
    }

    /// Preference order, lower is preferred.
    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn oid(&self) -> Option<&str> {
        self.oid.as_deref()
    }

    /// CMS `signatureAlgorithm` identifier.
    ///
    /// RSA algorithms carry NULL parameters (RFC 4055), ECDSA algorithms none (RFC 5758).
    pub fn algorithm_identifier(&self) -> Option<AlgorithmIdentifier> {
        let oid = oid::ObjectIdentifier::try_from(self.oid.as_deref()?).ok()?;
        Some(match self.key_type {
            KeyType::Rsa => AlgorithmIdentifier::new_with_null_parameters(oid),
            KeyType::Ec => AlgorithmIdentifier::new_without_parameters(oid),
        })
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Read-only lookup of the signature algorithms known to the service
pub trait AlgorithmRegistry {
    fn algorithms(&self) -> &[SignatureAlgorithm];

    fn by_uri(&self, uri: &str) -> Option<&SignatureAlgorithm> {
        self.algorithms().iter().find(|algorithm| algorithm.uri() == uri)
    }

    fn by_oid(&self, oid: &str) -> Option<&SignatureAlgorithm> {
        self.algorithms().iter().find(|algorithm| algorithm.oid() == Some(oid))
    }
}

/// Lowest order algorithm registered for the digest and key type.
///
/// `None` means the service is misconfigured for this combination.
pub fn resolve_signature_algorithm(
    digest: HashAlgorithm,
    key_type: KeyType,
    registry: &dyn AlgorithmRegistry,
) -> Option<SignatureAlgorithm> {
    registry
        .algorithms()
        .iter()
        .filter(|algorithm| algorithm.digest() == digest && algorithm.key_type() == key_type)
        .min_by_key(|algorithm| algorithm.order())
        .cloned()
}

/// RSA PKCS#1 v1.5 and ECDSA algorithms over SHA-1 and SHA-2
#[derive(Debug, Clone)]
pub struct DefaultAlgorithmRegistry {
    algorithms: Vec<SignatureAlgorithm>,
}

impl DefaultAlgorithmRegistry {
    pub fn new() -> Self {
        const XMLDSIG_MORE: &str = "http://www.w3.org/2001/04/xmldsig-more#";

        let entries = [
            (KeyType::Rsa, HashAlgorithm::SHA2_256, "rsa-sha256", oids::SHA256_WITH_RSA_ENCRYPTION),
            (KeyType::Rsa, HashAlgorithm::SHA2_384, "rsa-sha384", oids::SHA384_WITH_RSA_ENCRYPTION),
            (KeyType::Rsa, HashAlgorithm::SHA2_512, "rsa-sha512", oids::SHA512_WITH_RSA_ENCRYPTION),
            (KeyType::Rsa, HashAlgorithm::SHA2_224, "rsa-sha224", oids::SHA224_WITH_RSA_ENCRYPTION),
            (KeyType::Ec, HashAlgorithm::SHA2_256, "ecdsa-sha256", oids::ECDSA_WITH_SHA256),
            (KeyType::Ec, HashAlgorithm::SHA2_384, "ecdsa-sha384", oids::ECDSA_WITH_SHA384),
            (KeyType::Ec, HashAlgorithm::SHA2_512, "ecdsa-sha512", oids::ECDSA_WITH_SHA512),
            (KeyType::Ec, HashAlgorithm::SHA2_224, "ecdsa-sha224", oids::ECDSA_WITH_SHA224),
            (KeyType::Ec, HashAlgorithm::SHA1, "ecdsa-sha1", oids::ECDSA_WITH_SHA1),
        ];

        let mut algorithms: Vec<SignatureAlgorithm> = entries
            .into_iter()
            .zip(1..)
            .map(|((key_type, digest, name, oid), order)| {
                SignatureAlgorithm::new(format!("{XMLDSIG_MORE}{name}"), key_type, digest, order).with_oid(oid)
            })
            .collect();

        // the legacy SHA-1 RSA URI lives in the original XML-DSig namespace
        algorithms.push(
            SignatureAlgorithm::new(
                "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
                KeyType::Rsa,
                HashAlgorithm::SHA1,
                100,
            )
            .with_oid(oids::SHA1_WITH_RSA_ENCRYPTION),
        );

        Self { algorithms }
    }
}

impl Default for DefaultAlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmRegistry for DefaultAlgorithmRegistry {
    fn algorithms(&self) -> &[SignatureAlgorithm] {
        &self.algorithms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct TestRegistry(Vec<SignatureAlgorithm>);

    impl AlgorithmRegistry for TestRegistry {
        fn algorithms(&self) -> &[SignatureAlgorithm] {
            &self.0
        }
    }

    #[rstest]
    #[case(HashAlgorithm::SHA2_256, KeyType::Rsa, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")]
    #[case(HashAlgorithm::SHA2_384, KeyType::Ec, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384")]
    #[case(HashAlgorithm::SHA1, KeyType::Rsa, "http://www.w3.org/2000/09/xmldsig#rsa-sha1")]
    fn resolve_default(#[case] digest: HashAlgorithm, #[case] key_type: KeyType, #[case] expected_uri: &str) {
        let registry = DefaultAlgorithmRegistry::new();
        let algorithm = resolve_signature_algorithm(digest, key_type, &registry).unwrap();
        assert_eq!(algorithm.uri(), expected_uri);
        assert_eq!(registry.by_uri(expected_uri), Some(&algorithm));
    }

    #[test]
    fn resolve_prefers_lowest_order() {
        let registry = TestRegistry(vec![
            SignatureAlgorithm::new("urn:test:pss", KeyType::Rsa, HashAlgorithm::SHA2_256, 20),
            SignatureAlgorithm::new("urn:test:pkcs1", KeyType::Rsa, HashAlgorithm::SHA2_256, 10),
            SignatureAlgorithm::new("urn:test:ec", KeyType::Ec, HashAlgorithm::SHA2_256, 1),
        ]);

        let algorithm = resolve_signature_algorithm(HashAlgorithm::SHA2_256, KeyType::Rsa, &registry).unwrap();
        assert_eq!(algorithm.uri(), "urn:test:pkcs1");
    }

    #[test]
    fn resolve_none() {
        let registry = TestRegistry(Vec::new());
        assert!(resolve_signature_algorithm(HashAlgorithm::SHA2_256, KeyType::Ec, &registry).is_none());
    }

    #[test]
    fn algorithm_identifier_parameters() {
        let registry = DefaultAlgorithmRegistry::new();

        let rsa = registry.by_oid(oids::SHA256_WITH_RSA_ENCRYPTION).unwrap();
        assert_eq!(
            hex::encode(rsa.algorithm_identifier().unwrap().to_der().unwrap()),
            "300d06092a864886f70d01010b0500"
        );

        let ec = registry.by_oid(oids::ECDSA_WITH_SHA256).unwrap();
        assert_eq!(
            hex::encode(ec.algorithm_identifier().unwrap().to_der().unwrap()),
            "300a06082a8648ce3d040302"
        );
    }

    #[test]
    fn no_oid_no_algorithm_identifier() {
        let algorithm = SignatureAlgorithm::new("urn:test", KeyType::Ec, HashAlgorithm::SHA2_256, 1);
        assert!(algorithm.algorithm_identifier().is_none());
    }
}
