//! Hash algorithms supported by the signature service

use crate::asn1::AlgorithmIdentifier;
use crate::oids;
use digest::Digest;
use serde::{Deserialize, Serialize};

/// Supported hash algorithms
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    SHA1,
    SHA2_224,
    SHA2_256,
    SHA2_384,
    SHA2_512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        Self::SHA1,
        Self::SHA2_224,
        Self::SHA2_256,
        Self::SHA2_384,
        Self::SHA2_512,
    ];

    pub fn digest(self, msg: &[u8]) -> Vec<u8> {
        match self {
            Self::SHA1 => sha1::Sha1::digest(msg).as_slice().to_vec(),
            Self::SHA2_224 => sha2::Sha224::digest(msg).as_slice().to_vec(),
            Self::SHA2_256 => sha2::Sha256::digest(msg).as_slice().to_vec(),
            Self::SHA2_384 => sha2::Sha384::digest(msg).as_slice().to_vec(),
            Self::SHA2_512 => sha2::Sha512::digest(msg).as_slice().to_vec(),
        }
    }

    /// Digest size in bytes
    pub fn output_size(self) -> usize {
        match self {
            Self::SHA1 => 20,
            Self::SHA2_224 => 28,
            Self::SHA2_256 => 32,
            Self::SHA2_384 => 48,
            Self::SHA2_512 => 64,
        }
    }

    pub fn oid_str(self) -> &'static str {
        match self {
            Self::SHA1 => oids::SHA1,
            Self::SHA2_224 => oids::SHA224,
            Self::SHA2_256 => oids::SHA256,
            Self::SHA2_384 => oids::SHA384,
            Self::SHA2_512 => oids::SHA512,
        }
    }

    pub fn oid(self) -> oid::ObjectIdentifier {
        match self {
            Self::SHA1 => oids::sha1(),
            Self::SHA2_224 => oids::sha224(),
            Self::SHA2_256 => oids::sha256(),
            Self::SHA2_384 => oids::sha384(),
            Self::SHA2_512 => oids::sha512(),
        }
    }

    pub fn from_oid(oid: &oid::ObjectIdentifier) -> Option<Self> {
        let oid: String = oid.into();
        Self::ALL.into_iter().find(|hash| hash.oid_str() == oid)
    }

    /// XML-DSig digest method URI
    pub fn xml_uri(self) -> &'static str {
        match self {
            Self::SHA1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            Self::SHA2_224 => "http://www.w3.org/2001/04/xmldsig-more#sha224",
            Self::SHA2_256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            Self::SHA2_384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            Self::SHA2_512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    pub fn from_xml_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hash| hash.xml_uri() == uri)
    }

    /// Algorithm identifier as used in CMS structures.
    ///
    /// SHA-1 carries an explicit NULL parameter, the SHA-2 family has absent parameters (RFC 5754).
    pub fn algorithm_identifier(self) -> AlgorithmIdentifier {
        match self {
            Self::SHA1 => AlgorithmIdentifier::new_with_null_parameters(self.oid()),
            _ => AlgorithmIdentifier::new_without_parameters(self.oid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HashAlgorithm::SHA1)]
    #[case(HashAlgorithm::SHA2_224)]
    #[case(HashAlgorithm::SHA2_256)]
    #[case(HashAlgorithm::SHA2_384)]
    #[case(HashAlgorithm::SHA2_512)]
    fn digest_has_declared_size(#[case] hash: HashAlgorithm) {
        assert_eq!(hash.digest(b"abc").len(), hash.output_size());
        assert_eq!(HashAlgorithm::from_xml_uri(hash.xml_uri()), Some(hash));
        assert_eq!(HashAlgorithm::from_oid(&hash.oid()), Some(hash));
    }

    #[test]
    fn sha256_known_answer() {
        assert_eq!(
            hex::encode(HashAlgorithm::SHA2_256.digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unknown_uri() {
        assert_eq!(HashAlgorithm::from_xml_uri("http://www.w3.org/2001/04/xmldsig-more#md5"), None);
    }
}
