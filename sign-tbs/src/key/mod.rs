//! Wrappers around RSA and EC key material providing an easy to use API

pub(crate) mod ec;

#[cfg(feature = "key_provider")]
pub mod provider;

use crate::asn1::{self, AlgorithmIdentifier, Asn1Error};
use crate::oids;
use crate::pem::{parse_pem, Pem, PemError};
use crate::signature::KeyType;

use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

pub use ec::EcCurve;

#[derive(Debug, Error)]
pub enum KeyError {
    /// ASN1 error
    #[error(transparent)]
    Asn1(#[from] Asn1Error),

    /// RSA error
    #[error("RSA error: {context}")]
    Rsa { context: String },

    /// EC error
    #[error("EC error: {context}")]
    EC { context: String },

    /// invalid PEM label error
    #[error("invalid PEM label: {label}")]
    InvalidPemLabel { label: String },

    /// unsupported algorithm
    #[error("unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// invalid PEM provided
    #[error("invalid PEM provided: {source}")]
    Pem { source: PemError },
}

impl KeyError {
    fn ec(context: impl fmt::Display) -> Self {
        Self::EC {
            context: context.to_string(),
        }
    }

    fn rsa(context: impl fmt::Display) -> Self {
        Self::Rsa {
            context: context.to_string(),
        }
    }
}

impl From<rsa::errors::Error> for KeyError {
    fn from(e: rsa::errors::Error) -> Self {
        Self::rsa(e)
    }
}

impl From<PemError> for KeyError {
    fn from(e: PemError) -> Self {
        Self::Pem { source: e }
    }
}

fn ec_curve_from_parameters(algorithm: &AlgorithmIdentifier) -> Result<EcCurve, KeyError> {
    let parameters = algorithm
        .parameters()
        .ok_or_else(|| KeyError::ec("EC algorithm identifier without named curve"))?;
    let curve_oid: String = asn1::parse_oid(parameters, "EC named curve")?.into();

    EcCurve::from_oid_str(&curve_oid).ok_or(KeyError::UnsupportedAlgorithm {
        algorithm: format!("EC curve with oid `{curve_oid}`"),
    })
}

// === private key === //

const PRIVATE_KEY_PEM_LABEL: &str = "PRIVATE KEY";
const RSA_PRIVATE_KEY_PEM_LABEL: &str = "RSA PRIVATE KEY";

pub(crate) enum PrivateKeyKind {
    Rsa(Box<RsaPrivateKey>),
    EcP256(p256::SecretKey),
    EcP384(p384::SecretKey),
}

pub struct PrivateKey {
    kind: PrivateKeyKind,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key_type", &self.key_type())
            .field("curve", &self.ec_curve())
            .finish_non_exhaustive()
    }
}

impl From<RsaPrivateKey> for PrivateKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self {
            kind: PrivateKeyKind::Rsa(Box::new(key)),
        }
    }
}

impl PrivateKey {
    pub fn from_pem(pem: &Pem) -> Result<Self, KeyError> {
        match pem.label() {
            PRIVATE_KEY_PEM_LABEL => Self::from_pkcs8(pem.data()),
            RSA_PRIVATE_KEY_PEM_LABEL => Self::from_rsa_der(pem.data()),
            _ => Err(KeyError::InvalidPemLabel {
                label: pem.label().to_owned(),
            }),
        }
    }

    pub fn from_pem_str(pem_str: &str) -> Result<Self, KeyError> {
        let pem = parse_pem(pem_str)?;
        let label = pem.label().to_owned();
        let der = Zeroizing::new(pem.into_data().into_owned());

        match label.as_str() {
            PRIVATE_KEY_PEM_LABEL => Self::from_pkcs8(der.as_slice()),
            RSA_PRIVATE_KEY_PEM_LABEL => Self::from_rsa_der(der.as_slice()),
            _ => Err(KeyError::InvalidPemLabel { label }),
        }
    }

    /// Decodes a PKCS#8 `PrivateKeyInfo` holding an RSA or a NIST P-256/P-384 key.
    pub fn from_pkcs8<T: ?Sized + AsRef<[u8]>>(pkcs8: &T) -> Result<Self, KeyError> {
        use p256::pkcs8::DecodePrivateKey as _;
        use rsa::pkcs8::DecodePrivateKey as _;

        let pkcs8 = pkcs8.as_ref();

        // PrivateKeyInfo ::= SEQUENCE { version, privateKeyAlgorithm, privateKey, ... }
        let elements = asn1::parse_sequence(pkcs8, "private key info")?;
        let algorithm = elements
            .get(1)
            .ok_or_else(|| Asn1Error::invalid("private key info", "missing private key algorithm"))?;
        let algorithm = AlgorithmIdentifier::from_der(algorithm)?;

        let kind = match algorithm.oid_string().as_str() {
            oids::RSA_ENCRYPTION => {
                PrivateKeyKind::Rsa(Box::new(RsaPrivateKey::from_pkcs8_der(pkcs8).map_err(KeyError::rsa)?))
            }
            oids::EC_PUBLIC_KEY => match ec_curve_from_parameters(&algorithm)? {
                EcCurve::NistP256 => PrivateKeyKind::EcP256(p256::SecretKey::from_pkcs8_der(pkcs8).map_err(KeyError::ec)?),
                EcCurve::NistP384 => PrivateKeyKind::EcP384(p384::SecretKey::from_pkcs8_der(pkcs8).map_err(KeyError::ec)?),
            },
            unsupported => {
                return Err(KeyError::UnsupportedAlgorithm {
                    algorithm: format!("private key with oid `{unsupported}`"),
                })
            }
        };

        Ok(Self { kind })
    }

    /// Decodes a PKCS#1 `RSAPrivateKey`.
    pub fn from_rsa_der<T: ?Sized + AsRef<[u8]>>(der: &T) -> Result<Self, KeyError> {
        use rsa::pkcs1::DecodeRsaPrivateKey as _;

        let key = RsaPrivateKey::from_pkcs1_der(der.as_ref()).map_err(KeyError::rsa)?;
        Ok(Self::from(key))
    }

    /// **Beware**: this is insanely slow in debug builds.
    pub fn generate_rsa(bits: usize) -> Result<Self, KeyError> {
        use rand::rngs::OsRng;

        let key = RsaPrivateKey::new(&mut OsRng, bits)?;
        Ok(Self::from(key))
    }

    /// Generates new ec key pair with specified supported curve.
    pub fn generate_ec(curve: EcCurve) -> Self {
        use rand::rngs::OsRng;

        let kind = match curve {
            EcCurve::NistP256 => PrivateKeyKind::EcP256(p256::SecretKey::random(&mut OsRng)),
            EcCurve::NistP384 => PrivateKeyKind::EcP384(p384::SecretKey::random(&mut OsRng)),
        };

        Self { kind }
    }

    pub fn key_type(&self) -> KeyType {
        match self.kind {
            PrivateKeyKind::Rsa(_) => KeyType::Rsa,
            PrivateKeyKind::EcP256(_) | PrivateKeyKind::EcP384(_) => KeyType::Ec,
        }
    }

    pub fn ec_curve(&self) -> Option<EcCurve> {
        match self.kind {
            PrivateKeyKind::Rsa(_) => None,
            PrivateKeyKind::EcP256(_) => Some(EcCurve::NistP256),
            PrivateKeyKind::EcP384(_) => Some(EcCurve::NistP384),
        }
    }

    pub fn to_public_key(&self) -> PublicKey {
        let kind = match &self.kind {
            PrivateKeyKind::Rsa(key) => PublicKeyKind::Rsa(key.to_public_key()),
            PrivateKeyKind::EcP256(key) => PublicKeyKind::EcP256(key.public_key()),
            PrivateKeyKind::EcP384(key) => PublicKeyKind::EcP384(key.public_key()),
        };

        PublicKey { kind }
    }

    pub(crate) fn as_kind(&self) -> &PrivateKeyKind {
        &self.kind
    }
}

// === public key === //

const PUBLIC_KEY_PEM_LABEL: &str = "PUBLIC KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PublicKeyKind {
    Rsa(RsaPublicKey),
    EcP256(p256::PublicKey),
    EcP384(p384::PublicKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    kind: PublicKeyKind,
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self {
            kind: PublicKeyKind::Rsa(key),
        }
    }
}

impl PublicKey {
    pub fn from_pem(pem: &Pem) -> Result<Self, KeyError> {
        match pem.label() {
            PUBLIC_KEY_PEM_LABEL => Self::from_der(pem.data()),
            _ => Err(KeyError::InvalidPemLabel {
                label: pem.label().to_owned(),
            }),
        }
    }

    pub fn from_pem_str(pem_str: &str) -> Result<Self, KeyError> {
        let pem = parse_pem(pem_str)?;
        Self::from_pem(&pem)
    }

    /// Decodes a `SubjectPublicKeyInfo`.
    pub fn from_der<T: ?Sized + AsRef<[u8]>>(der: &T) -> Result<Self, KeyError> {
        use p256::pkcs8::DecodePublicKey as _;
        use rsa::pkcs8::DecodePublicKey as _;

        let der = der.as_ref();

        // SubjectPublicKeyInfo ::= SEQUENCE { algorithm, subjectPublicKey BIT STRING }
        let elements = asn1::parse_sequence(der, "subject public key info")?;
        let algorithm = elements
            .first()
            .ok_or_else(|| Asn1Error::invalid("subject public key info", "missing algorithm"))?;
        let algorithm = AlgorithmIdentifier::from_der(algorithm)?;

        let kind = match algorithm.oid_string().as_str() {
            oids::RSA_ENCRYPTION => PublicKeyKind::Rsa(RsaPublicKey::from_public_key_der(der).map_err(KeyError::rsa)?),
            oids::EC_PUBLIC_KEY => match ec_curve_from_parameters(&algorithm)? {
                EcCurve::NistP256 => PublicKeyKind::EcP256(p256::PublicKey::from_public_key_der(der).map_err(KeyError::ec)?),
                EcCurve::NistP384 => PublicKeyKind::EcP384(p384::PublicKey::from_public_key_der(der).map_err(KeyError::ec)?),
            },
            unsupported => {
                return Err(KeyError::UnsupportedAlgorithm {
                    algorithm: format!("public key with oid `{unsupported}`"),
                })
            }
        };

        Ok(Self { kind })
    }

    pub fn key_type(&self) -> KeyType {
        match self.kind {
            PublicKeyKind::Rsa(_) => KeyType::Rsa,
            PublicKeyKind::EcP256(_) | PublicKeyKind::EcP384(_) => KeyType::Ec,
        }
    }

    pub fn ec_curve(&self) -> Option<EcCurve> {
        match self.kind {
            PublicKeyKind::Rsa(_) => None,
            PublicKeyKind::EcP256(_) => Some(EcCurve::NistP256),
            PublicKeyKind::EcP384(_) => Some(EcCurve::NistP384),
        }
    }

    pub(crate) fn as_kind(&self) -> &PublicKeyKind {
        &self.kind
    }
}
