//! Error taxonomy shared by the TBS processors

use crate::asn1::Asn1Error;
use crate::key::KeyError;
use crate::signature::crypto::CryptoError;
use crate::signature::ecdsa::EcdsaCodecError;
use crate::signature::pkcs1::Pkcs1Error;
use crate::x509::CertificateError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TbsError>;

#[derive(Debug, Error)]
pub enum TbsError {
    /// a required argument is missing, caller defect
    #[error("programming error: {context}")]
    Programming { context: String },

    /// structurally deficient sign task, client correctable
    #[error("invalid request: {context}")]
    InvalidRequest { context: String },

    /// standards or compliance violation
    #[error("signature error: {context}")]
    Signature { context: String },

    /// no processor handles this signature type
    #[error("unsupported signature type: {signature_type}")]
    UnsupportedSignatureType { signature_type: String },
}

impl TbsError {
    pub(crate) fn programming(context: impl Into<String>) -> Self {
        Self::Programming {
            context: context.into(),
        }
    }

    pub(crate) fn invalid_request(context: impl Into<String>) -> Self {
        Self::InvalidRequest {
            context: context.into(),
        }
    }

    pub(crate) fn signature(context: impl Into<String>) -> Self {
        Self::Signature {
            context: context.into(),
        }
    }

    /// Whether this error belongs to the signature error class.
    ///
    /// Unsupported signature types are reported as signature errors to the client.
    pub fn is_signature_error(&self) -> bool {
        matches!(self, Self::Signature { .. } | Self::UnsupportedSignatureType { .. })
    }
}

macro_rules! signature_error_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for TbsError {
                fn from(e: $source) -> Self {
                    Self::Signature { context: e.to_string() }
                }
            }
        )+
    };
}

signature_error_from! {
    Asn1Error,
    EcdsaCodecError,
    Pkcs1Error,
    CryptoError,
    KeyError,
    CertificateError,
}

#[cfg(feature = "xml")]
signature_error_from! { crate::xml::XmlError }
