//! # sign-tbs
//!
//! To-be-signed data preparation for ETSI AdES signatures.
//!
//! Turns a client sign task into the exact bytes to sign: XML-DSig `SignedInfo` completed with
//! XAdES qualifying properties, or CMS signed attributes following the PAdES baseline rules. Also
//! provides the raw signature value codecs (ECDSA `r || s` / DER, PKCS#1 `DigestInfo`) and the
//! cryptographic primitives used to produce signature values.

#[cfg(feature = "xml")]
pub mod xml;

pub mod error;
pub mod hash;
pub mod key;
pub mod oids;
pub mod pem;
pub mod signature;
pub mod tbs;
pub mod x509;

mod asn1;

pub use asn1::{AlgorithmIdentifier, Asn1Error};
pub use error::TbsError;
pub use tbs::provider::{AnyTbsProcessor, TbsProcessorProvider};
pub use tbs::{
    AdesObject, AdesType, Clock, FixedClock, ProcessorConfig, SignatureTask, SignatureType, SystemClock,
    TbsProcessingData, TbsProcessor,
};
