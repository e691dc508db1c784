//! Signer certificate access.
//!
//! Certificates are issued and validated elsewhere. Only the fields needed to reference the
//! certificate from signed attributes are decoded: the encoded bytes, issuer name, serial number
//! and the subject public key.

use crate::asn1::{self, tag, Asn1Error};
use crate::hash::HashAlgorithm;
use crate::key::{KeyError, PublicKey};
use crate::pem::{parse_pem, Pem, PemError};
use thiserror::Error;

const CERT_PEM_LABEL: &str = "CERTIFICATE";

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error(transparent)]
    Asn1(#[from] Asn1Error),

    /// invalid PEM label error
    #[error("invalid PEM label: {label}")]
    InvalidPemLabel { label: String },

    /// invalid PEM provided
    #[error("invalid PEM provided: {source}")]
    Pem { source: PemError },

    /// certificate structure is not X.509
    #[error("invalid certificate: {context}")]
    Invalid { context: String },
}

impl From<PemError> for CertificateError {
    fn from(e: PemError) -> Self {
        Self::Pem { source: e }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerCertificate {
    der: Vec<u8>,
    serial_number: Vec<u8>,
    issuer: Vec<u8>,
    subject_public_key_info: Vec<u8>,
}

impl SignerCertificate {
    pub fn from_der<T: ?Sized + AsRef<[u8]>>(der: &T) -> Result<Self, CertificateError> {
        let der = der.as_ref();

        let certificate = asn1::parse_sequence(der, "certificate")?;
        let tbs_certificate = certificate.first().ok_or_else(|| CertificateError::Invalid {
            context: "empty certificate sequence".to_owned(),
        })?;

        let fields = asn1::parse_sequence(tbs_certificate, "tbs certificate")?;

        // version [0] EXPLICIT is optional (v1 certificates)
        let fields = match fields.first() {
            Some(version) if version.first() == Some(&tag::CTX_0_CONSTRUCTED) => &fields[1..],
            _ => &fields[..],
        };

        // serialNumber, signature, issuer, validity, subject, subjectPublicKeyInfo
        let [serial_number, _signature, issuer, _validity, _subject, subject_public_key_info, ..] = fields else {
            return Err(CertificateError::Invalid {
                context: format!("tbs certificate has only {} fields", fields.len()),
            });
        };

        asn1::parse_integer(serial_number, "certificate serial number")?;
        asn1::single_tlv_content(issuer, tag::SEQUENCE, "certificate issuer")?;

        Ok(Self {
            der: der.to_vec(),
            serial_number: serial_number.clone(),
            issuer: issuer.clone(),
            subject_public_key_info: subject_public_key_info.clone(),
        })
    }

    pub fn from_pem(pem: &Pem) -> Result<Self, CertificateError> {
        match pem.label() {
            CERT_PEM_LABEL => Self::from_der(pem.data()),
            _ => Err(CertificateError::InvalidPemLabel {
                label: pem.label().to_owned(),
            }),
        }
    }

    pub fn from_pem_str(pem_str: &str) -> Result<Self, CertificateError> {
        let pem = parse_pem(pem_str)?;
        Self::from_pem(&pem)
    }

    /// DER encoding of the whole certificate
    pub fn encoded(&self) -> &[u8] {
        &self.der
    }

    /// DER encoded serial number INTEGER
    pub fn serial_number_der(&self) -> &[u8] {
        &self.serial_number
    }

    /// DER encoded issuer `Name`
    pub fn issuer_der(&self) -> &[u8] {
        &self.issuer
    }

    pub fn public_key(&self) -> Result<PublicKey, KeyError> {
        PublicKey::from_der(&self.subject_public_key_info)
    }

    /// Digest of the encoded certificate, as referenced by signing certificate attributes.
    pub fn digest(&self, hash: HashAlgorithm) -> Vec<u8> {
        hash.digest(&self.der)
    }

    /// RFC 5035 `IssuerSerial`
    ///
    /// ```text
    /// IssuerSerial ::= SEQUENCE {
    ///     issuer       GeneralNames,
    ///     serialNumber CertificateSerialNumber }
    /// ```
    ///
    /// with the issuer expressed as a single `directoryName [4]` general name.
    pub fn issuer_serial_der(&self) -> Result<Vec<u8>, CertificateError> {
        const ELEMENT: &str = "issuer serial";

        // [4] is EXPLICIT since Name is a CHOICE
        let directory_name = asn1::retag(asn1::der_sequence(&[self.issuer.clone()], ELEMENT)?, tag::CTX_4_CONSTRUCTED);
        let general_names = asn1::der_sequence(&[directory_name], ELEMENT)?;

        Ok(asn1::der_sequence(&[general_names, self.serial_number.clone()], ELEMENT)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PrivateKey;
    use rstest::rstest;

    #[rstest]
    #[case(sign_tbs_test_data::RSA_2048_SIGNER_CERT, sign_tbs_test_data::RSA_2048_PK_1, "02051a2b3c4d5e")]
    #[case(sign_tbs_test_data::EC_NIST256_SIGNER_CERT, sign_tbs_test_data::EC_NIST256_PK_1, "02050badc0ffee")]
    #[case(sign_tbs_test_data::EC_NIST384_SIGNER_CERT, sign_tbs_test_data::EC_NIST384_PK_1, "02021092")]
    fn parse_signer_certificate(#[case] cert_pem: &str, #[case] key_pem: &str, #[case] serial: &str) {
        let certificate = SignerCertificate::from_pem_str(cert_pem).unwrap();
        assert_eq!(hex::encode(certificate.serial_number_der()), serial);

        let private_key = PrivateKey::from_pem_str(key_pem).unwrap();
        assert_eq!(certificate.public_key().unwrap(), private_key.to_public_key());
    }

    #[test]
    fn issuer_serial_structure() {
        let certificate = SignerCertificate::from_pem_str(sign_tbs_test_data::EC_NIST256_SIGNER_CERT).unwrap();
        let issuer_serial = certificate.issuer_serial_der().unwrap();

        let fields = asn1::parse_sequence(&issuer_serial, "test").unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1], certificate.serial_number_der());

        let general_names = asn1::parse_sequence(&fields[0], "test").unwrap();
        assert_eq!(general_names.len(), 1);
        let directory_name = asn1::single_tlv_content(&general_names[0], tag::CTX_4_CONSTRUCTED, "test").unwrap();
        assert_eq!(directory_name, certificate.issuer_der());
    }

    #[test]
    fn key_pem_is_not_a_certificate() {
        let err = SignerCertificate::from_pem_str(sign_tbs_test_data::EC_NIST256_PK_1).unwrap_err();
        assert!(matches!(err, CertificateError::InvalidPemLabel { .. }));
    }
}
