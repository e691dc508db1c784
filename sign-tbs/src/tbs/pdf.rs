//! PAdES processing of CMS `SignedAttributes`.
//!
//! The TBS data of a PDF signature is the DER `SET OF Attribute` that ends up as the
//! `signedAttrs` of the CMS `SignerInfo`. The processor validates it, enforces the PAdES baseline
//! rules and re-serializes it with DER ordering.

use crate::asn1::{self, tag, AlgorithmIdentifier, Asn1Error};
use crate::error::{Result, TbsError};
use crate::hash::HashAlgorithm;
use crate::oids;
use crate::signature::SignatureAlgorithm;
use crate::tbs::{
    request_error_to_signature_error, Clock, ProcessorBase, ProcessorConfig, SignatureTask, SignatureType,
    TbsProcessingData, TbsProcessor,
};
use crate::x509::SignerCertificate;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use oid::ObjectIdentifier;
use std::sync::Arc;

/// CMS `Attribute ::= SEQUENCE { attrType OBJECT IDENTIFIER, attrValues SET OF AttributeValue }`
///
/// The original encoding is kept so that untouched attributes are re-serialized byte exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAttribute {
    attr_type: ObjectIdentifier,
    values: Vec<Vec<u8>>,
    der: Vec<u8>,
}

impl SignedAttribute {
    pub fn new(attr_type: ObjectIdentifier, values: Vec<Vec<u8>>) -> std::result::Result<Self, Asn1Error> {
        let der = asn1::der_sequence(
            &[
                asn1::der_oid(&attr_type)?,
                asn1::der_set_of(values.clone(), "attribute values")?,
            ],
            "attribute",
        )?;

        Ok(Self { attr_type, values, der })
    }

    pub fn from_der(der: &[u8]) -> std::result::Result<Self, Asn1Error> {
        const ELEMENT: &str = "attribute";

        let fields = asn1::parse_sequence(der, ELEMENT)?;
        let [attr_type, attr_values] = fields.as_slice() else {
            return Err(Asn1Error::invalid(
                ELEMENT,
                format!("expected 2 elements, got {}", fields.len()),
            ));
        };

        Ok(Self {
            attr_type: asn1::parse_oid(attr_type, "attribute type")?,
            values: asn1::parse_set(attr_values, "attribute values")?,
            der: der.to_vec(),
        })
    }

    pub fn attr_type(&self) -> &ObjectIdentifier {
        &self.attr_type
    }

    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    pub fn encoded(&self) -> &[u8] {
        &self.der
    }

    fn is(&self, attr_type: &str) -> bool {
        Into::<String>::into(&self.attr_type) == attr_type
    }

    fn first_value(&self) -> Option<&[u8]> {
        self.values.first().map(Vec::as_slice)
    }
}

/// Parses a DER `SET OF Attribute`, keeping the input order.
pub fn parse_signed_attributes(der: &[u8]) -> std::result::Result<Vec<SignedAttribute>, Asn1Error> {
    asn1::parse_set(der, "signed attributes")?
        .iter()
        .map(|attribute| SignedAttribute::from_der(attribute))
        .collect()
}

/// Encodes attributes as a DER `SET OF`, sorted by encoding.
pub fn consolidate_signed_attributes(attributes: &[SignedAttribute]) -> std::result::Result<Vec<u8>, Asn1Error> {
    asn1::der_set_of(
        attributes.iter().map(|attribute| attribute.der.clone()).collect(),
        "signed attributes",
    )
}

fn find_attribute<'a>(attributes: &'a [SignedAttribute], attr_type: &str) -> Option<&'a SignedAttribute> {
    attributes.iter().find(|attribute| attribute.is(attr_type))
}

/// Decodes a `Time ::= CHOICE { utcTime UTCTime, generalTime GeneralizedTime }`.
pub fn parse_signing_time(der: &[u8]) -> std::result::Result<DateTime<Utc>, Asn1Error> {
    const ELEMENT: &str = "signing time";

    let (time_tag, content, rest) = asn1::split_tlv(der, ELEMENT)?;
    if !rest.is_empty() {
        return Err(Asn1Error::invalid(ELEMENT, format!("{} trailing bytes", rest.len())));
    }

    let text = std::str::from_utf8(content).map_err(|e| Asn1Error::invalid(ELEMENT, e.to_string()))?;
    let parse = |text: &str, format: &str| {
        NaiveDateTime::parse_from_str(text, format).map_err(|e| Asn1Error::invalid(ELEMENT, e.to_string()))
    };

    let naive = match time_tag {
        tag::UTC_TIME => {
            // RFC 5280 4.1.2.5.1: YY >= 50 is 19YY, YY < 50 is 20YY
            let year = text
                .get(..2)
                .filter(|yy| yy.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|yy| yy.parse::<u8>().ok())
                .ok_or_else(|| Asn1Error::invalid(ELEMENT, "missing UTCTime year"))?;
            let century = if year >= 50 { "19" } else { "20" };
            parse(&format!("{century}{text}"), "%Y%m%d%H%M%SZ")?
        }
        tag::GENERALIZED_TIME => parse(text, "%Y%m%d%H%M%S%.fZ")?,
        _ => {
            return Err(Asn1Error::invalid(
                ELEMENT,
                format!("unexpected tag 0x{time_tag:02X}"),
            ))
        }
    };

    Ok(Utc.from_utc_datetime(&naive))
}

/// RFC 6211 `CMSAlgorithmProtection` content.
fn parse_algorithm_protection(
    der: &[u8],
) -> std::result::Result<(AlgorithmIdentifier, Option<AlgorithmIdentifier>), Asn1Error> {
    const ELEMENT: &str = "CMS algorithm protection";

    let fields = asn1::parse_sequence(der, ELEMENT)?;
    let (digest_algorithm, optional) = fields
        .split_first()
        .ok_or_else(|| Asn1Error::invalid(ELEMENT, "missing digest algorithm"))?;

    let digest_algorithm = AlgorithmIdentifier::from_der(digest_algorithm)?;
    let signature_algorithm = optional
        .iter()
        .find(|field| field.first() == Some(&tag::CTX_1_CONSTRUCTED))
        .map(|field| AlgorithmIdentifier::from_der(&asn1::retag(field.clone(), tag::SEQUENCE)))
        .transpose()?;

    Ok((digest_algorithm, signature_algorithm))
}

fn cms_signature_algorithm(algorithm: &SignatureAlgorithm) -> Result<AlgorithmIdentifier> {
    algorithm.algorithm_identifier().ok_or_else(|| {
        TbsError::programming(format!("Signature algorithm {algorithm} has no CMS object identifier"))
    })
}

/// Canonical `cms-algorithm-protection` attribute for the algorithm used to sign.
pub fn algorithm_protection_attribute(algorithm: &SignatureAlgorithm) -> Result<SignedAttribute> {
    const ELEMENT: &str = "CMS algorithm protection";

    let digest_algorithm = algorithm.digest().algorithm_identifier().to_der()?;
    let signature_algorithm = asn1::retag(cms_signature_algorithm(algorithm)?.to_der()?, tag::CTX_1_CONSTRUCTED);
    let protection = asn1::der_sequence(&[digest_algorithm, signature_algorithm], ELEMENT)?;

    Ok(SignedAttribute::new(oids::cms_algorithm_protection(), vec![protection])?)
}

/// ESS signing certificate attribute (RFC 2634 / RFC 5035) referencing the signer certificate.
///
/// SHA-1 yields the legacy `signingCertificate` attribute, any other digest a
/// `signingCertificateV2` attribute.
pub fn signing_certificate_attribute(
    hash: HashAlgorithm,
    certificate: &SignerCertificate,
    include_issuer_serial: bool,
) -> Result<SignedAttribute> {
    const ELEMENT: &str = "signing certificate";

    let mut cert_id = Vec::with_capacity(3);

    // hashAlgorithm DEFAULT id-sha256, DER omits default values
    if hash != HashAlgorithm::SHA1 && hash != HashAlgorithm::SHA2_256 {
        cert_id.push(hash.algorithm_identifier().to_der()?);
    }

    cert_id.push(asn1::der_octet_string(&certificate.digest(hash))?);

    if include_issuer_serial {
        cert_id.push(certificate.issuer_serial_der()?);
    }

    let cert_id = asn1::der_sequence(&cert_id, ELEMENT)?;
    let certs = asn1::der_sequence(&[cert_id], ELEMENT)?;
    let signing_certificate = asn1::der_sequence(&[certs], ELEMENT)?;

    let attr_type = if hash == HashAlgorithm::SHA1 {
        log::warn!("Adding ESSCertID based on SHA-1");
        oids::signing_certificate()
    } else {
        log::debug!("Adding ESSCertIDv2 signed certificate attribute");
        oids::signing_certificate_v2()
    };

    Ok(SignedAttribute::new(attr_type, vec![signing_certificate])?)
}

/// TBS processor for PDF signatures (PAdES and plain CMS signed attributes).
#[derive(Debug, Clone)]
pub struct PdfTbsProcessor {
    base: ProcessorBase,
}

impl PdfTbsProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            base: ProcessorBase::new(config),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.base.set_clock(clock);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        self.base.config()
    }

    fn check_at<'a>(
        &self,
        task: &'a SignatureTask,
        algorithm: &SignatureAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<(&'a [u8], SignatureType, bool)> {
        let (tbs_data, signature_type, ades) = self.base.check_common(task)?;
        self.check_tbs_data(tbs_data, ades, algorithm, now)?;
        Ok((tbs_data, signature_type, ades))
    }

    fn check_tbs_data(
        &self,
        tbs_data: &[u8],
        ades: bool,
        algorithm: &SignatureAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<()> {
        log::debug!("Checking PDF to be signed data");

        let attributes = parse_signed_attributes(tbs_data).map_err(|e| TbsError::invalid_request(e.to_string()))?;
        log::debug!("Processing {} input signed attributes", attributes.len());

        let content_type = find_attribute(&attributes, oids::CONTENT_TYPE)
            .ok_or_else(|| TbsError::invalid_request("Signed attributes input has no contentType attribute"))?;
        let content_type = content_type
            .first_value()
            .and_then(|value| asn1::parse_oid(value, "content type").ok())
            .ok_or_else(|| {
                TbsError::invalid_request("Illegal attribute data in content type attributes in signed attributes input")
            })?;
        if Into::<String>::into(&content_type) != oids::PKCS7_DATA {
            return Err(TbsError::invalid_request(
                "Illegal content type in signed attributes input",
            ));
        }

        if find_attribute(&attributes, oids::MESSAGE_DIGEST).is_none() {
            return Err(TbsError::invalid_request("Signed attributes input has no message digest"));
        }

        match (find_attribute(&attributes, oids::SIGNING_TIME), ades) {
            (Some(_), true) if self.base.config().strict_processing => {
                return Err(TbsError::invalid_request(
                    "Signing time is not allowed in PAdES requests in strict processing",
                ));
            }
            (Some(signing_time), false) => {
                let signing_time = signing_time
                    .first_value()
                    .and_then(|value| parse_signing_time(value).ok())
                    .ok_or_else(|| {
                        TbsError::invalid_request("Illegal time information in the provided signing time attribute")
                    })?;
                self.base.check_signing_time(signing_time, now)?;
            }
            (None, false) => {
                return Err(TbsError::invalid_request("Signed attributes input has no signing time"));
            }
            // removed while building the PAdES attribute set
            (Some(_), true) | (None, true) => {}
        }

        if let Some(protection) = find_attribute(&attributes, oids::CMS_ALGORITHM_PROTECTION) {
            check_algorithm_protection(protection, algorithm)?;
        }

        log::debug!("TBS input has required signed attributes");

        Ok(())
    }

    fn build_tbs_data(
        &self,
        tbs_data: &[u8],
        ades: bool,
        signer_certificate: &SignerCertificate,
        algorithm: &SignatureAlgorithm,
    ) -> Result<Vec<u8>> {
        let config = self.base.config();
        let mut attributes = parse_signed_attributes(tbs_data)?;

        if ades && find_attribute(&attributes, oids::SIGNING_TIME).is_some() {
            if config.strict_processing {
                return Err(TbsError::signature(
                    "Signing time is not allowed in PAdES requests in strict processing",
                ));
            }

            attributes.retain(|attribute| !attribute.is(oids::SIGNING_TIME));
            log::warn!("Removed existing signing time attribute as this is not allowed in PAdES");
        }

        if ades {
            let protection = algorithm_protection_attribute(algorithm)?;
            match attributes
                .iter_mut()
                .find(|attribute| attribute.is(oids::CMS_ALGORITHM_PROTECTION))
            {
                Some(existing) => {
                    *existing = protection;
                    log::debug!("Replaced existing CMS algorithm protection attribute");
                }
                None => {
                    attributes.push(protection);
                    log::debug!("Added CMS algorithm protection attribute");
                }
            }
        }

        let has_signing_certificate = attributes
            .iter()
            .any(|attribute| attribute.is(oids::SIGNING_CERTIFICATE) || attribute.is(oids::SIGNING_CERTIFICATE_V2));

        if ades || has_signing_certificate {
            if has_signing_certificate {
                log::debug!("Removing present ESSCertID attribute from requested TBS data");
                attributes.retain(|attribute| {
                    !attribute.is(oids::SIGNING_CERTIFICATE) && !attribute.is(oids::SIGNING_CERTIFICATE_V2)
                });
            }

            attributes.push(signing_certificate_attribute(
                algorithm.digest(),
                signer_certificate,
                config.include_issuer_serial,
            )?);
        }

        Ok(consolidate_signed_attributes(&attributes)?)
    }
}

fn check_algorithm_protection(protection: &SignedAttribute, algorithm: &SignatureAlgorithm) -> Result<()> {
    let signature_algorithm = cms_signature_algorithm(algorithm)?;

    let (protected_digest, protected_signature) = protection
        .first_value()
        .ok_or_else(|| Asn1Error::invalid("CMS algorithm protection", "no attribute value"))
        .and_then(parse_algorithm_protection)
        .map_err(|e| TbsError::invalid_request(e.to_string()))?;

    if protected_digest.oid() != &algorithm.digest().oid() {
        return Err(TbsError::invalid_request(format!(
            "CMS algorithm protection digest algorithm {} does not match requested algorithm {algorithm}",
            protected_digest.oid_string()
        )));
    }

    match protected_signature {
        Some(protected_signature) if protected_signature.is_same_algorithm(&signature_algorithm) => Ok(()),
        Some(protected_signature) => Err(TbsError::invalid_request(format!(
            "CMS algorithm protection signature algorithm {} does not match requested algorithm {algorithm}",
            protected_signature.oid_string()
        ))),
        None => Err(TbsError::invalid_request(
            "CMS algorithm protection does not declare a signature algorithm",
        )),
    }
}

impl TbsProcessor for PdfTbsProcessor {
    fn supports(&self, signature_type: SignatureType) -> bool {
        signature_type == SignatureType::Pdf
    }

    fn check_sign_task(&self, task: &SignatureTask, algorithm: &SignatureAlgorithm) -> Result<()> {
        self.check_at(task, algorithm, self.base.now()).map(|_| ())
    }

    fn process_sign_task_data(
        &self,
        task: &SignatureTask,
        signer_certificate: &SignerCertificate,
        algorithm: &SignatureAlgorithm,
    ) -> Result<TbsProcessingData> {
        let now = self.base.now();

        let (tbs_data, signature_type, ades) = self
            .check_at(task, algorithm, now)
            .map_err(request_error_to_signature_error)?;

        self.base.check_processing_rule(task.processing_rules_uri.as_deref())?;

        if signature_type != SignatureType::Pdf {
            return Err(TbsError::signature("Signature type must be PDF"));
        }

        log::debug!(
            "Processing PDF to be signed data (signature id: {:?}, PAdES: {ades})",
            task.signature_id
        );

        let tbs_bytes = self.build_tbs_data(tbs_data, ades, signer_certificate, algorithm)?;

        log::debug!("PDF to be signed data ready ({} bytes)", tbs_bytes.len());

        Ok(TbsProcessingData {
            tbs_bytes,
            processing_rules: task.processing_rules_uri.clone(),
            ades_object: None,
        })
    }
}
