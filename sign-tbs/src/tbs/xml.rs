//! XML-DSig and XAdES processing of `ds:SignedInfo`.
//!
//! The TBS data of an XML signature is a `ds:SignedInfo` element. For XAdES signatures the
//! processor completes the client's qualifying properties (signing time and signer certificate
//! reference), references them from `SignedInfo` and returns the canonicalized `SignedInfo`
//! together with the updated `ds:Object`.

use crate::error::{Result, TbsError};
use crate::hash::HashAlgorithm;
use crate::signature::SignatureAlgorithm;
use crate::tbs::{
    request_error_to_signature_error, AdesObject, Clock, ProcessorBase, ProcessorConfig, SignatureTask,
    SignatureType, TbsProcessingData, TbsProcessor,
};
use crate::x509::SignerCertificate;
use crate::xml::c14n::{canonicalize, CanonicalizationMethod, EXCLUSIVE_C14N};
use crate::xml::dom::Element;
use crate::xml::xades::{namespaced_element, SignedPropertiesUpdate, XadesObject, SIGNED_PROPERTIES_TYPE};
use crate::xml::{XmlError, XMLDSIG_NS};
use base64::engine::general_purpose;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const SIGNED_PROPERTIES_ID_PREFIX: &str = "xades-id-";

/// TBS processor for XML signatures (XAdES and plain XML-DSig).
#[derive(Debug, Clone)]
pub struct XmlTbsProcessor {
    base: ProcessorBase,
}

impl XmlTbsProcessor {
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
        self.check_tbs_data(tbs_data, ades, task.ades_object.as_ref(), algorithm, now)?;
        Ok((tbs_data, signature_type, ades))
    }

    fn check_tbs_data(
        &self,
        tbs_data: &[u8],
        ades: bool,
        ades_object: Option<&AdesObject>,
        algorithm: &SignatureAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<()> {
        log::debug!("Checking XML to be signed data");

        if ades {
            let ades_object = ades_object.ok_or_else(|| {
                TbsError::invalid_request("the AdESObject must not be null when the signature is an AdES XML signature")
            })?;
            if ades_object.signature_id.is_none() {
                return Err(TbsError::invalid_request("Signature ID must not be null in a XAdES signature"));
            }
        }

        if let Some(object_bytes) = ades_object.and_then(|object| object.object_bytes.as_deref()) {
            let signing_time = XadesObject::parse(object_bytes)
                .and_then(|object| object.signing_time())
                .map_err(invalid_request)?;
            if let Some(signing_time) = signing_time {
                self.base.check_signing_time(signing_time, now)?;
            }
        }

        let signed_info = parse_signed_info(tbs_data).map_err(invalid_request)?;

        let signature_method = signed_info
            .find_child(XMLDSIG_NS, "SignatureMethod")
            .and_then(|method| method.attribute("Algorithm"))
            .ok_or_else(|| TbsError::invalid_request("SignedInfo does not have a specified signature algorithm"))?;
        if signature_method != algorithm.uri() {
            return Err(TbsError::invalid_request(
                "Signature algorithm of request does not match provided data to be signed",
            ));
        }

        let references: Vec<&Element> = signed_info.find_children(XMLDSIG_NS, "Reference").collect();
        if references.is_empty() {
            return Err(TbsError::invalid_request("Input SignedInfo does not contain any reference data"));
        }

        if references.iter().filter(|reference| is_signed_properties_reference(reference)).count() > 1 {
            return Err(TbsError::invalid_request("SignedInfo has more than one XAdES reference"));
        }

        log::debug!("TBS input has {} references", references.len());

        Ok(())
    }

    fn build_ades_data(
        &self,
        tbs_data: &[u8],
        ades_object: Option<&AdesObject>,
        signer_certificate: &SignerCertificate,
        algorithm: &SignatureAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<(Vec<u8>, AdesObject)> {
        let config = self.base.config();

        let ades_object = ades_object.ok_or_else(|| {
            TbsError::signature("the AdESObject must not be null when the signature is an AdES XML signature")
        })?;
        let signature_id = ades_object
            .signature_id
            .as_deref()
            .ok_or_else(|| TbsError::signature("Signature ID must not be null in a XAdES signature"))?;

        let mut xades = match ades_object.object_bytes.as_deref() {
            Some(object_bytes) => XadesObject::parse(object_bytes)?,
            None => {
                log::debug!("No XAdES object in request, creating qualifying properties");
                XadesObject::new()
            }
        };

        if xades.has_signing_certificate_v1() {
            if config.strict_processing {
                return Err(TbsError::signature(
                    "XAdES SigningCertificate (V1) is not allowed in strict processing",
                ));
            }
            log::warn!("Removing XAdES SigningCertificate (V1), replaced by SigningCertificateV2");
        }

        let digest_algorithm = algorithm.digest();
        let certificate_digest = signer_certificate.digest(digest_algorithm);
        let issuer_serial = if config.include_issuer_serial {
            Some(signer_certificate.issuer_serial_der()?)
        } else {
            None
        };
        let default_id = signed_properties_id(signature_id, tbs_data);

        let id = xades.update_signed_properties(&SignedPropertiesUpdate {
            signature_id,
            default_signed_properties_id: &default_id,
            signing_time: now,
            digest_algorithm,
            certificate_digest: &certificate_digest,
            issuer_serial: issuer_serial.as_deref(),
        })?;

        let signed_properties_digest = digest_algorithm.digest(&xades.canonical_signed_properties()?);

        let mut signed_info = parse_signed_info(tbs_data)?;
        update_signed_properties_reference(&mut signed_info, &id, digest_algorithm, &signed_properties_digest)?;

        let tbs_bytes = canonicalize_signed_info(&signed_info)?;

        Ok((tbs_bytes, AdesObject::new(signature_id, Some(xades.to_bytes()))))
    }
}

fn invalid_request(e: XmlError) -> TbsError {
    TbsError::invalid_request(e.to_string())
}

fn parse_signed_info(tbs_data: &[u8]) -> std::result::Result<Element, XmlError> {
    let signed_info = Element::parse(tbs_data)?;

    if !signed_info.is(XMLDSIG_NS, "SignedInfo") {
        return Err(XmlError::malformed(format!(
            "XML to be signed data must be a ds:SignedInfo element, got {}",
            signed_info.qualified_name()
        )));
    }

    Ok(signed_info)
}

fn is_signed_properties_reference(reference: &Element) -> bool {
    reference
        .attribute("Type")
        .map_or(false, |reference_type| reference_type.eq_ignore_ascii_case(SIGNED_PROPERTIES_TYPE))
}

/// Id derived from the request so that identical requests produce identical TBS data.
fn signed_properties_id(signature_id: &str, tbs_data: &[u8]) -> String {
    let mut input = Vec::with_capacity(signature_id.len() + 1 + tbs_data.len());
    input.extend_from_slice(signature_id.as_bytes());
    input.push(0);
    input.extend_from_slice(tbs_data);

    let digest = HashAlgorithm::SHA2_256.digest(&input);
    format!("{SIGNED_PROPERTIES_ID_PREFIX}{}", hex::encode(&digest[..16]))
}

/// Points the XAdES reference at the signed properties, adding the reference when missing.
fn update_signed_properties_reference(
    signed_info: &mut Element,
    signed_properties_id: &str,
    digest_algorithm: HashAlgorithm,
    digest: &[u8],
) -> Result<()> {
    let ds_prefix = signed_info.prefix().map(str::to_owned);
    let ds_prefix = ds_prefix.as_deref();

    let has_reference = signed_info
        .find_children(XMLDSIG_NS, "Reference")
        .any(is_signed_properties_reference);
    if !has_reference {
        log::debug!("Adding XAdES reference to SignedInfo");
        signed_info.push_child(
            namespaced_element(ds_prefix, "Reference", XMLDSIG_NS).with_attribute("Type", SIGNED_PROPERTIES_TYPE),
        );
    }

    let reference = signed_info
        .child_elements_mut()
        .find(|element| element.is(XMLDSIG_NS, "Reference") && is_signed_properties_reference(element))
        .ok_or_else(|| TbsError::signature("SignedInfo has no XAdES reference"))?;

    reference.set_attribute("URI", format!("#{signed_properties_id}"));
    reference.clear_children();
    reference.push_child(
        namespaced_element(ds_prefix, "Transforms", XMLDSIG_NS).with_child(
            namespaced_element(ds_prefix, "Transform", XMLDSIG_NS).with_attribute("Algorithm", EXCLUSIVE_C14N),
        ),
    );
    reference.push_child(
        namespaced_element(ds_prefix, "DigestMethod", XMLDSIG_NS)
            .with_attribute("Algorithm", digest_algorithm.xml_uri()),
    );
    reference.push_child(
        namespaced_element(ds_prefix, "DigestValue", XMLDSIG_NS).with_text(general_purpose::STANDARD.encode(digest)),
    );

    Ok(())
}

fn canonicalize_signed_info(signed_info: &Element) -> Result<Vec<u8>> {
    let algorithm = signed_info
        .find_child(XMLDSIG_NS, "CanonicalizationMethod")
        .ok_or_else(|| TbsError::signature("SignedInfo has no canonicalization algorithm element"))?
        .attribute("Algorithm")
        .ok_or_else(|| TbsError::signature("SignedInfo has no canonicalization algorithm"))?;

    let method = CanonicalizationMethod::from_uri(algorithm)?;
    log::debug!("Canonicalizing SignedInfo with {}", method.uri());

    Ok(canonicalize(signed_info, method))
}

impl TbsProcessor for XmlTbsProcessor {
    fn supports(&self, signature_type: SignatureType) -> bool {
        signature_type == SignatureType::Xml
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

        if signature_type != SignatureType::Xml {
            return Err(TbsError::signature("Signature type must be XML"));
        }

        if !ades {
            log::debug!("Plain XML signature, to be signed data is used as is");
            return Ok(TbsProcessingData {
                tbs_bytes: tbs_data.to_vec(),
                processing_rules: task.processing_rules_uri.clone(),
                ades_object: None,
            });
        }

        log::debug!(
            "Processing XAdES to be signed data (signature id: {:?})",
            task.ades_object.as_ref().and_then(|object| object.signature_id.as_deref())
        );

        let (tbs_bytes, ades_object) =
            self.build_ades_data(tbs_data, task.ades_object.as_ref(), signer_certificate, algorithm, now)?;

        log::debug!("XML to be signed data ready ({} bytes)", tbs_bytes.len());

        Ok(TbsProcessingData {
            tbs_bytes,
            processing_rules: task.processing_rules_uri.clone(),
            ades_object: Some(ades_object),
        })
    }
}
