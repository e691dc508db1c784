//! XAdES 1.3.2 `QualifyingProperties` wrapped in a `ds:Object`.

use super::c14n::{canonicalize_in_scope, CanonicalizationMethod};
use super::dom::Element;
use super::{XmlError, XADES_NS, XMLDSIG_NS};
use crate::hash::HashAlgorithm;
use base64::engine::general_purpose;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// `Type` of the `ds:Reference` covering the signed properties, compared case insensitively.
pub const SIGNED_PROPERTIES_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";

const QUALIFYING_PROPERTIES: &str = "QualifyingProperties";
const SIGNED_PROPERTIES: &str = "SignedProperties";
const SIGNED_SIGNATURE_PROPERTIES: &str = "SignedSignatureProperties";
const SIGNING_TIME: &str = "SigningTime";
const SIGNING_CERTIFICATE: &str = "SigningCertificate";
const SIGNING_CERTIFICATE_V2: &str = "SigningCertificateV2";

/// Creates an element in `namespace`, declaring it when no prefix is available.
pub(crate) fn namespaced_element(prefix: Option<&str>, local_name: &str, namespace: &str) -> Element {
    let mut element = Element::new(prefix, local_name, Some(namespace));
    if prefix.is_none() {
        element.declare_namespace(None, namespace);
    }
    element
}

/// Values written into the signed signature properties.
#[derive(Debug, Clone)]
pub struct SignedPropertiesUpdate<'a> {
    /// Id of the `ds:Signature` the properties qualify
    pub signature_id: &'a str,
    /// Id given to `SignedProperties` when it has none
    pub default_signed_properties_id: &'a str,
    pub signing_time: DateTime<Utc>,
    pub digest_algorithm: HashAlgorithm,
    /// Digest of the encoded signer certificate
    pub certificate_digest: &'a [u8],
    /// DER encoded RFC 5035 `IssuerSerial`
    pub issuer_serial: Option<&'a [u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XadesObject {
    object: Element,
}

impl Default for XadesObject {
    fn default() -> Self {
        Self::new()
    }
}

impl XadesObject {
    /// `ds:Object` holding empty qualifying properties.
    pub fn new() -> Self {
        let mut qualifying_properties = Element::new(Some("xades"), QUALIFYING_PROPERTIES, Some(XADES_NS));
        qualifying_properties.declare_namespace(Some("xades"), XADES_NS);

        let mut object = Element::new(Some("ds"), "Object", Some(XMLDSIG_NS));
        object.declare_namespace(Some("ds"), XMLDSIG_NS);
        object.push_child(qualifying_properties);

        Self { object }
    }

    pub fn parse(xml: &[u8]) -> Result<Self, XmlError> {
        let object = Element::parse(xml)?;

        if !object.is(XMLDSIG_NS, "Object") {
            return Err(XmlError::malformed(format!(
                "AdES object must be a ds:Object element, got {}",
                object.qualified_name()
            )));
        }

        if object.find_child(XADES_NS, QUALIFYING_PROPERTIES).is_none() {
            return Err(XmlError::malformed("No QualifyingProperties element found in XAdES object"));
        }

        Ok(Self { object })
    }

    pub fn element(&self) -> &Element {
        &self.object
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.object.to_xml().into_bytes()
    }

    fn signed_signature_properties(&self) -> Option<&Element> {
        self.object
            .find_child(XADES_NS, QUALIFYING_PROPERTIES)?
            .find_child(XADES_NS, SIGNED_PROPERTIES)?
            .find_child(XADES_NS, SIGNED_SIGNATURE_PROPERTIES)
    }

    pub fn signed_properties_id(&self) -> Option<&str> {
        self.object
            .find_child(XADES_NS, QUALIFYING_PROPERTIES)?
            .find_child(XADES_NS, SIGNED_PROPERTIES)?
            .attribute("Id")
    }

    /// Client supplied `SigningTime`, if any.
    pub fn signing_time(&self) -> Result<Option<DateTime<Utc>>, XmlError> {
        self.signed_signature_properties()
            .and_then(|properties| properties.find_child(XADES_NS, SIGNING_TIME))
            .map(|signing_time| parse_date_time(signing_time.text().trim()))
            .transpose()
    }

    /// Whether a legacy `SigningCertificate` (V1) reference is present.
    pub fn has_signing_certificate_v1(&self) -> bool {
        self.signed_signature_properties()
            .map_or(false, |properties| properties.find_child(XADES_NS, SIGNING_CERTIFICATE).is_some())
    }

    /// Sets target, signing time and signer certificate reference, creating missing containers.
    ///
    /// Any previous `SigningTime`, `SigningCertificate` or `SigningCertificateV2` is replaced.
    /// Returns the `Id` of `SignedProperties`.
    pub fn update_signed_properties(&mut self, update: &SignedPropertiesUpdate<'_>) -> Result<String, XmlError> {
        let ds_prefix = self.object.prefix().map(str::to_owned);
        let ds_prefix = ds_prefix.as_deref();

        let qualifying_properties = self
            .object
            .find_child_mut(XADES_NS, QUALIFYING_PROPERTIES)
            .ok_or_else(|| XmlError::malformed("No QualifyingProperties element found in XAdES object"))?;
        let xades_prefix = qualifying_properties.prefix().map(str::to_owned);
        let xades_prefix = xades_prefix.as_deref();

        qualifying_properties.set_attribute("Target", format!("#{}", update.signature_id));

        let signed_properties = child_or_insert(qualifying_properties, xades_prefix, SIGNED_PROPERTIES)?;
        let id = match signed_properties.attribute("Id") {
            Some(id) => id.to_owned(),
            None => {
                signed_properties.set_attribute("Id", update.default_signed_properties_id);
                update.default_signed_properties_id.to_owned()
            }
        };

        let properties = child_or_insert(signed_properties, xades_prefix, SIGNED_SIGNATURE_PROPERTIES)?;
        properties.remove_children(XADES_NS, SIGNING_TIME);
        properties.remove_children(XADES_NS, SIGNING_CERTIFICATE);
        properties.remove_children(XADES_NS, SIGNING_CERTIFICATE_V2);

        let signing_time = namespaced_element(xades_prefix, SIGNING_TIME, XADES_NS)
            .with_text(update.signing_time.to_rfc3339_opts(SecondsFormat::Millis, true));

        let cert_digest = namespaced_element(xades_prefix, "CertDigest", XADES_NS)
            .with_child(
                namespaced_element(ds_prefix, "DigestMethod", XMLDSIG_NS)
                    .with_attribute("Algorithm", update.digest_algorithm.xml_uri()),
            )
            .with_child(
                namespaced_element(ds_prefix, "DigestValue", XMLDSIG_NS)
                    .with_text(general_purpose::STANDARD.encode(update.certificate_digest)),
            );

        let mut cert = namespaced_element(xades_prefix, "Cert", XADES_NS).with_child(cert_digest);
        if let Some(issuer_serial) = update.issuer_serial {
            cert.push_child(
                namespaced_element(xades_prefix, "IssuerSerialV2", XADES_NS)
                    .with_text(general_purpose::STANDARD.encode(issuer_serial)),
            );
        }

        let signing_certificate = namespaced_element(xades_prefix, SIGNING_CERTIFICATE_V2, XADES_NS).with_child(cert);

        // schema order: SigningTime, SigningCertificate(V2), then policy and the rest
        properties.insert_child_element(0, signing_time);
        properties.insert_child_element(1, signing_certificate);

        Ok(id)
    }

    /// `SignedProperties` after exclusive canonicalization, the input of its reference digest.
    pub fn canonical_signed_properties(&self) -> Result<Vec<u8>, XmlError> {
        let (signed_properties, inherited) = self
            .object
            .find_descendant(XADES_NS, SIGNED_PROPERTIES)
            .ok_or_else(|| XmlError::malformed("No SignedProperties element found in XAdES object"))?;

        Ok(canonicalize_in_scope(
            signed_properties,
            &inherited,
            CanonicalizationMethod::Exclusive { with_comments: false },
        ))
    }
}

fn child_or_insert<'a>(
    parent: &'a mut Element,
    xades_prefix: Option<&str>,
    local_name: &str,
) -> Result<&'a mut Element, XmlError> {
    if parent.find_child(XADES_NS, local_name).is_none() {
        parent.insert_child_element(0, namespaced_element(xades_prefix, local_name, XADES_NS));
    }

    parent
        .find_child_mut(XADES_NS, local_name)
        .ok_or_else(|| XmlError::malformed(format!("{local_name} element could not be created")))
}

/// `xs:dateTime`, a missing time zone is read as UTC.
fn parse_date_time(text: &str) -> Result<DateTime<Utc>, XmlError> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(text) {
        return Ok(date_time.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| XmlError::malformed(format!("invalid SigningTime `{text}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn update_at<'a>(time: &str, certificate_digest: &'a [u8], issuer_serial: Option<&'a [u8]>) -> SignedPropertiesUpdate<'a> {
        SignedPropertiesUpdate {
            signature_id: "sig-1",
            default_signed_properties_id: "xades-id-1",
            signing_time: DateTime::parse_from_rfc3339(time).unwrap().with_timezone(&Utc),
            digest_algorithm: HashAlgorithm::SHA2_256,
            certificate_digest,
            issuer_serial,
        }
    }

    #[test]
    fn build_from_scratch() {
        let mut object = XadesObject::new();
        assert_eq!(object.signing_time().unwrap(), None);
        assert_eq!(object.signed_properties_id(), None);

        let id = object
            .update_signed_properties(&update_at("2022-06-08T21:36:54Z", &[0; 32], None))
            .unwrap();
        assert_eq!(id, "xades-id-1");

        let zeros = "A".repeat(43);
        let expected = format!(
            concat!(
                r#"<ds:Object xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#,
                r##"<xades:QualifyingProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Target="#sig-1">"##,
                r#"<xades:SignedProperties Id="xades-id-1"><xades:SignedSignatureProperties>"#,
                r#"<xades:SigningTime>2022-06-08T21:36:54.000Z</xades:SigningTime>"#,
                r#"<xades:SigningCertificateV2><xades:Cert><xades:CertDigest>"#,
                r#"<ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>"#,
                r#"<ds:DigestValue>{}=</ds:DigestValue>"#,
                r#"</xades:CertDigest></xades:Cert></xades:SigningCertificateV2>"#,
                r#"</xades:SignedSignatureProperties></xades:SignedProperties>"#,
                r#"</xades:QualifyingProperties></ds:Object>"#,
            ),
            zeros
        );
        assert_eq!(String::from_utf8(object.to_bytes()).unwrap(), expected);

        let reparsed = XadesObject::parse(&object.to_bytes()).unwrap();
        assert_eq!(reparsed, object);
        assert_eq!(
            reparsed.signing_time().unwrap().unwrap().to_rfc3339(),
            "2022-06-08T21:36:54+00:00"
        );
    }

    #[test]
    fn update_client_object() {
        let client = r##"<Object xmlns="http://www.w3.org/2000/09/xmldsig#"><QualifyingProperties xmlns="http://uri.etsi.org/01903/v1.3.2#" Target="#other"><SignedProperties Id="client-id"><SignedSignatureProperties><SigningTime>2022-06-08T23:36:50+02:00</SigningTime><SigningCertificate><Cert/></SigningCertificate><SignaturePolicyIdentifier><SignaturePolicyImplied/></SignaturePolicyIdentifier></SignedSignatureProperties><SignedDataObjectProperties/></SignedProperties></QualifyingProperties></Object>"##;
        let mut object = XadesObject::parse(client.as_bytes()).unwrap();

        assert!(object.has_signing_certificate_v1());
        assert_eq!(object.signed_properties_id(), Some("client-id"));
        assert_eq!(
            object.signing_time().unwrap().unwrap().to_rfc3339(),
            "2022-06-08T21:36:50+00:00"
        );

        let id = object
            .update_signed_properties(&update_at("2022-06-08T21:36:54Z", &[0xAB; 32], Some(&[0x30, 0x00])))
            .unwrap();
        assert_eq!(id, "client-id");
        assert!(!object.has_signing_certificate_v1());

        let reparsed = XadesObject::parse(&object.to_bytes()).unwrap();
        let qualifying_properties = reparsed.element().find_child(XADES_NS, QUALIFYING_PROPERTIES).unwrap();
        assert_eq!(qualifying_properties.attribute("Target"), Some("#sig-1"));

        let signed_properties = qualifying_properties.find_child(XADES_NS, SIGNED_PROPERTIES).unwrap();
        assert!(signed_properties.find_child(XADES_NS, "SignedDataObjectProperties").is_some());

        let names: Vec<&str> = signed_properties
            .find_child(XADES_NS, SIGNED_SIGNATURE_PROPERTIES)
            .unwrap()
            .child_elements()
            .map(Element::local_name)
            .collect();
        assert_eq!(names, vec![SIGNING_TIME, SIGNING_CERTIFICATE_V2, "SignaturePolicyIdentifier"]);

        let (digest_method, _) = reparsed.element().find_descendant(XMLDSIG_NS, "DigestMethod").unwrap();
        assert_eq!(digest_method.namespace(), Some(XMLDSIG_NS));

        let (issuer_serial, _) = reparsed.element().find_descendant(XADES_NS, "IssuerSerialV2").unwrap();
        assert_eq!(issuer_serial.text(), "MAA=");
    }

    #[test]
    fn canonical_signed_properties_declares_namespaces() {
        let mut object = XadesObject::new();
        object
            .update_signed_properties(&update_at("2022-06-08T21:36:54Z", &[0; 32], None))
            .unwrap();

        let canonical = String::from_utf8(object.canonical_signed_properties().unwrap()).unwrap();
        assert!(canonical.starts_with(
            r#"<xades:SignedProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Id="xades-id-1">"#
        ));
        assert!(canonical.contains(
            r#"<ds:DigestMethod xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"></ds:DigestMethod>"#
        ));
    }

    #[test]
    fn rejects_foreign_objects() {
        assert!(XadesObject::parse(b"<a/>").is_err());

        let err = XadesObject::parse(br#"<ds:Object xmlns:ds="http://www.w3.org/2000/09/xmldsig#"/>"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed XML: No QualifyingProperties element found in XAdES object"
        );
    }

    #[test]
    fn date_time_without_zone_is_utc() {
        assert_eq!(
            parse_date_time("2022-06-08T21:36:54.5").unwrap().timestamp_millis(),
            1_654_724_214_500
        );
        assert!(parse_date_time("yesterday").is_err());
    }
}
