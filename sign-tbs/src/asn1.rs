//! DER building blocks on top of the picky-asn1 wrappers.
//!
//! CMS signed attributes must be re-serialized byte exact, so elements are mostly kept as raw DER
//! (`Asn1RawDer`) and only the parts that are inspected get decoded into typed wrappers.

use oid::ObjectIdentifier;
use picky_asn1::wrapper::{Asn1SequenceOf, Asn1SetOf, IntegerAsn1, ObjectIdentifierAsn1, OctetStringAsn1};
use picky_asn1_der::{Asn1DerError, Asn1RawDer};
use serde::{de, ser, Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub(crate) mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const UTC_TIME: u8 = 0x17;
    pub const GENERALIZED_TIME: u8 = 0x18;
    pub const SEQUENCE: u8 = 0x30;
    pub const SET: u8 = 0x31;
    pub const CTX_0_CONSTRUCTED: u8 = 0xA0;
    pub const CTX_1_CONSTRUCTED: u8 = 0xA1;
    pub const CTX_4_CONSTRUCTED: u8 = 0xA4;
}

pub(crate) const DER_NULL: [u8; 2] = [tag::NULL, 0x00];

#[derive(Debug, Error)]
pub enum Asn1Error {
    /// ASN1 serialization error
    #[error("(ASN1) couldn't serialize {element}: {source}")]
    Serialization {
        element: &'static str,
        source: Asn1DerError,
    },

    /// ASN1 deserialization error
    #[error("(ASN1) couldn't deserialize {element}: {source}")]
    Deserialization {
        element: &'static str,
        source: Asn1DerError,
    },

    /// structurally invalid element
    #[error("(ASN1) invalid {element}: {context}")]
    Invalid { element: &'static str, context: String },
}

impl Asn1Error {
    pub(crate) fn invalid(element: &'static str, context: impl Into<String>) -> Self {
        Self::Invalid {
            element,
            context: context.into(),
        }
    }
}

pub(crate) fn to_der<T: Serialize>(value: &T, element: &'static str) -> Result<Vec<u8>, Asn1Error> {
    picky_asn1_der::to_vec(value).map_err(|source| Asn1Error::Serialization { element, source })
}

fn from_der<'a, T: Deserialize<'a>>(bytes: &'a [u8], element: &'static str) -> Result<T, Asn1Error> {
    picky_asn1_der::from_bytes(bytes).map_err(|source| Asn1Error::Deserialization { element, source })
}

/// Splits the first TLV of `bytes` into its tag, its content and the bytes following it.
pub(crate) fn split_tlv<'a>(bytes: &'a [u8], element: &'static str) -> Result<(u8, &'a [u8], &'a [u8]), Asn1Error> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| Asn1Error::invalid(element, "empty input"))?;

    if tag & 0x1F == 0x1F {
        return Err(Asn1Error::invalid(element, "high tag numbers are not supported"));
    }

    let (&first_len, rest) = rest
        .split_first()
        .ok_or_else(|| Asn1Error::invalid(element, "truncated length"))?;

    let (len, rest) = if first_len & 0x80 == 0 {
        (usize::from(first_len), rest)
    } else {
        let len_size = usize::from(first_len & 0x7F);
        if len_size == 0 || len_size > 4 || rest.len() < len_size {
            return Err(Asn1Error::invalid(element, "unsupported or truncated length"));
        }

        let len = rest[..len_size]
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte));
        (len, &rest[len_size..])
    };

    if rest.len() < len {
        return Err(Asn1Error::invalid(
            element,
            format!("content truncated (expected {len} bytes, got {})", rest.len()),
        ));
    }

    Ok((tag, &rest[..len], &rest[len..]))
}

/// Returns the content of a single TLV with the expected tag, rejecting trailing bytes.
pub(crate) fn single_tlv_content<'a>(
    bytes: &'a [u8],
    expected_tag: u8,
    element: &'static str,
) -> Result<&'a [u8], Asn1Error> {
    let (tag, content, rest) = split_tlv(bytes, element)?;

    if tag != expected_tag {
        return Err(Asn1Error::invalid(
            element,
            format!("unexpected tag 0x{tag:02X} (expected 0x{expected_tag:02X})"),
        ));
    }

    if !rest.is_empty() {
        return Err(Asn1Error::invalid(element, format!("{} trailing bytes", rest.len())));
    }

    Ok(content)
}

/// Parses a SEQUENCE into the raw DER encodings of its elements.
pub(crate) fn parse_sequence(bytes: &[u8], element: &'static str) -> Result<Vec<Vec<u8>>, Asn1Error> {
    single_tlv_content(bytes, tag::SEQUENCE, element)?;
    let sequence: Asn1SequenceOf<Asn1RawDer> = from_der(bytes, element)?;
    Ok(sequence.0.into_iter().map(|raw| raw.0).collect())
}

/// Parses a SET OF into the raw DER encodings of its elements, preserving input order.
pub(crate) fn parse_set(bytes: &[u8], element: &'static str) -> Result<Vec<Vec<u8>>, Asn1Error> {
    single_tlv_content(bytes, tag::SET, element)?;
    let set: Asn1SetOf<Asn1RawDer> = from_der(bytes, element)?;
    Ok(set.0.into_iter().map(|raw| raw.0).collect())
}

pub(crate) fn der_sequence(elements: &[Vec<u8>], element: &'static str) -> Result<Vec<u8>, Asn1Error> {
    let sequence = Asn1SequenceOf(elements.iter().cloned().map(Asn1RawDer).collect::<Vec<_>>());
    to_der(&sequence, element)
}

/// Encodes a DER `SET OF`, elements sorted ascending by their encoding (X.690 11.6).
pub(crate) fn der_set_of(mut elements: Vec<Vec<u8>>, element: &'static str) -> Result<Vec<u8>, Asn1Error> {
    elements.sort();
    let set = Asn1SetOf(elements.into_iter().map(Asn1RawDer).collect::<Vec<_>>());
    to_der(&set, element)
}

pub(crate) fn der_oid(oid: &ObjectIdentifier) -> Result<Vec<u8>, Asn1Error> {
    to_der(&ObjectIdentifierAsn1(oid.clone()), "object identifier")
}

pub(crate) fn parse_oid(bytes: &[u8], element: &'static str) -> Result<ObjectIdentifier, Asn1Error> {
    single_tlv_content(bytes, tag::OBJECT_IDENTIFIER, element)?;
    let oid: ObjectIdentifierAsn1 = from_der(bytes, element)?;
    Ok(oid.0)
}

pub(crate) fn der_octet_string(value: &[u8]) -> Result<Vec<u8>, Asn1Error> {
    to_der(&OctetStringAsn1(value.to_vec()), "octet string")
}

pub(crate) fn parse_octet_string(bytes: &[u8], element: &'static str) -> Result<Vec<u8>, Asn1Error> {
    single_tlv_content(bytes, tag::OCTET_STRING, element)?;
    let octet_string: OctetStringAsn1 = from_der(bytes, element)?;
    Ok(octet_string.0)
}

/// Encodes an unsigned big-endian magnitude as a minimal DER INTEGER.
pub(crate) fn der_unsigned_integer(magnitude: &[u8]) -> Result<Vec<u8>, Asn1Error> {
    let first_significant = magnitude.iter().position(|byte| *byte != 0).unwrap_or(magnitude.len());
    let magnitude = &magnitude[first_significant..];

    let mut content = Vec::with_capacity(magnitude.len() + 1);
    if magnitude.first().map_or(true, |byte| byte & 0x80 != 0) {
        content.push(0);
    }
    content.extend_from_slice(magnitude);

    to_der(&IntegerAsn1(content), "integer")
}

/// Returns the two's complement big-endian content of an INTEGER.
pub(crate) fn parse_integer(bytes: &[u8], element: &'static str) -> Result<Vec<u8>, Asn1Error> {
    let content = single_tlv_content(bytes, tag::INTEGER, element)?;
    if content.is_empty() {
        return Err(Asn1Error::invalid(element, "empty integer"));
    }

    let integer: IntegerAsn1 = from_der(bytes, element)?;
    Ok(integer.0)
}

/// Replaces the identifier octet of an encoded element, e.g. to turn a SEQUENCE into an
/// `[n] IMPLICIT` context-specific constructed element.
pub(crate) fn retag(mut der: Vec<u8>, new_tag: u8) -> Vec<u8> {
    if let Some(first) = der.first_mut() {
        *first = new_tag;
    }
    der
}

/// X.509 `AlgorithmIdentifier` with exact control over the parameters encoding.
///
/// Encoders disagree on whether absent parameters are written as NULL, so the parameters are kept
/// as raw DER and comparison helpers only look at the algorithm OID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmIdentifier {
    algorithm: ObjectIdentifier,
    parameters: Option<Vec<u8>>,
}

impl AlgorithmIdentifier {
    pub fn new(algorithm: ObjectIdentifier, parameters: Option<Vec<u8>>) -> Self {
        Self { algorithm, parameters }
    }

    pub fn new_with_null_parameters(algorithm: ObjectIdentifier) -> Self {
        Self::new(algorithm, Some(DER_NULL.to_vec()))
    }

    pub fn new_without_parameters(algorithm: ObjectIdentifier) -> Self {
        Self::new(algorithm, None)
    }

    pub fn oid(&self) -> &ObjectIdentifier {
        &self.algorithm
    }

    pub fn oid_string(&self) -> String {
        (&self.algorithm).into()
    }

    /// Raw DER of the parameters, if any.
    pub fn parameters(&self) -> Option<&[u8]> {
        self.parameters.as_deref()
    }

    pub fn is_same_algorithm(&self, other: &AlgorithmIdentifier) -> bool {
        self.algorithm == other.algorithm
    }

    pub fn to_der(&self) -> Result<Vec<u8>, Asn1Error> {
        to_der(self, "algorithm identifier")
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self, Asn1Error> {
        const ELEMENT: &str = "algorithm identifier";

        let elements = parse_sequence(bytes, ELEMENT)?;
        match elements.as_slice() {
            [algorithm] => Ok(Self::new(parse_oid(algorithm, ELEMENT)?, None)),
            [algorithm, parameters] => Ok(Self::new(parse_oid(algorithm, ELEMENT)?, Some(parameters.clone()))),
            _ => Err(Asn1Error::invalid(
                ELEMENT,
                format!("expected 1 or 2 elements, got {}", elements.len()),
            )),
        }
    }
}

impl ser::Serialize for AlgorithmIdentifier {
    fn serialize<S>(&self, serializer: S) -> Result<<S as ser::Serializer>::Ok, <S as ser::Serializer>::Error>
    where
        S: ser::Serializer,
    {
        use ser::SerializeSeq;

        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&ObjectIdentifierAsn1(self.algorithm.clone()))?;
        if let Some(parameters) = &self.parameters {
            seq.serialize_element(&Asn1RawDer(parameters.clone()))?;
        }
        seq.end()
    }
}

impl<'de> de::Deserialize<'de> for AlgorithmIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as de::Deserializer<'de>>::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = AlgorithmIdentifier;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a valid DER-encoded algorithm identifier")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let algorithm: ObjectIdentifierAsn1 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let parameters: Option<Asn1RawDer> = seq.next_element()?;

                Ok(AlgorithmIdentifier {
                    algorithm: algorithm.0,
                    parameters: parameters.map(|raw| raw.0),
                })
            }
        }

        deserializer.deserialize_seq(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oids;

    #[test]
    fn sha256_algorithm_identifier_without_parameters() {
        let algorithm = AlgorithmIdentifier::new_without_parameters(oids::sha256());
        let der = algorithm.to_der().unwrap();
        assert_eq!(hex::encode(&der), "300b0609608648016503040201");
        assert_eq!(AlgorithmIdentifier::from_der(&der).unwrap(), algorithm);
    }

    #[test]
    fn sha1_algorithm_identifier_with_null() {
        let algorithm = AlgorithmIdentifier::new_with_null_parameters(oids::sha1());
        let der = algorithm.to_der().unwrap();
        assert_eq!(hex::encode(&der), "300906052b0e03021a0500");
        assert_eq!(AlgorithmIdentifier::from_der(&der).unwrap().parameters(), Some(&DER_NULL[..]));
    }

    #[test]
    fn same_algorithm_ignores_parameters() {
        let with_null = AlgorithmIdentifier::new_with_null_parameters(oids::sha256());
        let without = AlgorithmIdentifier::new_without_parameters(oids::sha256());
        assert_ne!(with_null, without);
        assert!(with_null.is_same_algorithm(&without));
    }

    #[test]
    fn set_of_is_sorted() {
        let set = der_set_of(vec![vec![0x04, 0x01, 0x02], vec![0x02, 0x01, 0x05]], "test set").unwrap();
        assert_eq!(set, vec![0x31, 0x06, 0x02, 0x01, 0x05, 0x04, 0x01, 0x02]);
        assert_eq!(
            parse_set(&set, "test set").unwrap(),
            vec![vec![0x02, 0x01, 0x05], vec![0x04, 0x01, 0x02]]
        );
    }

    #[test]
    fn sequence_rejects_trailing_bytes() {
        let err = parse_sequence(&[0x30, 0x00, 0x00], "test sequence").unwrap_err();
        assert!(matches!(err, Asn1Error::Invalid { .. }));
    }

    #[test]
    fn set_rejects_sequence_tag() {
        assert!(parse_set(&[0x30, 0x03, 0x02, 0x01, 0x01], "test set").is_err());
    }

    #[test]
    fn unsigned_integer_is_minimal() {
        assert_eq!(der_unsigned_integer(&[0x00, 0x00, 0x7F]).unwrap(), vec![0x02, 0x01, 0x7F]);
        assert_eq!(der_unsigned_integer(&[0x80]).unwrap(), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(der_unsigned_integer(&[]).unwrap(), vec![0x02, 0x01, 0x00]);
    }

    #[test]
    fn long_form_length() {
        let mut der = vec![0x04, 0x81, 0x80];
        der.extend_from_slice(&[0xAB; 0x80]);
        assert_eq!(parse_octet_string(&der, "test").unwrap(), vec![0xAB; 0x80]);
    }
}
