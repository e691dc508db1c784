//! XML support for XML-DSig `SignedInfo` and XAdES `QualifyingProperties` processing

pub mod c14n;
pub mod dom;
pub mod xades;

use thiserror::Error;

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
pub(crate) const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Error)]
pub enum XmlError {
    /// not well-formed XML
    #[error("XML parsing error: {source}")]
    Parse {
        #[from]
        source: quick_xml::Error,
    },

    /// well-formed XML with an unexpected structure
    #[error("malformed XML: {context}")]
    Malformed { context: String },

    #[error("namespace prefix `{prefix}` is not bound")]
    UnboundPrefix { prefix: String },

    #[error("unsupported canonicalization algorithm: {algorithm}")]
    UnsupportedCanonicalization { algorithm: String },
}

impl XmlError {
    pub(crate) fn malformed(context: impl Into<String>) -> Self {
        Self::Malformed {
            context: context.into(),
        }
    }
}
