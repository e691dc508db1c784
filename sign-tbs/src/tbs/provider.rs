//! Selection of the TBS processor matching a signature type.

#[cfg(feature = "pdf")]
use super::pdf::PdfTbsProcessor;
#[cfg(feature = "xml")]
use super::xml::XmlTbsProcessor;
use super::{Clock, ProcessorConfig, SignatureTask, SignatureType, TbsProcessingData, TbsProcessor};
use crate::error::{Result, TbsError};
use crate::signature::SignatureAlgorithm;
use crate::x509::SignerCertificate;
use std::sync::Arc;

/// One of the available processors.
#[derive(Debug, Clone)]
pub enum AnyTbsProcessor {
    #[cfg(feature = "xml")]
    Xml(XmlTbsProcessor),
    #[cfg(feature = "pdf")]
    Pdf(PdfTbsProcessor),
}

macro_rules! dispatch {
    ($self:ident, $processor:ident => $e:expr) => {
        match *$self {
            #[cfg(feature = "xml")]
            AnyTbsProcessor::Xml(ref $processor) => $e,
            #[cfg(feature = "pdf")]
            AnyTbsProcessor::Pdf(ref $processor) => $e,
        }
    };
}

impl TbsProcessor for AnyTbsProcessor {
    fn supports(&self, signature_type: SignatureType) -> bool {
        dispatch!(self, processor => processor.supports(signature_type))
    }

    fn check_sign_task(&self, task: &SignatureTask, algorithm: &SignatureAlgorithm) -> Result<()> {
        dispatch!(self, processor => processor.check_sign_task(task, algorithm))
    }

    fn process_sign_task_data(
        &self,
        task: &SignatureTask,
        signer_certificate: &SignerCertificate,
        algorithm: &SignatureAlgorithm,
    ) -> Result<TbsProcessingData> {
        dispatch!(self, processor => processor.process_sign_task_data(task, signer_certificate, algorithm))
    }
}

/// Holds one processor per supported signature type, all sharing the same configuration.
#[derive(Debug, Clone)]
pub struct TbsProcessorProvider {
    processors: Vec<AnyTbsProcessor>,
}

impl TbsProcessorProvider {
    pub fn new(config: ProcessorConfig) -> Self {
        let mut processors = Vec::new();

        #[cfg(feature = "xml")]
        processors.push(AnyTbsProcessor::Xml(XmlTbsProcessor::new(config.clone())));

        #[cfg(feature = "pdf")]
        processors.push(AnyTbsProcessor::Pdf(PdfTbsProcessor::new(config.clone())));

        log::debug!("TBS processor provider with {} processors", processors.len());

        Self { processors }
    }

    /// Replaces the clock of every processor.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        let processors = self
            .processors
            .into_iter()
            .map(|processor| match processor {
                #[cfg(feature = "xml")]
                AnyTbsProcessor::Xml(xml) => AnyTbsProcessor::Xml(xml.with_clock(Arc::clone(&clock))),
                #[cfg(feature = "pdf")]
                AnyTbsProcessor::Pdf(pdf) => AnyTbsProcessor::Pdf(pdf.with_clock(Arc::clone(&clock))),
            })
            .collect();

        Self { processors }
    }

    /// Returns the processor handling `signature_type`.
    ///
    /// A missing signature type is a caller defect and reported as [`TbsError::Programming`].
    pub fn get_processor(&self, signature_type: Option<SignatureType>) -> Result<&AnyTbsProcessor> {
        let signature_type =
            signature_type.ok_or_else(|| TbsError::programming("Signature type must not be null"))?;

        self.processors
            .iter()
            .find(|processor| processor.supports(signature_type))
            .ok_or_else(|| TbsError::UnsupportedSignatureType {
                signature_type: signature_type.to_string(),
            })
    }
}
