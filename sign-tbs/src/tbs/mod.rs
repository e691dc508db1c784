//! To-be-signed data processing.
//!
//! A [`TbsProcessor`] turns a client [`SignatureTask`] into the exact bytes to sign. Processing
//! runs in two phases:
//!
//! 1. [`TbsProcessor::check_sign_task`] validates the task and reports structural problems as
//!    [`TbsError::InvalidRequest`].
//! 2. The type specific construction enforces AdES compliance and builds the TBS bytes. Any
//!    failure is a [`TbsError::Signature`].
//!
//! When the phases run through [`TbsProcessor::process_sign_task_data`], an invalid request found
//! in phase 1 is reported as a signature error.

#[cfg(feature = "pdf")]
pub mod pdf;

#[cfg(feature = "xml")]
pub mod xml;

pub mod provider;

use crate::error::{Result, TbsError};
use crate::signature::SignatureAlgorithm;
use crate::x509::SignerCertificate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureType {
    Xml,
    Pdf,
    Json,
    Cms,
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml => write!(f, "XML"),
            Self::Pdf => write!(f, "PDF"),
            Self::Json => write!(f, "JSON"),
            Self::Cms => write!(f, "CMS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdesType {
    #[default]
    None,
    Bes,
    Epes,
}

impl AdesType {
    pub fn is_ades(self) -> bool {
        matches!(self, Self::Bes | Self::Epes)
    }
}

/// AdES fragment exchanged with the client.
///
/// For XML signatures `object_bytes` holds a serialized `ds:Object` wrapping XAdES
/// `QualifyingProperties`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdesObject {
    pub signature_id: Option<String>,
    pub object_bytes: Option<Vec<u8>>,
}

impl AdesObject {
    pub fn new(signature_id: impl Into<String>, object_bytes: Option<Vec<u8>>) -> Self {
        Self {
            signature_id: Some(signature_id.into()),
            object_bytes,
        }
    }
}

/// A requested signature task as decoded from the sign request.
///
/// `tbs_data` and `signature_type` are optional since the wire request may omit them; the
/// processors report their absence as an invalid request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureTask {
    pub signature_id: Option<String>,
    pub signature_type: Option<SignatureType>,
    pub tbs_data: Option<Vec<u8>>,
    pub ades_type: AdesType,
    pub ades_object: Option<AdesObject>,
    pub processing_rules_uri: Option<String>,
}

impl SignatureTask {
    pub fn new(signature_type: SignatureType, tbs_data: impl Into<Vec<u8>>) -> Self {
        Self {
            signature_type: Some(signature_type),
            tbs_data: Some(tbs_data.into()),
            ..Self::default()
        }
    }

    pub fn with_signature_id(mut self, signature_id: impl Into<String>) -> Self {
        self.signature_id = Some(signature_id.into());
        self
    }

    pub fn with_ades(mut self, ades_type: AdesType, ades_object: Option<AdesObject>) -> Self {
        self.ades_type = ades_type;
        self.ades_object = ades_object;
        self
    }

    pub fn with_processing_rules(mut self, processing_rules_uri: impl Into<String>) -> Self {
        self.processing_rules_uri = Some(processing_rules_uri.into());
        self
    }

    pub fn is_ades(&self) -> bool {
        self.ades_type.is_ades()
    }
}

/// Result of TBS processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbsProcessingData {
    pub tbs_bytes: Vec<u8>,
    pub processing_rules: Option<String>,
    pub ades_object: Option<AdesObject>,
}

/// Behavior shaping configuration shared by all processors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessorConfig {
    /// Processing rule URIs a client may request
    pub supported_processing_rules: Vec<String>,
    /// Reject non-compliant input instead of silently fixing it
    pub strict_processing: bool,
    /// Include the RFC 5035 issuer serial in signing certificate references
    pub include_issuer_serial: bool,
    #[serde(with = "duration_secs")]
    pub allowed_clock_skew: Duration,
    #[serde(with = "duration_secs")]
    pub max_message_age: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            supported_processing_rules: Vec::new(),
            strict_processing: false,
            include_issuer_serial: false,
            allowed_clock_skew: Duration::from_secs(30),
            max_message_age: Duration::from_secs(180),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub trait TbsProcessor {
    /// Whether this processor handles the given signature type.
    fn supports(&self, signature_type: SignatureType) -> bool;

    /// Validates a sign task before any processing.
    ///
    /// Every failure is reported as [`TbsError::InvalidRequest`].
    fn check_sign_task(&self, task: &SignatureTask, algorithm: &SignatureAlgorithm) -> Result<()>;

    /// Checks the task and produces the data to be signed.
    fn process_sign_task_data(
        &self,
        task: &SignatureTask,
        signer_certificate: &SignerCertificate,
        algorithm: &SignatureAlgorithm,
    ) -> Result<TbsProcessingData>;
}

/// State and checks common to every processor: immutable configuration plus the clock.
#[derive(Clone)]
pub(crate) struct ProcessorBase {
    config: ProcessorConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ProcessorBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorBase").field("config", &self.config).finish_non_exhaustive()
    }
}

impl ProcessorBase {
    pub(crate) fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Checks the fields every task needs and returns the TBS data along with the AdES flag.
    pub(crate) fn check_common<'a>(&self, task: &'a SignatureTask) -> Result<(&'a [u8], SignatureType, bool)> {
        let tbs_data = task
            .tbs_data
            .as_deref()
            .ok_or_else(|| TbsError::invalid_request("Null TBS data in sign request"))?;
        let signature_type = task
            .signature_type
            .ok_or_else(|| TbsError::invalid_request("SignatureType must not be null"))?;

        Ok((tbs_data, signature_type, task.is_ades()))
    }

    /// A requested rule must be one of the configured ones. No rule is always accepted.
    pub(crate) fn check_processing_rule(&self, processing_rules_uri: Option<&str>) -> Result<()> {
        let supported = &self.config.supported_processing_rules;

        match processing_rules_uri {
            None => {
                log::debug!("Using default processing rules");
                Ok(())
            }
            Some(uri) if supported.iter().any(|rule| rule == uri) => {
                log::debug!("Using supported processing rule: {uri}");
                Ok(())
            }
            Some(uri) => Err(TbsError::signature(format!(
                "Processing rule {uri} is not supported. Expected one of [{}]",
                supported.join(", ")
            ))),
        }
    }

    /// A client supplied signing time must fall within
    /// `[now - max_message_age - allowed_clock_skew, now + allowed_clock_skew]`.
    pub(crate) fn check_signing_time(&self, signing_time: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let skew = to_time_delta(self.config.allowed_clock_skew);
        let max_age = to_time_delta(self.config.max_message_age);

        let not_after = now.checked_add_signed(skew);
        let not_before = now
            .checked_sub_signed(max_age)
            .and_then(|instant| instant.checked_sub_signed(skew));

        if not_after.map_or(false, |not_after| signing_time > not_after) {
            return Err(TbsError::invalid_request(
                "Signature request contains an illegal signing time (future date)",
            ));
        }

        if not_before.map_or(false, |not_before| signing_time < not_before) {
            return Err(TbsError::invalid_request(
                "Signature request contains an illegal signing time (too old)",
            ));
        }

        Ok(())
    }
}

// saturates, an out of range duration means no bound on that side
fn to_time_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::max_value())
}

/// Invalid requests found while checking a task are reported as signature errors once
/// processing has started.
pub(crate) fn request_error_to_signature_error(e: TbsError) -> TbsError {
    match e {
        TbsError::InvalidRequest { context } => TbsError::Signature { context },
        other => other,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base_at(now: &str) -> (ProcessorBase, DateTime<Utc>) {
        let mut base = ProcessorBase::new(ProcessorConfig::default());
        base.set_clock(test_utils::fixed_clock(now));
        let now = base.now();
        (base, now)
    }

    #[rstest]
    #[case(-250, false)]
    #[case(-210, true)]
    #[case(-10, true)]
    #[case(0, true)]
    #[case(30, true)]
    #[case(50, false)]
    fn signing_time_window(#[case] offset_secs: i64, #[case] accepted: bool) {
        let (base, now) = base_at("2022-06-08T21:36:54Z");
        let signing_time = now + chrono::Duration::seconds(offset_secs);

        let result = base.check_signing_time(signing_time, now);
        assert_eq!(result.is_ok(), accepted, "{result:?}");
        if let Err(e) = result {
            assert!(matches!(e, TbsError::InvalidRequest { .. }));
        }
    }

    #[test]
    fn unbounded_message_age() {
        let mut config = ProcessorConfig::default();
        config.max_message_age = Duration::MAX;
        let base = ProcessorBase::new(config);

        let now = Utc::now();
        assert!(base.check_signing_time(now - chrono::Duration::days(10_000), now).is_ok());
    }

    #[test]
    fn processing_rules() {
        let base = ProcessorBase::new(ProcessorConfig {
            supported_processing_rules: vec!["urn:rule:a".to_owned(), "urn:rule:b".to_owned()],
            ..ProcessorConfig::default()
        });

        assert!(base.check_processing_rule(None).is_ok());
        assert!(base.check_processing_rule(Some("urn:rule:b")).is_ok());

        let err = base.check_processing_rule(Some("urn:rule:c")).unwrap_err();
        assert!(err.is_signature_error());
        assert_eq!(
            err.to_string(),
            "signature error: Processing rule urn:rule:c is not supported. Expected one of [urn:rule:a, urn:rule:b]"
        );
    }

    #[test]
    fn missing_task_fields() {
        let base = ProcessorBase::new(ProcessorConfig::default());

        let mut task = SignatureTask::new(SignatureType::Pdf, vec![0x31, 0x00]);
        assert!(base.check_common(&task).is_ok());

        task.signature_type = None;
        let err = base.check_common(&task).unwrap_err();
        assert_eq!(err.to_string(), "invalid request: SignatureType must not be null");

        task.tbs_data = None;
        let err = base.check_common(&task).unwrap_err();
        assert_eq!(err.to_string(), "invalid request: Null TBS data in sign request");
        assert!(request_error_to_signature_error(err).is_signature_error());
    }

    #[test]
    fn config_durations_are_seconds() {
        use serde::de::value::{Error, MapDeserializer};

        let input = MapDeserializer::<_, Error>::new([("allowedClockSkew", 5u64), ("maxMessageAge", 60u64)].into_iter());
        let parsed = ProcessorConfig::deserialize(input).unwrap();

        assert_eq!(parsed.allowed_clock_skew, Duration::from_secs(5));
        assert_eq!(parsed.max_message_age, Duration::from_secs(60));
        assert!(!parsed.strict_processing);
        assert!(parsed.supported_processing_rules.is_empty());
    }
}
