//! The diagnostic vocabulary produced while verifying a document (§4.G/§4.H), grounded on the
//! spruceid `Failure`-with-reason-string texture but reshaped around the spec's fixed
//! status/category/check vocabulary instead of free-form numeric codes.

use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Passed,
    Warning,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    #[strum(serialize = "DOCUMENT_FORMAT")]
    DocumentFormat,
    #[strum(serialize = "ISSUER_AUTH")]
    IssuerAuth,
    #[strum(serialize = "DEVICE_AUTH")]
    DeviceAuth,
    #[strum(serialize = "DATA_INTEGRITY")]
    DataIntegrity,
}

/// A single named check performed while verifying a document, with its outcome and, when it did
/// not pass cleanly, a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub status: Status,
    pub category: Category,
    pub check: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Assessment {
    pub fn passed(category: Category, check: &'static str) -> Self {
        Self { status: Status::Passed, category, check, reason: None }
    }

    pub fn warning(category: Category, check: &'static str, reason: impl Into<String>) -> Self {
        Self { status: Status::Warning, category, check, reason: Some(reason.into()) }
    }

    pub fn failed(category: Category, check: &'static str, reason: impl Into<String>) -> Self {
        Self { status: Status::Failed, category, check, reason: Some(reason.into()) }
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }
}

/// All assessments gathered for a single document, in the order they were performed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub doc_type: String,
    pub assessments: Vec<Assessment>,
}

impl Report {
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self { doc_type: doc_type.into(), assessments: Vec::new() }
    }

    pub fn passed(&self) -> bool {
        self.assessments.iter().all(|a| a.status != Status::Failed)
    }

    pub fn first_failure(&self) -> Option<&Assessment> {
        self.assessments.iter().find(|a| a.is_failed())
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &Assessment> {
        self.assessments.iter().filter(move |a| a.category == category)
    }
}

/// Where performed checks go, per the distilled spec's design note: either every assessment is
/// handed to a caller-supplied sink as it's produced (`Collect`), or the orchestrator stops at the
/// first failure and raises it as an [`crate::Error::Mdl`] (`FailFast`). [`VerifyOptions::on_check`]
/// being `Some`/`None` selects between the two.
pub trait AssessmentSink {
    fn record(&mut self, assessment: Assessment);
}

impl<F: FnMut(Assessment)> AssessmentSink for F {
    fn record(&mut self, assessment: Assessment) {
        self(assessment)
    }
}

/// A sink that simply collects every assessment handed to it, in order.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink(pub Vec<Assessment>);

impl AssessmentSink for CollectingSink {
    fn record(&mut self, assessment: Assessment) {
        self.0.push(assessment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_display_matches_spec_vocabulary() {
        assert_eq!(Category::DataIntegrity.to_string(), "DATA_INTEGRITY");
        assert_eq!(Category::IssuerAuth.to_string(), "ISSUER_AUTH");
    }

    #[test]
    fn collecting_sink_records_in_order() {
        let mut sink = CollectingSink::default();
        sink.record(Assessment::passed(Category::DocumentFormat, "a"));
        sink.record(Assessment::failed(Category::DocumentFormat, "b", "boom"));
        assert_eq!(sink.0.len(), 2);
        assert_eq!(sink.0[1].check, "b");
    }
}
