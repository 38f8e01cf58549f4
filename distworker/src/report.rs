//! Test and collection reports, and their conversion to wire data.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::encode::try_encode_map;
use crate::error::EncodeError;
use crate::protocol::ItemIndex;

/// `(fspath, lineno, domain)` of a test item, as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location(pub String, pub Option<u32>, pub String);

impl Location {
    pub fn new(fspath: impl Into<String>, lineno: Option<u32>, domain: impl Into<String>) -> Self {
        Self(fspath.into(), lineno, domain.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Phase of the per-item run protocol a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

/// A host report that can leave the worker.
///
/// `to_serializable` is the host's own conversion; the worker only adds
/// correlation fields on top of it.
pub trait Report: Send + Sync {
    fn nodeid(&self) -> &str;

    fn outcome(&self) -> Outcome;

    fn to_serializable(&self) -> Result<Map<String, Value>, EncodeError>;

    fn passed(&self) -> bool {
        self.outcome() == Outcome::Passed
    }

    fn failed(&self) -> bool {
        self.outcome() == Outcome::Failed
    }
}

/// Result of one phase of running a test item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub nodeid: String,
    pub location: Location,
    #[serde(default)]
    pub keywords: IndexMap<String, Value>,
    pub outcome: Outcome,
    pub longrepr: Option<String>,
    pub when: Phase,
    #[serde(default)]
    pub sections: Vec<(String, String)>,
    /// Seconds.
    pub duration: f64,
    /// Wall-clock start, seconds since the epoch.
    pub start: f64,
    pub stop: f64,
    #[serde(default)]
    pub user_properties: Vec<(String, Value)>,
}

impl TestReport {
    pub fn new(nodeid: impl Into<String>, location: Location, when: Phase, outcome: Outcome) -> Self {
        Self {
            nodeid: nodeid.into(),
            location,
            keywords: IndexMap::new(),
            outcome,
            longrepr: None,
            when,
            sections: Vec::new(),
            duration: 0.0,
            start: 0.0,
            stop: 0.0,
            user_properties: Vec::new(),
        }
    }
}

impl Report for TestReport {
    fn nodeid(&self) -> &str {
        &self.nodeid
    }

    fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn to_serializable(&self) -> Result<Map<String, Value>, EncodeError> {
        let mut data = try_encode_map(self)?;
        data.insert("$report_type".to_string(), Value::from("TestReport"));
        Ok(data)
    }
}

/// Result of collecting one collector (a plan file, a module, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectReport {
    pub nodeid: String,
    pub outcome: Outcome,
    pub longrepr: Option<String>,
    /// Node ids of the items this collector produced.
    #[serde(default)]
    pub result: Vec<String>,
    #[serde(default)]
    pub sections: Vec<(String, String)>,
}

impl CollectReport {
    pub fn ok(nodeid: impl Into<String>, result: Vec<String>) -> Self {
        Self {
            nodeid: nodeid.into(),
            outcome: Outcome::Passed,
            longrepr: None,
            result,
            sections: Vec::new(),
        }
    }

    pub fn error(nodeid: impl Into<String>, longrepr: impl Into<String>) -> Self {
        Self {
            nodeid: nodeid.into(),
            outcome: Outcome::Failed,
            longrepr: Some(longrepr.into()),
            result: Vec::new(),
            sections: Vec::new(),
        }
    }
}

impl Report for CollectReport {
    fn nodeid(&self) -> &str {
        &self.nodeid
    }

    fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn to_serializable(&self) -> Result<Map<String, Value>, EncodeError> {
        let mut data = try_encode_map(self)?;
        data.insert("$report_type".to_string(), Value::from("CollectReport"));
        Ok(data)
    }
}

/// Converts an item report and tags it with where it came from.
///
/// Failure is returned, never swallowed: a lost report would leave the
/// controller with a wrong picture of the session.
pub fn serialize_test_report(
    report: &dyn Report,
    item_index: ItemIndex,
    worker_id: &str,
    testrun_uid: &str,
) -> Result<Map<String, Value>, EncodeError> {
    let mut data = report.to_serializable()?;
    data.insert("item_index".to_string(), Value::from(item_index));
    data.insert("worker_id".to_string(), Value::from(worker_id));
    data.insert("testrun_uid".to_string(), Value::from(testrun_uid));
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::tests::Opaque;
    use serde_json::json;

    struct BrokenReport;

    impl Report for BrokenReport {
        fn nodeid(&self) -> &str {
            "broken::item"
        }

        fn outcome(&self) -> Outcome {
            Outcome::Passed
        }

        fn to_serializable(&self) -> Result<Map<String, Value>, EncodeError> {
            try_encode_map(&Opaque("frame"))
        }
    }

    fn call_report(outcome: Outcome) -> TestReport {
        let mut report = TestReport::new(
            "plan.json::alpha",
            Location::new("plan.json", None, "alpha"),
            Phase::Call,
            outcome,
        );
        report.duration = 0.5;
        report.sections.push(("Captured stdout call".to_string(), "hi\n".to_string()));
        report
    }

    #[test]
    fn correlation_fields_are_added() {
        let report = call_report(Outcome::Passed);
        let data = serialize_test_report(&report, 7, "gw1", "abc123").unwrap();

        assert_eq!(data["item_index"], json!(7));
        assert_eq!(data["worker_id"], json!("gw1"));
        assert_eq!(data["testrun_uid"], json!("abc123"));
        assert_eq!(data["$report_type"], json!("TestReport"));
        assert_eq!(data["outcome"], json!("passed"));
        assert_eq!(data["when"], json!("call"));
    }

    #[test]
    fn test_report_survives_the_wire() {
        let report = call_report(Outcome::Failed);
        let data = serialize_test_report(&report, 0, "gw0", "uid").unwrap();
        let decoded: TestReport = serde_json::from_value(Value::Object(data)).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn unencodable_report_propagates() {
        let err = serialize_test_report(&BrokenReport, 0, "gw0", "uid").unwrap_err();
        assert!(matches!(err, EncodeError::Unencodable(_)));
    }

    #[test]
    fn collect_report_outcomes() {
        let ok = CollectReport::ok("plan.json", vec!["plan.json::a".to_string()]);
        assert!(ok.passed());
        let bad = CollectReport::error("plan.json", "no such file");
        assert!(bad.failed());
        assert_eq!(bad.to_serializable().unwrap()["$report_type"], json!("CollectReport"));
    }
}
