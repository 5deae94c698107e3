//! Response shapes returned by the TestMachine API.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, TestMachineError};

/// A parsed response together with the raw JSON it came from.
#[derive(Debug, Clone)]
pub struct Payload<T> {
    pub data: T,
    pub raw: Value,
}

impl<T: DeserializeOwned> Payload<T> {
    pub fn parse(raw: Value) -> Result<Self> {
        let data = T::deserialize(&raw)
            .map_err(|e| TestMachineError::MalformedResponse(e.to_string()))?;
        Ok(Self { data, raw })
    }

    /// Parses the value stored under `key` of a JSON object.
    pub fn field(mut raw: Value, key: &str) -> Result<Self> {
        let inner = raw
            .get_mut(key)
            .map(Value::take)
            .filter(|v| !v.is_null())
            .ok_or_else(|| TestMachineError::MalformedResponse(format!("missing field `{key}`")))?;
        Self::parse(inner)
    }
}

/// Aggregate counters the backend nests under `_count`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Counts {
    pub snapshots: Option<u64>,
    pub analyses: Option<u64>,
    pub files: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, rename = "_count")]
    pub count: Counts,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, rename = "_count")]
    pub count: Counts,
}

/// Body returned when a repository or snapshot is created.
#[derive(Debug, Clone, Deserialize)]
pub struct Created {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: i64,
    #[serde(default)]
    pub analysis_request_id: Option<i64>,
    pub tool: Named,
    pub status: String,
    #[serde(default)]
    pub requested_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub target: Option<Named>,
    #[serde(default)]
    pub observations: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub id: i64,
    #[serde(default)]
    pub requested_at: Option<String>,
    pub analyses: Vec<Analysis>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCatalog {
    pub tools: Vec<String>,
}

impl ToolCatalog {
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool == name)
    }
}

/// Generated report lookup; exactly one of the two fields is expected.
#[derive(Debug, Clone, Deserialize)]
pub struct Report {
    #[serde(default, rename = "downloadURLOfGeneratedReport")]
    pub download_url: Option<String>,
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repository_missing_counts_default_to_zero() {
        let repo: Payload<Repository> =
            Payload::parse(json!({"id": 1, "name": "foo", "createdAt": "2024-01-01"})).unwrap();
        assert_eq!(repo.data.count, Counts::default());
        assert_eq!(repo.data.created_at.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn repository_reads_nested_counts() {
        let repo: Payload<Repository> = Payload::parse(
            json!({"id": 1, "name": "foo", "_count": {"snapshots": 3, "analyses": 5}}),
        )
        .unwrap();
        assert_eq!(repo.data.count.snapshots, Some(3));
        assert_eq!(repo.data.count.analyses, Some(5));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let result = Payload::<Repository>::parse(json!({"name": "foo"}));
        assert!(matches!(result, Err(TestMachineError::MalformedResponse(_))));
    }

    #[test]
    fn field_extracts_nested_value() {
        let payload: Payload<Vec<Repository>> =
            Payload::field(json!({"repositories": [{"id": 2, "name": "bar"}]}), "repositories")
                .unwrap();
        assert_eq!(payload.data.len(), 1);
        assert_eq!(payload.raw, json!([{"id": 2, "name": "bar"}]));
    }

    #[test]
    fn field_missing_is_malformed() {
        let result = Payload::<Vec<Repository>>::field(json!({}), "repositories");
        assert!(matches!(result, Err(TestMachineError::MalformedResponse(_))));
    }

    #[test]
    fn report_fields_are_exclusive_options() {
        let report: Report = serde_json::from_value(json!({"errorMessage": "report not ready"})).unwrap();
        assert!(report.download_url.is_none());
        assert_eq!(report.error_message.as_deref(), Some("report not ready"));
    }

    #[test]
    fn analysis_tolerates_null_optionals() {
        let analysis: Analysis = serde_json::from_value(json!({
            "id": 4,
            "analysisRequestId": 2,
            "tool": {"name": "static"},
            "status": "pending",
            "completedAt": null,
            "error": null
        }))
        .unwrap();
        assert!(analysis.completed_at.is_none());
        assert!(analysis.observations.is_empty());
        assert!(analysis.target.is_none());
    }
}
