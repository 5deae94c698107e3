use std::time::Duration;

use log::debug;
use reqwest::blocking::{multipart::Form, RequestBuilder};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, TestMachineError};
use crate::models::{
    Analysis, AnalysisRequest, Created, Payload, Report, Repository, Snapshot, ToolCatalog,
};

pub const DEFAULT_BASE_URL: &str = "https://api.testmachine.ai";
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

#[derive(Serialize)]
struct CreateRepositoryRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    tools: &'a [String],
}

pub struct TestMachineClient {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl TestMachineClient {
    pub fn new(base_url: &str, token: &str, timeout_secs: f64) -> Result<Self> {
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(TestMachineError::InvalidTimeout);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.bearer_auth(&self.token).send()?;
        let status = response.status();
        debug!("{} {}", status.as_u16(), response.url());
        let body = response.text()?;
        if !status.is_success() {
            return Err(TestMachineError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| TestMachineError::MalformedResponse(e.to_string()))
    }

    fn get(&self, path: &str) -> Result<Value> {
        debug!("GET {path}");
        self.send(self.client.get(self.url(path)))
    }

    fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        debug!("POST {path}");
        self.send(self.client.post(self.url(path)).json(body))
    }

    pub fn list_repositories(&self) -> Result<Payload<Vec<Repository>>> {
        Payload::field(self.get("/repositories")?, "repositories")
    }

    pub fn create_repository(&self, name: &str) -> Result<Payload<Created>> {
        Payload::parse(self.post_json("/repositories", &CreateRepositoryRequest { name })?)
    }

    pub fn list_snapshots(&self, repo_id: u64) -> Result<Payload<Vec<Snapshot>>> {
        Payload::field(
            self.get(&format!("/repositories/{repo_id}/snapshots"))?,
            "snapshots",
        )
    }

    /// Uploads a snapshot; the form carries one `files` part per attachment.
    pub fn create_snapshot(&self, repo_id: u64, form: Form) -> Result<Payload<Created>> {
        let path = format!("/repositories/{repo_id}/snapshots");
        debug!("POST {path} (multipart)");
        Payload::parse(self.send(self.client.post(self.url(&path)).multipart(form))?)
    }

    pub fn tool_catalog(&self) -> Result<Payload<ToolCatalog>> {
        Payload::parse(self.get("/analyses/tools")?)
    }

    pub fn analyze_snapshot(
        &self,
        snapshot_id: u64,
        tools: &[String],
    ) -> Result<Payload<AnalysisRequest>> {
        let value = self.post_json(
            &format!("/snapshots/{snapshot_id}/analyses"),
            &AnalyzeRequest { tools },
        )?;
        Payload::field(value, "analysisRequest").map_err(|_| {
            TestMachineError::MalformedResponse("analysis could not be created".into())
        })
    }

    pub fn list_analyses(&self, snapshot_id: u64) -> Result<Payload<Vec<Analysis>>> {
        Payload::parse(self.get(&format!("/snapshots/{snapshot_id}/analyses"))?)
    }

    pub fn get_analysis(&self, analysis_id: u64) -> Result<Payload<Analysis>> {
        Payload::parse(self.get(&format!("/analyses/{analysis_id}"))?)
    }

    pub fn get_report(&self, analysis_id: u64) -> Result<Payload<Report>> {
        Payload::parse(self.get(&format!("/analyses/{analysis_id}/report"))?)
    }
}
