//! Runner HTTP client

use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use specdeck_common::{DiscoveredTest, PlannedResult, RelayView, RunState};

/// `/status` reply: the run state plus the credential relay view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    #[serde(flatten)]
    pub state: RunState,
    #[serde(default)]
    pub auth: Option<RelayView>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub specs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_results: Vec<PlannedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReply {
    pub specs: Vec<String>,
    pub base_domain: String,
}

#[derive(Debug, Deserialize)]
struct TestsReply {
    tests: Vec<DiscoveredTest>,
}

#[derive(Debug, Deserialize)]
struct MessageReply {
    #[serde(default)]
    message: String,
}

/// Client for the runner's HTTP API
pub struct RunnerClient {
    http: Client,
    base: String,
}

impl RunnerClient {
    pub fn new(server: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: server.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn tests(&self) -> Result<Vec<DiscoveredTest>> {
        let reply: TestsReply = self.get("/tests").await?;
        Ok(reply.tests)
    }

    pub async fn status(&self) -> Result<StatusReply> {
        self.get("/status").await
    }

    pub async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerReply> {
        let response = self
            .http
            .post(self.url("/trigger"))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    /// Returns the server's confirmation message.
    pub async fn stop(&self) -> Result<String> {
        let reply: MessageReply = self.get("/stop").await?;
        Ok(reply.message)
    }

    pub async fn clear(&self) -> Result<String> {
        let reply: MessageReply = self.get("/clear").await?;
        Ok(reply.message)
    }

    pub async fn fulfill_auth(&self, value: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/auth/fulfill"))
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await?;
        let _: serde_json::Value = decode(response).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(url = %self.url(path), "GET");
        let response = self.http.get(self.url(path)).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<MessageReply>(&body)
            .map(|m| m.message)
            .unwrap_or(body);
        return Err(anyhow!("runner returned {}: {}", status, message));
    }
    serde_json::from_str(&body).map_err(|e| anyhow!("unexpected runner response: {}", e))
}
