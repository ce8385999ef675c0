use crate::config::DiagnosisConfig;
use crate::snapshot::{ServicesSnapshot, SystemSnapshot};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_ACTION_HISTORY: &str = "No specific actions logged recently.";
pub const PARSE_ERROR_MARKER: &str = "Could not parse AI response as JSON";

#[derive(Debug, Error)]
pub enum DiagnosisError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("model request failed: {0}")]
    Upstream(String),
    #[error("model returned an unusable diagnosis: {0}")]
    Malformed(String),
    #[error("diagnosis model is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, DiagnosisError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiagnosisRequest {
    pub system_status: String,
    pub recent_logs: String,
    #[serde(default)]
    pub action_history: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub diagnosis: String,
    pub suggested_actions: String,
}

#[derive(Clone)]
pub struct DiagnosisGateway {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl DiagnosisGateway {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    pub fn disabled() -> Self {
        Self { generator: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn diagnose(&self, request: &DiagnosisRequest) -> Result<Diagnosis, DiagnosisError> {
        if request.system_status.trim().is_empty() {
            return Err(DiagnosisError::Validation("System status cannot be empty."));
        }
        if request.recent_logs.trim().is_empty() {
            return Err(DiagnosisError::Validation("Recent logs cannot be empty."));
        }
        let generator = self.generator.as_ref().ok_or(DiagnosisError::NotConfigured)?;

        let history = request
            .action_history
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_ACTION_HISTORY);
        let prompt = diagnosis_prompt(&request.system_status, &request.recent_logs, history);

        let text = generator.generate(&prompt).await?;
        debug!(chars = text.len(), "diagnosis response received");
        parse_diagnosis(&text)
    }

    pub async fn analyze(
        &self,
        system_status: &str,
        syslog: &str,
        auth_log: &str,
    ) -> Result<Value, DiagnosisError> {
        let generator = self.generator.as_ref().ok_or(DiagnosisError::NotConfigured)?;
        let prompt = analysis_prompt(system_status, syslog, auth_log);
        let text = generator.generate(&prompt).await?;

        match serde_json::from_str::<Value>(extract_json(&text)) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "analysis response is not JSON");
                Ok(json!({ "raw": text, "parseError": PARSE_ERROR_MARKER }))
            }
        }
    }
}

fn diagnosis_prompt(system_status: &str, recent_logs: &str, action_history: &str) -> String {
    format!(
        "You are an expert system administrator specializing in diagnosing system issues.\n\n\
         Use the system status, recent logs and action history below to diagnose the system \
         and suggest actions that resolve any issues.\n\n\
         System Status: {system_status}\n\
         Recent Logs: {recent_logs}\n\
         Action History: {action_history}\n\n\
         Respond with a JSON object with exactly two string keys: \
         \"diagnosis\" and \"suggestedActions\"."
    )
}

fn analysis_prompt(system_status: &str, syslog: &str, auth_log: &str) -> String {
    format!(
        "As a system administrator, analyze these logs and system status:\n\n\
         SYSTEM STATUS:\n{system_status}\n\n\
         RECENT SYSLOG:\n{syslog}\n\n\
         AUTH LOG:\n{auth_log}\n\n\
         Based on this information:\n\
         1. Identify any potential issues or anomalies\n\
         2. Suggest possible causes for any problems detected\n\
         3. Recommend specific actions to resolve the issues\n\
         4. Rate the severity of any detected problems on a scale of 1-5\n\n\
         Format your response as JSON with these keys: issues, causes, recommendations, \
         severity, explanation"
    )
}

pub fn extract_json(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text.trim();
    };
    let after_fence = &text[start + 3..];
    // Skip the info string (`json`, empty, ...) up to the end of that line.
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => after_fence,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => text.trim(),
    }
}

fn parse_diagnosis(text: &str) -> Result<Diagnosis, DiagnosisError> {
    let value: Value = serde_json::from_str(extract_json(text))
        .map_err(|err| DiagnosisError::Malformed(err.to_string()))?;
    let diagnosis = text_field(&value, "diagnosis")
        .ok_or_else(|| DiagnosisError::Malformed("missing \"diagnosis\"".to_string()))?;
    let suggested_actions = text_field(&value, "suggestedActions")
        .ok_or_else(|| DiagnosisError::Malformed("missing \"suggestedActions\"".to_string()))?;
    Ok(Diagnosis {
        diagnosis,
        suggested_actions,
    })
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let lines: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
            lines.map(|lines| lines.join("\n"))
        }
        _ => None,
    }
}

pub fn describe_system(
    system: Option<&SystemSnapshot>,
    services: Option<&ServicesSnapshot>,
) -> String {
    let mut report = String::from("System Status:\n");
    match system {
        Some(s) => {
            report.push_str(&format!(
                "- Host: {} ({}, kernel {})\n",
                s.hostname, s.distro, s.kernel
            ));
            report.push_str(&format!("- Uptime: {}\n", s.uptime));
            report.push_str(&format!(
                "- Load average: {:.2} {:.2} {:.2} on {} cores\n",
                s.load.load1, s.load.load5, s.load.load15, s.cpu_cores
            ));
            report.push_str(&format!("- Memory usage: {}%\n", s.memory.percent));
            for disk in &s.disks {
                report.push_str(&format!(
                    "- Disk {}: {}% used ({} free)\n",
                    disk.filesystem, disk.percent, disk.available
                ));
            }
            report.push_str(&format!("- Listening sockets: {}\n", s.network_connections));
            report.push_str(&format!("- Active sessions: {}\n", s.active_users));
        }
        None => report.push_str("- Metrics data: not collected yet.\n"),
    }

    report.push_str("\nService Status:\n");
    match services {
        Some(s) if !s.services.is_empty() => {
            for service in &s.services {
                report.push_str(&format!("- {}: {}\n", service.name, service.status));
            }
        }
        _ => report.push_str("- Service status data: not collected yet.\n"),
    }
    report
}

pub struct GeminiClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn from_config(cfg: &DiagnosisConfig) -> Result<Option<Self>, DiagnosisError> {
        let Some(api_key) = resolve_api_key(cfg) else {
            return Ok(None);
        };
        let http = Client::builder()
            .user_agent(concat!("sentineld/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| DiagnosisError::Upstream(err.to_string()))?;
        Ok(Some(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        }))
    }
}

fn resolve_api_key(cfg: &DiagnosisConfig) -> Option<String> {
    cfg.api_key
        .clone()
        .or_else(|| std::env::var(&cfg.api_key_env).ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, DiagnosisError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|err| DiagnosisError::Upstream(err.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiagnosisError::Upstream(format!(
                "model endpoint answered {status}"
            )));
        }
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| DiagnosisError::Upstream(err.without_url().to_string()))?;
        candidate_text(parsed)
            .ok_or_else(|| DiagnosisError::Upstream("model returned no text".to_string()))
    }
}

fn candidate_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    (!text.is_empty()).then_some(text)
}
