//! AI-analysis adapter.
//!
//! Text generation is best-effort everywhere it is used: callers wrap every
//! request in [`with_deadline`] and turn any [`AiError`] into an absent field
//! plus an error marker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AiConfig;
use crate::error::AiError;
use crate::report::BucketDiagnosticReport;

/// Characters of raw model output kept as a summary when it is not JSON
const FALLBACK_SUMMARY_CHARS: usize = 500;

const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert AWS S3 troubleshooting AI. Analyze diagnostic results and provide actionable recommendations.

Respond in valid JSON with this structure:
{
    "summary": "Brief overall health summary",
    "analysis": "Detailed analysis of all findings",
    "priority_actions": [
        {"priority": 1, "action": "What to do", "reason": "Why", "commands": ["aws cli command"]}
    ]
}"#;

const TROUBLESHOOT_SYSTEM_PROMPT: &str =
    "You are an expert AWS S3 troubleshooting assistant. Provide step-by-step guidance with AWS CLI commands.";

const POLICY_SYSTEM_PROMPT: &str =
    "You are an AWS S3 security expert. Generate secure, least-privilege bucket policies.";

const REMEDIATION_SYSTEM_PROMPT: &str =
    "You are an AWS S3 security expert. Provide concise, actionable recommendations for the issues that remain after automatic remediation.";

/// Text-completion capability behind the analyst
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, AiError>;

    /// Provider name for display
    fn name(&self) -> &str;

    /// Model identifier for display
    fn model(&self) -> &str;
}

/// OpenAI-compatible chat completions endpoint
pub struct OpenAiCompatibleBackend {
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(endpoint: String, api_key: String, model: String, temperature: f32, timeout: Duration) -> Result<Self, AiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Unavailable {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            endpoint,
            api_key,
            model,
            temperature,
            client,
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleBackend {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, AiError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Provider {
                message: format!("Failed to send request: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AiError::Provider {
                message: format!("API error ({}): {}", status, error_body),
            });
        }

        let api_response: Value = response.json().await.map_err(|e| AiError::InvalidResponse {
            message: format!("Failed to parse response: {}", e),
        })?;

        extract_completion_text(&api_response)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn extract_completion_text(response: &Value) -> Result<String, AiError> {
    let text = response["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| AiError::InvalidResponse {
            message: "Missing choices[0].message.content".to_string(),
        })?;
    if text.trim().is_empty() {
        return Err(AiError::InvalidResponse {
            message: "Empty completion".to_string(),
        });
    }
    Ok(text.to_string())
}

/// Narrative produced for one report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub priority_actions: Vec<Value>,
}

/// Best-effort narrative analysis of diagnostic results
#[async_trait]
pub trait AiAnalyst: Send + Sync {
    fn is_available(&self) -> bool;

    async fn analyze(&self, report: &BucketDiagnosticReport) -> Result<AiAnalysis, AiError>;

    /// Free-text troubleshooting; `context` is the bucket's live report when one could be produced
    async fn chat(
        &self,
        bucket: &str,
        issue: &str,
        context: Option<&BucketDiagnosticReport>,
    ) -> Result<String, AiError>;

    /// Recommendations for what remains after remediation
    async fn recommend_after_fix(
        &self,
        before: &BucketDiagnosticReport,
        after: &BucketDiagnosticReport,
    ) -> Result<String, AiError>;

    async fn recommend_policy(&self, bucket: &str, use_case: &str) -> Result<String, AiError>;
}

/// Analyst driving a [`CompletionBackend`]
pub struct LlmAnalyst {
    backend: Arc<dyn CompletionBackend>,
    max_tokens: u32,
}

impl LlmAnalyst {
    pub fn new(backend: Arc<dyn CompletionBackend>, max_tokens: u32) -> Self {
        Self { backend, max_tokens }
    }

    /// Build an analyst from configuration; `None` when AI is disabled or no key is set
    pub fn from_config(config: &AiConfig) -> Option<Arc<dyn AiAnalyst>> {
        if !config.enabled {
            debug!("AI analysis disabled by configuration");
            return None;
        }
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                warn!("AI analysis enabled but {} is not set; continuing without AI", config.api_key_env);
                return None;
            }
        };
        match OpenAiCompatibleBackend::new(
            config.endpoint.clone(),
            api_key,
            config.model.clone(),
            config.temperature,
            Duration::from_secs(config.timeout_secs),
        ) {
            Ok(backend) => {
                info!("AI Engine: using {} ({})", backend.name(), backend.model());
                Some(Arc::new(LlmAnalyst::new(Arc::new(backend), config.max_tokens)))
            }
            Err(e) => {
                warn!("AI backend could not be created: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl AiAnalyst for LlmAnalyst {
    fn is_available(&self) -> bool {
        true
    }

    async fn analyze(&self, report: &BucketDiagnosticReport) -> Result<AiAnalysis, AiError> {
        let prompt = build_analysis_prompt(report);
        let text = self
            .backend
            .complete(ANALYSIS_SYSTEM_PROMPT, &prompt, self.max_tokens)
            .await?;
        Ok(parse_analysis(&text))
    }

    async fn chat(
        &self,
        bucket: &str,
        issue: &str,
        context: Option<&BucketDiagnosticReport>,
    ) -> Result<String, AiError> {
        let prompt = build_troubleshoot_prompt(bucket, issue, context);
        self.backend
            .complete(TROUBLESHOOT_SYSTEM_PROMPT, &prompt, self.max_tokens.min(3000))
            .await
    }

    async fn recommend_after_fix(
        &self,
        before: &BucketDiagnosticReport,
        after: &BucketDiagnosticReport,
    ) -> Result<String, AiError> {
        let prompt = build_remediation_prompt(before, after);
        self.backend
            .complete(REMEDIATION_SYSTEM_PROMPT, &prompt, self.max_tokens.min(2000))
            .await
    }

    async fn recommend_policy(&self, bucket: &str, use_case: &str) -> Result<String, AiError> {
        let prompt = format!(
            "Generate a secure S3 bucket policy for bucket '{}'. Use case: {}",
            bucket, use_case
        );
        self.backend
            .complete(POLICY_SYSTEM_PROMPT, &prompt, self.max_tokens.min(2000))
            .await
    }
}

/// Run an AI request under an overall deadline
pub async fn with_deadline<T, F>(timeout: Duration, request: F) -> Result<T, AiError>
where
    F: Future<Output = Result<T, AiError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(AiError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}

fn result_lines(report: &BucketDiagnosticReport, findings_only: bool) -> Vec<Value> {
    report
        .results
        .iter()
        .filter(|r| !findings_only || r.is_finding())
        .map(|r| {
            json!({
                "check": r.check_name,
                "status": r.status,
                "severity": r.severity,
                "message": r.detail,
            })
        })
        .collect()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn build_analysis_prompt(report: &BucketDiagnosticReport) -> String {
    format!(
        "Analyze this S3 diagnostic report:\nBucket: {} | Region: {} | Score: {}/100\nResults: {}",
        report.bucket_name,
        report.region.as_deref().unwrap_or("us-east-1"),
        report.score,
        pretty(&Value::Array(result_lines(report, false)))
    )
}

pub fn build_troubleshoot_prompt(bucket: &str, issue: &str, context: Option<&BucketDiagnosticReport>) -> String {
    let context_text = match context {
        Some(report) => pretty(&json!({
            "score": report.score,
            "overall_health": report.overall_health,
            "region": report.region,
            "findings": result_lines(report, true),
        })),
        None => "None".to_string(),
    };
    format!(
        "Bucket: {}\nIssue: {}\nContext: {}\n\nProvide: 1) Root causes 2) Step-by-step fix 3) AWS CLI commands 4) Prevention",
        bucket, issue, context_text
    )
}

pub fn build_remediation_prompt(before: &BucketDiagnosticReport, after: &BucketDiagnosticReport) -> String {
    format!(
        "S3 bucket '{}' was automatically remediated. Score changed from {} to {}.\nRemaining issues: {}\n\nExplain the remaining risks and give the next manual steps with AWS CLI commands.",
        after.bucket_name,
        before.score,
        after.score,
        pretty(&Value::Array(result_lines(after, true)))
    )
}

fn strip_code_fences(text: &str) -> &str {
    let mut clean = text.trim();
    if let Some(rest) = clean.strip_prefix("```json") {
        clean = rest;
    } else if let Some(rest) = clean.strip_prefix("```") {
        clean = rest;
    }
    if let Some(rest) = clean.strip_suffix("```") {
        clean = rest;
    }
    clean.trim()
}

/// Parse a model answer; non-JSON answers become the analysis text verbatim
pub fn parse_analysis(text: &str) -> AiAnalysis {
    match serde_json::from_str::<AiAnalysis>(strip_code_fences(text)) {
        Ok(parsed) if !parsed.analysis.is_empty() || !parsed.summary.is_empty() => parsed,
        _ => AiAnalysis {
            summary: text.chars().take(FALLBACK_SUMMARY_CHARS).collect(),
            analysis: text.to_string(),
            priority_actions: Vec::new(),
        },
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{analyst, Script};
    use super::*;
    use crate::report::{CheckResult, Severity};
    use crate::scoring::ScoringPolicy;
    use chrono::Utc;

    fn sample_report() -> BucketDiagnosticReport {
        BucketDiagnosticReport::new(
            "my-bucket",
            Some("eu-west-1".to_string()),
            Utc::now(),
            vec![
                CheckResult::pass("ACL", Severity::High, "private"),
                CheckResult::fail("Encryption", Severity::High, "Server-side encryption is NOT enabled."),
            ],
            &ScoringPolicy::default(),
        )
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"summary\": \"Needs work\", \"analysis\": \"Encryption is off\", \"priority_actions\": [{\"priority\": 1}]}\n```";
        let parsed = parse_analysis(text);
        assert_eq!(parsed.summary, "Needs work");
        assert_eq!(parsed.analysis, "Encryption is off");
        assert_eq!(parsed.priority_actions.len(), 1);
    }

    #[test]
    fn test_parse_plain_text_falls_back_verbatim() {
        let text = "Turn on encryption.";
        let parsed = parse_analysis(text);
        assert_eq!(parsed.analysis, text);
        assert_eq!(parsed.summary, text);
        assert!(parsed.priority_actions.is_empty());
    }

    #[test]
    fn test_fallback_summary_is_truncated_on_char_boundary() {
        let text = "é".repeat(FALLBACK_SUMMARY_CHARS + 10);
        let parsed = parse_analysis(&text);
        assert_eq!(parsed.summary.chars().count(), FALLBACK_SUMMARY_CHARS);
    }

    #[test]
    fn test_analysis_prompt_mentions_bucket_region_and_findings() {
        let prompt = build_analysis_prompt(&sample_report());
        assert!(prompt.contains("my-bucket"));
        assert!(prompt.contains("eu-west-1"));
        assert!(prompt.contains("Encryption"));
        assert!(prompt.contains("FAIL"));
    }

    #[test]
    fn test_troubleshoot_prompt_without_context() {
        let prompt = build_troubleshoot_prompt("b", "403 on GetObject", None);
        assert!(prompt.contains("Context: None"));
        assert!(prompt.contains("403 on GetObject"));
    }

    #[test]
    fn test_extract_completion_text() {
        let response = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_completion_text(&response).unwrap(), "hello");
        assert!(matches!(
            extract_completion_text(&json!({"choices": []})),
            Err(AiError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_chat_includes_live_context() {
        let (backend, analyst) = analyst(Script::Reply("echo: {prompt}".to_string()));
        let report = sample_report();
        let answer = analyst.chat("my-bucket", "uploads fail", Some(&report)).await.unwrap();
        assert!(answer.contains("uploads fail"));
        assert!(answer.contains("Server-side encryption is NOT enabled."));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_deadline_turns_hang_into_timeout() {
        let (_, analyst) = analyst(Script::Hang);
        let report = sample_report();
        let result = with_deadline(Duration::from_millis(20), analyst.analyze(&report)).await;
        assert!(matches!(result, Err(AiError::Timeout { .. })));
    }
}
