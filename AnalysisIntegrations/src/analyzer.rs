use async_trait::async_trait;
use audit_models::{AnalysisReport, AuditError, AuditResult, Tier};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::Analyzer;

const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
const SERVICE: &str = "analysis";

/// Model used for each tier. Tiers left out of a config keep their default model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelTable {
    pub light: String,
    pub medium: String,
    pub coder: String,
    pub long: String,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self {
            light: "mistralai/mistral-7b-instruct:free".to_string(),
            medium: "qwen/qwen3-14b:free".to_string(),
            coder: "qwen/qwen-2.5-coder-32b-instruct:free".to_string(),
            long: "deepseek/deepseek-v3-base:free".to_string(),
        }
    }
}

impl ModelTable {
    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Light => &self.light,
            Tier::Medium => &self.medium,
            Tier::Coder => &self.coder,
            Tier::Long => &self.long,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub models: ModelTable,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            endpoint: OPENROUTER_ENDPOINT.to_string(),
            api_key: None,
            models: ModelTable::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Chat-completions client that asks the tier's model for a strict JSON audit.
pub struct OpenRouterAnalyzer {
    config: OpenRouterConfig,
    client: reqwest::Client,
}

impl OpenRouterAnalyzer {
    pub fn new(config: OpenRouterConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_prompt(source: &str) -> String {
        format!(
            "Audit the following Solidity contract. Report vulnerabilities with severity and line \
             number, and estimate gas usage with concrete optimizations.\n\n{}\n\n\
             Respond ONLY with a single valid JSON object in exactly this format:\n\
             {{\n  \"vulnerabilities\": [\n    {{\n      \"severity\": \"critical | high | medium | low\",\n      \
             \"line\": number,\n      \"issue\": \"Brief summary\",\n      \"recommendation\": \"Mitigation steps\"\n    }}\n  ],\n  \
             \"gasOptimizations\": {{\n    \"estimatedGas\": number,\n    \"suggestions\": [\n      {{\n        \
             \"line\": number,\n        \"description\": \"What to change\",\n        \"estimatedSavings\": number\n      }}\n    ]\n  }}\n}}\n\
             Use empty lists when there is nothing to report.",
            source
        )
    }

    async fn complete(&self, model: &str, prompt: String) -> AuditResult<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuditError::external(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, model, "analysis request rejected");
            return Err(AuditError::external(SERVICE, format!("HTTP {}: {}", status, detail)));
        }

        let completion = response
            .json::<ChatCompletion>()
            .await
            .map_err(|e| AuditError::external(SERVICE, format!("malformed completion: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AuditError::external(SERVICE, "completion has no content"))
    }
}

#[async_trait]
impl Analyzer for OpenRouterAnalyzer {
    async fn analyze(&self, source: &str) -> AuditResult<AnalysisReport> {
        let tier = Tier::route(source);
        let model = self.config.models.model_for(tier);
        info!(%tier, model, "requesting analysis");

        let raw = self.complete(model, Self::build_prompt(source)).await?;
        let report = parse_analysis(&raw)?;

        debug!(
            findings = report.vulnerabilities.len(),
            suggestions = report.gas_optimizations.suggestions.len(),
            "analysis parsed"
        );
        Ok(report)
    }
}

/// Removes a surrounding markdown code fence, with or without a `json` tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Parses model output into a report. Any deviation from the schema is a validation error.
pub fn parse_analysis(raw: &str) -> AuditResult<AnalysisReport> {
    let cleaned = strip_code_fences(raw);
    let report: AnalysisReport = serde_json::from_str(cleaned).map_err(|e| {
        error!(error = %e, "model reply is not a valid audit object");
        AuditError::Validation(e.to_string())
    })?;
    report.validate()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_models::Severity;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_REPLY: &str = r#"{
        "vulnerabilities": [
            {"severity": "high", "line": 14, "issue": "Reentrancy", "recommendation": "Use checks-effects-interactions"}
        ],
        "gasOptimizations": {
            "estimatedGas": 210000,
            "suggestions": [{"line": 3, "description": "Pack storage", "estimatedSavings": 5000}]
        }
    }"#;

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "gen-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    fn analyzer(server: &MockServer) -> OpenRouterAnalyzer {
        OpenRouterAnalyzer::new(OpenRouterConfig {
            endpoint: format!("{}/api/v1/chat/completions", server.uri()),
            api_key: Some("test-key".to_string()),
            models: ModelTable::default(),
        })
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn test_parse_valid_reply() {
        let fenced = format!("```json\n{}\n```", VALID_REPLY);
        let report = parse_analysis(&fenced).unwrap();
        assert_eq!(report.vulnerabilities[0].severity, Severity::High);
        assert_eq!(report.gas_optimizations.estimated_gas, 210_000.0);
        assert_eq!(report.gas_optimizations.suggestions[0].estimated_savings, 5000.0);
    }

    #[test]
    fn test_parse_fractional_gas_estimate() {
        let report = parse_analysis(
            r#"{"vulnerabilities":[],"gasOptimizations":{"estimatedGas":21000.5,"suggestions":[{"line":7,"description":"Use immutable","estimatedSavings":2100.75}]}}"#,
        )
        .unwrap();
        assert_eq!(report.gas_optimizations.estimated_gas, 21000.5);
        assert_eq!(report.gas_optimizations.suggestions[0].estimated_savings, 2100.75);
    }

    #[test]
    fn test_parse_empty_lists_is_valid() {
        let report = parse_analysis(
            r#"{"vulnerabilities": [], "gasOptimizations": {"estimatedGas": 0, "suggestions": []}}"#,
        )
        .unwrap();
        assert!(report.vulnerabilities.is_empty());
        assert!(report.gas_optimizations.suggestions.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_output() {
        let cases = [
            "I could not audit this contract.",
            "[]",
            r#"[{"severity": "high", "line": 1, "issue": "x", "recommendation": "y"}]"#,
            r#"{"vulnerabilities": []}"#,
            r#"{"vulnerabilities": [], "gasOptimizations": {"estimatedGas": -5, "suggestions": []}}"#,
            r#"{"vulnerabilities": [{"severity": "high", "line": 0, "issue": "x", "recommendation": "y"}], "gasOptimizations": {"estimatedGas": 1, "suggestions": []}}"#,
        ];
        for raw in cases {
            assert!(
                matches!(parse_analysis(raw), Err(AuditError::Validation(_))),
                "accepted: {}",
                raw
            );
        }
    }

    #[test]
    fn test_model_table_follows_tier() {
        let models = ModelTable::default();
        assert_eq!(models.model_for(Tier::Light), "mistralai/mistral-7b-instruct:free");
        assert_eq!(models.model_for(Tier::Long), "deepseek/deepseek-v3-base:free");
    }

    #[test]
    fn test_partial_model_table_keeps_defaults() {
        let config: OpenRouterConfig = serde_json::from_str(r#"{"models": {"long": "acme/long-context"}}"#).unwrap();
        assert_eq!(config.models.model_for(Tier::Long), "acme/long-context");
        assert_eq!(config.models.light, ModelTable::default().light);
        assert_eq!(config.models.coder, ModelTable::default().coder);
    }

    #[tokio::test]
    async fn test_analyze_uses_tier_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(bearer_token("test-key"))
            .and(body_partial_json(serde_json::json!({ "model": "qwen/qwen3-14b:free" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(VALID_REPLY)))
            .expect(1)
            .mount(&server)
            .await;

        let source = vec!["uint256 x;"; 150].join("\n");
        let report = analyzer(&server).analyze(&source).await.unwrap();
        assert_eq!(report.vulnerabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_malformed_reply_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Sorry, no JSON today")))
            .mount(&server)
            .await;

        let result = analyzer(&server).analyze("contract A {}").await;
        assert!(matches!(result, Err(AuditError::Validation(_))));
    }

    #[tokio::test]
    async fn test_analyze_http_failure_is_external_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let result = analyzer(&server).analyze("contract A {}").await;
        match result {
            Err(AuditError::ExternalService { service, message }) => {
                assert_eq!(service, "analysis");
                assert!(message.contains("429"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_analyze_without_choices_is_external_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let result = analyzer(&server).analyze("contract A {}").await;
        assert!(matches!(result, Err(AuditError::ExternalService { .. })));
    }
}
