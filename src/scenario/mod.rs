use crate::errors::{EngineError, EngineResult};
use crate::sim::YearlyModifier;
use futures_util::future::BoxFuture;
use reqwest::Client;

/// Boundary to the external scenario interpreter: free text in, yearly
/// modifiers out. The engine only ever sees the returned list.
pub trait ScenarioInterpreter: Send + Sync {
    fn analyze<'a>(&'a self, scenario: &'a str) -> BoxFuture<'a, EngineResult<Vec<YearlyModifier>>>;
}

/// Used when no interpreter endpoint is configured. Always fails with an explicit error.
pub struct UnconfiguredInterpreter;

impl ScenarioInterpreter for UnconfiguredInterpreter {
    fn analyze<'a>(&'a self, _scenario: &'a str) -> BoxFuture<'a, EngineResult<Vec<YearlyModifier>>> {
        Box::pin(async {
            Err(EngineError::Scenario("SCENARIO_SERVICE_URL not set".into()))
        })
    }
}

/// HTTP adapter: POSTs `{"scenario": text}` and decodes the modifier list.
#[derive(Clone)]
pub struct HttpScenarioClient {
    client: Client,
    url: String,
}

impl HttpScenarioClient {
    /// Fails if the HTTP client (with its 30s request timeout) cannot be built.
    pub fn new(url: &str) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Config(format!("scenario http client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, scenario: &str) -> EngineResult<Vec<YearlyModifier>> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "scenario": scenario }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(EngineError::Scenario(format!("{} {}", status.as_u16(), body)));
        }

        let modifiers = parse_modifiers(&body)?;
        tracing::info!(count = modifiers.len(), "scenario interpreted");
        Ok(modifiers)
    }
}

impl ScenarioInterpreter for HttpScenarioClient {
    fn analyze<'a>(&'a self, scenario: &'a str) -> BoxFuture<'a, EngineResult<Vec<YearlyModifier>>> {
        Box::pin(self.request(scenario))
    }
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ModifierPayload {
    Wrapped { modifiers: Vec<YearlyModifier> },
    Bare(Vec<YearlyModifier>),
}

/// Accepts `{"modifiers": [...]}` or a bare array, optionally inside a
/// ```json fenced block (generative backends like to add one).
pub fn parse_modifiers(body: &str) -> EngineResult<Vec<YearlyModifier>> {
    let trimmed = body.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<ModifierPayload>(unfenced) {
        Ok(ModifierPayload::Wrapped { modifiers }) | Ok(ModifierPayload::Bare(modifiers)) => Ok(modifiers),
        Err(e) => Err(EngineError::Scenario(format!("unreadable modifier list: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_array() {
        let mods = parse_modifiers(r#"[{"year":1,"drift_mod":-0.1,"volatility_mod":0.2}]"#).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].year, 1);
        assert_eq!(mods[0].drift_mod, -0.1);
    }

    #[test]
    fn test_parse_wrapped() {
        let mods = parse_modifiers(
            r#"{"modifiers":[{"year":2,"drift_mod":0.0,"volatility_mod":0.1},{"year":3,"drift_mod":0.01,"volatility_mod":0.0}]}"#,
        )
        .unwrap();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[1].year, 3);
    }

    #[test]
    fn test_parse_fenced() {
        let body = "```json\n[{\"year\":4,\"drift_mod\":0.02,\"volatility_mod\":-0.05}]\n```\n";
        let mods = parse_modifiers(body).unwrap();
        assert_eq!(mods[0].year, 4);
        assert_eq!(mods[0].volatility_mod, -0.05);
    }

    #[test]
    fn test_parse_garbage_is_scenario_error() {
        assert!(matches!(parse_modifiers("the economy will boom"), Err(EngineError::Scenario(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_interpreter_fails_explicitly() {
        let res = UnconfiguredInterpreter.analyze("recession in year 3").await;
        assert!(matches!(res, Err(EngineError::Scenario(_))));
    }

    #[test]
    fn test_http_client_builds_and_trims_url() {
        let client = HttpScenarioClient::new("http://127.0.0.1:7070/analyze//").unwrap();
        assert_eq!(client.url, "http://127.0.0.1:7070/analyze");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        // port 9 (discard) is not served on loopback in the test environment
        let client = HttpScenarioClient::new("http://127.0.0.1:9").unwrap();
        let res = client.analyze("flat decade").await;
        assert!(matches!(res, Err(EngineError::Network(_))), "{res:?}");
    }
}
