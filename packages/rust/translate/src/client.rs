//! Machine-translation capability and the Google Cloud Translation client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use boardsync_shared::{BoardSyncError, Result, TranslateConfig, translation_api_key};

/// Translate text into a target language (ISO 639-1 code).
#[async_trait]
pub trait Translate: Send + Sync {
    async fn translate(&self, text: &str, target: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslatedText {
    translated_text: String,
}

/// Google Cloud Translation v2 REST client.
pub struct GoogleTranslator {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GoogleTranslator {
    /// Build a client, reading the API key from the configured env var.
    pub fn from_config(config: &TranslateConfig) -> Result<Self> {
        let api_key = translation_api_key(config)?;
        Self::new(&config.endpoint, api_key, config.timeout_secs)
    }

    pub fn new(endpoint: &str, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("boardsync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BoardSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Translate for GoogleTranslator {
    #[instrument(skip_all, fields(target = %target, chars = text.chars().count()))]
    async fn translate(&self, text: &str, target: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&TranslateRequest {
                q: text,
                target,
                format: "text",
            })
            .send()
            .await
            .map_err(|e| BoardSyncError::Translation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BoardSyncError::Translation(format!(
                "HTTP {status}: {}",
                detail.trim()
            )));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| BoardSyncError::Translation(format!("malformed response: {e}")))?;

        let translated = body
            .data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| BoardSyncError::Translation("response had no translations".into()))?;

        debug!(chars = translated.chars().count(), "translated");
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn translator(server: &MockServer) -> GoogleTranslator {
        GoogleTranslator::new(&format!("{}/language/translate/v2", server.uri()), "test-key", 5)
            .unwrap()
    }

    #[tokio::test]
    async fn posts_text_and_reads_first_translation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/language/translate/v2"))
            .and(query_param("key", "test-key"))
            .and(body_json(json!({"q": "수강신청 안내", "target": "en", "format": "text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"translations": [{"translatedText": "Course registration notice"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = translator(&server).translate("수강신청 안내", "en").await.unwrap();
        assert_eq!(out, "Course registration notice");
    }

    #[tokio::test]
    async fn http_error_is_translation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = translator(&server).translate("text", "zh").await.unwrap_err();
        match err {
            BoardSyncError::Translation(msg) => {
                assert!(msg.contains("403"));
                assert!(msg.contains("API key not valid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_translation_list_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"translations": []}})),
            )
            .mount(&server)
            .await;

        let err = translator(&server).translate("text", "en").await.unwrap_err();
        assert!(matches!(err, BoardSyncError::Translation(_)));
    }
}
