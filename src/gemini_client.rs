use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::Config;
use crate::extraction_schema::{response_schema, Atendimento, ExtractionResult};

/// Instruction sent with every extraction. Defines how screen values must be
/// normalised; the model output is only correct if it follows these rules.
pub const SYSTEM_INSTRUCTION: &str = r#"
Você é um extrator de dados bancários especializado em JSON. Sua tarefa é analisar fotos de telas de CRM.

Receba o ID_Cliente fornecido pelo usuário.

Analise a imagem e identifique os símbolos:
- ✅ ou checkmarks visuais significam true.
- ❌ ou x marks significam false.
- Se houver texto como "Sim"/"Não", converta para booleano.

Extraia todos os valores financeiros removendo 'R$', espaços e convertendo para formato decimal numérico (ponto para centavos). Exemplo: "R$ 20.009,50" vira 20009.50.

Classifique os dados nas categorias: 'produtos_caixa', 'indicadores' e 'volumes'.
- Indicadores incluem: Perfil Investidor, Rating, ICX, Nicho, Afinidade, Margem.
- Volumes incluem: Habitação, Crédito, Saldos.

Se um valor não estiver visível ou legível, retorne null.
O output deve ser estritamente o JSON definido no schema.
"#;

/// Frames are always declared as JPEG, whatever the capture format was.
pub const IMAGE_MIME_TYPE: &str = "image/jpeg";

/// Low temperature keeps the model on factual extraction.
pub const EXTRACTION_TEMPERATURE: f64 = 0.2;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-call instruction that ties the image to a client.
pub fn client_prompt(client_id: &str) -> String {
    format!(
        "Analise esta imagem para o cliente ID: {}. Extraia os dados conforme instrução.",
        client_id
    )
}

/// Removes a `data:image/(png|jpeg|jpg);base64,` prefix; other input is returned unchanged.
pub fn strip_data_url_prefix(image: &str) -> &str {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    let prefix = PREFIX.get_or_init(|| {
        Regex::new(r"^data:image/(png|jpeg|jpg);base64,").expect("static regex is valid")
    });

    match prefix.find(image) {
        Some(m) => &image[m.end()..],
        None => image,
    }
}

// ============ Errors ============

/// Failure modes of a single extraction call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// No credential was configured; raised before any network activity.
    MissingCredential,
    /// The captured image could not be used (empty or not base64).
    InvalidImage(String),
    /// Network-level failure talking to the model endpoint.
    Transport(String),
    /// The endpoint answered with a non-success status.
    Status { status: u16, body: String },
    /// The model returned no text.
    EmptyResponse,
    /// The model text was not JSON of the expected shape.
    InvalidPayload(String),
    /// The extraction deadline passed before a result was produced.
    DeadlineExceeded,
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::MissingCredential => {
                write!(f, "API key not found (set GEMINI_API_KEY or API_KEY)")
            }
            ExtractionError::InvalidImage(msg) => write!(f, "Invalid image: {}", msg),
            ExtractionError::Transport(msg) => write!(f, "Gemini request failed: {}", msg),
            ExtractionError::Status { status, body } => {
                write!(f, "Gemini returned {}: {}", status, body)
            }
            ExtractionError::EmptyResponse => write!(f, "No response text from Gemini"),
            ExtractionError::InvalidPayload(msg) => {
                write!(f, "Gemini response does not match the schema: {}", msg)
            }
            ExtractionError::DeadlineExceeded => write!(f, "Extraction deadline exceeded"),
        }
    }
}

impl std::error::Error for ExtractionError {}

impl ExtractionError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractionError::Transport(_)
            | ExtractionError::EmptyResponse
            | ExtractionError::InvalidPayload(_) => true,
            ExtractionError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            ExtractionError::MissingCredential
            | ExtractionError::InvalidImage(_)
            | ExtractionError::DeadlineExceeded => false,
        }
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(err: reqwest::Error) -> Self {
        ExtractionError::Transport(err.to_string())
    }
}

// ============ Image payload ============

/// Base64 image data ready to be sent inline.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload(String);

impl ImagePayload {
    /// Accepts a canvas data URL or a bare base64 string.
    pub fn from_data_url(image: &str) -> Result<Self, ExtractionError> {
        let data = strip_data_url_prefix(image.trim()).trim();
        if data.is_empty() {
            return Err(ExtractionError::InvalidImage(
                "image payload is empty".to_string(),
            ));
        }
        STANDARD
            .decode(data)
            .map_err(|e| ExtractionError::InvalidImage(format!("not valid base64: {}", e)))?;
        Ok(Self(data.to_string()))
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImagePayload({} base64 chars)", self.0.len())
    }
}

// ============ Wire format ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl<'a> Part<'a> {
    fn text(text: impl Into<String>) -> Self {
        Self {
            inline_data: None,
            text: Some(text.into()),
        }
    }

    fn image(data: &'a str) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: IMAGE_MIME_TYPE,
                data,
            }),
            text: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'static str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
    temperature: f64,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn build_request<'a>(image: &'a ImagePayload, client_id: &str) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part::text(SYSTEM_INSTRUCTION)],
        },
        contents: vec![Content {
            role: Some("user"),
            parts: vec![
                Part::image(image.as_base64()),
                Part::text(client_prompt(client_id)),
            ],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: response_schema(),
            temperature: EXTRACTION_TEMPERATURE,
        },
    }
}

/// Parses the model text into a result, stamping the session record.
///
/// The session record is authoritative on our side: it always carries the
/// requested client and the capture time, whatever the model echoed.
pub fn parse_extraction(
    text: &str,
    client_id: &str,
    captured_at: DateTime<Utc>,
) -> Result<ExtractionResult, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    let mut result: ExtractionResult = serde_json::from_str(text.trim())
        .map_err(|e| ExtractionError::InvalidPayload(e.to_string()))?;

    if result.atendimento.id_cliente != client_id {
        tracing::debug!(
            "Model echoed client '{}' for requested client '{}'",
            result.atendimento.id_cliente,
            client_id
        );
    }
    result.atendimento = Atendimento {
        id_cliente: client_id.to_string(),
        timestamp: captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    Ok(result)
}

// ============ Client ============

/// Connection settings for the remote model, injected explicitly.
#[derive(Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl GeminiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.clone(),
            model: config.gemini_model.clone(),
        }
    }
}

impl fmt::Debug for GeminiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Client for the Gemini `generateContent` endpoint.
///
/// Performs exactly one request per call; retries live in
/// [`crate::extraction_service::ExtractionService`].
#[derive(Clone, Debug)]
pub struct GeminiClient {
    client: reqwest::Client,
    settings: GeminiSettings,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                ExtractionError::Transport(format!("Failed to create Gemini client: {}", e))
            })?;

        Ok(Self { client, settings })
    }

    /// Extracts the structured indicators shown in `image` for `client_id`.
    ///
    /// # Errors
    ///
    /// * `MissingCredential` - no API key configured; nothing is sent.
    /// * `Transport` / `Status` - the request did not complete successfully.
    /// * `EmptyResponse` / `InvalidPayload` - the model output was unusable.
    pub async fn extract(
        &self,
        image: &ImagePayload,
        client_id: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<ExtractionResult, ExtractionError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ExtractionError::MissingCredential)?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.base_url, self.settings.model
        );
        tracing::info!(
            "Requesting extraction for client {} from {} ({} base64 chars)",
            client_id,
            self.settings.model,
            image.as_base64().len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&build_request(image, client_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Gemini returned error {}: {}", status, body);
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidPayload(format!("envelope: {}", e)))?;

        let result = parse_extraction(&payload.text(), client_id, captured_at)?;
        tracing::info!("✓ Extraction parsed for client {}", client_id);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_data_url_prefix("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url_prefix("data:image/jpeg;base64,BBBB"), "BBBB");
        assert_eq!(strip_data_url_prefix("data:image/jpg;base64,CCCC"), "CCCC");
        assert_eq!(strip_data_url_prefix("AAAA"), "AAAA");
        // Only recognised formats are stripped
        assert_eq!(
            strip_data_url_prefix("data:image/gif;base64,AAAA"),
            "data:image/gif;base64,AAAA"
        );
    }

    #[test]
    fn test_strip_prefix_is_idempotent() {
        let once = strip_data_url_prefix("data:image/png;base64,AAAA");
        assert_eq!(strip_data_url_prefix(once), once);
    }

    #[test]
    fn test_image_payload_validation() {
        assert!(ImagePayload::from_data_url("data:image/jpeg;base64,").is_err());
        assert!(ImagePayload::from_data_url("not base64 at all!").is_err());
        let payload = ImagePayload::from_data_url("data:image/png;base64,AAAA").unwrap();
        assert_eq!(payload.as_base64(), "AAAA");
    }

    #[test]
    fn test_request_shape() {
        let image = ImagePayload::from_data_url("AAAA").unwrap();
        let body = serde_json::to_value(build_request(&image, "C42")).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], "AAAA");
        assert!(parts[1]["text"].as_str().unwrap().contains("ID: C42"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], SYSTEM_INSTRUCTION);
        assert_eq!(body["generationConfig"]["temperature"], 0.2);
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["responseSchema"], response_schema());
    }

    #[test]
    fn test_parse_empty_text_fails() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            parse_extraction("", "C1", at),
            Err(ExtractionError::EmptyResponse)
        );
        assert_eq!(
            parse_extraction("  \n", "C1", at),
            Err(ExtractionError::EmptyResponse)
        );
    }

    #[test]
    fn test_parse_stamps_session_record() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let text = r#"{
            "atendimento": {"id_cliente": "other", "timestamp": "whenever"},
            "dados_extraidos": {"indicadores": {}, "produtos_caixa": {}, "volumes": {}}
        }"#;
        let result = parse_extraction(text, "C1", at).unwrap();
        assert_eq!(result.atendimento.id_cliente, "C1");
        assert_eq!(result.atendimento.timestamp, "2025-01-01T12:00:00.000Z");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let at = Utc::now();
        assert!(matches!(
            parse_extraction("Desculpe, não consegui ler.", "C1", at),
            Err(ExtractionError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ExtractionError::EmptyResponse.is_retryable());
        assert!(ExtractionError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(ExtractionError::Status {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!ExtractionError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!ExtractionError::MissingCredential.is_retryable());
        assert!(!ExtractionError::DeadlineExceeded.is_retryable());
    }

    #[test]
    fn test_settings_debug_redacts_key() {
        let settings = GeminiSettings {
            api_key: Some("secret-key".to_string()),
            base_url: "https://example.com".to_string(),
            model: "gemini-test".to_string(),
        };
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }
}
