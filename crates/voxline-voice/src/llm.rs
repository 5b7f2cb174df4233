//! Chat-completion clients for reply generation and post-call analysis.
//!
//! Both use an OpenAI-compatible `/chat/completions` endpoint (Groq by
//! default). Conversation history is passed in on every call; the client
//! itself holds no per-call state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use voxline_types::{CallAnalysis, ConversationRecord, LeadTemperature, Message, Role, Sentiment};

use crate::config::LlmConfig;
use crate::error::VoiceError;

/// Produces the bot's next line.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `history` is the conversation so far, excluding `utterance`.
    async fn reply(&self, history: &[Message], utterance: &str) -> Result<String, VoiceError>;
}

/// Derives a lead analysis from a finished conversation.
#[async_trait]
pub trait CallAnalyzer: Send + Sync {
    async fn analyze(&self, record: &ConversationRecord) -> Result<CallAnalysis, VoiceError>;
}

const ANALYSIS_SYSTEM_PROMPT: &str = "Eres analista de ventas inmobiliarias. Respondes solo JSON.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroqClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl GroqClient {
    pub fn new(config: &LlmConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn complete(&self, messages: Vec<ChatMessage<'_>>, max_tokens: u32) -> Result<String, VoiceError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Status {
                service: "llm",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Llm(format!("malformed completion: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(VoiceError::Llm("empty completion".to_string()));
        }
        Ok(content)
    }
}

#[async_trait]
impl ReplyGenerator for GroqClient {
    async fn reply(&self, history: &[Message], utterance: &str) -> Result<String, VoiceError> {
        if utterance.trim().is_empty() {
            return Ok(self.config.repeat_prompt.clone());
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &self.config.system_prompt,
        });
        for message in history {
            messages.push(ChatMessage {
                role: message.role.as_str(),
                content: &message.content,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: utterance,
        });

        self.complete(messages, self.config.max_tokens).await
    }
}

#[async_trait]
impl CallAnalyzer for GroqClient {
    async fn analyze(&self, record: &ConversationRecord) -> Result<CallAnalysis, VoiceError> {
        let prompt = analysis_prompt(record);
        let messages = vec![
            ChatMessage {
                role: "system",
                content: ANALYSIS_SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: &prompt,
            },
        ];
        let raw = self.complete(messages, self.config.analysis_max_tokens).await?;
        parse_analysis(&raw)
    }
}

fn analysis_prompt(record: &ConversationRecord) -> String {
    let mut transcript = String::new();
    for message in &record.messages {
        let speaker = match message.role {
            Role::User => "Usuario",
            Role::Assistant => "Asistente",
        };
        transcript.push_str(speaker);
        transcript.push_str(": ");
        transcript.push_str(&message.content);
        transcript.push('\n');
    }

    format!(
        r#"Analiza esta conversación inmobiliaria y responde SOLO en JSON:

{transcript}
Formato JSON:
{{
  "summary": "resumen breve en 1-2 oraciones",
  "sentiment": "positive/neutral/negative",
  "customer_interest": "qué busca el cliente",
  "interest_level": 5,
  "lead_temperature": "hot/warm/cold",
  "next_steps": "acciones recomendadas",
  "mentioned_properties": "propiedades discutidas"
}}"#
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnalysis {
    #[serde(alias = "resumen")]
    summary: String,
    #[serde(alias = "sentimiento")]
    sentiment: String,
    #[serde(alias = "interes_cliente")]
    customer_interest: String,
    #[serde(alias = "nivel_interes")]
    interest_level: Value,
    #[serde(alias = "calificacion_lead")]
    lead_temperature: String,
    #[serde(alias = "proximos_pasos")]
    next_steps: Value,
    #[serde(alias = "propiedades_mencionadas")]
    mentioned_properties: Value,
}

/// Strips Markdown code fences and any prose around the JSON object.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn value_level(value: &Value) -> u8 {
    let level = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    level.round().clamp(0.0, 10.0) as u8
}

/// Parses the analyzer's reply. Unknown labels fall back to neutral/warm.
pub fn parse_analysis(raw: &str) -> Result<CallAnalysis, VoiceError> {
    let parsed: RawAnalysis = serde_json::from_str(extract_json(raw))
        .map_err(|e| VoiceError::Llm(format!("analysis is not valid JSON: {}", e)))?;

    let sentiment = parsed.sentiment.parse::<Sentiment>().unwrap_or_else(|e| {
        tracing::debug!(error = %e, "defaulting sentiment");
        Sentiment::default()
    });
    let lead_temperature = parsed
        .lead_temperature
        .parse::<LeadTemperature>()
        .unwrap_or_else(|e| {
            tracing::debug!(error = %e, "defaulting lead temperature");
            LeadTemperature::default()
        });

    Ok(CallAnalysis {
        summary: parsed.summary.trim().to_string(),
        sentiment,
        customer_interest: parsed.customer_interest.trim().to_string(),
        interest_level: value_level(&parsed.interest_level),
        lead_temperature,
        next_steps: value_text(parsed.next_steps),
        mentioned_properties: value_text(parsed.mentioned_properties),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_spanish_analysis_is_parsed() {
        let raw = "```json\n{\n  \"resumen\": \"Busca casa\",\n  \"sentimiento\": \"positivo\",\n  \"interes_cliente\": \"Casa con jardín\",\n  \"nivel_interes\": 8,\n  \"calificacion_lead\": \"caliente\",\n  \"proximos_pasos\": [\"Llamar\", \"Enviar fotos\"],\n  \"propiedades_mencionadas\": \"Villa Sol\"\n}\n```";
        let analysis = parse_analysis(raw).expect("should parse");
        assert_eq!(analysis.summary, "Busca casa");
        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert_eq!(analysis.interest_level, 8);
        assert_eq!(analysis.lead_temperature, LeadTemperature::Hot);
        assert_eq!(analysis.next_steps, "Llamar, Enviar fotos");
        assert_eq!(analysis.mentioned_properties, "Villa Sol");
    }

    #[test]
    fn out_of_range_level_and_unknown_labels_are_tamed() {
        let raw = r#"{"summary":"x","sentiment":"mixed","interest_level":"14","lead_temperature":"lukewarm"}"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.interest_level, 10);
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
        assert_eq!(analysis.lead_temperature, LeadTemperature::Warm);
        assert!(analysis.next_steps.is_empty());
    }

    #[test]
    fn non_json_analysis_is_an_error() {
        assert!(matches!(parse_analysis("no puedo ayudar"), Err(VoiceError::Llm(_))));
    }

    #[test]
    fn prompt_labels_speakers() {
        let record = ConversationRecord {
            call_sid: "CA1".to_string(),
            stream_sid: None,
            phone_number: None,
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
            messages: vec![Message::assistant("Hola"), Message::user("Busco casa", Some(0.9))],
        };
        let prompt = analysis_prompt(&record);
        assert!(prompt.contains("Asistente: Hola\nUsuario: Busco casa\n"));
    }
}
