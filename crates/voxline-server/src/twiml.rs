//! Call-setup webhook.
//!
//! The telephony provider posts here when a call arrives. The answer is a
//! TwiML document that speaks a short holding phrase and then connects the
//! call's audio to our media-stream socket.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Form},
    http::{header, HeaderMap},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

const CONNECTING_PHRASE: &str = "Conectando, por favor espera.";
const SAY_LANGUAGE: &str = "es-MX";

/// Subset of the provider's form body the webhook reads.
#[derive(Debug, Default, Deserialize)]
pub struct IncomingCall {
    #[serde(rename = "CallSid", default)]
    pub call_sid: Option<String>,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
}

/// Handler for `POST /incoming-call`.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Form(call): Form<IncomingCall>,
) -> Result<impl IntoResponse, ApiError> {
    let host = state
        .public_host
        .clone()
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("cannot determine public host".to_string()))?;

    tracing::info!(
        call_sid = call.call_sid.as_deref().unwrap_or("<unknown>"),
        %host,
        "incoming call"
    );

    Ok((
        [(header::CONTENT_TYPE, "text/xml")],
        connect_document(&host, call.from.as_deref()),
    ))
}

/// Builds the TwiML that connects the call to `wss://{host}/media-stream`.
pub fn connect_document(host: &str, caller: Option<&str>) -> String {
    let parameter = caller
        .filter(|c| !c.trim().is_empty())
        .map(|c| {
            format!(
                "\n            <Parameter name=\"from\" value=\"{}\" />",
                escape_xml(c)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Say language="{SAY_LANGUAGE}">{CONNECTING_PHRASE}</Say>
    <Connect>
        <Stream url="wss://{host}/media-stream" track="inbound_track">{parameter}
        </Stream>
    </Connect>
</Response>"#,
        host = escape_xml(host),
    )
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
