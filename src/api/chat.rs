//! # Chat Assistant Client
//!
//! The platform's general question-answering endpoint. Not part of the live
//! session path; used by surfaces that want a one-shot answer outside a
//! proctored session.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    reply: String,
}

/// HTTP client for the chat endpoint.
///
/// `POST {url}` with `{"message": ...}`; the service answers
/// `{"reply": ...}`.
pub struct ChatClient {
    client: reqwest::Client,
    url: String,
}

impl ChatClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    pub async fn complete(&self, message: &str) -> SessionResult<String> {
        let response: ChatResponse = self
            .client
            .post(&self.url)
            .json(&ChatRequest { message })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| SessionError::Api(format!("no 'reply' in answer: {}", e)))?;
        Ok(response.reply)
    }
}
