//! # Homework Analysis Client
//!
//! Uploads a homework page image at the end of a session and gets back
//! per-question scoring.

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Score for one question on the submitted page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionScore {
    /// Question label as printed on the page ("Q1", "2b", ...)
    pub label: String,
    /// The grader's remark for this question
    pub remark: String,
    pub marks: f32,
    pub correct: bool,
}

/// The full scoring report for one submitted page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomeworkAnalysis {
    pub questions: Vec<QuestionScore>,
    pub total: f32,
    pub max: f32,
}

/// Anything that can score a homework image.
#[async_trait]
pub trait HomeworkAnalyzer: Send + Sync {
    async fn analyze(&self, jpeg: &[u8]) -> SessionResult<HomeworkAnalysis>;
}

/// HTTP client for the analysis endpoint.
///
/// ## Contract:
/// `POST {url}` with a multipart body carrying the page under the `image`
/// field; the service answers the `HomeworkAnalysis` shape.
pub struct AnalysisClient {
    client: reqwest::Client,
    url: String,
}

impl AnalysisClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl HomeworkAnalyzer for AnalysisClient {
    async fn analyze(&self, jpeg: &[u8]) -> SessionResult<HomeworkAnalysis> {
        let part = reqwest::multipart::Part::bytes(jpeg.to_vec())
            .file_name("homework.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| SessionError::Api(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        info!("Uploading homework page ({} bytes) for analysis", jpeg.len());
        let analysis: HomeworkAnalysis = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!(
            "Homework scored {}/{} across {} questions",
            analysis.total,
            analysis.max,
            analysis.questions.len()
        );
        Ok(analysis)
    }
}
