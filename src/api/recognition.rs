//! # Face Recognition Client
//!
//! Uploads the captured face image and gets back the student the service
//! matched it to. A "no match" answer is a normal, expected outcome: it
//! fails the verification flow, not the program.

use crate::error::{SessionError, SessionResult};
use crate::facegate::CapturedFace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The student the recognition service matched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognizedStudent {
    pub name: String,
    pub roll_no: String,
}

/// Anything that can turn a captured face into a student identity.
///
/// The session depends on this trait rather than on the HTTP client so the
/// verification flow is testable without a recognition deployment.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, face: &CapturedFace) -> SessionResult<RecognizedStudent>;
}

/// HTTP client for the recognition endpoint.
///
/// ## Contract:
/// `POST {url}` with a multipart body carrying the image under the `image`
/// field; the service answers `{"name": ..., "roll_no": ...}` on a match
/// and an error status (with an optional `detail` message) otherwise.
pub struct RecognitionClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RecognitionError {
    detail: Option<String>,
}

impl RecognitionClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for RecognitionClient {
    async fn verify(&self, face: &CapturedFace) -> SessionResult<RecognizedStudent> {
        let part = reqwest::multipart::Part::bytes(face.image.clone())
            .file_name("student_face.png")
            .mime_str("image/png")
            .map_err(|e| SessionError::Api(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        info!("Uploading captured face ({} bytes) for recognition", face.image.len());
        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<RecognitionError>()
                .await
                .ok()
                .and_then(|e| e.detail)
                .unwrap_or_else(|| "no match".to_string());
            warn!("Recognition rejected ({}): {}", status, detail);
            return Err(SessionError::Verification(detail));
        }

        let student: RecognizedStudent = response.json().await.map_err(|e| {
            SessionError::Verification(format!("response missing student data: {}", e))
        })?;

        if student.name.is_empty() || student.roll_no.is_empty() {
            return Err(SessionError::Verification(
                "response missing student data".to_string(),
            ));
        }

        info!("Recognized student {} ({})", student.name, student.roll_no);
        Ok(student)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_student_shape() {
        let student: RecognizedStudent =
            serde_json::from_str(r#"{"name":"Asha","roll_no":"S1"}"#).unwrap();
        assert_eq!(
            student,
            RecognizedStudent {
                name: "Asha".to_string(),
                roll_no: "S1".to_string(),
            }
        );
    }

    #[test]
    fn test_error_detail_shape() {
        let err: RecognitionError =
            serde_json::from_str(r#"{"detail":"No matching student found"}"#).unwrap();
        assert_eq!(err.detail.as_deref(), Some("No matching student found"));

        let err: RecognitionError = serde_json::from_str(r#"{}"#).unwrap();
        assert!(err.detail.is_none());
    }
}
