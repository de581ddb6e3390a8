//! # Collaborator Service Clients
//!
//! Thin typed clients for the REST endpoints the session consumes as black
//! boxes: face recognition, homework analysis, and the general chat
//! assistant. Each module owns one endpoint's request/response shape; none
//! of them carry session state.

pub mod analysis;
pub mod chat;
pub mod recognition;

pub use analysis::{AnalysisClient, HomeworkAnalysis, HomeworkAnalyzer, QuestionScore};
pub use chat::ChatClient;
pub use recognition::{IdentityVerifier, RecognitionClient, RecognizedStudent};
