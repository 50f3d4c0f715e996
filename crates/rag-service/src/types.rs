//! Wire types for the HTTP API.

use rag_types::SourceRef;
use rag_vector::RetrievalCandidate;
use serde::{Deserialize, Serialize};

/// `POST /api/ask` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub query_text: String,
    #[serde(default)]
    pub k: Option<usize>,
    /// Embedding model override
    #[serde(default)]
    pub model: Option<String>,
}

/// One ranked passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageView {
    pub doc_id: String,
    pub text: String,
    pub source: SourceRef,
    pub distance: f32,
}

impl From<&RetrievalCandidate> for PassageView {
    fn from(candidate: &RetrievalCandidate) -> Self {
        Self {
            doc_id: candidate.passage.doc_id.clone(),
            text: candidate.passage.text.clone(),
            source: candidate.passage.source.clone(),
            distance: candidate.distance,
        }
    }
}

/// `POST /api/ask` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    /// Ascending distance
    pub passages: Vec<PassageView>,
    pub model: String,
    pub elapsed_ms: u64,
}

/// `POST /api/sessions` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub subject: String,
}

/// `POST /api/sessions` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at_ms: i64,
    pub session_id: String,
}

/// `DELETE /api/sessions/{id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub session_id: String,
    /// False when the session was already revoked
    pub revoked: bool,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub passages: usize,
    pub models_resident: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_request_optional_fields() {
        let req: AskRequest = serde_json::from_str(r#"{"query_text":"refunds?"}"#).unwrap();
        assert_eq!(req.query_text, "refunds?");
        assert!(req.k.is_none());
        assert!(req.model.is_none());

        let req: AskRequest =
            serde_json::from_str(r#"{"query_text":"q","k":3,"model":"hashing-64"}"#).unwrap();
        assert_eq!(req.k, Some(3));
        assert_eq!(req.model.as_deref(), Some("hashing-64"));
    }

    #[test]
    fn test_passage_view_shape() {
        let view = PassageView {
            doc_id: "policy".into(),
            text: "Refunds within 30 days.".into(),
            source: SourceRef::new("policy.pdf", 1024),
            distance: 0.25,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["source"]["file"], "policy.pdf");
        assert_eq!(json["source"]["offset"], 1024);
        assert_eq!(json["distance"], 0.25);
    }
}
