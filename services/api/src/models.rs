//! API Models
//!
//! Request and response bodies of the REST API, documented with `utoipa`.

use chrono::{DateTime, Utc};
use feynman_tutor_core::{
    Phase, SessionContext, TransitionOutcome, phase,
    store::{MessageRole, StoredMessage},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A session as shown to its owner.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(value_type = String, example = "knowledge_check")]
    pub phase: Phase,
    #[schema(example = "지식 확인")]
    pub phase_title: String,
    /// Empty until the learner names a subject.
    #[schema(example = "양자역학")]
    pub concept: Option<String>,
    #[schema(example = "양자역학이 뭐야?")]
    pub anchor_question: Option<String>,
    #[schema(example = 2)]
    pub knowledge_level: u8,
    pub weak_points: Vec<String>,
    pub corpus_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionSummary {
    pub fn new(id: Uuid, ctx: &SessionContext) -> Self {
        Self {
            id,
            phase: ctx.phase(),
            phase_title: ctx.phase().title().to_string(),
            concept: Some(ctx.concept().to_string()).filter(|c| !c.is_empty()),
            anchor_question: ctx.anchor_question().map(String::from),
            knowledge_level: ctx.knowledge_level(),
            weak_points: ctx.weak_points().to_vec(),
            corpus_id: ctx.corpus_id().map(String::from),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self.updated_at = Some(updated_at);
        self
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct MessageView {
    #[schema(value_type = String, example = "user")]
    pub role: MessageRole,
    #[schema(value_type = String, example = "first_explanation")]
    pub phase: Phase,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for MessageView {
    fn from(message: StoredMessage) -> Self {
        Self {
            role: message.role,
            phase: message.phase,
            content: message.content,
            created_at: message.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct PhaseView {
    #[schema(value_type = String, example = "self_reflection_1")]
    pub phase: Phase,
    pub title: String,
    pub instruction: String,
    pub can_go_back: bool,
    #[schema(value_type = Option<String>, example = "first_explanation")]
    pub previous: Option<Phase>,
}

impl From<Phase> for PhaseView {
    fn from(p: Phase) -> Self {
        Self {
            phase: p,
            title: p.title().to_string(),
            instruction: p.instruction().to_string(),
            can_go_back: phase::can_go_back(p),
            previous: phase::previous(p),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TransitionResponse {
    #[schema(value_type = String, example = "evaluation")]
    pub current_phase: Phase,
    #[schema(value_type = String, example = "home")]
    pub next_phase: Phase,
    pub title: String,
    pub instruction: String,
    /// The choice ended the cycle.
    pub completed: bool,
}

impl From<&TransitionOutcome> for TransitionResponse {
    fn from(outcome: &TransitionOutcome) -> Self {
        let next = outcome.current();
        Self {
            current_phase: outcome.from,
            next_phase: next,
            title: next.title().to_string(),
            instruction: next.instruction().to_string(),
            completed: outcome.completed,
        }
    }
}

#[derive(Deserialize, ToSchema, Default)]
pub struct CreateSessionPayload {
    #[schema(example = "physics-101.pdf")]
    pub corpus_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct TransitionPayload {
    /// One of `continue`, `knows`, `doesnt_know`, `retry`, `finish`, `back`. Omitted means `continue`.
    #[schema(example = "knows")]
    pub choice: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LinkCorpusPayload {
    /// `null` unlinks the current corpus.
    #[schema(example = "physics-101.pdf")]
    pub corpus_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct InitializeLearningPayload {
    /// Study material excerpt used verbatim as the concept.
    pub concept: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ExtractKeywordPayload {
    #[schema(example = "자료구조에 대해서 알려줘")]
    pub text: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct ExtractKeywordResponse {
    pub original_text: String,
    pub extracted_keyword: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use feynman_tutor_core::Choice;
    use serde_json::json;

    fn context_in_knowledge_check() -> SessionContext {
        let mut ctx = SessionContext::new("user-1", Some("pdf-1".into()));
        ctx.set_subject("양자역학이 뭐야?", "양자역학");
        ctx.apply_transition(Choice::Continue).unwrap();
        ctx.apply_transition(Choice::Continue).unwrap();
        ctx
    }

    #[test]
    fn test_session_summary_from_context() {
        let id = Uuid::new_v4();
        let summary = SessionSummary::new(id, &context_in_knowledge_check());
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["id"], json!(id.to_string()));
        assert_eq!(value["phase"], "knowledge_check");
        assert_eq!(value["concept"], "양자역학");
        assert_eq!(value["anchor_question"], "양자역학이 뭐야?");
        assert_eq!(value["knowledge_level"], 0);
        assert_eq!(value["corpus_id"], "pdf-1");
        assert!(value["created_at"].is_null());
    }

    #[test]
    fn test_fresh_session_has_no_concept() {
        let summary = SessionSummary::new(Uuid::new_v4(), &SessionContext::new("user-1", None));
        assert_eq!(summary.phase, Phase::Home);
        assert_eq!(summary.concept, None);
        assert_eq!(summary.anchor_question, None);
    }

    #[test]
    fn test_message_view_serialization() {
        let view = MessageView::from(StoredMessage::new(
            MessageRole::Assistant,
            Phase::SelfReflection2,
            "잘하셨어요",
        ));
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["phase"], "self_reflection_2");
        assert_eq!(value["content"], "잘하셨어요");
    }

    #[test]
    fn test_phase_view() {
        let home = PhaseView::from(Phase::Home);
        assert!(!home.can_go_back);
        assert_eq!(home.previous, None);

        let reflection = PhaseView::from(Phase::SelfReflection1);
        assert!(reflection.can_go_back);
        assert_eq!(reflection.previous, Some(Phase::FirstExplanation));
        assert_eq!(reflection.title, Phase::SelfReflection1.title());
    }

    #[test]
    fn test_transition_response_for_retry() {
        let outcome = TransitionOutcome {
            from: Phase::Evaluation,
            entered: vec![Phase::Retry, Phase::Home],
            completed: false,
        };
        let response = TransitionResponse::from(&outcome);
        assert_eq!(response.current_phase, Phase::Evaluation);
        assert_eq!(response.next_phase, Phase::Home);
        assert!(!response.completed);
    }

    #[test]
    fn test_payload_deserialization() {
        let payload: TransitionPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.choice.is_none());

        let payload: LinkCorpusPayload = serde_json::from_str(r#"{"corpus_id": null}"#).unwrap();
        assert!(payload.corpus_id.is_none());

        let payload: CreateSessionPayload =
            serde_json::from_str(r#"{"corpus_id": "notes.pdf"}"#).unwrap();
        assert_eq!(payload.corpus_id.as_deref(), Some("notes.pdf"));

        let payload: ExtractKeywordPayload =
            serde_json::from_str(r#"{"text": "자료구조에 대해서 알려줘"}"#).unwrap();
        assert_eq!(payload.text, "자료구조에 대해서 알려줘");
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Session not found".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"message": "Session not found"})
        );
    }
}
