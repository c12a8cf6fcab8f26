//! Defines the WebSocket message protocol between the learner's client and the API server.

use feynman_tutor_core::{Phase, TurnEvent};
use serde::{Deserialize, Serialize};

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A learner utterance for the current phase.
    Message { text: String },
    /// A phase choice. A missing choice means "continue".
    PhaseTransition {
        #[serde(default)]
        choice: Option<String>,
    },
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The session entered a new phase.
    PhaseChanged {
        phase: Phase,
        instruction: String,
        title: String,
    },
    /// A chunk of the tutor's reply.
    Stream { content: String, phase: Phase },
    /// The tutor's reply for the turn is complete.
    Complete { phase: Phase },
    Error { content: String },
}

impl ServerMessage {
    pub fn error(content: impl Into<String>) -> Self {
        ServerMessage::Error {
            content: content.into(),
        }
    }
}

impl From<TurnEvent> for ServerMessage {
    fn from(event: TurnEvent) -> Self {
        match event {
            TurnEvent::PhaseChanged {
                phase,
                title,
                instruction,
            } => ServerMessage::PhaseChanged {
                phase,
                instruction,
                title,
            },
            TurnEvent::Stream { content, phase } => ServerMessage::Stream { content, phase },
            TurnEvent::Complete { phase } => ServerMessage::Complete { phase },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "message", "text": "양자역학이 뭐야?"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Message {
                text: "양자역학이 뭐야?".to_string()
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "phase_transition", "choice": "retry"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::PhaseTransition {
                choice: Some("retry".to_string())
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "phase_transition"}"#).unwrap();
        assert_eq!(msg, ClientMessage::PhaseTransition { choice: None });
    }

    #[test]
    fn test_client_message_requires_text() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "message"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "init"}"#).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let changed = ServerMessage::from(TurnEvent::phase_changed(Phase::KnowledgeCheck));
        let value = serde_json::to_value(&changed).unwrap();
        assert_eq!(value["type"], "phase_changed");
        assert_eq!(value["phase"], "knowledge_check");
        assert_eq!(value["title"], Phase::KnowledgeCheck.title());
        assert_eq!(value["instruction"], Phase::KnowledgeCheck.instruction());

        let stream = ServerMessage::from(TurnEvent::Stream {
            content: "양자".to_string(),
            phase: Phase::AiExplanation,
        });
        assert_eq!(
            serde_json::to_value(&stream).unwrap(),
            json!({"type": "stream", "content": "양자", "phase": "ai_explanation"})
        );

        let complete = ServerMessage::from(TurnEvent::Complete {
            phase: Phase::Evaluation,
        });
        assert_eq!(
            serde_json::to_value(&complete).unwrap(),
            json!({"type": "complete", "phase": "evaluation"})
        );

        assert_eq!(
            serde_json::to_value(ServerMessage::error("Session not found")).unwrap(),
            json!({"type": "error", "content": "Session not found"})
        );
    }
}
