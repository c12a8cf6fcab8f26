//! Retrieval Query Planner
//!
//! The same concept needs different evidence at different stages of the cycle,
//! so the retrieval query is derived from the phase instead of reusing the raw
//! chat message.

use crate::phase::Phase;

pub const KNOWLEDGE_CHECK_QUALIFIERS: &[&str] = &["definition", "concept", "explanation"];
pub const AI_EXPLANATION_QUALIFIERS: &[&str] = &["explanation", "examples", "analogy"];
pub const EVALUATION_QUALIFIERS: &[&str] = &["key elements", "evaluation criteria"];

/// Builds the retrieval query for one turn.
///
/// `anchor` is only appended where the phase calls for it, and only when it
/// says something different from `concept`.
pub fn plan_query(phase: Phase, concept: &str, message: &str, anchor: Option<&str>) -> String {
    let concept = concept.trim();
    let message = message.trim();
    let anchor = anchor
        .map(str::trim)
        .filter(|a| !a.is_empty() && *a != concept);

    let mut parts: Vec<&str> = vec![concept];
    match phase {
        Phase::KnowledgeCheck => {
            parts.extend_from_slice(KNOWLEDGE_CHECK_QUALIFIERS);
            parts.extend(anchor);
        }
        Phase::AiExplanation => {
            parts.extend_from_slice(AI_EXPLANATION_QUALIFIERS);
            parts.extend(anchor);
        }
        Phase::Evaluation => {
            parts.extend_from_slice(EVALUATION_QUALIFIERS);
        }
        Phase::FirstExplanation | Phase::SecondExplanation => {
            parts.push(message);
            parts.extend(anchor);
        }
        _ => {
            parts.push(message);
        }
    }

    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONCEPT: &str = "양자역학";
    const ANCHOR: &str = "양자역학이 뭐야?";
    const MESSAGE: &str = "입자가 동시에 여러 상태에 있을 수 있다는 거요";

    fn plan(phase: Phase) -> String {
        plan_query(phase, CONCEPT, MESSAGE, Some(ANCHOR))
    }

    fn contains_all(query: &str, words: &[&str]) -> bool {
        words.iter().all(|w| query.contains(w))
    }

    #[test]
    fn test_knowledge_check_uses_qualifiers_and_anchor() {
        let q = plan(Phase::KnowledgeCheck);
        assert!(q.starts_with(CONCEPT));
        assert!(contains_all(&q, KNOWLEDGE_CHECK_QUALIFIERS));
        assert!(q.contains(ANCHOR));
        assert!(!q.contains(MESSAGE));
    }

    #[test]
    fn test_self_reflection_uses_concept_and_message_only() {
        for phase in [Phase::SelfReflection1, Phase::SelfReflection2] {
            let q = plan(phase);
            assert_eq!(q, format!("{} {}", CONCEPT, MESSAGE));
        }
    }

    #[test]
    fn test_ai_explanation_qualifiers() {
        let q = plan(Phase::AiExplanation);
        assert!(contains_all(&q, AI_EXPLANATION_QUALIFIERS));
        assert!(!q.contains("definition"));
        assert!(q.contains(ANCHOR));
    }

    #[test]
    fn test_evaluation_has_no_message_or_anchor() {
        let q = plan(Phase::Evaluation);
        assert_eq!(q, "양자역학 key elements evaluation criteria");
    }

    #[test]
    fn test_explanation_phases_bias_to_learner_words() {
        for phase in [Phase::FirstExplanation, Phase::SecondExplanation] {
            let q = plan(phase);
            assert_eq!(q, format!("{} {} {}", CONCEPT, MESSAGE, ANCHOR));
        }
    }

    #[test]
    fn test_other_phases_fall_back_to_concept_and_message() {
        for phase in [Phase::Home, Phase::QuestionInput, Phase::Retry] {
            assert_eq!(plan(phase), format!("{} {}", CONCEPT, MESSAGE));
        }
    }

    #[test]
    fn test_anchor_equal_to_concept_is_not_repeated() {
        let q = plan_query(Phase::KnowledgeCheck, CONCEPT, MESSAGE, Some(CONCEPT));
        assert_eq!(q.matches(CONCEPT).count(), 1);
        let q = plan_query(Phase::FirstExplanation, CONCEPT, MESSAGE, None);
        assert_eq!(q, format!("{} {}", CONCEPT, MESSAGE));
    }

    #[test]
    fn test_qualifier_sets_differ_across_phases() {
        let queries: Vec<String> = Phase::ALL.iter().map(|p| plan(*p)).collect();
        let kc = plan(Phase::KnowledgeCheck);
        let ai = plan(Phase::AiExplanation);
        let ev = plan(Phase::Evaluation);
        assert_ne!(kc, ai);
        assert_ne!(ai, ev);
        assert_ne!(kc, ev);
        assert!(queries.iter().all(|q| q.starts_with(CONCEPT)));
    }
}
