//! Knowledge-Level Classifier
//!
//! Scores the learner's first explanation on a 0-5 scale with one
//! non-streaming generation call. Classification is advisory: every failure
//! yields a rejected result and the session keeps its current level.

use crate::context::MAX_KNOWLEDGE_LEVEL;
use crate::error::{Result, TutorError};
use crate::llm_client::GenerationClient;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

static LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"지식\s*수준\s*[:：]\s*(\d+)").expect("valid level regex"));
static RATIONALE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"근거\s*[:：]\s*(.+)").expect("valid rationale regex"));
static WEAK_POINTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"부족한\s*부분\s*[:：]\s*(.+)").expect("valid weak points regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub level: u8,
    /// Only valid results may be applied to a session.
    pub valid: bool,
    pub rationale: Option<String>,
    pub weak_points: Vec<String>,
}

impl ClassificationResult {
    pub fn rejected() -> Self {
        Self {
            level: 0,
            valid: false,
            rationale: None,
            weak_points: Vec::new(),
        }
    }
}

fn classification_prompt(concept: &str, explanation: &str) -> String {
    format!(
        r#"학생이 "{concept}"에 대해 자신이 아는 만큼 설명했습니다.

학생의 설명:
"""
{explanation}
"""

이 설명을 바탕으로 학생의 사전 지식 수준을 0부터 5 사이의 정수 하나로 평가하세요.
0: 전혀 모름, 1: 용어만 들어봄, 2: 기초 일부 이해, 3: 핵심 개념 이해, 4: 정확하고 구체적인 이해, 5: 전문가 수준

아래 형식을 정확히 따르세요. 다른 말은 쓰지 마세요.
지식수준: [0-5 사이 정수]
근거: [한 문장]
부족한 부분: [쉼표로 구분된 짧은 항목들, 없으면 없음]"#
    )
}

/// Parses a classification answer.
///
/// A missing level marker is a malformed response. A present but
/// out-of-range level parses into a result with `valid == false`.
pub fn parse_classification(text: &str) -> Result<ClassificationResult> {
    let level: u32 = LEVEL_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| TutorError::UpstreamMalformed("no knowledge level marker".into()))?;

    let valid = level <= MAX_KNOWLEDGE_LEVEL as u32;
    let rationale = RATIONALE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|r| !r.is_empty());
    let weak_points = WEAK_POINTS_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .split([',', '、', '，'])
                .map(str::trim)
                .filter(|p| !p.is_empty() && *p != "없음")
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(ClassificationResult {
        level: u8::try_from(level).unwrap_or(u8::MAX),
        valid,
        rationale,
        weak_points,
    })
}

/// Classifies the learner's first explanation.
///
/// Never fails: timeouts, transport errors, unparseable or out-of-range
/// answers are logged and returned as [`ClassificationResult::rejected`].
pub async fn classify(
    client: &dyn GenerationClient,
    concept: &str,
    explanation: &str,
    timeout: Duration,
) -> ClassificationResult {
    let prompt = classification_prompt(concept, explanation);
    let answer = match tokio::time::timeout(timeout, client.complete(&prompt)).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => {
            warn!(error = %e, "Knowledge classification failed, keeping current level");
            return ClassificationResult::rejected();
        }
        Err(_) => {
            warn!("Knowledge classification timed out, keeping current level");
            return ClassificationResult::rejected();
        }
    };

    match parse_classification(&answer) {
        Ok(result) if result.valid => {
            info!(level = result.level, "Knowledge level classified");
            result
        }
        Ok(result) => {
            warn!(level = result.level, "Knowledge level out of range, ignoring");
            ClassificationResult {
                valid: false,
                ..result
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not parse knowledge classification");
            ClassificationResult::rejected()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionContext;
    use crate::llm_client::MockGenerationClient;
    use crate::llm_client::testing::StalledClient;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_parse_valid_level() {
        let result = parse_classification("지식수준: 3\n근거: 핵심은 이해함\n부족한 부분: 측정 문제, 파동함수").unwrap();
        assert!(result.valid);
        assert_eq!(result.level, 3);
        assert_eq!(result.rationale.as_deref(), Some("핵심은 이해함"));
        assert_eq!(result.weak_points, vec!["측정 문제", "파동함수"]);
    }

    #[test]
    fn test_parse_out_of_range_is_invalid() {
        let result = parse_classification("지식수준: 7").unwrap();
        assert!(!result.valid);
        assert_eq!(result.level, 7);
    }

    #[test]
    fn test_parse_tolerates_spacing_and_fullwidth_colon() {
        let result = parse_classification("평가 결과\n지식 수준 ： 0").unwrap();
        assert!(result.valid);
        assert_eq!(result.level, 0);
        assert!(result.weak_points.is_empty());
    }

    #[test]
    fn test_parse_none_weak_points() {
        let result = parse_classification("지식수준: 5\n부족한 부분: 없음").unwrap();
        assert!(result.weak_points.is_empty());
    }

    #[test]
    fn test_parse_without_marker_is_malformed() {
        let err = parse_classification("잘 설명했어요!").unwrap_err();
        assert!(matches!(err, TutorError::UpstreamMalformed(_)));
    }

    #[tokio::test]
    async fn test_classify_includes_concept_and_explanation() {
        let mut client = MockGenerationClient::new();
        client
            .expect_complete()
            .withf(|prompt| prompt.contains("양자역학") && prompt.contains("아주 작은 세계"))
            .times(1)
            .returning(|_| Ok("지식수준: 2\n근거: 기초만 앎".to_string()));
        let result = classify(&client, "양자역학", "아주 작은 세계의 물리학", TIMEOUT).await;
        assert!(result.valid);
        assert_eq!(result.level, 2);
    }

    #[tokio::test]
    async fn test_classify_rejects_out_of_range() {
        let mut client = MockGenerationClient::new();
        client
            .expect_complete()
            .returning(|_| Ok("지식수준: 7".to_string()));
        let result = classify(&client, "양자역학", "모름", TIMEOUT).await;
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn test_classify_soft_fails_on_transport_error() {
        let mut client = MockGenerationClient::new();
        client
            .expect_complete()
            .returning(|_| Err(TutorError::UpstreamUnavailable("connection refused".into())));
        let result = classify(&client, "양자역학", "모름", TIMEOUT).await;
        assert_eq!(result, ClassificationResult::rejected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_classify_timeout_keeps_level() {
        let result = classify(&StalledClient, "양자역학", "모름", Duration::from_secs(15)).await;
        assert_eq!(result, ClassificationResult::rejected());

        let mut ctx = SessionContext::new("user-1", None);
        assert!(!ctx.apply_classification(&result));
        assert_eq!(ctx.knowledge_level(), 0);
    }
}
