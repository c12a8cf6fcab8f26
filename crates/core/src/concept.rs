//! Concept Resolution
//!
//! Turns the learner's opening utterance into the cycle's `concept`. Short
//! questions go through a keyword-extraction call; pasted material is used as
//! is. Any extraction problem falls back to the raw text.

use crate::context::is_long_form;
use crate::llm_client::GenerationClient;
use std::time::Duration;
use tracing::{info, warn};

/// How the concept was obtained, which decides its framing in prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptSource {
    /// Short keyword extracted from a question.
    Extracted,
    /// Extraction failed or produced nothing usable; raw text kept.
    Fallback,
    /// Long-form study material kept verbatim.
    Material,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConcept {
    pub anchor_question: String,
    pub concept: String,
    pub source: ConceptSource,
}

fn extraction_prompt(text: &str) -> String {
    format!(
        r#"다음 질문에서 학습하고자 하는 핵심 개념/키워드만 추출하세요.
질문: {text}

규칙:
- 2-3단어 이내의 핵심 개념만 추출
- 반드시 질문에 들어 있는 단어만 사용하고 새로운 단어를 만들지 말 것
- "에 대해", "알려줘", "설명해줘", "뭐야" 등은 제외
- 명사형으로 추출
- 한 줄로만 답변

예시:
질문: "자료구조에 대해서 알려줘" → 자료구조
질문: "머신러닝 알고리즘 설명해줘" → 머신러닝 알고리즘
질문: "양자역학이 뭐야?" → 양자역학

키워드:"#
    )
}

/// Reduces a raw extraction answer to a single clean line.
fn clean_keyword(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .trim_start_matches("키워드:")
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”'))
        .trim()
        .to_string()
}

/// True when every word of `keyword` occurs in `original`, ignoring case.
fn uses_only_original_words(keyword: &str, original: &str) -> bool {
    let original = original.to_lowercase();
    keyword
        .split_whitespace()
        .all(|word| original.contains(&word.to_lowercase()))
}

/// Extracts a short concept from `text`, falling back to `text` itself.
///
/// The call is bounded by `timeout`; a timeout, error, empty answer or an
/// answer introducing words not in the original all yield the raw text.
pub async fn extract_keyword(
    client: &dyn GenerationClient,
    text: &str,
    timeout: Duration,
) -> (String, ConceptSource) {
    let raw = text.trim();
    let answer = match tokio::time::timeout(timeout, client.complete(&extraction_prompt(raw))).await
    {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => {
            warn!(error = %e, "Keyword extraction failed, using original text");
            return (raw.to_string(), ConceptSource::Fallback);
        }
        Err(_) => {
            warn!("Keyword extraction timed out, using original text");
            return (raw.to_string(), ConceptSource::Fallback);
        }
    };

    let keyword = clean_keyword(&answer);
    if keyword.is_empty() {
        warn!("Keyword extraction returned nothing, using original text");
        return (raw.to_string(), ConceptSource::Fallback);
    }
    if !uses_only_original_words(&keyword, raw) {
        warn!(%keyword, "Extracted keyword introduces new words, using original text");
        return (raw.to_string(), ConceptSource::Fallback);
    }

    info!(%keyword, "Extracted concept keyword");
    (keyword, ConceptSource::Extracted)
}

/// Resolves the subject of a new cycle from the learner's first message.
///
/// The message is kept verbatim as the anchor question.
pub async fn resolve_concept(
    client: &dyn GenerationClient,
    text: &str,
    timeout: Duration,
) -> ResolvedConcept {
    let anchor_question = text.to_string();
    let trimmed = text.trim();
    if is_long_form(trimmed) {
        return ResolvedConcept {
            concept: trimmed.to_string(),
            anchor_question,
            source: ConceptSource::Material,
        };
    }

    let (concept, source) = extract_keyword(client, trimmed, timeout).await;
    ResolvedConcept {
        anchor_question,
        concept,
        source,
    }
}
