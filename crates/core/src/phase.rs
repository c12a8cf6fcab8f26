//! Phase State Machine
//!
//! The tutoring cycle is a fixed ten-state graph. Every edge lives in
//! [`TRANSITIONS`], so each one can be audited and tested on its own without
//! touching the generation pipeline. The functions here are pure: they never
//! see or mutate a session, the caller applies the returned phase.

use crate::error::{Result, TutorError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of the explain-then-refine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Home,
    QuestionInput,
    KnowledgeCheck,
    FirstExplanation,
    #[serde(rename = "self_reflection_1")]
    SelfReflection1,
    AiExplanation,
    SecondExplanation,
    #[serde(rename = "self_reflection_2")]
    SelfReflection2,
    Evaluation,
    Retry,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::Home,
        Phase::QuestionInput,
        Phase::KnowledgeCheck,
        Phase::FirstExplanation,
        Phase::SelfReflection1,
        Phase::AiExplanation,
        Phase::SecondExplanation,
        Phase::SelfReflection2,
        Phase::Evaluation,
        Phase::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Home => "home",
            Phase::QuestionInput => "question_input",
            Phase::KnowledgeCheck => "knowledge_check",
            Phase::FirstExplanation => "first_explanation",
            Phase::SelfReflection1 => "self_reflection_1",
            Phase::AiExplanation => "ai_explanation",
            Phase::SecondExplanation => "second_explanation",
            Phase::SelfReflection2 => "self_reflection_2",
            Phase::Evaluation => "evaluation",
            Phase::Retry => "retry",
        }
    }

    /// Learner-facing heading shown when the phase is entered.
    pub fn title(&self) -> &'static str {
        match self {
            Phase::Home => "학습 시작",
            Phase::QuestionInput => "개념 입력",
            Phase::KnowledgeCheck => "지식 수준 확인",
            Phase::FirstExplanation => "첫 번째 설명",
            Phase::SelfReflection1 => "자기 성찰 1",
            Phase::AiExplanation => "AI 맞춤 설명",
            Phase::SecondExplanation => "두 번째 설명",
            Phase::SelfReflection2 => "자기 성찰 2",
            Phase::Evaluation => "종합 평가",
            Phase::Retry => "다시 학습하기",
        }
    }

    /// Short instruction telling the learner what this phase expects from them.
    pub fn instruction(&self) -> &'static str {
        match self {
            Phase::Home => "학습하고 싶은 개념이나 질문을 입력해 주세요.",
            Phase::QuestionInput => "학습할 개념을 정리하고 있어요.",
            Phase::KnowledgeCheck => "이 개념에 대해 얼마나 알고 계신가요? '알고 있다' 또는 '모른다'를 선택해 주세요.",
            Phase::FirstExplanation => "알고 있는 만큼 이 개념을 자신의 말로 설명해 보세요.",
            Phase::SelfReflection1 => "설명하면서 막히거나 확신이 없었던 부분을 돌아보세요.",
            Phase::AiExplanation => "AI의 맞춤 설명을 읽고 부족했던 부분을 채워 보세요.",
            Phase::SecondExplanation => "배운 내용을 바탕으로 다시 한 번 설명해 보세요.",
            Phase::SelfReflection2 => "첫 번째 설명과 비교해 무엇이 달라졌는지 돌아보세요.",
            Phase::Evaluation => "종합 평가를 확인하세요. 다시 학습하려면 '다시 하기'를 선택하세요.",
            Phase::Retry => "새로운 학습을 준비하고 있어요.",
        }
    }

    /// Phases whose learner messages are kept in the explanation history.
    pub fn records_explanation(&self) -> bool {
        matches!(
            self,
            Phase::FirstExplanation
                | Phase::SelfReflection1
                | Phase::SecondExplanation
                | Phase::SelfReflection2
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| TutorError::UnknownPhase(s.to_string()))
    }
}

/// What the learner picked when asking to move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    /// Plain "next", also used when no choice was sent.
    Continue,
    Knows,
    DoesntKnow,
    Retry,
    Finish,
    Back,
}

impl Choice {
    /// Parses the optional choice string sent by the client.
    ///
    /// A missing or blank choice means [`Choice::Continue`]. Anything unrecognised
    /// is a state error rather than a silent fallback.
    pub fn parse(raw: Option<&str>, phase: Phase) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Choice::Continue);
        };
        match raw.to_lowercase().as_str() {
            "continue" | "next" => Ok(Choice::Continue),
            "knows" | "know" | "yes" => Ok(Choice::Knows),
            "doesnt_know" | "dont_know" | "unknown" | "no" => Ok(Choice::DoesntKnow),
            "retry" => Ok(Choice::Retry),
            "finish" | "done" | "complete" => Ok(Choice::Finish),
            "back" | "previous" => Ok(Choice::Back),
            other => Err(TutorError::state(
                phase,
                format!("unknown choice '{}'", other),
            )),
        }
    }
}

use Choice as C;
use Phase as P;

/// Every edge of the cycle as `(from, choice, to)`.
///
/// KNOWLEDGE_CHECK routes to FIRST_EXPLANATION whatever the learner reports;
/// the self-report only changes the tone of the next instruction. From
/// EVALUATION anything but `Retry` keeps the cycle where it is: it is complete.
pub const TRANSITIONS: &[(Phase, Choice, Phase)] = &[
    (P::Home, C::Continue, P::QuestionInput),
    (P::QuestionInput, C::Continue, P::KnowledgeCheck),
    (P::QuestionInput, C::Back, P::Home),
    (P::KnowledgeCheck, C::Continue, P::FirstExplanation),
    (P::KnowledgeCheck, C::Knows, P::FirstExplanation),
    (P::KnowledgeCheck, C::DoesntKnow, P::FirstExplanation),
    (P::KnowledgeCheck, C::Back, P::QuestionInput),
    (P::FirstExplanation, C::Continue, P::SelfReflection1),
    (P::FirstExplanation, C::Back, P::KnowledgeCheck),
    (P::SelfReflection1, C::Continue, P::AiExplanation),
    (P::SelfReflection1, C::Back, P::FirstExplanation),
    (P::AiExplanation, C::Continue, P::SecondExplanation),
    (P::AiExplanation, C::Back, P::SelfReflection1),
    (P::SecondExplanation, C::Continue, P::SelfReflection2),
    (P::SecondExplanation, C::Back, P::AiExplanation),
    (P::SelfReflection2, C::Continue, P::Evaluation),
    (P::SelfReflection2, C::Back, P::SecondExplanation),
    (P::Evaluation, C::Retry, P::Retry),
    (P::Evaluation, C::Continue, P::Evaluation),
    (P::Evaluation, C::Finish, P::Evaluation),
    (P::Evaluation, C::Back, P::SelfReflection2),
    (P::Retry, C::Continue, P::Home),
];

/// Looks up the next phase for `(phase, choice)`.
pub fn next_phase(phase: Phase, choice: Choice) -> Result<Phase> {
    TRANSITIONS
        .iter()
        .find(|(from, c, _)| *from == phase && *c == choice)
        .map(|(_, _, to)| *to)
        .ok_or_else(|| TutorError::state(phase, format!("no transition for choice {:?}", choice)))
}

/// True for every phase that has a single predecessor the UI may step back to.
pub fn can_go_back(phase: Phase) -> bool {
    !matches!(phase, P::Home | P::Retry)
}

/// The single predecessor on the forward path, if any.
pub fn previous(phase: Phase) -> Option<Phase> {
    if !can_go_back(phase) {
        return None;
    }
    next_phase(phase, C::Back).ok()
}

/// True when the cycle has nowhere further to go without an explicit retry.
pub fn is_terminal(phase: Phase, choice: Choice) -> bool {
    phase == P::Evaluation && matches!(choice, C::Continue | C::Finish)
}
