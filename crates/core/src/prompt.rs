//! Prompt Assembler
//!
//! Builds the single generation instruction for a turn. The output is an
//! ordered concatenation: tutoring policy, phase template, then either a
//! grounding block or a fallback notice (never both), then the fixed answer
//! format for the phases that have one, then the learner's message.
//!
//! The assembler only produces text. Whether the generated answer actually
//! follows the format is not checked here.

use crate::context::{ExplanationRecord, SessionContext, SelfReport};
use crate::phase::Phase;
use crate::retrieval::{Grounding, RetrievedPassage};

pub const DEFAULT_TUTOR_POLICY: &str = include_str!("../prompts/tutor_policy.md");
pub const AI_EXPLANATION_FORMAT: &str = include_str!("../prompts/ai_explanation_format.md");
pub const EVALUATION_FORMAT: &str = include_str!("../prompts/evaluation_format.md");

pub const GROUNDING_HEADER: &str = "**참고 자료:**";
pub const GROUNDING_DIRECTIVE: &str = "**중요:** 위 참고 자료의 내용이 당신의 사전 지식보다 우선합니다. \
답변은 반드시 참고 자료의 내용을 따르고, 참고 자료에 쓰인 용어와 표현을 그대로 사용하세요.";
pub const FALLBACK_NOTICE: &str = "**안내:** 연결된 학습 자료에서 이 질문과 일치하는 내용을 찾지 못했습니다. \
일반적인 지식을 바탕으로 답변하세요.";

/// Maximum characters of each earlier explanation quoted in later prompts.
const HISTORY_EXCERPT_CHARS: usize = 300;

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis.
fn excerpt(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

fn history_label(phase: Phase) -> &'static str {
    match phase {
        Phase::FirstExplanation => "첫 번째 설명",
        Phase::SelfReflection1 => "첫 번째 자기 성찰",
        Phase::SecondExplanation => "두 번째 설명",
        Phase::SelfReflection2 => "두 번째 자기 성찰",
        _ => "학습자 메시지",
    }
}

fn render_history<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a ExplanationRecord>,
{
    records
        .into_iter()
        .map(|r| {
            format!(
                "[{}] {}",
                history_label(r.phase),
                excerpt(&r.text, HISTORY_EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct PromptAssembler {
    base_policy: String,
    excerpt_chars: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(200)
    }
}

impl PromptAssembler {
    /// `excerpt_chars` bounds how much of each passage goes into the grounding block.
    pub fn new(excerpt_chars: usize) -> Self {
        Self {
            base_policy: DEFAULT_TUTOR_POLICY.trim().to_string(),
            excerpt_chars,
        }
    }

    /// Replaces the invariant tutoring policy, e.g. with one loaded from disk.
    pub fn with_base_policy(mut self, policy: impl Into<String>) -> Self {
        self.base_policy = policy.into().trim().to_string();
        self
    }

    pub fn base_policy(&self) -> &str {
        &self.base_policy
    }

    /// Composes the full instruction for one turn.
    pub fn assemble(&self, ctx: &SessionContext, grounding: &Grounding, message: &str) -> String {
        let mut sections = vec![self.base_policy.clone(), phase_template(ctx)];

        match grounding {
            Grounding::Passages(passages) if !passages.is_empty() => {
                sections.push(self.grounding_block(passages));
            }
            Grounding::NoMatches => sections.push(FALLBACK_NOTICE.to_string()),
            _ => {}
        }

        match ctx.phase() {
            Phase::AiExplanation => {
                sections.push(AI_EXPLANATION_FORMAT.trim().replace("{concept}", ctx.concept()))
            }
            Phase::Evaluation => {
                sections.push(EVALUATION_FORMAT.trim().replace("{concept}", ctx.concept()))
            }
            _ => {}
        }

        sections.push(format!("사용자: {}\n\nAI:", message.trim()));
        sections.join("\n\n")
    }

    fn grounding_block(&self, passages: &[RetrievedPassage]) -> String {
        let mut block = String::from(GROUNDING_HEADER);
        block.push('\n');
        for p in passages {
            block.push_str(&format!(
                "[{} - Page {}] {}\n",
                p.source,
                p.page,
                excerpt(&p.content, self.excerpt_chars)
            ));
        }
        block.push('\n');
        block.push_str(GROUNDING_DIRECTIVE);
        block
    }
}

/// Subject, level and weak points shared by every phase template.
fn learning_context(ctx: &SessionContext) -> String {
    let mut out = if !ctx.has_subject() {
        String::from("학습 주제: (아직 정해지지 않음)")
    } else if ctx.is_long_form() {
        format!("학습 자료:\n---\n{}\n---\n위 내용에 대해 학습합니다.", ctx.concept())
    } else {
        format!("학습 주제: \"{}\"", ctx.concept())
    };

    if let Some(anchor) = ctx.distinct_anchor() {
        out.push_str(&format!(
            "\n\n맥락 정보: 사용자는 \"{}\"라고 질문했습니다.\n→ 다의어인 경우 이 맥락에 맞는 의미와 영역에 집중하세요.",
            anchor
        ));
    }

    out.push_str(&format!(
        "\n\n사용자의 현재 이해 수준: {}/5\n부족한 부분: {}",
        ctx.knowledge_level(),
        ctx.weak_points_summary()
    ));
    out
}

fn self_report_tone(report: Option<SelfReport>) -> &'static str {
    match report {
        Some(SelfReport::Knows) => {
            "사용자는 이 개념을 '알고 있다'고 답했습니다. 스스로 충분히 설명해 볼 수 있도록 자신감을 북돋우는 톤을 사용하세요."
        }
        Some(SelfReport::DoesntKnow) => {
            "사용자는 이 개념을 '모른다'고 답했습니다. 부담 없이 아는 만큼만 말해도 괜찮다고 안심시키는 부드러운 톤을 사용하세요."
        }
        None => "사용자의 자기 평가 정보가 없습니다. 친근하고 격려하는 톤을 사용하세요.",
    }
}

fn phase_template(ctx: &SessionContext) -> String {
    let context = learning_context(ctx);
    match ctx.phase() {
        Phase::KnowledgeCheck => format!(
            r#"{context}

사용자의 지식 수준을 파악하기 위한 단계입니다.

응답 형식:
- 친근하고 격려하는 톤 사용
- 사용자가 '알고 있다'를 선택하면 설명 준비 안내
- '모른다'를 선택하면 기초부터 차근차근 설명 준비"#
        ),
        Phase::FirstExplanation => format!(
            r#"{context}

사용자가 자신이 아는 만큼 개념을 설명했습니다.
{tone}

분석 포인트:
1. 정확한 이해 부분 확인
2. 오개념이나 부족한 부분 파악
3. 사용된 언어의 복잡도 평가
4. 예시나 비유 사용 여부

정답이나 교정 내용을 직접 제시하지 마세요.
잘한 점을 짧게 인정하고, 다음 단계에서 자기 성찰을 할 수 있도록 준비시키세요."#,
            tone = self_report_tone(ctx.self_report())
        ),
        Phase::SelfReflection1 => format!(
            r#"{context}

사용자에게 자기 성찰을 유도하는 단계입니다.

지침:
- 직접적인 평가나 정답을 제시하지 않음
- 사용자 스스로 부족한 부분을 인식하도록 유도
- "잘 설명하셨네요. 혹시 설명하면서 확신이 없었거나 막혔던 부분이 있으셨나요?" 같은 질문 사용"#
        ),
        Phase::AiExplanation => format!(
            r#"{context}

**설명 기준:**
1. 반드시 위 학습 주제/자료와 맥락에 맞게 설명할 것
2. 다의어인 경우 원본 질문의 맥락을 고려하여 적절한 의미로 설명
3. 사용자가 이미 이해한 부분은 간단히 확인만
4. 부족한 부분을 중점적으로 설명
5. 구체적인 예시와 비유 사용
6. 전문 용어는 사용자의 수준에 맞추어 적절한 말로 바꾸기"#
        ),
        Phase::SecondExplanation => {
            let first: Vec<_> = ctx
                .explanation_history()
                .iter()
                .filter(|r| r.phase == Phase::FirstExplanation)
                .collect();
            let earlier = if first.is_empty() {
                String::from("(첫 번째 설명 기록 없음)")
            } else {
                render_history(first)
            };
            format!(
                r#"{context}

사용자가 학습한 내용을 다시 설명하는 단계입니다.

이전 설명:
{earlier}

지침:
- 첫 번째 설명보다 개선되었는지 평가
- 긍정적인 변화를 구체적으로 언급
- 여전히 부족한 부분이 있다면 부드럽게 지적하고 ⚠️ 표시로 시작하는 줄에 적을 것
- 격려하면서도 정확한 피드백 제공"#
            )
        }
        Phase::SelfReflection2 => format!(
            r#"{context}

두 번째 자기 성찰 단계입니다.

지침:
- 첫 번째 성찰과 비교하여 발전한 부분 확인
- 메타인지 능력이 향상되었는지 평가
- 종합 평가를 위한 준비"#
        ),
        Phase::Evaluation => {
            let history = if ctx.explanation_history().is_empty() {
                String::from("(기록된 설명 없음)")
            } else {
                render_history(ctx.explanation_history())
            };
            format!(
                r#"{context}

사용자의 두 번의 설명과 자기 성찰을 바탕으로 종합 평가를 제공합니다.

학습 기록:
{history}

**평가 기준:**

1. 이해도
   - 위 개념의 핵심을 정확히 파악했는지
   - 오개념 유무
   - 개선된 부분

2. 표현력
   - 설명의 명확성
   - 전문 용어 사용 정도
   - 비유와 예시 활용
   - 개선 방법 제시

3. 응용력
   - 기존 지식과의 연결
   - 실생활 적용 가능성

4. 메타인지 능력
   - 자신의 부족함을 인식하는 정도
   - 객관적 자기 평가 능력
   - 근본 문제 파악 및 해결 방법 제시

5. 배경 지식 수준
   - 현재 보유 지식 분석
   - 추가 학습 필요 영역"#
            )
        }
        Phase::Home | Phase::QuestionInput | Phase::Retry => format!(
            "{context}\n\n사용자의 질문에 파인만 학습법 원칙에 따라 답변하세요."
        ),
    }
}

/// Lines of a reply flagged with the warning marker, used as new weak points.
pub fn extract_flagged_points(reply: &str) -> Vec<String> {
    reply
        .lines()
        .filter_map(|line| line.trim().strip_prefix("⚠️"))
        .map(|rest| {
            rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace())
                .trim()
                .to_string()
        })
        .filter(|p| !p.is_empty() && !p.starts_with('['))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Choice;

    fn passages(n: u32) -> Grounding {
        Grounding::Passages(
            (1..=n)
                .map(|page| RetrievedPassage {
                    source: "quantum.pdf".into(),
                    page,
                    content: format!("{}쪽: 양자 중첩은 여러 상태가 동시에 존재하는 것", page),
                    score: 0.8,
                })
                .collect(),
        )
    }

    fn context_at(phase: Phase) -> SessionContext {
        let mut ctx = SessionContext::new("user-1", Some("pdf-1".into()));
        ctx.set_subject("양자역학이 뭐야?", "양자역학");
        while ctx.phase() != phase {
            ctx.apply_transition(Choice::Continue).unwrap();
        }
        ctx
    }

    #[test]
    fn test_grounding_block_with_passages() {
        let assembler = PromptAssembler::default();
        let ctx = context_at(Phase::KnowledgeCheck);
        let prompt = assembler.assemble(&ctx, &passages(3), "잘 모르겠어요");
        assert!(prompt.contains(GROUNDING_DIRECTIVE));
        assert!(!prompt.contains(FALLBACK_NOTICE));
        assert!(prompt.contains("[quantum.pdf - Page 1]"));
        assert!(prompt.contains("[quantum.pdf - Page 3]"));
    }

    #[test]
    fn test_fallback_notice_when_linked_but_empty() {
        let assembler = PromptAssembler::default();
        let ctx = context_at(Phase::KnowledgeCheck);
        let prompt = assembler.assemble(&ctx, &Grounding::NoMatches, "잘 모르겠어요");
        assert!(prompt.contains(FALLBACK_NOTICE));
        assert!(!prompt.contains(GROUNDING_DIRECTIVE));
    }

    #[test]
    fn test_no_block_without_corpus() {
        let assembler = PromptAssembler::default();
        let ctx = context_at(Phase::KnowledgeCheck);
        for grounding in [Grounding::Unlinked, Grounding::Unavailable] {
            let prompt = assembler.assemble(&ctx, &grounding, "잘 모르겠어요");
            assert!(!prompt.contains(FALLBACK_NOTICE));
            assert!(!prompt.contains(GROUNDING_DIRECTIVE));
            assert!(!prompt.contains(GROUNDING_HEADER));
        }
    }

    #[test]
    fn test_sections_are_ordered() {
        let assembler = PromptAssembler::default();
        let ctx = context_at(Phase::AiExplanation);
        let prompt = assembler.assemble(&ctx, &passages(1), "설명해 주세요");
        let policy = prompt.find("파인만 학습법 전문 AI 튜터").unwrap();
        let template = prompt.find("**설명 기준:**").unwrap();
        let grounding = prompt.find(GROUNDING_HEADER).unwrap();
        let format = prompt.find("📚 **양자역학** 설명").unwrap();
        let message = prompt.find("사용자: 설명해 주세요").unwrap();
        assert!(policy < template && template < grounding && grounding < format && format < message);
    }

    #[test]
    fn test_anchor_only_when_distinct() {
        let assembler = PromptAssembler::default();
        let ctx = context_at(Phase::AiExplanation);
        let prompt = assembler.assemble(&ctx, &Grounding::Unlinked, "설명해 주세요");
        assert!(prompt.contains("사용자는 \"양자역학이 뭐야?\"라고 질문했습니다"));

        let mut same = SessionContext::new("user-1", None);
        same.set_subject("양자역학", "양자역학");
        let prompt = assembler.assemble(&same, &Grounding::Unlinked, "hi");
        assert!(!prompt.contains("맥락 정보"));
    }

    #[test]
    fn test_weak_points_default_and_joined() {
        let assembler = PromptAssembler::default();
        let mut ctx = context_at(Phase::SecondExplanation);
        let prompt = assembler.assemble(&ctx, &Grounding::Unlinked, "다시 설명할게요");
        assert!(prompt.contains("부족한 부분: 전반적 이해 필요"));

        ctx.add_weak_points(vec!["측정 문제".to_string(), "파동함수".to_string()]);
        let prompt = assembler.assemble(&ctx, &Grounding::Unlinked, "다시 설명할게요");
        assert!(prompt.contains("부족한 부분: 측정 문제, 파동함수"));
    }

    #[test]
    fn test_structural_templates_only_for_explanation_and_evaluation() {
        let assembler = PromptAssembler::default();
        for phase in Phase::ALL {
            let ctx = context_at_any(phase);
            let prompt = assembler.assemble(&ctx, &Grounding::Unlinked, "메시지");
            let has_format = prompt.contains("**답변 형식 (정확히 따를 것):**");
            let expected = matches!(phase, Phase::AiExplanation | Phase::Evaluation);
            assert_eq!(has_format, expected, "{phase}");
        }
    }

    fn context_at_any(phase: Phase) -> SessionContext {
        if phase == Phase::Retry {
            let mut ctx = context_at(Phase::Evaluation);
            ctx.apply_transition(Choice::Retry).unwrap();
            return ctx;
        }
        context_at(phase)
    }

    #[test]
    fn test_evaluation_includes_history_and_scale_rules() {
        let assembler = PromptAssembler::default();
        let mut ctx = context_at(Phase::FirstExplanation);
        ctx.record_explanation(Phase::FirstExplanation, "아주 작은 입자들의 물리학이에요");
        while ctx.phase() != Phase::SecondExplanation {
            ctx.apply_transition(Choice::Continue).unwrap();
        }
        ctx.record_explanation(Phase::SecondExplanation, "입자는 관측 전까지 확률로 존재해요");
        while ctx.phase() != Phase::Evaluation {
            ctx.apply_transition(Choice::Continue).unwrap();
        }

        let prompt = assembler.assemble(&ctx, &Grounding::Unlinked, "평가해 주세요");
        assert!(prompt.contains("[첫 번째 설명] 아주 작은 입자들의 물리학이에요"));
        assert!(prompt.contains("[두 번째 설명] 입자는 관측 전까지 확률로 존재해요"));
        assert!(prompt.contains("별점(⭐) 1~5개"));
        assert!(prompt.contains("절대 점수 사용 금지"));
        assert!(prompt.contains("개념: \"양자역학\""));
    }

    #[test]
    fn test_long_form_uses_material_framing() {
        let assembler = PromptAssembler::default();
        let material = "광합성은 식물이 빛 에너지를 이용하여 이산화탄소와 물로부터 포도당을 합성하고 산소를 방출하는 과정이다.";
        let mut ctx = SessionContext::new("user-1", None);
        ctx.set_subject(material, material);
        let prompt = assembler.assemble(&ctx, &Grounding::Unlinked, "시작");
        assert!(prompt.contains("학습 자료:\n---\n"));
        assert!(!prompt.contains("학습 주제:"));
    }

    #[test]
    fn test_passage_excerpt_truncated_on_char_boundary() {
        let assembler = PromptAssembler::new(5);
        let ctx = context_at(Phase::KnowledgeCheck);
        let grounding = Grounding::Passages(vec![RetrievedPassage {
            source: "a.pdf".into(),
            page: 2,
            content: "가나다라마바사".into(),
            score: 1.0,
        }]);
        let prompt = assembler.assemble(&ctx, &grounding, "q");
        assert!(prompt.contains("[a.pdf - Page 2] 가나다라마..."));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let assembler = PromptAssembler::default();
        let ctx = context_at(Phase::Evaluation);
        let a = assembler.assemble(&ctx, &passages(2), "평가");
        let b = assembler.assemble(&ctx, &passages(2), "평가");
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_policy_replaces_default() {
        let assembler = PromptAssembler::default().with_base_policy("You are a patient tutor.");
        let ctx = context_at(Phase::KnowledgeCheck);
        let prompt = assembler.assemble(&ctx, &Grounding::Unlinked, "q");
        assert!(prompt.starts_with("You are a patient tutor."));
    }

    #[test]
    fn test_extract_flagged_points() {
        let reply = "## ❓ 헷갈리는 포인트\n⚠️ 오개념: 관측이 입자를 바꾼다고 생각함\n✅ 정답: ...\n⚠️ [불명확한 부분]\n⚠️ 중첩과 얽힘의 차이";
        let points = extract_flagged_points(reply);
        assert_eq!(
            points,
            vec!["오개념: 관측이 입자를 바꾼다고 생각함", "중첩과 얽힘의 차이"]
        );
    }
}
