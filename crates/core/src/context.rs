//! Per-cycle session context.
//!
//! One [`SessionContext`] exists per learning conversation. Its phase only
//! moves through [`SessionContext::apply_transition`], which defers to the
//! pure transition table, and the cycle-scoped fields are cleared together on
//! a retry so a reset is never partial.

use crate::classifier::ClassificationResult;
use crate::error::Result;
use crate::phase::{self, Choice, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Inputs longer than this many characters are treated as pasted study material.
pub const LONG_FORM_THRESHOLD: usize = 50;

/// Fallback rendered when no weak points have been collected yet.
pub const DEFAULT_WEAK_POINTS: &str = "전반적 이해 필요";

/// Highest valid knowledge level.
pub const MAX_KNOWLEDGE_LEVEL: u8 = 5;

/// The learner's own answer in KNOWLEDGE_CHECK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfReport {
    Knows,
    DoesntKnow,
}

/// One learner explanation or reflection, kept to frame later prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRecord {
    pub phase: Phase,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// The user that owns the session and its reference corpus.
    owner_id: String,
    /// Linked reference corpus, if any. Survives retries.
    corpus_id: Option<String>,
    phase: Phase,
    concept: String,
    anchor_question: Option<String>,
    knowledge_level: u8,
    self_report: Option<SelfReport>,
    weak_points: Vec<String>,
    explanation_history: Vec<ExplanationRecord>,
}

impl SessionContext {
    /// A fresh context at HOME.
    pub fn new(owner_id: impl Into<String>, corpus_id: Option<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            corpus_id,
            phase: Phase::Home,
            concept: String::new(),
            anchor_question: None,
            knowledge_level: 0,
            self_report: None,
            weak_points: Vec::new(),
            explanation_history: Vec::new(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn corpus_id(&self) -> Option<&str> {
        self.corpus_id.as_deref()
    }

    pub fn link_corpus(&mut self, corpus_id: Option<String>) {
        self.corpus_id = corpus_id;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn concept(&self) -> &str {
        &self.concept
    }

    pub fn anchor_question(&self) -> Option<&str> {
        self.anchor_question.as_deref()
    }

    /// The anchor question, but only when it adds something beyond `concept`.
    pub fn distinct_anchor(&self) -> Option<&str> {
        self.anchor_question
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty() && *a != self.concept.trim())
    }

    pub fn knowledge_level(&self) -> u8 {
        self.knowledge_level
    }

    pub fn self_report(&self) -> Option<SelfReport> {
        self.self_report
    }

    pub fn weak_points(&self) -> &[String] {
        &self.weak_points
    }

    /// Weak points joined for a prompt, or the default when none were collected.
    pub fn weak_points_summary(&self) -> String {
        if self.weak_points.is_empty() {
            DEFAULT_WEAK_POINTS.to_string()
        } else {
            self.weak_points.join(", ")
        }
    }

    pub fn explanation_history(&self) -> &[ExplanationRecord] {
        &self.explanation_history
    }

    /// True when the concept is pasted material rather than a short topic.
    pub fn is_long_form(&self) -> bool {
        is_long_form(&self.concept)
    }

    /// True once the cycle has a subject.
    pub fn has_subject(&self) -> bool {
        !self.concept.is_empty()
    }

    /// Sets the subject of the cycle. Ignored if the cycle already has one.
    ///
    /// Returns whether the subject was stored.
    pub fn set_subject(&mut self, anchor_question: &str, concept: &str) -> bool {
        if self.anchor_question.is_some() || self.has_subject() {
            warn!(
                concept = %self.concept,
                "Subject already set for this cycle, ignoring new subject"
            );
            return false;
        }
        self.anchor_question = Some(anchor_question.to_string());
        self.concept = concept.to_string();
        true
    }

    /// Applies the transition table to the current phase and moves there.
    ///
    /// A self-report choice in KNOWLEDGE_CHECK is remembered for tone framing.
    /// Entering RETRY clears the cycle.
    pub fn apply_transition(&mut self, choice: Choice) -> Result<Phase> {
        let from = self.phase;
        let to = phase::next_phase(from, choice)?;

        if from == Phase::KnowledgeCheck {
            match choice {
                Choice::Knows => self.self_report = Some(SelfReport::Knows),
                Choice::DoesntKnow => self.self_report = Some(SelfReport::DoesntKnow),
                _ => {}
            }
        }
        if to == Phase::Retry {
            self.reset_cycle();
        }

        debug!(%from, %to, ?choice, "Phase transition applied");
        self.phase = to;
        Ok(to)
    }

    /// Stores a valid classification. Invalid results leave the level untouched.
    pub fn apply_classification(&mut self, result: &ClassificationResult) -> bool {
        if !result.valid || result.level > MAX_KNOWLEDGE_LEVEL {
            return false;
        }
        self.knowledge_level = result.level;
        self.weak_points.extend(result.weak_points.iter().cloned());
        true
    }

    pub fn add_weak_points<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.weak_points.extend(points);
    }

    pub fn record_explanation(&mut self, phase: Phase, text: &str) {
        self.explanation_history.push(ExplanationRecord {
            phase,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// True if the learner already submitted something in `phase` this cycle.
    pub fn has_explanation_for(&self, phase: Phase) -> bool {
        self.explanation_history.iter().any(|r| r.phase == phase)
    }

    /// Clears every cycle-scoped field at once. Owner and corpus link are kept.
    fn reset_cycle(&mut self) {
        self.concept.clear();
        self.anchor_question = None;
        self.knowledge_level = 0;
        self.weak_points.clear();
        self.self_report = None;
        self.explanation_history.clear();
    }
}

pub fn is_long_form(text: &str) -> bool {
    text.chars().count() > LONG_FORM_THRESHOLD
}
