//! Turn Orchestrator
//!
//! Runs one inbound message or phase choice against a session: persist the
//! learner's input, classify, plan and run retrieval, assemble the prompt,
//! stream generation back to the caller, persist the reply. Turns of the same
//! session are serialized through a per-session async mutex; different
//! sessions share nothing mutable.

use crate::classifier;
use crate::concept::{self, ConceptSource};
use crate::context::SessionContext;
use crate::error::{Result, TutorError};
use crate::llm_client::{GenerationClient, LLMStreamEvent};
use crate::phase::{Choice, Phase};
use crate::prompt::{self, PromptAssembler};
use crate::query;
use crate::retrieval::{self, RetrievalService};
use crate::store::{MessageLog, MessageRole, SessionStore, StoredMessage};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Tunables for a running orchestrator.
#[derive(Debug, Clone)]
pub struct TutorSettings {
    pub top_k: usize,
    pub retrieval_timeout: Duration,
    /// Bounds both classification and keyword extraction.
    pub classifier_timeout: Duration,
    pub passage_excerpt_chars: usize,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            retrieval_timeout: Duration::from_secs(10),
            classifier_timeout: Duration::from_secs(15),
            passage_excerpt_chars: 200,
        }
    }
}

/// Something the caller should relay to the learner while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    PhaseChanged {
        phase: Phase,
        title: String,
        instruction: String,
    },
    Stream {
        content: String,
        phase: Phase,
    },
    Complete {
        phase: Phase,
    },
}

impl TurnEvent {
    pub fn phase_changed(phase: Phase) -> Self {
        TurnEvent::PhaseChanged {
            phase,
            title: phase.title().to_string(),
            instruction: phase.instruction().to_string(),
        }
    }
}

/// Result of applying a learner's phase choice.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub from: Phase,
    /// Every phase entered, in order. A retry enters RETRY then HOME.
    pub entered: Vec<Phase>,
    /// The choice ended the cycle without moving.
    pub completed: bool,
}

impl TransitionOutcome {
    pub fn current(&self) -> Phase {
        self.entered.last().copied().unwrap_or(self.from)
    }
}

/// Forwards events to the caller until the caller goes away.
struct Relay<'a> {
    tx: &'a mpsc::Sender<TurnEvent>,
    open: bool,
}

impl<'a> Relay<'a> {
    fn new(tx: &'a mpsc::Sender<TurnEvent>) -> Self {
        Self { tx, open: true }
    }

    async fn send(&mut self, event: TurnEvent) {
        if self.open && self.tx.send(event).await.is_err() {
            debug!("Caller disconnected, no further events will be forwarded");
            self.open = false;
        }
    }
}

fn acknowledgement(ctx: &SessionContext, source: &ConceptSource) -> String {
    match source {
        ConceptSource::Material => {
            "학습 자료를 받았어요! 이 내용에 대해 얼마나 알고 계신가요?".to_string()
        }
        _ => format!(
            "'{}'에 대해 학습하시는군요! 이 개념에 대해 얼마나 알고 계신가요?",
            ctx.concept()
        ),
    }
}

/// Phases whose replies are feedback on the learner, so flagged lines count as weak points.
fn collects_feedback(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::FirstExplanation | Phase::SecondExplanation | Phase::Evaluation
    )
}

type SessionLocks = Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive access to one session. The lock entry is dropped from the map
/// once nobody else holds or waits on it.
struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

pub struct TurnOrchestrator {
    generation: Arc<dyn GenerationClient>,
    retrieval: Arc<dyn RetrievalService>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageLog>,
    assembler: PromptAssembler,
    settings: TutorSettings,
    locks: SessionLocks,
}

impl TurnOrchestrator {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        retrieval: Arc<dyn RetrievalService>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageLog>,
        settings: TutorSettings,
    ) -> Self {
        Self {
            generation,
            retrieval,
            sessions,
            messages,
            assembler: PromptAssembler::new(settings.passage_excerpt_chars),
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the invariant tutoring policy used in every prompt.
    pub fn with_base_policy(mut self, policy: impl Into<String>) -> Self {
        self.assembler = self.assembler.with_base_policy(policy);
        self
    }

    pub fn settings(&self) -> &TutorSettings {
        &self.settings
    }

    async fn session_lock(&self, id: Uuid) -> SessionGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone();
        let mut held = SessionGuard {
            locks: &self.locks,
            id,
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Creates a session at HOME for `owner_id`.
    pub async fn open_session(
        &self,
        owner_id: &str,
        corpus_id: Option<String>,
    ) -> Result<(Uuid, SessionContext)> {
        if owner_id.trim().is_empty() {
            return Err(TutorError::Validation("owner id must not be empty".into()));
        }
        let ctx = SessionContext::new(owner_id, corpus_id);
        let id = self.sessions.create(&ctx).await?;
        info!(session_id = %id, %owner_id, "Session created");
        Ok((id, ctx))
    }

    pub async fn session(&self, id: Uuid) -> Result<SessionContext> {
        self.sessions.get(id).await
    }

    pub async fn history(&self, id: Uuid) -> Result<Vec<StoredMessage>> {
        self.sessions.get(id).await?;
        self.messages.list(id).await
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<bool> {
        let existed = {
            let _guard = self.session_lock(id).await;
            self.sessions.delete(id).await?
        };
        if existed {
            info!(session_id = %id, "Session deleted");
        }
        Ok(existed)
    }

    /// Links a reference corpus, or unlinks it with `None`.
    pub async fn link_corpus(&self, id: Uuid, corpus_id: Option<String>) -> Result<SessionContext> {
        let _guard = self.session_lock(id).await;
        let mut ctx = self.sessions.get(id).await?;
        let corpus_id = corpus_id.filter(|c| !c.trim().is_empty());
        ctx.link_corpus(corpus_id);
        self.sessions.save(id, &ctx).await?;
        info!(session_id = %id, corpus_id = ?ctx.corpus_id(), "Corpus link updated");
        Ok(ctx)
    }

    /// Extracts a short concept from free text, falling back to the text itself.
    pub async fn extract_keyword(&self, text: &str) -> Result<(String, ConceptSource)> {
        if text.trim().is_empty() {
            return Err(TutorError::Validation("text must not be empty".into()));
        }
        Ok(concept::extract_keyword(
            self.generation.as_ref(),
            text,
            self.settings.classifier_timeout,
        )
        .await)
    }

    /// Seeds a HOME session with verbatim study material and moves it to KNOWLEDGE_CHECK.
    pub async fn initialize_learning(&self, id: Uuid, raw: &str) -> Result<SessionContext> {
        let material = raw.trim();
        if material.is_empty() {
            return Err(TutorError::Validation("concept must not be empty".into()));
        }
        let _guard = self.session_lock(id).await;
        let mut ctx = self.sessions.get(id).await?;
        if ctx.phase() != Phase::Home {
            return Err(TutorError::state(
                ctx.phase(),
                "learning can only be initialized from home",
            ));
        }
        ctx.set_subject(raw, material);
        while ctx.phase() != Phase::KnowledgeCheck {
            ctx.apply_transition(Choice::Continue)?;
        }
        self.sessions.save(id, &ctx).await?;
        info!(session_id = %id, concept_chars = material.chars().count(), "Learning initialized from material");
        Ok(ctx)
    }

    /// Applies a learner's phase choice. A missing choice means "continue".
    pub async fn handle_transition(
        &self,
        id: Uuid,
        choice: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let _guard = self.session_lock(id).await;
        let mut ctx = self.sessions.get(id).await?;
        let from = ctx.phase();
        let choice = Choice::parse(choice, from)?;

        if crate::phase::is_terminal(from, choice) {
            info!(session_id = %id, phase = %from, "Cycle complete");
            return Ok(TransitionOutcome {
                from,
                entered: Vec::new(),
                completed: true,
            });
        }

        let mut entered = vec![ctx.apply_transition(choice)?];
        if ctx.phase() == Phase::Retry {
            entered.push(ctx.apply_transition(Choice::Continue)?);
            info!(session_id = %id, "Cycle reset for retry");
        }
        self.sessions.save(id, &ctx).await?;
        info!(session_id = %id, %from, to = %ctx.phase(), "Phase changed");

        Ok(TransitionOutcome {
            from,
            entered,
            completed: false,
        })
    }

    /// Runs one learner message through the pipeline, relaying events on `tx`.
    ///
    /// The learner's message is persisted before anything else can fail. The
    /// assistant reply is persisted only once generation reports completion.
    pub async fn handle_message(
        &self,
        id: Uuid,
        text: &str,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<Phase> {
        if text.trim().is_empty() {
            return Err(TutorError::Validation("message text must not be empty".into()));
        }

        let _guard = self.session_lock(id).await;
        let mut ctx = self.sessions.get(id).await?;
        let phase = ctx.phase();

        async {
            self.messages
                .append(id, StoredMessage::new(MessageRole::User, phase, text))
                .await?;

            let mut relay = Relay::new(tx);
            if matches!(phase, Phase::Home | Phase::QuestionInput) && !ctx.has_subject() {
                self.capture_subject(id, &mut ctx, text, &mut relay).await
            } else {
                self.tutor_turn(id, &mut ctx, text, &mut relay).await
            }
        }
        .instrument(info_span!("turn", session_id = %id, %phase))
        .await
    }

    async fn capture_subject(
        &self,
        id: Uuid,
        ctx: &mut SessionContext,
        text: &str,
        relay: &mut Relay<'_>,
    ) -> Result<Phase> {
        let from = ctx.phase();
        let resolved =
            concept::resolve_concept(self.generation.as_ref(), text, self.settings.classifier_timeout)
                .await;
        ctx.set_subject(&resolved.anchor_question, &resolved.concept);
        while ctx.phase() != Phase::KnowledgeCheck {
            ctx.apply_transition(Choice::Continue)?;
        }
        self.sessions.save(id, ctx).await?;
        info!(concept = %ctx.concept(), source = ?resolved.source, "Subject captured");

        let ack = acknowledgement(ctx, &resolved.source);
        relay
            .send(TurnEvent::Stream {
                content: ack.clone(),
                phase: from,
            })
            .await;
        self.messages
            .append(id, StoredMessage::new(MessageRole::Assistant, from, ack))
            .await?;
        relay.send(TurnEvent::phase_changed(Phase::KnowledgeCheck)).await;
        relay
            .send(TurnEvent::Complete {
                phase: Phase::KnowledgeCheck,
            })
            .await;
        Ok(Phase::KnowledgeCheck)
    }

    /// Context changes of a tutor turn are saved only once the reply completed,
    /// so a resubmitted turn starts from the same context as the failed one.
    async fn tutor_turn(
        &self,
        id: Uuid,
        ctx: &mut SessionContext,
        text: &str,
        relay: &mut Relay<'_>,
    ) -> Result<Phase> {
        let phase = ctx.phase();

        if phase == Phase::FirstExplanation && !ctx.has_explanation_for(phase) {
            let result = classifier::classify(
                self.generation.as_ref(),
                ctx.concept(),
                text,
                self.settings.classifier_timeout,
            )
            .await;
            if ctx.apply_classification(&result) {
                info!(level = result.level, "Knowledge level updated");
            }
        }

        let query = query::plan_query(phase, ctx.concept(), text, ctx.anchor_question());
        let grounding = retrieval::fetch_grounding(
            self.retrieval.as_ref(),
            ctx.owner_id(),
            ctx.corpus_id(),
            &query,
            self.settings.top_k,
            self.settings.retrieval_timeout,
        )
        .await;
        debug!(%query, passages = grounding.passage_count(), "Retrieval finished");

        let instruction = self.assembler.assemble(ctx, &grounding, text);
        let reply = self.stream_reply(&instruction, phase, relay).await?;

        if phase.records_explanation() {
            ctx.record_explanation(phase, text);
        }
        if collects_feedback(phase) {
            let flagged = prompt::extract_flagged_points(&reply);
            if !flagged.is_empty() {
                debug!(count = flagged.len(), "Collected weak points from feedback");
                ctx.add_weak_points(flagged);
            }
        }
        self.sessions.save(id, ctx).await?;
        self.messages
            .append(
                id,
                StoredMessage::new(MessageRole::Assistant, phase, reply.clone()),
            )
            .await?;

        relay.send(TurnEvent::Complete { phase }).await;
        Ok(phase)
    }

    /// Streams a generation, forwarding chunks and returning the full text.
    ///
    /// Fails unless the stream reports completion; chunks already forwarded
    /// stay delivered.
    async fn stream_reply(
        &self,
        prompt: &str,
        phase: Phase,
        relay: &mut Relay<'_>,
    ) -> Result<String> {
        let mut stream = self.generation.stream(prompt).await?;
        let mut reply = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                LLMStreamEvent::TextChunk(chunk) => {
                    reply.push_str(&chunk);
                    relay
                        .send(TurnEvent::Stream {
                            content: chunk,
                            phase,
                        })
                        .await;
                }
                LLMStreamEvent::Done => return Ok(reply),
            }
        }

        warn!(received_chars = reply.chars().count(), "Generation stream ended before completion");
        Err(TutorError::UpstreamUnavailable(
            "generation stream ended before completion".into(),
        ))
    }
}
