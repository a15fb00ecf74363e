use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::database::connection::{SaveSession, StoreError};
use crate::question::QuestionProvider;
use crate::report;
use crate::session::{
    Category, Letter, QuestionSlot, Resolution, Session, SessionMap, UserId, QUESTION_COUNT,
};
use crate::timeout::{TimeoutKey, TimeoutScheduler};

pub type ReplyError = Box<dyn Error + Send + Sync>;

/// Capability to reach one student through the messaging channel. Both the
/// live-event path and the timer path go through this, so nothing ever has
/// to impersonate an incoming update to re-enter the send path.
pub trait ReplyTarget: Send + Sync + 'static {
    fn send_question(
        &self,
        user: UserId,
        slot_index: usize,
        slot: &QuestionSlot,
    ) -> impl Future<Output = Result<(), ReplyError>> + Send;

    fn send_notice(
        &self,
        user: UserId,
        text: &str,
    ) -> impl Future<Output = Result<(), ReplyError>> + Send;

    fn send_report(
        &self,
        user: UserId,
        text: &str,
    ) -> impl Future<Output = Result<(), ReplyError>> + Send;
}

impl<R: ReplyTarget> ReplyTarget for Arc<R> {
    fn send_question(
        &self,
        user: UserId,
        slot_index: usize,
        slot: &QuestionSlot,
    ) -> impl Future<Output = Result<(), ReplyError>> + Send {
        (**self).send_question(user, slot_index, slot)
    }

    fn send_notice(
        &self,
        user: UserId,
        text: &str,
    ) -> impl Future<Output = Result<(), ReplyError>> + Send {
        (**self).send_notice(user, text)
    }

    fn send_report(
        &self,
        user: UserId,
        text: &str,
    ) -> impl Future<Output = Result<(), ReplyError>> + Send {
        (**self).send_report(user, text)
    }
}

/// Tunables of the session engine. Defaults are the documented constants;
/// `from_env` lets deployments override them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a student has for one question.
    pub answer_budget: Duration,
    /// Deadline for one persistence attempt.
    pub store_budget: Duration,
    /// Persistence attempts before the result is dropped.
    pub store_retries: u32,
    /// Pause between persistence attempts.
    pub store_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            answer_budget: Duration::from_secs(30),
            store_budget: Duration::from_secs(10),
            store_retries: 3,
            store_backoff: Duration::from_secs(2),
        }
    }
}

fn env_secs(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            answer_budget: env_secs("ANSWER_BUDGET_SECS", defaults.answer_budget),
            store_budget: env_secs("STORE_BUDGET_SECS", defaults.store_budget),
            store_retries: std::env::var("STORE_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.store_retries),
            store_backoff: env_secs("STORE_BACKOFF_SECS", defaults.store_backoff),
        }
    }
}

/// The per-user placement-test state machine. Sequences the five questions,
/// races submitted answers against the per-question timer and finalizes a
/// completed session exactly once.
///
/// Correctness of the answer/timeout race rests on two facts only: each
/// session is a single-writer critical section (its own mutex), and the
/// cursor never moves backwards. Whichever event locks the session first
/// resolves the slot; the loser fails the `slot_index == cursor` guard and
/// becomes a no-op. Timer cancellation merely cuts down on spurious firings.
pub struct Engine<P, R, S> {
    provider: P,
    replies: R,
    store: S,
    sessions: SessionMap,
    timeouts: Arc<TimeoutScheduler>,
    config: EngineConfig,
}

impl<P, R, S> Engine<P, R, S>
where
    P: QuestionProvider,
    R: ReplyTarget,
    S: SaveSession,
{
    pub fn new(provider: P, replies: R, store: S, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            provider,
            replies,
            store,
            sessions: SessionMap::new(),
            timeouts: Arc::new(TimeoutScheduler::new()),
            config,
        })
    }

    /// Starts a placement test for `user`. A user with a test already in
    /// progress is told so and keeps the running one.
    pub async fn start(self: &Arc<Self>, user: UserId, category: Category) -> Result<(), ReplyError> {
        if self.sessions.contains(user).await {
            return self.reject_running(user).await;
        }

        let mut questions = Vec::with_capacity(QUESTION_COUNT);
        for _ in 0..QUESTION_COUNT {
            questions.push(self.provider.fetch(category).await);
        }

        let entry = match self
            .sessions
            .insert_if_absent(user, Session::new(user, category, questions))
            .await
        {
            Ok(entry) => entry,
            // a second category tap raced us while questions were generating
            Err(()) => return self.reject_running(user).await,
        };

        log::info!("{user} started a placement test on '{}'", category.tag());
        self.replies
            .send_notice(
                user,
                &format!(
                    "🚀 Teste de nivelamento: {}!\nSão {} questões, {} segundos para cada uma.",
                    category.label(),
                    QUESTION_COUNT,
                    self.config.answer_budget.as_secs()
                ),
            )
            .await?;

        let session = entry.lock().await;
        self.emit_current_question(&session).await
    }

    async fn reject_running(self: &Arc<Self>, user: UserId) -> Result<(), ReplyError> {
        log::info!("{user} tried to start a test with one already in progress");
        self.replies
            .send_notice(
                user,
                "📝 Você já tem um teste em andamento. Responda a questão atual ou use /cancel.",
            )
            .await
    }

    /// Sends the question under the cursor and arms its timer. Returns a
    /// boxed future: the timer callback re-enters this method via
    /// `on_timeout`, and an unboxed return type would make the callback's
    /// `Send` proof recurse into itself.
    fn emit_current_question<'a>(
        self: &'a Arc<Self>,
        session: &'a Session,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReplyError>> + Send + 'a>> {
        Box::pin(async move {
            let user = session.user_id();
            let slot_index = session.cursor();
            let Some(slot) = session.current() else {
                return Ok(());
            };

            self.replies.send_question(user, slot_index, slot).await?;

            let engine = Arc::clone(self);
            self.timeouts.schedule(
                TimeoutKey::new(user, slot_index),
                self.config.answer_budget,
                move || async move {
                    if let Err(e) = engine.on_timeout(user, slot_index).await {
                        log::error!("timeout handling for {user}/{slot_index} failed: {e}");
                    }
                },
            );
            Ok(())
        })
    }

    /// Applies a submitted answer. Answers for any slot other than the one
    /// under the cursor are stale (a duplicate tap, or a tap that lost the
    /// race against the timer) and only earn an informational notice.
    pub async fn submit_answer(
        self: &Arc<Self>,
        user: UserId,
        slot_index: usize,
        letter: Letter,
    ) -> Result<(), ReplyError> {
        let Some(entry) = self.sessions.get(user).await else {
            log::debug!("answer from {user} without a live session, dropping");
            return Ok(());
        };
        let mut session = entry.lock().await;

        if slot_index != session.cursor() {
            log::debug!(
                "stale answer from {user} for slot {slot_index}, cursor is {}",
                session.cursor()
            );
            return self
                .replies
                .send_notice(user, "Essa questão já foi encerrada.")
                .await;
        }

        self.timeouts.cancel(&TimeoutKey::new(user, slot_index));

        let Some(slot) = session.current() else {
            return Ok(());
        };
        let correct_letter = slot.correct_letter();
        let resolution = if letter == correct_letter {
            Resolution::AnsweredCorrect
        } else {
            Resolution::AnsweredWrong
        };
        session.resolve_current(resolution, Some(letter));

        let feedback = match resolution {
            Resolution::AnsweredCorrect => "✅ Correto! Bom trabalho!".to_string(),
            _ => format!("❌ Incorreto. Resposta correta: {correct_letter}"),
        };
        self.replies.send_notice(user, &feedback).await?;

        self.advance(&mut session).await
    }

    /// Applies a fired timer. A timer for any slot other than the one under
    /// the cursor lost the race against an answer and is dropped silently.
    pub async fn on_timeout(self: &Arc<Self>, user: UserId, slot_index: usize) -> Result<(), ReplyError> {
        let Some(entry) = self.sessions.get(user).await else {
            log::debug!("timeout for {user} without a live session, dropping");
            return Ok(());
        };
        let mut session = entry.lock().await;

        if slot_index != session.cursor() {
            log::debug!(
                "stale timeout for {user}/{slot_index}, cursor is {}",
                session.cursor()
            );
            return Ok(());
        }

        let Some(slot) = session.current() else {
            return Ok(());
        };
        let correct_letter = slot.correct_letter();
        session.resolve_current(Resolution::TimedOut, None);

        self.replies
            .send_notice(
                user,
                &format!("⏰ Tempo esgotado! Resposta correta: {correct_letter}"),
            )
            .await?;

        self.advance(&mut session).await
    }

    async fn advance(self: &Arc<Self>, session: &mut Session) -> Result<(), ReplyError> {
        if session.is_complete() {
            self.finalize(session).await
        } else {
            self.emit_current_question(session).await
        }
    }

    /// Persists a fully-resolved session and tears it down. The write is
    /// bounded and retried; a result that cannot be stored is given up on
    /// with a single apology rather than trapping the user in a dead
    /// session.
    async fn finalize(self: &Arc<Self>, session: &mut Session) -> Result<(), ReplyError> {
        let user = session.user_id();
        let result = report::build(session);
        log::info!(
            "{user} finished the test: {}/{} ({})",
            result.score,
            QUESTION_COUNT,
            result.level
        );

        while session.store_attempts() < self.config.store_retries {
            session.record_store_attempt();
            let outcome = match tokio::time::timeout(
                self.config.store_budget,
                self.store.save_session(&result),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(StoreError::DeadlineExceeded),
            };

            match outcome {
                Ok(()) => {
                    self.sessions.remove(user).await;
                    return self
                        .replies
                        .send_report(user, &report::summary_text(&result))
                        .await;
                }
                Err(e) => {
                    log::warn!(
                        "saving results for {user} failed on attempt {}: {e}",
                        session.store_attempts()
                    );
                    if session.store_attempts() < self.config.store_retries {
                        tokio::time::sleep(self.config.store_backoff).await;
                    }
                }
            }
        }

        log::error!(
            "dropping results for {user} after {} failed store attempts",
            session.store_attempts()
        );
        self.sessions.remove(user).await;
        self.replies
            .send_notice(
                user,
                "⚠️ Não foi possível salvar seu resultado. Tente o teste novamente mais tarde.",
            )
            .await
    }

    /// Tears down a session on the user's request, disarming its timer.
    pub async fn abandon(self: &Arc<Self>, user: UserId) -> Result<bool, ReplyError> {
        let Some(entry) = self.sessions.get(user).await else {
            return Ok(false);
        };
        let session = entry.lock().await;
        self.timeouts.cancel(&TimeoutKey::new(user, session.cursor()));
        self.sessions.remove(user).await;
        log::info!("{user} abandoned the test at question {}", session.cursor() + 1);
        Ok(true)
    }

    #[cfg(test)]
    async fn has_session(&self, user: UserId) -> bool {
        self.sessions.contains(user).await
    }

    #[cfg(test)]
    async fn snapshot(&self, user: UserId) -> Option<(usize, Vec<Resolution>)> {
        let entry = self.sessions.get(user).await?;
        let session = entry.lock().await;
        Some((
            session.cursor(),
            session.questions().iter().map(|q| q.resolution()).collect(),
        ))
    }
}
