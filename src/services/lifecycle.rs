//! Teacher side of a session: poll creation, question lifecycle and live
//! results.

use std::time::SystemTime;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    bus::{ChangeEvent, ChangeFilter, ChangeKind, SubscriptionId},
    dao::{
        models::{
            MAX_OPTIONS, MAX_TIME_LIMIT_SECONDS, MIN_OPTIONS, MIN_TIME_LIMIT_SECONDS,
            ParticipantEntity, PollEntity, QuestionEntity, Record, Table, UpdateOutcome,
        },
        storage::StorageError,
    },
    dto::session::{
        ParticipantSummary, PollSummary, QuestionSummary, StartQuestionRequest, TeacherView,
    },
    error::ServiceError,
    services::{
        aggregator::{Acceptance, ResponseSet},
        instance::EngineDeps,
    },
    state::{
        countdown::{Countdown, CountdownEvent, remaining_seconds},
        state_machine::{SessionEvent, SessionStateMachine},
        transitions::{run_transition, with_timeout},
    },
};

/// Raw question input as typed by the teacher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    /// Question text.
    pub text: String,
    /// Options as typed, blanks included.
    pub options: Vec<String>,
    /// Answering window in seconds.
    pub time_limit_seconds: u32,
}

impl QuestionDraft {
    /// Draft from borrowed option labels.
    pub fn new(text: impl Into<String>, options: &[&str], time_limit_seconds: u32) -> Self {
        Self {
            text: text.into(),
            options: options.iter().map(|option| option.to_string()).collect(),
            time_limit_seconds,
        }
    }

    /// Trim text and options, drop blank options (keeping the order of the
    /// others) and check the bounds.
    pub fn normalize(self) -> Result<QuestionDraft, ServiceError> {
        let text = self.text.trim().to_owned();
        if text.is_empty() {
            return Err(ServiceError::Validation("question text must not be empty".into()));
        }

        let options: Vec<String> = self
            .options
            .iter()
            .map(|option| option.trim())
            .filter(|option| !option.is_empty())
            .map(str::to_owned)
            .collect();
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
            return Err(ServiceError::Validation(format!(
                "a question needs between {MIN_OPTIONS} and {MAX_OPTIONS} non-empty options (got {})",
                options.len()
            )));
        }

        if !(MIN_TIME_LIMIT_SECONDS..=MAX_TIME_LIMIT_SECONDS).contains(&self.time_limit_seconds) {
            return Err(ServiceError::Validation(format!(
                "time limit must be between {MIN_TIME_LIMIT_SECONDS} and {MAX_TIME_LIMIT_SECONDS} seconds"
            )));
        }

        Ok(QuestionDraft {
            text,
            options,
            time_limit_seconds: self.time_limit_seconds,
        })
    }
}

impl From<StartQuestionRequest> for QuestionDraft {
    fn from(request: StartQuestionRequest) -> Self {
        Self {
            text: request.text,
            options: request.options,
            time_limit_seconds: request.time_limit_seconds,
        }
    }
}

/// Everything the teacher instance knows about its session.
#[derive(Debug, Default)]
pub struct TeacherContext {
    /// Poll created by this instance.
    pub poll: Option<PollEntity>,
    /// Current question; kept after it closes so the final results stay visible.
    pub question: Option<QuestionEntity>,
    /// Participants by id, in join order.
    pub participants: IndexMap<Uuid, ParticipantEntity>,
    /// Accumulator for the current question.
    pub responses: ResponseSet,
    /// Countdown value.
    pub remaining_seconds: Option<u32>,
}

/// Drives poll and question transitions for one teacher instance.
pub struct LifecycleEngine {
    deps: EngineDeps,
    machine: SessionStateMachine,
    context: TeacherContext,
    countdown: Countdown,
    changes: mpsc::UnboundedSender<ChangeEvent>,
    ticks: mpsc::UnboundedSender<CountdownEvent>,
    poll_subscriptions: Vec<SubscriptionId>,
    response_subscription: Option<SubscriptionId>,
}

impl LifecycleEngine {
    /// Engine with no poll yet. Bus events are delivered on `changes`,
    /// countdown ticks on `ticks`.
    pub fn new(
        deps: EngineDeps,
        changes: mpsc::UnboundedSender<ChangeEvent>,
        ticks: mpsc::UnboundedSender<CountdownEvent>,
    ) -> Self {
        Self {
            deps,
            machine: SessionStateMachine::new(),
            context: TeacherContext::default(),
            countdown: Countdown::new(),
            changes,
            ticks,
            poll_subscriptions: Vec::new(),
            response_subscription: None,
        }
    }

    /// Current teacher context.
    pub fn context(&self) -> &TeacherContext {
        &self.context
    }

    /// Create a new poll with a fresh join code and start listening for
    /// participants and questions.
    pub async fn create_poll(&mut self) -> Result<PollEntity, ServiceError> {
        if self.context.poll.is_some() {
            return Err(ServiceError::InvalidState(
                "a poll already exists for this session".into(),
            ));
        }

        let attempts = self.deps.config.code_generation_attempts;
        let mut attempt = 0;
        let poll = loop {
            attempt += 1;
            let code = self.deps.codes.next_code(self.deps.config.code_length);
            let candidate = PollEntity::new(code, self.deps.config.poll_title.clone());
            let repo = self.deps.repo.clone();

            let result = run_transition(
                &mut self.machine,
                SessionEvent::PollOpened {
                    poll_id: candidate.id,
                },
                self.deps.config.transition_timeout,
                || async move {
                    repo.insert_poll(candidate)
                        .await
                        .map_err(ServiceError::Persistence)
                },
            )
            .await;

            match result {
                Ok((poll, _)) => break poll,
                Err(ServiceError::Persistence(StorageError::Conflict { .. }))
                    if attempt < attempts =>
                {
                    debug!(attempt, "join code already in use; drawing another");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "failed to create poll");
                    return Err(err);
                }
            }
        };

        info!(poll_id = %poll.id, code = %poll.code, "poll created");
        self.context.poll = Some(poll.clone());
        self.subscribe_poll(poll.id);
        self.resync_poll(poll.id).await;
        Ok(poll)
    }

    /// Open a new question, closing the running one first.
    pub async fn start_question(
        &mut self,
        draft: QuestionDraft,
    ) -> Result<QuestionEntity, ServiceError> {
        let draft = draft.normalize()?;
        let poll_id = self
            .context
            .poll
            .as_ref()
            .map(|poll| poll.id)
            .ok_or_else(|| ServiceError::InvalidState("create a poll first".into()))?;

        if let Some(running) = self.context.question.as_ref().filter(|q| q.is_active) {
            let running_id = running.id;
            debug!(question_id = %running_id, "closing running question before starting a new one");
            self.close_question(running_id).await?;
        }

        let question = QuestionEntity::open(
            poll_id,
            draft.text,
            draft.options,
            draft.time_limit_seconds,
        );
        let repo = self.deps.repo.clone();
        let (question, _) = run_transition(
            &mut self.machine,
            SessionEvent::QuestionStarted {
                question_id: question.id,
            },
            self.deps.config.transition_timeout,
            || async move { repo.insert_question(question).await.map_err(ServiceError::from) },
        )
        .await?;

        info!(
            poll_id = %poll_id,
            question_id = %question.id,
            options = question.options.len(),
            time_limit_seconds = question.time_limit_seconds,
            "question started"
        );
        self.adopt_question(question.clone()).await;
        Ok(question)
    }

    /// Close the current question. Closing an already closed question is a
    /// no-op that returns the stored state.
    pub async fn end_question(&mut self) -> Result<QuestionEntity, ServiceError> {
        let question_id = self
            .context
            .question
            .as_ref()
            .map(|question| question.id)
            .ok_or_else(|| ServiceError::InvalidState("no question to end".into()))?;
        self.close_question(question_id).await
    }

    /// Same as [`end_question`](Self::end_question), triggered by the teacher
    /// before the countdown ran out.
    pub async fn end_question_early(&mut self) -> Result<QuestionEntity, ServiceError> {
        let closed = self.end_question().await?;
        info!(question_id = %closed.id, "question ended early");
        Ok(closed)
    }

    async fn close_question(&mut self, question_id: Uuid) -> Result<QuestionEntity, ServiceError> {
        let repo = self.deps.repo.clone();
        let limit = self.deps.config.transition_timeout;
        let work = move || async move {
            match repo.close_question(question_id, SystemTime::now()).await? {
                UpdateOutcome::Updated(question) | UpdateOutcome::Unchanged(question) => {
                    Ok(question)
                }
                UpdateOutcome::Missing => {
                    Err(ServiceError::NotFound(format!("question {question_id}")))
                }
            }
        };

        let closed = if self.machine.phase().question_id() == Some(question_id) {
            run_transition(
                &mut self.machine,
                SessionEvent::QuestionEnded { question_id },
                limit,
                work,
            )
            .await?
            .0
        } else {
            with_timeout(limit, work()).await?
        };

        self.apply_closed(closed.clone());
        Ok(closed)
    }

    /// React to a store change delivered by the bus. Every branch is
    /// idempotent by record id.
    pub async fn handle_change(&mut self, event: ChangeEvent) {
        let Some(poll_id) = self.context.poll.as_ref().map(|poll| poll.id) else {
            return;
        };

        match (event.kind, event.record) {
            (ChangeKind::Insert, Record::Participant(participant))
                if participant.poll_id == poll_id =>
            {
                if !self.context.participants.contains_key(&participant.id) {
                    debug!(participant_id = %participant.id, name = %participant.name, "participant joined");
                    self.context.participants.insert(participant.id, participant);
                }
            }
            (ChangeKind::Insert, Record::Response(response)) => {
                let response_id = response.id;
                match self.context.responses.accept(response) {
                    Acceptance::Accepted => debug!(response_id = %response_id, "response counted"),
                    other => debug!(response_id = %response_id, outcome = ?other, "response ignored"),
                }
            }
            (ChangeKind::Insert, Record::Question(question))
                if question.poll_id == poll_id && question.is_active =>
            {
                let known = self.context.question.as_ref().map(|q| q.id) == Some(question.id);
                if !known {
                    info!(question_id = %question.id, "adopting question started elsewhere");
                    if let Err(err) = self.machine.force(SessionEvent::QuestionStarted {
                        question_id: question.id,
                    }) {
                        warn!(error = ?err, "could not record externally started question");
                    }
                    self.adopt_question(question).await;
                }
            }
            (ChangeKind::Update, Record::Question(question))
                if question.poll_id == poll_id && !question.is_active =>
            {
                let still_open = self
                    .context
                    .question
                    .as_ref()
                    .is_some_and(|current| current.id == question.id && current.is_active);
                if still_open {
                    info!(question_id = %question.id, "question closed elsewhere");
                    if self.machine.phase().question_id() == Some(question.id) {
                        if let Err(err) = self.machine.force(SessionEvent::QuestionEnded {
                            question_id: question.id,
                        }) {
                            warn!(error = ?err, "could not record externally closed question");
                        }
                    }
                    self.apply_closed(question);
                }
            }
            _ => {}
        }
    }

    /// React to the local countdown.
    pub async fn handle_countdown(&mut self, event: CountdownEvent) {
        if !self.countdown.is_current(&event) {
            return;
        }
        match event {
            CountdownEvent::Tick { remaining, .. } => {
                self.context.remaining_seconds = Some(remaining);
            }
            CountdownEvent::Expired { question_id, .. } => {
                self.context.remaining_seconds = Some(0);
                match self.close_question(question_id).await {
                    Ok(_) => info!(question_id = %question_id, "question closed by countdown"),
                    Err(err) => {
                        warn!(question_id = %question_id, error = %err, "failed to close question on countdown expiry")
                    }
                }
            }
        }
    }

    /// Project the context for rendering.
    pub fn view(&self) -> TeacherView {
        let tally = self
            .context
            .question
            .as_ref()
            .map(|question| self.context.responses.tally(&question.options))
            .unwrap_or_default();

        TeacherView {
            poll: self.context.poll.as_ref().map(PollSummary::from),
            question: self.context.question.as_ref().map(QuestionSummary::from),
            remaining_seconds: self.context.remaining_seconds,
            participant_count: self.context.participants.len(),
            participants: self
                .context
                .participants
                .values()
                .map(ParticipantSummary::from)
                .collect(),
            response_count: self.context.responses.count(),
            tally,
        }
    }

    /// Drop every bus subscription, stop the countdown, then close the
    /// running question and the poll so late joiners get `NotFound`.
    pub async fn shutdown(&mut self) {
        for id in self.poll_subscriptions.drain(..) {
            self.deps.bus.unsubscribe(id);
        }
        if let Some(id) = self.response_subscription.take() {
            self.deps.bus.unsubscribe(id);
        }
        self.countdown.cancel();

        let limit = self.deps.config.transition_timeout;
        if let Some(question) = self.context.question.as_ref().filter(|q| q.is_active) {
            let question_id = question.id;
            let repo = self.deps.repo.clone();
            let closed = with_timeout(limit, async move {
                repo.close_question(question_id, SystemTime::now())
                    .await
                    .map_err(ServiceError::from)
            })
            .await;
            if let Err(err) = closed {
                warn!(question_id = %question_id, error = %err, "failed to close question on shutdown");
            }
        }

        let Some(poll_id) = self.context.poll.as_ref().map(|poll| poll.id) else {
            return;
        };
        let repo = self.deps.repo.clone();
        let closed = with_timeout(limit, async move {
            repo.close_poll(poll_id).await.map_err(ServiceError::from)
        })
        .await;
        match closed {
            Ok(UpdateOutcome::Updated(_)) => info!(poll_id = %poll_id, "poll closed"),
            Ok(_) => debug!(poll_id = %poll_id, "poll already closed"),
            Err(err) => warn!(poll_id = %poll_id, error = %err, "failed to close poll on shutdown"),
        }
    }

    fn subscribe_poll(&mut self, poll_id: Uuid) {
        for table in [Table::Participants, Table::Questions] {
            let id = self
                .deps
                .bus
                .subscribe(ChangeFilter::scoped(table, poll_id), self.changes.clone());
            self.poll_subscriptions.push(id);
        }
    }

    async fn resync_poll(&mut self, poll_id: Uuid) {
        match self.deps.repo.list_participants(poll_id).await {
            Ok(participants) => {
                for participant in participants {
                    self.context
                        .participants
                        .entry(participant.id)
                        .or_insert(participant);
                }
            }
            Err(err) => warn!(poll_id = %poll_id, error = %err, "failed to resync participants"),
        }
    }

    /// Make `question` the current one: reset the accumulator, move the
    /// response subscription and start the countdown.
    async fn adopt_question(&mut self, question: QuestionEntity) {
        if let Some(previous) = self.response_subscription.take() {
            self.deps.bus.unsubscribe(previous);
        }
        self.context.responses.reset(question.id);
        self.response_subscription = Some(self.deps.bus.subscribe(
            ChangeFilter::scoped(Table::Responses, question.id),
            self.changes.clone(),
        ));

        let remaining = remaining_seconds(
            question.time_limit_seconds,
            question.started_at,
            SystemTime::now(),
        );
        self.context.remaining_seconds = Some(remaining);
        self.countdown
            .start(question.id, remaining, self.ticks.clone());
        let question_id = question.id;
        self.context.question = Some(question);

        match self.deps.repo.list_responses(question_id).await {
            Ok(responses) => {
                for response in responses {
                    self.context.responses.accept(response);
                }
            }
            Err(err) => {
                warn!(question_id = %question_id, error = %err, "failed to resync responses")
            }
        }
    }

    fn apply_closed(&mut self, closed: QuestionEntity) {
        if self.countdown.question_id() == Some(closed.id) {
            self.countdown.cancel();
        }
        let is_current = self
            .context
            .question
            .as_ref()
            .is_some_and(|current| current.id == closed.id);
        if !is_current {
            return;
        }

        self.context.remaining_seconds = None;
        if let Some(ended_at) = closed.ended_at {
            let pruned = self.context.responses.close(ended_at);
            if pruned > 0 {
                debug!(question_id = %closed.id, pruned, "dropped responses submitted after close");
            }
        }
        self.context.question = Some(closed);
    }
}
