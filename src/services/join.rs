//! Student side of a session: joining by code, catching up with the running
//! question and submitting one answer.

use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    bus::{ChangeEvent, ChangeFilter, ChangeKind, SubscriptionId},
    dao::models::{ParticipantEntity, PollEntity, QuestionEntity, Record, ResponseEntity, Table},
    dto::session::{PollSummary, QuestionSummary, StudentView},
    error::ServiceError,
    services::{aggregator::submit_response, instance::EngineDeps, session_code::normalize_code},
    state::{
        countdown::{Countdown, CountdownEvent, remaining_seconds},
        state_machine::{SessionEvent, SessionStateMachine},
        transitions::{run_transition, with_timeout},
    },
};

/// Everything the student instance knows about its session.
#[derive(Debug, Default)]
pub struct StudentContext {
    /// Joined poll.
    pub poll: Option<PollEntity>,
    /// Row created on join.
    pub participant: Option<ParticipantEntity>,
    /// Open question.
    pub question: Option<QuestionEntity>,
    /// Highlighted option.
    pub selected_option: Option<usize>,
    /// Answer submitted or time ran out.
    pub has_answered: bool,
    /// Countdown value.
    pub remaining_seconds: Option<u32>,
}

/// Resolves a join code to a poll and keeps the student in sync with it.
pub struct JoinResolver {
    deps: EngineDeps,
    machine: SessionStateMachine,
    context: StudentContext,
    countdown: Countdown,
    changes: mpsc::UnboundedSender<ChangeEvent>,
    ticks: mpsc::UnboundedSender<CountdownEvent>,
    subscription: Option<SubscriptionId>,
}

impl JoinResolver {
    /// Resolver with no poll joined. Bus events are delivered on `changes`,
    /// countdown ticks on `ticks`.
    pub fn new(
        deps: EngineDeps,
        changes: mpsc::UnboundedSender<ChangeEvent>,
        ticks: mpsc::UnboundedSender<CountdownEvent>,
    ) -> Self {
        Self {
            deps,
            machine: SessionStateMachine::new(),
            context: StudentContext::default(),
            countdown: Countdown::new(),
            changes,
            ticks,
            subscription: None,
        }
    }

    /// Current student context.
    pub fn context(&self) -> &StudentContext {
        &self.context
    }

    /// Join the active poll identified by `code` under `name`.
    pub async fn join_poll(
        &mut self,
        code: &str,
        name: &str,
    ) -> Result<ParticipantEntity, ServiceError> {
        if self.context.participant.is_some() {
            return Err(ServiceError::InvalidState(
                "this instance already joined a poll".into(),
            ));
        }

        let code = normalize_code(code);
        let name = name.trim();
        if code.is_empty() {
            return Err(ServiceError::Validation("poll code must not be empty".into()));
        }
        if name.is_empty() {
            return Err(ServiceError::Validation("name must not be empty".into()));
        }

        let limit = self.deps.config.transition_timeout;
        let repo = self.deps.repo.clone();
        let poll = with_timeout(limit, async {
            repo.find_active_poll_by_code(&code)
                .await
                .map_err(ServiceError::from)
        })
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no active poll with code {code}")))?;

        let participant = ParticipantEntity::new(poll.id, name.to_owned());
        let (participant, _) = run_transition(
            &mut self.machine,
            SessionEvent::PollOpened { poll_id: poll.id },
            limit,
            || async move {
                repo.insert_participant(participant)
                    .await
                    .map_err(ServiceError::from)
            },
        )
        .await?;

        info!(
            poll_id = %poll.id,
            code = %poll.code,
            participant_id = %participant.id,
            "participant joined poll"
        );

        self.subscription = Some(self.deps.bus.subscribe(
            ChangeFilter::scoped(Table::Questions, poll.id),
            self.changes.clone(),
        ));
        let poll_id = poll.id;
        self.context.poll = Some(poll);
        self.context.participant = Some(participant.clone());

        match self.deps.repo.find_active_question(poll_id).await {
            Ok(Some(question)) => self.present_question(question),
            Ok(None) => {}
            Err(err) => warn!(poll_id = %poll_id, error = %err, "failed to catch up with active question"),
        }

        Ok(participant)
    }

    /// Highlight an option of the current question.
    pub fn select_option(&mut self, index: usize) -> Result<(), ServiceError> {
        let question = self.open_question()?;
        if index >= question.options.len() {
            return Err(ServiceError::Validation(format!(
                "option {index} does not exist (question has {} options)",
                question.options.len()
            )));
        }
        self.context.selected_option = Some(index);
        Ok(())
    }

    /// Submit the selected option for the current question.
    pub async fn submit_answer(&mut self) -> Result<ResponseEntity, ServiceError> {
        let participant_id = self
            .context
            .participant
            .as_ref()
            .map(|participant| participant.id)
            .ok_or_else(|| ServiceError::InvalidState("join a poll first".into()))?;
        let question_id = self.open_question()?.id;
        let selected = self
            .context
            .selected_option
            .ok_or_else(|| ServiceError::Validation("select an option first".into()))?;

        let repo = self.deps.repo.clone();
        let response = with_timeout(
            self.deps.config.transition_timeout,
            submit_response(&repo, question_id, participant_id, selected),
        )
        .await?;

        self.context.has_answered = true;
        Ok(response)
    }

    /// React to a question change for the joined poll.
    pub async fn handle_change(&mut self, event: ChangeEvent) {
        let Some(poll_id) = self.context.poll.as_ref().map(|poll| poll.id) else {
            return;
        };

        match (event.kind, event.record) {
            (ChangeKind::Insert, Record::Question(question))
                if question.poll_id == poll_id && question.is_active =>
            {
                let known = self.context.question.as_ref().map(|q| q.id) == Some(question.id);
                if !known {
                    self.present_question(question);
                }
            }
            (ChangeKind::Update, Record::Question(question))
                if question.poll_id == poll_id && !question.is_active =>
            {
                let is_current = self
                    .context
                    .question
                    .as_ref()
                    .is_some_and(|current| current.id == question.id);
                if is_current {
                    info!(question_id = %question.id, "question closed");
                    if let Err(err) = self.machine.force(SessionEvent::QuestionEnded {
                        question_id: question.id,
                    }) {
                        debug!(error = ?err, "question end already recorded");
                    }
                    self.countdown.cancel();
                    self.context.question = None;
                    self.context.remaining_seconds = None;
                    self.context.selected_option = None;
                }
            }
            _ => {}
        }
    }

    /// React to the local countdown. Expiry locks answering until the store
    /// reports the close.
    pub async fn handle_countdown(&mut self, event: CountdownEvent) {
        if !self.countdown.is_current(&event) {
            return;
        }
        match event {
            CountdownEvent::Tick { remaining, .. } => {
                self.context.remaining_seconds = Some(remaining);
            }
            CountdownEvent::Expired { question_id, .. } => {
                debug!(question_id = %question_id, "time is up; answering locked");
                self.context.remaining_seconds = Some(0);
                self.context.has_answered = true;
            }
        }
    }

    /// Project the context for rendering.
    pub fn view(&self) -> StudentView {
        StudentView {
            poll: self.context.poll.as_ref().map(PollSummary::from),
            participant_id: self.context.participant.as_ref().map(|p| p.id),
            participant_name: self.context.participant.as_ref().map(|p| p.name.clone()),
            question: self.context.question.as_ref().map(QuestionSummary::from),
            remaining_seconds: self.context.remaining_seconds,
            selected_option: self.context.selected_option,
            has_answered: self.context.has_answered,
        }
    }

    /// Drop the bus subscription and stop the countdown.
    pub fn shutdown(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.deps.bus.unsubscribe(id);
        }
        self.countdown.cancel();
    }

    fn open_question(&self) -> Result<&QuestionEntity, ServiceError> {
        let question = self
            .context
            .question
            .as_ref()
            .filter(|question| question.is_active)
            .ok_or_else(|| ServiceError::InvalidState("no question is open".into()))?;
        if self.context.has_answered {
            return Err(ServiceError::InvalidState(
                "already answered this question".into(),
            ));
        }
        Ok(question)
    }

    /// Show `question` with the time left on it and reset the local answer.
    fn present_question(&mut self, question: QuestionEntity) {
        let remaining = remaining_seconds(
            question.time_limit_seconds,
            question.started_at,
            SystemTime::now(),
        );
        if let Err(err) = self.machine.force(SessionEvent::QuestionStarted {
            question_id: question.id,
        }) {
            warn!(error = ?err, "could not record question start");
        }

        info!(question_id = %question.id, remaining, "question presented");
        self.countdown
            .start(question.id, remaining, self.ticks.clone());
        self.context.remaining_seconds = Some(remaining);
        self.context.selected_option = None;
        self.context.has_answered = false;
        self.context.question = Some(question);
    }
}
