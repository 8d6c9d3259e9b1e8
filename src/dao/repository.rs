use std::{sync::Arc, time::SystemTime};

use uuid::Uuid;

use crate::dao::{
    models::{
        Filter, ParticipantEntity, Patch, PollEntity, QuestionEntity, Record, ResponseEntity,
        Table, UpdateOutcome,
    },
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// Typed access to the session store.
///
/// Converts between entities and the [`Record`] rows the store speaks, so the
/// engines never match on table tags themselves.
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn SessionStore>,
}

impl SessionRepository {
    /// Wrap a store handle.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Persist a new poll; a taken code is a `Conflict`.
    pub async fn insert_poll(&self, poll: PollEntity) -> StorageResult<PollEntity> {
        let record = self.store.insert(poll.into()).await?;
        expect_row(Table::Polls, record.into_poll())
    }

    /// Active poll whose code equals `code` (already normalized).
    pub async fn find_active_poll_by_code(&self, code: &str) -> StorageResult<Option<PollEntity>> {
        let row = self
            .store
            .query_one(Table::Polls, Filter::ActivePollByCode(code.to_owned()))
            .await?;
        Ok(row.and_then(Record::into_poll))
    }

    /// Persist a new question.
    pub async fn insert_question(&self, question: QuestionEntity) -> StorageResult<QuestionEntity> {
        let record = self.store.insert(question.into()).await?;
        expect_row(Table::Questions, record.into_question())
    }

    /// Question by id.
    pub async fn find_question(&self, id: Uuid) -> StorageResult<Option<QuestionEntity>> {
        let row = self.store.query_one(Table::Questions, Filter::Id(id)).await?;
        Ok(row.and_then(Record::into_question))
    }

    /// Active question of a poll, if one is running.
    pub async fn find_active_question(&self, poll_id: Uuid) -> StorageResult<Option<QuestionEntity>> {
        let row = self
            .store
            .query_one(Table::Questions, Filter::ActiveQuestion { poll_id })
            .await?;
        Ok(row.and_then(Record::into_question))
    }

    /// Close a question if it is still active. Closing an already closed
    /// question reports [`UpdateOutcome::Unchanged`] and keeps the first
    /// `ended_at`.
    pub async fn close_question(
        &self,
        id: Uuid,
        ended_at: SystemTime,
    ) -> StorageResult<UpdateOutcome<QuestionEntity>> {
        let outcome = self
            .store
            .update(Table::Questions, id, Patch::CloseQuestion { ended_at })
            .await?;
        Ok(match outcome {
            UpdateOutcome::Updated(record) => {
                UpdateOutcome::Updated(expect_row(Table::Questions, record.into_question())?)
            }
            UpdateOutcome::Unchanged(record) => {
                UpdateOutcome::Unchanged(expect_row(Table::Questions, record.into_question())?)
            }
            UpdateOutcome::Missing => UpdateOutcome::Missing,
        })
    }

    /// Close a poll so its code stops resolving. Closing twice reports
    /// [`UpdateOutcome::Unchanged`].
    pub async fn close_poll(&self, id: Uuid) -> StorageResult<UpdateOutcome<PollEntity>> {
        let outcome = self
            .store
            .update(Table::Polls, id, Patch::ClosePoll)
            .await?;
        Ok(match outcome {
            UpdateOutcome::Updated(record) => {
                UpdateOutcome::Updated(expect_row(Table::Polls, record.into_poll())?)
            }
            UpdateOutcome::Unchanged(record) => {
                UpdateOutcome::Unchanged(expect_row(Table::Polls, record.into_poll())?)
            }
            UpdateOutcome::Missing => UpdateOutcome::Missing,
        })
    }

    /// Persist a participant; the poll must be active.
    pub async fn insert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> StorageResult<ParticipantEntity> {
        let record = self.store.insert(participant.into()).await?;
        expect_row(Table::Participants, record.into_participant())
    }

    /// Participants of a poll in join order.
    pub async fn list_participants(&self, poll_id: Uuid) -> StorageResult<Vec<ParticipantEntity>> {
        let rows = self
            .store
            .query_many(Table::Participants, Filter::ByPoll(poll_id))
            .await?;
        Ok(rows.into_iter().filter_map(Record::into_participant).collect())
    }

    /// Persist a response; the question must be active and unanswered by
    /// this participant.
    pub async fn insert_response(&self, response: ResponseEntity) -> StorageResult<ResponseEntity> {
        let record = self.store.insert(response.into()).await?;
        expect_row(Table::Responses, record.into_response())
    }

    /// Responses to a question.
    pub async fn list_responses(&self, question_id: Uuid) -> StorageResult<Vec<ResponseEntity>> {
        let rows = self
            .store
            .query_many(Table::Responses, Filter::ByQuestion(question_id))
            .await?;
        Ok(rows.into_iter().filter_map(Record::into_response).collect())
    }
}

fn expect_row<T>(table: Table, row: Option<T>) -> StorageResult<T> {
    row.ok_or_else(|| StorageError::rejected(table, "store returned a row from another table"))
}
