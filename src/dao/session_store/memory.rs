use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    bus::{ChangeBus, ChangeKind},
    dao::{
        models::{
            Filter, ParticipantEntity, Patch, PollEntity, QuestionEntity, Record, ResponseEntity,
            Table, UpdateOutcome,
        },
        session_store::SessionStore,
        storage::{
            ACTIVE_POLL_CODE, ONE_ACTIVE_QUESTION, ONE_RESPONSE_PER_PARTICIPANT, PRIMARY_KEY,
            QUESTION_CLOSED, StorageError, StorageResult,
        },
    },
};

/// In-process session store.
///
/// Tables are insertion-ordered maps behind a single lock so that every
/// constraint check and the write it guards happen atomically. Successful
/// writes are published on the [`ChangeBus`] before the lock is released,
/// which keeps bus order identical to write order.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    tables: RwLock<Tables>,
    bus: ChangeBus,
    online: AtomicBool,
}

#[derive(Default)]
struct Tables {
    polls: IndexMap<Uuid, PollEntity>,
    questions: IndexMap<Uuid, QuestionEntity>,
    participants: IndexMap<Uuid, ParticipantEntity>,
    responses: IndexMap<Uuid, ResponseEntity>,
}

impl Tables {
    fn contains(&self, table: Table, id: &Uuid) -> bool {
        match table {
            Table::Polls => self.polls.contains_key(id),
            Table::Questions => self.questions.contains_key(id),
            Table::Participants => self.participants.contains_key(id),
            Table::Responses => self.responses.contains_key(id),
        }
    }

    fn select(&self, table: Table, filter: &Filter) -> Vec<Record> {
        match table {
            Table::Polls => select_rows(&self.polls, filter),
            Table::Questions => select_rows(&self.questions, filter),
            Table::Participants => select_rows(&self.participants, filter),
            Table::Responses => select_rows(&self.responses, filter),
        }
    }

    fn check_constraints(&self, record: &Record) -> StorageResult<()> {
        let table = record.table();
        if self.contains(table, &record.id()) {
            return Err(StorageError::Conflict {
                table,
                constraint: PRIMARY_KEY,
            });
        }

        match record {
            Record::Poll(poll) => {
                let taken = poll.is_active
                    && self
                        .polls
                        .values()
                        .any(|existing| existing.is_active && existing.code == poll.code);
                if taken {
                    return Err(StorageError::Conflict {
                        table,
                        constraint: ACTIVE_POLL_CODE,
                    });
                }
            }
            Record::Question(question) => {
                if !self.polls.contains_key(&question.poll_id) {
                    return Err(StorageError::rejected(
                        table,
                        format!("unknown poll {}", question.poll_id),
                    ));
                }
                let busy = question.is_active
                    && self
                        .questions
                        .values()
                        .any(|existing| existing.is_active && existing.poll_id == question.poll_id);
                if busy {
                    return Err(StorageError::Conflict {
                        table,
                        constraint: ONE_ACTIVE_QUESTION,
                    });
                }
            }
            Record::Participant(participant) => match self.polls.get(&participant.poll_id) {
                Some(poll) if poll.is_active => {}
                Some(_) => {
                    return Err(StorageError::rejected(
                        table,
                        format!("poll {} is closed", participant.poll_id),
                    ));
                }
                None => {
                    return Err(StorageError::rejected(
                        table,
                        format!("unknown poll {}", participant.poll_id),
                    ));
                }
            },
            Record::Response(response) => {
                let Some(question) = self.questions.get(&response.question_id) else {
                    return Err(StorageError::rejected(
                        table,
                        format!("unknown question {}", response.question_id),
                    ));
                };
                if !question.is_active {
                    return Err(StorageError::Conflict {
                        table,
                        constraint: QUESTION_CLOSED,
                    });
                }
                if !self.participants.contains_key(&response.participant_id) {
                    return Err(StorageError::rejected(
                        table,
                        format!("unknown participant {}", response.participant_id),
                    ));
                }
                if response.selected_option >= question.options.len() {
                    return Err(StorageError::rejected(
                        table,
                        format!(
                            "option {} out of range for {} options",
                            response.selected_option,
                            question.options.len()
                        ),
                    ));
                }
                let answered = self.responses.values().any(|existing| {
                    existing.question_id == response.question_id
                        && existing.participant_id == response.participant_id
                });
                if answered {
                    return Err(StorageError::Conflict {
                        table,
                        constraint: ONE_RESPONSE_PER_PARTICIPANT,
                    });
                }
            }
        }

        Ok(())
    }

    fn store(&mut self, record: Record) {
        match record {
            Record::Poll(poll) => {
                self.polls.insert(poll.id, poll);
            }
            Record::Question(question) => {
                self.questions.insert(question.id, question);
            }
            Record::Participant(participant) => {
                self.participants.insert(participant.id, participant);
            }
            Record::Response(response) => {
                self.responses.insert(response.id, response);
            }
        }
    }
}

fn select_rows<T>(rows: &IndexMap<Uuid, T>, filter: &Filter) -> Vec<Record>
where
    T: Clone + Into<Record>,
{
    rows.values()
        .cloned()
        .map(Into::into)
        .filter(|record| filter.matches(record))
        .collect()
}

impl MemorySessionStore {
    /// Create an empty, online store publishing its writes on `bus`.
    pub fn new(bus: ChangeBus) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(Tables::default()),
                bus,
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Toggle availability. While offline every operation fails with
    /// [`StorageError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous != online {
            if online {
                debug!("memory session store back online");
            } else {
                warn!("memory session store switched offline");
            }
        }
    }

    /// Whether the store currently accepts operations.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StorageError::offline("memory session store is offline"))
        }
    }

    async fn insert_record(&self, record: Record) -> StorageResult<Record> {
        self.ensure_online()?;
        let table = record.table();
        record
            .validate()
            .map_err(|reason| StorageError::rejected(table, reason))?;

        let mut tables = self.inner.tables.write().await;
        tables.check_constraints(&record)?;
        tables.store(record.clone());
        self.inner.bus.publish(ChangeKind::Insert, &record);
        drop(tables);

        debug!(table = ?table, id = %record.id(), "record inserted");
        Ok(record)
    }

    async fn select(&self, table: Table, filter: Filter) -> StorageResult<Vec<Record>> {
        self.ensure_online()?;
        let tables = self.inner.tables.read().await;
        Ok(tables.select(table, &filter))
    }

    async fn apply_patch(&self, table: Table, id: Uuid, patch: Patch) -> StorageResult<UpdateOutcome> {
        self.ensure_online()?;
        let mut tables = self.inner.tables.write().await;

        let outcome = match (table, &patch) {
            (Table::Questions, Patch::CloseQuestion { ended_at }) => {
                match tables.questions.get_mut(&id) {
                    None => UpdateOutcome::Missing,
                    Some(question) if !question.is_active => {
                        UpdateOutcome::Unchanged(Record::Question(question.clone()))
                    }
                    Some(question) => {
                        question.is_active = false;
                        question.ended_at = Some(*ended_at);
                        UpdateOutcome::Updated(Record::Question(question.clone()))
                    }
                }
            }
            (Table::Polls, Patch::ClosePoll) => match tables.polls.get_mut(&id) {
                None => UpdateOutcome::Missing,
                Some(poll) if !poll.is_active => UpdateOutcome::Unchanged(Record::Poll(poll.clone())),
                Some(poll) => {
                    poll.is_active = false;
                    UpdateOutcome::Updated(Record::Poll(poll.clone()))
                }
            },
            (table, patch) => {
                return Err(StorageError::rejected(
                    table,
                    format!("patch {patch:?} is not supported"),
                ));
            }
        };

        if let UpdateOutcome::Updated(record) = &outcome {
            self.inner.bus.publish(ChangeKind::Update, record);
            debug!(table = ?table, id = %id, "record updated");
        }
        Ok(outcome)
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, record: Record) -> BoxFuture<'static, StorageResult<Record>> {
        let store = self.clone();
        Box::pin(async move { store.insert_record(record).await })
    }

    fn query_one(
        &self,
        table: Table,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Option<Record>>> {
        let store = self.clone();
        Box::pin(async move {
            let rows = store.select(table, filter).await?;
            Ok(rows.into_iter().next())
        })
    }

    fn query_many(
        &self,
        table: Table,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Vec<Record>>> {
        let store = self.clone();
        Box::pin(async move { store.select(table, filter).await })
    }

    fn update(
        &self,
        table: Table,
        id: Uuid,
        patch: Patch,
    ) -> BoxFuture<'static, StorageResult<UpdateOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.apply_patch(table, id, patch).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use tokio::sync::mpsc;

    use super::*;
    use crate::bus::ChangeFilter;

    fn store() -> MemorySessionStore {
        MemorySessionStore::new(ChangeBus::new())
    }

    async fn seeded_poll(store: &MemorySessionStore) -> PollEntity {
        let poll = PollEntity::new("XYZ123".into(), "Live Poll Session".into());
        store.insert(poll.clone().into()).await.unwrap();
        poll
    }

    fn question(poll_id: Uuid) -> QuestionEntity {
        QuestionEntity::open(poll_id, "Color?".into(), vec!["Red".into(), "Blue".into()], 30)
    }

    #[tokio::test]
    async fn active_code_must_be_unique() {
        let store = store();
        seeded_poll(&store).await;

        let clash = PollEntity::new("XYZ123".into(), "Another".into());
        let err = store.insert(clash.into()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict {
                constraint: ACTIVE_POLL_CODE,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn code_is_reusable_once_poll_closed() {
        let store = store();
        let poll = seeded_poll(&store).await;
        store
            .update(Table::Polls, poll.id, Patch::ClosePoll)
            .await
            .unwrap();

        let reuse = PollEntity::new("XYZ123".into(), "Again".into());
        assert!(store.insert(reuse.into()).await.is_ok());
    }

    #[tokio::test]
    async fn second_active_question_conflicts() {
        let store = store();
        let poll = seeded_poll(&store).await;
        store.insert(question(poll.id).into()).await.unwrap();

        let err = store.insert(question(poll.id).into()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict {
                constraint: ONE_ACTIVE_QUESTION,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_response_keeps_first_write() {
        let store = store();
        let poll = seeded_poll(&store).await;
        let q = question(poll.id);
        store.insert(q.clone().into()).await.unwrap();
        let ann = ParticipantEntity::new(poll.id, "Ann".into());
        store.insert(ann.clone().into()).await.unwrap();

        store
            .insert(ResponseEntity::new(q.id, ann.id, 1).into())
            .await
            .unwrap();
        let err = store
            .insert(ResponseEntity::new(q.id, ann.id, 0).into())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let rows = store
            .query_many(Table::Responses, Filter::ByQuestion(q.id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].clone().into_response().unwrap().selected_option, 1);
    }

    #[tokio::test]
    async fn responses_to_a_closed_question_conflict() {
        let store = store();
        let poll = seeded_poll(&store).await;
        let q = question(poll.id);
        store.insert(q.clone().into()).await.unwrap();
        let ann = ParticipantEntity::new(poll.id, "Ann".into());
        store.insert(ann.clone().into()).await.unwrap();
        store
            .update(
                Table::Questions,
                q.id,
                Patch::CloseQuestion {
                    ended_at: SystemTime::now(),
                },
            )
            .await
            .unwrap();

        let err = store
            .insert(ResponseEntity::new(q.id, ann.id, 0).into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict {
                constraint: QUESTION_CLOSED,
                ..
            }
        ));
        let rows = store
            .query_many(Table::Responses, Filter::ByQuestion(q.id))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn invalid_records_are_rejected() {
        let store = store();
        let poll = seeded_poll(&store).await;
        let mut bad = question(poll.id);
        bad.options = vec!["only".into()];

        let err = store.insert(bad.into()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Rejected {
                table: Table::Questions,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn closing_twice_is_unchanged_and_publishes_once() {
        let bus = ChangeBus::new();
        let store = MemorySessionStore::new(bus.clone());
        let poll = seeded_poll(&store).await;
        let q = question(poll.id);
        store.insert(q.clone().into()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(ChangeFilter::scoped(Table::Questions, poll.id), tx);

        let ended_at = SystemTime::now();
        let first = store
            .update(Table::Questions, q.id, Patch::CloseQuestion { ended_at })
            .await
            .unwrap();
        let second = store
            .update(
                Table::Questions,
                q.id,
                Patch::CloseQuestion {
                    ended_at: SystemTime::now(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(first, UpdateOutcome::Updated(_)));
        let UpdateOutcome::Unchanged(Record::Question(stored)) = second else {
            panic!("expected unchanged outcome, got {second:?}");
        };
        assert_eq!(stored.ended_at, Some(ended_at));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = store();
        store.set_online(false);
        assert!(matches!(
            store.health_check().await,
            Err(StorageError::Unavailable { .. })
        ));
        let poll = PollEntity::new("ABC123".into(), "T".into());
        assert!(store.insert(poll.into()).await.is_err());

        store.set_online(true);
        assert!(store.health_check().await.is_ok());
    }
}
