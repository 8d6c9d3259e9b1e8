use std::time::SystemTime;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::{
        models::ResponseEntity,
        repository::SessionRepository,
        storage::{QUESTION_CLOSED, StorageError},
    },
    error::ServiceError,
};

/// One line of the live results table.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TallyRow {
    /// Option label (`A`, `B`, ...).
    pub letter: String,
    /// Option text.
    pub text: String,
    /// Number of responses choosing this option.
    pub count: usize,
    /// Share of all responses, in percent. Zero when nobody answered.
    pub percentage: f64,
}

/// Label of the option at `index`: `A` for 0, `B` for 1, and so on.
pub fn option_letter(index: usize) -> String {
    u8::try_from(index)
        .ok()
        .and_then(|offset| b'A'.checked_add(offset))
        .map(|byte| char::from(byte).to_string())
        .unwrap_or_else(|| format!("#{}", index + 1))
}

/// Count responses per option.
pub fn tally(options: &[String], responses: &[ResponseEntity]) -> Vec<TallyRow> {
    let mut counts = vec![0usize; options.len()];
    let mut total = 0usize;
    for response in responses {
        if let Some(count) = counts.get_mut(response.selected_option) {
            *count += 1;
            total += 1;
        }
    }

    options
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(index, (text, count))| TallyRow {
            letter: option_letter(index),
            text: text.clone(),
            count,
            percentage: if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            },
        })
        .collect()
}

/// Outcome of offering a response to a [`ResponseSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Counted.
    Accepted,
    /// Already counted (same response id or a later answer from the same participant).
    Duplicate,
    /// Belongs to a question other than the one being tallied.
    OtherQuestion,
    /// Submitted after the question closed.
    Late,
}

/// Responses collected for the current question, one per participant.
#[derive(Debug, Default, Clone)]
pub struct ResponseSet {
    question_id: Option<Uuid>,
    ended_at: Option<SystemTime>,
    by_participant: IndexMap<Uuid, ResponseEntity>,
}

impl ResponseSet {
    /// Empty set bound to no question.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting for `question_id`, forgetting everything else.
    pub fn reset(&mut self, question_id: Uuid) {
        self.question_id = Some(question_id);
        self.ended_at = None;
        self.by_participant.clear();
    }

    /// Record when the question closed and drop responses submitted after it.
    /// Returns how many responses were pruned.
    pub fn close(&mut self, ended_at: SystemTime) -> usize {
        self.ended_at = Some(ended_at);
        let before = self.by_participant.len();
        self.by_participant
            .retain(|_, response| response.submitted_at <= ended_at);
        before - self.by_participant.len()
    }

    /// Offer a response delivered by the bus or read during a resync.
    pub fn accept(&mut self, response: ResponseEntity) -> Acceptance {
        if self.question_id != Some(response.question_id) {
            return Acceptance::OtherQuestion;
        }
        if let Some(ended_at) = self.ended_at {
            if response.submitted_at > ended_at {
                return Acceptance::Late;
            }
        }

        match self.by_participant.get_mut(&response.participant_id) {
            Some(existing) if existing.id == response.id => Acceptance::Duplicate,
            Some(existing) if response.submitted_at < existing.submitted_at => {
                *existing = response;
                Acceptance::Accepted
            }
            Some(_) => Acceptance::Duplicate,
            None => {
                self.by_participant
                    .insert(response.participant_id, response);
                Acceptance::Accepted
            }
        }
    }

    /// Number of counted responses.
    pub fn count(&self) -> usize {
        self.by_participant.len()
    }

    /// Re-tally from the full set.
    pub fn tally(&self, options: &[String]) -> Vec<TallyRow> {
        let responses: Vec<ResponseEntity> = self.by_participant.values().cloned().collect();
        tally(options, &responses)
    }
}

/// Persist one participant's answer to an open question.
pub async fn submit_response(
    repo: &SessionRepository,
    question_id: Uuid,
    participant_id: Uuid,
    selected_option: usize,
) -> Result<ResponseEntity, ServiceError> {
    let question = repo
        .find_question(question_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("question {question_id}")))?;

    if !question.is_active {
        return Err(ServiceError::InvalidState("question is closed".into()));
    }
    if selected_option >= question.options.len() {
        return Err(ServiceError::Validation(format!(
            "option {selected_option} does not exist (question has {} options)",
            question.options.len()
        )));
    }

    let response = ResponseEntity::new(question_id, participant_id, selected_option);
    let stored = repo.insert_response(response).await.map_err(|err| match err {
        StorageError::Conflict {
            constraint: QUESTION_CLOSED,
            ..
        } => {
            debug!(question_id = %question_id, participant_id = %participant_id, "question closed before the response landed");
            ServiceError::InvalidState("question is closed".into())
        }
        StorageError::Conflict { constraint, .. } => {
            debug!(question_id = %question_id, participant_id = %participant_id, constraint, "duplicate response");
            ServiceError::InvalidState("already answered".into())
        }
        other => ServiceError::from(other),
    })?;

    info!(
        question_id = %question_id,
        participant_id = %participant_id,
        option = %option_letter(selected_option),
        "response recorded"
    );
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn options(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|label| label.to_string()).collect()
    }

    fn response(question_id: Uuid, option: usize) -> ResponseEntity {
        ResponseEntity::new(question_id, Uuid::new_v4(), option)
    }

    #[test]
    fn empty_tally_is_all_zero() {
        let rows = tally(&options(&["Red", "Blue", "Green"]), &[]);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.count == 0 && row.percentage == 0.0));
        assert_eq!(
            rows.iter().map(|row| row.letter.as_str()).collect::<Vec<_>>(),
            ["A", "B", "C"]
        );
    }

    #[test]
    fn percentages_sum_to_one_hundred() {
        let q = Uuid::new_v4();
        let responses = vec![response(q, 0), response(q, 1), response(q, 1)];
        let rows = tally(&options(&["Red", "Blue", "Green"]), &responses);

        assert_eq!(rows[0].count, 1);
        assert_eq!(rows[1].count, 2);
        assert_eq!(rows[2].count, 0);
        let sum: f64 = rows.iter().map(|row| row.percentage).sum();
        assert!((sum - 100.0).abs() < 1e-9, "sum was {sum}");
        assert!((rows[1].percentage - 66.666).abs() < 0.01);
    }

    #[test]
    fn set_is_idempotent_and_scoped() {
        let q = Uuid::new_v4();
        let mut set = ResponseSet::new();
        set.reset(q);

        let first = response(q, 0);
        assert_eq!(set.accept(first.clone()), Acceptance::Accepted);
        assert_eq!(set.accept(first), Acceptance::Duplicate);
        assert_eq!(set.accept(response(Uuid::new_v4(), 0)), Acceptance::OtherQuestion);
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn earliest_answer_per_participant_wins() {
        let q = Uuid::new_v4();
        let participant = Uuid::new_v4();
        let mut set = ResponseSet::new();
        set.reset(q);

        let mut later = ResponseEntity::new(q, participant, 1);
        let mut earlier = ResponseEntity::new(q, participant, 0);
        earlier.submitted_at = later.submitted_at - Duration::from_secs(1);
        later.submitted_at += Duration::from_millis(1);

        assert_eq!(set.accept(later), Acceptance::Accepted);
        assert_eq!(set.accept(earlier), Acceptance::Accepted);
        let rows = set.tally(&options(&["A", "B"]));
        assert_eq!((rows[0].count, rows[1].count), (1, 0));
    }

    #[test]
    fn late_responses_are_excluded_and_pruned() {
        let q = Uuid::new_v4();
        let mut set = ResponseSet::new();
        set.reset(q);

        let on_time = response(q, 0);
        let ended_at = on_time.submitted_at + Duration::from_secs(1);
        let mut late = response(q, 1);
        late.submitted_at = ended_at + Duration::from_secs(1);

        assert_eq!(set.accept(on_time), Acceptance::Accepted);
        assert_eq!(set.accept(late.clone()), Acceptance::Accepted);
        assert_eq!(set.close(ended_at), 1);
        assert_eq!(set.count(), 1);

        let mut another_late = response(q, 1);
        another_late.submitted_at = ended_at + Duration::from_secs(2);
        assert_eq!(set.accept(another_late), Acceptance::Late);
    }
}
