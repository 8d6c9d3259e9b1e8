use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Minimum number of answer options a question carries.
pub const MIN_OPTIONS: usize = 2;
/// Maximum number of answer options a question carries (labels A to D).
pub const MAX_OPTIONS: usize = 4;
/// Shortest allowed answering window.
pub const MIN_TIME_LIMIT_SECONDS: u32 = 10;
/// Longest allowed answering window.
pub const MAX_TIME_LIMIT_SECONDS: u32 = 300;

/// Tables exposed by the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// [`PollEntity`] rows.
    Polls,
    /// [`QuestionEntity`] rows.
    Questions,
    /// [`ParticipantEntity`] rows.
    Participants,
    /// [`ResponseEntity`] rows.
    Responses,
}

/// A live poll session, identified by its join code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollEntity {
    /// Stable identifier for the poll.
    pub id: Uuid,
    /// Uppercase alphanumeric code typed by participants to join.
    pub code: String,
    /// Display title of the session.
    pub title: String,
    /// Whether the poll still accepts participants.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// A timed multiple-choice prompt belonging to a poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Stable identifier for the question.
    pub id: Uuid,
    /// Owning poll.
    pub poll_id: Uuid,
    /// Prompt shown to participants.
    pub text: String,
    /// Answer options; the position defines the label (A, B, C, D).
    pub options: Vec<String>,
    /// Answering window in seconds.
    pub time_limit_seconds: u32,
    /// Whether responses are currently accepted.
    pub is_active: bool,
    /// When the question was opened.
    pub started_at: SystemTime,
    /// When the question was closed, if it was.
    pub ended_at: Option<SystemTime>,
}

/// A participant who joined a poll by code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Stable identifier for the participant.
    pub id: Uuid,
    /// Poll the participant joined.
    pub poll_id: Uuid,
    /// Trimmed display name; not unique.
    pub name: String,
    /// Join timestamp.
    pub joined_at: SystemTime,
}

/// One participant's answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEntity {
    /// Stable identifier for the response.
    pub id: Uuid,
    /// Question being answered.
    pub question_id: Uuid,
    /// Participant who answered.
    pub participant_id: Uuid,
    /// Zero-based index into the question's options.
    pub selected_option: usize,
    /// Submission timestamp.
    pub submitted_at: SystemTime,
}

impl PollEntity {
    /// Build a fresh, active poll.
    pub fn new(code: String, title: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            title,
            is_active: true,
            created_at: SystemTime::now(),
        }
    }
}

impl QuestionEntity {
    /// Build a fresh question opened right now.
    pub fn open(poll_id: Uuid, text: String, options: Vec<String>, time_limit_seconds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            poll_id,
            text,
            options,
            time_limit_seconds,
            is_active: true,
            started_at: SystemTime::now(),
            ended_at: None,
        }
    }
}

impl ParticipantEntity {
    /// Build a participant joining right now.
    pub fn new(poll_id: Uuid, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            poll_id,
            name,
            joined_at: SystemTime::now(),
        }
    }
}

impl ResponseEntity {
    /// Build a response submitted right now.
    pub fn new(question_id: Uuid, participant_id: Uuid, selected_option: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_id,
            participant_id,
            selected_option,
            submitted_at: SystemTime::now(),
        }
    }
}

/// Closed set of rows the session store accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum Record {
    /// Row of [`Table::Polls`].
    Poll(PollEntity),
    /// Row of [`Table::Questions`].
    Question(QuestionEntity),
    /// Row of [`Table::Participants`].
    Participant(ParticipantEntity),
    /// Row of [`Table::Responses`].
    Response(ResponseEntity),
}

impl Record {
    /// Table the record lives in.
    pub fn table(&self) -> Table {
        match self {
            Record::Poll(_) => Table::Polls,
            Record::Question(_) => Table::Questions,
            Record::Participant(_) => Table::Participants,
            Record::Response(_) => Table::Responses,
        }
    }

    /// Primary key of the record.
    pub fn id(&self) -> Uuid {
        match self {
            Record::Poll(poll) => poll.id,
            Record::Question(question) => question.id,
            Record::Participant(participant) => participant.id,
            Record::Response(response) => response.id,
        }
    }

    /// Foreign key used to scope change notifications: the poll for questions
    /// and participants, the question for responses.
    pub fn parent_id(&self) -> Option<Uuid> {
        match self {
            Record::Poll(_) => None,
            Record::Question(question) => Some(question.poll_id),
            Record::Participant(participant) => Some(participant.poll_id),
            Record::Response(response) => Some(response.question_id),
        }
    }

    /// Check the field-level invariants of the record.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Record::Poll(poll) => {
                if poll.code.is_empty()
                    || !poll
                        .code
                        .chars()
                        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
                {
                    return Err(format!("invalid poll code `{}`", poll.code));
                }
                if poll.title.trim().is_empty() {
                    return Err("poll title must not be empty".into());
                }
                Ok(())
            }
            Record::Question(question) => {
                if question.text.trim().is_empty() {
                    return Err("question text must not be empty".into());
                }
                if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&question.options.len()) {
                    return Err(format!(
                        "a question needs between {MIN_OPTIONS} and {MAX_OPTIONS} options (got {})",
                        question.options.len()
                    ));
                }
                if question.options.iter().any(|option| option.trim().is_empty()) {
                    return Err("question options must not be blank".into());
                }
                if !(MIN_TIME_LIMIT_SECONDS..=MAX_TIME_LIMIT_SECONDS)
                    .contains(&question.time_limit_seconds)
                {
                    return Err(format!(
                        "time limit must be within {MIN_TIME_LIMIT_SECONDS}..={MAX_TIME_LIMIT_SECONDS} seconds"
                    ));
                }
                if question.is_active == question.ended_at.is_some() {
                    return Err("ended_at must be set exactly when the question is closed".into());
                }
                Ok(())
            }
            Record::Participant(participant) => {
                if participant.name.trim().is_empty() {
                    return Err("participant name must not be empty".into());
                }
                Ok(())
            }
            Record::Response(_) => Ok(()),
        }
    }

    /// Extract the poll payload, if this is a poll row.
    pub fn into_poll(self) -> Option<PollEntity> {
        match self {
            Record::Poll(poll) => Some(poll),
            _ => None,
        }
    }

    /// Extract the question payload, if this is a question row.
    pub fn into_question(self) -> Option<QuestionEntity> {
        match self {
            Record::Question(question) => Some(question),
            _ => None,
        }
    }

    /// Extract the participant payload, if this is a participant row.
    pub fn into_participant(self) -> Option<ParticipantEntity> {
        match self {
            Record::Participant(participant) => Some(participant),
            _ => None,
        }
    }

    /// Extract the response payload, if this is a response row.
    pub fn into_response(self) -> Option<ResponseEntity> {
        match self {
            Record::Response(response) => Some(response),
            _ => None,
        }
    }
}

impl From<PollEntity> for Record {
    fn from(value: PollEntity) -> Self {
        Record::Poll(value)
    }
}

impl From<QuestionEntity> for Record {
    fn from(value: QuestionEntity) -> Self {
        Record::Question(value)
    }
}

impl From<ParticipantEntity> for Record {
    fn from(value: ParticipantEntity) -> Self {
        Record::Participant(value)
    }
}

impl From<ResponseEntity> for Record {
    fn from(value: ResponseEntity) -> Self {
        Record::Response(value)
    }
}

/// Row filters supported by the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Match on primary key.
    Id(Uuid),
    /// Active poll whose code equals the given (already normalized) code.
    ActivePollByCode(String),
    /// Active question of the given poll.
    ActiveQuestion {
        /// Owning poll.
        poll_id: Uuid,
    },
    /// Rows owned by the given poll.
    ByPoll(Uuid),
    /// Rows owned by the given question.
    ByQuestion(Uuid),
}

impl Filter {
    /// Whether `record` satisfies the filter.
    pub fn matches(&self, record: &Record) -> bool {
        match (self, record) {
            (Filter::Id(id), record) => record.id() == *id,
            (Filter::ActivePollByCode(code), Record::Poll(poll)) => {
                poll.is_active && poll.code.eq_ignore_ascii_case(code)
            }
            (Filter::ActiveQuestion { poll_id }, Record::Question(question)) => {
                question.is_active && question.poll_id == *poll_id
            }
            (Filter::ByPoll(poll_id), Record::Question(question)) => question.poll_id == *poll_id,
            (Filter::ByPoll(poll_id), Record::Participant(participant)) => {
                participant.poll_id == *poll_id
            }
            (Filter::ByQuestion(question_id), Record::Response(response)) => {
                response.question_id == *question_id
            }
            _ => false,
        }
    }
}

/// Partial updates supported by the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Close an active question.
    CloseQuestion {
        /// Close time recorded on the row.
        ended_at: SystemTime,
    },
    /// Mark a poll as no longer active.
    ClosePoll,
}

/// Result of a compare-and-skip update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome<T = Record> {
    /// The row changed; carries the new value.
    Updated(T),
    /// The row already satisfied the patch; carries the stored value.
    Unchanged(T),
    /// No row with that id exists.
    Missing,
}
