//! Request payloads and view projections exchanged with presentation clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{ParticipantEntity, PollEntity, QuestionEntity},
    dto::{format_system_time, validation::validate_poll_code},
    services::aggregator::{TallyRow, option_letter},
};

/// Teacher intent: open a new timed question.
///
/// Options are trimmed and blank entries dropped before the 2..=4 bound is
/// checked again by the engine.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct StartQuestionRequest {
    /// Question text.
    #[validate(length(min = 1, message = "question text must not be empty"))]
    pub text: String,
    /// Answer options in display order, blanks included.
    #[validate(length(min = 2, message = "at least two options are required"))]
    pub options: Vec<String>,
    /// Answering window in seconds.
    #[validate(range(min = 10, max = 300))]
    pub time_limit_seconds: u32,
}

/// Student intent: join the poll identified by `code`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct JoinPollRequest {
    /// Join code, case-insensitive.
    #[validate(custom(function = "validate_poll_code"))]
    pub code: String,
    /// Display name shown to the teacher.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}

/// Student intent: highlight an answer option before submitting.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct SelectOptionRequest {
    /// Zero-based option index (0 for `A`).
    #[validate(range(max = 3))]
    pub option_index: usize,
}

/// Kind of client an instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    /// Runs the poll.
    Teacher,
    /// Answers questions.
    Student,
}

/// Returned when a new instance has been opened.
#[derive(Debug, Serialize, ToSchema)]
pub struct OpenInstanceResponse {
    /// Id to use in every later call for this screen.
    pub instance_id: Uuid,
    /// Role the instance was opened with.
    pub role: InstanceRole,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
/// Public projection of a poll.
pub struct PollSummary {
    /// Poll id.
    pub id: Uuid,
    /// Join code students type.
    pub code: String,
    /// Display title.
    pub title: String,
    /// Whether the code still resolves.
    pub is_active: bool,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl From<&PollEntity> for PollSummary {
    fn from(poll: &PollEntity) -> Self {
        Self {
            id: poll.id,
            code: poll.code.clone(),
            title: poll.title.clone(),
            is_active: poll.is_active,
            created_at: format_system_time(poll.created_at),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
/// Labelled answer option.
pub struct OptionSummary {
    /// `A`, `B`, ...
    pub letter: String,
    /// Option text.
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
/// Public projection of a question.
pub struct QuestionSummary {
    /// Question id.
    pub id: Uuid,
    /// Question text.
    pub text: String,
    /// Options in display order.
    pub options: Vec<OptionSummary>,
    /// Answering window in seconds.
    pub time_limit_seconds: u32,
    /// Whether answers are still accepted.
    pub is_active: bool,
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 close time, once closed.
    pub ended_at: Option<String>,
}

impl From<&QuestionEntity> for QuestionSummary {
    fn from(question: &QuestionEntity) -> Self {
        Self {
            id: question.id,
            text: question.text.clone(),
            options: question
                .options
                .iter()
                .enumerate()
                .map(|(index, text)| OptionSummary {
                    letter: option_letter(index),
                    text: text.clone(),
                })
                .collect(),
            time_limit_seconds: question.time_limit_seconds,
            is_active: question.is_active,
            started_at: format_system_time(question.started_at),
            ended_at: question.ended_at.map(format_system_time),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
/// Participant as listed on the teacher screen.
pub struct ParticipantSummary {
    /// Participant id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// RFC 3339 join time.
    pub joined_at: String,
}

impl From<&ParticipantEntity> for ParticipantSummary {
    fn from(participant: &ParticipantEntity) -> Self {
        Self {
            id: participant.id,
            name: participant.name.clone(),
            joined_at: format_system_time(participant.joined_at),
        }
    }
}

/// Everything the teacher screen renders.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct TeacherView {
    /// Poll created by this teacher.
    pub poll: Option<PollSummary>,
    /// Current question, kept after it closes so results stay visible.
    pub question: Option<QuestionSummary>,
    /// Seconds left on the running countdown, `None` when no countdown runs.
    pub remaining_seconds: Option<u32>,
    /// Number of students who joined.
    pub participant_count: usize,
    /// Students in join order.
    pub participants: Vec<ParticipantSummary>,
    /// Responses counted for the current question.
    pub response_count: usize,
    /// One row per option of the current question.
    pub tally: Vec<TallyRow>,
}

/// Everything the student screen renders.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct StudentView {
    /// Joined poll.
    pub poll: Option<PollSummary>,
    /// Participant row created on join.
    pub participant_id: Option<Uuid>,
    /// Name given on join.
    pub participant_name: Option<String>,
    /// Open question, cleared when it closes.
    pub question: Option<QuestionSummary>,
    /// Seconds left to answer.
    pub remaining_seconds: Option<u32>,
    /// Highlighted option index.
    pub selected_option: Option<usize>,
    /// Set after a successful submission or when the local countdown ran out.
    pub has_answered: bool,
}

/// Latest view published by an instance.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(tag = "role", content = "view", rename_all = "snake_case")]
pub enum InstanceView {
    /// View of a teacher instance.
    Teacher(TeacherView),
    /// View of a student instance.
    Student(StudentView),
}

impl InstanceView {
    /// Role of the instance that produced the view.
    pub fn role(&self) -> InstanceRole {
        match self {
            InstanceView::Teacher(_) => InstanceRole::Teacher,
            InstanceView::Student(_) => InstanceRole::Student,
        }
    }
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;

    #[test]
    fn start_question_request_bounds() {
        let ok = StartQuestionRequest {
            text: "Q?".into(),
            options: vec!["A".into(), "B".into(), "".into(), "".into()],
            time_limit_seconds: 60,
        };
        assert!(ok.validate().is_ok());

        let too_fast = StartQuestionRequest {
            time_limit_seconds: 5,
            ..ok.clone()
        };
        assert!(too_fast.validate().is_err());

        let single = StartQuestionRequest {
            options: vec!["A".into()],
            ..ok
        };
        assert!(single.validate().is_err());
    }

    #[test]
    fn join_request_accepts_lowercase_codes() {
        let request = JoinPollRequest {
            code: " xyz123 ".into(),
            name: "Ann".into(),
        };
        assert!(request.validate().is_ok());

        let bad = JoinPollRequest {
            code: "??".into(),
            name: "Ann".into(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn question_summary_labels_options() {
        let question = QuestionEntity::open(
            Uuid::new_v4(),
            "Color?".into(),
            vec!["Red".into(), "Blue".into()],
            30,
        );
        let summary = QuestionSummary::from(&question);
        assert_eq!(summary.options[1].letter, "B");
        assert_eq!(summary.ended_at, None);
    }
}
