use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Live Poll Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::instances::open_teacher,
        crate::routes::instances::open_student,
        crate::routes::instances::get_instance,
        crate::routes::instances::close_instance,
        crate::routes::teacher::create_poll,
        crate::routes::teacher::start_question,
        crate::routes::teacher::end_question,
        crate::routes::teacher::get_view,
        crate::routes::student::join_poll,
        crate::routes::student::select_option,
        crate::routes::student::submit_answer,
        crate::routes::student::get_view,
        crate::routes::sse::instance_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::StartQuestionRequest,
            crate::dto::session::JoinPollRequest,
            crate::dto::session::SelectOptionRequest,
            crate::dto::session::InstanceRole,
            crate::dto::session::OpenInstanceResponse,
            crate::dto::session::PollSummary,
            crate::dto::session::OptionSummary,
            crate::dto::session::QuestionSummary,
            crate::dto::session::ParticipantSummary,
            crate::dto::session::TeacherView,
            crate::dto::session::StudentView,
            crate::dto::session::InstanceView,
            crate::dto::sse::Handshake,
            crate::services::aggregator::TallyRow,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "instances", description = "Open and close teacher or student screens"),
        (name = "teacher", description = "Poll and question lifecycle"),
        (name = "student", description = "Joining a poll and answering"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
