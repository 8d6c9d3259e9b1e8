//! One actor task per connected screen.
//!
//! An instance owns its engine and processes commands, bus events and
//! countdown ticks one at a time, in arrival order. After each step it
//! republishes its view on a `watch` channel and on its own SSE hub.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    bus::{ChangeBus, ChangeEvent},
    config::AppConfig,
    dao::repository::SessionRepository,
    dto::{
        session::{InstanceRole, InstanceView, StudentView, TeacherView},
        sse::ServerEvent,
    },
    error::ServiceError,
    services::{
        join::JoinResolver,
        lifecycle::{LifecycleEngine, QuestionDraft},
        session_code::CodeGenerator,
        sse_events::broadcast_view,
    },
    state::{SseHub, countdown::CountdownEvent},
};

const COMMAND_CAPACITY: usize = 32;

/// Shared collaborators handed to every engine.
#[derive(Clone)]
pub struct EngineDeps {
    /// Typed access to the session store.
    pub repo: SessionRepository,
    /// Bus the store publishes on.
    pub bus: ChangeBus,
    /// Runtime configuration.
    pub config: Arc<AppConfig>,
    /// Join code source.
    pub codes: Arc<dyn CodeGenerator>,
}

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

enum Command {
    CreatePoll { reply: Reply<TeacherView> },
    StartQuestion { draft: QuestionDraft, reply: Reply<TeacherView> },
    EndQuestionEarly { reply: Reply<TeacherView> },
    JoinPoll { code: String, name: String, reply: Reply<StudentView> },
    SelectOption { index: usize, reply: Reply<StudentView> },
    SubmitAnswer { reply: Reply<StudentView> },
    Shutdown,
}

enum Engine {
    Teacher(LifecycleEngine),
    Student(JoinResolver),
}

impl Engine {
    fn view(&self) -> InstanceView {
        match self {
            Engine::Teacher(engine) => InstanceView::Teacher(engine.view()),
            Engine::Student(engine) => InstanceView::Student(engine.view()),
        }
    }

    async fn handle_change(&mut self, event: ChangeEvent) {
        match self {
            Engine::Teacher(engine) => engine.handle_change(event).await,
            Engine::Student(engine) => engine.handle_change(event).await,
        }
    }

    async fn handle_countdown(&mut self, event: CountdownEvent) {
        match self {
            Engine::Teacher(engine) => engine.handle_countdown(event).await,
            Engine::Student(engine) => engine.handle_countdown(event).await,
        }
    }

    async fn shutdown(&mut self) {
        match self {
            Engine::Teacher(engine) => engine.shutdown().await,
            Engine::Student(engine) => engine.shutdown(),
        }
    }
}

struct InstanceActor {
    id: Uuid,
    engine: Engine,
    commands: mpsc::Receiver<Command>,
    changes: mpsc::UnboundedReceiver<ChangeEvent>,
    ticks: mpsc::UnboundedReceiver<CountdownEvent>,
    view: watch::Sender<InstanceView>,
    hub: Arc<SseHub>,
}

impl InstanceActor {
    async fn run(mut self) {
        info!(instance_id = %self.id, "instance started");

        loop {
            // Pending store changes drain before the next command.
            tokio::select! {
                biased;
                Some(change) = self.changes.recv() => self.engine.handle_change(change).await,
                Some(tick) = self.ticks.recv() => self.engine.handle_countdown(tick).await,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
            self.publish_view();
        }

        self.engine.shutdown().await;
        info!(instance_id = %self.id, "instance stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match (&mut self.engine, command) {
            (Engine::Teacher(engine), Command::CreatePoll { reply }) => {
                let result = engine.create_poll().await.map(|_| engine.view());
                let _ = reply.send(result);
            }
            (Engine::Teacher(engine), Command::StartQuestion { draft, reply }) => {
                let result = engine.start_question(draft).await.map(|_| engine.view());
                let _ = reply.send(result);
            }
            (Engine::Teacher(engine), Command::EndQuestionEarly { reply }) => {
                let result = engine.end_question_early().await.map(|_| engine.view());
                let _ = reply.send(result);
            }
            (Engine::Student(engine), Command::JoinPoll { code, name, reply }) => {
                let result = engine.join_poll(&code, &name).await.map(|_| engine.view());
                let _ = reply.send(result);
            }
            (Engine::Student(engine), Command::SelectOption { index, reply }) => {
                let result = engine.select_option(index).map(|_| engine.view());
                let _ = reply.send(result);
            }
            (Engine::Student(engine), Command::SubmitAnswer { reply }) => {
                let result = engine.submit_answer().await.map(|_| engine.view());
                let _ = reply.send(result);
            }
            (_, Command::Shutdown) => {}
            (Engine::Teacher(_), command) => reject(command, "a student"),
            (Engine::Student(_), command) => reject(command, "a teacher"),
        }
    }

    fn publish_view(&self) {
        let next = self.engine.view();
        let changed = self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            broadcast_view(&self.hub, &next);
        }
    }
}

fn reject(command: Command, expected: &str) {
    let message = format!("this intent requires {expected} instance");
    match command {
        Command::CreatePoll { reply }
        | Command::StartQuestion { reply, .. }
        | Command::EndQuestionEarly { reply } => {
            let _ = reply.send(Err(ServiceError::InvalidState(message)));
        }
        Command::JoinPoll { reply, .. }
        | Command::SelectOption { reply, .. }
        | Command::SubmitAnswer { reply } => {
            let _ = reply.send(Err(ServiceError::InvalidState(message)));
        }
        Command::Shutdown => {}
    }
}

/// Cheap, cloneable handle to a running instance.
#[derive(Clone)]
pub struct InstanceHandle {
    id: Uuid,
    role: InstanceRole,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<InstanceView>,
    hub: Arc<SseHub>,
}

impl InstanceHandle {
    /// Spawn a new instance actor of the given role.
    pub fn spawn(role: InstanceRole, deps: EngineDeps) -> Self {
        let id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(SseHub::new(deps.config.instance_event_capacity));

        let engine = match role {
            InstanceRole::Teacher => Engine::Teacher(LifecycleEngine::new(deps, change_tx, tick_tx)),
            InstanceRole::Student => Engine::Student(JoinResolver::new(deps, change_tx, tick_tx)),
        };
        let (view_tx, view_rx) = watch::channel(engine.view());

        let actor = InstanceActor {
            id,
            engine,
            commands: command_rx,
            changes: change_rx,
            ticks: tick_rx,
            view: view_tx,
            hub: hub.clone(),
        };
        tokio::spawn(actor.run());
        debug!(instance_id = %id, role = ?role, "instance spawned");

        Self {
            id,
            role,
            commands: command_tx,
            view: view_rx,
            hub,
        }
    }

    /// Instance id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Role the instance was opened with.
    pub fn role(&self) -> InstanceRole {
        self.role
    }

    /// Latest published view.
    pub fn view(&self) -> InstanceView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn watch(&self) -> watch::Receiver<InstanceView> {
        self.view.clone()
    }

    /// SSE hub of the instance.
    pub fn hub(&self) -> &SseHub {
        &self.hub
    }

    /// Subscribe to the serialized view updates of the instance.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.hub.subscribe()
    }

    /// Teacher: create the poll.
    pub async fn create_poll(&self) -> Result<TeacherView, ServiceError> {
        self.request(|reply| Command::CreatePoll { reply }).await
    }

    /// Teacher: start a question, closing the running one.
    pub async fn start_question(&self, draft: QuestionDraft) -> Result<TeacherView, ServiceError> {
        self.request(|reply| Command::StartQuestion { draft, reply })
            .await
    }

    /// Teacher: close the current question now.
    pub async fn end_question_early(&self) -> Result<TeacherView, ServiceError> {
        self.request(|reply| Command::EndQuestionEarly { reply })
            .await
    }

    /// Student: join the poll with `code` as `name`.
    pub async fn join_poll(
        &self,
        code: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<StudentView, ServiceError> {
        let (code, name) = (code.into(), name.into());
        self.request(|reply| Command::JoinPoll { code, name, reply })
            .await
    }

    /// Student: highlight an option.
    pub async fn select_option(&self, index: usize) -> Result<StudentView, ServiceError> {
        self.request(|reply| Command::SelectOption { index, reply })
            .await
    }

    /// Student: submit the highlighted option.
    pub async fn submit_answer(&self) -> Result<StudentView, ServiceError> {
        self.request(|reply| Command::SubmitAnswer { reply }).await
    }

    /// Ask the actor to stop. Pending commands queued before this one still run.
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!(instance_id = %self.id, "instance already stopped");
        }
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ServiceError::InstanceClosed)?;
        response.await.map_err(|_| ServiceError::InstanceClosed)?
    }
}
