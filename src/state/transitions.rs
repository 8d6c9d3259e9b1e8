use std::{future::Future, time::Duration};

use tokio::time::timeout;
use tracing::warn;

use crate::{
    error::ServiceError,
    state::state_machine::{Plan, SessionEvent, SessionPhase, SessionStateMachine},
};

/// Plan `event`, run the store write produced by `work`, then apply the plan
/// if the write succeeded or abort it otherwise.
///
/// A write that outlives `limit` is abandoned and reported as
/// [`ServiceError::Timeout`]; the phase stays where it was.
pub async fn run_transition<F, Fut, T>(
    machine: &mut SessionStateMachine,
    event: SessionEvent,
    limit: Option<Duration>,
    work: F,
) -> Result<(T, SessionPhase), ServiceError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let Plan { id: plan_id, .. } = machine.plan(event)?;

    let work_future = work();
    let outcome = match limit {
        Some(limit) => match timeout(limit, work_future).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        },
        None => work_future.await,
    };

    match outcome {
        Ok(value) => {
            let next = machine.apply(plan_id)?;
            Ok((value, next))
        }
        Err(err) => {
            if let Err(abort_err) = machine.abort(plan_id) {
                warn!(
                    event = ?event,
                    plan_id = %plan_id,
                    error = ?abort_err,
                    "failed to abort transition after work error"
                );
            }
            Err(err)
        }
    }
}

/// Run a store operation outside of any phase change, bounded by `limit`.
pub async fn with_timeout<Fut, T>(limit: Option<Duration>, work: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match limit {
        Some(limit) => timeout(limit, work)
            .await
            .map_err(|_| ServiceError::Timeout)?,
        None => work.await,
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn failed_work_leaves_phase_untouched() {
        let mut machine = SessionStateMachine::new();
        let poll_id = Uuid::new_v4();
        let result: Result<((), SessionPhase), _> = run_transition(
            &mut machine,
            SessionEvent::PollOpened { poll_id },
            None,
            || async { Err(ServiceError::Validation("nope".into())) },
        )
        .await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert_eq!(machine.phase(), SessionPhase::NoPoll);
        assert_eq!(machine.snapshot().pending, None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_work_times_out_and_aborts() {
        let mut machine = SessionStateMachine::new();
        let result = run_transition(
            &mut machine,
            SessionEvent::PollOpened {
                poll_id: Uuid::new_v4(),
            },
            Some(Duration::from_millis(50)),
            || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(ServiceError::Timeout)));
        assert_eq!(machine.phase(), SessionPhase::NoPoll);
    }

    #[tokio::test]
    async fn successful_work_applies_plan() {
        let mut machine = SessionStateMachine::new();
        let poll_id = Uuid::new_v4();
        let (value, next) = run_transition(
            &mut machine,
            SessionEvent::PollOpened { poll_id },
            None,
            || async { Ok(7) },
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(next, SessionPhase::PollOpen { poll_id });
    }
}
