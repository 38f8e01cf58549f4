//! Session driver - invokes the worker's lifecycle in host order.
//!
//! Flow:
//! 1. `workerready`
//! 2. `collectionstart`, host collection, `collectionfinish`
//! 3. Run loop (skipped when collection had errors)
//! 4. Record exit status, host finalization, `workerfinished`

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::WorkerError;
use crate::host::{ExitCode, TestHost, WorkerHooks};
use crate::worker::Worker;

/// Run a whole worker session against `host`.
///
/// Errors from the run loop are forwarded as `internal_error` and turn into
/// [`ExitCode::InternalError`]; the session still finishes normally. So do
/// failures reading commands, and a malformed command is skipped. Only
/// failures sending events abort, since nothing more can be reported.
pub async fn run_session<R, W, H>(
    worker: &mut Worker<R, W>,
    host: &mut H,
) -> Result<ExitCode, WorkerError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    H: TestHost + ?Sized,
{
    worker.session_start().await?;

    worker.collection_start().await?;
    let collection = host.collect(&mut *worker).await?;
    let collected = collection.ids.len();
    worker
        .collection_finish(&collection.rootdir, collection.ids)
        .await?;

    let exit_status = if worker.collection_errors() > 0 {
        tracing::warn!(
            errors = worker.collection_errors(),
            "Interrupted: errors during collection"
        );
        ExitCode::Interrupted
    } else {
        match worker.run_test_loop(host).await {
            Ok(()) if worker.internal_errors() > 0 => ExitCode::InternalError,
            Ok(()) if worker.tests_failed() > 0 => ExitCode::TestsFailed,
            Ok(()) if collected == 0 => ExitCode::NoTestsCollected,
            Ok(()) => ExitCode::Ok,
            Err(WorkerError::Channel(e)) => return Err(e.into()),
            Err(e) => {
                let formatted = format!("{:#}", anyhow::Error::from(e));
                worker.internal_error(&formatted).await?;
                ExitCode::InternalError
            }
        }
    };

    let pending = worker.session_finish(exit_status);
    host.finalize(&mut *worker).await?;
    worker.session_finished(pending).await?;
    Ok(exit_status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Event};
    use crate::report::Outcome;
    use crate::testing::{ScriptedHost, pair, protocol_completions};
    use serde_json::json;

    fn names(events: &[Event]) -> Vec<&'static str> {
        events.iter().map(|e| e.name()).collect()
    }

    #[tokio::test]
    async fn full_session_event_order() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&["a", "b"]);

        controller.send(Command::RunTestsAll).await;
        controller.send(Command::Shutdown).await;
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::Ok);
        assert!(host.finalized);
        drop(worker);
        let events = controller.events().await;
        assert_eq!(
            names(&events),
            vec![
                "workerready",
                "collectionstart",
                "collectionfinish",
                "logstart",
                "testreport",
                "logfinish",
                "runtest_protocol_complete",
                "logstart",
                "testreport",
                "logfinish",
                "runtest_protocol_complete",
                "workerfinished",
            ]
        );
        assert_eq!(
            events.last().unwrap(),
            &Event::WorkerFinished {
                workeroutput: serde_json::from_value(json!({"exitstatus": 0})).unwrap()
            }
        );
    }

    #[tokio::test]
    async fn failing_item_sets_tests_failed() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&["a", "b", "c"]);
        host.outcomes.insert(2, Outcome::Failed);

        controller.send(Command::RunTestsAll).await;
        controller.send(Command::Shutdown).await;
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::TestsFailed);
        drop(worker);
        let events = controller.events().await;
        assert_eq!(protocol_completions(&events), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn closed_channel_ends_session_cleanly() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&["a", "b", "c"]);

        controller.send(Command::RunTests { indices: vec![0, 1] }).await;
        controller.close_commands();
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::Ok);
        drop(worker);
        let events = controller.events().await;
        assert!(events.iter().all(|e| e.name() != "internal_error"));
        assert_eq!(protocol_completions(&events), vec![0]);
        assert_eq!(events.last().unwrap().name(), "workerfinished");
    }

    #[tokio::test]
    async fn collection_errors_skip_the_run_loop() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&["a"]);
        host.collect_error = Some("plan not found".to_string());

        controller.send(Command::RunTests { indices: vec![0] }).await;
        controller.send(Command::Shutdown).await;
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::Interrupted);
        assert!(host.runs.is_empty());
        drop(worker);
        let events = controller.events().await;
        assert_eq!(
            names(&events),
            vec![
                "workerready",
                "collectionstart",
                "collectreport",
                "collectionfinish",
                "workerfinished"
            ]
        );
    }

    #[tokio::test]
    async fn empty_plan_reports_no_tests() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&[]);

        controller.send(Command::RunTestsAll).await;
        controller.send(Command::Shutdown).await;
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::NoTestsCollected);
    }

    #[tokio::test]
    async fn run_loop_error_becomes_internal_error() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&["a", "b"]);
        host.misreport = Some((0, "zzz".to_string()));

        controller.send(Command::RunTestsAll).await;
        controller.send(Command::Shutdown).await;
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::InternalError);
        drop(worker);
        let events = controller.events().await;
        let formatted = events
            .iter()
            .find_map(|e| match e {
                Event::InternalError { formatted_error } => Some(formatted_error.clone()),
                _ => None,
            })
            .unwrap();
        assert!(formatted.contains("`zzz`"));
        match events.last().unwrap() {
            Event::WorkerFinished { workeroutput } => {
                assert_eq!(workeroutput["exitstatus"], json!(3));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn internal_errors(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::InternalError { formatted_error } => Some(formatted_error.clone()),
                _ => None,
            })
            .collect()
    }

    fn exit_status_sent(events: &[Event]) -> serde_json::Value {
        match events.last().unwrap() {
            Event::WorkerFinished { workeroutput } => workeroutput["exitstatus"].clone(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_command_is_reported_and_skipped() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&["a", "b"]);

        controller
            .send_raw(r#"{"name":"runtests","payload":{"indices":"all"}}"#)
            .await;
        controller.send_raw("not json").await;
        controller.send(Command::RunTestsAll).await;
        controller.close_commands();
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::InternalError);
        drop(worker);
        let events = controller.events().await;
        let errors = internal_errors(&events);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("malformed command"), "{}", errors[0]);
        assert_eq!(protocol_completions(&events), vec![0]);
        assert_eq!(exit_status_sent(&events), json!(3));
    }

    #[tokio::test]
    async fn unreadable_command_stream_still_finishes() {
        let (mut worker, mut controller) = pair();
        let mut host = ScriptedHost::new(&["a"]);

        // Length prefix beyond the frame limit.
        controller.send_unframed(&[0xff, 0xff, 0xff, 0xff]).await;
        let status = run_session(&mut worker, &mut host).await.unwrap();

        assert_eq!(status, ExitCode::InternalError);
        assert!(host.runs.is_empty());
        drop(worker);
        let events = controller.events().await;
        let errors = internal_errors(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("failed to receive command"), "{}", errors[0]);
        assert_eq!(exit_status_sent(&events), json!(3));
    }
}
