//! Worker state machine - the controller-facing side of a test session.
//!
//! Two sources drive it on one control thread:
//! - the host, through the [`WorkerHooks`] callbacks (lifecycle, reports, warnings),
//! - the controller, through commands consumed by [`Worker::run_test_loop`].
//!
//! The run loop queues indices and only executes while at least two are
//! queued, so each item is run knowing its successor. A `shutdown` drains
//! the single leftover item with no successor.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::channel::Channel;
use crate::config::WorkerConfig;
use crate::error::{ChannelError, WorkerError};
use crate::host::{ExitCode, PendingFinish, TestHost, WorkerHooks};
use crate::info::WorkerInfo;
use crate::protocol::{Command, Event, ItemIndex};
use crate::queue::{Drained, RunQueue};
use crate::report::{Location, Report, serialize_test_report};
use crate::state::WorkerState;
use crate::warning::{WarningMessage, WarningWhen, serialize_warning};

/// The collected plan. Fixed once collection finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub ids: Vec<String>,
}

impl Session {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn check(&self, index: ItemIndex) -> Result<&str, WorkerError> {
        self.ids
            .get(index)
            .map(String::as_str)
            .ok_or(WorkerError::IndexOutOfRange {
                index,
                len: self.ids.len(),
            })
    }
}

pub struct Worker<R, W> {
    worker_id: String,
    testrun_uid: String,
    channel: Channel<R, W>,
    state: WorkerState,
    session: Option<Session>,
    queue: RunQueue,
    /// Index of the item whose protocol is running; `None` between items.
    item_index: Option<ItemIndex>,
    output: Map<String, Value>,
    tests_failed: usize,
    collection_errors: usize,
    internal_errors: usize,
}

impl<R, W> Worker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        worker_id: impl Into<String>,
        testrun_uid: impl Into<String>,
        channel: Channel<R, W>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            testrun_uid: testrun_uid.into(),
            channel,
            state: WorkerState::Idle,
            session: None,
            queue: RunQueue::new(),
            item_index: None,
            output: Map::new(),
            tests_failed: 0,
            collection_errors: 0,
            internal_errors: 0,
        }
    }

    pub fn from_config(config: &WorkerConfig, channel: Channel<R, W>) -> Self {
        Self::new(config.worker_id.clone(), config.testrun_uid.clone(), channel)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn item_index(&self) -> Option<ItemIndex> {
        self.item_index
    }

    /// Worker output, flushed with `workerfinished`. Hosts may add entries.
    pub fn output_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.output
    }

    pub fn output(&self) -> &Map<String, Value> {
        &self.output
    }

    pub fn tests_failed(&self) -> usize {
        self.tests_failed
    }

    pub fn collection_errors(&self) -> usize {
        self.collection_errors
    }

    /// Errors forwarded as `internal_error` so far.
    pub fn internal_errors(&self) -> usize {
        self.internal_errors
    }

    fn transition(&mut self, to: WorkerState) {
        if self.state != to {
            tracing::trace!(from = %self.state, %to, "Worker state transition");
            self.state = to;
        }
    }

    async fn send_event(&mut self, event: Event) -> Result<(), ChannelError> {
        tracing::trace!(worker_id = %self.worker_id, event = event.name(), "Sending event");
        self.channel.send(event).await
    }

    /// Consume controller commands until `shutdown` or the channel closes.
    ///
    /// A closed channel is a clean end of the loop, not an error.
    pub async fn run_test_loop<H>(&mut self, host: &mut H) -> Result<(), WorkerError>
    where
        H: TestHost + ?Sized,
    {
        let plan_len = self.session.as_ref().ok_or(WorkerError::NotCollected)?.len();
        tracing::debug!(worker_id = %self.worker_id, plan_len, "Entering main loop");

        loop {
            self.transition(WorkerState::AwaitingCommand);
            let command = match self.channel.receive().await {
                Ok(command) => command,
                Err(ChannelError::EndOfStream) => {
                    tracing::info!(worker_id = %self.worker_id, "Channel closed by controller, leaving main loop");
                    return Ok(());
                }
                Err(e @ ChannelError::Decode(_)) => {
                    self.internal_error(&format!("discarded malformed command: {e}"))
                        .await?;
                    continue;
                }
                Err(e) => return Err(WorkerError::Receive(e)),
            };
            tracing::debug!(command = command.name(), "Received command");

            match &command {
                Command::RunTests { indices } => self.queue.enqueue_many(indices.iter().copied()),
                Command::RunTestsAll => self.queue.enqueue_all(plan_len),
                Command::Shutdown => {}
                Command::Unknown(name) => {
                    tracing::warn!(command = %name, "Ignoring unknown command");
                }
            }
            tracing::trace!(queued = ?self.queue.iter().collect::<Vec<_>>(), "Items to run");

            while self.queue.has_lookahead() {
                self.run_one_test(host).await?;
            }

            if command == Command::Shutdown {
                self.transition(WorkerState::ShuttingDown);
                if !self.queue.is_empty() {
                    self.run_one_test(host).await?;
                    self.transition(WorkerState::ShuttingDown);
                }
                tracing::info!(worker_id = %self.worker_id, "Shutdown requested, leaving main loop");
                return Ok(());
            }
        }
    }

    async fn run_one_test<H>(&mut self, host: &mut H) -> Result<(), WorkerError>
    where
        H: TestHost + ?Sized,
    {
        let Some(Drained { index, next }) = self.queue.drain_one() else {
            return Ok(());
        };

        let session = self.session.as_ref().ok_or(WorkerError::NotCollected)?;
        let nodeid = session.check(index)?.to_string();
        if let Some(next) = next {
            session.check(next)?;
        }

        self.item_index = Some(index);
        self.transition(WorkerState::Running);
        tracing::debug!(item_index = index, %nodeid, next = ?next, "Running item");

        let start = Instant::now();
        let result = host.run_protocol(index, next, &mut *self).await;
        self.item_index = None;
        result?;
        let duration = start.elapsed().as_secs_f64();

        tracing::debug!(item_index = index, duration, "Item finished");
        self.send_event(Event::RuntestProtocolComplete {
            item_index: index,
            duration,
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> WorkerHooks for Worker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn session_start(&mut self) -> Result<(), WorkerError> {
        let workerinfo = WorkerInfo::current();
        tracing::info!(worker_id = %self.worker_id, platform = %workerinfo.platform, "Worker ready");
        self.send_event(Event::WorkerReady { workerinfo }).await?;
        Ok(())
    }

    async fn collection_start(&mut self) -> Result<(), WorkerError> {
        self.transition(WorkerState::CollectionStarted);
        self.send_event(Event::CollectionStart {}).await?;
        Ok(())
    }

    async fn collect_report(&mut self, report: &dyn Report) -> Result<(), WorkerError> {
        self.transition(WorkerState::Collecting);
        // Passing collectors carry nothing the controller acts on.
        if report.passed() {
            tracing::trace!(nodeid = report.nodeid(), "Suppressing passing collect report");
            return Ok(());
        }
        if report.failed() {
            self.collection_errors += 1;
        }
        let data = report
            .to_serializable()
            .map_err(|source| WorkerError::Report {
                nodeid: report.nodeid().to_string(),
                source,
            })?;
        self.send_event(Event::CollectReport { data }).await?;
        Ok(())
    }

    async fn collection_finish(
        &mut self,
        rootdir: &Path,
        ids: Vec<String>,
    ) -> Result<(), WorkerError> {
        let topdir = rootdir.display().to_string();
        tracing::info!(items = ids.len(), %topdir, "Collection finished");
        self.session = Some(Session { ids: ids.clone() });
        self.transition(WorkerState::Ready);
        self.send_event(Event::CollectionFinish { topdir, ids }).await?;
        Ok(())
    }

    async fn log_start(&mut self, nodeid: &str, location: &Location) -> Result<(), WorkerError> {
        self.send_event(Event::LogStart {
            nodeid: nodeid.to_string(),
            location: location.clone(),
        })
        .await?;
        Ok(())
    }

    async fn log_finish(&mut self, nodeid: &str, location: &Location) -> Result<(), WorkerError> {
        self.send_event(Event::LogFinish {
            nodeid: nodeid.to_string(),
            location: location.clone(),
        })
        .await?;
        Ok(())
    }

    async fn log_report(&mut self, report: &dyn Report) -> Result<(), WorkerError> {
        let index = self.item_index.ok_or(WorkerError::NoCurrentItem)?;
        let session = self.session.as_ref().ok_or(WorkerError::NotCollected)?;
        let expected = session.check(index)?;
        if expected != report.nodeid() {
            return Err(WorkerError::CorrelationMismatch {
                index,
                expected: expected.to_string(),
                reported: report.nodeid().to_string(),
            });
        }

        let data = serialize_test_report(report, index, &self.worker_id, &self.testrun_uid)
            .map_err(|source| WorkerError::Report {
                nodeid: report.nodeid().to_string(),
                source,
            })?;
        if report.failed() {
            self.tests_failed += 1;
        }
        self.send_event(Event::TestReport { data }).await?;
        Ok(())
    }

    async fn warning_recorded(
        &mut self,
        warning: &WarningMessage,
        when: WarningWhen,
        nodeid: &str,
        location: Option<&Location>,
    ) -> Result<(), WorkerError> {
        let warning_message_data = serialize_warning(warning);
        self.send_event(Event::WarningRecorded {
            warning_message_data,
            when,
            nodeid: nodeid.to_string(),
            location: location.cloned(),
        })
        .await?;
        Ok(())
    }

    async fn internal_error(&mut self, formatted_error: &str) -> Result<(), WorkerError> {
        self.internal_errors += 1;
        for line in formatted_error.lines() {
            tracing::error!(worker_id = %self.worker_id, "IERROR> {line}");
        }
        self.send_event(Event::InternalError {
            formatted_error: formatted_error.to_string(),
        })
        .await?;
        Ok(())
    }

    fn session_finish(&mut self, exit_status: ExitCode) -> PendingFinish {
        self.output
            .insert("exitstatus".to_string(), Value::from(exit_status.code()));
        PendingFinish { exit_status }
    }

    async fn session_finished(&mut self, pending: PendingFinish) -> Result<(), WorkerError> {
        tracing::info!(
            worker_id = %self.worker_id,
            exit_status = pending.exit_status.code(),
            tests_failed = self.tests_failed,
            "Worker finished"
        );
        let workeroutput = self.output.clone();
        self.send_event(Event::WorkerFinished { workeroutput }).await?;
        self.transition(WorkerState::Finished);
        Ok(())
    }
}
