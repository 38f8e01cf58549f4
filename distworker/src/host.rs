//! Seams between the worker and the test framework hosting it.
//!
//! - [`WorkerHooks`]: lifecycle callbacks the host invokes on the worker.
//! - [`TestHost`]: what the worker (and the session driver) invoke on the host.
//!
//! Both run on the single control thread: while the worker is inside
//! [`TestHost::run_protocol`], the host calls back into the same worker
//! through the `hooks` argument.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::protocol::ItemIndex;
use crate::report::{Location, Report};
use crate::warning::{WarningMessage, WarningWhen};

/// Process exit status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    Ok,
    TestsFailed,
    Interrupted,
    InternalError,
    UsageError,
    NoTestsCollected,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::TestsFailed => 1,
            Self::Interrupted => 2,
            Self::InternalError => 3,
            Self::UsageError => 4,
            Self::NoTestsCollected => 5,
        }
    }
}

/// Proof that the exit status was recorded; redeemed by
/// [`WorkerHooks::session_finished`] once host finalization is done.
#[must_use = "`workerfinished` is only sent when this is passed to `session_finished`"]
#[derive(Debug)]
pub struct PendingFinish {
    pub(crate) exit_status: ExitCode,
}

impl PendingFinish {
    pub fn exit_status(&self) -> ExitCode {
        self.exit_status
    }
}

#[async_trait]
pub trait WorkerHooks: Send {
    async fn session_start(&mut self) -> Result<(), WorkerError>;

    async fn collection_start(&mut self) -> Result<(), WorkerError>;

    /// Called once per collector. Passing reports are not forwarded.
    async fn collect_report(&mut self, report: &dyn Report) -> Result<(), WorkerError>;

    /// Fixes the test plan for the rest of the session.
    async fn collection_finish(
        &mut self,
        rootdir: &Path,
        ids: Vec<String>,
    ) -> Result<(), WorkerError>;

    async fn log_start(&mut self, nodeid: &str, location: &Location) -> Result<(), WorkerError>;

    async fn log_finish(&mut self, nodeid: &str, location: &Location) -> Result<(), WorkerError>;

    /// Called for each phase report of the item currently running.
    async fn log_report(&mut self, report: &dyn Report) -> Result<(), WorkerError>;

    async fn warning_recorded(
        &mut self,
        warning: &WarningMessage,
        when: WarningWhen,
        nodeid: &str,
        location: Option<&Location>,
    ) -> Result<(), WorkerError>;

    /// Forward an error the host caught in its own machinery. Not fatal.
    async fn internal_error(&mut self, formatted_error: &str) -> Result<(), WorkerError>;

    /// First half of session finish: record the exit status.
    fn session_finish(&mut self, exit_status: ExitCode) -> PendingFinish;

    /// Second half: emit `workerfinished`, after the host's own finalization.
    async fn session_finished(&mut self, pending: PendingFinish) -> Result<(), WorkerError>;
}

/// Result of host collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub rootdir: PathBuf,
    /// Node ids in plan order; position is the item index.
    pub ids: Vec<String>,
}

#[async_trait]
pub trait TestHost: Send {
    /// Build the ordered plan, reporting each collector through `hooks`.
    async fn collect(&mut self, hooks: &mut dyn WorkerHooks) -> Result<Collection, WorkerError>;

    /// Run one item's full protocol (log start, phase reports, log finish).
    ///
    /// `next` is the item that will run afterwards, or `None` if none is known;
    /// shared setup only needs tearing down when `next` does not use it.
    async fn run_protocol(
        &mut self,
        index: ItemIndex,
        next: Option<ItemIndex>,
        hooks: &mut dyn WorkerHooks,
    ) -> Result<(), WorkerError>;

    /// Host cleanup between recording the exit status and `workerfinished`.
    async fn finalize(&mut self, _hooks: &mut dyn WorkerHooks) -> Result<(), WorkerError> {
        Ok(())
    }
}
