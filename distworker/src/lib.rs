//! distworker: the worker side of a distributed test run.
//!
//! A controller process sends a bootstrap followed by `runtests`,
//! `runtests_all` and `shutdown` commands; the worker collects its test
//! plan through a [`TestHost`], runs items as they are scheduled and
//! streams lifecycle events back.

pub mod channel;
pub mod config;
pub mod encode;
pub mod error;
pub mod host;
mod info;
pub mod process_host;
pub mod protocol;
pub mod queue;
pub mod report;
pub mod session;
mod state;
pub mod warning;
pub mod worker;

#[cfg(test)]
mod testing;

pub use channel::{Channel, StdioChannel};
pub use config::{Bootstrap, WorkerConfig, WorkerInput};
pub use error::{ChannelError, EncodeError, WorkerError};
pub use host::{Collection, ExitCode, PendingFinish, TestHost, WorkerHooks};
pub use info::{WORKER_VERSION, WorkerInfo};
pub use process_host::ProcessHost;
pub use protocol::{Command, Event, ItemIndex, Message};
pub use report::{CollectReport, Location, Outcome, Phase, Report, TestReport};
pub use session::run_session;
pub use state::WorkerState;
pub use warning::{SerializedWarning, WarningMessage, WarningWhen};
pub use worker::{Session, Worker};
