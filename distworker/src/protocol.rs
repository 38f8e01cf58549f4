//! Wire protocol types for controller-worker communication.
//!
//! Every message on the channel is a named message: `{"name": ..., "payload": {...}}`.
//! - **Commands** (controller → worker): `runtests`, `runtests_all`, `shutdown`
//! - **Events** (worker → controller): lifecycle and result notifications

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::info::WorkerInfo;
use crate::report::Location;
use crate::warning::{SerializedWarning, WarningWhen};

/// Position of an item in the collected test plan.
pub type ItemIndex = usize;

/// Untyped named message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Commands from controller to worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enqueue explicit indices, in the order given.
    RunTests { indices: Vec<ItemIndex> },
    /// Enqueue the whole plan in plan order.
    RunTestsAll,
    /// Stop accepting work; drain what is left and leave the run loop.
    Shutdown,
    /// A name this worker does not understand. Ignored by the run loop.
    Unknown(String),
}

#[derive(Deserialize)]
struct RunTestsPayload {
    indices: Vec<ItemIndex>,
}

impl Command {
    pub const RUNTESTS: &'static str = "runtests";
    pub const RUNTESTS_ALL: &'static str = "runtests_all";
    pub const SHUTDOWN: &'static str = "shutdown";

    pub fn name(&self) -> &str {
        match self {
            Self::RunTests { .. } => Self::RUNTESTS,
            Self::RunTestsAll => Self::RUNTESTS_ALL,
            Self::Shutdown => Self::SHUTDOWN,
            Self::Unknown(name) => name,
        }
    }

    pub fn from_message(msg: Message) -> Result<Self, serde_json::Error> {
        match msg.name.as_str() {
            Self::RUNTESTS => {
                let payload: RunTestsPayload = serde_json::from_value(Value::Object(msg.payload))?;
                Ok(Self::RunTests {
                    indices: payload.indices,
                })
            }
            Self::RUNTESTS_ALL => Ok(Self::RunTestsAll),
            Self::SHUTDOWN => Ok(Self::Shutdown),
            _ => Ok(Self::Unknown(msg.name)),
        }
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        match command {
            Command::RunTests { indices } => Message::new(Command::RUNTESTS).with("indices", indices),
            Command::RunTestsAll => Message::new(Command::RUNTESTS_ALL),
            Command::Shutdown => Message::new(Command::SHUTDOWN),
            Command::Unknown(name) => Message::new(name),
        }
    }
}

/// Events from worker to controller.
///
/// Payloads hold primitive data only; anything host-specific has already been
/// converted by the report and warning serializers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload")]
pub enum Event {
    #[serde(rename = "workerready")]
    WorkerReady { workerinfo: WorkerInfo },

    #[serde(rename = "collectionstart")]
    CollectionStart {},

    #[serde(rename = "collectionfinish")]
    CollectionFinish { topdir: String, ids: Vec<String> },

    #[serde(rename = "logstart")]
    LogStart { nodeid: String, location: Location },

    #[serde(rename = "logfinish")]
    LogFinish { nodeid: String, location: Location },

    /// Item report, carrying `item_index`, `worker_id` and `testrun_uid`.
    #[serde(rename = "testreport")]
    TestReport { data: Map<String, Value> },

    /// Only sent for collectors that did not pass.
    #[serde(rename = "collectreport")]
    CollectReport { data: Map<String, Value> },

    #[serde(rename = "warning_recorded")]
    WarningRecorded {
        warning_message_data: SerializedWarning,
        when: WarningWhen,
        nodeid: String,
        location: Option<Location>,
    },

    #[serde(rename = "runtest_protocol_complete")]
    RuntestProtocolComplete { item_index: ItemIndex, duration: f64 },

    #[serde(rename = "internal_error")]
    InternalError { formatted_error: String },

    #[serde(rename = "workerfinished")]
    WorkerFinished { workeroutput: Map<String, Value> },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkerReady { .. } => "workerready",
            Self::CollectionStart {} => "collectionstart",
            Self::CollectionFinish { .. } => "collectionfinish",
            Self::LogStart { .. } => "logstart",
            Self::LogFinish { .. } => "logfinish",
            Self::TestReport { .. } => "testreport",
            Self::CollectReport { .. } => "collectreport",
            Self::WarningRecorded { .. } => "warning_recorded",
            Self::RuntestProtocolComplete { .. } => "runtest_protocol_complete",
            Self::InternalError { .. } => "internal_error",
            Self::WorkerFinished { .. } => "workerfinished",
        }
    }
}
