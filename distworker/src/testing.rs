//! Test doubles: an in-memory controller and a scripted host.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream, duplex};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::channel::Channel;
use crate::channel::codec::{FrameCodec, JsonCodec};
use crate::error::WorkerError;
use crate::host::{Collection, TestHost, WorkerHooks};
use crate::protocol::{Command, Event, ItemIndex, Message};
use crate::report::{CollectReport, Location, Outcome, Phase, TestReport};
use crate::worker::Worker;

pub(crate) type TestWorker = Worker<DuplexStream, DuplexStream>;

const PIPE_CAPACITY: usize = 1024 * 1024;

pub(crate) struct Controller {
    commands: Option<FramedWrite<DuplexStream, FrameCodec>>,
    events: FramedRead<DuplexStream, JsonCodec<Event>>,
}

impl Controller {
    pub(crate) async fn send(&mut self, command: Command) {
        let body = serde_json::to_vec(&Message::from(command)).unwrap();
        self.send_raw(body).await;
    }

    /// Send one frame with an arbitrary body.
    pub(crate) async fn send_raw(&mut self, body: impl Into<Bytes>) {
        self.commands
            .as_mut()
            .expect("commands already closed")
            .send(body.into())
            .await
            .unwrap();
    }

    /// Write bytes straight to the command pipe, bypassing framing.
    pub(crate) async fn send_unframed(&mut self, bytes: &[u8]) {
        let pipe = self
            .commands
            .as_mut()
            .expect("commands already closed")
            .get_mut();
        pipe.write_all(bytes).await.unwrap();
    }

    /// Close the command stream; the worker sees end of stream once it has
    /// read everything sent so far.
    pub(crate) fn close_commands(&mut self) {
        self.commands = None;
    }

    /// Every event sent so far. Drop the worker first or this waits forever.
    pub(crate) async fn events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.events.next().await {
            events.push(event.unwrap());
        }
        events
    }
}

pub(crate) fn pair() -> (TestWorker, Controller) {
    let (cmd_tx, cmd_rx) = duplex(PIPE_CAPACITY);
    let (evt_tx, evt_rx) = duplex(PIPE_CAPACITY);
    let worker = Worker::new("gw0", "run-1", Channel::new(cmd_rx, evt_tx));
    let controller = Controller {
        commands: Some(FramedWrite::new(cmd_tx, FrameCodec::new())),
        events: FramedRead::new(evt_rx, JsonCodec::new()),
    };
    (worker, controller)
}

pub(crate) fn protocol_completions(events: &[Event]) -> Vec<ItemIndex> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::RuntestProtocolComplete { item_index, .. } => Some(*item_index),
            _ => None,
        })
        .collect()
}

pub(crate) fn call_report(nodeid: &str, outcome: Outcome) -> TestReport {
    TestReport::new(
        nodeid,
        Location::new("suite", None, nodeid),
        Phase::Call,
        outcome,
    )
}

/// Host that "runs" an item by emitting logstart, one call report, logfinish.
#[derive(Default)]
pub(crate) struct ScriptedHost {
    pub(crate) ids: Vec<String>,
    pub(crate) runs: Vec<(ItemIndex, Option<ItemIndex>)>,
    pub(crate) outcomes: HashMap<ItemIndex, Outcome>,
    /// Report this node id instead of the real one when running the given index.
    pub(crate) misreport: Option<(ItemIndex, String)>,
    pub(crate) collect_error: Option<String>,
    pub(crate) finalized: bool,
}

impl ScriptedHost {
    pub(crate) fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TestHost for ScriptedHost {
    async fn collect(&mut self, hooks: &mut dyn WorkerHooks) -> Result<Collection, WorkerError> {
        let report = match &self.collect_error {
            Some(error) => CollectReport::error("suite", error.clone()),
            None => CollectReport::ok("suite", self.ids.clone()),
        };
        hooks.collect_report(&report).await?;
        Ok(Collection {
            rootdir: "/root".into(),
            ids: self.ids.clone(),
        })
    }

    async fn run_protocol(
        &mut self,
        index: ItemIndex,
        next: Option<ItemIndex>,
        hooks: &mut dyn WorkerHooks,
    ) -> Result<(), WorkerError> {
        self.runs.push((index, next));
        let nodeid = self.ids[index].clone();
        let location = Location::new("suite", None, nodeid.as_str());
        let reported = match &self.misreport {
            Some((bad_index, other)) if *bad_index == index => other.clone(),
            _ => nodeid.clone(),
        };
        let outcome = self
            .outcomes
            .get(&index)
            .copied()
            .unwrap_or(Outcome::Passed);

        hooks.log_start(&nodeid, &location).await?;
        hooks.log_report(&call_report(&reported, outcome)).await?;
        hooks.log_finish(&nodeid, &location).await?;
        Ok(())
    }

    async fn finalize(&mut self, _hooks: &mut dyn WorkerHooks) -> Result<(), WorkerError> {
        self.finalized = true;
        Ok(())
    }
}
