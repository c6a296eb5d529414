//! In-memory stand-ins for the transport and the console collaborators,
//! for driving a [crate::session::session::Session] from a test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::console::{LineSink, LineSource};
use crate::protocol::message::Message;
use crate::transport::{Inbound, SendOutcome, Transport, TransportKind};

/// A transport whose peer side is the test: every sent message is forwarded
///  to the [ScriptHandle], inbound frames and send outcomes are injected
///  through it.
pub struct ScriptedTransport {
    kind: TransportKind,
    sent: mpsc::UnboundedSender<Message>,
    outcomes: Arc<StdMutex<VecDeque<SendOutcome>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

pub struct ScriptHandle {
    /// messages the session handed to the transport, in send order
    pub sent: mpsc::UnboundedReceiver<Message>,
    /// dropping resp. closing this sender makes the transport report `Closed`
    pub inbound: mpsc::UnboundedSender<Inbound>,
    outcomes: Arc<StdMutex<VecDeque<SendOutcome>>>,
}

impl ScriptedTransport {
    pub fn new(kind: TransportKind) -> (ScriptedTransport, ScriptHandle) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let outcomes: Arc<StdMutex<VecDeque<SendOutcome>>> = Default::default();

        let transport = ScriptedTransport {
            kind,
            sent: sent_tx,
            outcomes: outcomes.clone(),
            inbound: Mutex::new(inbound_rx),
        };
        let handle = ScriptHandle {
            sent: sent_rx,
            inbound: inbound_tx,
            outcomes,
        };
        (transport, handle)
    }
}

impl ScriptHandle {
    /// makes the next send report the given outcome instead of `Delivered`
    pub fn push_outcome(&self, outcome: SendOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn send_to_session(&self, msg: Message) {
        self.inbound.send(Inbound::Message(msg)).unwrap();
    }

    /// simulates the peer going away: subsequent receives report `Closed`
    pub fn close(&mut self) {
        let (detached, _) = mpsc::unbounded_channel();
        self.inbound = detached;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, msg: &Message) -> anyhow::Result<SendOutcome> {
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(SendOutcome::Delivered);
        let _ = self.sent.send(msg.clone());
        Ok(outcome)
    }

    async fn receive(&self) -> Inbound {
        match self.inbound.lock().await.recv().await {
            Some(inbound) => inbound,
            None => Inbound::Closed,
        }
    }
}

/// line source fed through a channel; closing the sender is end-of-input
pub struct ChannelSource {
    lines: mpsc::UnboundedReceiver<String>,
}

impl ChannelSource {
    pub fn new() -> (ChannelSource, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSource { lines: rx }, tx)
    }
}

#[async_trait]
impl LineSource for ChannelSource {
    async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.lines.recv().await)
    }
}

/// sink collecting everything it was given
#[derive(Clone, Default)]
pub struct RecordingSink {
    lines: Arc<StdMutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        Default::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl LineSink for RecordingSink {
    fn line(&self, text: &str) {
        self.lines.lock().unwrap().push(text.to_owned());
    }
}
