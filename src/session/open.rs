//! The Open-state coordinator: user input and peer input progress
//! concurrently against the shared transport until either side produces a
//! terminal outcome.

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::protocol::message::Message;
use crate::session::command::UserCommand;
use crate::session::session::{Session, State};
use crate::transport::{Inbound, SendOutcome};

/// The single typed reason the Open phase ended, consumed once by the state
///  machine.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OpenOutcome {
    /// the input collaborator ran out of lines
    EndOfInput,
    /// the peer sent ERR (already reported)
    PeerErr,
    /// the peer sent BYE - no response is owed
    PeerBye,
    /// the peer closed the connection without BYE
    PeerClosed,
    /// the peer sent an unparseable or out-of-protocol frame
    PeerMalformed,
    /// this client attempted a protocol violation (`/auth` while open)
    LocalFault,
}

enum OpenEvent {
    Input(Option<String>),
    Inbound(Inbound),
}

impl Session {
    /// Races "next input line" against "next peer frame". While a reliable
    ///  send is awaiting its CONFIRM, the transport's exclusive reader keeps
    ///  confirming and queueing peer frames, so neither path starves the
    ///  other. Whichever future loses the race is dropped, which is the
    ///  cancellation point for the losing path.
    pub(crate) async fn run_open(&mut self) -> anyhow::Result<OpenOutcome> {
        loop {
            let event = {
                let input = &mut self.input;
                let transport = &self.transport;
                tokio::select! {
                    line = input.next_line() => OpenEvent::Input(line?),
                    inbound = transport.receive() => OpenEvent::Inbound(inbound),
                }
            };

            let outcome = match event {
                OpenEvent::Input(None) => {
                    debug!("end of input");
                    Some(OpenOutcome::EndOfInput)
                }
                OpenEvent::Input(Some(line)) => self.on_input_line(&line).await?,
                OpenEvent::Inbound(inbound) => self.on_inbound(inbound),
            };
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    async fn on_input_line(&mut self, line: &str) -> anyhow::Result<Option<OpenOutcome>> {
        let cmd = match UserCommand::parse(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.errors.line(&format!("ERR: {}", e));
                return Ok(None);
            }
        };

        match cmd {
            UserCommand::Auth { .. } => {
                self.errors.line("ERR: already authenticated, /auth is not allowed here.");
                Ok(Some(OpenOutcome::LocalFault))
            }
            UserCommand::Join { channel_id } => {
                let msg = Message::Join {
                    id: self.next_msg_id(),
                    channel_id,
                    display_name: self.display_name.clone(),
                };
                match self.transport.send(&msg).await? {
                    SendOutcome::Delivered => Ok(None),
                    SendOutcome::Failed => Err(anyhow!("JOIN message wasn't received by the host.")),
                }
            }
            UserCommand::Rename { display_name } => {
                // purely local, nothing goes over the wire
                self.display_name = display_name;
                Ok(None)
            }
            UserCommand::Help => {
                self.print_help();
                Ok(None)
            }
            UserCommand::Chat { content } => {
                let msg = Message::Msg {
                    id: self.next_msg_id(),
                    display_name: self.display_name.clone(),
                    content,
                };
                match self.transport.send(&msg).await? {
                    SendOutcome::Delivered => Ok(None),
                    SendOutcome::Failed => Err(anyhow!("MSG message wasn't received by the host.")),
                }
            }
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) -> Option<OpenOutcome> {
        match inbound {
            Inbound::Message(Message::Reply { success, reason, .. }) => {
                let verdict = if success { "Success" } else { "Failure" };
                self.errors.line(&format!("{}: {}", verdict, reason));
                None
            }
            Inbound::Message(Message::Msg { display_name, content, .. }) => {
                self.output.line(&format!("{}: {}", display_name, content));
                None
            }
            Inbound::Message(Message::Err { display_name, content, .. }) => {
                self.errors.line(&format!("ERR FROM {}: {}", display_name, content));
                Some(OpenOutcome::PeerErr)
            }
            Inbound::Message(Message::Bye { .. }) => Some(OpenOutcome::PeerBye),
            Inbound::Message(other) => {
                warn!("received {:?} in open state", other.message_type());
                Some(OpenOutcome::PeerMalformed)
            }
            Inbound::Malformed(e) => {
                warn!("received malformed frame: {}", e);
                Some(OpenOutcome::PeerMalformed)
            }
            Inbound::Closed => {
                debug!("peer closed the connection");
                Some(OpenOutcome::PeerClosed)
            }
        }
    }

    pub(crate) async fn on_open_outcome(&mut self, outcome: OpenOutcome) -> anyhow::Result<State> {
        match outcome {
            OpenOutcome::EndOfInput | OpenOutcome::PeerErr | OpenOutcome::PeerClosed => {
                self.send_terminal_bye().await?;
                Ok(State::End)
            }
            OpenOutcome::PeerBye => Ok(State::End),
            OpenOutcome::PeerMalformed => {
                let msg = Message::Err {
                    id: self.next_msg_id(),
                    display_name: self.display_name.clone(),
                    content: "Incoming message failed to be parsed.".to_owned(),
                };
                match self.transport.send(&msg).await? {
                    SendOutcome::Delivered => Ok(State::Error),
                    SendOutcome::Failed => Err(anyhow!("ERR message wasn't received by the host.")),
                }
            }
            OpenOutcome::LocalFault => Ok(State::Error),
        }
    }
}
