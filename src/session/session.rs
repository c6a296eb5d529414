use anyhow::anyhow;
use tracing::{debug, warn};

use crate::console::{LineSink, LineSource};
use crate::protocol::message::Message;
use crate::session::command::UserCommand;
use crate::transport::{Inbound, SendOutcome, Transport, TransportKind};

/// Protocol lifecycle. Transitions are driven exclusively by [Session::run];
///  `End` is the only exit point.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum State {
    Start,
    Auth,
    Open,
    Error,
    End,
}

/// One connection: owns the transport, the console collaborators, the id
///  counter and the display name, and drives the state machine to completion.
pub struct Session {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) input: Box<dyn LineSource>,
    pub(crate) output: Box<dyn LineSink>,
    pub(crate) errors: Box<dyn LineSink>,

    pub(crate) display_name: String,
    next_id: u16,
    last_auth_id: Option<u16>,
}

impl Session {
    pub fn new(
        transport: Box<dyn Transport>,
        input: Box<dyn LineSource>,
        output: Box<dyn LineSink>,
        errors: Box<dyn LineSink>,
    ) -> Session {
        Session {
            transport,
            input,
            output,
            errors,
            display_name: String::new(),
            next_id: 0,
            last_auth_id: None,
        }
    }

    /// Runs the connection to completion. `Err` is a fatal run failure and
    ///  maps to a non-zero process exit; an orderly `End` returns `Ok`.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut state = State::Start;
        loop {
            debug!("entering state {:?}", state);
            state = match state {
                State::Start => self.run_auth_prompt().await?,
                State::Auth => self.run_await_reply().await?,
                State::Open => {
                    let outcome = self.run_open().await?;
                    debug!("open phase ended: {:?}", outcome);
                    self.on_open_outcome(outcome).await?
                }
                State::Error => {
                    self.send_terminal_bye().await?;
                    State::End
                }
                State::End => {
                    debug!("session ended");
                    return Ok(());
                }
            };
        }
    }

    /// ids are assigned monotonically, exactly once per originated message,
    ///  no matter how often the transport retransmits it
    pub(crate) fn next_msg_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Start state (and the re-prompt after a negative REPLY): only `/auth`
    ///  and `/help` are accepted, nothing else touches the network.
    async fn run_auth_prompt(&mut self) -> anyhow::Result<State> {
        loop {
            let Some(line) = self.input.next_line().await? else {
                debug!("end of input before authentication");
                return Ok(State::End);
            };

            match UserCommand::parse(&line) {
                Err(e) => self.errors.line(&format!("ERR: {}", e)),
                Ok(UserCommand::Help) => self.print_help(),
                Ok(UserCommand::Auth { username, secret, display_name }) => {
                    let id = self.next_msg_id();
                    let msg = Message::Auth {
                        id,
                        username,
                        display_name: display_name.clone(),
                        secret,
                    };
                    match self.transport.send(&msg).await? {
                        SendOutcome::Delivered => {
                            self.display_name = display_name;
                            self.last_auth_id = Some(id);
                            return Ok(State::Auth);
                        }
                        // recoverable: the user may simply try again
                        SendOutcome::Failed => {
                            self.errors.line("ERR: AUTH message wasn't received by the host.")
                        }
                    }
                }
                Ok(_) => self.errors.line(
                    "ERR: /auth command is required. Use: /auth {Username} {Secret} {DisplayName}.",
                ),
            }
        }
    }

    /// Auth state: exactly one REPLY correlated to the outstanding AUTH is
    ///  expected. The textual encoding carries no ref id, so correlation is
    ///  checked on the datagram transport only.
    async fn run_await_reply(&mut self) -> anyhow::Result<State> {
        loop {
            match self.transport.receive().await {
                Inbound::Message(Message::Reply { success, ref_id, reason, .. }) => {
                    if self.transport.kind() == TransportKind::Udp && Some(ref_id) != self.last_auth_id {
                        self.errors.line("ERR: Error receiving REPLY message.");
                        continue;
                    }
                    return if success {
                        self.errors.line(&format!("Success: {}", reason));
                        Ok(State::Open)
                    } else {
                        self.errors.line(&format!("Failure: {}", reason));
                        Ok(State::Start)
                    };
                }
                Inbound::Message(Message::Err { display_name, content, .. }) => {
                    self.errors.line(&format!("ERR FROM {}: {}", display_name, content));
                    self.send_terminal_bye().await?;
                    return Ok(State::End);
                }
                Inbound::Message(other) => {
                    warn!("received {:?} while awaiting REPLY", other.message_type());
                    return Ok(State::Error);
                }
                Inbound::Malformed(e) => {
                    warn!("received malformed frame while awaiting REPLY: {}", e);
                    return Ok(State::Error);
                }
                Inbound::Closed => {
                    debug!("peer closed while awaiting REPLY");
                    self.send_terminal_bye().await?;
                    return Ok(State::End);
                }
            }
        }
    }

    /// A BYE on any termination path must make it to the peer; exhausting its
    ///  retry budget is fatal to the run.
    pub(crate) async fn send_terminal_bye(&mut self) -> anyhow::Result<()> {
        let msg = Message::Bye { id: self.next_msg_id() };
        match self.transport.send(&msg).await? {
            SendOutcome::Delivered => Ok(()),
            SendOutcome::Failed => Err(anyhow!("BYE message wasn't received by the host.")),
        }
    }

    pub(crate) fn print_help(&self) {
        self.output.line("Supported local commands:");
        self.output.line("/auth {Username} {Secret} {DisplayName} - Sends AUTH message with the data provided from the command to the server, locally sets the DisplayName");
        self.output.line("/join {ChannelID} - Sends JOIN message with channel name from the command to the server");
        self.output.line("/rename {DisplayName} - Locally changes the display name of the user");
        self.output.line("/help - Prints this message");
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use crate::test_util::{ChannelSource, RecordingSink, ScriptHandle, ScriptedTransport};
    use crate::transport::Inbound;

    use super::*;

    struct Harness {
        run: JoinHandle<anyhow::Result<()>>,
        peer: ScriptHandle,
        input: Option<mpsc::UnboundedSender<String>>,
        output: RecordingSink,
        errors: RecordingSink,
    }

    fn start_session(kind: TransportKind) -> Harness {
        let (transport, peer) = ScriptedTransport::new(kind);
        let (source, input) = ChannelSource::new();
        let output = RecordingSink::new();
        let errors = RecordingSink::new();

        let session = Session::new(
            Box::new(transport),
            Box::new(source),
            Box::new(output.clone()),
            Box::new(errors.clone()),
        );
        Harness {
            run: tokio::spawn(session.run()),
            peer,
            input: Some(input),
            output,
            errors,
        }
    }

    impl Harness {
        fn type_line(&self, line: &str) {
            self.input.as_ref().unwrap().send(line.to_owned()).unwrap();
        }

        fn close_input(&mut self) {
            self.input = None;
        }

        async fn sent(&mut self) -> Message {
            self.peer.sent.recv().await.unwrap()
        }

        /// authenticates as Alice, leaving the session in Open
        async fn authenticate(&mut self) {
            self.type_line("/auth alice secret123 Alice");
            match self.sent().await {
                Message::Auth { id: 0, .. } => {}
                other => panic!("expected AUTH, got {:?}", other),
            }
            self.peer.send_to_session(Message::Reply {
                id: 100,
                success: true,
                ref_id: 0,
                reason: "Auth success.".into(),
            });
        }
    }

    #[tokio::test]
    async fn test_happy_path_datagram() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.type_line("hello");
        match h.sent().await {
            Message::Msg { id: 1, display_name, content } => {
                assert_eq!(display_name, "Alice");
                assert_eq!(content, "hello");
            }
            other => panic!("expected MSG, got {:?}", other),
        }

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { id: 2 }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("Success: Auth success."));
    }

    #[tokio::test]
    async fn test_reply_nok_returns_to_auth_prompt() {
        let mut h = start_session(TransportKind::Udp);

        h.type_line("/auth alice secret123 Alice");
        assert!(matches!(h.sent().await, Message::Auth { id: 0, .. }));
        h.peer.send_to_session(Message::Reply { id: 100, success: false, ref_id: 0, reason: "denied".into() });

        // a new /auth is accepted, with the next id
        h.type_line("/auth alice secret456 Alice");
        assert!(matches!(h.sent().await, Message::Auth { id: 1, .. }));
        h.peer.send_to_session(Message::Reply { id: 101, success: true, ref_id: 1, reason: "welcome".into() });

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { id: 2 }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("Failure: denied"));
        assert!(h.errors.contains("Success: welcome"));
    }

    #[tokio::test]
    async fn test_mismatched_ref_id_is_ignored() {
        let mut h = start_session(TransportKind::Udp);

        h.type_line("/auth alice secret123 Alice");
        assert!(matches!(h.sent().await, Message::Auth { id: 0, .. }));

        h.peer.send_to_session(Message::Reply { id: 100, success: true, ref_id: 9, reason: "stale".into() });
        h.peer.send_to_session(Message::Reply { id: 101, success: true, ref_id: 0, reason: "welcome".into() });

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("ERR: Error receiving REPLY message."));
        assert!(h.errors.contains("Success: welcome"));
        assert!(!h.errors.contains("stale"));
    }

    #[tokio::test]
    async fn test_auth_send_failure_is_recoverable() {
        let mut h = start_session(TransportKind::Udp);

        h.peer.push_outcome(SendOutcome::Failed);
        h.type_line("/auth alice secret123 Alice");
        assert!(matches!(h.sent().await, Message::Auth { id: 0, .. }));

        // the id counter advanced even though delivery failed
        h.type_line("/auth alice secret123 Alice");
        assert!(matches!(h.sent().await, Message::Auth { id: 1, .. }));
        h.peer.send_to_session(Message::Reply { id: 100, success: true, ref_id: 1, reason: "welcome".into() });

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { id: 2 }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("ERR: AUTH message wasn't received by the host."));
    }

    /// waits for asynchronously produced sink output
    async fn await_line(sink: &RecordingSink, needle: &str) {
        for _ in 0..200 {
            if sink.contains(needle) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("sink never produced a line containing {:?}, got {:?}", needle, sink.lines());
    }

    #[tokio::test]
    async fn test_incoming_msg_goes_to_normal_output() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.peer.send_to_session(Message::Msg { id: 5, display_name: "bob".into(), content: "hi".into() });
        await_line(&h.output, "bob: hi").await;
        assert!(!h.errors.contains("bob: hi"));

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_peer_error_mid_session() {
        let mut h = start_session(TransportKind::Tcp);
        h.authenticate().await;

        h.peer.send_to_session(Message::Err { id: 7, display_name: "bob".into(), content: "bad format".into() });

        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("ERR FROM bob: bad format"));
    }

    #[tokio::test]
    async fn test_peer_bye_ends_without_response() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.peer.send_to_session(Message::Bye { id: 7 });
        h.run.await.unwrap().unwrap();

        assert!(h.peer.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_in_open() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.peer.inbound.send(Inbound::Malformed(anyhow!("unknown message type 0x77"))).unwrap();

        match h.sent().await {
            Message::Err { id: 1, display_name, content } => {
                assert_eq!(display_name, "Alice");
                assert_eq!(content, "Incoming message failed to be parsed.");
            }
            other => panic!("expected ERR, got {:?}", other),
        }
        assert!(matches!(h.sent().await, Message::Bye { id: 2 }));
        h.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_end_of_input_in_open() {
        let mut h = start_session(TransportKind::Tcp);
        h.authenticate().await;

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { id: 1 }));
        h.run.await.unwrap().unwrap();

        assert!(h.peer.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_closed_in_open() {
        let mut h = start_session(TransportKind::Tcp);
        h.authenticate().await;

        h.peer.close();
        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_auth_while_open_is_a_local_fault() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.type_line("/auth bob secret456 Bobby");
        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("already authenticated"));
    }

    #[tokio::test]
    async fn test_local_usage_errors_consume_no_ids() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.type_line("");
        h.type_line("/join");
        h.type_line("hello");
        assert!(matches!(h.sent().await, Message::Msg { id: 1, .. }));

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { id: 2 }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("ERR: Enter non-empty input."));
        assert!(h.errors.contains("ERR: Invalid /join command format."));
    }

    #[tokio::test]
    async fn test_unrecognized_slash_line_is_sent_as_chat() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.type_line("/quit now");
        match h.sent().await {
            Message::Msg { id: 1, display_name, content } => {
                assert_eq!(display_name, "Alice");
                assert_eq!(content, "/quit now");
            }
            other => panic!("expected MSG, got {:?}", other),
        }

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { id: 2 }));
        h.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rename_is_local_and_tags_subsequent_messages() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.type_line("/rename Alicia");
        h.type_line("hi there");
        match h.sent().await {
            Message::Msg { display_name, .. } => assert_eq!(display_name, "Alicia"),
            other => panic!("expected MSG, got {:?}", other),
        }

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_join_is_sent_with_current_display_name() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.type_line("/join general");
        match h.sent().await {
            Message::Join { id: 1, channel_id, display_name } => {
                assert_eq!(channel_id, "general");
                assert_eq!(display_name, "Alice");
            }
            other => panic!("expected JOIN, got {:?}", other),
        }
        h.peer.send_to_session(Message::Reply { id: 101, success: true, ref_id: 1, reason: "Join success.".into() });

        h.close_input();
        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("Success: Join success."));
    }

    #[tokio::test]
    async fn test_msg_retry_exhaustion_is_fatal() {
        let mut h = start_session(TransportKind::Udp);
        h.authenticate().await;

        h.peer.push_outcome(SendOutcome::Failed);
        h.type_line("hello");
        assert!(matches!(h.sent().await, Message::Msg { .. }));

        assert!(h.run.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_unexpected_message_while_awaiting_reply() {
        let mut h = start_session(TransportKind::Udp);

        h.type_line("/auth alice secret123 Alice");
        assert!(matches!(h.sent().await, Message::Auth { .. }));

        h.peer.send_to_session(Message::Msg { id: 5, display_name: "bob".into(), content: "early".into() });

        // out-of-protocol input in Auth goes through Error, which still says BYE
        assert!(matches!(h.sent().await, Message::Bye { .. }));
        h.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_chat_before_auth_is_rejected_locally() {
        let mut h = start_session(TransportKind::Tcp);

        h.type_line("hello world");
        h.type_line("/join general");
        h.close_input();
        h.run.await.unwrap().unwrap();

        assert!(h.errors.contains("/auth command is required"));
        assert!(h.peer.sent.try_recv().is_err());
    }
}

