use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use base64::Engine;
use psremote_client_core::{
    Authentication, ClientError, Endpoint, OutputRecord, RunspaceSession, Scheme, SoapTransport,
    WinRmConfig, WinRmTransport,
    connector::http::{HttpClient, HttpRequest, HttpResponse},
    runspace::SessionState,
};
use psremote_psrp::{Fragment, MessageType, PsrpMessage, encode};
use psremote_xml::parser::{self, NodeExt};
use uuid::Uuid;

const FAULT_ACTION: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman/fault";
const SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
const TRANSFER: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";

fn envelope(action: &str, body: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:rsp="{SHELL}"><s:Header><a:Action>{action}</a:Action></s:Header><s:Body>{body}</s:Body></s:Envelope>"#
    )
}

fn create_ack() -> String {
    envelope(&format!("{TRANSFER}/CreateResponse"), "")
}

fn command_ack() -> String {
    envelope(
        &format!("{SHELL}/CommandResponse"),
        "<rsp:CommandResponse><rsp:CommandId>0</rsp:CommandId></rsp:CommandResponse>",
    )
}

fn signal_ack() -> String {
    envelope(&format!("{SHELL}/SignalResponse"), "<rsp:SignalResponse/>")
}

fn delete_ack() -> String {
    envelope(&format!("{TRANSFER}/DeleteResponse"), "")
}

fn fault(subcode: &str, reason: &str) -> String {
    envelope(
        FAULT_ACTION,
        &format!(
            r#"<s:Fault><s:Code><s:Value>s:Receiver</s:Value><s:Subcode><s:Value>{subcode}</s:Value></s:Subcode></s:Code><s:Reason><s:Text xml:lang="en-US">{reason}</s:Text></s:Reason></s:Fault>"#
        ),
    )
}

fn timed_out() -> String {
    fault("w:TimedOut", "The WS-Management service cannot complete the operation.")
}

fn receive(streams: &[Vec<u8>], done: bool) -> String {
    let mut body = String::from("<rsp:ReceiveResponse>");
    for stream in streams {
        body.push_str(&format!(
            r#"<rsp:Stream Name="stdout">{}</rsp:Stream>"#,
            base64::engine::general_purpose::STANDARD.encode(stream)
        ));
    }
    if done {
        body.push_str(&format!(
            r#"<rsp:CommandState State="{SHELL}/CommandState/Done"/>"#
        ));
    }
    body.push_str("</rsp:ReceiveResponse>");
    envelope(&format!("{SHELL}/ReceiveResponse"), &body)
}

/// One fragment stream carrying `messages` as server output.
fn output_stream(first_object_id: u64, messages: &[(MessageType, &str)]) -> Vec<u8> {
    let messages: Vec<PsrpMessage> = messages
        .iter()
        .map(|(message_type, body)| {
            PsrpMessage::new(*message_type, Uuid::nil(), Uuid::nil(), body.as_bytes().to_vec())
        })
        .collect();
    encode(first_object_id, &messages).unwrap()
}

fn stdout_stream(text: &str) -> Vec<u8> {
    output_stream(1, &[(MessageType::PipelineOutput, &format!("<S>{text}</S>"))])
}

type SentLog = Rc<RefCell<Vec<String>>>;

struct ScriptedTransport {
    replies: VecDeque<String>,
    sent: SentLog,
}

impl SoapTransport for ScriptedTransport {
    fn send(&mut self, envelope: &str) -> Result<String, ClientError> {
        self.sent.borrow_mut().push(envelope.to_owned());
        self.replies
            .pop_front()
            .ok_or_else(|| ClientError::Transport("connection refused".into()))
    }
}

fn config() -> WinRmConfig {
    WinRmConfig::builder()
        .endpoint(Endpoint::host("web01", Scheme::Http))
        .authentication(Authentication::Basic {
            username: "alice".into(),
            password: "secret".into(),
        })
        .build()
}

fn session(replies: Vec<String>) -> (RunspaceSession<ScriptedTransport>, SentLog) {
    let sent = SentLog::default();
    let transport = ScriptedTransport {
        replies: replies.into(),
        sent: sent.clone(),
    };
    (RunspaceSession::new(transport, &config()), sent)
}

/// Replies consumed by `open`: the create acknowledgement and two opening polls.
fn opening() -> Vec<String> {
    vec![create_ack(), receive(&[], false), timed_out()]
}

fn action(envelope: &str) -> String {
    let document = parser::parse(envelope).unwrap();
    let uri = document
        .root_element()
        .child("Header")
        .and_then(|header| header.child("Action"))
        .map(|action| action.text_or_empty().to_owned())
        .unwrap();
    uri.rsplit('/').next().unwrap().to_owned()
}

fn actions(sent: &SentLog) -> Vec<String> {
    sent.borrow().iter().map(|envelope| action(envelope)).collect()
}

fn count(sent: &SentLog, name: &str) -> usize {
    actions(sent).iter().filter(|action| *action == name).count()
}

fn collect(output: impl Iterator<Item = Result<OutputRecord, ClientError>>) -> Vec<OutputRecord> {
    output.map(Result::unwrap).collect()
}

#[test]
#[tracing_test::traced_test]
fn test_happy_path_yields_stdout() {
    let mut replies = opening();
    replies.extend([
        command_ack(),
        receive(&[], false),
        receive(&[stdout_stream("Hello")], true),
        delete_ack(),
    ]);
    let (mut session, sent) = session(replies);

    session.open().unwrap();
    assert_eq!(session.state(), SessionState::Open);

    let records = collect(session.run_command("Write-Output Hello").unwrap());
    assert_eq!(records, vec![OutputRecord::Stdout("Hello".into())]);

    session.close();
    assert_eq!(
        actions(&sent),
        ["Create", "Receive", "Receive", "Command", "Receive", "Receive", "Delete"]
    );
    assert!(logs_contain("command finished"));
}

#[test]
fn test_heartbeat_timeouts_are_counted() {
    let mut replies = opening();
    replies.extend([
        command_ack(),
        timed_out(),
        timed_out(),
        timed_out(),
        receive(&[], true),
    ]);
    let (mut session, _sent) = session(replies);
    session.open().unwrap();

    let records = collect(session.run_command("Start-Sleep 20").unwrap());
    assert_eq!(
        records,
        vec![
            OutputRecord::Timeout(1),
            OutputRecord::Timeout(2),
            OutputRecord::Timeout(3),
        ]
    );
}

#[test]
fn test_timeout_counter_restarts_after_data() {
    let mut replies = opening();
    replies.extend([
        command_ack(),
        timed_out(),
        receive(&[stdout_stream("tick")], false),
        timed_out(),
        receive(&[], true),
    ]);
    let (mut session, _sent) = session(replies);
    session.open().unwrap();

    let records = collect(session.run_command("slow").unwrap());
    assert_eq!(
        records,
        vec![
            OutputRecord::Timeout(1),
            OutputRecord::Stdout("tick".into()),
            OutputRecord::Timeout(1),
        ]
    );
}

#[test]
fn test_remote_fault_ends_command_with_one_error() {
    let mut replies = opening();
    replies.extend([
        command_ack(),
        fault("x", "boom"),
        command_ack(),
        receive(&[stdout_stream("still alive")], true),
    ]);
    let (mut session, _sent) = session(replies);
    session.open().unwrap();

    let records = collect(session.run_command("explode").unwrap());
    assert_eq!(records, vec![OutputRecord::Error("boom".into())]);

    // The session stays usable.
    let records = collect(session.run_command("echo").unwrap());
    assert_eq!(records, vec![OutputRecord::Stdout("still alive".into())]);
}

#[test]
fn test_unacknowledged_pipeline_yields_single_error() {
    let mut replies = opening();
    replies.push(fault("w:InternalError", "no"));
    let (mut session, sent) = session(replies);
    session.open().unwrap();

    let records = collect(session.run_command("whoami").unwrap());
    assert_eq!(records.len(), 1);
    assert!(matches!(
        &records[0],
        OutputRecord::Error(text) if text.contains("failed to create pipeline")
    ));
    assert_eq!(count(&sent, "Receive"), 2);
}

#[test]
fn test_records_of_every_kind() {
    let stream = output_stream(
        10,
        &[
            (MessageType::PipelineOutput, "<S>line_x000A_two</S>"),
            (
                MessageType::WarningRecord,
                "<Obj RefId=\"0\"><ToString>careful</ToString></Obj>",
            ),
            (
                MessageType::InformationRecord,
                "<Obj RefId=\"0\"><MS><Obj N=\"MessageData\" RefId=\"1\"><Props><S N=\"Message\">host text</S><B N=\"NoNewLine\">true</B></Props></Obj></MS></Obj>",
            ),
            (MessageType::DebugRecord, "<Obj RefId=\"0\"><ToString>hidden</ToString></Obj>"),
            (
                MessageType::PipelineState,
                "<Obj RefId=\"0\"><MS><I32 N=\"PipelineState\">3</I32><Obj N=\"ExceptionAsErrorRecord\" RefId=\"1\"><ToString>it broke</ToString></Obj></MS></Obj>",
            ),
        ],
    );

    let mut replies = opening();
    replies.extend([command_ack(), receive(&[stream], true)]);
    let (mut session, _sent) = session(replies);
    session.open().unwrap();

    let records = collect(session.run_command("mixed").unwrap());
    assert_eq!(
        records,
        vec![
            OutputRecord::Stdout("line\ntwo".into()),
            OutputRecord::Warning("careful".into()),
            OutputRecord::Info {
                text: "host text".into(),
                newline: false,
            },
            OutputRecord::Error("it broke".into()),
        ]
    );
}

#[test]
fn test_message_split_across_receives() {
    let message = PsrpMessage::new(
        MessageType::PipelineOutput,
        Uuid::nil(),
        Uuid::nil(),
        b"<S>reassembled</S>".to_vec(),
    )
    .pack();
    let (head, tail) = message.split_at(20);
    let first = Fragment::new(5, 0, head.to_vec(), true, false).pack();
    let last = Fragment::new(5, 1, tail.to_vec(), false, true).pack();

    let mut replies = opening();
    replies.extend([command_ack(), receive(&[first], false), receive(&[last], true)]);
    let (mut session, _sent) = session(replies);
    session.open().unwrap();

    let records = collect(session.run_command("big").unwrap());
    assert_eq!(records, vec![OutputRecord::Stdout("reassembled".into())]);
}

#[test]
fn test_unexpected_reply_is_a_protocol_error() {
    let mut replies = opening();
    replies.extend([command_ack(), create_ack()]);
    let (mut session, _sent) = session(replies);
    session.open().unwrap();

    let mut output = session.run_command("x").unwrap();
    assert!(matches!(output.next(), Some(Err(ClientError::Protocol(_)))));
    assert!(output.next().is_none());
}

#[test]
fn test_records_before_a_local_error_are_yielded_first() {
    let stream = output_stream(
        1,
        &[
            (MessageType::PipelineOutput, "<S>first</S>"),
            (MessageType::PipelineOutput, "<S>broken"),
        ],
    );
    let mut replies = opening();
    replies.extend([command_ack(), receive(&[stream], false), signal_ack()]);
    let (mut session, sent) = session(replies);
    session.open().unwrap();

    let mut output = session.run_command("x").unwrap();
    let command_id = output.command_id();
    assert_eq!(output.next().unwrap().unwrap(), OutputRecord::Stdout("first".into()));
    assert!(!output.is_finished());
    assert!(matches!(output.next(), Some(Err(ClientError::Psrp(_)))));
    assert!(output.is_finished());
    assert!(output.next().is_none());
    drop(output);

    // The pipeline may still run remotely, so it stays interruptible once.
    session.interrupt().unwrap();
    session.interrupt().unwrap();
    assert_eq!(count(&sent, "Signal"), 1);
    let signal = sent.borrow().last().unwrap().clone();
    assert!(signal.contains(&command_id.to_string().to_uppercase()));
}

#[test]
fn test_object_ids_strictly_increase() {
    let mut replies = opening();
    replies.extend([
        command_ack(),
        receive(&[], true),
        command_ack(),
        receive(&[], true),
    ]);
    let (mut session, sent) = session(replies);
    session.open().unwrap();
    for command in ["first", "second"] {
        collect(session.run_command(command).unwrap());
    }

    let mut object_ids = Vec::new();
    for envelope in sent.borrow().iter() {
        let document = parser::parse(envelope).unwrap();
        let payload = document
            .descendants()
            .find(|node| matches!(node.tag_name().name(), "creationXml" | "Arguments"));
        let Some(payload) = payload else { continue };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.text_or_empty())
            .unwrap();
        let mut remaining = bytes.as_slice();
        while !remaining.is_empty() {
            let (fragment, rest) = Fragment::unpack(remaining).unwrap();
            assert!(fragment.start && fragment.end);
            assert_eq!(fragment.fragment_id, 0);
            object_ids.push(fragment.object_id);
            remaining = rest;
        }
    }

    assert_eq!(object_ids, vec![1, 2, 3, 4]);
}

#[test]
fn test_creation_messages_address_the_shell() {
    let (mut session, sent) = session(opening());
    session.open().unwrap();

    let document = parser::parse(&sent.borrow()[0]).unwrap();
    let creation = document
        .descendants()
        .find(|node| node.tag_name().name() == "creationXml")
        .unwrap();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(creation.text_or_empty())
        .unwrap();

    let (capability, rest) = Fragment::unpack(&bytes).unwrap();
    let (init, rest) = Fragment::unpack(rest).unwrap();
    assert!(rest.is_empty());

    let capability = PsrpMessage::parse(&capability.data).unwrap();
    let init = PsrpMessage::parse(&init.data).unwrap();
    assert_eq!(capability.message_type, MessageType::SessionCapability);
    assert_eq!(init.message_type, MessageType::InitRunspacepool);
    assert_eq!(capability.rpid, session.shell_id());
    assert_eq!(init.pid, Uuid::nil());
}

#[test]
fn test_cancellation_sends_one_signal() {
    let mut replies = opening();
    replies.extend([command_ack(), timed_out(), signal_ack(), receive(&[], true)]);
    let (mut session, sent) = session(replies);
    session.open().unwrap();
    let token = session.cancellation_token();

    let mut output = session.run_command("Start-Sleep 600").unwrap();
    let command_id = output.command_id();
    assert_eq!(output.next().unwrap().unwrap(), OutputRecord::Timeout(1));

    token.cancel();
    assert!(output.next().is_none());
    drop(output);

    assert_eq!(
        actions(&sent)[3..],
        ["Command", "Receive", "Signal", "Receive"]
    );
    let signal = &sent.borrow()[5];
    assert!(signal.contains(&command_id.to_string().to_uppercase()));
    assert!(signal.contains("powershell/signal/crtl_c"));
    assert!(!token.is_cancelled());
}

#[test]
fn test_interrupt_without_command_sends_nothing() {
    let (mut session, sent) = session(opening());
    session.open().unwrap();

    session.interrupt().unwrap();
    assert_eq!(count(&sent, "Signal"), 0);
}

#[test]
fn test_output_interrupt_tolerates_fault() {
    let mut replies = opening();
    replies.extend([
        command_ack(),
        fault("w:InvalidSelectors", "gone"),
        receive(&[], true),
    ]);
    let (mut session, sent) = session(replies);
    session.open().unwrap();

    let mut output = session.run_command("x").unwrap();
    output.interrupt().unwrap();
    assert!(output.next().is_none());
    drop(output);
    assert_eq!(count(&sent, "Signal"), 1);
}

#[test]
fn test_run_to_string() {
    let stream = output_stream(
        1,
        &[
            (MessageType::PipelineOutput, "<S>Hello</S>"),
            (MessageType::PipelineOutput, "<S>World</S>"),
        ],
    );
    let mut replies = opening();
    replies.extend([
        command_ack(),
        timed_out(),
        receive(&[stream], true),
        command_ack(),
        fault("x", "boom"),
    ]);
    let (mut session, _sent) = session(replies);
    session.open().unwrap();

    assert_eq!(session.run_to_string("greet").unwrap(), "Hello\nWorld");
    assert!(matches!(
        session.run_to_string("explode"),
        Err(ClientError::CommandFailed(message)) if message == "boom"
    ));
}

#[test]
fn test_run_before_open_is_rejected() {
    let (mut session, sent) = session(Vec::new());
    assert!(matches!(session.run_command("x"), Err(ClientError::Protocol(_))));
    assert!(sent.borrow().is_empty());
}

#[test]
fn test_close_after_success_deletes_once() {
    let mut replies = opening();
    replies.extend([command_ack(), receive(&[], true), delete_ack()]);
    let (mut session, sent) = session(replies);
    session.open().unwrap();
    collect(session.run_command("x").unwrap());

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    drop(session);
    assert_eq!(count(&sent, "Delete"), 1);
}

#[test]
fn test_close_never_opened_deletes_once() {
    let (mut session, sent) = session(vec![delete_ack()]);
    session.close();
    drop(session);
    assert_eq!(actions(&sent), ["Delete"]);
}

#[test]
fn test_close_after_fatal_open_error() {
    // No replies at all: create fails with a transport error.
    let (mut session, sent) = session(Vec::new());
    assert!(matches!(session.open(), Err(ClientError::Transport(_))));

    session.close();
    drop(session);
    assert_eq!(actions(&sent), ["Create", "Delete"]);
}

#[test]
#[tracing_test::traced_test]
fn test_failed_delete_is_not_raised() {
    let replies = opening();
    let (mut session, sent) = session(replies);
    session.open().unwrap();

    // The script is exhausted, so the delete fails.
    session.close();
    assert_eq!(count(&sent, "Delete"), 1);
    assert!(logs_contain("shell deletion failed"));
}

#[test]
fn test_drop_closes_open_session() {
    let mut replies = opening();
    replies.push(fault("w:InvalidSelectors", "already gone"));
    let (mut session, sent) = session(replies);
    session.open().unwrap();

    drop(session);
    assert_eq!(count(&sent, "Delete"), 1);
}

#[test]
fn test_drop_of_unopened_session_sends_nothing() {
    let (session, sent) = session(Vec::new());
    drop(session);
    assert!(sent.borrow().is_empty());
}

#[test]
fn test_create_fault_fails_open() {
    let (mut session, sent) = session(vec![fault("w:AccessDenied", "Access is denied.")]);
    let error = session.open().unwrap_err();
    assert!(matches!(&error, ClientError::Protocol(text) if text.contains("Access is denied.")));
    assert_eq!(session.state(), SessionState::Unopened);
    drop(session);
    assert_eq!(actions(&sent), ["Create", "Delete"]);
}

#[test]
fn test_drop_after_failed_open_deletes() {
    let (mut session, sent) = session(Vec::new());
    assert!(matches!(session.open(), Err(ClientError::Transport(_))));

    drop(session);
    assert_eq!(actions(&sent), ["Create", "Delete"]);
}

/// Plays a Basic-authenticated listener that answers from a script.
struct BasicListener {
    replies: VecDeque<String>,
    authorizations: Rc<RefCell<Vec<String>>>,
}

impl HttpClient for BasicListener {
    fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.authorizations
            .borrow_mut()
            .push(request.header("Authorization").unwrap_or_default().to_owned());
        let body = self
            .replies
            .pop_front()
            .ok_or_else(|| ClientError::Transport("connection reset".into()))?;
        Ok(HttpResponse {
            status_code: 200,
            headers: Vec::new(),
            body: body.into_bytes(),
        })
    }
}

#[test]
fn test_session_over_basic_transport() {
    let mut replies = opening();
    replies.extend([
        command_ack(),
        receive(&[stdout_stream("over http")], true),
        delete_ack(),
    ]);
    let authorizations = Rc::new(RefCell::new(Vec::new()));
    let http = BasicListener {
        replies: replies.into(),
        authorizations: authorizations.clone(),
    };

    let config = config();
    let transport = WinRmTransport::new(http, &config, None).unwrap();
    assert_eq!(transport.url(), "http://web01:5985/wsman");

    let mut session = RunspaceSession::new(transport, &config);
    session.open().unwrap();
    assert_eq!(session.run_to_string("hostname").unwrap(), "over http");
    session.close();

    let authorizations = authorizations.borrow();
    assert_eq!(authorizations.len(), 6);
    assert!(authorizations.iter().all(|value| value == "Basic YWxpY2U6c2VjcmV0"));
}
