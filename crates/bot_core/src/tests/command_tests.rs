use super::*;
use crate::test_support::{drain_events, RecordingTransport, ScriptedCrypto, TransportCall};
use crate::GroupCrypto;

const BOT_NAME: &str = "james";
const ROOM: &str = "!ops:example.org";

fn dispatcher_for(transport: &Arc<RecordingTransport>, reporter: &Reporter) -> CommandDispatcher {
    let crypto: Arc<dyn GroupCrypto> = Arc::new(ScriptedCrypto::new());
    let sender = Arc::new(AdaptiveSender::new(
        transport.clone(),
        crypto,
        reporter.clone(),
    ));
    CommandDispatcher::new(transport.clone(), sender, BOT_NAME, reporter.clone())
}

#[test]
fn parses_command_after_name_and_separator() {
    assert_eq!(
        parse_command("james: ping", BOT_NAME),
        Some(ParsedCommand {
            command: Command::Ping,
            args: Vec::new(),
        })
    );
    assert_eq!(
        parse_command("  james: leave now please \n", BOT_NAME),
        Some(ParsedCommand {
            command: Command::Leave,
            args: vec!["now".into(), "please".into()],
        })
    );
}

#[test]
fn requires_name_immediately_followed_by_separator() {
    assert_eq!(parse_command("jamesping", BOT_NAME), None);
    assert_eq!(parse_command("james ping", BOT_NAME), None);
    assert_eq!(parse_command("james:ping", BOT_NAME), None);
    assert_eq!(parse_command("hey james: ping", BOT_NAME), None);
    assert_eq!(parse_command("ping", BOT_NAME), None);
}

#[test]
fn empty_command_after_prefix_yields_nothing() {
    assert_eq!(parse_command("james: ", BOT_NAME), None);
    assert_eq!(parse_command("james:    ", BOT_NAME), None);
}

#[test]
fn command_keys_are_case_sensitive() {
    assert_eq!(
        parse_command("james: PING", BOT_NAME).map(|parsed| parsed.command),
        Some(Command::Unknown("PING".into()))
    );
    assert_eq!(Command::from_key("logout"), Command::Logout);
    assert_eq!(Command::Unknown("dance".into()).name(), "dance");
}

#[tokio::test]
async fn ping_replies_pong_once_in_the_same_room() {
    let transport = Arc::new(RecordingTransport::new());
    let reporter = Reporter::new(16);
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("james: ping", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Handled);
    assert_eq!(
        transport.side_effects().await,
        vec![TransportCall::SendText {
            room: RoomId::from(ROOM),
            body: PING_REPLY.into(),
        }]
    );
}

#[tokio::test]
async fn ping_without_separator_dispatches_nothing() {
    let transport = Arc::new(RecordingTransport::new());
    let reporter = Reporter::new(16);
    let mut rx = reporter.subscribe();
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("jamesping", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Ignored);
    assert!(transport.calls().await.is_empty());
    assert!(drain_events(&mut rx).is_empty());
}

#[tokio::test]
async fn logout_terminates_after_successful_logout() {
    let transport = Arc::new(RecordingTransport::new());
    let reporter = Reporter::new(16);
    let mut rx = reporter.subscribe();
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("james: logout", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Shutdown);
    assert_eq!(transport.calls().await, vec![TransportCall::Logout]);
    let events = drain_events(&mut rx);
    assert_eq!(events.last(), Some(&BotEvent::LoggedOut));
}

#[tokio::test]
async fn logout_terminates_even_when_logout_call_fails() {
    let transport = Arc::new(RecordingTransport::new().failing("logout"));
    let reporter = Reporter::new(16);
    let mut rx = reporter.subscribe();
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("james: logout", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Shutdown);
    assert_eq!(transport.calls().await, vec![TransportCall::Logout]);
    assert!(matches!(
        drain_events(&mut rx).last(),
        Some(BotEvent::TransportFailure {
            operation: "logout",
            room: None,
            ..
        })
    ));
}

#[tokio::test]
async fn leave_leaves_the_originating_room_without_terminating() {
    let transport = Arc::new(RecordingTransport::new());
    let reporter = Reporter::new(16);
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("james: leave", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Handled);
    assert_eq!(
        transport.calls().await,
        vec![TransportCall::Leave(RoomId::from(ROOM))]
    );
}

#[tokio::test]
async fn leave_failure_is_reported_and_does_not_terminate() {
    let transport = Arc::new(RecordingTransport::new().failing("leave_room"));
    let reporter = Reporter::new(16);
    let mut rx = reporter.subscribe();
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("james: leave", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Handled);
    assert!(matches!(
        drain_events(&mut rx).last(),
        Some(BotEvent::TransportFailure {
            operation: "leave_room",
            ..
        })
    ));
}

#[tokio::test]
async fn unknown_commands_are_silently_ignored() {
    let transport = Arc::new(RecordingTransport::new());
    let reporter = Reporter::new(16);
    let mut rx = reporter.subscribe();
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("james: dance", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Ignored);
    assert!(transport.calls().await.is_empty());
    assert!(drain_events(&mut rx).is_empty());
}

#[tokio::test]
async fn failed_pong_is_not_answered_in_the_room() {
    let transport = Arc::new(RecordingTransport::new().failing("send_text"));
    let reporter = Reporter::new(16);
    let dispatcher = dispatcher_for(&transport, &reporter);

    let dispatch = dispatcher.handle("james: ping", &RoomId::from(ROOM)).await;

    assert_eq!(dispatch, Dispatch::Handled);
    assert_eq!(transport.side_effects().await.len(), 1);
}
