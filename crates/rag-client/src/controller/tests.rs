use std::sync::Arc;
use std::time::Duration;

use rag_common::{ClientError, SessionId};
use serde_json::json;
use tokio::sync::oneshot;

use super::pump::{ExchangeUpdate, UpdateKind};
use super::*;
use crate::testing::{sse, Reply, ScriptedTransport};
use crate::transport::{Method, StreamFeed, StreamHandle, StreamOutcome};
use crate::types::{ConversationReply, Role, Source};

fn controller() -> (Arc<ScriptedTransport>, SessionController) {
    controller_with(ControllerOptions::default())
}

fn controller_with(options: ControllerOptions) -> (Arc<ScriptedTransport>, SessionController) {
    let transport = Arc::new(ScriptedTransport::new());
    let controller = SessionController::new(transport.clone(), options);
    (transport, controller)
}

fn scripted_stream(transport: &ScriptedTransport) -> StreamFeed {
    let (feed, handle) = StreamHandle::channel();
    transport.push_stream(handle);
    feed
}

fn delta(text: &str) -> crate::SseEvent {
    sse(json!({"type": "delta", "text": text}))
}

fn done() -> crate::SseEvent {
    sse(json!({"type": "done"}))
}

/// Let spawned pumps run until the transport has seen `count` calls.
async fn wait_for_requests(transport: &ScriptedTransport, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.requests().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("transport was never called");
}

async fn next(controller: &mut SessionController) -> ControllerEvent {
    tokio::time::timeout(Duration::from_secs(5), controller.next_update())
        .await
        .expect("timed out waiting for update")
        .expect("no active exchange")
}

#[tokio::test]
async fn single_shot_binds_new_session() {
    let (transport, mut controller) = controller();
    transport.push_json(json!({"session_id": "s1", "answer": "X is...", "sources": []}));

    let generation = controller
        .send("What is X?", ExchangeMode::SingleShot)
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Sending);

    assert_eq!(next(&mut controller).await, ControllerEvent::Completed { generation });
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.session_id(), Some(&SessionId::from("s1")));

    let messages = controller.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "What is X?");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "X is...");
    assert!(messages[1].sources.is_empty());
    assert!(controller.session().updated_at.is_some());

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(requests[0].path, CONVERSATION_PATH);
    assert_eq!(
        requests[0].body,
        Some(json!({"question": "What is X?", "session_id": null}))
    );
}

#[tokio::test]
async fn follow_up_carries_bound_session_id() {
    let (transport, mut controller) = controller();
    transport.push_json(json!({"session_id": "s1", "answer": "first"}));
    transport.push_json(json!({"session_id": "s1", "answer": "second"}));

    controller
        .ask("one", ExchangeMode::SingleShot, |_| {})
        .await
        .unwrap();
    let answer = controller
        .ask("two", ExchangeMode::SingleShot, |_| {})
        .await
        .unwrap();

    assert_eq!(answer.content, "second");
    assert_eq!(controller.messages().len(), 4);
    assert_eq!(
        transport.requests()[1].body,
        Some(json!({"question": "two", "session_id": "s1"}))
    );
}

#[tokio::test]
async fn streaming_assembles_text_and_sources() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(delta("Hel"));
    feed.send(delta("lo"));
    feed.send(sse(json!({"type": "sources", "sources": [{"title": "doc1"}]})));
    feed.send(done());

    let generation = controller.send("Say hello", ExchangeMode::Streaming).unwrap();
    assert_eq!(controller.state(), ControllerState::Streaming);
    assert_eq!(controller.pending_message().map(|m| m.content.as_str()), Some(""));

    assert_eq!(
        next(&mut controller).await,
        ControllerEvent::Progress {
            generation,
            text: "Hel".into()
        }
    );
    assert_eq!(controller.pending_message().unwrap().content, "Hel");
    assert_eq!(
        next(&mut controller).await,
        ControllerEvent::Progress {
            generation,
            text: "Hello".into()
        }
    );
    assert_eq!(
        next(&mut controller).await,
        ControllerEvent::Progress {
            generation,
            text: "Hello".into()
        }
    );
    assert_eq!(controller.pending_message().unwrap().sources, vec![Source::titled("doc1")]);
    assert_eq!(next(&mut controller).await, ControllerEvent::Completed { generation });

    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.pending_message().is_none());
    let answer = &controller.messages()[1];
    assert_eq!(answer.content, "Hello");
    assert_eq!(answer.sources, vec![Source::titled("doc1")]);
    assert!(!answer.is_incomplete());
    assert_eq!(transport.requests()[0].path, CONVERSATION_STREAM_PATH);

    // Finishing the exchange closes the stream.
    tokio::time::timeout(Duration::from_secs(1), feed.closed())
        .await
        .expect("stream left open");
}

#[tokio::test]
async fn stream_binds_session_from_early_event() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(sse(json!({"type": "metadata", "session_id": "s9", "sources": []})));

    controller.send("hi", ExchangeMode::Streaming).unwrap();
    next(&mut controller).await;

    assert_eq!(controller.state(), ControllerState::Streaming);
    assert_eq!(controller.session_id(), Some(&SessionId::from("s9")));
}

#[tokio::test]
async fn send_while_busy_is_rejected() {
    let (transport, mut controller) = controller();
    transport.push_reply(Reply::Pending);

    controller.send("first", ExchangeMode::SingleShot).unwrap();
    assert_eq!(
        controller.send("second", ExchangeMode::SingleShot),
        Err(ClientError::Busy)
    );
    assert_eq!(
        controller.send("second", ExchangeMode::Streaming),
        Err(ClientError::Busy)
    );
    assert_eq!(controller.messages().len(), 1);
    assert_eq!(controller.generation(), 1);
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let (_transport, mut controller) = controller();
    assert_eq!(
        controller.send("   ", ExchangeMode::SingleShot),
        Err(ClientError::EmptyQuestion)
    );
    assert!(controller.messages().is_empty());
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[tokio::test]
async fn question_is_visible_before_any_io() {
    let (transport, mut controller) = controller();
    transport.push_reply(Reply::Pending);

    controller.send("Hold on", ExchangeMode::SingleShot).unwrap();

    assert_eq!(controller.messages().len(), 1);
    assert_eq!(controller.messages()[0].content, "Hold on");
    assert_eq!(controller.state(), ControllerState::Sending);
    assert!(controller.try_next_update().is_none());
}

#[tokio::test]
async fn cancel_while_streaming_discards_pending_and_late_events() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(delta("Hel"));

    controller.send("Say hello", ExchangeMode::Streaming).unwrap();
    next(&mut controller).await;
    assert_eq!(controller.pending_message().unwrap().content, "Hel");

    assert!(controller.cancel());
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.pending_message().is_none());
    assert_eq!(controller.messages().len(), 1);
    assert_eq!(controller.messages()[0].role, Role::User);

    tokio::time::timeout(Duration::from_secs(1), feed.closed())
        .await
        .expect("cancel should close the stream");
    feed.send(delta("lo"));
    feed.send(done());
    tokio::task::yield_now().await;

    assert!(controller.try_next_update().is_none());
    assert!(controller.next_update().await.is_none());
    assert_eq!(controller.messages().len(), 1);
    assert!(!controller.cancel());
}

#[tokio::test]
async fn update_for_cancelled_generation_is_a_no_op() {
    let (transport, mut controller) = controller();
    transport.push_reply(Reply::Pending);
    transport.push_reply(Reply::Pending);

    let old = controller.send("first", ExchangeMode::SingleShot).unwrap();
    wait_for_requests(&transport, 1).await;
    controller.cancel();
    let current = controller.send("second", ExchangeMode::SingleShot).unwrap();
    assert!(current > old);

    let late = ExchangeUpdate {
        generation: old,
        kind: UpdateKind::Reply(Ok(ConversationReply {
            session_id: Some(SessionId::from("s-old")),
            answer: "stale answer".into(),
            sources: Vec::new(),
        })),
    };
    assert!(controller.apply(late).is_none());

    let late_event = ExchangeUpdate {
        generation: old,
        kind: UpdateKind::Event(delta("ghost")),
    };
    assert!(controller.apply(late_event).is_none());

    assert_eq!(controller.stale_updates(), 2);
    assert_eq!(controller.state(), ControllerState::Sending);
    assert_eq!(controller.session_id(), None);
    assert_eq!(controller.messages().len(), 2);
    assert!(controller.messages().iter().all(|m| m.role == Role::User));
}

#[tokio::test]
async fn late_single_shot_reply_after_cancel_is_dropped() {
    let (transport, mut controller) = controller();
    let (gate, rx) = oneshot::channel();
    transport.push_reply(Reply::Gate(rx));

    controller.send("slow", ExchangeMode::SingleShot).unwrap();
    wait_for_requests(&transport, 1).await;
    controller.cancel();

    let _ = gate.send(Ok(json!({"session_id": "s1", "answer": "too late"})));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(controller.try_next_update().is_none());
    assert_eq!(controller.messages().len(), 1);
    assert_eq!(controller.session_id(), None);
}

#[tokio::test]
async fn load_unknown_session_leaves_transcript_unchanged() {
    let (transport, mut controller) = controller();
    transport.push_json(json!({"session_id": "s1", "answer": "X is..."}));
    transport.push_error(ClientError::Http {
        status: 404,
        body: "Session not found".into(),
    });

    controller
        .ask("What is X?", ExchangeMode::SingleShot, |_| {})
        .await
        .unwrap();
    let before = controller.transcript();

    let err = controller
        .load_session(&SessionId::from("missing"))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::NotFound("missing".into()));
    assert_eq!(controller.transcript(), before);
    assert_eq!(controller.session_id(), Some(&SessionId::from("s1")));
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[tokio::test]
async fn load_session_replaces_transcript() {
    let (transport, mut controller) = controller();
    transport.push_json(json!({
        "id": "s2",
        "title": "Earlier",
        "messages": [
            {"role": "user", "content": "q"},
            {"role": "assistant", "content": "a", "sources": [{"title": "doc1"}]}
        ]
    }));

    controller.load_session(&SessionId::from("s2")).await.unwrap();
    assert_eq!(controller.session_id(), Some(&SessionId::from("s2")));
    assert_eq!(controller.messages().len(), 2);
    assert_eq!(controller.session().title.as_deref(), Some("Earlier"));
    assert!(controller.directory().cached(&SessionId::from("s2")).is_some());
}

#[tokio::test]
async fn load_session_is_busy_while_in_flight() {
    let (transport, mut controller) = controller();
    transport.push_reply(Reply::Pending);
    controller.send("q", ExchangeMode::SingleShot).unwrap();

    assert_eq!(
        controller.load_session(&SessionId::from("s1")).await,
        Err(ClientError::Busy)
    );
    assert_eq!(controller.messages().len(), 1);
}

#[tokio::test]
async fn load_session_from_error_clears_it() {
    let (transport, mut controller) = controller();
    transport.push_error(ClientError::Network("down".into()));
    transport.push_json(json!({"id": "s3", "messages": []}));

    let _ = controller.ask("q", ExchangeMode::SingleShot, |_| {}).await;
    assert_eq!(controller.state(), ControllerState::Error);

    controller.load_session(&SessionId::from("s3")).await.unwrap();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.last_failure().is_none());
    assert!(controller.messages().is_empty());
}

#[tokio::test]
async fn new_session_cancels_and_clears() {
    let (transport, mut controller) = controller();
    transport.push_json(json!({"session_id": "s1", "answer": "a"}));
    transport.push_reply(Reply::Pending);

    controller
        .ask("q", ExchangeMode::SingleShot, |_| {})
        .await
        .unwrap();
    controller.send("again", ExchangeMode::SingleShot).unwrap();
    wait_for_requests(&transport, 2).await;

    controller.new_session();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.messages().is_empty());
    assert_eq!(controller.session_id(), None);

    transport.push_json(json!({"session_id": "s2", "answer": "fresh"}));
    controller.send("fresh", ExchangeMode::SingleShot).unwrap();
    next(&mut controller).await;
    assert_eq!(controller.session_id(), Some(&SessionId::from("s2")));
    assert_eq!(
        transport.requests()[2].body,
        Some(json!({"question": "fresh", "session_id": null}))
    );
}

#[tokio::test]
async fn error_event_keeps_partial_answer() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(delta("Par"));
    feed.send(sse(json!({"type": "error", "message": "model overloaded"})));

    let generation = controller.send("q", ExchangeMode::Streaming).unwrap();
    next(&mut controller).await;
    let failed = next(&mut controller).await;

    assert_eq!(
        failed,
        ControllerEvent::Failed {
            generation,
            error: ClientError::StreamFailed("model overloaded".into())
        }
    );
    assert_eq!(controller.state(), ControllerState::Error);
    let partial = &controller.messages()[1];
    assert_eq!(partial.content, "Par");
    assert!(partial.is_incomplete());

    assert_eq!(controller.send("retry", ExchangeMode::Streaming), Err(ClientError::Busy));
    assert_eq!(
        controller.dismiss_error(),
        Some(ClientError::StreamFailed("model overloaded".into()))
    );
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.dismiss_error(), None);
}

#[tokio::test]
async fn done_without_delta_is_empty_answer() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(done());

    let answer = controller
        .ask("q", ExchangeMode::Streaming, |_| panic!("no progress expected"))
        .await
        .unwrap();
    assert_eq!(answer.content, "");
    assert_eq!(answer.status, MessageStatus::Complete);
    assert_eq!(controller.messages().len(), 2);
}

#[tokio::test]
async fn stream_ending_early_is_incomplete() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(delta("half"));
    feed.finish(StreamOutcome::Completed);

    let err = controller
        .ask("q", ExchangeMode::Streaming, |_| {})
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::IncompleteStream);
    assert_eq!(controller.state(), ControllerState::Error);
    assert_eq!(controller.messages()[1].content, "half");
    assert!(controller.messages()[1].is_incomplete());
}

#[tokio::test]
async fn transport_failure_mid_stream_is_network_error() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.finish(StreamOutcome::Failed("connection reset".into()));

    let err = controller
        .ask("q", ExchangeMode::Streaming, |_| {})
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Network("connection reset".into()));
    // Nothing arrived, so no assistant message is kept.
    assert_eq!(controller.messages().len(), 1);
    assert_eq!(controller.last_failure(), Some(&err));
}

#[tokio::test]
async fn unopenable_stream_falls_back_to_single_shot() {
    let (transport, mut controller) = controller();
    transport.push_stream_error(ClientError::Http {
        status: 502,
        body: "bad gateway".into(),
    });
    transport.push_json(json!({"session_id": "s1", "answer": "from fallback"}));

    let generation = controller.send("q", ExchangeMode::Streaming).unwrap();
    match next(&mut controller).await {
        ControllerEvent::FellBack {
            generation: g,
            reason,
        } => {
            assert_eq!(g, generation);
            assert!(reason.contains("502"));
        }
        other => panic!("expected fallback, got {other:?}"),
    }
    assert_eq!(controller.state(), ControllerState::Sending);
    assert!(controller.pending_message().is_none());

    assert_eq!(next(&mut controller).await, ControllerEvent::Completed { generation });
    assert_eq!(controller.messages()[1].content, "from fallback");

    let paths: Vec<_> = transport.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec![CONVERSATION_STREAM_PATH, CONVERSATION_PATH]);
}

#[tokio::test]
async fn fallback_can_be_disabled() {
    let (transport, mut controller) = controller_with(ControllerOptions {
        fallback_to_single_shot: false,
        ..ControllerOptions::default()
    });
    transport.push_stream_error(ClientError::Network("refused".into()));

    let err = controller
        .ask("q", ExchangeMode::Streaming, |_| {})
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Network("refused".into()));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn open_failure_that_is_not_transport_does_not_fall_back() {
    let (transport, mut controller) = controller();
    transport.push_stream_error(ClientError::InvalidResponse("not a stream".into()));

    let err = controller
        .ask("q", ExchangeMode::Streaming, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn repeated_decode_errors_fail_the_exchange() {
    let (transport, mut controller) = controller_with(ControllerOptions {
        max_decode_errors: 2,
        ..ControllerOptions::default()
    });
    let feed = scripted_stream(&transport);
    feed.send(delta("ok"));
    feed.send(crate::SseEvent::data("not json"));
    feed.send(crate::SseEvent::data("still not json"));

    let err = controller
        .ask("q", ExchangeMode::Streaming, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::StreamDecode(_)));
    assert_eq!(controller.messages()[1].content, "ok");
}

#[tokio::test]
async fn single_shot_failure_enters_error() {
    let (transport, mut controller) = controller();
    transport.push_error(ClientError::Http {
        status: 500,
        body: "internal".into(),
    });

    let generation = controller.send("q", ExchangeMode::SingleShot).unwrap();
    let event = next(&mut controller).await;
    assert!(event.is_terminal());
    assert_eq!(event.generation(), generation);
    assert_eq!(controller.state(), ControllerState::Error);
    assert_eq!(controller.messages().len(), 1);
    assert_eq!(controller.last_failure().and_then(|e| e.status()), Some(500));

    assert!(!controller.cancel());
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.last_failure().is_none());
}

#[tokio::test]
async fn malformed_reply_is_invalid_response() {
    let (transport, mut controller) = controller();
    transport.push_json(json!({"session_id": "s1"}));

    let err = controller
        .ask("q", ExchangeMode::SingleShot, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

#[tokio::test]
async fn completion_invalidates_cached_list() {
    let (transport, mut controller) = controller();
    transport.push_json(json!([]));
    transport.push_json(json!({"session_id": "s1", "answer": "a"}));

    controller.directory_mut().list().await.unwrap();
    assert!(controller.directory().cached_list().is_some());

    controller
        .ask("q", ExchangeMode::SingleShot, |_| {})
        .await
        .unwrap();
    assert!(controller.directory().cached_list().is_none());
}

#[tokio::test]
async fn transcript_includes_pending_answer() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(delta("partial"));

    controller.send("q", ExchangeMode::Streaming).unwrap();
    next(&mut controller).await;

    let transcript = controller.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].content, "partial");
    assert_eq!(controller.messages().len(), 1);
}

#[test]
fn send_outside_runtime_fails_cleanly() {
    let (_transport, mut controller) = controller();
    let err = controller.send("q", ExchangeMode::SingleShot).unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
    assert!(controller.messages().is_empty());
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[tokio::test]
async fn dropping_controller_closes_open_stream() {
    let (transport, mut controller) = controller();
    let feed = scripted_stream(&transport);
    feed.send(delta("Hel"));

    controller.send("q", ExchangeMode::Streaming).unwrap();
    next(&mut controller).await;
    drop(controller);

    tokio::time::timeout(Duration::from_secs(1), feed.closed())
        .await
        .expect("stream left open after the controller went away");
}

#[tokio::test]
async fn dropping_controller_abandons_single_shot_request() {
    let (transport, mut controller) = controller();
    let (mut gate, rx) = oneshot::channel();
    transport.push_reply(Reply::Gate(rx));

    controller.send("q", ExchangeMode::SingleShot).unwrap();
    wait_for_requests(&transport, 1).await;
    drop(controller);

    tokio::time::timeout(Duration::from_secs(1), gate.closed())
        .await
        .expect("request still in flight after the controller went away");
}
