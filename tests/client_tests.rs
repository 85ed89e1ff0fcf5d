//! Integration-style client tests for the Reversi Client.
//!
//! Uses the shared fakes from `tests/common` (a scripted HTTP backend, an
//! in-process STOMP broker, memory storage and a recording navigator) to
//! drive `ReversiClient` end to end and verify the events it emits, the
//! requests it makes and the subscriptions it holds.

mod common;

use std::time::Duration;

use reversi_client::http::HttpResponse;
use reversi_client::intent::PendingIntentStore;
use reversi_client::{
    ClientEvent, GameType, Move, Outcome, PassPolicy, PendingIntent, PlayerColor, ReversiConfig,
    ReversiError,
};

use common::{
    cancel_path, drain, found_body, game_topic, join_path, match_topic, moves_path, next_event,
    possible_moves_path, progress_body, session_body, session_json, status_body, status_path,
    wait_for, Harness, AUTH_CHECK, ENQUEUE, SESSIONS,
};

/// Long enough for spawned fetches to land when asserting that nothing happened.
const SETTLE: Duration = Duration::from_millis(100);

fn black_creator() -> ReversiConfig {
    ReversiConfig::new().with_creator_color(PlayerColor::Black)
}

// ════════════════════════════════════════════════════════════════════
// Lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_closes_channels_and_stops() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await;
    harness.broker.wait_for_subscriber(&game_topic("g1")).await;

    client.shutdown().await;
    assert!(!client.is_running());
    assert_eq!(harness.broker.active(&game_topic("g1")), 0);

    let rest = drain(&mut events);
    assert_eq!(rest.last(), Some(&ClientEvent::Stopped));
    assert_eq!(events.recv().await, None);
    let err = tokio_test::assert_err!(client.create_session(GameType::PlayerVsComputer));
    assert!(matches!(err, ReversiError::NotRunning));
}

// ════════════════════════════════════════════════════════════════════
// Game sessions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn opponents_turn_renders_without_fetching_moves() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::GameEntered {
            session_id: "g1".into(),
            color: Some(PlayerColor::White),
        }
    );
    let ClientEvent::Rendered { view } = next_event(&mut events).await else {
        panic!("expected a render");
    };
    assert!(view.highlights.is_empty());
    assert_eq!(view.active_color, Some(PlayerColor::Black));
    assert_eq!(view.local_color, Some(PlayerColor::White));
    assert!(!view.is_local_turn());
    assert_eq!((view.black_score, view.white_score), (2, 2));
    assert_eq!(view.black_name, "bob");
    assert_eq!(view.white_name, "alice");

    harness.broker.wait_for_subscriber(&game_topic("g1")).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.backend.calls(&possible_moves_path("g1")), 0);

    let create = harness.backend.requests().remove(0);
    assert_eq!(
        create.path_and_query(),
        "/api/v1/sessions?gameType=PLAYER_VS_COMPUTER&color=WHITE"
    );
    client.shutdown().await;
}

#[tokio::test]
async fn local_turn_highlights_legal_moves() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    harness.backend.ok(
        &possible_moves_path("g1"),
        r#"[{"row":2,"column":3},{"row":2,"column":3},{"row":9,"column":9},{"row":3,"column":2}]"#,
    );
    let (mut client, mut events) = harness.start(black_creator());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    let ClientEvent::Rendered { view: plain } =
        wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await
    else {
        unreachable!()
    };
    assert!(plain.highlights.is_empty());

    let ClientEvent::Rendered { view } = next_event(&mut events).await else {
        panic!("expected a highlighted render");
    };
    assert_eq!(view.token, plain.token);
    assert_eq!(view.highlights, vec![Move::new(2, 3), Move::new(3, 2)]);
    assert!(view.is_highlighted(2, 3));
    assert!(!view.is_highlighted(9, 9));

    let fetch = harness
        .backend
        .requests()
        .into_iter()
        .find(|r| r.path == possible_moves_path("g1"))
        .unwrap();
    assert_eq!(fetch.query, vec![("color".to_string(), "BLACK".to_string())]);
    client.shutdown().await;
}

#[tokio::test]
async fn stale_legal_moves_are_discarded() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    harness.backend.gate(&possible_moves_path("g1"));
    harness
        .backend
        .ok(&possible_moves_path("g1"), r#"[{"row":2,"column":3}]"#);
    let (mut client, mut events) = harness.start(black_creator());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    let ClientEvent::Rendered { view: first } =
        wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await
    else {
        unreachable!()
    };
    harness.backend.wait_for_calls(&possible_moves_path("g1"), 1).await;

    // A newer snapshot arrives while the fetch is still in flight.
    harness.broker.wait_for_subscriber(&game_topic("g1")).await;
    assert_eq!(
        harness
            .broker
            .publish(&game_topic("g1"), &progress_body("g1", "WHITE", "IN_PROGRESS")),
        1
    );
    let ClientEvent::Rendered { view: second } = next_event(&mut events).await else {
        panic!("expected a render for the pushed snapshot");
    };
    assert!(second.token > first.token);
    assert_eq!(second.active_color, Some(PlayerColor::White));

    harness.backend.release(&possible_moves_path("g1"));
    tokio::time::sleep(SETTLE).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(harness.backend.calls(&possible_moves_path("g1")), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn game_over_is_announced_once() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await;
    harness.broker.wait_for_subscriber(&game_topic("g1")).await;

    let finished = progress_body("g1", "WHITE", "BLACK_WINS");
    harness.broker.publish(&game_topic("g1"), &finished);
    let ClientEvent::Rendered { view } = next_event(&mut events).await else {
        panic!("expected a render");
    };
    assert_eq!(view.outcome, Some(Outcome::BlackWins));
    assert!(!view.is_local_turn());
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::GameOver {
            session_id: "g1".into(),
            outcome: Outcome::BlackWins,
        }
    );

    harness.broker.publish(&game_topic("g1"), &finished);
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Rendered { .. }
    ));
    tokio::time::sleep(SETTLE).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(harness.backend.calls(&possible_moves_path("g1")), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn pushes_for_other_sessions_and_malformed_pushes_are_ignored() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await;
    let topic = game_topic("g1");
    harness.broker.wait_for_subscriber(&topic).await;

    harness
        .broker
        .publish(&topic, &progress_body("g2", "WHITE", "IN_PROGRESS"));
    harness.broker.publish(
        &topic,
        r#"{"sessionSummary":{"sessionId":"g1","board":{"boardCells":[["B"],["W","B"]]}}}"#,
    );
    harness.broker.publish(&topic, "not json");
    harness
        .broker
        .publish(&topic, &progress_body("g1", "WHITE", "IN_PROGRESS"));

    let ClientEvent::Rendered { view } = next_event(&mut events).await else {
        panic!("expected a render");
    };
    assert_eq!(view.session_id, "g1");
    assert_eq!(view.active_color, Some(PlayerColor::White));
    assert_eq!(
        client.current_snapshot().await.unwrap().current_turn(),
        Some(PlayerColor::White)
    );
    client.shutdown().await;
}

#[tokio::test]
async fn entering_a_new_game_supersedes_the_old_subscription() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    harness
        .backend
        .ok(&join_path("g2"), session_body("g2", "WHITE", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    harness.broker.wait_for_subscriber(&game_topic("g1")).await;

    tokio_test::assert_ok!(client.join_session(" g2 "));
    assert_eq!(
        wait_for(&mut events, |e| matches!(
            e,
            ClientEvent::GameEntered { session_id, .. } if session_id == "g2"
        ))
        .await,
        ClientEvent::GameEntered {
            session_id: "g2".into(),
            color: Some(PlayerColor::Black),
        }
    );
    harness.broker.wait_for_subscriber(&game_topic("g2")).await;
    assert_eq!(harness.broker.active(&game_topic("g1")), 0);
    assert_eq!(client.client_color().await, Some(PlayerColor::Black));
    client.shutdown().await;
}

#[tokio::test]
async fn leave_game_clears_state_and_unsubscribes() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    harness.broker.wait_for_subscriber(&game_topic("g1")).await;

    client.leave_game().unwrap();
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::GameLeft { .. })).await,
        ClientEvent::GameLeft {
            session_id: Some("g1".into())
        }
    );
    assert_eq!(harness.broker.active(&game_topic("g1")), 0);
    assert!(client.current_snapshot().await.is_none());
    assert_eq!(client.client_color().await, None);
    client.shutdown().await;
}

#[tokio::test]
async fn failed_join_reports_an_error() {
    let harness = Harness::new();
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.join_session("missing").unwrap();
    let ClientEvent::Error { message } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert!(message.contains("join session"), "{message}");
    assert!(client.current_snapshot().await.is_none());
    assert_eq!(harness.broker.connections(), 0);
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Moves
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn play_submits_a_move_on_the_local_turn() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    harness.backend.ok(&possible_moves_path("g1"), "[]");
    harness.backend.ok(&moves_path("g1"), r#"{"message":"ok"}"#);
    let (mut client, mut events) = harness.start(black_creator());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await;

    client.play(2, 3).unwrap();
    harness.backend.wait_for_calls(&moves_path("g1"), 1).await;
    let submitted = harness
        .backend
        .requests()
        .into_iter()
        .find(|r| r.path == moves_path("g1"))
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(submitted.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["sessionId"], "g1");
    assert_eq!(body["row"], 2);
    assert_eq!(body["column"], 3);
    assert_eq!(body["color"], "BLACK");
    assert!(body.get("pass").is_none());
    client.shutdown().await;
}

#[tokio::test]
async fn play_out_of_turn_or_off_board_sends_nothing() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await;

    client.play(2, 3).unwrap();
    client.play(8, 0).unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.backend.calls(&moves_path("g1")), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn no_legal_moves_waits_for_a_push_by_default() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    harness.backend.ok(&possible_moves_path("g1"), "[]");
    let (mut client, mut events) = harness.start(black_creator());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    harness.backend.wait_for_calls(&possible_moves_path("g1"), 1).await;
    tokio::time::sleep(SETTLE).await;

    let renders = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ClientEvent::Rendered { .. }))
        .count();
    assert_eq!(renders, 1);
    assert_eq!(harness.backend.calls(&moves_path("g1")), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn no_legal_moves_passes_under_auto_pass() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    harness.backend.ok(&possible_moves_path("g1"), "[]");
    harness.backend.ok(&moves_path("g1"), "");
    let (mut client, _events) =
        harness.start(black_creator().with_pass_policy(PassPolicy::AutoPass));

    client.create_session(GameType::PlayerVsComputer).unwrap();
    harness.backend.wait_for_calls(&moves_path("g1"), 1).await;
    let pass = harness
        .backend
        .requests()
        .into_iter()
        .find(|r| r.path == moves_path("g1"))
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(pass.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["pass"], true);
    assert_eq!(body["color"], "BLACK");
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Matchmaking
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn found_by_push_and_poll_transitions_once() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.gate(&status_path("t1"));
    harness.backend.ok(&status_path("t1"), found_body("g7", "BLACK"));
    harness.backend.ok(&possible_moves_path("g7"), "[]");
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingSearching);
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::MatchmakingQueued {
            ticket_id: "t1".into()
        }
    );
    assert_eq!(client.matchmaking_ticket().await.as_deref(), Some("t1"));

    harness.broker.wait_for_subscriber(&match_topic("t1")).await;
    harness
        .broker
        .publish(&match_topic("t1"), &found_body("g7", "BLACK"));

    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::MatchmakingFound {
            ticket_id: "t1".into(),
            session_id: "g7".into(),
            color: Some(PlayerColor::Black),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::GameEntered {
            session_id: "g7".into(),
            color: Some(PlayerColor::Black),
        }
    );
    harness.broker.wait_for_subscriber(&game_topic("g7")).await;

    // The status poll lands late with the same FOUND.
    harness.backend.release(&status_path("t1"));
    tokio::time::sleep(SETTLE).await;
    let late = drain(&mut events);
    assert!(
        !late.iter().any(|e| matches!(
            e,
            ClientEvent::MatchmakingFound { .. } | ClientEvent::GameEntered { .. }
        )),
        "{late:?}"
    );

    assert_eq!(harness.broker.subscribe_count(&game_topic("g7")), 1);
    assert_eq!(harness.broker.active(&match_topic("t1")), 0);
    assert_eq!(client.matchmaking_ticket().await, None);
    assert_eq!(client.client_color().await, Some(PlayerColor::Black));
    client.shutdown().await;
}

#[tokio::test]
async fn found_by_poll_alone_enters_the_game() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), found_body("g7", "WHITE"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(Some(PlayerColor::White)).unwrap();
    let found = wait_for(&mut events, |e| {
        matches!(e, ClientEvent::MatchmakingFound { .. })
    })
    .await;
    assert_eq!(
        found,
        ClientEvent::MatchmakingFound {
            ticket_id: "t1".into(),
            session_id: "g7".into(),
            color: Some(PlayerColor::White),
        }
    );
    harness.broker.wait_for_subscriber(&game_topic("g7")).await;
    harness.broker.wait_for_no_subscriber(&match_topic("t1")).await;

    let enqueue = harness
        .backend
        .requests()
        .into_iter()
        .find(|r| r.path == ENQUEUE)
        .unwrap();
    assert_eq!(enqueue.body.as_deref(), Some(r#"{"preferredColor":"WHITE"}"#));
    client.shutdown().await;
}

#[tokio::test]
async fn cancel_without_ticket_dismisses() {
    let harness = Harness::new();
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.cancel_matchmaking().unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingDismissed);
    assert!(harness.backend.requests().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn cancel_with_ticket_tears_down_even_if_the_service_fails() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), status_body("WAITING"));
    harness
        .backend
        .route(&cancel_path("t1"), HttpResponse::new(500, ""));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::MatchmakingQueued { .. })).await;
    harness.broker.wait_for_subscriber(&match_topic("t1")).await;

    client.cancel_matchmaking().unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::MatchmakingCanceled {
            ticket_id: "t1".into()
        }
    );
    assert_eq!(harness.backend.calls(&cancel_path("t1")), 1);
    assert_eq!(harness.broker.active(&match_topic("t1")), 0);
    assert_eq!(client.matchmaking_ticket().await, None);

    client.cancel_matchmaking().unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingDismissed);
    client.shutdown().await;
}

#[tokio::test]
async fn expired_push_ends_the_ticket() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), status_body("QUEUED"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    harness.broker.wait_for_subscriber(&match_topic("t1")).await;
    harness
        .broker
        .publish(&match_topic("t1"), &status_body("EXPIRED"));

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::MatchmakingExpired { .. })).await,
        ClientEvent::MatchmakingExpired {
            ticket_id: "t1".into()
        }
    );
    harness.broker.wait_for_no_subscriber(&match_topic("t1")).await;
    assert_eq!(client.matchmaking_ticket().await, None);
    client.shutdown().await;
}

#[tokio::test]
async fn second_find_match_while_queued_is_ignored() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), status_body("WAITING"));
    harness.backend.ok(&cancel_path("t1"), "");
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::MatchmakingQueued { .. })).await;

    client.find_match(None).unwrap();
    client.cancel_matchmaking().unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::MatchmakingCanceled {
            ticket_id: "t1".into()
        }
    );
    assert_eq!(harness.backend.calls(ENQUEUE), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn failed_enqueue_shows_a_retry_message() {
    let harness = Harness::new();
    harness.backend.route(ENQUEUE, HttpResponse::new(503, ""));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingSearching);
    let ClientEvent::MatchmakingFailed { message } = next_event(&mut events).await else {
        panic!("expected MatchmakingFailed");
    };
    assert!(message.contains("try again"), "{message}");
    assert_eq!(client.matchmaking_ticket().await, None);
    assert_eq!(harness.broker.connections(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn found_without_any_color_plays_the_creator_color() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    let found = serde_json::json!({
        "status": "FOUND",
        "gameSession": session_json("g7", "BLACK", "IN_PROGRESS")
    });
    harness.backend.ok(&status_path("t1"), found.to_string());
    harness.backend.ok(&possible_moves_path("g7"), "[]");
    let (mut client, mut events) = harness.start(black_creator());

    client.find_match(None).unwrap();
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::MatchmakingFound { .. })).await,
        ClientEvent::MatchmakingFound {
            ticket_id: "t1".into(),
            session_id: "g7".into(),
            color: Some(PlayerColor::Black),
        }
    );
    assert_eq!(client.client_color().await, Some(PlayerColor::Black));
    harness.backend.wait_for_calls(&possible_moves_path("g7"), 1).await;
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Terminal notifications
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn game_over_survives_a_full_event_channel() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "BLACK_WINS"));
    let (mut client, mut events) =
        harness.start(ReversiConfig::new().with_event_channel_capacity(1));

    client.create_session(GameType::PlayerVsComputer).unwrap();
    // Nobody reads while the loop renders: the render is dropped, the
    // game-over waits for room.
    tokio::time::sleep(SETTLE).await;

    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::GameEntered { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::GameOver {
            session_id: "g1".into(),
            outcome: Outcome::BlackWins,
        }
    );
    client.shutdown().await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Stopped);
}

#[tokio::test]
async fn matchmaking_end_survives_a_full_event_channel() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), status_body("EXPIRED"));
    let (mut client, mut events) =
        harness.start(ReversiConfig::new().with_event_channel_capacity(1));

    client.find_match(None).unwrap();
    harness.backend.wait_for_calls(&status_path("t1"), 1).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingSearching);
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::MatchmakingExpired {
            ticket_id: "t1".into()
        }
    );
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Channel failures
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn refused_matchmaking_channel_still_finds_by_poll() {
    let harness = Harness::new();
    harness.broker.refuse_connections(true);
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), found_body("g7", "WHITE"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::MatchmakingFound { .. })).await,
        ClientEvent::MatchmakingFound {
            ticket_id: "t1".into(),
            session_id: "g7".into(),
            color: Some(PlayerColor::White),
        }
    );
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::GameEntered { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Rendered { .. }
    ));

    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.backend.calls(&status_path("t1")), 1);
    assert_eq!(harness.broker.subscribe_count(&match_topic("t1")), 0);
    assert_eq!(client.matchmaking_ticket().await, None);
    client.shutdown().await;
}

#[tokio::test]
async fn lost_matchmaking_channel_polls_exactly_once_more() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), status_body("WAITING"));
    harness.backend.ok(&status_path("t1"), status_body("WAITING"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::MatchmakingQueued { .. })).await;
    harness.broker.wait_for_subscriber(&match_topic("t1")).await;
    harness.backend.wait_for_calls(&status_path("t1"), 1).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.broker.sever(&match_topic("t1")), 1);
    harness.backend.wait_for_calls(&status_path("t1"), 2).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.backend.calls(&status_path("t1")), 2);
    assert_eq!(harness.broker.subscribe_count(&match_topic("t1")), 1);
    assert_eq!(client.matchmaking_ticket().await.as_deref(), Some("t1"));
    assert!(drain(&mut events).is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn lost_matchmaking_channel_poll_can_resolve_the_ticket() {
    let harness = Harness::new();
    harness.backend.ok(ENQUEUE, r#""t1""#);
    harness.backend.ok(&status_path("t1"), status_body("WAITING"));
    harness.backend.ok(&status_path("t1"), found_body("g7", "BLACK"));
    harness.backend.ok(&possible_moves_path("g7"), "[]");
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(None).unwrap();
    harness.broker.wait_for_subscriber(&match_topic("t1")).await;
    harness.backend.wait_for_calls(&status_path("t1"), 1).await;
    tokio::time::sleep(SETTLE).await;

    harness.broker.sever(&match_topic("t1"));
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::MatchmakingFound { .. })).await,
        ClientEvent::MatchmakingFound {
            ticket_id: "t1".into(),
            session_id: "g7".into(),
            color: Some(PlayerColor::Black),
        }
    );
    harness.broker.wait_for_subscriber(&game_topic("g7")).await;
    assert_eq!(harness.backend.calls(&status_path("t1")), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn refused_game_channel_renders_without_reconnecting() {
    let harness = Harness::new();
    harness.broker.refuse_connections(true);
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::GameEntered { .. }
    ));
    let ClientEvent::Rendered { view } = next_event(&mut events).await else {
        panic!("expected a render");
    };
    assert_eq!((view.black_score, view.white_score), (2, 2));

    harness.broker.refuse_connections(false);
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.broker.connections(), 1);
    let update = progress_body("g1", "WHITE", "IN_PROGRESS");
    assert_eq!(harness.broker.publish(&game_topic("g1"), &update), 0);
    let snapshot = client.current_snapshot().await.unwrap();
    assert_eq!(snapshot.session_id(), "g1");
    assert!(client.is_running());
    client.shutdown().await;
}

#[tokio::test]
async fn lost_game_channel_is_not_reconnected() {
    let harness = Harness::new();
    harness.backend.ok(SESSIONS, session_body("g1", "BLACK", "IN_PROGRESS"));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsComputer).unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Rendered { .. })).await;
    harness.broker.wait_for_subscriber(&game_topic("g1")).await;

    assert_eq!(harness.broker.sever(&game_topic("g1")), 1);
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.broker.connections(), 1);
    assert_eq!(harness.broker.subscribe_count(&game_topic("g1")), 1);
    assert!(drain(&mut events).is_empty());
    assert!(client.current_snapshot().await.is_some());
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Login redirects and pending intents
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unauthorized_enqueue_saves_intent_and_redirects() {
    let harness = Harness::new();
    harness.backend.route(ENQUEUE, HttpResponse::new(401, ""));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.find_match(Some(PlayerColor::White)).unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingSearching);
    tokio::time::timeout(common::WAIT, async {
        while harness.navigator.visited().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    client.shutdown().await;

    assert_eq!(harness.navigator.visited(), vec!["/login?next=%2Fplay"]);
    // Silent: no failure event between the redirect and shutdown.
    assert_eq!(drain(&mut events), vec![ClientEvent::Stopped]);
    assert_eq!(
        PendingIntentStore::new(harness.storage.clone()).consume(),
        Some(PendingIntent::EnqueueMatchmaking {
            preferred_color: Some(PlayerColor::White)
        })
    );
}

#[tokio::test]
async fn pending_intent_is_replayed_once_across_restarts() {
    let harness = Harness::new();
    PendingIntentStore::new(harness.storage.clone())
        .save(&PendingIntent::JoinSession {
            session_id: "g1".into(),
        })
        .unwrap();
    harness
        .backend
        .ok(&join_path("g1"), session_body("g1", "WHITE", "IN_PROGRESS"));

    let (mut first, mut events) = harness.start(ReversiConfig::new());
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::IntentResumed {
            description: "join session g1".into()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::GameEntered {
            session_id: "g1".into(),
            color: Some(PlayerColor::Black),
        }
    );
    first.shutdown().await;

    let (mut second, mut events) = harness.start(ReversiConfig::new());
    second.shutdown().await;
    assert_eq!(drain(&mut events), vec![ClientEvent::Stopped]);
    assert_eq!(harness.backend.calls(&join_path("g1")), 1);
    assert!(!PendingIntentStore::new(harness.storage.clone()).is_pending());
}

#[tokio::test]
async fn redirect_then_replay_after_login() {
    let harness = Harness::new();
    harness.backend.route(ENQUEUE, HttpResponse::new(401, ""));
    harness.backend.ok(ENQUEUE, r#""t9""#);
    harness.backend.ok(&status_path("t9"), status_body("WAITING"));

    let (mut before_login, mut events) = harness.start(ReversiConfig::new());
    before_login.find_match(None).unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingSearching);
    harness.backend.wait_for_calls(ENQUEUE, 1).await;
    before_login.shutdown().await;
    assert_eq!(harness.navigator.visited().len(), 1);

    // The user logs in and lands back on the page.
    let (mut after_login, mut events) = harness.start(ReversiConfig::new());
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::IntentResumed {
            description: "find a match".into()
        }
    );
    assert_eq!(next_event(&mut events).await, ClientEvent::MatchmakingSearching);
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::MatchmakingQueued {
            ticket_id: "t9".into()
        }
    );
    after_login.shutdown().await;
    assert_eq!(harness.navigator.visited().len(), 1);
}

#[tokio::test]
async fn show_matchmaking_redirect_by_final_url() {
    let harness = Harness::new();
    harness.backend.route(
        AUTH_CHECK,
        HttpResponse::new(200, "<html>login</html>").redirected("http://localhost:8080/login"),
    );
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.show_matchmaking().unwrap();
    harness.backend.wait_for_calls(AUTH_CHECK, 1).await;
    tokio::time::sleep(SETTLE).await;
    client.shutdown().await;

    assert_eq!(drain(&mut events), vec![ClientEvent::Stopped]);
    assert_eq!(harness.navigator.visited(), vec!["/login?next=%2Fplay"]);
    assert_eq!(
        PendingIntentStore::new(harness.storage.clone()).consume(),
        Some(PendingIntent::ShowMatchmakingDialog)
    );
}

#[tokio::test]
async fn unauthorized_pvp_create_saves_intent() {
    let harness = Harness::new();
    harness.backend.route(SESSIONS, HttpResponse::new(403, ""));
    let (mut client, mut events) = harness.start(ReversiConfig::new());

    client.create_session(GameType::PlayerVsPlayer).unwrap();
    harness.backend.wait_for_calls(SESSIONS, 1).await;
    tokio::time::sleep(SETTLE).await;
    client.shutdown().await;

    assert_eq!(drain(&mut events), vec![ClientEvent::Stopped]);
    assert_eq!(
        PendingIntentStore::new(harness.storage.clone()).consume(),
        Some(PendingIntent::CreateSession {
            game_type: GameType::PlayerVsPlayer
        })
    );
}
