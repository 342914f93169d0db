use std::sync::Arc;

use game_content::{SealedRoundRules, sealed_round::TITLE};
use game_core::{
    Action, ActionChecksum, ActionId, Game, GameDocument, GameId, PlayerId, SubmitRequest,
    SubmitResponse, UndoError, UndoRequest,
};
use runtime::{
    ActionLogStore, CacheConsistencyService, EventBus, GameService, MemoryCacheBackend,
    MemoryDocumentStore, Notification, RuntimeConfig, RuntimeError, Topic,
};

struct Server {
    service: GameService,
    cache: Arc<MemoryCacheBackend>,
}

fn server(chunk_size: u64) -> Server {
    let config = RuntimeConfig::default().with_chunk_size(chunk_size);
    let cache = Arc::new(MemoryCacheBackend::new());
    let log = ActionLogStore::new(
        Arc::new(MemoryDocumentStore::new()),
        CacheConsistencyService::new(cache.clone(), &config),
        EventBus::with_capacity(config.event_buffer_size),
        config.chunk_size,
    );
    let service = GameService::new(Arc::new(log), Arc::new(SealedRoundRules::default()), config);
    Server { service, cache }
}

fn seats(names: &[&str]) -> Vec<PlayerId> {
    names.iter().copied().map(PlayerId::new).collect()
}

fn game_id() -> GameId {
    GameId::new("g1")
}

async fn start(service: &GameService, players: &[PlayerId]) -> Game {
    service
        .create_game(
            GameDocument::new("g1", TITLE, players.to_vec()),
            SealedRoundRules::initial_state(players),
        )
        .await
        .expect("game should be created")
}

async fn current(service: &GameService) -> Game {
    service.log().load_game(&game_id()).await.expect("game should load")
}

async fn submit(service: &GameService, action: Action) -> Result<SubmitResponse, RuntimeError> {
    service
        .submit_action(SubmitRequest {
            game_id: game_id(),
            action,
        })
        .await
}

/// A player submits a bid assuming the log ends at index 5 while two other
/// bids of the same round already landed at 5 and 6. The server commits the
/// bid at 7 and hands back the two bids it had missed.
#[tokio::test]
async fn test_submission_behind_group_members_gets_missing_actions() {
    let srv = server(3);
    let players = seats(&["alice", "bob", "carol", "dave"]);
    start(&srv.service, &players).await;

    for n in 0..5 {
        let game = current(&srv.service).await;
        let note = SealedRoundRules::note(&game, &format!("n{n}"), &players[0], "warming up");
        submit(&srv.service, note).await.expect("note should land");
    }

    let stale = current(&srv.service).await;
    let alice_bid = SealedRoundRules::bid(&stale, "a1", &players[0], 3);
    assert_eq!(alice_bid.index, 5);

    for (id, seat) in [("b1", 1), ("c1", 2)] {
        let game = current(&srv.service).await;
        let bid = SealedRoundRules::bid(&game, id, &players[seat], 2);
        submit(&srv.service, bid).await.expect("bid should land");
    }

    let response = submit(&srv.service, alice_bid).await.expect("late bid should land");
    let missing: Vec<u64> = response.missing_actions.iter().map(|a| a.index).collect();
    assert_eq!(missing, [5, 6]);
    assert_eq!(response.actions.len(), 1);
    assert_eq!(response.actions[0].index, 7);

    let log = srv.service.get_actions(&game_id(), 0, u64::MAX).await.unwrap();
    assert_eq!(log.len(), 8);
    assert_eq!(response.checksum, ActionChecksum::of_log(&log));
}

#[tokio::test]
async fn test_undo_redoes_other_group_member() {
    let srv = server(2);
    let players = seats(&["alice", "bob", "carol"]);
    let game = start(&srv.service, &players).await;

    submit(&srv.service, SealedRoundRules::bid(&game, "a1", &players[0], 5))
        .await
        .unwrap();
    let game = current(&srv.service).await;
    submit(&srv.service, SealedRoundRules::bid(&game, "b1", &players[1], 1))
        .await
        .unwrap();

    let mut undos = srv.service.events().subscribe(Topic::Undo);
    let response = srv
        .service
        .undo_action(UndoRequest {
            game_id: game_id(),
            action_id: ActionId::new("a1"),
            player_id: players[0].clone(),
        })
        .await
        .expect("undo should succeed");

    assert_eq!(response.undone_actions.len(), 2);
    assert_eq!(response.redone_actions.len(), 1);
    assert_eq!(response.redone_actions[0].id.as_str(), "b1-REDO-a1");
    assert_eq!(response.redone_actions[0].index, 0);

    let game = current(&srv.service).await;
    let log = srv.service.get_actions(&game_id(), 0, u64::MAX).await.unwrap();
    assert_eq!(game.state.action_checksum, ActionChecksum::of_log(&log));
    assert_eq!(response.checksum, game.state.action_checksum);
    assert!(game.state.active_player_ids.contains(&players[0]));
    assert!(!game.state.active_player_ids.contains(&players[1]));

    let notification = undos.recv().await.expect("undo notification");
    assert!(matches!(
        notification,
        Notification::ActionsUndone { ref redone_actions, .. } if redone_actions.len() == 1
    ));
}

#[tokio::test]
async fn test_undo_inside_three_player_group_is_refused() {
    let srv = server(200);
    let players = seats(&["alice", "bob", "carol", "dave"]);
    start(&srv.service, &players).await;
    for (id, seat) in [("a1", 0), ("b1", 1), ("c1", 2)] {
        let game = current(&srv.service).await;
        submit(&srv.service, SealedRoundRules::bid(&game, id, &players[seat], 1))
            .await
            .unwrap();
    }

    let err = srv
        .service
        .undo_action(UndoRequest {
            game_id: game_id(),
            action_id: ActionId::new("a1"),
            player_id: players[0].clone(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::UndoNotAllowed(UndoError::PartialGroupOverlap { players: 3 })
    ));
}

#[tokio::test]
async fn test_revealed_round_cannot_be_undone() {
    let srv = server(200);
    let players = seats(&["alice", "bob"]);
    start(&srv.service, &players).await;
    for (id, seat) in [("a1", 0), ("b1", 1)] {
        let game = current(&srv.service).await;
        submit(&srv.service, SealedRoundRules::bid(&game, id, &players[seat], 1))
            .await
            .unwrap();
    }

    let err = srv
        .service
        .undo_action(UndoRequest {
            game_id: game_id(),
            action_id: ActionId::new("b1"),
            player_id: players[1].clone(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::UndoNotAllowed(UndoError::RevealsInfo { .. })));
}

#[tokio::test]
async fn test_illegal_action_is_rejected_without_commit() {
    let srv = server(200);
    let players = seats(&["alice", "bob"]);
    let game = start(&srv.service, &players).await;

    let outsider = SealedRoundRules::note(&game, "x1", &PlayerId::new("mallory"), "hi");
    let err = submit(&srv.service, outsider).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Validation(_)));
    assert_eq!(current(&srv.service).await.state.action_count, 0);
}

#[tokio::test]
async fn test_appends_are_published() {
    let srv = server(200);
    let players = seats(&["alice", "bob"]);
    let game = start(&srv.service, &players).await;
    let mut appends = srv.service.events().subscribe(Topic::Append);

    submit(&srv.service, SealedRoundRules::note(&game, "n1", &players[0], "hello"))
        .await
        .unwrap();
    match appends.recv().await.expect("append notification") {
        Notification::ActionsAppended { game_id, actions } => {
            assert_eq!(game_id.as_str(), "g1");
            assert_eq!(actions[0].id.as_str(), "n1");
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

/// The cache is never on the critical path: with the backend down every
/// request still goes through against the store.
#[tokio::test]
async fn test_cache_outage_degrades_gracefully() {
    let srv = server(200);
    let players = seats(&["alice", "bob"]);
    let game = start(&srv.service, &players).await;
    srv.cache.set_available(false);

    submit(&srv.service, SealedRoundRules::note(&game, "n1", &players[0], "still here"))
        .await
        .expect("append should not depend on the cache");
    let view = srv.service.get_game(&game_id()).await.expect("read should fall through");
    assert_eq!(view.state.action_count, 1);

    srv.cache.set_available(true);
    let view = srv.service.get_game(&game_id()).await.unwrap();
    assert_eq!(view.state.action_count, 1);
}

#[tokio::test]
async fn test_unknown_game_is_not_found() {
    let srv = server(200);
    let err = srv.service.get_game(&GameId::new("nope")).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound { kind: "game", .. }));
}
