use std::sync::Arc;

use serde_json::Value;

use game_core::{
    Action, ActionChecksum, ActionId, GameDocument, GameId, GameState, GameStatus, PlayerId,
};
use runtime::repository::{AppendContext, AppendDecision, AppendPlan, MissingActions, UndoContext, UndoDecision};
use runtime::{
    ActionLogStore, CacheConsistencyService, CacheKeys, EventBus, MemoryCacheBackend,
    MemoryDocumentStore, Notification, RuntimeConfig, RuntimeError, Topic,
};

struct Fixture {
    log: ActionLogStore,
    store: Arc<MemoryDocumentStore>,
    cache: Arc<MemoryCacheBackend>,
}

fn fixture(chunk_size: u64) -> Fixture {
    let config = RuntimeConfig::default().with_chunk_size(chunk_size);
    let store = Arc::new(MemoryDocumentStore::new());
    let cache = Arc::new(MemoryCacheBackend::new());
    let log = ActionLogStore::new(
        store.clone(),
        CacheConsistencyService::new(cache.clone(), &config),
        EventBus::new(),
        chunk_size,
    );
    Fixture { log, store, cache }
}

fn game_id() -> GameId {
    GameId::new("g1")
}

fn document() -> GameDocument {
    GameDocument::new("g1", "notes", vec![PlayerId::new("alice"), PlayerId::new("bob")])
}

fn note(id: &str, player: &str) -> Action {
    Action::user(id, "g1", player, "note", Value::Null)
}

fn proceed(_: &AppendContext<'_>) -> Result<AppendDecision, RuntimeError> {
    Ok(AppendDecision::proceed())
}

fn keep(_: &UndoContext<'_>) -> Result<UndoDecision, RuntimeError> {
    Ok(UndoDecision::Proceed(Vec::new()))
}

/// State after appending `actions` at the tail of `state`.
fn advanced(state: &GameState, actions: &[Action]) -> GameState {
    let indexed: Vec<Action> = actions
        .iter()
        .cloned()
        .zip(state.action_count..)
        .map(|(action, index)| action.at_index(index))
        .collect();
    let mut next = state.clone();
    next.action_checksum = state.action_checksum.fold_actions(&indexed);
    next.action_count += actions.len() as u64;
    next
}

async fn create(log: &ActionLogStore) {
    log.create_game(document(), GameState::new(Vec::new(), Value::Null))
        .await
        .expect("game should be created");
}

async fn append(log: &ActionLogStore, actions: Vec<Action>) -> Vec<Action> {
    let game = log.load_game(&game_id()).await.expect("game should load");
    let new_state = advanced(&game.state, &actions);
    log.append_actions(&game_id(), actions, new_state, &proceed)
        .await
        .expect("append should commit")
        .expect("append should not be cancelled")
        .actions
}

/// Range reads return exactly the requested slice for chunk sizes that do and
/// do not divide the log, including ranges that straddle chunk boundaries and
/// run past the tail.
#[tokio::test]
async fn test_range_reads_match_log_for_any_chunk_size() {
    for chunk_size in [1, 7, 200] {
        let fx = fixture(chunk_size);
        create(&fx.log).await;

        let mut full = Vec::new();
        let mut next = 0;
        for batch in [1, 6, 13, 25] {
            let actions = (next..next + batch)
                .map(|n| note(&format!("a{n}"), if n % 2 == 0 { "alice" } else { "bob" }))
                .collect();
            full.extend(append(&fx.log, actions).await);
            next += batch;
        }
        assert_eq!(full.len(), 45);

        for start in [0u64, 1, 6, 7, 13, 20, 44] {
            for end in [start, start + 1, start + 7, start + 15, 45, 60] {
                let got = fx
                    .log
                    .find_action_range_for_game(&game_id(), start, end)
                    .await
                    .expect("range read should succeed");
                let expected = &full[start as usize..end.min(45) as usize];
                assert_eq!(got, expected, "chunk size {chunk_size}, range [{start}, {end})");
            }
        }

        let state = fx.log.load_game(&game_id()).await.unwrap().state;
        assert_eq!(state.action_checksum, ActionChecksum::of_log(&full));
    }
}

#[tokio::test]
async fn test_append_assigns_indices_from_store_tail() {
    let fx = fixture(3);
    create(&fx.log).await;
    append(&fx.log, vec![note("a0", "alice"), note("a1", "bob")]).await;

    // The caller's indices are ignored.
    let appended = append(&fx.log, vec![note("a2", "alice").at_index(99)]).await;
    assert_eq!(appended[0].index, 2);
}

#[tokio::test]
async fn test_stale_new_state_is_a_retryable_collision() {
    let fx = fixture(200);
    create(&fx.log).await;
    let before = fx.log.load_game(&game_id()).await.unwrap().state;
    append(&fx.log, vec![note("a0", "alice")]).await;

    // Computed against the state before a0 landed.
    let actions = vec![note("b0", "bob")];
    let stale_state = advanced(&before, &actions);
    let err = fx
        .log
        .append_actions(&game_id(), actions, stale_state, &proceed)
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "expected collision, got {err}");
}

#[tokio::test]
async fn test_checksum_mismatch_is_not_retryable() {
    let fx = fixture(200);
    create(&fx.log).await;
    let state = fx.log.load_game(&game_id()).await.unwrap().state;

    let mut wrong = advanced(&state, &[note("a0", "alice")]);
    wrong.action_checksum = ActionChecksum(7);
    let err = fx
        .log
        .append_actions(&game_id(), vec![note("a0", "alice")], wrong, &proceed)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ChecksumMismatch { .. }));
    assert!(!err.is_retryable());

    let reloaded = fx.log.load_game(&game_id()).await.unwrap();
    assert_eq!(reloaded.state.action_count, 0);
}

#[tokio::test]
async fn test_cancelled_append_leaves_log_untouched() {
    let fx = fixture(200);
    create(&fx.log).await;
    let commits = fx.store.commit_count();
    let state = fx.log.load_game(&game_id()).await.unwrap().state;

    let cancel = |_: &AppendContext<'_>| Ok::<_, RuntimeError>(AppendDecision::Cancel);
    let actions = vec![note("a0", "alice")];
    let new_state = advanced(&state, &actions);
    let outcome = fx
        .log
        .append_actions(&game_id(), actions, new_state, &cancel)
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert_eq!(fx.store.commit_count(), commits);
}

#[tokio::test]
async fn test_missing_actions_are_returned_ahead_of_the_append() {
    let fx = fixture(2);
    create(&fx.log).await;
    append(&fx.log, vec![note("n0", "alice")]).await;
    append(
        &fx.log,
        vec![note("b0", "bob").in_group("r1"), note("c0", "bob").in_group("r1")],
    )
    .await;

    let request = |_: &AppendContext<'_>| {
        Ok::<_, RuntimeError>(AppendDecision::Proceed(AppendPlan {
            game_updates: Vec::new(),
            missing_actions: Some(MissingActions {
                count: 2,
                group_id: "r1".into(),
            }),
        }))
    };
    let state = fx.log.load_game(&game_id()).await.unwrap().state;
    let actions = vec![note("a1", "alice").in_group("r1")];
    let new_state = advanced(&state, &actions);
    let outcome = fx
        .log
        .append_actions(&game_id(), actions, new_state, &request)
        .await
        .unwrap()
        .unwrap();

    let missing: Vec<&str> = outcome.missing_actions.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(missing, ["b0", "c0"]);
    assert_eq!(outcome.actions[0].index, 3);
}

#[tokio::test]
async fn test_missing_actions_outside_group_are_refused() {
    let fx = fixture(200);
    create(&fx.log).await;
    append(&fx.log, vec![note("n0", "bob")]).await;

    let request = |_: &AppendContext<'_>| {
        Ok::<_, RuntimeError>(AppendDecision::Proceed(AppendPlan {
            game_updates: Vec::new(),
            missing_actions: Some(MissingActions {
                count: 1,
                group_id: "r1".into(),
            }),
        }))
    };
    let state = fx.log.load_game(&game_id()).await.unwrap().state;
    let actions = vec![note("a0", "alice").in_group("r1")];
    let new_state = advanced(&state, &actions);
    let err = fx
        .log
        .append_actions(&game_id(), actions, new_state, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::StaleTail { tail: 1, .. }));
}

/// Undo across a chunk boundary removes the suffix, deletes chunks that end
/// up empty and stores the redo actions in their place.
#[tokio::test]
async fn test_undo_splices_suffix_and_appends_redo() {
    let fx = fixture(2);
    create(&fx.log).await;
    let mut log = append(&fx.log, vec![note("a0", "alice"), note("a1", "alice")]).await;
    log.extend(
        append(
            &fx.log,
            vec![
                note("a2", "alice").in_group("r1"),
                note("b2", "bob").in_group("r1"),
                note("a3", "alice"),
            ],
        )
        .await,
    );

    let mut undos = fx.log.events().subscribe(Topic::Undo);
    let state = fx.log.load_game(&game_id()).await.unwrap().state;
    let undone = log[2..].to_vec();
    let redo = vec![undone[1].redo_for(&undone[0].id)];

    let mut new_state = state.clone();
    new_state.action_count = 3;
    new_state.action_checksum = state
        .action_checksum
        .undo_redo(&undone, &[redo[0].clone().at_index(2)]);

    let outcome = fx
        .log
        .undo_actions_from_game(&game_id(), undone.clone(), redo, new_state.clone(), &keep)
        .await
        .expect("undo should commit")
        .expect("undo should not be cancelled");
    assert_eq!(outcome.redone[0].id.as_str(), "b2-REDO-a2");
    assert_eq!(outcome.redone[0].index, 2);

    let stored = fx
        .log
        .find_action_range_for_game(&game_id(), 0, 10)
        .await
        .unwrap();
    let ids: Vec<&str> = stored.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, ["a0", "a1", "b2-REDO-a2"]);
    assert_eq!(ActionChecksum::of_log(&stored), new_state.action_checksum);

    match undos.recv().await.expect("undo notification") {
        Notification::ActionsUndone {
            undone_action,
            undone_actions,
            ..
        } => {
            assert_eq!(undone_action.id.as_str(), "a2");
            assert_eq!(undone_actions.len(), 3);
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn test_undo_with_wrong_checksum_is_a_hard_error() {
    let fx = fixture(200);
    create(&fx.log).await;
    let log = append(&fx.log, vec![note("a0", "alice"), note("a1", "alice")]).await;
    let state = fx.log.load_game(&game_id()).await.unwrap().state;

    let mut new_state = state.clone();
    new_state.action_count = 1;
    let err = fx
        .log
        .undo_actions_from_game(&game_id(), log[1..].to_vec(), Vec::new(), new_state, &keep)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn test_undo_of_moved_suffix_collides() {
    let fx = fixture(200);
    create(&fx.log).await;
    let log = append(&fx.log, vec![note("a0", "alice")]).await;
    append(&fx.log, vec![note("a1", "alice")]).await;

    let state = fx.log.load_game(&game_id()).await.unwrap().state;
    let err = fx
        .log
        .undo_actions_from_game(&game_id(), log, Vec::new(), state, &keep)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_find_action_scans_from_the_tail() {
    let fx = fixture(2);
    create(&fx.log).await;
    append(&fx.log, (0..5).map(|n| note(&format!("a{n}"), "alice")).collect()).await;

    let found = fx
        .log
        .find_action(&game_id(), &ActionId::new("a1"))
        .await
        .unwrap()
        .expect("a1 is stored");
    assert_eq!(found.index, 1);
    assert!(fx.log.find_action(&game_id(), &ActionId::new("zz")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_game_is_refused() {
    let fx = fixture(200);
    create(&fx.log).await;
    let err = fx
        .log
        .create_game(document(), GameState::new(Vec::new(), Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::GameExists(_)));
}

/// Cached reads are invalidated by every mutation and survive a cache outage.
#[tokio::test]
async fn test_cached_reads_follow_mutations() {
    let fx = fixture(200);
    create(&fx.log).await;

    let view = fx.log.cached_game(&game_id()).await.unwrap().expect("game view");
    assert_eq!(view.state.action_count, 0);
    assert!(fx.cache.peek(&CacheKeys::game(&game_id())).is_some());

    append(&fx.log, vec![note("a0", "alice")]).await;
    assert!(fx.cache.peek(&CacheKeys::game(&game_id())).is_none());
    let view = fx.log.cached_game(&game_id()).await.unwrap().unwrap();
    assert_eq!(view.state.action_count, 1);
    assert_eq!(fx.log.read_count(&game_id()).await, Some(2));

    let etag = fx.log.cached_etag(&game_id()).await.unwrap().unwrap();
    let updated = fx
        .log
        .update_game(&game_id(), &[runtime::GameUpdate::SetPublic(true)])
        .await
        .unwrap();
    assert_eq!(updated.etag, etag + 1);
    assert_eq!(fx.log.public_games().await.unwrap(), vec![game_id()]);

    fx.cache.set_available(false);
    let checksum = fx.log.cached_checksum(&game_id()).await.unwrap();
    assert_eq!(checksum, Some(view.state.action_checksum));
    let players = fx
        .log
        .active_games_for_player(&PlayerId::new("bob"))
        .await
        .unwrap();
    assert_eq!(players, vec![game_id()]);
}

#[tokio::test]
async fn test_cached_games_batches_lookups() {
    let fx = fixture(200);
    create(&fx.log).await;
    let views = fx
        .log
        .cached_games(&[game_id(), GameId::new("missing")])
        .await
        .unwrap();
    assert!(views[0].is_some());
    assert!(views[1].is_none());
}

#[tokio::test]
async fn test_finished_status_is_committed_with_the_log() {
    let fx = fixture(200);
    create(&fx.log).await;
    let state = fx.log.load_game(&game_id()).await.unwrap().state;

    let actions = vec![note("a0", "alice")];
    let mut new_state = advanced(&state, &actions);
    new_state.result = Some(game_core::GameResult {
        winners: vec![PlayerId::new("alice")],
        summary: "done".into(),
    });
    let finish = |ctx: &AppendContext<'_>| {
        Ok::<_, RuntimeError>(AppendDecision::Proceed(AppendPlan {
            game_updates: runtime::repository::status_updates(ctx.game, ctx.new_state),
            missing_actions: None,
        }))
    };
    let outcome = fx
        .log
        .append_actions(&game_id(), actions, new_state, &finish)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.game.status, GameStatus::Finished);
    assert_eq!(outcome.game.etag, 2);
}
