mod common;

use std::sync::Arc;
use std::time::Duration;

use client_core::{SyncCoordinator, SyncError, SyncWorker};
use game_content::SealedRoundRules;
use game_core::{GameId, PlayerId, Push};

use common::{FakeServer, new_game, seats, write_notes};

async fn spawn_for(server: &Arc<FakeServer>, player: &PlayerId) -> client_core::SyncHandle {
    let coordinator = SyncCoordinator::connect(
        server.clone(),
        Arc::new(SealedRoundRules::default()),
        &GameId::new("g1"),
        player.clone(),
    )
    .await
    .expect("coordinator should connect");
    let (handle, _worker) = SyncWorker::spawn(coordinator, 16);
    handle
}

/// A push for an action committed right after ours arrives while our submit
/// is still waiting on the server. It is held until the submit settles and
/// then lands after our action.
#[tokio::test(start_paused = true)]
async fn test_push_during_submit_is_applied_after_it_settles() {
    let players = seats(&["alice", "bob"]);
    let server = Arc::new(FakeServer::new(new_game(&players), Vec::new()));
    let alice = spawn_for(&server, &players[0]).await;
    server.set_submit_delay(Duration::from_millis(100));

    let view = alice.view().await.unwrap();
    let note = SealedRoundRules::note(view.visible.game(), "a0", &players[0], "first");
    let submitting = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.submit(note).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    let response = server
        .commit(SealedRoundRules::note(&server.game(), "b1", &players[1], "second"))
        .expect("bob's note should commit");
    alice
        .push(Push::Appended {
            game_id: GameId::new("g1"),
            actions: response.actions,
        })
        .await
        .unwrap();

    let committed = submitting.await.unwrap().expect("submit should succeed");
    assert_eq!(committed[0].index, 0);

    let view = alice.view().await.unwrap();
    let ids: Vec<&str> = view.visible.log().iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, ["a0", "b1"]);
    assert_eq!(view.visible.checksum(), server.game().state.action_checksum);
}

#[tokio::test(start_paused = true)]
async fn test_autoplay_advances_on_interval() {
    let players = seats(&["alice", "bob"]);
    let mut game = new_game(&players);
    let log = write_notes(&mut game, &players[0], &["n0", "n1", "n2"]);
    let server = Arc::new(FakeServer::new(game, log));
    let alice = spawn_for(&server, &players[0]).await;

    assert_eq!(alice.enter_history().await.unwrap(), 3);
    alice.autoplay(Duration::from_millis(50)).await.unwrap();
    let view = alice.view().await.unwrap();
    assert_eq!(view.history_cursor, Some(0));
    assert!(view.autoplaying);

    tokio::time::sleep(Duration::from_millis(175)).await;
    let view = alice.view().await.unwrap();
    assert_eq!(view.history_cursor, Some(3));
    assert!(!view.autoplaying);
    assert_eq!(view.visible.count(), 3);

    assert_eq!(alice.exit_history().await.unwrap(), 0);
    assert_eq!(alice.view().await.unwrap().history_cursor, None);
}

#[tokio::test]
async fn test_history_commands_outside_history_fail() {
    let players = seats(&["alice", "bob"]);
    let server = Arc::new(FakeServer::new(new_game(&players), Vec::new()));
    let alice = spawn_for(&server, &players[0]).await;

    assert!(matches!(alice.step_back().await, Err(SyncError::NotInHistory)));
    assert!(matches!(alice.exit_history().await, Err(SyncError::NotInHistory)));
}

#[tokio::test]
async fn test_failed_submit_is_resynced_in_background() {
    let players = seats(&["alice", "bob"]);
    let server = Arc::new(FakeServer::new(new_game(&players), Vec::new()));
    let alice = spawn_for(&server, &players[0]).await;
    let mut notices = alice.subscribe();

    // Bob acts without alice hearing about it and her own submit is lost.
    let bob = SealedRoundRules::note(&server.game(), "b0", &players[1], "sneaky");
    server.commit(bob).unwrap();
    server.set_offline(true);
    let view = alice.view().await.unwrap();
    let note = SealedRoundRules::note(view.visible.game(), "a0", &players[0], "hello");
    assert!(matches!(alice.submit(note).await, Err(SyncError::Transport(_))));
    assert!(notices.recv().await.is_ok());

    server.set_offline(false);
    let outcome = alice.resync().await.expect("resync should succeed");
    assert!(matches!(outcome, client_core::Resync::Anchored { kept: 0, replayed: 1 }));
    assert_eq!(alice.view().await.unwrap().live_count, 1);
}

#[tokio::test]
async fn test_handle_reports_stopped_worker() {
    let players = seats(&["alice", "bob"]);
    let server = Arc::new(FakeServer::new(new_game(&players), Vec::new()));
    let coordinator = SyncCoordinator::connect(
        server.clone(),
        Arc::new(SealedRoundRules::default()),
        &GameId::new("g1"),
        players[0].clone(),
    )
    .await
    .unwrap();
    let (handle, worker) = SyncWorker::spawn(coordinator, 4);
    worker.abort();
    let _ = worker.await;

    assert!(matches!(handle.view().await, Err(SyncError::WorkerClosed)));
}
