// End-to-end matchmaking flows against the in-memory doubles: admission,
// pairing, reservation invariants, and the bot-fill path.

mod common;

use codeduel_backend::coord::keys;
use codeduel_backend::coord::ReservationStatus;
use codeduel_backend::protocol::QueueOutbound;

use common::*;

#[tokio::test]
async fn admission_and_pairing_full_flow() {
    let h = harness();
    h.store.add_problem(two_sum_problem("p1", None));
    seed_user(&h.store, "alice", 1500);
    seed_user(&h.store, "bob", 1540);

    // Fresh joins get a queue position but no pair until the dwell gate.
    let reply = h.matchmaking.join("alice", 1500).await.unwrap();
    assert_eq!(reply, QueueOutbound::Queued { position: 1 });
    let reply = h.matchmaking.join("bob", 1540).await.unwrap();
    assert_eq!(reply, QueueOutbound::Queued { position: 2 });

    assert!(pair_and_start(&h).await.is_empty());

    // Backdate both admissions past MIN_QUEUE_WAIT and pair.
    h.coord.queue_remove("alice").await.unwrap();
    h.coord.queue_remove("bob").await.unwrap();
    backdate_queue_human(&h, "alice", 1500, 5_000).await;
    backdate_queue_human(&h, "bob", 1540, 5_000).await;

    let matches = pair_and_start(&h).await;
    assert_eq!(matches.len(), 1);
    let match_id = &matches[0];

    // I1: paired players are out of the queue and hold reservations.
    assert_eq!(h.coord.queue_len().await.unwrap(), 0);
    for player in ["alice", "bob"] {
        let r = h.coord.reservation(player).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Active);
        assert_eq!(r.match_id.as_deref(), Some(match_id.as_str()));
    }

    // I3: the active set member has an ongoing blob.
    assert!(h.coord.is_active_match(match_id).await.unwrap());
    let blob = h.coord.read_match(match_id).await.unwrap().unwrap();
    assert!(blob.is_ongoing());
    assert_eq!(blob.players.len(), 2);

    // match_found reached both players and they were detached.
    for player in ["alice", "bob"] {
        let frames = h.notifier.delivered_to(player);
        assert_eq!(frames.len(), 1, "{player} should get one frame");
        assert_eq!(frames[0]["type"], "match_found");
        assert_eq!(frames[0]["matchId"], match_id.as_str());
    }
    assert!(h.notifier.detached().contains(&"alice".to_string()));

    // Re-joining while reserved redirects instead of re-queueing.
    let reply = h.matchmaking.join("alice", 1500).await.unwrap();
    match reply {
        QueueOutbound::AlreadyInMatch { match_id: m, .. } => {
            assert_eq!(&m, match_id);
        }
        other => panic!("expected already_in_match, got {other:?}"),
    }
    assert_eq!(h.coord.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_admission_is_idempotent() {
    let h = harness();
    seed_user(&h.store, "alice", 1500);

    h.matchmaking.join("alice", 1500).await.unwrap();
    let reply = h.matchmaking.join("alice", 1500).await.unwrap();
    assert!(matches!(reply, QueueOutbound::Queued { .. }));

    assert_eq!(h.coord.queue_len().await.unwrap(), 1);
    let queued: Vec<_> = h
        .coord_store
        .published_on(keys::BOTS_COMMANDS)
        .into_iter()
        .filter(|v| v["type"] == "playerQueued")
        .collect();
    assert_eq!(queued.len(), 1, "exactly one playerQueued broadcast");
}

#[tokio::test]
async fn queue_and_active_bots_stay_disjoint() {
    let h = harness();
    h.store.add_problem(two_sum_problem("p1", None));
    seed_user(&h.store, "h1", 1200);
    seed_bot(&h.store, "q1", 1210);
    backdate_queue_human(&h, "h1", 1200, 50_000).await;
    backdate_queue_bot(&h, "q1", 1210, 50_000).await;

    let matches = pair_and_start(&h).await;
    assert_eq!(matches.len(), 1);

    // The bot moved from the queue into bots:active; never both.
    assert!(h.coord.is_bot_active("q1").await.unwrap());
    assert!(!h.coord.queue_contains("q1").await.unwrap());
    assert_eq!(
        h.coord.bot_current_match("q1").await.unwrap().as_deref(),
        Some(matches[0].as_str())
    );
    assert_eq!(
        h.coord.bot_state("q1").await.unwrap().as_deref(),
        Some("playing")
    );

    // An active bot is not pairable again.
    backdate_queue_bot(&h, "q1", 1210, 50_000).await;
    seed_user(&h.store, "h2", 1210);
    backdate_queue_human(&h, "h2", 1210, 50_000).await;
    let matches = pair_and_start(&h).await;
    assert!(matches.is_empty(), "active bot must not be re-paired");
}

#[tokio::test]
async fn reservation_race_single_winner() {
    let h = harness();
    h.store.add_problem(two_sum_problem("p1", None));
    seed_user(&h.store, "a", 1500);
    seed_user(&h.store, "b", 1500);
    backdate_queue_human(&h, "a", 1500, 5_000).await;
    backdate_queue_human(&h, "b", 1500, 5_000).await;

    // A competing worker already locked one side of the pair.
    assert!(h.coord.acquire_pair_lock("a", "other-worker").await.unwrap());

    let matches = pair_and_start(&h).await;
    assert!(matches.is_empty());

    // No double reservation, no side effects from the losing worker.
    assert!(h.coord.reservation("a").await.unwrap().is_none());
    assert!(h.coord.reservation("b").await.unwrap().is_none());
    assert_eq!(h.coord.queue_len().await.unwrap(), 2);

    // Once the winner's lock is gone, pairing proceeds normally.
    h.coord.release_pair_lock("a").await.unwrap();
    let matches = pair_and_start(&h).await;
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn needs_bot_advisory_marking() {
    let h = harness();
    h.store.add_problem(two_sum_problem("p1", None));
    seed_user(&h.store, "lonely", 1500);
    backdate_queue_human(&h, "lonely", 1500, 10_000).await;

    pair_and_start(&h).await;
    assert_eq!(
        h.coord.needs_bot_members().await.unwrap(),
        vec!["lonely".to_string()]
    );

    // Leaving clears the advisory flag.
    h.matchmaking.leave("lonely").await.unwrap();
    assert!(h.coord.needs_bot_members().await.unwrap().is_empty());
}
