use std::sync::Arc;

use integration_tests::support::{init_logging, RecordingSink, ScriptedOracle};
use podhub::auth::AllowAll;
use podhub::config::PodhubConfig;
use podhub::events::{BroadcastSink, ClaimEvent};
use podhub::model::{Episode, Flag, Subtopic, Topic, User, UserId, Vote, VoteDirection};
use podhub::storage::{new_store, SledStore, StoreTrait};
use podhub::{ClaimCoordinator, EpisodeResource};

#[test]
fn claims_survive_reopen() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("podhub.db");
    {
        let store = Arc::new(SledStore::open(&path).unwrap());
        store.upsert_episode(Episode::new("ep-1", "Pilot")).unwrap();
        store.upsert_user(User::new(1, "alice")).unwrap();
        let coord = ClaimCoordinator::new(store.clone(), Arc::new(AllowAll), Arc::new(RecordingSink::new()));
        coord.claim_guid("ep-1", UserId(1)).unwrap();
        store.flush().unwrap();
    }
    let store = SledStore::open(&path).unwrap();
    let ep = store.get_episode("ep-1").unwrap().unwrap();
    assert_eq!(ep.claim.map(|c| c.user_id), Some(UserId(1)));
    assert_eq!(store.get_user(UserId(1)).unwrap().unwrap().name, "alice");
}

#[test]
fn projection_reads_stored_aggregates() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = PodhubConfig::default();
    cfg.db_path = dir.path().join("podhub.db");
    let store = new_store(&cfg.store_config()).unwrap();

    store.upsert_episode(Episode::new("ep-7", "Seven").published_at(7)).unwrap();
    let votes = [(1, VoteDirection::Up), (2, VoteDirection::Up), (3, VoteDirection::Down), (1, VoteDirection::Up)];
    for (user, direction) in votes {
        store.put_vote("ep-7", Vote { user_id: UserId(user), direction }).unwrap();
    }
    store.put_flag("ep-7", Flag { user_id: UserId(3), reason: "explicit".into(), flagged_at: 1 }).unwrap();
    store
        .add_topic(
            "ep-7",
            Topic {
                id: 1,
                name: "Cold open".into(),
                starts_at: None,
                subtopics: vec![Subtopic { id: 1, name: "Bloopers".into() }],
            },
        )
        .unwrap();

    let res = EpisodeResource::from(&store.get_episode("ep-7").unwrap().unwrap());
    assert!(!res.claimed);
    assert_eq!((res.upvotes, res.downvotes, res.flags), (2, 1, 1));
    assert_eq!(res.topics.len(), 1);
}

#[tokio::test]
async fn broadcast_subscribers_see_transitions() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(&dir.path().join("podhub.db")).unwrap());
    store.upsert_episode(Episode::new("ep-1", "Pilot")).unwrap();
    let alice = User::new(1, "alice");

    let sink = BroadcastSink::new(16);
    let mut rx = sink.subscribe();
    let coord = ClaimCoordinator::new(store, Arc::new(ScriptedOracle::new()), Arc::new(sink));

    let ep = Episode::new("ep-1", "Pilot");
    coord.claim(&ep, &alice).unwrap();
    coord.drop(&ep, &alice).unwrap();

    match rx.recv().await.unwrap() {
        ClaimEvent::EpisodeClaimed { user, .. } => assert_eq!(user, alice.id),
        other => panic!("expected claim event, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        ClaimEvent::EpisodeClaimDropped { previous, episode } => {
            assert_eq!(previous, Some(alice.id));
            assert!(episode.claim.is_none());
        }
        other => panic!("expected drop event, got {other:?}"),
    }
}
