use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use podhub::auth::{Authorization, AuthorizationOracle, ClaimAction};
use podhub::clock::ManualClock;
use podhub::events::{ClaimEvent, EventSink};
use podhub::model::{Episode, User, UserId};
use podhub::storage::{MemStore, SledStore, Store, StoreTrait};
use podhub::ClaimCoordinator;
use tempfile::TempDir;

pub const START_TIME: u64 = 1_700_000_000;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ClaimEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ClaimEvent> {
        self.events.lock().expect("sink state poisoned").clone()
    }

    pub fn drain(&self) -> Vec<ClaimEvent> {
        std::mem::take(&mut *self.events.lock().expect("sink state poisoned"))
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &ClaimEvent) {
        self.events.lock().expect("sink state poisoned").push(event.clone());
    }
}

/// Oracle with per-(user, action) answers; anything unscripted is granted.
/// Every question is counted so tests can assert the oracle was (not) asked.
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    answers: Arc<Mutex<HashMap<(UserId, ClaimAction), Authorization>>>,
    asked: Arc<Mutex<Vec<(UserId, ClaimAction, String)>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, user: UserId, action: ClaimAction) {
        self.answers.lock().expect("oracle state poisoned").insert((user, action), Authorization::Denied);
    }

    pub fn grant(&self, user: UserId, action: ClaimAction) {
        self.answers.lock().expect("oracle state poisoned").insert((user, action), Authorization::Granted);
    }

    pub fn questions(&self) -> Vec<(UserId, ClaimAction, String)> {
        self.asked.lock().expect("oracle state poisoned").clone()
    }
}

impl AuthorizationOracle for ScriptedOracle {
    fn authorize(&self, user: &User, action: ClaimAction, episode: &Episode) -> Authorization {
        self.asked.lock().expect("oracle state poisoned").push((user.id, action, episode.guid.clone()));
        self.answers
            .lock()
            .expect("oracle state poisoned")
            .get(&(user.id, action))
            .copied()
            .unwrap_or(Authorization::Granted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Sled,
}

pub const BACKENDS: [BackendKind; 2] = [BackendKind::Memory, BackendKind::Sled];

pub struct Harness {
    pub coord: ClaimCoordinator,
    pub store: Store,
    pub sink: RecordingSink,
    pub oracle: ScriptedOracle,
    pub clock: Arc<ManualClock>,
    pub episode: Episode,
    pub alice: User,
    pub bob: User,
    // Keeps the sled directory alive for the harness lifetime.
    _dir: Option<TempDir>,
}

pub fn open_store(kind: BackendKind) -> (Store, Option<TempDir>) {
    match kind {
        BackendKind::Memory => (Arc::new(MemStore::new()), None),
        BackendKind::Sled => {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = SledStore::open(&dir.path().join("podhub.db")).expect("open sled store");
            (Arc::new(store), Some(dir))
        }
    }
}

pub fn harness(kind: BackendKind) -> Harness {
    init_logging();
    let (store, dir) = open_store(kind);
    let episode = Episode::new("urn:podcast:episode:42", "The one about claims").published_at(START_TIME);
    let alice = User::new(1, "alice").with_roles(["editor"]);
    let bob = User::new(2, "bob").with_roles(["editor"]);
    store.upsert_episode(episode.clone()).expect("seed episode");
    store.upsert_user(alice.clone()).expect("seed alice");
    store.upsert_user(bob.clone()).expect("seed bob");

    let sink = RecordingSink::new();
    let oracle = ScriptedOracle::new();
    let clock = Arc::new(ManualClock::new(START_TIME));
    let coord = ClaimCoordinator::new(store.clone(), Arc::new(oracle.clone()), Arc::new(sink.clone()))
        .with_clock(clock.clone());
    Harness { coord, store, sink, oracle, clock, episode, alice, bob, _dir: dir }
}
