//! Persistence for users, episodes and claims.
//!
//! Claim writes are conditional: every write carries a [`HolderCheck`] that the
//! backend evaluates atomically against the claim it currently holds, so two
//! racing claimants can never both win.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::model::{Claim, Episode, Flag, Topic, User, UserId, Vote};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("internal error")]
    Internal,
    #[error("episode {0} is not stored")]
    UnknownEpisode(String),
    #[error("episode is claimed by {0}")]
    HeldBy(UserId),
    #[error("failed to encode record")]
    Encode,
    #[error("failed to decode record")]
    Decode,
    #[error("unsupported schema version {found}")]
    UnsupportedVersion { found: u32 },
    #[error("storage backend `{0}` is not compiled in")]
    BackendUnavailable(&'static str),
    #[error("I/O error while preparing storage: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "sled-store")]
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
}

/// Precondition on the current claimant, checked atomically with the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HolderCheck {
    /// Overwrite whatever is there.
    Any,
    /// Only write if the episode is unclaimed or already held by this user.
    FreeOr(UserId),
}

impl HolderCheck {
    pub fn admits(&self, current: Option<&Claim>) -> Result<(), StoreError> {
        match (self, current) {
            (HolderCheck::FreeOr(user), Some(claim)) if claim.user_id != *user => {
                Err(StoreError::HeldBy(claim.user_id))
            }
            _ => Ok(()),
        }
    }
}

pub type Store = Arc<dyn StoreTrait + Send + Sync + 'static>;

pub trait StoreTrait {
    fn upsert_user(&self, user: User) -> Result<(), StoreError>;
    fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Inserts or replaces episode metadata. The `claim` field is ignored; claims
    /// only change through [`StoreTrait::replace_claim`] and [`StoreTrait::remove_claim`].
    fn upsert_episode(&self, ep: Episode) -> Result<(), StoreError>;
    /// Loads an episode with its current claim attached.
    fn get_episode(&self, guid: &str) -> Result<Option<Episode>, StoreError>;
    /// Most recently published first; unpublished episodes last.
    fn list_episodes(&self, limit: usize) -> Result<Vec<Episode>, StoreError>;

    fn current_claim(&self, guid: &str) -> Result<Option<Claim>, StoreError>;
    /// Deletes any existing claim and stores `claim` in its place, returning the
    /// claim that was replaced.
    fn replace_claim(&self, guid: &str, claim: Claim, check: HolderCheck) -> Result<Option<Claim>, StoreError>;
    /// Deletes the claim, returning it if there was one.
    fn remove_claim(&self, guid: &str, check: HolderCheck) -> Result<Option<Claim>, StoreError>;

    fn put_vote(&self, guid: &str, vote: Vote) -> Result<(), StoreError>;
    fn put_flag(&self, guid: &str, flag: Flag) -> Result<(), StoreError>;
    fn add_topic(&self, guid: &str, topic: Topic) -> Result<(), StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Pushes buffered writes to durable storage, where the backend has any.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub users: usize,
    pub episodes: usize,
    pub claims: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sled,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: Backend,
    pub path: PathBuf,
}

pub fn new_store(config: &StoreConfig) -> Result<Store, StoreError> {
    match config.backend {
        Backend::Memory => Ok(Arc::new(MemStore::default())),
        #[cfg(feature = "sled-store")]
        Backend::Sled => Ok(Arc::new(SledStore::open(&config.path)?)),
        #[cfg(not(feature = "sled-store"))]
        Backend::Sled => Err(StoreError::BackendUnavailable("sled")),
    }
}

fn newest_first(episodes: impl Iterator<Item = Episode>, limit: usize) -> Vec<Episode> {
    episodes
        .sorted_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.guid.cmp(&b.guid)))
        .take(limit)
        .collect()
}

// ================= in-memory backend =================

#[derive(Default)]
struct MemInner {
    users: HashMap<UserId, User>,
    episodes: HashMap<String, Episode>, // guid -> episode without claim
    claims: HashMap<String, Claim>,     // guid -> active claim
}

/// Process-local store. One lock covers every table so claim checks and writes
/// are atomic.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_episode<F>(&self, guid: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Episode),
    {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Internal)?;
        let ep = inner.episodes.get_mut(guid).ok_or_else(|| StoreError::UnknownEpisode(guid.to_string()))?;
        f(ep);
        Ok(())
    }
}

impl StoreTrait for MemStore {
    fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.inner.lock().map_err(|_| StoreError::Internal)?.users.insert(user.id, user);
        Ok(())
    }

    fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().map_err(|_| StoreError::Internal)?.users.get(&id).cloned())
    }

    fn upsert_episode(&self, mut ep: Episode) -> Result<(), StoreError> {
        ep.claim = None;
        self.inner.lock().map_err(|_| StoreError::Internal)?.episodes.insert(ep.guid.clone(), ep);
        Ok(())
    }

    fn get_episode(&self, guid: &str) -> Result<Option<Episode>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Internal)?;
        Ok(inner.episodes.get(guid).cloned().map(|mut ep| {
            ep.claim = inner.claims.get(guid).cloned();
            ep
        }))
    }

    fn list_episodes(&self, limit: usize) -> Result<Vec<Episode>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Internal)?;
        let all = inner.episodes.values().cloned().map(|mut ep| {
            ep.claim = inner.claims.get(&ep.guid).cloned();
            ep
        });
        Ok(newest_first(all, limit))
    }

    fn current_claim(&self, guid: &str) -> Result<Option<Claim>, StoreError> {
        Ok(self.inner.lock().map_err(|_| StoreError::Internal)?.claims.get(guid).cloned())
    }

    fn replace_claim(&self, guid: &str, claim: Claim, check: HolderCheck) -> Result<Option<Claim>, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Internal)?;
        if !inner.episodes.contains_key(guid) {
            return Err(StoreError::UnknownEpisode(guid.to_string()));
        }
        check.admits(inner.claims.get(guid))?;
        debug!("replacing claim on {guid} with {}", claim.user_id);
        Ok(inner.claims.insert(guid.to_string(), claim))
    }

    fn remove_claim(&self, guid: &str, check: HolderCheck) -> Result<Option<Claim>, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Internal)?;
        if !inner.episodes.contains_key(guid) {
            return Err(StoreError::UnknownEpisode(guid.to_string()));
        }
        check.admits(inner.claims.get(guid))?;
        Ok(inner.claims.remove(guid))
    }

    fn put_vote(&self, guid: &str, vote: Vote) -> Result<(), StoreError> {
        self.with_episode(guid, |ep| ep.put_vote(vote))
    }

    fn put_flag(&self, guid: &str, flag: Flag) -> Result<(), StoreError> {
        self.with_episode(guid, |ep| ep.put_flag(flag))
    }

    fn add_topic(&self, guid: &str, topic: Topic) -> Result<(), StoreError> {
        self.with_episode(guid, |ep| ep.topics.push(topic))
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Internal)?;
        Ok(StoreStats { users: inner.users.len(), episodes: inner.episodes.len(), claims: inner.claims.len() })
    }
}

// ================= sled backend =================

#[cfg(feature = "sled-store")]
pub use sled_backend::{SledStore, SCHEMA_VERSION};

#[cfg(feature = "sled-store")]
mod sled_backend {
    use std::fs;

    use borsh::BorshDeserialize;

    use super::*;

    pub const SCHEMA_VERSION: u32 = 1;
    const META_TREE: &str = "__meta";
    const USERS_TREE: &str = "users";
    const EPISODES_TREE: &str = "episodes";
    const CLAIMS_TREE: &str = "claims";
    const SCHEMA_KEY: &[u8] = b"schema_version";

    /// On-disk store. Values are borsh encoded; episodes are keyed by guid and
    /// users by big-endian id. Claims sit in their own tree so they can be
    /// swapped with `compare_and_swap`.
    pub struct SledStore {
        db: sled::Db,
        users: sled::Tree,
        episodes: sled::Tree,
        claims: sled::Tree,
    }

    fn encode<T: borsh::BorshSerialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        borsh::to_vec(value).map_err(|_| StoreError::Encode)
    }

    fn decode<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, StoreError> {
        T::try_from_slice(bytes).map_err(|_| StoreError::Decode)
    }

    impl SledStore {
        pub fn open(path: &Path) -> Result<Self, StoreError> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let db = sled::Config::new().path(path).open()?;
            ensure_schema(&db)?;
            let users = db.open_tree(USERS_TREE)?;
            let episodes = db.open_tree(EPISODES_TREE)?;
            let claims = db.open_tree(CLAIMS_TREE)?;
            debug!("opened sled store at {}", path.display());
            Ok(Self { db, users, episodes, claims })
        }

        fn load_episode(&self, guid: &str) -> Result<Option<Episode>, StoreError> {
            match self.episodes.get(guid)? {
                Some(raw) => Ok(Some(decode(&raw)?)),
                None => Ok(None),
            }
        }

        fn require_episode(&self, guid: &str) -> Result<(), StoreError> {
            if self.episodes.contains_key(guid)? {
                Ok(())
            } else {
                Err(StoreError::UnknownEpisode(guid.to_string()))
            }
        }

        /// Read-modify-write of one episode record. `f` may run more than once
        /// when another writer updates the same record in between.
        fn update_episode<F>(&self, guid: &str, f: F) -> Result<(), StoreError>
        where
            F: Fn(&mut Episode),
        {
            loop {
                let raw = self.episodes.get(guid)?.ok_or_else(|| StoreError::UnknownEpisode(guid.to_string()))?;
                let mut ep: Episode = decode(&raw)?;
                f(&mut ep);
                match self.episodes.compare_and_swap(guid, Some(&raw), Some(encode(&ep)?))? {
                    Ok(()) => return Ok(()),
                    Err(_) => debug!("episode {guid} changed concurrently; retrying"),
                }
            }
        }

        /// Swaps the claim slot for `guid` to `next` once `check` admits the
        /// current holder. Retries when a concurrent writer changed the slot
        /// between our read and the swap.
        fn swap_claim(
            &self,
            guid: &str,
            next: Option<Vec<u8>>,
            check: HolderCheck,
        ) -> Result<Option<Claim>, StoreError> {
            self.require_episode(guid)?;
            loop {
                let raw = self.claims.get(guid)?;
                let current: Option<Claim> = raw.as_ref().map(|bytes| decode(bytes)).transpose()?;
                check.admits(current.as_ref())?;
                match self.claims.compare_and_swap(guid, raw.as_ref(), next.clone())? {
                    Ok(()) => return Ok(current),
                    Err(_) => debug!("claim slot for {guid} changed concurrently; retrying"),
                }
            }
        }
    }

    impl StoreTrait for SledStore {
        fn upsert_user(&self, user: User) -> Result<(), StoreError> {
            self.users.insert(user.id.0.to_be_bytes(), encode(&user)?)?;
            Ok(())
        }

        fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
            match self.users.get(id.0.to_be_bytes())? {
                Some(raw) => Ok(Some(decode(&raw)?)),
                None => Ok(None),
            }
        }

        fn upsert_episode(&self, mut ep: Episode) -> Result<(), StoreError> {
            ep.claim = None;
            self.episodes.insert(ep.guid.as_bytes(), encode(&ep)?)?;
            Ok(())
        }

        fn get_episode(&self, guid: &str) -> Result<Option<Episode>, StoreError> {
            let Some(mut ep) = self.load_episode(guid)? else { return Ok(None) };
            ep.claim = self.current_claim(guid)?;
            Ok(Some(ep))
        }

        fn list_episodes(&self, limit: usize) -> Result<Vec<Episode>, StoreError> {
            let mut all = Vec::new();
            for entry in self.episodes.iter() {
                let (_key, raw) = entry?;
                let mut ep: Episode = decode(&raw)?;
                ep.claim = self.current_claim(&ep.guid)?;
                all.push(ep);
            }
            Ok(newest_first(all.into_iter(), limit))
        }

        fn current_claim(&self, guid: &str) -> Result<Option<Claim>, StoreError> {
            match self.claims.get(guid)? {
                Some(raw) => Ok(Some(decode(&raw)?)),
                None => Ok(None),
            }
        }

        fn replace_claim(&self, guid: &str, claim: Claim, check: HolderCheck) -> Result<Option<Claim>, StoreError> {
            let bytes = encode(&claim)?;
            self.swap_claim(guid, Some(bytes), check)
        }

        fn remove_claim(&self, guid: &str, check: HolderCheck) -> Result<Option<Claim>, StoreError> {
            self.swap_claim(guid, None, check)
        }

        fn put_vote(&self, guid: &str, vote: Vote) -> Result<(), StoreError> {
            self.update_episode(guid, |ep| ep.put_vote(vote.clone()))
        }

        fn put_flag(&self, guid: &str, flag: Flag) -> Result<(), StoreError> {
            self.update_episode(guid, |ep| ep.put_flag(flag.clone()))
        }

        fn add_topic(&self, guid: &str, topic: Topic) -> Result<(), StoreError> {
            self.update_episode(guid, |ep| ep.topics.push(topic.clone()))
        }

        fn stats(&self) -> Result<StoreStats, StoreError> {
            Ok(StoreStats { users: self.users.len(), episodes: self.episodes.len(), claims: self.claims.len() })
        }

        fn flush(&self) -> Result<(), StoreError> {
            self.db.flush()?;
            Ok(())
        }
    }

    fn ensure_schema(db: &sled::Db) -> Result<(), StoreError> {
        let meta = db.open_tree(META_TREE)?;
        match meta.get(SCHEMA_KEY)? {
            Some(raw) => {
                let arr: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::Decode)?;
                let found = u32::from_le_bytes(arr);
                if found > SCHEMA_VERSION {
                    return Err(StoreError::UnsupportedVersion { found });
                }
            }
            None => {
                meta.insert(SCHEMA_KEY, SCHEMA_VERSION.to_le_bytes().to_vec())?;
                db.flush()?;
            }
        }
        Ok(())
    }

}
