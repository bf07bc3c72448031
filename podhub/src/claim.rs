//! Claim workflow: at most one user owns an episode for editing at a time.
//!
//! The guarded operations ([`ClaimCoordinator::claim`], [`ClaimCoordinator::drop`])
//! check the current holder and ask the [`AuthorizationOracle`] before touching
//! storage. The force operations skip both checks and are the primitives the
//! guarded ones commit through. Every successful transition publishes exactly
//! one [`ClaimEvent`]; a rejected one publishes nothing and writes nothing.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::auth::{AuthorizationOracle, ClaimAction};
use crate::clock::{Clock, SystemClock};
use crate::events::{ClaimEvent, SharedSink};
use crate::model::{Claim, Episode, User, UserId};
use crate::storage::{HolderCheck, Store, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum ClaimError {
    #[error("episode is already claimed by {holder}")]
    AlreadyClaimed { holder: UserId },
    #[error("episode is claimed by {holder}, not by you")]
    NotYourClaim { holder: UserId },
    #[error("not authorized to {action} this episode")]
    NotAuthorized { action: ClaimAction },
    #[error("episode {0} not found")]
    EpisodeNotFound(String),
    #[error("{0} not found")]
    UserNotFound(UserId),
    #[error("storage error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ClaimError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownEpisode(guid) => ClaimError::EpisodeNotFound(guid),
            other => ClaimError::Store(other),
        }
    }
}

pub type SharedOracle = Arc<dyn AuthorizationOracle + Send + Sync + 'static>;
pub type SharedClock = Arc<dyn Clock + Send + Sync + 'static>;

#[derive(Clone)]
pub struct ClaimCoordinator {
    store: Store,
    oracle: SharedOracle,
    sink: SharedSink,
    clock: SharedClock,
}

impl ClaimCoordinator {
    pub fn new(store: Store, oracle: SharedOracle, sink: SharedSink) -> Self {
        Self { store, oracle, sink, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The clock claims are stamped with; callers stamping related records
    /// should use it too.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn is_claimed(&self, episode: &Episode) -> bool {
        episode.claim.is_some()
    }

    pub fn is_claimed_by(&self, episode: &Episode, user: &User) -> bool {
        self.claimant(episode) == Some(user.id)
    }

    pub fn claimant(&self, episode: &Episode) -> Option<UserId> {
        episode.claim.as_ref().map(|c| c.user_id)
    }

    /// Claims `episode` for `user`. Re-claiming an episode the user already holds
    /// is allowed if the oracle still grants it, and re-stamps the claim.
    pub fn claim(&self, episode: &Episode, user: &User) -> Result<Episode, ClaimError> {
        let view = self.authoritative(episode)?;
        if let Some(holder) = self.claimant(&view).filter(|h| *h != user.id) {
            warn!("{} tried to claim {} held by {holder}", user.id, episode.guid);
            return Err(ClaimError::AlreadyClaimed { holder });
        }
        self.require(user, ClaimAction::Claim, &view)?;
        self.commit_claim(&view, user.id, HolderCheck::FreeOr(user.id)).map_err(|err| match err {
            StoreError::HeldBy(holder) => {
                warn!("{} lost the race for {} to {holder}", user.id, episode.guid);
                ClaimError::AlreadyClaimed { holder }
            }
            other => other.into(),
        })
    }

    /// Releases `user`'s claim on `episode`. Dropping an unclaimed episode goes
    /// through the oracle and, if granted, still publishes a drop event.
    pub fn drop(&self, episode: &Episode, user: &User) -> Result<Episode, ClaimError> {
        let view = self.authoritative(episode)?;
        if let Some(holder) = self.claimant(&view).filter(|h| *h != user.id) {
            warn!("{} tried to drop {} held by {holder}", user.id, episode.guid);
            return Err(ClaimError::NotYourClaim { holder });
        }
        self.require(user, ClaimAction::Unclaim, &view)?;
        self.commit_drop(&view, HolderCheck::FreeOr(user.id)).map_err(|err| match err {
            StoreError::HeldBy(holder) => ClaimError::NotYourClaim { holder },
            other => other.into(),
        })
    }

    /// Unconditionally makes `user` the claimant, superseding any previous claim.
    pub fn force_claim(&self, episode: &Episode, user: &User) -> Result<Episode, ClaimError> {
        Ok(self.commit_claim(episode, user.id, HolderCheck::Any)?)
    }

    /// Unconditionally removes any claim on `episode`.
    pub fn force_drop(&self, episode: &Episode) -> Result<Episode, ClaimError> {
        Ok(self.commit_drop(episode, HolderCheck::Any)?)
    }

    pub fn claim_guid(&self, guid: &str, user: UserId) -> Result<Episode, ClaimError> {
        let (episode, user) = (self.load_episode(guid)?, self.load_user(user)?);
        self.claim(&episode, &user)
    }

    pub fn drop_guid(&self, guid: &str, user: UserId) -> Result<Episode, ClaimError> {
        let (episode, user) = (self.load_episode(guid)?, self.load_user(user)?);
        self.drop(&episode, &user)
    }

    pub fn force_claim_guid(&self, guid: &str, user: UserId) -> Result<Episode, ClaimError> {
        let (episode, user) = (self.load_episode(guid)?, self.load_user(user)?);
        self.force_claim(&episode, &user)
    }

    pub fn force_drop_guid(&self, guid: &str) -> Result<Episode, ClaimError> {
        let episode = self.load_episode(guid)?;
        self.force_drop(&episode)
    }

    pub fn load_episode(&self, guid: &str) -> Result<Episode, ClaimError> {
        self.store.get_episode(guid)?.ok_or_else(|| ClaimError::EpisodeNotFound(guid.to_string()))
    }

    pub fn load_user(&self, id: UserId) -> Result<User, ClaimError> {
        self.store.get_user(id)?.ok_or(ClaimError::UserNotFound(id))
    }

    /// The caller's copy with the stored claim swapped in; guarded checks never
    /// trust a possibly stale argument. Fails before the oracle is asked when
    /// the episode was never stored.
    fn authoritative(&self, episode: &Episode) -> Result<Episode, ClaimError> {
        let stored = self.load_episode(&episode.guid)?;
        let mut view = episode.clone();
        view.claim = stored.claim;
        debug!("{} currently held by {:?}", episode.guid, self.claimant(&view));
        Ok(view)
    }

    fn require(&self, user: &User, action: ClaimAction, episode: &Episode) -> Result<(), ClaimError> {
        if self.oracle.authorize(user, action, episode).is_granted() {
            Ok(())
        } else {
            warn!("{} denied {action} on {}", user.id, episode.guid);
            Err(ClaimError::NotAuthorized { action })
        }
    }

    fn commit_claim(&self, episode: &Episode, user: UserId, check: HolderCheck) -> Result<Episode, StoreError> {
        let claim = Claim { user_id: user, claimed_at: self.clock.now() };
        let previous = self.store.replace_claim(&episode.guid, claim.clone(), check)?;
        if let Some(prev) = previous.filter(|p| p.user_id != user) {
            info!("claim on {} by {} superseded", episode.guid, prev.user_id);
        }
        let mut updated = episode.clone();
        updated.claim = Some(claim);
        info!("episode {} claimed by {user}", episode.guid);
        self.sink.publish(&ClaimEvent::EpisodeClaimed { episode: updated.clone(), user });
        Ok(updated)
    }

    fn commit_drop(&self, episode: &Episode, check: HolderCheck) -> Result<Episode, StoreError> {
        let previous = self.store.remove_claim(&episode.guid, check)?.map(|c| c.user_id);
        let mut updated = episode.clone();
        updated.claim = None;
        info!("episode {} claim dropped", episode.guid);
        self.sink.publish(&ClaimEvent::EpisodeClaimDropped { episode: updated.clone(), previous });
        Ok(updated)
    }
}
