//! Episode catalog and claim workflow for a podcast companion backend.
//!
//! [`claim::ClaimCoordinator`] owns the claim/drop transitions. It talks to the
//! outside world through three seams: a [`storage::StoreTrait`] backend, an
//! [`auth::AuthorizationOracle`] and an [`events::EventSink`].

pub mod auth;
pub mod claim;
pub mod clock;
pub mod config;
pub mod events;
pub mod model;
pub mod resource;
pub mod storage;

pub use claim::{ClaimCoordinator, ClaimError};
pub use model::{Claim, Episode, User, UserId};
pub use resource::EpisodeResource;
