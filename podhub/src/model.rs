use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Numeric identity of a user. Users live outside the claim core and are only
/// referenced by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self { id: UserId(id), name: name.into(), roles: Vec::new() }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Exclusive, time-stamped ownership of one episode by one user.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: UserId,
    /// Unix seconds.
    pub claimed_at: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: UserId,
    pub direction: VoteDirection,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Flag {
    pub user_id: UserId,
    pub reason: String,
    pub flagged_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Subtopic {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Topic {
    pub id: u64,
    pub name: String,
    /// Offset into the episode audio, in seconds.
    pub starts_at: Option<u32>,
    #[serde(default)]
    pub subtopics: Vec<Subtopic>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Episode {
    pub guid: String,
    pub title: String,
    pub published_at: Option<u64>,
    pub claim: Option<Claim>,
    #[serde(default)]
    pub votes: Vec<Vote>,
    #[serde(default)]
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Episode {
    pub fn new(guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            published_at: None,
            claim: None,
            votes: Vec::new(),
            flags: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn published_at(mut self, ts: u64) -> Self {
        self.published_at = Some(ts);
        self
    }

    pub fn upvotes(&self) -> usize {
        self.votes.iter().filter(|v| v.direction == VoteDirection::Up).count()
    }

    pub fn downvotes(&self) -> usize {
        self.votes.iter().filter(|v| v.direction == VoteDirection::Down).count()
    }

    /// Records `vote`, replacing any earlier vote by the same user.
    pub fn put_vote(&mut self, vote: Vote) {
        match self.votes.iter_mut().find(|v| v.user_id == vote.user_id) {
            Some(existing) => existing.direction = vote.direction,
            None => self.votes.push(vote),
        }
    }

    /// Records `flag`, replacing any earlier flag by the same user.
    pub fn put_flag(&mut self, flag: Flag) {
        match self.flags.iter_mut().find(|f| f.user_id == flag.user_id) {
            Some(existing) => *existing = flag,
            None => self.flags.push(flag),
        }
    }
}
