use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Episode, User};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAction {
    Claim,
    Unclaim,
}

impl ClaimAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimAction::Claim => "claim",
            ClaimAction::Unclaim => "unclaim",
        }
    }
}

impl fmt::Display for ClaimAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied,
}

impl Authorization {
    pub fn is_granted(self) -> bool {
        self == Authorization::Granted
    }
}

impl From<bool> for Authorization {
    fn from(granted: bool) -> Self {
        if granted {
            Authorization::Granted
        } else {
            Authorization::Denied
        }
    }
}

/// Decides whether a user may perform a claim action on an episode.
pub trait AuthorizationOracle {
    fn authorize(&self, user: &User, action: ClaimAction, episode: &Episode) -> Authorization;
}

/// Grants everything. Handy for tooling that runs with operator privileges.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl AuthorizationOracle for AllowAll {
    fn authorize(&self, _user: &User, _action: ClaimAction, _episode: &Episode) -> Authorization {
        Authorization::Granted
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub claim_roles: Vec<String>,
    pub unclaim_roles: Vec<String>,
    pub admin_roles: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            claim_roles: vec!["editor".to_string()],
            unclaim_roles: vec!["editor".to_string()],
            admin_roles: vec!["admin".to_string()],
        }
    }
}

/// Role based policy: admins may do anything, everyone else needs one of the
/// roles configured for the action.
#[derive(Clone, Debug, Default)]
pub struct RolePolicy {
    config: PolicyConfig,
}

impl RolePolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    fn roles_for(&self, action: ClaimAction) -> &[String] {
        match action {
            ClaimAction::Claim => &self.config.claim_roles,
            ClaimAction::Unclaim => &self.config.unclaim_roles,
        }
    }
}

impl From<&PolicyConfig> for RolePolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self::new(config.clone())
    }
}

impl AuthorizationOracle for RolePolicy {
    fn authorize(&self, user: &User, action: ClaimAction, _episode: &Episode) -> Authorization {
        let admin = self.config.admin_roles.iter().any(|r| user.has_role(r));
        let allowed = self.roles_for(action).iter().any(|r| user.has_role(r));
        Authorization::from(admin || allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_policy_defaults() {
        let policy = RolePolicy::default();
        let ep = Episode::new("ep-1", "Pilot");
        let editor = User::new(1, "ed").with_roles(["editor"]);
        let admin = User::new(2, "root").with_roles(["admin"]);
        let listener = User::new(3, "lis");
        assert!(policy.authorize(&editor, ClaimAction::Claim, &ep).is_granted());
        assert!(policy.authorize(&admin, ClaimAction::Unclaim, &ep).is_granted());
        assert_eq!(policy.authorize(&listener, ClaimAction::Claim, &ep), Authorization::Denied);
    }

    #[test]
    fn actions_have_separate_roles() {
        let policy = RolePolicy::new(PolicyConfig {
            claim_roles: vec!["transcriber".into()],
            unclaim_roles: vec![],
            admin_roles: vec![],
        });
        let ep = Episode::new("ep-1", "Pilot");
        let user = User::new(1, "t").with_roles(["transcriber"]);
        assert!(policy.authorize(&user, ClaimAction::Claim, &ep).is_granted());
        assert!(!policy.authorize(&user, ClaimAction::Unclaim, &ep).is_granted());
    }
}
