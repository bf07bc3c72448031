use serde::Serialize;

use crate::model::{Episode, Topic};

/// Read-only view of an episode handed to presentation layers. Counts are
/// computed from the episode's rows every time, never cached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EpisodeResource {
    pub guid: String,
    pub title: String,
    pub published_at: Option<u64>,
    pub claimed: bool,
    pub upvotes: usize,
    pub downvotes: usize,
    pub flags: usize,
    pub topics: Vec<TopicResource>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopicResource {
    pub name: String,
    pub starts_at: Option<u32>,
    pub subtopics: Vec<String>,
}

impl From<&Topic> for TopicResource {
    fn from(topic: &Topic) -> Self {
        Self {
            name: topic.name.clone(),
            starts_at: topic.starts_at,
            subtopics: topic.subtopics.iter().map(|s| s.name.clone()).collect(),
        }
    }
}

impl From<&Episode> for EpisodeResource {
    fn from(ep: &Episode) -> Self {
        Self {
            guid: ep.guid.clone(),
            title: ep.title.clone(),
            published_at: ep.published_at,
            claimed: ep.claim.is_some(),
            upvotes: ep.upvotes(),
            downvotes: ep.downvotes(),
            flags: ep.flags.len(),
            topics: ep.topics.iter().map(TopicResource::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Claim, Flag, Subtopic, UserId, Vote, VoteDirection};

    #[test]
    fn projection_counts_rows() {
        let mut ep = Episode::new("ep-9", "Ninth").published_at(99);
        ep.put_vote(Vote { user_id: UserId(1), direction: VoteDirection::Up });
        ep.put_vote(Vote { user_id: UserId(2), direction: VoteDirection::Up });
        ep.put_vote(Vote { user_id: UserId(3), direction: VoteDirection::Down });
        ep.put_flag(Flag { user_id: UserId(3), reason: "off-topic".into(), flagged_at: 1 });
        ep.topics.push(Topic {
            id: 1,
            name: "Intro".into(),
            starts_at: Some(0),
            subtopics: vec![Subtopic { id: 1, name: "Housekeeping".into() }],
        });
        ep.claim = Some(Claim { user_id: UserId(1), claimed_at: 3 });

        let res = EpisodeResource::from(&ep);
        assert!(res.claimed);
        assert_eq!((res.upvotes, res.downvotes, res.flags), (2, 1, 1));
        assert_eq!(res.topics[0].subtopics, vec!["Housekeeping".to_string()]);

        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["claimed"], true);
        assert_eq!(json["upvotes"], 2);
    }

    #[test]
    fn unclaimed_projection() {
        let res = EpisodeResource::from(&Episode::new("ep-1", "Pilot"));
        assert!(!res.claimed);
        assert_eq!((res.upvotes, res.downvotes, res.flags), (0, 0, 0));
    }
}
