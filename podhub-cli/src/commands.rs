use std::io::Write;

use anyhow::Context;
use log::info;
use podhub::clock::Clock;
use podhub::model::{Episode, Flag, Subtopic, Topic, User, UserId, Vote, VoteDirection};
use podhub::{ClaimCoordinator, EpisodeResource};
use serde::Serialize;

use crate::cli::CliCmd;

fn print_json<T: Serialize>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    writeln!(out, "{text}")?;
    Ok(())
}

fn print_episode(out: &mut dyn Write, episode: &Episode) -> anyhow::Result<()> {
    print_json(out, &EpisodeResource::from(episode))
}

pub fn execute(cmd: CliCmd, coord: &ClaimCoordinator, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = coord.store();
    match cmd {
        CliCmd::AddUser { id, name, roles } => {
            let user = User::new(id, name).with_roles(roles);
            info!("storing {} ({})", user.id, user.name);
            store.upsert_user(user.clone())?;
            print_json(out, &user)?;
        }
        CliCmd::AddEpisode { guid, title, published_at } => {
            // Keep votes, flags and topics when re-registering an episode.
            let mut episode = store.get_episode(&guid)?.unwrap_or_else(|| Episode::new(guid.clone(), title.clone()));
            episode.title = title;
            episode.published_at = published_at.or(episode.published_at);
            store.upsert_episode(episode)?;
            print_episode(out, &coord.load_episode(&guid)?)?;
        }
        CliCmd::AddTopic { guid, id, name, starts_at, subtopics } => {
            let subtopics = subtopics
                .into_iter()
                .enumerate()
                .map(|(i, name)| Subtopic { id: i as u64 + 1, name })
                .collect();
            store
                .add_topic(&guid, Topic { id, name, starts_at, subtopics })
                .with_context(|| format!("adding topic to {guid}"))?;
            print_episode(out, &coord.load_episode(&guid)?)?;
        }
        CliCmd::Vote { guid, user, down } => {
            let direction = if down { VoteDirection::Down } else { VoteDirection::Up };
            coord.load_user(UserId(user))?;
            let vote = Vote { user_id: UserId(user), direction };
            store.put_vote(&guid, vote).with_context(|| format!("voting on {guid}"))?;
            print_episode(out, &coord.load_episode(&guid)?)?;
        }
        CliCmd::Flag { guid, user, reason } => {
            coord.load_user(UserId(user))?;
            let flag = Flag { user_id: UserId(user), reason, flagged_at: coord.clock().now() };
            store.put_flag(&guid, flag).with_context(|| format!("flagging {guid}"))?;
            print_episode(out, &coord.load_episode(&guid)?)?;
        }
        CliCmd::Show { guid } => print_episode(out, &coord.load_episode(&guid)?)?,
        CliCmd::List { limit } => {
            let episodes = store.list_episodes(limit)?;
            let resources: Vec<EpisodeResource> = episodes.iter().map(EpisodeResource::from).collect();
            print_json(out, &resources)?;
        }
        CliCmd::Claim { guid, user } => print_episode(out, &coord.claim_guid(&guid, UserId(user))?)?,
        CliCmd::Drop { guid, user } => print_episode(out, &coord.drop_guid(&guid, UserId(user))?)?,
        CliCmd::ForceClaim { guid, user } => print_episode(out, &coord.force_claim_guid(&guid, UserId(user))?)?,
        CliCmd::ForceDrop { guid } => print_episode(out, &coord.force_drop_guid(&guid)?)?,
        CliCmd::Stats => print_json(out, &store.stats()?)?,
    }
    store.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use podhub::auth::{PolicyConfig, RolePolicy};
    use podhub::clock::ManualClock;
    use podhub::events::LogSink;
    use podhub::storage::MemStore;
    use podhub::ClaimError;
    use serde_json::Value;

    use super::*;

    fn coordinator() -> ClaimCoordinator {
        ClaimCoordinator::new(
            Arc::new(MemStore::new()),
            Arc::new(RolePolicy::from(&PolicyConfig::default())),
            Arc::new(LogSink),
        )
    }

    fn run(coord: &ClaimCoordinator, cmd: CliCmd) -> anyhow::Result<Value> {
        let mut out = Vec::new();
        execute(cmd, coord, &mut out)?;
        Ok(serde_json::from_slice(&out)?)
    }

    fn seed(coord: &ClaimCoordinator) {
        run(coord, CliCmd::AddUser { id: 1, name: "ed".into(), roles: vec!["editor".into()] }).unwrap();
        run(coord, CliCmd::AddUser { id: 2, name: "lis".into(), roles: vec![] }).unwrap();
        run(coord, CliCmd::AddEpisode { guid: "ep-1".into(), title: "Pilot".into(), published_at: Some(5) }).unwrap();
    }

    #[test]
    fn claim_and_drop_through_commands() {
        let coord = coordinator();
        seed(&coord);
        let v = run(&coord, CliCmd::Claim { guid: "ep-1".into(), user: 1 }).unwrap();
        assert_eq!(v["claimed"], true);
        let v = run(&coord, CliCmd::Drop { guid: "ep-1".into(), user: 1 }).unwrap();
        assert_eq!(v["claimed"], false);
    }

    #[test]
    fn listener_cannot_claim() {
        let coord = coordinator();
        seed(&coord);
        let err = run(&coord, CliCmd::Claim { guid: "ep-1".into(), user: 2 }).unwrap_err();
        assert!(matches!(err.downcast_ref::<ClaimError>(), Some(ClaimError::NotAuthorized { .. })));
    }

    #[test]
    fn votes_and_flags_show_in_projection() {
        let coord = coordinator();
        seed(&coord);
        run(&coord, CliCmd::Vote { guid: "ep-1".into(), user: 1, down: false }).unwrap();
        run(&coord, CliCmd::Vote { guid: "ep-1".into(), user: 2, down: true }).unwrap();
        let v = run(&coord, CliCmd::Flag { guid: "ep-1".into(), user: 2, reason: "bad audio".into() }).unwrap();
        let counts = (v["upvotes"].as_u64(), v["downvotes"].as_u64(), v["flags"].as_u64());
        assert_eq!(counts, (Some(1), Some(1), Some(1)));
    }

    #[test]
    fn flags_are_stamped_by_coordinator_clock() {
        let coord = coordinator().with_clock(Arc::new(ManualClock::new(777)));
        seed(&coord);
        run(&coord, CliCmd::Flag { guid: "ep-1".into(), user: 2, reason: "bad audio".into() }).unwrap();
        let ep = coord.load_episode("ep-1").unwrap();
        assert_eq!(ep.flags.len(), 1);
        assert_eq!((ep.flags[0].user_id, ep.flags[0].flagged_at), (UserId(2), 777));
    }

    #[test]
    fn re_adding_episode_keeps_votes() {
        let coord = coordinator();
        seed(&coord);
        run(&coord, CliCmd::Vote { guid: "ep-1".into(), user: 1, down: false }).unwrap();
        let readd =
            CliCmd::AddEpisode { guid: "ep-1".into(), title: "Pilot (remastered)".into(), published_at: None };
        let v = run(&coord, readd).unwrap();
        assert_eq!(v["title"], "Pilot (remastered)");
        assert_eq!(v["published_at"], 5);
        assert_eq!(v["upvotes"], 1);
    }

    #[test]
    fn topics_and_listing() {
        let coord = coordinator();
        seed(&coord);
        run(
            &coord,
            CliCmd::AddTopic {
                guid: "ep-1".into(),
                id: 1,
                name: "News".into(),
                starts_at: Some(30),
                subtopics: vec!["Tech".into(), "Sport".into()],
            },
        )
        .unwrap();
        let v = run(&coord, CliCmd::List { limit: 5 }).unwrap();
        assert_eq!(v[0]["topics"][0]["subtopics"][1], "Sport");
        let v = run(&coord, CliCmd::Stats).unwrap();
        assert_eq!(v["episodes"], 1);
        assert_eq!(v["users"], 2);
    }

    #[test]
    fn vote_on_unknown_episode_fails() {
        let coord = coordinator();
        seed(&coord);
        assert!(run(&coord, CliCmd::Vote { guid: "nope".into(), user: 1, down: false }).is_err());
    }
}
