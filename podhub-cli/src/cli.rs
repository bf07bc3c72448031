use std::path::PathBuf;

use clap::{Parser, Subcommand};
use podhub::config::PodhubConfig;
use podhub::storage::Backend;

#[derive(Parser, Debug)]
#[command(name = "podhub", version, about = "Podhub episode catalog and claim tool")]
pub struct Args {
    /// TOML config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub db_path: Option<PathBuf>,
    /// Use a throwaway in-memory store
    #[arg(long, default_value_t = false)]
    pub memory: bool,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Print claim events as JSON lines on stdout
    #[arg(long, default_value_t = false)]
    pub emit_events: bool,
    #[command(subcommand)]
    pub command: CliCmd,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCmd {
    /// Register or update a user
    AddUser {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        name: String,
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Register or update an episode
    AddEpisode {
        #[arg(long)]
        guid: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        published_at: Option<u64>,
    },
    /// Attach a topic to an episode
    AddTopic {
        #[arg(long)]
        guid: String,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        starts_at: Option<u32>,
        #[arg(long = "subtopic")]
        subtopics: Vec<String>,
    },
    /// Up- or down-vote an episode
    Vote {
        #[arg(long)]
        guid: String,
        #[arg(long)]
        user: u64,
        #[arg(long, default_value_t = false)]
        down: bool,
    },
    /// Flag an episode for moderation
    Flag {
        #[arg(long)]
        guid: String,
        #[arg(long)]
        user: u64,
        #[arg(long)]
        reason: String,
    },
    /// Print one episode
    Show {
        #[arg(long)]
        guid: String,
    },
    /// Print the most recently published episodes
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Claim an episode (authorization checked)
    Claim {
        #[arg(long)]
        guid: String,
        #[arg(long)]
        user: u64,
    },
    /// Drop your claim on an episode (authorization checked)
    Drop {
        #[arg(long)]
        guid: String,
        #[arg(long)]
        user: u64,
    },
    /// Claim an episode, bypassing authorization
    ForceClaim {
        #[arg(long)]
        guid: String,
        #[arg(long)]
        user: u64,
    },
    /// Remove any claim on an episode, bypassing authorization
    ForceDrop {
        #[arg(long)]
        guid: String,
    },
    /// Print row counts
    Stats,
}

impl Args {
    pub fn merge_into_config(&self, mut cfg: PodhubConfig) -> PodhubConfig {
        if let Some(p) = &self.db_path {
            cfg.db_path = p.clone();
        }
        if self.memory {
            cfg.backend = Backend::Memory;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        cfg
    }
}
