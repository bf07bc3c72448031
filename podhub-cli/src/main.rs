mod cli;
mod commands;

use std::io;
use std::sync::Arc;

use clap::Parser;
use podhub::auth::RolePolicy;
use podhub::config::PodhubConfig;
use podhub::events::{Fanout, JsonLinesSink, LogSink};
use podhub::storage::new_store;
use podhub::ClaimCoordinator;

use cli::Args;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let file_cfg = match &args.config {
        Some(path) => PodhubConfig::load(path)?,
        None => PodhubConfig::default(),
    };
    let config = args.merge_into_config(file_cfg.apply_env());

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();
    log::debug!("config: {config:?}");

    let store = new_store(&config.store_config())?;
    let mut sink = Fanout::new().with(Arc::new(LogSink));
    if args.emit_events {
        sink = sink.with(Arc::new(JsonLinesSink::new(io::stdout())));
    }
    let coord = ClaimCoordinator::new(store, Arc::new(RolePolicy::from(&config.policy)), Arc::new(sink));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    commands::execute(args.command, &coord, &mut out)
}
