mod cli;
mod commands;
mod logging;

use clap::Parser;
use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  logging::init(cli.log_level.as_deref())?;

  let output = match &cli.command {
    Command::Check(sources) => commands::check(&sources.to_sources())?,
    Command::Show { sources, json } => commands::show(&sources.to_sources(), *json)?,
    Command::Serialize { sources, model_dir } => commands::serialize(&sources.to_sources(), model_dir)?,
    Command::Lr { sources, steps, every } => commands::learning_rates(&sources.to_sources(), steps, *every)?,
    Command::Plan(sources) => commands::plan(&sources.to_sources())?,
    Command::Experiments => commands::experiments(),
    Command::Anchors {
      boxes,
      k,
      scale,
      seed,
      max_iter,
    } => commands::anchors(boxes, *k, *scale, *seed, *max_iter)?,
  };
  print!("{}", output);
  Ok(())
}
