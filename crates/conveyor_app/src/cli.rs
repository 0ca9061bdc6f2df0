use std::path::PathBuf;

use anyhow::{Result, bail};

pub const USAGE: &str = "\
Usage: conveyor [OPTIONS] [SOURCE DESTINATION]

Bring up a conveyor layout, load a pallet on SOURCE and move it to
DESTINATION over the best route (defaults: CNV1 to CNV9 on the
reference plant).

Options:
  --layout FILE   JSON layout description (default: reference plant)
  --config FILE   JSON timing configuration (default: ~/.conveyor/config.json)
  --no-reroute    Give up instead of rerouting when a hop is blocked
  -h, --help      Print this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub layout: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub source: String,
    pub destination: String,
    pub reroute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunOptions),
    Help,
}

/// Parse the arguments that follow the program name.
pub fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut layout = None;
    let mut config = None;
    let mut reroute = true;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--layout" => match args.next() {
                Some(path) => layout = Some(PathBuf::from(path)),
                None => bail!("--layout needs a file argument"),
            },
            "--config" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => bail!("--config needs a file argument"),
            },
            "--no-reroute" => reroute = false,
            flag if flag.starts_with('-') => bail!("Unknown option {flag}"),
            _ => positional.push(arg),
        }
    }

    let (source, destination) = match positional.as_slice() {
        [] => ("CNV1".to_string(), "CNV9".to_string()),
        [source, destination] => (source.clone(), destination.clone()),
        _ => bail!("Expected SOURCE and DESTINATION, got {} arguments", positional.len()),
    };

    Ok(Command::Run(RunOptions {
        layout,
        config,
        source,
        destination,
        reroute,
    }))
}
