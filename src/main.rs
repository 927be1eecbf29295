use clap::Parser;
use plex::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
