use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use color_print::cstr;
use log::info;
use std::env;
use std::path::PathBuf;

mod clean;
pub mod config;
mod list;
pub mod tree;
pub mod utils;
pub mod vbox;

const AFTER_HELP: &str = cstr!(
    r#"
<bold><underline>ENVIRONMENT VARIABLES:</underline></bold>
  <bold>VBSNAP_CONFIG</bold>
      Path to the TOML configuration file (e.g., ~/.config/vbsnap.toml).
      Supported keys: 'vboxmanage' (path to the VBoxManage executable)
      and 'protected-snapshots' (array of protected name substrings).
"#
);

#[derive(Parser)]
#[command(
    about,
    version,
    after_help = AFTER_HELP
)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete a snapshot and its children recursively, keeping protected snapshots
    Clean(clean::Clean),
    /// Print the snapshot tree of a VM
    List(list::List),
}

impl Commands {
    fn execute(self, vbox: &vbox::Vbox, protected: Option<Vec<String>>) -> Result<()> {
        match self {
            Commands::Clean(cmd) => cmd.execute(vbox, protected),
            Commands::List(cmd) => cmd.execute(vbox),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    info!("Starting vbsnap");

    // Parse CLI arguments, handling errors explicitly
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Print any parsing errors and exit
            e.print()?;
            std::process::exit(1);
        }
    };

    // If no subcommand is provided, explicitly print help and exit
    if cli.command.is_none() {
        Cli::command().print_help()?;
        return Ok(());
    }

    let config_path = cli.config.or_else(|| {
        env::var("VBSNAP_CONFIG")
            .ok()
            .and_then(|s| PathBuf::from(s).canonicalize().ok())
    });

    let (vboxmanage, protected) = config::load(config_path)?;
    let vbox = vbox::Vbox::new(vboxmanage);
    cli.command.unwrap().execute(&vbox, protected)
}
