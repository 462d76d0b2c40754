use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "estate", about = "Inspect, back up, and migrate entity stores", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Backend configuration file
    #[arg(short, long, global = true, default_value = "estate.toml")]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the stored state of one entity
    Get(GetArgs),
    /// List stored entities
    List(ListArgs),
    /// Remove one entity
    Remove(RemoveArgs),
    /// Count entities by type
    Stats,
    /// Write every entity to a backup file
    Backup(BackupArgs),
    /// Replace the store's contents with a backup file
    Restore(RestoreArgs),
    /// Copy every entity into the backend of another configuration
    Migrate(MigrateArgs),
    /// Print the access-list digest of a password
    HashPassword(HashPasswordArgs),
}

#[derive(Args)]
pub struct GetArgs {
    pub reference: String,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only entities of this type
    #[arg(long = "type")]
    pub entity_type: Option<String>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub reference: String,
}

#[derive(Args)]
pub struct BackupArgs {
    /// Destination file; a `.zst` extension selects zstd compression
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct RestoreArgs {
    /// Backup file; a `.zst` extension selects zstd decompression
    #[arg(short, long)]
    pub input: PathBuf,
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Configuration file of the target backend
    #[arg(long)]
    pub to: PathBuf,
}

#[derive(Args)]
pub struct HashPasswordArgs {
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["estate", "list", "--type", "User", "-v", "--config", "other.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        match cli.command {
            Command::List(args) => {
                assert_eq!(args.entity_type.as_deref(), Some("User"));
                assert_eq!(args.limit, None);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn backup_requires_output() {
        assert!(Cli::try_parse_from(["estate", "backup"]).is_err());
        let cli = Cli::try_parse_from(["estate", "backup", "-o", "out.ndjson.zst"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("estate.toml"));
        assert_eq!(cli.format, OutputFormat::Text);
    }
}
