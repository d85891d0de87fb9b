use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pkl", about = "Inspect, verify and net-map package files", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Linker configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra directory searched for imported packages
    #[arg(long = "search-path", global = true)]
    pub search_path: Vec<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the package summary
    Info(FileArgs),
    /// List the name table
    Names(FileArgs),
    /// List the import table
    Imports(FileArgs),
    /// List the export table
    Exports(FileArgs),
    /// Resolve every import against its providing package
    Verify(VerifyArgs),
    /// Lay out the network object map for a set of packages
    Netmap(NetmapArgs),
}

#[derive(Args)]
pub struct FileArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct VerifyArgs {
    pub file: PathBuf,
    /// Report unresolved imports without failing
    #[arg(long)]
    pub forgiving: bool,
}

#[derive(Args)]
pub struct NetmapArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info() {
        let cli = Cli::try_parse_from(["pkl", "info", "Level.pkg"]).unwrap();
        if let Command::Info(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("Level.pkg"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_verify_forgiving() {
        let cli = Cli::try_parse_from(["pkl", "verify", "--forgiving", "Level.pkg"]).unwrap();
        if let Command::Verify(args) = cli.command {
            assert!(args.forgiving);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_netmap_needs_files() {
        assert!(Cli::try_parse_from(["pkl", "netmap"]).is_err());
        let cli = Cli::try_parse_from(["pkl", "netmap", "A.pkg", "B.pkg"]).unwrap();
        if let Command::Netmap(args) = cli.command {
            assert_eq!(args.files.len(), 2);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_options() {
        let cli = Cli::try_parse_from([
            "pkl",
            "exports",
            "Level.pkg",
            "--format",
            "json",
            "--search-path",
            "content",
            "--search-path",
            "maps",
            "--config",
            "pkl.toml",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.search_path, vec![PathBuf::from("content"), PathBuf::from("maps")]);
        assert_eq!(cli.config, Some(PathBuf::from("pkl.toml")));
        assert!(cli.verbose);
    }
}
