use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Groups dashcam clips into journeys and exports them as one file")]
pub struct Cli {
    /// Folder holding the dashcam clips
    #[arg(value_name = "FOLDER")]
    pub folder: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lists the journeys found in the folder (the default)
    List,
    /// Gives a journey a name, stored next to the clips
    Rename(RenameArgs),
    /// Joins or re-encodes a journey into one file
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Journey number as shown by `list`
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub journey: u32,

    /// New name; several words are joined with spaces
    #[arg(required = true, num_args = 1..)]
    pub name: Vec<String>,
}

impl RenameArgs {
    pub fn name(&self) -> String {
        self.name.join(" ")
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Journey number as shown by `list`
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub journey: u32,

    /// Re-encode using the configured video settings instead of copying
    #[arg(long, default_value_t = false)]
    pub resample: bool,

    /// Folder for the exported file; overrides the configured one
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    pub output: Option<PathBuf>,
}

/// Zero-based position of a one-based journey number.
pub fn journey_index(number: u32) -> usize {
    number.saturating_sub(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_alone_lists() {
        let cli = Cli::parse_from(["dashcam-wrangler", "clips"]);
        assert_eq!(cli.folder, PathBuf::from("clips"));
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["dashcam-wrangler", "clips", "list"]);
        assert!(matches!(cli.command, Some(Commands::List)));
    }

    #[test]
    fn test_parse_export() {
        let cli = Cli::parse_from(["dashcam-wrangler", "clips", "export", "2", "--resample", "-o", "out"]);
        match cli.command {
            Some(Commands::Export(args)) => {
                assert_eq!(journey_index(args.journey), 1);
                assert!(args.resample);
                assert_eq!(args.output, Some(PathBuf::from("out")));
            }
            other => panic!("expected export, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rename_joins_words() {
        let cli = Cli::parse_from(["dashcam-wrangler", "clips", "rename", "1", "Coast", "road"]);
        match cli.command {
            Some(Commands::Rename(args)) => {
                assert_eq!(journey_index(args.journey), 0);
                assert_eq!(args.name(), "Coast road");
            }
            other => panic!("expected rename, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Cli::try_parse_from(["dashcam-wrangler"]).is_err());
        assert!(Cli::try_parse_from(["dashcam-wrangler", "clips", "export", "0"]).is_err());
        assert!(Cli::try_parse_from(["dashcam-wrangler", "clips", "export", "x"]).is_err());
        assert!(Cli::try_parse_from(["dashcam-wrangler", "clips", "rename", "1"]).is_err());
        assert!(Cli::try_parse_from(["dashcam-wrangler", "clips", "burn"]).is_err());
    }
}
