use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(name = "studydeck", version, about = "StudyDeck deck and flashcard store")]
pub struct Cli {
    /// Directory holding the store file and its backups (defaults to app data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Use a throwaway in-memory medium instead of the store file
    #[arg(long, global = true)]
    pub memory: bool,

    /// Refuse card writes for decks that do not exist
    #[arg(long, global = true)]
    pub require_deck: bool,

    /// Number of timestamped backups to keep (0 disables)
    #[arg(long, global = true, default_value_t = studydeck_json::DEFAULT_MAX_BACKUPS)]
    pub backups: usize,

    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Deck operations
    #[command(subcommand)]
    Deck(DeckCmd),
    /// Card operations
    #[command(subcommand)]
    Card(CardCmd),
    /// Report corrupt blobs, orphaned cards and count mismatches
    Check,
    /// Rewrite decks whose card count disagrees with their cards
    Repair,
    /// Export one deck
    Export(ExportCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum DeckCmd {
    Add { title: String },
    List,
    Show { deck: String },
    Rename { deck: String, title: String },
    Rm { deck: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum CardCmd {
    Add(CardAdd),
    List { #[arg(long)] deck: String },
    Rm { card_id: String, #[arg(long)] deck: String },
    Edit(CardEdit),
}

#[derive(Debug, Args, Clone)]
pub struct CardAdd {
    #[arg(long)]
    pub deck: String,
    #[arg(long)]
    pub front: String,
    #[arg(long)]
    pub back: String,
}

#[derive(Debug, Args, Clone)]
pub struct CardEdit {
    pub card_id: String,
    #[arg(long)]
    pub deck: String,
    #[arg(long)]
    pub front: Option<String>,
    #[arg(long)]
    pub back: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Txt,
}

#[derive(Debug, Args, Clone)]
pub struct ExportCmd {
    pub deck: String,
    #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,
    /// Output file (defaults to stdout)
    #[arg(long)]
    pub out: Option<PathBuf>,
}
