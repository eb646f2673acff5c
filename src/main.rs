//! `yomu`: browse, read and track manga from the command line.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use yomu_api::models::{ContentRating, Demographic, ReadingStatus, SortOption, TagMode};

#[derive(Parser)]
#[command(name = "yomu", version, about = "Browse, read and track manga from the command line")]
struct Cli {
    /// Configuration file (defaults to the platform configuration directory)
    #[arg(long, short, env = "YOMU_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in with a username, password and personal API client
    Login {
        username: String,
        #[arg(long, env = "YOMU_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, env = "YOMU_CLIENT_ID")]
        client_id: String,
        #[arg(long, env = "YOMU_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,
    },
    /// Forget every stored credential
    Logout,
    /// Show who is logged in, checking the stored session with the service
    Whoami,
    /// Search the catalog
    Browse(BrowseArgs),
    /// List an entry's chapters
    Chapters {
        entry_id: String,
        /// Number of pages of chapters to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Open a chapter and prefetch its pages
    Read {
        chapter_id: String,
        /// Jump to this page (zero-based) instead of the saved one
        #[arg(long)]
        page: Option<usize>,
    },
    /// Reading-status library
    #[command(subcommand)]
    Library(LibraryCommand),
    /// Followed entries
    #[command(subcommand)]
    Follows(FollowCommand),
    /// Latest chapters of followed entries
    Feed,
}

#[derive(clap::Args)]
struct BrowseArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    artist: Option<String>,
    #[arg(long, default_value = "latestUpload", value_parser = parse::<SortOption>)]
    sort: SortOption,
    /// Only entries with this tag (by name); repeatable
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Hide entries with this tag (by name); repeatable
    #[arg(long = "exclude-tag")]
    excluded_tags: Vec<String>,
    /// Whether included tags must all match (`and`) or any (`or`)
    #[arg(long, default_value = "and", value_parser = parse::<TagMode>)]
    tag_mode: TagMode,
    #[arg(long, value_parser = parse::<Demographic>)]
    demographic: Option<Demographic>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long, default_value = "safe", value_parser = parse::<ContentRating>)]
    content_rating: ContentRating,
    /// Number of result pages to load
    #[arg(long, default_value_t = 1)]
    pages: u32,
}

#[derive(Subcommand)]
enum LibraryCommand {
    /// Fetch the library and list it by status
    List,
    /// Set an entry's reading status
    Set {
        entry_id: String,
        #[arg(value_parser = parse::<ReadingStatus>)]
        status: ReadingStatus,
    },
    /// Remove an entry from the library
    Remove { entry_id: String },
}

#[derive(Subcommand)]
enum FollowCommand {
    /// Sync and list followed entries
    List,
    /// Follow an entry, or unfollow it if already followed
    Toggle { entry_id: String },
}

fn parse<T: FromStr<Err = yomu_api::error::Error>>(value: &str) -> Result<T, String> {
    value.parse().map_err(|err: yomu_api::error::Error| (*err).to_string())
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let app = commands::App::build(cli.config.as_deref()).await?;
    match cli.command {
        Command::Login { username, password, client_id, client_secret } => {
            app.login(username, password, client_id, client_secret).await
        },
        Command::Logout => app.logout().await,
        Command::Whoami => app.whoami().await,
        Command::Browse(args) => app.browse(args).await,
        Command::Chapters { entry_id, pages } => app.chapters(&entry_id, pages).await,
        Command::Read { chapter_id, page } => app.read(&chapter_id, page).await,
        Command::Library(LibraryCommand::List) => app.library_list().await,
        Command::Library(LibraryCommand::Set { entry_id, status }) => app.library_set(&entry_id, Some(status)).await,
        Command::Library(LibraryCommand::Remove { entry_id }) => app.library_set(&entry_id, None).await,
        Command::Follows(FollowCommand::List) => app.follows_list().await,
        Command::Follows(FollowCommand::Toggle { entry_id }) => app.follows_toggle(&entry_id).await,
        Command::Feed => app.feed().await,
    }
}
