//! Command handlers: thin drivers over the core crates that print results.

use crate::BrowseArgs;
use exn::Exn;
use miette::{Result, miette};
use std::path::Path;
use std::sync::Arc;
use yomu_api::models::{Credentials, Entry, Filter, ReadingStatus};
use yomu_api::transport::HttpTransport;
use yomu_api::{Client, TransportHandle};
use yomu_catalog::{Catalog, ChapterFeed};
use yomu_config::Config;
use yomu_library::{Follows, Library};
use yomu_reader::{ChapterReader, PageCache, ProgressStore};
use yomu_session::Session;
use yomu_storage::StoreHandle;
use yomu_storage::backend::LocalStore;

/// Reduce an error tree to a report. The full tree goes to the debug log.
fn report<E: std::error::Error + Send + Sync + 'static>(err: Exn<E>) -> miette::Report {
    tracing::debug!("{err:?}");
    miette!("{}", *err)
}

pub struct App {
    config: Config,
    client: Client,
    session: Session,
    preferences: StoreHandle,
}

impl App {
    pub async fn build(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        }
        .map_err(report)?;

        let transport: TransportHandle = Arc::new(HttpTransport::from_config(&config.api).map_err(report)?);
        let client = Client::from_config(transport, &config.api).map_err(report)?;

        let state_dir = config.state_dir().map_err(report)?;
        let state_dir = std::path::absolute(&state_dir)
            .map_err(|err| miette!("invalid state directory {}: {err}", state_dir.display()))?;
        let secrets: StoreHandle = Arc::new(LocalStore::private("secrets", state_dir.join("secrets")).map_err(report)?);
        let preferences: StoreHandle =
            Arc::new(LocalStore::new("preferences", state_dir.join("preferences")).map_err(report)?);

        let session = Session::open(client.clone(), secrets, preferences.clone()).await.map_err(report)?;
        Ok(Self { config, client, session, preferences })
    }

    /// Resume the stored session, failing with a hint when there is none.
    async fn require_login(&self) -> Result<()> {
        match self.session.restore().await.map_err(report)? {
            true => Ok(()),
            false => Err(miette!(help = "run `yomu login` first", "not logged in")),
        }
    }

    fn title<'a>(&self, entry: &'a Entry) -> &'a str {
        entry.display_title(&self.config.api.language)
    }

    pub async fn login(&self, username: String, password: String, client_id: String, client_secret: String) -> Result<()> {
        let credentials = Credentials { username, password, client_id, client_secret };
        self.session.login(credentials).await.map_err(report)?;
        println!("Logged in as {}", self.session.state().username.unwrap_or_default());
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.session.logout().await.map_err(report)?;
        println!("Logged out");
        Ok(())
    }

    pub async fn whoami(&self) -> Result<()> {
        self.require_login().await?;
        println!("{}", self.session.state().username.unwrap_or_default());
        Ok(())
    }

    pub async fn browse(&self, args: BrowseArgs) -> Result<()> {
        let catalog = Catalog::from_config(self.client.clone(), &self.config.catalog);
        let mut filter = Filter::default().with_sort(args.sort).with_title(args.title.unwrap_or_default());
        filter.author = args.author.unwrap_or_default();
        filter.artist = args.artist.unwrap_or_default();
        filter.tag_mode = args.tag_mode;
        filter.demographic = args.demographic;
        filter.year = args.year;
        filter.content_rating = Some(args.content_rating);
        if !args.tags.is_empty() || !args.excluded_tags.is_empty() {
            let taxonomy = catalog.load_tags().await.map_err(report)?;
            let find = |name: &str| {
                taxonomy.find_by_name(name).map(|tag| tag.id.clone()).ok_or_else(|| miette!("unknown tag: {name}"))
            };
            for name in &args.tags {
                filter.include_tag(&find(name)?);
            }
            for name in &args.excluded_tags {
                filter.exclude_tag(&find(name)?);
            }
        }

        catalog.reset_and_load(filter).await.map_err(report)?;
        for _ in 1..args.pages {
            catalog.load_next_page().await.map_err(report)?;
        }
        let state = catalog.state();
        for entry in &state.entries {
            let year = entry.year.map(|year| format!(" ({year})")).unwrap_or_default();
            println!("{}  {}{year}", entry.id, self.title(entry));
        }
        println!("{} of {} entries", state.entries.len(), state.total);
        Ok(())
    }

    pub async fn chapters(&self, entry_id: &str, pages: u32) -> Result<()> {
        let feed = ChapterFeed::new(self.client.clone(), self.config.catalog.page_size);
        feed.reset_and_load(entry_id).await.map_err(report)?;
        for _ in 1..pages {
            feed.load_more(entry_id).await.map_err(report)?;
        }
        let state = feed.state();
        for chapter in &state.chapters {
            let groups: Vec<&str> = chapter.scanlation_groups().collect();
            println!("{}  {}  [{}]", chapter.id, chapter.label(), groups.join(", "));
        }
        if state.has_more {
            println!("More chapters available; use --pages to load them");
        }
        Ok(())
    }

    pub async fn read(&self, chapter_id: &str, page: Option<usize>) -> Result<()> {
        let progress = Arc::new(ProgressStore::open(self.preferences.clone()).await);
        let cache = PageCache::from_config(self.client.clone(), &self.config.reader);
        let mut reader =
            ChapterReader::new(self.client.clone(), cache, progress, self.config.reader.quality.into());

        let mut current = reader.open(chapter_id).await.map_err(report)?;
        if let Some(page) = page {
            current = reader.go_to(page).await.map_err(report)?.current_page;
        }
        let count = reader.page_count();
        println!("Page {} of {count}", current + 1);
        let requested = reader.cache().window(current);
        for index in 0..count {
            match reader.cache().image(index) {
                Some(image) => println!("  {index:>3}  {}x{}", image.width(), image.height()),
                None if requested.as_ref().is_some_and(|range| range.contains(&index)) => {
                    println!("  {index:>3}  failed to load")
                },
                None => {},
            }
        }
        Ok(())
    }

    pub async fn library_list(&self) -> Result<()> {
        self.require_login().await?;
        let library = Library::from_config(self.session.clone(), &self.config.library);
        library.sync().await.map_err(report)?;
        let state = library.state();
        for status in ReadingStatus::ALL {
            let records = state.with_status(status, &self.config.api.language);
            if records.is_empty() {
                continue;
            }
            println!("{status} ({})", records.len());
            for record in records {
                println!("  {}  {}", record.entry.id, self.title(&record.entry));
            }
        }
        Ok(())
    }

    pub async fn library_set(&self, entry_id: &str, status: Option<ReadingStatus>) -> Result<()> {
        self.require_login().await?;
        let entry = self.client.entry(entry_id).await.map_err(report)?;
        let library = Library::from_config(self.session.clone(), &self.config.library);
        library.update_status(&entry, status).await.map_err(report)?;
        match status {
            Some(status) => println!("{}: {status}", self.title(&entry)),
            None => println!("{}: removed from library", self.title(&entry)),
        }
        Ok(())
    }

    fn follows(&self) -> Follows {
        Follows::new(self.session.clone(), self.preferences.clone(), self.config.library.concurrency)
    }

    pub async fn follows_list(&self) -> Result<()> {
        let follows = self.follows();
        let cached = follows.load_local().await;
        tracing::debug!(cached, "Loaded saved follow list");
        self.require_login().await?;
        follows.sync().await.map_err(report)?;
        for entry in follows.state().entries.values() {
            println!("{}  {}", entry.id, self.title(entry));
        }
        Ok(())
    }

    pub async fn follows_toggle(&self, entry_id: &str) -> Result<()> {
        self.require_login().await?;
        let entry = self.client.entry(entry_id).await.map_err(report)?;
        let follows = self.follows();
        follows.load_local().await;
        match follows.toggle(&entry).await.map_err(report)? {
            true => println!("Following {}", self.title(&entry)),
            false => println!("No longer following {}", self.title(&entry)),
        }
        Ok(())
    }

    pub async fn feed(&self) -> Result<()> {
        self.require_login().await?;
        let items = self.follows().load_feed().await.map_err(report)?;
        for item in items {
            let published = item.published_at.map(|at| at.date().to_string()).unwrap_or_default();
            let group = item.group.as_deref().unwrap_or("no group");
            println!("{published}  {}  {}  [{group}]", item.entry_title, item.chapter.label());
        }
        Ok(())
    }
}
