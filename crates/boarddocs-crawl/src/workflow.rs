//! The crawl: years, meetings, agendas, items
//!
//! Every click that makes the site fetch something runs under a request
//! tracker, and the DOM is only read once the tracker reports the page
//! settled. Manifests already on disk are reused, so an interrupted crawl
//! picks up where it stopped.

use std::fmt;
use std::sync::Arc;

use boarddocs_browser::{OnceRequestTracker, RemotePage, RequestTracker};
use boarddocs_core::slug::item_slug;
use boarddocs_core::{
    DateRange, ItemManifest, MeetingCategory, MeetingItem, MeetingManifest, MeetingTitle, Result,
    ScrapeError, ScraperConfig, TimingSettings,
};
use boarddocs_store::ManifestStore;
use tracing::{debug, debug_span, info, info_span, warn, Instrument};

use crate::action::OnceAction;
use crate::download::Downloader;
use crate::links::{to_link, trim_order};
use crate::retry::RetryPolicy;
use crate::site::{self, evaluate_json, RawCategory, RawItemPage};

/// What to crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Case-insensitive substring an item name must contain
    pub query: Option<String>,
    /// Fetch attachments that are not on disk yet
    pub download: bool,
    pub dates: DateRange,
}

/// Counters reported at the end of a crawl
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub meetings_seen: usize,
    pub meetings_skipped: usize,
    pub meetings_scraped: usize,
    pub meetings_reused: usize,
    pub items_scraped: usize,
    pub items_reused: usize,
    pub items_filtered: usize,
    pub attachments_downloaded: usize,
    pub attachments_present: usize,
    pub attachments_unnamed: usize,
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "meetings: {} seen, {} outside date range, {} scraped, {} reused; \
             items: {} scraped, {} reused, {} filtered; \
             attachments: {} downloaded, {} already present, {} without a file name",
            self.meetings_seen,
            self.meetings_skipped,
            self.meetings_scraped,
            self.meetings_reused,
            self.items_scraped,
            self.items_reused,
            self.items_filtered,
            self.attachments_downloaded,
            self.attachments_present,
            self.attachments_unnamed
        )
    }
}

/// A meeting link in the year accordion
struct MeetingLink {
    year: usize,
    selector: String,
    title: String,
}

/// Drives one page through the site and fills the archive
pub struct Crawler {
    page: Arc<dyn RemotePage>,
    store: ManifestStore,
    downloader: Downloader,
    site_url: String,
    timing: TimingSettings,
    retry: RetryPolicy,
    options: CrawlOptions,
    summary: CrawlSummary,
}

impl Crawler {
    pub fn new(
        page: Arc<dyn RemotePage>,
        store: ManifestStore,
        config: &ScraperConfig,
        options: CrawlOptions,
    ) -> Result<Self> {
        Ok(Self {
            page,
            store,
            downloader: Downloader::new()?,
            site_url: config.site_url.clone(),
            timing: config.timing.clone(),
            retry: RetryPolicy::from(&config.retry),
            options,
            summary: CrawlSummary::default(),
        })
    }

    /// Counters so far; complete once [`Crawler::run`] returns
    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }

    pub async fn run(&mut self) -> Result<CrawlSummary> {
        self.open_site().await?;

        let years: Vec<String> =
            evaluate_json(&*self.page, &site::tag_years_script(), "year list").await?;
        info!("Meeting years: {:?}", years);

        for (index, year) in years.iter().enumerate() {
            if year == site::FEATURED_YEAR {
                // A subset of the other years
                continue;
            }
            let span = info_span!("year", year = %year);
            self.crawl_year(index).instrument(span).await?;
        }

        info!("Crawl finished: {}", self.summary);
        Ok(self.summary.clone())
    }

    async fn open_site(&self) -> Result<()> {
        if self.page.url() != self.site_url {
            info!("Navigating tab to {}", self.site_url);
            self.page.navigate(&self.site_url).await?;
        } else {
            debug!("Tab already at {}", self.site_url);
        }

        // Clicks are ignored unless the tab is active
        self.page.bring_to_front().await?;

        debug!("Clicking meetings tab");
        self.click_and_settle(site::MEETINGS_TAB, "meetings").await
    }

    /// Click `selector` and wait for the requests it causes
    async fn click_and_settle(&self, selector: &str, name: &str) -> Result<()> {
        let tracker = OnceRequestTracker::new(self.page.clone(), name)?;
        self.page.click(selector).await?;
        tokio::time::sleep(self.timing.click_pause()).await;
        tracker.wait_and_close(self.timing.request_timeout()).await
    }

    async fn crawl_year(&mut self, year: usize) -> Result<()> {
        debug!("Clicking meetings tab");
        self.page.click(site::MEETINGS_TAB).await?;
        debug!("Clicking meeting year");
        self.click_and_settle(&site::year_selector(year), "year").await?;

        let titles: Vec<String> =
            evaluate_json(&*self.page, &site::tag_meetings_script(year), "meeting list").await?;
        debug!("{} meetings listed", titles.len());

        for (index, title) in titles.into_iter().enumerate() {
            let link = MeetingLink {
                year,
                selector: site::meeting_selector(year, index),
                title,
            };
            self.crawl_meeting(&link).await?;
        }
        Ok(())
    }

    async fn crawl_meeting(&mut self, link: &MeetingLink) -> Result<()> {
        let title = MeetingTitle::parse(&link.title)?;
        let slug = title.slug();
        self.summary.meetings_seen += 1;

        if !self.options.dates.contains(title.date) {
            debug!("Skipping {}: outside the date range", slug);
            self.summary.meetings_skipped += 1;
            return Ok(());
        }

        let span = info_span!("meeting", slug = %slug);
        self.scrape_meeting(link, &title, &slug).instrument(span).await
    }

    async fn scrape_meeting(&mut self, link: &MeetingLink, title: &MeetingTitle, slug: &str) -> Result<()> {
        let agenda = OnceAction::new("open agenda");

        let meeting = match self.store.cached_meeting(slug).await? {
            Some(meeting) => {
                info!("Reusing meeting manifest");
                self.summary.meetings_reused += 1;
                meeting
            }
            None => {
                let meeting_url = self.open_meeting_title(link).await?;
                agenda.run(|| self.open_agenda(link, slug, true)).await?;

                let meeting = MeetingManifest {
                    date: title.ymd(),
                    meeting_slug: slug.to_string(),
                    meeting_type: title.meeting_type.clone(),
                    meeting_url,
                    categories: self.read_agenda().await?,
                };
                self.store.write_meeting(&meeting).await?;
                info!("Wrote meeting manifest with {} items", meeting.item_count());
                self.summary.meetings_scraped += 1;
                meeting
            }
        };

        for category in &meeting.categories {
            self.crawl_category(link, slug, category, &agenda).await?;
        }
        Ok(())
    }

    /// Show the meeting's title page and return its share URL
    async fn open_meeting_title(&self, link: &MeetingLink) -> Result<Option<String>> {
        if !self.page.is_visible(&link.selector).await? {
            debug!("Clicking meetings tab again");
            self.page.click(site::MEETINGS_TAB).await?;
        }
        if !self.page.is_visible(&link.selector).await? {
            debug!("Clicking meeting year header again");
            self.click_and_settle(&site::year_selector(link.year), "year").await?;
        }

        debug!("Clicking on meeting {:?}", link.title);
        self.click_and_settle(&link.selector, "meeting").await?;

        // The content pane is blank until the meeting has loaded
        self.page
            .wait_for_selector(site::MEETING_SHARE_BUTTON, self.timing.request_timeout())
            .await?;
        evaluate_json(
            &*self.page,
            &site::share_url_script(site::MEETING_SHARE_BUTTON),
            "meeting URL",
        )
        .await
    }

    async fn open_agenda(&self, link: &MeetingLink, slug: &str, title_open: bool) -> Result<()> {
        if !title_open {
            self.open_meeting_title(link).await?;
        }

        let found: bool =
            evaluate_json(&*self.page, &site::exists_script(site::AGENDA_BUTTON), "agenda button").await?;
        if !found {
            return Err(ScrapeError::Browser(format!(
                "Could not find agenda button for {}",
                slug
            )));
        }

        debug!("Clicking agenda for {}", slug);
        self.click_and_settle(site::AGENDA_BUTTON, "agenda").await
    }

    async fn read_agenda(&self) -> Result<Vec<MeetingCategory>> {
        let raw: Vec<RawCategory> = evaluate_json(&*self.page, site::agenda_script(), "agenda").await?;

        Ok(raw
            .into_iter()
            .map(|category| MeetingCategory {
                category_id: category.category_id,
                category_order: category.category_order.as_deref().map(trim_order),
                category_name: category.category_name,
                items: category
                    .items
                    .into_iter()
                    .map(|item| MeetingItem {
                        item_slug: item_slug(&item.item_order, item.item_id.as_deref(), &item.item_name),
                        item_id: item.item_id,
                        item_order: item.item_order,
                        item_name: item.item_name,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn crawl_category(
        &mut self,
        link: &MeetingLink,
        slug: &str,
        category: &MeetingCategory,
        agenda: &OnceAction,
    ) -> Result<()> {
        // One tracker for the whole category; every item click reuses it
        let tracker = RequestTracker::new(self.page.clone(), "item")?;
        let result = self.crawl_items(&tracker, link, slug, category, agenda).await;
        tracker.close();
        result
    }

    async fn crawl_items(
        &mut self,
        tracker: &RequestTracker,
        link: &MeetingLink,
        slug: &str,
        category: &MeetingCategory,
        agenda: &OnceAction,
    ) -> Result<()> {
        for item in &category.items {
            if !self.matches_query(&item.item_name) {
                debug!("Skipping agenda item that does not match query: {}", item.item_name);
                self.summary.items_filtered += 1;
                continue;
            }

            let span = debug_span!("item", slug = %item.item_slug);
            self.crawl_item(tracker, link, slug, item, agenda)
                .instrument(span)
                .await?;
        }
        Ok(())
    }

    fn matches_query(&self, item_name: &str) -> bool {
        match &self.options.query {
            Some(query) => item_name.to_lowercase().contains(&query.to_lowercase()),
            None => true,
        }
    }

    async fn crawl_item(
        &mut self,
        tracker: &RequestTracker,
        link: &MeetingLink,
        slug: &str,
        item: &MeetingItem,
        agenda: &OnceAction,
    ) -> Result<()> {
        let open_item = OnceAction::new("open item");

        let manifest = match self.store.cached_item(slug, &item.item_slug).await? {
            Some(manifest) => {
                debug!("Reusing item manifest");
                self.summary.items_reused += 1;
                manifest
            }
            None => {
                open_item
                    .run(|| self.open_item(tracker, link, slug, item, agenda))
                    .await?;
                let manifest = self.read_item(item).await?;
                self.store.write_item(slug, &manifest).await?;
                debug!("Wrote item manifest with {} links", manifest.links.len());
                self.summary.items_scraped += 1;
                manifest
            }
        };

        if !self.options.download {
            return Ok(());
        }

        for attachment in &manifest.links {
            if attachment.filename.is_empty() {
                warn!("No file name for attachment {}; not downloading", attachment.href);
                self.summary.attachments_unnamed += 1;
                continue;
            }
            let path = self
                .store
                .attachment_path(slug, &item.item_slug, &attachment.filename);
            if self.store.exists(&path).await? {
                debug!("File already exists; skipping {}", path.display());
                self.summary.attachments_present += 1;
                continue;
            }

            open_item
                .run(|| self.open_item(tracker, link, slug, item, agenda))
                .await?;
            self.downloader.download(&attachment.href, &path).await?;
            self.summary.attachments_downloaded += 1;
        }
        Ok(())
    }

    /// Show the item in the agenda pane
    async fn open_item(
        &self,
        tracker: &RequestTracker,
        link: &MeetingLink,
        slug: &str,
        item: &MeetingItem,
        agenda: &OnceAction,
    ) -> Result<()> {
        agenda.run(|| self.open_agenda(link, slug, false)).await?;

        let item_id = item.item_id.as_deref().unwrap_or("null");
        let link_selector = site::item_link_selector(item_id);
        let loaded_selector = site::item_loaded_selector(item_id);
        debug!(
            "Clicking on item link {} {} ({})",
            item.item_order, item.item_name, link_selector
        );

        let page = &self.page;
        let (link_selector, loaded_selector) = (link_selector.as_str(), loaded_selector.as_str());
        let request_timeout = self.timing.request_timeout();
        let click_pause = self.timing.click_pause();

        // The item link does not reliably load the item on the first click
        self.retry
            .run("item click", |_, timeout| async move {
                tokio::time::sleep(click_pause).await;
                tracker.wait(request_timeout).await?;
                page.click(link_selector).await?;
                tracker.wait(request_timeout).await?;
                page.wait_for_selector(loaded_selector, timeout).await?;
                // The input appears before the rest of the item has loaded
                page.wait_for_selector(site::ITEM_SHARE_BUTTON, timeout).await
            })
            .await
    }

    async fn read_item(&self, item: &MeetingItem) -> Result<ItemManifest> {
        let raw: RawItemPage = evaluate_json(&*self.page, site::item_script(), "item").await?;

        let inner_html = raw.inner_html.ok_or_else(|| {
            ScrapeError::Browser(format!("Item body not found for {}", item.item_slug))
        })?;
        let links = raw.links.into_iter().map(to_link).collect();

        Ok(ItemManifest {
            item: item.clone(),
            item_url: raw.item_url,
            links,
            inner_html: Some(inner_html),
        })
    }
}
