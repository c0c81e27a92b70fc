use std::{collections::HashSet, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use jiff::civil::Date;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::{
    Extractor, ParseError, format_context, is_3d, is_original_language, normalize_time,
    resolve_url, room_or_default, select_text, selector, text_of,
};
use crate::{
    fetch::{RenderRequest, SharedFetcher},
    merge::merge_by_title,
    models::{Movie, Showtime, TheaterRef},
};

const SITE: &str = "uci-cinemas";
const BRANCH_LINK: &str = r#"a[href^="/cinema/uci-cinemas"]"#;
/// Whole-text labels of purchase buttons that share the showtime markup.
const NON_SCREENING_LABELS: &[&str] = &["acquista", "prenota"];

struct Selectors {
    branch_link: Selector,
    container: Selector,
    title: Selector,
    description: Selector,
    image: Selector,
    tags: Selector,
    showtime: Selector,
    format: Selector,
}

static SEL: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    branch_link: selector(BRANCH_LINK),
    container: selector(".movie-container"),
    title: selector(".movie-title, h3"),
    description: selector(".movie-description, p"),
    image: selector("img[src]"),
    tags: selector(".language-tag, .format"),
    showtime: selector(".showtimes a, .showtime"),
    format: selector(".format"),
});

/// One UCI multiplex, discovered from the chain's cinema index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl Location {
    fn theater_ref(&self) -> TheaterRef {
        TheaterRef { id: self.id.clone(), name: self.name.clone() }
    }
}

/// UCI Cinemas, a multi-location chain. Every branch page is rendered and the
/// requested day picked from its calendar strip.
pub struct UciCinemasExtractor {
    fetcher: SharedFetcher,
    base: url::Url,
    max_locations: usize,
    branch_delay: Duration,
}

impl UciCinemasExtractor {
    pub const BASE_URL: &str = "https://ucicinemas.it";

    pub fn new(
        fetcher: SharedFetcher,
        base: url::Url,
        max_locations: usize,
        branch_delay: Duration,
    ) -> Self {
        Self { fetcher, base, max_locations, branch_delay }
    }

    fn index_url(&self) -> String {
        format!("{}/cinema", self.base.as_str().trim_end_matches('/'))
    }

    async fn list_locations(&self) -> Vec<Location> {
        let url = self.index_url();
        let request = RenderRequest::new(url.as_str()).wait_for(BRANCH_LINK);
        match self.fetcher.fetch_rendered(&request).await {
            Some(html) => self.parse_locations(&html),
            None => {
                warn!(site = SITE, url = %url, "could not load cinema index");
                Vec::new()
            },
        }
    }

    /// Branch links in page order, deduplicated by URL and capped at
    /// `max_locations`.
    fn parse_locations(&self, html: &str) -> Vec<Location> {
        let doc = Html::parse_document(html);
        let mut seen = HashSet::new();

        doc.select(&SEL.branch_link)
            .filter_map(|link| {
                let href = link.value().attr("href")?.trim_end_matches('/');
                let url = resolve_url(&self.base, href)?;
                let id = href
                    .rsplit('/')
                    .next()
                    .filter(|segment| !segment.is_empty())?
                    .to_string();
                let name = Some(text_of(link)).filter(|t| !t.is_empty()).unwrap_or_else(|| id.clone());
                Some(Location { id, name, url })
            })
            .filter(|loc| seen.insert(loc.url.clone()))
            .take(self.max_locations)
            .collect()
    }

    async fn extract_location(&self, location: &Location, date: Date) -> Vec<Movie> {
        let request = RenderRequest::new(location.url.as_str())
            .wait_for(".movie-container")
            .click(".calendar-day", day_labels(date));

        let Some(html) = self.fetcher.fetch_rendered(&request).await else {
            warn!(site = SITE, location = %location.id, "no markup retrieved");
            return Vec::new();
        };

        let movies = self.parse_location(&html, date, location);
        debug!(site = SITE, location = %location.id, movies = movies.len(), "parsed location");
        movies
    }

    fn parse_location(&self, html: &str, date: Date, location: &Location) -> Vec<Movie> {
        let doc = Html::parse_document(html);
        let mut movies = Vec::new();

        for (index, container) in doc.select(&SEL.container).enumerate() {
            match self.parse_container(container, date, location) {
                Ok(movie) => movies.push(movie),
                Err(err) => {
                    warn!(site = SITE, location = %location.id, index, error = %err, "skipping listing")
                },
            }
        }

        movies
    }

    fn parse_container(
        &self,
        container: ElementRef<'_>,
        date: Date,
        location: &Location,
    ) -> Result<Movie, ParseError> {
        let title = select_text(container, &SEL.title).ok_or(ParseError::MissingTitle)?;

        // Version tags on the card apply to all of its screenings.
        let card_original = container
            .select(&SEL.tags)
            .filter(|tag| !inside_showtime(*tag, container))
            .any(|tag| is_original_language(&text_of(tag), &[]));

        let mut movie = Movie::new(title, date);
        movie.original_title = Some(movie.title.clone());
        movie.description = select_text(container, &SEL.description);
        movie.image_url = container
            .select(&SEL.image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| resolve_url(&self.base, src));
        movie.theater = Some(location.theater_ref());

        for (slot, node) in container.select(&SEL.showtime).enumerate() {
            match self.parse_showtime(node, card_original, location) {
                Ok(Some(showtime)) => movie.showtimes.push(showtime),
                Ok(None) => {},
                Err(err) => debug!(site = SITE, title = %movie.title, slot, error = %err, "skipping screening"),
            }
        }

        if movie.showtimes.is_empty() {
            return Err(ParseError::NoShowtimes);
        }
        movie.is_original_language =
            card_original || movie.showtimes.iter().any(|s| s.is_original_language);
        Ok(movie)
    }

    /// `Ok(None)` for purchase buttons that share the showtime markup.
    fn parse_showtime(
        &self,
        node: ElementRef<'_>,
        card_original: bool,
        location: &Location,
    ) -> Result<Option<Showtime>, ParseError> {
        let text = text_of(node);
        let lower = text.to_lowercase();
        if text.is_empty() || NON_SCREENING_LABELS.contains(&lower.as_str()) {
            return Ok(None);
        }

        let time = normalize_time(&text).ok_or_else(|| ParseError::MissingTime(text.clone()))?;
        let room = room_or_default(select_text(node, &SEL.format));
        let context = format!("{text} {}", format_context(node, &SEL.format));

        Ok(Some(Showtime {
            time,
            theater: location.name.clone(),
            room,
            is_original_language: card_original || is_original_language(&context, &[]),
            is_3d: is_3d(&context),
            booking_url: (node.value().name() == "a")
                .then(|| node.value().attr("href"))
                .flatten()
                .and_then(|href| resolve_url(&self.base, href)),
        }))
    }
}

/// Tags nested in a screening describe that screening, not the whole card.
fn inside_showtime(tag: ElementRef<'_>, container: ElementRef<'_>) -> bool {
    tag.ancestors()
        .take_while(|node| node.id() != container.id())
        .filter_map(ElementRef::wrap)
        .any(|node| SEL.showtime.matches(&node))
}

/// Calendar buttons read either `01/03` or just the day number.
fn day_labels(date: Date) -> Vec<String> {
    vec![date.strftime("%d/%m").to_string(), date.day().to_string()]
}

#[async_trait]
impl Extractor for UciCinemasExtractor {
    fn name(&self) -> &str {
        SITE
    }

    async fn extract_for_date(&self, date: Date) -> anyhow::Result<Vec<Movie>> {
        let locations = self.list_locations().await;
        info!(site = SITE, locations = locations.len(), "discovered locations");

        let mut all = Vec::new();
        for (i, location) in locations.iter().enumerate() {
            if i > 0 && !self.branch_delay.is_zero() {
                tokio::time::sleep(self.branch_delay).await;
            }
            all.extend(self.extract_location(location, date).await);
        }

        let movies = merge_by_title(all);
        info!(site = SITE, date = %date, movies = movies.len(), "extracted listings");
        Ok(movies)
    }
}
