use std::sync::LazyLock;

use async_trait::async_trait;
use jiff::civil::Date;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::{
    Extractor, ParseError, format_context, is_3d, is_original_language, normalize_time,
    parse_duration, resolve_url, room_or_default, select_text, selector, text_of,
};
use crate::{
    fetch::{RenderRequest, SharedFetcher},
    models::{Movie, Showtime, TheaterRef},
};

const SITE: &str = "yelmo";
const THEATER_NAME: &str = "Yelmo Cinemas";

struct Selectors {
    container: Selector,
    title: Selector,
    original_title: Selector,
    poster: Selector,
    synopsis: Selector,
    duration: Selector,
    genre: Selector,
    language: Selector,
    showtime: Selector,
}

static SEL: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    container: selector(".movie-container"),
    title: selector(".movie-title"),
    original_title: selector(".original-title"),
    poster: selector("img.poster"),
    synopsis: selector(".synopsis"),
    duration: selector(".duration"),
    genre: selector(".genre"),
    language: selector(".language-tag"),
    showtime: selector(".showtime"),
});

pub struct YelmoExtractor {
    fetcher: SharedFetcher,
    base: url::Url,
}

impl YelmoExtractor {
    pub const BASE_URL: &str = "https://www.yelmocines.es";

    pub fn new(fetcher: SharedFetcher, base: url::Url) -> Self {
        Self { fetcher, base }
    }

    /// The billboard selects its day from the fragment, so the page only
    /// makes sense rendered.
    fn url_for(&self, date: Date) -> String {
        format!(
            "{}/cartelera/#{}",
            self.base.as_str().trim_end_matches('/'),
            date.strftime("%d-%m-%Y")
        )
    }

    fn parse_page(&self, html: &str, date: Date) -> Vec<Movie> {
        let doc = Html::parse_document(html);
        let mut movies = Vec::new();

        for (index, container) in doc.select(&SEL.container).enumerate() {
            match self.parse_container(container, date) {
                Ok(movie) => movies.push(movie),
                Err(err) => warn!(site = SITE, index, error = %err, "skipping listing"),
            }
        }

        movies
    }

    fn parse_container(&self, container: ElementRef<'_>, date: Date) -> Result<Movie, ParseError> {
        let title = select_text(container, &SEL.title).ok_or(ParseError::MissingTitle)?;

        let mut movie = Movie::new(title, date);
        movie.original_title =
            select_text(container, &SEL.original_title).or_else(|| Some(movie.title.clone()));
        movie.image_url = container
            .select(&SEL.poster)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| resolve_url(&self.base, src));
        movie.description = select_text(container, &SEL.synopsis);
        movie.duration_minutes =
            select_text(container, &SEL.duration).and_then(|d| parse_duration(&d));
        movie.genres = container.select(&SEL.genre).map(text_of).filter(|g| !g.is_empty()).collect();
        movie.theater = Some(TheaterRef { id: SITE.to_string(), name: THEATER_NAME.to_string() });

        for (slot, node) in container.select(&SEL.showtime).enumerate() {
            match self.parse_showtime(node) {
                Ok(showtime) => movie.showtimes.push(showtime),
                Err(err) => debug!(site = SITE, title = %movie.title, slot, error = %err, "skipping screening"),
            }
        }

        if movie.showtimes.is_empty() {
            return Err(ParseError::NoShowtimes);
        }

        let tagged = container.select(&SEL.language).any(|tag| is_original_language(&text_of(tag), &[]));
        movie.is_original_language = tagged || movie.showtimes.iter().any(|s| s.is_original_language);
        Ok(movie)
    }

    fn parse_showtime(&self, node: ElementRef<'_>) -> Result<Showtime, ParseError> {
        let text = text_of(node);
        let time = normalize_time(&text).ok_or_else(|| ParseError::MissingTime(text.clone()))?;
        let context = format!("{text} {}", format_context(node, &SEL.language));

        Ok(Showtime {
            time,
            theater: THEATER_NAME.to_string(),
            room: room_or_default(None),
            is_original_language: is_original_language(&context, &[]),
            is_3d: is_3d(&context),
            booking_url: node.value().attr("href").and_then(|h| resolve_url(&self.base, h)),
        })
    }
}

#[async_trait]
impl Extractor for YelmoExtractor {
    fn name(&self) -> &str {
        SITE
    }

    async fn extract_for_date(&self, date: Date) -> anyhow::Result<Vec<Movie>> {
        let url = self.url_for(date);
        info!(site = SITE, url = %url, "extracting listings");

        let request = RenderRequest::new(url.as_str()).wait_for(".movie-container");
        let Some(html) = self.fetcher.fetch_rendered(&request).await else {
            warn!(site = SITE, url = %url, "no markup retrieved");
            return Ok(Vec::new());
        };

        let movies = self.parse_page(&html, date);
        info!(site = SITE, date = %date, movies = movies.len(), "extracted listings");
        Ok(movies)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jiff::civil::date;

    use super::*;
    use crate::fetch::fixtures::FixtureFetcher;

    const PAGE: &str = r#"
        <section>
          <article class="movie-container">
            <img class="poster" src="/media/poor-things.jpg">
            <h2 class="movie-title">Pobres criaturas</h2>
            <h3 class="original-title">Poor Things</h3>
            <p class="synopsis">Bella Baxter huye con un abogado.</p>
            <span class="duration">141 min</span>
            <span class="genre">Comedia</span><span class="genre">Drama</span>
            <div class="session">
              <span class="language-tag">VOSE</span>
              <a class="showtime" href="/compra/11">18:10</a>
              <a class="showtime" href="/compra/12">22:00</a>
            </div>
            <div class="session">
              <a class="showtime" href="/compra/13">20:15</a>
            </div>
          </article>
          <article class="movie-container">
            <h2 class="movie-title">Wonka</h2>
            <a class="showtime" href="javascript:void(0)">16:00 3D</a>
          </article>
          <article class="movie-container">
            <img class="poster" src="/media/x.jpg">
          </article>
        </section>
    "#;

    fn extractor(fetcher: FixtureFetcher) -> YelmoExtractor {
        YelmoExtractor::new(Arc::new(fetcher), url::Url::parse(YelmoExtractor::BASE_URL).unwrap())
    }

    #[test]
    fn date_goes_in_the_fragment() {
        let ex = extractor(FixtureFetcher::new());
        assert_eq!(ex.url_for(date(2024, 3, 1)), "https://www.yelmocines.es/cartelera/#01-03-2024");
    }

    #[test]
    fn version_tags_mark_only_their_session() {
        let ex = extractor(FixtureFetcher::new());
        let movies = ex.parse_page(PAGE, date(2024, 3, 1));
        assert_eq!(movies.len(), 2);

        let poor_things = &movies[0];
        assert_eq!(poor_things.original_title.as_deref(), Some("Poor Things"));
        assert_eq!(poor_things.duration_minutes, Some(141));
        assert_eq!(poor_things.genres, vec!["Comedia", "Drama"]);
        assert_eq!(
            poor_things.image_url.as_deref(),
            Some("https://www.yelmocines.es/media/poor-things.jpg")
        );
        assert!(poor_things.is_original_language);

        let flags: Vec<(&str, bool)> = poor_things
            .showtimes
            .iter()
            .map(|s| (s.time.as_str(), s.is_original_language))
            .collect();
        assert_eq!(flags, vec![("18:10", true), ("22:00", true), ("20:15", false)]);
        assert_eq!(
            poor_things.showtimes[0].booking_url.as_deref(),
            Some("https://www.yelmocines.es/compra/11")
        );
    }

    #[test]
    fn script_links_are_not_booking_urls() {
        let ex = extractor(FixtureFetcher::new());
        let movies = ex.parse_page(PAGE, date(2024, 3, 1));
        let wonka = &movies[1];
        assert_eq!(wonka.original_title.as_deref(), Some("Wonka"));
        assert!(wonka.showtimes[0].is_3d);
        assert_eq!(wonka.showtimes[0].booking_url, None);
        assert!(!wonka.is_original_language);
    }

    #[tokio::test]
    async fn renders_the_billboard() {
        let url = "https://www.yelmocines.es/cartelera/#01-03-2024";
        let fetcher = Arc::new(FixtureFetcher::new().rendered(url, PAGE));
        let ex = YelmoExtractor::new(fetcher.clone(), url::Url::parse(YelmoExtractor::BASE_URL).unwrap());

        let movies = ex.extract_for_date(date(2024, 3, 1)).await.unwrap();
        assert_eq!(movies.len(), 2);
        assert!(fetcher.requests.lock().unwrap().is_empty());
        assert_eq!(fetcher.render_requests.lock().unwrap()[0].url, url);
    }
}
