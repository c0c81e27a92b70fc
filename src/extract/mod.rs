//! Site-specific showtime extractors.
//!
//! Every extractor turns one cinema chain's markup into [`Movie`] records for
//! a calendar date. A listing that cannot be parsed is logged and skipped; an
//! unreachable page yields no movies. Only failures that make the whole
//! extractor unusable surface as `Err`.

mod cinessa;
mod spazio;
mod uci;
mod yelmo;

use std::sync::LazyLock;

use async_trait::async_trait;
use jiff::civil::Date;
use regex::Regex;
use scraper::{ElementRef, Selector};

pub use cinessa::CinessaExtractor;
pub use spazio::SpazioCinemaExtractor;
pub use uci::UciCinemasExtractor;
pub use yelmo::YelmoExtractor;

use crate::models::Movie;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Stable name used in logs and run reports.
    fn name(&self) -> &str;

    async fn extract_for_date(&self, date: Date) -> anyhow::Result<Vec<Movie>>;
}

/// Why a single listing or screening was skipped.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("listing has no title")]
    MissingTitle,
    #[error("screening has no readable time in {0:?}")]
    MissingTime(String),
    #[error("listing has no showtimes")]
    NoShowtimes,
}

/// Tokens that mark an original-language (subtitled) screening on every site.
pub const ORIGINAL_LANGUAGE_TOKENS: &[&str] = &["V.O.", "VOSE", "OV"];

/// Room reported for a screening whose markup names no screen.
pub const DEFAULT_ROOM: &str = "Sala standard";

pub fn room_or_default(room: Option<String>) -> Option<String> {
    Some(room.unwrap_or_else(|| DEFAULT_ROOM.to_string()))
}

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*min").expect("duration regex"));

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s*[:.h]\s*(\d{2})\s*(am|pm|a\.m\.|p\.m\.)?").expect("time regex")
});

static THREE_D_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^|[^0-9A-Z])3D($|[^0-9A-Z])").expect("3d regex"));

/// Compiles a selector written into the source. Panics only on a typo in a
/// literal, which every extractor's tests exercise.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

/// Whitespace-collapsed text content of an element.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Text of the first match of `sel` under `el`, if non-empty.
pub(crate) fn select_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel).next().map(text_of).filter(|t| !t.is_empty())
}

/// Extracts minutes from free text such as `"166 min"` or `"Durata: 95 min."`.
/// Anything without a number followed by `min` is `None`, as is zero.
pub fn parse_duration(text: &str) -> Option<u32> {
    DURATION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|&n| n > 0)
}

/// Whether `text` carries one of the original-language tokens, or one of the
/// site's `extra` markers. Matching is case-insensitive and token-aware, so
/// "OV" does not fire on words such as "MOVIE" or "NOVEMBER".
pub fn is_original_language(text: &str, extra: &[&str]) -> bool {
    let upper = text.to_uppercase();
    ORIGINAL_LANGUAGE_TOKENS.iter().any(|token| contains_token(&upper, token))
        || extra.iter().any(|marker| upper.contains(&marker.to_uppercase()))
}

fn contains_token(haystack: &str, token: &str) -> bool {
    haystack.match_indices(token).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + token.len()..].chars().next();
        let boundary = |c: Option<char>| c.is_none_or(|c| !c.is_alphanumeric());
        boundary(before) && (token.ends_with('.') || boundary(after))
    })
}

pub fn is_3d(text: &str) -> bool {
    THREE_D_RE.is_match(text)
}

/// Finds the first clock time in `text` and renders it as 24-hour `HH:MM`.
/// Accepts `20:45`, `20.45`, `20h45` and 12-hour forms like `8:45 PM`.
pub fn normalize_time(text: &str) -> Option<String> {
    TIME_RE.captures_iter(text).find_map(|caps| {
        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
        if let Some(meridiem) = caps.get(3) {
            let pm = meridiem.as_str().to_ascii_lowercase().starts_with('p');
            if hour == 0 || hour > 12 {
                return None;
            }
            hour = match (pm, hour) {
                (false, 12) => 0,
                (true, 12) => 12,
                (true, h) => h + 12,
                (false, h) => h,
            };
        }
        (hour < 24 && minute < 60).then(|| format!("{hour:02}:{minute:02}"))
    })
}

/// Resolves `href` against the site base URL. Only http(s) results are kept,
/// so `javascript:` links and bare fragments never leak into booking URLs.
pub fn resolve_url(base: &url::Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Splits a genre line such as `"Drammatico, Storico / Guerra"`.
pub fn split_genres(text: &str) -> Vec<String> {
    text.split([',', '/', '|'])
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

/// Text of `format`-matching elements around a screening node: the node's own
/// descendants, sibling tags, and any ancestor that itself matches. Used to
/// pick up version tags rendered next to the time. Tags nested inside sibling
/// screenings belong to those screenings and are ignored.
pub(crate) fn format_context(node: ElementRef<'_>, format: &Selector) -> String {
    let mut parts: Vec<String> = node.select(format).map(text_of).collect();

    if let Some(parent) = node.parent().and_then(ElementRef::wrap) {
        parts.extend(
            parent
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|sibling| sibling.id() != node.id() && format.matches(sibling))
                .map(text_of),
        );
    }

    for ancestor in node.ancestors().filter_map(ElementRef::wrap) {
        if format.matches(&ancestor) {
            parts.push(text_of(ancestor));
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;

    #[test]
    fn duration_is_parsed_from_free_text() {
        assert_eq!(parse_duration("166 min"), Some(166));
        assert_eq!(parse_duration("Durata: 95min."), Some(95));
        assert_eq!(parse_duration("2h 46 MIN"), Some(46));
        assert_eq!(parse_duration("two hours"), None);
        assert_eq!(parse_duration("166"), None);
        assert_eq!(parse_duration("0 min"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn original_language_tokens_are_case_insensitive() {
        assert!(is_original_language("20:45 V.O.", &[]));
        assert!(is_original_language("20:45 v.o.", &[]));
        assert!(is_original_language("VOSE 18:00", &[]));
        assert!(is_original_language("(vose)", &[]));
        assert!(is_original_language("18:00 OV", &[]));
        assert!(is_original_language("ov", &[]));
    }

    #[test]
    fn original_language_ignores_tokens_inside_words() {
        assert!(!is_original_language("20:45", &[]));
        assert!(!is_original_language("MOVIE NIGHT", &[]));
        assert!(!is_original_language("November preview", &[]));
        assert!(!is_original_language("Doppiato", &[]));
    }

    #[test]
    fn original_language_extra_markers() {
        assert!(is_original_language("21:00 Sottotitolato", &["sottotit"]));
        assert!(!is_original_language("21:00 Sottotitolato", &[]));
    }

    #[test]
    fn three_d_token() {
        assert!(is_3d("20:00 3D"));
        assert!(is_3d("3d"));
        assert!(is_3d("(3D)"));
        assert!(!is_3d("20:00"));
        assert!(!is_3d("13DAYS"));
    }

    #[test]
    fn times_normalize_to_24_hours() {
        assert_eq!(normalize_time("20:45").as_deref(), Some("20:45"));
        assert_eq!(normalize_time(" 9:05 V.O.").as_deref(), Some("09:05"));
        assert_eq!(normalize_time("20.45").as_deref(), Some("20:45"));
        assert_eq!(normalize_time("20h45").as_deref(), Some("20:45"));
        assert_eq!(normalize_time("8:45 PM").as_deref(), Some("20:45"));
        assert_eq!(normalize_time("12:10 am").as_deref(), Some("00:10"));
        assert_eq!(normalize_time("12:10 p.m.").as_deref(), Some("12:10"));
        assert_eq!(normalize_time("Sala 3 - 18:30").as_deref(), Some("18:30"));
        assert_eq!(normalize_time("25:00"), None);
        assert_eq!(normalize_time("Acquista"), None);
    }

    #[test]
    fn urls_resolve_against_base() {
        let base = url::Url::parse("https://ucicinemas.it").unwrap();
        assert_eq!(
            resolve_url(&base, "/booking/123").as_deref(),
            Some("https://ucicinemas.it/booking/123")
        );
        assert_eq!(
            resolve_url(&base, "https://tickets.example.com/x").as_deref(),
            Some("https://tickets.example.com/x")
        );
        assert_eq!(
            resolve_url(&base, "//cdn.example.com/p.jpg").as_deref(),
            Some("https://cdn.example.com/p.jpg")
        );
        assert_eq!(resolve_url(&base, "javascript:void(0)"), None);
        assert_eq!(resolve_url(&base, "#"), None);
        assert_eq!(resolve_url(&base, "  "), None);
    }

    #[test]
    fn genres_split_on_separators() {
        assert_eq!(split_genres("Drammatico, Storico / Guerra"), vec![
            "Drammatico",
            "Storico",
            "Guerra"
        ]);
        assert!(split_genres(" , ").is_empty());
    }

    #[test]
    fn format_context_ignores_tags_inside_sibling_screenings() {
        let html = Html::parse_fragment(
            r#"<ul><li class="t">17:30</li><li class="t">22:15 <span class="format">VOSE</span></li></ul>"#,
        );
        let first = html.select(&selector("li.t")).next().unwrap();
        assert_eq!(format_context(first, &selector(".format")), "");
    }

    #[test]
    fn format_context_reads_siblings_and_ancestors() {
        let html = Html::parse_fragment(
            r#"<div class="format">VOSE<ul><li><span class="lang">OV</span><a class="t">20:00</a></li></ul></div>"#,
        );
        let time = html.select(&selector("a.t")).next().unwrap();
        let ctx = format_context(time, &selector(".format, .lang"));
        assert!(ctx.contains("OV"));
        assert!(ctx.contains("VOSE"));
    }
}
