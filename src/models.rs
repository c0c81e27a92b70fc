use jiff::{Timestamp, civil::Date};
use serde::{Deserialize, Serialize};

/// One screening of a film.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Showtime {
    /// Local clock time, always `HH:MM` in 24-hour form.
    pub time: String,
    pub theater: String,
    pub room: Option<String>,
    pub is_original_language: bool,
    #[serde(default)]
    pub is_3d: bool,
    pub booking_url: Option<String>,
}

/// A location a listing was scraped from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TheaterRef {
    pub id: String,
    pub name: String,
}

/// A film's listing for one calendar date.
///
/// `(title, date)` is the identity used for upserts. Records coming out of an
/// extractor have no `id` and no timestamps; records read back from a
/// repository have all three.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    pub title: String,
    pub original_title: Option<String>,
    pub date: Date,
    pub image_url: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "duration", alias = "duration_minutes")]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub rating: Option<f64>,
    pub showtimes: Vec<Showtime>,
    #[serde(default)]
    pub is_original_language: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theater: Option<TheaterRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub theaters: Vec<TheaterRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl Movie {
    pub fn new(title: impl Into<String>, date: Date) -> Self {
        Self {
            id: None,
            title: title.into(),
            original_title: None,
            date,
            image_url: None,
            description: None,
            duration_minutes: None,
            genres: Vec::new(),
            rating: None,
            showtimes: Vec::new(),
            is_original_language: false,
            theater: None,
            theaters: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Keeps only original-language screenings. Returns `None` when the film
    /// has none left.
    pub fn original_language_only(mut self) -> Option<Self> {
        self.showtimes.retain(|s| s.is_original_language);
        (!self.showtimes.is_empty()).then_some(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Theater {
    pub id: i32,
    pub name: String,
    pub address: Option<String>,
    pub city: String,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub features: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Payload for theater ingestion; `name` is the upsert identity.
#[derive(Clone, Debug, Deserialize)]
pub struct NewTheater {
    pub name: String,
    pub address: Option<String>,
    pub city: String,
    pub website: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl NewTheater {
    /// Features are a set: sorted, without duplicates or blanks.
    pub fn normalized_features(&self) -> Vec<String> {
        let mut features: Vec<String> = self
            .features
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        features.sort();
        features.dedup();
        features
    }
}
