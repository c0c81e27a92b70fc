use std::collections::HashMap;

use crate::models::{Movie, TheaterRef};

/// Collapses records that share an exact title into one per film.
///
/// The first record seen under a title is kept as-is; later ones contribute
/// their showtimes (appended, duplicates kept), their location references and
/// their original-language flag. Location references are appended once per
/// record, repeats included. Output keeps first-seen order.
pub fn merge_by_title(movies: Vec<Movie>) -> Vec<Movie> {
    let mut merged: Vec<Movie> = Vec::with_capacity(movies.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for movie in movies {
        match index.get(&movie.title) {
            Some(&at) => absorb(&mut merged[at], movie),
            None => {
                index.insert(movie.title.clone(), merged.len());
                merged.push(movie);
            },
        }
    }

    merged
}

fn absorb(canonical: &mut Movie, other: Movie) {
    if canonical.theaters.is_empty() {
        canonical.theaters.extend(canonical.theater.clone());
    }
    canonical.theaters.extend(location_refs(&other));

    canonical.is_original_language |= other.is_original_language;
    canonical.showtimes.extend(other.showtimes);
}

/// A record that already went through a merge carries its locations in
/// `theaters`; otherwise its single `theater` is all there is.
fn location_refs(movie: &Movie) -> Vec<TheaterRef> {
    if movie.theaters.is_empty() {
        movie.theater.iter().cloned().collect()
    } else {
        movie.theaters.clone()
    }
}
