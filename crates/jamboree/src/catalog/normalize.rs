//! Map loosely-shaped catalog JSON onto [`Track`].
//!
//! Providers disagree on key names and nesting, so every field has an ordered
//! list of candidates. Record mapping never fails; only a document whose
//! overall shape is unrecognizable is an error.

use super::CatalogError;
use crate::types::Track;
use serde_json::{Map, Value};

type Object = Map<String, Value>;

const ID_KEYS: &[&str] = &["id", "song_id", "_id"];
const TITLE_KEYS: &[&str] = &["title", "name", "song_name"];
const ARTIST_KEYS: &[&str] = &[
    "artist",
    "artists",
    "primaryArtists",
    "primary_artists",
    "subtitle",
    "song_artist",
];
const LINK_KEYS: &[&str] = &["link", "url", "perma_url"];
const IMAGE_KEYS: &[&str] = &["image", "thumbnail", "cover"];
const STREAM_KEYS: &[&str] = &[
    "stream",
    "stream_url",
    "audio",
    "audio_url",
    "download_url",
    "downloadUrl",
];

/// Extract the result list from a search response.
///
/// Accepts a bare array, `data: [...]`, `data: {results: [...]}` or
/// `results: [...]`. Entries without an id or title are dropped.
pub fn search_results(doc: &Value) -> Result<Vec<Track>, CatalogError> {
    let list = match doc {
        Value::Array(items) => Some(items),
        Value::Object(obj) => {
            let nested = match obj.get("data") {
                Some(Value::Array(items)) => Some(items),
                Some(Value::Object(data)) => data.get("results").and_then(Value::as_array),
                _ => None,
            };
            nested.or_else(|| obj.get("results").and_then(Value::as_array))
        }
        _ => None,
    };

    let items = list.ok_or(CatalogError::UnrecognizedShape("search response"))?;
    Ok(items
        .iter()
        .filter_map(Value::as_object)
        .map(track_from_object)
        .filter(|t| !t.id.is_empty() && !t.title.is_empty())
        .collect())
}

/// Extract one track from a detail response.
///
/// Prefers `data` (an object, or the first object of an array) and falls
/// back to the document itself.
pub fn track_detail(doc: &Value) -> Result<Track, CatalogError> {
    let obj = doc
        .as_object()
        .ok_or(CatalogError::UnrecognizedShape("track detail"))?;

    let data = match obj.get("data") {
        Some(Value::Object(data)) => Some(data),
        Some(Value::Array(items)) => items.first().and_then(Value::as_object),
        _ => None,
    };
    Ok(track_from_object(data.unwrap_or(obj)))
}

/// Map one record. Total: missing fields come back empty.
pub fn track_from_object(obj: &Object) -> Track {
    let id = first_string(obj, ID_KEYS);
    let title = first_string(obj, TITLE_KEYS);

    let mut artist = first_string(obj, ARTIST_KEYS);
    if artist.is_empty() {
        artist = nested_artist(obj);
    }
    let artist = clean_artist(&artist);

    let link = first_string(obj, LINK_KEYS);

    let mut image = first_string(obj, IMAGE_KEYS);
    if image.is_empty() {
        if let Some(variants) = obj.get("image").and_then(Value::as_array) {
            image = best_quality_url(variants);
        }
    }

    let mut stream = first_string(obj, STREAM_KEYS);
    if stream.is_empty() {
        for key in ["downloadUrl", "download_url"] {
            if let Some(variants) = obj.get(key).and_then(Value::as_array) {
                stream = best_quality_url(variants);
            }
        }
    }

    Track {
        id,
        title,
        artist,
        image: non_empty(image),
        link: non_empty(link),
        stream_url: non_empty(stream),
    }
}

/// The first candidate key holding a string, even an empty one.
fn first_string(obj: &Object, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// Quality variants are listed lowest first; take the last usable `url`.
fn best_quality_url(variants: &[Value]) -> String {
    variants
        .iter()
        .filter_map(|v| v.get("url").and_then(Value::as_str))
        .filter(|u| !u.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}

fn first_name(items: &[Value]) -> Option<String> {
    items
        .iter()
        .filter_map(|item| item.get("name").and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// Artist names buried in arrays of `{name}` objects.
fn nested_artist(obj: &Object) -> String {
    let artists = obj.get("artists");

    let from_list = artists.and_then(Value::as_array).and_then(|a| first_name(a));
    let from_groups = || {
        let groups = artists.and_then(Value::as_object)?;
        ["primary", "all"]
            .iter()
            .filter_map(|k| groups.get(*k).and_then(Value::as_array))
            .find_map(|a| first_name(a))
    };
    let from_primary = || {
        obj.get("primaryArtists")
            .and_then(Value::as_array)
            .and_then(|a| first_name(a))
    };

    from_list
        .or_else(from_groups)
        .or_else(from_primary)
        .unwrap_or_default()
}

/// Strip album suffixes like "Artist • Album" or "Artist - Single".
fn clean_artist(raw: &str) -> String {
    let trimmed = raw.trim();
    let head = if let Some((head, _)) = trimmed.split_once('•') {
        head
    } else if let Some((head, _)) = trimmed.split_once(" - ") {
        head
    } else {
        trimmed
    };
    head.trim().to_string()
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_artist() {
        assert_eq!(clean_artist("  Arijit Singh • Album X "), "Arijit Singh");
        assert_eq!(clean_artist("Band - Single"), "Band");
        assert_eq!(clean_artist("AC-DC"), "AC-DC");
        assert_eq!(clean_artist("   "), "");
    }

    #[test]
    fn test_empty_string_key_stops_fallback() {
        let obj = json!({"title": "", "name": "Other"});
        let track = track_from_object(obj.as_object().unwrap());
        assert_eq!(track.title, "");
    }

    #[test]
    fn test_download_url_beats_camel_case_variant() {
        let obj = json!({
            "downloadUrl": [{"url": "https://a/camel"}],
            "download_url": [{"quality": "320kbps", "url": "https://a/snake"}],
        });
        let track = track_from_object(obj.as_object().unwrap());
        assert_eq!(track.stream_url.as_deref(), Some("https://a/snake"));
    }

    #[test]
    fn test_non_object_detail_is_error() {
        assert!(matches!(
            track_detail(&json!("nope")),
            Err(CatalogError::UnrecognizedShape(_))
        ));
    }
}
