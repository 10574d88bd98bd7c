//! Row sets → canonical entities
//!
//! Rows arrive in one of three declared shapes (see [`RowShape`]). Each
//! entity type knows how to read a single row in a given shape; the generic
//! [`normalize_all`] groups rows by primary key through one dedupe index
//! shared by every row set, so batches and backends merge cleanly.

use chrono::NaiveDate;
use lcat_common::models::{Artist, ArtistRole, Label, Release, Track};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

use crate::db::backend::{value_as_id, RawRow, RowSet, RowShape};
use crate::db::rest::EMBED_MEMBER_FIELD;

/// Artwork token for releases without cover art
pub const ARTWORK_PLACEHOLDER: &str = "/images/placeholder-artwork.svg";

/// Image token for artists without a picture
pub const IMAGE_PLACEHOLDER: &str = "/images/placeholder-artist.svg";

/// Display name for contributors whose artist row could not be read
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// An entity that can be read from backend rows
pub trait Normalize: Sized {
    /// Entity name for logs
    const ENTITY: &'static str;

    /// Read one row; `Err` names the missing required field
    fn from_row(row: &RawRow, shape: &RowShape) -> Result<Self, String>;

    /// Primary key used for grouping
    fn key(&self) -> &str;

    /// Fold a later row for the same key into this entity
    fn absorb(&mut self, _other: Self) {}
}

/// Normalize a single row set
pub fn normalize<T: Normalize>(set: &RowSet) -> Vec<T> {
    normalize_all(std::slice::from_ref(set))
}

/// Normalize several row sets into one list, in first-appearance order
pub fn normalize_all<T: Normalize>(sets: &[RowSet]) -> Vec<T> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut entities: Vec<T> = Vec::new();

    for set in sets {
        for row in &set.rows {
            let entity = match T::from_row(row, &set.shape) {
                Ok(entity) => entity,
                Err(reason) => {
                    warn!(entity = T::ENTITY, backend = %set.backend, "Skipping row: {}", reason);
                    continue;
                }
            };
            match index.get(entity.key()) {
                Some(&position) => entities[position].absorb(entity),
                None => {
                    index.insert(entity.key().to_string(), entities.len());
                    entities.push(entity);
                }
            }
        }
    }

    entities
}

fn text(row: &RawRow, column: &str) -> Option<String> {
    row.get(column).and_then(value_as_id)
}

fn int(row: &RawRow, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required(row: &RawRow, column: &str) -> Result<String, String> {
    text(row, column).ok_or_else(|| format!("missing required field '{}'", column))
}

/// Sub-row of the columns carrying `prefix`, with the prefix stripped
fn prefixed(row: &RawRow, prefix: &str) -> RawRow {
    row.iter()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|k| (k.to_string(), v.clone())))
        .collect()
}

impl Normalize for Artist {
    const ENTITY: &'static str = "artist";

    fn from_row(row: &RawRow, _shape: &RowShape) -> Result<Self, String> {
        Ok(Artist {
            id: required(row, "id")?,
            name: text(row, "name").unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            image_url: text(row, "image_url")
                .or_else(|| text(row, "profile_image_url"))
                .unwrap_or_else(|| IMAGE_PLACEHOLDER.to_string()),
            spotify_url: text(row, "spotify_url"),
            label_id: text(row, "label_id"),
            role: text(row, "role").map(|r| ArtistRole::parse(&r)),
        })
    }

    fn key(&self) -> &str {
        &self.id
    }
}

/// Placeholder contributor known only by id
pub fn stub_artist(id: &str) -> Artist {
    Artist {
        id: id.to_string(),
        name: UNKNOWN_ARTIST.to_string(),
        image_url: IMAGE_PLACEHOLDER.to_string(),
        spotify_url: None,
        label_id: None,
        role: None,
    }
}

fn contributors(row: &RawRow, shape: &RowShape) -> Vec<Artist> {
    match shape {
        RowShape::Flat => Vec::new(),
        RowShape::FlatJoined { prefix } => {
            let member = prefixed(row, prefix);
            // LEFT JOIN with no edge leaves every member column null
            if text(&member, "id").is_none() {
                return Vec::new();
            }
            Artist::from_row(&member, &RowShape::Flat).into_iter().collect()
        }
        RowShape::Nested { field } => {
            let Some(Value::Array(elements)) = row.get(field) else {
                return Vec::new();
            };
            elements
                .iter()
                .filter_map(|element| {
                    let element = element.as_object()?;
                    match element.get(EMBED_MEMBER_FIELD) {
                        Some(Value::Object(member)) => {
                            let mut member = member.clone();
                            if let Some(role) = element.get("role") {
                                member.insert("role".to_string(), role.clone());
                            }
                            Artist::from_row(&member, &RowShape::Flat).ok()
                        }
                        Some(_) => None,
                        None => Artist::from_row(element, &RowShape::Flat).ok(),
                    }
                })
                .collect()
        }
    }
}

impl Normalize for Release {
    const ENTITY: &'static str = "release";

    fn from_row(row: &RawRow, shape: &RowShape) -> Result<Self, String> {
        let mut release = Release {
            id: required(row, "id")?,
            title: required(row, "title")?,
            release_date: text(row, "release_date"),
            artwork_url: text(row, "artwork_url").unwrap_or_else(|| ARTWORK_PLACEHOLDER.to_string()),
            spotify_url: text(row, "spotify_url"),
            label_id: text(row, "label_id"),
            tracks: Vec::new(),
            artists: Vec::new(),
        };
        for artist in contributors(row, shape) {
            release.add_artist(artist);
        }
        Ok(release)
    }

    fn key(&self) -> &str {
        &self.id
    }

    fn absorb(&mut self, other: Self) {
        for artist in other.artists {
            self.add_artist(artist);
        }
        for track in other.tracks {
            if !self.tracks.iter().any(|t| t.id == track.id) {
                self.tracks.push(track);
            }
        }
    }
}

impl Normalize for Track {
    const ENTITY: &'static str = "track";

    fn from_row(row: &RawRow, _shape: &RowShape) -> Result<Self, String> {
        Ok(Track {
            id: required(row, "id")?,
            title: required(row, "title")?,
            track_number: int(row, "track_number").unwrap_or(0),
            duration_ms: int(row, "duration_ms").unwrap_or(0),
            release_id: required(row, "release_id")?,
            spotify_url: text(row, "spotify_url"),
            preview_url: text(row, "preview_url"),
        })
    }

    fn key(&self) -> &str {
        &self.id
    }
}

impl Normalize for Label {
    const ENTITY: &'static str = "label";

    fn from_row(row: &RawRow, _shape: &RowShape) -> Result<Self, String> {
        Ok(Label {
            id: required(row, "id")?,
            name: text(row, "display_name")
                .or_else(|| text(row, "name"))
                .ok_or_else(|| "missing required field 'name'".to_string())?,
        })
    }

    fn key(&self) -> &str {
        &self.id
    }
}

/// Calendar date from `YYYY-MM-DD[...]`, `YYYY-MM` or `YYYY`
///
/// Partial dates resolve to the first day of their period.
pub fn parse_release_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Some(head) = value.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            return Some(date);
        }
    }
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match value.split_once('-') {
        Some((year, month)) if year.len() == 4 && month.len() == 2 && digits(year) && digits(month) => {
            NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d").ok()
        }
        None if value.len() == 4 && digits(value) => {
            NaiveDate::parse_from_str(&format!("{}-01-01", value), "%Y-%m-%d").ok()
        }
        _ => None,
    }
}

/// Newest first; undated releases last; ties broken by id
pub fn sort_by_release_date_desc(releases: &mut [Release]) {
    releases.sort_by(|a, b| {
        let da = a.release_date.as_deref().and_then(parse_release_date);
        let db = b.release_date.as_deref().and_then(parse_release_date);
        match (da, db) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.id.cmp(&b.id))
    });
}

/// Track number, then id
pub fn sort_tracks(tracks: &mut [Track]) {
    tracks.sort_by(|a, b| {
        a.track_number
            .cmp(&b.track_number)
            .then_with(|| a.id.cmp(&b.id))
    });
}
