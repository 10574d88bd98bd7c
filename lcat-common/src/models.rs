//! Canonical catalog entities
//!
//! These are the shapes returned to callers regardless of which backend or
//! resolution strategy produced the underlying rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A recording artist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    /// Platform-scoped identifier (not necessarily a UUID)
    pub id: String,
    pub name: String,
    /// Artist image; a placeholder token when the store has none
    pub image_url: String,
    /// Link to the artist on the external streaming platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
    /// Credit on the enclosing release, when listed as a contributor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ArtistRole>,
}

/// A published release (album, EP, single)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub title: String,
    /// Release date as stored (usually `YYYY-MM-DD`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    /// Cover artwork; a placeholder token when the store has none
    pub artwork_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
    /// Tracks ordered by track number
    #[serde(default)]
    pub tracks: Vec<Track>,
    /// Contributing artists, unique by id
    #[serde(default)]
    pub artists: Vec<Artist>,
}

impl Release {
    /// Add a contributor unless an artist with the same id is already present
    ///
    /// Returns `true` when the artist was added.
    pub fn add_artist(&mut self, artist: Artist) -> bool {
        if self.artists.iter().any(|a| a.id == artist.id) {
            return false;
        }
        self.artists.push(artist);
        true
    }
}

/// A single track on a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub track_number: i64,
    pub duration_ms: i64,
    /// Owning release (a track always belongs to exactly one release)
    pub release_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

/// A record label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    /// Display name (falls back to the raw name)
    pub name: String,
}

/// Role of an artist on a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtistRole {
    /// Main credited artist
    Primary,
    /// Guest artist
    Featured,
    /// Remixer of an existing work
    Remixer,
    /// Any role string not recognised above
    Other,
}

impl ArtistRole {
    /// Lenient parse; unknown or empty values map to `Other`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "primary" | "main" | "main_artist" => ArtistRole::Primary,
            "featured" | "feature" | "feat" => ArtistRole::Featured,
            "remixer" | "remix" => ArtistRole::Remixer,
            _ => ArtistRole::Other,
        }
    }
}

impl fmt::Display for ArtistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtistRole::Primary => "primary",
            ArtistRole::Featured => "featured",
            ArtistRole::Remixer => "remixer",
            ArtistRole::Other => "other",
        };
        f.write_str(s)
    }
}

/// Relationship edge between a release and an artist
///
/// This is the same fact as a row of the `release_artists` join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseArtist {
    pub release_id: String,
    pub artist_id: String,
    /// `None` when the store records no role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ArtistRole>,
}
