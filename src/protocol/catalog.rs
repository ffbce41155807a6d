//! Playlists and tracks of the catalog service.
//!
//! Listings are paginated: each page carries `items` and the URL of the
//! `next` page, which is `null` on the last page.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull, DurationMilliSeconds};

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,

    #[serde(default)]
    pub next: Option<String>,

    #[serde(default)]
    pub total: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Artist {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
}

#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Album {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub images: Vec<Image>,
}

/// A playable track.
///
/// Also the shape of the playback SDK's `current_track`, which is why most
/// fields are optional.
#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Track {
    /// Local files and unavailable tracks have no identifier.
    #[serde(default)]
    pub id: Option<String>,

    pub uri: String,

    pub name: String,

    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub artists: Vec<Artist>,

    #[serde(default)]
    pub album: Option<Album>,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "duration_ms", default)]
    pub duration: Duration,

    #[serde(default)]
    pub preview_url: Option<String>,
}

impl Track {
    /// Artist names joined for display.
    #[must_use]
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.artists.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} - {}", self.artist_names(), self.name)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize)]
pub struct TrackCount {
    pub total: u32,
}

#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub images: Vec<Image>,
    pub tracks: TrackCount,
}

/// Entry of a playlist listing. Removed or unavailable tracks come back as
/// `null`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
pub struct PlaylistItem {
    #[serde(default)]
    pub track: Option<Track>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playlist_page() {
        let body = r#"{
            "items": [
                {"track": {"id": "a", "uri": "spotify:track:a", "name": "A", "duration_ms": 1000,
                           "artists": [{"name": "X"}, {"name": "Y"}], "album": {"name": "Al", "images": null}}},
                {"track": null}
            ],
            "next": null
        }"#;
        let page: Page<PlaylistItem> = serde_json::from_str(body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.next.is_none());

        let track = page.items[0].track.as_ref().unwrap();
        assert_eq!(track.to_string(), "X, Y - A");
        assert!(track.album.as_ref().unwrap().images.is_empty());
        assert!(page.items[1].track.is_none());
    }
}
