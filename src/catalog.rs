//! Read-only access to playlists and their tracks.
//!
//! Listings are fetched page by page, following each page's `next` link
//! until the last page. Errors are logged and propagated.

use std::{collections::HashSet, fmt::Debug, sync::Arc};

use serde::Deserialize;
use url::Url;

use crate::{
    error::{Error, Result},
    protocol::catalog::{Page, Playlist, PlaylistItem, Track},
    remote::WebApi,
};

pub struct Catalog {
    api: Arc<WebApi>,
}

impl Catalog {
    const PLAYLISTS_PAGE_SIZE: &'static str = "50";
    const TRACKS_PAGE_SIZE: &'static str = "100";

    /// Upper bound on pages per listing, in case `next` links go in circles.
    const MAX_PAGES: usize = 200;

    #[must_use]
    pub fn new(api: Arc<WebApi>) -> Self {
        Self { api }
    }

    /// All playlists of the user.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any page cannot be fetched.
    pub async fn user_playlists(&self) -> Result<Vec<Playlist>> {
        let mut url = self.api.url("me/playlists")?;
        url.query_pairs_mut()
            .append_pair("limit", Self::PLAYLISTS_PAGE_SIZE)
            .append_pair("fields", "items(id,name,tracks.total,images),next");

        let playlists = self
            .pages::<Playlist>(url)
            .await
            .inspect_err(|e| error!("fetching playlists failed: {e}"))?;

        info!("fetched {} playlists", playlists.len());
        Ok(playlists)
    }

    /// Name, images and track count of a playlist.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `id` is not a valid identifier or the playlist
    /// cannot be fetched.
    pub async fn playlist(&self, id: &str) -> Result<Playlist> {
        let mut url = self.playlist_url(id, None)?;
        url.query_pairs_mut()
            .append_pair("fields", "id,name,images,tracks.total");

        self.api
            .get_json(url)
            .await
            .inspect_err(|e| error!("fetching playlist {id} failed: {e}"))?
            .ok_or_else(|| Error::not_found(format!("playlist {id} not found")))
    }

    /// All playable tracks of a playlist. Removed tracks and local files are
    /// left out.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `id` is not a valid identifier or any page cannot
    /// be fetched.
    pub async fn playlist_tracks(&self, id: &str) -> Result<Vec<Track>> {
        let mut url = self.playlist_url(id, Some("tracks"))?;
        url.query_pairs_mut()
            .append_pair("limit", Self::TRACKS_PAGE_SIZE)
            .append_pair(
                "fields",
                "items(track(id,name,uri,artists,album,duration_ms,preview_url)),next",
            );

        let items = self
            .pages::<PlaylistItem>(url)
            .await
            .inspect_err(|e| error!("fetching tracks of playlist {id} failed: {e}"))?;

        let tracks: Vec<Track> = items
            .into_iter()
            .filter_map(|item| item.track)
            .filter(|track| track.id.is_some())
            .collect();

        info!("fetched {} tracks of playlist {id}", tracks.len());
        Ok(tracks)
    }

    /// The tracks of all playlists in `ids`, without duplicates, in random
    /// order.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the tracks of any playlist cannot be fetched.
    pub async fn random_tracks(&self, ids: &[String]) -> Result<Vec<Track>> {
        if ids.is_empty() {
            warn!("no playlists configured");
            return Ok(Vec::new());
        }

        let mut tracks = Vec::new();
        for id in ids {
            tracks.extend(self.playlist_tracks(id).await?);
        }

        let mut tracks = dedupe(tracks);
        fastrand::shuffle(&mut tracks);

        info!(
            "{} unique tracks from {} playlists",
            tracks.len(),
            ids.len()
        );
        Ok(tracks)
    }

    fn playlist_url(&self, id: &str, suffix: Option<&str>) -> Result<Url> {
        if !is_valid_id(id) {
            return Err(Error::invalid_argument(format!(
                "invalid playlist id: {id}"
            )));
        }

        let path = match suffix {
            Some(suffix) => format!("playlists/{id}/{suffix}"),
            None => format!("playlists/{id}"),
        };
        self.api.url(&path)
    }

    async fn pages<T>(&self, first: Url) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de> + Debug,
    {
        let mut items = Vec::new();
        let mut next = Some(first);

        for _ in 0..Self::MAX_PAGES {
            let Some(url) = next.take() else {
                return Ok(items);
            };

            let Some(page) = self.api.get_json::<Page<T>>(url).await? else {
                return Ok(items);
            };

            items.extend(page.items);
            next = page.next.as_deref().map(Url::parse).transpose()?;
        }

        if next.is_some() {
            warn!("stopped following pages after {}", Self::MAX_PAGES);
        }
        Ok(items)
    }
}

/// Catalog identifiers are base-62.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Drops tracks whose identifier was seen before, keeping the first.
fn dedupe(tracks: Vec<Track>) -> Vec<Track> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|track| seen.insert(track.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, name: &str) -> Track {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "uri": format!("spotify:track:{id}"),
            "name": name,
        }))
        .unwrap()
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let tracks = dedupe(vec![
            track("a", "first"),
            track("b", "other"),
            track("a", "second"),
        ]);

        let names: Vec<_> = tracks.iter().map(|track| track.name.as_str()).collect();
        assert_eq!(names, ["first", "other"]);
    }

    #[test]
    fn validates_identifiers() {
        assert!(is_valid_id("0JiVp7Z0pYKI8diUV6HJyQ"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../me"));
    }
}
