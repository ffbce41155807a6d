//! Playlists the user picked to draw tracks from.
//!
//! Settings are stored as JSON:
//!
//! ```json
//! { "playlists": [ { "id": "0JiVp7Z0pYKI8diUV6HJyQ", "name": "Default playlist", "total": 0 } ] }
//! ```
//!
//! A missing file yields the defaults. So does a malformed one, after
//! logging the problem, so that a broken file never keeps the player from
//! starting.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    protocol::catalog::Playlist,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PlaylistRef {
    pub id: String,
    pub name: String,

    /// Number of tracks when the playlist was added.
    #[serde(default)]
    pub total: u32,
}

impl From<&Playlist> for PlaylistRef {
    fn from(playlist: &Playlist) -> Self {
        Self {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
            total: playlist.tracks.total,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    pub playlists: Vec<PlaylistRef>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            playlists: vec![PlaylistRef {
                id: Self::DEFAULT_PLAYLIST_ID.to_owned(),
                name: Self::DEFAULT_PLAYLIST_NAME.to_owned(),
                total: 0,
            }],
        }
    }
}

impl Settings {
    pub const DEFAULT_PLAYLIST_ID: &'static str = "0JiVp7Z0pYKI8diUV6HJyQ";
    pub const DEFAULT_PLAYLIST_NAME: &'static str = "Default playlist";

    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Loads settings from `path`, falling back to the defaults if the file
    /// does not exist or cannot be parsed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file exists but cannot be read, or is too
    /// large.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_size = match fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} not found, using default settings", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    /// Parses settings, falling back to the defaults on malformed input.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        match serde_json::from_str(contents) {
            Ok(settings) => settings,
            Err(e) => {
                error!("malformed settings, using defaults: {e}");
                Self::default()
            }
        }
    }

    /// # Errors
    ///
    /// Will return `Err` if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(Into::into)
    }

    /// Adds `playlist`, unless a playlist with the same id is present.
    /// Returns whether it was added.
    pub fn add_playlist(&mut self, playlist: PlaylistRef) -> bool {
        if self.playlists.iter().any(|known| known.id == playlist.id) {
            return false;
        }

        self.playlists.push(playlist);
        true
    }

    /// Returns whether a playlist was removed.
    pub fn remove_playlist(&mut self, id: &str) -> bool {
        let count = self.playlists.len();
        self.playlists.retain(|playlist| playlist.id != id);
        self.playlists.len() != count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn playlist_ids(&self) -> Vec<String> {
        self.playlists
            .iter()
            .map(|playlist| playlist.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_settings_fall_back_to_defaults() {
        assert_eq!(Settings::parse("{ not json"), Settings::default());
        assert_eq!(Settings::parse(r#"{"playlists": 5}"#), Settings::default());
    }

    #[test]
    fn missing_total_defaults_to_zero() {
        let settings = Settings::parse(r#"{"playlists": [{"id": "abc", "name": "Mine"}]}"#);
        assert_eq!(settings.playlists[0].total, 0);
        assert_eq!(settings.playlist_ids(), ["abc"]);
    }

    #[test]
    fn add_remove_and_reset() {
        let mut settings = Settings::default();
        let mine = PlaylistRef {
            id: "abc".to_owned(),
            name: "Mine".to_owned(),
            total: 12,
        };

        assert!(settings.add_playlist(mine.clone()));
        assert!(!settings.add_playlist(mine));
        assert_eq!(settings.playlists.len(), 2);

        assert!(settings.remove_playlist(Settings::DEFAULT_PLAYLIST_ID));
        assert!(!settings.remove_playlist(Settings::DEFAULT_PLAYLIST_ID));
        assert_eq!(settings.playlist_ids(), ["abc"]);

        settings.reset();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("remoteplay-settings-does-not-exist.json");
        assert_eq!(Settings::load(path).unwrap(), Settings::default());
    }
}
