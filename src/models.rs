use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The music streaming services Votuna can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicProvider {
    Soundcloud,
    Spotify,
    Apple,
    Tidal,
}

impl MusicProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicProvider::Soundcloud => "soundcloud",
            MusicProvider::Spotify => "spotify",
            MusicProvider::Apple => "apple",
            MusicProvider::Tidal => "tidal",
        }
    }
}

impl fmt::Display for MusicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MusicProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soundcloud" => Ok(MusicProvider::Soundcloud),
            "spotify" => Ok(MusicProvider::Spotify),
            "apple" => Ok(MusicProvider::Apple),
            "tidal" => Ok(MusicProvider::Tidal),
            other => Err(format!("unsupported provider: {}", other)),
        }
    }
}

/// A playlist as the provider reports it, normalized across services.
///
/// `provider_playlist_id` is stable and sufficient to re-fetch the same
/// resource from the same provider. Instances are built fresh from a
/// provider response on every call; nothing in this crate caches them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPlaylist {
    pub provider: MusicProvider,
    pub provider_playlist_id: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub track_count: Option<u32>,
    /// Tri-state: providers that do not report visibility leave this unset.
    pub is_public: Option<bool>,
}

/// A track as the provider reports it.
///
/// `provider_track_id` may encode a sub-type (Apple library songs are
/// prefixed `i.`); combined with its provider it is enough to add or remove
/// the track from a playlist later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTrack {
    pub provider_track_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub artwork_url: Option<String>,
    pub url: Option<String>,
}

/// A provider account, used only to resolve invite targets. Distinct from
/// Votuna's own users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub provider_user_id: String,
    /// The handle that appears in profile URLs.
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleStatus {
    Completed,
    PartialFailure,
    Unsupported,
}

/// Outcome of a playlist shuffle. `error` is set exactly when the status is
/// not `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderShuffleResult {
    pub provider: MusicProvider,
    pub provider_playlist_id: String,
    pub status: ShuffleStatus,
    pub total_items: usize,
    pub moved_items: usize,
    pub max_items: usize,
    pub error: Option<String>,
}

impl ProviderShuffleResult {
    pub fn unsupported(
        provider: MusicProvider,
        provider_playlist_id: impl Into<String>,
        max_items: usize,
    ) -> Self {
        ProviderShuffleResult {
            provider,
            provider_playlist_id: provider_playlist_id.into(),
            status: ShuffleStatus::Unsupported,
            total_items: 0,
            moved_items: 0,
            max_items,
            error: Some(format!(
                "{} does not support playlist shuffling",
                provider.as_str()
            )),
        }
    }
}
