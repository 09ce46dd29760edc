pub mod apple;
pub mod mock;
pub mod soundcloud;
pub mod spotify;
pub mod tidal;

use crate::error::{ProviderError, Result};
use crate::models::{
    MusicProvider, ProviderPlaylist, ProviderShuffleResult, ProviderTrack, ProviderUser,
};

/// Maximum results any provider search is asked for; larger caller limits
/// are clamped down to this.
pub const SEARCH_LIMIT_CAP: usize = 25;

/// Capability contract every provider client implements.
///
/// All operations are single logical requests from the caller's point of
/// view; internally a call may chain HTTP requests (pagination, metadata
/// hydration, read-modify-write). Operations a provider cannot support fail
/// with a typed 501 `Api` error rather than panicking, except where a
/// documented empty-result fallback exists. Side effects are confined to
/// `create_playlist`, `add_tracks`, `remove_tracks` and `shuffle_playlist`;
/// everything else is a pure read. No method retries: a 429 is surfaced as
/// an `Api` error and retry policy belongs to the caller.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> MusicProvider;

    /// Every playlist owned by the authenticated user, following provider
    /// pagination until exhausted, in provider-native order.
    async fn list_playlists(&self) -> Result<Vec<ProviderPlaylist>>;

    /// Fetch one playlist. `playlist_ref` may be a bare id, a
    /// `<provider>:playlist:<id>` token or a share URL; an unparseable
    /// reference fails with 400 before any network call.
    async fn get_playlist(&self, playlist_ref: &str) -> Result<ProviderPlaylist>;

    /// Empty or whitespace queries return an empty result without any
    /// network call. `limit` is clamped to a provider-appropriate bound.
    async fn search_playlists(&self, query: &str, limit: usize) -> Result<Vec<ProviderPlaylist>>;

    /// Resolve a share URL (or prefixed token) to the same playlist
    /// `get_playlist` would return for the equivalent id.
    async fn resolve_playlist_url(&self, url: &str) -> Result<ProviderPlaylist>;

    /// Create a playlist on the provider. Caller-supplied title,
    /// description and visibility fill in any nulls the provider echoes
    /// back.
    async fn create_playlist(
        &self,
        title: &str,
        description: Option<&str>,
        is_public: Option<bool>,
    ) -> Result<ProviderPlaylist>;

    /// All tracks of a playlist, paginated to completion. Providers with
    /// lazily-populated metadata hydrate missing artist/artwork before
    /// returning.
    async fn list_tracks(&self, playlist_ref: &str) -> Result<Vec<ProviderTrack>>;

    /// Add tracks to a playlist. Input references are normalized and
    /// de-duplicated; an empty input is a no-op with zero HTTP requests.
    async fn add_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()>;

    /// Remove tracks from a playlist, with the same normalization and
    /// no-op rules as `add_tracks`. Fails with 501 where the provider has
    /// no removal primitive for the resource in play.
    async fn remove_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()>;

    /// Randomly permute the playlist order using minimal pairwise moves.
    /// Playlists larger than `max_items` are rejected with 400 before any
    /// mutation; a mid-shuffle failure is reported (not raised) as a
    /// partial-failure result. Providers without a reorder primitive
    /// report `Unsupported`.
    async fn shuffle_playlist(
        &self,
        playlist_ref: &str,
        max_items: usize,
    ) -> Result<ProviderShuffleResult> {
        Ok(ProviderShuffleResult::unsupported(
            self.provider(),
            playlist_ref,
            max_items,
        ))
    }

    /// Search the provider catalog for tracks. `hydrate_metadata = false`
    /// skips follow-up metadata fetches, trading completeness (artist or
    /// artwork may be missing) for latency.
    async fn search_tracks(
        &self,
        query: &str,
        limit: usize,
        hydrate_metadata: bool,
    ) -> Result<Vec<ProviderTrack>>;

    /// Similar-track feed for a seed track. Providers without one return
    /// an empty sequence. Offset and limit apply to the normalized
    /// sequence, not the raw provider pages.
    async fn related_tracks(
        &self,
        _seed_track_id: &str,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<ProviderTrack>> {
        Ok(Vec::new())
    }

    /// Resolve a track share URL or prefixed token, disambiguating the
    /// track sub-type from the reference shape where the provider
    /// distinguishes library/catalog or track/video resources.
    async fn resolve_track_url(&self, url: &str) -> Result<ProviderTrack>;

    /// Provider user directory search. Providers without one return an
    /// empty sequence.
    async fn search_users(&self, _query: &str, _limit: usize) -> Result<Vec<ProviderUser>> {
        Ok(Vec::new())
    }

    /// Look up one provider user. Providers without a user directory fail
    /// with 501.
    async fn get_user(&self, _user_ref: &str) -> Result<ProviderUser> {
        Err(ProviderError::api(
            format!(
                "{} user lookup is not supported",
                self.provider().as_str()
            ),
            501,
        ))
    }
}

/// Build the client for a provider, scoped to one user access token.
pub fn client_for(provider: MusicProvider, access_token: &str) -> Box<dyn ProviderClient> {
    match provider {
        MusicProvider::Soundcloud => Box::new(soundcloud::SoundcloudClient::new(access_token)),
        MusicProvider::Spotify => Box::new(spotify::SpotifyClient::new(access_token)),
        MusicProvider::Apple => Box::new(apple::AppleMusicClient::new(access_token)),
        MusicProvider::Tidal => Box::new(tidal::TidalClient::new(access_token)),
    }
}

/// Same as [`client_for`], keyed by the provider name as stored on the
/// account record. Unknown names fail with a 400 `Api` error.
pub fn client_for_name(name: &str, access_token: &str) -> Result<Box<dyn ProviderClient>> {
    let provider = name
        .parse::<MusicProvider>()
        .map_err(|e| ProviderError::api(e, 400))?;
    Ok(client_for(provider, access_token))
}

pub(crate) fn clamp_limit(limit: usize, cap: usize) -> usize {
    limit.clamp(1, cap)
}

/// Best-effort string id from a JSON field that may be a string or number.
pub(crate) fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Non-empty trimmed string, or nothing.
pub(crate) fn clean_str(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_clamp_to_bounds() {
        assert_eq!(clamp_limit(0, 25), 1);
        assert_eq!(clamp_limit(10, 25), 10);
        assert_eq!(clamp_limit(100, 25), 25);
    }

    #[test]
    fn id_string_accepts_numbers_and_strings() {
        assert_eq!(id_string(&serde_json::json!(42)), Some("42".into()));
        assert_eq!(id_string(&serde_json::json!(" a1 ")), Some("a1".into()));
        assert_eq!(id_string(&serde_json::json!("")), None);
        assert_eq!(id_string(&serde_json::json!(null)), None);
    }
}
