use super::{clamp_limit, clean_str, ProviderClient, SEARCH_LIMIT_CAP};
use crate::error::{ProviderError, Result};
use crate::models::{
    MusicProvider, ProviderPlaylist, ProviderShuffleResult, ProviderTrack, ProviderUser,
    ShuffleStatus,
};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Spotify Web API client. Flat REST+JSON, offset pagination via a
/// self-contained `next` URL, track references normalized to
/// `spotify:track:<id>` URIs.
pub struct SpotifyClient {
    http: Client,
    access_token: String,
    base_url: String,
}

/// One playlist reorder operation: move the item at `range_start` so it
/// lands before the current item at `insert_before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReorderMove {
    range_start: usize,
    insert_before: usize,
}

/// Plan the minimal single-item moves that turn the identity order into
/// `order` (a permutation of `0..n`). Positions already correct produce no
/// move; the plan is applied to live positions, so later moves account for
/// earlier ones.
fn plan_moves(order: &[usize]) -> Vec<ReorderMove> {
    let mut current: Vec<usize> = (0..order.len()).collect();
    let mut moves = Vec::new();
    for target_pos in 0..order.len() {
        let wanted = order[target_pos];
        let Some(from_pos) = current.iter().position(|&v| v == wanted) else {
            continue;
        };
        if from_pos == target_pos {
            continue;
        }
        moves.push(ReorderMove {
            range_start: from_pos,
            insert_before: target_pos,
        });
        let item = current.remove(from_pos);
        current.insert(target_pos, item);
    }
    moves
}

impl SpotifyClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_url(access_token, Self::api_base())
    }

    /// Explicit base URL, used by tests to point at a mock server.
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            access_token: access_token.into(),
            base_url: base_url.into(),
        }
    }

    fn api_base() -> String {
        std::env::var("SPOTIFY_API_BASE").unwrap_or_else(|_| "https://api.spotify.com/v1".into())
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn get(&self, path_or_url: &str) -> reqwest::RequestBuilder {
        let url = if path_or_url.starts_with("http") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };
        self.http
            .get(url)
            .header(AUTHORIZATION, self.bearer())
            .timeout(REQUEST_TIMEOUT)
    }

    fn extract_error_message(payload: &Value) -> Option<String> {
        clean_str(&payload["error"]["message"]).or_else(|| clean_str(&payload["message"]))
    }

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(resp);
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::auth(
                "Spotify authorization expired or invalid",
            ));
        }
        let detail = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| Self::extract_error_message(&v));
        let suffix = detail.map(|d| format!(": {}", d)).unwrap_or_default();
        Err(ProviderError::api(
            format!("Spotify API error ({}){}", status, suffix),
            status,
        ))
    }

    /// Resource id from a share URL path: the segment right after the
    /// resource keyword, query string ignored.
    fn id_from_url(raw_url: &str, resource: &str) -> Option<String> {
        let parsed = url::Url::parse(raw_url).ok()?;
        if !parsed.host_str().unwrap_or("").contains("spotify.com") {
            return None;
        }
        let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
        let idx = segments.iter().position(|s| s.eq_ignore_ascii_case(resource))?;
        segments
            .get(idx + 1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn normalize_resource_id(value: &str, resource: &str) -> Option<String> {
        let raw = value.trim();
        if raw.is_empty() {
            return None;
        }
        let prefix = format!("spotify:{}:", resource);
        if raw.to_ascii_lowercase().starts_with(&prefix) {
            let id = raw[prefix.len()..].trim();
            return (!id.is_empty()).then(|| id.to_string());
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Self::id_from_url(raw, resource);
        }
        if raw.to_ascii_lowercase().contains("spotify.com/") {
            return Self::id_from_url(&format!("https://{}", raw), resource);
        }
        Some(raw.to_string())
    }

    fn normalize_playlist_id(value: &str) -> Option<String> {
        Self::normalize_resource_id(value, "playlist")
    }

    fn normalize_track_uri(value: &str) -> Option<String> {
        Self::normalize_resource_id(value, "track").map(|id| format!("spotify:track:{}", id))
    }

    fn normalize_user_id(value: &str) -> Option<String> {
        Self::normalize_resource_id(value, "user")
    }

    fn first_image_url(value: &Value) -> Option<String> {
        value["images"]
            .as_array()
            .and_then(|imgs| imgs.first())
            .and_then(|img| clean_str(&img["url"]))
    }

    fn map_playlist(payload: &Value) -> Option<ProviderPlaylist> {
        let playlist_id = clean_str(&payload["id"])?;
        let track_count = payload["tracks"]["total"]
            .as_u64()
            .or_else(|| payload["items"]["total"].as_u64())
            .and_then(|n| u32::try_from(n).ok());
        Some(ProviderPlaylist {
            provider: MusicProvider::Spotify,
            provider_playlist_id: playlist_id,
            title: clean_str(&payload["name"]).unwrap_or_else(|| "Untitled".into()),
            description: clean_str(&payload["description"]),
            image_url: Self::first_image_url(payload),
            url: clean_str(&payload["external_urls"]["spotify"]),
            track_count,
            is_public: payload["public"].as_bool(),
        })
    }

    fn map_track(payload: &Value) -> Option<ProviderTrack> {
        let track_id = clean_str(&payload["id"])?;
        let artists: Vec<String> = payload["artists"]
            .as_array()
            .map(|list| list.iter().filter_map(|a| clean_str(&a["name"])).collect())
            .unwrap_or_default();
        Some(ProviderTrack {
            provider_track_id: track_id,
            title: clean_str(&payload["name"]).unwrap_or_else(|| "Untitled".into()),
            artist: (!artists.is_empty()).then(|| artists.join(", ")),
            genre: None,
            artwork_url: Self::first_image_url(&payload["album"]),
            url: clean_str(&payload["external_urls"]["spotify"]),
        })
    }

    fn map_user(payload: &Value) -> Option<ProviderUser> {
        let user_id = clean_str(&payload["id"])?;
        Some(ProviderUser {
            provider_user_id: user_id.clone(),
            // Spotify user ids double as the profile URL handle.
            username: Some(user_id),
            display_name: clean_str(&payload["display_name"]),
            avatar_url: Self::first_image_url(payload),
            profile_url: clean_str(&payload["external_urls"]["spotify"]),
        })
    }

    async fn current_user_id(&self) -> Result<String> {
        let resp = self.get("/me").send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        clean_str(&payload["id"])
            .ok_or_else(|| ProviderError::api("Unable to fetch Spotify profile", 502))
    }

    /// Normalize track references to URIs, dropping blanks and duplicates
    /// while preserving first-seen order.
    fn normalize_track_uris(track_ids: &[String]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        track_ids
            .iter()
            .filter_map(|t| Self::normalize_track_uri(t))
            .filter(|uri| seen.insert(uri.clone()))
            .collect()
    }

    async fn fetch_item_total(&self, playlist_id: &str) -> Result<usize> {
        let resp = self
            .get(&format!("/playlists/{}/items", playlist_id))
            .query(&[("limit", "1")])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Ok(payload["total"].as_u64().unwrap_or(0) as usize)
    }

    /// Apply a planned move sequence, chaining the snapshot id Spotify
    /// returns after each reorder. A failure mid-flight is reported in the
    /// result rather than raised; moves already applied stay applied
    /// (last-write-wins, like every read-modify-write path here).
    async fn apply_move_plan(
        &self,
        playlist_id: &str,
        moves: &[ReorderMove],
        total: usize,
        max_items: usize,
    ) -> ProviderShuffleResult {
        let mut snapshot_id: Option<String> = None;
        for (applied, mv) in moves.iter().enumerate() {
            let mut body = json!({
                "range_start": mv.range_start,
                "insert_before": mv.insert_before,
                "range_length": 1,
            });
            if let Some(snapshot) = &snapshot_id {
                body["snapshot_id"] = Value::from(snapshot.clone());
            }
            let outcome = async {
                let resp = self
                    .http
                    .put(format!("{}/playlists/{}/items", self.base_url, playlist_id))
                    .header(AUTHORIZATION, self.bearer())
                    .timeout(REQUEST_TIMEOUT)
                    .json(&body)
                    .send()
                    .await?;
                let resp = Self::ensure_success(resp).await?;
                Ok::<Value, ProviderError>(resp.json().await.unwrap_or(Value::Null))
            }
            .await;
            match outcome {
                Ok(payload) => {
                    if let Some(snapshot) = clean_str(&payload["snapshot_id"]) {
                        snapshot_id = Some(snapshot);
                    }
                }
                Err(err) => {
                    return ProviderShuffleResult {
                        provider: MusicProvider::Spotify,
                        provider_playlist_id: playlist_id.to_string(),
                        status: ShuffleStatus::PartialFailure,
                        total_items: total,
                        moved_items: applied,
                        max_items,
                        error: Some(err.to_string()),
                    };
                }
            }
        }
        ProviderShuffleResult {
            provider: MusicProvider::Spotify,
            provider_playlist_id: playlist_id.to_string(),
            status: ShuffleStatus::Completed,
            total_items: total,
            moved_items: moves.len(),
            max_items,
            error: None,
        }
    }
}

#[async_trait]
impl ProviderClient for SpotifyClient {
    fn provider(&self) -> MusicProvider {
        MusicProvider::Spotify
    }

    async fn list_playlists(&self) -> Result<Vec<ProviderPlaylist>> {
        let mut playlists = Vec::new();
        let mut next = Some(format!("{}/me/playlists?limit=50", self.base_url));
        while let Some(url) = next {
            let resp = self.get(&url).send().await?;
            let resp = Self::ensure_success(resp).await?;
            let payload: Value = resp.json().await?;
            if let Some(items) = payload["items"].as_array() {
                playlists.extend(items.iter().filter_map(Self::map_playlist));
            }
            // The next cursor is a self-contained URL; page-1 params are
            // not re-sent.
            next = clean_str(&payload["next"]);
        }
        Ok(playlists)
    }

    async fn get_playlist(&self, playlist_ref: &str) -> Result<ProviderPlaylist> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let resp = self.get(&format!("/playlists/{}", playlist_id)).send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Self::map_playlist(&payload)
            .ok_or_else(|| ProviderError::api("Unable to load playlist", 404))
    }

    async fn search_playlists(&self, query: &str, limit: usize) -> Result<Vec<ProviderPlaylist>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let safe_limit = clamp_limit(limit, SEARCH_LIMIT_CAP).to_string();
        let resp = self
            .get("/search")
            .query(&[
                ("q", query),
                ("type", "playlist"),
                ("limit", safe_limit.as_str()),
            ])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let items = payload["playlists"]["items"].as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_playlist).collect())
    }

    async fn resolve_playlist_url(&self, url: &str) -> Result<ProviderPlaylist> {
        let playlist_url = url.trim();
        if playlist_url.is_empty() {
            return Err(ProviderError::api("Playlist URL is required", 400));
        }
        let playlist_id = Self::normalize_playlist_id(playlist_url)
            .ok_or_else(|| ProviderError::api("Resolved URL is not a playlist", 400))?;
        self.get_playlist(&playlist_id).await
    }

    async fn create_playlist(
        &self,
        title: &str,
        description: Option<&str>,
        is_public: Option<bool>,
    ) -> Result<ProviderPlaylist> {
        let user_id = self.current_user_id().await?;
        let body = json!({
            "name": title,
            "description": description.unwrap_or(""),
            "public": is_public.unwrap_or(false),
        });
        let resp = self
            .http
            .post(format!(
                "{}/users/{}/playlists",
                self.base_url,
                urlencoding::encode(&user_id)
            ))
            .header(AUTHORIZATION, self.bearer())
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let mapped = Self::map_playlist(&payload)
            .ok_or_else(|| ProviderError::api("Unable to create playlist", 502))?;
        Ok(ProviderPlaylist {
            description: mapped.description.or_else(|| description.map(str::to_string)),
            is_public: mapped.is_public.or(is_public),
            ..mapped
        })
    }

    async fn list_tracks(&self, playlist_ref: &str) -> Result<Vec<ProviderTrack>> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let mut tracks = Vec::new();
        let mut next = Some(format!(
            "{}/playlists/{}/items?limit=100",
            self.base_url, playlist_id
        ));
        while let Some(url) = next {
            let resp = self.get(&url).send().await?;
            let resp = Self::ensure_success(resp).await?;
            let payload: Value = resp.json().await?;
            if let Some(items) = payload["items"].as_array() {
                for entry in items {
                    // Entries wrap the track under `item` (newer payloads)
                    // or `track`.
                    let inner = if entry["item"].is_object() {
                        &entry["item"]
                    } else {
                        &entry["track"]
                    };
                    if let Some(track) = Self::map_track(inner) {
                        tracks.push(track);
                    }
                }
            }
            next = clean_str(&payload["next"]);
        }
        Ok(tracks)
    }

    async fn add_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        let uris = Self::normalize_track_uris(track_ids);
        if uris.is_empty() {
            return Ok(());
        }
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let resp = self
            .http
            .post(format!("{}/playlists/{}/items", self.base_url, playlist_id))
            .header(AUTHORIZATION, self.bearer())
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "uris": uris }))
            .send()
            .await?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    async fn remove_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        let uris = Self::normalize_track_uris(track_ids);
        if uris.is_empty() {
            return Ok(());
        }
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let tracks: Vec<Value> = uris.iter().map(|u| json!({ "uri": u })).collect();
        let resp = self
            .http
            .delete(format!("{}/playlists/{}/items", self.base_url, playlist_id))
            .header(AUTHORIZATION, self.bearer())
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "tracks": tracks }))
            .send()
            .await?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    async fn shuffle_playlist(
        &self,
        playlist_ref: &str,
        max_items: usize,
    ) -> Result<ProviderShuffleResult> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let total = self.fetch_item_total(&playlist_id).await?;
        if total > max_items {
            return Err(ProviderError::api(
                format!(
                    "Playlist has {} items, which exceeds the shuffle limit of {}",
                    total, max_items
                ),
                400,
            ));
        }
        let mut order: Vec<usize> = (0..total).collect();
        order.shuffle(&mut rand::thread_rng());
        let moves = plan_moves(&order);
        Ok(self
            .apply_move_plan(&playlist_id, &moves, total, max_items)
            .await)
    }

    async fn search_tracks(
        &self,
        query: &str,
        limit: usize,
        _hydrate_metadata: bool,
    ) -> Result<Vec<ProviderTrack>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let safe_limit = clamp_limit(limit, SEARCH_LIMIT_CAP).to_string();
        let resp = self
            .get("/search")
            .query(&[
                ("q", query),
                ("type", "track"),
                ("limit", safe_limit.as_str()),
            ])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let items = payload["tracks"]["items"].as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_track).collect())
    }

    async fn resolve_track_url(&self, url: &str) -> Result<ProviderTrack> {
        let track_ref = url.trim();
        if track_ref.is_empty() {
            return Err(ProviderError::api("Track URL is required", 400));
        }
        let track_id = Self::normalize_resource_id(track_ref, "track")
            .ok_or_else(|| ProviderError::api("Resolved URL is not a track", 400))?;
        let resp = self.get(&format!("/tracks/{}", track_id)).send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Self::map_track(&payload)
            .ok_or_else(|| ProviderError::api("Unable to resolve track URL", 404))
    }

    async fn get_user(&self, user_ref: &str) -> Result<ProviderUser> {
        let user_id = Self::normalize_user_id(user_ref)
            .ok_or_else(|| ProviderError::api("Provider user id is required", 400))?;
        let resp = self.get(&format!("/users/{}", user_id)).send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Self::map_user(&payload).ok_or_else(|| ProviderError::api("Provider user not found", 404))
    }
}
