use super::{clamp_limit, clean_str, id_string, ProviderClient, SEARCH_LIMIT_CAP};
use crate::error::{ProviderError, Result};
use crate::models::{MusicProvider, ProviderPlaylist, ProviderTrack, ProviderUser};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
// Read-modify-write calls ship the full track list and get a bit longer.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(20);

/// SoundCloud client. Plain REST+JSON with bearer auth; share URLs are
/// turned into resources through the `/resolve` endpoint, so URL-shaped
/// references cost one extra request instead of local parsing.
pub struct SoundcloudClient {
    http: Client,
    access_token: String,
    base_url: String,
}

/// A playlist reference after local normalization. SoundCloud ids are
/// opaque numbers, so a share URL can only be reduced server-side.
enum PlaylistRef {
    Id(String),
    Url(String),
}

impl SoundcloudClient {
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
        std::env::var("SOUNDCLOUD_API_BASE")
            .unwrap_or_else(|_| "https://api.soundcloud.com".into())
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

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(resp);
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::auth(
                "SoundCloud authorization expired or invalid",
            ));
        }
        Err(ProviderError::api(
            format!("SoundCloud API error ({})", status),
            status,
        ))
    }

    fn map_track(payload: &Value) -> Option<ProviderTrack> {
        let track_id = id_string(payload.get("id")?)?;
        let user = &payload["user"];
        Some(ProviderTrack {
            provider_track_id: track_id,
            title: clean_str(&payload["title"]).unwrap_or_else(|| "Untitled".into()),
            artist: clean_str(&user["username"]),
            genre: clean_str(&payload["genre"]),
            artwork_url: clean_str(&payload["artwork_url"]).or_else(|| clean_str(&user["avatar_url"])),
            url: clean_str(&payload["permalink_url"]),
        })
    }

    fn map_playlist(payload: &Value) -> Option<ProviderPlaylist> {
        let playlist_id = id_string(payload.get("id")?)?;
        let user = &payload["user"];
        let is_public = payload["sharing"]
            .as_str()
            .map(|s| s.eq_ignore_ascii_case("public"));
        Some(ProviderPlaylist {
            provider: MusicProvider::Soundcloud,
            provider_playlist_id: playlist_id,
            title: clean_str(&payload["title"]).unwrap_or_else(|| "Untitled".into()),
            description: clean_str(&payload["description"]),
            image_url: clean_str(&payload["artwork_url"]).or_else(|| clean_str(&user["avatar_url"])),
            url: clean_str(&payload["permalink_url"]),
            track_count: payload["track_count"].as_u64().and_then(|n| u32::try_from(n).ok()),
            is_public,
        })
    }

    fn map_user(payload: &Value) -> Option<ProviderUser> {
        let user_id = id_string(payload.get("id")?)?;
        // SoundCloud "permalink" is the profile handle used in URLs; the
        // "username" field is the display name.
        let handle = clean_str(&payload["permalink"]);
        let display_name = clean_str(&payload["username"]);
        let full_name = {
            let first = clean_str(&payload["first_name"]);
            let last = clean_str(&payload["last_name"]);
            let joined = [first, last]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        };
        Some(ProviderUser {
            provider_user_id: user_id,
            username: handle.clone(),
            display_name: display_name.or(full_name).or(handle),
            avatar_url: clean_str(&payload["avatar_url"]),
            profile_url: clean_str(&payload["permalink_url"]),
        })
    }

    fn normalize_playlist_ref(value: &str) -> Option<PlaylistRef> {
        let raw = value.trim();
        if raw.is_empty() {
            return None;
        }
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("soundcloud:playlist:") {
            let id = raw["soundcloud:playlist:".len()..].trim();
            return (!id.is_empty()).then(|| PlaylistRef::Id(id.to_string()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(PlaylistRef::Url(raw.to_string()));
        }
        if lower.contains("soundcloud.com/") {
            return Some(PlaylistRef::Url(format!("https://{}", raw)));
        }
        Some(PlaylistRef::Id(raw.to_string()))
    }

    /// Reduce a user-search query to a profile handle when it looks like
    /// one: `@handle`, a profile URL, or a bare handle-ish token.
    fn extract_handle(query: &str) -> Option<String> {
        let mut value = query.trim().to_string();
        if value.is_empty() {
            return None;
        }
        if let Some(rest) = value.strip_prefix('@') {
            value = rest.trim().to_string();
        } else if value.starts_with("http://") || value.starts_with("https://") {
            let parsed = url::Url::parse(&value).ok()?;
            if !parsed.host_str().unwrap_or("").contains("soundcloud.com") {
                return None;
            }
            value = parsed.path_segments()?.find(|s| !s.is_empty())?.to_string();
        } else if value.contains("soundcloud.com/") {
            let parsed = url::Url::parse(&format!("https://{}", value)).ok()?;
            value = parsed.path_segments()?.find(|s| !s.is_empty())?.to_string();
        }
        let value = value.trim();
        if value.is_empty() || value.contains('/') || value.contains(' ') {
            return None;
        }
        Some(value.to_string())
    }

    async fn resolve(&self, url: &str) -> Result<Value> {
        let resp = self.get("/resolve").query(&[("url", url)]).send().await?;
        let resp = Self::ensure_success(resp).await?;
        Ok(resp.json().await?)
    }

    async fn resolve_user_by_handle(&self, handle: &str) -> Result<Option<ProviderUser>> {
        let profile_url = format!("https://soundcloud.com/{}", handle);
        let payload = match self.resolve(&profile_url).await {
            Ok(payload) => payload,
            Err(ProviderError::Api { status, .. }) if status == 400 || status == 404 => {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };
        if let Some(kind) = payload["kind"].as_str() {
            if kind != "user" {
                return Ok(None);
            }
        }
        Ok(Self::map_user(&payload))
    }

    async fn fetch_playlist_payload(&self, playlist_ref: &str) -> Result<Value> {
        match Self::normalize_playlist_ref(playlist_ref) {
            None => Err(ProviderError::api("Playlist reference is required", 400)),
            Some(PlaylistRef::Id(id)) => {
                let resp = self.get(&format!("/playlists/{}", id)).send().await?;
                let resp = Self::ensure_success(resp).await?;
                Ok(resp.json().await?)
            }
            Some(PlaylistRef::Url(url)) => {
                let payload = self.resolve(&url).await?;
                let kind = payload["kind"].as_str().unwrap_or("").to_ascii_lowercase();
                if !kind.is_empty() && kind != "playlist" && kind != "system-playlist" {
                    return Err(ProviderError::api("Resolved URL is not a playlist", 400));
                }
                Ok(payload)
            }
        }
    }

    /// Replace the playlist's full track list. SoundCloud has no atomic
    /// append/delete, so mutations are read-modify-write; concurrent
    /// external edits of the same playlist are last-write-wins.
    async fn put_track_list(&self, playlist_id: &str, payload: &Value) -> Result<()> {
        let resp = self
            .http
            .put(format!("{}/playlists/{}", self.base_url, playlist_id))
            .header(AUTHORIZATION, self.bearer())
            .timeout(UPDATE_TIMEOUT)
            .json(payload)
            .send()
            .await?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    fn track_list_payload(title: &str, tracks: &[Value]) -> Value {
        let ids: Vec<Value> = tracks
            .iter()
            .filter(|t| !t["id"].is_null())
            .map(|t| json!({ "id": t["id"] }))
            .collect();
        json!({ "playlist": { "title": title, "tracks": ids } })
    }
}

#[async_trait]
impl ProviderClient for SoundcloudClient {
    fn provider(&self) -> MusicProvider {
        MusicProvider::Soundcloud
    }

    async fn list_playlists(&self) -> Result<Vec<ProviderPlaylist>> {
        let resp = self.get("/me/playlists").send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let items = payload.as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_playlist).collect())
    }

    async fn get_playlist(&self, playlist_ref: &str) -> Result<ProviderPlaylist> {
        let payload = self.fetch_playlist_payload(playlist_ref).await?;
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
            .get("/playlists")
            .query(&[("q", query), ("limit", safe_limit.as_str())])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let items = payload.as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_playlist).collect())
    }

    async fn resolve_playlist_url(&self, url: &str) -> Result<ProviderPlaylist> {
        let playlist_url = url.trim();
        if playlist_url.is_empty() {
            return Err(ProviderError::api("Playlist URL is required", 400));
        }
        self.get_playlist(playlist_url).await
    }

    async fn create_playlist(
        &self,
        title: &str,
        description: Option<&str>,
        is_public: Option<bool>,
    ) -> Result<ProviderPlaylist> {
        let payload = json!({
            "playlist": {
                "title": title,
                "description": description.unwrap_or(""),
                "sharing": if is_public == Some(true) { "public" } else { "private" },
            }
        });
        let resp = self
            .http
            .post(format!("{}/playlists", self.base_url))
            .header(AUTHORIZATION, self.bearer())
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let body: Value = resp.json().await?;
        let mapped = Self::map_playlist(&body)
            .ok_or_else(|| ProviderError::api("Unable to create playlist", 502))?;
        Ok(ProviderPlaylist {
            title: if mapped.title.is_empty() {
                title.to_string()
            } else {
                mapped.title
            },
            description: mapped.description.or_else(|| description.map(str::to_string)),
            ..mapped
        })
    }

    async fn list_tracks(&self, playlist_ref: &str) -> Result<Vec<ProviderTrack>> {
        let payload = self.fetch_playlist_payload(playlist_ref).await?;
        let tracks = payload["tracks"].as_array().cloned().unwrap_or_default();
        Ok(tracks.iter().filter_map(Self::map_track).collect())
    }

    async fn add_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        let payload = self.fetch_playlist_payload(playlist_ref).await?;
        let playlist_id = id_string(&payload["id"])
            .ok_or_else(|| ProviderError::api("Unable to load playlist", 404))?;
        let mut tracks = payload["tracks"].as_array().cloned().unwrap_or_default();
        let mut existing: std::collections::HashSet<String> = tracks
            .iter()
            .filter_map(|t| id_string(&t["id"]))
            .collect();
        for track_id in track_ids {
            let track_id = track_id.trim();
            if track_id.is_empty() || existing.contains(track_id) {
                continue;
            }
            // Numeric ids stay numbers on the wire, like the rest of the list.
            let id_value = track_id
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(track_id));
            tracks.push(json!({ "id": id_value }));
            existing.insert(track_id.to_string());
        }
        let title = clean_str(&payload["title"]).unwrap_or_else(|| "Untitled".into());
        self.put_track_list(&playlist_id, &Self::track_list_payload(&title, &tracks))
            .await
    }

    async fn remove_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        let remove: std::collections::HashSet<&str> =
            track_ids.iter().map(|s| s.trim()).collect();
        let payload = self.fetch_playlist_payload(playlist_ref).await?;
        let playlist_id = id_string(&payload["id"])
            .ok_or_else(|| ProviderError::api("Unable to load playlist", 404))?;
        let kept: Vec<Value> = payload["tracks"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|t| {
                id_string(&t["id"])
                    .map(|id| !remove.contains(id.as_str()))
                    .unwrap_or(false)
            })
            .collect();
        let title = clean_str(&payload["title"]).unwrap_or_else(|| "Untitled".into());
        self.put_track_list(&playlist_id, &Self::track_list_payload(&title, &kept))
            .await
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
            .get("/tracks")
            .query(&[("q", query), ("limit", safe_limit.as_str())])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let items = payload.as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_track).collect())
    }

    async fn related_tracks(
        &self,
        seed_track_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProviderTrack>> {
        let track_id = seed_track_id.trim();
        if track_id.is_empty() {
            return Ok(Vec::new());
        }
        let safe_limit = clamp_limit(limit, 50);
        let resp = self
            .get(&format!("/tracks/{}/related", track_id))
            .query(&[
                ("limit", safe_limit.to_string()),
                ("offset", offset.to_string()),
                ("linked_partitioning", "1".to_string()),
            ])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        // Either a plain array or a paging envelope with `collection`.
        let items = payload
            .as_array()
            .cloned()
            .or_else(|| payload["collection"].as_array().cloned())
            .unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_track).collect())
    }

    async fn resolve_track_url(&self, url: &str) -> Result<ProviderTrack> {
        let track_url = url.trim();
        if track_url.is_empty() {
            return Err(ProviderError::api("Track URL is required", 400));
        }
        let payload = self.resolve(track_url).await?;
        if let Some(kind) = payload["kind"].as_str() {
            if kind != "track" {
                return Err(ProviderError::api("Resolved URL is not a track", 400));
            }
        }
        Self::map_track(&payload)
            .ok_or_else(|| ProviderError::api("Unable to resolve track URL", 404))
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<ProviderUser>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let safe_limit = clamp_limit(limit, SEARCH_LIMIT_CAP);
        let limit_param = safe_limit.to_string();
        let mut results: Vec<ProviderUser> = Vec::new();

        let directory = async {
            let resp = self
                .get("/users")
                .query(&[("q", query), ("limit", limit_param.as_str())])
                .send()
                .await?;
            let resp = Self::ensure_success(resp).await?;
            Ok::<Value, ProviderError>(resp.json().await?)
        }
        .await;
        match directory {
            Ok(payload) => {
                if let Some(items) = payload.as_array() {
                    results.extend(items.iter().filter_map(Self::map_user));
                }
            }
            Err(err) if err.is_auth() => return Err(err),
            // Keep invite lookup usable even when user search is flaky.
            Err(err) => warn!("SoundCloud user search failed: {}", err),
        }

        if let Some(handle) = Self::extract_handle(query) {
            let resolved = match self.resolve_user_by_handle(&handle).await {
                Ok(user) => user,
                Err(err) if err.is_auth() => return Err(err),
                Err(_) => None,
            };
            if let Some(user) = resolved {
                if !results
                    .iter()
                    .any(|u| u.provider_user_id == user.provider_user_id)
                {
                    results.insert(0, user);
                }
            }
        }
        results.truncate(safe_limit);
        Ok(results)
    }

    async fn get_user(&self, user_ref: &str) -> Result<ProviderUser> {
        let user_id = user_ref.trim();
        if user_id.is_empty() {
            return Err(ProviderError::api("Provider user id is required", 400));
        }
        let resp = self.get(&format!("/users/{}", user_id)).send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Self::map_user(&payload).ok_or_else(|| ProviderError::api("Provider user not found", 404))
    }
}
