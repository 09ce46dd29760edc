use super::{clamp_limit, clean_str, ProviderClient, SEARCH_LIMIT_CAP};
use crate::error::{ProviderError, Result};
use crate::models::{MusicProvider, ProviderPlaylist, ProviderTrack};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Regenerate the developer token when it expires within this window.
const DEVELOPER_TOKEN_SKEW_SECONDS: i64 = 300;

const DEFAULT_DEVELOPER_TOKEN_TTL_SECONDS: i64 = 15_777_000;

const TRACK_TYPES: [&str; 4] = [
    "library-songs",
    "library-music-videos",
    "songs",
    "music-videos",
];

/// Single-slot process-wide cache: the signed developer token and its
/// expiry instant. Guarded by one mutex so concurrent requests do not
/// trigger redundant signing; the expiry is re-checked under the lock.
static DEVELOPER_TOKEN_CACHE: Lazy<Mutex<Option<(String, i64)>>> = Lazy::new(|| Mutex::new(None));

#[derive(Serialize)]
struct DeveloperTokenClaims {
    iss: String,
    iat: i64,
    exp: i64,
}

/// Apple Music client. Requests carry two credentials: the app-level
/// developer token (ES256-signed JWT) as the bearer, and the end user's
/// `Music-User-Token`. Library and catalog resources live under different
/// paths and are told apart by id shape (`pl.` playlists and `i.` tracks
/// are catalog/library markers respectively).
pub struct AppleMusicClient {
    http: Client,
    access_token: String,
    base_url: String,
    storefront: String,
}

fn setting(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl AppleMusicClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_url(access_token, Self::api_base())
    }

    /// Explicit base URL, used by tests to point at a mock server.
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            access_token: access_token.into(),
            base_url: base_url.into(),
            storefront: setting("APPLE_MUSIC_STOREFRONT").unwrap_or_else(|| "us".into()),
        }
    }

    fn api_base() -> String {
        std::env::var("APPLE_MUSIC_API_BASE")
            .unwrap_or_else(|_| "https://api.music.apple.com".into())
    }

    fn generate_developer_token() -> Result<(String, i64)> {
        let team_id = setting("APPLE_MUSIC_TEAM_ID");
        let key_id = setting("APPLE_MUSIC_KEY_ID");
        let private_key = setting("APPLE_MUSIC_PRIVATE_KEY");
        let (Some(team_id), Some(key_id), Some(private_key)) = (team_id, key_id, private_key)
        else {
            return Err(ProviderError::api(
                "Apple Music developer token settings are missing",
                500,
            ));
        };
        // Operators often paste the PEM with literal \n escapes.
        let normalized_key = private_key.replace("\\n", "\n");
        let ttl = setting("APPLE_MUSIC_DEVELOPER_TOKEN_TTL_SECONDS")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_DEVELOPER_TOKEN_TTL_SECONDS)
            .max(600);
        let now = Utc::now().timestamp();
        let exp = now + ttl;
        let key = EncodingKey::from_ec_pem(normalized_key.as_bytes()).map_err(|e| {
            ProviderError::api(
                format!("Unable to generate Apple Music developer token: {}", e),
                500,
            )
        })?;
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(key_id);
        let claims = DeveloperTokenClaims {
            iss: team_id,
            iat: now,
            exp,
        };
        let token = encode(&header, &claims, &key).map_err(|e| {
            ProviderError::api(
                format!("Unable to generate Apple Music developer token: {}", e),
                500,
            )
        })?;
        Ok((token, exp))
    }

    /// Serve the developer token from the process-wide cache, regenerating
    /// under the lock when absent or inside the expiry skew window.
    async fn cached_developer_token<F>(&self, generate: F) -> Result<String>
    where
        F: FnOnce() -> Result<(String, i64)>,
    {
        let mut slot = DEVELOPER_TOKEN_CACHE.lock().await;
        let now = Utc::now().timestamp();
        if let Some((token, expires_at)) = slot.as_ref() {
            if *expires_at > now + DEVELOPER_TOKEN_SKEW_SECONDS {
                return Ok(token.clone());
            }
        }
        debug!("Apple developer token absent or near expiry, signing a new one");
        let (token, expires_at) = generate()?;
        *slot = Some((token.clone(), expires_at));
        Ok(token)
    }

    async fn developer_token(&self) -> Result<String> {
        // A statically configured token bypasses generation entirely.
        if let Some(token) = setting("APPLE_MUSIC_DEVELOPER_TOKEN") {
            return Ok(token);
        }
        self.cached_developer_token(Self::generate_developer_token)
            .await
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path_or_url: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let user_token = self.access_token.trim();
        if user_token.is_empty() {
            return Err(ProviderError::auth("Missing Apple Music user token"));
        }
        let developer_token = self.developer_token().await?;
        let url = if path_or_url.starts_with("http") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };
        Ok(self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", developer_token))
            .header("Music-User-Token", user_token)
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT))
    }

    async fn get(&self, path_or_url: &str) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::GET, path_or_url).await
    }

    fn extract_error_message(payload: &Value) -> Option<String> {
        if let Some(errors) = payload["errors"].as_array() {
            for error in errors {
                if let Some(detail) = clean_str(&error["detail"]) {
                    return Some(detail);
                }
                if let Some(title) = clean_str(&error["title"]) {
                    return Some(title);
                }
            }
        }
        clean_str(&payload["message"])
    }

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(resp);
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::auth(
                "Apple Music authorization expired or invalid",
            ));
        }
        let detail = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| Self::extract_error_message(&v));
        let suffix = detail.map(|d| format!(": {}", d)).unwrap_or_default();
        let message = if status == 429 {
            format!("Apple Music API rate limit exceeded (429){}", suffix)
        } else {
            format!("Apple Music API error ({}){}", status, suffix)
        };
        Err(ProviderError::api(message, status))
    }

    fn extract_description(value: &Value) -> Option<String> {
        if let Some(text) = clean_str(value) {
            return Some(text);
        }
        clean_str(&value["standard"]).or_else(|| clean_str(&value["short"]))
    }

    fn first_text(values: &Value) -> Option<String> {
        values
            .as_array()?
            .iter()
            .find_map(clean_str)
    }

    /// Apple artwork URLs are templates with `{w}`/`{h}` placeholders.
    fn format_artwork_url(value: &Value) -> Option<String> {
        let template = clean_str(&value["url"])?;
        let width = value["width"].as_u64().filter(|&w| w > 0).unwrap_or(500);
        let height = value["height"].as_u64().filter(|&h| h > 0).unwrap_or(500);
        Some(
            template
                .replace("{w}", &width.to_string())
                .replace("{h}", &height.to_string()),
        )
    }

    fn id_from_url(raw_url: &str, resource: &str) -> Option<String> {
        let parsed = url::Url::parse(raw_url).ok()?;
        if !parsed.host_str().unwrap_or("").contains("music.apple.com") {
            return None;
        }
        if resource == "track" {
            // Track links often point at the album with the song in `?i=`.
            if let Some(id) = parsed
                .query_pairs()
                .find(|(k, _)| k == "i")
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
            {
                return Some(id);
            }
        }
        let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return None;
        }
        for (index, segment) in segments.iter().enumerate() {
            if !segment.eq_ignore_ascii_case(resource) {
                continue;
            }
            return segments
                .get(index + 1)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }
        segments
            .last()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn normalize_playlist_id(value: &str) -> Option<String> {
        let raw = value.trim();
        if raw.is_empty() {
            return None;
        }
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("apple:playlist:") {
            let id = raw["apple:playlist:".len()..].trim();
            return (!id.is_empty()).then(|| id.to_string());
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Self::id_from_url(raw, "playlist");
        }
        if lower.contains("music.apple.com/") {
            return Self::id_from_url(&format!("https://{}", raw), "playlist");
        }
        Some(raw.to_string())
    }

    /// Resolve a track reference to (id, track type). The type is derived
    /// from an explicit `apple:<type>:<id>` or `<type>:<id>` prefix, the
    /// URL shape, or the id itself (`i.` ids are library songs).
    fn normalize_track_ref(value: &str) -> Option<(String, String)> {
        let raw = value.trim();
        if raw.is_empty() {
            return None;
        }
        let lower = raw.to_ascii_lowercase();

        if lower.starts_with("apple:") {
            let mut parts = raw.splitn(3, ':');
            let (_, maybe_type, maybe_id) = (parts.next(), parts.next(), parts.next());
            if let (Some(track_type), Some(track_id)) = (maybe_type, maybe_id) {
                let track_type = track_type.trim().to_ascii_lowercase();
                let track_id = track_id.trim();
                if TRACK_TYPES.contains(&track_type.as_str()) && !track_id.is_empty() {
                    return Some((track_id.to_string(), track_type));
                }
            }
        }

        if let Some((maybe_type, maybe_id)) = raw.split_once(':') {
            let maybe_type = maybe_type.trim().to_ascii_lowercase();
            let maybe_id = maybe_id.trim();
            if TRACK_TYPES.contains(&maybe_type.as_str()) && !maybe_id.is_empty() {
                return Some((maybe_id.to_string(), maybe_type));
            }
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Self::id_from_url(raw, "track").map(|id| (id, "songs".into()));
        }
        if lower.contains("music.apple.com/") {
            return Self::id_from_url(&format!("https://{}", raw), "track")
                .map(|id| (id, "songs".into()));
        }

        if raw.starts_with("i.") {
            return Some((raw.to_string(), "library-songs".into()));
        }
        Some((raw.to_string(), "songs".into()))
    }

    fn next_url(payload: &Value) -> Option<String> {
        clean_str(&payload["next"])
    }

    fn data_list(payload: &Value) -> Vec<Value> {
        match &payload["data"] {
            Value::Array(items) => items.clone(),
            Value::Object(_) => vec![payload["data"].clone()],
            _ => Vec::new(),
        }
    }

    fn map_playlist(&self, payload: &Value) -> Option<ProviderPlaylist> {
        let playlist_id = clean_str(&payload["id"])?;
        let attributes = &payload["attributes"];
        let url = clean_str(&attributes["url"]).unwrap_or_else(|| {
            format!(
                "https://music.apple.com/library/playlist/{}",
                urlencoding::encode(&playlist_id)
            )
        });
        Some(ProviderPlaylist {
            provider: MusicProvider::Apple,
            provider_playlist_id: playlist_id,
            title: clean_str(&attributes["name"]).unwrap_or_else(|| "Untitled".into()),
            description: Self::extract_description(&attributes["description"]),
            image_url: Self::format_artwork_url(&attributes["artwork"]),
            url: Some(url),
            track_count: attributes["trackCount"].as_u64().and_then(|n| u32::try_from(n).ok()),
            is_public: attributes["isPublic"].as_bool(),
        })
    }

    fn map_track(payload: &Value) -> Option<ProviderTrack> {
        let track_id = clean_str(&payload["id"])?;
        let attributes = &payload["attributes"];
        Some(ProviderTrack {
            provider_track_id: track_id,
            title: clean_str(&attributes["name"])
                .or_else(|| clean_str(&attributes["title"]))
                .unwrap_or_else(|| "Untitled".into()),
            artist: clean_str(&attributes["artistName"]),
            genre: Self::first_text(&attributes["genreNames"]),
            artwork_url: Self::format_artwork_url(&attributes["artwork"]),
            url: clean_str(&attributes["url"]),
        })
    }

    async fn fetch_single_playlist(&self, path: &str) -> Result<ProviderPlaylist> {
        let resp = self.get(path).await?.send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Self::data_list(&payload)
            .iter()
            .find_map(|item| self.map_playlist(item))
            .ok_or_else(|| ProviderError::api("Unable to load playlist", 404))
    }
}

#[async_trait]
impl ProviderClient for AppleMusicClient {
    fn provider(&self) -> MusicProvider {
        MusicProvider::Apple
    }

    async fn list_playlists(&self) -> Result<Vec<ProviderPlaylist>> {
        let mut playlists = Vec::new();
        let mut next = Some("/v1/me/library/playlists?limit=100&offset=0".to_string());
        while let Some(url) = next {
            let resp = self.get(&url).await?.send().await?;
            let resp = Self::ensure_success(resp).await?;
            let payload: Value = resp.json().await?;
            for item in Self::data_list(&payload) {
                if let Some(mapped) = self.map_playlist(&item) {
                    playlists.push(mapped);
                }
            }
            // `next` is a relative path carrying its own offset.
            next = Self::next_url(&payload);
        }
        Ok(playlists)
    }

    async fn get_playlist(&self, playlist_ref: &str) -> Result<ProviderPlaylist> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        if playlist_id.starts_with("pl.") {
            // Global playlists live in the catalog, not the user library.
            return self
                .fetch_single_playlist(&format!(
                    "/v1/catalog/{}/playlists/{}",
                    self.storefront, playlist_id
                ))
                .await;
        }
        self.fetch_single_playlist(&format!("/v1/me/library/playlists/{}", playlist_id))
            .await
    }

    async fn search_playlists(&self, query: &str, limit: usize) -> Result<Vec<ProviderPlaylist>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let safe_limit = clamp_limit(limit, SEARCH_LIMIT_CAP).to_string();
        let resp = self
            .get("/v1/me/library/search")
            .await?
            .query(&[
                ("term", query),
                ("types", "library-playlists"),
                ("limit", safe_limit.as_str()),
                ("offset", "0"),
            ])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let items = payload["results"]["library-playlists"]["data"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().filter_map(|item| self.map_playlist(item)).collect())
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
        let body = json!({
            "attributes": {
                "name": title,
                "description": description.unwrap_or(""),
            }
        });
        let resp = self
            .request(reqwest::Method::POST, "/v1/me/library/playlists")
            .await?
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let mapped = Self::data_list(&payload)
            .iter()
            .find_map(|item| self.map_playlist(item))
            .ok_or_else(|| ProviderError::api("Unable to create playlist", 502))?;
        Ok(ProviderPlaylist {
            description: mapped.description.or_else(|| description.map(str::to_string)),
            is_public: is_public.or(mapped.is_public),
            ..mapped
        })
    }

    async fn list_tracks(&self, playlist_ref: &str) -> Result<Vec<ProviderTrack>> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let mut tracks = Vec::new();
        let mut next = Some(format!(
            "/v1/me/library/playlists/{}/tracks?limit=100&offset=0",
            playlist_id
        ));
        while let Some(url) = next {
            let resp = self.get(&url).await?.send().await?;
            let resp = Self::ensure_success(resp).await?;
            let payload: Value = resp.json().await?;
            for item in Self::data_list(&payload) {
                if let Some(mapped) = Self::map_track(&item) {
                    tracks.push(mapped);
                }
            }
            next = Self::next_url(&payload);
        }
        Ok(tracks)
    }

    async fn add_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let mut seen = std::collections::HashSet::new();
        let data: Vec<Value> = track_ids
            .iter()
            .filter_map(|t| Self::normalize_track_ref(t))
            .filter(|key| seen.insert(key.clone()))
            .map(|(id, track_type)| json!({ "id": id, "type": track_type }))
            .collect();
        if data.is_empty() {
            return Ok(());
        }
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/me/library/playlists/{}/tracks", playlist_id),
            )
            .await?
            .header("Content-Type", "application/json")
            .json(&json!({ "data": data }))
            .send()
            .await?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    async fn remove_tracks(&self, _playlist_ref: &str, _track_ids: &[String]) -> Result<()> {
        Err(ProviderError::api(
            "Apple Music track removal is not supported for library playlists",
            501,
        ))
    }

    async fn shuffle_playlist(
        &self,
        _playlist_ref: &str,
        _max_items: usize,
    ) -> Result<crate::models::ProviderShuffleResult> {
        Err(ProviderError::api(
            "Apple Music playlist shuffling is not supported for library playlists",
            501,
        ))
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
            .get(&format!("/v1/catalog/{}/search", self.storefront))
            .await?
            .query(&[
                ("term", query),
                ("types", "songs"),
                ("limit", safe_limit.as_str()),
                ("offset", "0"),
            ])
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let items = payload["results"]["songs"]["data"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_track).collect())
    }

    async fn resolve_track_url(&self, url: &str) -> Result<ProviderTrack> {
        let track_ref = url.trim();
        if track_ref.is_empty() {
            return Err(ProviderError::api("Track URL is required", 400));
        }
        let (track_id, track_type) = Self::normalize_track_ref(track_ref)
            .ok_or_else(|| ProviderError::api("Resolved URL is not a track", 400))?;
        let path = match track_type.as_str() {
            "library-songs" => format!("/v1/me/library/songs/{}", track_id),
            "library-music-videos" => format!("/v1/me/library/music-videos/{}", track_id),
            "music-videos" => format!(
                "/v1/catalog/{}/music-videos/{}",
                self.storefront, track_id
            ),
            _ => format!("/v1/catalog/{}/songs/{}", self.storefront, track_id),
        };
        let resp = self.get(&path).await?.send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Self::data_list(&payload)
            .iter()
            .find_map(Self::map_track)
            .ok_or_else(|| ProviderError::api("Unable to resolve track URL", 404))
    }
}
