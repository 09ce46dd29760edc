use super::{clamp_limit, clean_str, ProviderClient, SEARCH_LIMIT_CAP};
use crate::error::{ProviderError, Result};
use crate::models::{MusicProvider, ProviderPlaylist, ProviderTrack};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const TRACK_TYPES: [&str; 2] = ["tracks", "videos"];

const RELATED_LIMIT_CAP: usize = 50;

/// Side-table of fully-described related resources, indexed by
/// (lower-cased type, id). Built once per response page and threaded
/// through every mapping pass instead of rescanning `included`.
type IncludedIndex = HashMap<(String, String), Value>;

/// One playlist entry: the mapped track plus the JSON:API item id the
/// relationships DELETE endpoint requires.
struct PlaylistItem {
    track: ProviderTrack,
    item_id: Option<String>,
    resource_type: String,
}

/// TIDAL v2 client. JSON:API throughout: primary data carries linkage,
/// `included` carries the resources, pagination follows `links.next`.
/// Playlist items are lazily described, so listing hydrates missing track
/// metadata (bulk via `filter[id]` for tracks, per-resource for videos).
pub struct TidalClient {
    http: Client,
    access_token: String,
    base_url: String,
    country_code: Option<String>,
}

impl TidalClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_url(access_token, Self::api_base())
    }

    /// Explicit base URL, used by tests to point at a mock server.
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            access_token: access_token.into(),
            base_url: base_url.into(),
            country_code: std::env::var("TIDAL_COUNTRY_CODE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    fn api_base() -> String {
        std::env::var("TIDAL_API_BASE").unwrap_or_else(|_| "https://openapi.tidal.com/v2".into())
    }

    fn params(&self) -> Vec<(String, String)> {
        match &self.country_code {
            Some(cc) => vec![("countryCode".into(), cc.clone())],
            None => Vec::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path_or_url: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.access_token.trim();
        if token.is_empty() {
            return Err(ProviderError::auth("Missing TIDAL access token"));
        }
        let url = if path_or_url.starts_with("http") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };
        Ok(self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.api+json")
            .timeout(REQUEST_TIMEOUT))
    }

    fn get(&self, path_or_url: &str) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::GET, path_or_url)
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
                "TIDAL authorization expired or invalid",
            ));
        }
        let detail = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| Self::extract_error_message(&v));
        let suffix = detail.map(|d| format!(": {}", d)).unwrap_or_default();
        let message = if status == 429 {
            format!("TIDAL API rate limit exceeded (429){}", suffix)
        } else {
            format!("TIDAL API error ({}){}", status, suffix)
        };
        Err(ProviderError::api(message, status))
    }

    fn is_uuid(value: &str) -> bool {
        Uuid::parse_str(value).is_ok()
    }

    fn id_from_url(raw_url: &str, resource: &str) -> Option<String> {
        let parsed = url::Url::parse(raw_url).ok()?;
        if !parsed.host_str().unwrap_or("").contains("tidal.com") {
            return None;
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
        if lower.starts_with("tidal:playlist:") {
            let id = raw["tidal:playlist:".len()..].trim();
            return (!id.is_empty()).then(|| id.to_string());
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Self::id_from_url(raw, "playlist");
        }
        if lower.contains("tidal.com/") {
            return Self::id_from_url(&format!("https://{}", raw), "playlist");
        }
        Some(raw.to_string())
    }

    /// Resolve a track reference to (id, resource type). Videos are a
    /// distinct resource type and must be tagged explicitly or via URL
    /// shape; everything else defaults to `tracks`.
    fn normalize_track_ref(value: &str) -> Option<(String, String)> {
        let raw = value.trim();
        if raw.is_empty() {
            return None;
        }
        let lower = raw.to_ascii_lowercase();

        if lower.starts_with("tidal:") {
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
            let resource = if lower.contains("/video/") { "video" } else { "track" };
            let mapped = if resource == "video" { "videos" } else { "tracks" };
            return Self::id_from_url(raw, resource).map(|id| (id, mapped.into()));
        }
        if lower.contains("tidal.com/") {
            let resource = if lower.contains("/video/") { "video" } else { "track" };
            let mapped = if resource == "video" { "videos" } else { "tracks" };
            return Self::id_from_url(&format!("https://{}", raw), resource)
                .map(|id| (id, mapped.into()));
        }

        Some((raw.to_string(), "tracks".into()))
    }

    fn data_list(payload: &Value) -> Vec<Value> {
        match &payload["data"] {
            Value::Array(items) => items.clone(),
            Value::Object(_) => vec![payload["data"].clone()],
            _ => Vec::new(),
        }
    }

    fn included_index(payload: &Value) -> IncludedIndex {
        let mut index = IncludedIndex::new();
        if let Some(included) = payload["included"].as_array() {
            for item in included {
                let (Some(item_type), Some(item_id)) =
                    (clean_str(&item["type"]), clean_str(&item["id"]))
                else {
                    continue;
                };
                index.insert((item_type.to_ascii_lowercase(), item_id), item.clone());
            }
        }
        index
    }

    /// Next page link: either a top-level `next` or `links.next`, the
    /// latter a string or a `{href}` object.
    fn next_url(payload: &Value) -> Option<String> {
        if let Some(next) = clean_str(&payload["next"]) {
            return Some(next);
        }
        let next_link = &payload["links"]["next"];
        clean_str(next_link).or_else(|| clean_str(&next_link["href"]))
    }

    fn relationship_entries(resource: &Value, relationship: &str) -> Vec<Value> {
        match &resource["relationships"][relationship]["data"] {
            Value::Array(items) => items.clone(),
            Value::Object(_) => vec![resource["relationships"][relationship]["data"].clone()],
            _ => Vec::new(),
        }
    }

    /// Pick a share link from `attributes.externalLinks`, preferring the
    /// given link types; first link is the fallback.
    fn external_url(resource: &Value, preferred_types: &[&str]) -> Option<String> {
        let links = resource["attributes"]["externalLinks"].as_array()?;
        let mut fallback = None;
        for link in links {
            let Some(href) = clean_str(&link["href"]) else {
                continue;
            };
            if fallback.is_none() {
                fallback = Some(href.clone());
            }
            if let Some(link_type) = link["meta"]["type"].as_str() {
                if preferred_types
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(link_type))
                {
                    return Some(href);
                }
            }
        }
        fallback
    }

    fn artwork_url_from_artwork(artwork: &Value) -> Option<String> {
        artwork["attributes"]["files"]
            .as_array()?
            .iter()
            .find_map(|file| clean_str(&file["href"]))
    }

    fn artwork_from_resource(resource: &Value, index: &IncludedIndex) -> Option<String> {
        for relationship in ["coverArt", "artworks"] {
            for entry in Self::relationship_entries(resource, relationship) {
                let (Some(artwork_type), Some(artwork_id)) =
                    (clean_str(&entry["type"]), clean_str(&entry["id"]))
                else {
                    continue;
                };
                if let Some(artwork) = index.get(&(artwork_type.to_ascii_lowercase(), artwork_id)) {
                    if let Some(url) = Self::artwork_url_from_artwork(artwork) {
                        return Some(url);
                    }
                }
            }
        }
        None
    }

    /// Artist display names, deduplicated case-insensitively while keeping
    /// first-seen order.
    fn artist_names(resource: &Value, index: &IncludedIndex) -> Vec<String> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        for entry in Self::relationship_entries(resource, "artists") {
            let (Some(artist_type), Some(artist_id)) =
                (clean_str(&entry["type"]), clean_str(&entry["id"]))
            else {
                continue;
            };
            let Some(artist) = index.get(&(artist_type.to_ascii_lowercase(), artist_id)) else {
                continue;
            };
            if let Some(name) = clean_str(&artist["attributes"]["name"]) {
                if seen.insert(name.to_lowercase()) {
                    names.push(name);
                }
            }
        }
        names
    }

    fn genre(resource: &Value, index: &IncludedIndex) -> Option<String> {
        for entry in Self::relationship_entries(resource, "genres") {
            let (Some(genre_type), Some(genre_id)) =
                (clean_str(&entry["type"]), clean_str(&entry["id"]))
            else {
                continue;
            };
            if let Some(genre) = index.get(&(genre_type.to_ascii_lowercase(), genre_id)) {
                if let Some(name) = clean_str(&genre["attributes"]["name"]) {
                    return Some(name);
                }
            }
        }
        None
    }

    fn map_playlist(resource: &Value, index: &IncludedIndex) -> Option<ProviderPlaylist> {
        let playlist_id = clean_str(&resource["id"])?;
        let attributes = &resource["attributes"];
        let url = Self::external_url(
            resource,
            &["TIDAL_SHARING", "TIDAL_USER_SHARING", "TIDAL_AUTOPLAY_WEB"],
        )
        .unwrap_or_else(|| {
            format!(
                "https://listen.tidal.com/playlist/{}",
                urlencoding::encode(&playlist_id)
            )
        });
        Some(ProviderPlaylist {
            provider: MusicProvider::Tidal,
            provider_playlist_id: playlist_id,
            title: clean_str(&attributes["name"]).unwrap_or_else(|| "Untitled".into()),
            description: clean_str(&attributes["description"]),
            image_url: Self::artwork_from_resource(resource, index),
            url: Some(url),
            track_count: attributes["numberOfItems"].as_u64().and_then(|n| u32::try_from(n).ok()),
            is_public: attributes["accessType"]
                .as_str()
                .map(|a| a.eq_ignore_ascii_case("PUBLIC")),
        })
    }

    fn map_track(resource: &Value, index: &IncludedIndex) -> Option<ProviderTrack> {
        let track_id = clean_str(&resource["id"])?;
        let attributes = &resource["attributes"];
        let title = match (clean_str(&attributes["title"]), clean_str(&attributes["version"])) {
            (Some(title), Some(version)) => format!("{} ({})", title, version),
            (Some(title), None) => title,
            _ => "Untitled".into(),
        };
        let artist_names = Self::artist_names(resource, index);
        let mut artwork_url = Self::artwork_from_resource(resource, index);
        if artwork_url.is_none() {
            // Fall back to the album cover when the track itself has none.
            for album_entry in Self::relationship_entries(resource, "albums") {
                let (Some(album_type), Some(album_id)) =
                    (clean_str(&album_entry["type"]), clean_str(&album_entry["id"]))
                else {
                    continue;
                };
                if let Some(album) = index.get(&(album_type.to_ascii_lowercase(), album_id)) {
                    artwork_url = Self::artwork_from_resource(album, index);
                    if artwork_url.is_some() {
                        break;
                    }
                }
            }
        }
        let resource_type = resource["type"].as_str().unwrap_or("").to_ascii_lowercase();
        let path_resource = if resource_type == "videos" { "video" } else { "track" };
        let url = Self::external_url(
            resource,
            &[
                "TIDAL_SHARING",
                "TIDAL_AUTOPLAY_WEB",
                "TIDAL_AUTOPLAY_IOS",
                "TIDAL_AUTOPLAY_ANDROID",
            ],
        )
        .unwrap_or_else(|| {
            format!(
                "https://listen.tidal.com/{}/{}",
                path_resource,
                urlencoding::encode(&track_id)
            )
        });
        Some(ProviderTrack {
            provider_track_id: track_id,
            title,
            artist: (!artist_names.is_empty()).then(|| artist_names.join(", ")),
            genre: Self::genre(resource, index),
            artwork_url,
            url: Some(url),
        })
    }

    fn placeholder_track(track_id: &str, resource_type: &str) -> ProviderTrack {
        let path_resource = if resource_type == "videos" { "video" } else { "track" };
        ProviderTrack {
            provider_track_id: track_id.to_string(),
            title: track_id.to_string(),
            artist: None,
            genre: None,
            artwork_url: None,
            url: Some(format!(
                "https://listen.tidal.com/{}/{}",
                path_resource, track_id
            )),
        }
    }

    async fn fetch_current_user_id(&self) -> Result<String> {
        let resp = self.get("/users/me")?.send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        Self::data_list(&payload)
            .first()
            .and_then(|d| clean_str(&d["id"]))
            .ok_or_else(|| ProviderError::api("Unable to fetch TIDAL user profile", 502))
    }

    async fn get_json(&self, path_or_url: &str, params: &[(String, String)]) -> Result<Value> {
        let mut req = self.get(path_or_url)?;
        if !params.is_empty() {
            req = req.query(params);
        }
        let resp = req.send().await?;
        let resp = Self::ensure_success(resp).await?;
        Ok(resp.json().await?)
    }

    /// Fetch one track or video with its relationship graph inlined.
    async fn get_track(&self, track_id: &str, track_type: &str) -> Result<ProviderTrack> {
        let resource = if track_type == "videos" { "videos" } else { "tracks" };
        let mut params = self.params();
        params.push(("include".into(), "artists,albums,albums.coverArt".into()));
        let payload = self
            .get_json(&format!("/{}/{}", resource, track_id), &params)
            .await?;
        let index = Self::included_index(&payload);
        Self::data_list(&payload)
            .first()
            .and_then(|d| Self::map_track(d, &index))
            .ok_or_else(|| ProviderError::api("Unable to load track", 404))
    }

    /// Bulk-hydrate plain tracks in one request. Batching keeps the
    /// request count bounded when many search results arrive as bare
    /// linkage.
    async fn get_tracks_bulk(&self, track_ids: &[String]) -> Result<HashMap<String, ProviderTrack>> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = track_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut params = self.params();
        params.push(("filter[id]".into(), ids.join(",")));
        params.push(("include".into(), "artists,albums,albums.coverArt".into()));
        let payload = self.get_json("/tracks", &params).await?;
        let index = Self::included_index(&payload);
        let mut hydrated = HashMap::new();
        for item in Self::data_list(&payload) {
            if let Some(track) = Self::map_track(&item, &index) {
                hydrated.insert(track.provider_track_id.clone(), track);
            }
        }
        Ok(hydrated)
    }

    async fn list_playlist_items(
        &self,
        playlist_id: &str,
        enrich_track_metadata: bool,
    ) -> Result<Vec<PlaylistItem>> {
        let mut items = Vec::new();
        let mut next = Some(format!("/playlists/{}/relationships/items", playlist_id));
        let mut params = self.params();
        params.push((
            "include".into(),
            "tracks,videos,artists,albums,albums.coverArt".into(),
        ));
        let mut first_page = true;
        while let Some(url) = next {
            let page_params = if first_page { params.clone() } else { Vec::new() };
            first_page = false;
            let payload = self.get_json(&url, &page_params).await?;
            let index = Self::included_index(&payload);
            for entry in Self::data_list(&payload) {
                let Some(resource_id) = clean_str(&entry["id"]) else {
                    continue;
                };
                let resource_type = entry["type"].as_str().unwrap_or("").to_ascii_lowercase();
                if !TRACK_TYPES.contains(&resource_type.as_str()) {
                    continue;
                }
                let resource = index.get(&(resource_type.clone(), resource_id.clone()));
                let mut mapped = resource
                    .or(Some(&entry))
                    .and_then(|r| Self::map_track(r, &index));
                let described = resource
                    .map(|r| r["attributes"].is_object())
                    .unwrap_or(false);
                if enrich_track_metadata && !described {
                    match self.get_track(&resource_id, &resource_type).await {
                        Ok(track) => mapped = Some(track),
                        Err(err) if err.is_auth() => return Err(err),
                        Err(err) => {
                            debug!("TIDAL track {} hydration failed: {}", resource_id, err)
                        }
                    }
                }
                let track = mapped
                    .unwrap_or_else(|| Self::placeholder_track(&resource_id, &resource_type));
                let item_id = clean_str(&entry["meta"]["itemId"]);
                items.push(PlaylistItem {
                    track,
                    item_id,
                    resource_type,
                });
            }
            next = Self::next_url(&payload);
        }
        Ok(items)
    }
}

#[async_trait]
impl ProviderClient for TidalClient {
    fn provider(&self) -> MusicProvider {
        MusicProvider::Tidal
    }

    async fn list_playlists(&self) -> Result<Vec<ProviderPlaylist>> {
        let user_id = self.fetch_current_user_id().await?;
        let mut playlists = Vec::new();
        let mut params = self.params();
        params.push(("include".into(), "coverArt".into()));
        params.push(("filter[owners.id]".into(), user_id));
        let mut next = Some("/playlists".to_string());
        let mut first_page = true;
        while let Some(url) = next {
            let page_params = if first_page { params.clone() } else { Vec::new() };
            first_page = false;
            let payload = self.get_json(&url, &page_params).await?;
            let index = Self::included_index(&payload);
            for item in Self::data_list(&payload) {
                if let Some(mapped) = Self::map_playlist(&item, &index) {
                    playlists.push(mapped);
                }
            }
            next = Self::next_url(&payload);
        }
        Ok(playlists)
    }

    async fn get_playlist(&self, playlist_ref: &str) -> Result<ProviderPlaylist> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let mut params = self.params();
        params.push(("include".into(), "coverArt".into()));
        let payload = self
            .get_json(&format!("/playlists/{}", playlist_id), &params)
            .await?;
        let index = Self::included_index(&payload);
        Self::data_list(&payload)
            .first()
            .and_then(|d| Self::map_playlist(d, &index))
            .ok_or_else(|| ProviderError::api("Unable to load playlist", 404))
    }

    async fn search_playlists(&self, query: &str, limit: usize) -> Result<Vec<ProviderPlaylist>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let safe_limit = clamp_limit(limit, SEARCH_LIMIT_CAP);
        let search_id = urlencoding::encode(query).into_owned();
        let mut results: Vec<ProviderPlaylist> = Vec::new();
        let mut seen_ids = HashSet::new();

        let mut params = self.params();
        params.push(("include".into(), "playlists".into()));
        let payload = self
            .get_json(&format!("/searchResults/{}", search_id), &params)
            .await?;
        let index = Self::included_index(&payload);
        if let Some(included) = payload["included"].as_array() {
            for item in included {
                if item["type"].as_str().unwrap_or("").to_ascii_lowercase() != "playlists" {
                    continue;
                }
                let Some(mapped) = Self::map_playlist(item, &index) else {
                    continue;
                };
                if !seen_ids.insert(mapped.provider_playlist_id.clone()) {
                    continue;
                }
                results.push(mapped);
                if results.len() >= safe_limit {
                    return Ok(results);
                }
            }
        }

        // The relationship endpoint can surface matches the compound
        // response left out; those arrive as bare linkage and need a
        // playlist fetch each.
        let relationship_payload = self
            .get_json(
                &format!("/searchResults/{}/relationships/playlists", search_id),
                &self.params(),
            )
            .await?;
        for entry in Self::data_list(&relationship_payload) {
            let Some(playlist_id) = clean_str(&entry["id"]) else {
                continue;
            };
            if seen_ids.contains(&playlist_id) {
                continue;
            }
            let playlist = match self.get_playlist(&playlist_id).await {
                Ok(playlist) => playlist,
                Err(err) if err.is_auth() => return Err(err),
                Err(_) => continue,
            };
            seen_ids.insert(playlist.provider_playlist_id.clone());
            results.push(playlist);
            if results.len() >= safe_limit {
                break;
            }
        }
        Ok(results)
    }

    async fn resolve_playlist_url(&self, url: &str) -> Result<ProviderPlaylist> {
        let playlist_ref = url.trim();
        if playlist_ref.is_empty() {
            return Err(ProviderError::api("Playlist URL is required", 400));
        }
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
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
            "data": {
                "type": "playlists",
                "attributes": {
                    "name": title,
                    "description": description.unwrap_or(""),
                    "accessType": if is_public == Some(true) { "PUBLIC" } else { "UNLISTED" },
                },
            }
        });
        let mut req = self
            .request(reqwest::Method::POST, "/playlists")?
            .header("Content-Type", "application/vnd.api+json")
            .json(&body);
        let params = self.params();
        if !params.is_empty() {
            req = req.query(&params);
        }
        let resp = req.send().await?;
        let resp = Self::ensure_success(resp).await?;
        let payload: Value = resp.json().await?;
        let index = Self::included_index(&payload);
        let mapped = Self::data_list(&payload)
            .first()
            .and_then(|d| Self::map_playlist(d, &index))
            .ok_or_else(|| ProviderError::api("Unable to create playlist", 502))?;
        Ok(ProviderPlaylist {
            description: mapped.description.or_else(|| description.map(str::to_string)),
            ..mapped
        })
    }

    async fn list_tracks(&self, playlist_ref: &str) -> Result<Vec<ProviderTrack>> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let items = self.list_playlist_items(&playlist_id, true).await?;
        Ok(items.into_iter().map(|item| item.track).collect())
    }

    async fn add_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let mut seen = HashSet::new();
        let data: Vec<Value> = track_ids
            .iter()
            .filter_map(|t| Self::normalize_track_ref(t))
            .filter(|key| seen.insert(key.clone()))
            .map(|(id, track_type)| json!({ "id": id, "type": track_type }))
            .collect();
        if data.is_empty() {
            return Ok(());
        }

        // New suggestions go to the top of the playlist; positionBefore
        // only accepts the UUID-shaped item ids.
        let items = self.list_playlist_items(&playlist_id, false).await?;
        let first_item_id = items.iter().find_map(|item| item.item_id.clone());
        let mut body = json!({ "data": data });
        if let Some(item_id) = first_item_id.filter(|id| Self::is_uuid(id)) {
            body["meta"] = json!({ "positionBefore": item_id });
        }

        let mut req = self
            .request(
                reqwest::Method::POST,
                &format!("/playlists/{}/relationships/items", playlist_id),
            )?
            .header("Content-Type", "application/vnd.api+json")
            .json(&body);
        let params = self.params();
        if !params.is_empty() {
            req = req.query(&params);
        }
        let resp = req.send().await?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    async fn remove_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        let playlist_id = Self::normalize_playlist_id(playlist_ref)
            .ok_or_else(|| ProviderError::api("Playlist reference is required", 400))?;
        let remove_refs: HashSet<(String, String)> = track_ids
            .iter()
            .filter_map(|t| Self::normalize_track_ref(t))
            .collect();
        if remove_refs.is_empty() {
            return Ok(());
        }

        let items = self.list_playlist_items(&playlist_id, false).await?;
        let data: Vec<Value> = items
            .iter()
            .filter(|item| {
                remove_refs.contains(&(
                    item.track.provider_track_id.clone(),
                    item.resource_type.clone(),
                ))
            })
            .filter_map(|item| {
                item.item_id.as_ref().map(|item_id| {
                    json!({
                        "id": item.track.provider_track_id,
                        "type": item.resource_type,
                        "meta": { "itemId": item_id },
                    })
                })
            })
            .collect();
        if data.is_empty() {
            return Ok(());
        }

        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("/playlists/{}/relationships/items", playlist_id),
            )?
            .header("Content-Type", "application/vnd.api+json")
            .json(&json!({ "data": data }))
            .send()
            .await?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    async fn search_tracks(
        &self,
        query: &str,
        limit: usize,
        hydrate_metadata: bool,
    ) -> Result<Vec<ProviderTrack>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let safe_limit = clamp_limit(limit, SEARCH_LIMIT_CAP);
        let search_id = urlencoding::encode(query).into_owned();
        let mut results: Vec<ProviderTrack> = Vec::new();
        let mut seen_ids = HashSet::new();

        let mut params = self.params();
        params.push((
            "include".into(),
            "tracks,artists,albums,albums.coverArt".into(),
        ));
        let payload = self
            .get_json(&format!("/searchResults/{}", search_id), &params)
            .await?;
        let index = Self::included_index(&payload);

        let mut missing_metadata_ids = Vec::new();
        let mut candidates: Vec<(ProviderTrack, String, bool)> = Vec::new();
        if let Some(included) = payload["included"].as_array() {
            for item in included {
                let item_type = item["type"].as_str().unwrap_or("").to_ascii_lowercase();
                if !TRACK_TYPES.contains(&item_type.as_str()) {
                    continue;
                }
                let Some(mapped) = Self::map_track(item, &index) else {
                    continue;
                };
                let needs_metadata = mapped.artist.is_none() || mapped.artwork_url.is_none();
                if hydrate_metadata && needs_metadata && item_type == "tracks" {
                    missing_metadata_ids.push(mapped.provider_track_id.clone());
                }
                candidates.push((mapped, item_type, needs_metadata));
            }
        }

        let mut hydrated = HashMap::new();
        if hydrate_metadata && !missing_metadata_ids.is_empty() {
            hydrated = match self.get_tracks_bulk(&missing_metadata_ids).await {
                Ok(hydrated) => hydrated,
                Err(err) if err.is_auth() => return Err(err),
                Err(_) => HashMap::new(),
            };
        }

        for (mut mapped, item_type, needs_metadata) in candidates {
            if let Some(track) = hydrated.get(&mapped.provider_track_id) {
                mapped = track.clone();
            } else if hydrate_metadata && needs_metadata && item_type != "tracks" {
                match self.get_track(&mapped.provider_track_id, &item_type).await {
                    Ok(track) => mapped = track,
                    Err(err) if err.is_auth() => return Err(err),
                    Err(_) => {}
                }
            }
            if !seen_ids.insert(mapped.provider_track_id.clone()) {
                continue;
            }
            results.push(mapped);
            if results.len() >= safe_limit {
                return Ok(results);
            }
        }

        if !hydrate_metadata {
            return Ok(results);
        }

        let relationship_payload = self
            .get_json(
                &format!("/searchResults/{}/relationships/tracks", search_id),
                &self.params(),
            )
            .await?;
        for entry in Self::data_list(&relationship_payload) {
            let Some(track_id) = clean_str(&entry["id"]) else {
                continue;
            };
            if seen_ids.contains(&track_id) {
                continue;
            }
            let track = match self.get_track(&track_id, "tracks").await {
                Ok(track) => track,
                Err(err) if err.is_auth() => return Err(err),
                Err(_) => continue,
            };
            seen_ids.insert(track.provider_track_id.clone());
            results.push(track);
            if results.len() >= safe_limit {
                break;
            }
        }
        Ok(results)
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
        let safe_limit = clamp_limit(limit, RELATED_LIMIT_CAP);
        let mut params = self.params();
        params.push((
            "include".into(),
            "tracks,artists,albums,albums.coverArt".into(),
        ));
        let mut next = Some(format!(
            "/tracks/{}/relationships/similarTracks",
            track_id
        ));
        let mut first_page = true;
        let mut results = Vec::new();
        // Offset applies to the normalized sequence, not raw pages.
        let mut skipped = 0usize;
        let mut seen_ids = HashSet::new();
        while let Some(url) = next {
            if results.len() >= safe_limit {
                break;
            }
            let page_params = if first_page { params.clone() } else { Vec::new() };
            first_page = false;
            let payload = self.get_json(&url, &page_params).await?;
            let index = Self::included_index(&payload);

            let mut missing_metadata_ids = Vec::new();
            let mut candidates: Vec<(ProviderTrack, String, bool)> = Vec::new();
            for entry in Self::data_list(&payload) {
                let item_type = entry["type"].as_str().unwrap_or("").to_ascii_lowercase();
                if !TRACK_TYPES.contains(&item_type.as_str()) {
                    continue;
                }
                let Some(item_id) = clean_str(&entry["id"]) else {
                    continue;
                };
                if !seen_ids.insert(item_id.clone()) {
                    continue;
                }
                let resource = index.get(&(item_type.clone(), item_id.clone()));
                let Some(mapped) = resource
                    .or(Some(&entry))
                    .and_then(|r| Self::map_track(r, &index))
                else {
                    continue;
                };
                let needs_metadata = mapped.artist.is_none() || mapped.artwork_url.is_none();
                if needs_metadata && item_type == "tracks" {
                    missing_metadata_ids.push(mapped.provider_track_id.clone());
                }
                candidates.push((mapped, item_type, needs_metadata));
            }

            let mut hydrated = HashMap::new();
            if !missing_metadata_ids.is_empty() {
                hydrated = match self.get_tracks_bulk(&missing_metadata_ids).await {
                    Ok(hydrated) => hydrated,
                    Err(err) if err.is_auth() => return Err(err),
                    Err(_) => HashMap::new(),
                };
            }

            for (mut mapped, item_type, needs_metadata) in candidates {
                if let Some(track) = hydrated.get(&mapped.provider_track_id) {
                    mapped = track.clone();
                } else if needs_metadata && item_type != "tracks" {
                    match self.get_track(&mapped.provider_track_id, &item_type).await {
                        Ok(track) => mapped = track,
                        Err(err) if err.is_auth() => return Err(err),
                        Err(_) => {}
                    }
                }
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                results.push(mapped);
                if results.len() >= safe_limit {
                    break;
                }
            }
            next = Self::next_url(&payload);
        }
        Ok(results)
    }

    async fn resolve_track_url(&self, url: &str) -> Result<ProviderTrack> {
        let track_ref = url.trim();
        if track_ref.is_empty() {
            return Err(ProviderError::api("Track URL is required", 400));
        }
        let (track_id, track_type) = Self::normalize_track_ref(track_ref)
            .ok_or_else(|| ProviderError::api("Resolved URL is not a track", 400))?;
        self.get_track(&track_id, &track_type).await
    }
}
