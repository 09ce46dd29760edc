use super::ProviderClient;
use crate::error::{ProviderError, Result};
use crate::models::{MusicProvider, ProviderPlaylist, ProviderTrack};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

/// A deterministic in-memory provider used by tests. It records every
/// mutation and returns canned values; no HTTP is involved.
pub struct MockClient {
    provider: MusicProvider,
    /// Mutations recorded as (playlist_ref, track_ids) pairs.
    pub added: Mutex<Vec<(String, Vec<String>)>>,
    pub removed: Mutex<Vec<(String, Vec<String>)>>,
    /// When set, every mutation fails with an `Api` error of this status.
    pub fail_status: Option<u16>,
}

impl MockClient {
    pub fn new(provider: MusicProvider) -> Self {
        Self {
            provider,
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            fail_status: None,
        }
    }

    pub fn failing(provider: MusicProvider, status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::new(provider)
        }
    }

    fn check_failure(&self) -> Result<()> {
        match self.fail_status {
            Some(status) => Err(ProviderError::api("mock provider failure", status)),
            None => Ok(()),
        }
    }

    fn playlist(&self, id: &str) -> ProviderPlaylist {
        ProviderPlaylist {
            provider: self.provider,
            provider_playlist_id: id.to_string(),
            title: format!("Mock playlist {}", id),
            description: None,
            image_url: None,
            url: None,
            track_count: None,
            is_public: None,
        }
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    fn provider(&self) -> MusicProvider {
        self.provider
    }

    async fn list_playlists(&self) -> Result<Vec<ProviderPlaylist>> {
        Ok(vec![self.playlist("mock-playlist-1")])
    }

    async fn get_playlist(&self, playlist_ref: &str) -> Result<ProviderPlaylist> {
        Ok(self.playlist(playlist_ref))
    }

    async fn search_playlists(&self, query: &str, _limit: usize) -> Result<Vec<ProviderPlaylist>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![self.playlist(&format!("mock-search-{}", query.trim()))])
    }

    async fn resolve_playlist_url(&self, url: &str) -> Result<ProviderPlaylist> {
        Ok(self.playlist(url.trim()))
    }

    async fn create_playlist(
        &self,
        title: &str,
        description: Option<&str>,
        is_public: Option<bool>,
    ) -> Result<ProviderPlaylist> {
        self.check_failure()?;
        info!("MockClient: create_playlist {}", title);
        Ok(ProviderPlaylist {
            description: description.map(str::to_string),
            is_public,
            ..self.playlist(&format!("mock-playlist-{}", title))
        })
    }

    async fn list_tracks(&self, _playlist_ref: &str) -> Result<Vec<ProviderTrack>> {
        Ok(Vec::new())
    }

    async fn add_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        self.check_failure()?;
        info!(
            "MockClient: add_tracks {} -> {} tracks",
            playlist_ref,
            track_ids.len()
        );
        self.added
            .lock()
            .await
            .push((playlist_ref.to_string(), track_ids.to_vec()));
        Ok(())
    }

    async fn remove_tracks(&self, playlist_ref: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        self.check_failure()?;
        info!(
            "MockClient: remove_tracks {} -> {} tracks",
            playlist_ref,
            track_ids.len()
        );
        self.removed
            .lock()
            .await
            .push((playlist_ref.to_string(), track_ids.to_vec()));
        Ok(())
    }

    async fn search_tracks(
        &self,
        query: &str,
        _limit: usize,
        _hydrate_metadata: bool,
    ) -> Result<Vec<ProviderTrack>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ProviderTrack {
            provider_track_id: format!("mock-track-{}", query.trim()),
            title: query.trim().to_string(),
            artist: Some("Mock Artist".into()),
            genre: None,
            artwork_url: None,
            url: None,
        }])
    }

    async fn resolve_track_url(&self, url: &str) -> Result<ProviderTrack> {
        Ok(ProviderTrack {
            provider_track_id: url.trim().to_string(),
            title: url.trim().to_string(),
            artist: None,
            genre: None,
            artwork_url: None,
            url: Some(url.trim().to_string()),
        })
    }
}
