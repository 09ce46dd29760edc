use mockito::{Matcher, Server};
use serde_json::json;
use votuna_providers::providers::soundcloud::SoundcloudClient;
use votuna_providers::providers::ProviderClient;

fn run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Runtime::new().unwrap().block_on(fut)
}

#[test]
fn list_playlists_maps_fields() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let _m = server
        .mock("GET", "/me/playlists")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!([
                {
                    "id": 101,
                    "title": "Evening Mix",
                    "description": "slow ones",
                    "sharing": "public",
                    "track_count": 12,
                    "artwork_url": "https://img.test/evening.jpg",
                    "permalink_url": "https://soundcloud.com/u/sets/evening",
                    "user": { "username": "uploader", "avatar_url": "https://img.test/u.jpg" }
                },
                { "id": 102, "sharing": "private" },
                { "title": "no id, skipped" }
            ])
            .to_string(),
        )
        .create();

    let playlists = run(client.list_playlists()).unwrap();
    assert_eq!(playlists.len(), 2);
    assert_eq!(playlists[0].provider_playlist_id, "101");
    assert_eq!(playlists[0].title, "Evening Mix");
    assert_eq!(playlists[0].is_public, Some(true));
    assert_eq!(playlists[0].track_count, Some(12));
    assert_eq!(
        playlists[0].url.as_deref(),
        Some("https://soundcloud.com/u/sets/evening")
    );
    assert_eq!(playlists[1].title, "Untitled");
    assert_eq!(playlists[1].is_public, Some(false));
}

#[test]
fn get_playlist_resolves_bare_id_and_share_url_to_same_playlist() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());
    let body = json!({ "id": 9, "title": "Mix", "sharing": "private" }).to_string();

    let by_id = server
        .mock("GET", "/playlists/9")
        .with_status(200)
        .with_body(body.clone())
        .create();
    let by_url = server
        .mock("GET", "/resolve")
        .match_query(Matcher::UrlEncoded(
            "url".into(),
            "https://soundcloud.com/u/sets/mix".into(),
        ))
        .with_status(200)
        .with_body(json!({ "id": 9, "kind": "playlist", "title": "Mix" }).to_string())
        .create();

    let direct = run(client.get_playlist("9")).unwrap();
    let resolved = run(client.get_playlist("https://soundcloud.com/u/sets/mix")).unwrap();
    by_id.assert();
    by_url.assert();
    assert_eq!(direct.provider_playlist_id, resolved.provider_playlist_id);

    let prefixed = run(client.get_playlist("soundcloud:playlist:9")).unwrap();
    assert_eq!(prefixed.provider_playlist_id, "9");
}

#[test]
fn resolve_playlist_url_rejects_non_playlist_resources() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let _m = server
        .mock("GET", "/resolve")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({ "id": 5, "kind": "track" }).to_string())
        .create();

    let err = run(client.resolve_playlist_url("https://soundcloud.com/u/some-track")).unwrap_err();
    assert_eq!(err.status(), Some(400));

    let empty = run(client.resolve_playlist_url("   ")).unwrap_err();
    assert_eq!(empty.status(), Some(400));
}

#[test]
fn empty_search_queries_issue_no_requests() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let tracks = server.mock("GET", "/tracks").expect(0).create();
    let playlists = server.mock("GET", "/playlists").expect(0).create();
    let users = server.mock("GET", "/users").expect(0).create();

    assert!(run(client.search_tracks("   ", 10, true)).unwrap().is_empty());
    assert!(run(client.search_playlists("", 10)).unwrap().is_empty());
    assert!(run(client.search_users("", 10)).unwrap().is_empty());
    tracks.assert();
    playlists.assert();
    users.assert();
}

#[test]
fn add_tracks_merges_full_track_list_without_duplicates() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let read = server
        .mock("GET", "/playlists/9")
        .with_status(200)
        .with_body(
            json!({
                "id": 9,
                "title": "Mix",
                "tracks": [{ "id": 1 }, { "id": 2 }]
            })
            .to_string(),
        )
        .create();
    let write = server
        .mock("PUT", "/playlists/9")
        .match_body(Matcher::Json(json!({
            "playlist": {
                "title": "Mix",
                "tracks": [{ "id": 1 }, { "id": 2 }, { "id": 3 }]
            }
        })))
        .with_status(200)
        .with_body(json!({ "id": 9 }).to_string())
        .create();

    run(client.add_tracks("9", &["2".into(), "3".into(), "3".into()])).unwrap();
    read.assert();
    write.assert();
}

#[test]
fn add_and_remove_with_empty_input_are_no_ops() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let read = server.mock("GET", "/playlists/9").expect(0).create();
    run(client.add_tracks("9", &[])).unwrap();
    run(client.remove_tracks("9", &[])).unwrap();
    read.assert();
}

#[test]
fn remove_tracks_filters_track_list() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let _read = server
        .mock("GET", "/playlists/9")
        .with_status(200)
        .with_body(
            json!({
                "id": 9,
                "title": "Mix",
                "tracks": [{ "id": 1 }, { "id": 2 }, { "id": 3 }]
            })
            .to_string(),
        )
        .create();
    let write = server
        .mock("PUT", "/playlists/9")
        .match_body(Matcher::Json(json!({
            "playlist": { "title": "Mix", "tracks": [{ "id": 1 }, { "id": 3 }] }
        })))
        .with_status(200)
        .with_body(json!({ "id": 9 }).to_string())
        .create();

    run(client.remove_tracks("9", &["2".into()])).unwrap();
    write.assert();
}

#[test]
fn unauthorized_responses_surface_as_auth_errors() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("expired", server.url());

    let _m = server
        .mock("GET", "/me/playlists")
        .with_status(401)
        .with_body("{}")
        .create();

    let err = run(client.list_playlists()).unwrap_err();
    assert!(err.is_auth());
}

#[test]
fn search_users_prepends_directly_resolved_handle_without_duplicates() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let _directory = server
        .mock("GET", "/users")
        .match_query(Matcher::UrlEncoded("q".into(), "@somebody".into()))
        .with_status(200)
        .with_body(
            json!([
                { "id": 2, "username": "Other", "permalink": "other" }
            ])
            .to_string(),
        )
        .create();
    let _resolve = server
        .mock("GET", "/resolve")
        .match_query(Matcher::UrlEncoded(
            "url".into(),
            "https://soundcloud.com/somebody".into(),
        ))
        .with_status(200)
        .with_body(
            json!({ "id": 1, "kind": "user", "username": "Somebody", "permalink": "somebody" })
                .to_string(),
        )
        .create();

    let users = run(client.search_users("@somebody", 10)).unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].provider_user_id, "1");
    assert_eq!(users[1].provider_user_id, "2");
}

#[test]
fn search_users_survives_flaky_directory_search() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let _directory = server
        .mock("GET", "/users")
        .with_status(500)
        .with_body("{}")
        .create();
    let _resolve = server
        .mock("GET", "/resolve")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({ "id": 1, "kind": "user", "permalink": "somebody" }).to_string())
        .create();

    let users = run(client.search_users("@somebody", 10)).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].provider_user_id, "1");
}

#[test]
fn related_tracks_accepts_both_payload_envelopes() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let _m = server
        .mock("GET", "/tracks/42/related")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({ "collection": [
                { "id": 43, "title": "Related One" },
                { "id": 44, "title": "Related Two" }
            ]})
            .to_string(),
        )
        .create();

    let tracks = run(client.related_tracks("42", 10, 0)).unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].provider_track_id, "43");

    assert!(run(client.related_tracks("  ", 10, 0)).unwrap().is_empty());
}

#[test]
fn resolve_track_url_checks_resource_kind() {
    let mut server = Server::new();
    let client = SoundcloudClient::with_base_url("token", server.url());

    let _m = server
        .mock("GET", "/resolve")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "id": 7,
                "kind": "track",
                "title": "Found",
                "genre": "ambient",
                "user": { "username": "artist", "avatar_url": "https://img.test/a.jpg" }
            })
            .to_string(),
        )
        .create();

    let track = run(client.resolve_track_url("https://soundcloud.com/artist/found")).unwrap();
    assert_eq!(track.provider_track_id, "7");
    assert_eq!(track.artist.as_deref(), Some("artist"));
    // Track artwork falls back to the uploader avatar.
    assert_eq!(track.artwork_url.as_deref(), Some("https://img.test/a.jpg"));
}
