use mockito::{Matcher, Server};
use serde_json::json;
use votuna_providers::providers::tidal::TidalClient;
use votuna_providers::providers::ProviderClient;

fn run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Runtime::new().unwrap().block_on(fut)
}

#[test]
fn list_playlists_fetches_current_user_and_maps_included_artwork() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let me = server
        .mock("GET", "/users/me")
        .with_status(200)
        .with_body(json!({ "data": { "type": "users", "id": "u-1" } }).to_string())
        .create();
    let playlists = server
        .mock("GET", "/playlists")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("filter[owners.id]".into(), "u-1".into()),
            Matcher::UrlEncoded("include".into(), "coverArt".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "data": [{
                    "type": "playlists",
                    "id": "pl-uuid-1",
                    "attributes": {
                        "name": "Shared Crate",
                        "description": "our picks",
                        "numberOfItems": 3,
                        "accessType": "PUBLIC",
                        "externalLinks": [
                            { "href": "https://tidal.com/playlist/pl-uuid-1",
                              "meta": { "type": "TIDAL_SHARING" } }
                        ]
                    },
                    "relationships": { "coverArt": { "data": [
                        { "type": "artworks", "id": "art-1" }
                    ]}}
                }],
                "included": [{
                    "type": "artworks",
                    "id": "art-1",
                    "attributes": { "files": [{ "href": "https://img.test/cover.jpg" }] }
                }],
                "links": {}
            })
            .to_string(),
        )
        .create();

    let result = run(client.list_playlists()).unwrap();
    me.assert();
    playlists.assert();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].provider_playlist_id, "pl-uuid-1");
    assert_eq!(result[0].title, "Shared Crate");
    assert_eq!(result[0].track_count, Some(3));
    assert_eq!(result[0].is_public, Some(true));
    assert_eq!(result[0].image_url.as_deref(), Some("https://img.test/cover.jpg"));
    assert_eq!(
        result[0].url.as_deref(),
        Some("https://tidal.com/playlist/pl-uuid-1")
    );
}

#[test]
fn list_tracks_maps_included_resources_and_hydrates_bare_linkage() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let _items = server
        .mock("GET", "/playlists/pl-1/relationships/items")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": [
                    { "type": "tracks", "id": "t-1", "meta": { "itemId": "item-1" } },
                    { "type": "tracks", "id": "t-2", "meta": { "itemId": "item-2" } }
                ],
                "included": [{
                    "type": "tracks",
                    "id": "t-1",
                    "attributes": { "title": "Described Inline" },
                    "relationships": { "artists": { "data": [{ "type": "artists", "id": "a-1" }] } }
                }, {
                    "type": "artists",
                    "id": "a-1",
                    "attributes": { "name": "Inline Artist" }
                }],
                "links": {}
            })
            .to_string(),
        )
        .create();
    // t-2 arrives as bare linkage, so listing re-fetches it.
    let hydrate = server
        .mock("GET", "/tracks/t-2")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": {
                    "type": "tracks",
                    "id": "t-2",
                    "attributes": { "title": "Hydrated", "version": "Live" },
                    "relationships": { "artists": { "data": [{ "type": "artists", "id": "a-2" }] } }
                },
                "included": [
                    { "type": "artists", "id": "a-2", "attributes": { "name": "Fetched Artist" } }
                ]
            })
            .to_string(),
        )
        .create();

    let tracks = run(client.list_tracks("pl-1")).unwrap();
    hydrate.assert();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].title, "Described Inline");
    assert_eq!(tracks[0].artist.as_deref(), Some("Inline Artist"));
    assert_eq!(tracks[1].title, "Hydrated (Live)");
    assert_eq!(tracks[1].artist.as_deref(), Some("Fetched Artist"));
}

#[test]
fn add_tracks_prepends_before_first_uuid_item() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let _items = server
        .mock("GET", "/playlists/pl-1/relationships/items")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": [{
                    "type": "tracks",
                    "id": "existing",
                    "meta": { "itemId": "123e4567-e89b-12d3-a456-426614174000" }
                }],
                "links": {}
            })
            .to_string(),
        )
        .create();
    let add = server
        .mock("POST", "/playlists/pl-1/relationships/items")
        .match_body(Matcher::Json(json!({
            "data": [
                { "id": "t-9", "type": "tracks" },
                { "id": "v-1", "type": "videos" }
            ],
            "meta": { "positionBefore": "123e4567-e89b-12d3-a456-426614174000" }
        })))
        .with_status(201)
        .with_body("{}")
        .create();

    run(client.add_tracks(
        "tidal:playlist:pl-1",
        &["t-9".into(), "tidal:videos:v-1".into(), "t-9".into()],
    ))
    .unwrap();
    add.assert();
}

#[test]
fn add_tracks_omits_position_for_non_uuid_item_ids() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let _items = server
        .mock("GET", "/playlists/pl-1/relationships/items")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": [{ "type": "tracks", "id": "existing", "meta": { "itemId": "legacy-7" } }],
                "links": {}
            })
            .to_string(),
        )
        .create();
    let add = server
        .mock("POST", "/playlists/pl-1/relationships/items")
        .match_body(Matcher::Json(json!({
            "data": [{ "id": "t-9", "type": "tracks" }]
        })))
        .with_status(201)
        .with_body("{}")
        .create();

    run(client.add_tracks("pl-1", &["t-9".into()])).unwrap();
    add.assert();
}

#[test]
fn remove_tracks_deletes_relationship_entries_by_item_id() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let _items = server
        .mock("GET", "/playlists/pl-1/relationships/items")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": [
                    { "type": "tracks", "id": "t-1", "meta": { "itemId": "item-1" } },
                    { "type": "tracks", "id": "t-2", "meta": { "itemId": "item-2" } }
                ],
                "links": {}
            })
            .to_string(),
        )
        .create();
    let remove = server
        .mock("DELETE", "/playlists/pl-1/relationships/items")
        .match_body(Matcher::Json(json!({
            "data": [{ "id": "t-1", "type": "tracks", "meta": { "itemId": "item-1" } }]
        })))
        .with_status(200)
        .with_body("{}")
        .create();

    run(client.remove_tracks("pl-1", &["t-1".into()])).unwrap();
    remove.assert();
}

#[test]
fn mutations_with_empty_input_issue_no_requests() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let items = server
        .mock("GET", "/playlists/pl-1/relationships/items")
        .expect(0)
        .create();
    run(client.add_tracks("pl-1", &[])).unwrap();
    run(client.remove_tracks("pl-1", &[])).unwrap();
    items.assert();
}

#[test]
fn search_tracks_fast_mode_skips_hydration_requests() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let _search = server
        .mock("GET", "/searchResults/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": { "type": "searchResults", "id": "query" },
                "included": [{
                    "type": "tracks",
                    "id": "t-1",
                    "attributes": { "title": "Sparse Result" }
                }],
                "links": {}
            })
            .to_string(),
        )
        .create();
    let bulk = server
        .mock("GET", "/tracks")
        .match_query(Matcher::Any)
        .expect(0)
        .create();
    let relationships = server
        .mock("GET", "/searchResults/query/relationships/tracks")
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let tracks = run(client.search_tracks("query", 5, false)).unwrap();
    bulk.assert();
    relationships.assert();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].title, "Sparse Result");
    // The opt-out trades completeness for latency.
    assert_eq!(tracks[0].artist, None);
}

#[test]
fn search_tracks_bulk_hydrates_sparse_results() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let _search = server
        .mock("GET", "/searchResults/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": { "type": "searchResults", "id": "query" },
                "included": [{
                    "type": "tracks",
                    "id": "t-1",
                    "attributes": { "title": "Sparse Result" }
                }],
                "links": {}
            })
            .to_string(),
        )
        .create();
    let bulk = server
        .mock("GET", "/tracks")
        .match_query(Matcher::UrlEncoded("filter[id]".into(), "t-1".into()))
        .with_status(200)
        .with_body(
            json!({
                "data": [{
                    "type": "tracks",
                    "id": "t-1",
                    "attributes": { "title": "Sparse Result" },
                    "relationships": { "artists": { "data": [{ "type": "artists", "id": "a-1" }] } }
                }],
                "included": [
                    { "type": "artists", "id": "a-1", "attributes": { "name": "Bulk Artist" } }
                ]
            })
            .to_string(),
        )
        .create();
    let _relationships = server
        .mock("GET", "/searchResults/query/relationships/tracks")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({ "data": [] }).to_string())
        .create();

    let tracks = run(client.search_tracks("query", 5, true)).unwrap();
    bulk.assert();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].artist.as_deref(), Some("Bulk Artist"));
}

#[test]
fn related_tracks_applies_offset_after_normalization() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("token", server.url());

    let _similar = server
        .mock("GET", "/tracks/seed/relationships/similarTracks")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": [
                    { "type": "tracks", "id": "r-1" },
                    { "type": "tracks", "id": "r-2" },
                    { "type": "tracks", "id": "r-3" }
                ],
                "included": [],
                "links": {}
            })
            .to_string(),
        )
        .create();
    let _bulk = server
        .mock("GET", "/tracks")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "data": [
                    { "type": "tracks", "id": "r-1", "attributes": { "title": "One" } },
                    { "type": "tracks", "id": "r-2", "attributes": { "title": "Two" } },
                    { "type": "tracks", "id": "r-3", "attributes": { "title": "Three" } }
                ],
                "included": []
            })
            .to_string(),
        )
        .create();

    let tracks = run(client.related_tracks("seed", 2, 1)).unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].provider_track_id, "r-2");
    assert_eq!(tracks[1].provider_track_id, "r-3");

    assert!(run(client.related_tracks("   ", 5, 0)).unwrap().is_empty());
}

#[test]
fn user_directory_is_absent() {
    let client = TidalClient::with_base_url("token", "http://unused.invalid");
    assert!(run(client.search_users("name", 10)).unwrap().is_empty());
    let err = run(client.get_user("u-1")).unwrap_err();
    assert_eq!(err.status(), Some(501));
}

#[test]
fn empty_search_queries_issue_no_requests() {
    // The base URL is unreachable, so any network attempt would error.
    let client = TidalClient::with_base_url("token", "http://unused.invalid");
    assert!(run(client.search_tracks("", 5, true)).unwrap().is_empty());
    assert!(run(client.search_playlists("   ", 5)).unwrap().is_empty());
}

#[test]
fn unauthorized_responses_surface_as_auth_errors() {
    let mut server = Server::new();
    let client = TidalClient::with_base_url("expired", server.url());

    let _me = server
        .mock("GET", "/users/me")
        .with_status(401)
        .with_body(json!({ "errors": [{ "title": "Unauthorized" }] }).to_string())
        .create();

    let err = run(client.list_playlists()).unwrap_err();
    assert!(err.is_auth());
}

#[test]
fn missing_access_token_fails_before_any_request() {
    let client = TidalClient::with_base_url("   ", "http://unused.invalid");
    let err = run(client.list_playlists()).unwrap_err();
    assert!(err.is_auth());
}

#[test]
fn shuffle_is_reported_unsupported() {
    let client = TidalClient::with_base_url("token", "http://unused.invalid");
    let result = run(client.shuffle_playlist("pl-1", 500)).unwrap();
    assert_eq!(
        result.status,
        votuna_providers::models::ShuffleStatus::Unsupported
    );
    assert!(result.error.is_some());
}
