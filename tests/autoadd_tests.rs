use votuna_providers::autoadd::{maybe_auto_add, threshold_met, AutoAddPolicy};
use votuna_providers::models::MusicProvider;
use votuna_providers::providers::mock::MockClient;

fn run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Runtime::new().unwrap().block_on(fut)
}

#[test]
fn threshold_percentages() {
    assert!(threshold_met(3, 5, 60));
    assert!(!threshold_met(2, 5, 60));
    assert!(threshold_met(2, 3, 66));
    assert!(!threshold_met(0, 4, 1));
    // No members can never clear a threshold.
    assert!(!threshold_met(10, 0, 0));
}

#[test]
fn auto_add_pushes_track_when_policy_met() {
    let client = MockClient::new(MusicProvider::Spotify);
    let policy = AutoAddPolicy {
        enabled: true,
        required_vote_percent: 60,
    };
    let pushed = run(maybe_auto_add(&client, &policy, "pl-1", "track-9", 3, 5)).unwrap();
    assert!(pushed);
    let added = run(async { client.added.lock().await.clone() });
    assert_eq!(added, vec![("pl-1".to_string(), vec!["track-9".to_string()])]);
}

#[test]
fn auto_add_skips_when_disabled_or_below_threshold() {
    let client = MockClient::new(MusicProvider::Tidal);
    let disabled = AutoAddPolicy {
        enabled: false,
        required_vote_percent: 0,
    };
    assert!(!run(maybe_auto_add(&client, &disabled, "pl-1", "t", 5, 5)).unwrap());

    let strict = AutoAddPolicy {
        enabled: true,
        required_vote_percent: 80,
    };
    assert!(!run(maybe_auto_add(&client, &strict, "pl-1", "t", 3, 5)).unwrap());
    assert!(run(async { client.added.lock().await.is_empty() }));
}

#[test]
fn auto_add_propagates_provider_errors() {
    let client = MockClient::failing(MusicProvider::Soundcloud, 429);
    let policy = AutoAddPolicy {
        enabled: true,
        required_vote_percent: 50,
    };
    let err = run(maybe_auto_add(&client, &policy, "pl-1", "t", 2, 2)).unwrap_err();
    assert_eq!(err.status(), Some(429));
}
