use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mediabar::config::{ServerConfig, SlideshowConfig};
use mediabar::controller::{LoadState, SlideshowController, TrailerPreviewState};
use mediabar::fetcher::ContentFetcher;
use mediabar::library::{ItemKind, LibraryClient};
use mediabar::sponsorblock::SegmentSkipClient;
use mediabar::stream::StreamResolver;
use mediabar::trailer::TrailerResolver;

fn server_config(url: &str) -> ServerConfig {
    ServerConfig {
        name: Some("main".to_string()),
        url: url.to_string(),
        api_key: "test-key".to_string(),
        user_id: "user1".to_string(),
    }
}

async fn mount_library(library: &MockServer, item_count: usize) {
    Mock::given(method("GET"))
        .and(path("/Users/user1/Views"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"Items": [{"Id": "lib1", "Name": "Movies", "CollectionType": "movies"}]}"#,
        ))
        .mount(library)
        .await;

    let items: Vec<String> = (0..item_count)
        .map(|i| {
            format!(
                r#"{{"Id": "film-{i}", "Name": "Film {i}", "BackdropImageTags": ["t{i}"]}}"#
            )
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/Users/user1/Items"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(r#"{{"Items": [{}]}}"#, items.join(","))),
        )
        .mount(library)
        .await;

    // Item detail for trailer resolution, any film.
    Mock::given(method("GET"))
        .and(path_regex(r"^/Users/user1/Items/film-\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{
                "Id": "film-0",
                "Name": "Film 0",
                "RemoteTrailers": [{"Url": "https://youtu.be/dQw4w9WgXcQ"}]
            }"#,
        ))
        .mount(library)
        .await;
}

async fn controller_for(
    library: &MockServer,
    sponsorblock: &MockServer,
    extractor: &MockServer,
) -> SlideshowController {
    let clients = vec![LibraryClient::new(&server_config(&library.uri()))];
    let fetcher = Arc::new(ContentFetcher::new(clients, None));
    let resolver = TrailerResolver::new(
        SegmentSkipClient::new(&sponsorblock.uri()),
        StreamResolver::new(&extractor.uri()),
        vec!["sponsor".to_string()],
    );
    SlideshowController::new(SlideshowConfig::default(), ItemKind::Movie, fetcher, resolver)
}

#[tokio::test]
async fn test_load_populates_items_and_starts_resolution() {
    let library = MockServer::start().await;
    let sponsorblock = MockServer::start().await;
    let extractor = MockServer::start().await;

    mount_library(&library, 6).await;

    Mock::given(method("GET"))
        .and(path("/api/skipSegments"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&sponsorblock)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/videos/dQw4w9WgXcQ"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{
                "adaptiveFormats": [
                    {"url": "http://cdn/v", "type": "video/mp4; codecs=\"avc1.4d401f\"", "resolution": "720p", "bitrate": "1200000"},
                    {"url": "http://cdn/a", "type": "audio/mp4; codecs=\"mp4a.40.2\"", "bitrate": "128000"}
                ],
                "formatStreams": []
            }"#,
        ))
        .mount(&extractor)
        .await;

    let mut controller = controller_for(&library, &sponsorblock, &extractor).await;
    controller.load_initial_content().await;

    assert_eq!(*controller.load_state(), LoadState::Ready);
    assert_eq!(controller.items().len(), 6);
    assert_eq!(controller.playback().current_index, 0);
    assert_eq!(
        *controller.trailer_state(),
        TrailerPreviewState::WaitingToResolve
    );

    // Give the spawned resolve task time to come back, then drain events.
    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.process_pending_events();

    assert!(matches!(
        controller.trailer_state(),
        TrailerPreviewState::Buffering(_)
    ));
}

#[tokio::test]
async fn test_empty_load_is_hard_failure() {
    let library = MockServer::start().await;
    let sponsorblock = MockServer::start().await;
    let extractor = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Users/user1/Views"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Items": []}"#))
        .mount(&library)
        .await;

    let mut controller = controller_for(&library, &sponsorblock, &extractor).await;
    controller.load_initial_content().await;

    match controller.load_state() {
        LoadState::Failed { transient, .. } => assert!(!transient),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(controller.items().is_empty());
}

#[tokio::test]
async fn test_all_5xx_load_is_transient_failure() {
    let library = MockServer::start().await;
    let sponsorblock = MockServer::start().await;
    let extractor = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&library)
        .await;

    let mut controller = controller_for(&library, &sponsorblock, &extractor).await;
    controller.load_initial_content().await;

    match controller.load_state() {
        LoadState::Failed { transient, .. } => assert!(transient),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unresolvable_trailer_is_cached_negative() {
    let library = MockServer::start().await;
    let sponsorblock = MockServer::start().await;
    let extractor = MockServer::start().await;

    // Item detail carries no usable trailer reference.
    mount_library_without_trailers(&library).await;

    let mut controller = controller_for(&library, &sponsorblock, &extractor).await;
    controller.load_initial_content().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.process_pending_events();
    assert_eq!(*controller.trailer_state(), TrailerPreviewState::Unavailable);

    let detail_hits = library
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().starts_with("/Users/user1/Items/film-"))
        .count();

    // Re-triggering resolution hits the negative cache, not the network.
    controller.start_trailer_resolution(0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.process_pending_events();
    assert_eq!(*controller.trailer_state(), TrailerPreviewState::Unavailable);

    let detail_hits_after = library
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().starts_with("/Users/user1/Items/film-"))
        .count();
    assert_eq!(detail_hits, detail_hits_after);
}

async fn mount_library_without_trailers(library: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/Users/user1/Views"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"Items": [{"Id": "lib1", "Name": "Movies", "CollectionType": "movies"}]}"#,
        ))
        .mount(library)
        .await;

    Mock::given(method("GET"))
        .and(path("/Users/user1/Items"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"Items": [{"Id": "film-0", "Name": "Film 0", "BackdropImageTags": ["t"]}]}"#,
        ))
        .mount(library)
        .await;

    Mock::given(method("GET"))
        .and(path("/Users/user1/Items/film-0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"Id": "film-0", "Name": "Film 0", "RemoteTrailers": []}"#,
        ))
        .mount(library)
        .await;
}
