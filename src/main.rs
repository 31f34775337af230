use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mediabar::config::{Config, ConfigError};
use mediabar::controller::SlideshowController;
use mediabar::fetcher::{ContentFetcher, ParentalFilter};
use mediabar::library::{ItemKind, LibraryClient, SlideItem};
use mediabar::sponsorblock::SegmentSkipClient;
use mediabar::stream::StreamResolver;
use mediabar::trailer::TrailerResolver;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            if let ConfigError::NotFound(path) = &e {
                eprintln!("\nCreate a config file at: {}", path.display());
                eprintln!("\nExample config.toml:");
                eprintln!(
                    r#"
[[servers]]
url = "http://localhost:8096"
api_key = "your-api-key"
user_id = "your-user-id"

[slideshow]
rotation_interval_ms = 8000
max_items = 10
"#
                );
            }
            std::process::exit(1);
        }
    };

    let clients: Vec<LibraryClient> = config.servers.iter().map(LibraryClient::new).collect();

    let blocked = config.filters.blocked_ratings.clone();
    let parental_filter: Option<ParentalFilter> = if blocked.is_empty() {
        None
    } else {
        Some(Arc::new(move |item: &SlideItem| {
            item.rating
                .as_deref()
                .is_some_and(|rating| blocked.iter().any(|b| b.eq_ignore_ascii_case(rating)))
        }))
    };

    let fetcher = Arc::new(ContentFetcher::new(clients, parental_filter));
    let resolver = TrailerResolver::new(
        SegmentSkipClient::new(&config.sponsorblock.base_url),
        StreamResolver::new(&config.extractor.base_url),
        config.sponsorblock.categories.clone(),
    );

    let mut controller = SlideshowController::new(
        config.slideshow.clone(),
        ItemKind::Movie,
        fetcher,
        resolver,
    );
    let handle = controller.handle();
    let mut snapshots = controller.subscribe();

    controller.load_initial_content().await;

    let runner = tokio::spawn(controller.run());

    let watcher = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow().clone();
            let title = snapshot
                .items
                .get(snapshot.playback.current_index)
                .map(|item| item.title.clone())
                .unwrap_or_default();
            info!(
                index = snapshot.playback.current_index,
                %title,
                trailer = snapshot.trailer_state.label(),
                "slideshow state"
            );
        }
    });

    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
    drop(handle);
    let _ = runner.await;
    watcher.abort();
}
