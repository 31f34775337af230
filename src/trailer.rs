use std::sync::Arc;
use tracing::{debug, warn};

use crate::library::LibraryClient;
use crate::sponsorblock::{SegmentSkipClient, Segment, calculate_start_time};
use crate::stream::{StreamInfo, StreamResolver, parse_video_id};

/// Everything the playback component needs to start a trailer preview.
/// Immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailerPreviewInfo {
    pub video_id: String,
    pub start_offset_seconds: f64,
    pub skip_segments: Vec<Segment>,
    pub stream_info: StreamInfo,
}

/// Resolves a library item into a playable trailer preview. Stateless;
/// memoization is owned by the slideshow controller.
#[derive(Clone)]
pub struct TrailerResolver {
    skip_client: Arc<SegmentSkipClient>,
    stream_resolver: Arc<StreamResolver>,
    skip_categories: Arc<Vec<String>>,
}

impl TrailerResolver {
    pub fn new(
        skip_client: SegmentSkipClient,
        stream_resolver: StreamResolver,
        skip_categories: Vec<String>,
    ) -> Self {
        Self {
            skip_client: Arc::new(skip_client),
            stream_resolver: Arc::new(stream_resolver),
            skip_categories: Arc::new(skip_categories),
        }
    }

    /// Resolve the trailer preview for an item, or `None` when the item has
    /// no usable trailer. Every failure degrades to `None`; trailer previews
    /// are an enhancement, never a dependency for showing the slide.
    pub async fn resolve(&self, library: &LibraryClient, item_id: &str) -> Option<TrailerPreviewInfo> {
        let item = match library.get_item(item_id).await {
            Ok(item) => item,
            Err(e) => {
                warn!(item_id, error = %e, "item lookup for trailer failed");
                return None;
            }
        };

        // First recognized reference wins; unparseable ones are skipped.
        let video_id = item
            .remote_trailers
            .iter()
            .find_map(|trailer| parse_video_id(&trailer.url))?;

        debug!(item_id, video_id, "resolving trailer preview");

        let (skip_segments, stream_info) = tokio::join!(
            self.skip_client
                .fetch_skip_segments(&video_id, &self.skip_categories),
            self.stream_resolver.resolve_stream(&video_id),
        );

        let stream_info = stream_info?;
        let start_offset_seconds = calculate_start_time(&skip_segments);

        Some(TrailerPreviewInfo {
            video_id,
            start_offset_seconds,
            skip_segments,
            stream_info,
        })
    }
}
