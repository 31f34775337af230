use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Two leading segments closer than this are treated as one continuous skip.
const MERGE_TOLERANCE_SECONDS: f64 = 2.0;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SkipSegmentError {
    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("service returned {0}")]
    Status(StatusCode),
}

/// A time range in a trailer's source video recommended for skipping.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub category: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    segment: [f64; 2],
    category: String,
    #[serde(rename = "actionType", default)]
    action_type: Option<String>,
}

impl From<WireSegment> for Segment {
    fn from(wire: WireSegment) -> Self {
        Segment {
            start_seconds: wire.segment[0],
            end_seconds: wire.segment[1],
            category: wire.category,
            action: wire.action_type.unwrap_or_else(|| "skip".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentSkipClient {
    client: Client,
    base_url: String,
}

impl SegmentSkipClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch skip segments for a video. 404 means no segments are known; any
    /// other failure is logged and reported as an empty list. Never errors to
    /// the caller.
    pub async fn fetch_skip_segments(&self, video_id: &str, categories: &[String]) -> Vec<Segment> {
        match self.try_fetch(video_id, categories).await {
            Ok(segments) => segments,
            Err(e) => {
                warn!(video_id, error = %e, "skip segment lookup failed, continuing without");
                Vec::new()
            }
        }
    }

    async fn try_fetch(
        &self,
        video_id: &str,
        categories: &[String],
    ) -> Result<Vec<Segment>, SkipSegmentError> {
        let categories_json = serde_json::to_string(categories).unwrap_or_else(|_| "[]".into());
        let url = format!(
            "{}/api/skipSegments?videoID={}&categories={}",
            self.base_url,
            urlencoding::encode(video_id),
            urlencoding::encode(&categories_json)
        );

        debug!(video_id, "fetching skip segments");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let wire: Vec<WireSegment> = response.json().await?;
                Ok(wire.into_iter().map(Segment::from).collect())
            }
            status => Err(SkipSegmentError::Status(status)),
        }
    }
}

/// First moment of the video not covered by a leading run of near-contiguous
/// skip segments. A gap before the first segment means playback starts at 0.
pub fn calculate_start_time(segments: &[Segment]) -> f64 {
    let mut sorted: Vec<&Segment> = segments.iter().collect();
    sorted.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

    let mut cursor = 0.0_f64;
    for segment in sorted {
        if segment.start_seconds <= cursor + MERGE_TOLERANCE_SECONDS {
            cursor = cursor.max(segment.end_seconds);
        } else {
            break;
        }
    }
    cursor
}
