use reqwest::Client;
use serde::Deserialize;
use std::cmp::Reverse;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

/// Streams taller than this are avoided for background previews.
const MAX_PREVIEW_HEIGHT: u32 = 720;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("extractor returned {0}")]
    Status(reqwest::StatusCode),
}

/// Playable media URLs for a trailer preview.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub video_url: String,
    pub audio_url: Option<String>,
    pub is_video_only: bool,
}

/// Extract a playable video id from a trailer reference URL.
///
/// Recognizes the youtube.com host family (`watch?v=`, `/embed/`, `/shorts/`)
/// and the youtu.be short form. Anything else yields `None` and the caller
/// moves on to the next reference.
pub fn parse_video_id(reference: &str) -> Option<String> {
    let url = Url::parse(reference).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let candidate = match host {
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("embed") | Some("shorts") => segments.next().map(str::to_string),
                _ => None,
            }
        }
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        _ => None,
    }?;

    if !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Some(candidate)
    } else {
        None
    }
}

fn video_codec_priority(codec: Option<&str>) -> u8 {
    let Some(codec) = codec else {
        return 4;
    };
    let codec = codec.to_ascii_lowercase();
    if codec.starts_with("avc1") || codec.starts_with("h264") {
        0
    } else if codec.starts_with("vp9") || codec.starts_with("vp09") {
        1
    } else if codec.starts_with("av01") || codec.starts_with("av1") {
        2
    } else {
        3
    }
}

fn audio_codec_priority(codec: Option<&str>) -> u8 {
    match codec {
        Some(c) if c.to_ascii_lowercase().starts_with("mp4a") => 0,
        Some(c) if c.to_ascii_lowercase().starts_with("aac") => 0,
        _ => 1,
    }
}

/// One progressive-download stream offered by the extractor backend.
#[derive(Debug, Clone)]
pub struct StreamCandidate {
    pub url: String,
    pub codec: Option<String>,
    pub height: Option<u32>,
    pub bitrate: u64,
}

/// Best video-only candidate: prefer candidates within the height cap, lowest
/// codec priority first, then the tallest; with nothing under the cap, lowest
/// priority then the *shortest* overall. Ties break on bitrate then URL so the
/// pick is independent of input order.
pub fn pick_best_video(candidates: &[StreamCandidate]) -> Option<&StreamCandidate> {
    let capped = candidates
        .iter()
        .filter(|c| c.height.is_some_and(|h| h <= MAX_PREVIEW_HEIGHT))
        .min_by_key(|c| {
            (
                video_codec_priority(c.codec.as_deref()),
                Reverse(c.height.unwrap_or(0)),
                Reverse(c.bitrate),
                c.url.as_str(),
            )
        });

    capped.or_else(|| {
        candidates.iter().min_by_key(|c| {
            (
                video_codec_priority(c.codec.as_deref()),
                c.height.unwrap_or(u32::MAX),
                Reverse(c.bitrate),
                c.url.as_str(),
            )
        })
    })
}

/// Best audio candidate: AAC-family first, then highest bitrate.
pub fn pick_best_audio(candidates: &[StreamCandidate]) -> Option<&StreamCandidate> {
    candidates.iter().min_by_key(|c| {
        (
            audio_codec_priority(c.codec.as_deref()),
            Reverse(c.bitrate),
            c.url.as_str(),
        )
    })
}

#[derive(Debug, Deserialize)]
struct WireFormat {
    #[serde(default)]
    url: Option<String>,
    /// Mime plus codecs, e.g. `video/mp4; codecs="avc1.4d401f"`.
    #[serde(rename = "type", default)]
    mime: Option<String>,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    bitrate: Option<String>,
}

impl WireFormat {
    fn codec(&self) -> Option<String> {
        let mime = self.mime.as_deref()?;
        let start = mime.find("codecs=\"")? + "codecs=\"".len();
        let rest = &mime[start..];
        let end = rest.find('"')?;
        // A muxed entry lists video codec first.
        Some(rest[..end].split(',').next()?.trim().to_string())
    }

    fn height(&self) -> Option<u32> {
        let resolution = self.resolution.as_deref()?;
        resolution.trim_end_matches('p').parse().ok()
    }

    fn is_video(&self) -> bool {
        self.mime.as_deref().is_some_and(|m| m.starts_with("video/"))
    }

    fn is_audio(&self) -> bool {
        self.mime.as_deref().is_some_and(|m| m.starts_with("audio/"))
    }

    /// Plain progressive downloads only; manifest-style entries cannot be
    /// handed to the playback component as a single URL.
    fn is_progressive(&self) -> bool {
        self.mime
            .as_deref()
            .is_none_or(|m| !m.starts_with("application/"))
    }

    fn into_candidate(self) -> Option<StreamCandidate> {
        let codec = self.codec();
        let height = self.height();
        let bitrate = self
            .bitrate
            .as_deref()
            .and_then(|b| b.parse().ok())
            .unwrap_or(0);
        Some(StreamCandidate {
            url: self.url?,
            codec,
            height,
            bitrate,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireVideo {
    #[serde(rename = "adaptiveFormats", default)]
    adaptive_formats: Vec<WireFormat>,
    #[serde(rename = "formatStreams", default)]
    format_streams: Vec<WireFormat>,
}

/// Resolves a video id into playable stream URLs through an Invidious-style
/// extractor API. The HTTP backend is built once, lazily, shared by all
/// concurrent callers.
#[derive(Debug)]
pub struct StreamResolver {
    base_url: String,
    backend: OnceCell<Client>,
}

impl StreamResolver {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            backend: OnceCell::new(),
        }
    }

    async fn backend(&self) -> &Client {
        self.backend
            .get_or_init(|| async {
                debug!("initializing stream extractor backend");
                Client::builder()
                    .connect_timeout(Duration::from_secs(5))
                    .timeout(Duration::from_secs(10))
                    .build()
                    .unwrap_or_else(|_| Client::new())
            })
            .await
    }

    /// Resolve the preferred streams for a video. Any failure is logged and
    /// reported as `None`; trailer previews are best-effort.
    pub async fn resolve_stream(&self, video_id: &str) -> Option<StreamInfo> {
        match self.try_resolve(video_id).await {
            Ok(info) => info,
            Err(e) => {
                warn!(video_id, error = %e, "stream resolution failed");
                None
            }
        }
    }

    async fn try_resolve(&self, video_id: &str) -> Result<Option<StreamInfo>, StreamError> {
        let url = format!(
            "{}/api/v1/videos/{}",
            self.base_url,
            urlencoding::encode(video_id)
        );

        debug!(video_id, "resolving streams");

        let response = self.backend().await.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }
        let wire: WireVideo = response.json().await?;

        Ok(select_streams(wire))
    }
}

fn select_streams(wire: WireVideo) -> Option<StreamInfo> {
    let mut video_only = Vec::new();
    let mut audio_only = Vec::new();
    for format in wire.adaptive_formats {
        if !format.is_progressive() {
            continue;
        }
        if format.is_video() {
            video_only.extend(format.into_candidate());
        } else if format.is_audio() {
            audio_only.extend(format.into_candidate());
        }
    }

    if let Some(video) = pick_best_video(&video_only) {
        let audio = pick_best_audio(&audio_only);
        return Some(StreamInfo {
            video_url: video.url.clone(),
            audio_url: audio.map(|a| a.url.clone()),
            is_video_only: true,
        });
    }

    let muxed: Vec<StreamCandidate> = wire
        .format_streams
        .into_iter()
        .filter(|f| f.is_progressive())
        .filter_map(WireFormat::into_candidate)
        .collect();

    pick_best_video(&muxed).map(|best| StreamInfo {
        video_url: best.url.clone(),
        audio_url: None,
        is_video_only: false,
    })
}
