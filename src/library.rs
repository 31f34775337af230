use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ServerConfig;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
}

impl LibraryError {
    /// True for remote 5xx responses and timeouts, which are worth a softer
    /// "temporarily unavailable" surface than a hard failure.
    pub fn is_transient(&self) -> bool {
        match self {
            LibraryError::RequestError(e) => {
                e.is_timeout() || e.status().is_some_and(|s| s.is_server_error())
            }
            LibraryError::Status(status) => status.is_server_error(),
        }
    }
}

/// The kind of title the media bar rotates through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Movie,
    Show,
}

impl ItemKind {
    /// Library collection type this kind lives in.
    pub fn collection_type(self) -> &'static str {
        match self {
            ItemKind::Movie => "movies",
            ItemKind::Show => "tvshows",
        }
    }

    /// Item type filter for library queries.
    pub fn include_item_type(self) -> &'static str {
        match self {
            ItemKind::Movie => "Movie",
            ItemKind::Show => "Series",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Library {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CollectionType", default)]
    pub collection_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTrailer {
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderIds {
    #[serde(rename = "Tmdb", default)]
    pub tmdb: Option<String>,
    #[serde(rename = "Imdb", default)]
    pub imdb: Option<String>,
}

/// Raw library item as the server reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub item_type: Option<String>,
    #[serde(rename = "Overview", default)]
    pub overview: Option<String>,
    #[serde(rename = "OfficialRating", default)]
    pub official_rating: Option<String>,
    #[serde(rename = "ProductionYear", default)]
    pub production_year: Option<u16>,
    #[serde(rename = "Genres", default)]
    pub genres: Vec<String>,
    #[serde(rename = "RunTimeTicks", default)]
    pub run_time_ticks: Option<i64>, // 100-nanosecond units
    #[serde(rename = "CriticRating", default)]
    pub critic_rating: Option<f64>,
    #[serde(rename = "CommunityRating", default)]
    pub community_rating: Option<f64>,
    #[serde(rename = "ProviderIds", default)]
    pub provider_ids: ProviderIds,
    #[serde(rename = "BackdropImageTags", default)]
    pub backdrop_image_tags: Vec<String>,
    #[serde(rename = "ImageTags", default)]
    pub image_tags: HashMap<String, String>,
    #[serde(rename = "RemoteTrailers", default)]
    pub remote_trailers: Vec<RemoteTrailer>,
}

impl MediaItem {
    pub fn runtime_minutes(&self) -> Option<u32> {
        // 600_000_000 ticks per minute
        self.run_time_ticks
            .filter(|t| *t > 0)
            .map(|t| (t / 600_000_000) as u32)
    }

    pub fn has_backdrop(&self) -> bool {
        !self.backdrop_image_tags.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(rename = "Items", default)]
    items: Vec<MediaItem>,
}

#[derive(Debug, Deserialize)]
struct ViewsResponse {
    #[serde(rename = "Items", default)]
    items: Vec<Library>,
}

/// One slide of the media bar, ready for the rendering layer. Immutable value.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideItem {
    pub id: String,
    pub server_id: Option<String>,
    pub title: String,
    pub overview: Option<String>,
    pub backdrop_url: Option<String>,
    pub logo_url: Option<String>,
    pub rating: Option<String>,
    pub year: Option<u16>,
    pub genres: Vec<String>,
    pub runtime_minutes: Option<u32>,
    pub critic_score: Option<f64>,
    pub community_score: Option<f64>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub kind: ItemKind,
}

/// Build an image URL for an item. Pure string assembly, no I/O.
pub fn build_image_url(
    base_url: &str,
    item_id: &str,
    image_type: &str,
    tag: &str,
    max_dimension: u32,
) -> String {
    format!(
        "{}/Items/{}/Images/{}?tag={}&maxWidth={}&quality=90",
        base_url.trim_end_matches('/'),
        item_id,
        image_type,
        urlencoding::encode(tag),
        max_dimension
    )
}

#[derive(Debug, Clone)]
pub struct LibraryClient {
    client: Client,
    base_url: String,
    api_key: String,
    user_id: String,
    server_id: String,
}

impl LibraryClient {
    pub fn new(server: &ServerConfig) -> Self {
        Self::with_base_url(server, &server.url)
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(server: &ServerConfig, base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: server.api_key.clone(),
            user_id: server.user_id.clone(),
            server_id: server.id().to_string(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
    ) -> Result<T, LibraryError> {
        let response = self
            .client
            .get(&url)
            .header("X-Emby-Token", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LibraryError::Status(status));
        }

        Ok(response.json().await?)
    }

    /// All libraries visible to the configured user.
    pub async fn list_libraries(&self) -> Result<Vec<Library>, LibraryError> {
        let url = format!("{}/Users/{}/Views", self.base_url, self.user_id);

        debug!(server = %self.server_id, "listing libraries");

        let response: ViewsResponse = self.get_json(url).await?;
        Ok(response.items)
    }

    /// Random sample of items of one kind from a single library.
    pub async fn query_items(
        &self,
        library_id: &str,
        kind: ItemKind,
        limit: usize,
    ) -> Result<Vec<MediaItem>, LibraryError> {
        let url = format!(
            "{}/Users/{}/Items?ParentId={}&IncludeItemTypes={}&Recursive=true&SortBy=Random&Limit={}&Fields=Overview,Genres,ProviderIds,CriticRating,OfficialRating",
            self.base_url,
            self.user_id,
            urlencoding::encode(library_id),
            kind.include_item_type(),
            limit
        );

        debug!(server = %self.server_id, library_id, limit, "querying items");

        let response: ItemsResponse = self.get_json(url).await?;
        Ok(response.items)
    }

    /// Full detail for one item, including remote trailer references.
    pub async fn get_item(&self, item_id: &str) -> Result<MediaItem, LibraryError> {
        let url = format!(
            "{}/Users/{}/Items/{}",
            self.base_url,
            self.user_id,
            urlencoding::encode(item_id)
        );

        debug!(server = %self.server_id, item_id, "fetching item detail");

        self.get_json(url).await
    }

    /// Convert a raw item into a slide, building image URLs against this
    /// client's server.
    pub fn to_slide(&self, item: MediaItem, kind: ItemKind) -> SlideItem {
        let backdrop_url = item.backdrop_image_tags.first().map(|tag| {
            build_image_url(&self.base_url, &item.id, "Backdrop", tag, 1920)
        });
        let logo_url = item
            .image_tags
            .get("Logo")
            .map(|tag| build_image_url(&self.base_url, &item.id, "Logo", tag, 800));

        SlideItem {
            runtime_minutes: item.runtime_minutes(),
            id: item.id,
            server_id: Some(self.server_id.clone()),
            title: item.name,
            overview: item.overview,
            backdrop_url,
            logo_url,
            rating: item.official_rating,
            year: item.production_year,
            genres: item.genres,
            critic_score: item.critic_rating,
            community_score: item.community_rating,
            tmdb_id: item.provider_ids.tmdb,
            imdb_id: item.provider_ids.imdb,
            kind,
        }
    }
}
