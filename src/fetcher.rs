use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::library::{ItemKind, Library, LibraryClient, LibraryError, SlideItem};

/// A server that has not answered within this window contributes nothing.
const PER_SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Overshoot factor applied before backdrop/parental filtering trims the pool.
const OVERSHOOT: f64 = 1.5;
const MIN_PER_LIBRARY: usize = 5;

/// Decides whether an item must be hidden from the media bar.
pub type ParentalFilter = Arc<dyn Fn(&SlideItem) -> bool + Send + Sync>;

/// Aggregate result of a candidate fetch across all configured servers.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<SlideItem>,
    /// Servers that failed with a 5xx or timed out.
    pub transient_failures: usize,
    /// Servers that failed outright (unreachable, auth, 4xx).
    pub hard_failures: usize,
}

impl FetchOutcome {
    /// Backdrop URLs worth warming in the image cache before they are shown.
    pub fn preload_urls(&self, count: usize) -> Vec<String> {
        self.items
            .iter()
            .take(count)
            .filter_map(|item| item.backdrop_url.clone())
            .collect()
    }
}

/// Queries every configured server in parallel for media-bar candidates.
///
/// Library enumerations are memoized per (server, user); per-server failures
/// and timeouts degrade to empty contributions and never fail the aggregate.
pub struct ContentFetcher {
    clients: Vec<LibraryClient>,
    library_cache: Mutex<HashMap<(String, String), Vec<Library>>>,
    parental_filter: Option<ParentalFilter>,
    server_timeout: Duration,
}

impl ContentFetcher {
    pub fn new(clients: Vec<LibraryClient>, parental_filter: Option<ParentalFilter>) -> Self {
        Self {
            clients,
            library_cache: Mutex::new(HashMap::new()),
            parental_filter,
            server_timeout: PER_SERVER_TIMEOUT,
        }
    }

    /// Override the per-server timeout (for testing).
    pub fn with_server_timeout(mut self, server_timeout: Duration) -> Self {
        self.server_timeout = server_timeout;
        self
    }

    pub fn clients(&self) -> &[LibraryClient] {
        &self.clients
    }

    pub fn client_for(&self, server_id: &str) -> Option<&LibraryClient> {
        self.clients.iter().find(|c| c.server_id() == server_id)
    }

    /// Drop memoized library lists, forcing re-enumeration on the next fetch.
    pub fn clear_library_cache(&self) {
        self.library_cache
            .lock()
            .expect("library cache lock poisoned")
            .clear();
    }

    /// Fetch up to `count_hint` candidate slides of the given kind from all
    /// servers in parallel, each bounded by the per-server timeout.
    pub async fn fetch_candidates(&self, kind: ItemKind, count_hint: usize) -> FetchOutcome {
        let fetches = self.clients.iter().map(|client| async move {
            match timeout(self.server_timeout, self.fetch_from_server(client, kind, count_hint))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(server = %client.server_id(), "server fetch timed out");
                    Err(FetchFailure::Transient)
                }
            }
        });

        let mut outcome = FetchOutcome::default();
        let mut pool: Vec<SlideItem> = Vec::new();

        for result in futures::future::join_all(fetches).await {
            match result {
                Ok(items) => pool.extend(items),
                Err(FetchFailure::Transient) => outcome.transient_failures += 1,
                Err(FetchFailure::Hard) => outcome.hard_failures += 1,
            }
        }

        pool.retain(|item| item.backdrop_url.is_some());
        if let Some(filter) = &self.parental_filter {
            pool.retain(|item| !filter(item));
        }
        dedupe(&mut pool);
        pool.shuffle(&mut rand::rng());
        pool.truncate(count_hint);

        debug!(
            count = pool.len(),
            transient = outcome.transient_failures,
            hard = outcome.hard_failures,
            "candidate fetch complete"
        );

        outcome.items = pool;
        outcome
    }

    async fn fetch_from_server(
        &self,
        client: &LibraryClient,
        kind: ItemKind,
        count_hint: usize,
    ) -> Result<Vec<SlideItem>, FetchFailure> {
        let libraries = self.matching_libraries(client, kind).await?;
        if libraries.is_empty() {
            // Nothing of this kind on this server; no recursive catalog scan.
            debug!(server = %client.server_id(), "no matching libraries");
            return Ok(Vec::new());
        }

        let limit = per_library_limit(count_hint, libraries.len());

        let queries = libraries
            .iter()
            .map(|library| client.query_items(&library.id, kind, limit));
        let results = futures::future::join_all(queries).await;

        let mut items = Vec::new();
        let mut last_error: Option<LibraryError> = None;
        let mut succeeded = false;
        for result in results {
            match result {
                Ok(batch) => {
                    succeeded = true;
                    items.extend(
                        batch
                            .into_iter()
                            .filter(|item| item.has_backdrop())
                            .map(|item| client.to_slide(item, kind)),
                    );
                }
                Err(e) => {
                    warn!(server = %client.server_id(), error = %e, "library query failed");
                    last_error = Some(e);
                }
            }
        }

        // A server only counts as failed when none of its libraries answered.
        match (succeeded, last_error) {
            (false, Some(e)) if e.is_transient() => Err(FetchFailure::Transient),
            (false, Some(_)) => Err(FetchFailure::Hard),
            _ => Ok(items),
        }
    }

    async fn matching_libraries(
        &self,
        client: &LibraryClient,
        kind: ItemKind,
    ) -> Result<Vec<Library>, FetchFailure> {
        let key = (
            client.server_id().to_string(),
            client.user_id().to_string(),
        );

        if let Some(cached) = self
            .library_cache
            .lock()
            .expect("library cache lock poisoned")
            .get(&key)
        {
            return Ok(filter_kind(cached, kind));
        }

        let libraries = client.list_libraries().await.map_err(|e| {
            warn!(server = %client.server_id(), error = %e, "library enumeration failed");
            if e.is_transient() {
                FetchFailure::Transient
            } else {
                FetchFailure::Hard
            }
        })?;

        let matching = filter_kind(&libraries, kind);
        self.library_cache
            .lock()
            .expect("library cache lock poisoned")
            .insert(key, libraries);
        Ok(matching)
    }
}

enum FetchFailure {
    Transient,
    Hard,
}

fn filter_kind(libraries: &[Library], kind: ItemKind) -> Vec<Library> {
    libraries
        .iter()
        .filter(|l| l.collection_type.as_deref() == Some(kind.collection_type()))
        .cloned()
        .collect()
}

/// `ceil(1.5 × hint / libraries)`, never below the minimum batch size.
fn per_library_limit(count_hint: usize, library_count: usize) -> usize {
    let raw = (OVERSHOOT * count_hint as f64 / library_count as f64).ceil() as usize;
    raw.max(MIN_PER_LIBRARY)
}

/// Stable cross-server identity of a title. External ids win; title+year is
/// the fallback.
pub(crate) fn slide_identity(item: &SlideItem) -> String {
    item.tmdb_id
        .clone()
        .map(|id| format!("tmdb:{id}"))
        .or_else(|| item.imdb_id.clone().map(|id| format!("imdb:{id}")))
        .unwrap_or_else(|| {
            format!(
                "title:{}:{}",
                item.title.to_lowercase(),
                item.year.map(|y| y.to_string()).unwrap_or_default()
            )
        })
}

/// Drop duplicate titles aggregated from different servers.
fn dedupe(items: &mut Vec<SlideItem>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(slide_identity(item)));
}
