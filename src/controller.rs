use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SlideshowConfig;
use crate::fetcher::{ContentFetcher, slide_identity};
use crate::library::{ItemKind, SlideItem};
use crate::trailer::{TrailerPreviewInfo, TrailerResolver};

/// Guaranteed minimum screen time for the poster before a trailer may start.
pub const IMAGE_DISPLAY_DELAY: Duration = Duration::from_millis(4000);
/// Longest we wait for the playback component to report readiness.
pub const MAX_TRAILER_BUFFER_WAIT: Duration = Duration::from_millis(8000);
/// Force-advance ceiling for a trailer whose `ended` signal never arrives.
pub const MAX_TRAILER_PLAY_DURATION: Duration = Duration::from_millis(120_000);

/// Lifecycle of the trailer preview for the current slide. `Playing` is only
/// reachable from `Buffering` for the same slide while it is still current.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailerPreviewState {
    Idle,
    WaitingToResolve,
    Buffering(TrailerPreviewInfo),
    Playing(TrailerPreviewInfo),
    Unavailable,
}

impl TrailerPreviewState {
    pub fn label(&self) -> &'static str {
        match self {
            TrailerPreviewState::Idle => "idle",
            TrailerPreviewState::WaitingToResolve => "resolving",
            TrailerPreviewState::Buffering(_) => "buffering",
            TrailerPreviewState::Playing(_) => "playing",
            TrailerPreviewState::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed { message: String, transient: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackState {
    pub current_index: usize,
    pub is_paused: bool,
    pub is_transitioning: bool,
}

/// Observable state published to the rendering layer after every change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub load_state: LoadState,
    pub playback: PlaybackState,
    pub items: Vec<SlideItem>,
    pub trailer_state: TrailerPreviewState,
    pub preload_urls: Vec<String>,
}

/// Inbound operations, including the three playback-component callbacks.
#[derive(Debug)]
pub enum Command {
    NextSlide,
    PreviousSlide,
    TogglePause,
    SetFocused(bool),
    Reload,
    TrailerReady,
    TrailerEnded,
    TrailerError(i32),
}

/// Internal events marshaled from background tasks onto the controller task.
#[derive(Debug)]
enum ControllerEvent {
    TransitionDone {
        generation: u64,
    },
    AutoAdvanceTick {
        generation: u64,
    },
    TrailerResolved {
        generation: u64,
        index: usize,
        item_id: String,
        result: Option<TrailerPreviewInfo>,
        resolve_started: Instant,
    },
    TrailerBuffered {
        generation: u64,
        index: usize,
    },
    TrailerBufferTimedOut {
        generation: u64,
        index: usize,
    },
    PreResolved {
        generation: u64,
        item_id: String,
        result: Option<TrailerPreviewInfo>,
    },
    SafetyTimeout {
        generation: u64,
    },
    BackgroundItems {
        generation: u64,
        items: Vec<SlideItem>,
    },
}

/// Cloneable sender for driving the controller from the outside.
#[derive(Clone)]
pub struct SlideshowHandle {
    tx: mpsc::Sender<Command>,
}

impl SlideshowHandle {
    pub async fn send(&self, command: Command) {
        let _ = self.tx.send(command).await;
    }
}

/// Owns the slide list, playback position, caches, and the trailer-preview
/// state machine. All mutation happens on the task driving `run`; background
/// work reports back through the internal event channel.
pub struct SlideshowController {
    config: SlideshowConfig,
    kind: ItemKind,
    fetcher: Arc<ContentFetcher>,
    resolver: TrailerResolver,

    items: Vec<SlideItem>,
    playback: PlaybackState,
    focused: bool,
    load_state: LoadState,
    trailer_state: TrailerPreviewState,
    preload_urls: Vec<String>,

    // Process-lifetime caches, cleared only on a full reload. None = confirmed
    // unavailable, distinct from a missing key.
    trailer_cache: HashMap<String, Option<TrailerPreviewInfo>>,

    // Bumped on every invalidating operation; events armed under an older
    // generation are dropped.
    generation: u64,
    pipeline_cancel: CancellationToken,
    ready_tx: Option<oneshot::Sender<()>>,

    resolve_task: Option<JoinHandle<()>>,
    wait_task: Option<JoinHandle<()>>,
    auto_advance_task: Option<JoinHandle<()>>,
    transition_task: Option<JoinHandle<()>>,
    safety_task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,

    events_tx: mpsc::Sender<ControllerEvent>,
    events_rx: mpsc::Receiver<ControllerEvent>,
    commands_tx: Option<mpsc::Sender<Command>>,
    commands_rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl SlideshowController {
    pub fn new(
        config: SlideshowConfig,
        kind: ItemKind,
        fetcher: Arc<ContentFetcher>,
        resolver: TrailerResolver,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (snapshot_tx, _) = watch::channel(Snapshot {
            load_state: LoadState::Loading,
            playback: PlaybackState::default(),
            items: Vec::new(),
            trailer_state: TrailerPreviewState::Idle,
            preload_urls: Vec::new(),
        });

        Self {
            config,
            kind,
            fetcher,
            resolver,
            items: Vec::new(),
            playback: PlaybackState::default(),
            focused: true,
            load_state: LoadState::Loading,
            trailer_state: TrailerPreviewState::Idle,
            preload_urls: Vec::new(),
            trailer_cache: HashMap::new(),
            generation: 0,
            pipeline_cancel: CancellationToken::new(),
            ready_tx: None,
            resolve_task: None,
            wait_task: None,
            auto_advance_task: None,
            transition_task: None,
            safety_task: None,
            refresh_task: None,
            events_tx,
            events_rx,
            commands_tx: Some(commands_tx),
            commands_rx,
            snapshot_tx,
        }
    }

    /// Cloneable driver for the controller. Must be taken before `run`; the
    /// run loop ends once every handle is dropped.
    pub fn handle(&self) -> SlideshowHandle {
        SlideshowHandle {
            tx: self
                .commands_tx
                .clone()
                .expect("handle requested after run started"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn items(&self) -> &[SlideItem] {
        &self.items
    }

    pub fn playback(&self) -> PlaybackState {
        self.playback
    }

    pub fn trailer_state(&self) -> &TrailerPreviewState {
        &self.trailer_state
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Drive the controller until every handle is dropped or closed.
    pub async fn run(mut self) {
        // Only external handles keep the command channel alive.
        self.commands_tx = None;
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
            self.publish();
        }
        self.cancel_all();
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, "handling command");
        match command {
            Command::NextSlide => self.next_slide(),
            Command::PreviousSlide => self.previous_slide(),
            Command::TogglePause => self.toggle_pause(),
            Command::SetFocused(focused) => self.set_focused(focused),
            Command::Reload => self.reload_content().await,
            Command::TrailerReady => self.on_trailer_ready(),
            Command::TrailerEnded => self.on_trailer_ended(),
            Command::TrailerError(code) => self.on_trailer_error(code),
        }
    }

    /// Process any events background tasks have already delivered, without
    /// blocking. Useful when embedding the controller in an external loop.
    pub fn process_pending_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        self.publish();
    }

    // ---- loading -------------------------------------------------------

    pub async fn load_initial_content(&mut self) {
        self.load(false).await;
    }

    /// Full reload: cancels all outstanding work *before* clearing caches so
    /// a canceled task cannot repopulate a cleared cache, then replaces the
    /// item list wholesale.
    pub async fn reload_content(&mut self) {
        self.load(true).await;
    }

    async fn load(&mut self, reload: bool) {
        self.cancel_all();
        if reload {
            self.trailer_cache.clear();
            self.fetcher.clear_library_cache();
        }
        self.load_state = LoadState::Loading;
        self.publish();

        let outcome = self
            .fetcher
            .fetch_candidates(self.kind, self.config.max_items)
            .await;

        if outcome.items.is_empty() {
            let transient = outcome.transient_failures > 0 && outcome.hard_failures == 0;
            let message = if transient {
                "Your servers seem to be temporarily unavailable. Trying again soon.".to_string()
            } else {
                "Nothing to feature right now. Check your server connections.".to_string()
            };
            warn!(
                transient,
                soft_failures = outcome.transient_failures,
                hard_failures = outcome.hard_failures,
                "content load produced no items"
            );
            self.items.clear();
            self.load_state = LoadState::Failed { message, transient };
            self.publish();
            return;
        }

        info!(count = outcome.items.len(), "featured content loaded");
        self.preload_urls = outcome.preload_urls(self.config.preload_count);
        self.items = outcome.items;
        self.playback = PlaybackState::default();
        self.trailer_state = TrailerPreviewState::Idle;
        self.load_state = LoadState::Ready;
        self.start_auto_advance();
        self.start_trailer_resolution(0);
        self.pre_resolve_adjacent(0);
        self.publish();
    }

    // ---- navigation ----------------------------------------------------

    /// Advance one slide. No-op while a fade is already in progress.
    pub fn next_slide(&mut self) {
        self.advance(1);
    }

    pub fn previous_slide(&mut self) {
        self.advance(-1);
    }

    fn advance(&mut self, delta: isize) {
        if self.playback.is_transitioning || self.items.is_empty() {
            return;
        }
        let len = self.items.len() as isize;
        let index = (self.playback.current_index as isize + delta).rem_euclid(len) as usize;

        debug!(index, "advancing slide");
        self.generation += 1;
        self.cancel_pipeline();
        self.trailer_state = TrailerPreviewState::Idle;
        self.playback.current_index = index;
        self.playback.is_transitioning = true;

        let generation = self.generation;
        let fade = Duration::from_millis(self.config.fade_duration_ms);
        let events = self.events_tx.clone();
        Self::replace(&mut self.transition_task, tokio::spawn(async move {
            tokio::time::sleep(fade).await;
            let _ = events.send(ControllerEvent::TransitionDone { generation }).await;
        }));
    }

    /// Paused state suppresses auto-advance but not manual navigation.
    pub fn toggle_pause(&mut self) {
        self.playback.is_paused = !self.playback.is_paused;
        if self.playback.is_paused {
            Self::abort(&mut self.auto_advance_task);
        } else {
            self.start_auto_advance();
        }
    }

    pub fn set_focused(&mut self, focused: bool) {
        if self.focused == focused {
            return;
        }
        self.focused = focused;
        self.generation += 1;
        if focused {
            debug!("media bar focused, resuming");
            self.start_auto_advance();
            self.start_trailer_resolution(self.playback.current_index);
            self.refresh_background_items();
        } else {
            debug!("media bar unfocused, suspending");
            Self::abort(&mut self.auto_advance_task);
            self.cancel_pipeline();
            self.trailer_state = TrailerPreviewState::Idle;
        }
    }

    // ---- background refresh -------------------------------------------

    /// Re-fetch the slides the user is not looking at. The current slide and
    /// both neighbours are never touched, so the visible slide cannot flash.
    pub fn refresh_background_items(&mut self) {
        if self.items.len() < 4 {
            return;
        }
        let count = self.items.len() - 3;
        let generation = self.generation;
        let fetcher = self.fetcher.clone();
        let kind = self.kind;
        let events = self.events_tx.clone();
        Self::replace(&mut self.refresh_task, tokio::spawn(async move {
            let outcome = fetcher.fetch_candidates(kind, count).await;
            if !outcome.items.is_empty() {
                let _ = events
                    .send(ControllerEvent::BackgroundItems {
                        generation,
                        items: outcome.items,
                    })
                    .await;
            }
        }));
    }

    /// Splice fresh items into every slot outside the protected set
    /// `{current-1, current, current+1}` (mod n). Fresh items that duplicate a
    /// protected title are dropped so the visible slide cannot reappear
    /// elsewhere in the carousel.
    fn apply_background_refresh(&mut self, fresh: Vec<SlideItem>) {
        let len = self.items.len();
        if len < 4 {
            return;
        }
        let current = self.playback.current_index;
        let protected = [(current + len - 1) % len, current, (current + 1) % len];
        let protected_identities: HashSet<String> = protected
            .iter()
            .map(|&slot| slide_identity(&self.items[slot]))
            .collect();

        let mut fresh = fresh
            .into_iter()
            .filter(|item| !protected_identities.contains(&slide_identity(item)));
        for slot in 0..len {
            if protected.contains(&slot) {
                continue;
            }
            match fresh.next() {
                Some(item) => self.items[slot] = item,
                None => break,
            }
        }
        debug!("background slides refreshed");
    }

    // ---- trailer pipeline ---------------------------------------------

    /// Kick off trailer resolution for a slide. Cache hits begin buffering
    /// immediately so the playback component gets maximum lead time; a cached
    /// negative goes straight to `Unavailable` with no network attempt.
    pub fn start_trailer_resolution(&mut self, index: usize) {
        self.cancel_pipeline();
        if !self.focused {
            return;
        }
        let Some(item) = self.items.get(index).cloned() else {
            return;
        };

        match self.trailer_cache.get(&item.id).cloned() {
            Some(Some(info)) => {
                self.enter_buffering(index, info, Instant::now());
            }
            Some(None) => {
                self.trailer_state = TrailerPreviewState::Unavailable;
            }
            None => {
                self.trailer_state = TrailerPreviewState::WaitingToResolve;
                self.spawn_resolve(index, item);
            }
        }
    }

    fn spawn_resolve(&mut self, index: usize, item: SlideItem) {
        let Some(library) = item
            .server_id
            .as_deref()
            .and_then(|id| self.fetcher.client_for(id))
            .cloned()
        else {
            warn!(item_id = %item.id, "no client for item's server");
            self.trailer_cache.insert(item.id, None);
            self.trailer_state = TrailerPreviewState::Unavailable;
            return;
        };

        let generation = self.generation;
        let resolver = self.resolver.clone();
        let events = self.events_tx.clone();
        let cancel = self.pipeline_cancel.clone();
        let resolve_started = Instant::now();

        Self::replace(&mut self.resolve_task, tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = resolver.resolve(&library, &item.id) => {
                    let _ = events
                        .send(ControllerEvent::TrailerResolved {
                            generation,
                            index,
                            item_id: item.id.clone(),
                            result,
                            resolve_started,
                        })
                        .await;
                }
            }
        }));
    }

    /// Speculatively resolve the neighbours of a slide so navigation hits the
    /// cache. Results only land in the cache; state is never touched.
    pub fn pre_resolve_adjacent(&mut self, index: usize) {
        for neighbour in adjacent_indices(index, self.items.len()) {
            let Some(item) = self.items.get(neighbour) else {
                continue;
            };
            if self.trailer_cache.contains_key(&item.id) {
                continue;
            }
            let Some(library) = item
                .server_id
                .as_deref()
                .and_then(|id| self.fetcher.client_for(id))
                .cloned()
            else {
                continue;
            };

            let generation = self.generation;
            let resolver = self.resolver.clone();
            let events = self.events_tx.clone();
            let cancel = self.pipeline_cancel.clone();
            let item_id = item.id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = resolver.resolve(&library, &item_id) => {
                        let _ = events
                            .send(ControllerEvent::PreResolved {
                                generation,
                                item_id: item_id.clone(),
                                result,
                            })
                            .await;
                    }
                }
            });
        }
    }

    fn enter_buffering(&mut self, index: usize, info: TrailerPreviewInfo, resolve_started: Instant) {
        self.trailer_state = TrailerPreviewState::Buffering(info);

        let (ready_tx, ready_rx) = oneshot::channel();
        self.ready_tx = Some(ready_tx);

        let generation = self.generation;
        let events = self.events_tx.clone();
        Self::replace(&mut self.wait_task, tokio::spawn(async move {
            // The poster keeps the screen for the remainder of the display
            // delay; time already spent resolving counts against it.
            let elapsed = resolve_started.elapsed();
            if elapsed < IMAGE_DISPLAY_DELAY {
                tokio::time::sleep(IMAGE_DISPLAY_DELAY - elapsed).await;
            }
            let event = match tokio::time::timeout(MAX_TRAILER_BUFFER_WAIT, ready_rx).await {
                Ok(Ok(())) => ControllerEvent::TrailerBuffered { generation, index },
                _ => ControllerEvent::TrailerBufferTimedOut { generation, index },
            };
            let _ = events.send(event).await;
        }));
    }

    /// Playback component reports the stream is ready to render.
    pub fn on_trailer_ready(&mut self) {
        if let Some(ready_tx) = self.ready_tx.take() {
            let _ = ready_tx.send(());
        }
    }

    /// Trailer finished on its own; fall back to the poster and move on.
    pub fn on_trailer_ended(&mut self) {
        debug!("trailer ended");
        Self::abort(&mut self.safety_task);
        self.trailer_state = TrailerPreviewState::Idle;
        if self.focused {
            self.next_slide();
        }
    }

    pub fn on_trailer_error(&mut self, code: i32) {
        warn!(code, "playback component reported trailer error");
        Self::abort(&mut self.safety_task);
        self.trailer_state = TrailerPreviewState::Unavailable;
        self.start_auto_advance();
    }

    // ---- event handling ------------------------------------------------

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::TransitionDone { generation } => {
                if generation != self.generation {
                    return;
                }
                self.playback.is_transitioning = false;
                self.preload_urls = self
                    .items
                    .iter()
                    .cycle()
                    .skip(self.playback.current_index)
                    .take(self.config.preload_count.min(self.items.len()))
                    .filter_map(|item| item.backdrop_url.clone())
                    .collect();
                self.start_auto_advance();
                self.start_trailer_resolution(self.playback.current_index);
                self.pre_resolve_adjacent(self.playback.current_index);
            }
            ControllerEvent::AutoAdvanceTick { generation } => {
                if generation != self.generation {
                    return;
                }
                if self.focused && !self.playback.is_paused && !self.playback.is_transitioning {
                    self.next_slide();
                }
            }
            ControllerEvent::TrailerResolved {
                generation,
                index,
                item_id,
                result,
                resolve_started,
            } => {
                // A stale generation means the pipeline was torn down, possibly
                // by a reload that cleared the cache; the result must not land
                // anywhere, or it would repopulate a cache the user asked to
                // discard.
                if generation != self.generation {
                    return;
                }
                self.trailer_cache.insert(item_id, result.clone());
                if index != self.playback.current_index {
                    return;
                }
                match result {
                    Some(info) => self.enter_buffering(index, info, resolve_started),
                    None => self.trailer_state = TrailerPreviewState::Unavailable,
                }
            }
            ControllerEvent::TrailerBuffered { generation, index } => {
                // Second line of defense behind task cancellation: the slide
                // must still be current, unpaused, and focused.
                if generation != self.generation
                    || index != self.playback.current_index
                    || self.playback.is_paused
                    || !self.focused
                {
                    return;
                }
                if let TrailerPreviewState::Buffering(info) = self.trailer_state.clone() {
                    info!(index, video_id = %info.video_id, "trailer playing");
                    // Trailer playback owns advancement now.
                    Self::abort(&mut self.auto_advance_task);
                    self.trailer_state = TrailerPreviewState::Playing(info);
                    self.arm_safety_timeout();
                }
            }
            ControllerEvent::TrailerBufferTimedOut { generation, index } => {
                if generation != self.generation || index != self.playback.current_index {
                    return;
                }
                if matches!(self.trailer_state, TrailerPreviewState::Buffering(_)) {
                    debug!(index, "trailer never became ready, giving up");
                    self.trailer_state = TrailerPreviewState::Unavailable;
                }
            }
            ControllerEvent::PreResolved {
                generation,
                item_id,
                result,
            } => {
                if generation != self.generation {
                    return;
                }
                self.trailer_cache.insert(item_id, result);
            }
            ControllerEvent::SafetyTimeout { generation } => {
                if generation != self.generation {
                    return;
                }
                if matches!(self.trailer_state, TrailerPreviewState::Playing(_)) {
                    warn!("trailer exceeded playback ceiling, forcing advance");
                    self.trailer_state = TrailerPreviewState::Idle;
                    self.next_slide();
                }
            }
            ControllerEvent::BackgroundItems { generation, items } => {
                if generation != self.generation {
                    return;
                }
                self.apply_background_refresh(items);
            }
        }
    }

    // ---- timers & cancellation ----------------------------------------

    fn start_auto_advance(&mut self) {
        Self::abort(&mut self.auto_advance_task);
        if self.playback.is_paused || !self.focused {
            return;
        }
        let generation = self.generation;
        let interval = Duration::from_millis(self.config.rotation_interval_ms);
        let events = self.events_tx.clone();
        self.auto_advance_task = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = events
                .send(ControllerEvent::AutoAdvanceTick { generation })
                .await;
        }));
    }

    fn arm_safety_timeout(&mut self) {
        let generation = self.generation;
        let events = self.events_tx.clone();
        Self::replace(&mut self.safety_task, tokio::spawn(async move {
            tokio::time::sleep(MAX_TRAILER_PLAY_DURATION).await;
            let _ = events
                .send(ControllerEvent::SafetyTimeout { generation })
                .await;
        }));
    }

    /// Tear down the in-flight trailer pipeline: the resolve task, the
    /// buffer-wait task, the readiness channel, and the safety timer. The
    /// replaced readiness sender can never signal a stale transition.
    fn cancel_pipeline(&mut self) {
        self.pipeline_cancel.cancel();
        self.pipeline_cancel = CancellationToken::new();
        Self::abort(&mut self.resolve_task);
        Self::abort(&mut self.wait_task);
        Self::abort(&mut self.safety_task);
        self.ready_tx = None;
    }

    fn cancel_all(&mut self) {
        self.generation += 1;
        self.cancel_pipeline();
        Self::abort(&mut self.auto_advance_task);
        Self::abort(&mut self.transition_task);
        Self::abort(&mut self.refresh_task);
        self.trailer_state = TrailerPreviewState::Idle;
        self.playback.is_transitioning = false;
    }

    fn abort(slot: &mut Option<JoinHandle<()>>) {
        if let Some(task) = slot.take() {
            task.abort();
        }
    }

    fn replace(slot: &mut Option<JoinHandle<()>>, task: JoinHandle<()>) {
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(Snapshot {
            load_state: self.load_state.clone(),
            playback: self.playback,
            items: self.items.clone(),
            trailer_state: self.trailer_state.clone(),
            preload_urls: self.preload_urls.clone(),
        });
    }
}

/// Neighbours of `index` in a ring of `len` slides. With two slides both
/// directions point at the same slot, which must only be visited once.
fn adjacent_indices(index: usize, len: usize) -> Vec<usize> {
    if len < 2 {
        return Vec::new();
    }
    let previous = (index + len - 1) % len;
    let next = (index + 1) % len;
    if previous == next {
        vec![next]
    } else {
        vec![previous, next]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, SlideshowConfig};
    use crate::library::LibraryClient;
    use crate::sponsorblock::SegmentSkipClient;
    use crate::stream::{StreamInfo, StreamResolver};

    fn slide(id: &str) -> SlideItem {
        SlideItem {
            id: id.to_string(),
            server_id: Some("s1".to_string()),
            title: format!("Title {id}"),
            overview: None,
            backdrop_url: Some(format!("http://img/{id}")),
            logo_url: None,
            rating: None,
            year: Some(2020),
            genres: Vec::new(),
            runtime_minutes: None,
            critic_score: None,
            community_score: None,
            tmdb_id: None,
            imdb_id: None,
            kind: ItemKind::Movie,
        }
    }

    fn preview(video_id: &str) -> TrailerPreviewInfo {
        TrailerPreviewInfo {
            video_id: video_id.to_string(),
            start_offset_seconds: 0.0,
            skip_segments: Vec::new(),
            stream_info: StreamInfo {
                video_url: format!("http://stream/{video_id}"),
                audio_url: None,
                is_video_only: false,
            },
        }
    }

    fn controller_with_items(ids: &[&str]) -> SlideshowController {
        // Unroutable port; resolve attempts fail fast without touching a network.
        let server = ServerConfig {
            name: Some("s1".to_string()),
            url: "http://127.0.0.1:9".to_string(),
            api_key: "k".to_string(),
            user_id: "u".to_string(),
        };
        let fetcher = Arc::new(ContentFetcher::new(vec![LibraryClient::new(&server)], None));
        let resolver = TrailerResolver::new(
            SegmentSkipClient::new("http://127.0.0.1:9"),
            StreamResolver::new("http://127.0.0.1:9"),
            Vec::new(),
        );
        let mut controller = SlideshowController::new(
            SlideshowConfig::default(),
            ItemKind::Movie,
            fetcher,
            resolver,
        );
        controller.items = ids.iter().map(|id| slide(id)).collect();
        controller.load_state = LoadState::Ready;
        controller
    }

    #[tokio::test]
    async fn test_next_slide_is_noop_while_transitioning() {
        let mut controller = controller_with_items(&["a", "b", "c"]);

        controller.next_slide();
        assert_eq!(controller.playback.current_index, 1);
        assert!(controller.playback.is_transitioning);

        controller.next_slide();
        assert_eq!(controller.playback.current_index, 1);
    }

    #[tokio::test]
    async fn test_navigation_wraps_modulo() {
        let mut controller = controller_with_items(&["a", "b", "c"]);

        controller.previous_slide();
        assert_eq!(controller.playback.current_index, 2);

        controller.playback.is_transitioning = false;
        controller.next_slide();
        assert_eq!(controller.playback.current_index, 0);
    }

    #[tokio::test]
    async fn test_pause_suppresses_auto_advance_not_navigation() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        controller.toggle_pause();
        assert!(controller.playback.is_paused);

        let generation = controller.generation;
        controller.handle_event(ControllerEvent::AutoAdvanceTick { generation });
        assert_eq!(controller.playback.current_index, 0);

        controller.next_slide();
        assert_eq!(controller.playback.current_index, 1);
    }

    #[tokio::test]
    async fn test_refresh_never_touches_protected_slots() {
        let mut controller = controller_with_items(&["a", "b", "c", "d", "e", "f"]);
        controller.playback.current_index = 2;

        let before = controller.items.clone();
        let fresh: Vec<SlideItem> = ["x", "y", "z"].iter().map(|id| slide(id)).collect();
        controller.apply_background_refresh(fresh);

        // Protected: 1, 2, 3. Unprotected 0, 4, 5 are replaced in order.
        assert_eq!(controller.items[1], before[1]);
        assert_eq!(controller.items[2], before[2]);
        assert_eq!(controller.items[3], before[3]);
        assert_eq!(controller.items[0].id, "x");
        assert_eq!(controller.items[4].id, "y");
        assert_eq!(controller.items[5].id, "z");
    }

    #[tokio::test]
    async fn test_refresh_wraps_protection_at_boundaries() {
        let mut controller = controller_with_items(&["a", "b", "c", "d", "e"]);
        controller.playback.current_index = 0;

        let before = controller.items.clone();
        let fresh: Vec<SlideItem> = ["x", "y"].iter().map(|id| slide(id)).collect();
        controller.apply_background_refresh(fresh);

        // Protected wraps to {4, 0, 1}.
        assert_eq!(controller.items[4], before[4]);
        assert_eq!(controller.items[0], before[0]);
        assert_eq!(controller.items[1], before[1]);
        assert_eq!(controller.items[2].id, "x");
        assert_eq!(controller.items[3].id, "y");
    }

    #[tokio::test]
    async fn test_refresh_drops_fresh_duplicates_of_protected_titles() {
        let mut controller = controller_with_items(&["a", "b", "c", "d", "e", "f"]);
        controller.playback.current_index = 2;

        let before = controller.items.clone();
        // The first fresh item is the currently visible title again.
        let fresh: Vec<SlideItem> = ["c", "x"].iter().map(|id| slide(id)).collect();
        controller.apply_background_refresh(fresh);

        // The duplicate never lands; only the genuinely new title is spliced.
        assert_eq!(controller.items[0].id, "x");
        assert_eq!(controller.items[4], before[4]);
        assert_eq!(controller.items[5], before[5]);
        let visible_count = controller
            .items
            .iter()
            .filter(|item| item.id == "c")
            .count();
        assert_eq!(visible_count, 1);
    }

    #[tokio::test]
    async fn test_refresh_noop_below_four_items() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        let before = controller.items.clone();
        controller.apply_background_refresh(vec![slide("x")]);
        assert_eq!(controller.items, before);
    }

    #[tokio::test]
    async fn test_cached_negative_goes_straight_to_unavailable() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        controller.trailer_cache.insert("a".to_string(), None);

        controller.start_trailer_resolution(0);
        assert_eq!(controller.trailer_state, TrailerPreviewState::Unavailable);
        // No resolve task was spawned for the confirmed-unavailable item.
        assert!(controller.resolve_task.is_none());
    }

    #[tokio::test]
    async fn test_cached_hit_buffers_immediately() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        controller
            .trailer_cache
            .insert("a".to_string(), Some(preview("vid-a")));

        controller.start_trailer_resolution(0);
        assert!(matches!(
            controller.trailer_state,
            TrailerPreviewState::Buffering(_)
        ));
        assert!(controller.ready_tx.is_some());
    }

    #[tokio::test]
    async fn test_resolved_event_caches_and_buffers() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        let generation = controller.generation;

        controller.handle_event(ControllerEvent::TrailerResolved {
            generation,
            index: 0,
            item_id: "a".to_string(),
            result: Some(preview("vid-a")),
            resolve_started: Instant::now(),
        });

        assert!(matches!(
            controller.trailer_state,
            TrailerPreviewState::Buffering(_)
        ));
        assert_eq!(
            controller.trailer_cache.get("a"),
            Some(&Some(preview("vid-a")))
        );
    }

    #[tokio::test]
    async fn test_stale_generation_event_is_ignored_entirely() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        let stale = controller.generation;
        controller.generation += 1;

        controller.handle_event(ControllerEvent::TrailerResolved {
            generation: stale,
            index: 0,
            item_id: "a".to_string(),
            result: Some(preview("vid-a")),
            resolve_started: Instant::now(),
        });

        // Neither a cache write nor a state transition for the stale run.
        assert!(!controller.trailer_cache.contains_key("a"));
        assert_eq!(controller.trailer_state, TrailerPreviewState::Idle);
    }

    #[tokio::test]
    async fn test_reload_discards_stale_resolution_events() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        controller
            .trailer_cache
            .insert("a".to_string(), Some(preview("vid-a")));
        let stale = controller.generation;

        controller.reload_content().await;
        assert!(controller.trailer_cache.is_empty());

        // Events queued by tasks that outlived the reload arrive afterwards;
        // a stale negative must not pin the item unavailable for the session.
        controller.handle_event(ControllerEvent::PreResolved {
            generation: stale,
            item_id: "a".to_string(),
            result: None,
        });
        controller.handle_event(ControllerEvent::TrailerResolved {
            generation: stale,
            index: 0,
            item_id: "b".to_string(),
            result: None,
            resolve_started: Instant::now(),
        });
        assert!(controller.trailer_cache.is_empty());
    }

    #[tokio::test]
    async fn test_pre_resolve_event_caches_for_current_generation() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        let generation = controller.generation;

        controller.handle_event(ControllerEvent::PreResolved {
            generation,
            item_id: "b".to_string(),
            result: Some(preview("vid-b")),
        });
        assert_eq!(
            controller.trailer_cache.get("b"),
            Some(&Some(preview("vid-b")))
        );
        assert_eq!(controller.trailer_state, TrailerPreviewState::Idle);
    }

    #[test]
    fn test_adjacent_indices_deduplicate_in_small_rings() {
        assert_eq!(adjacent_indices(0, 5), vec![4, 1]);
        assert_eq!(adjacent_indices(4, 5), vec![3, 0]);
        // Two slides: both directions reach the same slot once.
        assert_eq!(adjacent_indices(0, 2), vec![1]);
        assert_eq!(adjacent_indices(1, 2), vec![0]);
        assert!(adjacent_indices(0, 1).is_empty());
        assert!(adjacent_indices(0, 0).is_empty());
    }

    #[tokio::test]
    async fn test_buffered_event_for_stale_slide_never_plays() {
        let mut controller = controller_with_items(&["a", "b", "c", "d"]);
        controller.playback.current_index = 2;
        let generation = controller.generation;

        controller.handle_event(ControllerEvent::TrailerResolved {
            generation,
            index: 2,
            item_id: "c".to_string(),
            result: Some(preview("vid-c")),
            resolve_started: Instant::now(),
        });
        assert!(matches!(
            controller.trailer_state,
            TrailerPreviewState::Buffering(_)
        ));

        // The user navigates before readiness arrives.
        controller.playback.is_transitioning = false;
        controller.next_slide();
        assert_eq!(controller.playback.current_index, 3);

        controller.handle_event(ControllerEvent::TrailerBuffered { generation, index: 2 });
        assert!(!matches!(
            controller.trailer_state,
            TrailerPreviewState::Playing(_)
        ));
    }

    #[tokio::test]
    async fn test_buffered_event_respects_pause_and_focus() {
        let mut controller = controller_with_items(&["a", "b"]);
        let generation = controller.generation;
        controller.handle_event(ControllerEvent::TrailerResolved {
            generation,
            index: 0,
            item_id: "a".to_string(),
            result: Some(preview("vid-a")),
            resolve_started: Instant::now(),
        });

        controller.playback.is_paused = true;
        controller.handle_event(ControllerEvent::TrailerBuffered { generation, index: 0 });
        assert!(!matches!(
            controller.trailer_state,
            TrailerPreviewState::Playing(_)
        ));

        controller.playback.is_paused = false;
        controller.handle_event(ControllerEvent::TrailerBuffered { generation, index: 0 });
        assert!(matches!(
            controller.trailer_state,
            TrailerPreviewState::Playing(_)
        ));
    }

    #[tokio::test]
    async fn test_buffer_timeout_degrades_to_unavailable() {
        let mut controller = controller_with_items(&["a", "b"]);
        let generation = controller.generation;
        controller.handle_event(ControllerEvent::TrailerResolved {
            generation,
            index: 0,
            item_id: "a".to_string(),
            result: Some(preview("vid-a")),
            resolve_started: Instant::now(),
        });

        controller.handle_event(ControllerEvent::TrailerBufferTimedOut { generation, index: 0 });
        assert_eq!(controller.trailer_state, TrailerPreviewState::Unavailable);
    }

    #[tokio::test]
    async fn test_trailer_ended_resets_and_advances_when_focused() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        controller.trailer_state = TrailerPreviewState::Playing(preview("vid-a"));

        controller.on_trailer_ended();
        assert_eq!(controller.playback.current_index, 1);

        let mut unfocused = controller_with_items(&["a", "b", "c"]);
        unfocused.focused = false;
        unfocused.trailer_state = TrailerPreviewState::Playing(preview("vid-a"));
        unfocused.on_trailer_ended();
        assert_eq!(unfocused.playback.current_index, 0);
        assert_eq!(unfocused.trailer_state, TrailerPreviewState::Idle);
    }

    #[tokio::test]
    async fn test_losing_focus_stops_active_trailer() {
        let mut controller = controller_with_items(&["a", "b"]);
        controller.trailer_state = TrailerPreviewState::Playing(preview("vid-a"));

        controller.set_focused(false);
        assert_eq!(controller.trailer_state, TrailerPreviewState::Idle);
        assert!(controller.auto_advance_task.is_none());
    }

    #[tokio::test]
    async fn test_safety_timeout_forces_advance() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        controller.trailer_state = TrailerPreviewState::Playing(preview("vid-a"));
        let generation = controller.generation;

        controller.handle_event(ControllerEvent::SafetyTimeout { generation });
        assert_eq!(controller.playback.current_index, 1);

        // A stale safety timeout must not fire.
        let mut other = controller_with_items(&["a", "b", "c"]);
        other.trailer_state = TrailerPreviewState::Playing(preview("vid-a"));
        other.handle_event(ControllerEvent::SafetyTimeout {
            generation: other.generation + 1,
        });
        assert_eq!(other.playback.current_index, 0);
    }

    #[tokio::test]
    async fn test_trailer_ready_fires_readiness_gate() {
        let mut controller = controller_with_items(&["a"]);
        controller
            .trailer_cache
            .insert("a".to_string(), Some(preview("vid-a")));
        controller.start_trailer_resolution(0);
        assert!(controller.ready_tx.is_some());

        controller.on_trailer_ready();
        assert!(controller.ready_tx.is_none());
    }

    #[tokio::test]
    async fn test_transition_done_clears_flag_and_restarts() {
        let mut controller = controller_with_items(&["a", "b", "c"]);
        controller.next_slide();
        let generation = controller.generation;

        controller.handle_event(ControllerEvent::TransitionDone { generation });
        assert!(!controller.playback.is_transitioning);
        // New slide's resolution kicked off.
        assert_eq!(
            controller.trailer_state,
            TrailerPreviewState::WaitingToResolve
        );
    }
}
