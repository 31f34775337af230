pub mod config;
pub mod controller;
pub mod fetcher;
pub mod library;
pub mod sponsorblock;
pub mod stream;
pub mod trailer;

pub use config::Config;
pub use controller::{
    Command, LoadState, PlaybackState, SlideshowController, SlideshowHandle, Snapshot,
    TrailerPreviewState,
};
pub use fetcher::{ContentFetcher, FetchOutcome, ParentalFilter};
pub use library::{ItemKind, LibraryClient, SlideItem};
pub use sponsorblock::{SegmentSkipClient, Segment, calculate_start_time};
pub use stream::{StreamInfo, StreamResolver};
pub use trailer::{TrailerPreviewInfo, TrailerResolver};
