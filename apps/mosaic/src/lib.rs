//! Virtual-scroll engine for a justified-row photo gallery.
//!
//! [`engine::GalleryEngine`] owns one gallery surface: the row cache, the
//! viewport state and the prefetch bookkeeping. Row layout math lives in
//! `mosaic-layout`; network access goes through `mosaic-sdk`.

pub mod config;
pub mod engine;
pub mod prefetch;
pub mod row_cache;
pub mod session;
pub mod telemetry;
pub mod thumbnail;
pub mod viewport;
pub mod worker;

pub use engine::{EngineEvent, GalleryEngine};
pub use session::IsolationId;
pub use viewport::ViewportFrame;
