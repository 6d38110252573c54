//! Photo Swipe
//!
//! Triage a large photo collection one photo at a time: keep it, or mark it
//! for deletion, then delete everything marked in one atomic batch. Triage
//! state and the browsing position survive restarts and changes to the
//! collection made by other apps.

pub mod config;
pub mod error;
pub mod media;
pub mod state;

pub use config::Config;
pub use error::TriageError;
pub use media::{AssetProvider, Authorization, ImageCache, Tier};
pub use state::catalog::AssetCatalog;
pub use state::data::{Decision, PhotoItem, TriageState, TriageStats};
pub use state::deletion::{DeletionCoordinator, DeletionReport};
pub use state::session::TriageSession;
pub use state::store::TriageStore;
