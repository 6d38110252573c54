/// Shared data structures for the triage state
///
/// These structs represent the data model that flows between
/// the media provider, the triage store and the presentation layer.
use chrono::{DateTime, Utc};
use std::fmt;

/// Geographic coordinates attached to a photo, when the provider knows them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Represents a single photo in the collection
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoItem {
    /// Provider-assigned identifier, the join key for store and cache
    pub id: String,
    /// Creation timestamp, used for ordering (newest first)
    pub created_at: DateTime<Utc>,
    /// Pixel width of the original
    pub width: u32,
    /// Pixel height of the original
    pub height: u32,
    /// Where the photo was taken, if known
    pub location: Option<GeoLocation>,
    /// Live/motion photo: the provider must hand back the still frame
    pub is_live: bool,
}

/// Triage state of a single photo
///
/// Absence from the store means `Unprocessed`, so an identifier can never
/// be kept and marked at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriageState {
    #[default]
    Unprocessed,
    Kept,
    MarkedForDeletion,
}

impl TriageState {
    pub fn is_processed(self) -> bool {
        self != TriageState::Unprocessed
    }
}

/// The outcome of a swipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Kept,
    MarkedForDeletion,
}

impl From<Decision> for TriageState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Kept => TriageState::Kept,
            Decision::MarkedForDeletion => TriageState::MarkedForDeletion,
        }
    }
}

/// Last browsing position, saved after every cursor move.
/// `total` is the collection size at save time and is only a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrowsePosition {
    pub index: usize,
    pub total: usize,
}

impl BrowsePosition {
    /// Clamp the saved index into a collection of `count` items.
    pub fn clamp_to(self, count: usize) -> usize {
        if count == 0 {
            0
        } else {
            self.index.min(count - 1)
        }
    }
}

/// Counts shown on the history screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriageStats {
    pub kept: usize,
    pub marked: usize,
}

impl fmt::Display for TriageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kept, {} marked for deletion", self.kept, self.marked)
    }
}
