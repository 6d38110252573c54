/// Triage state management
///
/// This module handles all triage state, including:
/// - The durable key/value substrate (substrate.rs)
/// - Kept/marked sets and browsing position (store.rs)
/// - The ordered photo collection (catalog.rs)
/// - The swipe state machine (session.rs)
/// - Committing deletions (deletion.rs)
/// - Shared data structures (data.rs)

pub mod catalog;
pub mod data;
pub mod deletion;
pub mod session;
pub mod store;
pub mod substrate;
