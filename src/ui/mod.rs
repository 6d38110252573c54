/// Presentation layer widgets
///
/// Thin view code only; every decision goes through the triage session.

pub mod card;
pub mod history;
pub mod review;
