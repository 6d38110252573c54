use iced::widget::image::Handle;
use iced::widget::{column, container, text, Image};
use iced::{Alignment, Element, Length};

use photo_swipe::{PhotoItem, TriageState};

/// Everything the card needs, copied out of the session so no lock is held
#[derive(Debug, Clone)]
pub struct CardInfo {
    pub id: String,
    pub taken: String,
    pub dimensions: String,
    pub is_live: bool,
    pub state: TriageState,
}

impl CardInfo {
    pub fn new(item: &PhotoItem, state: TriageState) -> Self {
        CardInfo {
            id: item.id.clone(),
            taken: item.created_at.format("%Y-%m-%d %H:%M").to_string(),
            dimensions: format!("{}×{}", item.width, item.height),
            is_live: item.is_live,
            state,
        }
    }
}

/// The photo currently up for a decision, with its metadata underneath
pub fn photo_card<'a, Message: 'a>(info: &CardInfo, handle: Option<&Handle>) -> Element<'a, Message> {
    let picture: Element<'a, Message> = match handle {
        Some(handle) => Image::<Handle>::new(handle.clone())
            .width(Length::Fill)
            .height(Length::Fill)
            .into(),
        None => container(text("Loading…").size(18))
            .center_x(Length::Fill)
            .center_y(Length::Fill)
            .into(),
    };

    let badge = match info.state {
        TriageState::Unprocessed => "",
        TriageState::Kept => "✓ Kept",
        TriageState::MarkedForDeletion => "✗ Marked for deletion",
    };
    let live = if info.is_live { "  ● LIVE" } else { "" };

    column![
        container(picture).height(Length::FillPortion(9)),
        text(format!("{}{}", info.id, live)).size(16),
        text(format!("{}  ·  {}", info.taken, info.dimensions)).size(13),
        text(badge).size(14),
    ]
    .spacing(6)
    .align_x(Alignment::Center)
    .into()
}
