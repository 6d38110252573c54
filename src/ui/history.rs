/// Triage history: totals and the clear actions
use iced::widget::{button, column, container, row, text};
use iced::{Alignment, Element, Length};

use photo_swipe::TriageStats;

use crate::{Message, Screen};

pub fn history_panel<'a>(stats: TriageStats, busy: bool) -> Element<'a, Message> {
    let enabled = |message: Message| (!busy).then_some(message);

    let card = column![
        text("History").size(28),
        text(format!("✓ Kept: {}", stats.kept)).size(18),
        text(format!("✗ Marked for deletion: {}", stats.marked)).size(18),
        text(format!("Decided: {}", stats.kept + stats.marked)).size(14),
    ]
    .spacing(8)
    .align_x(Alignment::Center);

    let actions = column![
        button("Clear kept")
            .on_press_maybe(enabled(Message::ClearKept))
            .padding(8),
        button("Clear all marks")
            .on_press_maybe(enabled(Message::ClearMarked))
            .padding(8),
        button("Clear all history")
            .on_press_maybe(enabled(Message::ClearHistory))
            .padding(8),
    ]
    .spacing(10)
    .align_x(Alignment::Center);

    container(
        column![
            card,
            actions,
            row![button("Back").on_press(Message::Show(Screen::Swipe)).padding(8)],
        ]
        .spacing(24)
        .padding(24)
        .align_x(Alignment::Center),
    )
    .width(Length::Fill)
    .height(Length::Fill)
    .center_x(Length::Fill)
    .center_y(Length::Fill)
    .into()
}
