/// Review screen for photos marked for deletion
use iced::widget::{button, checkbox, column, container, row, scrollable, text, Column};
use iced::{Alignment, Element, Length};
use std::collections::BTreeSet;

use photo_swipe::PhotoItem;

use crate::{Message, Screen};

#[derive(Debug, Clone)]
pub struct ReviewEntry {
    pub id: String,
    pub taken: String,
    pub is_live: bool,
}

impl From<&PhotoItem> for ReviewEntry {
    fn from(item: &PhotoItem) -> Self {
        ReviewEntry {
            id: item.id.clone(),
            taken: item.created_at.format("%Y-%m-%d %H:%M").to_string(),
            is_live: item.is_live,
        }
    }
}

pub fn review_list<'a>(
    entries: &[ReviewEntry],
    selected: &BTreeSet<String>,
    busy: bool,
) -> Element<'a, Message> {
    let header = text(format!(
        "{} marked for deletion, {} selected",
        entries.len(),
        selected.len()
    ))
    .size(20);

    let all_selected = !entries.is_empty() && entries.iter().all(|e| selected.contains(&e.id));
    let select_all = checkbox("Select all", all_selected).on_toggle(Message::SelectAll);

    let rows = entries.iter().fold(Column::new().spacing(6), |list, entry| {
        let id = entry.id.clone();
        let live = if entry.is_live { "  ● LIVE" } else { "" };
        list.push(
            row![
                checkbox("", selected.contains(&entry.id))
                    .on_toggle(move |checked| Message::ToggleSelected(id.clone(), checked)),
                text(format!("{}{}", entry.id, live)).size(14),
                text(entry.taken.clone()).size(12),
            ]
            .spacing(12)
            .align_y(Alignment::Center),
        )
    });

    let has_selection = !selected.is_empty() && !busy;
    let actions = row![
        button("Keep selected")
            .on_press_maybe(has_selection.then_some(Message::KeepSelected))
            .padding(8),
        button("Delete selected")
            .on_press_maybe(has_selection.then_some(Message::DeleteSelected))
            .padding(8),
        button("Back").on_press(Message::Show(Screen::Swipe)).padding(8),
    ]
    .spacing(12);

    container(
        column![
            header,
            select_all,
            scrollable(rows).height(Length::Fill),
            actions
        ]
        .spacing(16)
        .padding(24),
    )
    .width(Length::Fill)
    .height(Length::Fill)
    .into()
}
