use iced::keyboard::{self, key::Named, Key};
use iced::widget::image::Handle;
use iced::widget::{button, column, container, row, text, Column};
use iced::{event, window, Alignment, Element, Event, Length, Subscription, Task, Theme};
use rfd::FileDialog;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use photo_swipe::media::cache::ImageResult;
use photo_swipe::media::{CacheLookup, FolderProvider};
use photo_swipe::state::substrate::SqliteSubstrate;
use photo_swipe::{
    AssetProvider, Config, Decision, DeletionCoordinator, DeletionReport, ImageCache, Tier,
    TriageError, TriageSession, TriageStats, TriageStore,
};

mod ui;

use ui::card::{photo_card, CardInfo};
use ui::history::history_panel;
use ui::review::{review_list, ReviewEntry};

/// The session, shared with background tasks behind one lock
#[derive(Clone)]
struct SharedSession(Arc<Mutex<TriageSession>>);

impl std::fmt::Debug for SharedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSession")
    }
}

/// A library that finished loading
#[derive(Debug, Clone)]
struct LoadedLibrary {
    session: SharedSession,
    /// Set when the triage database could not be opened
    warning: Option<TriageError>,
}

/// The photo on screen and the tier its pixels came from
struct Shown {
    id: String,
    tier: Tier,
    handle: Handle,
}

/// Per-library collaborators, replaced when another folder is opened
struct Library {
    provider: Arc<dyn AssetProvider>,
    cache: ImageCache,
    coordinator: Arc<DeletionCoordinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Swipe,
    Review,
    History,
}

/// What the views draw, copied out of the session whenever it changes.
/// A background commit or refresh holds the session lock, so the view
/// never reads the session directly.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    card: Option<CardInfo>,
    progress: (usize, usize),
    /// Counts for the photos in this folder
    stats: TriageStats,
    /// Counts across the whole store
    history: TriageStats,
    marked: Vec<ReviewEntry>,
}

impl Snapshot {
    fn capture(session: &TriageSession) -> Self {
        Snapshot {
            card: session
                .current()
                .map(|item| CardInfo::new(item, session.current_state())),
            progress: session.progress(),
            stats: session.catalog().stats(),
            history: session.stats(),
            marked: session
                .marked_items()
                .into_iter()
                .map(ReviewEntry::from)
                .collect(),
        }
    }

    fn current_id(&self) -> Option<&str> {
        self.card.as_ref().map(|card| card.id.as_str())
    }
}

/// Main application state
struct PhotoSwipe {
    config: Config,
    library: Option<Library>,
    session: Option<SharedSession>,
    snapshot: Snapshot,
    shown: Option<Shown>,
    /// Status message to display to the user
    status: String,
    /// A commit failed and can be retried
    retry_commit: bool,
    busy: bool,
    screen: Screen,
    /// Ticked entries on the review screen
    selected: BTreeSet<String>,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    OpenFolder,
    Loaded(Result<LoadedLibrary, TriageError>),
    Decide(Decision),
    Undo,
    Next,
    Previous,
    UndoAll,
    Commit,
    Show(Screen),
    ToggleSelected(String, bool),
    SelectAll(bool),
    KeepSelected,
    DeleteSelected,
    ClearKept,
    ClearMarked,
    ClearHistory,
    Committed(Result<DeletionReport, TriageError>),
    Refresh,
    Refreshed(Result<(), TriageError>),
    ImageLoaded(String, Tier, ImageResult),
}

impl PhotoSwipe {
    fn new(config: Config) -> (Self, Task<Message>) {
        let mut app = PhotoSwipe {
            config,
            library: None,
            session: None,
            snapshot: Snapshot::default(),
            shown: None,
            status: "Open a folder of photos to start swiping.".to_string(),
            retry_commit: false,
            busy: false,
            screen: Screen::Swipe,
            selected: BTreeSet::new(),
        };

        let task = match app.config.library_root.clone() {
            Some(root) => app.open_library(root),
            None => Task::none(),
        };
        (app, task)
    }

    /// Handle application messages and update state
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::OpenFolder => {
                let folder = FileDialog::new()
                    .set_title("Select a Folder of Photos")
                    .pick_folder();

                if let Some(root) = folder {
                    self.config.library_root = Some(root.clone());
                    if let Err(e) = self.config.save() {
                        tracing::warn!("⚠️  Could not save config: {}", e);
                    }
                    return self.open_library(root);
                }
                Task::none()
            }
            Message::Loaded(Ok(loaded)) => {
                self.busy = false;
                self.session = Some(loaded.session);
                self.status = match loaded.warning {
                    Some(warning) => warning.to_string(),
                    None => "Swipe: ← delete, → keep, Backspace undo.".to_string(),
                };
                self.show_current()
            }
            Message::Loaded(Err(e)) => {
                self.busy = false;
                self.status = if e.is_fatal() {
                    format!("{}. Choose a folder you can read.", e)
                } else {
                    e.to_string()
                };
                Task::none()
            }
            Message::Decide(decision) => self.with_session(|s| s.decide(decision)),
            Message::Undo => self.with_session(|s| s.undo()),
            Message::Next => self.with_session(|s| s.move_next()),
            Message::Previous => self.with_session(|s| s.move_previous()),
            Message::UndoAll => self.with_session(|s| s.unmark_all()),
            Message::ClearKept => self.with_session(|s| s.clear_kept()),
            Message::ClearMarked => self.with_session(|s| s.clear_marked()),
            Message::ClearHistory => self.with_session(|s| s.clear_history()),
            Message::Commit => {
                let (Some(session), Some(library)) = (self.session.clone(), &self.library) else {
                    return Task::none();
                };
                if self.busy {
                    return Task::none();
                }
                self.busy = true;
                self.status = "Deleting marked photos…".to_string();

                let coordinator = library.coordinator.clone();
                Task::perform(
                    async move {
                        let mut session = session.0.lock().await;
                        coordinator.commit(&mut session).await
                    },
                    Message::Committed,
                )
            }
            Message::Show(screen) => {
                self.screen = screen;
                self.selected.clear();
                Task::none()
            }
            Message::ToggleSelected(id, checked) => {
                if checked {
                    self.selected.insert(id);
                } else {
                    self.selected.remove(&id);
                }
                Task::none()
            }
            Message::SelectAll(checked) => {
                self.selected = if checked {
                    self.snapshot.marked.iter().map(|e| e.id.clone()).collect()
                } else {
                    BTreeSet::new()
                };
                Task::none()
            }
            Message::KeepSelected => {
                let selected = std::mem::take(&mut self.selected);
                self.with_session(|s| s.keep_selected(&selected))
            }
            Message::DeleteSelected => {
                let (Some(session), Some(library)) = (self.session.clone(), &self.library) else {
                    return Task::none();
                };
                if self.busy {
                    return Task::none();
                }
                self.busy = true;
                self.status = format!("Deleting {} selected photos…", self.selected.len());

                let coordinator = library.coordinator.clone();
                let selected = std::mem::take(&mut self.selected);
                Task::perform(
                    async move {
                        let mut session = session.0.lock().await;
                        coordinator.commit_selected(&mut session, &selected).await
                    },
                    Message::Committed,
                )
            }
            Message::Committed(result) => {
                self.busy = false;
                match result {
                    Ok(report) if report.is_noop() => {
                        self.status = "Nothing is marked for deletion.".to_string();
                    }
                    Ok(report) => {
                        self.retry_commit = false;
                        self.screen = Screen::Swipe;
                        self.status = format!("✅ Deleted {} photos.", report.count());
                    }
                    Err(e) => {
                        self.retry_commit = matches!(e, TriageError::DeletionFailed { .. });
                        self.status = e.to_string();
                    }
                }
                self.show_current()
            }
            Message::Refresh => {
                let (Some(session), Some(library)) = (self.session.clone(), &self.library) else {
                    return Task::none();
                };
                if self.busy {
                    return Task::none();
                }
                self.busy = true;

                let provider = library.provider.clone();
                Task::perform(
                    async move {
                        let mut session = session.0.lock().await;
                        session.refresh(provider.as_ref()).await
                    },
                    Message::Refreshed,
                )
            }
            Message::Refreshed(result) => {
                self.busy = false;
                if let Err(e) = result {
                    self.status = e.to_string();
                }
                self.show_current()
            }
            Message::ImageLoaded(id, tier, result) => {
                // Results for photos the user already swiped past are dropped
                if self.snapshot.current_id() != Some(id.as_str()) {
                    return Task::none();
                }
                let on_screen = self.shown.as_ref().filter(|shown| shown.id == id);
                match result {
                    Ok(image) => {
                        if on_screen.map_or(true, |shown| tier >= shown.tier) {
                            self.shown = Some(Shown {
                                id,
                                tier,
                                handle: Handle::from_rgba(
                                    image.width,
                                    image.height,
                                    image.pixels.clone(),
                                ),
                            });
                        }
                    }
                    // The other tier is already showing something
                    Err(e) if on_screen.is_some() => {
                        tracing::debug!("Keeping the shown tier: {}", e);
                    }
                    Err(e) => self.status = e.to_string(),
                }
                Task::none()
            }
        }
    }

    /// Build the user interface
    fn view(&self) -> Element<Message> {
        let body = match self.screen {
            Screen::Review => review_list(&self.snapshot.marked, &self.selected, self.busy),
            Screen::History => history_panel(self.snapshot.history, self.busy),
            Screen::Swipe => return self.swipe_view(),
        };

        column![body, text(&self.status).size(14)]
            .padding(8)
            .into()
    }

    fn swipe_view(&self) -> Element<Message> {
        let Some(info) = &self.snapshot.card else {
            return self.empty_view();
        };

        let (position, total) = self.snapshot.progress;
        let handle = self
            .shown
            .as_ref()
            .filter(|shown| shown.id == info.id)
            .map(|shown| &shown.handle);

        let controls = row![
            button("← Delete")
                .on_press(Message::Decide(Decision::MarkedForDeletion))
                .padding(10),
            button("Undo").on_press(Message::Undo).padding(10),
            button("‹ Previous").on_press(Message::Previous).padding(10),
            button("Next ›").on_press(Message::Next).padding(10),
            button("Keep →")
                .on_press(Message::Decide(Decision::Kept))
                .padding(10),
        ]
        .spacing(10);

        let commit_label = if self.retry_commit {
            "Retry delete"
        } else {
            "Delete marked"
        };
        let footer = row![
            text(format!("{} / {}", position, total)).size(14),
            text(self.snapshot.stats.to_string()).size(14),
            button("Undo all").on_press(Message::UndoAll).padding(8),
            button("Review marked")
                .on_press(Message::Show(Screen::Review))
                .padding(8),
            button("History")
                .on_press(Message::Show(Screen::History))
                .padding(8),
            button(commit_label)
                .on_press_maybe((!self.busy).then_some(Message::Commit))
                .padding(8),
            button("Open folder").on_press(Message::OpenFolder).padding(8),
        ]
        .spacing(16)
        .align_y(Alignment::Center);

        let content: Column<Message> = column![
            photo_card(info, handle),
            controls,
            footer,
            text(&self.status).size(14),
        ]
        .spacing(16)
        .padding(24)
        .align_x(Alignment::Center);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .center_x(Length::Fill)
            .into()
    }

    fn empty_view(&self) -> Element<Message> {
        let headline = if self.session.is_some() {
            "No photos in this folder."
        } else {
            "Photo Swipe"
        };

        let mut content: Column<Message> = column![
            text(headline).size(40),
            button("Open Folder")
                .on_press(Message::OpenFolder)
                .padding(10),
        ]
        .spacing(20)
        .padding(40)
        .align_x(Alignment::Center);

        if self.session.is_some() {
            content = content.push(
                button("History")
                    .on_press(Message::Show(Screen::History))
                    .padding(10),
            );
        }
        content = content.push(text(&self.status).size(16));

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .center_x(Length::Fill)
            .center_y(Length::Fill)
            .into()
    }

    /// Keyboard swiping, plus a refresh whenever the window regains focus
    fn subscription(&self) -> Subscription<Message> {
        Subscription::batch([
            keyboard::on_key_press(|key, _modifiers| match key {
                Key::Named(Named::ArrowLeft) => Some(Message::Decide(Decision::MarkedForDeletion)),
                Key::Named(Named::ArrowRight) => Some(Message::Decide(Decision::Kept)),
                Key::Named(Named::ArrowUp) => Some(Message::Previous),
                Key::Named(Named::ArrowDown) => Some(Message::Next),
                Key::Named(Named::Backspace) => Some(Message::Undo),
                _ => None,
            }),
            event::listen_with(|event, _status, _window| match event {
                Event::Window(window::Event::Focused) => Some(Message::Refresh),
                _ => None,
            }),
        ])
    }

    /// Set the application theme
    fn theme(&self) -> Theme {
        Theme::Dark
    }

    fn open_library(&mut self, root: PathBuf) -> Task<Message> {
        let provider: Arc<dyn AssetProvider> = Arc::new(FolderProvider::new(root.clone()));
        let cache = ImageCache::new(
            provider.clone(),
            self.config.tier_sizes(),
            self.config.cache_capacity,
        );
        let coordinator =
            Arc::new(DeletionCoordinator::new(provider.clone()).with_cache(cache.clone()));

        self.library = Some(Library {
            provider: provider.clone(),
            cache,
            coordinator,
        });
        self.session = None;
        self.snapshot = Snapshot::default();
        self.shown = None;
        self.retry_commit = false;
        self.screen = Screen::Swipe;
        self.selected.clear();
        self.busy = true;
        self.status = format!("Loading {}…", root.display());

        let db_path = self.config.database_path_for(&root);
        Task::perform(load_library(provider, db_path), Message::Loaded)
    }

    /// Run a cursor operation if no background task holds the session.
    fn with_session(&mut self, op: impl FnOnce(&mut TriageSession)) -> Task<Message> {
        let Some(session) = &self.session else {
            return Task::none();
        };
        let Ok(mut guard) = session.0.try_lock() else {
            self.status = "Busy, try again in a moment.".to_string();
            return Task::none();
        };

        op(&mut guard);
        if let Some(warning) = guard.take_warning() {
            self.status = warning.to_string();
        }
        drop(guard);

        self.show_current()
    }

    /// Refresh the snapshot, put the current photo on screen from the cache,
    /// and fetch what is missing.
    fn show_current(&mut self) -> Task<Message> {
        let (Some(session), Some(library)) = (&self.session, &self.library) else {
            return Task::none();
        };
        let Ok(guard) = session.0.try_lock() else {
            return Task::none();
        };

        self.snapshot = Snapshot::capture(&guard);
        let Some(current) = guard.current().map(|item| item.id.clone()) else {
            self.shown = None;
            return Task::none();
        };
        let len = guard.catalog().len();
        let upcoming: Vec<String> = (1..=self.config.prefetch_ahead.min(len.saturating_sub(1)))
            .filter_map(|k| guard.catalog().get((guard.index() + k) % len))
            .map(|item| item.id.clone())
            .collect();
        drop(guard);

        let cache = library.cache.clone();
        let mut tasks = Vec::new();

        if self.shown.as_ref().map(|s| &s.id) != Some(&current) {
            self.shown = None;
        }
        // Full tier first; the thumbnail only fills in while it loads
        for tier in [Tier::Full, Tier::Thumbnail] {
            if let CacheLookup::Image(image) = cache.get(&current, tier) {
                self.shown = Some(Shown {
                    id: current.clone(),
                    tier,
                    handle: Handle::from_rgba(image.width, image.height, image.pixels.clone()),
                });
                break;
            }

            let (cache, id) = (cache.clone(), current.clone());
            tasks.push(Task::perform(
                async move { cache.request(&id, tier).await },
                {
                    let id = current.clone();
                    move |result| Message::ImageLoaded(id.clone(), tier, result)
                },
            ));
        }

        if !upcoming.is_empty() {
            tasks.push(
                Task::perform(
                    async move {
                        for id in upcoming {
                            cache.prefetch(&id, Tier::Full);
                        }
                    },
                    |_| (),
                )
                .discard(),
            );
        }

        Task::batch(tasks)
    }
}

/// Open the triage store for a library and resume a session on it.
/// Falls back to an in-memory store when the database cannot be opened.
async fn load_library(
    provider: Arc<dyn AssetProvider>,
    db_path: PathBuf,
) -> Result<LoadedLibrary, TriageError> {
    let opened = tokio::task::spawn_blocking(move || {
        SqliteSubstrate::open(&db_path).and_then(|db| TriageStore::open(Box::new(db)))
    })
    .await;

    let (store, warning) = match opened {
        Ok(Ok(store)) => (store, None),
        Ok(Err(e)) => {
            let warning = TriageError::from(e);
            tracing::warn!("⚠️  {}", warning);
            (TriageStore::in_memory(), Some(warning))
        }
        Err(e) => {
            let warning = TriageError::StoreUnavailable {
                reason: format!("Task join error: {}", e),
            };
            (TriageStore::in_memory(), Some(warning))
        }
    };

    let session = TriageSession::open(provider.as_ref(), Arc::new(store)).await?;
    Ok(LoadedLibrary {
        session: SharedSession(Arc::new(Mutex::new(session))),
        warning,
    })
}

fn main() -> iced::Result {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    if let Some(e) = config_error {
        tracing::warn!("⚠️  Using default config: {}", e);
    }
    tracing::info!("🎨 Photo Swipe starting");

    iced::application("Photo Swipe", PhotoSwipe::update, PhotoSwipe::view)
        .theme(PhotoSwipe::theme)
        .subscription(PhotoSwipe::subscription)
        .centered()
        .run_with(move || PhotoSwipe::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use photo_swipe::media::MemoryProvider;

    fn app_with(session: TriageSession) -> PhotoSwipe {
        let (mut app, _) = PhotoSwipe::new(Config::default());
        app.busy = false;
        app.session = Some(SharedSession(Arc::new(Mutex::new(session))));
        let provider: Arc<dyn AssetProvider> = Arc::new(MemoryProvider::with_photos(["a"]));
        let cache = ImageCache::new(provider.clone(), Default::default(), 4);
        app.library = Some(Library {
            coordinator: Arc::new(DeletionCoordinator::new(provider.clone())),
            provider,
            cache,
        });
        let _ = app.show_current();
        app
    }

    async fn session_over(photos: &[&str]) -> TriageSession {
        let provider = MemoryProvider::with_photos(photos.iter().copied());
        TriageSession::open(&provider, Arc::new(TriageStore::in_memory()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_card_stays_while_session_is_busy() {
        let mut app = app_with(session_over(&["a", "b"]).await);
        assert_eq!(app.snapshot.current_id(), Some("a"));

        let session = app.session.clone().unwrap();
        let _held = session.0.lock().await;

        // A commit or refresh in flight must not blank the swipe screen
        assert_eq!(app.snapshot.current_id(), Some("a"));
        let _ = app.update(Message::Decide(Decision::Kept));
        assert_eq!(app.snapshot.current_id(), Some("a"));
        assert!(app.status.starts_with("Busy"));
    }

    #[tokio::test]
    async fn test_full_tier_failure_keeps_thumbnail_quiet() {
        let mut app = app_with(session_over(&["a"]).await);
        app.status = "ready".to_string();

        let thumbnail = Arc::new(photo_swipe::media::DecodedImage {
            width: 1,
            height: 1,
            pixels: vec![0, 0, 0, 255],
        });
        let _ = app.update(Message::ImageLoaded("a".into(), Tier::Thumbnail, Ok(thumbnail)));

        let failure = TriageError::ImageLoadFailed {
            id: "a".into(),
            tier: Tier::Full,
            reason: "offline".into(),
        };
        let _ = app.update(Message::ImageLoaded("a".into(), Tier::Full, Err(failure.clone())));
        assert_eq!(app.status, "ready");
        assert_eq!(app.shown.as_ref().map(|s| s.tier), Some(Tier::Thumbnail));

        // With nothing on screen the failure is reported
        app.shown = None;
        let _ = app.update(Message::ImageLoaded("a".into(), Tier::Full, Err(failure.clone())));
        assert_eq!(app.status, failure.to_string());
    }

    #[test]
    fn test_only_permission_errors_ask_for_another_folder() {
        let (mut app, _) = PhotoSwipe::new(Config::default());

        let denied = TriageError::PermissionDenied {
            status: photo_swipe::Authorization::Denied,
        };
        let _ = app.update(Message::Loaded(Err(denied)));
        assert!(!app.busy);
        assert!(app.status.ends_with("Choose a folder you can read."));

        let outage = TriageError::StoreUnavailable {
            reason: "disk full".into(),
        };
        let _ = app.update(Message::Loaded(Err(outage.clone())));
        assert_eq!(app.status, outage.to_string());
    }

    #[tokio::test]
    async fn test_history_clear_and_select_all() {
        let mut session = session_over(&["a", "b", "c"]).await;
        session.decide(Decision::MarkedForDeletion);
        session.decide(Decision::MarkedForDeletion);
        session.decide(Decision::Kept);
        let mut app = app_with(session);
        assert_eq!(app.snapshot.history, TriageStats { kept: 1, marked: 2 });

        let _ = app.update(Message::Show(Screen::Review));
        let _ = app.update(Message::SelectAll(true));
        assert_eq!(app.selected.len(), 2);
        let _ = app.update(Message::SelectAll(false));
        assert!(app.selected.is_empty());

        let _ = app.update(Message::ClearMarked);
        assert_eq!(app.snapshot.history, TriageStats { kept: 1, marked: 0 });
        assert!(app.snapshot.marked.is_empty());

        let _ = app.update(Message::ClearKept);
        assert_eq!(app.snapshot.history, TriageStats::default());
    }
}
