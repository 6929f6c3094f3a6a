mod cli;

use std::{
    io::{self, BufRead, Write},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use cli::{parse_command, Command, HELP};
use freetune::{
    app_bootstrap::services::{spawn_background_services, BackgroundServicesConfig},
    asset_fetcher::{AssetFetcher, HttpAssetSource},
    backends::ricuo::RicuoSearchAdapter,
    config::{self, Config},
    db_manager::{DbManager, FavoriteEntry},
    fetch_coordinator::FetchCoordinator,
    library::library_manager::LibraryComponents,
    playback::LoggingTransport,
    protocol::{FetchMessage, LibraryMessage, Message, PlaybackMessage},
    search_session::SearchSession,
    track::TrackRecord,
};
use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

const BUS_CAPACITY: usize = 1024;
const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// What the terminal currently shows, so row numbers can be resolved.
#[derive(Default)]
struct ViewState {
    results: Vec<TrackRecord>,
    favorites: Vec<FavoriteEntry>,
    shutdown_complete: bool,
}

fn load_config() -> Config {
    let Some(config_dir) = config::default_config_dir() else {
        warn!("No config directory available; using defaults");
        return Config::default();
    };
    match config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Failed to load {}: {}; using defaults",
                config::config_file_path(&config_dir).display(),
                err
            );
            Config::default()
        }
    }
}

fn print_favorites(favorites: &[FavoriteEntry]) {
    if favorites.is_empty() {
        println!("no favorites yet");
        return;
    }
    for entry in favorites {
        println!(
            "  [{}] {} - {} (lyrics: {}, music: {}) added {}",
            entry.id, entry.title, entry.author, entry.lyricist, entry.composer, entry.created_at
        );
    }
}

fn print_notification(message: &Message, view: &Mutex<ViewState>) {
    match message {
        Message::Library(LibraryMessage::SearchCompleted {
            query, page, tracks, ..
        }) => {
            println!("results for '{}' (page {}):", query, page);
            for (row, track) in tracks.iter().enumerate() {
                println!("  {:>2}. {}", row + 1, track.display_label());
            }
            if tracks.is_empty() {
                println!("  no songs found");
            }
            view.lock().expect("view lock poisoned").results = tracks.clone();
        }
        Message::Library(LibraryMessage::SearchFailed { query, page, error }) => {
            println!("search '{}' page {} failed: {}", query, page, error);
        }
        Message::Library(LibraryMessage::TrackCached { track, .. }) => {
            println!("cached {}", track.display_label());
        }
        Message::Library(LibraryMessage::TrackDownloaded { track, path }) => {
            println!("downloaded {} to {}", track.display_label(), path.display());
        }
        Message::Library(LibraryMessage::FavoriteAdded { id, track }) => {
            println!("favorited [{}] {}", id, track.display_label());
        }
        Message::Library(LibraryMessage::FavoritesBatchAdded { stored, rejected }) => {
            println!("favorited {} tracks ({} unavailable)", stored, rejected);
        }
        Message::Library(LibraryMessage::FavoritesUpdated(entries)) => {
            view.lock().expect("view lock poisoned").favorites = entries.clone();
        }
        Message::Library(LibraryMessage::FavoritesLoaded(entries)) => {
            println!("favorites:");
            print_favorites(entries);
            view.lock().expect("view lock poisoned").favorites = entries.clone();
        }
        Message::Library(LibraryMessage::OperationFailed {
            action,
            kind,
            detail,
        }) => {
            println!("{:?} failed: {}", action, kind.message());
            debug!("{:?} failure detail: {}", action, detail);
        }
        Message::Library(LibraryMessage::ShutdownComplete) => {
            view.lock().expect("view lock poisoned").shutdown_complete = true;
        }
        Message::Fetch(FetchMessage::Failed {
            correlation_id,
            error,
            ..
        }) => {
            debug!("thumbnail for row {} unavailable: {}", correlation_id + 1, error);
        }
        Message::Playback(PlaybackMessage::Started { path }) => {
            println!("now playing {}", path.display());
        }
        Message::Playback(PlaybackMessage::Paused) => println!("paused"),
        Message::Playback(PlaybackMessage::Resumed) => println!("resumed"),
        Message::Playback(PlaybackMessage::Stopped) => println!("stopped"),
        Message::Playback(PlaybackMessage::Progress {
            position_ms,
            duration_ms,
            percent,
        }) => {
            println!(
                "{}:{:02} / {}:{:02} ({}%)",
                position_ms / 60_000,
                position_ms / 1_000 % 60,
                duration_ms / 60_000,
                duration_ms / 1_000 % 60,
                percent
            );
        }
        _ => {}
    }
}

fn track_at_row(view: &Mutex<ViewState>, row: usize) -> Option<TrackRecord> {
    view.lock()
        .expect("view lock poisoned")
        .results
        .get(row - 1)
        .cloned()
}

fn favorite_by_id(view: &Mutex<ViewState>, id: i64) -> Option<TrackRecord> {
    view.lock()
        .expect("view lock poisoned")
        .favorites
        .iter()
        .find(|entry| entry.id == id)
        .map(FavoriteEntry::to_track)
}

/// Maps a command onto a bus request. `None` when there is nothing to post.
fn request_for(command: Command, view: &Mutex<ViewState>) -> Option<LibraryMessage> {
    let missing_row = |row: usize| {
        println!("no result row {row}; run a search first");
        None
    };
    match command {
        Command::Search { query, page } => Some(LibraryMessage::Search { query, page }),
        Command::NextPage => Some(LibraryMessage::NextPage),
        Command::PreviousPage => Some(LibraryMessage::PreviousPage),
        Command::Play(row) => match track_at_row(view, row) {
            Some(track) => Some(LibraryMessage::PlayTrack(track)),
            None => missing_row(row),
        },
        Command::Favorite(row) => match track_at_row(view, row) {
            Some(track) => Some(LibraryMessage::FavoriteTrack(track)),
            None => missing_row(row),
        },
        Command::FavoriteAll => {
            let results = view.lock().expect("view lock poisoned").results.clone();
            if results.is_empty() {
                println!("no results; run a search first");
                None
            } else {
                Some(LibraryMessage::FavoriteTracks(results))
            }
        }
        Command::Download(row) => match track_at_row(view, row) {
            Some(track) => Some(LibraryMessage::DownloadTrack(track)),
            None => missing_row(row),
        },
        Command::ListFavorites => Some(LibraryMessage::LoadFavorites),
        Command::PlayFavorite(id) => match favorite_by_id(view, id) {
            Some(track) => Some(LibraryMessage::PlayTrack(track)),
            None => {
                println!("no favorite with id {id}; run 'favs' first");
                None
            }
        },
        Command::RemoveFavorite(id) => Some(LibraryMessage::RemoveFavorite(id)),
        Command::TogglePlayback => Some(LibraryMessage::TogglePlayback),
        Command::StopPlayback => Some(LibraryMessage::StopPlayback),
        Command::Volume(volume) => Some(LibraryMessage::SetVolume(volume)),
        Command::Seek(percent) => Some(LibraryMessage::SeekToProgress(percent)),
        Command::Status => Some(LibraryMessage::QueryProgress),
        Command::Help => {
            println!("{HELP}");
            None
        }
        Command::Quit => Some(LibraryMessage::Shutdown),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();
    log::set_max_level(log::LevelFilter::Info);

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = load_config();
    log::set_max_level(config.logging.level_filter());

    let paths = config.paths.clone();
    for dir in [&paths.songs_dir, &paths.cache_dir, &paths.image_dir] {
        std::fs::create_dir_all(dir)
            .map_err(|err| format!("cannot create directory {}: {}", dir.display(), err))?;
    }
    let db_manager = DbManager::open(&paths.database_path).map_err(|err| {
        format!(
            "cannot open database {}: {}",
            paths.database_path.display(),
            err
        )
    })?;

    let (bus_sender, _) = broadcast::channel(BUS_CAPACITY);
    let mut notifications = bus_sender.subscribe();

    let fetcher = Arc::new(AssetFetcher::new(
        Arc::new(HttpAssetSource::new(config.provider.user_agent.clone())),
        config.fetch.audio_timeout(),
        config.fetch.image_timeout(),
    ));
    let coordinator = FetchCoordinator::new(
        Arc::clone(&fetcher),
        config.fetch.worker_count(),
        bus_sender.clone(),
    )?;
    let search_session = SearchSession::new(Box::new(RicuoSearchAdapter::new(&config.provider)));

    let library_thread = spawn_background_services(BackgroundServicesConfig {
        bus_sender: bus_sender.clone(),
        db_manager,
        components: LibraryComponents {
            paths,
            search_session,
            fetcher,
            coordinator,
            transport: Box::new(LoggingTransport::new()),
        },
        load_favorites_on_start: true,
    })?;

    let view = Arc::new(Mutex::new(ViewState::default()));
    let printer_view = Arc::clone(&view);
    let printer = thread::Builder::new()
        .name("notifications".to_string())
        .spawn(move || loop {
            match notifications.blocking_recv() {
                Ok(message) => {
                    print_notification(&message, &printer_view);
                    if matches!(
                        message,
                        Message::Library(LibraryMessage::ShutdownComplete)
                    ) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification printer lagged by {} messages", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        })?;

    info!("freetune ready; type 'help' for commands");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut shutdown_requested = false;
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let command = match parse_command(&line?) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        let quit = command == Command::Quit;
        if let Some(request) = request_for(command, &view) {
            let _ = bus_sender.send(Message::Library(request));
        }
        if quit {
            shutdown_requested = true;
            break;
        }
    }

    if !shutdown_requested {
        let _ = bus_sender.send(Message::Library(LibraryMessage::Shutdown));
    }
    let deadline = Instant::now() + SHUTDOWN_WAIT;
    while !view.lock().expect("view lock poisoned").shutdown_complete {
        if Instant::now() > deadline || printer.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    if library_thread.join().is_err() {
        warn!("Library manager thread did not exit cleanly");
    }
    drop(bus_sender);
    let _ = printer.join();
    info!("freetune stopped");
    Ok(())
}
