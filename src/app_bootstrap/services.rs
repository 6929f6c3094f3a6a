use std::{
    any::Any,
    io,
    thread::{self, JoinHandle},
};

use tokio::sync::broadcast;

use crate::{
    db_manager::DbManager,
    library::library_manager::{LibraryComponents, LibraryManager},
    protocol::{LibraryMessage, Message},
};

pub struct BackgroundServicesConfig {
    pub bus_sender: broadcast::Sender<Message>,
    pub db_manager: DbManager,
    pub components: LibraryComponents,
    /// Post `LoadFavorites` as soon as the library manager is listening.
    pub load_favorites_on_start: bool,
}

pub(crate) fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

/// Starts the library manager thread. The returned handle finishes after
/// `LibraryMessage::Shutdown` has been handled.
pub fn spawn_background_services(config: BackgroundServicesConfig) -> io::Result<JoinHandle<()>> {
    let BackgroundServicesConfig {
        bus_sender,
        db_manager,
        components,
        load_favorites_on_start,
    } = config;

    let library_manager_bus_receiver = bus_sender.subscribe();
    let library_manager_bus_sender = bus_sender.clone();
    let handle = thread::Builder::new()
        .name("library-manager".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut library_manager = LibraryManager::new(
                    library_manager_bus_receiver,
                    library_manager_bus_sender,
                    db_manager,
                    components,
                );
                library_manager.run();
            }));
            if let Err(payload) = run_result {
                log::error!(
                    "LibraryManager thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    if load_favorites_on_start {
        let _ = bus_sender.send(Message::Library(LibraryMessage::LoadFavorites));
    }
    Ok(handle)
}
