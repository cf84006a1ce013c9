mod actions;
pub mod core;
mod logging;
pub mod mux;
pub mod signer;
mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use crate::core::channel::{ChannelMessage, ChannelStatus};
pub use crate::core::config::{load_app_config, AppConfig, ConfiguredRelay, APP_CONFIG_FILE};
pub use crate::core::config_store::{Lang, MemoryStore, PinnedChannel, SettingsStore};
pub use crate::core::directory::Channel;
pub use crate::core::followee::{SimpleNote, TimelineMessage};
pub use crate::core::profile::{Profile, ProfileLookup, ProfileSource};
pub use crate::core::Services;
pub use logging::init_logging;
pub use state::*;
pub use updates::*;

pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Handle to the app actor. Cheap calls only: state reads and non-blocking dispatch.
pub struct GarnetApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

impl GarnetApp {
    pub fn new(data_dir: String, services: Services) -> Arc<Self> {
        logging::init_logging(&data_dir);
        let store = crate::core::open_settings_store(&data_dir);
        Self::spawn(data_dir, services, store)
    }

    /// Like [`GarnetApp::new`] but with a caller-supplied settings store.
    pub fn with_store(
        data_dir: String,
        services: Services,
        store: Box<dyn SettingsStore>,
    ) -> Arc<Self> {
        logging::init_logging(&data_dir);
        Self::spawn(data_dir, services, store)
    }

    fn spawn(data_dir: String, services: Services, store: Box<dyn SettingsStore>) -> Arc<Self> {
        tracing::info!(data_dir = %data_dir, "GarnetApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let (ready_tx, ready_rx) = flume::bounded::<()>(1);
        thread::spawn(move || {
            let mut core = crate::core::AppCore::with_store(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                services,
                store,
            );
            let _ = ready_tx.send(());
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });
        // The restored session must be visible to the first `state()` call.
        let _ = ready_rx.recv();

        let _ = core_tx.send(CoreMsg::Action(AppAction::Foregrounded));

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
