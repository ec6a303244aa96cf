//! Spectator mode: background camera hopper and popup watcher.
//!
//! Both loops submit through the shared [`GameConnection`] like any other
//! caller, so they only hold its lock for the duration of one request.

mod camera;
mod popup;

pub use camera::{look_at_script, CameraController, CameraEvent, DEFAULT_CAPACITY};
pub use popup::{PopupStatus, PopupTracker, DISMISS_SCRIPT, STATUS_SCRIPT};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::GameConnection;

#[derive(Debug, Clone, Copy)]
pub struct SpectatorTiming {
    /// Popup poll period and critical-gate re-check period.
    pub poll_interval: Duration,
    /// How long the camera stays on a location.
    pub dwell: Duration,
    /// How long a popup may stay visible before it is dismissed.
    pub popup_grace: Duration,
    pub request_timeout: Duration,
}

impl Default for SpectatorTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            dwell: Duration::from_secs(1),
            popup_grace: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Spectator {
    conn: Arc<GameConnection>,
    camera: Arc<CameraController>,
    timing: SpectatorTiming,
    running: Mutex<Option<Running>>,
}

impl Spectator {
    pub fn new(conn: Arc<GameConnection>, timing: SpectatorTiming) -> Self {
        Self {
            conn,
            camera: Arc::new(CameraController::default()),
            timing,
            running: Mutex::new(None),
        }
    }

    pub fn camera(&self) -> &Arc<CameraController> {
        &self.camera
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Spawn both loops. Returns false if they were already running.
    pub fn start(&self) -> bool {
        let mut running = self.lock();
        if running.is_some() {
            return false;
        }

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let tasks = vec![
            tokio::spawn(camera::run_camera(
                self.conn.clone(),
                self.camera.clone(),
                self.timing,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(popup::run_popup_watcher(
                self.conn.clone(),
                self.camera.clone(),
                self.timing,
                shutdown_tx.subscribe(),
            )),
        ];
        *running = Some(Running { shutdown_tx, tasks });
        info!("Spectator started");
        true
    }

    /// Signal both loops and wait for them to finish their current request.
    /// Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let running = self.lock().take();
        let Some(running) = running else {
            return false;
        };
        let _ = running.shutdown_tx.send(());
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Spectator task ended abnormally");
            }
        }
        self.camera.clear();
        self.camera.set_critical(false);
        info!("Spectator stopped");
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
