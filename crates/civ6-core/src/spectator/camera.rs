//! Camera hopper: a small queue of map locations the in-game camera visits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, Notify};
use tracing::debug;

use super::SpectatorTiming;
use crate::connection::GameConnection;

pub const DEFAULT_CAPACITY: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraEvent {
    pub x: i32,
    pub y: i32,
    pub label: String,
}

pub fn look_at_script(x: i32, y: i32) -> String {
    format!(
        "if Map.GetPlot({x}, {y}) ~= nil then UI.LookAtPlot({x}, {y}) end\nprint(\"---END---\")"
    )
}

/// Bounded drop-oldest queue plus the critical-screen gate.
pub struct CameraController {
    queue: Mutex<VecDeque<CameraEvent>>,
    capacity: usize,
    notify: Notify,
    critical: AtomicBool,
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CameraController {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            critical: AtomicBool::new(false),
        }
    }

    pub fn push(&self, x: i32, y: i32, label: impl Into<String>) {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                debug!(x = dropped.x, y = dropped.y, "Camera queue full, dropping oldest");
            }
        }
        queue.push_back(CameraEvent {
            x,
            y,
            label: label.into(),
        });
        drop(queue);
        self.notify.notify_one();
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn pop(&self) -> Option<CameraEvent> {
        self.lock().pop_front()
    }

    /// Wait until an event is queued and take it.
    pub async fn next_event(&self) -> CameraEvent {
        loop {
            if let Some(event) = self.pop() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn set_critical(&self, critical: bool) {
        self.critical.store(critical, Ordering::SeqCst);
    }

    pub fn is_critical(&self) -> bool {
        self.critical.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CameraEvent>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Visit queued locations until shutdown. Errors are logged and skipped.
pub(crate) async fn run_camera(
    conn: Arc<GameConnection>,
    camera: Arc<CameraController>,
    timing: SpectatorTiming,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            event = camera.next_event() => event,
            _ = shutdown.recv() => break,
        };

        while camera.is_critical() {
            tokio::select! {
                _ = tokio::time::sleep(timing.poll_interval) => {}
                _ = shutdown.recv() => return,
            }
        }

        let script = look_at_script(event.x, event.y);
        if let Err(e) = conn.execute_write(&script, timing.request_timeout).await {
            debug!(error = %e, x = event.x, y = event.y, "Camera move failed");
        } else {
            debug!(x = event.x, y = event.y, label = %event.label, "Camera moved");
        }

        tokio::select! {
            _ = tokio::time::sleep(timing.dwell) => {}
            _ = shutdown.recv() => break,
        }
    }
    debug!("Camera loop stopped");
}
