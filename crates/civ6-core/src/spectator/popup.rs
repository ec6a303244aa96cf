//! Popup watcher: dismisses informational popups that stay up too long.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use super::camera::CameraController;
use super::SpectatorTiming;
use crate::connection::GameConnection;

/// Prints `CRITICAL` when a screen needing a decision is open, else `POPUP`
/// when a dismissable popup is visible, else `CLEAR`.
pub const STATUS_SCRIPT: &str = r#"
local function shown(path)
  local c = ContextPtr:LookUpControl(path)
  return c ~= nil and not c:IsHidden()
end
local status = "CLEAR"
for _, p in ipairs({"/InGame/DiplomacyActionView", "/InGame/DiplomacyDealView", "/InGame/LeaderScene"}) do
  if shown(p) then status = "CRITICAL" end
end
if status == "CLEAR" then
  for _, p in ipairs({"/InGame/NaturalWonderPopup", "/InGame/WonderBuiltPopup", "/InGame/TechCivicCompletedPopup",
                      "/InGame/BoostUnlockedPopup", "/InGame/EraCompletePopup", "/InGame/GreatWorkShowcase"}) do
    if shown(p) then status = "POPUP" end
  end
end
print(status)
print("---END---")
"#;

pub const DISMISS_SCRIPT: &str = r#"
for _, p in ipairs({"/InGame/NaturalWonderPopup", "/InGame/WonderBuiltPopup", "/InGame/TechCivicCompletedPopup",
                    "/InGame/BoostUnlockedPopup", "/InGame/EraCompletePopup", "/InGame/GreatWorkShowcase"}) do
  local c = ContextPtr:LookUpControl(p)
  if c ~= nil and not c:IsHidden() then UIManager:DequeuePopup(c) end
end
print("---END---")
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupStatus {
    Clear,
    Popup,
    Critical,
}

impl PopupStatus {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "CLEAR" => Some(PopupStatus::Clear),
            "POPUP" => Some(PopupStatus::Popup),
            "CRITICAL" => Some(PopupStatus::Critical),
            _ => None,
        }
    }

    /// Last recognised status in a response.
    pub fn from_lines(lines: &[String]) -> Option<Self> {
        lines.iter().rev().find_map(|l| Self::parse(l))
    }
}

/// Tracks how long the current popup has been visible.
#[derive(Debug)]
pub struct PopupTracker {
    grace: Duration,
    first_seen: Option<Instant>,
}

impl PopupTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            first_seen: None,
        }
    }

    pub fn first_seen(&self) -> Option<Instant> {
        self.first_seen
    }

    /// Feed one poll result. Returns true when a dismissal is due.
    pub fn observe(&mut self, status: PopupStatus, now: Instant) -> bool {
        match status {
            PopupStatus::Popup => match self.first_seen {
                None => {
                    self.first_seen = Some(now);
                    false
                }
                Some(seen) if now.duration_since(seen) >= self.grace => {
                    self.first_seen = None;
                    true
                }
                Some(_) => false,
            },
            PopupStatus::Clear | PopupStatus::Critical => {
                self.first_seen = None;
                false
            }
        }
    }
}

pub(crate) async fn run_popup_watcher(
    conn: Arc<GameConnection>,
    camera: Arc<CameraController>,
    timing: SpectatorTiming,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tracker = PopupTracker::new(timing.popup_grace);
    loop {
        match conn.execute_write(STATUS_SCRIPT, timing.request_timeout).await {
            Ok(lines) => match PopupStatus::from_lines(&lines) {
                Some(status) => {
                    camera.set_critical(status == PopupStatus::Critical);
                    if tracker.observe(status, Instant::now()) {
                        match conn.execute_write(DISMISS_SCRIPT, timing.request_timeout).await {
                            Ok(_) => info!("Dismissed lingering popup"),
                            Err(e) => debug!(error = %e, "Popup dismissal failed"),
                        }
                    }
                }
                None => debug!(?lines, "Unrecognised popup status"),
            },
            Err(e) => debug!(error = %e, "Popup status poll failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(timing.poll_interval) => {}
            _ = shutdown.recv() => break,
        }
    }
    debug!("Popup watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    #[test]
    fn test_popup_dismissed_after_grace() {
        let base = Instant::now();
        let mut tracker = PopupTracker::new(Duration::from_secs(1));
        assert!(!tracker.observe(PopupStatus::Popup, at(base, 0.0)));
        assert!(!tracker.observe(PopupStatus::Popup, at(base, 0.5)));
        assert!(tracker.observe(PopupStatus::Popup, at(base, 1.0)));
        assert!(tracker.first_seen().is_none());
    }

    #[test]
    fn test_clear_resets_first_seen() {
        let base = Instant::now();
        let mut tracker = PopupTracker::new(Duration::from_secs(1));
        tracker.observe(PopupStatus::Popup, at(base, 0.0));
        assert!(!tracker.observe(PopupStatus::Clear, at(base, 0.5)));
        assert!(tracker.first_seen().is_none());
        // A new popup starts its own grace period.
        assert!(!tracker.observe(PopupStatus::Popup, at(base, 1.0)));
        assert!(!tracker.observe(PopupStatus::Popup, at(base, 1.5)));
        assert!(tracker.observe(PopupStatus::Popup, at(base, 2.0)));
    }

    #[test]
    fn test_critical_resets_first_seen() {
        let base = Instant::now();
        let mut tracker = PopupTracker::new(Duration::from_secs(1));
        tracker.observe(PopupStatus::Popup, at(base, 0.0));
        assert!(!tracker.observe(PopupStatus::Critical, at(base, 1.2)));
        assert!(tracker.first_seen().is_none());
    }

    #[test]
    fn test_status_from_lines() {
        let lines = vec!["noise".to_string(), " POPUP ".to_string()];
        assert_eq!(PopupStatus::from_lines(&lines), Some(PopupStatus::Popup));
        assert_eq!(PopupStatus::from_lines(&[]), None);
    }
}
