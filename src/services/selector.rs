//! Non-interactive content selection

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::capture::{CaptureSource, ContentFilter};
use crate::engine::ContentSelector;
use crate::Result;

/// Picks the target from values given up front (CLI flags)
#[derive(Debug, Default)]
pub struct DirectContentSelector {
    pub display_index: Option<u32>,
    pub window_id: Option<u64>,
    pub application: Option<String>,
    cancelled: AtomicBool,
}

impl DirectContentSelector {
    pub fn new(
        display_index: Option<u32>,
        window_id: Option<u64>,
        application: Option<String>,
    ) -> Self {
        Self {
            display_index,
            window_id,
            application,
            cancelled: AtomicBool::new(false),
        }
    }
}

/// Active X11 window, if xdotool can tell us
async fn active_window() -> Option<u64> {
    let output = Command::new("xdotool")
        .arg("getactivewindow")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

#[async_trait]
impl ContentSelector for DirectContentSelector {
    async fn select_content(&self, source: CaptureSource) -> Result<Option<ContentFilter>> {
        self.cancelled.store(false, Ordering::SeqCst);
        let display = self.display_index.unwrap_or(0);

        let filter = match source {
            CaptureSource::Display => Some(ContentFilter::Display { index: display }),
            CaptureSource::Window => {
                let id = match self.window_id {
                    Some(id) => Some(id),
                    None => active_window().await,
                };
                if id.is_none() {
                    warn!("No window id given and no active window found");
                }
                id.map(|id| ContentFilter::Window { id, title: None })
            }
            CaptureSource::Application => match &self.application {
                Some(name) => Some(ContentFilter::Application {
                    name: name.clone(),
                    display,
                }),
                None => {
                    warn!("No application name given");
                    None
                }
            },
        };

        if self.cancelled.load(Ordering::SeqCst) {
            debug!("Selection cancelled");
            return Ok(None);
        }
        Ok(filter)
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
