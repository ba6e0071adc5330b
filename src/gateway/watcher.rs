//! File-system watch on the declarative spec file.
//!
//! The parent directory is watched rather than the file itself, so editors that write
//! through a temporary file and rename it are still observed, as is a file created after
//! startup. Create, data write and remove events touching the file are coalesced: a
//! single write usually arrives as several events, so one [`RestartTrigger::SpecFile`]
//! is sent once no further event has arrived for the debounce window.

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::metrics::RestartTrigger;
use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keeps the OS watch alive; dropping it stops delivery of events
pub struct SpecFileWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl SpecFileWatcher {
    pub fn spawn(
        path: &Path,
        debounce: Duration,
        triggers: mpsc::Sender<RestartTrigger>,
        shutdown: CancellationToken,
    ) -> GatewayResult<Self> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| GatewayError::config(format!("Invalid spec file path: {}", path.display())))?;
        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!(error = %e, "Spec file watcher error"),
        })?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), debounce = ?debounce, "Watching declarative spec file");

        let task = tokio::spawn(async move {
            'events: loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                if !is_restart_event(&event, &file_name) {
                    continue;
                }
                debug!(kind = ?event.kind, "Spec file changed");

                let mut coalesced = 1usize;
                let quiet = tokio::time::sleep(debounce);
                tokio::pin!(quiet);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'events,
                        _ = &mut quiet => break,
                        event = rx.recv() => match event {
                            Some(event) if is_restart_event(&event, &file_name) => {
                                coalesced += 1;
                                quiet.as_mut().reset(tokio::time::Instant::now() + debounce);
                            }
                            Some(_) => {}
                            None => break,
                        },
                    }
                }

                debug!(events = coalesced, "Requesting restart for spec file change");
                if triggers.send(RestartTrigger::SpecFile).await.is_err() {
                    break;
                }
            }
            debug!("Spec file watcher stopped");
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Create, write or remove of the watched file; metadata and access events are ignored
fn is_restart_event(event: &Event, file_name: &OsString) -> bool {
    let relevant = match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };

    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
