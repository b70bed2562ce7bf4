//! Filesystem watching for development mode.
//!
//! Each watched packet gets its own notify watchers and a task draining
//! their events one at a time, so edits within one packet never reload
//! concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::engine::Porter;
use crate::error::Result;
use crate::graph::PacketIdx;

/// Live watchers of one engine.
#[derive(Debug)]
pub(crate) struct Watchers {
    _watchers: Vec<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watchers {
    fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Hidden files and directories (editor swap files, `.git`) under `root`.
fn is_hidden(path: &Path, root: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return true;
    };
    relative.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
    })
}

fn watch_dir(dir: &Path, tx: mpsc::UnboundedSender<PathBuf>) -> Result<RecommendedWatcher> {
    let root = dir.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) {
                return;
            }
            for path in event.paths {
                if !is_hidden(&path, &root) {
                    // the receiver is gone once the engine is destroyed
                    let _ = tx.send(path);
                }
            }
        }
        Err(e) => error!("watch error: {e}"),
    })?;
    watcher.watch(dir, RecursiveMode::Recursive)?;
    debug!("watching {}", dir.display());
    Ok(watcher)
}

impl Porter {
    /// Watch the root packet paths and every packet with a transpiler,
    /// reloading changed modules. Calling it twice is a no-op.
    pub async fn watch(&self) -> Result<()> {
        self.ready(false).await?;
        if self.inner.watchers.lock().is_some() {
            return Ok(());
        }

        let groups: Vec<Vec<PathBuf>> = self.with_graph(|graph| {
            graph
                .all(PacketIdx::ROOT)
                .into_iter()
                .map(|idx| graph.packet(idx))
                .filter(|packet| packet.is_root() || packet.transpile)
                .map(|packet| packet.paths.clone())
                .collect()
        });

        let mut watchers = Vec::new();
        let mut tasks = Vec::new();
        for paths in groups {
            let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
            for dir in &paths {
                if self.inner.runtime.is_dir(dir).await {
                    watchers.push(watch_dir(dir, tx.clone())?);
                }
            }

            let engine = Arc::downgrade(&self.inner);
            tasks.push(tokio::spawn(async move {
                while let Some(path) = rx.recv().await {
                    let Some(engine) = engine.upgrade() else {
                        break;
                    };
                    if let Err(e) = engine.handle_change(&path).await {
                        error!("failed to reload {}: {e}", path.display());
                    }
                }
            }));
        }

        *self.inner.watchers.lock() = Some(Watchers {
            _watchers: watchers,
            tasks,
        });
        Ok(())
    }

    /// Stop every watcher installed by [`Porter::watch`].
    pub fn destroy(&self) {
        if let Some(watchers) = self.inner.watchers.lock().take() {
            watchers.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_paths_are_ignored() {
        let root = Path::new("/project/components");
        assert!(is_hidden(Path::new("/project/components/.home.js.swp"), root));
        assert!(is_hidden(Path::new("/project/components/.git/HEAD"), root));
        assert!(!is_hidden(Path::new("/project/components/home.js"), root));
        assert!(is_hidden(Path::new("/elsewhere/home.js"), root));
    }
}
