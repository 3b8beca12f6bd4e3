use super::excluder::Excluder;
use super::paths::is_child;
use super::watcher::Watcher;
use crate::config::Config;
use crate::proxy::{Proxy, ProxyHandle, Refresher};

use anyhow::Context;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use walkdir::WalkDir;

/// Pause between starting watchers, so start up runs happen in config order.
const STARTUP_DELAY: Duration = Duration::from_millis(50);

const TMP_DIR: &str = "tmp";

#[derive(Debug, Clone)]
pub enum ControlMessage {
    Terminate,
}

/// Owns the file system watch set and routes file changes to watchers.
pub struct EventManager {
    root: PathBuf,
    cleanup_tmp: bool,
    fs_watcher: RecommendedWatcher,
    events: flume::Receiver<notify::Result<Event>>,
    excluder: Excluder,
    watching: HashSet<PathBuf>,
    stat_cache: HashMap<PathBuf, bool>,
    watchers: Vec<Arc<Watcher>>,
    refresher: Option<Refresher>,
    proxy: Option<ProxyHandle>,
}

impl EventManager {
    /// Watches the project tree, starts the proxy if enabled and starts every
    /// watcher in config order.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let root = std::fs::canonicalize(&config.root_dir)
            .with_context(|| format!("failed to resolve root directory '{}'", config.root_dir))?;
        let excluder = Excluder::new(&root, &config.exclude)?;

        if config.tmp {
            tokio::fs::create_dir_all(root.join(TMP_DIR))
                .await
                .context("failed to create tmp directory")?;
        }

        let (tx, events) = flume::unbounded();
        let fs_watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })
        .context("failed to create file watcher")?;

        let mut manager = Self {
            root: root.clone(),
            cleanup_tmp: config.cleanup_tmp,
            fs_watcher,
            events,
            excluder,
            watching: HashSet::new(),
            stat_cache: HashMap::new(),
            watchers: Vec::new(),
            refresher: None,
            proxy: None,
        };

        manager
            .fs_watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        manager.handle_new_dir(&root);

        if config.proxy.enabled {
            let refresher = Refresher::new();
            let proxy = Proxy::new(&config.proxy, refresher.clone()).spawn().await?;
            manager.refresher = Some(refresher);
            manager.proxy = Some(proxy);
        }

        for watcher_config in &config.watchers {
            let watcher = Watcher::from_config(&root, watcher_config, manager.refresher.clone())?;
            watcher.start();
            manager.watchers.push(watcher);
            tokio::time::sleep(STARTUP_DELAY).await;
        }

        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn watched_dirs(&self) -> &HashSet<PathBuf> {
        &self.watching
    }

    pub fn refresher(&self) -> Option<&Refresher> {
        self.refresher.as_ref()
    }

    pub fn proxy_addr(&self) -> Option<std::net::SocketAddr> {
        self.proxy.as_ref().map(ProxyHandle::local_addr)
    }

    /// Processes file system events until told to terminate.
    pub async fn run(&mut self, mut control: broadcast::Receiver<ControlMessage>) {
        tracing::info!("event manager is running");
        let events = self.events.clone();

        loop {
            tokio::select! {
                message = control.recv() => {
                    match message {
                        Ok(ControlMessage::Terminate) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("event manager received terminate signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                    }
                }

                event = events.recv_async() => {
                    match event {
                        Ok(Ok(event)) => self.handle_event(event),
                        Ok(Err(e)) => tracing::error!("watch error: {e}"),
                        Err(_) => {
                            tracing::warn!("file watcher closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Routes a single file system event.
    pub fn handle_event(&mut self, event: Event) {
        if matches!(
            event.kind,
            EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_))
        ) {
            return;
        }

        for path in &event.paths {
            let Some(is_dir) = self.stat(path) else {
                continue;
            };

            if self.excluder.should_ignore(path, is_dir) {
                continue;
            }

            if is_dir {
                let structural = matches!(
                    event.kind,
                    EventKind::Create(_)
                        | EventKind::Remove(_)
                        | EventKind::Modify(ModifyKind::Any)
                        | EventKind::Modify(ModifyKind::Data(_))
                        | EventKind::Modify(ModifyKind::Name(_))
                );

                if structural {
                    if path.is_dir() {
                        self.handle_new_dir(path);
                    } else {
                        self.handle_removed_dir(path);
                    }
                }
                continue;
            }

            for watcher in &self.watchers {
                watcher.notify(path);
            }

            let gone = matches!(
                event.kind,
                EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
            ) && !path.exists();
            if gone {
                self.stat_cache.remove(path);
            }
        }
    }

    /// Whether `path` is a directory, from the cache or a fresh stat.
    fn stat(&mut self, path: &Path) -> Option<bool> {
        if let Some(is_dir) = self.stat_cache.get(path) {
            return Some(*is_dir);
        }

        let is_dir = std::fs::metadata(path).ok()?.is_dir();
        self.stat_cache.insert(path.to_path_buf(), is_dir);
        Some(is_dir)
    }

    /// Watches every directory beneath `path` that is not excluded.
    pub fn handle_new_dir(&mut self, path: &Path) {
        let mut walker = WalkDir::new(path).into_iter();

        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else {
                continue;
            };

            let is_dir = entry.file_type().is_dir();
            self.stat_cache.insert(entry.path().to_path_buf(), is_dir);

            if self.excluder.should_ignore(entry.path(), is_dir) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            if !is_dir || self.watching.contains(entry.path()) {
                continue;
            }

            if entry.path() != self.root.as_path() {
                if let Err(e) = self.fs_watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
                    tracing::error!("failed to watch {} with err {e}", entry.path().display());
                    continue;
                }
            }

            self.watching.insert(entry.path().to_path_buf());
            tracing::info!("watching {}", entry.path().display());
        }
    }

    /// Stops watching `path` and everything beneath it.
    pub fn handle_removed_dir(&mut self, path: &Path) {
        if let Err(e) = self.fs_watcher.unwatch(path) {
            // the kernel drops watches of deleted directories on its own
            if !matches!(e.kind, notify::ErrorKind::WatchNotFound) {
                tracing::debug!("failed to unwatch {} with error {e}", path.display());
            }
        }

        let children: Vec<PathBuf> = self
            .watching
            .iter()
            .filter(|watched| is_child(path, watched))
            .cloned()
            .collect();
        for child in &children {
            let _ = self.fs_watcher.unwatch(child);
            self.watching.remove(child);
        }

        self.watching.remove(path);
        self.stat_cache
            .retain(|cached, _| cached != path && !is_child(path, cached));

        tracing::info!("unwatched {}", path.display());
    }

    /// Closes every watcher, shuts the proxy down and cleans up.
    ///
    /// Failures are logged; stopping always runs to completion.
    pub async fn stop(mut self) {
        for watcher in &self.watchers {
            if let Err(e) = watcher.close().await {
                tracing::error!("{}: {e:#}", watcher.name());
            }
        }

        if let Some(proxy) = self.proxy.take() {
            if let Err(e) = proxy.close().await {
                tracing::error!("{e:#}");
            }
        }

        if self.cleanup_tmp {
            if let Err(e) = tokio::fs::remove_dir_all(self.root.join(TMP_DIR)).await {
                tracing::error!("failed to remove tmp directory: {e}");
            }
        }

        tracing::info!("event manager stopped");
    }
}
