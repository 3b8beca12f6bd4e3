use super::debounce::Debouncer;
use super::excluder::Excluder;
use super::paths::{clean_path, dotted_extension, relative_to};
use super::shell::Shell;
use crate::config::WatcherConfig;
use crate::proxy::Refresher;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// A named rule reacting to file changes.
///
/// On a matching change the watcher kills its service, runs its tasks in
/// order, restarts the service and optionally refreshes connected pages.
/// Bursts of changes are debounced into a single run, and runs of the same
/// watcher never overlap.
pub struct Watcher {
    name: String,
    root: PathBuf,
    exts: HashSet<String>,
    files: HashSet<PathBuf>,
    excluder: Excluder,
    tasks: Vec<String>,
    service: Option<String>,
    run_on_start: bool,
    trigger_refresh: bool,
    shell: Mutex<Shell>,
    debouncer: Debouncer,
    refresher: Option<Refresher>,
    closed: AtomicBool,
}

impl Watcher {
    pub fn from_config<P: AsRef<Path>>(
        root: P,
        config: &WatcherConfig,
        refresher: Option<Refresher>,
    ) -> anyhow::Result<Arc<Self>> {
        let root = root.as_ref();
        let excluder = Excluder::new(root, &config.exclude)?;

        let exts = config
            .file_types
            .iter()
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{ext}")
                }
            })
            .collect();

        let shell = Shell::new(
            Duration::from_millis(config.max_task_time),
            Duration::from_millis(config.max_service_timeout),
        );

        Ok(Arc::new(Self {
            name: config.name.clone(),
            root: root.to_path_buf(),
            exts,
            files: config.file_names.iter().map(clean_path).collect(),
            excluder,
            tasks: config.tasks.clone(),
            service: Some(config.service.clone()).filter(|service| !service.is_empty()),
            run_on_start: config.run_on_start,
            trigger_refresh: config.trigger_refresh,
            shell: Mutex::new(shell),
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_delay)),
            refresher,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when this watcher reacts to changes of `path`.
    pub fn matches(&self, path: &Path) -> bool {
        let by_ext = dotted_extension(path).is_some_and(|ext| self.exts.contains(&ext));
        let by_name = relative_to(&self.root, path).is_some_and(|rel| self.files.contains(&rel));

        (by_ext || by_name) && !self.excluder.should_ignore(path, false)
    }

    /// Passes a file change to the watcher. Returns whether a run was scheduled.
    pub fn notify(self: &Arc<Self>, path: &Path) -> bool {
        if !self.matches(path) {
            return false;
        }

        let watcher = Arc::clone(self);
        let path = path.to_path_buf();
        self.debouncer.run(move || async move {
            tracing::info!("{} changed", path.display());
            watcher.cycle(true).await;
        });

        true
    }

    /// Schedules the start up run if the watcher is configured for one.
    pub fn start(self: &Arc<Self>) {
        if !self.run_on_start {
            return;
        }

        let watcher = Arc::clone(self);
        self.debouncer.run(move || async move {
            watcher.cycle(false).await;
        });
    }

    async fn cycle(&self, restart: bool) {
        let mut shell = self.shell.lock().await;

        // a run that slipped past `close` must not start anything
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if restart {
            if let Err(e) = shell.kill().await {
                tracing::error!("{} kill error: {e:#}", self.name);
                return;
            }
        }

        if let Err(e) = self.run_tasks(&shell).await {
            tracing::error!("{} task error: {e:#}", self.name);
            return;
        }

        if let Err(e) = self.run_service(&mut shell).await {
            tracing::error!("{} service error: {e:#}", self.name);
            return;
        }

        if self.trigger_refresh {
            if let Some(refresher) = &self.refresher {
                refresher.refresh();
            }
        }
    }

    /// Runs every task in order, stopping at the first failure.
    pub async fn run_tasks(&self, shell: &Shell) -> anyhow::Result<()> {
        if self.tasks.is_empty() {
            return Ok(());
        }

        tracing::info!("{}: running tasks", self.name);
        for task in &self.tasks {
            let output = shell.exec(task).await?;
            if !output.is_empty() {
                tracing::info!(watcher = %self.name, "{output}");
            }
        }

        Ok(())
    }

    /// Starts the service, if there is one, without waiting for it.
    pub async fn run_service(&self, shell: &mut Shell) -> anyhow::Result<()> {
        if let Some(service) = &self.service {
            tracing::info!("{}: running service", self.name);
            shell.run(service).await?;
        }

        Ok(())
    }

    /// Drops any pending run and kills the service.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.debouncer.cancel();
        self.shell.lock().await.kill().await
    }
}
