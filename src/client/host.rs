use crate::core::Shell;

use async_trait::async_trait;
use std::time::Duration;

/// Whatever is displaying the page being kept fresh.
#[async_trait]
pub trait PageHost: Send {
    /// Fully reloads the page.
    async fn reload(&mut self);

    /// Reports an event stream error.
    fn log_error(&mut self, err: &str) {
        tracing::error!("eavesdrop sse error: {err}");
    }
}

/// Host that only logs reloads.
#[derive(Debug, Default)]
pub struct LogHost {
    reloads: usize,
}

impl LogHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reloads(&self) -> usize {
        self.reloads
    }
}

#[async_trait]
impl PageHost for LogHost {
    async fn reload(&mut self) {
        self.reloads += 1;
        tracing::info!("refresh received, reloading page");
    }
}

/// Host that runs a shell command on every reload, for clients that are not
/// browsers.
#[derive(Debug)]
pub struct CommandHost {
    command: String,
    shell: Shell,
}

impl CommandHost {
    /// # Arguments
    /// * `command` - Shell command run on each reload.
    /// * `timeout` - Maximum run time of the command before it is killed.
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            shell: Shell::new(timeout, timeout),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl PageHost for CommandHost {
    async fn reload(&mut self) {
        tracing::info!("refresh received, running '{}'", self.command);
        match self.shell.exec(&self.command).await {
            Ok(output) if !output.is_empty() => tracing::info!("{output}"),
            Ok(_) => {}
            Err(e) => tracing::error!("reload command error: {e:#}"),
        }
    }
}
