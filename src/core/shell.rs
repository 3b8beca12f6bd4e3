use anyhow::{Context, bail};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Runs watcher commands through the platform shell.
///
/// Tasks run to completion under a deadline. At most one service runs at a
/// time and is terminated gracefully by [`Shell::kill`].
#[derive(Debug)]
pub struct Shell {
    service: Option<Child>,
    task_timeout: Duration,
    service_timeout: Duration,
}

impl Shell {
    /// # Arguments
    /// * `task_timeout` - Maximum run time of a single task before it is killed.
    /// * `service_timeout` - Grace period for the service to exit after being asked to.
    pub fn new(task_timeout: Duration, service_timeout: Duration) -> Self {
        Self {
            service: None,
            task_timeout,
            service_timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        self.service.is_some()
    }

    /// Runs `command` and waits for it, returning its trimmed combined output.
    ///
    /// A non-zero exit status or exceeding the task timeout is an error.
    pub async fn exec(&self, command: &str) -> anyhow::Result<String> {
        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(self.task_timeout, cmd.output()).await {
            Ok(output) => output.with_context(|| format!("failed to execute task '{command}'"))?,
            Err(_) => bail!(
                "task '{command}' exceeded {}ms and was cancelled",
                self.task_timeout.as_millis()
            ),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            bail!("task '{command}' failed with {}: {combined}", output.status);
        }

        Ok(combined)
    }

    /// Starts `command` without waiting for it. A service that is still
    /// running is killed first.
    pub async fn run(&mut self, command: &str) -> anyhow::Result<()> {
        self.kill().await?;

        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // own process group, so the whole tree can be signalled at once
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to execute run command '{command}'"))?;

        self.service = Some(child);
        Ok(())
    }

    /// Asks the running service to exit, forcing it after the grace period.
    pub async fn kill(&mut self) -> anyhow::Result<()> {
        let Some(mut child) = self.service.take() else {
            return Ok(());
        };

        if child.try_wait()?.is_some() {
            return Ok(());
        }

        terminate(&mut child);

        match tokio::time::timeout(self.service_timeout, child.wait()).await {
            Ok(status) => {
                status.context("failed to wait for service")?;
            }
            Err(_) => {
                tracing::warn!(
                    "service did not exit within {}ms, killing it",
                    self.service_timeout.as_millis()
                );
                force_kill(&mut child);
                child.wait().await.context("failed to wait for killed service")?;
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        if killpg(pid, signal).is_err() {
            let _ = kill(pid, signal);
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child) {
    let _ = child.start_kill();
}
