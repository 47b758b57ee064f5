use std::{
    io::Read,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context};
use log::{debug, error, warn};

/// Executes a query script and hands back its trimmed stdout
pub trait ScriptRunner {
    fn run(&self, script: &str) -> anyhow::Result<String>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs scripts through a PowerShell executable with a hard time limit
#[derive(Debug, Clone)]
pub struct PowerShell {
    executable: PathBuf,
    timeout: Duration,
}

impl PowerShell {
    pub fn new(executable: PathBuf, timeout: Duration) -> Self {
        Self {
            executable,
            timeout,
        }
    }

    /// Makes every error terminating and reports it on stdout with a `PS_ERR:`
    /// prefix before exiting with 1
    pub fn wrap(script: &str) -> String {
        format!(
            "$ErrorActionPreference='Stop';\
             try {{ {script} }} catch {{\
               Write-Output ('PS_ERR:' + $_.Exception.GetType().FullName + ' | ' + $_.Exception.Message);\
               if ($_.InvocationInfo -and $_.InvocationInfo.PositionMessage) {{\
                 Write-Output ('PS_ERR_POS:' + $_.InvocationInfo.PositionMessage)\
               }}\
               exit 1\
             }}"
        )
    }

    fn wait_with_deadline(&self, child: &mut Child) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .context("failed to poll PowerShell process")?
            {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    error!("Failed to kill timed out PowerShell process: {e}");
                }
                let _ = child.wait();
                bail!(
                    "PowerShell did not finish within {}s",
                    self.timeout.as_secs()
                );
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ScriptRunner for PowerShell {
    fn run(&self, script: &str) -> anyhow::Result<String> {
        debug!("Running PowerShell query: {script}");
        let mut child = Command::new(&self.executable)
            .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"])
            .arg(Self::wrap(script))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute {:?}", self.executable))?;

        // Drained on their own threads so a chatty child cannot block on a full pipe
        let stdout = drain(child.stdout.take(), "ps-stdout")?;
        let stderr = drain(child.stderr.take(), "ps-stderr")?;

        let status = self.wait_with_deadline(&mut child)?;
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if !status.success() {
            bail!("PowerShell failed ({status})\nCODE:\n{script}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}");
        }
        if !stderr.is_empty() {
            // Not expected on success, don't fail a usable result over it
            warn!("PowerShell succeeded but wrote to stderr: {stderr:?}");
        }
        Ok(stdout)
    }
}

fn drain<R>(pipe: Option<R>, name: &str) -> anyhow::Result<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = pipe {
                if let Err(e) = pipe.read_to_end(&mut buf) {
                    debug!("Failed reading child pipe: {e}");
                }
            }
            String::from_utf8_lossy(&buf).trim().to_string()
        })
        .with_context(|| format!("failed to start {name} reader thread"))?;
    Ok(handle)
}

fn collect(handle: JoinHandle<String>) -> anyhow::Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("pipe reader thread panicked"))
}
