// Transport module - fetch raw command output from a device
//
// How a session to the device is opened is not our concern: the exec
// adapter delegates to an external program, the capture adapter replays
// saved output from disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::TransportError;
use crate::inventory::Device;
use crate::parsers::CommandOutputs;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `commands` on `device` and return each command's raw output.
    /// Commands that produced no output may be absent from the map.
    async fn fetch(
        &self,
        device: &Device,
        commands: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutputs, TransportError>;
}

/// Runs `<program> <address> <platform> <command>` once per command and
/// captures stdout
#[derive(Debug, Clone)]
pub struct ExecTransport {
    program: PathBuf,
}

impl ExecTransport {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ExecTransport {
            program: program.into(),
        }
    }

    async fn run_command(
        &self,
        address: &str,
        platform: &str,
        command: &str,
    ) -> Result<String, TransportError> {
        let output = Command::new(&self.program)
            .arg(address)
            .arg(platform)
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransportError::Command {
                command: command.to_string(),
                message: format!("failed to execute {}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Unreachable(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|_| TransportError::Decode {
            command: command.to_string(),
        })
    }
}

#[async_trait]
impl Transport for ExecTransport {
    async fn fetch(
        &self,
        device: &Device,
        commands: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutputs, TransportError> {
        let address = device
            .primary_address
            .ok_or_else(|| TransportError::Unreachable(format!("{} has no management address", device.name)))?
            .to_string();
        let platform = device.platform.clone().unwrap_or_default();

        let run_all = async {
            let mut outputs = CommandOutputs::new();
            for &command in commands {
                tracing::debug!("Running {:?} on {} ({})", command, device.name, address);
                let text = self.run_command(&address, &platform, command).await?;
                outputs.insert(command.to_string(), text);
            }
            Ok::<_, TransportError>(outputs)
        };

        match tokio::time::timeout(timeout, run_all).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_secs())),
        }
    }
}

/// Replays saved output from `<dir>/<device name>/<command slug>.txt`
#[derive(Debug, Clone)]
pub struct CaptureTransport {
    dir: PathBuf,
}

impl CaptureTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CaptureTransport { dir: dir.into() }
    }

    pub fn capture_path(&self, device: &Device, command: &str) -> PathBuf {
        self.dir
            .join(&device.name)
            .join(format!("{}.txt", command_slug(command)))
    }
}

/// "show ip route vrf all | json" -> "show_ip_route_vrf_all_json"
pub fn command_slug(command: &str) -> String {
    command
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl Transport for CaptureTransport {
    async fn fetch(
        &self,
        device: &Device,
        commands: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutputs, TransportError> {
        let device_dir = self.dir.join(&device.name);
        if !is_dir(&device_dir).await {
            return Err(TransportError::Unreachable(format!(
                "no captured output for {} in {}",
                device.name,
                self.dir.display()
            )));
        }

        let mut outputs = CommandOutputs::new();
        for &command in commands {
            let path = self.capture_path(device, command);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(TransportError::Command {
                        command: command.to_string(),
                        message: format!("{}: {}", path.display(), e),
                    });
                }
            };
            let text = String::from_utf8(bytes).map_err(|_| TransportError::Decode {
                command: command.to_string(),
            })?;
            outputs.insert(command.to_string(), text);
        }
        Ok(outputs)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
