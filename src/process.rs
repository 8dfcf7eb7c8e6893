//! Launching and cancelling the Tor process.

use crate::error::ProcessError;
use crate::torrc::ProcessConfiguration;
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Launches Tor processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start a process for `config`. Returns once the process is spawned,
    /// without waiting for it to come up.
    async fn launch(&self, config: &ProcessConfiguration) -> Result<Box<dyn RunningProcess>, ProcessError>;
}

/// A launched process.
pub trait RunningProcess: Send {
    /// Whether the process is still alive.
    fn is_running(&mut self) -> bool;

    /// Kill the process. Safe to call more than once.
    fn cancel(&mut self);
}

/// Runs the real `tor` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TorBinary;

#[async_trait]
impl ProcessSupervisor for TorBinary {
    async fn launch(&self, config: &ProcessConfiguration) -> Result<Box<dyn RunningProcess>, ProcessError> {
        prepare_data_dir(config).await?;

        // Stale files from a previous run would be picked up before Tor
        // rewrites them.
        for stale in [config.control_port_file(), config.cookie_file()] {
            if let Err(e) = tokio::fs::remove_file(stale).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", stale.display(), e);
                }
            }
        }

        let binary = config.binary().to_string_lossy().into_owned();
        let mut child = Command::new(config.binary())
            .args(config.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "tor", "{}", line);
                }
            });
        }

        info!(pid = ?child.id(), %binary, "Tor launched");
        Ok(Box::new(TorProcess { child }))
    }
}

async fn prepare_data_dir(config: &ProcessConfiguration) -> Result<(), ProcessError> {
    let dir = config.data_dir();
    let prepare_err = |source| ProcessError::Prepare {
        path: dir.display().to_string(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(prepare_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(prepare_err)?;
    }

    Ok(())
}

struct TorProcess {
    child: Child,
}

impl RunningProcess for TorProcess {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn cancel(&mut self) {
        match self.child.start_kill() {
            Ok(()) => debug!(pid = ?self.child.id(), "Tor killed"),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => warn!("Failed to kill Tor: {}", e),
        }
    }
}

impl fmt::Debug for TorProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorProcess").field("pid", &self.child.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::torrc::TorConf;

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new()
            .tor_binary(dir.path().join("no-such-tor"))
            .data_dir(dir.path().join("tor"));
        let built = ProcessConfiguration::build(&config, &TorConf::new(), &TorConf::new());

        match TorBinary.launch(&built).await {
            Err(ProcessError::Spawn { binary, .. }) => assert!(binary.ends_with("no-such-tor")),
            Err(other) => panic!("unexpected {:?}", other),
            Ok(_) => panic!("launch of a missing binary succeeded"),
        }
        assert!(dir.path().join("tor").is_dir());
    }

    #[tokio::test]
    async fn test_stale_files_removed_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new()
            .tor_binary(dir.path().join("no-such-tor"))
            .data_dir(dir.path().join("tor"));
        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::write(config.control_port_file(), "PORT=127.0.0.1:1\n").unwrap();

        let built = ProcessConfiguration::build(&config, &TorConf::new(), &TorConf::new());
        let _ = TorBinary.launch(&built).await;
        assert!(!config.control_port_file().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_data_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new()
            .tor_binary(dir.path().join("no-such-tor"))
            .data_dir(dir.path().join("tor"));
        let built = ProcessConfiguration::build(&config, &TorConf::new(), &TorConf::new());
        let _ = TorBinary.launch(&built).await;

        let mode = std::fs::metadata(&config.data_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_unpreparable_data_dir_is_prepare_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let config = ManagerConfig::new()
            .tor_binary(dir.path().join("no-such-tor"))
            .data_dir(blocker.join("tor"));
        let built = ProcessConfiguration::build(&config, &TorConf::new(), &TorConf::new());

        assert!(matches!(
            TorBinary.launch(&built).await,
            Err(ProcessError::Prepare { .. })
        ));
    }
}
