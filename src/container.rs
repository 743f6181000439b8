//! Container-runner: launches one hardened, short-lived container per
//! agent invocation, feeds it `ContainerInput` on stdin, and parses the
//! framed `ContainerOutput` from its stdout (§4.4).
//!
//! Uses `bollard` against the local Docker Engine API rather than shelling
//! out to a `docker`/`container` CLI — the teacher already declares
//! `bollard` in its dependency table, so this keeps the stack aligned with
//! the teacher even though the teacher's own source never calls it. Driving
//! the engine API directly also sidesteps shell-injection concerns
//! entirely, since no shell is ever invoked to build a command line.

use crate::error::{ContainerError, Result};
use crate::queue::{ProcessHandle, sanitize_container_name};
use crate::store::state::ContainerOverrides;
use crate::wire::{ContainerInput, ContainerOutput};
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config as ContainerConfig,
    CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::models::HostConfig;
use bollard::query_parameters::StartContainerOptions;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Default image rebuilt out-of-band (§4.4).
pub const DEFAULT_AGENT_IMAGE: &str = "nanoclaw-agent:latest";

const DEFAULT_MEMORY_MB: i64 = 512;
const DEFAULT_CPUS: f64 = 1.0;

/// In-container mount points (§4.4). Shared with `nanoclaw-agent`, which
/// reads/writes these same paths from inside the sandbox.
pub const MOUNT_GROUP: &str = "/workspace/group";
pub const MOUNT_IPC: &str = "/workspace/ipc";
pub const MOUNT_PROJECT: &str = "/workspace/project";
pub const MOUNT_GLOBAL: &str = "/workspace/global";

/// Mount layout and invocation parameters for one agent run (§4.4).
pub struct LaunchSpec {
    pub image: String,
    pub group_folder: String,
    pub group_dir: PathBuf,
    pub ipc_dir: PathBuf,
    /// Present only when launching the privileged main group.
    pub main_mounts: Option<MainMounts>,
    /// `{groupsDir}/global` mounted read-only for non-main groups, so their
    /// agent can read `GEMINI.md` there (§4.7 "system prompt assembled
    /// from... (for non-main) /workspace/global/GEMINI.md"). Main gets the
    /// read-write mount in `main_mounts` instead; the two are mutually
    /// exclusive.
    pub global_dir_ro: Option<PathBuf>,
    pub overrides: ContainerOverrides,
    /// `-e NAME=VALUE` pairs; never written to disk (§4.4 "Secret injection").
    pub secrets: Vec<(String, String)>,
    pub input: ContainerInput,
}

/// Extra mounts granted only to the main group (§4.4).
pub struct MainMounts {
    pub project_dir: PathBuf,
    pub global_dir: PathBuf,
}

/// Called as soon as the container is created and started, so the queue can
/// register it for shutdown targeting (§4.1 `RegisterProcess`, §9 "subprocess
/// ownership").
pub type OnSpawn<'a> = Box<dyn FnOnce(ProcessHandle, String) + Send + 'a>;

#[derive(Clone)]
pub struct ContainerRunner {
    docker: Docker,
}

impl ContainerRunner {
    /// Connect to the local Docker Engine API and verify the daemon is
    /// healthy (§4.4 "Runtime selection").
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|error| {
            tracing::error!(%error, "no container runtime available");
            ContainerError::NoRuntime
        })?;

        tokio::time::timeout(Duration::from_secs(10), docker.info())
            .await
            .map_err(|_| ContainerError::RuntimeUnhealthy("daemon info timed out".into()))?
            .map_err(|e| ContainerError::RuntimeUnhealthy(e.to_string()))?;

        Ok(Self { docker })
    }

    /// On supervisor boot: remove stopped containers left over from prior
    /// unclean exits (§4.4 "Cleanup").
    pub async fn cleanup_stopped(&self, name_prefix: &str) -> Result<usize> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_prefix.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| ContainerError::Launch(e.to_string()))?;

        let mut removed = 0;
        for container in containers {
            let Some(id) = container.id else { continue };
            let Some(state) = container.state.as_deref() else {
                continue;
            };
            if state == "running" {
                continue;
            }
            if let Err(error) = self
                .docker
                .remove_container(&id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
                .await
            {
                tracing::warn!(container_id = %id, %error, "failed to remove stopped container");
                continue;
            }
            removed += 1;
        }

        Ok(removed)
    }

    /// Launch one agent invocation, feed it `spec.input` on stdin, and wait
    /// for the framed `ContainerOutput` on stdout (§4.4 "I/O contract").
    pub async fn run(&self, spec: LaunchSpec, on_spawn: OnSpawn<'_>) -> Result<ContainerOutput> {
        let name = format!(
            "nanoclaw-{}-{}",
            spec.group_folder,
            uuid::Uuid::new_v4().simple()
        );
        let name = sanitize_container_name(&name);

        let binds = self.build_binds(&spec);
        let env = spec
            .secrets
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();

        let memory_mb = spec.overrides.memory_mb.unwrap_or(DEFAULT_MEMORY_MB);
        let cpus = spec.overrides.cpus.unwrap_or(DEFAULT_CPUS);
        let read_only = spec.overrides.read_only.unwrap_or(true);
        let cap_drop_all = spec.overrides.cap_drop_all.unwrap_or(true);

        let mut tmpfs = HashMap::new();
        tmpfs.insert("/tmp".to_string(), String::new());

        let host_config = HostConfig {
            binds: Some(binds),
            cap_drop: if cap_drop_all { Some(vec!["ALL".to_string()]) } else { None },
            readonly_rootfs: Some(read_only),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            memory: Some(memory_mb * 1024 * 1024),
            nano_cpus: Some((cpus * 1_000_000_000.0) as i64),
            tmpfs: Some(tmpfs),
            ..Default::default()
        };

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            env: Some(env),
            host_config: Some(host_config),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| ContainerError::Launch(e.to_string()))?;
        let container_id = created.id;

        let AttachContainerResults { mut output, mut input } = self
            .docker
            .attach_container(
                &container_id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| ContainerError::Launch(e.to_string()))?;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| ContainerError::Launch(e.to_string()))?;

        on_spawn(
            ProcessHandle { container_id: container_id.clone() },
            name.clone(),
        );

        let stdin_json = serde_json::to_vec(&spec.input)
            .map_err(|e| ContainerError::Launch(format!("failed to encode ContainerInput: {e}")))?;
        input
            .write_all(&stdin_json)
            .await
            .map_err(|e| ContainerError::Launch(format!("failed to write stdin: {e}")))?;
        input
            .shutdown()
            .await
            .map_err(|e| ContainerError::Launch(format!("failed to close stdin: {e}")))?;

        let mut stdout_buf = String::new();
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => {
                    stdout_buf.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    // Agent logs to stderr freely (§4.4); surface at debug.
                    tracing::debug!(container = %name, "{}", String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(container = %name, %error, "error reading container output stream");
                    break;
                }
            }
        }

        match ContainerOutput::parse_framed_stdout(&stdout_buf) {
            Some(output) => Ok(output),
            None => Err(ContainerError::MissingOutputMarkers.into()),
        }
    }

    /// Politely stop a container by name (§4.1 Shutdown, preferred path).
    pub async fn stop(&self, name: &str) {
        if let Err(error) = self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: Some(10) }))
            .await
        {
            tracing::warn!(%name, %error, "failed to stop container");
        }
    }

    /// Force-kill a container by name (§4.1 Shutdown, escalation path).
    pub async fn kill(&self, name: &str) {
        if let Err(error) = self
            .docker
            .remove_container(name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
        {
            tracing::warn!(%name, %error, "failed to force-remove container");
        }
    }

    fn build_binds(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut binds = vec![
            bind(&spec.group_dir, MOUNT_GROUP),
            bind(&spec.ipc_dir, MOUNT_IPC),
        ];
        if let Some(main) = &spec.main_mounts {
            binds.push(bind(&main.project_dir, MOUNT_PROJECT));
            binds.push(bind(&main.global_dir, MOUNT_GLOBAL));
        } else if let Some(global_dir) = &spec.global_dir_ro {
            binds.push(bind_ro(global_dir, MOUNT_GLOBAL));
        }
        binds
    }
}

fn bind(host: &Path, container: &str) -> String {
    format!("{}:{}:rw", host.display(), container)
}

fn bind_ro(host: &Path, container: &str) -> String {
    format!("{}:{}:ro", host.display(), container)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_formats_rw_mount() {
        assert_eq!(
            bind(Path::new("/data/groups/g1"), MOUNT_GROUP),
            "/data/groups/g1:/workspace/group:rw"
        );
    }
}
