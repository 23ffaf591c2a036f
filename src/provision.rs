use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, DatabaseKind};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to run docker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("docker {action} {container} failed: {stderr}")]
    Command {
        action: &'static str,
        container: String,
        stderr: String,
    },
    #[error("missing root password for {0}")]
    MissingPassword(&'static str),
}

/// One database container the service depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub container_port: u16,
    pub host_port: u16,
    pub env: Vec<(String, String)>,
    pub args: Vec<String>,
}

impl ServiceSpec {
    /// Arguments for `docker run` creating this container detached.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "-p".to_string(),
            format!("{}:{}", self.host_port, self.container_port),
        ];
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    AlreadyRunning,
    Started,
    Created,
}

#[async_trait]
pub trait ContainerProvisioner: Send + Sync {
    /// Idempotent: leaves a running container alone, starts a stopped one and
    /// creates a missing one.
    async fn ensure_running(&self, spec: &ServiceSpec) -> Result<ContainerState, ProvisionError>;
}

/// Containers for every running database in the configuration.
pub fn specs_from_config(config: &AppConfig) -> Result<Vec<ServiceSpec>, ProvisionError> {
    let db = &config.database;
    let prefix = &config.provision.container_prefix;

    db.running
        .iter()
        .map(|kind| match kind {
            DatabaseKind::MongoDb => {
                let password = db
                    .mongodb_root_password
                    .clone()
                    .ok_or(ProvisionError::MissingPassword("mongodb"))?;
                Ok(ServiceSpec {
                    name: format!("{prefix}-mongo"),
                    image: "mongo:latest".into(),
                    container_port: 27017,
                    host_port: db.mongodb_port,
                    env: vec![
                        ("MONGO_INITDB_ROOT_USERNAME".into(), "root".into()),
                        ("MONGO_INITDB_ROOT_PASSWORD".into(), password),
                    ],
                    args: Vec::new(),
                })
            }
            DatabaseKind::MariaDb => {
                let password = db
                    .mariadb_root_password
                    .clone()
                    .ok_or(ProvisionError::MissingPassword("mariadb"))?;
                Ok(ServiceSpec {
                    name: format!("{prefix}-mariadb"),
                    image: "mariadb:latest".into(),
                    container_port: 3306,
                    host_port: db.mariadb_port,
                    env: vec![
                        ("MARIADB_ROOT_PASSWORD".into(), password),
                        ("MARIADB_DATABASE".into(), db.name.clone()),
                    ],
                    args: Vec::new(),
                })
            }
            DatabaseKind::Redis => {
                let password = db
                    .redis_root_password
                    .clone()
                    .ok_or(ProvisionError::MissingPassword("redis"))?;
                Ok(ServiceSpec {
                    name: format!("{prefix}-redis"),
                    image: "redis:latest".into(),
                    container_port: 6379,
                    host_port: db.redis_port,
                    env: Vec::new(),
                    args: vec![
                        "redis-server".into(),
                        "--requirepass".into(),
                        password,
                    ],
                })
            }
        })
        .collect()
}

pub async fn provision_all(
    provisioner: &dyn ContainerProvisioner,
    specs: &[ServiceSpec],
) -> Result<(), ProvisionError> {
    for spec in specs {
        let state = provisioner.ensure_running(spec).await?;
        info!(container = %spec.name, ?state, "container ready");
    }
    Ok(())
}

/// Drives the local `docker` CLI. `docker run` pulls missing images.
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::with_binary("docker")
    }
}

impl DockerCli {
    /// Uses another docker-compatible binary, such as `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(
        &self,
        action: &'static str,
        container: &str,
        args: &[String],
    ) -> Result<String, ProvisionError> {
        debug!(action, container, "docker");
        let output = Command::new(&self.binary).args(args).output().await?;
        if !output.status.success() {
            return Err(ProvisionError::Command {
                action,
                container: container.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerProvisioner for DockerCli {
    async fn ensure_running(&self, spec: &ServiceSpec) -> Result<ContainerState, ProvisionError> {
        let inspect = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            spec.name.clone(),
        ];
        match self.docker("inspect", &spec.name, &inspect).await {
            Ok(running) if running == "true" => Ok(ContainerState::AlreadyRunning),
            Ok(_) => {
                info!(container = %spec.name, "starting stopped container");
                self.docker("start", &spec.name, &["start".to_string(), spec.name.clone()])
                    .await?;
                Ok(ContainerState::Started)
            }
            Err(ProvisionError::Command { .. }) => {
                warn!(container = %spec.name, image = %spec.image, "container missing, creating");
                self.docker("run", &spec.name, &spec.run_args()).await?;
                Ok(ContainerState::Created)
            }
            Err(e) => Err(e),
        }
    }
}
