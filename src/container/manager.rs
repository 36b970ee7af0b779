use std::collections::HashMap;
use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions, ListContainersOptions, StartContainerOptions};
use bollard::models::HostConfig;
use tracing::info;
use crate::config::types::ContainerConfig;
use crate::errors::WardenError;

const ROLE_LABEL: &str = "warden.role";

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    NotFound,
}

/// Owns the long-lived tools container. Scanner commands are exec'd into it
/// rather than spawning a container per tool.
pub struct ContainerManager {
    docker: Docker,
    settings: Settings,
}

#[derive(Debug, Clone)]
struct Settings {
    image: String,
    name: String,
    network_mode: String,
    capabilities: Vec<String>,
    memory_limit_mb: Option<u64>,
}

impl Settings {
    fn resolve(config: &ContainerConfig) -> Self {
        let defaults = ContainerConfig::default();
        Self {
            image: config.image.clone().or(defaults.image).unwrap_or_default(),
            name: config.name.clone().or(defaults.name).unwrap_or_default(),
            network_mode: config.network_mode.clone().or(defaults.network_mode).unwrap_or_default(),
            capabilities: config.capabilities.clone().or(defaults.capabilities).unwrap_or_default(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    fn create_config(&self) -> Config<String> {
        let host_config = HostConfig {
            network_mode: Some(self.network_mode.clone()),
            cap_add: Some(self.capabilities.clone()),
            memory: self.memory_limit_mb.map(|mb| (mb * 1024 * 1024) as i64),
            ..Default::default()
        };
        Config {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: Some(HashMap::from([(ROLE_LABEL.to_string(), "tools".to_string())])),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

impl ContainerManager {
    pub fn new(config: &ContainerConfig) -> Result<Self, WardenError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| WardenError::Container(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker, settings: Settings::resolve(config) })
    }

    pub async fn status(&self) -> Result<ContainerStatus, WardenError> {
        let options = ListContainersOptions {
            all: true,
            filters: HashMap::from([("name".to_string(), vec![self.settings.name.clone()])]),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        // The name filter is a substring match
        let wanted = format!("/{}", self.settings.name);
        let status = containers
            .iter()
            .find(|c| c.names.as_ref().is_some_and(|names| names.contains(&wanted)))
            .map(|c| match c.state.as_deref() {
                Some("running") => ContainerStatus::Running,
                _ => ContainerStatus::Stopped,
            })
            .unwrap_or(ContainerStatus::NotFound);
        Ok(status)
    }

    pub async fn ensure_running(&self) -> Result<(), WardenError> {
        let name = self.settings.name.as_str();
        match self.status().await? {
            ContainerStatus::Running => {
                info!(container = name, "Tools container already running");
                Ok(())
            }
            ContainerStatus::Stopped => {
                info!(container = name, "Starting stopped tools container");
                self.start().await
            }
            ContainerStatus::NotFound => {
                self.require_image().await?;
                info!(container = name, image = %self.settings.image, "Creating tools container");
                let options = CreateContainerOptions { name: name.to_string(), platform: None };
                self.docker
                    .create_container(Some(options), self.settings.create_config())
                    .await
                    .map_err(|e| WardenError::Container(format!("Failed to create container: {}", e)))?;
                self.start().await
            }
        }
    }

    async fn start(&self) -> Result<(), WardenError> {
        self.docker
            .start_container(&self.settings.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| WardenError::Container(format!("Failed to start container: {}", e)))
    }

    async fn require_image(&self) -> Result<(), WardenError> {
        match self.docker.inspect_image(&self.settings.image).await {
            Ok(_) => Ok(()),
            Err(_) => Err(WardenError::Container(format!(
                "Image '{}' not found locally; build or pull it before using the container backend",
                self.settings.image
            ))),
        }
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn container_name(&self) -> &str {
        &self.settings.name
    }
}
