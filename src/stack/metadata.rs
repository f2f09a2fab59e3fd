use super::DependencyGraph;
use crate::error::{AppError, Result};
use crate::models::Command;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const SERVICES_DIR: &str = "services";
const METAINFO_FILE: &str = "metainfo.json";
const ORDER_FILE: &str = "order.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentCategory {
    Server,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub name: String,
    pub display_name: String,
    pub category: ComponentCategory,
    #[serde(default)]
    pub cardinality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub required_services: Vec<String>,
    pub components: Vec<ComponentDefinition>,
    /// OS specific package lists, forwarded to the stack plugins untouched.
    #[serde(default)]
    pub package_specifics: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRef {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone)]
struct ServiceEntry {
    stack: StackRef,
    definition: ServiceDefinition,
}

/// Catalog of services and components plus the ordering constraints between
/// their lifecycle phases.
#[derive(Debug, Clone, Default)]
pub struct StackMetadata {
    services: IndexMap<String, ServiceEntry>,
    /// component name -> (service name, index into its components)
    components: HashMap<String, (String, usize)>,
    graph: DependencyGraph,
}

impl StackMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<root>/<stack>/<version>/services/<service>/{metainfo,order}.json`.
    pub fn load(root: &Path) -> Result<Self> {
        let mut metadata = Self::new();
        if !root.is_dir() {
            tracing::warn!("Stacks directory {} does not exist", root.display());
            return Ok(metadata);
        }

        for stack_dir in sorted_dirs(root)? {
            let stack_name = dir_name(&stack_dir)?;
            for version_dir in sorted_dirs(&stack_dir)? {
                let stack = StackRef {
                    name: stack_name.clone(),
                    version: dir_name(&version_dir)?,
                };
                let services_dir = version_dir.join(SERVICES_DIR);
                if !services_dir.is_dir() {
                    continue;
                }
                for service_dir in sorted_dirs(&services_dir)? {
                    metadata.load_service_dir(&stack, &service_dir)?;
                }
            }
        }

        // Fail at load time rather than when the first job is planned.
        metadata.ordered_keys()?;
        tracing::info!(
            "Loaded {} services with {} ordering constraints",
            metadata.services.len(),
            metadata.graph.edge_count()
        );
        Ok(metadata)
    }

    fn load_service_dir(&mut self, stack: &StackRef, service_dir: &Path) -> Result<()> {
        let metainfo = service_dir.join(METAINFO_FILE);
        if !metainfo.is_file() {
            tracing::warn!("Skipping {}: no {}", service_dir.display(), METAINFO_FILE);
            return Ok(());
        }
        let content = std::fs::read_to_string(&metainfo)?;
        let definition: ServiceDefinition = serde_json::from_str(&content).map_err(|e| {
            AppError::InvalidStack(format!("{}: {}", metainfo.display(), e))
        })?;
        self.register_service(stack.clone(), definition)?;

        let order = service_dir.join(ORDER_FILE);
        if order.is_file() {
            let content = std::fs::read_to_string(&order)?;
            let entries: IndexMap<String, Vec<String>> = serde_json::from_str(&content)
                .map_err(|e| AppError::InvalidStack(format!("{}: {}", order.display(), e)))?;
            for (blocked, blockers) in entries {
                self.add_order(&blocked, &blockers)?;
            }
        }
        Ok(())
    }

    pub fn register_service(&mut self, stack: StackRef, mut definition: ServiceDefinition) -> Result<()> {
        definition.name = definition.name.to_lowercase();
        if self.services.contains_key(&definition.name) {
            return Err(AppError::InvalidStack(format!(
                "service '{}' declared twice",
                definition.name
            )));
        }

        for (idx, component) in definition.components.iter_mut().enumerate() {
            component.name = component.name.to_lowercase();
            if let Some((owner, _)) = self.components.get(&component.name) {
                return Err(AppError::InvalidStack(format!(
                    "component '{}' declared by both '{}' and '{}'",
                    component.name, owner, definition.name
                )));
            }
            self.components
                .insert(component.name.clone(), (definition.name.clone(), idx));
        }

        self.services
            .insert(definition.name.clone(), ServiceEntry { stack, definition });
        Ok(())
    }

    /// Records that every key in `blockers` must run before `blocked`.
    pub fn add_order(&mut self, blocked: &str, blockers: &[String]) -> Result<()> {
        let blocked = normalize_key(blocked)?;
        for blocker in blockers {
            let blocker = normalize_key(blocker)?;
            self.graph.add_edge(blocker, blocked.clone());
        }
        Ok(())
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Topological order of every constrained `COMPONENT-COMMAND` key.
    pub fn ordered_keys(&self) -> Result<Vec<String>> {
        self.graph.topological_order()
    }

    pub fn service(&self, service_name: &str) -> Result<&ServiceDefinition> {
        self.services
            .get(&service_name.to_lowercase())
            .map(|entry| &entry.definition)
            .ok_or_else(|| AppError::ServiceNotFound(service_name.to_string()))
    }

    pub fn stack_of_service(&self, service_name: &str) -> Result<&StackRef> {
        self.services
            .get(&service_name.to_lowercase())
            .map(|entry| &entry.stack)
            .ok_or_else(|| AppError::ServiceNotFound(service_name.to_string()))
    }

    pub fn service_for_component(&self, component_name: &str) -> Result<&ServiceDefinition> {
        let (service, _) = self.lookup(component_name)?;
        Ok(service)
    }

    pub fn component(&self, component_name: &str) -> Result<&ComponentDefinition> {
        let (_, component) = self.lookup(component_name)?;
        Ok(component)
    }

    pub fn is_client(&self, component_name: &str) -> Result<bool> {
        Ok(self.component(component_name)?.category == ComponentCategory::Client)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values().map(|entry| &entry.definition)
    }

    fn lookup(&self, component_name: &str) -> Result<(&ServiceDefinition, &ComponentDefinition)> {
        let (service_name, idx) = self
            .components
            .get(&component_name.to_lowercase())
            .ok_or_else(|| AppError::ComponentNotFound(component_name.to_string()))?;
        let service = &self
            .services
            .get(service_name)
            .ok_or_else(|| AppError::ServiceNotFound(service_name.clone()))?
            .definition;
        let component = service
            .components
            .get(*idx)
            .ok_or_else(|| AppError::ComponentNotFound(component_name.to_string()))?;
        Ok((service, component))
    }
}

/// Builds the graph key for a component and command, e.g. `ZOOKEEPER_SERVER-START`.
pub fn order_key(component_name: &str, command: Command) -> String {
    format!("{}-{}", component_name.to_uppercase(), command.key())
}

fn normalize_key(raw: &str) -> Result<String> {
    let (component, command) = raw
        .trim()
        .rsplit_once('-')
        .ok_or_else(|| AppError::InvalidStack(format!("malformed order key '{}'", raw)))?;
    let command: Command = command
        .parse()
        .map_err(|e| AppError::InvalidStack(format!("order key '{}': {}", raw, e)))?;
    if component.is_empty() {
        return Err(AppError::InvalidStack(format!("malformed order key '{}'", raw)));
    }
    Ok(order_key(component, command))
}

fn sorted_dirs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidStack(format!("invalid directory name {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn stack_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let services = dir.path().join("infra").join("1.0.0").join("services");
        write(
            &services.join("zookeeper").join("metainfo.json"),
            r#"{
                "name": "zookeeper",
                "display_name": "ZooKeeper",
                "user": "zookeeper",
                "components": [
                    {"name": "zookeeper_server", "display_name": "ZooKeeper Server", "category": "server"},
                    {"name": "zookeeper_client", "display_name": "ZooKeeper Client", "category": "client"}
                ]
            }"#,
        );
        write(
            &services.join("kafka").join("metainfo.json"),
            r#"{
                "name": "Kafka",
                "display_name": "Kafka",
                "user": "kafka",
                "required_services": ["zookeeper"],
                "components": [
                    {"name": "KAFKA_BROKER", "display_name": "Kafka Broker", "category": "server"}
                ]
            }"#,
        );
        write(
            &services.join("kafka").join("order.json"),
            r#"{"kafka_broker-start": ["ZOOKEEPER_SERVER-START"]}"#,
        );
        dir
    }

    #[test]
    fn loads_services_and_ordering() {
        let dir = stack_tree();
        let metadata = StackMetadata::load(dir.path()).unwrap();

        assert_eq!(metadata.service_for_component("kafka_broker").unwrap().name, "kafka");
        assert!(metadata.is_client("zookeeper_client").unwrap());
        assert!(!metadata.is_client("ZOOKEEPER_SERVER").unwrap());
        assert_eq!(
            metadata.stack_of_service("kafka").unwrap(),
            &StackRef {
                name: "infra".to_string(),
                version: "1.0.0".to_string()
            }
        );
        assert!(
            metadata
                .graph()
                .contains_edge("ZOOKEEPER_SERVER-START", "KAFKA_BROKER-START")
        );
    }

    #[test]
    fn unknown_component_is_reported() {
        let metadata = StackMetadata::new();
        assert!(matches!(
            metadata.service_for_component("flink_jobmanager"),
            Err(AppError::ComponentNotFound(_))
        ));
    }

    #[test]
    fn cyclic_order_fails_to_load() {
        let dir = stack_tree();
        let order = dir
            .path()
            .join("infra/1.0.0/services/zookeeper/order.json");
        write(&order, r#"{"ZOOKEEPER_SERVER-START": ["KAFKA_BROKER-START"]}"#);

        assert!(matches!(
            StackMetadata::load(dir.path()),
            Err(AppError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn order_key_with_unknown_command_is_rejected() {
        let mut metadata = StackMetadata::new();
        let err = metadata
            .add_order("KAFKA_BROKER-BOUNCE", &["ZOOKEEPER_SERVER-START".to_string()])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStack(_)));
    }
}
