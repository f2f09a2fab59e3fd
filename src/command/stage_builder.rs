//! Turns a set of components and commands into an ordered list of stage plans.

use super::stage::{StageKind, Targeting};
use crate::error::{AppError, Result};
use crate::models::Command;
use crate::stack::{StackMetadata, order_key};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Component name to the hosts it should run on, in caller order.
pub type ComponentHosts = IndexMap<String, Vec<String>>;

/// Phase order used when one job realizes several commands.
pub const PHASE_ORDER: [Command; 6] = [
    Command::Add,
    Command::Configure,
    Command::Init,
    Command::Start,
    Command::Prepare,
    Command::Check,
];

/// A stage that has been planned but not persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub kind: StageKind,
    pub service_name: String,
    pub component_name: String,
    pub hostnames: Vec<String>,
}

impl StagePlan {
    /// A host-wide stage owned by the `cluster`/`agent` pseudo service.
    pub fn for_hosts(kind: StageKind, hostnames: Vec<String>) -> Self {
        Self {
            kind,
            service_name: super::context::CLUSTER_SERVICE.to_string(),
            component_name: super::context::AGENT_COMPONENT.to_string(),
            hostnames,
        }
    }
}

#[derive(Debug, Clone)]
struct PlannedEntry {
    key: String,
    component: String,
    command: Command,
}

/// Plans one stage per resolved `component-command` entry.
///
/// Any lookup or ordering failure aborts the whole plan.
pub fn plan_component_stages(
    stack: &StackMetadata,
    component_hosts: &ComponentHosts,
    commands: &[Command],
) -> Result<Vec<StagePlan>> {
    build(stack, component_hosts, commands).map_err(AppError::stage_build)
}

fn build(
    stack: &StackMetadata,
    component_hosts: &ComponentHosts,
    commands: &[Command],
) -> Result<Vec<StagePlan>> {
    let mut unique_commands: Vec<Command> = Vec::with_capacity(commands.len());
    for command in commands {
        let _ = StageKind::for_command(*command)?;
        if !unique_commands.contains(command) {
            unique_commands.push(*command);
        }
    }

    let planned: Vec<PlannedEntry> = component_hosts
        .keys()
        .flat_map(|component| {
            unique_commands.iter().map(move |command| PlannedEntry {
                key: order_key(component, *command),
                component: component.clone(),
                command: *command,
            })
        })
        .collect();

    let ordered = stack.ordered_keys()?;
    let resolved = if unique_commands.len() == 1 {
        order_entries(planned, &ordered)
    } else {
        order_by_phase(planned, &ordered, &unique_commands)
    };

    let mut plans = Vec::with_capacity(resolved.len());
    for entry in resolved {
        let hostnames = match component_hosts.get(&entry.component) {
            Some(hosts) if !hosts.is_empty() => hosts,
            _ => continue,
        };

        let service = stack.service_for_component(&entry.component)?;
        let kind = StageKind::for_command(entry.command)?;
        let behavior = kind.behavior();
        if behavior.skips_clients && stack.is_client(&entry.component)? {
            tracing::debug!("Skipping {} for client component {}", entry.command, entry.component);
            continue;
        }

        let targets = match behavior.targeting {
            Targeting::AllHosts => hostnames.clone(),
            Targeting::FirstHost => hostnames.iter().take(1).cloned().collect(),
        };

        plans.push(StagePlan {
            kind,
            service_name: service.name.clone(),
            component_name: entry.component.to_lowercase(),
            hostnames: targets,
        });
    }

    Ok(plans)
}

/// Constrained entries first in dependency order, then the rest in planning order.
fn order_entries(planned: Vec<PlannedEntry>, ordered: &[String]) -> Vec<PlannedEntry> {
    let mut by_key: HashMap<String, PlannedEntry> = HashMap::with_capacity(planned.len());
    let mut remaining = Vec::new();
    for entry in planned {
        if ordered.contains(&entry.key) && !by_key.contains_key(&entry.key) {
            by_key.insert(entry.key.clone(), entry);
        } else {
            remaining.push(entry);
        }
    }

    let mut result: Vec<PlannedEntry> = ordered.iter().filter_map(|key| by_key.remove(key)).collect();
    result.extend(remaining);
    result
}

fn order_by_phase(planned: Vec<PlannedEntry>, ordered: &[String], commands: &[Command]) -> Vec<PlannedEntry> {
    let mut result = Vec::with_capacity(planned.len());

    let phases = PHASE_ORDER
        .iter()
        .copied()
        .filter(|phase| commands.contains(phase))
        .chain(
            commands
                .iter()
                .copied()
                .filter(|command| !PHASE_ORDER.contains(command)),
        );

    for phase in phases {
        if !PHASE_ORDER.contains(&phase) {
            tracing::warn!("{} has no fixed phase, appending it after the phase table", phase);
        }
        let entries: Vec<PlannedEntry> = planned.iter().filter(|e| e.command == phase).cloned().collect();
        result.extend(order_entries(entries, ordered));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{ComponentCategory, ComponentDefinition, ServiceDefinition, StackRef};
    use pretty_assertions::assert_eq;

    fn component(name: &str, category: ComponentCategory) -> ComponentDefinition {
        ComponentDefinition {
            name: name.to_string(),
            display_name: name.to_string(),
            category,
            cardinality: None,
        }
    }

    fn stack() -> StackMetadata {
        let mut stack = StackMetadata::new();
        let stack_ref = StackRef {
            name: "infra".to_string(),
            version: "1.0.0".to_string(),
        };
        stack
            .register_service(
                stack_ref,
                ServiceDefinition {
                    name: "demo".to_string(),
                    display_name: "Demo".to_string(),
                    user: "demo".to_string(),
                    version: None,
                    required_services: Vec::new(),
                    components: vec![
                        component("a", ComponentCategory::Server),
                        component("b", ComponentCategory::Server),
                        component("c", ComponentCategory::Server),
                        component("x", ComponentCategory::Server),
                        component("cli", ComponentCategory::Client),
                    ],
                    package_specifics: Vec::new(),
                },
            )
            .unwrap();
        stack.add_order("B-START", &["A-START".to_string()]).unwrap();
        stack
    }

    fn hosts(entries: Vec<(&str, Vec<&str>)>) -> ComponentHosts {
        entries
            .into_iter()
            .map(|(component, hosts)| {
                (
                    component.to_string(),
                    hosts.iter().map(|h| h.to_string()).collect(),
                )
            })
            .collect()
    }

    fn summary(plans: &[StagePlan]) -> Vec<(String, StageKind)> {
        plans
            .iter()
            .map(|p| (p.component_name.clone(), p.kind))
            .collect()
    }

    #[test]
    fn dependency_order_for_single_command() {
        // b listed before a on purpose
        let component_hosts = hosts(vec![("b", vec!["h1"]), ("c", vec!["h1"]), ("a", vec!["h1"])]);
        let plans = plan_component_stages(&stack(), &component_hosts, &[Command::Start]).unwrap();

        let names: Vec<&str> = plans.iter().map(|p| p.component_name.as_str()).collect();
        assert_eq!(names.len(), 3);
        let pos = |n: &str| names.iter().position(|c| *c == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert_eq!(names.iter().filter(|n| **n == "c").count(), 1);
    }

    #[test]
    fn phases_follow_fixed_order() {
        let component_hosts = hosts(vec![("x", vec!["h1"])]);
        let plans = plan_component_stages(
            &stack(),
            &component_hosts,
            &[Command::Prepare, Command::Start, Command::Configure, Command::Init],
        )
        .unwrap();

        assert_eq!(
            summary(&plans),
            vec![
                ("x".to_string(), StageKind::ComponentConfigure),
                ("x".to_string(), StageKind::ComponentInit),
                ("x".to_string(), StageKind::ComponentStart),
                ("x".to_string(), StageKind::ComponentPrepare),
            ]
        );
    }

    #[test]
    fn start_phase_keeps_dependency_order_among_phases() {
        let component_hosts = hosts(vec![("b", vec!["h1"]), ("a", vec!["h2"])]);
        let plans = plan_component_stages(
            &stack(),
            &component_hosts,
            &[Command::Init, Command::Start, Command::Prepare],
        )
        .unwrap();

        let starts: Vec<&str> = plans
            .iter()
            .filter(|p| p.kind == StageKind::ComponentStart)
            .map(|p| p.component_name.as_str())
            .collect();
        assert_eq!(starts, vec!["a", "b"]);
        assert_eq!(plans.first().map(|p| p.kind), Some(StageKind::ComponentInit));
        assert_eq!(plans.last().map(|p| p.kind), Some(StageKind::ComponentPrepare));
    }

    #[test]
    fn client_components_only_get_add_and_configure() {
        let component_hosts = hosts(vec![("cli", vec!["h1", "h2"])]);
        let plans = plan_component_stages(
            &stack(),
            &component_hosts,
            &[
                Command::Add,
                Command::Configure,
                Command::Start,
                Command::Prepare,
                Command::Check,
            ],
        )
        .unwrap();
        assert_eq!(
            summary(&plans),
            vec![
                ("cli".to_string(), StageKind::ComponentAdd),
                ("cli".to_string(), StageKind::ComponentConfigure),
            ]
        );

        let stops = plan_component_stages(&stack(), &component_hosts, &[Command::Stop]).unwrap();
        assert!(stops.is_empty());
    }

    #[test]
    fn check_init_prepare_target_first_host_only() {
        let five = ["h1", "h2", "h3", "h4", "h5"];
        let component_hosts = hosts(vec![("x", five.to_vec())]);

        for command in [Command::Check, Command::Init, Command::Prepare] {
            let plans = plan_component_stages(&stack(), &component_hosts, &[command]).unwrap();
            assert_eq!(plans.len(), 1);
            assert_eq!(plans[0].hostnames, vec!["h1".to_string()]);
        }

        let plans = plan_component_stages(&stack(), &component_hosts, &[Command::Configure]).unwrap();
        assert_eq!(plans[0].hostnames.len(), 5);
    }

    #[test]
    fn empty_host_list_is_skipped() {
        let component_hosts = hosts(vec![("a", vec![]), ("x", vec!["h1"])]);
        let plans = plan_component_stages(&stack(), &component_hosts, &[Command::Start]).unwrap();
        assert_eq!(summary(&plans), vec![("x".to_string(), StageKind::ComponentStart)]);
    }

    #[test]
    fn unknown_component_aborts_the_plan() {
        let component_hosts = hosts(vec![("x", vec!["h1"]), ("ghost", vec!["h1"])]);
        let err = plan_component_stages(&stack(), &component_hosts, &[Command::Start]).unwrap_err();
        match err {
            AppError::StageBuild(source) => {
                assert!(matches!(*source, AppError::ComponentNotFound(ref c) if c == "ghost"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn restart_is_not_a_stage_command() {
        let component_hosts = hosts(vec![("x", vec!["h1"])]);
        assert!(matches!(
            plan_component_stages(&stack(), &component_hosts, &[Command::Restart]),
            Err(AppError::StageBuild(_))
        ));
    }
}
