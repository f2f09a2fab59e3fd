pub mod graph;
pub mod metadata;

pub use graph::DependencyGraph;
pub use metadata::{
    ComponentCategory, ComponentDefinition, ServiceDefinition, StackMetadata, StackRef, order_key,
};
