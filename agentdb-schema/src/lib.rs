//! Entity descriptors for the agentdb data layer.

pub mod descriptor;
pub mod value;

pub use descriptor::{
    Accessor, DescriptorBuilder, Entity, EntityDescriptor, FieldDescriptor, FieldKind, Getter,
    Setter, parse_timestamp,
};
pub use value::Value;
