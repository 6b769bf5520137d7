//! Component descriptions for presentation layers.
//!
//! Components list their observable attributes and invokable actions
//! explicitly through [`Describe`]; nothing is discovered by reflection.

use crate::observable::Observable;
use serde::{Deserialize, Serialize};

/// One observable attribute of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Observable name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Unit symbol of the value
    pub units: Option<String>,
    /// Whether clients may only observe the value
    pub read_only: bool,
    /// Value type hint (`"float"`, `"bool"`, ...)
    pub dtype: String,
    /// Value at the time of description
    pub value: serde_json::Value,
}

impl AttributeDescriptor {
    /// Snapshot an observable's metadata and current value.
    pub fn from_observable<T>(observable: &Observable<T>) -> Self
    where
        T: Clone + Send + Sync + Serialize + 'static,
    {
        let metadata = observable.metadata();
        Self {
            name: metadata.name,
            description: metadata.description,
            units: metadata.units,
            read_only: metadata.read_only,
            dtype: metadata.dtype,
            value: observable.get_json().unwrap_or(serde_json::Value::Null),
        }
    }
}

/// One invokable action of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Action name
    pub name: String,
    /// What invoking the action does
    pub description: String,
}

impl ActionDescriptor {
    /// Describe an action.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Attributes and actions a component exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescription {
    /// Component type, e.g. `"Scan"` or `"MockManipulator"`
    pub component: String,
    /// Observable attributes
    pub attributes: Vec<AttributeDescriptor>,
    /// Invokable actions
    pub actions: Vec<ActionDescriptor>,
}

impl ComponentDescription {
    /// Empty description of `component`.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            attributes: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Add an attribute snapshot of `observable`.
    pub fn attribute<T>(mut self, observable: &Observable<T>) -> Self
    where
        T: Clone + Send + Sync + Serialize + 'static,
    {
        self.attributes
            .push(AttributeDescriptor::from_observable(observable));
        self
    }

    /// Add an action.
    pub fn action(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.actions.push(ActionDescriptor::new(name, description));
        self
    }

    /// Attribute named `name`, if listed.
    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Explicit self-description of a component's attributes and actions.
pub trait Describe {
    /// Snapshot of the component's attributes and its actions.
    fn describe(&self) -> ComponentDescription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Quantity, MILLIMETER};

    #[test]
    fn test_description_snapshots_observables() {
        let position = Observable::new("position", Quantity::new(1.5, MILLIMETER))
            .with_units("mm")
            .with_dtype("quantity")
            .read_only();
        let desc = ComponentDescription::new("Stage")
            .attribute(&position)
            .action("stop", "Halt motion");

        let attr = desc.find_attribute("position").unwrap();
        assert_eq!(attr.value, serde_json::json!("1.5 mm"));
        assert!(attr.read_only);
        assert_eq!(desc.actions[0].name, "stop");

        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["component"], "Stage");
    }
}
