//! Attribute mutation stages: add, remove, edit, and the rgb shorthand.

use super::{Stage, StageBase};
use crate::{Attribute, AttributeType, Error, PointCloud, Result, Schema};
use serde_json::Value;
use std::any::Any;

fn reserved(name: &str) -> bool {
    matches!(Schema::normalize_name(name), "flags" | "X" | "Y" | "Z")
}

/// Adds a named attribute to every point of the chunk.
#[derive(Clone, Debug, Default)]
pub struct AddAttribute {
    base: StageBase,
    attribute: Option<Attribute>,
}

impl AddAttribute {
    /// Creates the stage.
    pub fn new() -> AddAttribute {
        AddAttribute::default()
    }
}

impl Stage for AddAttribute {
    fn name(&self) -> &'static str {
        "add_attribute"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        let name = parameters
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidFilter("add_attribute requires a name".to_string()))?;
        let data_type = parameters
            .get("data_type")
            .and_then(Value::as_str)
            .and_then(AttributeType::from_name)
            .ok_or_else(|| {
                Error::InvalidFilter("add_attribute requires a valid data_type".to_string())
            })?;
        let scale = parameters.get("scale").and_then(Value::as_f64).unwrap_or(1.0);
        let offset = parameters.get("offset").and_then(Value::as_f64).unwrap_or(0.0);
        let description = parameters
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.attribute =
            Some(Attribute::scaled(name, data_type, scale, offset).describe(description));
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let (Some(cloud), Some(attribute)) = (cloud.as_mut(), &self.attribute) else {
            return Ok(());
        };
        cloud.add_attribute(attribute.clone())
    }
}

/// Removes a named attribute from every point of the chunk.
#[derive(Clone, Debug, Default)]
pub struct RemoveAttribute {
    base: StageBase,
    attribute: String,
}

impl RemoveAttribute {
    /// Creates the stage.
    pub fn new() -> RemoveAttribute {
        RemoveAttribute::default()
    }
}

impl Stage for RemoveAttribute {
    fn name(&self) -> &'static str {
        "remove_attribute"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        let name = parameters
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidFilter("remove_attribute requires a name".to_string()))?;
        if reserved(name) {
            return Err(Error::ReservedAttribute(name.to_string()));
        }
        self.attribute = Schema::normalize_name(name).to_string();
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        cloud.remove_attribute(&self.attribute)
    }
}

/// Adds the `{R, G, B}` color channels.
#[derive(Clone, Debug, Default)]
pub struct AddRgb {
    base: StageBase,
}

impl AddRgb {
    /// Creates the stage.
    pub fn new() -> AddRgb {
        AddRgb::default()
    }
}

impl Stage for AddRgb {
    fn name(&self) -> &'static str {
        "add_rgb"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        cloud.add_rgb()
    }
}

/// Assigns a constant value to an attribute on the points selected by the
/// stage filter.
///
/// Coordinates cannot be edited through this path: moving points would
/// silently invalidate the chunk planning and the spatial indices.
#[derive(Clone, Debug, Default)]
pub struct EditAttribute {
    base: StageBase,
    attribute: String,
    value: f64,
}

impl EditAttribute {
    /// Creates the stage.
    pub fn new() -> EditAttribute {
        EditAttribute::default()
    }
}

impl Stage for EditAttribute {
    fn name(&self) -> &'static str {
        "edit_attribute"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        let name = parameters
            .get("attribute")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidFilter("edit_attribute requires an attribute".to_string())
            })?;
        if reserved(name) {
            return Err(Error::ReservedAttribute(name.to_string()));
        }
        self.attribute = Schema::normalize_name(name).to_string();
        self.value = parameters
            .get("value")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::InvalidFilter("edit_attribute requires a value".to_string()))?;
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        let mut selected = Vec::new();
        while let Some(index) = cloud.read_point(false) {
            if !self.base.rejects(&cloud.view(index)) {
                selected.push(index);
            }
        }
        for index in selected {
            cloud.view_mut(index).set_value(&self.attribute, self.value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, Point, PointFilter};

    fn cloud() -> PointCloud {
        let mut header = Header::default();
        header.number_of_points = 5;
        header
            .schema
            .add_attribute(Attribute::new("Classification", AttributeType::Uint8));
        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        for i in 0..5 {
            point.set_z(f64::from(i));
            cloud.add_point(&point).unwrap();
        }
        cloud.update_header();
        cloud
    }

    #[test]
    fn add_then_remove_restores_the_schema() {
        let mut payload = Some(cloud());
        let schema = payload.as_ref().unwrap().schema().clone();

        let mut add = AddAttribute::new();
        add.set_parameters(&serde_json::json!({
            "name": "Amplitude", "data_type": "FLOAT"
        }))
        .unwrap();
        add.process_cloud(&mut payload).unwrap();
        assert!(payload.as_ref().unwrap().schema().has_attribute("Amplitude"));

        let mut remove = RemoveAttribute::new();
        remove
            .set_parameters(&serde_json::json!({"name": "Amplitude"}))
            .unwrap();
        remove.process_cloud(&mut payload).unwrap();
        assert_eq!(schema, *payload.unwrap().schema());
    }

    #[test]
    fn reserved_names_are_rejected() {
        let mut remove = RemoveAttribute::new();
        assert!(matches!(
            remove.set_parameters(&serde_json::json!({"name": "z"})),
            Err(Error::ReservedAttribute(_))
        ));
        let mut edit = EditAttribute::new();
        assert!(matches!(
            edit.set_parameters(&serde_json::json!({"attribute": "X", "value": 1.0})),
            Err(Error::ReservedAttribute(_))
        ));
    }

    #[test]
    fn edit_applies_to_filtered_points() {
        let mut payload = Some(cloud());
        let mut edit = EditAttribute::new();
        edit.set_parameters(&serde_json::json!({
            "attribute": "Classification", "value": 2.0
        }))
        .unwrap();
        edit.set_filter(PointFilter::from_expressions(&["z < 2".to_string()]).unwrap());
        edit.process_cloud(&mut payload).unwrap();
        let cloud = payload.unwrap();
        assert_eq!(Some(2.0), cloud.view(0).value("Classification"));
        assert_eq!(Some(2.0), cloud.view(1).value("Classification"));
        assert_eq!(Some(0.0), cloud.view(2).value("Classification"));
    }
}
