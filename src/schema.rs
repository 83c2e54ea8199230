// houndb - schema.rs
// Declared attribute types and record validation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{BlobRef, Properties, Value};
use crate::{HoundError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Text,
    Number,
    Blob,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Text => "TEXT",
            DataType::Number => "NUMBER",
            DataType::Blob => "BLOB",
        };
        f.pad(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attribute {
    /// An optional attribute.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Ordered attribute declarations of a collection.
///
/// Existing attributes never change; the schema can only grow by optional
/// attributes (see [`Schema::add_attribute`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    attributes: Vec<Attribute>,
}

impl Schema {
    /// # Errors
    /// `SchemaViolation` on an empty or duplicate attribute name.
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        let mut schema = Schema::default();
        for attr in attributes {
            schema.push(attr)?;
        }
        Ok(schema)
    }

    fn push(&mut self, attr: Attribute) -> Result<()> {
        if attr.name.trim().is_empty() {
            return Err(HoundError::schema("", "attribute name must not be empty"));
        }
        if self.get(&attr.name).is_some() {
            return Err(HoundError::schema(&attr.name, "duplicate attribute name"));
        }
        self.attributes.push(attr);
        Ok(())
    }

    /// Add a new optional attribute.
    ///
    /// # Errors
    /// `SchemaViolation` if the attribute is required or the name is taken.
    pub fn add_attribute(&mut self, attr: Attribute) -> Result<()> {
        if attr.required {
            return Err(HoundError::schema(
                &attr.name,
                "attributes added after creation must be optional",
            ));
        }
        self.push(attr)
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Check a property map against the schema.
    ///
    /// `blob_exists` reports whether a referenced blob is present in the
    /// owning collection's blob store.
    pub fn validate<F>(&self, properties: &Properties, blob_exists: F) -> Result<()>
    where
        F: Fn(&BlobRef) -> bool,
    {
        for (name, value) in properties {
            let attr = self
                .get(name)
                .ok_or_else(|| HoundError::schema(name, "attribute not declared in schema"))?;

            if value.data_type() != attr.data_type {
                return Err(HoundError::schema(
                    name,
                    format!("expected {}, got {}", attr.data_type, value.data_type()),
                ));
            }

            match value {
                Value::Number(n) if !n.is_finite() => {
                    return Err(HoundError::schema(name, "number must be finite"));
                }
                Value::Blob(blob) if !blob_exists(blob) => {
                    return Err(HoundError::schema(
                        name,
                        format!("dangling blob reference {}", blob.key),
                    ));
                }
                _ => {}
            }
        }

        if let Some(missing) = self
            .attributes
            .iter()
            .find(|a| a.required && !properties.contains_key(&a.name))
        {
            return Err(HoundError::schema(&missing.name, "required attribute missing"));
        }

        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
