//! Core data types for FeatureForge
//!
//! These types describe the resources the offline and online stores operate
//! on. They are plain serde values so they can be embedded in serialized job
//! configurations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Kind of resource an offline table holds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OfflineResourceType {
    #[default]
    None,
    Label,
    Feature,
    TrainingSet,
    Primary,
    Transformation,
}

impl fmt::Display for OfflineResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Label => "label",
            Self::Feature => "feature",
            Self::TrainingSet => "training_set",
            Self::Primary => "primary",
            Self::Transformation => "transformation",
        };
        f.write_str(name)
    }
}

/// Identifies one variant of a named resource
///
/// # Examples
///
/// ```
/// use featureforge_core::{OfflineResourceType, ResourceID};
///
/// let id = ResourceID::new("avg_transactions", "v1", OfflineResourceType::Feature);
/// assert_eq!(id.to_string(), "feature/avg_transactions.v1");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceID {
    pub name: String,
    pub variant: String,
    pub resource_type: OfflineResourceType,
}

impl ResourceID {
    pub fn new(
        name: impl Into<String>,
        variant: impl Into<String>,
        resource_type: OfflineResourceType,
    ) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
            resource_type,
        }
    }

    /// Fails unless the id has the expected resource type
    pub fn check_type(&self, expected: &[OfflineResourceType]) -> Result<()> {
        if expected.contains(&self.resource_type) {
            Ok(())
        } else {
            Err(Error::invalid_input(format!(
                "{} has resource type {}, expected one of {:?}",
                self, self.resource_type, expected
            )))
        }
    }
}

impl fmt::Display for ResourceID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.resource_type, self.name, self.variant)
    }
}

/// Human-readable reference to a resource before metadata resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NameVariant {
    pub name: String,
    pub variant: String,
}

impl NameVariant {
    pub fn new(name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
        }
    }
}

/// Column value types understood by every backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Float,
    String,
    Bool,
    Timestamp,
    /// Fixed-length float vector (embeddings)
    FloatVector,
}

/// A single feature or label value
///
/// Serialized adjacently tagged so every variant survives a store round trip:
/// - `Int(42)` → `{"type":"Int","value":42}`
/// - `Null` → `{"type":"Null"}`
/// - `Json(5)` → `{"type":"Json","value":5}`
///
/// SQL columns hold bare values; [`FeatureValue::to_plain_json`] and
/// [`FeatureValue::from_plain_json`] convert to and from that form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum FeatureValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    ArrayInt(Vec<i64>),
    ArrayFloat(Vec<f64>),
    ArrayString(Vec<String>),
    Json(serde_json::Value),
}

impl FeatureValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The bare JSON form, as a typed SQL column would hold it
    pub fn to_plain_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Int(v) => Value::from(*v),
            Self::Float(v) => Value::from(*v),
            Self::String(v) => Value::from(v.as_str()),
            Self::Bool(v) => Value::from(*v),
            Self::ArrayInt(v) => Value::from(v.clone()),
            Self::ArrayFloat(v) => Value::from(v.clone()),
            Self::ArrayString(v) => Value::from(v.clone()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Infers a value from bare JSON
    ///
    /// Integers become `Int`, other numbers `Float`. Arrays whose elements
    /// share one scalar kind become the matching array variant; empty arrays
    /// are `ArrayInt`. Anything else is `Json`.
    pub fn from_plain_json(json: serde_json::Value) -> Self {
        use serde_json::Value;
        match json {
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(v),
            Value::String(v) => Self::String(v),
            Value::Number(n) => match n.as_i64() {
                Some(v) => Self::Int(v),
                None => n.as_f64().map_or(Self::Json(Value::Number(n)), Self::Float),
            },
            Value::Array(items) => {
                if let Some(ints) = items.iter().map(Value::as_i64).collect::<Option<Vec<_>>>() {
                    Self::ArrayInt(ints)
                } else if let Some(floats) =
                    items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>()
                {
                    Self::ArrayFloat(floats)
                } else if let Some(strings) = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                {
                    Self::ArrayString(strings)
                } else {
                    Self::Json(Value::Array(items))
                }
            }
            object @ Value::Object(_) => Self::Json(object),
        }
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<f64>> for FeatureValue {
    fn from(v: Vec<f64>) -> Self {
        Self::ArrayFloat(v)
    }
}

/// One timestamped value for one entity of a feature or label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub entity: String,
    pub value: FeatureValue,
    /// Defaults to the Unix epoch when a resource has no timestamp column
    pub ts: DateTime<Utc>,
}

impl ResourceRecord {
    /// Creates a record without a meaningful timestamp
    pub fn new(entity: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        Self {
            entity: entity.into(),
            value: value.into(),
            ts: DateTime::<Utc>::default(),
        }
    }

    /// Sets the record timestamp (builder pattern)
    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }

    /// Rejects records that cannot be keyed
    pub fn check(&self) -> Result<()> {
        if self.entity.is_empty() {
            return Err(Error::invalid_input("resource record has an empty entity"));
        }
        Ok(())
    }
}

/// A single row of a primary or transformation table
pub type GenericRecord = Vec<FeatureValue>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub value_type: ValueType,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Physical schema of a table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<TableColumn>,
}

impl TableSchema {
    pub fn new(columns: Vec<TableColumn>) -> Self {
        Self { columns }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Maps the columns of an existing source table onto a feature or label
///
/// `ts` may be empty when the source has no timestamp column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSchema {
    pub entity: String,
    pub value: String,
    pub ts: String,
    pub source_table: String,
}

/// Identifier of a materialized snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MaterializationID(pub String);

impl MaterializationID {
    /// Snapshot id used by every store for a feature resource
    pub fn for_resource(id: &ResourceID) -> Self {
        Self(format!("Materialization/{}/{}", id.name, id.variant))
    }
}

impl fmt::Display for MaterializationID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Definition of a training set: one label joined with features
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainingSetDef {
    pub id: ResourceID,
    pub label: ResourceID,
    pub features: Vec<ResourceID>,
}

impl TrainingSetDef {
    /// Validates resource types before any backend work is done
    pub fn check(&self) -> Result<()> {
        self.id.check_type(&[OfflineResourceType::TrainingSet])?;
        self.label.check_type(&[OfflineResourceType::Label])?;
        if self.features.is_empty() {
            return Err(Error::invalid_input(format!(
                "training set {} has no features",
                self.id
            )));
        }
        for feature in &self.features {
            feature.check_type(&[OfflineResourceType::Feature])?;
        }
        Ok(())
    }
}

/// One row of a training set; `features` follows `TrainingSetDef::features` order
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSetRow {
    pub features: Vec<FeatureValue>,
    pub label: FeatureValue,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransformationType {
    #[default]
    SQL,
    /// Dataframe transformation, executed by backends that host a dataframe engine
    DF,
}

/// Binds a `{{ name.variant }}` placeholder in a query to a backend table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMapping {
    pub template: String,
    pub source: String,
}

/// Backend-native transformation producing `target_table_id`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransformationConfig {
    pub transformation_type: TransformationType,
    pub target_table_id: ResourceID,
    pub query: String,
    pub source_mapping: Vec<SourceMapping>,
}
