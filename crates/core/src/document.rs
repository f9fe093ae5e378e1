use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CoreError;

/// Wire name of the schema version field in every save payload.
pub const VERSION_FIELD: &str = "saveVersion";

/// The save document: a schema version plus fields owned by the host's
/// gameplay code. The engine never interprets the fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveDocument {
    #[serde(rename = "saveVersion")]
    schema_version: u32,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl SaveDocument {
    /// A fresh document at `schema_version` seeded with `defaults`.
    pub fn fresh(schema_version: u32, defaults: &Map<String, Value>) -> Self {
        let mut fields = defaults.clone();
        fields.remove(VERSION_FIELD);
        Self {
            schema_version,
            fields,
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Typed read of a field. `Ok(None)` when the field is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| CoreError::Serialization(format!("field {key}: {e}"))),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), CoreError> {
        if key == VERSION_FIELD {
            return Err(CoreError::InvalidData(format!(
                "{VERSION_FIELD} is managed by the migration pipeline"
            )));
        }
        let value =
            serde_json::to_value(value).map_err(|e| CoreError::Serialization(e.to_string()))?;
        self.fields.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
