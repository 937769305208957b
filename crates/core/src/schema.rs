//! Tenant schema, read-only from the write path's perspective

use serde::{Deserialize, Serialize};

/// Which field index a posting list lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Every id carrying the term
    Primary,
    /// Only the most recent id carrying the term
    Latest,
}

impl FieldType {
    /// All field types, in merge order
    pub const ALL: [FieldType; 2] = [FieldType::Primary, FieldType::Latest];

    /// Short lowercase name used in logs and merge task names
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Primary => "primary",
            FieldType::Latest => "latest",
        }
    }
}

/// One schema field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Dense field id, index into the schema
    pub field_id: u32,
    /// Field name
    pub name: String,
    /// Maintain a per-id cardinality ledger for this field's terms
    #[serde(default)]
    pub track_cardinality: bool,
    /// Also maintain the `Latest` field index for this field
    #[serde(default)]
    pub index_latest: bool,
}

impl FieldDefinition {
    /// Plain field without cardinality or latest tracking
    pub fn new(field_id: u32, name: impl Into<String>) -> Self {
        Self {
            field_id,
            name: name.into(),
            track_cardinality: false,
            index_latest: false,
        }
    }

    /// Builder: enable the cardinality ledger
    pub fn with_cardinality(mut self) -> Self {
        self.track_cardinality = true;
        self
    }

    /// Builder: enable the latest index
    pub fn with_latest(mut self) -> Self {
        self.index_latest = true;
        self
    }
}

/// A tenant's field definitions, indexed by field id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name
    pub name: String,
    /// Field definitions; `fields[i].field_id == i`
    pub fields: Vec<FieldDefinition>,
}

impl Schema {
    /// Create a schema. Field ids are reassigned to their position.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        let fields = fields
            .into_iter()
            .enumerate()
            .map(|(i, mut f)| {
                f.field_id = i as u32;
                f
            })
            .collect();
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Number of fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Definition for a field id
    pub fn field(&self, field_id: u32) -> Option<&FieldDefinition> {
        self.fields.get(field_id as usize)
    }

    /// Look up a field id by name
    pub fn field_id(&self, name: &str) -> Option<u32> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.field_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_assigns_dense_ids() {
        let schema = Schema::new(
            "s",
            vec![
                FieldDefinition::new(9, "author"),
                FieldDefinition::new(9, "tag").with_cardinality(),
            ],
        );
        assert_eq!(schema.field_id("author"), Some(0));
        assert_eq!(schema.field_id("tag"), Some(1));
        assert!(schema.field(1).unwrap().track_cardinality);
        assert!(schema.field(2).is_none());
    }

    #[test]
    fn test_field_type_names() {
        assert_eq!(FieldType::Primary.name(), "primary");
        assert_eq!(FieldType::ALL.len(), 2);
    }
}
