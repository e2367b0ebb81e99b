use crate::types::{DataType, Value};

/// Column definition: name, type, and the per-column properties the row
/// engine enforces on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
    not_null: bool,
    default_value: Option<Value>,
    max_length: Option<u32>,
    identity: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
            default_value: None,
            max_length: None,
            identity: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Marks the column as the table's identity column. Identity implies
    /// NOT NULL.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.not_null = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_not_null(&self) -> bool {
        self.not_null
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn max_length(&self) -> Option<u32> {
        self.max_length
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_implies_not_null() {
        let col = ColumnDef::new("id", DataType::BigInt).identity();

        assert!(col.is_identity());
        assert!(col.is_not_null());
    }

    #[test]
    fn builder_carries_default_and_length() {
        let col = ColumnDef::new("status", DataType::Varchar)
            .with_max_length(10)
            .with_default(Value::Text("active".into()));

        assert_eq!(col.max_length(), Some(10));
        assert_eq!(col.default_value(), Some(&Value::Text("active".into())));
    }
}
