use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;

/// A JSON Schema document compiled once at registration time.
pub struct SchemaValidator {
    schema: Value,
    compiled: JSONSchema,
}

impl SchemaValidator {
    pub fn compile(schema: Value) -> Result<Self, String> {
        let compiled = JSONSchema::compile(&schema).map_err(|e| e.to_string())?;
        Ok(Self { schema, compiled })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Checks `instance`, joining every violation into one message.
    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let details: Vec<String> = errors.map(|e| e.to_string()).collect();
                Err(details.join("; "))
            }
        }
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schema", &self.schema)
            .finish()
    }
}
