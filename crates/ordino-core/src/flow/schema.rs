//! Optional context schema validation.
//!
//! Flows can name a `context_schema`; after a turn's actions run, the
//! engine hands the context data to this validator and logs whatever
//! comes back. Schema failures are diagnostics, never fatal to the turn.

use serde_json::{Map, Value};

/// Report from a schema validation pass.
#[derive(Debug, Clone, Default)]
pub struct SchemaReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SchemaReport {
    /// A passing report with no findings.
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Checks context data against a named schema.
///
/// Synchronous and object-safe: implementations hold pre-compiled schemas
/// and validate in memory. The engine treats a missing schema name the
/// same as a passing report.
pub trait ContextSchemaValidator: Send + Sync {
    fn validate(&self, schema: &str, data: &Map<String, Value>) -> SchemaReport;
}

/// Default validator that accepts everything.
#[derive(Debug, Default)]
pub struct NoopSchemaValidator;

impl ContextSchemaValidator for NoopSchemaValidator {
    fn validate(&self, _schema: &str, _data: &Map<String, Value>) -> SchemaReport {
        SchemaReport::ok()
    }
}
