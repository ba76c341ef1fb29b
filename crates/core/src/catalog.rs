//! Tool catalog: provider descriptors in the shape the model service expects.

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::tool::ToolDescriptor;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Map provider descriptors 1:1 onto model tool schemas.
///
/// The input schema is copied untouched. A descriptor with an empty name or a
/// schema that is not a JSON object cannot be offered to the model and is
/// reported instead of silently dropped.
pub fn to_model_schema(descriptors: &[ToolDescriptor]) -> Result<Vec<ToolSchema>, CatalogError> {
    descriptors
        .iter()
        .enumerate()
        .map(|(index, d)| {
            if d.name.trim().is_empty() {
                return Err(CatalogError::EmptyName { index });
            }
            if !d.input_schema.is_object() {
                return Err(CatalogError::InvalidSchema {
                    name: d.name.clone(),
                });
            }
            Ok(ToolSchema {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.input_schema.clone(),
            })
        })
        .collect()
}
