//! Hand-written schemas for fields that stay opaque to the API server.

use schemars::{Schema, SchemaGenerator, json_schema};

/// Free-form object (Helm values).
pub fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// List of free-form objects (recursive chart lists, core components).
pub fn preserve_unknown_list(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}
