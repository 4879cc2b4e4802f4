// SPDX-License-Identifier: GPL-3.0-only

//! Normalized events published on the event bus

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declared property of an event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyType {
    pub name: String,
}

/// Static description of an event: who emits it, its name and its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    pub source_id: String,
    pub name: String,
    pub property_types: Vec<PropertyType>,
}

/// A published event instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub source_id: String,
    pub name: String,
    pub properties: BTreeMap<String, String>,
}
