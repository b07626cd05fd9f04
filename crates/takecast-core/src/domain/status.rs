//! Receiver status snapshot published to subscribers.
//!
//! A status value is immutable once built: every mutation on the receiver
//! produces a freshly allocated snapshot and subscribers keep the `Arc` they
//! were handed.

use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(f: &f64) -> bool {
    *f == 0.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiverStatus {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<ApplicationStatus>,
    #[serde(skip_serializing_if = "is_false")]
    pub is_active_input: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
}

impl ReceiverStatus {
    /// The snapshot a fresh receiver starts with.
    pub fn initial() -> Self {
        Self {
            applications: Vec::new(),
            is_active_input: true,
            volume: Some(Volume {
                level: 1.0,
                muted: false,
            }),
        }
    }

    pub fn running_application(&self) -> Option<&ApplicationStatus> {
        self.applications.first()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub universal_app_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    pub namespaces: Vec<NamespaceEntry>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status_text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub transport_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceEntry {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    #[serde(skip_serializing_if = "is_zero")]
    pub level: f64,
    pub muted: bool,
}
