//! Inbound envelope and response DTOs for the action endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// The envelope the automation platform posts to every action endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(default)]
    pub callback_id: Option<String>,
    #[serde(default)]
    pub origin: Option<Origin>,
    #[serde(default)]
    pub context: Option<JsonValue>,
    #[serde(default)]
    pub object: Option<ObjectRef>,
    #[serde(default)]
    pub input_fields: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub portal_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub object_id: Option<JsonValue>,
    #[serde(default)]
    pub properties: JsonValue,
}

impl ActionRequest {
    pub fn portal_id(&self) -> Option<i64> {
        self.origin.as_ref().and_then(|o| o.portal_id)
    }

    pub fn workflow_id(&self) -> Option<String> {
        let wf = self.context.as_ref()?.get("workflowId")?;
        match wf {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn object_ref(&self) -> Option<String> {
        let object = self.object.as_ref()?;
        let kind = object.object_type.as_deref().unwrap_or("object");
        let id = match &object.object_id {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => return None,
        };
        Some(format!("{}:{}", kind, id))
    }

    pub fn properties(&self) -> JsonValue {
        self.object
            .as_ref()
            .map(|o| o.properties.clone())
            .unwrap_or(JsonValue::Null)
    }

    /// String view of an input field; numbers and booleans stringify.
    pub fn input_str(&self, key: &str) -> Option<String> {
        match self.input_fields.get(key)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn input_bool(&self, key: &str) -> bool {
        match self.input_fields.get(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::String(s)) => {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
            }
            _ => false,
        }
    }

    pub fn input_i64(&self, key: &str) -> Option<i64> {
        match self.input_fields.get(key)? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Always-200 response body: `{"outputFields": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub output_fields: Map<String, JsonValue>,
}

impl ActionResponse {
    pub fn new(output_fields: Map<String, JsonValue>) -> Self {
        Self { output_fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_parses() {
        let req: ActionRequest = serde_json::from_value(json!({
            "callbackId": "ap-123",
            "origin": {"portalId": 42},
            "context": {"workflowId": 987},
            "object": {
                "objectType": "CONTACT",
                "objectId": "1001",
                "properties": {"firstname": "Ada"}
            },
            "inputFields": {"webhookUrl": "https://example.com", "retryOnFailure": "true"}
        }))
        .unwrap();

        assert_eq!(req.portal_id(), Some(42));
        assert_eq!(req.workflow_id().as_deref(), Some("987"));
        assert_eq!(req.object_ref().as_deref(), Some("CONTACT:1001"));
        assert!(req.input_bool("retryOnFailure"));
        assert_eq!(req.input_str("webhookUrl").as_deref(), Some("https://example.com"));
    }

    #[test]
    fn missing_pieces_are_none() {
        let req: ActionRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req.portal_id(), None);
        assert_eq!(req.workflow_id(), None);
        assert_eq!(req.object_ref(), None);
        assert!(!req.input_bool("retryOnFailure"));
    }
}
