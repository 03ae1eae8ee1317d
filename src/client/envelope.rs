use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Uniform result shape returned by the verb surface.
///
/// An object body with a boolean `success` follows the backend's
/// `{success, data, message, error}` convention and its `success` is always honoured. A nested
/// `error: {message, code}` is flattened into `error` and `code`. Any other JSON body is wrapped
/// as successful `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Top-level fields outside the convention, kept for callers that need them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: (!data.is_null()).then_some(data),
            message: None,
            error: None,
            code: None,
            extra: Map::new(),
        }
    }

    pub fn from_body(body: Value) -> Self {
        let Value::Object(mut fields) = body else {
            return Self::ok(body);
        };
        let Some(success) = fields.get("success").and_then(Value::as_bool) else {
            return Self::ok(Value::Object(fields));
        };
        fields.remove("success");

        let data = fields.remove("data").filter(|d| !d.is_null());
        let message = fields.remove("message").and_then(text_of);
        let mut code = fields.remove("code").and_then(text_of);
        let error = match fields.remove("error") {
            Some(Value::Object(inner)) => {
                code = code.or_else(|| inner.get("code").cloned().and_then(text_of));
                text_of(Value::Object(inner))
            }
            Some(other) => text_of(other),
            None => None,
        };

        Self {
            success,
            data,
            message,
            error,
            code,
            extra: fields,
        }
    }

    /// Decode `data` into a typed value. Missing data decodes as JSON `null`.
    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.data.clone().unwrap_or(Value::Null))
    }

    /// Field `name` of `data`, if `data` is an object.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref()?.get(name)
    }

    /// Field `name` of `data`, falling back to a top-level field of the same name.
    pub fn field_or_top(&self, name: &str) -> Option<&Value> {
        self.field(name).or_else(|| self.extra.get(name))
    }
}

/// Render a convention field as text. Strings are taken as-is and objects offer their own
/// `message`; anything else is serialized.
fn text_of(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Object(ref o) if o.get("message").map(Value::is_string).unwrap_or(false) => {
            o.get("message").and_then(Value::as_str).map(str::to_string)
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_backend_envelopes() {
        let env = ApiEnvelope::from_body(json!({
            "success": true,
            "data": {"items": [1, 2]},
            "message": "ok"
        }));
        assert!(env.success);
        assert_eq!(env.field("items"), Some(&json!([1, 2])));
        assert_eq!(env.message.as_deref(), Some("ok"));

        let failed = ApiEnvelope::from_body(json!({"success": false, "error": "out of stock"}));
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("out of stock"));

        let flat = ApiEnvelope::from_body(json!({"success": true, "token": "t"}));
        assert_eq!(flat.field("token"), None);
        assert_eq!(flat.field_or_top("token"), Some(&json!("t")));
    }

    #[test]
    fn failure_with_nested_error_stays_a_failure() {
        let env = ApiEnvelope::from_body(json!({
            "success": false,
            "error": {"message": "out of stock", "code": "OOS"}
        }));
        assert!(!env.success);
        assert!(env.data.is_none());
        assert_eq!(env.error.as_deref(), Some("out of stock"));
        assert_eq!(env.code.as_deref(), Some("OOS"));

        let env = ApiEnvelope::from_body(json!({
            "success": false,
            "message": {"message": "held for audit"},
            "error": {"reason": "locked"}
        }));
        assert!(!env.success);
        assert_eq!(env.message.as_deref(), Some("held for audit"));
        assert_eq!(env.error.as_deref(), Some(r#"{"reason":"locked"}"#));
    }

    #[test]
    fn wraps_anything_else() {
        let env = ApiEnvelope::from_body(json!([{"sku": "A-1"}]));
        assert!(env.success);
        assert_eq!(env.data, Some(json!([{"sku": "A-1"}])));

        // `success` that is not a boolean is just data.
        let env = ApiEnvelope::from_body(json!({"success": "yes"}));
        assert_eq!(env.data, Some(json!({"success": "yes"})));

        let empty = ApiEnvelope::from_body(Value::Null);
        assert!(empty.success);
        assert!(empty.data.is_none());
    }

    #[test]
    fn typed_data() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Stock {
            sku: String,
            quantity: u32,
        }
        let env = ApiEnvelope::ok(json!({"sku": "A-1", "quantity": 4}));
        assert_eq!(
            env.data_as::<Stock>().unwrap(),
            Stock {
                sku: "A-1".into(),
                quantity: 4
            }
        );
        assert!(ApiEnvelope::ok(Value::Null).data_as::<Stock>().is_err());
    }
}
