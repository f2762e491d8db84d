//! Untyped bus payloads and typed field access.
//!
//! Payload schemas are owned by the publisher; consumers read only the
//! fields they need and treat a missing or malformed field as "absent".

use std::str::FromStr;

/// Ordered key → value payload carried by every bus message.
pub type Payload = serde_json::Map<String, serde_json::Value>;

pub mod keys {
    pub const ID: &str = "id";
    pub const CONNECTOR: &str = "connector";
    pub const DEVICE: &str = "device";
    pub const CHANNEL: &str = "channel";
    pub const PROPERTY: &str = "property";
    pub const NAME: &str = "name";
    pub const EXPECTED_VALUE: &str = "expected_value";
    pub const ACTUAL_VALUE: &str = "actual_value";
}

/// Typed accessors over a [`Payload`].
pub trait PayloadExt {
    /// Read a string field.
    fn str_field(&self, key: &str) -> Option<&str>;

    /// Read a string field and parse it (ids, enum names).
    fn parsed_field<T: FromStr>(&self, key: &str) -> Option<T> {
        self.str_field(key).and_then(|raw| raw.parse().ok())
    }
}

impl PayloadExt for Payload {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(serde_json::Value::as_str)
    }
}
