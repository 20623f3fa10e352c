/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// One dataset row: column name to JSON value, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Run identifiers are UUIDv7 strings minted by the registry.
pub type RunId = String;
