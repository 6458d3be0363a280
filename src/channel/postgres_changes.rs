use crate::types::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type Record = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PostgresChangeEvent {
    #[serde(rename = "*")]
    All,
    Insert,
    Update,
    Delete,
}

/// Which database changes a `postgres_changes` binding wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresChangesFilter {
    pub event: PostgresChangeEvent,
    pub schema: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Row filter expression evaluated by the server, e.g. `id=eq.1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PostgresChangesFilter {
    pub fn new(event: PostgresChangeEvent, schema: impl Into<String>) -> Self {
        Self {
            event,
            schema: schema.into(),
            table: None,
            filter: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Event type is `*` or equal, schema is equal, table is unset or equal.
    /// The row filter expression is applied server-side only.
    pub fn matches(&self, payload: &PostgresChangesPayload) -> bool {
        let event_matches = self.event == PostgresChangeEvent::All
            || self.event == payload.event_type();
        let table_matches = self
            .table
            .as_deref()
            .is_none_or(|table| table == payload.table());

        event_matches && self.schema == payload.schema() && table_matches
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PostgresChangesPayloadBase {
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub commit_timestamp: String,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

// Server field names are `record`/`old_record`; exposed as `new`/`old`.
#[derive(Deserialize)]
struct InsertRaw {
    #[serde(flatten)]
    base: PostgresChangesPayloadBase,
    #[serde(default)]
    record: Record,
}

#[derive(Deserialize)]
struct UpdateRaw {
    #[serde(flatten)]
    base: PostgresChangesPayloadBase,
    #[serde(default)]
    record: Record,
    #[serde(default)]
    old_record: Record,
}

#[derive(Deserialize)]
struct DeleteRaw {
    #[serde(flatten)]
    base: PostgresChangesPayloadBase,
    #[serde(default)]
    old_record: Record,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "InsertRaw")]
pub struct PostgresInsertPayload {
    #[serde(flatten)]
    pub base: PostgresChangesPayloadBase,
    pub new: Record,
}

impl From<InsertRaw> for PostgresInsertPayload {
    fn from(raw: InsertRaw) -> Self {
        Self {
            base: raw.base,
            new: raw.record,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "UpdateRaw")]
pub struct PostgresUpdatePayload {
    #[serde(flatten)]
    pub base: PostgresChangesPayloadBase,
    pub new: Record,
    pub old: Record,
}

impl From<UpdateRaw> for PostgresUpdatePayload {
    fn from(raw: UpdateRaw) -> Self {
        Self {
            base: raw.base,
            new: raw.record,
            old: raw.old_record,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "DeleteRaw")]
pub struct PostgresDeletePayload {
    #[serde(flatten)]
    pub base: PostgresChangesPayloadBase,
    pub old: Record,
}

impl From<DeleteRaw> for PostgresDeletePayload {
    fn from(raw: DeleteRaw) -> Self {
        Self {
            base: raw.base,
            old: raw.old_record,
        }
    }
}

/// One change record delivered by a `postgres_changes` frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum PostgresChangesPayload {
    Insert(PostgresInsertPayload),
    Update(PostgresUpdatePayload),
    Delete(PostgresDeletePayload),
}

impl PostgresChangesPayload {
    /// Reads the change record out of a frame payload, which nests it under `data`.
    pub fn from_frame(payload: &Value) -> Result<Self> {
        let data = payload.get("data").unwrap_or(payload);
        Ok(Self::deserialize(data)?)
    }

    fn base(&self) -> &PostgresChangesPayloadBase {
        match self {
            Self::Insert(payload) => &payload.base,
            Self::Update(payload) => &payload.base,
            Self::Delete(payload) => &payload.base,
        }
    }

    pub fn event_type(&self) -> PostgresChangeEvent {
        match self {
            Self::Insert(_) => PostgresChangeEvent::Insert,
            Self::Update(_) => PostgresChangeEvent::Update,
            Self::Delete(_) => PostgresChangeEvent::Delete,
        }
    }

    pub fn schema(&self) -> &str {
        &self.base().schema
    }

    pub fn table(&self) -> &str {
        &self.base().table
    }

    pub fn commit_timestamp(&self) -> &str {
        &self.base().commit_timestamp
    }

    /// The row after the change (`None` for deletes)
    pub fn new_record(&self) -> Option<&Record> {
        match self {
            Self::Insert(payload) => Some(&payload.new),
            Self::Update(payload) => Some(&payload.new),
            Self::Delete(_) => None,
        }
    }

    /// The row before the change (`None` for inserts)
    pub fn old_record(&self) -> Option<&Record> {
        match self {
            Self::Insert(_) => None,
            Self::Update(payload) => Some(&payload.old),
            Self::Delete(payload) => Some(&payload.old),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(event_type: &str, schema: &str, table: &str) -> PostgresChangesPayload {
        PostgresChangesPayload::from_frame(&serde_json::json!({
            "ids": [1],
            "data": {
                "type": event_type,
                "schema": schema,
                "table": table,
                "commit_timestamp": "2025-11-27T16:16:54.545Z",
                "record": {"id": 1},
                "old_record": {"id": 1},
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_deserialize_insert_payload_from_server_format() {
        let json = r#"{
            "columns": [
                {"name": "id", "type": "int8"},
                {"name": "name", "type": "text"}
            ],
            "commit_timestamp": "2025-11-27T16:16:54.545Z",
            "errors": null,
            "record": {"id": 47, "name": "jena"},
            "schema": "public",
            "table": "users",
            "type": "INSERT"
        }"#;

        let payload: PostgresChangesPayload = serde_json::from_str(json).unwrap();

        let PostgresChangesPayload::Insert(insert) = &payload else {
            panic!("Expected Insert variant");
        };
        assert_eq!(insert.base.columns.len(), 2);
        assert_eq!(insert.new["name"], "jena");
        assert_eq!(payload.schema(), "public");
        assert_eq!(payload.table(), "users");
        assert!(payload.old_record().is_none());
    }

    #[test]
    fn test_deserialize_update_payload_from_frame() {
        let payload = PostgresChangesPayload::from_frame(&serde_json::json!({
            "ids": [7],
            "data": {
                "type": "UPDATE",
                "schema": "public",
                "table": "users",
                "commit_timestamp": "2025-11-27T16:20:00.000Z",
                "record": {"id": 47, "name": "new_name"},
                "old_record": {"id": 47, "name": "old_name"},
            }
        }))
        .unwrap();

        assert_eq!(payload.event_type(), PostgresChangeEvent::Update);
        assert_eq!(payload.new_record().unwrap()["name"], "new_name");
        assert_eq!(payload.old_record().unwrap()["name"], "old_name");
    }

    #[test]
    fn test_deserialize_delete_payload() {
        let payload = change("DELETE", "public", "users");
        assert_eq!(payload.event_type(), PostgresChangeEvent::Delete);
        assert!(payload.new_record().is_none());
        assert_eq!(payload.old_record().unwrap()["id"], 1);
    }

    #[test]
    fn test_filter_matching_rules() {
        let insert_users = PostgresChangesFilter::new(PostgresChangeEvent::Insert, "public")
            .table("users");
        assert!(insert_users.matches(&change("INSERT", "public", "users")));
        assert!(!insert_users.matches(&change("INSERT", "public", "posts")));
        assert!(!insert_users.matches(&change("UPDATE", "public", "users")));
        assert!(!insert_users.matches(&change("INSERT", "audit", "users")));

        let any_public = PostgresChangesFilter::new(PostgresChangeEvent::All, "public");
        assert!(any_public.matches(&change("DELETE", "public", "posts")));
        assert!(!any_public.matches(&change("DELETE", "private", "posts")));
    }

    #[test]
    fn test_row_filter_is_not_evaluated_locally() {
        let filter = PostgresChangesFilter::new(PostgresChangeEvent::All, "public")
            .table("users")
            .filter("id=eq.99");
        assert!(filter.matches(&change("INSERT", "public", "users")));
    }

    #[test]
    fn test_unknown_change_type_is_rejected() {
        let result = PostgresChangesPayload::from_frame(&serde_json::json!({
            "data": {"type": "TRUNCATE", "schema": "public", "table": "users"}
        }));
        assert!(result.is_err());
    }
}
