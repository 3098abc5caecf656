use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between collection name and record id inside a document id.
pub const ID_SEPARATOR: &str = "::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<RecordDocument>,
}

/// One top-level record of the tree, e.g. `sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub value: Value,
}

pub fn record_doc_id(collection: &str, id: &str) -> String {
    format!("{collection}{ID_SEPARATOR}{id}")
}

pub fn collection_prefix(collection: &str) -> String {
    format!("{collection}{ID_SEPARATOR}")
}

/// Recover the record id from a document id of the given collection.
pub fn record_id<'a>(collection: &str, doc_id: &'a str) -> Option<&'a str> {
    doc_id
        .strip_prefix(collection)?
        .strip_prefix(ID_SEPARATOR)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_ids_round_trip_through_collection_prefix() {
        let doc_id = record_doc_id("sessions", "0190abc");
        assert_eq!(doc_id, "sessions::0190abc");
        assert!(doc_id.starts_with(&collection_prefix("sessions")));
        assert_eq!(record_id("sessions", &doc_id), Some("0190abc"));
        assert_eq!(record_id("quizzes", &doc_id), None);
        assert_eq!(record_id("sessions", "sessions::"), None);
    }
}
