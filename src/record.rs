// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Canonical change records.
//!
//! One [`ChangeRecord`] describes one source mutation, independent of the
//! oplog wire format and of the sink. Records come from two producers:
//!
//! - the log tailer, decoding `local.oplog.rs` entries with
//!   [`ChangeRecord::from_oplog`], and
//! - the snapshot importer, wrapping full documents with
//!   [`ChangeRecord::snapshot_insert`].
//!
//! # Oplog Entry Shape
//!
//! ```text
//! { ts: Timestamp(time, inc), h: i64, v: i32, op: "i"|"u"|"d"|"n",
//!   ns: "db.collection", o: { .. }, o2: { _id: .. }, fromMigrate: true? }
//! ```
//!
//! Only `ts`, `op` and `ns` are required. Unknown op codes decode to
//! [`Operation::Other`] and are applied as no-ops.

use crate::error::{Result, RiverError};
use bson::{Bson, Document, Timestamp};
use std::fmt;

/// Position of an entry in the replication log.
///
/// Ordered by `(time, increment)`, which is the order the source appends
/// entries in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    /// Seconds since the epoch
    pub time: u32,
    /// Ordinal within the second
    pub increment: u32,
}

impl Position {
    pub const fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }

    /// Pack into the 64-bit form stored in the sink settings.
    pub fn as_u64(&self) -> u64 {
        ((self.time as u64) << 32) | self.increment as u64
    }

    /// Unpack a value produced by [`as_u64`](Self::as_u64).
    pub fn from_u64(value: u64) -> Self {
        Self {
            time: (value >> 32) as u32,
            increment: value as u32,
        }
    }

    /// The BSON timestamp used in oplog queries.
    pub fn to_timestamp(&self) -> Timestamp {
        Timestamp {
            time: self.time,
            increment: self.increment,
        }
    }
}

impl From<Timestamp> for Position {
    fn from(ts: Timestamp) -> Self {
        Self {
            time: ts.time,
            increment: ts.increment,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.time, self.increment)
    }
}

/// Kind of mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Noop,
    /// Any op code we do not apply (commands, future codes).
    Other(String),
}

impl Operation {
    /// Decode an oplog op code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "i" => Operation::Insert,
            "u" => Operation::Update,
            "d" => Operation::Delete,
            "n" => Operation::Noop,
            other => Operation::Other(other.to_string()),
        }
    }

    /// The oplog op code.
    pub fn code(&self) -> &str {
        match self {
            Operation::Insert => "i",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Noop => "n",
            Operation::Other(code) => code,
        }
    }

    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Noop => "noop",
            Operation::Other(_) => "other",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical change record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Log position. `None` for synthetic snapshot records, which never
    /// move the checkpoint.
    pub position: Option<Position>,
    /// Source history id (`h`), when present
    pub history_id: Option<i64>,
    /// Oplog format version (`v`), when present
    pub source_version: Option<i32>,
    pub operation: Operation,
    /// `database.collection`
    pub namespace: String,
    /// Document payload (`o`)
    pub object: Document,
    /// Target document selector for updates and deletes (`o2`)
    pub filter: Option<Document>,
    /// Entry was written by chunk migration / rebalancing
    pub from_migrate: bool,
}

impl ChangeRecord {
    /// Decode a raw oplog entry.
    pub fn from_oplog(entry: &Document) -> Result<Self> {
        let ts = entry
            .get_timestamp("ts")
            .map_err(|e| RiverError::InvalidRecord(format!("ts: {}", e)))?;
        let op = entry
            .get_str("op")
            .map_err(|e| RiverError::InvalidRecord(format!("op: {}", e)))?;
        let namespace = entry
            .get_str("ns")
            .map_err(|e| RiverError::InvalidRecord(format!("ns: {}", e)))?;

        let object = match entry.get("o") {
            Some(Bson::Document(doc)) => doc.clone(),
            Some(other) => {
                return Err(RiverError::InvalidRecord(format!(
                    "o: expected document, got {:?}",
                    other.element_type()
                )))
            }
            None => Document::new(),
        };

        let filter = match entry.get("o2") {
            Some(Bson::Document(doc)) => Some(doc.clone()),
            _ => None,
        };

        Ok(Self {
            position: Some(Position::from(ts)),
            history_id: integer_field(entry, "h"),
            source_version: integer_field(entry, "v").map(|v| v as i32),
            operation: Operation::from_code(op),
            namespace: namespace.to_string(),
            object,
            filter,
            from_migrate: matches!(entry.get("fromMigrate"), Some(Bson::Boolean(true))),
        })
    }

    /// Wrap a full collection document as an insert.
    pub fn snapshot_insert(namespace: impl Into<String>, document: Document) -> Self {
        Self {
            position: None,
            history_id: None,
            source_version: None,
            operation: Operation::Insert,
            namespace: namespace.into(),
            object: document,
            filter: None,
            from_migrate: false,
        }
    }

    /// Whether the tailer should deliver this record for `namespace`.
    pub fn is_relevant(&self, namespace: &str) -> bool {
        !self.from_migrate && self.namespace == namespace
    }

    /// The `_id` identifying the target document.
    ///
    /// Inserts carry it in the object. Updates and deletes carry it in the
    /// filter; delete entries written without `o2` carry it in the object.
    pub fn target_id(&self) -> Option<&Bson> {
        match self.operation {
            Operation::Insert => self.object.get("_id"),
            _ => self
                .filter
                .as_ref()
                .and_then(|f| f.get("_id"))
                .or_else(|| self.object.get("_id")),
        }
    }
}

/// Read an integer field stored as either int32 or int64.
fn integer_field(entry: &Document, key: &str) -> Option<i64> {
    match entry.get(key) {
        Some(Bson::Int64(v)) => Some(*v),
        Some(Bson::Int32(v)) => Some(*v as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;

    fn oplog_entry(op: &str) -> Document {
        doc! {
            "ts": Timestamp { time: 1_700_000_000, increment: 3 },
            "h": 42_i64,
            "v": 2_i32,
            "op": op,
            "ns": "db.col",
            "o": { "_id": "507f191e810c19729de860ea", "name": "x" },
        }
    }

    #[test]
    fn test_position_ordering() {
        let a = Position::new(10, 5);
        let b = Position::new(10, 6);
        let c = Position::new(11, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn test_position_packing() {
        let pos = Position::new(1_700_000_000, 17);
        assert_eq!(Position::from_u64(pos.as_u64()), pos);
        assert!(Position::new(1, 0).as_u64() > Position::new(0, u32::MAX).as_u64());
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position::new(12, 3).to_string(), "12:3");
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(Operation::from_code("i"), Operation::Insert);
        assert_eq!(Operation::from_code("u"), Operation::Update);
        assert_eq!(Operation::from_code("d"), Operation::Delete);
        assert_eq!(Operation::from_code("n"), Operation::Noop);
        assert_eq!(Operation::from_code("c"), Operation::Other("c".to_string()));
        assert_eq!(Operation::from_code("c").code(), "c");
        assert_eq!(Operation::Update.to_string(), "update");
    }

    #[test]
    fn test_from_oplog_insert() {
        let record = ChangeRecord::from_oplog(&oplog_entry("i")).unwrap();
        assert_eq!(record.position, Some(Position::new(1_700_000_000, 3)));
        assert_eq!(record.history_id, Some(42));
        assert_eq!(record.source_version, Some(2));
        assert_eq!(record.operation, Operation::Insert);
        assert_eq!(record.namespace, "db.col");
        assert_eq!(record.object.get_str("name").unwrap(), "x");
        assert!(record.filter.is_none());
        assert!(!record.from_migrate);
    }

    #[test]
    fn test_from_oplog_update_filter() {
        let mut entry = oplog_entry("u");
        entry.insert("o", doc! { "name": "y" });
        entry.insert("o2", doc! { "_id": "507f191e810c19729de860ea" });
        let record = ChangeRecord::from_oplog(&entry).unwrap();
        assert_eq!(record.operation, Operation::Update);
        assert_eq!(
            record.target_id(),
            Some(&Bson::String("507f191e810c19729de860ea".to_string()))
        );
    }

    #[test]
    fn test_delete_target_falls_back_to_object() {
        let oid = ObjectId::parse_str("507f191e810c19729de860ea").unwrap();
        let mut entry = oplog_entry("d");
        entry.insert("o", doc! { "_id": oid });
        let record = ChangeRecord::from_oplog(&entry).unwrap();
        assert_eq!(record.target_id(), Some(&Bson::ObjectId(oid)));
    }

    #[test]
    fn test_from_oplog_migration_flag() {
        let mut entry = oplog_entry("i");
        entry.insert("fromMigrate", true);
        let record = ChangeRecord::from_oplog(&entry).unwrap();
        assert!(record.from_migrate);
        assert!(!record.is_relevant("db.col"));
    }

    #[test]
    fn test_is_relevant_namespace() {
        let record = ChangeRecord::from_oplog(&oplog_entry("i")).unwrap();
        assert!(record.is_relevant("db.col"));
        assert!(!record.is_relevant("db.other"));
    }

    #[test]
    fn test_from_oplog_missing_fields() {
        let mut entry = oplog_entry("i");
        entry.remove("ts");
        assert!(matches!(
            ChangeRecord::from_oplog(&entry),
            Err(RiverError::InvalidRecord(_))
        ));

        let mut entry = oplog_entry("i");
        entry.remove("ns");
        assert!(ChangeRecord::from_oplog(&entry).is_err());
    }

    #[test]
    fn test_from_oplog_non_document_object() {
        let mut entry = oplog_entry("i");
        entry.insert("o", "not a document");
        assert!(ChangeRecord::from_oplog(&entry).is_err());
    }

    #[test]
    fn test_from_oplog_unknown_op() {
        let record = ChangeRecord::from_oplog(&oplog_entry("c")).unwrap();
        assert_eq!(record.operation, Operation::Other("c".to_string()));
    }

    #[test]
    fn test_snapshot_insert_has_no_position() {
        let record = ChangeRecord::snapshot_insert("db.col", doc! { "_id": 1 });
        assert_eq!(record.position, None);
        assert_eq!(record.operation, Operation::Insert);
        assert_eq!(record.target_id(), Some(&Bson::Int32(1)));
    }
}
