// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Record access shared by every model: generated IDs, timestamps and
//! field validation on top of the untyped store.

use tabula_store_core::{Row, Value};
use time::OffsetDateTime;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::id::generate_row_id;
use crate::schema;
use crate::timestamp::{self, CREATED_AT, UPDATED_AT};

/// Field holding a record's own row ID.
pub const ID: &str = "id";

/// Parsed `createdAt` / `updatedAt` of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTimestamps {
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Borrowed view of a [`Database`] for record-level operations.
#[derive(Debug, Clone, Copy)]
pub struct Records<'db> {
    db: &'db Database,
}

impl<'db> Records<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Insert a new record.
    ///
    /// Uses the string `id` field when present, otherwise generates one.
    /// A supplied ID that is already taken fails with
    /// [`Error::Exists`]. `createdAt` and `updatedAt` are set to now.
    /// Returns the stored row.
    pub fn create(&self, collection: &str, mut fields: Row) -> Result<Row> {
        schema::validate(collection, &fields)?;
        let id = match fields.get(ID) {
            Some(Value::String(id)) if !id.is_empty() => {
                if self.db.store().has_row(collection, id) {
                    return Err(Error::Exists {
                        collection: collection.to_owned(),
                        id: id.clone(),
                    });
                }
                id.clone()
            }
            _ => generate_row_id()?,
        };
        let now = timestamp::now()?;
        fields.insert(ID.to_owned(), Value::String(id.clone()));
        fields.insert(CREATED_AT.to_owned(), Value::String(now.clone()));
        fields.insert(UPDATED_AT.to_owned(), Value::String(now));

        self.db.store().set_row(collection, &id, fields.clone());
        Ok(fields)
    }

    pub fn find(&self, collection: &str, id: &str) -> Option<Row> {
        self.db.store().row(collection, id)
    }

    /// Merge `partial` into an existing record and bump `updatedAt`.
    ///
    /// `id` and `createdAt` in `partial` are ignored. Returns `None` if
    /// the record does not exist.
    pub fn update(&self, collection: &str, id: &str, mut partial: Row) -> Result<Option<Row>> {
        partial.remove(ID);
        partial.remove(CREATED_AT);
        schema::validate(collection, &partial)?;

        partial.insert(UPDATED_AT.to_owned(), Value::String(timestamp::now()?));
        let store = self.db.store();
        if !store.set_partial_row(collection, id, partial) {
            return Ok(None);
        }
        Ok(store.row(collection, id))
    }

    /// Returns `false` if the record did not exist.
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        self.db.store().del_row(collection, id)
    }

    /// Records whose indexed field equals `value`, in row ID order.
    pub fn find_by_index(&self, index: &str, value: impl Into<Value>) -> Vec<Row> {
        let Some(definition) = self.db.indexes().index_definition(index) else {
            return Vec::new();
        };
        let store = self.db.store();
        self.db
            .indexes()
            .slice_row_ids(index, value)
            .iter()
            .filter_map(|id| store.row(&definition.collection, id))
            .collect()
    }

    /// Records of `relationship`'s local collection pointing at
    /// `remote_id`.
    pub fn find_related(&self, relationship: &str, remote_id: &str) -> Vec<Row> {
        let relationships = self.db.relationships();
        let Some(definition) = relationships.relationship_definition(relationship) else {
            return Vec::new();
        };
        let store = self.db.store();
        relationships
            .local_row_ids(relationship, remote_id)
            .iter()
            .filter_map(|id| store.row(&definition.local_collection, id))
            .collect()
    }

    /// Parse a record's `createdAt` and `updatedAt`.
    pub fn timestamps(row: &Row) -> Result<RecordTimestamps> {
        Ok(RecordTimestamps {
            created_at: parse_field(row, CREATED_AT)?,
            updated_at: parse_field(row, UPDATED_AT)?,
        })
    }
}

fn parse_field(row: &Row, field: &str) -> Result<OffsetDateTime> {
    match row.get(field) {
        Some(Value::String(value)) => timestamp::parse(field, value),
        _ => Err(Error::Timestamp {
            field: field.to_owned(),
            reason: "missing or not a string".to_owned(),
        }),
    }
}
