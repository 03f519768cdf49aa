// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The fixed Tabula schema: persisted collections, their indexes, their
//! typed fields and the relationships between them.

use tabula_store_core::{Indexes, Relationships, Row, Value};
use tabula_store_disk::CollectionConfig;
use tracing::debug;

use crate::error::{Error, Result};
use crate::timestamp;

/// Declared type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// RFC 3339 string
    Timestamp,
    /// Any JSON value
    Json,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Json => "json",
        }
    }

    /// Whether `value` fits this type. `null` always does.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Json, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Timestamp, Value::String(s)) => timestamp::is_timestamp(s),
            _ => false,
        }
    }
}

/// A persisted collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSchema {
    pub name: &'static str,
    /// Fields with an index named `<collection>By<Field>`
    pub indexed_fields: &'static [&'static str],
    /// Typed fields beyond the ones every record carries
    pub fields: &'static [(&'static str, FieldType)],
}

/// Fields every record carries.
pub const RECORD_FIELDS: &[(&str, FieldType)] = &[
    ("id", FieldType::String),
    (timestamp::CREATED_AT, FieldType::Timestamp),
    (timestamp::UPDATED_AT, FieldType::Timestamp),
];

impl CollectionSchema {
    /// Declared type of a field, `None` for undeclared fields.
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        RECORD_FIELDS
            .iter()
            .chain(self.fields)
            .find(|(name, _)| *name == field)
            .map(|(_, ty)| *ty)
    }

    /// Check every declared field present in `row`. Undeclared fields
    /// pass.
    pub fn validate(&self, row: &Row) -> Result<()> {
        for (field, value) in row {
            let Some(ty) = self.field_type(field) else {
                continue;
            };
            if !ty.accepts(value) {
                return Err(Error::Validation {
                    collection: self.name.to_owned(),
                    field: field.clone(),
                    expected: ty.name(),
                });
            }
        }
        Ok(())
    }
}

use FieldType::{Boolean, Json, Number, String as Str, Timestamp};

/// A foreign key from one collection into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipSchema {
    pub name: &'static str,
    pub local_collection: &'static str,
    pub remote_collection: &'static str,
    pub foreign_key: &'static str,
}

pub const COLLECTIONS: &[CollectionSchema] = &[
    CollectionSchema {
        name: "users",
        indexed_fields: &["email", "name"],
        fields: &[
            ("email", Str),
            ("name", Str),
            ("image", Str),
            ("emailVerified", Timestamp),
        ],
    },
    CollectionSchema {
        name: "organisations",
        indexed_fields: &["name", "slug", "ownerId"],
        fields: &[("name", Str), ("slug", Str), ("ownerId", Str)],
    },
    CollectionSchema {
        name: "teams",
        indexed_fields: &["name", "organisationId"],
        fields: &[("name", Str), ("organisationId", Str), ("description", Str)],
    },
    CollectionSchema {
        name: "projects",
        indexed_fields: &["name", "slug", "organisationId"],
        fields: &[
            ("name", Str),
            ("slug", Str),
            ("organisationId", Str),
            ("description", Str),
        ],
    },
    CollectionSchema {
        name: "resources",
        indexed_fields: &["name", "projectId", "status"],
        fields: &[
            ("name", Str),
            ("projectId", Str),
            ("status", Str),
            ("config", Json),
        ],
    },
    CollectionSchema {
        name: "memberships",
        indexed_fields: &["userId", "organisationId", "teamId"],
        fields: &[
            ("userId", Str),
            ("organisationId", Str),
            ("teamId", Str),
            ("role", Str),
        ],
    },
    CollectionSchema {
        name: "files",
        indexed_fields: &["name", "organisationId", "projectId", "uploadedById"],
        fields: &[
            ("name", Str),
            ("organisationId", Str),
            ("projectId", Str),
            ("uploadedById", Str),
            ("cid", Str),
            ("size", Number),
            ("mimeType", Str),
            ("pinned", Boolean),
        ],
    },
    CollectionSchema {
        name: "accounts",
        indexed_fields: &["userId", "provider", "providerAccountId"],
        fields: &[
            ("userId", Str),
            ("type", Str),
            ("provider", Str),
            ("providerAccountId", Str),
            ("refresh_token", Str),
            ("access_token", Str),
            ("expires_at", Number),
            ("token_type", Str),
            ("scope", Str),
            ("id_token", Str),
        ],
    },
    CollectionSchema {
        name: "sessions",
        indexed_fields: &["userId", "sessionToken"],
        fields: &[
            ("userId", Str),
            ("sessionToken", Str),
            ("expires", Timestamp),
        ],
    },
    CollectionSchema {
        name: "verificationTokens",
        indexed_fields: &["identifier", "token"],
        fields: &[
            ("identifier", Str),
            ("token", Str),
            ("expires", Timestamp),
        ],
    },
];

const fn relationship(
    name: &'static str,
    local_collection: &'static str,
    remote_collection: &'static str,
    foreign_key: &'static str,
) -> RelationshipSchema {
    RelationshipSchema {
        name,
        local_collection,
        remote_collection,
        foreign_key,
    }
}

pub const RELATIONSHIPS: &[RelationshipSchema] = &[
    relationship("organisationOwner", "organisations", "users", "ownerId"),
    relationship("teamOrganisation", "teams", "organisations", "organisationId"),
    relationship("projectOrganisation", "projects", "organisations", "organisationId"),
    relationship("resourceProject", "resources", "projects", "projectId"),
    relationship("membershipUser", "memberships", "users", "userId"),
    relationship("membershipOrganisation", "memberships", "organisations", "organisationId"),
    relationship("membershipTeam", "memberships", "teams", "teamId"),
    relationship("fileOrganisation", "files", "organisations", "organisationId"),
    relationship("fileProject", "files", "projects", "projectId"),
    relationship("fileUploader", "files", "users", "uploadedById"),
    relationship("accountUser", "accounts", "users", "userId"),
    relationship("sessionUser", "sessions", "users", "userId"),
];

pub fn collection_schema(name: &str) -> Option<&'static CollectionSchema> {
    COLLECTIONS.iter().find(|c| c.name == name)
}

/// `usersByEmail`, `filesByUploadedById`, ...
pub fn index_name(collection: &str, field: &str) -> String {
    let mut chars = field.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("{collection}By{capitalized}")
}

/// Persistence configuration for every schema collection.
pub fn collection_configs() -> Vec<CollectionConfig> {
    COLLECTIONS
        .iter()
        .map(|c| CollectionConfig::new(c.name, c.indexed_fields.iter().copied()))
        .collect()
}

pub fn register_indexes(indexes: &Indexes) {
    for collection in COLLECTIONS {
        for field in collection.indexed_fields {
            indexes.set_index_definition(&index_name(collection.name, field), collection.name, field);
        }
    }
    debug!(count = indexes.index_ids().len(), "registered indexes");
}

pub fn register_relationships(relationships: &Relationships) {
    for r in RELATIONSHIPS {
        relationships.set_relationship_definition(
            r.name,
            r.local_collection,
            r.remote_collection,
            r.foreign_key,
        );
    }
    debug!(count = RELATIONSHIPS.len(), "registered relationships");
}

/// Validate `row` against the schema of `collection`. Collections outside
/// the schema accept anything.
pub fn validate(collection: &str, row: &Row) -> Result<()> {
    match collection_schema(collection) {
        Some(schema) => schema.validate(row),
        None => Ok(()),
    }
}
