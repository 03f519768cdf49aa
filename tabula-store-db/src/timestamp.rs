// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! `createdAt` / `updatedAt` values.
//!
//! Written as UTC with millisecond precision (`2025-01-31T12:00:00.000Z`),
//! read back as any RFC 3339 timestamp.

use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::error::{Error, Result};

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

const ISO_MILLIS: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// Format a point in time the way records store it.
pub fn format(at: OffsetDateTime) -> Result<String> {
    at.to_offset(UtcOffset::UTC)
        .format(ISO_MILLIS)
        .map_err(|e| Error::Timestamp {
            field: String::new(),
            reason: e.to_string(),
        })
}

/// The current time, formatted.
pub fn now() -> Result<String> {
    format(OffsetDateTime::now_utc())
}

/// Parse a stored timestamp.
pub fn parse(field: &str, value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| Error::Timestamp {
        field: field.to_owned(),
        reason: e.to_string(),
    })
}

pub fn is_timestamp(value: &str) -> bool {
    OffsetDateTime::parse(value, &Rfc3339).is_ok()
}
