// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Random row IDs.

use crate::error::{Error, Result};

/// URL- and filename-safe alphabet.
const ALPHABET: &[u8; 64] = b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

/// Length of generated row IDs.
pub const ROW_ID_LEN: usize = 21;

/// Generate a 21-character random row ID.
pub fn generate_row_id() -> Result<String> {
    let mut bytes = [0u8; ROW_ID_LEN];
    getrandom::fill(&mut bytes).map_err(|e| Error::RowId(e.to_string()))?;
    // 64 symbols: masking keeps the distribution uniform.
    Ok(bytes
        .iter()
        .map(|b| char::from(ALPHABET[usize::from(b & 63)]))
        .collect())
}
