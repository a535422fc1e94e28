// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed-schema record: a year followed by eight waste-stream categories,
// each a signed 32-bit integer (thousands of tons).

use crate::error::{Error, Result};

/// Integers per record.
pub const RECORD_FIELDS: usize = 9;

/// Bytes per record on disk.
pub const RECORD_SIZE: usize = RECORD_FIELDS * 4;

/// Column names in field order.
pub const FIELD_NAMES: [&str; RECORD_FIELDS] = [
    "Year", "Paper", "Glass", "Metals", "Plastics", "Rubber", "Textiles", "Wood", "Other",
];

/// One row of the record store. Identified only by its position in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Record {
    fields: [i32; RECORD_FIELDS],
}

impl Record {
    pub const fn new(fields: [i32; RECORD_FIELDS]) -> Self {
        Self { fields }
    }

    pub fn year(&self) -> i32 {
        self.fields[0]
    }

    pub fn fields(&self) -> &[i32; RECORD_FIELDS] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Result<i32> {
        self.fields
            .get(index)
            .copied()
            .ok_or(Error::InvalidField(index))
    }

    /// Copy of this record with field `index` replaced by `value`.
    pub fn with_field(&self, index: usize, value: i32) -> Result<Self> {
        if index >= RECORD_FIELDS {
            return Err(Error::InvalidField(index));
        }
        let mut fields = self.fields;
        fields[index] = value;
        Ok(Self { fields })
    }

    /// On-disk form: nine little-endian `i32`s, no header, no delimiter.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        for (chunk, v) in out.chunks_exact_mut(4).zip(self.fields.iter()) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut fields = [0i32; RECORD_FIELDS];
        for (v, chunk) in fields.iter_mut().zip(buf.chunks_exact(4)) {
            *v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self { fields }
    }
}

impl From<[i32; RECORD_FIELDS]> for Record {
    fn from(fields: [i32; RECORD_FIELDS]) -> Self {
        Self::new(fields)
    }
}
