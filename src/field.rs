//! TLV field types and the vault header, stored as a raw type-to-bytes map
//! with typed accessors layered on top. Unrecognized field types round-trip
//! verbatim, so a vault written by a newer client doesn't lose data passing
//! through this crate.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Error;

/// A single decoded TLV field: a type byte and its value bytes, with length
/// and padding already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub field_type: u8,
    pub value: Vec<u8>,
}

impl Field {
    pub fn new(field_type: u8, value: impl Into<Vec<u8>>) -> Self {
        Field {
            field_type,
            value: value.into(),
        }
    }
}

/// Marks the end of a header's or record's field list in the decrypted
/// stream. Not fed to the running HMAC.
pub const FIELD_TYPE_EOF: u8 = 0xff;

pub mod header_type {
    pub const VERSION: u8 = 0x00;
    pub const UUID: u8 = 0x01;
    pub const NON_DEFAULT_PREFERENCES: u8 = 0x02;
    pub const TREE_DISPLAY_STATUS: u8 = 0x03;
    pub const LAST_SAVE_TIME: u8 = 0x04;
    pub const LAST_SAVE_WHO: u8 = 0x05;
    pub const LAST_SAVE_WHAT: u8 = 0x06;
    pub const LAST_SAVE_USER: u8 = 0x07;
    pub const LAST_SAVE_HOST: u8 = 0x08;
    pub const DB_NAME: u8 = 0x09;
    pub const DB_DESCRIPTION: u8 = 0x0a;
}

pub mod record_type {
    pub const UUID: u8 = 0x01;
    pub const GROUP: u8 = 0x02;
    pub const TITLE: u8 = 0x03;
    pub const USER: u8 = 0x04;
    pub const NOTES: u8 = 0x05;
    pub const PASSWORD: u8 = 0x06;
    pub const CREATION_TIME: u8 = 0x07;
    pub const PASSWORD_MOD_TIME: u8 = 0x08;
    pub const ACCESS_TIME: u8 = 0x09;
    pub const PASSWORD_EXPIRY_TIME: u8 = 0x0a;
    pub const LAST_MOD_TIME: u8 = 0x0c;
    pub const URL: u8 = 0x0d;
}

/// Reads a little-endian 32-bit Unix timestamp field.
fn read_time(bytes: &[u8]) -> Result<SystemTime, Error> {
    if bytes.len() != 4 {
        return Err(Error::MalformedField("timestamp field must be 4 bytes"));
    }
    let secs = u32::from_le_bytes(bytes.try_into().unwrap());
    Ok(UNIX_EPOCH + Duration::from_secs(secs as u64))
}

fn write_time(time: SystemTime) -> Vec<u8> {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as u32;
    secs.to_le_bytes().to_vec()
}

/// The vault-wide header: a handful of recognized fields (format version,
/// timestamps, last-save provenance, database name/description) plus
/// whatever else a field stream carried, preserved verbatim in
/// `raw_fields` so round-tripping never drops data this crate doesn't
/// understand.
#[derive(Debug, Clone, Default)]
pub struct Header {
    raw_fields: BTreeMap<u8, Vec<u8>>,
}

impl Header {
    pub fn new() -> Self {
        let mut header = Header::default();
        header.set_raw(header_type::VERSION, vec![0x0e, 0x03]);
        header
    }

    pub fn from_fields(fields: Vec<Field>) -> Self {
        let mut raw_fields = BTreeMap::new();
        for field in fields {
            raw_fields.insert(field.field_type, field.value);
        }
        Header { raw_fields }
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.raw_fields
            .iter()
            .map(|(&field_type, value)| Field::new(field_type, value.clone()))
    }

    pub fn get_raw(&self, field_type: u8) -> Option<&[u8]> {
        self.raw_fields.get(&field_type).map(|v| v.as_slice())
    }

    pub fn set_raw(&mut self, field_type: u8, value: Vec<u8>) {
        self.raw_fields.insert(field_type, value);
    }

    /// The (minor, major) format version, e.g. `(0x0e, 0x03)` for 3.14.
    pub fn version(&self) -> Result<(u8, u8), Error> {
        match self.get_raw(header_type::VERSION) {
            Some([minor, major]) => Ok((*minor, *major)),
            Some(_) => Err(Error::MalformedField("version field must be 2 bytes")),
            None => Err(Error::MissingField("header version")),
        }
    }

    pub fn last_save_time(&self) -> Option<Result<SystemTime, Error>> {
        self.get_raw(header_type::LAST_SAVE_TIME).map(read_time)
    }

    pub fn set_last_save_time(&mut self, time: SystemTime) {
        self.set_raw(header_type::LAST_SAVE_TIME, write_time(time));
    }

    pub fn last_save_what(&self) -> Option<Result<String, Error>> {
        self.get_raw(header_type::LAST_SAVE_WHAT)
            .map(|bytes| String::from_utf8(bytes.to_vec()).map_err(Error::from))
    }

    pub fn set_last_save_what(&mut self, text: &str) {
        self.set_raw(header_type::LAST_SAVE_WHAT, text.as_bytes().to_vec());
    }

    pub fn db_name(&self) -> Option<Result<String, Error>> {
        self.get_raw(header_type::DB_NAME)
            .map(|bytes| String::from_utf8(bytes.to_vec()).map_err(Error::from))
    }

    pub fn set_db_name(&mut self, text: &str) {
        self.set_raw(header_type::DB_NAME, text.as_bytes().to_vec());
    }

    pub fn db_description(&self) -> Option<Result<String, Error>> {
        self.get_raw(header_type::DB_DESCRIPTION)
            .map(|bytes| String::from_utf8(bytes.to_vec()).map_err(Error::from))
    }

    pub fn set_db_description(&mut self, text: &str) {
        self.set_raw(header_type::DB_DESCRIPTION, text.as_bytes().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_fields_round_trip_verbatim() {
        let fields = vec![
            Field::new(header_type::VERSION, vec![0x0e, 0x03]),
            Field::new(0x42, vec![1, 2, 3, 4]),
        ];
        let header = Header::from_fields(fields);
        assert_eq!(header.get_raw(0x42), Some([1u8, 2, 3, 4].as_slice()));
        let round_tripped: Vec<_> = header.fields().collect();
        assert!(round_tripped.iter().any(|f| f.field_type == 0x42));
    }

    #[test]
    fn last_save_time_round_trips() {
        let mut header = Header::new();
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        header.set_last_save_time(now);
        assert_eq!(header.last_save_time().unwrap().unwrap(), now);
    }
}
