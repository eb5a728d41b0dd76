//! Password entries: a raw type-to-bytes field map with typed accessors,
//! mirroring the header's design. Modeled directly on the reference
//! implementation's `Record` class rather than the enum-per-field-type
//! taxonomy some Rust ports use, since unknown field types must survive a
//! read/write round trip unchanged.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::error::Error;
use crate::field::{record_type, Field};

/// One password entry. `raw_fields` is the authoritative storage; the
/// accessors below are convenience views over it, and each setter also
/// refreshes `PASSWORD_MOD_TIME`/`LAST_MOD_TIME` the way the desktop client
/// does.
#[derive(Debug, Clone)]
pub struct Record {
    raw_fields: BTreeMap<u8, Vec<u8>>,
}

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

fn now() -> SystemTime {
    SystemTime::now()
}

impl Record {
    /// Creates a fresh record with a new random UUID and creation/last-mod
    /// timestamps set to now, mirroring the reference implementation's
    /// `Record()` constructor.
    pub fn create() -> Self {
        let mut record = Record {
            raw_fields: BTreeMap::new(),
        };
        record.set_raw(record_type::UUID, Uuid::new_v4().as_bytes().to_vec());
        let created = now();
        record.set_raw(record_type::CREATION_TIME, write_time(created));
        record.set_raw(record_type::LAST_MOD_TIME, write_time(created));
        record
    }

    pub fn from_fields(fields: Vec<Field>) -> Self {
        let mut raw_fields = BTreeMap::new();
        for field in fields {
            raw_fields.insert(field.field_type, field.value);
        }
        Record { raw_fields }
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

    fn mark_modified(&mut self) {
        let t = write_time(now());
        self.raw_fields.insert(record_type::LAST_MOD_TIME, t);
    }

    fn get_string(&self, field_type: u8) -> Option<Result<String, Error>> {
        self.get_raw(field_type)
            .map(|bytes| String::from_utf8(bytes.to_vec()).map_err(Error::from))
    }

    fn set_string(&mut self, field_type: u8, text: &str) {
        self.set_raw(field_type, text.as_bytes().to_vec());
        self.mark_modified();
    }

    pub fn uuid(&self) -> Result<Uuid, Error> {
        let bytes = self.get_raw(record_type::UUID).ok_or(Error::MissingField("uuid"))?;
        Uuid::from_slice(bytes).map_err(|_| Error::InvalidUuid)
    }

    pub fn group(&self) -> Option<Result<String, Error>> {
        self.get_string(record_type::GROUP)
    }

    pub fn set_group(&mut self, text: &str) {
        self.set_string(record_type::GROUP, text);
    }

    pub fn title(&self) -> Option<Result<String, Error>> {
        self.get_string(record_type::TITLE)
    }

    pub fn set_title(&mut self, text: &str) {
        self.set_string(record_type::TITLE, text);
    }

    pub fn user(&self) -> Option<Result<String, Error>> {
        self.get_string(record_type::USER)
    }

    pub fn set_user(&mut self, text: &str) {
        self.set_string(record_type::USER, text);
    }

    pub fn notes(&self) -> Option<Result<String, Error>> {
        self.get_string(record_type::NOTES)
    }

    pub fn set_notes(&mut self, text: &str) {
        self.set_string(record_type::NOTES, text);
    }

    pub fn password(&self) -> Option<Result<String, Error>> {
        self.get_string(record_type::PASSWORD)
    }

    pub fn set_password(&mut self, text: &str) {
        self.set_raw(record_type::PASSWORD, text.as_bytes().to_vec());
        self.set_raw(record_type::PASSWORD_MOD_TIME, write_time(now()));
        self.mark_modified();
    }

    pub fn url(&self) -> Option<Result<String, Error>> {
        self.get_string(record_type::URL)
    }

    pub fn set_url(&mut self, text: &str) {
        self.set_string(record_type::URL, text);
    }

    pub fn creation_time(&self) -> Option<Result<SystemTime, Error>> {
        self.get_raw(record_type::CREATION_TIME).map(read_time)
    }

    pub fn last_mod_time(&self) -> Option<Result<SystemTime, Error>> {
        self.get_raw(record_type::LAST_MOD_TIME).map(read_time)
    }

    /// Returns a deep copy with a freshly generated UUID, a refreshed
    /// modification time, and " (copy)" appended to the title, used when the
    /// caller wants an independent entry seeded from this one's fields
    /// (mirrors `duplicate_record` in the reference implementation).
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.set_raw(record_type::UUID, Uuid::new_v4().as_bytes().to_vec());
        let title = match copy.title() {
            Some(Ok(title)) => format!("{} (copy)", title),
            _ => "(copy)".to_string(),
        };
        copy.set_title(&title);
        copy
    }

    /// Two records "correspond" if they share a UUID. When either side is
    /// missing a UUID (or carries one that doesn't parse), falls back to
    /// title equality, matching the reference implementation's handling of
    /// records that predate UUID assignment.
    pub fn is_corresponding(&self, other: &Record) -> bool {
        match (self.uuid(), other.uuid()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.title().and_then(Result::ok) == other.title().and_then(Result::ok),
        }
    }

    /// True if `self` was modified more recently than `other`.
    pub fn is_newer_than(&self, other: &Record) -> bool {
        match (self.last_mod_time(), other.last_mod_time()) {
            (Some(Ok(a)), Some(Ok(b))) => a > b,
            (Some(Ok(_)), None) => true,
            _ => false,
        }
    }

    /// Discards this record's raw-field map wholesale and adopts `other`'s,
    /// including its UUID — used to fold a newer corresponding record in
    /// during a merge. Mirrors the reference implementation's `merge`, which
    /// re-ingests the other record's fields one by one rather than keeping
    /// any of this record's own.
    pub fn merge(&mut self, other: &Record) {
        self.raw_fields = other.raw_fields.clone();
    }

    /// Sort/comparison key: group then title, case-sensitively, matching
    /// the reference implementation's `for_cmp()`.
    pub fn for_cmp(&self) -> (String, String) {
        let group = self.group().and_then(Result::ok).unwrap_or_default();
        let title = self.title().and_then(Result::ok).unwrap_or_default();
        (group, title)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.for_cmp() == other.for_cmp()
    }
}

impl Eq for Record {}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.for_cmp().cmp(&other.for_cmp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_uuid_and_timestamps() {
        let record = Record::create();
        assert!(record.uuid().is_ok());
        assert!(record.creation_time().is_some());
        assert!(record.last_mod_time().is_some());
    }

    #[test]
    fn duplicate_gets_a_new_uuid_and_title_suffix() {
        let mut original = Record::create();
        original.set_title("example");
        let copy = original.duplicate();
        assert_ne!(original.uuid().unwrap(), copy.uuid().unwrap());
        assert_eq!(copy.title().unwrap().unwrap(), "example (copy)");
    }

    #[test]
    fn duplicate_refreshes_last_mod_time() {
        let original = Record::create();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let copy = original.duplicate();
        assert!(copy.last_mod_time().unwrap().unwrap() > original.last_mod_time().unwrap().unwrap());
    }

    #[test]
    fn is_corresponding_matches_by_uuid_when_both_present() {
        let a = Record::create();
        let mut b = a.clone();
        b.set_title("changed");
        assert!(a.is_corresponding(&b));

        let c = Record::create();
        assert!(!a.is_corresponding(&c));
    }

    #[test]
    fn is_corresponding_falls_back_to_title_when_uuid_missing() {
        let mut a = Record::create();
        a.set_title("shared title");
        let mut b = Record::create();
        b.set_title("shared title");
        b.set_raw(record_type::UUID, Vec::new());
        assert!(a.is_corresponding(&b));

        let mut c = Record::create();
        c.set_title("different title");
        c.set_raw(record_type::UUID, Vec::new());
        assert!(!a.is_corresponding(&c));
    }

    #[test]
    fn merge_adopts_the_other_records_uuid() {
        let mut a = Record::create();
        a.set_title("old title");

        let mut b = a.duplicate();
        b.set_title("new title");
        let b_uuid = b.uuid().unwrap();

        a.merge(&b);
        assert_eq!(a.uuid().unwrap(), b_uuid);
        assert_eq!(a.title().unwrap().unwrap(), "new title");
    }

    #[test]
    fn sort_key_orders_by_group_then_title() {
        let mut a = Record::create();
        a.set_group("work");
        a.set_title("zeta");

        let mut b = Record::create();
        b.set_group("work");
        b.set_title("alpha");

        let mut c = Record::create();
        c.set_group("home");
        c.set_title("omega");

        let mut records = vec![a.clone(), b.clone(), c.clone()];
        records.sort();
        assert_eq!(records[0].for_cmp(), c.for_cmp());
        assert_eq!(records[1].for_cmp(), b.for_cmp());
        assert_eq!(records[2].for_cmp(), a.for_cmp());
    }
}
