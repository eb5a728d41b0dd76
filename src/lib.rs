//! Reader and writer for Password Safe V3 vault files.
//!
//! A vault is a Twofish-CBC-encrypted stream of type-length-value fields,
//! wrapped in a preamble that derives its encryption and authentication keys
//! from a stretched passphrase, and closed with an HMAC-SHA256 tag over the
//! field contents. See [`Vault`] for the entry point.

mod error;
mod field;
mod key;
mod modes;
mod record;
mod twofish;
mod vault;

pub use error::Error;
pub use field::{header_type, record_type, Field};
pub use field::Header;
pub use record::Record;
pub use vault::{Vault, VaultOptions};
