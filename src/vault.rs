//! The Password Safe V3 file codec: reading and writing the on-disk vault
//! format described in the crate's top-level documentation.

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use hmac::{Hmac, Mac};
use log::{debug, trace, warn};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::field::{Field, Header, FIELD_TYPE_EOF};
use crate::key;
use crate::modes::{Cbc, Ecb};
use crate::record::Record;
use crate::twofish::{Twofish, BLOCK_SIZE};

const TAG: &[u8; 4] = b"PWS3";
const SALT_LEN: usize = 32;
const KEY_BLOCK_LEN: usize = BLOCK_SIZE * 4; // B1..B4
const EOF_MARKER: [u8; 16] = *b"PWS3-EOFPWS3-EOF";
const DEFAULT_MIN_ITERATIONS: u32 = 2048;

/// Tunable validation and generation parameters for opening and saving a
/// vault.
#[derive(Debug, Clone, Copy)]
pub struct VaultOptions {
    /// Vaults opened with fewer than this many stretch iterations are
    /// rejected as too weak; also the iteration count used when creating a
    /// brand new vault.
    pub min_iterations: u32,
}

impl Default for VaultOptions {
    fn default() -> Self {
        VaultOptions {
            min_iterations: DEFAULT_MIN_ITERATIONS,
        }
    }
}

/// The salt, IV, wrapped key blocks, and unwrapped K/L this vault was last
/// read from disk with (or saved with). Plain `save` reuses all of it
/// unchanged; only `save_rewrapped` replaces it.
#[derive(Clone)]
struct CryptoMaterial {
    salt: [u8; SALT_LEN],
    iv: [u8; 16],
    b1: [u8; 16],
    b2: [u8; 16],
    b3: [u8; 16],
    b4: [u8; 16],
    verifier: [u8; 32],
    k: Zeroizing<[u8; 32]>,
    l: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for CryptoMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoMaterial").finish_non_exhaustive()
    }
}

/// An in-memory Password Safe V3 vault: a header plus an unordered list of
/// records. Nothing here is encrypted; encryption only happens while
/// reading from or writing to a stream.
#[derive(Debug, Clone)]
pub struct Vault {
    header: Header,
    records: Vec<Record>,
    iterations: u32,
    crypto: Option<CryptoMaterial>,
}

impl Vault {
    /// Creates a brand new, empty vault. Nothing is written to disk until
    /// [`Vault::save`] is called.
    pub fn create_empty(options: &VaultOptions) -> Self {
        Vault {
            header: Header::new(),
            records: Vec::new(),
            iterations: options.min_iterations,
            crypto: None,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut Vec<Record> {
        &mut self.records
    }

    /// Opens and decrypts a vault file from `path` with the default
    /// [`VaultOptions`].
    pub fn open(path: impl AsRef<Path>, password: &[u8]) -> Result<Self, Error> {
        Self::open_with(path, password, &VaultOptions::default())
    }

    /// Opens and decrypts a vault file from `path`.
    pub fn open_with(
        path: impl AsRef<Path>,
        password: &[u8],
        options: &VaultOptions,
    ) -> Result<Self, Error> {
        debug!("opening vault from {}", path.as_ref().display());
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Self::read_from_slice(&buf, password, options)
    }

    fn read_from_slice(buf: &[u8], password: &[u8], options: &VaultOptions) -> Result<Self, Error> {
        let preamble_len = 4 + SALT_LEN + 4 + 32 + KEY_BLOCK_LEN + BLOCK_SIZE;
        if buf.len() < preamble_len + EOF_MARKER.len() + 32 {
            return Err(Error::NotPasswordSafeFile);
        }
        if &buf[0..4] != TAG.as_slice() {
            return Err(Error::NotPasswordSafeFile);
        }

        let mut pos = 4;
        let salt: [u8; SALT_LEN] = buf[pos..pos + SALT_LEN].try_into().unwrap();
        pos += SALT_LEN;
        let iterations = LittleEndian::read_u32(&buf[pos..pos + 4]);
        pos += 4;
        let stored_verifier: [u8; 32] = buf[pos..pos + 32].try_into().unwrap();
        pos += 32;
        let b1: [u8; 16] = buf[pos..pos + 16].try_into().unwrap();
        let b2: [u8; 16] = buf[pos + 16..pos + 32].try_into().unwrap();
        let b3: [u8; 16] = buf[pos + 32..pos + 48].try_into().unwrap();
        let b4: [u8; 16] = buf[pos + 48..pos + 64].try_into().unwrap();
        pos += KEY_BLOCK_LEN;
        let iv: [u8; 16] = buf[pos..pos + 16].try_into().unwrap();
        pos += 16;

        if iterations < options.min_iterations {
            return Err(Error::IterationCountTooLow(iterations, options.min_iterations));
        }

        let stretched_key = key::stretch(password, &salt, iterations);
        let computed_verifier = key::verifier(&stretched_key);
        if !bool::from(computed_verifier.ct_eq(&stored_verifier)) {
            warn!("password verification failed while opening vault");
            return Err(Error::BadPassword);
        }

        let wrap_cipher = Twofish::new(&*stretched_key).expect("stretched key is always 32 bytes");
        let ecb = Ecb::new(&wrap_cipher);
        let mut k = Zeroizing::new([0u8; 32]);
        let mut l = Zeroizing::new([0u8; 32]);
        k[0..16].copy_from_slice(&b1);
        k[16..32].copy_from_slice(&b2);
        l[0..16].copy_from_slice(&b3);
        l[16..32].copy_from_slice(&b4);
        ecb.decrypt_block(&mut k[0..16]);
        ecb.decrypt_block(&mut k[16..32]);
        ecb.decrypt_block(&mut l[0..16]);
        ecb.decrypt_block(&mut l[16..32]);

        let eof_start = buf.len() - EOF_MARKER.len() - 32;
        let hmac_start = buf.len() - 32;
        let ciphertext = &buf[pos..eof_start];
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::MalformedField("encrypted field stream is not block-aligned"));
        }
        if buf[eof_start..hmac_start] != EOF_MARKER {
            return Err(Error::MissingEofMarker);
        }
        let stored_hmac: [u8; 32] = buf[hmac_start..].try_into().unwrap();

        let cipher_k = Twofish::new(&*k).expect("K is always 32 bytes");
        let mut cbc = Cbc::new(&cipher_k, &iv);
        let mut plaintext = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks_exact(BLOCK_SIZE) {
            let mut block: [u8; BLOCK_SIZE] = chunk.try_into().unwrap();
            cbc.decrypt_block(&mut block);
            plaintext.extend_from_slice(&block);
        }

        let mut mac = Hmac::<Sha256>::new_from_slice(&*l).expect("HMAC accepts any key length");
        let mut cursor = 0;
        let (header_fields, next) = read_fields_until_sentinel(&plaintext, cursor, &mut mac)?;
        cursor = next;
        let header = Header::from_fields(header_fields);

        let mut records = Vec::new();
        while cursor < plaintext.len() {
            let (fields, next) = read_fields_until_sentinel(&plaintext, cursor, &mut mac)?;
            cursor = next;
            records.push(Record::from_fields(fields));
        }

        let computed_hmac: [u8; 32] = mac.finalize().into_bytes().into();
        if !bool::from(computed_hmac.ct_eq(&stored_hmac)) {
            warn!("hmac verification failed while opening vault; data may be corrupt or tampered");
            return Err(Error::HmacMismatch);
        }

        Ok(Vault {
            header,
            records,
            iterations,
            crypto: Some(CryptoMaterial {
                salt,
                iv,
                b1,
                b2,
                b3,
                b4,
                verifier: stored_verifier,
                k,
                l,
            }),
        })
    }

    /// Encrypts and writes the vault to `path`, reusing the salt, IV, and
    /// wrapped key blocks it was opened with — only the last-save header
    /// fields change. A vault that was never opened from disk (created via
    /// [`Vault::create_empty`]) has nothing to preserve yet, so its first
    /// save generates fresh crypto material the same way
    /// [`Vault::save_rewrapped`] always does. The write is atomic: a temp
    /// file is written alongside `path`, reopened and fully re-verified
    /// with `password`, and only then renamed over the original.
    pub fn save(&self, path: impl AsRef<Path>, password: &[u8]) -> Result<(), Error> {
        let options = VaultOptions {
            min_iterations: self.iterations,
        };
        let bytes = self.encode(password, self.iterations)?;
        self.commit(path, password, &options, bytes)
    }

    /// Like [`Vault::save`], but always generates a fresh random salt, IV,
    /// and K/L under `new_password`, rewrapping the vault from scratch —
    /// the shape a "change master password" operation takes. Also lets the
    /// caller pick a new iteration count.
    pub fn save_rewrapped(
        &self,
        path: impl AsRef<Path>,
        new_password: &[u8],
        options: &VaultOptions,
    ) -> Result<(), Error> {
        let bytes = self.encode_with_fresh_crypto(new_password, options.min_iterations)?;
        self.commit(path, new_password, options, bytes)
    }

    fn commit(
        &self,
        path: impl AsRef<Path>,
        password: &[u8],
        options: &VaultOptions,
        bytes: Vec<u8>,
    ) -> Result<(), Error> {
        debug!("saving vault to {}", path.as_ref().display());
        let dir = path
            .as_ref()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&bytes)?;
        temp.flush()?;

        // Re-open the freshly written bytes through the full read pipeline
        // before committing, so a corrupt write never clobbers a good file.
        if let Err(e) = Self::read_from_slice(&bytes, password, options) {
            warn!("post-write verification failed; aborting save");
            return Err(Error::VerificationFailed(Box::new(e)));
        }

        trace!("renaming verified temp file into place at {}", path.as_ref().display());
        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Encodes with whatever crypto material this vault already carries
    /// (from having been opened, or a prior save), falling back to a fresh
    /// draw when there is none yet.
    fn encode(&self, password: &[u8], iterations: u32) -> Result<Vec<u8>, Error> {
        match &self.crypto {
            Some(crypto) => self.encode_preserving(password, crypto),
            None => self.encode_with_fresh_crypto(password, iterations),
        }
    }

    fn encode_preserving(&self, password: &[u8], crypto: &CryptoMaterial) -> Result<Vec<u8>, Error> {
        let stretched_key = key::stretch(password, &crypto.salt, self.iterations);
        let verifier = key::verifier(&stretched_key);
        if !bool::from(verifier.ct_eq(&crypto.verifier)) {
            warn!("password verification failed while saving vault");
            return Err(Error::BadPassword);
        }

        Ok(self.assemble(
            crypto.salt,
            self.iterations,
            crypto.verifier,
            crypto.b1,
            crypto.b2,
            crypto.b3,
            crypto.b4,
            crypto.iv,
            &crypto.k,
            &crypto.l,
        ))
    }

    fn encode_with_fresh_crypto(&self, password: &[u8], iterations: u32) -> Result<Vec<u8>, Error> {
        let mut rng = OsRng;

        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut iv);
        let mut k = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *k);
        let mut l = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *l);

        let stretched_key = key::stretch(password, &salt, iterations);
        let verifier = key::verifier(&stretched_key);

        let wrap_cipher = Twofish::new(&*stretched_key).expect("stretched key is always 32 bytes");
        let ecb = Ecb::new(&wrap_cipher);
        let mut b1: [u8; 16] = k[0..16].try_into().unwrap();
        let mut b2: [u8; 16] = k[16..32].try_into().unwrap();
        let mut b3: [u8; 16] = l[0..16].try_into().unwrap();
        let mut b4: [u8; 16] = l[16..32].try_into().unwrap();
        ecb.encrypt_block(&mut b1);
        ecb.encrypt_block(&mut b2);
        ecb.encrypt_block(&mut b3);
        ecb.encrypt_block(&mut b4);

        Ok(self.assemble(salt, iterations, verifier, b1, b2, b3, b4, iv, &k, &l))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        salt: [u8; SALT_LEN],
        iterations: u32,
        verifier: [u8; 32],
        b1: [u8; 16],
        b2: [u8; 16],
        b3: [u8; 16],
        b4: [u8; 16],
        iv: [u8; 16],
        k: &[u8; 32],
        l: &[u8; 32],
    ) -> Vec<u8> {
        let mut rng = OsRng;
        let mut header = self.header.clone();
        header.set_last_save_time(std::time::SystemTime::now());
        header.set_last_save_what(&format!(
            "{} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ));

        let mut mac = Hmac::<Sha256>::new_from_slice(l).expect("HMAC accepts any key length");
        let mut plaintext = Vec::new();
        write_fields(header.fields(), &mut plaintext, &mut mac, &mut rng);
        write_sentinel(&mut plaintext, &mut rng);
        for record in &self.records {
            write_fields(record.fields(), &mut plaintext, &mut mac, &mut rng);
            write_sentinel(&mut plaintext, &mut rng);
        }

        let cipher_k = Twofish::new(k).expect("K is always 32 bytes");
        let mut cbc = Cbc::new(&cipher_k, &iv);
        let mut ciphertext = Vec::with_capacity(plaintext.len());
        for chunk in plaintext.chunks_exact(BLOCK_SIZE) {
            let mut block: [u8; BLOCK_SIZE] = chunk.try_into().unwrap();
            cbc.encrypt_block(&mut block);
            ciphertext.extend_from_slice(&block);
        }

        let hmac_tag = mac.finalize().into_bytes();

        let mut out = Vec::with_capacity(
            4 + SALT_LEN + 4 + 32 + KEY_BLOCK_LEN + 16 + ciphertext.len() + 16 + 32,
        );
        out.extend_from_slice(TAG);
        out.extend_from_slice(&salt);
        let mut iterations_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut iterations_bytes, iterations);
        out.extend_from_slice(&iterations_bytes);
        out.extend_from_slice(&verifier);
        out.extend_from_slice(&b1);
        out.extend_from_slice(&b2);
        out.extend_from_slice(&b3);
        out.extend_from_slice(&b4);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&EOF_MARKER);
        out.extend_from_slice(&hmac_tag);
        out
    }
}

fn write_fields(
    fields: impl Iterator<Item = Field>,
    out: &mut Vec<u8>,
    mac: &mut Hmac<Sha256>,
    rng: &mut impl RngCore,
) {
    for field in fields {
        write_field(field.field_type, &field.value, out, rng);
        mac.update(&field.value);
    }
}

fn write_sentinel(out: &mut Vec<u8>, rng: &mut impl RngCore) {
    write_field(FIELD_TYPE_EOF, &[], out, rng);
}

fn write_field(field_type: u8, value: &[u8], out: &mut Vec<u8>, rng: &mut impl RngCore) {
    let mut len_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut len_bytes, value.len() as u32);
    out.extend_from_slice(&len_bytes);
    out.push(field_type);
    out.extend_from_slice(value);
    let used = 5 + value.len();
    let pad = (BLOCK_SIZE - used % BLOCK_SIZE) % BLOCK_SIZE;
    let mut padding = vec![0u8; pad];
    rng.fill_bytes(&mut padding);
    out.extend_from_slice(&padding);
}

/// Reads fields starting at `pos` until a sentinel (type `0xff`) field is
/// consumed, feeding every non-sentinel value to `mac`. Returns the fields
/// read and the position just past the sentinel's own block.
fn read_fields_until_sentinel(
    buf: &[u8],
    mut pos: usize,
    mac: &mut Hmac<Sha256>,
) -> Result<(Vec<Field>, usize), Error> {
    let mut fields = Vec::new();
    loop {
        if pos + 5 > buf.len() {
            return Err(Error::MalformedField("truncated field header"));
        }
        let len = LittleEndian::read_u32(&buf[pos..pos + 4]) as usize;
        let field_type = buf[pos + 4];
        let value_start = pos + 5;
        if value_start + len > buf.len() {
            return Err(Error::MalformedField("field value runs past end of stream"));
        }
        let value = &buf[value_start..value_start + len];

        let used = 5 + len;
        let pad = (BLOCK_SIZE - used % BLOCK_SIZE) % BLOCK_SIZE;
        pos = value_start + len + pad;

        if field_type == FIELD_TYPE_EOF {
            return Ok((fields, pos));
        }

        mac.update(value);
        fields.push(Field::new(field_type, value.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_vault_round_trips() {
        let options = VaultOptions::default();
        let mut vault = Vault::create_empty(&options);
        vault.header_mut().set_db_name("test vault");
        let mut record = Record::create();
        record.set_title("example.com");
        record.set_user("alice");
        record.set_password("hunter2");
        vault.records_mut().push(record);

        let bytes = vault.encode(b"correct horse battery staple", options.min_iterations).unwrap();
        let reopened = Vault::read_from_slice(&bytes, b"correct horse battery staple", &options).unwrap();
        assert_eq!(reopened.records().len(), 1);
        assert_eq!(
            reopened.records()[0].title().unwrap().unwrap(),
            "example.com"
        );
        assert_eq!(
            reopened.header().db_name().unwrap().unwrap(),
            "test vault"
        );
    }

    #[test]
    fn wrong_password_is_rejected() {
        let options = VaultOptions::default();
        let vault = Vault::create_empty(&options);
        let bytes = vault.encode(b"right password", options.min_iterations).unwrap();
        let err = Vault::read_from_slice(&bytes, b"wrong password", &options).unwrap_err();
        assert!(matches!(err, Error::BadPassword));
    }

    #[test]
    fn tampered_field_breaks_hmac() {
        let options = VaultOptions::default();
        let mut vault = Vault::create_empty(&options);
        let mut record = Record::create();
        record.set_title("example.com");
        vault.records_mut().push(record);

        let mut bytes = vault.encode(b"password", options.min_iterations).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = Vault::read_from_slice(&bytes, b"password", &options).unwrap_err();
        assert!(matches!(err, Error::HmacMismatch));
    }

    #[test]
    fn bad_tag_is_rejected() {
        let options = VaultOptions::default();
        let vault = Vault::create_empty(&options);
        let mut bytes = vault.encode(b"password", options.min_iterations).unwrap();
        bytes[0] = b'X';
        let err = Vault::read_from_slice(&bytes, b"password", &options).unwrap_err();
        assert!(matches!(err, Error::NotPasswordSafeFile));
    }

    #[test]
    fn iteration_count_floor_is_enforced() {
        let options = VaultOptions { min_iterations: 100 };
        let vault = Vault::create_empty(&options);
        let bytes = vault.encode(b"password", 50).unwrap();
        let err = Vault::read_from_slice(&bytes, b"password", &options).unwrap_err();
        assert!(matches!(err, Error::IterationCountTooLow(50, 100)));
    }

    #[test]
    fn plain_save_preserves_salt_and_wrapped_keys_across_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.psafe3");

        let options = VaultOptions::default();
        let vault = Vault::create_empty(&options);
        vault.save(&path, b"password").unwrap();
        let first_bytes = std::fs::read(&path).unwrap();

        let opened = Vault::open(&path, b"password").unwrap();
        opened.save(&path, b"password").unwrap();
        let second_bytes = std::fs::read(&path).unwrap();

        let preamble = 4 + SALT_LEN + 4 + 32 + KEY_BLOCK_LEN + BLOCK_SIZE;
        assert_eq!(first_bytes[4..preamble], second_bytes[4..preamble]);
    }

    #[test]
    fn save_rewrapped_draws_fresh_crypto_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.psafe3");

        let options = VaultOptions::default();
        let vault = Vault::create_empty(&options);
        vault.save(&path, b"password").unwrap();
        let first_bytes = std::fs::read(&path).unwrap();

        let opened = Vault::open(&path, b"password").unwrap();
        opened.save_rewrapped(&path, b"password", &options).unwrap();
        let second_bytes = std::fs::read(&path).unwrap();

        let preamble = 4 + SALT_LEN + 4 + 32 + KEY_BLOCK_LEN + BLOCK_SIZE;
        assert_ne!(first_bytes[4..preamble], second_bytes[4..preamble]);
    }
}
