//! Error types returned by the vault codec.

/// Errors that can arise while opening, reading, or saving a vault file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file does not begin with the `PWS3` tag.
    #[error("not a Password Safe V3 file")]
    NotPasswordSafeFile,

    /// The SHA-256 password verifier stored in the file did not match the
    /// hash computed from the supplied passphrase.
    #[error("incorrect password")]
    BadPassword,

    /// A TLV field's declared length or type made it impossible to parse.
    #[error("malformed field: {0}")]
    MalformedField(&'static str),

    /// The decrypted field stream ended without an `EOF` marker field.
    #[error("truncated vault: missing EOF marker")]
    MissingEofMarker,

    /// The trailing HMAC-SHA256 did not match the computed digest; the file
    /// is corrupt or has been tampered with.
    #[error("HMAC verification failed: vault is corrupt or was tampered with")]
    HmacMismatch,

    /// A required header or record field was absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field's raw bytes were not valid UTF-8 where text was expected.
    #[error("field is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A record or header UUID field was not 16 raw bytes.
    #[error("malformed UUID field")]
    InvalidUuid,

    /// The requested iteration count was below the configured minimum.
    #[error("iteration count {0} is below the minimum of {1}")]
    IterationCountTooLow(u32, u32),

    /// The re-verification pass after an atomic save could not reopen the
    /// freshly written file with the same passphrase.
    #[error("post-write verification failed, original file left untouched: {0}")]
    VerificationFailed(Box<Error>),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
