mod hash;
mod table;

pub use hash::{fingerprint_file, sha256_hex, sha256_hex_reader};
pub use table::{FileRole, FingerprintTable, KnownReleaseFile};
