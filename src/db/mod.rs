// Persistent store for credentials and completed trades
pub mod sqlite;

pub use sqlite::SqliteStore;

use sha2::{Digest, Sha256};

/// SHA-256 of a password, hex encoded, as kept in `user_data.password`
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
