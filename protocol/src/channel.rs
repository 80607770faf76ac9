//! Broker channel naming.
//!
//! A broker instance listens on a seqpacket socket whose name doubles as
//! the name of the transient service that hosts it. Names are a fixed
//! prefix plus a random alphanumeric suffix: unguessable enough that an
//! unrelated process cannot squat the rendezvous ahead of time, but not
//! treated as a secret.

use std::path::PathBuf;

use rand::Rng;
use rand::distr::Alphanumeric;

pub const NAME_PREFIX: &str = "opsvc";
pub const SUFFIX_LEN: usize = 16;

/// Generates a fresh channel/service name.
pub fn generate_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{NAME_PREFIX}{suffix}")
}

/// True if `name` has the shape produced by [`generate_name`].
pub fn is_valid_name(name: &str) -> bool {
    name.len() == NAME_PREFIX.len() + SUFFIX_LEN
        && name.starts_with(NAME_PREFIX)
        && name[NAME_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
}

/// Filesystem rendezvous point for a channel name.
///
/// The broker creates the socket inside a directory only it can traverse;
/// clients derive the same path from the name alone.
pub fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}.sock"))
}
