use std::fmt;

use ripemd::{Digest, Ripemd160};
use tattle_core::ExceptionEvent;

/// Lowercase hex RIPEMD-160 of `message ‖ file ‖ line`.
///
/// Only used to recognise the same exception twice in one day; not a
/// security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(event: &ExceptionEvent) -> Self {
        Self::from_parts(&event.message, &event.file, event.line)
    }

    pub fn from_parts(message: &str, file: &str, line: u32) -> Self {
        let input = format!("{message}{file}{line}");
        Self(hex_digest(input.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_digest(input: &[u8]) -> String {
    let digest = Ripemd160::digest(input);
    format!("{digest:x}")
}
