use tattle_core::TypeRegistry;

/// Capture-list entry that matches every kind.
pub const WILDCARD: &str = "*";

/// Whether `kind` is selected by the capture list.
///
/// An empty list captures nothing; [`WILDCARD`] captures everything;
/// otherwise `kind` must equal an entry or be a registered subtype of one.
pub fn matches_capture_list(kind: &str, capture: &[String], types: &TypeRegistry) -> bool {
    if capture.is_empty() {
        return false;
    }
    if capture.iter().any(|pattern| pattern == WILDCARD) {
        return true;
    }
    capture.iter().any(|pattern| types.is_a(kind, pattern))
}
