//! Channel IDs carried in the frame header.

/// Lifecycle messages between parent and worker (shutdown).
pub const CONTROL: u16 = 0;

/// JSON-encoded call and result envelopes.
pub const ENVELOPE: u16 = 1;

/// Returns a human-readable name for a channel ID.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        ENVELOPE => "ENVELOPE",
        _ => "UNKNOWN",
    }
}
