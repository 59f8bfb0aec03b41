//! Flow id generation.
//!
//! A flow id tags every request crossing the proxy so log lines from the
//! client edge, the filters, and the upstream side can be correlated. Ids
//! are 16 random bytes rendered as 32 lowercase hex characters.

use uuid::Uuid;

/// Header carrying the flow id across proxy hops.
pub const FLOW_ID_HEADER: &str = "x-flow-id";

/// Generates a new 16-byte hex flow id.
pub fn generate() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_ids_are_32_hex_chars() {
        let id = generate();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn flow_ids_are_unique_enough() {
        assert_ne!(generate(), generate());
    }
}
