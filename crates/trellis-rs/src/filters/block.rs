//! Body content matching for the block family of filters.
//!
//! One matcher abstraction is shared by every body-inspecting filter: it
//! scans up to `max_buffer_size` bytes of the body for any of a set of
//! literal patterns. Bodies larger than the buffer follow the configured
//! overflow policy: `BestEffort` abandons matching and lets the remaining
//! stream pass, `Abort` fails the request.

/// Policy for bodies exceeding the scan buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Scan what fits in the buffer, let the rest through unmatched.
    BestEffort,
    /// Fail the request instead of letting unscanned content through.
    Abort,
}

/// Outcome of scanning one body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No pattern found within the scanned window.
    Clean,
    /// The pattern at this index matched.
    Matched(usize),
    /// The body exceeded the buffer under the `Abort` policy.
    TooLarge,
}

/// Literal multi-pattern scanner with a bounded buffer.
#[derive(Debug, Clone)]
pub struct ContentMatcher {
    patterns: Vec<Vec<u8>>,
    max_buffer_size: usize,
    policy: OverflowPolicy,
}

/// Default scan buffer, matching the engine's general expectation that
/// inspected bodies are small.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 2 * 1024 * 1024;

impl ContentMatcher {
    pub fn new(
        patterns: Vec<Vec<u8>>,
        max_buffer_size: usize,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            patterns,
            max_buffer_size,
            policy,
        }
    }

    /// Scans a buffered body.
    ///
    /// Only the first `max_buffer_size` bytes are inspected. A pattern match
    /// within that window wins over the overflow policy, since the match is
    /// already certain.
    pub fn scan(&self, body: &[u8]) -> ScanOutcome {
        let window = &body[..body.len().min(self.max_buffer_size)];
        for (i, pattern) in self.patterns.iter().enumerate() {
            if pattern.is_empty() {
                continue;
            }
            if find(window, pattern) {
                return ScanOutcome::Matched(i);
            }
        }
        if body.len() > self.max_buffer_size && self.policy == OverflowPolicy::Abort {
            return ScanOutcome::TooLarge;
        }
        ScanOutcome::Clean
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(policy: OverflowPolicy, max: usize) -> ContentMatcher {
        ContentMatcher::new(vec![b"secret".to_vec(), b"blocked".to_vec()], max, policy)
    }

    #[test]
    fn finds_any_of_the_patterns() {
        let m = matcher(OverflowPolicy::Abort, 1024);
        assert_eq!(m.scan(b"nothing to see"), ScanOutcome::Clean);
        assert_eq!(m.scan(b"a secret message"), ScanOutcome::Matched(0));
        assert_eq!(m.scan(b"this is blocked content"), ScanOutcome::Matched(1));
    }

    #[test]
    fn oversized_bodies_follow_the_policy() {
        let body = vec![b'x'; 64];
        assert_eq!(
            matcher(OverflowPolicy::Abort, 32).scan(&body),
            ScanOutcome::TooLarge
        );
        assert_eq!(
            matcher(OverflowPolicy::BestEffort, 32).scan(&body),
            ScanOutcome::Clean
        );
    }

    #[test]
    fn match_inside_the_window_beats_the_policy() {
        let mut body = b"secret".to_vec();
        body.extend(vec![b'x'; 100]);
        assert_eq!(
            matcher(OverflowPolicy::Abort, 32).scan(&body),
            ScanOutcome::Matched(0)
        );
    }

    #[test]
    fn pattern_straddling_the_window_edge_is_not_found() {
        let mut body = vec![b'x'; 30];
        body.extend_from_slice(b"secret");
        assert_eq!(
            matcher(OverflowPolicy::BestEffort, 32).scan(&body),
            ScanOutcome::Clean
        );
    }
}
