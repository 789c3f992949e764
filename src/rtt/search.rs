//! Rabin-Karp rolling-hash search for the RTT control-block magic, used in
//! place of a linear byte-by-byte scan.

const BASE: u64 = 257;
const MODULUS: u64 = 1_000_000_007;

/// Finds the first occurrence of `pattern` in `haystack` using a rolling
/// polynomial hash, falling back to a direct byte comparison only to
/// confirm a hash match (avoiding the rare false positive).
pub fn rabin_karp_find(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || haystack.len() < pattern.len() {
        return None;
    }

    let m = pattern.len();
    let mut high_order = 1u64;
    for _ in 0..m - 1 {
        high_order = (high_order * BASE) % MODULUS;
    }

    let hash_of = |bytes: &[u8]| -> u64 {
        bytes.iter().fold(0u64, |acc, &b| (acc * BASE + b as u64) % MODULUS)
    };

    let pattern_hash = hash_of(pattern);
    let mut window_hash = hash_of(&haystack[..m]);

    for start in 0..=haystack.len() - m {
        if window_hash == pattern_hash && &haystack[start..start + m] == pattern {
            return Some(start);
        }
        if start + m < haystack.len() {
            let outgoing = haystack[start] as u64;
            let incoming = haystack[start + m] as u64;
            window_hash = (window_hash + MODULUS - (outgoing * high_order) % MODULUS) % MODULUS;
            window_hash = (window_hash * BASE + incoming) % MODULUS;
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finds_pattern_in_middle() {
        let mut haystack = vec![0u8; 16];
        haystack.extend_from_slice(b"needle");
        haystack.extend_from_slice(&[0u8; 8]);
        assert_eq!(rabin_karp_find(&haystack, b"needle"), Some(16));
    }

    #[test]
    fn no_match_returns_none() {
        let haystack = vec![1u8, 2, 3, 4, 5];
        assert_eq!(rabin_karp_find(&haystack, b"xyz"), None);
    }

    #[test]
    fn pattern_at_very_start() {
        let haystack = b"SEGGER RTT\0\0\0\0\0\0rest".to_vec();
        assert_eq!(rabin_karp_find(&haystack, b"SEGGER RTT\0\0\0\0\0\0"), Some(0));
    }
}
