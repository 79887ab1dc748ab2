//! Derivation of cache keys from request URLs.

/// Compute the cache key for `url`: the lowercase hex MD5 digest of the URL string.
///
/// This is used purely as a fixed-width, filesystem-safe content-address, never as a
/// security primitive.
pub fn fingerprint(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_stable_and_hex() {
        let a = fingerprint("http://example.com/a.deb");
        let b = fingerprint("http://example.com/a.deb");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn differs_per_url() {
        assert_ne!(fingerprint("http://example.com/a.deb"), fingerprint("http://example.com/b.deb"));
    }
}
