//! Checksum and hashing utilities

/// Incremental MD5 over one file's byte stream.
///
/// MD5 is kept for wire compatibility with existing clients; it detects
/// transfer corruption, not tampering.
pub struct ChecksumVerifier {
    ctx: md5::Context,
    bytes: u64,
}

impl ChecksumVerifier {
    pub fn new() -> Self {
        Self {
            ctx: md5::Context::new(),
            bytes: 0,
        }
    }

    /// Feed the exact bytes written to the destination, in order.
    pub fn update(&mut self, data: &[u8]) {
        self.ctx.consume(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish the digest as 32 uppercase hex characters.
    pub fn finalize_hex(self) -> String {
        format!("{:X}", self.ctx.compute())
    }
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare a computed digest against what the client declared.
/// Case-insensitive; surrounding whitespace in the declared value is ignored.
pub fn digests_match(computed_hex: &str, declared: &str) -> bool {
    computed_hex.eq_ignore_ascii_case(declared.trim())
}

/// One-shot uppercase hex MD5
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:X}", md5::compute(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest_of_hello() {
        let mut v = ChecksumVerifier::new();
        v.update(b"hello");
        assert_eq!(v.bytes(), 5);
        assert_eq!(v.finalize_hex(), "5D41402ABC4B2A76B9719D911017C592");
    }

    #[test]
    fn empty_input_has_md5_of_nothing() {
        assert_eq!(
            ChecksumVerifier::new().finalize_hex(),
            "D41D8CD98F00B204E9800998ECF8427E"
        );
    }

    #[test]
    fn chunking_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut v = ChecksumVerifier::new();
        for chunk in data.chunks(7) {
            v.update(chunk);
        }
        assert_eq!(v.finalize_hex(), md5_hex(&data));
    }

    #[test]
    fn comparison_ignores_case() {
        let hex = md5_hex(b"hello");
        assert!(digests_match(&hex, "5d41402abc4b2a76b9719d911017c592"));
        assert!(digests_match(&hex, " 5D41402ABC4B2A76B9719D911017C592\n"));
        assert!(!digests_match(&hex, "00000000000000000000000000000000"));
        assert!(!digests_match(&hex, ""));
    }
}
