use rand::RngCore;
use rand_core::OsRng;

/// Fills a new buffer of `len` bytes from the operating system RNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Fixed-size variant of [`random_bytes`].
pub fn random_bytes_fixed<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_are_respected() {
        assert!(random_bytes(0).is_empty());
        assert_eq!(random_bytes(33).len(), 33);
        let fixed: [u8; 32] = random_bytes_fixed();
        assert_eq!(fixed.len(), 32);
    }

    #[test]
    fn consecutive_draws_differ() {
        let a: [u8; 32] = random_bytes_fixed();
        let b: [u8; 32] = random_bytes_fixed();
        assert_ne!(a, b);
        assert_ne!(random_bytes(32), random_bytes(32));
    }
}
