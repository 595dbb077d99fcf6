//! Arcfour (RC4) stream cipher, used by the RC4 security handlers.
//!
//! RC4 is symmetric: the same keystream encrypts and decrypts.

/// RC4 stream cipher state.
pub struct Arcfour {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Arcfour {
    /// Key-scheduling. An empty key behaves like a single zero byte.
    pub fn new(key: &[u8]) -> Self {
        let key = if key.is_empty() { &[0u8][..] } else { key };
        let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }
        Self { state, i: 0, j: 0 }
    }

    /// XOR `data` with the keystream into a new buffer.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply(&mut out);
        out
    }

    /// XOR `buf` with the keystream in place.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let idx = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
            *byte ^= self.state[idx as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // "Key" / "Plaintext" from the classic RC4 test set
        let out = Arcfour::new(b"Key").process(b"Plaintext");
        assert_eq!(hex::encode(out), "bbf316e8d940af0ad3");
    }

    #[test]
    fn test_in_place_matches_process() {
        let mut buf = b"incremental".to_vec();
        Arcfour::new(b"secret").apply(&mut buf);
        assert_eq!(buf, Arcfour::new(b"secret").process(b"incremental"));
    }
}
