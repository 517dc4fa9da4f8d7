use blake2b_simd::Params;

const MAX_SEED_SIZE: usize = 60;
const DATA_SIZE: usize = 64;

/// Deterministic byte stream keyed by a seed and a nonce. The internal
/// buffer is re-keyed with Blake2b-512 of itself once exhausted.
pub struct Blake2Generator {
    data: [u8; DATA_SIZE],
    index: usize,
}

impl Blake2Generator {
    pub fn new(seed: &[u8], nonce: u32) -> Blake2Generator {
        let mut data = [0; DATA_SIZE];
        let len = seed.len().min(MAX_SEED_SIZE);
        data[..len].copy_from_slice(&seed[..len]);
        data[MAX_SEED_SIZE..].copy_from_slice(&nonce.to_le_bytes());
        Blake2Generator {
            data,
            index: DATA_SIZE,
        }
    }

    pub fn get_byte(&mut self) -> u8 {
        self.check_data(1);
        let v = self.data[self.index];
        self.index += 1;
        v
    }

    pub fn get_u32(&mut self) -> u32 {
        self.check_data(4);
        let i = self.index;
        let v = u32::from_le_bytes([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]);
        self.index += 4;
        v
    }

    fn check_data(&mut self, bytes_needed: usize) {
        if self.index + bytes_needed > DATA_SIZE {
            let hash = Params::new().hash_length(DATA_SIZE).hash(&self.data);
            self.data.copy_from_slice(hash.as_bytes());
            self.index = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_byte_is_hash_of_padded_seed() {
        let mut gen = Blake2Generator::new(b"test key 000", 0);
        let mut expected = [0u8; 64];
        expected[..12].copy_from_slice(b"test key 000");
        let hash = blake2b_simd::blake2b(&expected);
        assert_eq!(gen.get_byte(), hash.as_bytes()[0]);
        let w = gen.get_u32();
        assert_eq!(w.to_le_bytes(), [
            hash.as_bytes()[1],
            hash.as_bytes()[2],
            hash.as_bytes()[3],
            hash.as_bytes()[4]
        ]);
    }

    #[test]
    fn test_rekey_on_exhaustion() {
        let mut gen = Blake2Generator::new(b"seed", 7);
        for _ in 0..15 {
            gen.get_u32();
        }
        //60 bytes consumed, the next u32 still fits
        gen.get_u32();
        let mut reference = Blake2Generator::new(b"seed", 7);
        for _ in 0..64 {
            reference.get_byte();
        }
        //both are now at the end of the first block
        assert_eq!(gen.get_u32().to_le_bytes()[0], reference.get_byte());
    }

    #[test]
    fn test_long_seed_is_truncated() {
        let long = [0xAAu8; 100];
        let mut a = Blake2Generator::new(&long, 3);
        let mut b = Blake2Generator::new(&long[..60], 3);
        for _ in 0..200 {
            assert_eq!(a.get_u32(), b.get_u32());
        }
    }

    #[test]
    fn test_nonce_changes_stream() {
        let mut a = Blake2Generator::new(b"seed", 0);
        let mut b = Blake2Generator::new(b"seed", 1);
        let va: Vec<u32> = (0..8).map(|_| a.get_u32()).collect();
        let vb: Vec<u32> = (0..8).map(|_| b.get_u32()).collect();
        assert_ne!(va, vb);
    }
}
