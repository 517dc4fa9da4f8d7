//! 128-bit lane type and single AES rounds, table driven or through AES-NI.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{__m128i, _mm_aesdec_si128, _mm_aesenc_si128};

/// Four 32-bit words, least significant first, laid out like an `__m128i`.
#[repr(C, align(16))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct M128i(pub [u32; 4]);

impl M128i {
    /// Builds a lane from words given most significant first.
    pub const fn from_u32(i3: u32, i2: u32, i1: u32, i0: u32) -> M128i {
        M128i([i0, i1, i2, i3])
    }

    pub fn from_bytes(b: &[u8]) -> M128i {
        let mut words = [0u32; 4];
        for (i, w) in words.iter_mut().enumerate() {
            *w = u32::from_le_bytes([b[4 * i], b[4 * i + 1], b[4 * i + 2], b[4 * i + 3]]);
        }
        M128i(words)
    }

    pub fn write_bytes(&self, out: &mut [u8]) {
        for (i, w) in self.0.iter().enumerate() {
            out[4 * i..4 * i + 4].copy_from_slice(&w.to_le_bytes());
        }
    }

    pub fn as_u64(&self) -> (u64, u64) {
        (
            self.0[0] as u64 | (self.0[1] as u64) << 32,
            self.0[2] as u64 | (self.0[3] as u64) << 32,
        )
    }

    pub fn xor(self, other: M128i) -> M128i {
        M128i([
            self.0[0] ^ other.0[0],
            self.0[1] ^ other.0[1],
            self.0[2] ^ other.0[2],
            self.0[3] ^ other.0[3],
        ])
    }

    fn byte(&self, i: usize) -> usize {
        ((self.0[i / 4] >> (8 * (i % 4))) & 0xFF) as usize
    }

    /// One AES encryption round: ShiftRows, SubBytes, MixColumns, AddRoundKey.
    pub fn aesenc(self, key: M128i) -> M128i {
        let t = &*AES_TABLES;
        let b = |i| self.byte(i);
        let s0 = t.enc[0][b(0)] ^ t.enc[1][b(5)] ^ t.enc[2][b(10)] ^ t.enc[3][b(15)];
        let s1 = t.enc[0][b(4)] ^ t.enc[1][b(9)] ^ t.enc[2][b(14)] ^ t.enc[3][b(3)];
        let s2 = t.enc[0][b(8)] ^ t.enc[1][b(13)] ^ t.enc[2][b(2)] ^ t.enc[3][b(7)];
        let s3 = t.enc[0][b(12)] ^ t.enc[1][b(1)] ^ t.enc[2][b(6)] ^ t.enc[3][b(11)];
        M128i([s0, s1, s2, s3]).xor(key)
    }

    /// One AES decryption round: InvShiftRows, InvSubBytes, InvMixColumns, AddRoundKey.
    pub fn aesdec(self, key: M128i) -> M128i {
        let t = &*AES_TABLES;
        let b = |i| self.byte(i);
        let s0 = t.dec[0][b(0)] ^ t.dec[1][b(13)] ^ t.dec[2][b(10)] ^ t.dec[3][b(7)];
        let s1 = t.dec[0][b(4)] ^ t.dec[1][b(1)] ^ t.dec[2][b(14)] ^ t.dec[3][b(11)];
        let s2 = t.dec[0][b(8)] ^ t.dec[1][b(5)] ^ t.dec[2][b(2)] ^ t.dec[3][b(15)];
        let s3 = t.dec[0][b(12)] ^ t.dec[1][b(9)] ^ t.dec[2][b(6)] ^ t.dec[3][b(3)];
        M128i([s0, s1, s2, s3]).xor(key)
    }

    /// # Safety
    /// The CPU must support AES-NI.
    #[cfg(target_arch = "x86_64")]
    #[inline(always)]
    pub unsafe fn aesenc_hw(self, key: M128i) -> M128i {
        let r = _mm_aesenc_si128(
            std::mem::transmute::<M128i, __m128i>(self),
            std::mem::transmute::<M128i, __m128i>(key),
        );
        std::mem::transmute::<__m128i, M128i>(r)
    }

    /// # Safety
    /// The CPU must support AES-NI.
    #[cfg(target_arch = "x86_64")]
    #[inline(always)]
    pub unsafe fn aesdec_hw(self, key: M128i) -> M128i {
        let r = _mm_aesdec_si128(
            std::mem::transmute::<M128i, __m128i>(self),
            std::mem::transmute::<M128i, __m128i>(key),
        );
        std::mem::transmute::<__m128i, M128i>(r)
    }
}

struct AesTables {
    enc: [[u32; 256]; 4],
    dec: [[u32; 256]; 4],
}

lazy_static! {
    static ref AES_TABLES: AesTables = AesTables::generate();
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            p ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1B;
        }
        b >>= 1;
    }
    p
}

fn forward_sbox() -> [u8; 256] {
    let mut sbox = [0u8; 256];
    let mut p: u8 = 1;
    let mut q: u8 = 1;
    loop {
        //p walks the multiplicative group by 3, q tracks its inverse
        p = p ^ (p << 1) ^ if p & 0x80 != 0 { 0x1B } else { 0 };
        q ^= q << 1;
        q ^= q << 2;
        q ^= q << 4;
        if q & 0x80 != 0 {
            q ^= 0x09;
        }
        let x = q ^ q.rotate_left(1) ^ q.rotate_left(2) ^ q.rotate_left(3) ^ q.rotate_left(4);
        sbox[p as usize] = x ^ 0x63;
        if p == 1 {
            break;
        }
    }
    sbox[0] = 0x63;
    sbox
}

impl AesTables {
    fn generate() -> AesTables {
        let sbox = forward_sbox();
        let mut inv_sbox = [0u8; 256];
        for (i, &s) in sbox.iter().enumerate() {
            inv_sbox[s as usize] = i as u8;
        }

        let mut enc = [[0u32; 256]; 4];
        let mut dec = [[0u32; 256]; 4];
        for i in 0..256 {
            let s = sbox[i];
            let e = u32::from_le_bytes([gf_mul(s, 2), s, s, gf_mul(s, 3)]);
            let si = inv_sbox[i];
            let d = u32::from_le_bytes([gf_mul(si, 0xE), gf_mul(si, 0x9), gf_mul(si, 0xD), gf_mul(si, 0xB)]);
            for k in 0..4 {
                enc[k][i] = e.rotate_left(8 * k as u32);
                dec[k][i] = d.rotate_left(8 * k as u32);
            }
        }

        AesTables { enc, dec }
    }
}
