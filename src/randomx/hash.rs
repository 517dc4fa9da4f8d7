//! AES based scratchpad fill, program fill and scratchpad hash.

use super::m128::M128i;

const HASH_STATE: [M128i; 4] = [
    M128i::from_u32(0xd7983aad, 0xcc82db47, 0x9fa856de, 0x92b52c0d),
    M128i::from_u32(0xace78057, 0xf59e125a, 0x15c7b798, 0x338d996e),
    M128i::from_u32(0xe8a07ce4, 0x5079506b, 0xae62c7d0, 0x6a770017),
    M128i::from_u32(0x7e994948, 0x79a10005, 0x07ad828d, 0x630a240c),
];

const HASH_XKEY0: M128i = M128i::from_u32(0x06890201, 0x90dc56bf, 0x8b24949f, 0xf6fa8389);
const HASH_XKEY1: M128i = M128i::from_u32(0xed18f99b, 0xee1043c6, 0x51f4e03c, 0x61b263d1);

const GEN_1R_KEYS: [M128i; 4] = [
    M128i::from_u32(0xb4f44917, 0xdbb5552b, 0x62716609, 0x6daca553),
    M128i::from_u32(0x0da1dc4e, 0x1725d378, 0x846a710d, 0x6d7caf07),
    M128i::from_u32(0x3e20e345, 0xf4c0794f, 0x9f947ec6, 0x3f1262f1),
    M128i::from_u32(0x49169154, 0x16314c88, 0xb1ba317c, 0x6aef8135),
];

const GEN_4R_KEYS: [M128i; 8] = [
    M128i::from_u32(0x99e5d23f, 0x2f546d2b, 0xd1833ddb, 0x6421aadd),
    M128i::from_u32(0xa5dfcde5, 0x06f79d53, 0xb6913f55, 0xb20e3450),
    M128i::from_u32(0x171c02bf, 0x0aa4679f, 0x515e7baf, 0x5c3ed904),
    M128i::from_u32(0xd8ded291, 0xcd673785, 0xe78f5d08, 0x85623763),
    M128i::from_u32(0x229effb4, 0x3d518b6d, 0xe3d6a7a6, 0xb5826f73),
    M128i::from_u32(0xb272b7d2, 0xe9024d4e, 0x9c10b3d9, 0xc7566bf3),
    M128i::from_u32(0xf63befa7, 0x2ba9660a, 0xf765a38b, 0xf273c9e7),
    M128i::from_u32(0xc0b0762d, 0x0c06d1fd, 0x915839de, 0x7a7cd609),
];

/// Which AES round implementation drives the fill and hash routines.
/// Both produce identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesImpl {
    Soft,
    Hardware,
}

trait AesRound {
    fn enc(s: M128i, k: M128i) -> M128i;
    fn dec(s: M128i, k: M128i) -> M128i;
}

struct SoftAes;

impl AesRound for SoftAes {
    #[inline(always)]
    fn enc(s: M128i, k: M128i) -> M128i {
        s.aesenc(k)
    }
    #[inline(always)]
    fn dec(s: M128i, k: M128i) -> M128i {
        s.aesdec(k)
    }
}

#[cfg(target_arch = "x86_64")]
struct HardAes;

#[cfg(target_arch = "x86_64")]
impl AesRound for HardAes {
    #[inline(always)]
    fn enc(s: M128i, k: M128i) -> M128i {
        //only instantiated inside functions compiled with the aes target feature
        unsafe { s.aesenc_hw(k) }
    }
    #[inline(always)]
    fn dec(s: M128i, k: M128i) -> M128i {
        unsafe { s.aesdec_hw(k) }
    }
}

fn load_state(state: &[u8]) -> [M128i; 4] {
    [
        M128i::from_bytes(&state[0..16]),
        M128i::from_bytes(&state[16..32]),
        M128i::from_bytes(&state[32..48]),
        M128i::from_bytes(&state[48..64]),
    ]
}

fn store_state(s: &[M128i; 4], out: &mut [u8]) {
    for (i, lane) in s.iter().enumerate() {
        lane.write_bytes(&mut out[16 * i..16 * i + 16]);
    }
}

#[inline(always)]
fn fill_1r_round<A: AesRound>(s: &mut [M128i; 4]) {
    s[0] = A::dec(s[0], GEN_1R_KEYS[0]);
    s[1] = A::enc(s[1], GEN_1R_KEYS[1]);
    s[2] = A::dec(s[2], GEN_1R_KEYS[2]);
    s[3] = A::enc(s[3], GEN_1R_KEYS[3]);
}

#[inline(always)]
fn hash_1r_round<A: AesRound>(h: &mut [M128i; 4], input: &[M128i; 4]) {
    h[0] = A::enc(h[0], input[0]);
    h[1] = A::dec(h[1], input[1]);
    h[2] = A::enc(h[2], input[2]);
    h[3] = A::dec(h[3], input[3]);
}

#[inline(always)]
fn hash_finalize<A: AesRound>(h: &mut [M128i; 4]) {
    for &key in &[HASH_XKEY0, HASH_XKEY1] {
        hash_1r_round::<A>(h, &[key, key, key, key]);
    }
}

#[inline(always)]
fn fill_aes_1rx4_impl<A: AesRound>(state: &mut [u8; 64], output: &mut [u8]) {
    let mut s = load_state(state);
    for chunk in output.chunks_exact_mut(64) {
        fill_1r_round::<A>(&mut s);
        store_state(&s, chunk);
    }
    store_state(&s, state);
}

#[inline(always)]
fn fill_aes_4rx4_impl<A: AesRound>(state: &[u8; 64], output: &mut [u8]) {
    let mut s = load_state(state);
    let k = &GEN_4R_KEYS;
    for chunk in output.chunks_exact_mut(64) {
        for r in 0..4 {
            s[0] = A::dec(s[0], k[r]);
            s[1] = A::enc(s[1], k[r]);
            s[2] = A::dec(s[2], k[r + 4]);
            s[3] = A::enc(s[3], k[r + 4]);
        }
        store_state(&s, chunk);
    }
}

#[inline(always)]
fn hash_aes_1rx4_impl<A: AesRound>(input: &[u8]) -> [u8; 64] {
    let mut h = HASH_STATE;
    for chunk in input.chunks_exact(64) {
        hash_1r_round::<A>(&mut h, &load_state(chunk));
    }
    hash_finalize::<A>(&mut h);
    let mut out = [0u8; 64];
    store_state(&h, &mut out);
    out
}

#[inline(always)]
fn hash_and_fill_aes_1rx4_impl<A: AesRound>(
    scratchpad: &mut [u8],
    fill_state: &mut [u8; 64],
) -> [u8; 64] {
    let mut h = HASH_STATE;
    let mut s = load_state(fill_state);
    for chunk in scratchpad.chunks_exact_mut(64) {
        hash_1r_round::<A>(&mut h, &load_state(chunk));
        fill_1r_round::<A>(&mut s);
        store_state(&s, chunk);
    }
    hash_finalize::<A>(&mut h);
    store_state(&s, fill_state);
    let mut out = [0u8; 64];
    store_state(&h, &mut out);
    out
}

#[cfg(target_arch = "x86_64")]
mod hw {
    use super::*;

    #[target_feature(enable = "aes")]
    pub unsafe fn fill_aes_1rx4(state: &mut [u8; 64], output: &mut [u8]) {
        fill_aes_1rx4_impl::<HardAes>(state, output)
    }

    #[target_feature(enable = "aes")]
    pub unsafe fn fill_aes_4rx4(state: &[u8; 64], output: &mut [u8]) {
        fill_aes_4rx4_impl::<HardAes>(state, output)
    }

    #[target_feature(enable = "aes")]
    pub unsafe fn hash_aes_1rx4(input: &[u8]) -> [u8; 64] {
        hash_aes_1rx4_impl::<HardAes>(input)
    }

    #[target_feature(enable = "aes")]
    pub unsafe fn hash_and_fill_aes_1rx4(scratchpad: &mut [u8], fill_state: &mut [u8; 64]) -> [u8; 64] {
        hash_and_fill_aes_1rx4_impl::<HardAes>(scratchpad, fill_state)
    }
}

impl AesImpl {
    /// Hardware rounds are only used when the CPU reports AES-NI.
    pub fn select(prefer_hardware: bool) -> AesImpl {
        if prefer_hardware && super::cpu::CPU_FEATURES.aes {
            AesImpl::Hardware
        } else {
            AesImpl::Soft
        }
    }

    /// Fills `output` with one AES round per 16 bytes, four lanes wide.
    /// `state` is updated to the final lane values.
    pub fn fill_aes_1rx4(self, state: &mut [u8; 64], output: &mut [u8]) {
        match self {
            #[cfg(target_arch = "x86_64")]
            AesImpl::Hardware => unsafe { hw::fill_aes_1rx4(state, output) },
            _ => fill_aes_1rx4_impl::<SoftAes>(state, output),
        }
    }

    /// Fills `output` with four AES rounds per 16 bytes. `state` is not
    /// modified.
    pub fn fill_aes_4rx4(self, state: &[u8; 64], output: &mut [u8]) {
        match self {
            #[cfg(target_arch = "x86_64")]
            AesImpl::Hardware => unsafe { hw::fill_aes_4rx4(state, output) },
            _ => fill_aes_4rx4_impl::<SoftAes>(state, output),
        }
    }

    pub fn hash_aes_1rx4(self, input: &[u8]) -> [u8; 64] {
        match self {
            #[cfg(target_arch = "x86_64")]
            AesImpl::Hardware => unsafe { hw::hash_aes_1rx4(input) },
            _ => hash_aes_1rx4_impl::<SoftAes>(input),
        }
    }

    /// Hashes the current scratchpad contents and refills it from
    /// `fill_state` in the same pass.
    pub fn hash_and_fill_aes_1rx4(self, scratchpad: &mut [u8], fill_state: &mut [u8; 64]) -> [u8; 64] {
        match self {
            #[cfg(target_arch = "x86_64")]
            AesImpl::Hardware => unsafe { hw::hash_and_fill_aes_1rx4(scratchpad, fill_state) },
            _ => hash_and_fill_aes_1rx4_impl::<SoftAes>(scratchpad, fill_state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_state() -> [u8; 64] {
        let mut state = [0u8; 64];
        state.copy_from_slice(blake2b_simd::blake2b(b"scratchpad seed").as_bytes());
        state
    }

    fn both() -> Vec<AesImpl> {
        let mut impls = vec![AesImpl::Soft];
        if AesImpl::select(true) == AesImpl::Hardware {
            impls.push(AesImpl::Hardware);
        }
        impls
    }

    fn from_hex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_fill_1rx4_single_round() {
        for aes in both() {
            let mut state = [0u8; 64];
            state[..32].copy_from_slice(&from_hex(
                "6c19536eb2de31b6c0065f7f116e86f960d8af0c57210a6584c3237b9d064dc7",
            ));
            let mut out = [0u8; 64];
            aes.fill_aes_1rx4(&mut state, &mut out);
            assert_eq!(
                out[..32].to_vec(),
                from_hex("fa89397dd6ca422513aeadba3f124b5540324c4ad4b6db434394307a17c833ab")
            );
            assert_eq!(&state[..], &out[..]);
        }
    }

    #[test]
    fn test_scratchpad_and_program_known_answers() {
        for aes in both() {
            let mut state = [0u8; 64];
            state.copy_from_slice(blake2b_simd::blake2b(b"This is a test").as_bytes());
            let mut pad = vec![0u8; 2 * 1024 * 1024];
            aes.fill_aes_1rx4(&mut state, &mut pad);
            assert_eq!(
                pad[..64].to_vec(),
                from_hex(
                    "6cea7f3e4e1b5a0499d25fd63cd487e2efbcd68ac38e1fbb0f7b5ec9a5a938c1\
                     e8f66ef0853ab95cf89083bf12f2b26dab289fe61f672a748fe4b4a83955ebd6"
                )
            );
            let after_fill = from_hex(
                "46f6e5a9c4d93b1bacb541b0383ea1a2c2ce6b6501529fc446191ebeb000a977\
                 94b45706ad3c864fb96c4dafee82941505fc21bf1679412ed44f3c3074b26d06",
            );
            assert_eq!(state.to_vec(), after_fill);

            assert_eq!(
                aes.hash_aes_1rx4(&pad).to_vec(),
                from_hex(
                    "b6627f47235f46ee07ccfe32d3ef9e4e2bd0281a7f8bce513a740c44387e3e56\
                     5ec5984d232483eaa39f13db1f9997bd41093a2e38492477edb5191525cdf694"
                )
            );

            //lanes 2 and 3 run on the second half of the 4R key set
            let mut prog = vec![0u8; 128];
            aes.fill_aes_4rx4(&state, &mut prog);
            assert_eq!(
                prog[..64].to_vec(),
                from_hex(
                    "04c3bf7e294a8ecfa90867c256c819108a2313df25874d6cb54077dca50748fb\
                     d7ee9b781a97c6c1681df974c212d1c4c676df4717444eab988eddee9e221d67"
                )
            );
        }
    }

    #[test]
    fn test_fill_1rx4_chains_state() {
        for aes in both() {
            let mut state = seed_state();
            let mut whole = vec![0u8; 256];
            aes.fill_aes_1rx4(&mut state, &mut whole);
            assert_eq!(&state[..], &whole[192..256]);

            let mut state2 = seed_state();
            let mut first = vec![0u8; 128];
            let mut second = vec![0u8; 128];
            aes.fill_aes_1rx4(&mut state2, &mut first);
            aes.fill_aes_1rx4(&mut state2, &mut second);
            assert_eq!(&whole[..128], &first[..]);
            assert_eq!(&whole[128..], &second[..]);
        }
    }

    #[test]
    fn test_fill_4rx4_keeps_state() {
        for aes in both() {
            let state = seed_state();
            let mut out = vec![0u8; 128 + 2048];
            aes.fill_aes_4rx4(&state, &mut out);
            assert_eq!(state, seed_state());
            assert_ne!(&out[..64], &out[64..128]);
        }
    }

    #[test]
    fn test_hash_and_fill_matches_separate_calls() {
        for aes in both() {
            let mut pad = vec![0u8; 4096];
            let mut state = seed_state();
            aes.fill_aes_1rx4(&mut state, &mut pad);

            let expected_hash = aes.hash_aes_1rx4(&pad);
            let mut next_state = [7u8; 64];
            let mut expected_pad = vec![0u8; 4096];
            let mut expected_state = next_state;
            aes.fill_aes_1rx4(&mut expected_state, &mut expected_pad);

            let hash = aes.hash_and_fill_aes_1rx4(&mut pad, &mut next_state);
            assert_eq!(&hash[..], &expected_hash[..]);
            assert_eq!(pad, expected_pad);
            assert_eq!(&next_state[..], &expected_state[..]);
        }
    }

    #[test]
    fn test_soft_and_hardware_agree() {
        let impls = both();
        if impls.len() < 2 {
            return;
        }
        let mut pads = Vec::new();
        let mut hashes = Vec::new();
        for aes in impls {
            let mut state = seed_state();
            let mut pad = vec![0u8; 64 * 1024];
            aes.fill_aes_1rx4(&mut state, &mut pad);
            let mut prog = vec![0u8; 128 + 2048];
            aes.fill_aes_4rx4(&state, &mut prog);
            hashes.push(aes.hash_aes_1rx4(&pad).to_vec());
            pads.push((pad, prog));
        }
        assert!(pads[0] == pads[1]);
        assert_eq!(hashes[0], hashes[1]);
    }
}
