//! Algorithm constants and the small integer helpers shared by the
//! superscalar generator, the interpreter and the code generator.

pub const ARGON_MEMORY: u32 = 262144;
pub const ARGON_ITERATIONS: u32 = 3;
pub const ARGON_LANES: u32 = 1;
pub const ARGON_SALT: &[u8; 8] = b"RandomX\x03";
pub const ARGON_BLOCK_SIZE: usize = 1024;

pub const CACHE_ACCESSES: usize = 8;
pub const SUPERSCALAR_LATENCY: usize = 170;
pub const SUPERSCALAR_MAX_SIZE: usize = 3 * SUPERSCALAR_LATENCY + 2;

pub const CACHE_SIZE: usize = ARGON_MEMORY as usize * ARGON_BLOCK_SIZE;
pub const CACHE_LINE_SIZE: u64 = 64;
pub const CACHE_LINE_ALIGN_MASK: u64 = (DATASET_BASE_SIZE - 1) & !(CACHE_LINE_SIZE - 1);

pub const DATASET_BASE_SIZE: u64 = 2147483648;
pub const DATASET_EXTRA_SIZE: u64 = 33554368;
pub const DATASET_EXTRA_ITEMS: u64 = DATASET_EXTRA_SIZE / CACHE_LINE_SIZE;
pub const DATASET_ITEM_COUNT: u64 = (DATASET_BASE_SIZE + DATASET_EXTRA_SIZE) / CACHE_LINE_SIZE; //34.078.719

pub const PROGRAM_SIZE: usize = 256;
pub const PROGRAM_ITERATIONS: u32 = 2048;
pub const PROGRAM_COUNT: usize = 8;

pub const SCRATCHPAD_L1: u64 = 16384;
pub const SCRATCHPAD_L2: u64 = 262144;
pub const SCRATCHPAD_L3: u64 = 2097152;
pub const SCRATCHPAD_L1_MASK: u64 = (SCRATCHPAD_L1 - 1) & !7;
pub const SCRATCHPAD_L2_MASK: u64 = (SCRATCHPAD_L2 - 1) & !7;
pub const SCRATCHPAD_L3_MASK: u64 = (SCRATCHPAD_L3 - 1) & !7;
pub const SCRATCHPAD_L3_MASK64: u64 = (SCRATCHPAD_L3 - 1) & !63;

pub const JUMP_BITS: u32 = 8;
pub const JUMP_OFFSET: u32 = 8;
pub const CONDITION_MASK: u64 = (1 << JUMP_BITS) - 1;
pub const STORE_L3_CONDITION: u8 = 14;

pub const REGISTERS_COUNT: usize = 8;
pub const REGISTER_COUNT_FLT: usize = 4;
pub const REGISTER_NEEDS_DISPLACEMENT: usize = 5;

pub const HASH_SIZE: usize = 32;
pub const ENTROPY_WORDS: usize = 16;

pub const MANTISSA_SIZE: u32 = 52;
pub const MANTISSA_MASK: u64 = (1 << MANTISSA_SIZE) - 1;
pub const EXPONENT_MASK: u64 = 2047;
pub const EXPONENT_BIAS: u64 = 1023;
pub const DYNAMIC_EXPONENT_BITS: u32 = 4;
pub const STATIC_EXPONENT_BITS: u32 = 4;
pub const CONST_EXPONENT_BITS: u64 = 0x300;
pub const DYNAMIC_MANTISSA_MASK: u64 = (1 << (MANTISSA_SIZE + DYNAMIC_EXPONENT_BITS)) - 1;
pub const SCALE_MASK: u64 = 0x80F0000000000000;

/// Sign-extends a 32-bit immediate to 64 bits (two's complement).
#[inline(always)]
pub fn sign_extend_2s_compl(x: u32) -> u64 {
    x as i32 as i64 as u64
}

#[inline(always)]
pub fn mulh(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) >> 64) as u64
}

#[inline(always)]
pub fn smulh(a: u64, b: u64) -> u64 {
    ((a as i64 as i128 * b as i64 as i128) >> 64) as u64
}

#[inline(always)]
pub fn is_zero_or_power_of_2(x: u32) -> bool {
    x & x.wrapping_sub(1) == 0
}

/// Fixed-point reciprocal `2^x / divisor` where `x` is the largest value
/// that keeps the result in 64 bits. `divisor` must not be zero or a
/// power of two.
pub fn reciprocal(divisor: u32) -> u64 {
    debug_assert!(!is_zero_or_power_of_2(divisor));
    let p2exp63: u64 = 1 << 63;
    let divisor = divisor as u64;

    let mut quotient = p2exp63 / divisor;
    let mut remainder = p2exp63 % divisor;

    let bsr = 64 - divisor.leading_zeros();
    for _ in 0..bsr {
        if remainder >= divisor - remainder {
            quotient = quotient.wrapping_mul(2).wrapping_add(1);
            remainder = remainder.wrapping_mul(2).wrapping_sub(divisor);
        } else {
            quotient = quotient.wrapping_mul(2);
            remainder = remainder.wrapping_mul(2);
        }
    }
    quotient
}

/// Builds a positive double in `[1, 2^32)` from 64 bits of entropy.
pub fn small_positive_float_bits(entropy: u64) -> u64 {
    let mut exponent = entropy >> 59; //0..31
    let mantissa = entropy & MANTISSA_MASK;
    exponent += EXPONENT_BIAS;
    exponent &= EXPONENT_MASK;
    exponent <<= MANTISSA_SIZE;
    exponent | mantissa
}

fn static_exponent(entropy: u64) -> u64 {
    let mut exponent = CONST_EXPONENT_BITS;
    exponent |= (entropy >> (64 - STATIC_EXPONENT_BITS)) << DYNAMIC_EXPONENT_BITS;
    exponent <<= MANTISSA_SIZE;
    exponent
}

/// The "or" mask applied to every `e` register load.
pub fn float_mask(entropy: u64) -> u64 {
    let mask22bit = (1u64 << 22) - 1;
    (entropy & mask22bit) | static_exponent(entropy)
}
