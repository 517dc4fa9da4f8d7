//! Byte-level x86-64 emission helpers.

/// Recommended multi-byte NOP encodings, indexed by length - 1.
const NOPS: [&[u8]; 9] = [
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

pub struct CodeBuffer {
    code: Vec<u8>,
}

impl CodeBuffer {
    pub fn with_capacity(capacity: usize) -> CodeBuffer {
        CodeBuffer {
            code: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.code.clear();
    }

    pub fn pos(&self) -> usize {
        self.code.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    #[inline]
    pub fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    #[inline]
    pub fn emit_byte(&mut self, b: u8) {
        self.code.push(b);
    }

    #[inline]
    pub fn emit_u32(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn emit_i32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, v: u64) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    /// Pads with as few NOP instructions as possible.
    pub fn emit_nops(&mut self, mut count: usize) {
        while count > 0 {
            let n = count.min(NOPS.len());
            self.emit(NOPS[n - 1]);
            count -= n;
        }
    }

    /// `jz` to an already emitted position, short form when it reaches.
    pub fn emit_jz_back(&mut self, target: usize) {
        let rel8 = target as i64 - (self.pos() as i64 + 2);
        if rel8 >= -128 {
            self.emit_byte(0x74);
            self.emit_byte(rel8 as i8 as u8);
        } else {
            self.emit(&[0x0F, 0x84]);
            self.emit_i32((target as i64 - (self.pos() as i64 + 4)) as i32);
        }
    }

    /// `jnz rel32` to an already emitted position.
    pub fn emit_jnz_back(&mut self, target: usize) {
        self.emit(&[0x0F, 0x85]);
        self.emit_i32((target as i64 - (self.pos() as i64 + 4)) as i32);
    }

    /// `mov rax, imm64`
    pub fn emit_mov_rax_imm64(&mut self, v: u64) {
        self.emit(&[0x48, 0xB8]);
        self.emit_u64(v);
    }
}

/// True if `v` is the sign extension of its low 32 bits.
pub fn fits_i32(v: u64) -> bool {
    v as i64 == v as i32 as i64
}
