use std::fmt;

use strum::{Display, EnumIter, IntoEnumIterator};

use super::common::{
    float_mask, small_positive_float_bits, CACHE_LINE_ALIGN_MASK, CACHE_LINE_SIZE,
    DATASET_EXTRA_ITEMS, ENTROPY_WORDS, PROGRAM_SIZE, REGISTER_COUNT_FLT, REGISTERS_COUNT,
};
use super::hash::AesImpl;

pub const PROGRAM_BYTES: usize = ENTROPY_WORDS * 8 + PROGRAM_SIZE * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Opcode {
    #[strum(serialize = "IADD_RS")]
    IaddRs,
    #[strum(serialize = "IADD_M")]
    IaddM,
    #[strum(serialize = "ISUB_R")]
    IsubR,
    #[strum(serialize = "ISUB_M")]
    IsubM,
    #[strum(serialize = "IMUL_R")]
    ImulR,
    #[strum(serialize = "IMUL_M")]
    ImulM,
    #[strum(serialize = "IMULH_R")]
    ImulhR,
    #[strum(serialize = "IMULH_M")]
    ImulhM,
    #[strum(serialize = "ISMULH_R")]
    IsmulhR,
    #[strum(serialize = "ISMULH_M")]
    IsmulhM,
    #[strum(serialize = "IMUL_RCP")]
    ImulRcp,
    #[strum(serialize = "INEG_R")]
    InegR,
    #[strum(serialize = "IXOR_R")]
    IxorR,
    #[strum(serialize = "IXOR_M")]
    IxorM,
    #[strum(serialize = "IROR_R")]
    IrorR,
    #[strum(serialize = "IROL_R")]
    IrolR,
    #[strum(serialize = "ISWAP_R")]
    IswapR,
    #[strum(serialize = "FSWAP_R")]
    FswapR,
    #[strum(serialize = "FADD_R")]
    FaddR,
    #[strum(serialize = "FADD_M")]
    FaddM,
    #[strum(serialize = "FSUB_R")]
    FsubR,
    #[strum(serialize = "FSUB_M")]
    FsubM,
    #[strum(serialize = "FSCAL_R")]
    FscalR,
    #[strum(serialize = "FMUL_R")]
    FmulR,
    #[strum(serialize = "FDIV_M")]
    FdivM,
    #[strum(serialize = "FSQRT_R")]
    FsqrtR,
    #[strum(serialize = "CBRANCH")]
    Cbranch,
    #[strum(serialize = "CFROUND")]
    Cfround,
    #[strum(serialize = "ISTORE")]
    Istore,
}

impl Opcode {
    /// Number of opcode byte values mapped to this instruction. The
    /// frequencies add up to 256.
    pub fn frequency(self) -> usize {
        match self {
            Opcode::IaddRs => 16,
            Opcode::IaddM => 7,
            Opcode::IsubR => 16,
            Opcode::IsubM => 7,
            Opcode::ImulR => 16,
            Opcode::ImulM => 4,
            Opcode::ImulhR => 4,
            Opcode::ImulhM => 1,
            Opcode::IsmulhR => 4,
            Opcode::IsmulhM => 1,
            Opcode::ImulRcp => 8,
            Opcode::InegR => 2,
            Opcode::IxorR => 15,
            Opcode::IxorM => 5,
            Opcode::IrorR => 8,
            Opcode::IrolR => 2,
            Opcode::IswapR => 4,
            Opcode::FswapR => 4,
            Opcode::FaddR => 16,
            Opcode::FaddM => 5,
            Opcode::FsubR => 16,
            Opcode::FsubM => 5,
            Opcode::FscalR => 6,
            Opcode::FmulR => 32,
            Opcode::FdivM => 4,
            Opcode::FsqrtR => 6,
            Opcode::Cbranch => 25,
            Opcode::Cfround => 1,
            Opcode::Istore => 16,
        }
    }

    pub fn from_byte(b: u8) -> Opcode {
        OPCODE_TABLE[b as usize]
    }
}

lazy_static! {
    static ref OPCODE_TABLE: [Opcode; 256] = {
        let mut table = [Opcode::IaddRs; 256];
        let mut ix = 0;
        for op in Opcode::iter() {
            for _ in 0..op.frequency() {
                table[ix] = op;
                ix += 1;
            }
        }
        table
    };
}

/// One decoded 8-byte program slot: opcode, dst, src, mod, imm32 (LE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: u8,
    pub src: u8,
    pub modifier: u8,
    pub imm: u32,
}

impl Instruction {
    pub fn decode(b: &[u8]) -> Instruction {
        Instruction {
            opcode: Opcode::from_byte(b[0]),
            dst: b[1],
            src: b[2],
            modifier: b[3],
            imm: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        }
    }

    pub fn mod_mem(&self) -> u8 {
        self.modifier & 3
    }

    pub fn mod_shift(&self) -> u8 {
        (self.modifier >> 2) & 3
    }

    pub fn mod_cond(&self) -> u8 {
        self.modifier >> 4
    }

    pub fn dst_reg(&self) -> usize {
        self.dst as usize % REGISTERS_COUNT
    }

    pub fn src_reg(&self) -> usize {
        self.src as usize % REGISTERS_COUNT
    }

    pub fn dst_flt(&self) -> usize {
        self.dst as usize % REGISTER_COUNT_FLT
    }

    pub fn src_flt(&self) -> usize {
        self.src as usize % REGISTER_COUNT_FLT
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} dst={} src={} mod={:#04x} imm={:#010x}",
            self.opcode, self.dst, self.src, self.modifier, self.imm
        )
    }
}

/// Register values read back at fixed points of each iteration and the
/// mask applied to `e` register loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramConfiguration {
    pub e_mask: [u64; 2],
    pub read_reg: [usize; 4],
}

/// The two rolling dataset addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRegisters {
    pub mx: u32,
    pub ma: u32,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub entropy: [u64; ENTROPY_WORDS],
    pub instructions: Vec<Instruction>,
}

impl Program {
    /// Expands a 64-byte seed into a program with four AES rounds per lane.
    pub fn generate(aes: AesImpl, seed: &[u8; 64]) -> Program {
        let mut bytes = vec![0u8; PROGRAM_BYTES];
        aes.fill_aes_4rx4(seed, &mut bytes);
        Program::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Program {
        let mut entropy = [0u64; ENTROPY_WORDS];
        for (i, e) in entropy.iter_mut().enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[8 * i..8 * i + 8]);
            *e = u64::from_le_bytes(word);
        }
        let instructions = bytes[ENTROPY_WORDS * 8..PROGRAM_BYTES]
            .chunks_exact(8)
            .map(Instruction::decode)
            .collect();
        Program {
            entropy,
            instructions,
        }
    }

    pub fn configuration(&self) -> ProgramConfiguration {
        let mut address_registers = self.entropy[12];
        let mut read_reg = [0usize; 4];
        for (i, r) in read_reg.iter_mut().enumerate() {
            *r = 2 * i + (address_registers & 1) as usize;
            address_registers >>= 1;
        }
        ProgramConfiguration {
            e_mask: [float_mask(self.entropy[14]), float_mask(self.entropy[15])],
            read_reg,
        }
    }

    pub fn memory_registers(&self) -> MemoryRegisters {
        MemoryRegisters {
            ma: (self.entropy[8] & CACHE_LINE_ALIGN_MASK) as u32,
            mx: self.entropy[10] as u32,
        }
    }

    /// Byte offset of the dataset window used by this program.
    pub fn dataset_offset(&self) -> u64 {
        (self.entropy[13] % (DATASET_EXTRA_ITEMS + 1)) * CACHE_LINE_SIZE
    }

    pub fn a_registers(&self) -> [[f64; 2]; REGISTER_COUNT_FLT] {
        let mut a = [[0f64; 2]; REGISTER_COUNT_FLT];
        for (i, lanes) in a.iter_mut().enumerate() {
            lanes[0] = f64::from_bits(small_positive_float_bits(self.entropy[2 * i]));
            lanes[1] = f64::from_bits(small_positive_float_bits(self.entropy[2 * i + 1]));
        }
        a
    }
}

/// Register state handed between programs and hashed into the digest.
/// Laid out exactly as hashed: r, f, e, a.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegisterFile {
    pub r: [u64; REGISTERS_COUNT],
    pub f: [[f64; 2]; REGISTER_COUNT_FLT],
    pub e: [[f64; 2]; REGISTER_COUNT_FLT],
    pub a: [[f64; 2]; REGISTER_COUNT_FLT],
}

pub const REGISTER_FILE_SIZE: usize = 256;

impl RegisterFile {
    pub fn to_bytes(&self) -> [u8; REGISTER_FILE_SIZE] {
        let mut out = [0u8; REGISTER_FILE_SIZE];
        let mut words = self.r.iter().cloned().chain(
            self.f
                .iter()
                .chain(self.e.iter())
                .chain(self.a.iter())
                .flat_map(|lanes| lanes.iter().map(|v| v.to_bits())),
        );
        for chunk in out.chunks_exact_mut(8) {
            if let Some(w) = words.next() {
                chunk.copy_from_slice(&w.to_le_bytes());
            }
        }
        out
    }

    /// Replaces `a` with the 64-byte scratchpad hash, as done before the
    /// final digest.
    pub fn set_a_bytes(&mut self, bytes: &[u8; 64]) {
        for (i, v) in self.a.iter_mut().flat_map(|l| l.iter_mut()).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[8 * i..8 * i + 8]);
            *v = f64::from_bits(u64::from_le_bytes(word));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequencies_cover_all_bytes() {
        let total: usize = Opcode::iter().map(|op| op.frequency()).sum();
        assert_eq!(total, 256);
        assert_eq!(Opcode::from_byte(0), Opcode::IaddRs);
        assert_eq!(Opcode::from_byte(15), Opcode::IaddRs);
        assert_eq!(Opcode::from_byte(16), Opcode::IaddM);
        assert_eq!(Opcode::from_byte(255), Opcode::Istore);
        assert_eq!(Opcode::from_byte(240), Opcode::Istore);
        assert_eq!(Opcode::from_byte(239), Opcode::Cfround);
    }

    #[test]
    fn test_decode() {
        let instr = Instruction::decode(&[16, 9, 3, 0b1011_0110, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(instr.opcode, Opcode::IaddM);
        assert_eq!(instr.dst_reg(), 1);
        assert_eq!(instr.src_reg(), 3);
        assert_eq!(instr.mod_mem(), 2);
        assert_eq!(instr.mod_shift(), 1);
        assert_eq!(instr.mod_cond(), 11);
        assert_eq!(instr.imm, 0x12345678);
        assert_eq!(format!("{}", instr.opcode), "IADD_M");
    }

    #[test]
    fn test_configuration() {
        let mut bytes = vec![0u8; PROGRAM_BYTES];
        bytes[8 * 8..8 * 9].copy_from_slice(&0xFFFF_FFFF_FFFF_FFFFu64.to_le_bytes());
        bytes[8 * 10..8 * 11].copy_from_slice(&0x1234_5678_9ABC_DEF0u64.to_le_bytes());
        bytes[8 * 12..8 * 13].copy_from_slice(&0b1010u64.to_le_bytes());
        bytes[8 * 13..8 * 14].copy_from_slice(&(524288u64 + 5).to_le_bytes());
        let prog = Program::from_bytes(&bytes);
        assert_eq!(prog.instructions.len(), PROGRAM_SIZE);

        let config = prog.configuration();
        assert_eq!(config.read_reg, [0, 3, 4, 7]);
        let mem = prog.memory_registers();
        assert_eq!(mem.ma, 0x7FFFFFC0);
        assert_eq!(mem.mx, 0x9ABC_DEF0);
        assert_eq!(prog.dataset_offset(), 5 * 64);
        assert_eq!(prog.a_registers()[0], [1.0, 1.0]);
    }

    #[test]
    fn test_register_file_bytes() {
        let mut reg = RegisterFile::default();
        reg.r[0] = 0x0102030405060708;
        reg.f[0][1] = 1.0;
        reg.a[3][1] = -2.0;
        let bytes = reg.to_bytes();
        assert_eq!(bytes[0], 0x08);
        assert_eq!(&bytes[72..80], &1.0f64.to_bits().to_le_bytes());
        assert_eq!(&bytes[248..256], &(-2.0f64).to_bits().to_le_bytes());

        let mut hash = [0u8; 64];
        hash[56..64].copy_from_slice(&3.0f64.to_bits().to_le_bytes());
        reg.set_a_bytes(&hash);
        assert_eq!(reg.a[3][1], 3.0);
        assert_eq!(reg.a[0][0], 0.0);
    }
}
