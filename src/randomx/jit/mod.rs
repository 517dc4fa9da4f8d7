//! x86-64 code generator for System V targets.
//!
//! A compiled program runs the whole iteration loop. Register allocation:
//!
//! | register    | holds                                        |
//! |-------------|----------------------------------------------|
//! | r8..r15     | integer registers r0..r7                     |
//! | xmm0..3     | f0..f3                                       |
//! | xmm4..7     | e0..e3                                       |
//! | xmm8..11    | a0..a3                                       |
//! | xmm12       | scratch for memory operands                  |
//! | xmm13       | mantissa mask for `e` loads                  |
//! | xmm14       | exponent mask for `e` loads                  |
//! | xmm15       | FSCAL_R constant                             |
//! | rsi         | scratchpad                                   |
//! | rdi         | dataset window, or light context             |
//! | rbp         | mx in the low half, ma in the high half      |
//! | rbx         | remaining iterations                         |
//!
//! The host MXCSR is saved on entry and restored on exit. The VM rounding
//! mode travels in `JitContext::vm_mxcsr` from one program to the next.

mod exec_buffer;
mod x86;

use std::mem;
use std::ptr;

use self::exec_buffer::ExecutableBuffer;
use self::x86::{fits_i32, CodeBuffer};
use super::bytecode::{Bytecode, Mem, Op, Src};
use super::common::{
    CACHE_LINE_ALIGN_MASK, CACHE_LINE_SIZE, DYNAMIC_MANTISSA_MASK, REGISTER_NEEDS_DISPLACEMENT,
    SCALE_MASK, SCRATCHPAD_L3_MASK64,
};
use super::cpu::CPU_FEATURES;
use super::flags::Flags;
use super::memory::Cache;
use super::program::{ProgramConfiguration, RegisterFile};
use error::Result;

const CODE_SIZE: usize = 64 * 1024;

//xmm registers preserved around the light mode helper call
const SAVED_XMM: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 14, 15];
const LIGHT_FRAME: u32 = 352;
const LIGHT_GPR_SLOTS: u32 = 240;
const LIGHT_ITEM_SLOT: u32 = 288;

/// Per-program parameters read by the compiled prologue and epilogue.
#[repr(C)]
#[derive(Debug)]
pub struct JitContext {
    pub mx: u32,
    pub ma: u32,
    pub memory: *const u8,
    pub e_mask: [u64; 2],
    pub vm_mxcsr: u32,
    pub host_mxcsr: u32,
}

/// What `JitContext::memory` points to for light mode programs.
#[repr(C)]
pub struct LightContext {
    pub cache: *const Cache,
    pub dataset_offset: u64,
}

extern "sysv64" fn light_dataset_read(ctx: *const LightContext, offset: u64, out: *mut u64) {
    unsafe {
        let ctx = &*ctx;
        let item = (*ctx.cache).init_dataset_item((ctx.dataset_offset + offset) / CACHE_LINE_SIZE);
        ptr::copy_nonoverlapping(item.as_ptr(), out, item.len());
    }
}

type ProgramFn = unsafe extern "sysv64" fn(*mut RegisterFile, *mut JitContext, *mut u8, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetAccess {
    Full,
    Light,
}

pub struct JitCompiler {
    code: CodeBuffer,
    exec: ExecutableBuffer,
    instruction_offsets: Vec<usize>,
    bmi2: bool,
    amd: bool,
    jcc_erratum: bool,
}

impl JitCompiler {
    pub fn new(flags: Flags) -> Result<JitCompiler> {
        let features = *CPU_FEATURES;
        debug!(
            "jit templates: bmi2={} amd={} jcc_erratum={}",
            features.bmi2,
            flags.contains(Flags::AMD),
            features.jcc_erratum
        );
        Ok(JitCompiler {
            code: CodeBuffer::with_capacity(CODE_SIZE),
            exec: ExecutableBuffer::new(CODE_SIZE)?,
            instruction_offsets: Vec::with_capacity(256),
            bmi2: features.bmi2,
            amd: flags.contains(Flags::AMD),
            jcc_erratum: features.jcc_erratum,
        })
    }

    /// Translates `program` and installs it in the code pages.
    pub fn compile(
        &mut self,
        program: &Bytecode,
        config: &ProgramConfiguration,
        access: DatasetAccess,
    ) -> Result<()> {
        self.generate(program, config, access);
        self.exec.install(self.code.bytes())
    }

    fn generate(&mut self, program: &Bytecode, config: &ProgramConfiguration, access: DatasetAccess) {
        self.code.clear();
        self.instruction_offsets.clear();

        self.emit_prologue();
        let loop_top = self.code.pos();
        self.emit_loop_load();
        for op in program.ops() {
            let pos = self.code.pos();
            self.instruction_offsets.push(pos);
            self.emit_op(op);
        }
        match access {
            DatasetAccess::Full => self.emit_full_read(config),
            DatasetAccess::Light => self.emit_light_read(config),
        }
        self.emit_loop_store(config, loop_top);
        self.emit_epilogue();
    }

    /// Runs the installed program for `iterations` (at least one) loop
    /// iterations.
    ///
    /// The caller guarantees `scratchpad` spans the whole L3 scratchpad and
    /// `ctx.memory` matches the access mode the program was compiled for.
    pub unsafe fn run(
        &self,
        reg: &mut RegisterFile,
        ctx: &mut JitContext,
        scratchpad: *mut u8,
        iterations: u32,
    ) {
        let f: ProgramFn = mem::transmute(self.exec.as_ptr());
        f(reg, ctx, scratchpad, iterations as u64);
    }

    fn emit_prologue(&mut self) {
        let c = &mut self.code;
        //callee saved registers, then rdi (register file) and rsi (context)
        c.emit(&[0x53, 0x55, 0x41, 0x54, 0x41, 0x55, 0x41, 0x56, 0x41, 0x57]);
        c.emit(&[0x57, 0x56]);
        //[rsp] holds the current MXCSR image
        c.emit(&[0x48, 0x83, 0xEC, 0x08]);
        c.emit(&[0x0F, 0xAE, 0x5E, 0x24]);
        c.emit(&[0x8B, 0x46, 0x20]);
        c.emit(&[0x89, 0x04, 0x24]);
        c.emit(&[0x0F, 0xAE, 0x14, 0x24]);
        for i in 0..4u8 {
            c.emit(&[0x66, 0x44, 0x0F, 0x10, 0x87 | i << 3]);
            c.emit_u32(192 + 16 * i as u32);
        }
        c.emit(&[0xF3, 0x44, 0x0F, 0x6F, 0x76, 0x10]);
        c.emit_mov_rax_imm64(DYNAMIC_MANTISSA_MASK);
        c.emit(&[0x66, 0x4C, 0x0F, 0x6E, 0xE8, 0x66, 0x45, 0x0F, 0x6C, 0xED]);
        c.emit_mov_rax_imm64(SCALE_MASK);
        c.emit(&[0x66, 0x4C, 0x0F, 0x6E, 0xF8, 0x66, 0x45, 0x0F, 0x6C, 0xFF]);
        c.emit(&[0x48, 0x8B, 0xD9]);
        c.emit(&[0x48, 0x8B, 0x2E]);
        c.emit(&[0x48, 0x8B, 0x7E, 0x08]);
        c.emit(&[0x48, 0x8B, 0xC5]);
        c.emit(&[0x48, 0x8B, 0xF2]);
        for i in 0..8u8 {
            c.emit(&[0x45, 0x31, 0xC0 | i << 3 | i]);
        }
    }

    /// rax holds the two scratchpad addresses: spAddr0 low, spAddr1 high.
    fn emit_loop_load(&mut self) {
        let c = &mut self.code;
        c.emit(&[0x48, 0x8B, 0xD0]);
        c.emit_byte(0x25);
        c.emit_u32(SCRATCHPAD_L3_MASK64 as u32);
        c.emit(&[0x48, 0x8D, 0x0C, 0x06, 0x51]);
        for i in 0..8u8 {
            c.emit(&[0x4C, 0x33, 0x41 | i << 3, 8 * i]);
        }
        c.emit(&[0x48, 0xC1, 0xCA, 0x20]);
        c.emit(&[0x81, 0xE2]);
        c.emit_u32(SCRATCHPAD_L3_MASK64 as u32);
        c.emit(&[0x48, 0x8D, 0x0C, 0x16, 0x51]);
        for i in 0..8u8 {
            c.emit(&[0xF3, 0x0F, 0xE6, 0x41 | i << 3, 8 * i]);
        }
        for k in 4..8u8 {
            c.emit(&[0x41, 0x0F, 0x54, 0xC0 | k << 3 | 5]);
            c.emit(&[0x41, 0x0F, 0x56, 0xC0 | k << 3 | 6]);
        }
    }

    /// mx ^= r[rr2] ^ r[rr3]; the masked address is applied on use, so rbp
    /// keeps the unmasked values.
    fn emit_mx_update(&mut self, config: &ProgramConfiguration) {
        let c = &mut self.code;
        c.emit(&[0x49, 0x8B, 0xC0 | config.read_reg[2] as u8]);
        c.emit(&[0x41, 0x33, 0xC0 | config.read_reg[3] as u8]);
        c.emit(&[0x48, 0x31, 0xC5]);
    }

    fn emit_full_read(&mut self, config: &ProgramConfiguration) {
        self.emit_mx_update(config);
        let c = &mut self.code;
        c.emit(&[0x89, 0xEA, 0x81, 0xE2]);
        c.emit_u32(CACHE_LINE_ALIGN_MASK as u32);
        c.emit(&[0x0F, 0x18, 0x04, 0x17]);
        //swap mx and ma, then read the line at ma
        c.emit(&[0x48, 0xC1, 0xCD, 0x20]);
        c.emit(&[0x89, 0xE9, 0x81, 0xE1]);
        c.emit_u32(CACHE_LINE_ALIGN_MASK as u32);
        for i in 0..8u8 {
            c.emit(&[0x4C, 0x33, 0x44 | i << 3, 0x0F, 8 * i]);
        }
    }

    fn emit_light_read(&mut self, config: &ProgramConfiguration) {
        self.emit_mx_update(config);
        let c = &mut self.code;
        c.emit(&[0x48, 0xC1, 0xCD, 0x20]);
        c.emit(&[0x89, 0xE9, 0x81, 0xE1]);
        c.emit_u32(CACHE_LINE_ALIGN_MASK as u32);

        c.emit(&[0x48, 0x81, 0xEC]);
        c.emit_u32(LIGHT_FRAME);
        for (slot, &x) in SAVED_XMM.iter().enumerate() {
            emit_xmm_spill(c, 0x7F, x, 16 * slot as u32);
        }
        emit_gpr_spill(c, 0x89, 0x48, 6, LIGHT_GPR_SLOTS);
        emit_gpr_spill(c, 0x89, 0x48, 7, LIGHT_GPR_SLOTS + 8);
        for i in 0..4u8 {
            emit_gpr_spill(c, 0x89, 0x4C, i, LIGHT_GPR_SLOTS + 16 + 8 * i as u32);
        }

        //light_dataset_read(rdi, rcx, rsp + LIGHT_ITEM_SLOT)
        c.emit(&[0x48, 0x8B, 0xF1]);
        c.emit(&[0x48, 0x8D, 0x94, 0x24]);
        c.emit_u32(LIGHT_ITEM_SLOT);
        let helper: extern "sysv64" fn(*const LightContext, u64, *mut u64) = light_dataset_read;
        c.emit_mov_rax_imm64(helper as usize as u64);
        c.emit(&[0xFF, 0xD0]);

        for (slot, &x) in SAVED_XMM.iter().enumerate() {
            emit_xmm_spill(c, 0x6F, x, 16 * slot as u32);
        }
        emit_gpr_spill(c, 0x8B, 0x48, 6, LIGHT_GPR_SLOTS);
        emit_gpr_spill(c, 0x8B, 0x48, 7, LIGHT_GPR_SLOTS + 8);
        for i in 0..4u8 {
            emit_gpr_spill(c, 0x8B, 0x4C, i, LIGHT_GPR_SLOTS + 16 + 8 * i as u32);
        }
        for i in 0..8u8 {
            c.emit(&[0x4C, 0x33, 0x84 | i << 3, 0x24]);
            c.emit_u32(LIGHT_ITEM_SLOT + 8 * i as u32);
        }
        c.emit(&[0x48, 0x81, 0xC4]);
        c.emit_u32(LIGHT_FRAME);
    }

    fn emit_loop_store(&mut self, config: &ProgramConfiguration, loop_top: usize) {
        let c = &mut self.code;
        c.emit_byte(0x59);
        for i in 0..8u8 {
            c.emit(&[0x4C, 0x89, 0x41 | i << 3, 8 * i]);
        }
        c.emit_byte(0x59);
        for i in 0..4u8 {
            c.emit(&[0x66, 0x0F, 0x57, 0xC0 | i << 3 | (i + 4)]);
        }
        for i in 0..4u8 {
            c.emit(&[0x66, 0x0F, 0x11, 0x41 | i << 3, 16 * i]);
        }
        c.emit(&[0x49, 0x8B, 0xC0 | config.read_reg[0] as u8]);
        c.emit(&[0x49, 0x33, 0xC0 | config.read_reg[1] as u8]);
        c.emit(&[0x83, 0xEB, 0x01]);
        c.emit_jnz_back(loop_top);
    }

    fn emit_epilogue(&mut self) {
        let c = &mut self.code;
        c.emit(&[0x48, 0x8B, 0x4C, 0x24, 0x10]);
        for i in 0..8u8 {
            c.emit(&[0x4C, 0x89, 0x41 | i << 3, 8 * i]);
        }
        for i in 0..4u8 {
            c.emit(&[0x66, 0x0F, 0x11, 0x41 | i << 3, 64 + 16 * i]);
        }
        for k in 0..4u8 {
            c.emit(&[0x66, 0x0F, 0x11, 0x81 | (4 + k) << 3]);
            c.emit_u32(128 + 16 * k as u32);
        }
        c.emit(&[0x48, 0x8B, 0x4C, 0x24, 0x08]);
        c.emit(&[0x0F, 0xAE, 0x59, 0x20]);
        c.emit(&[0x0F, 0xAE, 0x51, 0x24]);
        c.emit(&[0x48, 0x83, 0xC4, 0x18]);
        c.emit(&[0x41, 0x5F, 0x41, 0x5E, 0x41, 0x5D, 0x41, 0x5C, 0x5D, 0x5B]);
        c.emit_byte(0xC3);
    }

    /// `lea eax|ecx, [r_base + imm32]; and eax|ecx, mask`
    fn emit_address(&mut self, base: usize, imm: u64, mask: u64, rcx: bool) {
        let c = &mut self.code;
        let base = base as u8;
        let modrm = if rcx { 0x88 } else { 0x80 } | base;
        c.emit(&[0x41, 0x8D, modrm]);
        if base == 4 {
            c.emit_byte(0x24);
        }
        c.emit_u32(imm as u32);
        if rcx {
            c.emit(&[0x81, 0xE1]);
        } else {
            c.emit_byte(0x25);
        }
        c.emit_u32(mask as u32);
    }

    /// `op r_dst, qword [rsi + address]` for the REX.W+R forms of add, sub,
    /// imul and xor.
    fn emit_mem_alu(&mut self, opcode: &[u8], dst: usize, mem: Mem) {
        let dst = dst as u8;
        match mem.base {
            Some(base) => {
                self.emit_address(base, mem.imm, mem.mask, false);
                self.code.emit_byte(0x4C);
                self.code.emit(opcode);
                self.code.emit(&[0x04 | dst << 3, 0x06]);
            }
            None => {
                self.code.emit_byte(0x4C);
                self.code.emit(opcode);
                self.code.emit_byte(0x86 | dst << 3);
                self.code.emit_u32((mem.imm & mem.mask) as u32);
            }
        }
    }

    /// High multiplication with a memory operand: `/4` is mul, `/5` imul.
    fn emit_mulh_mem(&mut self, ext: u8, dst: usize, mem: Mem) {
        let dst = dst as u8;
        match mem.base {
            Some(base) => {
                self.emit_address(base, mem.imm, mem.mask, true);
                self.code.emit(&[0x49, 0x8B, 0xC0 | dst]);
                self.code.emit(&[0x48, 0xF7, ext << 3 | 0x04, 0x0E]);
            }
            None => {
                self.code.emit(&[0x49, 0x8B, 0xC0 | dst]);
                self.code.emit(&[0x48, 0xF7, 0x80 | ext << 3 | 0x06]);
                self.code.emit_u32((mem.imm & mem.mask) as u32);
            }
        }
        self.code.emit(&[0x4C, 0x8B, 0xC2 | dst << 3]);
    }

    /// `cvtdq2pd xmm12, [rsi + address]`
    fn emit_float_load(&mut self, mem: Mem) {
        let base = mem.base.unwrap_or(0);
        self.emit_address(base, mem.imm, mem.mask, false);
        self.code.emit(&[0xF3, 0x44, 0x0F, 0xE6, 0x24, 0x06]);
    }

    fn emit_op(&mut self, op: &Op) {
        match *op {
            Op::IaddRs { dst, src, shift, imm } => {
                let (dst, src) = (dst as u8, src as u8);
                let disp = dst as usize == REGISTER_NEEDS_DISPLACEMENT;
                let modrm = if disp { 0x80 } else { 0x00 } | dst << 3 | 0x04;
                self.code.emit(&[0x4F, 0x8D, modrm, (shift as u8) << 6 | src << 3 | dst]);
                if disp {
                    self.code.emit_u32(imm as u32);
                }
            }
            Op::IaddM { dst, mem } => self.emit_mem_alu(&[0x03], dst, mem),
            Op::IsubR { dst, src } => match src {
                Src::Reg(src) => self.code.emit(&[0x4D, 0x2B, 0xC0 | (dst as u8) << 3 | src as u8]),
                Src::Imm(v) => {
                    self.code.emit(&[0x49, 0x81, 0xE8 | dst as u8]);
                    self.code.emit_u32(v as u32);
                }
            },
            Op::IsubM { dst, mem } => self.emit_mem_alu(&[0x2B], dst, mem),
            Op::ImulR { dst, src } => {
                let dst = dst as u8;
                match src {
                    Src::Reg(src) => self.code.emit(&[0x4D, 0x0F, 0xAF, 0xC0 | dst << 3 | src as u8]),
                    Src::Imm(v) if fits_i32(v) => {
                        self.code.emit(&[0x4D, 0x69, 0xC0 | dst << 3 | dst]);
                        self.code.emit_u32(v as u32);
                    }
                    Src::Imm(v) => {
                        self.code.emit_mov_rax_imm64(v);
                        self.code.emit(&[0x4C, 0x0F, 0xAF, 0xC0 | dst << 3]);
                    }
                }
            }
            Op::ImulM { dst, mem } => self.emit_mem_alu(&[0x0F, 0xAF], dst, mem),
            Op::ImulhR { dst, src } => {
                let (dst, src) = (dst as u8, src as u8);
                if self.bmi2 {
                    //mov rdx, r_dst; mulx r_dst, rax, r_src
                    self.code.emit(&[0x49, 0x8B, 0xD0 | dst]);
                    self.code.emit(&[0xC4, 0x42, 0xFB, 0xF6, 0xC0 | dst << 3 | src]);
                } else {
                    self.code.emit(&[0x49, 0x8B, 0xC0 | dst]);
                    self.code.emit(&[0x49, 0xF7, 0xE0 | src]);
                    self.code.emit(&[0x4C, 0x8B, 0xC2 | dst << 3]);
                }
            }
            Op::ImulhM { dst, mem } => self.emit_mulh_mem(4, dst, mem),
            Op::IsmulhR { dst, src } => {
                let (dst, src) = (dst as u8, src as u8);
                self.code.emit(&[0x49, 0x8B, 0xC0 | dst]);
                self.code.emit(&[0x49, 0xF7, 0xE8 | src]);
                self.code.emit(&[0x4C, 0x8B, 0xC2 | dst << 3]);
            }
            Op::IsmulhM { dst, mem } => self.emit_mulh_mem(5, dst, mem),
            Op::InegR { dst } => self.code.emit(&[0x49, 0xF7, 0xD8 | dst as u8]),
            Op::IxorR { dst, src } => match src {
                Src::Reg(src) => self.code.emit(&[0x4D, 0x33, 0xC0 | (dst as u8) << 3 | src as u8]),
                Src::Imm(v) => {
                    self.code.emit(&[0x49, 0x81, 0xF0 | dst as u8]);
                    self.code.emit_u32(v as u32);
                }
            },
            Op::IxorM { dst, mem } => self.emit_mem_alu(&[0x33], dst, mem),
            Op::IrorR { dst, src } => self.emit_rotate(0xC8, dst, src),
            Op::IrolR { dst, src } => self.emit_rotate(0xC0, dst, src),
            Op::IswapR { dst, src } => self.code.emit(&[0x4D, 0x87, 0xC0 | (src as u8) << 3 | dst as u8]),
            Op::FswapR { dst } => self.code.emit(&[0x66, 0x0F, 0xC6, 0xC0 + 9 * dst as u8, 0x01]),
            Op::FaddR { dst, src } => self.code.emit(&[0x66, 0x41, 0x0F, 0x58, 0xC0 | (dst as u8) << 3 | src as u8]),
            Op::FaddM { dst, mem } => {
                self.emit_float_load(mem);
                self.code.emit(&[0x66, 0x41, 0x0F, 0x58, 0xC4 | (dst as u8) << 3]);
            }
            Op::FsubR { dst, src } => self.code.emit(&[0x66, 0x41, 0x0F, 0x5C, 0xC0 | (dst as u8) << 3 | src as u8]),
            Op::FsubM { dst, mem } => {
                self.emit_float_load(mem);
                self.code.emit(&[0x66, 0x41, 0x0F, 0x5C, 0xC4 | (dst as u8) << 3]);
            }
            Op::FscalR { dst } => self.code.emit(&[0x41, 0x0F, 0x57, 0xC7 | (dst as u8) << 3]),
            Op::FmulR { dst, src } => self.code.emit(&[0x66, 0x41, 0x0F, 0x59, 0xE0 | (dst as u8) << 3 | src as u8]),
            Op::FdivM { dst, mem } => {
                self.emit_float_load(mem);
                self.code.emit(&[0x45, 0x0F, 0x54, 0xE5, 0x45, 0x0F, 0x56, 0xE6]);
                self.code.emit(&[0x66, 0x41, 0x0F, 0x5E, 0xE4 | (dst as u8) << 3]);
            }
            Op::FsqrtR { dst } => self.code.emit(&[0x66, 0x0F, 0x51, 0xE4 + 9 * dst as u8]),
            Op::Cbranch { reg, imm, mask, target } => self.emit_cbranch(reg, imm, mask, target),
            Op::Cfround { src, rot } => self.emit_cfround(src, rot),
            Op::Istore { dst, src, imm, mask } => {
                self.emit_address(dst, imm, mask, false);
                self.code.emit(&[0x4C, 0x89, 0x04 | (src as u8) << 3, 0x06]);
            }
            Op::Nop => {}
        }
    }

    /// `ext` is the ModRM base for ror (0xC8) or rol (0xC0).
    fn emit_rotate(&mut self, ext: u8, dst: usize, src: Src) {
        let dst = dst as u8;
        match src {
            Src::Reg(src) => {
                self.code.emit(&[0x41, 0x8B, 0xC8 | src as u8]);
                self.code.emit(&[0x49, 0xD3, ext | dst]);
            }
            Src::Imm(count) => self.code.emit(&[0x49, 0xC1, ext | dst, (count & 63) as u8]),
        }
    }

    fn emit_cbranch(&mut self, reg: usize, imm: u64, mask: u64, target: usize) {
        if self.jcc_erratum {
            //keep the fused test+jz (at most 13 bytes, 7 after the add)
            //from crossing or ending on a 32-byte boundary
            let start = (self.code.pos() + 7) % 32;
            if start + 13 >= 32 {
                self.code.emit_nops(32 - start);
            }
        }
        let reg = reg as u8;
        self.code.emit(&[0x49, 0x81, 0xC0 | reg]);
        self.code.emit_u32(imm as u32);
        self.code.emit(&[0x49, 0xF7, 0xC0 | reg]);
        self.code.emit_u32(mask as u32);
        let target = self.instruction_offsets[target];
        self.code.emit_jz_back(target);
    }

    fn emit_cfround(&mut self, src: usize, rot: u32) {
        let src = src as u8;
        if self.bmi2 {
            //rorx rax, r_src, rot - 13
            self.code.emit(&[0xC4, 0xC3, 0xFB, 0xF0, 0xC0 | src, (rot.wrapping_sub(13) & 63) as u8]);
        } else {
            self.code.emit(&[0x49, 0x8B, 0xC0 | src]);
            let rol = 13u32.wrapping_sub(rot) & 63;
            if rol != 0 {
                self.code.emit(&[0x48, 0xC1, 0xC0, rol as u8]);
            }
        }
        //and eax, 0x6000; or eax, 0x9FC0
        self.code.emit(&[0x25, 0x00, 0x60, 0x00, 0x00, 0x0D, 0xC0, 0x9F, 0x00, 0x00]);
        if self.amd {
            //skip ldmxcsr when the mode is unchanged
            self.code.emit(&[0x3B, 0x44, 0x24, 0x10, 0x74, 0x09]);
        }
        self.code.emit(&[0x89, 0x44, 0x24, 0x10, 0x0F, 0xAE, 0x54, 0x24, 0x10]);
    }
}

/// `movdqu [rsp + disp32], xmm` (0x7F) or the matching load (0x6F).
fn emit_xmm_spill(c: &mut CodeBuffer, opcode: u8, xmm: u8, disp: u32) {
    c.emit_byte(0xF3);
    if xmm >= 8 {
        c.emit_byte(0x44);
    }
    c.emit(&[0x0F, opcode, 0x84 | (xmm & 7) << 3, 0x24]);
    c.emit_u32(disp);
}

/// `mov [rsp + disp32], reg` (0x89) or the matching load (0x8B).
fn emit_gpr_spill(c: &mut CodeBuffer, opcode: u8, rex: u8, reg: u8, disp: u32) {
    c.emit(&[rex, opcode, 0x84 | reg << 3, 0x24]);
    c.emit_u32(disp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use randomx::program::{Instruction, Opcode};

    fn compiler(bmi2: bool, amd: bool, jcc_erratum: bool) -> JitCompiler {
        let mut jit = JitCompiler::new(Flags::DEFAULT).unwrap();
        jit.bmi2 = bmi2;
        jit.amd = amd;
        jit.jcc_erratum = jcc_erratum;
        jit
    }

    fn encode(jit: &mut JitCompiler, instr: Instruction) -> Vec<u8> {
        let code = Bytecode::compile(&[instr]);
        jit.code.clear();
        jit.instruction_offsets.clear();
        jit.instruction_offsets.push(0);
        jit.emit_op(&code.ops()[0]);
        jit.code.bytes().to_vec()
    }

    fn instr(opcode: Opcode, dst: u8, src: u8, modifier: u8, imm: u32) -> Instruction {
        Instruction {
            opcode,
            dst,
            src,
            modifier,
            imm,
        }
    }

    #[test]
    fn test_integer_encodings() {
        let mut jit = compiler(false, false, false);
        //lea r13, [r13 + r10*4 + 0x10]
        assert_eq!(
            encode(&mut jit, instr(Opcode::IaddRs, 5, 2, 0b1000, 0x10)),
            vec![0x4F, 0x8D, 0xAC, 0x95, 0x10, 0, 0, 0]
        );
        //lea r9, [r9 + r12]
        assert_eq!(encode(&mut jit, instr(Opcode::IaddRs, 1, 4, 0, 0)), vec![0x4F, 0x8D, 0x0C, 0x21]);
        //sub r11, r14
        assert_eq!(encode(&mut jit, instr(Opcode::IsubR, 3, 6, 0, 0)), vec![0x4D, 0x2B, 0xDE]);
        //sub r11, -1
        assert_eq!(
            encode(&mut jit, instr(Opcode::IsubR, 3, 3, 0, 0xFFFF_FFFF)),
            vec![0x49, 0x81, 0xEB, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        //neg r15
        assert_eq!(encode(&mut jit, instr(Opcode::InegR, 7, 0, 0, 0)), vec![0x49, 0xF7, 0xDF]);
        //mov ecx, r10d; ror r8, cl
        assert_eq!(
            encode(&mut jit, instr(Opcode::IrorR, 0, 2, 0, 0)),
            vec![0x41, 0x8B, 0xCA, 0x49, 0xD3, 0xC8]
        );
        //rol r8, 3
        assert_eq!(encode(&mut jit, instr(Opcode::IrolR, 0, 0, 0, 67)), vec![0x49, 0xC1, 0xC0, 3]);
        //xchg
        assert_eq!(encode(&mut jit, instr(Opcode::IswapR, 1, 2, 0, 0)), vec![0x4D, 0x87, 0xD1]);
        assert!(encode(&mut jit, instr(Opcode::IswapR, 1, 1, 0, 0)).is_empty());
        assert!(encode(&mut jit, instr(Opcode::ImulRcp, 1, 1, 0, 1 << 20)).is_empty());
    }

    #[test]
    fn test_memory_encodings() {
        let mut jit = compiler(false, false, false);
        //lea eax, [r12 + 8]; and eax, L1; add r9, [rsi + rax]
        assert_eq!(
            encode(&mut jit, instr(Opcode::IaddM, 1, 4, 1, 8)),
            vec![0x41, 0x8D, 0x84, 0x24, 8, 0, 0, 0, 0x25, 0xF8, 0x3F, 0, 0, 0x4C, 0x03, 0x0C, 0x06]
        );
        //xor r10, [rsi + 0x1FFFF8]
        assert_eq!(
            encode(&mut jit, instr(Opcode::IxorM, 2, 2, 0, 0xFFFF_FFFF)),
            vec![0x4C, 0x33, 0x96, 0xF8, 0xFF, 0x1F, 0x00]
        );
        //lea ecx, [r11]; and ecx, L2; mov rax, r8; mul qword [rsi + rcx]; mov r8, rdx
        assert_eq!(
            encode(&mut jit, instr(Opcode::ImulhM, 0, 3, 0, 0)),
            vec![
                0x41, 0x8D, 0x8B, 0, 0, 0, 0, 0x81, 0xE1, 0xF8, 0xFF, 0x03, 0x00, 0x49, 0x8B, 0xC0,
                0x48, 0xF7, 0x24, 0x0E, 0x4C, 0x8B, 0xC2
            ]
        );
        //cond 14 stores use the L3 mask
        assert_eq!(
            encode(&mut jit, instr(Opcode::Istore, 6, 1, 0xE0, 0)),
            vec![0x41, 0x8D, 0x86, 0, 0, 0, 0, 0x25, 0xF8, 0xFF, 0x1F, 0x00, 0x4C, 0x89, 0x0C, 0x06]
        );
    }

    #[test]
    fn test_float_encodings() {
        let mut jit = compiler(false, false, false);
        //addpd xmm2, xmm9
        assert_eq!(encode(&mut jit, instr(Opcode::FaddR, 2, 1, 0, 0)), vec![0x66, 0x41, 0x0F, 0x58, 0xD1]);
        //mulpd xmm7, xmm8
        assert_eq!(encode(&mut jit, instr(Opcode::FmulR, 3, 4, 0, 0)), vec![0x66, 0x41, 0x0F, 0x59, 0xF8]);
        //sqrtpd xmm5, xmm5
        assert_eq!(encode(&mut jit, instr(Opcode::FsqrtR, 1, 0, 0, 0)), vec![0x66, 0x0F, 0x51, 0xED]);
        //shufpd xmm6, xmm6, 1
        assert_eq!(
            encode(&mut jit, instr(Opcode::FswapR, 6, 0, 0, 0)),
            vec![0x66, 0x0F, 0xC6, 0xF6, 0x01]
        );
        //xorps xmm1, xmm15
        assert_eq!(encode(&mut jit, instr(Opcode::FscalR, 5, 0, 0, 0)), vec![0x41, 0x0F, 0x57, 0xCF]);
    }

    #[test]
    fn test_capability_templates() {
        let mut plain = compiler(false, false, false);
        let mut bmi2 = compiler(true, true, false);

        let mulh = instr(Opcode::ImulhR, 2, 5, 0, 0);
        assert_eq!(
            encode(&mut plain, mulh),
            vec![0x49, 0x8B, 0xC2, 0x49, 0xF7, 0xE5, 0x4C, 0x8B, 0xD2]
        );
        assert_eq!(
            encode(&mut bmi2, mulh),
            vec![0x49, 0x8B, 0xD2, 0xC4, 0x42, 0xFB, 0xF6, 0xD5]
        );

        let cfround = instr(Opcode::Cfround, 0, 3, 0, 13);
        let code = encode(&mut plain, cfround);
        assert_eq!(&code[..3], &[0x49, 0x8B, 0xC3]);
        assert_eq!(&code[3..8], &[0x25, 0x00, 0x60, 0x00, 0x00]);
        let code = encode(&mut bmi2, cfround);
        assert_eq!(&code[..6], &[0xC4, 0xC3, 0xFB, 0xF0, 0xC3, 0x00]);
        assert_eq!(&code[16..22], &[0x3B, 0x44, 0x24, 0x10, 0x74, 0x09]);
    }

    #[test]
    fn test_cbranch_alignment() {
        let prog = [
            instr(Opcode::IaddRs, 1, 1, 0, 0),
            instr(Opcode::Cbranch, 1, 0, 0, 0),
        ];
        let code = Bytecode::compile(&prog);
        for &erratum in [false, true].iter() {
            for lead in 0..32 {
                let mut jit = compiler(false, false, erratum);
                jit.code.clear();
                jit.instruction_offsets.clear();
                jit.code.emit_nops(lead);
                for op in code.ops() {
                    let pos = jit.code.pos();
                    jit.instruction_offsets.push(pos);
                    jit.emit_op(op);
                }
                let end = jit.code.pos();
                let test_start = end - 2 - 7;
                if erratum {
                    assert!(test_start / 32 == (end - 1) / 32 && end % 32 != 0);
                }
                //short jz back to the instruction after the last write of r1
                let rel = jit.code.bytes()[end - 1] as i8 as i64;
                assert_eq!(end as i64 + rel, jit.instruction_offsets[1] as i64);
            }
        }
    }

    #[test]
    fn test_whole_program_layout() {
        let mut jit = compiler(false, false, false);
        let program = Bytecode::compile(&[instr(Opcode::InegR, 0, 0, 0, 0)]);
        let config = ProgramConfiguration {
            e_mask: [0, 0],
            read_reg: [0, 3, 4, 7],
        };
        jit.compile(&program, &config, DatasetAccess::Full).unwrap();
        let code = jit.code.bytes();
        assert_eq!(&code[..2], &[0x53, 0x55]);
        assert_eq!(code[code.len() - 1], 0xC3);
        assert!(jit.exec.len() == code.len());

        let full_len = code.len();
        jit.compile(&program, &config, DatasetAccess::Light).unwrap();
        assert!(jit.code.bytes().len() > full_len);
    }
}
