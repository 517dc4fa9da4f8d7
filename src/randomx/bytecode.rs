//! Portable interpreter. Programs are first lowered to a compact bytecode
//! with operands, masks and branch targets resolved.

use std::convert::TryInto;

use super::common::{
    is_zero_or_power_of_2, mulh, reciprocal, sign_extend_2s_compl, smulh, CONDITION_MASK,
    DYNAMIC_MANTISSA_MASK, JUMP_OFFSET, REGISTERS_COUNT, REGISTER_COUNT_FLT,
    REGISTER_NEEDS_DISPLACEMENT, SCALE_MASK, SCRATCHPAD_L1_MASK, SCRATCHPAD_L2_MASK,
    SCRATCHPAD_L3_MASK, STORE_L3_CONDITION,
};
use super::float::{self, RoundingMode};
use super::program::{Instruction, Opcode, RegisterFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Reg(usize),
    Imm(u64),
}

/// Scratchpad operand: `(base + imm) & mask`, base absent for absolute
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: Option<usize>,
    pub imm: u64,
    pub mask: u64,
}

/// One lowered instruction. `Cbranch::target` is the instruction index
/// execution resumes at when the branch is taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    IaddRs { dst: usize, src: usize, shift: u32, imm: u64 },
    IaddM { dst: usize, mem: Mem },
    IsubR { dst: usize, src: Src },
    IsubM { dst: usize, mem: Mem },
    ImulR { dst: usize, src: Src },
    ImulM { dst: usize, mem: Mem },
    ImulhR { dst: usize, src: usize },
    ImulhM { dst: usize, mem: Mem },
    IsmulhR { dst: usize, src: usize },
    IsmulhM { dst: usize, mem: Mem },
    InegR { dst: usize },
    IxorR { dst: usize, src: Src },
    IxorM { dst: usize, mem: Mem },
    IrorR { dst: usize, src: Src },
    IrolR { dst: usize, src: Src },
    IswapR { dst: usize, src: usize },
    FswapR { dst: usize },
    FaddR { dst: usize, src: usize },
    FaddM { dst: usize, mem: Mem },
    FsubR { dst: usize, src: usize },
    FsubM { dst: usize, mem: Mem },
    FscalR { dst: usize },
    FmulR { dst: usize, src: usize },
    FdivM { dst: usize, mem: Mem },
    FsqrtR { dst: usize },
    Cbranch { reg: usize, imm: u64, mask: u64, target: usize },
    Cfround { src: usize, rot: u32 },
    Istore { dst: usize, src: usize, imm: u64, mask: u64 },
    Nop,
}

fn mem_operand(instr: &Instruction) -> Mem {
    let (dst, src) = (instr.dst_reg(), instr.src_reg());
    if src != dst {
        Mem {
            base: Some(src),
            imm: sign_extend_2s_compl(instr.imm),
            mask: if instr.mod_mem() != 0 {
                SCRATCHPAD_L1_MASK
            } else {
                SCRATCHPAD_L2_MASK
            },
        }
    } else {
        Mem {
            base: None,
            imm: sign_extend_2s_compl(instr.imm),
            mask: SCRATCHPAD_L3_MASK,
        }
    }
}

fn float_mem_operand(instr: &Instruction) -> Mem {
    Mem {
        base: Some(instr.src_reg()),
        imm: sign_extend_2s_compl(instr.imm),
        mask: if instr.mod_mem() != 0 {
            SCRATCHPAD_L1_MASK
        } else {
            SCRATCHPAD_L2_MASK
        },
    }
}

fn reg_or_imm(instr: &Instruction, imm: u64) -> Src {
    if instr.src_reg() != instr.dst_reg() {
        Src::Reg(instr.src_reg())
    } else {
        Src::Imm(imm)
    }
}

/// A program lowered for the interpreter.
#[derive(Debug, Clone)]
pub struct Bytecode {
    ops: Vec<Op>,
}

impl Bytecode {
    pub fn compile(instructions: &[Instruction]) -> Bytecode {
        //last instruction that modified each integer register, branch targets
        //resolve to the one after it
        let mut register_usage: [Option<usize>; REGISTERS_COUNT] = [None; REGISTERS_COUNT];
        let mut ops = Vec::with_capacity(instructions.len());

        for (i, instr) in instructions.iter().enumerate() {
            let dst = instr.dst_reg();
            let src = instr.src_reg();
            let imm = sign_extend_2s_compl(instr.imm);
            let mut writes = Some(dst);

            let op = match instr.opcode {
                Opcode::IaddRs => Op::IaddRs {
                    dst,
                    src,
                    shift: instr.mod_shift() as u32,
                    imm: if dst == REGISTER_NEEDS_DISPLACEMENT { imm } else { 0 },
                },
                Opcode::IaddM => Op::IaddM { dst, mem: mem_operand(instr) },
                Opcode::IsubR => Op::IsubR { dst, src: reg_or_imm(instr, imm) },
                Opcode::IsubM => Op::IsubM { dst, mem: mem_operand(instr) },
                Opcode::ImulR => Op::ImulR { dst, src: reg_or_imm(instr, imm) },
                Opcode::ImulM => Op::ImulM { dst, mem: mem_operand(instr) },
                Opcode::ImulhR => Op::ImulhR { dst, src },
                Opcode::ImulhM => Op::ImulhM { dst, mem: mem_operand(instr) },
                Opcode::IsmulhR => Op::IsmulhR { dst, src },
                Opcode::IsmulhM => Op::IsmulhM { dst, mem: mem_operand(instr) },
                Opcode::ImulRcp => {
                    if is_zero_or_power_of_2(instr.imm) {
                        writes = None;
                        Op::Nop
                    } else {
                        Op::ImulR { dst, src: Src::Imm(reciprocal(instr.imm)) }
                    }
                }
                Opcode::InegR => Op::InegR { dst },
                Opcode::IxorR => Op::IxorR { dst, src: reg_or_imm(instr, imm) },
                Opcode::IxorM => Op::IxorM { dst, mem: mem_operand(instr) },
                Opcode::IrorR => Op::IrorR { dst, src: reg_or_imm(instr, (instr.imm & 63) as u64) },
                Opcode::IrolR => Op::IrolR { dst, src: reg_or_imm(instr, (instr.imm & 63) as u64) },
                Opcode::IswapR => {
                    if src != dst {
                        register_usage[src] = Some(i);
                        Op::IswapR { dst, src }
                    } else {
                        writes = None;
                        Op::Nop
                    }
                }
                _ => {
                    writes = None;
                    match instr.opcode {
                        Opcode::FswapR => Op::FswapR { dst },
                        Opcode::FaddR => Op::FaddR { dst: instr.dst_flt(), src: instr.src_flt() },
                        Opcode::FaddM => Op::FaddM { dst: instr.dst_flt(), mem: float_mem_operand(instr) },
                        Opcode::FsubR => Op::FsubR { dst: instr.dst_flt(), src: instr.src_flt() },
                        Opcode::FsubM => Op::FsubM { dst: instr.dst_flt(), mem: float_mem_operand(instr) },
                        Opcode::FscalR => Op::FscalR { dst: instr.dst_flt() },
                        Opcode::FmulR => Op::FmulR { dst: instr.dst_flt(), src: instr.src_flt() },
                        Opcode::FdivM => Op::FdivM { dst: instr.dst_flt(), mem: float_mem_operand(instr) },
                        Opcode::FsqrtR => Op::FsqrtR { dst: instr.dst_flt() },
                        Opcode::Cbranch => {
                            let shift = instr.mod_cond() as u32 + JUMP_OFFSET;
                            let mut imm = imm | (1u64 << shift);
                            //at most two successive jumps
                            imm &= !(1u64 << (shift - 1));
                            let target = register_usage[dst].map_or(0, |t| t + 1);
                            for usage in register_usage.iter_mut() {
                                *usage = Some(i);
                            }
                            Op::Cbranch {
                                reg: dst,
                                imm,
                                mask: CONDITION_MASK << shift,
                                target,
                            }
                        }
                        Opcode::Cfround => Op::Cfround { src, rot: instr.imm & 63 },
                        Opcode::Istore => Op::Istore {
                            dst,
                            src,
                            imm,
                            mask: if instr.mod_cond() < STORE_L3_CONDITION {
                                if instr.mod_mem() != 0 {
                                    SCRATCHPAD_L1_MASK
                                } else {
                                    SCRATCHPAD_L2_MASK
                                }
                            } else {
                                SCRATCHPAD_L3_MASK
                            },
                        },
                        _ => Op::Nop,
                    }
                }
            };

            if let Some(reg) = writes {
                register_usage[reg] = Some(i);
            }
            ops.push(op);
        }

        Bytecode { ops }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Runs the program once over `reg`. `mode` is the current rounding
    /// mode, CFROUND updates it for later instructions and later programs.
    pub fn execute(
        &self,
        reg: &mut RegisterFile,
        scratchpad: &mut [u8],
        e_mask: [u64; 2],
        mode: &mut RoundingMode,
    ) {
        let r = &mut reg.r;
        let mut pc = 0;
        while pc < self.ops.len() {
            match self.ops[pc] {
                Op::IaddRs { dst, src, shift, imm } => {
                    r[dst] = r[dst].wrapping_add(r[src] << shift).wrapping_add(imm)
                }
                Op::IaddM { dst, mem } => {
                    r[dst] = r[dst].wrapping_add(load64(scratchpad, address(r, mem)))
                }
                Op::IsubR { dst, src } => r[dst] = r[dst].wrapping_sub(value(r, src)),
                Op::IsubM { dst, mem } => {
                    r[dst] = r[dst].wrapping_sub(load64(scratchpad, address(r, mem)))
                }
                Op::ImulR { dst, src } => r[dst] = r[dst].wrapping_mul(value(r, src)),
                Op::ImulM { dst, mem } => {
                    r[dst] = r[dst].wrapping_mul(load64(scratchpad, address(r, mem)))
                }
                Op::ImulhR { dst, src } => r[dst] = mulh(r[dst], r[src]),
                Op::ImulhM { dst, mem } => r[dst] = mulh(r[dst], load64(scratchpad, address(r, mem))),
                Op::IsmulhR { dst, src } => r[dst] = smulh(r[dst], r[src]),
                Op::IsmulhM { dst, mem } => {
                    r[dst] = smulh(r[dst], load64(scratchpad, address(r, mem)))
                }
                Op::InegR { dst } => r[dst] = r[dst].wrapping_neg(),
                Op::IxorR { dst, src } => r[dst] ^= value(r, src),
                Op::IxorM { dst, mem } => r[dst] ^= load64(scratchpad, address(r, mem)),
                Op::IrorR { dst, src } => r[dst] = r[dst].rotate_right((value(r, src) & 63) as u32),
                Op::IrolR { dst, src } => r[dst] = r[dst].rotate_left((value(r, src) & 63) as u32),
                Op::IswapR { dst, src } => r.swap(dst, src),
                Op::FswapR { dst } => {
                    let lanes = if dst < REGISTER_COUNT_FLT {
                        &mut reg.f[dst]
                    } else {
                        &mut reg.e[dst - REGISTER_COUNT_FLT]
                    };
                    lanes.swap(0, 1);
                }
                Op::FaddR { dst, src } => {
                    let a = reg.a[src];
                    lanes2(&mut reg.f[dst], a, |x, y| float::add(x, y, *mode));
                }
                Op::FaddM { dst, mem } => {
                    let v = load_cvt(scratchpad, address(r, mem));
                    lanes2(&mut reg.f[dst], v, |x, y| float::add(x, y, *mode));
                }
                Op::FsubR { dst, src } => {
                    let a = reg.a[src];
                    lanes2(&mut reg.f[dst], a, |x, y| float::sub(x, y, *mode));
                }
                Op::FsubM { dst, mem } => {
                    let v = load_cvt(scratchpad, address(r, mem));
                    lanes2(&mut reg.f[dst], v, |x, y| float::sub(x, y, *mode));
                }
                Op::FscalR { dst } => {
                    for lane in reg.f[dst].iter_mut() {
                        *lane = f64::from_bits(lane.to_bits() ^ SCALE_MASK);
                    }
                }
                Op::FmulR { dst, src } => {
                    let a = reg.a[src];
                    lanes2(&mut reg.e[dst], a, |x, y| float::mul(x, y, *mode));
                }
                Op::FdivM { dst, mem } => {
                    let v = mask_exponent_mantissa(load_cvt(scratchpad, address(r, mem)), e_mask);
                    lanes2(&mut reg.e[dst], v, |x, y| float::div(x, y, *mode));
                }
                Op::FsqrtR { dst } => {
                    for lane in reg.e[dst].iter_mut() {
                        *lane = float::sqrt(*lane, *mode);
                    }
                }
                Op::Cbranch { reg: creg, imm, mask, target } => {
                    r[creg] = r[creg].wrapping_add(imm);
                    if r[creg] & mask == 0 {
                        pc = target;
                        continue;
                    }
                }
                Op::Cfround { src, rot } => {
                    *mode = RoundingMode::from_bits(r[src].rotate_right(rot));
                }
                Op::Istore { dst, src, imm, mask } => {
                    let addr = (r[dst].wrapping_add(imm) & mask) as usize;
                    scratchpad[addr..addr + 8].copy_from_slice(&r[src].to_le_bytes());
                }
                Op::Nop => {}
            }
            pc += 1;
        }
    }
}

#[inline(always)]
fn value(r: &[u64; REGISTERS_COUNT], src: Src) -> u64 {
    match src {
        Src::Reg(i) => r[i],
        Src::Imm(v) => v,
    }
}

#[inline(always)]
fn address(r: &[u64; REGISTERS_COUNT], mem: Mem) -> usize {
    let base = mem.base.map_or(0, |i| r[i]);
    (base.wrapping_add(mem.imm) & mem.mask) as usize
}

#[inline(always)]
pub fn load64(scratchpad: &[u8], addr: usize) -> u64 {
    match scratchpad[addr..addr + 8].try_into() {
        Ok(bytes) => u64::from_le_bytes(bytes),
        Err(_) => 0,
    }
}

/// Two signed 32-bit integers converted to a pair of doubles.
#[inline(always)]
pub fn load_cvt(scratchpad: &[u8], addr: usize) -> [f64; 2] {
    let w = load64(scratchpad, addr);
    [w as u32 as i32 as f64, (w >> 32) as u32 as i32 as f64]
}

#[inline(always)]
pub fn mask_exponent_mantissa(v: [f64; 2], e_mask: [u64; 2]) -> [f64; 2] {
    [
        f64::from_bits((v[0].to_bits() & DYNAMIC_MANTISSA_MASK) | e_mask[0]),
        f64::from_bits((v[1].to_bits() & DYNAMIC_MANTISSA_MASK) | e_mask[1]),
    ]
}

#[inline(always)]
fn lanes2<F: Fn(f64, f64) -> f64>(dst: &mut [f64; 2], src: [f64; 2], f: F) {
    dst[0] = f(dst[0], src[0]);
    dst[1] = f(dst[1], src[1]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(opcode: Opcode, dst: u8, src: u8, modifier: u8, imm: u32) -> Instruction {
        Instruction {
            opcode,
            dst,
            src,
            modifier,
            imm,
        }
    }

    fn run(prog: &[Instruction], reg: &mut RegisterFile, pad: &mut [u8]) -> RoundingMode {
        let mut mode = RoundingMode::Nearest;
        Bytecode::compile(prog).execute(reg, pad, [0, 0], &mut mode);
        mode
    }

    #[test]
    fn test_iadd_rs_displacement() {
        let mut reg = RegisterFile::default();
        reg.r[1] = 3;
        reg.r[5] = 10;
        let prog = [
            instr(Opcode::IaddRs, 5, 1, 0b1000, 0xFFFF_FFFF),
            instr(Opcode::IaddRs, 2, 1, 0b0100, 0xFFFF_FFFF),
        ];
        run(&prog, &mut reg, &mut [0u8; 64]);
        assert_eq!(reg.r[5], 10 + (3 << 2) - 1);
        assert_eq!(reg.r[2], 3 << 1);
    }

    #[test]
    fn test_memory_operands() {
        let mut pad = vec![0u8; 1 << 21];
        pad[0x100..0x108].copy_from_slice(&7u64.to_le_bytes());
        pad[0x1FFFF8..].copy_from_slice(&9u64.to_le_bytes());
        let mut reg = RegisterFile::default();
        reg.r[3] = 0x0F0;
        let prog = [
            //r0 += [r3 + 0x10 & L1]
            instr(Opcode::IaddM, 0, 3, 1, 0x10),
            //src == dst reads the absolute L3 address
            instr(Opcode::IxorM, 1, 1, 0, 0xFFFF_FFFF),
        ];
        run(&prog, &mut reg, &mut pad);
        assert_eq!(reg.r[0], 7);
        assert_eq!(reg.r[1], 9);
    }

    #[test]
    fn test_register_or_immediate() {
        let mut reg = RegisterFile::default();
        reg.r[0] = 100;
        reg.r[1] = 0x8000_0000_0000_0001;
        let prog = [
            instr(Opcode::IsubR, 0, 0, 0, 1),
            instr(Opcode::IrorR, 1, 1, 0, 65),
            instr(Opcode::ImulRcp, 2, 0, 0, 64),
        ];
        run(&prog, &mut reg, &mut [0u8; 64]);
        assert_eq!(reg.r[0], 99);
        assert_eq!(reg.r[1], 0xC000_0000_0000_0000);
        assert_eq!(reg.r[2], 0);
    }

    #[test]
    fn test_imul_rcp() {
        let mut reg = RegisterFile::default();
        reg.r[4] = 3;
        run(&[instr(Opcode::ImulRcp, 4, 0, 0, 3)], &mut reg, &mut [0u8; 64]);
        assert_eq!(reg.r[4], 3u64.wrapping_mul(reciprocal(3)));
    }

    #[test]
    fn test_cbranch_loops_back_after_last_write() {
        //r0 counts down through the condition bits until the branch falls through
        let mut reg = RegisterFile::default();
        let prog = [
            instr(Opcode::IaddRs, 1, 2, 0, 0),
            instr(Opcode::InegR, 3, 0, 0, 0),
            instr(Opcode::IaddRs, 4, 4, 0, 0),
            instr(Opcode::Cbranch, 3, 0, 0, 0),
        ];
        let code = Bytecode::compile(&prog);
        match code.ops[3] {
            Op::Cbranch { reg, imm, mask, target } => {
                assert_eq!(reg, 3);
                assert_eq!(target, 2);
                assert_eq!(mask, 0xFF << 8);
                assert_eq!(imm, 1 << 8);
            }
            ref other => panic!("unexpected {:?}", other),
        }
        //after negation r3 is 0xFF00: the first add clears the condition
        //bits and jumps, the second falls through
        reg.r[3] = 0xFF00u64.wrapping_neg();
        reg.r[4] = 1;
        let mut mode = RoundingMode::Nearest;
        code.execute(&mut reg, &mut [0u8; 64], [0, 0], &mut mode);
        assert_eq!(reg.r[3], 0x10100);
        assert_eq!(reg.r[4], 4);
    }

    #[test]
    fn test_cbranch_without_prior_write_targets_start() {
        let prog = [
            instr(Opcode::FscalR, 0, 0, 0, 0),
            instr(Opcode::Cbranch, 6, 0, 0xF0, 0),
        ];
        match Bytecode::compile(&prog).ops[1] {
            Op::Cbranch { target, mask, imm, .. } => {
                assert_eq!(target, 0);
                assert_eq!(mask, 0xFF << 23);
                assert_eq!(imm, 1 << 23);
            }
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_istore_masks() {
        let mut pad = vec![0u8; 1 << 21];
        let mut reg = RegisterFile::default();
        reg.r[0] = 0x1F_FFF8;
        reg.r[1] = 0xAB;
        let prog = [
            instr(Opcode::Istore, 0, 1, 0x01, 0),
            instr(Opcode::Istore, 0, 1, 0xE0, 0),
        ];
        run(&prog, &mut reg, &mut pad);
        assert_eq!(pad[0x3FF8], 0xAB);
        assert_eq!(pad[0x1F_FFF8], 0xAB);
    }

    #[test]
    fn test_float_ops() {
        let mut pad = vec![0u8; 64];
        pad[0..4].copy_from_slice(&(-2i32).to_le_bytes());
        pad[4..8].copy_from_slice(&5i32.to_le_bytes());
        let mut reg = RegisterFile::default();
        reg.a[1] = [1.5, 2.5];
        reg.f[2] = [1.0, 2.0];
        reg.e[0] = [16.0, 9.0];
        let prog = [
            instr(Opcode::FaddR, 2, 5, 0, 0),
            instr(Opcode::FaddM, 2, 0, 0, 0),
            instr(Opcode::FsqrtR, 4, 0, 0, 0),
            instr(Opcode::FswapR, 4, 0, 0, 0),
            instr(Opcode::FscalR, 3, 0, 0, 0),
        ];
        run(&prog, &mut reg, &mut pad);
        assert_eq!(reg.f[2], [0.5, 9.5]);
        assert_eq!(reg.e[0], [3.0, 4.0]);
        assert_eq!(reg.f[3][0].to_bits(), SCALE_MASK);
    }

    #[test]
    fn test_cfround_sets_mode() {
        let mut reg = RegisterFile::default();
        reg.r[2] = 0b11 << 5;
        let mode = run(&[instr(Opcode::Cfround, 0, 2, 0, 5 + 64)], &mut reg, &mut [0u8; 64]);
        assert_eq!(mode, RoundingMode::Zero);
    }
}
