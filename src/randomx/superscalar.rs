use strum::Display;

use super::blake2_generator::Blake2Generator;
use super::common::{
    is_zero_or_power_of_2, mulh, reciprocal, sign_extend_2s_compl, smulh,
    REGISTER_NEEDS_DISPLACEMENT, SUPERSCALAR_LATENCY, SUPERSCALAR_MAX_SIZE,
};

const CYCLE_MAP_SIZE: usize = SUPERSCALAR_LATENCY + 4;
const LOOK_FORWARD_CYCLES: usize = 4;
const MAX_THROWAWAY_COUNT: usize = 256;

const P0: u8 = 1;
const P1: u8 = 2;
const P5: u8 = 4;
const P01: u8 = P0 | P1;
const P05: u8 = P0 | P5;
const P015: u8 = P0 | P1 | P5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScOpcode {
    #[strum(serialize = "ISUB_R")]
    IsubR = 0,
    #[strum(serialize = "IXOR_R")]
    IxorR = 1,
    #[strum(serialize = "IADD_RS")]
    IaddRs = 2,
    #[strum(serialize = "IMUL_R")]
    ImulR = 3,
    #[strum(serialize = "IROR_C")]
    IrorC = 4,
    #[strum(serialize = "IADD_C7")]
    IaddC7 = 5,
    #[strum(serialize = "IXOR_C7")]
    IxorC7 = 6,
    #[strum(serialize = "IADD_C8")]
    IaddC8 = 7,
    #[strum(serialize = "IXOR_C8")]
    IxorC8 = 8,
    #[strum(serialize = "IADD_C9")]
    IaddC9 = 9,
    #[strum(serialize = "IXOR_C9")]
    IxorC9 = 10,
    #[strum(serialize = "IMULH_R")]
    ImulhR = 11,
    #[strum(serialize = "ISMULH_R")]
    IsmulhR = 12,
    #[strum(serialize = "IMUL_RCP")]
    ImulRcp = 13,
}

impl ScOpcode {
    fn is_multiplication(self) -> bool {
        match self {
            ScOpcode::ImulR | ScOpcode::ImulhR | ScOpcode::IsmulhR | ScOpcode::ImulRcp => true,
            _ => false,
        }
    }
}

/// x86 macro-op as modelled by the scheduler: encoded size, latency and
/// the execution ports of its one or two uOPs. An empty port set means the
/// op is eliminated at rename.
#[derive(Clone, Copy)]
struct MacroOp {
    size: usize,
    latency: usize,
    uop1: u8,
    uop2: u8,
    dependent: bool,
}

impl MacroOp {
    const fn new(size: usize, latency: usize, uop1: u8, uop2: u8) -> MacroOp {
        MacroOp {
            size,
            latency,
            uop1,
            uop2,
            dependent: false,
        }
    }

    const fn dependent(self) -> MacroOp {
        MacroOp {
            size: self.size,
            latency: self.latency,
            uop1: self.uop1,
            uop2: self.uop2,
            dependent: true,
        }
    }

    fn is_simple(&self) -> bool {
        self.uop2 == 0
    }

    fn is_eliminated(&self) -> bool {
        self.uop1 == 0
    }
}

const SUB_RR: MacroOp = MacroOp::new(3, 1, P015, 0);
const XOR_RR: MacroOp = MacroOp::new(3, 1, P015, 0);
const IMUL_R: MacroOp = MacroOp::new(3, 4, P1, P5);
const MUL_R: MacroOp = MacroOp::new(3, 4, P1, P5);
const MOV_RR: MacroOp = MacroOp::new(3, 0, 0, 0);
const LEA_SIB: MacroOp = MacroOp::new(4, 1, P01, 0);
const IMUL_RR: MacroOp = MacroOp::new(4, 3, P1, 0);
const ROR_RI: MacroOp = MacroOp::new(4, 1, P05, 0);
const ADD_RI: MacroOp = MacroOp::new(7, 1, P015, 0);
const XOR_RI: MacroOp = MacroOp::new(7, 1, P015, 0);
const MOV_RI64: MacroOp = MacroOp::new(10, 1, P015, 0);

const IMULH_R_OPS: [MacroOp; 3] = [MOV_RR, MUL_R, MOV_RR];
const ISMULH_R_OPS: [MacroOp; 3] = [MOV_RR, IMUL_R, MOV_RR];
const IMUL_RCP_OPS: [MacroOp; 2] = [MOV_RI64, IMUL_RR.dependent()];

/// Static description of one superscalar instruction kind. `src_op`,
/// `dst_op` and `result_op` index into `ops`; a negative `src_op` means the
/// instruction has no source register.
struct InstructionInfo {
    opcode: ScOpcode,
    ops: &'static [MacroOp],
    result_op: usize,
    dst_op: usize,
    src_op: isize,
}

impl InstructionInfo {
    fn size(&self) -> usize {
        self.ops.len()
    }
}

static INFO_ISUB_R: InstructionInfo = InstructionInfo { opcode: ScOpcode::IsubR, ops: &[SUB_RR], result_op: 0, dst_op: 0, src_op: 0 };
static INFO_IXOR_R: InstructionInfo = InstructionInfo { opcode: ScOpcode::IxorR, ops: &[XOR_RR], result_op: 0, dst_op: 0, src_op: 0 };
static INFO_IADD_RS: InstructionInfo = InstructionInfo { opcode: ScOpcode::IaddRs, ops: &[LEA_SIB], result_op: 0, dst_op: 0, src_op: 0 };
static INFO_IMUL_R: InstructionInfo = InstructionInfo { opcode: ScOpcode::ImulR, ops: &[IMUL_RR], result_op: 0, dst_op: 0, src_op: 0 };
static INFO_IROR_C: InstructionInfo = InstructionInfo { opcode: ScOpcode::IrorC, ops: &[ROR_RI], result_op: 0, dst_op: 0, src_op: -1 };
static INFO_IADD_C7: InstructionInfo = InstructionInfo { opcode: ScOpcode::IaddC7, ops: &[ADD_RI], result_op: 0, dst_op: 0, src_op: -1 };
static INFO_IXOR_C7: InstructionInfo = InstructionInfo { opcode: ScOpcode::IxorC7, ops: &[XOR_RI], result_op: 0, dst_op: 0, src_op: -1 };
static INFO_IADD_C8: InstructionInfo = InstructionInfo { opcode: ScOpcode::IaddC8, ops: &[ADD_RI], result_op: 0, dst_op: 0, src_op: -1 };
static INFO_IXOR_C8: InstructionInfo = InstructionInfo { opcode: ScOpcode::IxorC8, ops: &[XOR_RI], result_op: 0, dst_op: 0, src_op: -1 };
static INFO_IADD_C9: InstructionInfo = InstructionInfo { opcode: ScOpcode::IaddC9, ops: &[ADD_RI], result_op: 0, dst_op: 0, src_op: -1 };
static INFO_IXOR_C9: InstructionInfo = InstructionInfo { opcode: ScOpcode::IxorC9, ops: &[XOR_RI], result_op: 0, dst_op: 0, src_op: -1 };
static INFO_IMULH_R: InstructionInfo = InstructionInfo { opcode: ScOpcode::ImulhR, ops: &IMULH_R_OPS, result_op: 1, dst_op: 0, src_op: 1 };
static INFO_ISMULH_R: InstructionInfo = InstructionInfo { opcode: ScOpcode::IsmulhR, ops: &ISMULH_R_OPS, result_op: 1, dst_op: 0, src_op: 1 };
static INFO_IMUL_RCP: InstructionInfo = InstructionInfo { opcode: ScOpcode::ImulRcp, ops: &IMUL_RCP_OPS, result_op: 1, dst_op: 1, src_op: -1 };

static SLOT_3: [&InstructionInfo; 2] = [&INFO_ISUB_R, &INFO_IXOR_R];
static SLOT_3L: [&InstructionInfo; 4] = [&INFO_ISUB_R, &INFO_IXOR_R, &INFO_IMULH_R, &INFO_ISMULH_R];
static SLOT_4: [&InstructionInfo; 2] = [&INFO_IROR_C, &INFO_IADD_RS];
static SLOT_7: [&InstructionInfo; 2] = [&INFO_IXOR_C7, &INFO_IADD_C7];
static SLOT_8: [&InstructionInfo; 2] = [&INFO_IXOR_C8, &INFO_IADD_C8];
static SLOT_9: [&InstructionInfo; 2] = [&INFO_IXOR_C9, &INFO_IADD_C9];

/// One 16-byte decode window split into instruction slots.
struct DecoderBuffer {
    index: usize,
    counts: &'static [usize],
}

static BUFFER_484: DecoderBuffer = DecoderBuffer { index: 0, counts: &[4, 8, 4] };
static BUFFER_7333: DecoderBuffer = DecoderBuffer { index: 1, counts: &[7, 3, 3, 3] };
static BUFFER_3733: DecoderBuffer = DecoderBuffer { index: 2, counts: &[3, 7, 3, 3] };
static BUFFER_493: DecoderBuffer = DecoderBuffer { index: 3, counts: &[4, 9, 3] };
static BUFFER_4444: DecoderBuffer = DecoderBuffer { index: 4, counts: &[4, 4, 4, 4] };
static BUFFER_3310: DecoderBuffer = DecoderBuffer { index: 5, counts: &[3, 3, 10] };

static RANDOM_BUFFERS: [&DecoderBuffer; 4] = [&BUFFER_484, &BUFFER_7333, &BUFFER_3733, &BUFFER_493];

impl DecoderBuffer {
    fn size(&self) -> usize {
        self.counts.len()
    }

    fn fetch_next(
        prev: Option<ScOpcode>,
        cycle: usize,
        mul_count: usize,
        gen: &mut Blake2Generator,
    ) -> &'static DecoderBuffer {
        //a full 128-bit multiplication decodes to two uOPs, only 3-3-10 fits the 4 uOP decode limit
        if prev == Some(ScOpcode::ImulhR) || prev == Some(ScOpcode::IsmulhR) {
            return &BUFFER_3310;
        }
        //keep the multiplication port saturated
        if mul_count < cycle + 1 {
            return &BUFFER_4444;
        }
        //the buffer after IMUL_RCP must begin with a 4-byte multiplication slot
        if prev == Some(ScOpcode::ImulRcp) {
            return if gen.get_byte() & 1 != 0 {
                &BUFFER_484
            } else {
                &BUFFER_493
            };
        }
        RANDOM_BUFFERS[(gen.get_byte() & 3) as usize]
    }
}

#[derive(Clone, Copy)]
struct RegisterInfo {
    latency: usize,
    last_op_group: Option<ScOpcode>,
    last_op_par: i32,
}

impl Default for RegisterInfo {
    fn default() -> RegisterInfo {
        RegisterInfo {
            latency: 0,
            last_op_group: None,
            last_op_par: -1,
        }
    }
}

/// Instruction being assembled by the generator.
struct Candidate {
    info: &'static InstructionInfo,
    src: Option<usize>,
    dst: Option<usize>,
    modifier: u8,
    imm32: u32,
    op_group: ScOpcode,
    op_group_par: i32,
    can_reuse: bool,
    group_par_is_source: bool,
}

impl Candidate {
    fn create(info: &'static InstructionInfo, gen: &mut Blake2Generator) -> Candidate {
        let mut c = Candidate {
            info,
            src: None,
            dst: None,
            modifier: 0,
            imm32: 0,
            op_group: info.opcode,
            op_group_par: -1,
            can_reuse: false,
            group_par_is_source: false,
        };
        match info.opcode {
            ScOpcode::IsubR => {
                c.op_group = ScOpcode::IaddRs;
                c.group_par_is_source = true;
            }
            ScOpcode::IxorR => {
                c.op_group = ScOpcode::IxorR;
                c.group_par_is_source = true;
            }
            ScOpcode::IaddRs => {
                c.modifier = gen.get_byte();
                c.op_group = ScOpcode::IaddRs;
                c.group_par_is_source = true;
            }
            ScOpcode::ImulR => {
                c.op_group = ScOpcode::ImulR;
                c.group_par_is_source = true;
            }
            ScOpcode::IrorC => {
                loop {
                    c.imm32 = (gen.get_byte() & 63) as u32;
                    if c.imm32 != 0 {
                        break;
                    }
                }
                c.op_group = ScOpcode::IrorC;
                c.op_group_par = -1;
            }
            ScOpcode::IaddC7 | ScOpcode::IaddC8 | ScOpcode::IaddC9 => {
                c.imm32 = gen.get_u32();
                c.op_group = ScOpcode::IaddC7;
                c.op_group_par = -1;
            }
            ScOpcode::IxorC7 | ScOpcode::IxorC8 | ScOpcode::IxorC9 => {
                c.imm32 = gen.get_u32();
                c.op_group = ScOpcode::IxorC7;
                c.op_group_par = -1;
            }
            ScOpcode::ImulhR | ScOpcode::IsmulhR => {
                c.can_reuse = true;
                c.op_group = info.opcode;
                c.op_group_par = gen.get_u32() as i32;
            }
            ScOpcode::ImulRcp => {
                loop {
                    c.imm32 = gen.get_u32();
                    if !is_zero_or_power_of_2(c.imm32) {
                        break;
                    }
                }
                c.op_group = ScOpcode::ImulRcp;
                c.op_group_par = -1;
            }
        }
        c
    }

    fn create_for_slot(
        gen: &mut Blake2Generator,
        slot_size: usize,
        fetch_type: usize,
        is_last: bool,
    ) -> Candidate {
        let info = match slot_size {
            3 if is_last => SLOT_3L[(gen.get_byte() & 3) as usize],
            3 => SLOT_3[(gen.get_byte() & 1) as usize],
            4 if fetch_type == 4 && !is_last => &INFO_IMUL_R,
            4 => SLOT_4[(gen.get_byte() & 1) as usize],
            7 => SLOT_7[(gen.get_byte() & 1) as usize],
            8 => SLOT_8[(gen.get_byte() & 1) as usize],
            9 => SLOT_9[(gen.get_byte() & 1) as usize],
            _ => &INFO_IMUL_RCP,
        };
        Candidate::create(info, gen)
    }

    fn select_source(
        &mut self,
        cycle: usize,
        registers: &[RegisterInfo; 8],
        gen: &mut Blake2Generator,
    ) -> bool {
        let available: Vec<usize> = (0..8).filter(|&i| registers[i].latency <= cycle).collect();

        //r5 cannot be the IADD_RS destination, so take it as the source when only two are ready
        if available.len() == 2
            && self.info.opcode == ScOpcode::IaddRs
            && (available[0] == REGISTER_NEEDS_DISPLACEMENT
                || available[1] == REGISTER_NEEDS_DISPLACEMENT)
        {
            self.src = Some(REGISTER_NEEDS_DISPLACEMENT);
            self.op_group_par = REGISTER_NEEDS_DISPLACEMENT as i32;
            return true;
        }

        match select_register(&available, gen) {
            Some(reg) => {
                self.src = Some(reg);
                if self.group_par_is_source {
                    self.op_group_par = reg as i32;
                }
                true
            }
            None => false,
        }
    }

    fn select_destination(
        &mut self,
        cycle: usize,
        allow_chained_mul: bool,
        registers: &[RegisterInfo; 8],
        gen: &mut Blake2Generator,
    ) -> bool {
        let available: Vec<usize> = (0..8)
            .filter(|&i| {
                let reg = &registers[i];
                reg.latency <= cycle
                    && (self.can_reuse || Some(i) != self.src)
                    && (allow_chained_mul
                        || self.op_group != ScOpcode::ImulR
                        || reg.last_op_group != Some(ScOpcode::ImulR))
                    && (reg.last_op_group != Some(self.op_group)
                        || reg.last_op_par != self.op_group_par)
                    && (self.info.opcode != ScOpcode::IaddRs || i != REGISTER_NEEDS_DISPLACEMENT)
            })
            .collect();

        match select_register(&available, gen) {
            Some(reg) => {
                self.dst = Some(reg);
                true
            }
            None => false,
        }
    }

    fn to_instruction(&self) -> ScInstruction {
        let dst = self.dst.unwrap_or(0);
        let src = self.src.unwrap_or(dst);
        let imm = match self.info.opcode {
            ScOpcode::IrorC => self.imm32 as u64,
            ScOpcode::ImulRcp => reciprocal(self.imm32),
            ScOpcode::IaddRs => ((self.modifier >> 2) & 3) as u64,
            _ => sign_extend_2s_compl(self.imm32),
        };
        ScInstruction {
            opcode: self.info.opcode,
            dst,
            src,
            imm,
        }
    }
}

fn select_register(available: &[usize], gen: &mut Blake2Generator) -> Option<usize> {
    match available.len() {
        0 => None,
        1 => Some(available[0]),
        n => Some(available[(gen.get_u32() % n as u32) as usize]),
    }
}

fn schedule_uop(
    uop: u8,
    port_busy: &mut [[bool; 3]; CYCLE_MAP_SIZE],
    mut cycle: usize,
    commit: bool,
) -> Option<usize> {
    //P5 -> P0 -> P1 so that P1 stays free for multiplications
    while cycle < CYCLE_MAP_SIZE {
        if uop & P5 != 0 && !port_busy[cycle][2] {
            if commit {
                port_busy[cycle][2] = true;
            }
            return Some(cycle);
        }
        if uop & P0 != 0 && !port_busy[cycle][0] {
            if commit {
                port_busy[cycle][0] = true;
            }
            return Some(cycle);
        }
        if uop & P1 != 0 && !port_busy[cycle][1] {
            if commit {
                port_busy[cycle][1] = true;
            }
            return Some(cycle);
        }
        cycle += 1;
    }
    None
}

fn schedule_mop(
    mop: &MacroOp,
    port_busy: &mut [[bool; 3]; CYCLE_MAP_SIZE],
    mut cycle: usize,
    dep_cycle: usize,
    commit: bool,
) -> Option<usize> {
    if mop.dependent {
        cycle = cycle.max(dep_cycle);
    }
    if mop.is_eliminated() {
        return Some(cycle);
    }
    if mop.is_simple() {
        return schedule_uop(mop.uop1, port_busy, cycle, commit);
    }
    //both uOPs of a two-uOP macro-op must issue in the same cycle
    while cycle < CYCLE_MAP_SIZE {
        let cycle1 = schedule_uop(mop.uop1, port_busy, cycle, false);
        let cycle2 = schedule_uop(mop.uop2, port_busy, cycle, false);
        if let (Some(c1), Some(c2)) = (cycle1, cycle2) {
            if c1 == c2 {
                if commit {
                    schedule_uop(mop.uop1, port_busy, c1, true);
                    schedule_uop(mop.uop2, port_busy, c2, true);
                }
                return Some(c1);
            }
        }
        cycle += 1;
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScInstruction {
    pub opcode: ScOpcode,
    pub dst: usize,
    pub src: usize,
    /// Pre-decoded operand: rotation count, shift, sign-extended constant
    /// or reciprocal depending on the opcode.
    pub imm: u64,
}

/// Superscalar program used to mix cache lines into dataset items.
#[derive(Debug, Clone)]
pub struct ScProgram {
    pub instructions: Vec<ScInstruction>,
    pub address_reg: usize,
}

impl ScProgram {
    pub fn generate(gen: &mut Blake2Generator) -> ScProgram {
        let mut port_busy = [[false; 3]; CYCLE_MAP_SIZE];
        let mut registers = [RegisterInfo::default(); 8];
        let mut instructions = Vec::with_capacity(SUPERSCALAR_MAX_SIZE);

        let mut current: Option<Candidate> = None;
        let mut macro_op_index = 0;
        let mut cycle = 0;
        let mut dep_cycle = 0;
        let mut ports_saturated = false;
        let mut mul_count = 0;
        let mut throw_away_count = 0;

        let mut decode_cycle = 0;
        while decode_cycle < SUPERSCALAR_LATENCY
            && !ports_saturated
            && instructions.len() < SUPERSCALAR_MAX_SIZE
        {
            let prev = current.as_ref().map(|c| c.info.opcode);
            let buffer = DecoderBuffer::fetch_next(prev, decode_cycle, mul_count, gen);
            let mut buffer_index = 0;

            while buffer_index < buffer.size() {
                let top_cycle = cycle;

                let exhausted = current
                    .as_ref()
                    .map_or(true, |c| macro_op_index >= c.info.size());
                if exhausted {
                    if ports_saturated || instructions.len() >= SUPERSCALAR_MAX_SIZE {
                        break;
                    }
                    current = Some(Candidate::create_for_slot(
                        gen,
                        buffer.counts[buffer_index],
                        buffer.index,
                        buffer.size() == buffer_index + 1,
                    ));
                    macro_op_index = 0;
                }
                let instr = match current.as_mut() {
                    Some(instr) => instr,
                    None => break,
                };
                let mop = instr.info.ops[macro_op_index];

                let mut schedule_cycle =
                    match schedule_mop(&mop, &mut port_busy, cycle, dep_cycle, false) {
                        Some(c) => c,
                        None => {
                            ports_saturated = true;
                            break;
                        }
                    };

                if macro_op_index as isize == instr.info.src_op {
                    let mut forward = 0;
                    while forward < LOOK_FORWARD_CYCLES
                        && !instr.select_source(schedule_cycle, &registers, gen)
                    {
                        schedule_cycle += 1;
                        cycle += 1;
                        forward += 1;
                    }
                    if forward == LOOK_FORWARD_CYCLES {
                        if throw_away_count < MAX_THROWAWAY_COUNT {
                            throw_away_count += 1;
                            macro_op_index = instr.info.size();
                            continue;
                        }
                        current = None;
                        break;
                    }
                }

                if macro_op_index == instr.info.dst_op {
                    let mut forward = 0;
                    while forward < LOOK_FORWARD_CYCLES
                        && !instr.select_destination(
                            schedule_cycle,
                            throw_away_count > 0,
                            &registers,
                            gen,
                        )
                    {
                        schedule_cycle += 1;
                        cycle += 1;
                        forward += 1;
                    }
                    if forward == LOOK_FORWARD_CYCLES {
                        if throw_away_count < MAX_THROWAWAY_COUNT {
                            throw_away_count += 1;
                            macro_op_index = instr.info.size();
                            continue;
                        }
                        current = None;
                        break;
                    }
                }
                throw_away_count = 0;

                schedule_cycle =
                    match schedule_mop(&mop, &mut port_busy, schedule_cycle, schedule_cycle, true) {
                        Some(c) => c,
                        None => {
                            ports_saturated = true;
                            break;
                        }
                    };

                dep_cycle = schedule_cycle + mop.latency;

                if macro_op_index == instr.info.result_op {
                    if let Some(dst) = instr.dst {
                        let reg = &mut registers[dst];
                        reg.latency = dep_cycle;
                        reg.last_op_group = Some(instr.op_group);
                        reg.last_op_par = instr.op_group_par;
                    }
                }
                buffer_index += 1;
                macro_op_index += 1;

                if schedule_cycle >= SUPERSCALAR_LATENCY {
                    ports_saturated = true;
                }
                cycle = top_cycle;

                if macro_op_index >= instr.info.size() {
                    instructions.push(instr.to_instruction());
                    if instr.info.opcode.is_multiplication() {
                        mul_count += 1;
                    }
                }
            }
            cycle += 1;
            decode_cycle += 1;
        }

        ScProgram {
            address_reg: address_register(&instructions),
            instructions,
        }
    }

    pub fn execute(&self, r: &mut [u64; 8]) {
        for instr in &self.instructions {
            let (dst, src) = (instr.dst, instr.src);
            match instr.opcode {
                ScOpcode::IsubR => r[dst] = r[dst].wrapping_sub(r[src]),
                ScOpcode::IxorR => r[dst] ^= r[src],
                ScOpcode::IaddRs => r[dst] = r[dst].wrapping_add(r[src] << instr.imm),
                ScOpcode::ImulR => r[dst] = r[dst].wrapping_mul(r[src]),
                ScOpcode::IrorC => r[dst] = r[dst].rotate_right(instr.imm as u32),
                ScOpcode::IaddC7 | ScOpcode::IaddC8 | ScOpcode::IaddC9 => {
                    r[dst] = r[dst].wrapping_add(instr.imm)
                }
                ScOpcode::IxorC7 | ScOpcode::IxorC8 | ScOpcode::IxorC9 => r[dst] ^= instr.imm,
                ScOpcode::ImulhR => r[dst] = mulh(r[dst], r[src]),
                ScOpcode::IsmulhR => r[dst] = smulh(r[dst], r[src]),
                ScOpcode::ImulRcp => r[dst] = r[dst].wrapping_mul(instr.imm),
            }
        }
    }
}

/// Register with the longest dependency chain assuming unit latencies and
/// unlimited parallelism.
fn address_register(instructions: &[ScInstruction]) -> usize {
    let mut asic_latencies = [0usize; 8];
    for instr in instructions {
        let lat_dst = asic_latencies[instr.dst] + 1;
        let lat_src = if instr.dst != instr.src {
            asic_latencies[instr.src] + 1
        } else {
            0
        };
        asic_latencies[instr.dst] = lat_dst.max(lat_src);
    }

    let mut max = 0;
    let mut address_reg = 0;
    for (i, &latency) in asic_latencies.iter().enumerate() {
        if latency > max {
            max = latency;
            address_reg = i;
        }
    }
    address_reg
}
