/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::aco_ir::*;
use crate::aco_isel_rules::{select_alu_rule, Unit};
use crate::nir::{
    AluOp, AluSrc, Def, IntrinsicIndices, IntrinsicOp, JumpKind, Shader, ShaderBuilder,
    ShaderStage,
};
use crate::{compile, CompilerOptions, ShaderConfig};

use rustc_hash::FxHashMap;

fn compile_one(shader: &Shader, chip: ChipClass) -> Program {
    let options = CompilerOptions::new(chip, 64).unwrap();
    compile(&[shader], &options, &ShaderConfig::default()).unwrap()
}

fn count(p: &Program, op: Opcode) -> usize {
    p.instrs().filter(|i| i.opcode == op).count()
}

fn find(p: &Program, op: Opcode) -> &Instr {
    p.instrs()
        .find(|i| i.opcode == op)
        .unwrap_or_else(|| panic!("No {:?} in\n{}", op, p))
}

fn blocks_of(p: &Program, kind: BlockKind) -> Vec<u32> {
    p.blocks
        .iter()
        .filter(|b| b.kind.contains(kind))
        .map(|b| b.index)
        .collect()
}

fn lane_id(b: &mut ShaderBuilder) -> Def {
    b.intrinsic(
        IntrinsicOp::LoadSubgroupInvocation,
        Some((32, 1, true)),
        &[],
        IntrinsicIndices::default(),
    )
    .unwrap()
}

fn workgroup_id(b: &mut ShaderBuilder) -> Def {
    b.intrinsic(
        IntrinsicOp::LoadWorkgroupId,
        Some((32, 3, false)),
        &[],
        IntrinsicIndices::default(),
    )
    .unwrap()
}

const LANES: usize = 4;

/// Per-lane values of the first few lanes of a wave
type Lanes = [u64; LANES];

/// Evaluates the lane masks of an acyclic program
///
/// Exec is never written explicitly by selection, so the mask of a block
/// is derived from the logical CFG: a divergent branch hands `exec & cond`
/// to its first logical successor and `exec & !cond` to the second, and
/// every other block receives the union of what its logical predecessors
/// hand on.  Values are only evaluated on demand, so the instructions the
/// evaluator does not understand stay harmless unless a mask depends on
/// them.
struct LaneSim<'a> {
    program: &'a Program,
    defs: FxHashMap<u32, (u32, usize)>,
    exec: Vec<u64>,
}

impl<'a> LaneSim<'a> {
    fn run(program: &'a Program, entry: u64) -> LaneSim<'a> {
        let mut defs = FxHashMap::default();
        for block in &program.blocks {
            for (i, instr) in block.instrs.iter().enumerate() {
                for def in &instr.definitions {
                    defs.insert(def.temp().id(), (block.index, i));
                }
            }
        }

        let mut sim = LaneSim {
            program: program,
            defs: defs,
            exec: Vec::new(),
        };
        for block in &program.blocks {
            let mask = if block.index == 0 {
                entry
            } else {
                block.logical_preds.iter().fold(0, |mask, pred| {
                    assert!(*pred < block.index, "BB{} is part of a loop", block.index);
                    mask | sim.edge_mask(*pred, block.index)
                })
            };
            sim.exec.push(mask);
        }
        sim
    }

    fn exec(&self, block: u32) -> u64 {
        self.exec[block as usize]
    }

    /// Lanes which flow from `pred` to `succ`
    fn edge_mask(&self, pred: u32, succ: u32) -> u64 {
        let p = self.program.block(pred);
        let exec = self.exec(pred);
        match p.branch() {
            Some(br) if br.opcode == Opcode::PCbranchZ => {
                let cond = self.operand(&br.operands[0], pred)[0];
                if p.logical_succs[0] == succ {
                    exec & cond
                } else {
                    exec & !cond
                }
            }
            _ => exec,
        }
    }

    fn operand(&self, op: &Operand, block: u32) -> Lanes {
        match op {
            Operand::Const(v, _) => [*v; LANES],
            Operand::Temp(t) | Operand::Fixed(t, _) => self.value(*t),
            Operand::Reg(r, _) if *r == PhysReg::EXEC => [self.exec(block); LANES],
            _ => panic!("Cannot evaluate {}", op),
        }
    }

    fn value(&self, t: Temp) -> Lanes {
        let (block, idx) = self.defs[&t.id()];
        let instr = &self.program.block(block).instrs[idx];
        let exec = self.exec(block);
        let def = instr
            .definitions
            .iter()
            .position(|d| d.temp() == t)
            .unwrap();
        let src = |i: usize| self.operand(&instr.operands[i], block);
        let per_lane = |a: Lanes, b: Lanes, f: fn(u64, u64) -> u64| -> Lanes {
            std::array::from_fn(|l| f(a[l], b[l]))
        };
        let compare = |f: fn(u32, u32) -> bool| -> Lanes {
            let (a, b) = (src(0), src(1));
            let mask = (0..LANES)
                .filter(|l| exec >> l & 1 != 0 && f(a[*l] as u32, b[*l] as u32))
                .fold(0, |m, l| m | 1 << l);
            [mask; LANES]
        };

        match instr.opcode {
            Opcode::PParallelcopy => src(def),
            Opcode::SMovB32 | Opcode::SMovB64 | Opcode::VMovB32 => src(0),
            Opcode::VMbcntLoU32B32 => {
                let (mask, add) = (src(0), src(1));
                std::array::from_fn(|l| {
                    let below = (mask[l] as u32) & ((1 << l) - 1);
                    u64::from(below.count_ones()) + add[l]
                })
            }
            /* Only lanes below 32 are simulated */
            Opcode::VMbcntHiU32B32 => src(1),
            Opcode::VCmpLtU32 => compare(|a, b| a < b),
            Opcode::VCmpGeU32 => compare(|a, b| a >= b),
            Opcode::VCmpEqI32 => compare(|a, b| a == b),
            Opcode::VCmpLgI32 => compare(|a, b| a != b),
            Opcode::SAndB32 | Opcode::SAndB64 => per_lane(src(0), src(1), |a, b| a & b),
            Opcode::SAndn2B32 | Opcode::SAndn2B64 => per_lane(src(0), src(1), |a, b| a & !b),
            Opcode::SOrB32 | Opcode::SOrB64 => per_lane(src(0), src(1), |a, b| a | b),
            Opcode::PPhi => {
                let preds = &self.program.block(block).logical_preds;
                std::array::from_fn(|l| {
                    preds
                        .iter()
                        .position(|p| self.edge_mask(*p, block) >> l & 1 != 0)
                        .map_or(0, |k| self.operand(&instr.operands[k], preds[k])[l])
                })
            }
            op => panic!("{:?} is not simulated", op),
        }
    }
}

/// `if (lane < k) { 1 } else { 2 }` followed by a phi of both sides
fn split_at_lane(k: u32) -> Shader {
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let id = lane_id(&mut b);
    let k = b.imm32(k);
    let c = b.alu2(AluOp::Ult, id, k);
    b.push_if(c);
    let then_block = b.block_index();
    let one = b.imm32(1);
    b.push_else();
    let else_block = b.block_index();
    let two = b.imm32(2);
    b.pop_if();
    let phi = b.new_def(32, 1, true);
    b.phi_to(phi, &[(then_block, one), (else_block, two)]);
    b.finish()
}

#[test]
fn divergent_if_partitions_exec() {
    for k in 0..=LANES as u32 {
        let p = compile_one(&split_at_lane(k), ChipClass::GFX10);
        let branch = blocks_of(&p, BlockKind::BRANCH)[0];
        let merge = blocks_of(&p, BlockKind::MERGE)[0];
        let succs = &p.block(branch).logical_succs;
        let (then_block, else_block) = (succs[0], succs[1]);
        let below = (1_u64 << k) - 1;

        for entry in [0b1111, 0b1011, 0b0110, 0b0001, 0] {
            let sim = LaneSim::run(&p, entry);
            let (then_exec, else_exec) = (sim.exec(then_block), sim.exec(else_block));
            assert_eq!(then_exec, entry & below, "k = {}, entry = {:#b}", k, entry);
            assert_eq!(then_exec | else_exec, entry);
            assert_eq!(then_exec & else_exec, 0);
            assert_eq!(sim.exec(merge), entry);

            let phi = p.block(merge).phis().next().unwrap();
            let values = sim.value(phi.definitions[0].temp());
            for l in (0..LANES).filter(|l| entry >> l & 1 != 0) {
                let expected = if (l as u32) < k { 1 } else { 2 };
                assert_eq!(values[l], expected, "lane {} with k = {}", l, k);
            }
        }
    }
}

#[test]
fn discarded_lanes_do_not_reach_the_merge() {
    let mut b = ShaderBuilder::new(ShaderStage::Fragment);
    let id = lane_id(&mut b);
    let two = b.imm32(2);
    let c = b.alu2(AluOp::Ult, id, two);
    b.push_if(c);
    b.intrinsic(IntrinsicOp::Discard, None, &[], IntrinsicIndices::default());
    b.push_else();
    b.pop_if();
    let p = compile_one(&b.finish(), ChipClass::GFX10);

    let discard = blocks_of(&p, BlockKind::DISCARD);
    assert_eq!(discard.len(), 1);
    let merge = p.block(blocks_of(&p, BlockKind::MERGE)[0]);
    assert_eq!(merge.logical_preds.len(), 1);
    assert!(!merge.logical_preds.contains(&discard[0]));
    assert_eq!(merge.linear_preds.len(), 2);

    let sim = LaneSim::run(&p, 0b1111);
    assert_eq!(sim.exec(discard[0]), 0b0011);
    assert_eq!(sim.exec(merge.index), 0b1100);
}

/// Whether `to` is reachable from `from` along linear edges without
/// passing through `avoid`
fn linear_path_avoiding(p: &Program, from: u32, to: u32, avoid: u32) -> bool {
    let mut seen = vec![false; p.blocks.len()];
    let mut stack = vec![from];
    while let Some(b) = stack.pop() {
        if b == to {
            return true;
        }
        if b == avoid || std::mem::replace(&mut seen[b as usize], true) {
            continue;
        }
        stack.extend(p.block(b).linear_succs.iter().copied());
    }
    false
}

#[test]
fn loop_with_divergent_discard_can_leave_with_empty_exec() {
    let mut b = ShaderBuilder::new(ShaderStage::Fragment);
    let id = lane_id(&mut b);
    let x = b.imm32(1);
    b.push_loop();
    let two = b.imm32(2);
    let c = b.alu2(AluOp::Ult, id, two);
    b.push_if(c);
    b.intrinsic(IntrinsicOp::Discard, None, &[], IntrinsicIndices::default());
    b.pop_if();
    let u = b.alu2(AluOp::Ieq, x, x);
    b.push_if(u);
    b.jump(JumpKind::Break);
    b.pop_if();
    b.pop_loop();
    let p = compile_one(&b.finish(), ChipClass::GFX10);

    let header = blocks_of(&p, BlockKind::LOOP_HEADER)[0];
    let exit = blocks_of(&p, BlockKind::LOOP_EXIT)[0];
    let cob = blocks_of(&p, BlockKind::CONTINUE_OR_BREAK);
    assert_eq!(cob.len(), 1);

    /* Once every lane is gone the loop is left through a helper */
    let succs = &p.block(cob[0]).linear_succs;
    assert_eq!(succs.len(), 2);
    let brk = p.block(succs[0]);
    assert_eq!(brk.linear_succs, vec![exit]);
    assert!(brk.logical_preds.is_empty());
    assert_eq!(p.block(succs[1]).linear_succs, vec![header]);
    assert!(linear_path_avoiding(&p, cob[0], exit, header));

    /* The uniform break still leaves directly */
    let brk = blocks_of(&p, BlockKind::BREAK);
    assert_eq!(brk.len(), 1);
    assert_eq!(p.block(exit).logical_preds, brk);
}

#[test]
fn uniform_add_stays_scalar() {
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let wg = workgroup_id(&mut b);
    b.alu(
        AluOp::Iadd,
        32,
        1,
        &[AluSrc::comp(wg, 0), AluSrc::comp(wg, 1)],
    );
    let p = compile_one(&b.finish(), ChipClass::GFX10);

    assert_eq!(count(&p, Opcode::SAddU32), 1);
    let add = find(&p, Opcode::SAddU32);
    assert_eq!(add.definitions[0].temp().reg_class(), RegClass::S1);
    assert_eq!(add.definitions[1].phys_reg(), Some(PhysReg::SCC));
    assert!(add.operands.iter().all(|o| o.reg_type() == RegType::SGPR));

    /* Nothing moves the ids or the sum into VGPRs */
    assert_eq!(count(&p, Opcode::VAddU32), 0);
    assert_eq!(count(&p, Opcode::VMovB32), 0);
    let sum = add.definitions[0].temp();
    assert!(!p
        .instrs()
        .any(|i| i.operands.iter().any(|o| o.temp() == Some(sum))));
}

#[test]
fn uniform_64bit_carry_chains_through_scc() {
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let wg = workgroup_id(&mut b);
    let x = b.alu(AluOp::U2u64, 64, 1, &[AluSrc::comp(wg, 0)]);
    let y = b.imm(64, 0xffff_ffff_0000_0001);
    b.alu2(AluOp::UaddCarry, x, y);
    let p = compile_one(&b.finish(), ChipClass::GFX9);

    assert_eq!(count(&p, Opcode::SAddU32), 1);
    assert_eq!(count(&p, Opcode::SAddcU32), 1);
    let lo = find(&p, Opcode::SAddU32);
    let hi = find(&p, Opcode::SAddcU32);
    let carry_in = lo.definitions[1].temp();
    assert_eq!(hi.operands[2], Operand::Fixed(carry_in, PhysReg::SCC));

    let carry_out = hi.definitions[1].temp();
    let select = find(&p, Opcode::SCselectB32);
    assert_eq!(select.operands[2], Operand::Fixed(carry_out, PhysReg::SCC));

    assert!(p.instrs().all(|i| i.opcode.format() != Format::VOPC));
}

#[test]
fn packed_half_add_is_one_instruction() {
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let id = lane_id(&mut b);
    let h = b.alu(AluOp::U2u16, 16, 1, &[id.into()]);
    let v = b.alu(AluOp::Vec2, 16, 2, &[h.into(), h.into()]);
    b.alu2(AluOp::Fadd, v, v);
    let p = compile_one(&b.finish(), ChipClass::GFX9);

    assert_eq!(count(&p, Opcode::VPkAddF16), 1);
    assert_eq!(count(&p, Opcode::VAddF16), 0);
}

#[test]
fn three_byte_shared_load_reads_one_dword() {
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    b.info_mut().shared_size = 64;
    let addr = b.imm32(8);
    let idx = IntrinsicIndices {
        align_mul: 4,
        align_offset: 0,
        ..Default::default()
    };
    b.intrinsic(IntrinsicOp::LoadShared, Some((8, 3, true)), &[addr], idx);
    let p = compile_one(&b.finish(), ChipClass::GFX9);

    assert_eq!(count(&p, Opcode::DsReadB32), 1);
    assert_eq!(count(&p, Opcode::DsReadU8), 0);
    /* The fourth byte is trimmed off */
    assert!(p.instrs().any(|i| i.opcode == Opcode::PCreateVector
        && i.definitions[0].temp().reg_class() == RegClass::V3B));
}

/// The instruction defining `t`
fn def_of(p: &Program, t: Temp) -> &Instr {
    p.instrs()
        .find(|i| i.definitions.iter().any(|d| d.temp() == t))
        .unwrap_or_else(|| panic!("{} is not defined in\n{}", t, p))
}

#[test]
fn narrow_shift_by_constant_wraps_at_the_width() {
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let wg = workgroup_id(&mut b);
    let h = b.alu(AluOp::U2u16, 16, 1, &[AluSrc::comp(wg, 0)]);
    let amount = b.imm32(17);
    b.alu(AluOp::Ishl, 16, 1, &[h.into(), amount.into()]);
    let p = compile_one(&b.finish(), ChipClass::GFX9);

    let shl = find(&p, Opcode::SLshlB32);
    assert_eq!(shl.operands[1], Operand::c32(1), "in\n{}", p);
}

#[test]
fn narrow_shift_by_variable_is_masked() {
    /* Uniform */
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let wg = workgroup_id(&mut b);
    let h = b.alu(AluOp::U2u16, 16, 1, &[AluSrc::comp(wg, 0)]);
    b.alu(AluOp::Ushr, 16, 1, &[h.into(), AluSrc::comp(wg, 1)]);
    let p = compile_one(&b.finish(), ChipClass::GFX9);

    let shr = find(&p, Opcode::SLshrB32);
    let amount = shr.operands[1].temp().unwrap();
    let mask = def_of(&p, amount);
    assert_eq!(mask.opcode, Opcode::SAndB32);
    assert!(mask.operands.contains(&Operand::c32(15)));

    /* Divergent, without 16-bit VALU shifts */
    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let id = lane_id(&mut b);
    let h = b.alu(AluOp::U2u16, 16, 1, &[id.into()]);
    b.alu(AluOp::Ishr, 16, 1, &[h.into(), id.into()]);
    let p = compile_one(&b.finish(), ChipClass::GFX7);

    let shr = find(&p, Opcode::VAshrrevI32);
    let amount = shr.operands[0].temp().unwrap();
    let mask = def_of(&p, amount);
    assert_eq!(mask.opcode, Opcode::VAndB32);
    assert!(mask.operands.contains(&Operand::c32(15)));
}

const CHIPS: [ChipClass; 6] = [
    ChipClass::GFX6,
    ChipClass::GFX7,
    ChipClass::GFX8,
    ChipClass::GFX9,
    ChipClass::GFX10,
    ChipClass::GFX10_3,
];

/// Ops whose sources all have the width the op is keyed on
const MATRIX_OPS: [AluOp; 37] = [
    AluOp::Iadd,
    AluOp::Isub,
    AluOp::Imul,
    AluOp::Ineg,
    AluOp::Iabs,
    AluOp::Imin,
    AluOp::Imax,
    AluOp::Umin,
    AluOp::Umax,
    AluOp::Iand,
    AluOp::Ior,
    AluOp::Ixor,
    AluOp::Inot,
    AluOp::Fadd,
    AluOp::Fsub,
    AluOp::Fmul,
    AluOp::Ffma,
    AluOp::Fmin,
    AluOp::Fmax,
    AluOp::Fneg,
    AluOp::Fabs,
    AluOp::Fsat,
    AluOp::Frcp,
    AluOp::Fsqrt,
    AluOp::Ffloor,
    AluOp::Fceil,
    AluOp::Ftrunc,
    AluOp::Ffract,
    AluOp::Flt,
    AluOp::Fge,
    AluOp::Feq,
    AluOp::Fneu,
    AluOp::Ilt,
    AluOp::Ige,
    AluOp::Ieq,
    AluOp::Ine,
    AluOp::Ult,
];

const SHIFT_OPS: [AluOp; 3] = [AluOp::Ishl, AluOp::Ishr, AluOp::Ushr];

/// `op` on a value of `bits` bits derived from a uniform or a divergent
/// source, or `None` if no unit implements it
fn alu_matrix_shader(
    op: AluOp,
    bits: u8,
    divergent: bool,
    options: &CompilerOptions,
) -> Option<Shader> {
    let valu = select_alu_rule(op, bits, Unit::Valu, false, options);
    let salu = select_alu_rule(op, bits, Unit::Salu, false, options);
    if valu.is_none() && (divergent || salu.is_none()) {
        return None;
    }

    let mut b = ShaderBuilder::new(ShaderStage::Compute);
    let base = if divergent {
        lane_id(&mut b)
    } else {
        let wg = workgroup_id(&mut b);
        b.alu(AluOp::Mov, 32, 1, &[AluSrc::comp(wg, 0)])
    };
    let x = match bits {
        16 => b.alu(AluOp::U2u16, 16, 1, &[base.into()]),
        32 => base,
        _ => b.alu(AluOp::U2u64, 64, 1, &[base.into()]),
    };

    let srcs: Vec<AluSrc> = if SHIFT_OPS.contains(&op) {
        vec![x.into(), base.into()]
    } else {
        vec![x.into(); op.num_inputs()]
    };
    let def_bits = if op.is_comparison() { 1 } else { bits };
    b.alu(op, def_bits, 1, &srcs);
    Some(b.finish())
}

#[test]
fn alu_register_classes_validate_on_every_chip() {
    let mut compiled = 0;
    for chip in CHIPS {
        let mut options = CompilerOptions::new(chip, 64).unwrap();
        options.debug.validate_ir = true;
        for op in MATRIX_OPS.iter().chain(SHIFT_OPS.iter()) {
            for bits in [16, 32, 64] {
                for divergent in [false, true] {
                    let Some(shader) = alu_matrix_shader(*op, bits, divergent, &options) else {
                        continue;
                    };
                    if let Err(err) = compile(&[&shader], &options, &ShaderConfig::default()) {
                        panic!(
                            "{}-bit {} ({}) on {:?}: {}",
                            bits,
                            op,
                            if divergent { "divergent" } else { "uniform" },
                            chip,
                            err
                        );
                    }
                    compiled += 1;
                }
            }
        }
    }
    assert!(compiled > 0);
}

#[test]
fn wide_narrow_shift_amounts_validate_on_every_chip() {
    for chip in CHIPS {
        for op in SHIFT_OPS {
            for divergent in [false, true] {
                let mut b = ShaderBuilder::new(ShaderStage::Compute);
                let base = if divergent {
                    lane_id(&mut b)
                } else {
                    let wg = workgroup_id(&mut b);
                    b.alu(AluOp::Mov, 32, 1, &[AluSrc::comp(wg, 0)])
                };
                let h = b.alu(AluOp::U2u16, 16, 1, &[base.into()]);
                for amount in [15, 16, 17, 31] {
                    let amount = b.imm32(amount);
                    b.alu(op, 16, 1, &[h.into(), amount.into()]);
                }
                let p = compile_one(&b.finish(), chip);

                /* Widened shifts never see an amount of 16 or more */
                let wide = [
                    Opcode::SLshlB32,
                    Opcode::SLshrB32,
                    Opcode::SAshrI32,
                    Opcode::VLshlrevB32,
                    Opcode::VLshrrevB32,
                    Opcode::VAshrrevI32,
                ];
                for i in p.instrs().filter(|i| wide.contains(&i.opcode)) {
                    let amount = if i.opcode.format() == Format::SOP2 {
                        &i.operands[1]
                    } else {
                        &i.operands[0]
                    };
                    if let Operand::Const(v, _) = amount {
                        assert!(*v < 16, "{} on {:?}:\n{}", i, chip, p);
                    }
                }
            }
        }
    }
}
