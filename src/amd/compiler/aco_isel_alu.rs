/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::aco_builder::{Builder, WaveOp};
use crate::aco_ir::*;
use crate::aco_isel_ctx::{isel_err, IselContext};
use crate::aco_isel_rules::{is_signed, select_alu_rule, Strategy, Unit};
use crate::nir::{AluInstr, AluOp, AluSrc};
use crate::util::f32_pow2_bits;

/* 1 / (2 * pi) */
const INV_2PI_F32: u32 = 0x3e22f983;
const INV_2PI_F16: u16 = 0x3118;

fn is_shift(op: AluOp) -> bool {
    matches!(op, AluOp::Ishl | AluOp::Ishr | AluOp::Ushr)
}

fn is_vgpr(op: &Operand) -> bool {
    op.is_temp() && op.reg_type() == RegType::VGPR
}

fn perf_warn(ctx: &IselContext, alu: &AluInstr, msg: &str) {
    if ctx.options.debug.perf_warn {
        tracing::warn!(target: "aco::perfwarn", "{}: {}", msg, alu);
    }
}

/// Moves a scalar operand or a constant into a VGPR
fn to_vgpr(ctx: &mut IselContext, op: Operand) -> Operand {
    match op {
        Operand::Temp(t) if t.reg_type() == RegType::SGPR => ctx.as_vgpr(t).into(),
        Operand::Const(..) => {
            let rc = RegClass::get(RegType::VGPR, op.bytes().max(4));
            ctx.copy(rc, op).into()
        }
        _ => op,
    }
}

fn src_temp(alu: &AluInstr, op: Operand) -> Temp {
    match op.temp() {
        Some(t) => t,
        None => isel_err!(alu, "Expected a temporary, got {}", op),
    }
}

/// Constant value of an ALU source, after swizzling
fn src_const(ctx: &IselContext, src: &AluSrc) -> Option<u64> {
    let values = ctx.constants.get(&src.src.index)?;
    values.get(usize::from(src.swizzle[0])).copied()
}

/// Makes VOP3 and VOP3P operands encodable
///
/// Lane masks and scalar operands share the constant bus, which has one
/// slot before GFX10 and two after.  Literals are only encodable in VOP3
/// from GFX10 on.
fn legalize_vop3(ctx: &mut IselContext, ops: &mut [Operand]) {
    let gfx10 = ctx.program.chip_class >= ChipClass::GFX10;
    let limit = if gfx10 { 2 } else { 1 };
    let mut bus: Vec<Operand> = ops
        .iter()
        .filter(|o| o.reg_class().is_lane_mask())
        .copied()
        .collect();
    for op in ops.iter_mut() {
        let reads_bus = match *op {
            Operand::Temp(t) => t.reg_type() == RegType::SGPR && !t.reg_class().is_lane_mask(),
            Operand::Const(..) => op.is_literal(),
            _ => false,
        };
        if !reads_bus || bus.contains(&*op) {
            continue;
        }
        if bus.len() < limit && (gfx10 || !op.is_literal()) {
            bus.push(*op);
        } else {
            *op = to_vgpr(ctx, *op);
        }
    }
}

/// VOP2 can only read a VGPR in its second source
///
/// Commutative opcodes get their sources swapped, everything else gets
/// the second source copied into a VGPR.
fn vop2_operands(
    ctx: &mut IselContext,
    alu: &AluInstr,
    commutative: bool,
    a: Operand,
    b: Operand,
) -> (Operand, Operand) {
    if is_vgpr(&b) {
        return (a, b);
    }
    if commutative && is_vgpr(&a) && !ctx.options.debug.no_opt {
        return (b, a);
    }
    if is_vgpr(&a) {
        perf_warn(ctx, alu, "Broadcasting a uniform operand");
    }
    let b = to_vgpr(ctx, b);
    (a, b)
}

fn emit_vop2(
    ctx: &mut IselContext,
    alu: &AluInstr,
    op: Opcode,
    rc: RegClass,
    a: Operand,
    b: Operand,
    allow_swap: bool,
) -> Temp {
    let (a, b) = vop2_operands(ctx, alu, allow_swap && op.is_commutative(), a, b);
    ctx.vop2(op, rc, a, b)
}

fn is_symmetric_cmp(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::VCmpEqF16
            | Opcode::VCmpEqF32
            | Opcode::VCmpEqF64
            | Opcode::VCmpNeqF16
            | Opcode::VCmpNeqF32
            | Opcode::VCmpNeqF64
            | Opcode::VCmpEqI16
            | Opcode::VCmpEqI32
            | Opcode::VCmpEqI64
            | Opcode::VCmpLgI16
            | Opcode::VCmpLgI32
            | Opcode::VCmpLgI64
    )
}

fn emit_vopc(ctx: &mut IselContext, alu: &AluInstr, op: Opcode, a: Operand, b: Operand) -> Temp {
    let (a, b) = vop2_operands(ctx, alu, is_symmetric_cmp(op), a, b);
    ctx.vopc(op, a, b)
}

fn emit_vop3(ctx: &mut IselContext, op: Opcode, rc: RegClass, mut ops: Vec<Operand>) -> Temp {
    legalize_vop3(ctx, &mut ops);
    ctx.vop3(op, rc, ops)
}

/// VOP3 with modifiers
fn emit_vop3_mods(
    ctx: &mut IselContext,
    op: Opcode,
    rc: RegClass,
    mut ops: Vec<Operand>,
    mods: impl FnOnce(&mut Vop3Info),
) -> Temp {
    legalize_vop3(ctx, &mut ops);
    let dst = ctx.tmp(rc);
    let i = ctx.push_op(op, vec![dst.into()], ops);
    mods(i.vop3_mut());
    dst
}

/// VOP2 carry op in its VOP3 encoding, returns `(dst, carry)`
fn emit_carry_op(
    ctx: &mut IselContext,
    op: Opcode,
    a: Operand,
    b: Operand,
    carry_in: Option<Temp>,
) -> (Temp, Temp) {
    let mut ops = vec![a, b];
    if let Some(c) = carry_in {
        ops.push(c.into());
    }
    legalize_vop3(ctx, &mut ops);
    ctx.vop2_carry(op, ops[0], ops[1], carry_in)
}

/// The two dwords of a 64-bit operand
fn split64(ctx: &mut IselContext, op: Operand) -> (Operand, Operand) {
    match op {
        Operand::Const(v, _) => (Operand::c32(v as u32), Operand::c32((v >> 32) as u32)),
        Operand::Undef(rc) => {
            let half = RegClass::new(rc.reg_type(), 1);
            (Operand::undef(half), Operand::undef(half))
        }
        _ => {
            let t = op.temp().unwrap_or_else(|| panic!("Cannot split {}", op));
            let c = ctx.emit_split_vector(t, 2);
            (c[0].into(), c[1].into())
        }
    }
}

/// The two 16-bit halves of a packed operand
fn split_halves(ctx: &mut IselContext, op: Operand) -> [Operand; 2] {
    match op {
        Operand::Const(v, _) => [Operand::c16(v as u16), Operand::c16((v >> 16) as u16)],
        Operand::Temp(t) if t.reg_type() == RegType::SGPR => {
            let hi = ctx.sop2(Opcode::SLshrB32, RegClass::S1, t, Operand::c32(16));
            [t.into(), hi.into()]
        }
        Operand::Temp(t) => {
            let c = ctx.emit_split_vector(t, 2);
            [c[0].into(), c[1].into()]
        }
        _ => [op, op],
    }
}

/// Pads a sub-dword VGPR value to a full dword with undefined high bits
fn widen_subdword(ctx: &mut IselContext, t: Temp) -> Temp {
    if t.bytes() >= 4 {
        return t;
    }
    let pad = RegClass::get(RegType::VGPR, 4 - t.bytes());
    ctx.create_vector(RegClass::V1, vec![t.into(), Operand::undef(pad)])
}

/// Extends the low `bits` of an operand to a dword
fn extend_to_dword(ctx: &mut IselContext, op: Operand, bits: u8, signed: bool) -> Operand {
    assert!(bits == 8 || bits == 16);
    let mask = (1_u32 << bits) - 1;
    match op {
        Operand::Const(v, _) => {
            let v = v as u32 & mask;
            if signed {
                let shift = 32 - u32::from(bits);
                Operand::c32((((v << shift) as i32) >> shift) as u32)
            } else {
                Operand::c32(v)
            }
        }
        Operand::Temp(t) if t.reg_type() == RegType::SGPR => {
            let r = match (bits, signed) {
                (8, true) => ctx.sop1(Opcode::SSextI32I8, RegClass::S1, t),
                (16, true) => ctx.sop1(Opcode::SSextI32I16, RegClass::S1, t),
                _ => ctx.sop2(Opcode::SAndB32, RegClass::S1, t, Operand::c32(mask)),
            };
            r.into()
        }
        Operand::Temp(t) => {
            let w = widen_subdword(ctx, t);
            let op = if signed {
                Opcode::VBfeI32
            } else {
                Opcode::VBfeU32
            };
            ctx.vop3(
                op,
                RegClass::V1,
                vec![w.into(), Operand::c32(0), Operand::c32(bits.into())],
            )
            .into()
        }
        _ => op,
    }
}

/// Wraps a shift amount to `bits - 1` so a widened shift keeps the
/// semantics of the narrow one
fn mask_shift_amount(ctx: &mut IselContext, op: Operand, amount: Option<u64>, bits: u8) -> Operand {
    let mask = u32::from(bits) - 1;
    if let Some(v) = amount {
        return Operand::c32(v as u32 & mask);
    }
    match op {
        Operand::Const(v, _) => Operand::c32(v as u32 & mask),
        Operand::Temp(t) if t.reg_type() == RegType::SGPR => {
            ctx.sop2(Opcode::SAndB32, RegClass::S1, t, Operand::c32(mask)).into()
        }
        Operand::Temp(t) => {
            let w = widen_subdword(ctx, t);
            ctx.vop2(Opcode::VAndB32, RegClass::V1, Operand::c32(mask), w).into()
        }
        _ => op,
    }
}

/// Class of a result of `bytes` bytes computed on `unit`, 0 bytes is a
/// boolean
fn result_class(ctx: &IselContext, unit: Unit, bytes: u32) -> RegClass {
    match (unit, bytes) {
        (Unit::Salu, 0) => RegClass::S1,
        (Unit::Valu, 0) => ctx.program.lane_mask,
        (Unit::Salu, b) => RegClass::get(RegType::SGPR, b.next_multiple_of(4)),
        (Unit::Valu, b) => RegClass::get(RegType::VGPR, b),
    }
}

fn alu_unit(dst: RegClass, srcs: &[Temp]) -> Unit {
    let scalar = |rc: RegClass| rc.reg_type() == RegType::SGPR && !rc.is_lane_mask();
    if scalar(dst) && srcs.iter().all(|s| scalar(s.reg_class())) {
        Unit::Salu
    } else {
        Unit::Valu
    }
}

/// Width the rule table is keyed on
fn rule_bits(alu: &AluInstr) -> u8 {
    match alu.op {
        AluOp::Bcsel => alu.def.bit_size,
        _ => alu.srcs[0].src.bit_size,
    }
}

pub fn visit_alu_instr(ctx: &mut IselContext, alu: &AluInstr) {
    let dst = ctx.get_ssa_temp(&alu.def);
    let res = match alu.op {
        AluOp::Mov => ctx.get_alu_src(&alu.srcs[0], alu.def.num_components),
        AluOp::Vec2 | AluOp::Vec3 | AluOp::Vec4 => emit_vec(ctx, alu, dst.reg_class()),
        _ => emit_alu(ctx, alu, dst.reg_class()),
    };
    ctx.bind(dst, res);
}

fn emit_alu(ctx: &mut IselContext, alu: &AluInstr, dst_rc: RegClass) -> Temp {
    let packed = alu.def.bit_size == 16 && alu.def.num_components == 2;
    if alu.def.num_components > 1 && !packed {
        isel_err!(alu, "Unsupported vector ALU width");
    }
    assert!(alu.srcs.len() == alu.op.num_inputs());

    let src_comps = if alu.op == AluOp::PackHalf2x16 {
        2
    } else {
        alu.def.num_components
    };
    let srcs: Vec<Temp> = alu
        .srcs
        .iter()
        .map(|s| ctx.get_alu_src(s, src_comps))
        .collect();
    let unit = if packed {
        Unit::Valu
    } else {
        alu_unit(dst_rc, &srcs)
    };

    let mut ops: Vec<Operand> = srcs.iter().map(|t| (*t).into()).collect();
    if is_shift(alu.op) && ops[1].bytes() == 8 {
        /* Only the low dword of a 64-bit shift amount matters */
        let t = src_temp(alu, ops[1]);
        let rc = RegClass::new(t.reg_type(), 1);
        ops[1] = ctx.emit_extract_vector(t, 0, rc).into();
    }

    emit_op(ctx, alu, alu.op, rule_bits(alu), unit, packed, alu.def.bytes(), ops)
}

/// Selects and emits `op`
///
/// This is re-entered by emitters which express one operation in terms
/// of another, like negation as a subtraction from zero.
#[allow(clippy::too_many_arguments)]
fn emit_op(
    ctx: &mut IselContext,
    alu: &AluInstr,
    op: AluOp,
    bits: u8,
    unit: Unit,
    packed: bool,
    bytes: u32,
    ops: Vec<Operand>,
) -> Temp {
    let mut unit = unit;
    let strategy = match select_alu_rule(op, bits, unit, packed, ctx.options) {
        Some(s) => s,
        None => {
            /* Prefer the scalar unit but fall back to the vector one */
            let valu = match unit {
                Unit::Salu => select_alu_rule(op, bits, Unit::Valu, packed, ctx.options),
                Unit::Valu => None,
            };
            match valu {
                Some(s) => {
                    unit = Unit::Valu;
                    s
                }
                None if packed => return emit_unpacked(ctx, alu, op, ops),
                None => isel_err!(
                    alu,
                    "Unsupported {}-bit {} on {:?}",
                    bits,
                    op,
                    ctx.program.chip_class
                ),
            }
        }
    };
    let rc = result_class(ctx, unit, bytes);

    match strategy {
        Strategy::Sop1(opc) => ctx.sop1(opc, rc, ops[0]),
        Strategy::Sop2(opc) => ctx.sop2(opc, rc, ops[0], ops[1]),
        Strategy::Sopc(opc) => ctx.sopc(opc, ops[0], ops[1]),
        Strategy::Vop1(opc) => {
            if needs_denorm_scaling(ctx, op, rc) {
                emit_denorm_scaled(ctx, opc, op, ops[0])
            } else {
                ctx.vop1(opc, rc, ops[0])
            }
        }
        Strategy::Vop2(opc) => emit_vop2(ctx, alu, opc, rc, ops[0], ops[1], true),
        Strategy::Vop2Rev(opc) => emit_vop2(ctx, alu, opc, rc, ops[1], ops[0], false),
        Strategy::Vop2Carry(opc) => emit_carry_op(ctx, opc, ops[0], ops[1], None).0,
        Strategy::Vop3(opc) => emit_vop3(ctx, opc, rc, ops),
        Strategy::Vop3Rev(opc) => emit_vop3(ctx, opc, rc, vec![ops[1], ops[0]]),
        Strategy::Vop3p(opc) | Strategy::Vop3pRev(opc) => {
            let mut ops = ops;
            if matches!(strategy, Strategy::Vop3pRev(_)) {
                ops.swap(0, 1);
            }
            legalize_vop3(ctx, &mut ops);
            ctx.vop3p(opc, rc, ops)
        }
        Strategy::Vopc(opc) => emit_vopc(ctx, alu, opc, ops[0], ops[1]),
        Strategy::Split64(opc) => {
            let (a0, a1) = split64(ctx, ops[0]);
            let (lo, hi) = if opc.format() == Format::VOP1 {
                (ctx.vop1(opc, RegClass::V1, a0), ctx.vop1(opc, RegClass::V1, a1))
            } else {
                let (b0, b1) = split64(ctx, ops[1]);
                (
                    emit_vop2(ctx, alu, opc, RegClass::V1, a0, b0, true),
                    emit_vop2(ctx, alu, opc, RegClass::V1, a1, b1, true),
                )
            };
            ctx.create_vector_cached(RegClass::V2, vec![lo, hi])
        }
        Strategy::LaneMask(wop) => {
            let a = lane_mask_operand(ctx, alu, ops[0]);
            let b = lane_mask_operand(ctx, alu, ops[1]);
            let opc = ctx.w64or32(wop);
            ctx.sop2(opc, rc, a, b)
        }
        Strategy::Promote32 => emit_promoted(ctx, alu, op, bits, unit, bytes, ops),
        Strategy::Custom => emit_custom(ctx, alu, op, bits, unit, bytes, ops),
    }
}

fn lane_mask_operand(ctx: &mut IselContext, alu: &AluInstr, op: Operand) -> Operand {
    let t = src_temp(alu, op);
    ctx.bool_to_vector_condition(t).into()
}

/// Computes a sub-dword op at 32 bits and truncates the result
fn emit_promoted(
    ctx: &mut IselContext,
    alu: &AluInstr,
    op: AluOp,
    bits: u8,
    unit: Unit,
    bytes: u32,
    ops: Vec<Operand>,
) -> Temp {
    let signed = is_signed(op);
    let wide: Vec<Operand> = ops
        .into_iter()
        .enumerate()
        .map(|(i, o)| {
            if is_shift(op) && i == 1 {
                let amount = if op == alu.op { src_const(ctx, &alu.srcs[1]) } else { None };
                mask_shift_amount(ctx, o, amount, bits)
            } else {
                extend_to_dword(ctx, o, bits, signed)
            }
        })
        .collect();
    let wide_bytes = if bytes == 0 { 0 } else { bytes.max(4) };
    let res = emit_op(ctx, alu, op, 32, unit, false, wide_bytes, wide);
    if bytes == 0 || bytes >= 4 || res.reg_type() == RegType::SGPR {
        return res;
    }
    ctx.emit_extract_vector(res, 0, RegClass::get(RegType::VGPR, bytes))
}

/// Packed 16-bit math on targets without it, one half at a time
fn emit_unpacked(ctx: &mut IselContext, alu: &AluInstr, op: AluOp, ops: Vec<Operand>) -> Temp {
    let halves: Vec<[Operand; 2]> = ops.into_iter().map(|o| split_halves(ctx, o)).collect();
    let parts: Vec<Temp> = (0..2)
        .map(|i| {
            let ops = halves.iter().map(|h| h[i]).collect();
            let r = emit_op(ctx, alu, op, 16, Unit::Valu, false, 2, ops);
            ctx.emit_extract_vector(r, 0, RegClass::V2B)
        })
        .collect();
    ctx.create_vector_cached(RegClass::V1, parts)
}

/// Transcendentals flush denormal inputs on older parts, so those are
/// scaled into the normal range first when the float mode asks for it
fn needs_denorm_scaling(ctx: &IselContext, op: AluOp, rc: RegClass) -> bool {
    matches!(op, AluOp::Frcp | AluOp::Frsq | AluOp::Fsqrt | AluOp::Flog2)
        && rc == RegClass::V1
        && ctx.options.has_transcendental_denorm_bug
        && ctx.cur_block().fp_mode.denorm32 == DenormMode::Flush
}

fn emit_denorm_scaled(ctx: &mut IselContext, opc: Opcode, op: AluOp, x: Operand) -> Temp {
    /* Negative and positive denormal classes */
    let mask = ctx.copy(RegClass::V1, Operand::c32((1 << 4) | (1 << 7)));
    let is_denorm = ctx.vopc(Opcode::VCmpClassF32, x, mask);
    let x = to_vgpr(ctx, x);

    let scale = Operand::c32(f32_pow2_bits(24));
    let scaled = ctx.vop2(Opcode::VMulF32, RegClass::V1, scale, x);
    let input = ctx.cndmask(RegClass::V1, x, scaled, is_denorm);
    let r = ctx.vop1(opc, RegClass::V1, input);

    let undo = match op {
        AluOp::Frcp => ctx.vop2(Opcode::VMulF32, RegClass::V1, scale, r),
        AluOp::Frsq => {
            let s = Operand::c32(f32_pow2_bits(12));
            ctx.vop2(Opcode::VMulF32, RegClass::V1, s, r)
        }
        AluOp::Fsqrt => {
            let s = Operand::c32(f32_pow2_bits(-12));
            ctx.vop2(Opcode::VMulF32, RegClass::V1, s, r)
        }
        AluOp::Flog2 => ctx.vop2(Opcode::VAddF32, RegClass::V1, Operand::f32(-24.0), r),
        _ => panic!("No denormal scaling for {}", op),
    };
    ctx.cndmask(RegClass::V1, r, undo, is_denorm)
}

/// 64-bit add or subtract as two 32-bit ops chained through the carry
fn emit_add_sub64(
    ctx: &mut IselContext,
    unit: Unit,
    sub: bool,
    a: Operand,
    b: Operand,
) -> (Temp, Temp) {
    let (a0, a1) = split64(ctx, a);
    let (b0, b1) = split64(ctx, b);
    match unit {
        Unit::Salu => {
            let (op, opc) = if sub {
                (Opcode::SSubU32, Opcode::SSubbU32)
            } else {
                (Opcode::SAddU32, Opcode::SAddcU32)
            };
            let (lo, carry) = ctx.sop2_scc(op, RegClass::S1, a0, b0);
            let hi = ctx.tmp(RegClass::S1);
            let carry_out = ctx.tmp(RegClass::S1);
            ctx.push_op(
                opc,
                vec![hi.into(), Definition::fixed(carry_out, PhysReg::SCC)],
                vec![a1, b1, Operand::Fixed(carry, PhysReg::SCC)],
            );
            let res = ctx.create_vector_cached(RegClass::S2, vec![lo, hi]);
            (res, carry_out)
        }
        Unit::Valu => {
            let (op, opc) = if sub {
                (Opcode::VSubCoU32, Opcode::VSubbCoU32)
            } else {
                (Opcode::VAddCoU32, Opcode::VAddcCoU32)
            };
            let (lo, carry) = emit_carry_op(ctx, op, a0, b0, None);
            let (hi, carry_out) = emit_carry_op(ctx, opc, a1, b1, Some(carry));
            let res = ctx.create_vector_cached(RegClass::V2, vec![lo, hi]);
            (res, carry_out)
        }
    }
}

/// 32-bit add of an address or offset
pub fn emit_add32(ctx: &mut IselContext, a: Temp, b: Operand) -> Temp {
    if a.reg_type() == RegType::SGPR && b.reg_type() == RegType::SGPR {
        return ctx.sop2(Opcode::SAddU32, RegClass::S1, a, b);
    }
    /* Only the second source of VOP2 reads VGPRs */
    let (x, y) = if a.reg_type() == RegType::VGPR {
        (b, Operand::from(a))
    } else {
        (Operand::from(a), to_vgpr(ctx, b))
    };
    if ctx.program.chip_class >= ChipClass::GFX9 {
        ctx.vop2(Opcode::VAddU32, RegClass::V1, x, y)
    } else {
        emit_carry_op(ctx, Opcode::VAddCoU32, x, y, None).0
    }
}

/// 64-bit add of an address
pub fn emit_add64(ctx: &mut IselContext, a: Temp, b: Operand) -> Temp {
    let unit = if a.reg_type() == RegType::SGPR && b.reg_type() == RegType::SGPR {
        Unit::Salu
    } else {
        Unit::Valu
    };
    emit_add_sub64(ctx, unit, false, a.into(), b).0
}

fn emit_mul64(ctx: &mut IselContext, alu: &AluInstr, a: Operand, b: Operand) -> Temp {
    let (a0, a1) = split64(ctx, a);
    let (b0, b1) = split64(ctx, b);
    let lo = emit_vop3(ctx, Opcode::VMulLoU32, RegClass::V1, vec![a0, b0]);
    let carry = emit_vop3(ctx, Opcode::VMulHiU32, RegClass::V1, vec![a0, b0]);
    let x = emit_vop3(ctx, Opcode::VMulLoU32, RegClass::V1, vec![a0, b1]);
    let y = emit_vop3(ctx, Opcode::VMulLoU32, RegClass::V1, vec![a1, b0]);
    let hi = if ctx.program.chip_class >= ChipClass::GFX9 {
        ctx.vop3(Opcode::VAdd3U32, RegClass::V1, vec![carry.into(), x.into(), y.into()])
    } else {
        let t = emit_op(ctx, alu, AluOp::Iadd, 32, Unit::Valu, false, 4, vec![carry.into(), x.into()]);
        emit_op(ctx, alu, AluOp::Iadd, 32, Unit::Valu, false, 4, vec![t.into(), y.into()])
    };
    ctx.create_vector_cached(RegClass::V2, vec![lo, hi])
}

/// Selects the raw bits of a uniform boolean
fn scalar_select(ctx: &mut IselContext, rc: RegClass, then: Operand, els: Operand, cond: Temp) -> Temp {
    let op = if rc.size() == 2 {
        Opcode::SCselectB64
    } else {
        Opcode::SCselectB32
    };
    ctx.salu(op, rc, vec![then, els, Operand::Fixed(cond, PhysReg::SCC)])
}

fn emit_bcsel(ctx: &mut IselContext, alu: &AluInstr, unit: Unit, bytes: u32, ops: Vec<Operand>) -> Temp {
    let cond = src_temp(alu, ops[0]);
    if alu.def.is_bool() {
        return match unit {
            Unit::Salu => scalar_select(ctx, RegClass::S1, ops[1], ops[2], cond),
            Unit::Valu => {
                let c = ctx.bool_to_vector_condition(cond);
                let then = lane_mask_operand(ctx, alu, ops[1]);
                let els = lane_mask_operand(ctx, alu, ops[2]);
                let t = ctx.lm_and(c, then);
                let e = ctx.lm_andn2(els, c);
                ctx.lm_or(t, e)
            }
        };
    }

    if unit == Unit::Salu {
        let rc = result_class(ctx, unit, bytes);
        if rc.size() <= 2 {
            return scalar_select(ctx, rc, ops[1], ops[2], cond);
        }
        let then = ctx.emit_split_vector(src_temp(alu, ops[1]), rc.size());
        let els = ctx.emit_split_vector(src_temp(alu, ops[2]), rc.size());
        let parts = then
            .iter()
            .zip(els.iter())
            .map(|(t, e)| scalar_select(ctx, RegClass::S1, (*t).into(), (*e).into(), cond))
            .collect();
        return ctx.create_vector_cached(rc, parts);
    }

    let cond = ctx.bool_to_vector_condition(cond);
    let then = ctx.as_vgpr(src_temp(alu, ops[1]));
    let els = ctx.as_vgpr(src_temp(alu, ops[2]));
    let rc = result_class(ctx, Unit::Valu, bytes);
    if rc.bytes() <= 4 {
        return ctx.cndmask(rc, els, then, cond);
    }
    let then = ctx.emit_split_vector(then, rc.size());
    let els = ctx.emit_split_vector(els, rc.size());
    let parts = then
        .iter()
        .zip(els.iter())
        .map(|(t, e)| ctx.cndmask(RegClass::V1, *e, *t, cond))
        .collect();
    ctx.create_vector_cached(rc, parts)
}

/// Turns a boolean into 0 or `one`
fn emit_b2x(ctx: &mut IselContext, alu: &AluInstr, unit: Unit, one: u32, src: Operand) -> Temp {
    let b = src_temp(alu, src);
    match unit {
        Unit::Salu => scalar_select(ctx, RegClass::S1, Operand::c32(one), Operand::c32(0), b),
        Unit::Valu => {
            let cond = ctx.bool_to_vector_condition(b);
            ctx.cndmask(RegClass::V1, Operand::c32(0), Operand::c32(one), cond)
        }
    }
}

/// Carry or borrow out of an add or subtract, as an integer
fn emit_carry_out(
    ctx: &mut IselContext,
    sub: bool,
    bits: u8,
    unit: Unit,
    ops: Vec<Operand>,
) -> Temp {
    let carry = if bits == 64 {
        emit_add_sub64(ctx, unit, sub, ops[0], ops[1]).1
    } else {
        match unit {
            Unit::Salu => {
                let op = if sub { Opcode::SSubU32 } else { Opcode::SAddU32 };
                ctx.sop2_scc(op, RegClass::S1, ops[0], ops[1]).1
            }
            Unit::Valu => {
                let op = if sub {
                    Opcode::VSubCoU32
                } else {
                    Opcode::VAddCoU32
                };
                emit_carry_op(ctx, op, ops[0], ops[1], None).1
            }
        }
    };
    let lo = match unit {
        Unit::Salu => scalar_select(ctx, RegClass::S1, Operand::c32(1), Operand::c32(0), carry),
        Unit::Valu => ctx.cndmask(RegClass::V1, Operand::c32(0), Operand::c32(1), carry),
    };
    if bits == 64 {
        let rc = result_class(ctx, unit, 8);
        ctx.create_vector(rc, vec![lo.into(), Operand::c32(0)])
    } else {
        lo
    }
}

fn emit_ufind_msb(ctx: &mut IselContext, unit: Unit, x: Operand) -> Temp {
    /* The hardware counts from the MSB and returns -1 for zero, which the
     * subtraction turns into a borrow.
     */
    match unit {
        Unit::Salu => {
            let rev = ctx.sop1(Opcode::SFlbitI32B32, RegClass::S1, x);
            let (msb, borrow) = ctx.sop2_scc(Opcode::SSubU32, RegClass::S1, Operand::c32(31), rev);
            scalar_select(ctx, RegClass::S1, Operand::c32(u32::MAX), msb.into(), borrow)
        }
        Unit::Valu => {
            let rev = ctx.vop1(Opcode::VFfbhU32, RegClass::V1, x);
            let (msb, borrow) = emit_carry_op(ctx, Opcode::VSubCoU32, Operand::c32(31), rev.into(), None);
            ctx.cndmask(RegClass::V1, msb, Operand::c32(u32::MAX), borrow)
        }
    }
}

fn emit_scalar_bfe(ctx: &mut IselContext, alu: &AluInstr, ops: Vec<Operand>) -> Temp {
    let op = if alu.op == AluOp::Ibfe {
        Opcode::SBfeI32
    } else {
        Opcode::SBfeU32
    };
    /* s_bfe takes the offset in [4:0] and the width in [22:16] */
    let offset = src_const(ctx, &alu.srcs[1]);
    let width = src_const(ctx, &alu.srcs[2]);
    let packed: Operand = match (offset, width) {
        (Some(o), Some(w)) => Operand::c32((o as u32 & 0x1f) | ((w as u32 & 0x7f) << 16)),
        _ => {
            let w = ctx.sop2(Opcode::SLshlB32, RegClass::S1, ops[2], Operand::c32(16));
            let o = ctx.sop2(Opcode::SAndB32, RegClass::S1, ops[1], Operand::c32(0x1f));
            ctx.sop2(Opcode::SOrB32, RegClass::S1, o, w).into()
        }
    };
    ctx.sop2(op, RegClass::S1, ops[0], packed)
}

fn emit_fneg_fabs(ctx: &mut IselContext, alu: &AluInstr, bits: u8, packed: bool, x: Operand) -> Temp {
    let neg = alu.op == AluOp::Fneg;
    let fp_mode = ctx.cur_block().fp_mode;
    match (bits, packed) {
        (16, true) => {
            let mask = if neg { 0x80008000 } else { 0x7fff7fff };
            let op = if neg { Opcode::VXorB32 } else { Opcode::VAndB32 };
            let x = to_vgpr(ctx, x);
            ctx.vop2(op, RegClass::V1, Operand::c32(mask), x)
        }
        (16, false) => {
            /* Sub-dword bit operations would touch the other half */
            emit_vop3_mods(
                ctx,
                Opcode::VMulF16,
                RegClass::V2B,
                vec![Operand::c16(if neg { 0xbc00 } else { 0x3c00 }), x],
                |m| m.abs[1] = !neg,
            )
        }
        (32, _) => {
            if fp_mode.denorm32 == DenormMode::Flush {
                /* Multiplying flushes denormals like other float math */
                emit_vop3_mods(
                    ctx,
                    Opcode::VMulF32,
                    RegClass::V1,
                    vec![Operand::f32(if neg { -1.0 } else { 1.0 }), x],
                    |m| m.abs[1] = !neg,
                )
            } else {
                let x = to_vgpr(ctx, x);
                if neg {
                    ctx.vop2(Opcode::VXorB32, RegClass::V1, Operand::c32(0x80000000), x)
                } else {
                    ctx.vop2(Opcode::VAndB32, RegClass::V1, Operand::c32(0x7fffffff), x)
                }
            }
        }
        (64, _) => {
            if fp_mode.denorm16_64 == DenormMode::Flush {
                let one = if neg { -1.0_f64 } else { 1.0 };
                return emit_vop3_mods(
                    ctx,
                    Opcode::VMulF64,
                    RegClass::V2,
                    vec![Operand::c64(one.to_bits()), x],
                    |m| m.abs[1] = !neg,
                );
            }
            let (lo, hi) = split64(ctx, x);
            let hi = to_vgpr(ctx, hi);
            let hi = if neg {
                ctx.vop2(Opcode::VXorB32, RegClass::V1, Operand::c32(0x80000000), hi)
            } else {
                ctx.vop2(Opcode::VAndB32, RegClass::V1, Operand::c32(0x7fffffff), hi)
            };
            let lo = src_temp(alu, lo);
            ctx.create_vector_cached(RegClass::V2, vec![lo, hi])
        }
        _ => isel_err!(alu, "Unsupported {}-bit float modifier", bits),
    }
}

fn emit_fsat(ctx: &mut IselContext, alu: &AluInstr, bits: u8, x: Operand) -> Temp {
    let (op, rc, zero) = match bits {
        16 => (Opcode::VAddF16, RegClass::V2B, Operand::c16(0)),
        32 => (Opcode::VAddF32, RegClass::V1, Operand::c32(0)),
        64 => (Opcode::VAddF64, RegClass::V2, Operand::c64(0)),
        _ => isel_err!(alu, "Unsupported {}-bit fsat", bits),
    };
    emit_vop3_mods(ctx, op, rc, vec![zero, x], |m| m.clamp = true)
}

fn emit_trig(ctx: &mut IselContext, alu: &AluInstr, bits: u8, x: Operand) -> Temp {
    let sin = alu.op == AluOp::Fsin;
    let (mul, fract, trig, rc, scale) = match bits {
        16 => (
            Opcode::VMulF16,
            Opcode::VFractF16,
            if sin { Opcode::VSinF16 } else { Opcode::VCosF16 },
            RegClass::V2B,
            Operand::c16(INV_2PI_F16),
        ),
        _ => (
            Opcode::VMulF32,
            Opcode::VFractF32,
            if sin { Opcode::VSinF32 } else { Opcode::VCosF32 },
            RegClass::V1,
            Operand::c32(INV_2PI_F32),
        ),
    };
    let x = to_vgpr(ctx, x);
    let mut t = ctx.vop2(mul, rc, scale, x);
    /* Before GFX9 the input range is limited to [-256, 256] turns */
    if ctx.program.chip_class < ChipClass::GFX9 {
        t = ctx.vop1(fract, rc, t);
    }
    ctx.vop1(trig, rc, t)
}

/// Reads `src` from the lanes of its quad given by `lanes`
pub fn emit_quad_perm(ctx: &mut IselContext, src: Temp, lanes: [u8; 4]) -> Temp {
    let src = ctx.as_vgpr(src);
    let src = widen_subdword(ctx, src);
    ctx.program.config.needs_wqm = true;
    if ctx.options.has_dpp {
        let dst = ctx.tmp(RegClass::V1);
        ctx.push_op(Opcode::VMovB32, vec![dst.into()], vec![src.into()])
            .info = DppInfo::quad_perm(lanes).into();
        dst
    } else {
        let perm = lanes
            .iter()
            .enumerate()
            .fold(0_u16, |acc, (i, l)| acc | (u16::from(*l & 3) << (2 * i)));
        let info = DsInfo {
            offset0: 0x8000 | perm,
            ..Default::default()
        };
        match ctx.mem(Opcode::DsSwizzleB32, Some(RegClass::V1), vec![src.into()], info) {
            Some(t) => t,
            None => unreachable!(),
        }
    }
}

fn emit_derivative(ctx: &mut IselContext, alu: &AluInstr, bits: u8, x: Operand) -> Temp {
    let (tl, other) = if alu.op == AluOp::Fddx {
        ([0, 0, 2, 2], [1, 1, 3, 3])
    } else {
        ([0, 1, 0, 1], [2, 3, 2, 3])
    };
    let (sub, rc) = if bits == 16 {
        (Opcode::VSubF16, RegClass::V2B)
    } else {
        (Opcode::VSubF32, RegClass::V1)
    };
    let x = src_temp(alu, x);
    let tl_val = emit_quad_perm(ctx, x, tl);
    let res = if ctx.options.has_dpp {
        let x = ctx.as_vgpr(x);
        let x = widen_subdword(ctx, x);
        let dst = ctx.tmp(rc);
        ctx.push_op(sub, vec![dst.into()], vec![x.into(), tl_val.into()])
            .info = DppInfo::quad_perm(other).into();
        dst
    } else {
        let other_val = emit_quad_perm(ctx, x, other);
        ctx.vop2(sub, rc, other_val, tl_val)
    };
    ctx.pseudo(Opcode::PWqm, rc, vec![res.into()])
}

fn emit_pack_half(ctx: &mut IselContext, x: Operand) -> Temp {
    let (a, b) = split64(ctx, x);
    if ctx.cur_block().fp_mode.round16_64 == RoundMode::TowardZero {
        let b = to_vgpr(ctx, b);
        return ctx.vop2(Opcode::VCvtPkrtzF16F32, RegClass::V1, a, b);
    }
    let lo = ctx.vop1(Opcode::VCvtF16F32, RegClass::V2B, a);
    let hi = ctx.vop1(Opcode::VCvtF16F32, RegClass::V2B, b);
    ctx.create_vector_cached(RegClass::V1, vec![lo, hi])
}

/// Resizes an integer
///
/// Sub-dword scalars live in the low bits of a dword with the high bits
/// undefined, so narrowing those is free.
pub fn convert_int(
    ctx: &mut IselContext,
    src: Temp,
    src_bits: u8,
    dst_bits: u8,
    sign_extend: bool,
) -> Temp {
    assert!(
        !(sign_extend && dst_bits < src_bits),
        "Cannot sign-extend while narrowing from {} to {} bits",
        src_bits,
        dst_bits
    );
    if src_bits == dst_bits {
        return src;
    }
    let ty = src.reg_type();

    if dst_bits < src_bits {
        let lo = if src_bits == 64 {
            ctx.emit_extract_vector(src, 0, RegClass::new(ty, 1))
        } else {
            src
        };
        if dst_bits == 32 || ty == RegType::SGPR {
            return lo;
        }
        return ctx.emit_extract_vector(lo, 0, RegClass::get(RegType::VGPR, (dst_bits / 8).into()));
    }

    let lo = if src_bits < 32 {
        let op = extend_to_dword(ctx, src.into(), src_bits, sign_extend);
        op.temp().unwrap_or_else(|| panic!("Extension produced {}", op))
    } else {
        src
    };
    if dst_bits <= 32 {
        if dst_bits == 32 || ty == RegType::SGPR {
            return lo;
        }
        return ctx.emit_extract_vector(lo, 0, RegClass::get(RegType::VGPR, (dst_bits / 8).into()));
    }

    let hi: Operand = match (sign_extend, ty) {
        (false, _) => Operand::c32(0),
        (true, RegType::SGPR) => ctx
            .sop2(Opcode::SAshrI32, RegClass::S1, lo, Operand::c32(31))
            .into(),
        (true, RegType::VGPR) => ctx
            .vop2(Opcode::VAshrrevI32, RegClass::V1, Operand::c32(31), lo)
            .into(),
    };
    ctx.create_vector(RegClass::new(ty, 2), vec![lo.into(), hi])
}

fn resize_bits(op: AluOp) -> (u8, bool) {
    match op {
        AluOp::I2i8 => (8, true),
        AluOp::I2i16 => (16, true),
        AluOp::I2i32 => (32, true),
        AluOp::I2i64 => (64, true),
        AluOp::U2u8 => (8, false),
        AluOp::U2u16 => (16, false),
        AluOp::U2u32 => (32, false),
        AluOp::U2u64 => (64, false),
        _ => panic!("{} is not an integer resize", op),
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_custom(
    ctx: &mut IselContext,
    alu: &AluInstr,
    op: AluOp,
    bits: u8,
    unit: Unit,
    bytes: u32,
    ops: Vec<Operand>,
) -> Temp {
    let packed = alu.def.bit_size == 16 && alu.def.num_components == 2;
    match op {
        AluOp::Iadd | AluOp::Isub => {
            assert!(bits == 64);
            emit_add_sub64(ctx, unit, op == AluOp::Isub, ops[0], ops[1]).0
        }
        AluOp::Imul => emit_mul64(ctx, alu, ops[0], ops[1]),
        AluOp::Ineg => {
            if bits == 64 {
                emit_add_sub64(ctx, unit, true, Operand::c64(0), ops[0]).0
            } else {
                let zero = Operand::zero(u32::from(bits / 8));
                emit_op(ctx, alu, AluOp::Isub, bits, unit, false, bytes, vec![zero, ops[0]])
            }
        }
        AluOp::Iabs => {
            let zero = Operand::zero(u32::from(bits / 8));
            let neg = emit_op(ctx, alu, AluOp::Isub, bits, unit, false, bytes, vec![zero, ops[0]]);
            emit_op(ctx, alu, AluOp::Imax, bits, unit, false, bytes, vec![ops[0], neg.into()])
        }
        AluOp::UaddCarry | AluOp::UsubBorrow => {
            emit_carry_out(ctx, op == AluOp::UsubBorrow, bits, unit, ops)
        }
        AluOp::Inot => match unit {
            /* Uniform booleans are 0 or 1 */
            Unit::Salu => ctx.sop2(Opcode::SXorB32, RegClass::S1, ops[0], Operand::c32(1)),
            Unit::Valu => {
                let x = lane_mask_operand(ctx, alu, ops[0]);
                let exec = ctx.exec();
                ctx.lm_andn2(exec, x)
            }
        },
        AluOp::Ieq => {
            /* Lane-mask equality, inactive lanes stay clear */
            let a = lane_mask_operand(ctx, alu, ops[0]);
            let b = lane_mask_operand(ctx, alu, ops[1]);
            let xor = ctx.w64or32(WaveOp::SXor);
            let lm = ctx.lm();
            let diff = ctx.sop2(xor, lm, a, b);
            let exec = ctx.exec();
            ctx.lm_andn2(exec, diff)
        }
        AluOp::BitCount => {
            if bits == 64 {
                let (lo, hi) = split64(ctx, ops[0]);
                let t = emit_vop3(ctx, Opcode::VBcntU32B32, RegClass::V1, vec![lo, Operand::c32(0)]);
                emit_vop3(ctx, Opcode::VBcntU32B32, RegClass::V1, vec![hi, t.into()])
            } else {
                emit_vop3(ctx, Opcode::VBcntU32B32, RegClass::V1, vec![ops[0], Operand::c32(0)])
            }
        }
        AluOp::UfindMsb => emit_ufind_msb(ctx, unit, ops[0]),
        AluOp::Ubfe | AluOp::Ibfe => emit_scalar_bfe(ctx, alu, ops),
        AluOp::Fneg | AluOp::Fabs => emit_fneg_fabs(ctx, alu, bits, packed, ops[0]),
        AluOp::Fsat => emit_fsat(ctx, alu, bits, ops[0]),
        AluOp::Fsub => {
            if packed {
                let mut ops = ops;
                legalize_vop3(ctx, &mut ops);
                let dst = ctx.tmp(RegClass::V1);
                ctx.push_op(Opcode::VPkAddF16, vec![dst.into()], ops).info = Vop3pInfo {
                    neg_lo: [false, true, false],
                    neg_hi: [false, true, false],
                    ..Default::default()
                }
                .into();
                dst
            } else {
                emit_vop3_mods(ctx, Opcode::VAddF64, RegClass::V2, ops, |m| m.neg[1] = true)
            }
        }
        AluOp::Fsin | AluOp::Fcos => emit_trig(ctx, alu, bits, ops[0]),
        AluOp::Fddx | AluOp::Fddy => emit_derivative(ctx, alu, bits, ops[0]),
        AluOp::I2b1 => {
            let zero = Operand::zero(u32::from(bits / 8));
            emit_op(ctx, alu, AluOp::Ine, bits, unit, false, 0, vec![ops[0], zero])
        }
        AluOp::Bcsel => emit_bcsel(ctx, alu, unit, bytes, ops),
        AluOp::B2i32 => emit_b2x(ctx, alu, unit, 1, ops[0]),
        AluOp::B2f32 => emit_b2x(ctx, alu, Unit::Valu, 1.0_f32.to_bits(), ops[0]),
        AluOp::F2i32 | AluOp::F2u32 => {
            let f = ctx.vop1(Opcode::VCvtF32F16, RegClass::V1, ops[0]);
            let cvt = if op == AluOp::F2i32 {
                Opcode::VCvtI32F32
            } else {
                Opcode::VCvtU32F32
            };
            ctx.vop1(cvt, RegClass::V1, f)
        }
        AluOp::F2f16 => {
            let f = ctx.vop1(Opcode::VCvtF32F64, RegClass::V1, ops[0]);
            ctx.vop1(Opcode::VCvtF16F32, RegClass::V2B, f)
        }
        AluOp::F2f32 => src_temp(alu, ops[0]),
        AluOp::F2f64 => {
            if bits == 64 {
                return src_temp(alu, ops[0]);
            }
            let f = ctx.vop1(Opcode::VCvtF32F16, RegClass::V1, ops[0]);
            ctx.vop1(Opcode::VCvtF64F32, RegClass::V2, f)
        }
        AluOp::PackHalf2x16 => emit_pack_half(ctx, ops[0]),
        AluOp::I2i8
        | AluOp::I2i16
        | AluOp::I2i32
        | AluOp::I2i64
        | AluOp::U2u8
        | AluOp::U2u16
        | AluOp::U2u32
        | AluOp::U2u64 => {
            let (dst_bits, signed) = resize_bits(op);
            let src = src_temp(alu, ops[0]);
            convert_int(ctx, src, bits, dst_bits, signed && dst_bits > bits)
        }
        _ => isel_err!(alu, "No emitter for {}-bit {}", bits, op),
    }
}

/// Packs sub-dword scalar components into dwords
fn pack_scalar(ctx: &mut IselContext, elems: &[Temp], elem_bytes: u32, rc: RegClass) -> Temp {
    let per_dword = (4 / elem_bytes) as usize;
    let bits = elem_bytes * 8;
    let mask = (1_u32 << bits) - 1;
    let dwords: Vec<Temp> = elems
        .chunks(per_dword)
        .map(|chunk| {
            if chunk.len() == 2 && bits == 16 && ctx.program.chip_class >= ChipClass::GFX9 {
                return ctx.sop2(Opcode::SPackLlB32B16, RegClass::S1, chunk[0], chunk[1]);
            }
            let mut acc = ctx.sop2(Opcode::SAndB32, RegClass::S1, chunk[0], Operand::c32(mask));
            for (j, e) in chunk.iter().enumerate().skip(1) {
                let v = ctx.sop2(Opcode::SAndB32, RegClass::S1, *e, Operand::c32(mask));
                let shift = Operand::c32(j as u32 * bits);
                let v = ctx.sop2(Opcode::SLshlB32, RegClass::S1, v, shift);
                acc = ctx.sop2(Opcode::SOrB32, RegClass::S1, acc, v);
            }
            acc
        })
        .collect();
    assert!(dwords.len() as u32 == rc.size());
    ctx.create_vector_cached(rc, dwords)
}

fn emit_vec(ctx: &mut IselContext, alu: &AluInstr, rc: RegClass) -> Temp {
    if alu.def.is_bool() {
        isel_err!(alu, "Boolean vectors are not supported");
    }
    let elems: Vec<Temp> = alu.srcs.iter().map(|s| ctx.get_alu_src(s, 1)).collect();
    let elem_bytes = u32::from(alu.def.bit_size / 8);

    if rc.reg_type() == RegType::SGPR && elem_bytes < 4 {
        return pack_scalar(ctx, &elems, elem_bytes, rc);
    }

    let elem_rc = RegClass::get(RegType::VGPR, elem_bytes);
    let parts: Vec<Temp> = elems
        .into_iter()
        .map(|e| {
            if elem_bytes < 4 && e.reg_class() != elem_rc {
                let v = ctx.as_vgpr(e);
                ctx.emit_extract_vector(v, 0, elem_rc)
            } else {
                e
            }
        })
        .collect();
    ctx.create_vector_cached(rc, parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aco_options::{CompilerOptions, ShaderConfig};
    use crate::nir::{ShaderInfo, ShaderStage};

    fn with_ctx(chip: ChipClass, f: impl FnOnce(&mut IselContext)) -> Program {
        let options = CompilerOptions::new(chip, 64).unwrap();
        let config = ShaderConfig::default();
        let mut program = Program::new(chip, 64, HwStage::CS, vec![ShaderStage::Compute]);
        program.create_and_insert_block();
        let info = ShaderInfo::new(ShaderStage::Compute);
        let mut ctx = IselContext::new(&options, &config, program, &info);
        f(&mut ctx);
        ctx.program
    }

    #[test]
    fn vop3_constant_bus_is_respected() {
        let p = with_ctx(ChipClass::GFX9, |ctx| {
            let a = ctx.tmp(RegClass::S1);
            let b = ctx.tmp(RegClass::S1);
            emit_vop3(ctx, Opcode::VMulLoU32, RegClass::V1, vec![a.into(), b.into()]);
        });
        let mul = p.instrs().find(|i| i.opcode == Opcode::VMulLoU32).unwrap();
        let scalars = mul
            .operands
            .iter()
            .filter(|o| o.reg_type() == RegType::SGPR)
            .count();
        assert_eq!(scalars, 1);

        let p = with_ctx(ChipClass::GFX10, |ctx| {
            let a = ctx.tmp(RegClass::S1);
            let b = ctx.tmp(RegClass::S1);
            emit_vop3(ctx, Opcode::VMulLoU32, RegClass::V1, vec![a.into(), b.into()]);
        });
        assert!(!p.instrs().any(|i| i.opcode == Opcode::PParallelcopy));
    }

    #[test]
    fn sign_extension_widens_to_64_bits() {
        let p = with_ctx(ChipClass::GFX8, |ctx| {
            let v = ctx.tmp(RegClass::V2B);
            let r = convert_int(ctx, v, 16, 64, true);
            assert_eq!(r.reg_class(), RegClass::V2);
        });
        assert!(p.instrs().any(|i| i.opcode == Opcode::VBfeI32));
        assert!(p.instrs().any(|i| i.opcode == Opcode::VAshrrevI32));
    }

    #[test]
    fn narrowing_scalars_is_free() {
        let p = with_ctx(ChipClass::GFX8, |ctx| {
            let s = ctx.tmp(RegClass::S1);
            assert_eq!(convert_int(ctx, s, 32, 16, false), s);
        });
        assert_eq!(p.instrs().count(), 0);
    }

    #[test]
    #[should_panic(expected = "Cannot sign-extend while narrowing")]
    fn sign_extending_shrink_is_rejected() {
        with_ctx(ChipClass::GFX8, |ctx| {
            let v = ctx.tmp(RegClass::V1);
            convert_int(ctx, v, 32, 16, true);
        });
    }

    #[test]
    fn quad_perm_uses_swizzle_without_dpp() {
        let p = with_ctx(ChipClass::GFX7, |ctx| {
            let v = ctx.tmp(RegClass::V1);
            emit_quad_perm(ctx, v, [1, 1, 3, 3]);
            assert!(ctx.program.config.needs_wqm);
        });
        let swz = p.instrs().find(|i| i.opcode == Opcode::DsSwizzleB32).unwrap();
        match &swz.info {
            FormatInfo::Ds(ds) => assert_eq!(ds.offset0, 0x8000 | 0b11_11_01_01),
            _ => panic!("ds_swizzle without DS info"),
        }
    }
}
