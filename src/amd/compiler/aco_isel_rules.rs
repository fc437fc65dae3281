/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! ALU opcode selection table
//!
//! Every NIR ALU op is looked up by `(op, bit size, unit, packed)` in
//! `RULES`.  Rules are listed in preference order and the first one whose
//! requirement holds on the target wins.  The emitters in `aco_isel_alu`
//! only interpret the chosen `Strategy`, they never pick opcodes on their
//! own, so this table is the complete record of which machine instruction
//! implements which operation.

use crate::aco_builder::WaveOp;
use crate::aco_ir::*;
use crate::aco_options::CompilerOptions;
use crate::nir::AluOp;

/// Which ALU computes the result
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Unit {
    /// Uniform operands, uniform result
    Salu,
    /// Per-lane result
    Valu,
}

/// Target feature a rule depends on
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Requires {
    Always,
    Packed16,
    Vop16,
    ScalarCmp64,
    ScalarMulHi,
    Gfx7,
    Gfx8,
    Gfx9,
}

impl Requires {
    pub fn holds(&self, options: &CompilerOptions) -> bool {
        match self {
            Requires::Always => true,
            Requires::Packed16 => options.has_packed_math_16bit,
            Requires::Vop16 => options.has_16bit_vop2,
            Requires::ScalarCmp64 => options.has_scalar_cmp_u64,
            Requires::ScalarMulHi => options.has_scalar_mul_hi,
            Requires::Gfx7 => options.chip_class >= ChipClass::GFX7,
            Requires::Gfx8 => options.chip_class >= ChipClass::GFX8,
            Requires::Gfx9 => options.chip_class >= ChipClass::GFX9,
        }
    }
}

/// How a selected rule is emitted
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Strategy {
    Sop1(Opcode),
    Sop2(Opcode),
    /// Scalar comparison, the result is in SCC
    Sopc(Opcode),
    Vop1(Opcode),
    Vop2(Opcode),
    /// VOP2 taking its operands in reverse order, like the `*rev` shifts
    Vop2Rev(Opcode),
    /// VOP2 which also writes a lane-mask carry-out
    Vop2Carry(Opcode),
    Vop3(Opcode),
    Vop3Rev(Opcode),
    Vop3p(Opcode),
    Vop3pRev(Opcode),
    Vopc(Opcode),
    /// A bitwise 32-bit VALU op applied to both halves of a 64-bit value
    Split64(Opcode),
    /// Scalar op on lane masks, sized by the wave
    LaneMask(WaveOp),
    /// Extend the sub-dword operands and use the 32-bit rule
    Promote32,
    /// A dedicated emitter in `aco_isel_alu`
    Custom,
}

impl Strategy {
    pub fn opcode(&self) -> Option<Opcode> {
        match *self {
            Strategy::Sop1(op)
            | Strategy::Sop2(op)
            | Strategy::Sopc(op)
            | Strategy::Vop1(op)
            | Strategy::Vop2(op)
            | Strategy::Vop2Rev(op)
            | Strategy::Vop2Carry(op)
            | Strategy::Vop3(op)
            | Strategy::Vop3Rev(op)
            | Strategy::Vop3p(op)
            | Strategy::Vop3pRev(op)
            | Strategy::Vopc(op)
            | Strategy::Split64(op) => Some(op),
            Strategy::LaneMask(_) | Strategy::Promote32 | Strategy::Custom => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AluRule {
    pub op: AluOp,
    pub bits: u8,
    pub unit: Unit,
    /// Two 16-bit components in one dword
    pub packed: bool,
    pub requires: Requires,
    pub strategy: Strategy,
}

macro_rules! rule {
    ($op: ident, $bits: expr, $unit: ident, $req: ident, $strat: expr) => {
        AluRule {
            op: AluOp::$op,
            bits: $bits,
            unit: Unit::$unit,
            packed: false,
            requires: Requires::$req,
            strategy: $strat,
        }
    };
}

macro_rules! packed {
    ($op: ident, $req: ident, $strat: expr) => {
        AluRule {
            op: AluOp::$op,
            bits: 16,
            unit: Unit::Valu,
            packed: true,
            requires: Requires::$req,
            strategy: $strat,
        }
    };
}

use Opcode::*;
use Strategy::*;

/// Integer ops which are computed the same way at every sub-dword width
macro_rules! subdword_int {
    ($op: ident, $vop16: expr, $pk: expr) => {
        [
            rule!($op, 16, Salu, Always, Promote32),
            rule!($op, 8, Salu, Always, Promote32),
            packed!($op, Packed16, $pk),
            rule!($op, 16, Valu, Vop16, $vop16),
            rule!($op, 16, Valu, Always, Promote32),
            rule!($op, 8, Valu, Always, Promote32),
        ]
    };
}

const INT_ADD: [AluRule; 11] = {
    let s = subdword_int!(Iadd, Vop2(VAddU16), Vop3p(VPkAddU16));
    [
        rule!(Iadd, 32, Salu, Always, Sop2(SAddU32)),
        rule!(Iadd, 64, Salu, Always, Custom),
        rule!(Iadd, 32, Valu, Gfx9, Vop2(VAddU32)),
        rule!(Iadd, 32, Valu, Always, Vop2Carry(VAddCoU32)),
        rule!(Iadd, 64, Valu, Always, Custom),
        s[0], s[1], s[2], s[3], s[4], s[5],
    ]
};

const INT_SUB: [AluRule; 11] = {
    let s = subdword_int!(Isub, Vop2(VSubU16), Vop3p(VPkSubU16));
    [
        rule!(Isub, 32, Salu, Always, Sop2(SSubU32)),
        rule!(Isub, 64, Salu, Always, Custom),
        rule!(Isub, 32, Valu, Gfx9, Vop2(VSubU32)),
        rule!(Isub, 32, Valu, Always, Vop2Carry(VSubCoU32)),
        rule!(Isub, 64, Valu, Always, Custom),
        s[0], s[1], s[2], s[3], s[4], s[5],
    ]
};

const INT_MUL: [AluRule; 13] = {
    let s = subdword_int!(Imul, Vop2(VMulLoU16), Vop3p(VPkMulLoU16));
    [
        rule!(Imul, 32, Salu, Always, Sop2(SMulI32)),
        rule!(Imul, 32, Valu, Always, Vop3(VMulLoU32)),
        rule!(Imul, 64, Valu, Always, Custom),
        rule!(UmulHigh, 32, Salu, ScalarMulHi, Sop2(SMulHiU32)),
        rule!(UmulHigh, 32, Valu, Always, Vop3(VMulHiU32)),
        rule!(ImulHigh, 32, Salu, ScalarMulHi, Sop2(SMulHiI32)),
        rule!(ImulHigh, 32, Valu, Always, Vop3(VMulHiI32)),
        s[0], s[1], s[2], s[3], s[4], s[5],
    ]
};

const INT_MINMAX: [AluRule; 32] = {
    let a = subdword_int!(Imin, Vop2(VMinI16), Vop3p(VPkMinI16));
    let b = subdword_int!(Imax, Vop2(VMaxI16), Vop3p(VPkMaxI16));
    let c = subdword_int!(Umin, Vop2(VMinU16), Vop3p(VPkMinU16));
    let d = subdword_int!(Umax, Vop2(VMaxU16), Vop3p(VPkMaxU16));
    [
        rule!(Imin, 32, Salu, Always, Sop2(SMinI32)),
        rule!(Imin, 32, Valu, Always, Vop2(VMinI32)),
        rule!(Imax, 32, Salu, Always, Sop2(SMaxI32)),
        rule!(Imax, 32, Valu, Always, Vop2(VMaxI32)),
        rule!(Umin, 32, Salu, Always, Sop2(SMinU32)),
        rule!(Umin, 32, Valu, Always, Vop2(VMinU32)),
        rule!(Umax, 32, Salu, Always, Sop2(SMaxU32)),
        rule!(Umax, 32, Valu, Always, Vop2(VMaxU32)),
        a[0], a[1], a[2], a[3], a[4], a[5],
        b[0], b[1], b[2], b[3], b[4], b[5],
        c[0], c[1], c[2], c[3], c[4], c[5],
        d[0], d[1], d[2], d[3], d[4], d[5],
    ]
};

const INT_MISC: [AluRule; 14] = [
    rule!(Ineg, 32, Salu, Always, Custom),
    rule!(Ineg, 64, Salu, Always, Custom),
    rule!(Ineg, 32, Valu, Always, Custom),
    rule!(Ineg, 64, Valu, Always, Custom),
    rule!(Ineg, 16, Valu, Always, Custom),
    rule!(Ineg, 16, Salu, Always, Custom),
    rule!(Iabs, 32, Salu, Always, Sop1(SAbsI32)),
    rule!(Iabs, 32, Valu, Always, Custom),
    rule!(Iabs, 16, Valu, Always, Custom),
    rule!(Iabs, 16, Salu, Always, Promote32),
    rule!(UaddCarry, 32, Salu, Always, Custom),
    rule!(UaddCarry, 32, Valu, Always, Custom),
    rule!(UsubBorrow, 32, Salu, Always, Custom),
    rule!(UsubBorrow, 32, Valu, Always, Custom),
];

const INT_CARRY64: [AluRule; 4] = [
    rule!(UaddCarry, 64, Salu, Always, Custom),
    rule!(UaddCarry, 64, Valu, Always, Custom),
    rule!(UsubBorrow, 64, Salu, Always, Custom),
    rule!(UsubBorrow, 64, Valu, Always, Custom),
];

/// Bitwise logic, including the 1-bit boolean forms
const BITWISE: [AluRule; 31] = [
    rule!(Iand, 1, Salu, Always, Sop2(SAndB32)),
    rule!(Iand, 1, Valu, Always, LaneMask(WaveOp::SAnd)),
    rule!(Iand, 32, Salu, Always, Sop2(SAndB32)),
    rule!(Iand, 64, Salu, Always, Sop2(SAndB64)),
    rule!(Iand, 32, Valu, Always, Vop2(VAndB32)),
    rule!(Iand, 64, Valu, Always, Split64(VAndB32)),
    rule!(Iand, 16, Salu, Always, Sop2(SAndB32)),
    rule!(Iand, 16, Valu, Always, Promote32),
    rule!(Ior, 1, Salu, Always, Sop2(SOrB32)),
    rule!(Ior, 1, Valu, Always, LaneMask(WaveOp::SOr)),
    rule!(Ior, 32, Salu, Always, Sop2(SOrB32)),
    rule!(Ior, 64, Salu, Always, Sop2(SOrB64)),
    rule!(Ior, 32, Valu, Always, Vop2(VOrB32)),
    rule!(Ior, 64, Valu, Always, Split64(VOrB32)),
    rule!(Ior, 16, Salu, Always, Sop2(SOrB32)),
    rule!(Ior, 16, Valu, Always, Promote32),
    rule!(Ixor, 1, Salu, Always, Sop2(SXorB32)),
    rule!(Ixor, 1, Valu, Always, LaneMask(WaveOp::SXor)),
    rule!(Ixor, 32, Salu, Always, Sop2(SXorB32)),
    rule!(Ixor, 64, Salu, Always, Sop2(SXorB64)),
    rule!(Ixor, 32, Valu, Always, Vop2(VXorB32)),
    rule!(Ixor, 64, Valu, Always, Split64(VXorB32)),
    rule!(Ixor, 16, Salu, Always, Sop2(SXorB32)),
    rule!(Ixor, 16, Valu, Always, Promote32),
    rule!(Inot, 1, Salu, Always, Custom),
    rule!(Inot, 1, Valu, Always, Custom),
    rule!(Inot, 32, Salu, Always, Sop1(SNotB32)),
    rule!(Inot, 64, Salu, Always, Sop1(SNotB64)),
    rule!(Inot, 32, Valu, Always, Vop1(VNotB32)),
    rule!(Inot, 64, Valu, Always, Split64(VNotB32)),
    rule!(Inot, 16, Valu, Always, Promote32),
];

const SHIFTS: [AluRule; 27] = [
    rule!(Ishl, 32, Salu, Always, Sop2(SLshlB32)),
    rule!(Ishl, 64, Salu, Always, Sop2(SLshlB64)),
    rule!(Ishl, 32, Valu, Always, Vop2Rev(VLshlrevB32)),
    rule!(Ishl, 64, Valu, Gfx8, Vop3Rev(VLshlrevB64)),
    rule!(Ishl, 64, Valu, Always, Vop3(VLshlB64)),
    packed!(Ishl, Packed16, Vop3pRev(VPkLshlrevB16)),
    rule!(Ishl, 16, Valu, Vop16, Vop2Rev(VLshlrevB16)),
    rule!(Ishl, 16, Valu, Always, Promote32),
    rule!(Ishl, 16, Salu, Always, Promote32),
    rule!(Ishr, 32, Salu, Always, Sop2(SAshrI32)),
    rule!(Ishr, 64, Salu, Always, Sop2(SAshrI64)),
    rule!(Ishr, 32, Valu, Always, Vop2Rev(VAshrrevI32)),
    rule!(Ishr, 64, Valu, Gfx8, Vop3Rev(VAshrrevI64)),
    rule!(Ishr, 64, Valu, Always, Vop3(VAshrI64)),
    packed!(Ishr, Packed16, Vop3pRev(VPkAshrrevI16)),
    rule!(Ishr, 16, Valu, Vop16, Vop2Rev(VAshrrevI16)),
    rule!(Ishr, 16, Valu, Always, Promote32),
    rule!(Ishr, 16, Salu, Always, Promote32),
    rule!(Ushr, 32, Salu, Always, Sop2(SLshrB32)),
    rule!(Ushr, 64, Salu, Always, Sop2(SLshrB64)),
    rule!(Ushr, 32, Valu, Always, Vop2Rev(VLshrrevB32)),
    rule!(Ushr, 64, Valu, Gfx8, Vop3Rev(VLshrrevB64)),
    rule!(Ushr, 64, Valu, Always, Vop3(VLshrB64)),
    packed!(Ushr, Packed16, Vop3pRev(VPkLshrrevB16)),
    rule!(Ushr, 16, Valu, Vop16, Vop2Rev(VLshrrevB16)),
    rule!(Ushr, 16, Valu, Always, Promote32),
    rule!(Ushr, 16, Salu, Always, Promote32),
];

const BITS: [AluRule; 17] = [
    rule!(BitCount, 32, Salu, Always, Sop1(SBcnt1I32B32)),
    rule!(BitCount, 64, Salu, Always, Sop1(SBcnt1I32B64)),
    rule!(BitCount, 32, Valu, Always, Custom),
    rule!(BitCount, 64, Valu, Always, Custom),
    rule!(BitCount, 16, Valu, Always, Promote32),
    rule!(BitCount, 16, Salu, Always, Promote32),
    rule!(FindLsb, 32, Salu, Always, Sop1(SFf1I32B32)),
    rule!(FindLsb, 32, Valu, Always, Vop1(VFfblB32)),
    rule!(UfindMsb, 32, Salu, Always, Custom),
    rule!(UfindMsb, 32, Valu, Always, Custom),
    rule!(BitfieldReverse, 32, Salu, Always, Sop1(SBrevB32)),
    rule!(BitfieldReverse, 32, Valu, Always, Vop1(VBfrevB32)),
    rule!(Ubfe, 32, Salu, Always, Custom),
    rule!(Ubfe, 32, Valu, Always, Vop3(VBfeU32)),
    rule!(Ibfe, 32, Salu, Always, Custom),
    rule!(Ibfe, 32, Valu, Always, Vop3(VBfeI32)),
    rule!(Bfm, 32, Valu, Always, Vop3(VBfmB32)),
];

const BFM_SCALAR: AluRule = rule!(Bfm, 32, Salu, Always, Sop2(SBfmB32));

const FLOAT_ARITH: [AluRule; 28] = [
    rule!(Fadd, 32, Valu, Always, Vop2(VAddF32)),
    rule!(Fadd, 64, Valu, Always, Vop3(VAddF64)),
    packed!(Fadd, Packed16, Vop3p(VPkAddF16)),
    rule!(Fadd, 16, Valu, Vop16, Vop2(VAddF16)),
    rule!(Fsub, 32, Valu, Always, Vop2(VSubF32)),
    rule!(Fsub, 64, Valu, Always, Custom),
    packed!(Fsub, Packed16, Custom),
    rule!(Fsub, 16, Valu, Vop16, Vop2(VSubF16)),
    rule!(Fmul, 32, Valu, Always, Vop2(VMulF32)),
    rule!(Fmul, 64, Valu, Always, Vop3(VMulF64)),
    packed!(Fmul, Packed16, Vop3p(VPkMulF16)),
    rule!(Fmul, 16, Valu, Vop16, Vop2(VMulF16)),
    rule!(Ffma, 32, Valu, Always, Vop3(VFmaF32)),
    rule!(Ffma, 64, Valu, Always, Vop3(VFmaF64)),
    packed!(Ffma, Packed16, Vop3p(VPkFmaF16)),
    rule!(Ffma, 16, Valu, Gfx8, Vop3(VFmaF16)),
    rule!(Fmin, 32, Valu, Always, Vop2(VMinF32)),
    rule!(Fmin, 64, Valu, Always, Vop3(VMinF64)),
    packed!(Fmin, Packed16, Vop3p(VPkMinF16)),
    rule!(Fmin, 16, Valu, Vop16, Vop2(VMinF16)),
    rule!(Fmax, 32, Valu, Always, Vop2(VMaxF32)),
    rule!(Fmax, 64, Valu, Always, Vop3(VMaxF64)),
    packed!(Fmax, Packed16, Vop3p(VPkMaxF16)),
    rule!(Fmax, 16, Valu, Vop16, Vop2(VMaxF16)),
    rule!(Fneg, 32, Valu, Always, Custom),
    rule!(Fneg, 64, Valu, Always, Custom),
    rule!(Fabs, 32, Valu, Always, Custom),
    rule!(Fabs, 64, Valu, Always, Custom),
];

const FLOAT_MODS16: [AluRule; 6] = [
    rule!(Fneg, 16, Valu, Vop16, Custom),
    rule!(Fabs, 16, Valu, Vop16, Custom),
    rule!(Fsat, 16, Valu, Vop16, Custom),
    rule!(Fsat, 32, Valu, Always, Custom),
    rule!(Fsat, 64, Valu, Always, Custom),
    packed!(Fneg, Packed16, Custom),
];

const FLOAT_UNARY: [AluRule; 36] = [
    rule!(Frcp, 32, Valu, Always, Vop1(VRcpF32)),
    rule!(Frcp, 16, Valu, Vop16, Vop1(VRcpF16)),
    rule!(Frcp, 64, Valu, Always, Vop1(VRcpF64)),
    rule!(Frsq, 32, Valu, Always, Vop1(VRsqF32)),
    rule!(Frsq, 16, Valu, Vop16, Vop1(VRsqF16)),
    rule!(Frsq, 64, Valu, Always, Vop1(VRsqF64)),
    rule!(Fsqrt, 32, Valu, Always, Vop1(VSqrtF32)),
    rule!(Fsqrt, 16, Valu, Vop16, Vop1(VSqrtF16)),
    rule!(Fsqrt, 64, Valu, Always, Vop1(VSqrtF64)),
    rule!(Flog2, 32, Valu, Always, Vop1(VLogF32)),
    rule!(Flog2, 16, Valu, Vop16, Vop1(VLogF16)),
    rule!(Fexp2, 32, Valu, Always, Vop1(VExpF32)),
    rule!(Fexp2, 16, Valu, Vop16, Vop1(VExpF16)),
    rule!(Fsin, 32, Valu, Always, Custom),
    rule!(Fsin, 16, Valu, Vop16, Custom),
    rule!(Fcos, 32, Valu, Always, Custom),
    rule!(Fcos, 16, Valu, Vop16, Custom),
    rule!(Ffloor, 32, Valu, Always, Vop1(VFloorF32)),
    rule!(Ffloor, 16, Valu, Vop16, Vop1(VFloorF16)),
    rule!(Ffloor, 64, Valu, Gfx7, Vop1(VFloorF64)),
    rule!(Fceil, 32, Valu, Always, Vop1(VCeilF32)),
    rule!(Fceil, 16, Valu, Vop16, Vop1(VCeilF16)),
    rule!(Fceil, 64, Valu, Gfx7, Vop1(VCeilF64)),
    rule!(Ftrunc, 32, Valu, Always, Vop1(VTruncF32)),
    rule!(Ftrunc, 16, Valu, Vop16, Vop1(VTruncF16)),
    rule!(Ftrunc, 64, Valu, Gfx7, Vop1(VTruncF64)),
    rule!(FroundEven, 32, Valu, Always, Vop1(VRndneF32)),
    rule!(FroundEven, 16, Valu, Vop16, Vop1(VRndneF16)),
    rule!(FroundEven, 64, Valu, Gfx7, Vop1(VRndneF64)),
    rule!(Ffract, 32, Valu, Always, Vop1(VFractF32)),
    rule!(Ffract, 16, Valu, Vop16, Vop1(VFractF16)),
    rule!(Ffract, 64, Valu, Always, Vop1(VFractF64)),
    rule!(Fddx, 32, Valu, Always, Custom),
    rule!(Fddy, 32, Valu, Always, Custom),
    rule!(Fddx, 16, Valu, Vop16, Custom),
    rule!(Fddy, 16, Valu, Vop16, Custom),
];

const COMPARE: [AluRule; 62] = [
    /* Booleans compare with the uniform 0/1 encoding or as lane masks */
    rule!(Ieq, 1, Salu, Always, Sopc(SCmpEqU32)),
    rule!(Ine, 1, Salu, Always, Sopc(SCmpLgU32)),
    rule!(Ieq, 1, Valu, Always, Custom),
    rule!(Ine, 1, Valu, Always, LaneMask(WaveOp::SXor)),
    rule!(Ieq, 32, Salu, Always, Sopc(SCmpEqU32)),
    rule!(Ine, 32, Salu, Always, Sopc(SCmpLgU32)),
    rule!(Ilt, 32, Salu, Always, Sopc(SCmpLtI32)),
    rule!(Ige, 32, Salu, Always, Sopc(SCmpGeI32)),
    rule!(Ult, 32, Salu, Always, Sopc(SCmpLtU32)),
    rule!(Uge, 32, Salu, Always, Sopc(SCmpGeU32)),
    rule!(Ieq, 64, Salu, ScalarCmp64, Sopc(SCmpEqU64)),
    rule!(Ine, 64, Salu, ScalarCmp64, Sopc(SCmpLgU64)),
    rule!(Ieq, 16, Salu, Always, Promote32),
    rule!(Ine, 16, Salu, Always, Promote32),
    rule!(Ilt, 16, Salu, Always, Promote32),
    rule!(Ige, 16, Salu, Always, Promote32),
    rule!(Ult, 16, Salu, Always, Promote32),
    rule!(Uge, 16, Salu, Always, Promote32),
    rule!(Ieq, 8, Salu, Always, Promote32),
    rule!(Ine, 8, Salu, Always, Promote32),
    rule!(Ieq, 32, Valu, Always, Vopc(VCmpEqI32)),
    rule!(Ine, 32, Valu, Always, Vopc(VCmpLgI32)),
    rule!(Ilt, 32, Valu, Always, Vopc(VCmpLtI32)),
    rule!(Ige, 32, Valu, Always, Vopc(VCmpGeI32)),
    rule!(Ult, 32, Valu, Always, Vopc(VCmpLtU32)),
    rule!(Uge, 32, Valu, Always, Vopc(VCmpGeU32)),
    rule!(Ieq, 64, Valu, Always, Vopc(VCmpEqI64)),
    rule!(Ine, 64, Valu, Always, Vopc(VCmpLgI64)),
    rule!(Ilt, 64, Valu, Always, Vopc(VCmpLtI64)),
    rule!(Ige, 64, Valu, Always, Vopc(VCmpGeI64)),
    rule!(Ult, 64, Valu, Always, Vopc(VCmpLtU64)),
    rule!(Uge, 64, Valu, Always, Vopc(VCmpGeU64)),
    rule!(Ieq, 16, Valu, Vop16, Vopc(VCmpEqI16)),
    rule!(Ine, 16, Valu, Vop16, Vopc(VCmpLgI16)),
    rule!(Ilt, 16, Valu, Vop16, Vopc(VCmpLtI16)),
    rule!(Ige, 16, Valu, Vop16, Vopc(VCmpGeI16)),
    rule!(Ult, 16, Valu, Vop16, Vopc(VCmpLtU16)),
    rule!(Uge, 16, Valu, Vop16, Vopc(VCmpGeU16)),
    rule!(Ieq, 16, Valu, Always, Promote32),
    rule!(Ine, 16, Valu, Always, Promote32),
    rule!(Ilt, 16, Valu, Always, Promote32),
    rule!(Ige, 16, Valu, Always, Promote32),
    rule!(Ult, 16, Valu, Always, Promote32),
    rule!(Uge, 16, Valu, Always, Promote32),
    rule!(Ieq, 8, Valu, Always, Promote32),
    rule!(Ine, 8, Valu, Always, Promote32),
    rule!(Flt, 32, Valu, Always, Vopc(VCmpLtF32)),
    rule!(Fge, 32, Valu, Always, Vopc(VCmpGeF32)),
    rule!(Feq, 32, Valu, Always, Vopc(VCmpEqF32)),
    rule!(Fneu, 32, Valu, Always, Vopc(VCmpNeqF32)),
    rule!(Flt, 64, Valu, Always, Vopc(VCmpLtF64)),
    rule!(Fge, 64, Valu, Always, Vopc(VCmpGeF64)),
    rule!(Feq, 64, Valu, Always, Vopc(VCmpEqF64)),
    rule!(Fneu, 64, Valu, Always, Vopc(VCmpNeqF64)),
    rule!(Flt, 16, Valu, Vop16, Vopc(VCmpLtF16)),
    rule!(Fge, 16, Valu, Vop16, Vopc(VCmpGeF16)),
    rule!(Feq, 16, Valu, Vop16, Vopc(VCmpEqF16)),
    rule!(Fneu, 16, Valu, Vop16, Vopc(VCmpNeqF16)),
    rule!(I2b1, 32, Salu, Always, Custom),
    rule!(I2b1, 32, Valu, Always, Custom),
    rule!(I2b1, 64, Salu, Always, Custom),
    rule!(I2b1, 64, Valu, Always, Custom),
];

const SELECT: [AluRule; 12] = [
    rule!(Bcsel, 1, Salu, Always, Custom),
    rule!(Bcsel, 1, Valu, Always, Custom),
    rule!(Bcsel, 8, Valu, Always, Custom),
    rule!(Bcsel, 16, Valu, Always, Custom),
    rule!(Bcsel, 16, Salu, Always, Custom),
    rule!(Bcsel, 32, Salu, Always, Custom),
    rule!(Bcsel, 32, Valu, Always, Custom),
    rule!(Bcsel, 64, Salu, Always, Custom),
    rule!(Bcsel, 64, Valu, Always, Custom),
    rule!(B2i32, 1, Salu, Always, Custom),
    rule!(B2i32, 1, Valu, Always, Custom),
    rule!(B2f32, 1, Valu, Always, Custom),
];

const CONVERT: [AluRule; 23] = [
    rule!(I2f32, 32, Valu, Always, Vop1(VCvtF32I32)),
    rule!(I2f32, 16, Valu, Always, Promote32),
    rule!(I2f32, 8, Valu, Always, Promote32),
    rule!(U2f32, 32, Valu, Always, Vop1(VCvtF32U32)),
    rule!(U2f32, 16, Valu, Always, Promote32),
    rule!(U2f32, 8, Valu, Always, Promote32),
    rule!(F2i32, 32, Valu, Always, Vop1(VCvtI32F32)),
    rule!(F2i32, 64, Valu, Always, Vop1(VCvtI32F64)),
    rule!(F2i32, 16, Valu, Vop16, Custom),
    rule!(F2u32, 32, Valu, Always, Vop1(VCvtU32F32)),
    rule!(F2u32, 64, Valu, Always, Vop1(VCvtU32F64)),
    rule!(F2u32, 16, Valu, Vop16, Custom),
    rule!(I2f64, 32, Valu, Always, Vop1(VCvtF64I32)),
    rule!(U2f64, 32, Valu, Always, Vop1(VCvtF64U32)),
    rule!(F2f16, 32, Valu, Vop16, Vop1(VCvtF16F32)),
    rule!(F2f16, 64, Valu, Vop16, Custom),
    rule!(F2f32, 16, Valu, Vop16, Vop1(VCvtF32F16)),
    rule!(F2f32, 64, Valu, Always, Vop1(VCvtF32F64)),
    rule!(F2f32, 32, Valu, Always, Custom),
    rule!(F2f64, 32, Valu, Always, Vop1(VCvtF64F32)),
    rule!(F2f64, 16, Valu, Vop16, Custom),
    rule!(F2f64, 64, Valu, Always, Custom),
    rule!(PackHalf2x16, 32, Valu, Always, Custom),
];

/// Integer resizes all go through one emitter
const RESIZE_OPS: [AluOp; 8] = [
    AluOp::I2i8,
    AluOp::I2i16,
    AluOp::I2i32,
    AluOp::I2i64,
    AluOp::U2u8,
    AluOp::U2u16,
    AluOp::U2u32,
    AluOp::U2u64,
];

const TABLES: [&[AluRule]; 16] = [
    &INT_ADD,
    &INT_SUB,
    &INT_MUL,
    &INT_MINMAX,
    &INT_MISC,
    &INT_CARRY64,
    &BITWISE,
    &SHIFTS,
    &BITS,
    &[BFM_SCALAR],
    &FLOAT_ARITH,
    &FLOAT_MODS16,
    &FLOAT_UNARY,
    &COMPARE,
    &SELECT,
    &CONVERT,
];

/// Every rule, in preference order
pub fn rules() -> impl Iterator<Item = &'static AluRule> {
    TABLES.iter().flat_map(|t| t.iter())
}

/// Picks the implementation of `op`
///
/// `bits` is the width the op computes at: the source width for
/// comparisons and conversions, the result width otherwise.  Integer
/// resizes are always `Custom` and are not listed in the table.
pub fn select_alu_rule(
    op: AluOp,
    bits: u8,
    unit: Unit,
    packed: bool,
    options: &CompilerOptions,
) -> Option<Strategy> {
    if RESIZE_OPS.contains(&op) {
        return Some(Strategy::Custom);
    }
    rules()
        .find(|r| {
            r.op == op
                && r.bits == bits
                && r.unit == unit
                && r.packed == packed
                && r.requires.holds(options)
        })
        .map(|r| r.strategy)
}

/// Ops whose sub-dword operands are sign-extended when promoted to 32 bits
pub fn is_signed(op: AluOp) -> bool {
    matches!(
        op,
        AluOp::Imin
            | AluOp::Imax
            | AluOp::Ishr
            | AluOp::Ilt
            | AluOp::Ige
            | AluOp::Iabs
            | AluOp::I2f32
    )
}

/// Register type the opcode of a strategy reads and writes
pub fn strategy_unit(s: &Strategy) -> Option<Unit> {
    match s.opcode() {
        Some(op) if op.format().is_salu() => Some(Unit::Salu),
        Some(op) if op.format().is_valu() => Some(Unit::Valu),
        Some(_) => None,
        None => match s {
            /* Lane masks are scalar registers holding per-lane data */
            Strategy::LaneMask(_) => Some(Unit::Valu),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(chip: ChipClass) -> CompilerOptions {
        CompilerOptions::new(chip, 64).unwrap()
    }

    #[test]
    fn uniform_add_is_scalar() {
        let o = options(ChipClass::GFX9);
        assert_eq!(
            select_alu_rule(AluOp::Iadd, 32, Unit::Salu, false, &o),
            Some(Sop2(SAddU32))
        );
        assert_eq!(
            select_alu_rule(AluOp::Iadd, 32, Unit::Valu, false, &o),
            Some(Vop2(VAddU32))
        );
        let o = options(ChipClass::GFX8);
        assert_eq!(
            select_alu_rule(AluOp::Iadd, 32, Unit::Valu, false, &o),
            Some(Vop2Carry(VAddCoU32))
        );
    }

    #[test]
    fn packed_math_needs_the_feature() {
        let gfx9 = options(ChipClass::GFX9);
        let gfx8 = options(ChipClass::GFX8);
        assert_eq!(
            select_alu_rule(AluOp::Fadd, 16, Unit::Valu, true, &gfx9),
            Some(Vop3p(VPkAddF16))
        );
        assert_eq!(select_alu_rule(AluOp::Fadd, 16, Unit::Valu, true, &gfx8), None);
        assert_eq!(
            select_alu_rule(AluOp::Fadd, 16, Unit::Valu, false, &gfx8),
            Some(Vop2(VAddF16))
        );
    }

    #[test]
    fn narrow_integer_math_is_promoted_without_16bit_vop2() {
        let gfx7 = options(ChipClass::GFX7);
        assert_eq!(
            select_alu_rule(AluOp::Iadd, 16, Unit::Valu, false, &gfx7),
            Some(Promote32)
        );
        assert_eq!(
            select_alu_rule(AluOp::Ilt, 16, Unit::Valu, false, &gfx7),
            Some(Promote32)
        );
    }

    #[test]
    fn scalar_64bit_compares_depend_on_generation() {
        let gfx7 = options(ChipClass::GFX7);
        let gfx8 = options(ChipClass::GFX8);
        assert_eq!(select_alu_rule(AluOp::Ieq, 64, Unit::Salu, false, &gfx7), None);
        assert_eq!(
            select_alu_rule(AluOp::Ieq, 64, Unit::Salu, false, &gfx8),
            Some(Sopc(SCmpEqU64))
        );
        /* There is no scalar 64-bit ordered compare on any generation */
        assert_eq!(select_alu_rule(AluOp::Ilt, 64, Unit::Salu, false, &gfx8), None);
    }

    #[test]
    fn double_rounding_needs_gfx7() {
        assert_eq!(
            select_alu_rule(AluOp::Ffloor, 64, Unit::Valu, false, &options(ChipClass::GFX6)),
            None
        );
        assert_eq!(
            select_alu_rule(AluOp::Ffloor, 64, Unit::Valu, false, &options(ChipClass::GFX7)),
            Some(Vop1(VFloorF64))
        );
    }

    #[test]
    fn rule_opcodes_match_their_unit() {
        for r in rules() {
            if let Some(unit) = strategy_unit(&r.strategy) {
                assert_eq!(unit, r.unit, "{:?}", r);
            }
            if r.packed {
                assert!(r.bits == 16 && r.unit == Unit::Valu, "{:?}", r);
                if let Some(op) = r.strategy.opcode() {
                    assert_eq!(op.format(), Format::VOP3P, "{:?}", r);
                }
            }
        }
    }

    #[test]
    fn resizes_are_custom() {
        let o = options(ChipClass::GFX10);
        assert_eq!(select_alu_rule(AluOp::U2u64, 16, Unit::Valu, false, &o), Some(Custom));
    }
}
