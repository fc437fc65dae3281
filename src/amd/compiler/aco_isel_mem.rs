/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Load and store lowering shared by every kind of memory
//!
//! An access is first planned as a list of pieces, each of which one
//! hardware instruction can perform, and then emitted piece by piece.
//! Planning is pure so the byte coverage of a plan can be checked without
//! building a program.

use crate::aco_builder::Builder;
use crate::aco_ir::*;
use crate::aco_isel_alu::{emit_add32, emit_add64};
use crate::aco_isel_ctx::IselContext;
use crate::aco_isel_setup::{arg, load_ring_desc, RING_SCRATCH};
use crate::aco_options::CompilerOptions;
use crate::util::lowest_pow2_divisor;

/* Word 3 of the descriptor GFX6 uses for addr64 accesses: 32-bit float
 * data format, no swizzling.
 */
const ADDR64_RSRC_WORD3: u32 = 0x27000;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MemKind {
    /// Scalar loads through a 64-bit address or a buffer descriptor
    Smem,
    Lds,
    /// MUBUF through a buffer descriptor
    Buffer,
    /// 64-bit addresses: GLOBAL, FLAT or MUBUF addr64 depending on the chip
    Global,
    /// Per-lane private memory: SCRATCH, or MUBUF through the scratch ring
    Scratch,
}

/// How a kind of memory tolerates misaligned and narrow accesses
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemParams {
    pub byte_align_loads: bool,
    pub supports_8bit_16bit_loads: bool,
    /// Constant offsets at or above this are folded into the address
    pub max_const_offset_plus_one: u32,
}

impl MemKind {
    pub fn params(&self, options: &CompilerOptions) -> MemParams {
        let gfx10 = options.chip_class >= ChipClass::GFX10;
        match self {
            MemKind::Smem => MemParams {
                byte_align_loads: false,
                supports_8bit_16bit_loads: false,
                max_const_offset_plus_one: 1024,
            },
            MemKind::Lds => MemParams {
                byte_align_loads: options.has_native_byte_aligned_mem,
                supports_8bit_16bit_loads: true,
                max_const_offset_plus_one: 65536,
            },
            MemKind::Buffer => MemParams {
                byte_align_loads: true,
                supports_8bit_16bit_loads: true,
                max_const_offset_plus_one: 4096,
            },
            MemKind::Global => MemParams {
                byte_align_loads: true,
                supports_8bit_16bit_loads: true,
                max_const_offset_plus_one: if options.has_global {
                    if gfx10 {
                        2048
                    } else {
                        4096
                    }
                } else if options.has_flat {
                    /* FLAT has no offset field */
                    1
                } else {
                    4096
                },
            },
            MemKind::Scratch => MemParams {
                byte_align_loads: false,
                supports_8bit_16bit_loads: true,
                max_const_offset_plus_one: if options.has_scratch_insts && gfx10 {
                    2048
                } else {
                    4096
                },
            },
        }
    }

    /// Whether the access goes through a MUBUF instruction
    fn uses_mubuf(&self, options: &CompilerOptions) -> bool {
        match self {
            MemKind::Buffer => true,
            MemKind::Global => !options.has_global && !options.has_flat,
            MemKind::Scratch => !options.has_scratch_insts,
            MemKind::Smem | MemKind::Lds => false,
        }
    }
}

/* Load and store opcodes of the VMEM families, widest first */
type VmemOps = [(u32, Opcode, Opcode); 6];

const MUBUF_OPS: VmemOps = [
    (16, Opcode::BufferLoadDwordx4, Opcode::BufferStoreDwordx4),
    (12, Opcode::BufferLoadDwordx3, Opcode::BufferStoreDwordx3),
    (8, Opcode::BufferLoadDwordx2, Opcode::BufferStoreDwordx2),
    (4, Opcode::BufferLoadDword, Opcode::BufferStoreDword),
    (2, Opcode::BufferLoadUshort, Opcode::BufferStoreShort),
    (1, Opcode::BufferLoadUbyte, Opcode::BufferStoreByte),
];

const GLOBAL_OPS: VmemOps = [
    (16, Opcode::GlobalLoadDwordx4, Opcode::GlobalStoreDwordx4),
    (12, Opcode::GlobalLoadDwordx3, Opcode::GlobalStoreDwordx3),
    (8, Opcode::GlobalLoadDwordx2, Opcode::GlobalStoreDwordx2),
    (4, Opcode::GlobalLoadDword, Opcode::GlobalStoreDword),
    (2, Opcode::GlobalLoadUshort, Opcode::GlobalStoreShort),
    (1, Opcode::GlobalLoadUbyte, Opcode::GlobalStoreByte),
];

const FLAT_OPS: VmemOps = [
    (16, Opcode::FlatLoadDwordx4, Opcode::FlatStoreDwordx4),
    (12, Opcode::FlatLoadDwordx3, Opcode::FlatStoreDwordx3),
    (8, Opcode::FlatLoadDwordx2, Opcode::FlatStoreDwordx2),
    (4, Opcode::FlatLoadDword, Opcode::FlatStoreDword),
    (2, Opcode::FlatLoadUshort, Opcode::FlatStoreShort),
    (1, Opcode::FlatLoadUbyte, Opcode::FlatStoreByte),
];

const SCRATCH_OPS: VmemOps = [
    (16, Opcode::ScratchLoadDwordx4, Opcode::ScratchStoreDwordx4),
    (12, Opcode::ScratchLoadDwordx3, Opcode::ScratchStoreDwordx3),
    (8, Opcode::ScratchLoadDwordx2, Opcode::ScratchStoreDwordx2),
    (4, Opcode::ScratchLoadDword, Opcode::ScratchStoreDword),
    (2, Opcode::ScratchLoadUshort, Opcode::ScratchStoreShort),
    (1, Opcode::ScratchLoadUbyte, Opcode::ScratchStoreByte),
];

fn vmem_ops(kind: MemKind, options: &CompilerOptions) -> &'static VmemOps {
    match vmem_format(kind, options) {
        Format::MUBUF => &MUBUF_OPS,
        Format::GLOBAL => &GLOBAL_OPS,
        Format::FLAT => &FLAT_OPS,
        Format::SCRATCH => &SCRATCH_OPS,
        _ => unreachable!(),
    }
}

/// Known alignment of `offset` bytes past an address aligned as
/// `align_mul`/`align_offset`
fn alignment_at(align_mul: u32, align_offset: u32, offset: u32) -> u32 {
    let off = align_offset.wrapping_add(offset) % align_mul;
    if off == 0 {
        align_mul
    } else {
        lowest_pow2_divisor(off)
    }
}

/// Picks the widest load of `kind` for at most `bytes` bytes at the given
/// alignment, returning the opcode and the bytes it reads
///
/// Scalar loads may read past `bytes` up to the next supported size.
pub fn pick_load(
    kind: MemKind,
    options: &CompilerOptions,
    bytes: u32,
    align: u32,
    imm: u32,
) -> (Opcode, u32) {
    let chip = options.chip_class;
    match kind {
        MemKind::Smem => match bytes {
            0..=4 => (Opcode::SLoadDword, 4),
            5..=8 => (Opcode::SLoadDwordx2, 8),
            9..=16 => (Opcode::SLoadDwordx4, 16),
            17..=32 => (Opcode::SLoadDwordx8, 32),
            _ => (Opcode::SLoadDwordx16, 64),
        },
        MemKind::Lds => {
            let wide = chip >= ChipClass::GFX7;
            let unaligned = options.has_native_byte_aligned_mem;
            let aligned = |a: u32| unaligned || align % a == 0;
            /* read2 offsets are 8 bits in units of the element size */
            let read2 = |elem: u32| imm % elem == 0 && imm / elem < 255;
            if bytes >= 16 && aligned(16) && wide {
                (Opcode::DsReadB128, 16)
            } else if bytes >= 16 && aligned(8) && read2(8) {
                (Opcode::DsRead2B64, 16)
            } else if bytes >= 12 && aligned(16) && wide {
                (Opcode::DsReadB96, 12)
            } else if bytes >= 8 && aligned(8) {
                (Opcode::DsReadB64, 8)
            } else if bytes >= 8 && aligned(4) && read2(4) {
                (Opcode::DsRead2B32, 8)
            } else if bytes >= 4 && aligned(4) {
                (Opcode::DsReadB32, 4)
            } else if bytes >= 2 && aligned(2) {
                (Opcode::DsReadU16, 2)
            } else {
                (Opcode::DsReadU8, 1)
            }
        }
        MemKind::Buffer | MemKind::Global | MemKind::Scratch => {
            let byte_align = kind.params(options).byte_align_loads;
            let no_x3 = chip == ChipClass::GFX6 && kind.uses_mubuf(options);
            let ops = vmem_ops(kind, options);
            ops.iter()
                .find(|(size, _, _)| {
                    *size <= bytes
                        && (byte_align || align % (*size).min(4) == 0)
                        && !(*size == 12 && no_x3)
                })
                .map(|(size, op, _)| (*op, *size))
                .unwrap_or((ops[5].1, 1))
        }
    }
}

/// Bytes dropped from the front of a piece to reach the requested data
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Skip {
    Const(u32),
    /// The low two bits of the runtime address; the address itself is
    /// rounded down to a dword before the access
    Dynamic,
}

/// One instruction of a planned load
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoadPiece {
    /// Added to the dynamic address before the access
    pub fold: i64,
    /// Encoded in the instruction's offset field
    pub imm: u32,
    pub op: Opcode,
    /// Bytes the instruction reads
    pub size: u32,
    pub skip: Skip,
    /// Requested bytes this piece provides
    pub keep: u32,
}

impl LoadPiece {
    /// Offset of the first byte read, relative to the dynamic address
    pub fn start(&self) -> i64 {
        self.fold + i64::from(self.imm)
    }
}

/// Splits a constant offset into the part added to the address and the
/// part encoded in the instruction
fn fold_offset(offset: i64, max_plus_one: u32) -> (i64, u32) {
    let max = i64::from(max_plus_one);
    let imm = offset.rem_euclid(max);
    (offset - imm, imm as u32)
}

/// Plans a load of `bytes` bytes at `const_offset` past a dynamic address
/// aligned as `align_mul`/`align_offset`
///
/// The alignment describes the address including `const_offset`.
pub fn plan_load(
    kind: MemKind,
    options: &CompilerOptions,
    const_offset: u32,
    align_mul: u32,
    align_offset: u32,
    bytes: u32,
) -> Vec<LoadPiece> {
    let params = kind.params(options);
    let align_mul = align_mul.max(1);
    let mut pieces = Vec::new();
    let mut read = 0;
    while read < bytes {
        let needed = bytes - read;
        let pos = i64::from(const_offset) + i64::from(read);
        let mut align = alignment_at(align_mul, align_offset, read);

        let misaligned = align % 4 != 0
            && !params.byte_align_loads
            && (needed > 2 || (needed == 2 && align % 2 != 0) || !params.supports_8bit_16bit_loads);

        let (start, mut size_needed, skip) = if misaligned {
            align = 4;
            if align_mul % 4 == 0 {
                let m = (align_offset + read) % 4;
                (pos - i64::from(m), (needed + m).next_multiple_of(4), Skip::Const(m))
            } else {
                (pos, (needed + 3).next_multiple_of(4), Skip::Dynamic)
            }
        } else {
            (pos, needed, Skip::Const(0))
        };
        if align % 4 == 0
            && size_needed % 4 != 0
            && (size_needed > 2 || !params.supports_8bit_16bit_loads)
        {
            /* The rest of the last dword is readable */
            size_needed = size_needed.next_multiple_of(4);
        }

        let (fold, imm) = match skip {
            Skip::Dynamic => (start, 0),
            Skip::Const(_) => fold_offset(start, params.max_const_offset_plus_one),
        };
        let (op, size) = pick_load(kind, options, size_needed, align, imm);

        let avail = match skip {
            Skip::Const(s) => size - s,
            Skip::Dynamic => size - 3,
        };
        let mut keep = needed.min(avail);
        if keep < needed && keep >= 4 {
            /* Pieces after this one start on a dword of the result */
            keep -= keep % 4;
        }
        pieces.push(LoadPiece {
            fold: fold,
            imm: imm,
            op: op,
            size: size,
            skip: skip,
            keep: keep,
        });
        read += keep;
    }
    pieces
}

/// A memory access as the intrinsic emitters describe it
#[derive(Clone, Debug)]
pub struct MemAccess {
    pub kind: MemKind,
    /// Dynamic address or offset
    pub offset: Option<Temp>,
    /// Buffer descriptor, or the base address of scalar loads
    pub resource: Option<Temp>,
    /// Scalar offset of MUBUF accesses
    pub soffset: Option<Operand>,
    pub const_offset: u32,
    pub align_mul: u32,
    pub align_offset: u32,
    pub component_size: u32,
    pub num_components: u32,
    pub sync: MemorySyncInfo,
    pub glc: bool,
    pub slc: bool,
    pub swizzled: bool,
}

impl MemAccess {
    pub fn new(
        kind: MemKind,
        offset: Option<Temp>,
        component_size: u32,
        num_components: u32,
    ) -> MemAccess {
        MemAccess {
            kind: kind,
            offset: offset,
            resource: None,
            soffset: None,
            const_offset: 0,
            align_mul: component_size,
            align_offset: 0,
            component_size: component_size,
            num_components: num_components,
            sync: MemorySyncInfo::default(),
            glc: false,
            slc: false,
            swizzled: false,
        }
    }

    pub fn bytes(&self) -> u32 {
        self.component_size * self.num_components
    }

    /// Alignment of the full address
    ///
    /// Without a dynamic offset the address is the constant offset past a
    /// base which is at least dword aligned.
    fn alignment(&self) -> (u32, u32) {
        if self.offset.is_none() && self.align_mul < 4 {
            (4, self.const_offset % 4)
        } else {
            (self.align_mul.max(1), self.align_offset)
        }
    }
}

fn perf_warn(ctx: &IselContext, msg: &str) {
    if ctx.options.debug.perf_warn {
        tracing::warn!(target: "aco::perfwarn", "{}", msg);
    }
}

/// Adds a folded constant to the dynamic address
fn address_with(ctx: &mut IselContext, access: &MemAccess, fold: i64) -> Option<Temp> {
    if fold == 0 {
        return access.offset;
    }
    match access.offset {
        Some(t) if t.size() == 2 => Some(emit_add64(ctx, t, Operand::c64(fold as u64))),
        Some(t) => Some(emit_add32(ctx, t, Operand::c32(fold as u32))),
        None => {
            let rc = if access.kind == MemKind::Smem {
                RegClass::S1
            } else {
                RegClass::V1
            };
            Some(ctx.copy(rc, Operand::c32(fold as u32)))
        }
    }
}

fn low_dword(ctx: &mut IselContext, addr: Temp) -> Temp {
    if addr.size() == 2 {
        let rc = RegClass::new(addr.reg_type(), 1);
        ctx.emit_extract_vector(addr, 0, rc)
    } else {
        addr
    }
}

/// Rounds an address down to a dword
fn align_down(ctx: &mut IselContext, addr: Temp) -> Temp {
    let lo = low_dword(ctx, addr);
    let mask = Operand::c32(!3);
    let aligned = if lo.reg_type() == RegType::SGPR {
        ctx.sop2(Opcode::SAndB32, RegClass::S1, lo, mask)
    } else {
        ctx.vop2(Opcode::VAndB32, RegClass::V1, mask, lo)
    };
    if addr.size() == 2 {
        let hi = ctx.emit_extract_vector(addr, 1, RegClass::new(addr.reg_type(), 1));
        ctx.create_vector_cached(addr.reg_class(), vec![aligned, hi])
    } else {
        aligned
    }
}

fn smem_buffer_op(op: Opcode) -> Opcode {
    match op {
        Opcode::SLoadDword => Opcode::SBufferLoadDword,
        Opcode::SLoadDwordx2 => Opcode::SBufferLoadDwordx2,
        Opcode::SLoadDwordx4 => Opcode::SBufferLoadDwordx4,
        Opcode::SLoadDwordx8 => Opcode::SBufferLoadDwordx8,
        Opcode::SLoadDwordx16 => Opcode::SBufferLoadDwordx16,
        _ => panic!("{} has no buffer form", op),
    }
}

/// m0 holds the LDS size limit before GFX9
pub fn lds_m0(ctx: &mut IselContext) -> Option<Operand> {
    if ctx.program.chip_class >= ChipClass::GFX9 {
        return None;
    }
    let m0 = ctx.copy(RegClass::S1, Operand::c32(u32::MAX));
    Some(Operand::m0(m0))
}

fn vaddr(ctx: &mut IselContext, addr: Option<Temp>, rc: RegClass) -> Operand {
    match addr {
        Some(a) => ctx.as_vgpr(a).into(),
        None => Operand::undef(rc),
    }
}

fn addr64_rsrc(ctx: &mut IselContext) -> Temp {
    ctx.create_vector(
        RegClass::S4,
        vec![
            Operand::c32(0),
            Operand::c32(0),
            Operand::c32(u32::MAX),
            Operand::c32(ADDR64_RSRC_WORD3),
        ],
    )
}

/// Encoding a VMEM access of `kind` uses
pub fn vmem_format(kind: MemKind, options: &CompilerOptions) -> Format {
    if kind.uses_mubuf(options) {
        return Format::MUBUF;
    }
    match kind {
        MemKind::Global if options.has_global => Format::GLOBAL,
        MemKind::Global => Format::FLAT,
        MemKind::Scratch => Format::SCRATCH,
        _ => panic!("{:?} is not a VMEM kind", kind),
    }
}

/// Operands and modifiers of a VMEM access, `data` is appended for stores
fn emit_vmem(
    ctx: &mut IselContext,
    access: &MemAccess,
    op: Opcode,
    rc: Option<RegClass>,
    addr: Option<Temp>,
    imm: u32,
    data: Option<Temp>,
) -> Option<Temp> {
    let mut ops = match op.format() {
        Format::MUBUF => {
            let (rsrc, voffset, soffset, addr64) = match access.kind {
                MemKind::Global => {
                    let rsrc = addr64_rsrc(ctx);
                    let Some(a) = addr else {
                        panic!("Global access without an address");
                    };
                    (rsrc, Operand::from(ctx.as_vgpr(a)), Operand::c32(0), true)
                }
                MemKind::Scratch => {
                    let rsrc = load_ring_desc(ctx, RING_SCRATCH);
                    let soffset = arg(ctx.args.scratch_offset, "scratch_offset");
                    (rsrc, vaddr(ctx, addr, RegClass::V1), soffset.into(), false)
                }
                _ => {
                    let Some(rsrc) = access.resource else {
                        panic!("Buffer access without a descriptor");
                    };
                    let soffset = access.soffset.unwrap_or(Operand::c32(0));
                    (rsrc, vaddr(ctx, addr, RegClass::V1), soffset, false)
                }
            };
            let offen = !addr64 && !voffset.is_undef();
            let info = MubufInfo {
                sync: access.sync,
                offset: imm as u16,
                offen: offen,
                idxen: false,
                addr64: addr64,
                glc: access.glc,
                dlc: false,
                slc: access.slc,
                swizzled: access.swizzled || access.kind == MemKind::Scratch,
            };
            let mut ops = vec![rsrc.into(), voffset, soffset];
            if let Some(d) = data {
                ops.push(d.into());
            }
            return ctx.mem(op, rc, ops, info);
        }
        Format::GLOBAL | Format::FLAT => {
            let Some(a) = addr else {
                panic!("Global access without an address");
            };
            vec![ctx.as_vgpr(a).into(), Operand::undef(RegClass::S1)]
        }
        Format::SCRATCH => vec![vaddr(ctx, addr, RegClass::V1), Operand::undef(RegClass::S1)],
        f => panic!("{} is not a VMEM format", f),
    };
    if let Some(d) = data {
        ops.push(d.into());
    }
    let info = FlatInfo {
        sync: access.sync,
        offset: imm as i16,
        glc: access.glc,
        dlc: false,
        slc: access.slc,
        nv: false,
    };
    ctx.mem(op, rc, ops, info)
}

fn load_class(kind: MemKind, size: u32) -> RegClass {
    match kind {
        MemKind::Smem => RegClass::new(RegType::SGPR, size / 4),
        /* Byte and short loads zero-extend into a dword */
        _ => RegClass::new(RegType::VGPR, size.div_ceil(4)),
    }
}

fn emit_piece(
    ctx: &mut IselContext,
    access: &MemAccess,
    piece: &LoadPiece,
    addr: Option<Temp>,
) -> Temp {
    let rc = load_class(access.kind, piece.size);
    match access.kind {
        MemKind::Smem => {
            let Some(base) = access.resource else {
                panic!("Scalar load without a base");
            };
            let op = if base.size() == 4 {
                smem_buffer_op(piece.op)
            } else {
                piece.op
            };
            let offset = match addr {
                Some(a) => {
                    assert!(a.reg_type() == RegType::SGPR);
                    if piece.imm != 0 {
                        ctx.sop2(Opcode::SAddU32, RegClass::S1, a, Operand::c32(piece.imm))
                            .into()
                    } else {
                        a.into()
                    }
                }
                None => Operand::c32(piece.imm),
            };
            let info = SmemInfo {
                sync: access.sync,
                glc: access.glc,
                dlc: false,
                nv: false,
            };
            ctx.smem(op, rc, vec![base.into(), offset], info)
        }
        MemKind::Lds => {
            let addr = match addr {
                Some(a) => ctx.as_vgpr(a),
                None => ctx.copy(RegClass::V1, Operand::c32(0)),
            };
            let (offset0, offset1) = match piece.op {
                Opcode::DsRead2B64 => (piece.imm / 8, piece.imm / 8 + 1),
                Opcode::DsRead2B32 => (piece.imm / 4, piece.imm / 4 + 1),
                _ => (piece.imm, 0),
            };
            let mut ops = vec![addr.into()];
            ops.extend(lds_m0(ctx));
            let info = DsInfo {
                sync: access.sync,
                offset0: offset0 as u16,
                offset1: offset1 as u8,
                gds: false,
            };
            match ctx.mem(piece.op, Some(rc), ops, info) {
                Some(t) => t,
                None => unreachable!(),
            }
        }
        _ => match emit_vmem(ctx, access, piece.op, Some(rc), addr, piece.imm, None) {
            Some(t) => t,
            None => unreachable!(),
        },
    }
}

/// Shifts a run of scalar dwords right by `bits`
fn shift_scalar(ctx: &mut IselContext, dwords: &[Temp], bits: Operand) -> Vec<Temp> {
    (0..dwords.len())
        .map(|i| {
            let hi: Operand = match dwords.get(i + 1) {
                Some(t) => (*t).into(),
                None => Operand::c32(0),
            };
            let pair = ctx.create_vector(RegClass::S2, vec![dwords[i].into(), hi]);
            let r = ctx.sop2(Opcode::SLshrB64, RegClass::S2, pair, bits);
            ctx.emit_extract_vector(r, 0, RegClass::S1)
        })
        .collect()
}

fn dwords_of(ctx: &mut IselContext, val: Temp) -> Vec<Temp> {
    if val.size() == 1 {
        vec![val]
    } else {
        ctx.emit_split_vector(val, val.size())
    }
}

/// Bytes `[skip, skip + keep)` of a VGPR value
pub fn extract_bytes(ctx: &mut IselContext, val: Temp, skip: u32, keep: u32) -> Temp {
    if skip == 0 && keep == val.bytes() {
        return val;
    }
    assert!(skip + keep <= val.bytes());
    let rc = RegClass::get(RegType::VGPR, keep);
    if skip % keep == 0 && val.bytes() % keep == 0 && keep.is_power_of_two() {
        return ctx.emit_extract_vector(val, skip / keep, rc);
    }
    if skip % 4 == 0 && keep % 4 == 0 {
        let dwords = dwords_of(ctx, val);
        let range = (skip / 4) as usize..((skip + keep) / 4) as usize;
        return ctx.create_vector_cached(rc, dwords[range].to_vec());
    }
    let bytes = ctx.emit_split_vector(val, val.bytes());
    let range = skip as usize..(skip + keep) as usize;
    ctx.create_vector_cached(rc, bytes[range].to_vec())
}

/// Drops the bytes a piece read around the requested ones
fn trim_load(ctx: &mut IselContext, val: Temp, skip: Skip, addr: Option<Temp>, keep: u32) -> Temp {
    if val.reg_type() == RegType::VGPR {
        return match skip {
            Skip::Const(s) => extract_bytes(ctx, val, s, keep),
            Skip::Dynamic => {
                let Some(addr) = addr else {
                    panic!("Dynamic realignment without an address");
                };
                /* v_alignbyte_b32 only reads the low two bits */
                let shift = low_dword(ctx, addr);
                let dwords = dwords_of(ctx, val);
                let parts: Vec<Temp> = (0..dwords.len())
                    .map(|i| {
                        let hi: Operand = match dwords.get(i + 1) {
                            Some(t) => (*t).into(),
                            None => Operand::c32(0),
                        };
                        ctx.vop3(
                            Opcode::VAlignbyteB32,
                            RegClass::V1,
                            vec![hi, dwords[i].into(), shift.into()],
                        )
                    })
                    .collect();
                let joined = ctx.create_vector_cached(val.reg_class(), parts);
                extract_bytes(ctx, joined, 0, keep)
            }
        };
    }

    let dwords = dwords_of(ctx, val);
    let shifted = match skip {
        Skip::Const(s) if s % 4 == 0 => dwords[(s / 4) as usize..].to_vec(),
        Skip::Const(s) => {
            let from = &dwords[(s / 4) as usize..];
            shift_scalar(ctx, from, Operand::c32((s % 4) * 8))
        }
        Skip::Dynamic => {
            let Some(addr) = addr else {
                panic!("Dynamic realignment without an address");
            };
            let lo = low_dword(ctx, addr);
            let m = ctx.sop2(Opcode::SAndB32, RegClass::S1, lo, Operand::c32(3));
            let bits = ctx.sop2(Opcode::SLshlB32, RegClass::S1, m, Operand::c32(3));
            shift_scalar(ctx, &dwords, bits.into())
        }
    };
    let n = keep.div_ceil(4) as usize;
    ctx.create_vector_cached(RegClass::new(RegType::SGPR, n as u32), shifted[..n].to_vec())
}

/// Joins loaded pieces into a value of class `dst_rc`
fn assemble(
    ctx: &mut IselContext,
    vals: Vec<(Temp, u32)>,
    component_size: u32,
    dst_rc: RegClass,
) -> Temp {
    if vals.iter().all(|(v, _)| v.reg_type() == RegType::SGPR) {
        let mut dwords = Vec::new();
        for (v, _) in &vals {
            dwords.extend(dwords_of(ctx, *v));
        }
        let rc = RegClass::new(RegType::SGPR, dwords.len() as u32);
        let res = ctx.create_vector_cached(rc, dwords);
        if dst_rc.reg_type() == RegType::VGPR {
            let v = ctx.as_vgpr(res);
            return extract_bytes(ctx, v, 0, dst_rc.bytes());
        }
        return res;
    }

    /* Group pieces into whole components */
    let mut comps: Vec<Temp> = Vec::new();
    let mut group: Vec<Temp> = Vec::new();
    let mut group_bytes = 0;
    for (v, keep) in vals {
        let v = ctx.as_vgpr(v);
        let v = extract_bytes(ctx, v, 0, keep);
        group.push(v);
        group_bytes += keep;
        if group_bytes % component_size != 0 {
            continue;
        }
        let joined = if group.len() == 1 {
            group[0]
        } else {
            let rc = RegClass::get(RegType::VGPR, group_bytes);
            ctx.create_vector_cached(rc, std::mem::take(&mut group))
        };
        group.clear();
        let n = group_bytes / component_size;
        if n == 1 {
            comps.push(joined);
        } else {
            comps.extend(ctx.emit_split_vector(joined, n));
        }
        group_bytes = 0;
    }
    assert!(group.is_empty(), "Load ended inside a component");

    let total: u32 = comps.iter().map(|c| c.bytes()).sum();
    let vrc = RegClass::get(RegType::VGPR, total);
    let res = ctx.create_vector_cached(vrc, comps);
    if dst_rc.reg_type() == RegType::VGPR {
        return res;
    }

    /* Uniform destination of a per-lane load */
    let res = if total % 4 != 0 {
        let pad = RegClass::get(RegType::VGPR, 4 - total % 4);
        let rc = RegClass::get(RegType::VGPR, total.next_multiple_of(4));
        ctx.create_vector(rc, vec![res.into(), Operand::undef(pad)])
    } else {
        res
    };
    ctx.as_uniform(res)
}

/// Loads `access.bytes()` bytes into a value of class `dst_rc`
pub fn emit_load(ctx: &mut IselContext, access: &MemAccess, dst_rc: RegClass) -> Temp {
    let (align_mul, align_offset) = access.alignment();
    let plan = plan_load(
        access.kind,
        ctx.options,
        access.const_offset,
        align_mul,
        align_offset,
        access.bytes(),
    );
    if plan.iter().any(|p| p.skip != Skip::Const(0)) {
        perf_warn(ctx, "Realigning a misaligned load");
    }

    let mut vals = Vec::new();
    for piece in &plan {
        let addr = address_with(ctx, access, piece.fold);
        let access_addr = match (piece.skip, addr) {
            (Skip::Dynamic, Some(a)) => Some(align_down(ctx, a)),
            _ => addr,
        };
        let raw = emit_piece(ctx, access, piece, access_addr);
        let val = trim_load(ctx, raw, piece.skip, addr, piece.keep);
        vals.push((val, piece.keep));
    }
    assemble(ctx, vals, access.component_size, dst_rc)
}

/// A run of bytes written by one store
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StoreChunk {
    pub offset: u32,
    pub bytes: u32,
    /// Masked-out bytes which are only stepped over
    pub skip: bool,
}

/// Splits the components of a store selected by `write_mask` into runs
/// which one instruction can write
///
/// `max_store(bytes, align)` returns the widest legal store of at most
/// `bytes` bytes at that alignment.
pub fn split_buffer_store(
    write_mask: u32,
    elem_bytes: u32,
    num_elems: u32,
    align_mul: u32,
    align_offset: u32,
    max_store: impl Fn(u32, u32) -> u32,
) -> Vec<StoreChunk> {
    let total = elem_bytes * num_elems;
    assert!(total <= 64);
    let written = |byte: u32| write_mask & (1 << (byte / elem_bytes)) != 0;
    let align_mul = align_mul.max(1);

    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < total {
        let set = written(pos);
        let run = (pos..total).take_while(|b| written(*b) == set).count() as u32;
        if !set {
            chunks.push(StoreChunk {
                offset: pos,
                bytes: run,
                skip: true,
            });
            pos += run;
            continue;
        }
        let align = alignment_at(align_mul, align_offset, pos);
        let bytes = max_store(run, align).clamp(1, run);
        chunks.push(StoreChunk {
            offset: pos,
            bytes: bytes,
            skip: false,
        });
        pos += bytes;
    }
    chunks
}

/// Widest store of `kind` for `bytes` bytes at alignment `align`
pub fn max_store_bytes(kind: MemKind, options: &CompilerOptions, bytes: u32, align: u32) -> u32 {
    let native = options.has_native_byte_aligned_mem;
    let aligned = |a: u32| native || align % a == 0;
    let sizes: &[u32] = match kind {
        MemKind::Smem => panic!("Scalar stores are not supported"),
        MemKind::Lds if options.chip_class >= ChipClass::GFX7 => &[16, 12, 8, 4, 2, 1],
        MemKind::Lds => &[8, 4, 2, 1],
        _ if kind.uses_mubuf(options) && options.chip_class == ChipClass::GFX6 => &[16, 8, 4, 2, 1],
        _ => &[16, 12, 8, 4, 2, 1],
    };
    sizes
        .iter()
        .copied()
        .find(|s| {
            let need = match (kind, *s) {
                (MemKind::Lds, 16 | 12) => 16,
                (MemKind::Lds, 8) => 8,
                (_, s) => s.min(4),
            };
            *s <= bytes && aligned(need)
        })
        .unwrap_or(1)
}

fn store_op(kind: MemKind, options: &CompilerOptions, bytes: u32) -> Opcode {
    if kind == MemKind::Lds {
        return match bytes {
            16 => Opcode::DsWriteB128,
            12 => Opcode::DsWriteB96,
            8 => Opcode::DsWriteB64,
            4 => Opcode::DsWriteB32,
            2 => Opcode::DsWriteB16,
            1 => Opcode::DsWriteB8,
            _ => panic!("No {}-byte LDS store", bytes),
        };
    }
    match vmem_ops(kind, options).iter().find(|(s, _, _)| *s == bytes) {
        Some((_, _, op)) => *op,
        None => panic!("No {}-byte store for {:?}", bytes, kind),
    }
}

/// Stores the components of `data` selected by `write_mask`
pub fn emit_store(ctx: &mut IselContext, access: &MemAccess, data: Temp, write_mask: u32) {
    let (align_mul, align_offset) = access.alignment();
    let options = ctx.options;
    let chunks = split_buffer_store(
        write_mask,
        access.component_size,
        access.num_components,
        align_mul,
        align_offset,
        |bytes, align| max_store_bytes(access.kind, options, bytes, align),
    );
    let params = access.kind.params(options);
    let data = ctx.as_vgpr(data);

    for chunk in chunks.iter().filter(|c| !c.skip) {
        let val = extract_bytes(ctx, data, chunk.offset, chunk.bytes);
        let op = store_op(access.kind, options, chunk.bytes);
        let start = i64::from(access.const_offset) + i64::from(chunk.offset);
        let (fold, imm) = fold_offset(start, params.max_const_offset_plus_one);
        let addr = address_with(ctx, access, fold);

        if access.kind == MemKind::Lds {
            let addr = match addr {
                Some(a) => ctx.as_vgpr(a),
                None => ctx.copy(RegClass::V1, Operand::c32(0)),
            };
            let mut ops = vec![addr.into(), val.into()];
            ops.extend(lds_m0(ctx));
            let info = DsInfo {
                sync: access.sync,
                offset0: imm as u16,
                offset1: 0,
                gds: false,
            };
            ctx.mem(op, None, ops, info);
        } else {
            emit_vmem(ctx, access, op, None, addr, imm, Some(val));
        }
    }
}

/// Emits a VMEM atomic at the address of `access`
///
/// `data` is the source operand, with the comparison value packed after
/// it for compare-and-swap.  Returning atomics must set `access.glc`.
pub fn emit_vmem_atomic(
    ctx: &mut IselContext,
    access: &MemAccess,
    op: Opcode,
    data: Temp,
    rc: Option<RegClass>,
) -> Option<Temp> {
    let params = access.kind.params(ctx.options);
    let (fold, imm) = fold_offset(
        i64::from(access.const_offset),
        params.max_const_offset_plus_one,
    );
    let addr = address_with(ctx, access, fold);
    let data = ctx.as_vgpr(data);
    emit_vmem(ctx, access, op, rc, addr, imm, Some(data))
}

/// Stores to LDS at `address + const_offset`
#[allow(clippy::too_many_arguments)]
pub fn store_lds(
    ctx: &mut IselContext,
    data: Temp,
    address: Option<Temp>,
    const_offset: u32,
    elem_bytes: u32,
    write_mask: u32,
    align_mul: u32,
    align_offset: u32,
) {
    let num_elems = data.bytes() / elem_bytes;
    let mut access = MemAccess::new(MemKind::Lds, address, elem_bytes, num_elems);
    access.const_offset = const_offset;
    access.align_mul = align_mul;
    access.align_offset = align_offset;
    access.sync = MemorySyncInfo::storage(Storage::SHARED);
    emit_store(ctx, &access, data, write_mask);
}

/// Loads `num_components` components from LDS at `address + const_offset`
pub fn load_lds(
    ctx: &mut IselContext,
    dst_rc: RegClass,
    address: Option<Temp>,
    const_offset: u32,
    elem_bytes: u32,
    num_components: u32,
    align_mul: u32,
    align_offset: u32,
) -> Temp {
    let mut access = MemAccess::new(MemKind::Lds, address, elem_bytes, num_components);
    access.const_offset = const_offset;
    access.align_mul = align_mul;
    access.align_offset = align_offset;
    access.sync = MemorySyncInfo::storage(Storage::SHARED);
    emit_load(ctx, &access, dst_rc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(chip: ChipClass) -> CompilerOptions {
        CompilerOptions::new(chip, 64).unwrap()
    }

    #[test]
    fn aligned_three_byte_lds_load_is_one_dword() {
        let o = options(ChipClass::GFX9);
        let plan = plan_load(MemKind::Lds, &o, 8, 4, 0, 3);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].op, Opcode::DsReadB32);
        assert_eq!(plan[0].keep, 3);
    }

    #[test]
    fn misaligned_scalar_load_is_realigned() {
        let o = options(ChipClass::GFX8);
        let plan = plan_load(MemKind::Smem, &o, 6, 4, 2, 8);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].skip, Skip::Const(2));
        assert_eq!(plan[0].start(), 4);
        assert_eq!(plan[0].op, Opcode::SLoadDwordx4);
    }

    #[test]
    fn large_offsets_are_folded() {
        let o = options(ChipClass::GFX9);
        let plan = plan_load(MemKind::Buffer, &o, 5000, 4, 0, 4);
        assert_eq!(plan[0].fold, 4096);
        assert_eq!(plan[0].imm, 904);

        let flat = options(ChipClass::GFX8);
        let plan = plan_load(MemKind::Global, &flat, 16, 4, 0, 4);
        assert_eq!((plan[0].fold, plan[0].imm), (16, 0));
        assert_eq!(plan[0].op, Opcode::FlatLoadDword);
    }

    #[test]
    fn unknown_alignment_realigns_at_runtime() {
        let o = options(ChipClass::GFX8);
        let plan = plan_load(MemKind::Lds, &o, 0, 1, 0, 4);
        assert_eq!(plan[0].skip, Skip::Dynamic);
        assert!(plan[0].size >= 4 + 3);
        assert_eq!(plan.iter().map(|p| p.keep).sum::<u32>(), 4);
    }

    #[test]
    fn gfx6_buffers_have_no_dwordx3() {
        let o = options(ChipClass::GFX6);
        let plan = plan_load(MemKind::Buffer, &o, 0, 4, 0, 12);
        assert!(plan.iter().all(|p| p.op != Opcode::BufferLoadDwordx3));
        assert_eq!(plan.iter().map(|p| p.keep).sum::<u32>(), 12);
    }

    #[test]
    fn store_split_skips_masked_components() {
        let o = options(ChipClass::GFX8);
        let chunks = split_buffer_store(0b1011, 4, 4, 4, 0, |b, a| {
            max_store_bytes(MemKind::Buffer, &o, b, a)
        });
        assert_eq!(
            chunks,
            vec![
                StoreChunk { offset: 0, bytes: 8, skip: false },
                StoreChunk { offset: 8, bytes: 4, skip: true },
                StoreChunk { offset: 12, bytes: 4, skip: false },
            ]
        );
    }

    #[test]
    fn misaligned_stores_are_narrowed() {
        let o = options(ChipClass::GFX8);
        let chunks = split_buffer_store(0b1, 4, 1, 2, 0, |b, a| {
            max_store_bytes(MemKind::Lds, &o, b, a)
        });
        assert!(chunks.iter().all(|c| c.bytes == 2));
        assert_eq!(chunks.len(), 2);
    }
}
