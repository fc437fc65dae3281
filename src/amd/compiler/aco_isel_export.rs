/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Shader outputs: exports, transform feedback, the ES/GS and LS/HS
//! handoffs and geometry shader emission

use crate::aco_builder::Builder;
use crate::aco_ir::*;
use crate::aco_isel_alu::emit_add32;
use crate::aco_isel_cf::emit_divergent_if;
use crate::aco_isel_ctx::{isel_err, IselContext, Outputs};
use crate::aco_isel_intrinsic::{dst_def, emit_mbcnt};
use crate::aco_isel_mem::{emit_load, emit_store, load_lds, store_lds, MemAccess, MemKind};
use crate::aco_isel_setup::{
    arg, convert_pointer_to_64_bit, load_ring_desc, RING_ESGS_GS, RING_ESGS_VS, RING_GSVS_GS,
    RING_GSVS_VS,
};
use crate::aco_options::{SpiFormat, StreamoutConfig};
use crate::nir::{
    Def, Instr as NirInstr, IntrinsicInstr, IntrinsicOp, Shader, FRAG_RESULT_DATA0,
    FRAG_RESULT_DEPTH, FRAG_RESULT_SAMPLE_MASK, FRAG_RESULT_STENCIL, VARYING_SLOT_MAX,
    VARYING_SLOT_POS, VARYING_SLOT_PSIZ, VARYING_SLOT_VAR0,
};

/* s_sendmsg payloads */
const SENDMSG_GS: u32 = 2;
const SENDMSG_GS_DONE: u32 = 3;
const GS_OP_CUT: u32 = 1 << 4;
const GS_OP_EMIT: u32 = 2 << 4;

/* Bytes between two components of one vertex as the copy shader sees the
 * GSVS ring, per emitted vertex.
 */
const GSVS_COPY_COMPONENT_STRIDE: u32 = 64;
/* Same for the ESGS ring as the GS reads it */
const ESGS_COMPONENT_STRIDE: u32 = 256;

const NUM_COLOR_TARGETS: u32 = 8;

fn output(ctx: &IselContext, slot: u32, comp: u32) -> Option<Temp> {
    ctx.outputs.temps[slot as usize][comp as usize]
}

fn export_operand(ctx: &mut IselContext, val: Option<Temp>) -> Operand {
    match val {
        Some(t) if t.bytes() >= 4 => ctx.as_vgpr(t).into(),
        Some(t) => {
            /* Sub-dword outputs are zero-extended */
            let v = ctx.as_vgpr(t);
            ctx.create_vector(RegClass::V1, vec![v.into(), Operand::c16(0)])
                .into()
        }
        None => Operand::undef(RegClass::V1),
    }
}

fn export(values: [Operand; 4], enabled_mask: u8, dest: u8) -> ([Operand; 4], ExportInfo) {
    let info = ExportInfo {
        enabled_mask: enabled_mask,
        dest: dest,
        compressed: false,
        done: false,
        valid_mask: false,
    };
    (values, info)
}

/// Emits `exports` in order, the last one ends the export sequence
fn emit_exports(ctx: &mut IselContext, mut exports: Vec<([Operand; 4], ExportInfo)>, valid: bool) {
    if let Some((_, last)) = exports.last_mut() {
        last.done = true;
        last.valid_mask = valid;
    }
    for (values, info) in exports {
        ctx.exp(values, info);
    }
}

fn pack_pkrtz(ctx: &mut IselContext, lo: Operand, hi: Operand) -> Operand {
    let lo = ctx.as_vgpr_op(lo);
    let hi = ctx.as_vgpr_op(hi);
    ctx.vop2(Opcode::VCvtPkrtzF16F32, RegClass::V1, lo, hi).into()
}

/// Clamps both halves to 16 bits and packs them into one dword
fn pack_int16(ctx: &mut IselContext, lo: Operand, hi: Operand, signed: bool) -> Operand {
    let clamp = |ctx: &mut IselContext, v: Operand| -> Temp {
        let v = ctx.as_vgpr_op(v);
        if signed {
            let v = ctx.vop2(Opcode::VMaxI32, RegClass::V1, Operand::c32(-32768i32 as u32), v);
            ctx.vop2(Opcode::VMinI32, RegClass::V1, Operand::c32(32767), v)
        } else {
            ctx.vop2(Opcode::VMinU32, RegClass::V1, Operand::c32(0xffff), v)
        }
    };
    let lo = clamp(ctx, lo);
    let hi = clamp(ctx, hi);
    let lo = ctx.vop2(Opcode::VAndB32, RegClass::V1, Operand::c32(0xffff), lo);
    let hi = ctx.vop2(Opcode::VLshlrevB32, RegClass::V1, Operand::c32(16), hi);
    ctx.vop2(Opcode::VOrB32, RegClass::V1, lo, hi).into()
}

fn fs_color_export(ctx: &mut IselContext, index: u32) -> Option<([Operand; 4], ExportInfo)> {
    let slot = FRAG_RESULT_DATA0 + index;
    if !ctx.outputs.written(slot) {
        return None;
    }
    let format = ctx.config.fs_spi_formats[index as usize];
    let vals: Vec<Operand> = (0..4)
        .map(|c| {
            let v = output(ctx, slot, c);
            export_operand(ctx, v)
        })
        .collect();
    let undef = Operand::undef(RegClass::V1);
    let dest = EXP_MRT0 + index as u8;

    let exp = match format {
        SpiFormat::Zero => return None,
        SpiFormat::R32 => export([vals[0], undef, undef, undef], 0x1, dest),
        SpiFormat::GR32 => export([vals[0], vals[1], undef, undef], 0x3, dest),
        /* GFX10 moved alpha next to red */
        SpiFormat::AR32 if ctx.program.chip_class >= ChipClass::GFX10 => {
            export([vals[0], vals[3], undef, undef], 0x3, dest)
        }
        SpiFormat::AR32 => export([vals[0], undef, undef, vals[3]], 0x9, dest),
        SpiFormat::ABGR32 => export([vals[0], vals[1], vals[2], vals[3]], 0xf, dest),
        SpiFormat::Fp16Abgr | SpiFormat::Uint16Abgr | SpiFormat::Sint16Abgr => {
            let mut packed = [undef; 4];
            for i in 0..2 {
                let (lo, hi) = (vals[2 * i], vals[2 * i + 1]);
                packed[i] = match format {
                    SpiFormat::Fp16Abgr => pack_pkrtz(ctx, lo, hi),
                    SpiFormat::Uint16Abgr => pack_int16(ctx, lo, hi, false),
                    _ => pack_int16(ctx, lo, hi, true),
                };
            }
            let (values, mut info) = export(packed, 0xf, dest);
            info.compressed = true;
            (values, info)
        }
        SpiFormat::Unorm16Abgr | SpiFormat::Snorm16Abgr => {
            panic!("Unsupported color export format {:?} for MRT{}", format, index)
        }
    };
    Some(exp)
}

/// Exports depth, stencil, sample mask and colors, or a null export if
/// the shader writes none of them
pub fn create_fs_exports(ctx: &mut IselContext) {
    let mut exports = Vec::new();

    let depth = output(ctx, FRAG_RESULT_DEPTH, 0);
    let stencil = output(ctx, FRAG_RESULT_STENCIL, 0);
    let sample_mask = output(ctx, FRAG_RESULT_SAMPLE_MASK, 0);
    if depth.is_some() || stencil.is_some() || sample_mask.is_some() {
        let mut values = [Operand::undef(RegClass::V1); 4];
        let mut mask = 0;
        for (i, v) in [depth, stencil, sample_mask].into_iter().enumerate() {
            if v.is_some() {
                values[i] = export_operand(ctx, v);
                mask |= 1 << i;
            }
        }
        /* GFX6 only looks at the X channel of the mask */
        if ctx.program.chip_class == ChipClass::GFX6 {
            mask |= 0x1;
        }
        exports.push(export(values, mask, EXP_MRTZ));
    }

    for i in 0..NUM_COLOR_TARGETS {
        if let Some(e) = fs_color_export(ctx, i) {
            exports.push(e);
        }
    }

    if exports.is_empty() {
        let undef = Operand::undef(RegClass::V1);
        exports.push(export([undef; 4], 0, EXP_NULL));
    }
    tracing::trace!(count = exports.len(), "fragment exports");
    emit_exports(ctx, exports, true);
}

/// Exports position, point size and parameters
///
/// Parameter `n` is the output at `VARYING_SLOT_VAR0 + n`.
pub fn create_vs_exports(ctx: &mut IselContext) {
    let mut pos = Vec::new();
    if ctx.outputs.written(VARYING_SLOT_POS) {
        let mut values = [Operand::undef(RegClass::V1); 4];
        for c in 0..4 {
            let v = output(ctx, VARYING_SLOT_POS, c);
            values[c as usize] = export_operand(ctx, v);
        }
        pos.push(export(values, 0xf, EXP_POS0));
    } else {
        let zero = Operand::c32(0);
        pos.push(export([zero, zero, zero, Operand::f32(1.0)], 0xf, EXP_POS0));
    }
    if ctx.outputs.written(VARYING_SLOT_PSIZ) {
        let undef = Operand::undef(RegClass::V1);
        let psize = output(ctx, VARYING_SLOT_PSIZ, 0);
        let psize = export_operand(ctx, psize);
        pos.push(export([psize, undef, undef, undef], 0x1, EXP_POS0 + 1));
    }
    /* Position exports end with their own done bit */
    emit_exports(ctx, pos, false);

    for slot in VARYING_SLOT_VAR0..VARYING_SLOT_MAX {
        if !ctx.outputs.written(slot) {
            continue;
        }
        let mut values = [Operand::undef(RegClass::V1); 4];
        let mut mask = 0;
        for c in 0..4 {
            let v = output(ctx, slot, c);
            if v.is_some() {
                values[c as usize] = export_operand(ctx, v);
                mask |= 1 << c;
            }
        }
        let dest = EXP_PARAM0 + (slot - VARYING_SLOT_VAR0) as u8;
        let (values, info) = export(values, mask, dest);
        ctx.exp(values, info);
    }
}

/// Writes the transform feedback outputs of the vertices the hardware
/// allotted buffer space for
pub fn emit_streamout(ctx: &mut IselContext, so: &StreamoutConfig) {
    let so_config = arg(ctx.args.streamout_config, "streamout_config");
    /* so_config[22:16] is the number of vertices to write */
    let count = ctx.sop2(
        Opcode::SBfeU32,
        RegClass::S1,
        so_config,
        Operand::c32(16 | (7 << 16)),
    );
    let tid = emit_mbcnt(ctx, None);
    let can_emit = ctx.vopc(Opcode::VCmpLtU32, tid, count);

    emit_divergent_if(ctx, can_emit, |ctx| {
        let write_idx = arg(ctx.args.streamout_write_idx, "streamout_write_idx");
        let idx = emit_add32(ctx, tid, write_idx.into());
        let buffers = arg(ctx.args.streamout_buffers, "streamout_buffers");
        let buffers = convert_pointer_to_64_bit(ctx, buffers);

        let mut targets: [Option<(Temp, Temp)>; 4] = [None; 4];
        for (i, stride) in so.strides.iter().enumerate() {
            if *stride == 0 {
                continue;
            }
            let desc = ctx.smem(
                Opcode::SLoadDwordx4,
                RegClass::S4,
                vec![buffers.into(), Operand::c32(i as u32 * 16)],
                SmemInfo::default(),
            );
            /* Offsets and strides are in dwords */
            let so_offset = arg(ctx.args.streamout_offset[i], "streamout_offset");
            let so_offset = ctx.sop2(Opcode::SLshlB32, RegClass::S1, so_offset, Operand::c32(2));
            let scaled = ctx.vop2(Opcode::VMulU32U24, RegClass::V1, Operand::c32(stride * 4), idx);
            let offset = emit_add32(ctx, scaled, so_offset.into());
            targets[i] = Some((desc, offset));
        }

        for out in &so.outputs {
            let Some((desc, offset)) = targets[usize::from(out.buffer)] else {
                panic!("Streamout to buffer {} which has no stride", out.buffer);
            };
            let n = out.component_mask.count_ones();
            if n == 0 {
                continue;
            }
            let first = out.component_mask.trailing_zeros();
            let parts: Vec<Operand> = (first..first + n)
                .map(|c| match output(ctx, out.location, c) {
                    Some(t) => ctx.as_vgpr(t).into(),
                    None => Operand::undef(RegClass::V1),
                })
                .collect();
            let data = match parts[0].temp() {
                Some(t) if n == 1 => t,
                None if n == 1 => continue,
                _ => ctx.create_vector(RegClass::new(RegType::VGPR, n), parts),
            };

            let mut access = MemAccess::new(MemKind::Buffer, Some(offset), 4, n);
            access.resource = Some(desc);
            access.const_offset = out.offset;
            access.align_mul = 4;
            access.sync = MemorySyncInfo::storage(Storage::VMEM_OUTPUT);
            access.glc = true;
            access.slc = true;
            emit_store(ctx, &access, data, (1 << n) - 1);
        }
    });
}

/// Index of the current lane among all lanes of the workgroup
fn thread_id_in_group(ctx: &mut IselContext) -> Temp {
    let tid = emit_mbcnt(ctx, None);
    let wave_idx = match ctx.args.merged_wave_info {
        /* merged_wave_info[27:24] */
        Some(info) => ctx.sop2(
            Opcode::SBfeU32,
            RegClass::S1,
            info,
            Operand::c32(24 | (4 << 16)),
        ),
        /* tg_size[11:6] */
        None => {
            let tg_size = arg(ctx.args.tg_size, "tg_size");
            ctx.sop2(Opcode::SBfeU32, RegClass::S1, tg_size, Operand::c32(6 | (6 << 16)))
        }
    };
    let shift = ctx.program.wave_size.trailing_zeros();
    let base = ctx.sop2(Opcode::SLshlB32, RegClass::S1, wave_idx, Operand::c32(shift));
    emit_add32(ctx, tid, base.into())
}

/// Writes every output of this vertex to its slice of LDS
///
/// Vertex `i` of the workgroup lives at `i * esgs_itemsize`, output
/// component `c` of slot `s` at `(s * 4 + c) * 4` inside it.
pub fn store_lds_outputs(ctx: &mut IselContext) {
    let itemsize = ctx.esgs_itemsize;
    assert!(itemsize > 0);
    let thread = thread_id_in_group(ctx);
    let base = ctx.vop2(Opcode::VMulU32U24, RegClass::V1, Operand::c32(itemsize), thread);
    for slot in 0..VARYING_SLOT_MAX {
        for comp in 0..4 {
            let Some(val) = output(ctx, slot, comp) else {
                continue;
            };
            let val = ctx.as_vgpr(val);
            let elem = val.bytes();
            store_lds(ctx, val, Some(base), (slot * 4 + comp) * 4, elem, 0x1, 4, 0);
        }
    }
}

/// Writes every output of this vertex to the ESGS ring
pub fn store_esgs_ring_outputs(ctx: &mut IselContext) {
    let ring = load_ring_desc(ctx, RING_ESGS_VS);
    let es2gs_offset = arg(ctx.args.es2gs_offset, "es2gs_offset");
    for slot in 0..VARYING_SLOT_MAX {
        for comp in 0..4 {
            let Some(val) = output(ctx, slot, comp) else {
                continue;
            };
            let mut access = MemAccess::new(MemKind::Buffer, None, 4, 1);
            access.resource = Some(ring);
            access.soffset = Some(es2gs_offset.into());
            access.const_offset = (slot * 4 + comp) * 4;
            access.align_mul = 4;
            access.sync = MemorySyncInfo::storage(Storage::VMEM_OUTPUT);
            access.glc = true;
            access.slc = true;
            access.swizzled = true;
            emit_store(ctx, &access, val, 0x1);
        }
    }
}

/// Offset the hardware passes for input vertex `vertex`
fn gs_vertex_offset(ctx: &mut IselContext, vertex: u32) -> Temp {
    if vertex >= 6 {
        panic!("Geometry shader input vertex {} out of range", vertex);
    }
    if ctx.program.chip_class >= ChipClass::GFX9 {
        /* Two 16-bit offsets per register */
        let packed = arg(ctx.args.gs_vtx_offset[(vertex / 2) as usize], "gs_vtx_offset");
        ctx.vop3(
            Opcode::VBfeU32,
            RegClass::V1,
            vec![packed.into(), Operand::c32((vertex % 2) * 16), Operand::c32(16)],
        )
    } else {
        arg(ctx.args.gs_vtx_offset[vertex as usize], "gs_vtx_offset")
    }
}

fn gs_input_vertex_offset(ctx: &mut IselContext, src: &Def) -> Temp {
    if let Some(v) = ctx.const_value(src) {
        return gs_vertex_offset(ctx, v as u32);
    }
    let idx = ctx.get_ssa_temp(src);
    let mut res = gs_vertex_offset(ctx, 0);
    for v in 1..6 {
        let off = gs_vertex_offset(ctx, v);
        let is_v = ctx.vopc(Opcode::VCmpEqI32, Operand::c32(v), idx);
        res = ctx.cndmask(RegClass::V1, res, off, is_v);
    }
    res
}

/// Loads a per-vertex input of a geometry shader
///
/// `srcs[0]` selects the input vertex.
pub fn visit_load_gs_input(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    if def.bit_size != 32 {
        isel_err!(intrin, "Unsupported {}-bit geometry shader input", def.bit_size);
    }
    let n = u32::from(def.num_components);
    let first = intrin.idx.base as u32 * 4 + u32::from(intrin.idx.component);
    let vtx = gs_input_vertex_offset(ctx, &intrin.srcs[0]);
    /* Vertex offsets are in dwords */
    let vaddr = ctx.vop2(Opcode::VLshlrevB32, RegClass::V1, Operand::c32(2), vtx);
    let rc = RegClass::new(RegType::VGPR, n);

    let res = if ctx.program.chip_class >= ChipClass::GFX9 {
        load_lds(ctx, rc, Some(vaddr), first * 4, 4, n, 4, 0)
    } else {
        let ring = load_ring_desc(ctx, RING_ESGS_GS);
        let comps: Vec<Temp> = (0..n)
            .map(|c| {
                let mut access = MemAccess::new(MemKind::Buffer, Some(vaddr), 4, 1);
                access.resource = Some(ring);
                access.const_offset = (first + c) * ESGS_COMPONENT_STRIDE;
                access.align_mul = 4;
                access.glc = true;
                access.slc = true;
                emit_load(ctx, &access, RegClass::V1)
            })
            .collect();
        if n == 1 {
            comps[0]
        } else {
            ctx.create_vector_cached(rc, comps)
        }
    };
    ctx.bind_def(&def, res);
}

/// Loads a per-vertex input of a tessellation control shader from LDS
///
/// `srcs[0]` is the index of the vertex within the workgroup.
pub fn visit_load_tcs_input(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    if def.bit_size != 32 {
        isel_err!(intrin, "Unsupported {}-bit tessellation input", def.bit_size);
    }
    let n = u32::from(def.num_components);
    let first = intrin.idx.base as u32 * 4 + u32::from(intrin.idx.component);
    let vertex = ctx.get_ssa_temp(&intrin.srcs[0]);
    let vertex = ctx.as_vgpr(vertex);
    let itemsize = ctx.esgs_itemsize;
    let addr = ctx.vop2(Opcode::VMulU32U24, RegClass::V1, Operand::c32(itemsize), vertex);
    let rc = RegClass::new(RegType::VGPR, n);
    let res = load_lds(ctx, rc, Some(addr), first * 4, 4, n, 4, 0);
    ctx.bind_def(&def, res);
}

fn emit_sendmsg(ctx: &mut IselContext, imm: u32) {
    let wave_id = arg(ctx.args.gs_wave_id, "gs_wave_id");
    ctx.sopp(Opcode::SSendmsg, imm)
        .operands
        .push(Operand::m0(wave_id));
}

/// The GSVS ring with the stride of one vertex stream patched in
fn gsvs_ring(ctx: &mut IselContext, num_components: u32, vertices_out: u32) -> Temp {
    let stride = 4 * num_components * vertices_out;
    /* The stride field is 14 bits wide */
    assert!(stride < (1 << 14));
    let ring = load_ring_desc(ctx, RING_GSVS_GS);
    let words = ctx.emit_split_vector(ring, 4);
    let word1 = ctx.sop2(Opcode::SOrB32, RegClass::S1, words[1], Operand::c32(stride << 16));
    let num_records = Operand::c32(ctx.program.wave_size);
    ctx.create_vector(
        RegClass::S4,
        vec![words[0].into(), word1.into(), num_records, words[3].into()],
    )
}

/// Stores the current outputs as vertex `srcs[0]` of the primitive
/// stream and tells the hardware about it
///
/// Only stream 0 carries outputs; other streams only send the message.
pub fn visit_emit_vertex(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let stream = u32::from(intrin.idx.stream_id);
    let layout = std::mem::take(&mut ctx.gsvs_layout);

    if stream == 0 && !layout.is_empty() {
        let vertices_out = u32::from(ctx.shader_info.gs.vertices_out);
        let ring = gsvs_ring(ctx, layout.len() as u32, vertices_out);
        let counter = ctx.get_ssa_temp(&intrin.srcs[0]);
        let vaddr = ctx.vop2(Opcode::VLshlrevB32, RegClass::V1, Operand::c32(2), counter);
        let gs2vs_offset = arg(ctx.args.gs2vs_offset, "gs2vs_offset");

        for (k, (slot, comp)) in layout.iter().enumerate() {
            let Some(val) = output(ctx, *slot, *comp) else {
                continue;
            };
            let mut access = MemAccess::new(MemKind::Buffer, Some(vaddr), 4, 1);
            access.resource = Some(ring);
            access.soffset = Some(gs2vs_offset.into());
            access.const_offset = k as u32 * vertices_out * 4;
            access.align_mul = 4;
            access.sync = MemorySyncInfo::storage(Storage::VMEM_OUTPUT);
            access.glc = true;
            access.slc = true;
            access.swizzled = true;
            emit_store(ctx, &access, val, 0x1);
        }
        /* Outputs are undefined after a vertex is emitted */
        ctx.outputs = Outputs::new();
    }
    ctx.gsvs_layout = layout;

    emit_sendmsg(ctx, SENDMSG_GS | GS_OP_EMIT | (stream << 8));
}

pub fn visit_end_primitive(ctx: &mut IselContext, stream: u8) {
    emit_sendmsg(ctx, SENDMSG_GS | GS_OP_CUT | (u32::from(stream) << 8));
}

/// Tells the hardware the geometry shader wave is finished
pub fn emit_gs_done(ctx: &mut IselContext) {
    emit_sendmsg(ctx, SENDMSG_GS_DONE);
}

/// Slot and component of each dword a geometry shader writes per vertex
pub fn gsvs_layout(shader: &Shader) -> Vec<(u32, u32)> {
    let mut written = [0u8; VARYING_SLOT_MAX as usize];
    shader.for_each_instr(|i| {
        if let NirInstr::Intrinsic(intrin) = i {
            if intrin.op == IntrinsicOp::StoreOutput {
                let n = intrin.srcs[0].num_components;
                let mask = intrin.idx.write_mask & ((1 << n) - 1);
                written[intrin.idx.base as usize] |= mask << intrin.idx.component;
            }
        }
    });
    let mut layout = Vec::new();
    for (slot, mask) in written.iter().enumerate() {
        for comp in 0..4 {
            if mask & (1 << comp) != 0 {
                layout.push((slot as u32, comp));
            }
        }
    }
    layout
}

/// Reloads the outputs of the geometry shader vertex this copy shader
/// lane exports
pub fn load_gsvs_outputs(ctx: &mut IselContext, layout: &[(u32, u32)], vertices_out: u32) {
    let ring = load_ring_desc(ctx, RING_GSVS_VS);
    let vertex_id = arg(ctx.args.vertex_id, "vertex_id");
    let vaddr = ctx.vop2(Opcode::VLshlrevB32, RegClass::V1, Operand::c32(2), vertex_id);
    for (k, (slot, comp)) in layout.iter().enumerate() {
        let mut access = MemAccess::new(MemKind::Buffer, Some(vaddr), 4, 1);
        access.resource = Some(ring);
        access.const_offset = k as u32 * vertices_out * GSVS_COPY_COMPONENT_STRIDE;
        access.align_mul = 4;
        access.glc = true;
        access.slc = true;
        let val = emit_load(ctx, &access, RegClass::V1);
        ctx.outputs.store(*slot, *comp, val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aco_isel_setup::{add_startpgm, init_context};
    use crate::aco_options::{CompilerOptions, ShaderConfig, StreamoutOutput};
    use crate::nir::{IntrinsicIndices, ShaderBuilder, ShaderStage};

    fn with_ctx(
        chip: ChipClass,
        hw_stage: HwStage,
        shader: &Shader,
        config: ShaderConfig,
        f: impl FnOnce(&mut IselContext),
    ) -> Program {
        let options = CompilerOptions::new(chip, 64).unwrap();
        let program = Program::new(chip, 64, hw_stage, vec![shader.info.stage]);
        let mut ctx = IselContext::new(&options, &config, program, &shader.info);
        init_context(&mut ctx, shader);
        let first = ctx.program.create_and_insert_block();
        ctx.block = first;
        add_startpgm(&mut ctx, &[shader]);
        f(&mut ctx);
        ctx.program
    }

    fn exports(p: &Program) -> Vec<ExportInfo> {
        p.instrs()
            .filter_map(|i| match &i.info {
                FormatInfo::Export(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(p: &Program, op: Opcode) -> usize {
        p.instrs().filter(|i| i.opcode == op).count()
    }

    fn fragment() -> Shader {
        ShaderBuilder::new(ShaderStage::Fragment).finish()
    }

    #[test]
    fn fragment_shader_without_outputs_exports_null() {
        let p = with_ctx(ChipClass::GFX9, HwStage::FS, &fragment(), ShaderConfig::default(), |ctx| {
            create_fs_exports(ctx)
        });
        let e = exports(&p);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].dest, EXP_NULL);
        assert!(e[0].done && e[0].valid_mask);
    }

    #[test]
    fn fp16_color_is_compressed() {
        let mut config = ShaderConfig::default();
        config.fs_spi_formats[0] = SpiFormat::Fp16Abgr;
        let p = with_ctx(ChipClass::GFX9, HwStage::FS, &fragment(), config, |ctx| {
            for c in 0..4 {
                let v = ctx.copy(RegClass::V1, Operand::c32(c));
                ctx.outputs.store(FRAG_RESULT_DATA0, c, v);
            }
            create_fs_exports(ctx)
        });
        assert_eq!(count(&p, Opcode::VCvtPkrtzF16F32), 2);
        let e = exports(&p);
        assert_eq!(e.len(), 1);
        assert!(e[0].compressed);
        assert_eq!((e[0].dest, e[0].enabled_mask), (EXP_MRT0, 0xf));
    }

    #[test]
    fn alpha_red_layout_depends_on_chip() {
        for (chip, mask) in [(ChipClass::GFX9, 0x9), (ChipClass::GFX10, 0x3)] {
            let mut config = ShaderConfig::default();
            config.fs_spi_formats[1] = SpiFormat::AR32;
            let p = with_ctx(chip, HwStage::FS, &fragment(), config, |ctx| {
                let v = ctx.copy(RegClass::V1, Operand::c32(0));
                ctx.outputs.store(FRAG_RESULT_DATA0 + 1, 0, v);
                ctx.outputs.store(FRAG_RESULT_DATA0 + 1, 3, v);
                create_fs_exports(ctx)
            });
            let e = exports(&p);
            assert_eq!((e[0].dest, e[0].enabled_mask), (EXP_MRT0 + 1, mask));
        }
    }

    #[test]
    fn depth_goes_before_colors() {
        let mut config = ShaderConfig::default();
        config.fs_spi_formats[0] = SpiFormat::R32;
        let p = with_ctx(ChipClass::GFX6, HwStage::FS, &fragment(), config, |ctx| {
            let v = ctx.copy(RegClass::V1, Operand::c32(0));
            ctx.outputs.store(FRAG_RESULT_STENCIL, 0, v);
            ctx.outputs.store(FRAG_RESULT_DATA0, 0, v);
            create_fs_exports(ctx)
        });
        let e = exports(&p);
        assert_eq!(e.len(), 2);
        /* Stencil plus the channel GFX6 always reads */
        assert_eq!((e[0].dest, e[0].enabled_mask), (EXP_MRTZ, 0x3));
        assert!(!e[0].done);
        assert!(e[1].done && e[1].valid_mask);
    }

    #[test]
    fn missing_position_is_exported_as_origin() {
        let shader = ShaderBuilder::new(ShaderStage::Vertex).finish();
        let p = with_ctx(ChipClass::GFX8, HwStage::VS, &shader, ShaderConfig::default(), |ctx| {
            let v = ctx.copy(RegClass::V1, Operand::c32(0));
            ctx.outputs.store(VARYING_SLOT_PSIZ, 0, v);
            ctx.outputs.store(VARYING_SLOT_VAR0 + 2, 1, v);
            create_vs_exports(ctx)
        });
        let exp: Vec<&Instr> = p.instrs().filter(|i| i.opcode == Opcode::Exp).collect();
        assert_eq!(exp.len(), 3);
        assert_eq!(exp[0].operands[3].constant_value(), Some(0x3f800000));
        let e = exports(&p);
        assert_eq!((e[0].dest, e[0].done), (EXP_POS0, false));
        assert_eq!((e[1].dest, e[1].enabled_mask, e[1].done), (EXP_POS0 + 1, 0x1, true));
        assert_eq!((e[2].dest, e[2].enabled_mask), (EXP_PARAM0 + 2, 0x2));
    }

    #[test]
    fn streamout_runs_under_a_divergent_guard() {
        let shader = ShaderBuilder::new(ShaderStage::Vertex).finish();
        let so = StreamoutConfig {
            outputs: vec![StreamoutOutput {
                location: VARYING_SLOT_VAR0,
                component_mask: 0x6,
                buffer: 1,
                offset: 8,
            }],
            strides: [0, 4, 0, 0],
        };
        let config = ShaderConfig {
            streamout: Some(so.clone()),
            ..Default::default()
        };
        let p = with_ctx(ChipClass::GFX9, HwStage::VS, &shader, config, |ctx| {
            let v = ctx.copy(RegClass::V1, Operand::c32(0));
            ctx.outputs.store(VARYING_SLOT_VAR0, 1, v);
            ctx.outputs.store(VARYING_SLOT_VAR0, 2, v);
            emit_streamout(ctx, &so)
        });
        assert!(p.blocks.iter().any(|b| b.kind.contains(BlockKind::BRANCH)));
        assert!(p.blocks.iter().any(|b| b.kind.contains(BlockKind::MERGE)));
        assert_eq!(count(&p, Opcode::SLoadDwordx4), 1);
        let store = p
            .instrs()
            .find(|i| i.opcode == Opcode::BufferStoreDwordx2)
            .unwrap();
        let FormatInfo::Mubuf(info) = &store.info else {
            panic!("Expected a MUBUF store");
        };
        assert_eq!(info.offset, 8);
        assert!(info.glc && info.slc);
    }

    #[test]
    fn emit_vertex_stores_to_the_ring() {
        let mut b = ShaderBuilder::new(ShaderStage::Geometry);
        b.info_mut().gs.vertices_out = 3;
        let counter = b.imm32(0);
        let s = b.finish();
        let p = with_ctx(ChipClass::GFX8, HwStage::GS, &s, ShaderConfig::default(), |ctx| {
            ctx.gsvs_layout = vec![(VARYING_SLOT_POS, 0), (VARYING_SLOT_POS, 1)];
            let v = ctx.copy(RegClass::V1, Operand::c32(0));
            ctx.outputs.store(VARYING_SLOT_POS, 0, v);
            ctx.outputs.store(VARYING_SLOT_POS, 1, v);
            let intrin = IntrinsicInstr {
                op: IntrinsicOp::EmitVertex,
                def: None,
                srcs: vec![counter],
                idx: IntrinsicIndices::default(),
            };
            visit_emit_vertex(ctx, &intrin);
            assert_eq!(ctx.outputs.mask, 0);
            visit_end_primitive(ctx, 0);
        });

        let stores: Vec<&Instr> = p
            .instrs()
            .filter(|i| i.opcode == Opcode::BufferStoreDword)
            .collect();
        assert_eq!(stores.len(), 2);
        let offsets: Vec<u16> = stores
            .iter()
            .map(|i| match &i.info {
                FormatInfo::Mubuf(m) => {
                    assert!(m.swizzled);
                    m.offset
                }
                _ => panic!("Expected a MUBUF store"),
            })
            .collect();
        assert_eq!(offsets, vec![0, 12]);

        let msgs: Vec<u32> = p
            .instrs()
            .filter(|i| i.opcode == Opcode::SSendmsg)
            .map(|i| match &i.info {
                FormatInfo::Sopp(s) => {
                    assert_eq!(i.operands[0].phys_reg(), Some(PhysReg::M0));
                    s.imm
                }
                _ => panic!("Expected a SOPP"),
            })
            .collect();
        assert_eq!(msgs, vec![SENDMSG_GS | GS_OP_EMIT, SENDMSG_GS | GS_OP_CUT]);
    }

    #[test]
    fn layout_follows_write_masks() {
        let mut b = ShaderBuilder::new(ShaderStage::Geometry);
        let v = b.undef(32, 2);
        let idx = IntrinsicIndices {
            base: VARYING_SLOT_VAR0 as i32,
            component: 1,
            write_mask: 0x3,
            ..Default::default()
        };
        b.intrinsic(IntrinsicOp::StoreOutput, None, &[v], idx);
        let pos = IntrinsicIndices {
            base: VARYING_SLOT_POS as i32,
            write_mask: 0x1,
            ..Default::default()
        };
        b.intrinsic(IntrinsicOp::StoreOutput, None, &[v], pos);
        let layout = gsvs_layout(&b.finish());
        assert_eq!(
            layout,
            vec![
                (VARYING_SLOT_POS, 0),
                (VARYING_SLOT_VAR0, 1),
                (VARYING_SLOT_VAR0, 2)
            ]
        );
    }
}
