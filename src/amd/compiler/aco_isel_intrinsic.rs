/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::aco_builder::{Builder, WaveOp};
use crate::aco_ir::*;
use crate::aco_isel_alu::{emit_add32, emit_add64, emit_quad_perm};
use crate::aco_isel_cf::{visit_demote, visit_discard};
use crate::aco_isel_ctx::{isel_err, IselContext};
use crate::aco_isel_export::{
    visit_emit_vertex, visit_end_primitive, visit_load_gs_input, visit_load_tcs_input,
};
use crate::aco_isel_mem::{
    emit_load, emit_store, emit_vmem_atomic, lds_m0, load_lds, store_lds, vmem_format,
    MemAccess, MemKind,
};
use crate::aco_isel_setup::{arg, convert_pointer_to_64_bit};
use crate::aco_isel_tex::{visit_image_atomic, visit_image_load, visit_image_size, visit_image_store};
use crate::nir::{
    self, AtomicOp, Def, DescriptorType, IntrinsicInstr, IntrinsicOp, ReductionOp, ShaderStage,
};

/* Numeric formats of typed buffer loads which read integers */
const BUF_NUM_FORMAT_UINT: u8 = 4;
const BUF_NUM_FORMAT_SINT: u8 = 5;

/* v_interp_mov_f32 source selecting the provoking vertex */
const INTERP_MOV_P0: u32 = 2;

pub(crate) fn dst_def(intrin: &IntrinsicInstr) -> Def {
    match intrin.def {
        Some(d) => d,
        None => isel_err!(intrin, "Intrinsic has no destination"),
    }
}

fn sync_scope(scope: nir::Scope) -> SyncScope {
    match scope {
        nir::Scope::None | nir::Scope::Invocation => SyncScope::Invocation,
        nir::Scope::Subgroup => SyncScope::Subgroup,
        nir::Scope::Workgroup => SyncScope::Workgroup,
        nir::Scope::QueueFamily => SyncScope::QueueFamily,
        nir::Scope::Device => SyncScope::Device,
    }
}

pub(crate) fn access_sync(intrin: &IntrinsicInstr, storage: Storage) -> MemorySyncInfo {
    let access = &intrin.idx.access;
    let mut semantics = Semantics::NONE;
    if access.volatile {
        semantics |= Semantics::VOLATILE;
    }
    if access.coherent {
        semantics |= Semantics::COHERENT;
    }
    if access.can_reorder {
        semantics |= Semantics::CAN_REORDER;
    }
    let scope = if access.coherent {
        SyncScope::Device
    } else {
        SyncScope::Invocation
    };
    MemorySyncInfo::new(storage, semantics, scope)
}

pub(crate) fn atomic_sync(storage: Storage, scope: SyncScope) -> MemorySyncInfo {
    MemorySyncInfo::new(storage, Semantics::ATOMIC | Semantics::RMW, scope)
}

/// Splits an offset into its dynamic part and a constant
fn split_offset(ctx: &IselContext, def: &Def) -> (Option<Temp>, u32) {
    match ctx.const_value(def) {
        Some(c) => (None, c as u32),
        None => (Some(ctx.get_ssa_temp(def)), 0),
    }
}

/// Describes an access of `value`'s shape at `offset`
fn mem_access(
    ctx: &IselContext,
    intrin: &IntrinsicInstr,
    kind: MemKind,
    offset: &Def,
    value: &Def,
) -> MemAccess {
    let (dyn_offset, c) = if kind == MemKind::Global {
        (Some(ctx.get_ssa_temp(offset)), 0)
    } else {
        split_offset(ctx, offset)
    };
    let component_size = u32::from(value.bit_size / 8).max(1);
    let mut access = MemAccess::new(
        kind,
        dyn_offset,
        component_size,
        value.num_components.into(),
    );
    access.const_offset = (intrin.idx.base as u32).wrapping_add(c);
    if intrin.idx.align_mul != 0 {
        access.align_mul = intrin.idx.align_mul;
        access.align_offset = intrin.idx.align_offset;
    }
    access.glc = intrin.idx.access.coherent || intrin.idx.access.volatile;
    access.slc = intrin.idx.access.non_temporal;
    access
}

fn write_mask(intrin: &IntrinsicInstr, value: &Def) -> u32 {
    match intrin.idx.write_mask {
        0 => (1 << value.num_components) - 1,
        m => m.into(),
    }
}

pub(crate) fn uniform_resource(ctx: &mut IselContext, def: &Def) -> Temp {
    let t = ctx.get_ssa_temp(def);
    if t.reg_type() == RegType::VGPR {
        ctx.as_uniform(t)
    } else {
        t
    }
}

fn is_scalar(offset: Option<Temp>) -> bool {
    offset.map_or(true, |t| t.reg_type() == RegType::SGPR)
}

/// Loads through a buffer descriptor, on the scalar unit when the result
/// is uniform and the memory can't change under the shader
fn visit_load_buffer(ctx: &mut IselContext, intrin: &IntrinsicInstr, readonly: bool) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let rsrc = uniform_resource(ctx, &intrin.srcs[0]);

    let mut access = mem_access(ctx, intrin, MemKind::Buffer, &intrin.srcs[1], &def);
    if dst.reg_type() == RegType::SGPR && readonly && is_scalar(access.offset) {
        access.kind = MemKind::Smem;
    }
    access.resource = Some(rsrc);
    access.sync = if readonly {
        MemorySyncInfo::new(Storage::BUFFER, Semantics::CAN_REORDER, SyncScope::Invocation)
    } else {
        access_sync(intrin, Storage::BUFFER)
    };
    let res = emit_load(ctx, &access, dst.reg_class());
    ctx.bind(dst, res);
}

fn visit_store_ssbo(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let value = intrin.srcs[0];
    let data = ctx.get_ssa_temp(&value);
    let rsrc = uniform_resource(ctx, &intrin.srcs[1]);
    let mut access = mem_access(ctx, intrin, MemKind::Buffer, &intrin.srcs[2], &value);
    access.resource = Some(rsrc);
    access.sync = access_sync(intrin, Storage::BUFFER);
    emit_store(ctx, &access, data, write_mask(intrin, &value));
}

/// Returning and non-returning forms share the opcode, `glc` selects
/// whether the old value is written back.  Order: MUBUF, FLAT, GLOBAL.
fn vmem_atomic_opcodes(op: AtomicOp) -> [Opcode; 3] {
    match op {
        AtomicOp::Add => [
            Opcode::BufferAtomicAdd,
            Opcode::FlatAtomicAdd,
            Opcode::GlobalAtomicAdd,
        ],
        AtomicOp::Imin => [
            Opcode::BufferAtomicSmin,
            Opcode::FlatAtomicSmin,
            Opcode::GlobalAtomicSmin,
        ],
        AtomicOp::Umin => [
            Opcode::BufferAtomicUmin,
            Opcode::FlatAtomicUmin,
            Opcode::GlobalAtomicUmin,
        ],
        AtomicOp::Imax => [
            Opcode::BufferAtomicSmax,
            Opcode::FlatAtomicSmax,
            Opcode::GlobalAtomicSmax,
        ],
        AtomicOp::Umax => [
            Opcode::BufferAtomicUmax,
            Opcode::FlatAtomicUmax,
            Opcode::GlobalAtomicUmax,
        ],
        AtomicOp::And => [
            Opcode::BufferAtomicAnd,
            Opcode::FlatAtomicAnd,
            Opcode::GlobalAtomicAnd,
        ],
        AtomicOp::Or => [
            Opcode::BufferAtomicOr,
            Opcode::FlatAtomicOr,
            Opcode::GlobalAtomicOr,
        ],
        AtomicOp::Xor => [
            Opcode::BufferAtomicXor,
            Opcode::FlatAtomicXor,
            Opcode::GlobalAtomicXor,
        ],
        AtomicOp::Xchg => [
            Opcode::BufferAtomicSwap,
            Opcode::FlatAtomicSwap,
            Opcode::GlobalAtomicSwap,
        ],
        AtomicOp::CmpXchg => [
            Opcode::BufferAtomicCmpswap,
            Opcode::FlatAtomicCmpswap,
            Opcode::GlobalAtomicCmpswap,
        ],
    }
}

pub(crate) fn atomic_op(intrin: &IntrinsicInstr) -> AtomicOp {
    match intrin.idx.atomic_op {
        Some(op) => op,
        None => isel_err!(intrin, "Atomic without an operation"),
    }
}

/// Sources `(data, compare)` of an atomic whose operands start at `first`
///
/// Compare-and-swap takes the comparison value before the new one.
pub(crate) fn atomic_srcs(intrin: &IntrinsicInstr, first: usize) -> (Def, Option<Def>) {
    if atomic_op(intrin) == AtomicOp::CmpXchg {
        (intrin.srcs[first + 1], Some(intrin.srcs[first]))
    } else {
        (intrin.srcs[first], None)
    }
}

fn visit_vmem_atomic(
    ctx: &mut IselContext,
    intrin: &IntrinsicInstr,
    kind: MemKind,
    resource: Option<Temp>,
    address: &Def,
    first_data: usize,
) {
    let op = atomic_op(intrin);
    let (data, compare) = atomic_srcs(intrin, first_data);
    if data.bit_size != 32 {
        isel_err!(intrin, "Unsupported {}-bit atomic", data.bit_size);
    }

    let mut access = mem_access(ctx, intrin, kind, address, &data);
    access.resource = resource;
    access.sync = atomic_sync(Storage::BUFFER, SyncScope::Device);
    access.glc = intrin.def.is_some();

    let ops = vmem_atomic_opcodes(op);
    let opcode = match vmem_format(kind, ctx.options) {
        Format::MUBUF => ops[0],
        Format::FLAT => ops[1],
        Format::GLOBAL => ops[2],
        f => isel_err!(intrin, "No {} atomics", f),
    };

    let value = ctx.get_ssa_temp(&data);
    let value = ctx.as_vgpr(value);
    let value = match compare {
        Some(c) => {
            let c = ctx.get_ssa_temp(&c);
            let c = ctx.as_vgpr(c);
            ctx.create_vector(RegClass::V2, vec![value.into(), c.into()])
        }
        None => value,
    };
    let rc = intrin.def.map(|_| RegClass::V1);
    let res = emit_vmem_atomic(ctx, &access, opcode, value, rc);
    if let (Some(def), Some(res)) = (intrin.def, res) {
        ctx.bind_def(&def, res);
    }
}

fn lds_atomic_opcode(op: AtomicOp, returns: bool) -> Opcode {
    match op {
        AtomicOp::Add if !returns => Opcode::DsAddU32,
        AtomicOp::Add => Opcode::DsAddRtnU32,
        AtomicOp::Imin => Opcode::DsMinRtnI32,
        AtomicOp::Umin => Opcode::DsMinRtnU32,
        AtomicOp::Imax => Opcode::DsMaxRtnI32,
        AtomicOp::Umax => Opcode::DsMaxRtnU32,
        AtomicOp::And => Opcode::DsAndRtnB32,
        AtomicOp::Or => Opcode::DsOrRtnB32,
        AtomicOp::Xor => Opcode::DsXorRtnB32,
        AtomicOp::Xchg => Opcode::DsWrxchgRtnB32,
        AtomicOp::CmpXchg => Opcode::DsCmpstRtnB32,
    }
}

fn visit_shared_atomic(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let (data, compare) = atomic_srcs(intrin, 1);
    if data.bit_size != 32 {
        isel_err!(intrin, "Unsupported {}-bit atomic", data.bit_size);
    }
    let (addr, c) = split_offset(ctx, &intrin.srcs[0]);
    let offset = (intrin.idx.base as u32).wrapping_add(c);
    /* The DS immediate offset is 16 bits */
    let (addr, offset) = match addr {
        Some(a) if offset <= 0xffff => (a, offset),
        Some(a) => (emit_add32(ctx, a, Operand::c32(offset)), 0),
        None => (ctx.copy(RegClass::V1, Operand::c32(offset)), 0),
    };
    let addr = ctx.as_vgpr(addr);

    let mut ops: Vec<Operand> = vec![addr.into()];
    if let Some(c) = compare {
        let c = ctx.get_ssa_temp(&c);
        ops.push(ctx.as_vgpr(c).into());
    }
    let value = ctx.get_ssa_temp(&data);
    ops.push(ctx.as_vgpr(value).into());
    ops.extend(lds_m0(ctx));

    let op = lds_atomic_opcode(atomic_op(intrin), intrin.def.is_some());
    let info = DsInfo {
        sync: atomic_sync(Storage::SHARED, SyncScope::Workgroup),
        offset0: offset as u16,
        offset1: 0,
        gds: false,
    };
    let rc = intrin.def.map(|_| RegClass::V1);
    let res = ctx.mem(op, rc, ops, info);
    if let (Some(def), Some(res)) = (intrin.def, res) {
        ctx.bind_def(&def, res);
    }
}

fn visit_load_shared(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let (addr, c) = split_offset(ctx, &intrin.srcs[0]);
    let component_size = u32::from(def.bit_size / 8).max(1);
    let (align_mul, align_offset) = match intrin.idx.align_mul {
        0 => (component_size, 0),
        m => (m, intrin.idx.align_offset),
    };
    let res = load_lds(
        ctx,
        dst.reg_class(),
        addr,
        (intrin.idx.base as u32).wrapping_add(c),
        component_size,
        def.num_components.into(),
        align_mul,
        align_offset,
    );
    ctx.bind(dst, res);
}

fn visit_store_shared(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let value = intrin.srcs[0];
    let data = ctx.get_ssa_temp(&value);
    let (addr, c) = split_offset(ctx, &intrin.srcs[1]);
    let component_size = u32::from(value.bit_size / 8).max(1);
    let (align_mul, align_offset) = match intrin.idx.align_mul {
        0 => (component_size, 0),
        m => (m, intrin.idx.align_offset),
    };
    store_lds(
        ctx,
        data,
        addr,
        (intrin.idx.base as u32).wrapping_add(c),
        component_size,
        write_mask(intrin, &value),
        align_mul,
        align_offset,
    );
}

fn visit_load_global(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let mut access = mem_access(ctx, intrin, MemKind::Global, &intrin.srcs[0], &def);
    let readonly = intrin.idx.access.can_reorder && !access.glc;
    if dst.reg_type() == RegType::SGPR && readonly && is_scalar(access.offset) {
        /* The address becomes the base of a scalar load */
        access.kind = MemKind::Smem;
        access.resource = access.offset.take();
    }
    access.sync = access_sync(intrin, Storage::BUFFER);
    let res = emit_load(ctx, &access, dst.reg_class());
    ctx.bind(dst, res);
}

fn visit_store_global(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let value = intrin.srcs[0];
    let data = ctx.get_ssa_temp(&value);
    let mut access = mem_access(ctx, intrin, MemKind::Global, &intrin.srcs[1], &value);
    access.sync = access_sync(intrin, Storage::BUFFER);
    emit_store(ctx, &access, data, write_mask(intrin, &value));
}

fn scratch_sync() -> MemorySyncInfo {
    MemorySyncInfo::new(Storage::SCRATCH, Semantics::PRIVATE, SyncScope::Invocation)
}

fn visit_load_scratch(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let mut access = mem_access(ctx, intrin, MemKind::Scratch, &intrin.srcs[0], &def);
    access.sync = scratch_sync();
    let res = emit_load(ctx, &access, dst.reg_class());
    ctx.bind(dst, res);
}

fn visit_store_scratch(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let value = intrin.srcs[0];
    let data = ctx.get_ssa_temp(&value);
    let mut access = mem_access(ctx, intrin, MemKind::Scratch, &intrin.srcs[1], &value);
    access.sync = scratch_sync();
    emit_store(ctx, &access, data, write_mask(intrin, &value));
}

/// A 64-bit address `base + offset` with a per-lane 32-bit offset
fn global_address(ctx: &mut IselContext, base: Temp, offset: Temp) -> Temp {
    let offset = ctx.as_vgpr(offset);
    let wide = ctx.create_vector(RegClass::V2, vec![offset.into(), Operand::c32(0)]);
    emit_add64(ctx, base, wide.into())
}

fn visit_load_push_constant(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let ptr = arg(ctx.args.push_constants, "push_constants");
    let ptr = convert_pointer_to_64_bit(ctx, ptr);

    let mut access = mem_access(ctx, intrin, MemKind::Smem, &intrin.srcs[0], &def);
    access.sync = MemorySyncInfo::default();
    match access.offset {
        Some(offset) if offset.reg_type() == RegType::VGPR => {
            /* Scalar loads can't take a per-lane offset */
            access.kind = MemKind::Global;
            access.offset = Some(global_address(ctx, ptr, offset));
        }
        _ => access.resource = Some(ptr),
    }
    let res = emit_load(ctx, &access, dst.reg_class());
    ctx.bind(dst, res);
}

/// Byte offset of a descriptor inside its set
fn visit_resource_index(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let (set, binding) = (intrin.idx.desc_set, intrin.idx.binding);
    let Some(layout) = ctx.config.layout.binding(set, binding) else {
        isel_err!(intrin, "No layout for descriptor set {} binding {}", set, binding);
    };

    let index = &intrin.srcs[0];
    let res = if let Some(c) = ctx.const_value(index) {
        let offset = layout.offset + c as u32 * layout.stride;
        ctx.copy(RegClass::S1, Operand::c32(offset))
    } else {
        let index = ctx.get_ssa_temp(index);
        if index.reg_type() == RegType::SGPR {
            let scaled = ctx.sop2(
                Opcode::SMulI32,
                RegClass::S1,
                index,
                Operand::c32(layout.stride),
            );
            ctx.sop2(
                Opcode::SAddU32,
                RegClass::S1,
                scaled,
                Operand::c32(layout.offset),
            )
        } else {
            let scaled = ctx.vop2(
                Opcode::VMulU32U24,
                RegClass::V1,
                Operand::c32(layout.stride),
                index,
            );
            emit_add32(ctx, scaled, Operand::c32(layout.offset))
        }
    };
    ctx.bind(dst, res);
}

fn visit_load_descriptor(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let set = intrin.idx.desc_set as usize;
    let Some(set_ptr) = ctx.args.desc_sets.get(set).copied() else {
        isel_err!(intrin, "Descriptor set {} is not bound", set);
    };
    let ptr = convert_pointer_to_64_bit(ctx, set_ptr);
    let (offset, c) = split_offset(ctx, &intrin.srcs[0]);
    /* Descriptor indices are dynamically uniform */
    let offset = offset.map(|t| {
        if t.reg_type() == RegType::VGPR {
            ctx.as_uniform(t)
        } else {
            t
        }
    });

    let rc = match intrin.idx.desc_type {
        DescriptorType::Buffer | DescriptorType::Sampler => RegClass::S4,
        DescriptorType::Image => RegClass::S8,
    };
    let mut access = MemAccess::new(MemKind::Smem, offset, 4, rc.size());
    access.resource = Some(ptr);
    access.const_offset = c;
    let res = emit_load(ctx, &access, rc);
    ctx.bind(dst, res);
}

fn barrier_storage(modes: &nir::MemModes) -> Storage {
    let mut storage = Storage::NONE;
    if modes.ssbo || modes.global {
        storage |= Storage::BUFFER;
    }
    if modes.shared {
        storage |= Storage::SHARED;
    }
    if modes.image {
        storage |= Storage::IMAGE;
    }
    if modes.shader_out {
        storage |= Storage::VMEM_OUTPUT;
    }
    storage
}

fn visit_barrier(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let idx = &intrin.idx;
    let mut exec_scope = match intrin.op {
        IntrinsicOp::ControlBarrier => sync_scope(idx.execution_scope),
        _ => SyncScope::Invocation,
    };
    let wg = &ctx.shader_info.workgroup_size;
    let wg_invocations: u32 = wg.iter().map(|d| u32::from(*d)).product();
    if exec_scope == SyncScope::Workgroup
        && ctx.stage == ShaderStage::Compute
        && wg_invocations <= ctx.program.wave_size
    {
        /* The whole workgroup is a single wave */
        exec_scope = SyncScope::Subgroup;
    }

    let sync = if idx.memory_scope == nir::Scope::None {
        MemorySyncInfo::default()
    } else {
        let mut semantics = Semantics::NONE;
        if idx.semantics.acquire {
            semantics |= Semantics::ACQUIRE;
        }
        if idx.semantics.release {
            semantics |= Semantics::RELEASE;
        }
        MemorySyncInfo::new(
            barrier_storage(&idx.modes),
            semantics,
            sync_scope(idx.memory_scope),
        )
    };
    ctx.barrier(sync, exec_scope);
}

fn visit_is_helper(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let lm = ctx.lm();
    let res = ctx.tmp(lm);
    ctx.push_op(Opcode::PIsHelper, vec![res.into()], Vec::new());
    ctx.program.config.needs_exact = true;
    ctx.bind_def(&def, res);
}

fn visit_load_vertex_input(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    if def.bit_size != 32 {
        isel_err!(intrin, "Unsupported {}-bit vertex input", def.bit_size);
    }
    let location = intrin.idx.base as u32;
    let Some(input) = ctx
        .config
        .vertex_inputs
        .iter()
        .find(|i| i.location == location)
        .copied()
    else {
        isel_err!(intrin, "No vertex input at location {}", location);
    };

    let vbs = arg(ctx.args.vertex_buffers, "vertex_buffers");
    let vbs = convert_pointer_to_64_bit(ctx, vbs);
    let rsrc = ctx.smem(
        Opcode::SLoadDwordx4,
        RegClass::S4,
        vec![vbs.into(), Operand::c32(input.binding * 16)],
        SmemInfo::default(),
    );
    let index = if input.per_instance {
        let id = arg(ctx.args.instance_id, "instance_id");
        let start = arg(ctx.args.start_instance, "start_instance");
        emit_add32(ctx, id, start.into())
    } else {
        arg(ctx.args.vertex_id, "vertex_id")
    };

    let channels = u32::from(input.num_channels.clamp(1, 4));
    let op = match channels {
        1 => Opcode::TbufferLoadFormatX,
        2 => Opcode::TbufferLoadFormatXy,
        3 => Opcode::TbufferLoadFormatXyz,
        _ => Opcode::TbufferLoadFormatXyzw,
    };
    /* The immediate offset is 12 bits */
    let soffset = match input.offset & !0xfff {
        0 => Operand::c32(0),
        hi => ctx.copy(RegClass::S1, Operand::c32(hi)).into(),
    };
    let info = MtbufInfo {
        sync: MemorySyncInfo::new(Storage::BUFFER, Semantics::CAN_REORDER, SyncScope::Invocation),
        offset: (input.offset & 0xfff) as u16,
        offen: false,
        idxen: true,
        dfmt: input.dfmt,
        nfmt: input.nfmt,
        glc: false,
        slc: false,
    };
    let rc = RegClass::new(RegType::VGPR, channels);
    let Some(fetched) = ctx.mem(op, Some(rc), vec![rsrc.into(), index.into(), soffset], info)
    else {
        unreachable!();
    };
    let comps = if channels > 1 {
        ctx.emit_split_vector(fetched, channels)
    } else {
        vec![fetched]
    };

    /* Channels the format lacks read as (0, 0, 0, 1) */
    let one = if input.nfmt == BUF_NUM_FORMAT_UINT || input.nfmt == BUF_NUM_FORMAT_SINT {
        1
    } else {
        1.0_f32.to_bits()
    };
    let first = u32::from(intrin.idx.component);
    let parts: Vec<Temp> = (first..first + u32::from(def.num_components))
        .map(|c| match comps.get(c as usize) {
            Some(t) => *t,
            None => {
                let v = if c == 3 { one } else { 0 };
                ctx.copy(RegClass::V1, Operand::c32(v))
            }
        })
        .collect();
    let res = ctx.create_vector_cached(RegClass::new(RegType::VGPR, parts.len() as u32), parts);
    ctx.bind_def(&def, res);
}

fn emit_interp(
    ctx: &mut IselContext,
    op: Opcode,
    ops: Vec<Operand>,
    attribute: u32,
    component: u32,
) -> Temp {
    let dst = ctx.tmp(RegClass::V1);
    let prim_mask = arg(ctx.args.prim_mask, "prim_mask");
    let mut ops = ops;
    ops.push(Operand::m0(prim_mask));
    ctx.push_op(op, vec![dst.into()], ops).info = InterpInfo {
        attribute: attribute as u8,
        component: component as u8,
    }
    .into();
    dst
}

/// Fragment inputs: flat inputs read the provoking vertex, interpolated
/// ones take the barycentrics as the first source
fn visit_fs_input(ctx: &mut IselContext, intrin: &IntrinsicInstr, interpolated: bool) {
    let def = dst_def(intrin);
    if def.bit_size != 32 {
        isel_err!(intrin, "Unsupported {}-bit fragment input", def.bit_size);
    }
    let attribute = intrin.idx.base as u32;
    let first = u32::from(intrin.idx.component);

    let bary = if interpolated {
        let b = ctx.get_ssa_temp(&intrin.srcs[0]);
        let b = ctx.as_vgpr(b);
        Some(ctx.emit_split_vector(b, 2))
    } else {
        None
    };

    let mut parts = Vec::new();
    for c in first..first + u32::from(def.num_components) {
        let v = match &bary {
            Some(ij) => {
                let p1 = emit_interp(ctx, Opcode::VInterpP1F32, vec![ij[0].into()], attribute, c);
                emit_interp(
                    ctx,
                    Opcode::VInterpP2F32,
                    vec![p1.into(), ij[1].into()],
                    attribute,
                    c,
                )
            }
            None => emit_interp(
                ctx,
                Opcode::VInterpMovF32,
                vec![Operand::c32(INTERP_MOV_P0)],
                attribute,
                c,
            ),
        };
        parts.push(v);
    }
    let res = ctx.create_vector_cached(RegClass::new(RegType::VGPR, parts.len() as u32), parts);
    ctx.bind_def(&def, res);
}

fn visit_load_frag_coord(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let pos: Vec<Temp> = ctx
        .args
        .frag_pos
        .iter()
        .map(|p| arg(*p, "frag_pos"))
        .collect();
    /* The hardware provides 1/w */
    let w = ctx.vop1(Opcode::VRcpF32, RegClass::V1, pos[3]);
    let res = ctx.create_vector_cached(RegClass::V4, vec![pos[0], pos[1], pos[2], w]);
    ctx.bind_def(&def, res);
}

fn visit_store_output(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let value = intrin.srcs[0];
    if value.bit_size > 32 {
        isel_err!(intrin, "Unsupported {}-bit output", value.bit_size);
    }
    let val = ctx.get_ssa_temp(&value);
    let n = u32::from(value.num_components);
    let comps = if n > 1 {
        ctx.emit_split_vector(val, n)
    } else {
        vec![val]
    };
    let slot = intrin.idx.base as u32;
    let first = u32::from(intrin.idx.component);
    let mask = write_mask(intrin, &value);
    for (i, comp) in comps.into_iter().enumerate() {
        if mask & (1 << i) != 0 {
            ctx.outputs.store(slot, first + i as u32, comp);
        }
    }
}

/// Number of lanes below the current one set in `mask`, all lanes if
/// `mask` is `None`
pub fn emit_mbcnt(ctx: &mut IselContext, mask: Option<Temp>) -> Temp {
    let wave64 = ctx.program.wave_size == 64;
    let (lo, hi): (Operand, Operand) = match mask {
        Some(m) if wave64 => {
            let halves = ctx.emit_split_vector(m, 2);
            (halves[0].into(), halves[1].into())
        }
        Some(m) => (m.into(), Operand::c32(0)),
        None => (Operand::c32(u32::MAX), Operand::c32(u32::MAX)),
    };
    let below = ctx.vop3(Opcode::VMbcntLoU32B32, RegClass::V1, vec![lo, Operand::c32(0)]);
    if !wave64 {
        return below;
    }
    ctx.vop3(Opcode::VMbcntHiU32B32, RegClass::V1, vec![hi, below.into()])
}

fn visit_local_invocation_index(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let lane = emit_mbcnt(ctx, None);
    let wg = &ctx.shader_info.workgroup_size;
    let invocations: u32 = wg.iter().map(|d| u32::from(*d)).product();
    if invocations <= ctx.program.wave_size {
        ctx.bind_def(&def, lane);
        return;
    }

    /* tg_size[11:6] holds the wave index inside the workgroup */
    let tg_size = arg(ctx.args.tg_size, "tg_size");
    let mut wave_base = ctx.sop2(Opcode::SAndB32, RegClass::S1, tg_size, Operand::c32(0xfc0));
    if ctx.program.wave_size == 32 {
        wave_base = ctx.sop2(Opcode::SLshrB32, RegClass::S1, wave_base, Operand::c32(1));
    }
    let res = ctx.vop2(Opcode::VOrB32, RegClass::V1, wave_base, lane);
    ctx.bind_def(&def, res);
}

/// A lane mask as plain scalar data
fn lm_to_sgpr(ctx: &mut IselContext, mask: Temp) -> Temp {
    let rc = mask.reg_class().without_lane_mask();
    ctx.copy(rc, mask)
}

fn visit_ballot(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let dst = ctx.get_ssa_temp(&def);
    let src = ctx.get_bool_lm(&intrin.srcs[0]);
    let exec = ctx.exec();
    let mask = ctx.lm_and(src, exec);
    let mask = lm_to_sgpr(ctx, mask);
    let res = match (dst.size(), mask.size()) {
        (2, 1) => ctx.create_vector(RegClass::S2, vec![mask.into(), Operand::c32(0)]),
        (1, 2) => ctx.emit_extract_vector(mask, 0, RegClass::S1),
        _ => mask,
    };
    ctx.bind(dst, res);
}

/// Widens a sub-dword vector value to a full dword, the upper bytes are
/// undefined
fn widen_to_dword(ctx: &mut IselContext, t: Temp) -> Temp {
    if !t.reg_class().is_subdword() || t.bytes() % 4 == 0 {
        return t;
    }
    let pad = RegClass::get(RegType::VGPR, 4 - t.bytes() % 4);
    let rc = RegClass::get(RegType::VGPR, t.bytes().next_multiple_of(4));
    ctx.create_vector(rc, vec![t.into(), Operand::undef(pad)])
}

/// Reads lane `lane` of a vector value, the first active lane if `None`
fn emit_read_lane(ctx: &mut IselContext, src: Temp, lane: Option<Temp>) -> Temp {
    if src.reg_type() == RegType::SGPR {
        return src;
    }
    let bytes = src.bytes();
    let src = widen_to_dword(ctx, src);
    let dwords = if src.size() > 1 {
        ctx.emit_split_vector(src, src.size())
    } else {
        vec![src]
    };
    let parts: Vec<Temp> = dwords
        .into_iter()
        .map(|d| match lane {
            Some(l) => ctx.vop3(Opcode::VReadlaneB32, RegClass::S1, vec![d.into(), l.into()]),
            None => ctx.vop1(Opcode::VReadfirstlaneB32, RegClass::S1, d),
        })
        .collect();
    let rc = RegClass::new(RegType::SGPR, bytes.div_ceil(4));
    ctx.create_vector_cached(rc, parts)
}

fn visit_read_invocation(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let lane = match intrin.op {
        IntrinsicOp::ReadInvocation => Some(uniform_resource(ctx, &intrin.srcs[1])),
        _ => None,
    };
    let src_def = intrin.srcs[0];
    let res = if src_def.is_bool() {
        let src = ctx.get_bool_lm(&src_def);
        let lane = match lane {
            Some(l) => l,
            None => {
                let ff1 = ctx.w64or32(WaveOp::SFf1);
                let exec = ctx.exec();
                ctx.sop1(ff1, RegClass::S1, exec)
            }
        };
        let bitcmp = ctx.w64or32(WaveOp::SBitcmp1);
        ctx.sopc(bitcmp, src, lane)
    } else {
        let src = ctx.get_ssa_temp(&src_def);
        emit_read_lane(ctx, src, lane)
    };
    ctx.bind_def(&def, res);
}

fn visit_vote(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let src = ctx.get_ssa_temp(&intrin.srcs[0]);
    if src.reg_class() == RegClass::S1 {
        /* A uniform condition is its own vote */
        ctx.bind_def(&def, src);
        return;
    }
    let res = match intrin.op {
        IntrinsicOp::VoteAny => ctx.lm_any(src),
        _ => {
            let andn2 = ctx.w64or32(WaveOp::SAndn2);
            let lm = ctx.lm();
            let exec = ctx.exec();
            let (_, any_false) = ctx.sop2_scc(andn2, lm, exec, src);
            ctx.sop2(Opcode::SXorB32, RegClass::S1, any_false, Operand::c32(1))
        }
    };
    ctx.bind_def(&def, res);
}

fn reduce_op(op: ReductionOp) -> ReduceOp {
    match op {
        ReductionOp::Iadd => ReduceOp::IAdd32,
        ReductionOp::Imul => ReduceOp::IMul32,
        ReductionOp::Fadd => ReduceOp::FAdd32,
        ReductionOp::Fmul => ReduceOp::FMul32,
        ReductionOp::Imin => ReduceOp::IMin32,
        ReductionOp::Imax => ReduceOp::IMax32,
        ReductionOp::Umin => ReduceOp::UMin32,
        ReductionOp::Umax => ReduceOp::UMax32,
        ReductionOp::Fmin => ReduceOp::FMin32,
        ReductionOp::Fmax => ReduceOp::FMax32,
        ReductionOp::Iand => ReduceOp::IAnd32,
        ReductionOp::Ior => ReduceOp::IOr32,
        ReductionOp::Ixor => ReduceOp::IXor32,
    }
}

/// Whole-wave reductions of a uniform value, in terms of the number of
/// active lanes
fn emit_uniform_reduce(ctx: &mut IselContext, op: ReductionOp, src: Temp) -> Option<Temp> {
    match op {
        ReductionOp::Iand
        | ReductionOp::Ior
        | ReductionOp::Imin
        | ReductionOp::Imax
        | ReductionOp::Umin
        | ReductionOp::Umax
        | ReductionOp::Fmin
        | ReductionOp::Fmax => Some(src),
        ReductionOp::Iadd | ReductionOp::Ixor | ReductionOp::Fadd => {
            let bcnt = ctx.w64or32(WaveOp::SBcnt1);
            let exec = ctx.exec();
            let mut count = ctx.sop1(bcnt, RegClass::S1, exec);
            if op == ReductionOp::Ixor {
                count = ctx.sop2(Opcode::SAndB32, RegClass::S1, count, Operand::c32(1));
            }
            Some(if op == ReductionOp::Fadd {
                let count = ctx.vop1(Opcode::VCvtF32U32, RegClass::V1, count);
                let src = ctx.as_vgpr(src);
                ctx.vop2(Opcode::VMulF32, RegClass::V1, src, count)
            } else if src.reg_type() == RegType::SGPR {
                ctx.sop2(Opcode::SMulI32, RegClass::S1, src, count)
            } else {
                ctx.vop3(Opcode::VMulLoU32, RegClass::V1, vec![count.into(), src.into()])
            })
        }
        ReductionOp::Imul | ReductionOp::Fmul => None,
    }
}

fn emit_bool_reduce(ctx: &mut IselContext, intrin: &IntrinsicInstr, op: ReductionOp) -> Temp {
    let src = ctx.get_bool_lm(&intrin.srcs[0]);
    match op {
        ReductionOp::Ior | ReductionOp::Umax | ReductionOp::Imin => ctx.lm_any(src),
        ReductionOp::Iand | ReductionOp::Umin | ReductionOp::Imax => {
            let andn2 = ctx.w64or32(WaveOp::SAndn2);
            let lm = ctx.lm();
            let exec = ctx.exec();
            let (_, any_false) = ctx.sop2_scc(andn2, lm, exec, src);
            ctx.sop2(Opcode::SXorB32, RegClass::S1, any_false, Operand::c32(1))
        }
        ReductionOp::Ixor | ReductionOp::Iadd => {
            let and = ctx.w64or32(WaveOp::SAnd);
            let lm = ctx.lm();
            let exec = ctx.exec();
            let active = ctx.sop2(and, lm, src, exec);
            let bcnt = ctx.w64or32(WaveOp::SBcnt1);
            let count = ctx.sop1(bcnt, RegClass::S1, active);
            ctx.sop2(Opcode::SAndB32, RegClass::S1, count, Operand::c32(1))
        }
        _ => isel_err!(intrin, "Unsupported boolean reduction"),
    }
}

fn visit_reduce(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let Some(op) = intrin.idx.reduction_op else {
        isel_err!(intrin, "Reduction without an operation");
    };
    let wave_size = ctx.program.wave_size;
    let cluster_size = match intrin.idx.cluster_size {
        0 => wave_size,
        c => c.min(wave_size),
    };
    let full = intrin.op == IntrinsicOp::Reduce && cluster_size == wave_size;
    let src_def = intrin.srcs[0];

    if src_def.is_bool() {
        if !full {
            isel_err!(intrin, "Boolean scans and clustered reductions are unsupported");
        }
        let res = emit_bool_reduce(ctx, intrin, op);
        ctx.bind_def(&def, res);
        return;
    }
    if src_def.bit_size != 32 {
        isel_err!(intrin, "Unsupported {}-bit reduction", src_def.bit_size);
    }

    let src = ctx.get_ssa_temp(&src_def);
    if full && !src_def.divergent {
        if let Some(res) = emit_uniform_reduce(ctx, op, src) {
            ctx.bind_def(&def, res);
            return;
        }
    }

    let opcode = match intrin.op {
        IntrinsicOp::Reduce => Opcode::PReduce,
        IntrinsicOp::InclusiveScan => Opcode::PInclusiveScan,
        _ => Opcode::PExclusiveScan,
    };
    let src = ctx.as_vgpr(src);
    let dst = ctx.tmp(if full { RegClass::S1 } else { RegClass::V1 });
    let scc = ctx.scc_def();
    ctx.push_op(opcode, vec![dst.into(), scc], vec![src.into()]).info = ReductionInfo {
        reduce_op: reduce_op(op),
        cluster_size: cluster_size,
    }
    .into();
    ctx.bind_def(&def, dst);
}

fn visit_quad(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let lanes = match intrin.op {
        IntrinsicOp::QuadBroadcast => match ctx.const_value(&intrin.srcs[1]) {
            Some(l) => [l as u8 & 3; 4],
            None => isel_err!(intrin, "Quad broadcast of a non-constant lane"),
        },
        IntrinsicOp::QuadSwapHorizontal => [1, 0, 3, 2],
        IntrinsicOp::QuadSwapVertical => [2, 3, 0, 1],
        _ => [3, 2, 1, 0],
    };

    let src_def = intrin.srcs[0];
    let res = if src_def.is_bool() {
        let mask = ctx.get_bool_lm(&src_def);
        let v = ctx.cndmask(RegClass::V1, Operand::c32(0), Operand::c32(u32::MAX), mask);
        let perm = emit_quad_perm(ctx, v, lanes);
        ctx.vopc(Opcode::VCmpLgI32, Operand::c32(0), perm)
    } else {
        let src = ctx.get_ssa_temp(&src_def);
        if src.size() > 1 {
            let parts: Vec<Temp> = ctx
                .emit_split_vector(src, src.size())
                .into_iter()
                .map(|d| emit_quad_perm(ctx, d, lanes))
                .collect();
            let rc = RegClass::new(RegType::VGPR, parts.len() as u32);
            ctx.create_vector_cached(rc, parts)
        } else if src.reg_class().is_subdword() {
            let perm = emit_quad_perm(ctx, src, lanes);
            let rc = src.reg_class().as_vgpr();
            ctx.emit_extract_vector(perm, 0, rc)
        } else {
            emit_quad_perm(ctx, src, lanes)
        }
    };
    ctx.bind_def(&def, res);
}

pub fn visit_intrinsic(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    match intrin.op {
        IntrinsicOp::LoadUbo => visit_load_buffer(ctx, intrin, true),
        IntrinsicOp::LoadSsbo => {
            let readonly = intrin.idx.access.can_reorder
                && !intrin.idx.access.coherent
                && !intrin.idx.access.volatile;
            visit_load_buffer(ctx, intrin, readonly)
        }
        IntrinsicOp::StoreSsbo => visit_store_ssbo(ctx, intrin),
        IntrinsicOp::SsboAtomic => {
            let rsrc = uniform_resource(ctx, &intrin.srcs[0]);
            visit_vmem_atomic(ctx, intrin, MemKind::Buffer, Some(rsrc), &intrin.srcs[1], 2)
        }
        IntrinsicOp::LoadShared => visit_load_shared(ctx, intrin),
        IntrinsicOp::StoreShared => visit_store_shared(ctx, intrin),
        IntrinsicOp::SharedAtomic => visit_shared_atomic(ctx, intrin),
        IntrinsicOp::LoadGlobal => visit_load_global(ctx, intrin),
        IntrinsicOp::StoreGlobal => visit_store_global(ctx, intrin),
        IntrinsicOp::GlobalAtomic => {
            visit_vmem_atomic(ctx, intrin, MemKind::Global, None, &intrin.srcs[0], 1)
        }
        IntrinsicOp::LoadScratch => visit_load_scratch(ctx, intrin),
        IntrinsicOp::StoreScratch => visit_store_scratch(ctx, intrin),
        IntrinsicOp::LoadPushConstant => visit_load_push_constant(ctx, intrin),
        IntrinsicOp::VulkanResourceIndex => visit_resource_index(ctx, intrin),
        IntrinsicOp::LoadVulkanDescriptor => visit_load_descriptor(ctx, intrin),

        IntrinsicOp::ControlBarrier | IntrinsicOp::MemoryBarrier => visit_barrier(ctx, intrin),

        IntrinsicOp::Discard => visit_discard(ctx, None),
        IntrinsicOp::DiscardIf => visit_discard(ctx, Some(&intrin.srcs[0])),
        IntrinsicOp::Demote => visit_demote(ctx, None),
        IntrinsicOp::DemoteIf => visit_demote(ctx, Some(&intrin.srcs[0])),
        IntrinsicOp::IsHelperInvocation => visit_is_helper(ctx, intrin),

        IntrinsicOp::LoadInput => match ctx.stage {
            ShaderStage::Vertex => visit_load_vertex_input(ctx, intrin),
            ShaderStage::Fragment => visit_fs_input(ctx, intrin, false),
            ShaderStage::Geometry => visit_load_gs_input(ctx, intrin),
            ShaderStage::TessCtrl => visit_load_tcs_input(ctx, intrin),
            _ => isel_err!(intrin, "Unsupported input in {:?} shader", ctx.stage),
        },
        IntrinsicOp::LoadBarycentricPixel => {
            let def = dst_def(intrin);
            let ij = arg(ctx.args.persp_center, "persp_center");
            ctx.bind_def(&def, ij);
        }
        IntrinsicOp::LoadInterpolatedInput => visit_fs_input(ctx, intrin, true),
        IntrinsicOp::LoadFragCoord => visit_load_frag_coord(ctx, intrin),
        IntrinsicOp::StoreOutput => visit_store_output(ctx, intrin),
        IntrinsicOp::LoadVertexId => {
            let def = dst_def(intrin);
            let id = arg(ctx.args.vertex_id, "vertex_id");
            ctx.bind_def(&def, id);
        }
        IntrinsicOp::LoadInstanceId => {
            let def = dst_def(intrin);
            let id = arg(ctx.args.instance_id, "instance_id");
            ctx.bind_def(&def, id);
        }
        IntrinsicOp::LoadLocalInvocationId => {
            let def = dst_def(intrin);
            let ids = arg(ctx.args.local_ids, "local_ids");
            ctx.bind_def(&def, ids);
        }
        IntrinsicOp::LoadLocalInvocationIndex => visit_local_invocation_index(ctx, intrin),
        IntrinsicOp::LoadWorkgroupId => {
            let def = dst_def(intrin);
            let ids: Vec<Temp> = ctx
                .args
                .workgroup_ids
                .iter()
                .map(|id| arg(*id, "workgroup_id"))
                .collect();
            let res = ctx.create_vector_cached(RegClass::S3, ids);
            ctx.bind_def(&def, res);
        }
        IntrinsicOp::LoadSubgroupInvocation => {
            let def = dst_def(intrin);
            let res = emit_mbcnt(ctx, None);
            ctx.bind_def(&def, res);
        }

        IntrinsicOp::Ballot => visit_ballot(ctx, intrin),
        IntrinsicOp::ReadFirstInvocation | IntrinsicOp::ReadInvocation => {
            visit_read_invocation(ctx, intrin)
        }
        IntrinsicOp::VoteAny | IntrinsicOp::VoteAll => visit_vote(ctx, intrin),
        IntrinsicOp::Reduce | IntrinsicOp::InclusiveScan | IntrinsicOp::ExclusiveScan => {
            visit_reduce(ctx, intrin)
        }
        IntrinsicOp::QuadBroadcast
        | IntrinsicOp::QuadSwapHorizontal
        | IntrinsicOp::QuadSwapVertical
        | IntrinsicOp::QuadSwapDiagonal => visit_quad(ctx, intrin),

        IntrinsicOp::ImageLoad => visit_image_load(ctx, intrin),
        IntrinsicOp::ImageStore => visit_image_store(ctx, intrin),
        IntrinsicOp::ImageAtomic => visit_image_atomic(ctx, intrin),
        IntrinsicOp::ImageSize => visit_image_size(ctx, intrin),

        IntrinsicOp::EmitVertex => visit_emit_vertex(ctx, intrin),
        IntrinsicOp::EndPrimitive => visit_end_primitive(ctx, intrin.idx.stream_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aco_options::{
        BindingLayout, CompilerOptions, ResourceLayout, SetLayout, ShaderConfig,
    };
    use crate::nir::{IntrinsicIndices, ShaderInfo};

    fn with_ctx(
        wave_size: u32,
        info: ShaderInfo,
        config: ShaderConfig,
        f: impl FnOnce(&mut IselContext),
    ) -> Program {
        let chip = ChipClass::GFX10;
        let options = CompilerOptions::new(chip, wave_size).unwrap();
        let mut program = Program::new(chip, wave_size, HwStage::CS, vec![info.stage]);
        program.create_and_insert_block();
        let mut ctx = IselContext::new(&options, &config, program, &info);
        f(&mut ctx);
        ctx.program
    }

    fn compute(wave_size: u32, f: impl FnOnce(&mut IselContext)) -> Program {
        let info = ShaderInfo::new(ShaderStage::Compute);
        with_ctx(wave_size, info, ShaderConfig::default(), f)
    }

    fn def(ctx: &mut IselContext, index: u32, bits: u8, divergent: bool, rc: RegClass) -> Def {
        let t = ctx.tmp(rc);
        ctx.ssa_temps.insert(index, t);
        Def {
            index: index,
            bit_size: bits,
            num_components: 1,
            divergent: divergent,
        }
    }

    fn intrin(op: IntrinsicOp, d: Def, srcs: &[Def], idx: IntrinsicIndices) -> IntrinsicInstr {
        IntrinsicInstr {
            op: op,
            def: Some(d),
            srcs: srcs.to_vec(),
            idx: idx,
        }
    }

    #[test]
    fn ballot_on_wave32_is_zero_extended() {
        let p = compute(32, |ctx| {
            let lm = ctx.lm();
            let cond = def(ctx, 0, 1, true, lm);
            let dst = def(ctx, 1, 64, false, RegClass::S2);
            let i = intrin(IntrinsicOp::Ballot, dst, &[cond], IntrinsicIndices::default());
            visit_intrinsic(ctx, &i);
        });
        assert!(p.instrs().any(|i| i.opcode == Opcode::SAndB32));
        let vec = p
            .instrs()
            .find(|i| i.opcode == Opcode::PCreateVector)
            .unwrap();
        assert_eq!(vec.operands[1].constant_value(), Some(0));
        assert_eq!(vec.definitions[0].temp().reg_class(), RegClass::S2);
    }

    #[test]
    fn uniform_add_reduction_counts_lanes() {
        let p = compute(64, |ctx| {
            let src = def(ctx, 0, 32, false, RegClass::S1);
            let dst = def(ctx, 1, 32, false, RegClass::S1);
            let idx = IntrinsicIndices {
                reduction_op: Some(ReductionOp::Iadd),
                ..Default::default()
            };
            let i = intrin(IntrinsicOp::Reduce, dst, &[src], idx);
            visit_intrinsic(ctx, &i);
        });
        assert!(p.instrs().any(|i| i.opcode == Opcode::SBcnt1I32B64));
        assert!(p.instrs().any(|i| i.opcode == Opcode::SMulI32));
        assert!(!p.instrs().any(|i| i.opcode == Opcode::PReduce));
    }

    #[test]
    fn divergent_scan_is_a_pseudo_op() {
        let p = compute(64, |ctx| {
            let src = def(ctx, 0, 32, true, RegClass::V1);
            let dst = def(ctx, 1, 32, true, RegClass::V1);
            let idx = IntrinsicIndices {
                reduction_op: Some(ReductionOp::Umax),
                ..Default::default()
            };
            let i = intrin(IntrinsicOp::InclusiveScan, dst, &[src], idx);
            visit_intrinsic(ctx, &i);
        });
        let scan = p
            .instrs()
            .find(|i| i.opcode == Opcode::PInclusiveScan)
            .unwrap();
        match &scan.info {
            FormatInfo::Reduction(r) => {
                assert_eq!(r.reduce_op, ReduceOp::UMax32);
                assert_eq!(r.cluster_size, 64);
            }
            _ => panic!("Scan without reduction info"),
        }
    }

    fn barrier_scope(workgroup_size: [u16; 3]) -> SyncScope {
        let mut info = ShaderInfo::new(ShaderStage::Compute);
        info.workgroup_size = workgroup_size;
        let p = with_ctx(64, info, ShaderConfig::default(), |ctx| {
            let mut idx = IntrinsicIndices::default();
            idx.execution_scope = nir::Scope::Workgroup;
            idx.memory_scope = nir::Scope::Workgroup;
            idx.modes.shared = true;
            idx.semantics.acquire = true;
            idx.semantics.release = true;
            let i = IntrinsicInstr {
                op: IntrinsicOp::ControlBarrier,
                def: None,
                srcs: Vec::new(),
                idx: idx,
            };
            visit_intrinsic(ctx, &i);
        });
        let barrier = p.instrs().find(|i| i.opcode == Opcode::PBarrier).unwrap();
        let FormatInfo::Barrier(b) = &barrier.info else {
            panic!("Barrier without barrier info");
        };
        assert_eq!(b.sync.storage, Storage::SHARED);
        assert_eq!(b.sync.semantics, Semantics::ACQREL);
        b.exec_scope
    }

    #[test]
    fn single_wave_workgroup_barrier_narrows_to_subgroup() {
        assert_eq!(barrier_scope([8, 8, 1]), SyncScope::Subgroup);
        assert_eq!(barrier_scope([16, 8, 1]), SyncScope::Workgroup);
    }

    #[test]
    fn resource_index_scales_by_binding_stride() {
        let config = ShaderConfig {
            layout: ResourceLayout {
                sets: vec![SetLayout {
                    bindings: vec![
                        BindingLayout {
                            offset: 0,
                            stride: 16,
                        },
                        BindingLayout {
                            offset: 32,
                            stride: 16,
                        },
                    ],
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let info = ShaderInfo::new(ShaderStage::Compute);
        let p = with_ctx(64, info, config, |ctx| {
            let index = def(ctx, 0, 32, true, RegClass::V1);
            let dst = def(ctx, 1, 32, true, RegClass::V1);
            let idx = IntrinsicIndices {
                binding: 1,
                ..Default::default()
            };
            let i = intrin(IntrinsicOp::VulkanResourceIndex, dst, &[index], idx);
            visit_intrinsic(ctx, &i);
        });
        let mul = p.instrs().find(|i| i.opcode == Opcode::VMulU32U24).unwrap();
        assert_eq!(mul.operands[0].constant_value(), Some(16));
        assert!(p
            .instrs()
            .any(|i| i.operands.iter().any(|o| o.constant_value() == Some(32))));
    }

    #[test]
    fn vote_all_inverts_any_false() {
        let p = compute(64, |ctx| {
            let lm = ctx.lm();
            let cond = def(ctx, 0, 1, true, lm);
            let dst = def(ctx, 1, 1, false, RegClass::S1);
            let i = intrin(IntrinsicOp::VoteAll, dst, &[cond], IntrinsicIndices::default());
            visit_intrinsic(ctx, &i);
        });
        let ops: Vec<Opcode> = p.instrs().map(|i| i.opcode).collect();
        assert_eq!(ops, vec![Opcode::SAndn2B64, Opcode::SXorB32]);
    }

    #[test]
    fn quad_swap_permutes_each_dword() {
        let p = compute(64, |ctx| {
            let src = def(ctx, 0, 64, true, RegClass::V2);
            let dst = def(ctx, 1, 64, true, RegClass::V2);
            let i = intrin(
                IntrinsicOp::QuadSwapDiagonal,
                dst,
                &[src],
                IntrinsicIndices::default(),
            );
            visit_intrinsic(ctx, &i);
            assert!(ctx.program.config.needs_wqm);
        });
        let dpp: Vec<_> = p
            .instrs()
            .filter(|i| i.opcode == Opcode::VMovB32)
            .collect();
        assert_eq!(dpp.len(), 2);
    }
}
