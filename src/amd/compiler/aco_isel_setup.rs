/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::aco_ir::*;
use crate::aco_isel_ctx::IselContext;
use crate::aco_options::CompilerOptions;
use crate::nir::*;
use crate::nir::Instr;

use rustc_hash::FxHashMap;

/* Ring descriptors, 16 bytes each, behind `ShaderArgs::ring_offsets` */
pub const RING_SCRATCH: u32 = 0;
pub const RING_ESGS_VS: u32 = 1;
pub const RING_ESGS_GS: u32 = 2;
pub const RING_GSVS_VS: u32 = 3;
pub const RING_GSVS_GS: u32 = 4;

/// Entry arguments defined by `p_startpgm`
///
/// Every present argument is pinned to the register the hardware or the
/// driver loads it into.  Pointers passed in a single SGPR are 32-bit and
/// get their high half from `ResourceLayout::address32_hi`.
#[derive(Clone, Debug, Default)]
pub struct ShaderArgs {
    pub ring_offsets: Option<Temp>,
    pub desc_sets: Vec<Temp>,
    pub push_constants: Option<Temp>,
    pub vertex_buffers: Option<Temp>,
    pub base_vertex: Option<Temp>,
    pub start_instance: Option<Temp>,
    pub streamout_buffers: Option<Temp>,
    pub streamout_config: Option<Temp>,
    pub streamout_write_idx: Option<Temp>,
    pub streamout_offset: [Option<Temp>; 4],
    pub es2gs_offset: Option<Temp>,
    pub gs2vs_offset: Option<Temp>,
    pub gs_wave_id: Option<Temp>,
    pub merged_wave_info: Option<Temp>,
    pub workgroup_ids: [Option<Temp>; 3],
    pub tg_size: Option<Temp>,
    pub prim_mask: Option<Temp>,
    pub scratch_offset: Option<Temp>,

    pub vertex_id: Option<Temp>,
    pub instance_id: Option<Temp>,
    pub persp_center: Option<Temp>,
    pub frag_pos: [Option<Temp>; 4],
    pub local_ids: Option<Temp>,
    pub gs_vtx_offset: [Option<Temp>; 6],
    pub gs_invocation_id: Option<Temp>,
}

/// Unwraps an argument which the current stage must have declared
pub fn arg(a: Option<Temp>, name: &str) -> Temp {
    match a {
        Some(t) => t,
        None => panic!("Shader argument {} is not available in this stage", name),
    }
}

struct ArgAlloc {
    next_sgpr: u16,
    next_vgpr: u16,
    defs: Vec<Definition>,
}

impl ArgAlloc {
    fn sgpr(&mut self, program: &mut Program, rc: RegClass) -> Temp {
        /* 64-bit and wider arguments are dword-pair aligned */
        if rc.size() > 1 && self.next_sgpr % 2 != 0 {
            self.next_sgpr += 1;
        }
        let t = program.allocate_tmp(rc);
        self.defs.push(Definition::fixed(t, PhysReg::sgpr(self.next_sgpr)));
        self.next_sgpr += rc.size() as u16;
        t
    }

    fn vgpr(&mut self, program: &mut Program, rc: RegClass) -> Temp {
        let t = program.allocate_tmp(rc);
        self.defs.push(Definition::fixed(t, PhysReg::vgpr(self.next_vgpr)));
        self.next_vgpr += rc.size() as u16;
        t
    }

    fn fixed(&mut self, program: &mut Program, rc: RegClass, reg: PhysReg) -> Temp {
        let t = program.allocate_tmp(rc);
        self.defs.push(Definition::fixed(t, reg));
        t
    }
}

fn uses_intrinsic(shaders: &[&Shader], op: IntrinsicOp) -> bool {
    let mut found = false;
    for s in shaders {
        s.for_each_instr(|i| {
            if let Instr::Intrinsic(intrin) = i {
                found |= intrin.op == op;
            }
        });
    }
    found
}

/// Declares the entry arguments of the program and emits `p_startpgm`
/// into the current block
pub fn add_startpgm(ctx: &mut IselContext, shaders: &[&Shader]) {
    let stages: Vec<ShaderStage> = shaders.iter().map(|s| s.info.stage).collect();
    let has = |st: ShaderStage| stages.contains(&st);
    let hw_stage = ctx.program.hw_stage;
    let merged = stages.len() > 1;
    let scratch = shaders.iter().any(|s| s.info.scratch_size > 0);
    let streamout = ctx.config.streamout.is_some() && hw_stage == HwStage::VS;
    /* The GS copy shader runs as a hardware VS on behalf of a geometry
     * shader and reads the GSVS ring.
     */
    let gs_copy = hw_stage == HwStage::VS && ctx.program.sw_stages == [ShaderStage::Geometry];
    let gs_rings = has(ShaderStage::Geometry) || hw_stage == HwStage::ES || gs_copy;

    let mut a = ArgAlloc {
        next_sgpr: 0,
        next_vgpr: 0,
        defs: Vec::new(),
    };
    let mut args = ShaderArgs::default();
    let p = &mut ctx.program;

    if scratch || gs_rings {
        args.ring_offsets = Some(a.sgpr(p, RegClass::S2));
    }
    for _ in 0..ctx.config.layout.num_sets() {
        let set = a.sgpr(p, RegClass::S1);
        args.desc_sets.push(set);
    }
    if ctx.config.layout.push_constant_size > 0 {
        args.push_constants = Some(a.sgpr(p, RegClass::S1));
    }
    if merged {
        args.merged_wave_info = Some(a.sgpr(p, RegClass::S1));
    }

    if has(ShaderStage::Vertex) {
        if !ctx.config.vertex_inputs.is_empty() {
            args.vertex_buffers = Some(a.sgpr(p, RegClass::S1));
        }
        args.base_vertex = Some(a.sgpr(p, RegClass::S1));
        args.start_instance = Some(a.sgpr(p, RegClass::S1));
    }
    if streamout {
        args.streamout_buffers = Some(a.sgpr(p, RegClass::S1));
        args.streamout_config = Some(a.sgpr(p, RegClass::S1));
        args.streamout_write_idx = Some(a.sgpr(p, RegClass::S1));
        let strides = ctx.config.streamout.as_ref().map(|so| so.strides).unwrap_or_default();
        for (i, stride) in strides.iter().enumerate() {
            if *stride != 0 {
                args.streamout_offset[i] = Some(a.sgpr(p, RegClass::S1));
            }
        }
    }
    if hw_stage == HwStage::ES {
        args.es2gs_offset = Some(a.sgpr(p, RegClass::S1));
    }
    if has(ShaderStage::Geometry) {
        args.gs2vs_offset = Some(a.sgpr(p, RegClass::S1));
        args.gs_wave_id = Some(a.sgpr(p, RegClass::S1));
    }
    if has(ShaderStage::Compute) {
        for id in args.workgroup_ids.iter_mut() {
            *id = Some(a.sgpr(p, RegClass::S1));
        }
        args.tg_size = Some(a.sgpr(p, RegClass::S1));
    }
    if merged || has(ShaderStage::Compute) || hw_stage == HwStage::LS {
        /* Needed for the local invocation index and the LDS handoff */
        if args.tg_size.is_none() {
            args.tg_size = Some(a.sgpr(p, RegClass::S1));
        }
    }
    if scratch {
        args.scratch_offset = Some(a.sgpr(p, RegClass::S1));
    }
    if has(ShaderStage::Fragment) {
        args.prim_mask = Some(a.fixed(p, RegClass::S1, PhysReg::M0));
    }

    if has(ShaderStage::Vertex) {
        args.vertex_id = Some(a.vgpr(p, RegClass::V1));
        args.instance_id = Some(a.vgpr(p, RegClass::V1));
    }
    if has(ShaderStage::Geometry) {
        /* GFX9 packs two 16-bit vertex offsets per register */
        let num_offsets = if p.chip_class >= ChipClass::GFX9 { 3 } else { 6 };
        for off in args.gs_vtx_offset.iter_mut().take(num_offsets) {
            *off = Some(a.vgpr(p, RegClass::V1));
        }
        args.gs_invocation_id = Some(a.vgpr(p, RegClass::V1));
    }
    if has(ShaderStage::Fragment) {
        args.persp_center = Some(a.vgpr(p, RegClass::V2));
        for pos in args.frag_pos.iter_mut() {
            *pos = Some(a.vgpr(p, RegClass::V1));
        }
    }
    if has(ShaderStage::Compute) {
        args.local_ids = Some(a.vgpr(p, RegClass::V3));
    }

    tracing::trace!(
        sgprs = a.next_sgpr,
        vgprs = a.next_vgpr,
        "declared shader arguments"
    );

    let defs = a.defs;
    ctx.push_op(Opcode::PStartpgm, defs, Vec::new());
    ctx.args = args;

    if uses_intrinsic(shaders, IntrinsicOp::LoadScratch)
        || uses_intrinsic(shaders, IntrinsicOp::StoreScratch)
    {
        if !ctx.options.has_scratch_insts {
            let rings = arg(ctx.args.ring_offsets, "ring_offsets");
            ctx.push_op(
                Opcode::PInitScratch,
                Vec::new(),
                vec![rings.into(), arg(ctx.args.scratch_offset, "scratch_offset").into()],
            );
        }
    }
}

/// Converts a 32-bit pointer argument to a 64-bit address
pub fn convert_pointer_to_64_bit(ctx: &mut IselContext, ptr: Temp) -> Temp {
    if ptr.size() == 2 {
        return ptr;
    }
    let hi = ctx.config.layout.address32_hi;
    ctx.create_vector(RegClass::S2, vec![ptr.into(), Operand::c32(hi)])
}

/// Loads a 16-byte ring descriptor
pub fn load_ring_desc(ctx: &mut IselContext, ring: u32) -> Temp {
    let ptr = arg(ctx.args.ring_offsets, "ring_offsets");
    ctx.smem(
        Opcode::SLoadDwordx4,
        RegClass::S4,
        vec![ptr.into(), Operand::c32(ring * 16)],
        SmemInfo {
            sync: MemorySyncInfo::default(),
            ..Default::default()
        },
    )
}

fn lds_alloc_granule(chip: ChipClass) -> u32 {
    if chip >= ChipClass::GFX7 {
        512
    } else {
        256
    }
}

pub fn float_mode(info: &ShaderInfo, options: &CompilerOptions) -> FloatMode {
    let fc = &info.float_controls;
    let round = |rtz: bool| {
        if rtz {
            RoundMode::TowardZero
        } else {
            RoundMode::NearestEven
        }
    };
    let denorm = |flush: bool| {
        if flush {
            DenormMode::Flush
        } else {
            DenormMode::Keep
        }
    };
    /* Without explicit preservation requests, 32-bit denormals are flushed
     * on parts where the transcendentals can't handle them anyway.
     */
    let flush32 = fc.denorm_flush_32
        || (options.has_transcendental_denorm_bug && !fc.signed_zero_inf_nan_preserve_32);
    FloatMode {
        round32: round(fc.rtz_32),
        round16_64: round(fc.rtz_16_64),
        denorm32: denorm(flush32),
        denorm16_64: denorm(fc.denorm_flush_16_64),
        preserve_signed_zero_inf_nan32: fc.signed_zero_inf_nan_preserve_32,
        preserve_signed_zero_inf_nan16_64: fc.signed_zero_inf_nan_preserve_16_64,
    }
}

/// Returns true if the ALU op can only be computed on the VALU
fn alu_needs_vgpr(alu: &AluInstr, options: &CompilerOptions) -> bool {
    let bits = alu.def.bit_size;
    match alu.op {
        AluOp::Fadd
        | AluOp::Fsub
        | AluOp::Fmul
        | AluOp::Ffma
        | AluOp::Fneg
        | AluOp::Fabs
        | AluOp::Fsat
        | AluOp::Fmin
        | AluOp::Fmax
        | AluOp::Frcp
        | AluOp::Frsq
        | AluOp::Fsqrt
        | AluOp::Flog2
        | AluOp::Fexp2
        | AluOp::Fsin
        | AluOp::Fcos
        | AluOp::Ffloor
        | AluOp::Fceil
        | AluOp::Ftrunc
        | AluOp::FroundEven
        | AluOp::Ffract
        | AluOp::Fddx
        | AluOp::Fddy
        | AluOp::I2f32
        | AluOp::U2f32
        | AluOp::F2i32
        | AluOp::F2u32
        | AluOp::I2f64
        | AluOp::U2f64
        | AluOp::F2f16
        | AluOp::F2f32
        | AluOp::F2f64
        | AluOp::PackHalf2x16 => true,
        AluOp::UmulHigh | AluOp::ImulHigh => !options.has_scalar_mul_hi,
        AluOp::Imul => bits == 64,
        /* Packed 16-bit math has no scalar form */
        AluOp::Iadd
        | AluOp::Isub
        | AluOp::Imin
        | AluOp::Imax
        | AluOp::Umin
        | AluOp::Umax
        | AluOp::Ishl
        | AluOp::Ishr
        | AluOp::Ushr => bits < 32 && alu.def.num_components > 1,
        _ => false,
    }
}

fn intrinsic_needs_vgpr(intrin: &IntrinsicInstr) -> bool {
    matches!(
        intrin.op,
        IntrinsicOp::LoadInput
            | IntrinsicOp::LoadBarycentricPixel
            | IntrinsicOp::LoadInterpolatedInput
            | IntrinsicOp::LoadFragCoord
            | IntrinsicOp::LoadVertexId
            | IntrinsicOp::LoadInstanceId
            | IntrinsicOp::LoadLocalInvocationId
            | IntrinsicOp::LoadLocalInvocationIndex
            | IntrinsicOp::LoadSubgroupInvocation
            | IntrinsicOp::SsboAtomic
            | IntrinsicOp::SharedAtomic
            | IntrinsicOp::GlobalAtomic
            | IntrinsicOp::ImageAtomic
            | IntrinsicOp::InclusiveScan
            | IntrinsicOp::ExclusiveScan
            | IntrinsicOp::QuadBroadcast
            | IntrinsicOp::QuadSwapHorizontal
            | IntrinsicOp::QuadSwapVertical
            | IntrinsicOp::QuadSwapDiagonal
    )
}

/// Register class of a value of the given shape in the given storage
pub fn get_reg_class(def: &Def, ty: RegType, lm: RegClass) -> RegClass {
    if def.is_bool() {
        assert!(def.num_components == 1, "Boolean vectors are not supported");
        return if ty == RegType::VGPR || def.divergent {
            lm
        } else {
            RegClass::S1
        };
    }
    match ty {
        RegType::VGPR => RegClass::get(RegType::VGPR, def.bytes()),
        RegType::SGPR => RegClass::new(RegType::SGPR, def.bytes().next_multiple_of(4) / 4),
    }
}

/// Computes the class of every SSA def
///
/// Classes only ever move from scalar to vector storage, so iterating
/// until nothing changes terminates and handles loop-carried phis.
fn assign_reg_classes(
    shader: &Shader,
    options: &CompilerOptions,
    lm: RegClass,
) -> FxHashMap<u32, RegClass> {
    let mut rcs: FxHashMap<u32, RegClass> = FxHashMap::default();
    let is_vector = |rcs: &FxHashMap<u32, RegClass>, d: &Def| {
        matches!(rcs.get(&d.index), Some(rc) if rc.reg_type() == RegType::VGPR || rc.is_lane_mask())
    };

    loop {
        let mut changed = false;
        shader.for_each_instr(|instr| {
            let Some(def) = instr.def() else {
                return;
            };
            let ty = match instr {
                Instr::Alu(alu) => {
                    if def.divergent
                        || alu_needs_vgpr(alu, options)
                        || (!def.is_bool()
                            && alu.srcs.iter().any(|s| {
                                !s.src.is_bool() && is_vector(&rcs, &s.src)
                            }))
                    {
                        RegType::VGPR
                    } else {
                        RegType::SGPR
                    }
                }
                Instr::Intrinsic(intrin) => {
                    if def.divergent || intrinsic_needs_vgpr(intrin) {
                        RegType::VGPR
                    } else {
                        RegType::SGPR
                    }
                }
                Instr::Tex(_) => RegType::VGPR,
                Instr::LoadConst { .. } | Instr::Undef { .. } => {
                    if def.divergent {
                        RegType::VGPR
                    } else {
                        RegType::SGPR
                    }
                }
                Instr::Phi { srcs, .. } => {
                    /* A uniform phi of divergent values still needs them */
                    if def.divergent || srcs.iter().any(|(_, s)| is_vector(&rcs, s)) {
                        RegType::VGPR
                    } else {
                        RegType::SGPR
                    }
                }
                Instr::Jump(_) => unreachable!(),
            };
            let mut rc = get_reg_class(&def, ty, lm);
            if def.is_bool() && !def.divergent && ty == RegType::VGPR {
                /* Uniform booleans computed on the VALU are reduced to SCC
                 * except for phis, which keep lane masks.
                 */
                if !matches!(instr, Instr::Phi { .. }) {
                    rc = RegClass::S1;
                }
            }
            if rcs.insert(def.index, rc) != Some(rc) {
                changed = true;
            }
        });
        if !changed {
            break;
        }
    }
    rcs
}

/// Highest output slot written by a shader, plus one
pub fn num_output_slots(shader: &Shader) -> u32 {
    let mut n = 0;
    shader.for_each_instr(|i| {
        if let Instr::Intrinsic(intrin) = i {
            if intrin.op == IntrinsicOp::StoreOutput {
                n = n.max(intrin.idx.base as u32 + 1);
            }
        }
    });
    n
}

/// Prepares the context for selecting `shader`
///
/// Every SSA def gets its temporary up front.  Constants and undefs are
/// recorded so uses can fold them.
pub fn init_context(ctx: &mut IselContext, shader: &Shader) {
    ctx.stage = shader.info.stage;
    ctx.shader_info = shader.info.clone();
    ctx.ssa_temps.clear();
    ctx.nir_to_aco.clear();
    ctx.constants.clear();
    ctx.undefs.clear();

    let lm = ctx.program.lane_mask;
    let rcs = assign_reg_classes(shader, ctx.options, lm);

    let mut ordered: Vec<(u32, RegClass)> = rcs.into_iter().collect();
    ordered.sort_by_key(|(idx, _)| *idx);
    for (idx, rc) in ordered {
        let t = ctx.program.allocate_tmp(rc);
        ctx.ssa_temps.insert(idx, t);
    }
    ctx.first_fresh_temp = ctx.program.peek_allocation_id();

    shader.for_each_instr(|i| match i {
        Instr::LoadConst { def, values } => {
            ctx.constants.insert(def.index, values.clone());
        }
        Instr::Undef { def } => {
            ctx.undefs.insert(def.index);
        }
        _ => (),
    });

    let granule = lds_alloc_granule(ctx.options.chip_class);
    let lds = shader.info.shared_size.next_multiple_of(granule);
    ctx.program.config.lds_size = ctx.program.config.lds_size.max(lds);
    let scratch = shader.info.scratch_size.next_multiple_of(4);
    ctx.program.config.scratch_size = ctx.program.config.scratch_size.max(scratch);

    tracing::trace!(
        stage = ?shader.info.stage,
        temps = ctx.ssa_temps.len(),
        "initialized selection context"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(shader: &Shader) -> FxHashMap<u32, RegClass> {
        let options = CompilerOptions::new(ChipClass::GFX9, 64).unwrap();
        assign_reg_classes(shader, &options, RegClass::lane_mask(64))
    }

    #[test]
    fn float_math_lives_in_vgprs() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let x = b.imm32(3);
        let i = b.alu2(AluOp::Iadd, x, x);
        let f = b.alu2(AluOp::Fadd, x, x);
        let c = b.alu2(AluOp::Flt, f, x);
        let s = b.finish();
        let rcs = classes(&s);
        assert_eq!(rcs[&i.index], RegClass::S1);
        assert_eq!(rcs[&f.index], RegClass::V1);
        /* Uniform compare of VALU values ends up in SCC */
        assert_eq!(rcs[&c.index], RegClass::S1);
    }

    #[test]
    fn vgpr_sources_propagate() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let x = b.imm32(3);
        let f = b.alu2(AluOp::Fmul, x, x);
        let i = b.alu2(AluOp::Iadd, f, x);
        let h = b.new_def(16, 1, true);
        b.alu_to(h, AluOp::U2u16, &[x.into()]);
        let s = b.finish();
        let rcs = classes(&s);
        assert_eq!(rcs[&i.index], RegClass::V1);
        assert_eq!(rcs[&h.index], RegClass::V2B);
    }

    #[test]
    fn loop_phis_reach_a_fixed_point() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let zero = b.imm32(0);
        let pre = b.block_index();
        b.push_loop();
        let phi = b.new_def(32, 1, false);
        let next = b.new_def(32, 1, false);
        b.phi_to(phi, &[(pre, zero), (pre + 1, next)]);
        let f = b.alu2(AluOp::Fadd, phi, phi);
        b.alu_to(next, AluOp::Iadd, &[f.into(), zero.into()]);
        b.jump(JumpKind::Break);
        b.pop_loop();
        let s = b.finish();
        let rcs = classes(&s);
        assert_eq!(rcs[&next.index], RegClass::V1);
        assert_eq!(rcs[&phi.index], RegClass::V1);
    }

    #[test]
    fn boolean_classes() {
        let lm = RegClass::lane_mask(32);
        let div = Def {
            index: 0,
            bit_size: 1,
            num_components: 1,
            divergent: true,
        };
        let uni = Def {
            divergent: false,
            ..div
        };
        assert_eq!(get_reg_class(&div, RegType::SGPR, lm), lm);
        assert_eq!(get_reg_class(&uni, RegType::SGPR, lm), RegClass::S1);
        let v = Def {
            bit_size: 16,
            num_components: 3,
            ..div
        };
        assert_eq!(get_reg_class(&v, RegType::VGPR, lm), RegClass::V6B);
        assert_eq!(get_reg_class(&v, RegType::SGPR, lm), RegClass::S2);
    }
}
