/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Program entry points
//!
//! A program is one hardware stage.  On GFX9 and later two software stages
//! may share it: the first one produces vertices into LDS and the second
//! consumes them, each running only on the lanes `merged_wave_info` hands
//! it.

use crate::aco_ir::*;
use crate::aco_isel_cf::{
    append_logical_end, append_logical_start, emit_divergent_if, resolve_branch_targets,
    visit_cf_list,
};
use crate::aco_isel_ctx::{IselContext, Outputs};
use crate::aco_isel_export::{
    create_fs_exports, create_vs_exports, emit_gs_done, emit_streamout, gsvs_layout,
    load_gsvs_outputs, store_esgs_ring_outputs, store_lds_outputs,
};
use crate::aco_isel_intrinsic::emit_mbcnt;
use crate::aco_isel_setup::{add_startpgm, arg, float_mode, init_context, num_output_slots};
use crate::aco_options::{CompileError, CompilerOptions, Result, ShaderConfig};
use crate::nir::{Instr as NirInstr, IntrinsicOp, Shader, ShaderBuilder, ShaderStage};

/// The hardware stage running `stages`
pub fn hw_stage(stages: &[ShaderStage], config: &ShaderConfig) -> Result<HwStage> {
    use ShaderStage::*;
    let hw = match stages {
        [Vertex] => match config.next_stage {
            Some(Geometry) => HwStage::ES,
            Some(TessCtrl) => HwStage::LS,
            _ => HwStage::VS,
        },
        [TessEval] => match config.next_stage {
            Some(Geometry) => HwStage::ES,
            _ => HwStage::VS,
        },
        [TessCtrl] | [Vertex, TessCtrl] => HwStage::HS,
        [Geometry] | [Vertex | TessEval, Geometry] => HwStage::GS,
        [Fragment] => HwStage::FS,
        [Compute] => HwStage::CS,
        _ => return Err(CompileError::InvalidStages(stages.to_vec())),
    };
    Ok(hw)
}

fn num_input_slots(shader: &Shader) -> u32 {
    let mut n = 0;
    shader.for_each_instr(|i| {
        if let NirInstr::Intrinsic(intrin) = i {
            if intrin.op == IntrinsicOp::LoadInput {
                n = n.max(intrin.idx.base as u32 + 1);
            }
        }
    });
    n
}

fn mark_export_end(ctx: &mut IselContext) {
    let has_exports = ctx.cur_block().instrs.iter().any(|i| i.opcode == Opcode::Exp);
    if has_exports {
        ctx.cur_block_mut().kind |= BlockKind::EXPORT_END;
    }
}

/// Writes whatever the stage hands to the next one
fn finish_stage(ctx: &mut IselContext, next: Option<ShaderStage>) {
    let config = ctx.config;
    match ctx.stage {
        ShaderStage::Vertex | ShaderStage::TessEval => match next {
            Some(ShaderStage::Geometry) => {
                if ctx.program.chip_class >= ChipClass::GFX9 {
                    store_lds_outputs(ctx);
                } else {
                    store_esgs_ring_outputs(ctx);
                }
            }
            Some(ShaderStage::TessCtrl) => store_lds_outputs(ctx),
            _ => {
                if let Some(so) = &config.streamout {
                    emit_streamout(ctx, so);
                }
                create_vs_exports(ctx);
            }
        },
        ShaderStage::Fragment => create_fs_exports(ctx),
        _ => (),
    }
}

fn select_stage(ctx: &mut IselContext, shader: &Shader, next: Option<ShaderStage>) {
    init_context(ctx, shader);
    ctx.outputs = Outputs::new();
    if !visit_cf_list(ctx, &shader.body) {
        tracing::debug!(stage = ?ctx.stage, "no lane reaches the end of the stage");
    }
    /* The hardware still expects the final exports with an empty exec */
    finish_stage(ctx, next);
}

fn begin_program(ctx: &mut IselContext, shaders: &[&Shader]) {
    let first = ctx.program.create_and_insert_block();
    ctx.program.block_mut(first).kind = BlockKind::TOP_LEVEL;
    ctx.block = first;
    add_startpgm(ctx, shaders);
    append_logical_start(ctx);
}

fn end_program(ctx: &mut IselContext) {
    if ctx.program.hw_stage == HwStage::GS {
        ctx.barrier(
            MemorySyncInfo::new(Storage::VMEM_OUTPUT, Semantics::RELEASE, SyncScope::Device),
            SyncScope::Invocation,
        );
        emit_gs_done(ctx);
    }
    mark_export_end(ctx);
    append_logical_end(ctx);
    ctx.cur_block_mut().kind |= BlockKind::UNIFORM;
    ctx.sopp(Opcode::SEndpgm, 0);
    resolve_branch_targets(&mut ctx.program);
}

/// Selects one program from one or two NIR shaders
///
/// Two shaders are merged into one hardware stage, which needs GFX9.
pub fn select_program(
    shaders: &[&Shader],
    options: &CompilerOptions,
    config: &ShaderConfig,
) -> Result<Program> {
    if shaders.is_empty() || shaders.len() > 2 {
        return Err(CompileError::TooManyStages(shaders.len()));
    }
    let merged = shaders.len() > 1;
    if merged && options.chip_class < ChipClass::GFX9 {
        return Err(CompileError::MergedStagesUnsupported(options.chip_class));
    }

    let stages: Vec<ShaderStage> = shaders.iter().map(|s| s.info.stage).collect();
    let hw = hw_stage(&stages, config)?;
    tracing::debug!(?stages, ?hw, chip = %options.chip_class, "selecting program");

    let last = shaders[shaders.len() - 1];
    let mut program = Program::new(options.chip_class, options.wave_size, hw, stages.clone());
    program.config.float_mode = float_mode(&last.info, options);

    let mut ctx = IselContext::new(options, config, program, &shaders[0].info);
    begin_program(&mut ctx, shaders);

    /* Bytes per vertex handed through LDS or the ESGS ring */
    ctx.esgs_itemsize = match (hw, merged) {
        (HwStage::ES | HwStage::LS, _) | (_, true) => num_output_slots(shaders[0]) * 16,
        (HwStage::HS, false) => num_input_slots(shaders[0]) * 16,
        _ => 0,
    };
    if let Some(gs) = shaders.iter().find(|s| s.info.stage == ShaderStage::Geometry) {
        ctx.gsvs_layout = gsvs_layout(gs);
    }

    for (i, shader) in shaders.iter().enumerate() {
        let next = stages.get(i + 1).copied().or(config.next_stage);
        if !merged {
            select_stage(&mut ctx, shader, next);
            continue;
        }

        if i > 0 {
            /* The producer's LDS writes have to land before anyone reads */
            ctx.barrier(
                MemorySyncInfo::new(Storage::SHARED, Semantics::ACQREL, SyncScope::Workgroup),
                SyncScope::Workgroup,
            );
        }
        /* merged_wave_info[i*8+7:i*8] is the number of lanes of stage i */
        let wave_info = arg(ctx.args.merged_wave_info, "merged_wave_info");
        let count = ctx.sop2(
            Opcode::SBfeU32,
            RegClass::S1,
            wave_info,
            Operand::c32((i as u32 * 8) | (8 << 16)),
        );
        let tid = emit_mbcnt(&mut ctx, None);
        let cond = ctx.vopc(Opcode::VCmpLtU32, tid, count);
        emit_divergent_if(&mut ctx, cond, |ctx| select_stage(ctx, shader, next));
    }

    end_program(&mut ctx);
    Ok(ctx.program)
}

/// Builds the hardware VS which copies a geometry shader's vertices from
/// the GSVS ring to the position and parameter exports
pub fn select_gs_copy_shader(
    gs: &Shader,
    options: &CompilerOptions,
    config: &ShaderConfig,
) -> Result<Program> {
    if gs.info.stage != ShaderStage::Geometry {
        return Err(CompileError::InvalidStages(vec![gs.info.stage]));
    }
    let mut program = Program::new(
        options.chip_class,
        options.wave_size,
        HwStage::VS,
        vec![ShaderStage::Geometry],
    );
    program.config.float_mode = float_mode(&gs.info, options);

    /* The copy shader takes vertex shader arguments */
    let vs = ShaderBuilder::new(ShaderStage::Vertex).finish();
    let mut ctx = IselContext::new(options, config, program, &vs.info);
    begin_program(&mut ctx, &[&vs]);
    init_context(&mut ctx, &vs);

    let layout = gsvs_layout(gs);
    load_gsvs_outputs(&mut ctx, &layout, u32::from(gs.info.gs.vertices_out));
    finish_stage(&mut ctx, None);

    end_program(&mut ctx);
    Ok(ctx.program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nir::{IntrinsicIndices, VARYING_SLOT_POS, VARYING_SLOT_VAR0};

    fn options(chip: ChipClass) -> CompilerOptions {
        CompilerOptions::new(chip, 64).unwrap()
    }

    fn count(p: &Program, op: Opcode) -> usize {
        p.instrs().filter(|i| i.opcode == op).count()
    }

    fn store_output(b: &mut ShaderBuilder, slot: u32, comps: u8) {
        let v = b.undef(32, comps);
        let idx = IntrinsicIndices {
            base: slot as i32,
            write_mask: (1 << comps) - 1,
            ..Default::default()
        };
        b.intrinsic(IntrinsicOp::StoreOutput, None, &[v], idx);
    }

    fn vertex_shader() -> Shader {
        let mut b = ShaderBuilder::new(ShaderStage::Vertex);
        store_output(&mut b, VARYING_SLOT_POS, 4);
        store_output(&mut b, VARYING_SLOT_VAR0, 2);
        b.finish()
    }

    fn geometry_shader() -> Shader {
        let mut b = ShaderBuilder::new(ShaderStage::Geometry);
        b.info_mut().gs.vertices_out = 3;
        store_output(&mut b, VARYING_SLOT_POS, 4);
        let n = b.imm32(0);
        b.intrinsic(IntrinsicOp::EmitVertex, None, &[n], IntrinsicIndices::default());
        b.finish()
    }

    #[test]
    fn stage_combinations() {
        use ShaderStage::*;
        let mut config = ShaderConfig::default();
        assert_eq!(hw_stage(&[Vertex], &config).unwrap(), HwStage::VS);
        assert_eq!(hw_stage(&[Vertex, Geometry], &config).unwrap(), HwStage::GS);
        assert_eq!(hw_stage(&[Vertex, TessCtrl], &config).unwrap(), HwStage::HS);
        config.next_stage = Some(Geometry);
        assert_eq!(hw_stage(&[TessEval], &config).unwrap(), HwStage::ES);
        config.next_stage = Some(TessCtrl);
        assert_eq!(hw_stage(&[Vertex], &config).unwrap(), HwStage::LS);
        assert!(matches!(
            hw_stage(&[Fragment, Compute], &config),
            Err(CompileError::InvalidStages(_))
        ));
    }

    #[test]
    fn merging_needs_gfx9() {
        let vs = vertex_shader();
        let gs = geometry_shader();
        let config = ShaderConfig::default();
        let err = select_program(&[&vs, &gs], &options(ChipClass::GFX8), &config).err().unwrap();
        assert!(matches!(err, CompileError::MergedStagesUnsupported(ChipClass::GFX8)));
        let err = select_program(&[&vs, &vs, &gs], &options(ChipClass::GFX9), &config).err().unwrap();
        assert!(matches!(err, CompileError::TooManyStages(3)));
    }

    #[test]
    fn vertex_shader_exports_and_ends() {
        let vs = vertex_shader();
        let p = select_program(&[&vs], &options(ChipClass::GFX10), &ShaderConfig::default()).unwrap();
        assert_eq!(p.hw_stage, HwStage::VS);
        assert_eq!(count(&p, Opcode::Exp), 2);

        let last = p.blocks.last().unwrap();
        assert!(last.kind.contains(BlockKind::EXPORT_END));
        assert_eq!(last.instrs.last().unwrap().opcode, Opcode::SEndpgm);
        assert_eq!(p.blocks[0].instrs[0].opcode, Opcode::PStartpgm);
    }

    #[test]
    fn merged_stages_run_under_lane_guards() {
        let vs = vertex_shader();
        let gs = geometry_shader();
        let p = select_program(&[&vs, &gs], &options(ChipClass::GFX9), &ShaderConfig::default())
            .unwrap();
        assert_eq!(p.hw_stage, HwStage::GS);

        /* One guard per stage and the LDS handoff in between */
        assert_eq!(count(&p, Opcode::VCmpLtU32), 2);
        let barriers: Vec<_> = p
            .instrs()
            .filter_map(|i| match &i.info {
                FormatInfo::Barrier(b) if i.opcode == Opcode::PBarrier => Some(b.exec_scope),
                _ => None,
            })
            .collect();
        assert!(barriers.contains(&SyncScope::Workgroup));

        /* The ES half writes LDS, not the ESGS ring */
        assert!(count(&p, Opcode::DsWriteB32) + count(&p, Opcode::DsWriteB64) > 0);
        assert_eq!(count(&p, Opcode::Exp), 0);

        /* emit and done */
        assert_eq!(count(&p, Opcode::SSendmsg), 2);
        let merges = p.blocks.iter().filter(|b| b.kind.contains(BlockKind::MERGE)).count();
        assert_eq!(merges, 2);
        assert!(p.blocks.last().unwrap().kind.contains(BlockKind::TOP_LEVEL));
    }

    #[test]
    fn copy_shader_reads_the_gsvs_ring() {
        let gs = geometry_shader();
        let p = select_gs_copy_shader(&gs, &options(ChipClass::GFX8), &ShaderConfig::default())
            .unwrap();
        assert_eq!(p.hw_stage, HwStage::VS);
        assert_eq!(count(&p, Opcode::BufferLoadDword), 4);
        assert_eq!(count(&p, Opcode::Exp), 1);
        assert!(p.blocks.last().unwrap().kind.contains(BlockKind::EXPORT_END));
    }
}
