/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Structured control flow to CFG lowering
//!
//! Every NIR if and loop becomes a fixed shape of ACO blocks with two edge
//! sets: logical edges follow the flow of values, linear edges the order in
//! which the hardware actually runs the blocks.  For a divergent if both
//! sides run one after the other, so the linear CFG threads them through
//! an `invert` block while logically they are siblings.
//!
//! Blocks whose predecessors are known before their position (endif, the
//! invert block and loop exits) are collected as `PendingBlock`s and only
//! inserted once everything that precedes them has been emitted, which
//! keeps the block list in linear order.

use crate::aco_builder::Builder;
use crate::aco_ir::*;
use crate::aco_isel_alu::visit_alu_instr;
use crate::aco_isel_ctx::{IfScope, IselContext, LoopScope, PendingBlock, PendingPhi};
use crate::aco_isel_intrinsic::visit_intrinsic;
use crate::aco_isel_tex::visit_tex;
use crate::nir::{self, CfNode, Def, IntrinsicOp, JumpKind};

pub(crate) fn append_logical_start(ctx: &mut IselContext) {
    ctx.push_op(Opcode::PLogicalStart, Vec::new(), Vec::new());
}

pub(crate) fn append_logical_end(ctx: &mut IselContext) {
    ctx.push_op(Opcode::PLogicalEnd, Vec::new(), Vec::new());
}

/// Targets are filled in by `resolve_branch_targets()` once the CFG is
/// complete
fn emit_branch(ctx: &mut IselContext, op: Opcode, cond: Option<Operand>) {
    ctx.branch(op, cond, [0, 0]);
}

fn add_kind(ctx: &mut IselContext, kind: BlockKind) {
    ctx.cur_block_mut().kind |= kind;
}

fn create_block(ctx: &mut IselContext) -> u32 {
    let idx = ctx.program.create_and_insert_block();
    ctx.program.block_mut(idx).loop_nest_depth = ctx.cf.loop_nest_depth;
    idx
}

fn insert_block(ctx: &mut IselContext, pending: PendingBlock) -> u32 {
    let idx = create_block(ctx);
    ctx.program.block_mut(idx).kind = pending.kind;
    for pred in pending.logical_preds {
        ctx.program.add_logical_edge(pred, idx);
    }
    for pred in pending.linear_preds {
        ctx.program.add_linear_edge(pred, idx);
    }
    idx
}

/// A lane mask constant with every lane set or cleared
fn lm_const(ctx: &IselContext, set: bool) -> Operand {
    let v = if set { u64::MAX } else { 0 };
    if ctx.program.wave_size == 64 {
        Operand::c64(v)
    } else {
        Operand::c32(v as u32)
    }
}

/// Runs `f` as if it were emitting at the end of block `pred`, before its
/// logical end
fn emit_in_pred<T>(
    ctx: &mut IselContext,
    pred: u32,
    f: impl FnOnce(&mut IselContext) -> T,
) -> T {
    let saved = std::mem::replace(&mut ctx.block, pred);
    let start = ctx.cur_block().instrs.len();
    let res = f(ctx);

    let block = ctx.cur_block_mut();
    let new: Vec<Box<Instr>> = block.instrs.drain(start..).collect();
    let pos = match block
        .instrs
        .iter()
        .position(|i| i.opcode == Opcode::PLogicalEnd)
    {
        Some(pos) => pos,
        None => block.instrs.len() - usize::from(block.branch().is_some()),
    };
    block.instrs.splice(pos..pos, new);
    ctx.block = saved;
    res
}

/// The NIR source of a phi flowing in from ACO block `pred`
///
/// Linear-only helper blocks have a single linear predecessor and
/// forward its value.
fn phi_source(ctx: &IselContext, pred: u32, srcs: &[(u32, Def)], logical: bool) -> Option<Def> {
    let mut b = pred;
    loop {
        if let Some((_, def)) = srcs
            .iter()
            .find(|(nir_block, _)| ctx.nir_to_aco.get(nir_block) == Some(&b))
        {
            return Some(*def);
        }
        if logical {
            return None;
        }
        let block = ctx.program.block(b);
        match block.linear_preds.as_slice() {
            [single] if block.logical_preds.is_empty() && block.logical_succs.is_empty() => {
                b = *single;
            }
            _ => return None,
        }
    }
}

fn get_phi_operand(ctx: &mut IselContext, pred: u32, def: &Def, rc: RegClass) -> Operand {
    if ctx.is_undef(def) {
        return Operand::undef(rc);
    }
    if rc.is_lane_mask() {
        if let Some(c) = ctx.const_value(def) {
            return lm_const(ctx, c != 0);
        }
    }

    let t = ctx.get_ssa_temp(def);
    if t.reg_class() == rc {
        return t.into();
    }
    emit_in_pred(ctx, pred, |ctx| {
        if rc.is_lane_mask() {
            ctx.bool_to_vector_condition(t)
        } else if rc.reg_type() == RegType::VGPR {
            let v = ctx.as_vgpr(t);
            if rc.is_subdword() {
                ctx.emit_extract_vector(v, 0, rc)
            } else {
                v
            }
        } else {
            panic!("Cannot use {:?} as a source of a {:?} phi", t, rc);
        }
    })
    .into()
}

/// One operand per predecessor of `block`, in predecessor order
///
/// Predecessors without a matching source, such as paths which ended in a
/// discard or loop exits reached through a continue-or-break block, read
/// an undefined value.
fn phi_operands(
    ctx: &mut IselContext,
    block: u32,
    srcs: &[(u32, Def)],
    rc: RegClass,
    logical: bool,
) -> Vec<Operand> {
    let b = ctx.program.block(block);
    let preds = if logical {
        b.logical_preds.clone()
    } else {
        b.linear_preds.clone()
    };
    preds
        .into_iter()
        .map(|pred| match phi_source(ctx, pred, srcs, logical) {
            Some(def) => get_phi_operand(ctx, pred, &def, rc),
            None => Operand::undef(rc),
        })
        .collect()
}

fn push_phi(ctx: &mut IselContext, dst: Temp, logical: bool, ops: Vec<Operand>) {
    let op = if logical { Opcode::PPhi } else { Opcode::PLinearPhi };
    let phi = Instr::new_boxed(op, ops, vec![dst.into()]);
    /* Phis stay in front of everything else */
    let block = ctx.cur_block_mut();
    let pos = block.instrs.iter().take_while(|i| i.is_phi()).count();
    block.instrs.insert(pos, phi);
}

fn is_logical_phi(dst: Temp, def: &Def) -> bool {
    !dst.is_linear() || def.divergent
}

fn visit_phi(ctx: &mut IselContext, def: &Def, srcs: &[(u32, Def)]) {
    let dst = ctx.get_ssa_temp(def);
    let logical = is_logical_phi(dst, def);
    let block = ctx.block;
    let ops = phi_operands(ctx, block, srcs, dst.reg_class(), logical);
    push_phi(ctx, dst, logical, ops);
}

/// Emits the phis of a loop header with only the preheader operand
///
/// The continue edges of a loop are only known once its whole body has
/// been visited.  Until `finalize_loop_continue_phis()` runs nothing may
/// read the operands of these phis.
fn build_provisional_header_phis(ctx: &mut IselContext, first: &nir::Block) {
    let header = ctx.block;
    for instr in &first.instrs {
        let nir::Instr::Phi { def, srcs } = instr else {
            break;
        };
        let dst = ctx.get_ssa_temp(def);
        let logical = is_logical_phi(dst, def);
        let ops = phi_operands(ctx, header, srcs, dst.reg_class(), logical);
        push_phi(ctx, dst, logical, ops);
        ctx.cf.parent_loop_mut().pending_phis.push(PendingPhi {
            def: dst,
            linear: !logical,
            srcs: srcs.clone(),
        });
    }
}

/// Rebuilds the operands of the header phis from the final predecessor
/// lists of the header
fn finalize_loop_continue_phis(ctx: &mut IselContext, header: u32, phis: Vec<PendingPhi>) {
    for phi in phis {
        let ops = phi_operands(ctx, header, &phi.srcs, phi.def.reg_class(), !phi.linear);
        let block = ctx.program.block_mut(header);
        let Some(instr) = block
            .instrs
            .iter_mut()
            .take_while(|i| i.is_phi())
            .find(|i| i.definitions[0].temp() == phi.def)
        else {
            panic!("Loop header BB{} lost the phi of {:?}", header, phi.def);
        };
        instr.operands = ops;
    }
}

fn is_pending_header_phi(ctx: &IselContext, def: &Def) -> bool {
    let dst = ctx.get_ssa_temp(def);
    match ctx.cf.parent_loop() {
        Some(l) => l.pending_phis.iter().any(|p| p.def == dst),
        None => false,
    }
}

fn visit_load_const(ctx: &mut IselContext, def: &Def, values: &[u64]) {
    let dst = ctx.get_ssa_temp(def);
    let rc = dst.reg_class();
    if def.is_bool() {
        let set = values[0] != 0;
        let op = if rc.is_lane_mask() {
            lm_const(ctx, set)
        } else {
            Operand::c32(set.into())
        };
        let res = ctx.copy(rc, op);
        ctx.bind(dst, res);
        return;
    }

    let bits = u32::from(def.bit_size);
    let mut dwords = vec![0_u32; rc.size().max(1) as usize];
    for (i, v) in values.iter().enumerate() {
        let bit = i as u32 * bits;
        let v = if bits == 64 { *v } else { v & ((1 << bits) - 1) };
        let dw = (bit / 32) as usize;
        dwords[dw] |= (v << (bit % 32)) as u32;
        if bits == 64 {
            dwords[dw + 1] = (v >> 32) as u32;
        }
    }
    let res = if dwords.len() == 1 {
        let op = if rc.bytes() == 2 {
            Operand::c16(dwords[0] as u16)
        } else {
            Operand::c32(dwords[0])
        };
        ctx.copy(rc, op)
    } else {
        let ops = dwords.into_iter().map(Operand::c32).collect();
        ctx.create_vector(rc, ops)
    };
    ctx.bind(dst, res);
}

/// Undefined values read as zero
fn visit_undef(ctx: &mut IselContext, def: &Def) {
    let dst = ctx.get_ssa_temp(def);
    let rc = dst.reg_class();
    let res = if rc.size() <= 1 || rc.is_lane_mask() {
        ctx.copy(rc, Operand::zero(rc.bytes()))
    } else {
        ctx.create_vector(rc, vec![Operand::c32(0); rc.size() as usize])
    };
    ctx.bind(dst, res);
}

/// State of one if between its entry and its merge
struct IfContext {
    if_block: u32,
    invert: PendingBlock,
    invert_idx: u32,
    endif: PendingBlock,
    scope: IfScope,
    then_branch_divergent: bool,
    uniform_has_then_branch: bool,
}

fn begin_divergent_if_then(ctx: &mut IselContext, cond: Temp) -> IfContext {
    append_logical_end(ctx);
    add_kind(ctx, BlockKind::BRANCH);
    /* Skips the then side if no lane takes it */
    emit_branch(ctx, Opcode::PCbranchZ, Some(cond.into()));

    let if_block = ctx.block;
    let top_level = ctx.cur_block().kind & BlockKind::TOP_LEVEL;
    let scope = ctx.cf.enter_if(true);

    let then_logical = create_block(ctx);
    ctx.program.add_edge(if_block, then_logical);
    ctx.block = then_logical;
    append_logical_start(ctx);

    IfContext {
        if_block: if_block,
        invert: PendingBlock::new(BlockKind::INVERT),
        invert_idx: 0,
        endif: PendingBlock::new(BlockKind::MERGE | top_level),
        scope: scope,
        then_branch_divergent: false,
        uniform_has_then_branch: false,
    }
}

/// Whether no lane falls out of the current block logically
///
/// `reachable` is what lowering the preceding list returned.
fn logically_dead(ctx: &IselContext, reachable: bool) -> bool {
    ctx.cf.has_divergent_branch || (!reachable && !ctx.cf.has_branch)
}

fn begin_divergent_if_else(ctx: &mut IselContext, ic: &mut IfContext, then_reachable: bool) {
    let then_logical = ctx.block;
    append_logical_end(ctx);
    emit_branch(ctx, Opcode::PBranch, None);
    ic.invert.linear_preds.push(then_logical);
    assert!(!ctx.cf.has_branch);
    ic.then_branch_divergent = logically_dead(ctx, then_reachable);
    if !ic.then_branch_divergent {
        ic.endif.logical_preds.push(then_logical);
    }
    add_kind(ctx, BlockKind::UNIFORM);
    ctx.cf.has_divergent_branch = false;

    let then_linear = create_block(ctx);
    ctx.program.add_linear_edge(ic.if_block, then_linear);
    ctx.block = then_linear;
    add_kind(ctx, BlockKind::UNIFORM);
    emit_branch(ctx, Opcode::PBranch, None);
    ic.invert.linear_preds.push(then_linear);

    ic.invert_idx = insert_block(ctx, std::mem::take(&mut ic.invert));
    ctx.block = ic.invert_idx;
    emit_branch(ctx, Opcode::PBranch, None);

    let else_logical = create_block(ctx);
    ctx.program.add_logical_edge(ic.if_block, else_logical);
    ctx.program.add_linear_edge(ic.invert_idx, else_logical);
    ctx.block = else_logical;
    append_logical_start(ctx);
}

fn end_divergent_if(ctx: &mut IselContext, mut ic: IfContext, else_reachable: bool) {
    let else_logical = ctx.block;
    append_logical_end(ctx);
    emit_branch(ctx, Opcode::PBranch, None);
    ic.endif.linear_preds.push(else_logical);
    assert!(!ctx.cf.has_branch);
    let else_dead = logically_dead(ctx, else_reachable);
    if !else_dead {
        ic.endif.logical_preds.push(else_logical);
    }
    add_kind(ctx, BlockKind::UNIFORM);
    ctx.cf.has_divergent_branch = else_dead && ic.then_branch_divergent;

    let else_linear = create_block(ctx);
    ctx.program.add_linear_edge(ic.invert_idx, else_linear);
    ctx.block = else_linear;
    add_kind(ctx, BlockKind::UNIFORM);
    emit_branch(ctx, Opcode::PBranch, None);
    ic.endif.linear_preds.push(else_linear);

    ctx.cf.leave_if(ic.scope);
    ctx.block = insert_block(ctx, ic.endif);
    append_logical_start(ctx);
}

/// Runs `then` only for the lanes in `cond`, with an empty else side
pub fn emit_divergent_if(ctx: &mut IselContext, cond: Temp, then: impl FnOnce(&mut IselContext)) {
    let mut ic = begin_divergent_if_then(ctx, cond);
    then(ctx);
    begin_divergent_if_else(ctx, &mut ic, true);
    end_divergent_if(ctx, ic, true);
}

fn begin_uniform_if_then(ctx: &mut IselContext, cond: Temp) -> IfContext {
    assert!(cond.reg_class() == RegClass::S1);
    append_logical_end(ctx);
    add_kind(ctx, BlockKind::UNIFORM);
    emit_branch(ctx, Opcode::PCbranchZ, Some(Operand::Fixed(cond, PhysReg::SCC)));

    let if_block = ctx.block;
    let top_level = ctx.cur_block().kind & BlockKind::TOP_LEVEL;
    let scope = ctx.cf.enter_if(false);
    ctx.cf.has_branch = false;
    ctx.cf.has_divergent_branch = false;

    let then = create_block(ctx);
    ctx.program.add_edge(if_block, then);
    ctx.block = then;
    append_logical_start(ctx);

    IfContext {
        if_block: if_block,
        invert: PendingBlock::default(),
        invert_idx: 0,
        endif: PendingBlock::new(top_level),
        scope: scope,
        then_branch_divergent: false,
        uniform_has_then_branch: false,
    }
}

fn begin_uniform_if_else(ctx: &mut IselContext, ic: &mut IfContext, then_reachable: bool) {
    let then = ctx.block;
    ic.uniform_has_then_branch = ctx.cf.has_branch;
    ic.then_branch_divergent = logically_dead(ctx, then_reachable);
    if !ic.uniform_has_then_branch {
        append_logical_end(ctx);
        emit_branch(ctx, Opcode::PBranch, None);
        ic.endif.linear_preds.push(then);
        if !ic.then_branch_divergent {
            ic.endif.logical_preds.push(then);
        }
        add_kind(ctx, BlockKind::UNIFORM);
    }
    ctx.cf.has_branch = false;
    ctx.cf.has_divergent_branch = false;

    let else_block = create_block(ctx);
    ctx.program.add_edge(ic.if_block, else_block);
    ctx.block = else_block;
    append_logical_start(ctx);
}

fn end_uniform_if(ctx: &mut IselContext, mut ic: IfContext, else_reachable: bool) {
    let else_block = ctx.block;
    let else_dead = logically_dead(ctx, else_reachable);
    if !ctx.cf.has_branch {
        append_logical_end(ctx);
        emit_branch(ctx, Opcode::PBranch, None);
        ic.endif.linear_preds.push(else_block);
        if !else_dead {
            ic.endif.logical_preds.push(else_block);
        }
        add_kind(ctx, BlockKind::UNIFORM);
    }
    ctx.cf.has_branch &= ic.uniform_has_then_branch;
    ctx.cf.has_divergent_branch = else_dead && ic.then_branch_divergent;
    ctx.cf.leave_if(ic.scope);

    /* Only create the endif if something falls through to it */
    if !ctx.cf.has_branch {
        ctx.block = insert_block(ctx, ic.endif);
        append_logical_start(ctx);
    }
}

/// Returns whether the code following the if is reachable
fn visit_if(ctx: &mut IselContext, condition: &Def, then_list: &[CfNode], else_list: &[CfNode]) -> bool {
    if condition.divergent {
        let cond = ctx.get_bool_lm(condition);
        let mut ic = begin_divergent_if_then(ctx, cond);
        let then_reachable = visit_cf_list(ctx, then_list);
        begin_divergent_if_else(ctx, &mut ic, then_reachable);
        let else_reachable = visit_cf_list(ctx, else_list);
        end_divergent_if(ctx, ic, else_reachable);
    } else {
        let cond = ctx.get_bool_s1(condition);
        let mut ic = begin_uniform_if_then(ctx, cond);
        let then_reachable = visit_cf_list(ctx, then_list);
        begin_uniform_if_else(ctx, &mut ic, then_reachable);
        let else_reachable = visit_cf_list(ctx, else_list);
        end_uniform_if(ctx, ic, else_reachable);
    }
    !ctx.cf.has_branch && !ctx.cur_block().logical_preds.is_empty()
}

fn emit_loop_jump(ctx: &mut IselContext, is_break: bool) {
    append_logical_end(ctx);
    let idx = ctx.block;
    let parent_if_divergent = ctx.cf.parent_if_divergent();
    let header = ctx.cf.parent_loop_mut().header;

    if is_break {
        ctx.cf.parent_loop_mut().exit.logical_preds.push(idx);
        add_kind(ctx, BlockKind::BREAK);
        if !parent_if_divergent && !ctx.cf.parent_loop_mut().has_divergent_continue {
            /* Uniform break, jump straight out of the loop */
            add_kind(ctx, BlockKind::UNIFORM);
            ctx.cf.has_branch = true;
            emit_branch(ctx, Opcode::PBranch, None);
            ctx.cf.parent_loop_mut().exit.linear_preds.push(idx);
            return;
        }
        ctx.cf.has_divergent_branch = true;
    } else {
        ctx.program.add_logical_edge(idx, header);
        add_kind(ctx, BlockKind::CONTINUE);
        if !parent_if_divergent {
            add_kind(ctx, BlockKind::UNIFORM);
            ctx.cf.has_branch = true;
            emit_branch(ctx, Opcode::PBranch, None);
            ctx.program.add_linear_edge(idx, header);
            return;
        }
        /* Later uniform breaks must not skip the lanes which continued */
        ctx.cf.parent_loop_mut().has_divergent_continue = true;
        ctx.cf.has_divergent_branch = true;
    }

    if parent_if_divergent {
        ctx.cf.mark_divergent_break();
    }

    /* Helper block so that the linear CFG has no critical edges */
    emit_branch(ctx, Opcode::PBranch, None);
    let helper = create_block(ctx);
    ctx.program.block_mut(helper).kind |= BlockKind::UNIFORM;
    ctx.program.add_linear_edge(idx, helper);
    if is_break {
        ctx.cf.parent_loop_mut().exit.linear_preds.push(helper);
    } else {
        ctx.program.add_linear_edge(helper, header);
    }
    ctx.block = helper;
    emit_branch(ctx, Opcode::PBranch, None);

    let cont = create_block(ctx);
    ctx.program.add_linear_edge(idx, cont);
    ctx.block = cont;
    append_logical_start(ctx);
}

fn visit_jump(ctx: &mut IselContext, kind: JumpKind) {
    match kind {
        JumpKind::Break => emit_loop_jump(ctx, true),
        JumpKind::Continue => emit_loop_jump(ctx, false),
    }
}

fn has_break(list: &[CfNode]) -> bool {
    list.iter().any(|node| match node {
        CfNode::Block(b) => matches!(b.instrs.last(), Some(nir::Instr::Jump(JumpKind::Break))),
        CfNode::If {
            then_list,
            else_list,
            ..
        } => has_break(then_list) || has_break(else_list),
        CfNode::Loop { .. } => false,
    })
}

fn begin_loop(ctx: &mut IselContext) -> LoopScope {
    append_logical_end(ctx);
    add_kind(ctx, BlockKind::LOOP_PREHEADER | BlockKind::UNIFORM);
    emit_branch(ctx, Opcode::PBranch, None);
    let preheader = ctx.block;
    let top_level = ctx.cur_block().kind & BlockKind::TOP_LEVEL;

    let header = ctx.program.create_and_insert_block();
    let exit = PendingBlock::new(BlockKind::LOOP_EXIT | top_level);
    let scope = ctx.cf.enter_loop(header, exit);
    let b = ctx.program.block_mut(header);
    b.kind |= BlockKind::LOOP_HEADER;
    b.loop_nest_depth = ctx.cf.loop_nest_depth;
    ctx.program.add_edge(preheader, header);
    ctx.block = header;
    append_logical_start(ctx);
    scope
}

fn end_loop(ctx: &mut IselContext, scope: LoopScope, reachable: bool) {
    let header = ctx.cf.parent_loop_mut().header;
    if !ctx.cf.has_branch {
        append_logical_end(ctx);
        let last = ctx.block;
        let logical_continue = !logically_dead(ctx, reachable);
        if ctx.cf.exec_potentially_empty() {
            /* With an empty exec mask a divergent break would never be
             * taken, so leave the loop once no lane is left.
             */
            add_kind(ctx, BlockKind::CONTINUE_OR_BREAK | BlockKind::UNIFORM);

            let brk = create_block(ctx);
            ctx.block = brk;
            add_kind(ctx, BlockKind::UNIFORM);
            emit_branch(ctx, Opcode::PBranch, None);
            ctx.program.add_linear_edge(last, brk);
            ctx.cf.parent_loop_mut().exit.linear_preds.push(brk);

            let cont = create_block(ctx);
            ctx.block = cont;
            add_kind(ctx, BlockKind::UNIFORM);
            emit_branch(ctx, Opcode::PBranch, None);
            ctx.program.add_linear_edge(last, cont);
            ctx.program.add_linear_edge(cont, header);

            if logical_continue {
                ctx.program.add_logical_edge(last, header);
            }
            ctx.block = last;
        } else {
            add_kind(ctx, BlockKind::CONTINUE | BlockKind::UNIFORM);
            if logical_continue {
                ctx.program.add_edge(last, header);
            } else {
                ctx.program.add_linear_edge(last, header);
            }
        }
        emit_branch(ctx, Opcode::PBranch, None);
    }

    let frame = ctx.cf.leave_loop(scope);
    finalize_loop_continue_phis(ctx, frame.header, frame.pending_phis);
    ctx.block = insert_block(ctx, frame.exit);
    append_logical_start(ctx);
}

fn visit_loop(ctx: &mut IselContext, body: &[CfNode]) {
    let scope = begin_loop(ctx);
    if let Some(CfNode::Block(first)) = body.first() {
        build_provisional_header_phis(ctx, first);
    }

    if !has_break(body) {
        /* Give the exit a predecessor so values from the header stay
         * live after the loop.
         */
        let cond = ctx.tmp(RegClass::S1);
        ctx.push_op(
            Opcode::PParallelcopy,
            vec![Definition::fixed(cond, PhysReg::SCC)],
            vec![Operand::c32(0)],
        );
        let mut ic = begin_uniform_if_then(ctx, cond);
        emit_loop_jump(ctx, true);
        begin_uniform_if_else(ctx, &mut ic, false);
        end_uniform_if(ctx, ic, true);
    }

    let reachable = visit_cf_list(ctx, body);
    end_loop(ctx, scope, reachable);
}

/// Discard of every active lane as the last instruction of a block
///
/// Returns false if the discard has to be emitted as a plain
/// `p_discard_if` instead.
fn try_discard_as_jump(ctx: &mut IselContext) -> bool {
    let in_uniform_loop = ctx.cf.loop_nest_depth > 0
        && !ctx.cf.parent_if_divergent()
        && !ctx.cf.parent_loop().is_some_and(|l| l.has_divergent_continue);
    let divergent = ctx.cf.parent_if_divergent();
    if !in_uniform_loop && !divergent {
        return false;
    }

    ctx.cf.mark_discard_possible();
    ctx.program.config.needs_exact = true;

    if in_uniform_loop {
        /* Every lane is gone, the loop ends here */
        let exec = ctx.exec();
        ctx.push_op(Opcode::PDiscardIf, Vec::new(), vec![exec]);
        append_logical_end(ctx);
        add_kind(ctx, BlockKind::DISCARD | BlockKind::UNIFORM);
        ctx.cf.has_branch = true;
        emit_branch(ctx, Opcode::PBranch, None);
        let idx = ctx.block;
        ctx.cf.parent_loop_mut().exit.linear_preds.push(idx);
    } else {
        /* The lanes on this path are dead, nothing flows on logically */
        let all = lm_const(ctx, true);
        ctx.push_op(Opcode::PDiscardIf, Vec::new(), vec![all]);
        add_kind(ctx, BlockKind::DISCARD);
        ctx.cf.has_divergent_branch = true;
    }
    true
}

/// `discard` and `discard_if`
pub fn visit_discard(ctx: &mut IselContext, cond: Option<&Def>) {
    ctx.cf.mark_discard_possible();
    ctx.program.config.needs_exact = true;

    let exec = ctx.exec();
    let lanes = match cond {
        Some(c) => {
            let c = ctx.get_bool_lm(c);
            ctx.lm_and(c, exec)
        }
        None => {
            let all = lm_const(ctx, true);
            ctx.lm_and(all, exec)
        }
    };
    ctx.push_op(Opcode::PDiscardIf, Vec::new(), vec![lanes.into()]);
    add_kind(ctx, BlockKind::USES_DISCARD_IF);
}

/// `demote` and `demote_if`: the lanes keep running as helpers
pub fn visit_demote(ctx: &mut IselContext, cond: Option<&Def>) {
    let lanes: Operand = match cond {
        Some(c) => {
            let c = ctx.get_bool_lm(c);
            let exec = ctx.exec();
            ctx.lm_and(c, exec).into()
        }
        None => lm_const(ctx, true),
    };
    ctx.push_op(Opcode::PDemoteToHelper, Vec::new(), vec![lanes]);
    ctx.cf.mark_discard_possible();
    add_kind(ctx, BlockKind::USES_DEMOTE);
    ctx.program.config.needs_exact = true;
}

fn visit_block(ctx: &mut IselContext, block: &nir::Block) {
    tracing::trace!(nir_block = block.index, block = ctx.block, "visiting block");
    let num_instrs = block.instrs.len();
    for (i, instr) in block.instrs.iter().enumerate() {
        match instr {
            nir::Instr::Alu(alu) => visit_alu_instr(ctx, alu),
            nir::Instr::Intrinsic(intrin) => {
                let is_last = i + 1 == num_instrs;
                if !(intrin.op == IntrinsicOp::Discard && is_last && try_discard_as_jump(ctx)) {
                    visit_intrinsic(ctx, intrin);
                }
            }
            nir::Instr::Tex(tex) => visit_tex(ctx, tex),
            nir::Instr::LoadConst { def, values } => visit_load_const(ctx, def, values),
            nir::Instr::Undef { def } => visit_undef(ctx, def),
            nir::Instr::Phi { def, srcs } => {
                if !is_pending_header_phi(ctx, def) {
                    visit_phi(ctx, def, srcs);
                }
            }
            nir::Instr::Jump(kind) => {
                /* Values leave through the block holding the jump */
                ctx.nir_to_aco.insert(block.index, ctx.block);
                visit_jump(ctx, *kind);
                return;
            }
        }
    }
    ctx.nir_to_aco.insert(block.index, ctx.block);
}

/// Lowers a structured list, returns whether its end is reachable
#[must_use]
pub fn visit_cf_list(ctx: &mut IselContext, list: &[CfNode]) -> bool {
    for node in list {
        match node {
            CfNode::Block(block) => visit_block(ctx, block),
            CfNode::If {
                condition,
                then_list,
                else_list,
            } => {
                if !visit_if(ctx, condition, then_list, else_list) {
                    return false;
                }
            }
            CfNode::Loop { body } => visit_loop(ctx, body),
        }
    }
    !ctx.cf.has_branch
}

/// Points every branch at its linear successors
///
/// Conditional branches jump to their second successor and fall through
/// to the first.  Unconditional branches with two successors pick one at
/// runtime depending on exec.
pub fn resolve_branch_targets(program: &mut Program) {
    for block in &mut program.blocks {
        let succ = |i: usize| block.linear_succs.get(i).copied().unwrap_or(0);
        let target = match block.instrs.last().map(|i| i.opcode) {
            Some(Opcode::PBranch) => [succ(0), succ(1)],
            Some(Opcode::PCbranchZ | Opcode::PCbranchNz) => [succ(1), succ(0)],
            _ => continue,
        };
        if let Some(last) = block.instrs.last_mut() {
            last.info = BranchInfo { target: target }.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aco_options::{CompilerOptions, ShaderConfig};
    use crate::nir::{AluOp, IntrinsicIndices, Shader, ShaderBuilder, ShaderStage};

    fn select(shader: &Shader, wave_size: u32) -> Program {
        let chip = ChipClass::GFX10;
        let options = CompilerOptions::new(chip, wave_size).unwrap();
        let config = ShaderConfig::default();
        let program = Program::new(chip, wave_size, HwStage::CS, vec![shader.info.stage]);
        let mut ctx = IselContext::new(&options, &config, program, &shader.info);
        crate::aco_isel_setup::init_context(&mut ctx, shader);
        let first = ctx.program.create_and_insert_block();
        ctx.program.block_mut(first).kind = BlockKind::TOP_LEVEL;
        ctx.block = first;
        crate::aco_isel_setup::add_startpgm(&mut ctx, &[shader]);
        append_logical_start(&mut ctx);
        assert!(visit_cf_list(&mut ctx, &shader.body));
        append_logical_end(&mut ctx);
        resolve_branch_targets(&mut ctx.program);
        ctx.program
    }

    fn divergent_value(b: &mut ShaderBuilder) -> nir::Def {
        b.intrinsic(
            IntrinsicOp::LoadLocalInvocationIndex,
            Some((32, 1, true)),
            &[],
            IntrinsicIndices::default(),
        )
        .unwrap()
    }

    fn blocks_of(p: &Program, kind: BlockKind) -> Vec<u32> {
        p.blocks
            .iter()
            .filter(|b| b.kind.contains(kind))
            .map(|b| b.index)
            .collect()
    }

    #[test]
    fn divergent_if_threads_through_invert() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let id = divergent_value(&mut b);
        let zero = b.imm32(0);
        let c = b.alu2(AluOp::Ieq, id, zero);
        b.push_if(c);
        b.push_else();
        b.pop_if();
        let p = select(&b.finish(), 64);

        let branch = blocks_of(&p, BlockKind::BRANCH);
        let invert = blocks_of(&p, BlockKind::INVERT);
        let merge = blocks_of(&p, BlockKind::MERGE);
        assert_eq!((branch.len(), invert.len(), merge.len()), (1, 1, 1));

        let b = p.block(branch[0]);
        let (then_logical, then_linear) = (b.linear_succs[0], b.linear_succs[1]);
        assert_eq!(b.logical_succs.len(), 2);
        assert_eq!(p.block(invert[0]).linear_preds, vec![then_logical, then_linear]);
        let m = p.block(merge[0]);
        assert_eq!(m.logical_preds.len(), 2);
        assert_eq!(m.linear_preds.len(), 2);
        assert!(m.kind.contains(BlockKind::TOP_LEVEL));

        let cbr = p.block(branch[0]).branch().unwrap();
        assert_eq!(cbr.opcode, Opcode::PCbranchZ);
        assert_eq!(cbr.branch_target().unwrap().target[0], then_linear);
    }

    #[test]
    fn uniform_if_without_fallthrough_has_no_endif() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let x = b.imm32(1);
        b.push_loop();
        let c = b.alu2(AluOp::Ieq, x, x);
        b.push_if(c);
        b.jump(JumpKind::Break);
        b.push_else();
        b.jump(JumpKind::Continue);
        b.pop_if();
        b.pop_loop();
        let p = select(&b.finish(), 64);

        assert_eq!(blocks_of(&p, BlockKind::BREAK).len(), 1);
        let exit = blocks_of(&p, BlockKind::LOOP_EXIT);
        assert_eq!(exit.len(), 1);
        /* preheader, header, then, else, exit: no endif and no dummy break */
        assert_eq!(p.blocks.len(), 5);
        let header = blocks_of(&p, BlockKind::LOOP_HEADER)[0];
        assert_eq!(p.block(header).linear_preds.len(), 2);
    }

    #[test]
    fn divergent_break_gets_helper_blocks() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let id = divergent_value(&mut b);
        b.push_loop();
        let zero = b.imm32(0);
        let c = b.alu2(AluOp::Ieq, id, zero);
        b.push_if(c);
        b.jump(JumpKind::Break);
        b.pop_if();
        b.pop_loop();
        let p = select(&b.finish(), 64);

        let brk = blocks_of(&p, BlockKind::BREAK)[0];
        let exit = blocks_of(&p, BlockKind::LOOP_EXIT)[0];
        let e = p.block(exit);
        assert_eq!(e.logical_preds, vec![brk]);
        /* The linear edge goes through a helper */
        assert!(!e.linear_preds.contains(&brk));
        /* A divergent break may empty exec */
        assert_eq!(blocks_of(&p, BlockKind::CONTINUE_OR_BREAK).len(), 1);
    }

    #[test]
    fn loop_header_phi_gets_continue_operand() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let zero = b.imm32(0);
        let pre = b.block_index();
        b.push_loop();
        let i = b.new_def(32, 1, false);
        let next = b.new_def(32, 1, false);
        let one = b.imm32(1);
        b.phi_to(i, &[(pre, zero), (pre + 2, next)]);
        b.alu_to(next, AluOp::Iadd, &[i.into(), one.into()]);
        let ten = b.imm32(10);
        let c = b.alu2(AluOp::Ult, next, ten);
        b.push_if(c);
        b.jump(JumpKind::Continue);
        b.pop_if();
        b.jump(JumpKind::Break);
        b.pop_loop();
        let shader = b.finish();
        let p = select(&shader, 64);

        let header = blocks_of(&p, BlockKind::LOOP_HEADER)[0];
        let phi = p.block(header).phis().next().unwrap();
        assert_eq!(phi.opcode, Opcode::PLinearPhi);
        assert_eq!(phi.operands.len(), p.block(header).linear_preds.len());
        assert!(phi.operands.iter().all(|o| !o.is_undef()));
    }

    #[test]
    fn dead_then_side_does_not_reach_the_uniform_endif() {
        let mut b = ShaderBuilder::new(ShaderStage::Fragment);
        let id = divergent_value(&mut b);
        let x = b.imm32(1);
        let u = b.alu2(AluOp::Ieq, x, x);
        b.push_if(u);
        let zero = b.imm32(0);
        let c = b.alu2(AluOp::Ieq, id, zero);
        b.push_if(c);
        b.intrinsic(IntrinsicOp::Discard, None, &[], IntrinsicIndices::default());
        b.push_else();
        b.intrinsic(IntrinsicOp::Discard, None, &[], IntrinsicIndices::default());
        b.pop_if();
        b.push_else();
        b.pop_if();
        let p = select(&b.finish(), 64);

        assert_eq!(blocks_of(&p, BlockKind::DISCARD).len(), 2);
        let inner_merge = blocks_of(&p, BlockKind::MERGE)[0];
        assert!(p.block(inner_merge).logical_preds.is_empty());
        assert!(p.block(inner_merge).logical_succs.is_empty());

        /* Only the else side of the uniform if continues logically */
        let endif = p.blocks.last().unwrap();
        assert_eq!(endif.linear_preds.len(), 2);
        assert_eq!(endif.logical_preds.len(), 1);
        assert!(!endif.logical_preds.contains(&inner_merge));
    }

    #[test]
    fn phis_stay_in_front() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let id = divergent_value(&mut b);
        let zero = b.imm32(0);
        let c = b.alu2(AluOp::Ieq, id, zero);
        b.push_if(c);
        let then_block = b.block_index();
        let one = b.imm32(1);
        b.push_else();
        let else_block = b.block_index();
        let two = b.imm32(2);
        b.pop_if();
        let phi = b.new_def(32, 1, true);
        b.phi_to(phi, &[(then_block, one), (else_block, two)]);
        let p = select(&b.finish(), 64);

        let merge = blocks_of(&p, BlockKind::MERGE)[0];
        let instrs = &p.block(merge).instrs;
        assert_eq!(instrs[0].opcode, Opcode::PPhi);
        assert_eq!(instrs[1].opcode, Opcode::PLogicalStart);
        /* The uniform constants are copied to VGPRs in their blocks */
        assert!(instrs[0].operands.iter().all(|o| o.reg_type() == RegType::VGPR));
    }
}
