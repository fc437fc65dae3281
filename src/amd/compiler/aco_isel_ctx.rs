/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! State threaded through instruction selection

use crate::aco_builder::{Builder, WaveOp};
use crate::aco_ir::*;
use crate::aco_isel_setup::ShaderArgs;
use crate::aco_options::{CompilerOptions, ShaderConfig};
use crate::nir::{self, AluSrc, Def, VARYING_SLOT_MAX};

use rustc_hash::{FxHashMap, FxHashSet};

/// Aborts selection with a diagnostic naming the NIR instruction
macro_rules! isel_err {
    ($instr: expr, $($arg: tt)*) => {
        panic!(
            "{}:{}: {}: {}",
            file!(),
            line!(),
            format!($($arg)*),
            $instr
        )
    };
}
pub(crate) use isel_err;

/// A block whose predecessors are known before its position in the
/// program is
#[derive(Clone, Debug, Default)]
pub struct PendingBlock {
    pub kind: BlockKind,
    pub logical_preds: Vec<u32>,
    pub linear_preds: Vec<u32>,
}

impl PendingBlock {
    pub fn new(kind: BlockKind) -> PendingBlock {
        PendingBlock {
            kind: kind,
            logical_preds: Vec::new(),
            linear_preds: Vec::new(),
        }
    }
}

/// An enclosing loop
#[derive(Clone, Debug)]
pub struct LoopFrame {
    pub header: u32,
    pub exit: PendingBlock,
    pub has_divergent_continue: bool,
    /// Number of if frames outside of the loop
    if_base: usize,
    /// Header phis still waiting for their continue operands
    pub pending_phis: Vec<PendingPhi>,
}

/// A loop header phi built before the loop's back edges are known
#[derive(Clone, Debug)]
pub struct PendingPhi {
    pub def: Temp,
    pub linear: bool,
    /// NIR sources, keyed by NIR predecessor block
    pub srcs: Vec<(u32, Def)>,
}

#[derive(Clone, Copy, Debug)]
pub struct IfFrame {
    pub divergent: bool,
}

/// Divergence tracking
///
/// The two questions everything else asks are whether emission currently
/// happens under divergent control flow and whether the exec mask may be
/// empty.  The latter is conservative: it may be set when the mask cannot
/// actually be empty but never the other way around.
#[derive(Clone, Debug, Default)]
pub struct CfInfo {
    pub loops: Vec<LoopFrame>,
    pub ifs: Vec<IfFrame>,
    pub exec_potentially_empty_discard: bool,
    pub exec_potentially_empty_break: bool,
    /// Loop depth of the divergent break which set the flag above
    pub exec_potentially_empty_break_depth: u32,
    /// The current block ended in a uniform jump, nothing falls through
    pub has_branch: bool,
    /// The current path ended in a divergent jump: there is no logical
    /// fallthrough but the linear CFG continues
    pub has_divergent_branch: bool,
    pub loop_nest_depth: u32,
    /// A demote or discard happened in non-uniform control flow
    pub had_divergent_discard: bool,
}

/// Token returned by `enter_if()`, consumed by `leave_if()`
#[must_use]
pub struct IfScope {
    divergent: bool,
    discard_old: bool,
    break_old: bool,
    break_depth_old: u32,
}

/// Token returned by `enter_loop()`, consumed by `leave_loop()`
#[must_use]
pub struct LoopScope {
    discard_old: bool,
    break_old: bool,
    break_depth_old: u32,
    has_branch_old: bool,
    has_divergent_branch_old: bool,
}

impl CfInfo {
    pub fn new() -> CfInfo {
        CfInfo {
            exec_potentially_empty_break_depth: u32::MAX,
            ..Default::default()
        }
    }

    pub fn parent_loop(&self) -> Option<&LoopFrame> {
        self.loops.last()
    }

    pub fn parent_loop_mut(&mut self) -> &mut LoopFrame {
        self.loops.last_mut().expect("Not inside a loop")
    }

    /// True if any if between here and the innermost loop is divergent
    pub fn parent_if_divergent(&self) -> bool {
        let base = self.loops.last().map(|l| l.if_base).unwrap_or(0);
        self.ifs[base..].iter().any(|f| f.divergent)
    }

    /// True if any enclosing if, inside or outside of loops, is divergent
    pub fn in_divergent_cf(&self) -> bool {
        self.ifs.iter().any(|f| f.divergent)
            || self.loops.iter().any(|l| l.has_divergent_continue)
    }

    pub fn enter_if(&mut self, divergent: bool) -> IfScope {
        self.ifs.push(IfFrame {
            divergent: divergent,
        });
        IfScope {
            divergent: divergent,
            discard_old: self.exec_potentially_empty_discard,
            break_old: self.exec_potentially_empty_break,
            break_depth_old: self.exec_potentially_empty_break_depth,
        }
    }

    pub fn leave_if(&mut self, scope: IfScope) {
        let frame = self.ifs.pop().expect("Unbalanced if scope");
        assert!(frame.divergent == scope.divergent);

        self.exec_potentially_empty_discard |= scope.discard_old;
        if self.loop_nest_depth == 0 && !self.in_divergent_cf() {
            /* Uniform control flow at the top level has a full exec mask */
            self.exec_potentially_empty_discard = false;
        }

        if !self.exec_potentially_empty_break {
            self.exec_potentially_empty_break = scope.break_old;
            self.exec_potentially_empty_break_depth = scope.break_depth_old;
        }
    }

    pub fn enter_loop(&mut self, header: u32, exit: PendingBlock) -> LoopScope {
        let scope = LoopScope {
            discard_old: self.exec_potentially_empty_discard,
            break_old: self.exec_potentially_empty_break,
            break_depth_old: self.exec_potentially_empty_break_depth,
            has_branch_old: self.has_branch,
            has_divergent_branch_old: self.has_divergent_branch,
        };
        self.loops.push(LoopFrame {
            header: header,
            exit: exit,
            has_divergent_continue: false,
            if_base: self.ifs.len(),
            pending_phis: Vec::new(),
        });
        self.loop_nest_depth += 1;
        self.has_branch = false;
        self.has_divergent_branch = false;
        scope
    }

    /// Pops the loop frame and returns it for the loop-exit fixups
    pub fn leave_loop(&mut self, scope: LoopScope) -> LoopFrame {
        let frame = self.loops.pop().expect("Unbalanced loop scope");
        self.loop_nest_depth -= 1;
        self.has_branch = scope.has_branch_old;
        self.has_divergent_branch = scope.has_divergent_branch_old;

        /* Lanes which broke out of this loop are active again at its exit */
        if self.exec_potentially_empty_break_depth > self.loop_nest_depth {
            self.exec_potentially_empty_break = scope.break_old;
            self.exec_potentially_empty_break_depth = scope.break_depth_old;
        }

        self.exec_potentially_empty_discard |= scope.discard_old;
        if self.loop_nest_depth == 0 && !self.in_divergent_cf() {
            self.exec_potentially_empty_discard = false;
        }
        frame
    }

    /// A discard or demote may have removed lanes from exec
    pub fn mark_discard_possible(&mut self) {
        if self.loop_nest_depth > 0 || self.in_divergent_cf() {
            self.exec_potentially_empty_discard = true;
        }
        if self.in_divergent_cf() {
            self.had_divergent_discard = true;
        }
    }

    /// A divergent break or continue may have removed every active lane
    pub fn mark_divergent_break(&mut self) {
        if !self.exec_potentially_empty_break {
            self.exec_potentially_empty_break = true;
            self.exec_potentially_empty_break_depth = self.loop_nest_depth;
        }
    }

    pub fn exec_potentially_empty(&self) -> bool {
        self.exec_potentially_empty_discard || self.exec_potentially_empty_break
    }
}

#[derive(Clone, Debug)]
struct CachedComponents {
    /// Block the components were split in, `None` if they were recorded at
    /// the definition of the vector and so dominate all of its uses.
    block: Option<u32>,
    comps: Vec<Temp>,
}

/// Values written by `store_output`, per slot and component
pub struct Outputs {
    pub temps: Vec<[Option<Temp>; 4]>,
    pub mask: u64,
}

impl Outputs {
    pub fn new() -> Outputs {
        Outputs {
            temps: vec![[None; 4]; VARYING_SLOT_MAX as usize],
            mask: 0,
        }
    }

    pub fn store(&mut self, slot: u32, comp: u32, val: Temp) {
        self.temps[slot as usize][comp as usize] = Some(val);
        self.mask |= 1 << slot;
    }

    pub fn written(&self, slot: u32) -> bool {
        self.mask & (1 << slot) != 0
    }
}

pub struct IselContext<'a> {
    pub options: &'a CompilerOptions,
    pub config: &'a ShaderConfig,
    pub program: Program,
    pub block: u32,
    pub stage: nir::ShaderStage,
    pub shader_info: nir::ShaderInfo,
    pub ssa_temps: FxHashMap<u32, Temp>,
    /// NIR block index to the ACO block its instructions ended up in
    pub nir_to_aco: FxHashMap<u32, u32>,
    /// NIR defs produced by `load_const` and `undef`
    pub constants: FxHashMap<u32, Vec<u64>>,
    pub undefs: FxHashSet<u32>,
    pub cf: CfInfo,
    pub args: ShaderArgs,
    pub outputs: Outputs,
    /// Temporaries at or above this id were created by emitters rather
    /// than for NIR defs or arguments
    pub first_fresh_temp: u32,
    /// Bytes per vertex in the ES->GS or LS->HS LDS area
    pub esgs_itemsize: u32,
    /// Slot and component of every dword a geometry shader emits
    pub gsvs_layout: Vec<(u32, u32)>,
    allocated_vec: FxHashMap<u32, CachedComponents>,
}

impl<'a> Builder for IselContext<'a> {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        let block = self.program.block_mut(self.block);
        block.instrs.push(instr);
        block.instrs.last_mut().unwrap().as_mut()
    }

    fn program(&self) -> &Program {
        &self.program
    }

    fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }
}

impl<'a> IselContext<'a> {
    pub fn new(
        options: &'a CompilerOptions,
        config: &'a ShaderConfig,
        program: Program,
        info: &nir::ShaderInfo,
    ) -> IselContext<'a> {
        IselContext {
            options: options,
            config: config,
            program: program,
            block: 0,
            stage: info.stage,
            shader_info: info.clone(),
            ssa_temps: FxHashMap::default(),
            nir_to_aco: FxHashMap::default(),
            constants: FxHashMap::default(),
            undefs: FxHashSet::default(),
            cf: CfInfo::new(),
            args: ShaderArgs::default(),
            outputs: Outputs::new(),
            first_fresh_temp: 0,
            esgs_itemsize: 0,
            gsvs_layout: Vec::new(),
            allocated_vec: FxHashMap::default(),
        }
    }

    pub fn cur_block(&self) -> &Block {
        self.program.block(self.block)
    }

    pub fn cur_block_mut(&mut self) -> &mut Block {
        self.program.block_mut(self.block)
    }

    pub fn get_ssa_temp(&self, def: &Def) -> Temp {
        match self.ssa_temps.get(&def.index) {
            Some(t) => *t,
            None => panic!("NIR def {} has no temporary", def),
        }
    }

    /// Makes `dst` hold `res`
    ///
    /// Emitters produce values in fresh temporaries.  If the instruction
    /// which just produced `res` is still the last one, its definition is
    /// retargeted, otherwise a copy is emitted.
    pub fn bind(&mut self, dst: Temp, res: Temp) {
        if dst == res {
            return;
        }
        let lm = self.lm();
        let res = if dst.reg_class() == lm && res.reg_class() == RegClass::S1 {
            self.bool_to_vector_condition(res)
        } else if dst.reg_class() == RegClass::S1 && res.reg_class() == lm {
            self.bool_to_scalar_condition(res)
        } else if dst.reg_type() == RegType::SGPR && res.reg_type() == RegType::VGPR {
            self.as_uniform(res)
        } else {
            res
        };
        assert!(res.bytes() == dst.bytes(), "Cannot bind {:?} to {:?}", res, dst);

        if res.id() >= self.first_fresh_temp {
            if let Some(comps) = self.allocated_vec.remove(&res.id()) {
                self.allocated_vec.insert(dst.id(), comps);
            }
        } else if let Some(comps) = self.allocated_vec.get(&res.id()).cloned() {
            self.allocated_vec.insert(dst.id(), comps);
        }
        if res.reg_class() == dst.reg_class() && res.id() >= self.first_fresh_temp {
            if let Some(last) = self.cur_block_mut().instrs.last_mut() {
                let primary = last.opcode != Opcode::PSplitVector
                    && last.definitions.first().map(|d| d.temp()) == Some(res);
                if primary {
                    let d = &mut last.definitions[0];
                    *d = match d.phys_reg() {
                        Some(reg) => Definition::fixed(dst, reg),
                        None => Definition::new(dst),
                    };
                    return;
                }
            }
        }
        self.push_op(Opcode::PParallelcopy, vec![dst.into()], vec![res.into()]);
    }

    /// Binds the result of a NIR def
    pub fn bind_def(&mut self, def: &Def, res: Temp) {
        let dst = self.get_ssa_temp(def);
        self.bind(dst, res);
    }

    /// Reads a NIR boolean as a lane mask
    pub fn get_bool_lm(&mut self, def: &Def) -> Temp {
        let t = self.get_ssa_temp(def);
        self.bool_to_vector_condition(t)
    }

    /// Reads a NIR boolean as a uniform SCC value
    pub fn get_bool_s1(&mut self, def: &Def) -> Temp {
        let t = self.get_ssa_temp(def);
        self.bool_to_scalar_condition(t)
    }

    pub fn const_value(&self, def: &Def) -> Option<u64> {
        self.constants.get(&def.index).map(|v| v[0])
    }

    pub fn is_undef(&self, def: &Def) -> bool {
        self.undefs.contains(&def.index)
    }

    fn cached_components(&self, t: Temp) -> Option<&Vec<Temp>> {
        let c = self.allocated_vec.get(&t.id())?;
        match c.block {
            Some(b) if b != self.block => None,
            _ => Some(&c.comps),
        }
    }

    /// Records the components a vector was assembled from
    ///
    /// Must only be called where the vector is defined.
    pub fn cache_components(&mut self, vec: Temp, comps: Vec<Temp>) {
        self.allocated_vec.insert(
            vec.id(),
            CachedComponents {
                block: None,
                comps: comps,
            },
        );
    }

    fn split_classes(vec: Temp, num_components: u32) -> Option<RegClass> {
        if num_components <= 1 {
            return None;
        }
        if num_components > vec.size() {
            if vec.reg_type() == RegType::SGPR {
                return None;
            }
            Some(RegClass::get(RegType::VGPR, vec.bytes() / num_components).as_subdword())
        } else {
            Some(RegClass::new(vec.reg_type(), vec.size() / num_components))
        }
    }

    /// Splits `vec` into `num_components` parts
    ///
    /// Repeated splits of the same vector in the same block reuse the first
    /// split.
    pub fn emit_split_vector(&mut self, vec: Temp, num_components: u32) -> Vec<Temp> {
        if let Some(comps) = self.cached_components(vec) {
            if comps.len() == num_components as usize {
                return comps.clone();
            }
        }
        let rc = Self::split_classes(vec, num_components)
            .unwrap_or_else(|| panic!("Cannot split {:?} into {} parts", vec, num_components));
        let comps = self.split_vector(vec, &vec![rc; num_components as usize]);
        self.allocated_vec.insert(
            vec.id(),
            CachedComponents {
                block: Some(self.block),
                comps: comps.clone(),
            },
        );
        comps
    }

    pub fn emit_extract_vector(&mut self, src: Temp, idx: u32, dst_rc: RegClass) -> Temp {
        if src.reg_class() == dst_rc {
            assert!(idx == 0);
            return src;
        }
        assert!(src.bytes() > idx * dst_rc.bytes());

        if let Some(comps) = self.cached_components(src) {
            let comp = comps[idx as usize];
            if comps.len() * dst_rc.bytes() as usize == src.bytes() as usize {
                if comp.reg_class() == dst_rc {
                    return comp;
                }
                assert!(!dst_rc.is_subdword());
                assert!(dst_rc.reg_type() == RegType::VGPR);
                return self.copy(dst_rc, comp);
            }
        }

        let src = if dst_rc.is_subdword() {
            self.as_vgpr(src)
        } else {
            src
        };
        if src.bytes() == dst_rc.bytes() {
            assert!(idx == 0);
            return self.copy(dst_rc, src);
        }
        self.extract_vector(src, idx, dst_rc)
    }

    /// Joins parts into a vector and records them as its components
    pub fn create_vector_cached(&mut self, rc: RegClass, parts: Vec<Temp>) -> Temp {
        if parts.len() == 1 && parts[0].reg_class() == rc {
            return parts[0];
        }
        let dst = self.create_vector(rc, parts.iter().map(|t| (*t).into()).collect());
        self.cache_components(dst, parts);
        dst
    }

    pub fn as_vgpr(&mut self, val: Temp) -> Temp {
        if val.reg_type() == RegType::SGPR {
            let rc = RegClass::new(RegType::VGPR, val.size());
            self.copy(rc, val)
        } else {
            val
        }
    }

    pub fn as_vgpr_op(&mut self, op: Operand) -> Operand {
        match op.temp() {
            Some(t) if t.reg_type() == RegType::SGPR => self.as_vgpr(t).into(),
            _ => op,
        }
    }

    /// Turns a uniform boolean into a lane mask
    pub fn bool_to_vector_condition(&mut self, val: Temp) -> Temp {
        if val.reg_class() == self.lm() {
            return val;
        }
        assert!(val.reg_class() == RegClass::S1);
        let op = self.w64or32(WaveOp::SCselect);
        let lm = self.lm();
        let all = if self.program.wave_size == 64 {
            Operand::c64(u64::MAX)
        } else {
            Operand::c32(u32::MAX)
        };
        let dst = self.tmp(lm);
        self.push_op(
            op,
            vec![dst.into()],
            vec![all, Operand::zero(lm.bytes()), Operand::Fixed(val, PhysReg::SCC)],
        );
        dst
    }

    /// Turns a lane mask into a uniform boolean: true if any active lane
    /// is set
    pub fn bool_to_scalar_condition(&mut self, val: Temp) -> Temp {
        if val.reg_class() == RegClass::S1 {
            return val;
        }
        assert!(val.reg_class() == self.lm());
        self.lm_any(val)
    }

    /// Reads the components of an ALU source selected by its swizzle
    pub fn get_alu_src(&mut self, src: &AluSrc, size: u8) -> Temp {
        let vec = self.get_ssa_temp(&src.src);
        let def = src.src;
        if src.is_identity(size) || (def.num_components == 1 && src.swizzle[0] == 0 && size == 1) {
            return vec;
        }

        let elem_size = u32::from(def.bit_size / 8).max(1);
        if def.is_bool() {
            assert!(def.num_components == 1 && size == 1);
            return vec;
        }

        if elem_size < 4 && vec.reg_type() == RegType::SGPR && size == 1 {
            /* Scalar sub-dword components are extracted with shifts */
            let comp = u32::from(src.swizzle[0]);
            let dword = comp * elem_size / 4;
            let vec_dword = if vec.size() > 1 {
                self.emit_extract_vector(vec, dword, RegClass::S1)
            } else {
                vec
            };
            let shift = (comp * elem_size % 4) * 8;
            if shift == 0 {
                return vec_dword;
            }
            return self.sop2(Opcode::SLshrB32, RegClass::S1, vec_dword, Operand::c32(shift));
        }

        let elem_rc = if elem_size < 4 {
            RegClass::get(RegType::VGPR, elem_size)
        } else {
            RegClass::new(vec.reg_type(), elem_size / 4)
        };
        if size == 1 {
            return self.emit_extract_vector(vec, src.swizzle[0].into(), elem_rc);
        }

        let parts: Vec<Temp> = (0..size)
            .map(|i| self.emit_extract_vector(vec, src.swizzle[usize::from(i)].into(), elem_rc))
            .collect();
        let rc = RegClass::get(elem_rc.reg_type(), elem_size * u32::from(size));
        self.create_vector_cached(rc, parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_flag_clears_at_uniform_top_level() {
        let mut cf = CfInfo::new();
        let outer = cf.enter_if(true);
        cf.mark_discard_possible();
        assert!(cf.exec_potentially_empty());
        let inner = cf.enter_if(false);
        cf.leave_if(inner);
        assert!(cf.exec_potentially_empty_discard);
        cf.leave_if(outer);
        assert!(!cf.exec_potentially_empty_discard);
        assert!(cf.had_divergent_discard);
    }

    #[test]
    fn discard_flag_survives_inside_loops() {
        let mut cf = CfInfo::new();
        let l = cf.enter_loop(1, PendingBlock::default());
        let i = cf.enter_if(false);
        cf.mark_discard_possible();
        cf.leave_if(i);
        assert!(cf.exec_potentially_empty_discard);
        cf.leave_loop(l);
        assert!(!cf.exec_potentially_empty_discard);
    }

    #[test]
    fn loops_reset_if_divergence() {
        let mut cf = CfInfo::new();
        let i = cf.enter_if(true);
        assert!(cf.parent_if_divergent());
        let l = cf.enter_loop(2, PendingBlock::default());
        assert!(!cf.parent_if_divergent());
        assert!(cf.in_divergent_cf());
        cf.mark_divergent_break();
        assert_eq!(cf.exec_potentially_empty_break_depth, 1);
        cf.leave_loop(l);
        assert!(!cf.exec_potentially_empty_break);
        cf.leave_if(i);
    }
}
