/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Structural checks on selected programs

use crate::aco_ir::*;

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeKind {
    Logical,
    Linear,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Logical => f.write_str("logical"),
            EdgeKind::Linear => f.write_str("linear"),
        }
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ValidationError {
    #[error("BB{block}: {instr}: operand {index} is {rc}, expected {expected}")]
    OperandClass {
        block: u32,
        instr: String,
        index: usize,
        rc: RegClass,
        expected: &'static str,
    },
    #[error("BB{block}: {instr}: definition {index} is {rc}, expected {expected}")]
    DefinitionClass {
        block: u32,
        instr: String,
        index: usize,
        rc: RegClass,
        expected: &'static str,
    },
    #[error("{kind} edge BB{pred} -> BB{succ} has no matching reverse edge")]
    EdgeAsymmetry {
        kind: EdgeKind,
        pred: u32,
        succ: u32,
    },
    #[error("BB{block}: {instr}: {operands} operands for {preds} {kind} predecessors")]
    PhiArity {
        block: u32,
        instr: String,
        kind: EdgeKind,
        operands: usize,
        preds: usize,
    },
    #[error("BB{block}: phi after a non-phi instruction: {instr}")]
    PhiPlacement { block: u32, instr: String },
    #[error("%{id} is defined in BB{first} and again in BB{second}")]
    MultipleDefinitions { id: u32, first: u32, second: u32 },
    #[error("BB{0} is logically reachable but not linearly reachable")]
    LogicalNotLinear(u32),
}

struct Validator<'a> {
    program: &'a Program,
    errors: Vec<ValidationError>,
}

impl<'a> Validator<'a> {
    fn operand_err(&mut self, block: u32, instr: &Instr, index: usize, expected: &'static str) {
        self.errors.push(ValidationError::OperandClass {
            block: block,
            instr: instr.to_string(),
            index: index,
            rc: instr.operands[index].reg_class(),
            expected: expected,
        });
    }

    fn def_err(&mut self, block: u32, instr: &Instr, index: usize, expected: &'static str) {
        self.errors.push(ValidationError::DefinitionClass {
            block: block,
            instr: instr.to_string(),
            index: index,
            rc: instr.definitions[index].reg_class(),
            expected: expected,
        });
    }

    /// Operand `index` must not live in VGPRs
    fn scalar_operand(&mut self, block: u32, instr: &Instr, index: usize) {
        let Some(op) = instr.operands.get(index) else {
            return;
        };
        if !op.is_undef() && op.reg_type() == RegType::VGPR {
            self.operand_err(block, instr, index, "a scalar register");
        }
    }

    /// Operand `index` must be a VGPR (undef and inline addresses are fine)
    fn vector_address(&mut self, block: u32, instr: &Instr, index: usize) {
        let Some(op) = instr.operands.get(index) else {
            return;
        };
        if op.is_temp() && op.reg_type() != RegType::VGPR {
            self.operand_err(block, instr, index, "a vector register");
        }
    }

    fn check_instr(&mut self, block: u32, instr: &Instr) {
        match instr.format() {
            Format::SOP1 | Format::SOP2 | Format::SOPK | Format::SOPC | Format::SOPP => {
                for i in 0..instr.operands.len() {
                    self.scalar_operand(block, instr, i);
                }
                for (i, def) in instr.definitions.iter().enumerate() {
                    if def.reg_class().reg_type() == RegType::VGPR {
                        self.def_err(block, instr, i, "a scalar register");
                    }
                }
            }
            Format::VOP2 | Format::VOPC => {
                if let Some(src1) = instr.operands.get(1) {
                    if src1.reg_type() != RegType::VGPR {
                        self.operand_err(block, instr, 1, "a vector register in src1");
                    }
                }
            }
            Format::SMEM => {
                self.scalar_operand(block, instr, 0);
                self.scalar_operand(block, instr, 1);
            }
            Format::MUBUF | Format::MTBUF => {
                self.scalar_operand(block, instr, 0);
                self.vector_address(block, instr, 1);
                self.scalar_operand(block, instr, 2);
            }
            Format::MIMG => {
                self.scalar_operand(block, instr, 0);
                self.scalar_operand(block, instr, 1);
                self.vector_address(block, instr, 3);
            }
            Format::DS | Format::FLAT | Format::GLOBAL | Format::SCRATCH => {
                self.vector_address(block, instr, 0);
            }
            _ => (),
        }

        if instr.opcode.format() == Format::VOPC {
            let lm = self.program.lane_mask;
            if instr.definitions.first().map(|d| d.reg_class()) != Some(lm) {
                self.def_err(block, instr, 0, "a lane mask");
            }
        }
    }

    fn check_edges(&mut self) {
        let p = self.program;
        for b in &p.blocks {
            let pairs = [
                (EdgeKind::Logical, &b.logical_succs),
                (EdgeKind::Linear, &b.linear_succs),
            ];
            for (kind, succs) in pairs {
                for &s in succs.iter() {
                    let preds = match kind {
                        EdgeKind::Logical => &p.block(s).logical_preds,
                        EdgeKind::Linear => &p.block(s).linear_preds,
                    };
                    if !preds.contains(&b.index) {
                        self.errors.push(ValidationError::EdgeAsymmetry {
                            kind: kind,
                            pred: b.index,
                            succ: s,
                        });
                    }
                }
            }
            let pairs = [
                (EdgeKind::Logical, &b.logical_preds),
                (EdgeKind::Linear, &b.linear_preds),
            ];
            for (kind, preds) in pairs {
                for &pred in preds.iter() {
                    let succs = match kind {
                        EdgeKind::Logical => &p.block(pred).logical_succs,
                        EdgeKind::Linear => &p.block(pred).linear_succs,
                    };
                    if !succs.contains(&b.index) {
                        self.errors.push(ValidationError::EdgeAsymmetry {
                            kind: kind,
                            pred: pred,
                            succ: b.index,
                        });
                    }
                }
            }
        }
    }

    fn check_phis(&mut self, b: &Block) {
        let mut seen_non_phi = false;
        for instr in &b.instrs {
            if !instr.is_phi() {
                seen_non_phi = true;
                continue;
            }
            if seen_non_phi {
                self.errors.push(ValidationError::PhiPlacement {
                    block: b.index,
                    instr: instr.to_string(),
                });
            }
            let (kind, preds) = if instr.opcode == Opcode::PPhi {
                (EdgeKind::Logical, b.logical_preds.len())
            } else {
                (EdgeKind::Linear, b.linear_preds.len())
            };
            if instr.operands.len() != preds {
                self.errors.push(ValidationError::PhiArity {
                    block: b.index,
                    instr: instr.to_string(),
                    kind: kind,
                    operands: instr.operands.len(),
                    preds: preds,
                });
            }
        }
    }

    fn check_ssa(&mut self) {
        let mut defined: FxHashMap<u32, u32> = FxHashMap::default();
        for b in &self.program.blocks {
            for instr in &b.instrs {
                for def in instr.definitions.iter().filter(|d| d.is_temp()) {
                    let id = def.temp().id();
                    if let Some(first) = defined.insert(id, b.index) {
                        self.errors.push(ValidationError::MultipleDefinitions {
                            id: id,
                            first: first,
                            second: b.index,
                        });
                    }
                }
            }
        }
    }
}

fn reachable(program: &Program, succs: impl Fn(&Block) -> &[u32]) -> FxHashSet<u32> {
    let mut seen = FxHashSet::default();
    if program.blocks.is_empty() {
        return seen;
    }
    let mut stack = vec![0];
    while let Some(b) = stack.pop() {
        if seen.insert(b) {
            stack.extend(succs(program.block(b)).iter().copied());
        }
    }
    seen
}

/// Every block reachable through logical edges is reachable through
/// linear edges too
pub fn check_logical_implies_linear(program: &Program) -> Result<(), Vec<ValidationError>> {
    let logical = reachable(program, |b| &b.logical_succs);
    let linear = reachable(program, |b| &b.linear_succs);
    let mut missing: Vec<u32> = logical.difference(&linear).copied().collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort();
    Err(missing.into_iter().map(ValidationError::LogicalNotLinear).collect())
}

pub fn validate_ir(program: &Program) -> Result<(), Vec<ValidationError>> {
    let mut v = Validator {
        program: program,
        errors: Vec::new(),
    };
    for b in &program.blocks {
        for instr in &b.instrs {
            v.check_instr(b.index, instr);
        }
        v.check_phis(b);
    }
    v.check_edges();
    v.check_ssa();
    if let Err(mut errs) = check_logical_implies_linear(program) {
        v.errors.append(&mut errs);
    }

    if v.errors.is_empty() {
        Ok(())
    } else {
        for e in &v.errors {
            tracing::debug!("{}", e);
        }
        Err(v.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(num_blocks: u32) -> Program {
        let mut p = Program::new(ChipClass::GFX10, 64, HwStage::CS, Vec::new());
        for _ in 0..num_blocks {
            p.create_and_insert_block();
        }
        p
    }

    fn push(p: &mut Program, block: u32, instr: Box<Instr>) {
        p.block_mut(block).instrs.push(instr);
    }

    #[test]
    fn straight_line_program_is_valid() {
        let mut p = program(2);
        p.add_edge(0, 1);
        let s = p.allocate_tmp(RegClass::S1);
        let v = p.allocate_tmp(RegClass::V1);
        push(&mut p, 0, Instr::new_boxed(Opcode::SMovB32, vec![Operand::c32(1)], vec![s.into()]));
        push(&mut p, 1, Instr::new_boxed(Opcode::VMovB32, vec![s.into()], vec![v.into()]));
        assert_eq!(validate_ir(&p), Ok(()));
    }

    #[test]
    fn vop2_needs_vgpr_src1() {
        let mut p = program(1);
        let s = p.allocate_tmp(RegClass::S1);
        let v = p.allocate_tmp(RegClass::V1);
        let d = p.allocate_tmp(RegClass::V1);
        let ops = vec![v.into(), s.into()];
        push(&mut p, 0, Instr::new_boxed(Opcode::VAddF32, ops.clone(), vec![d.into()]));
        let errs = validate_ir(&p).unwrap_err();
        assert!(matches!(errs[0], ValidationError::OperandClass { index: 1, .. }));

        /* The VOP3 encoding takes it */
        let mut p = program(1);
        let d = p.allocate_tmp(RegClass::V1);
        let mut i = Instr::new_boxed(Opcode::VAddF32, ops, vec![d.into()]);
        i.vop3_mut();
        push(&mut p, 0, i);
        assert_eq!(validate_ir(&p), Ok(()));
    }

    #[test]
    fn salu_rejects_vgprs() {
        let mut p = program(1);
        let v = p.allocate_tmp(RegClass::V1);
        let s = p.allocate_tmp(RegClass::S1);
        push(&mut p, 0, Instr::new_boxed(Opcode::SMovB32, vec![v.into()], vec![s.into()]));
        let errs = validate_ir(&p).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("expected a scalar register"));
    }

    #[test]
    fn compares_define_lane_masks() {
        let mut p = program(1);
        let v = p.allocate_tmp(RegClass::V1);
        let d = p.allocate_tmp(RegClass::S2);
        let ops = vec![Operand::c32(0), v.into()];
        push(&mut p, 0, Instr::new_boxed(Opcode::VCmpEqI32, ops, vec![d.into()]));
        let errs = validate_ir(&p).unwrap_err();
        assert!(matches!(errs[0], ValidationError::DefinitionClass { .. }));
    }

    #[test]
    fn one_sided_edges_are_reported() {
        let mut p = program(2);
        p.add_linear_edge(0, 1);
        p.block_mut(0).logical_succs.push(1);
        let errs = validate_ir(&p).unwrap_err();
        assert_eq!(
            errs[0],
            ValidationError::EdgeAsymmetry {
                kind: EdgeKind::Logical,
                pred: 0,
                succ: 1
            }
        );
    }

    #[test]
    fn phi_operands_match_predecessors() {
        let mut p = program(3);
        p.add_edge(0, 2);
        p.add_linear_edge(1, 2);
        p.add_edge(0, 1);
        let d = p.allocate_tmp(RegClass::V1);
        let phi = Instr::new_boxed(
            Opcode::PPhi,
            vec![Operand::c32(0), Operand::c32(1)],
            vec![d.into()],
        );
        push(&mut p, 2, phi);
        let errs = validate_ir(&p).unwrap_err();
        assert!(matches!(
            errs[0],
            ValidationError::PhiArity {
                kind: EdgeKind::Logical,
                operands: 2,
                preds: 1,
                ..
            }
        ));
    }

    #[test]
    fn temps_are_defined_once() {
        let mut p = program(2);
        p.add_edge(0, 1);
        let s = p.allocate_tmp(RegClass::S1);
        for b in 0..2 {
            push(&mut p, b, Instr::new_boxed(Opcode::SMovB32, vec![Operand::c32(b)], vec![s.into()]));
        }
        let errs = validate_ir(&p).unwrap_err();
        assert_eq!(
            errs,
            vec![ValidationError::MultipleDefinitions {
                id: s.id(),
                first: 0,
                second: 1
            }]
        );
    }

    #[test]
    fn logical_edges_need_a_linear_path() {
        let mut p = program(3);
        p.add_edge(0, 1);
        p.add_logical_edge(1, 2);
        assert_eq!(
            check_logical_implies_linear(&p),
            Err(vec![ValidationError::LogicalNotLinear(2)])
        );
    }
}
