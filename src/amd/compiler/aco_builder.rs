/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::aco_ir::*;

/// Opcodes whose width follows the wave size
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WaveOp {
    SAnd,
    SOr,
    SXor,
    SAndn2,
    SOrn2,
    SNot,
    SMov,
    SCselect,
    SAndSaveexec,
    SBcnt1,
    SFf1,
    SBitcmp1,
}

impl WaveOp {
    pub fn opcode(&self, wave_size: u32) -> Opcode {
        let w64 = wave_size == 64;
        macro_rules! pick {
            ($op64: ident, $op32: ident) => {
                if w64 {
                    Opcode::$op64
                } else {
                    Opcode::$op32
                }
            };
        }
        match self {
            WaveOp::SAnd => pick!(SAndB64, SAndB32),
            WaveOp::SOr => pick!(SOrB64, SOrB32),
            WaveOp::SXor => pick!(SXorB64, SXorB32),
            WaveOp::SAndn2 => pick!(SAndn2B64, SAndn2B32),
            WaveOp::SOrn2 => pick!(SOrn2B64, SOrn2B32),
            WaveOp::SNot => pick!(SNotB64, SNotB32),
            WaveOp::SMov => pick!(SMovB64, SMovB32),
            WaveOp::SCselect => pick!(SCselectB64, SCselectB32),
            WaveOp::SAndSaveexec => pick!(SAndSaveexecB64, SAndSaveexecB32),
            WaveOp::SBcnt1 => pick!(SBcnt1I32B64, SBcnt1I32B32),
            WaveOp::SFf1 => pick!(SFf1I32B64, SFf1I32B32),
            WaveOp::SBitcmp1 => pick!(SBitcmp1B64, SBitcmp1B32),
        }
    }
}

pub trait Builder {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr;

    fn program(&self) -> &Program;

    fn program_mut(&mut self) -> &mut Program;

    fn lm(&self) -> RegClass {
        self.program().lane_mask
    }

    fn chip_class(&self) -> ChipClass {
        self.program().chip_class
    }

    fn tmp(&mut self, rc: RegClass) -> Temp {
        self.program_mut().allocate_tmp(rc)
    }

    fn w64or32(&self, op: WaveOp) -> Opcode {
        op.opcode(self.program().wave_size)
    }

    fn push_op(
        &mut self,
        opcode: Opcode,
        defs: Vec<Definition>,
        ops: Vec<Operand>,
    ) -> &mut Instr {
        self.push_instr(Instr::new_boxed(opcode, ops, defs))
    }

    fn scc_def(&mut self) -> Definition {
        let scc = self.tmp(RegClass::S1);
        Definition::fixed(scc, PhysReg::SCC)
    }

    /// Scalar ALU op with one destination, SCC is clobbered if the opcode
    /// writes it
    fn salu(&mut self, op: Opcode, rc: RegClass, ops: Vec<Operand>) -> Temp {
        debug_assert!(op.format().is_salu());
        let dst = self.tmp(rc);
        let mut defs = vec![Definition::new(dst)];
        if op.writes_scc() {
            defs.push(self.scc_def());
        }
        self.push_op(op, defs, ops);
        dst
    }

    fn sop1(&mut self, op: Opcode, rc: RegClass, src: impl Into<Operand>) -> Temp {
        self.salu(op, rc, vec![src.into()])
    }

    fn sop2(
        &mut self,
        op: Opcode,
        rc: RegClass,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Temp {
        self.salu(op, rc, vec![a.into(), b.into()])
    }

    /// Like `sop2()` but also returns the SCC result
    fn sop2_scc(
        &mut self,
        op: Opcode,
        rc: RegClass,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> (Temp, Temp) {
        assert!(op.writes_scc());
        let dst = self.tmp(rc);
        let scc = self.tmp(RegClass::S1);
        self.push_op(
            op,
            vec![Definition::new(dst), Definition::fixed(scc, PhysReg::SCC)],
            vec![a.into(), b.into()],
        );
        (dst, scc)
    }

    /// Scalar comparison, the result lives in SCC
    fn sopc(&mut self, op: Opcode, a: impl Into<Operand>, b: impl Into<Operand>) -> Temp {
        assert!(op.format() == Format::SOPC);
        let scc = self.tmp(RegClass::S1);
        self.push_op(
            op,
            vec![Definition::fixed(scc, PhysReg::SCC)],
            vec![a.into(), b.into()],
        );
        scc
    }

    fn sopk(&mut self, op: Opcode, rc: RegClass, imm: u16) -> Temp {
        let dst = self.tmp(rc);
        self.push_op(op, vec![dst.into()], Vec::new())
            .info = SopkInfo { imm: imm }.into();
        dst
    }

    fn sopp(&mut self, op: Opcode, imm: u32) -> &mut Instr {
        let i = self.push_op(op, Vec::new(), Vec::new());
        i.info = SoppInfo {
            imm: imm,
            block: None,
        }
        .into();
        i
    }

    /// Lane mask `a & b`
    fn lm_and(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> Temp {
        let (op, lm) = (self.w64or32(WaveOp::SAnd), self.lm());
        self.sop2(op, lm, a, b)
    }

    fn lm_andn2(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> Temp {
        let (op, lm) = (self.w64or32(WaveOp::SAndn2), self.lm());
        self.sop2(op, lm, a, b)
    }

    fn lm_or(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> Temp {
        let (op, lm) = (self.w64or32(WaveOp::SOr), self.lm());
        self.sop2(op, lm, a, b)
    }

    fn exec(&self) -> Operand {
        Operand::exec(self.lm())
    }

    fn valu(
        &mut self,
        op: Opcode,
        defs: Vec<Definition>,
        ops: Vec<Operand>,
    ) -> &mut Instr {
        let fmt = op.format();
        /* VOP1 and VOP2 can only read a VGPR in src1, everything else needs
         * the VOP3 encoding.
         */
        let needs_e64 = matches!(fmt, Format::VOP2 | Format::VOPC)
            && ops.len() > 1
            && ops[1].reg_type() != RegType::VGPR;
        let i = self.push_op(op, defs, ops);
        if needs_e64 {
            i.vop3_mut();
        }
        i
    }

    fn vop1(&mut self, op: Opcode, rc: RegClass, src: impl Into<Operand>) -> Temp {
        assert!(op.format() == Format::VOP1);
        let dst = self.tmp(rc);
        self.valu(op, vec![dst.into()], vec![src.into()]);
        dst
    }

    fn vop2(
        &mut self,
        op: Opcode,
        rc: RegClass,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Temp {
        assert!(op.format() == Format::VOP2);
        let dst = self.tmp(rc);
        self.valu(op, vec![dst.into()], vec![a.into(), b.into()]);
        dst
    }

    /// VOP2 producing a lane-mask carry-out, returns `(dst, carry)`
    fn vop2_carry(
        &mut self,
        op: Opcode,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        carry_in: Option<Temp>,
    ) -> (Temp, Temp) {
        let dst = self.tmp(RegClass::V1);
        let lm = self.lm();
        let carry = self.tmp(lm);
        let mut ops = vec![a.into(), b.into()];
        if let Some(c) = carry_in {
            ops.push(c.into());
        }
        let i = self.valu(op, vec![dst.into(), carry.into()], ops);
        i.vop3_mut();
        (dst, carry)
    }

    fn vop3(&mut self, op: Opcode, rc: RegClass, ops: Vec<Operand>) -> Temp {
        let dst = self.tmp(rc);
        let i = self.push_op(op, vec![dst.into()], ops);
        if i.opcode.format() != Format::VOP3 {
            i.vop3_mut();
        }
        dst
    }

    fn vop3p(&mut self, op: Opcode, rc: RegClass, ops: Vec<Operand>) -> Temp {
        assert!(op.format() == Format::VOP3P);
        let dst = self.tmp(rc);
        self.push_op(op, vec![dst.into()], ops).info = Vop3pInfo::default().into();
        dst
    }

    /// Per-lane comparison producing a lane mask
    fn vopc(&mut self, op: Opcode, a: impl Into<Operand>, b: impl Into<Operand>) -> Temp {
        assert!(op.format() == Format::VOPC);
        let lm = self.lm();
        let dst = self.tmp(lm);
        self.valu(op, vec![dst.into()], vec![a.into(), b.into()]);
        dst
    }

    fn cndmask(
        &mut self,
        rc: RegClass,
        else_val: impl Into<Operand>,
        then_val: impl Into<Operand>,
        cond: Temp,
    ) -> Temp {
        assert!(cond.reg_class() == self.lm());
        let dst = self.tmp(rc);
        self.valu(
            Opcode::VCndmaskB32,
            vec![dst.into()],
            vec![else_val.into(), then_val.into(), cond.into()],
        );
        dst
    }

    fn pseudo(&mut self, op: Opcode, rc: RegClass, ops: Vec<Operand>) -> Temp {
        let dst = self.tmp(rc);
        self.push_op(op, vec![dst.into()], ops);
        dst
    }

    /// An explicit copy
    ///
    /// Copies are never elided here, even when the source already has the
    /// requested class.
    fn copy(&mut self, rc: RegClass, src: impl Into<Operand>) -> Temp {
        self.pseudo(Opcode::PParallelcopy, rc, vec![src.into()])
    }

    fn split_vector(&mut self, src: Temp, rcs: &[RegClass]) -> Vec<Temp> {
        assert!(rcs.iter().map(|rc| rc.bytes()).sum::<u32>() == src.bytes());
        let parts: Vec<Temp> = rcs.iter().map(|rc| self.tmp(*rc)).collect();
        self.push_op(
            Opcode::PSplitVector,
            parts.iter().map(|t| Definition::new(*t)).collect(),
            vec![src.into()],
        );
        parts
    }

    fn create_vector(&mut self, rc: RegClass, parts: Vec<Operand>) -> Temp {
        assert!(parts.iter().map(|o| o.bytes()).sum::<u32>() == rc.bytes());
        self.pseudo(Opcode::PCreateVector, rc, parts)
    }

    fn extract_vector(&mut self, src: Temp, idx: u32, rc: RegClass) -> Temp {
        self.pseudo(
            Opcode::PExtractVector,
            rc,
            vec![src.into(), Operand::c32(idx)],
        )
    }

    /// Moves a value which is known to be uniform into scalar storage
    fn as_uniform(&mut self, src: Temp) -> Temp {
        let rc = RegClass::get(RegType::SGPR, src.size() * 4);
        if src.reg_type() == RegType::SGPR {
            self.copy(rc, src)
        } else {
            self.pseudo(Opcode::PAsUniform, rc, vec![src.into()])
        }
    }

    fn branch(&mut self, op: Opcode, cond: Option<Operand>, target: [u32; 2]) {
        assert!(op.is_branch());
        let ops = cond.into_iter().collect();
        self.push_op(op, Vec::new(), ops).info = BranchInfo { target: target }.into();
    }

    fn barrier(&mut self, sync: MemorySyncInfo, exec_scope: SyncScope) {
        self.push_op(Opcode::PBarrier, Vec::new(), Vec::new()).info = BarrierInfo {
            sync: sync,
            exec_scope: exec_scope,
        }
        .into();
    }

    fn smem(
        &mut self,
        op: Opcode,
        rc: RegClass,
        ops: Vec<Operand>,
        info: SmemInfo,
    ) -> Temp {
        assert!(op.format() == Format::SMEM);
        let dst = self.tmp(rc);
        self.push_op(op, vec![dst.into()], ops).info = info.into();
        dst
    }

    /// A memory or export instruction with an optional destination
    fn mem(
        &mut self,
        op: Opcode,
        rc: Option<RegClass>,
        ops: Vec<Operand>,
        info: impl Into<FormatInfo>,
    ) -> Option<Temp> {
        let dst = rc.map(|rc| self.tmp(rc));
        let defs = dst.iter().map(|t| Definition::new(*t)).collect();
        self.push_op(op, defs, ops).info = info.into();
        dst
    }

    fn exp(&mut self, values: [Operand; 4], info: ExportInfo) {
        self.push_op(Opcode::Exp, Vec::new(), values.to_vec()).info = info.into();
    }

    /// Lane mask of the lanes in `exec` for which `val` is non-zero, as
    /// a uniform boolean in SCC
    fn lm_any(&mut self, val: impl Into<Operand>) -> Temp {
        let op = self.w64or32(WaveOp::SAnd);
        let lm = self.lm();
        let exec = self.exec();
        let (_, scc) = self.sop2_scc(op, lm, val, exec);
        scc
    }
}

/// Collects instructions for insertion at an arbitrary place
pub struct InstrBuilder<'a> {
    program: &'a mut Program,
    instrs: Vec<Box<Instr>>,
}

impl<'a> InstrBuilder<'a> {
    pub fn new(program: &'a mut Program) -> Self {
        InstrBuilder {
            program: program,
            instrs: Vec::new(),
        }
    }

    pub fn into_vec(self) -> Vec<Box<Instr>> {
        self.instrs
    }
}

impl<'a> Builder for InstrBuilder<'a> {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        self.instrs.push(instr);
        self.instrs.last_mut().unwrap().as_mut()
    }

    fn program(&self) -> &Program {
        &*self.program
    }

    fn program_mut(&mut self) -> &mut Program {
        &mut *self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Program {
        Program::new(ChipClass::GFX9, 64, HwStage::CS, Vec::new())
    }

    #[test]
    fn scalar_ops_clobber_scc() {
        let mut p = program();
        let mut b = InstrBuilder::new(&mut p);
        let a = b.tmp(RegClass::S1);
        b.sop2(Opcode::SAddU32, RegClass::S1, a, Operand::c32(1));
        b.sop2(Opcode::SCselectB32, RegClass::S1, a, Operand::c32(1));
        let instrs = b.into_vec();
        assert_eq!(instrs[0].definitions.len(), 2);
        assert_eq!(instrs[0].definitions[1].phys_reg(), Some(PhysReg::SCC));
        assert_eq!(instrs[1].definitions.len(), 1);
    }

    #[test]
    fn vop2_with_scalar_src1_is_promoted() {
        let mut p = program();
        let mut b = InstrBuilder::new(&mut p);
        let v = b.tmp(RegClass::V1);
        let s = b.tmp(RegClass::S1);
        b.vop2(Opcode::VAddF32, RegClass::V1, s, v);
        b.vop2(Opcode::VAddF32, RegClass::V1, v, s);
        let instrs = b.into_vec();
        assert!(!instrs[0].is_vop3());
        assert!(instrs[1].is_vop3());
        assert!(instrs[1].to_string().contains("v_add_f32_e64"));
    }

    #[test]
    fn wave_ops_follow_wave_size() {
        assert_eq!(WaveOp::SAnd.opcode(64), Opcode::SAndB64);
        assert_eq!(WaveOp::SAndn2.opcode(32), Opcode::SAndn2B32);
    }
}
