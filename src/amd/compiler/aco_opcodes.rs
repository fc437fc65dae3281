/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use aco_ir_proc::OpcodeInfo;
use std::fmt;

/// Instruction encoding families
///
/// VOP1, VOP2 and VOPC opcodes may additionally be promoted to the VOP3
/// encoding (see `Vop3Info`) and VOP1/VOP2 opcodes may carry DPP controls.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Format {
    Pseudo,
    SOP1,
    SOP2,
    SOPK,
    SOPP,
    SOPC,
    SMEM,
    DS,
    MTBUF,
    MUBUF,
    MIMG,
    EXP,
    FLAT,
    GLOBAL,
    SCRATCH,
    PseudoBranch,
    PseudoBarrier,
    PseudoReduction,
    VOP1,
    VOP2,
    VOPC,
    VOP3,
    VOP3P,
    VINTRP,
}

impl Format {
    pub fn is_salu(&self) -> bool {
        matches!(
            self,
            Format::SOP1
                | Format::SOP2
                | Format::SOPK
                | Format::SOPP
                | Format::SOPC
        )
    }

    pub fn is_valu(&self) -> bool {
        matches!(
            self,
            Format::VOP1
                | Format::VOP2
                | Format::VOPC
                | Format::VOP3
                | Format::VOP3P
                | Format::VINTRP
        )
    }

    pub fn is_vmem(&self) -> bool {
        matches!(self, Format::MTBUF | Format::MUBUF | Format::MIMG)
    }

    pub fn is_flat_like(&self) -> bool {
        matches!(self, Format::FLAT | Format::GLOBAL | Format::SCRATCH)
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            Format::Pseudo
                | Format::PseudoBranch
                | Format::PseudoBarrier
                | Format::PseudoReduction
        )
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, OpcodeInfo)]
pub enum Opcode {
    /* Pseudo instructions */
    #[format(Pseudo)]
    PParallelcopy,
    #[format(Pseudo)]
    PStartpgm,
    #[format(Pseudo)]
    PPhi,
    #[format(Pseudo)]
    PLinearPhi,
    #[format(Pseudo)]
    PSplitVector,
    #[format(Pseudo)]
    PCreateVector,
    #[format(Pseudo)]
    PExtractVector,
    #[format(Pseudo)]
    PAsUniform,
    #[format(Pseudo)]
    PLogicalStart,
    #[format(Pseudo)]
    PLogicalEnd,
    #[format(Pseudo)]
    PDiscardIf,
    #[format(Pseudo)]
    PDemoteToHelper,
    #[format(Pseudo)]
    PIsHelper,
    #[format(Pseudo)]
    PWqm,
    #[format(Pseudo)]
    PExtract,
    #[format(Pseudo)]
    PInsert,
    #[format(Pseudo)]
    PInitScratch,
    #[format(PseudoBranch)]
    PBranch,
    #[format(PseudoBranch)]
    PCbranchZ,
    #[format(PseudoBranch)]
    PCbranchNz,
    #[format(PseudoBarrier)]
    PBarrier,
    #[format(PseudoReduction)]
    PReduce,
    #[format(PseudoReduction)]
    PInclusiveScan,
    #[format(PseudoReduction)]
    PExclusiveScan,

    /* SOP2 */
    #[format(SOP2)]
    SAddU32,
    #[format(SOP2)]
    SSubU32,
    #[format(SOP2)]
    SAddI32,
    #[format(SOP2)]
    SSubI32,
    #[format(SOP2)]
    SAddcU32,
    #[format(SOP2)]
    SSubbU32,
    #[format(SOP2)]
    SMinI32,
    #[format(SOP2)]
    SMinU32,
    #[format(SOP2)]
    SMaxI32,
    #[format(SOP2)]
    SMaxU32,
    #[format(SOP2)]
    SCselectB32,
    #[format(SOP2)]
    SCselectB64,
    #[format(SOP2)]
    SAndB32,
    #[format(SOP2)]
    SAndB64,
    #[format(SOP2)]
    SOrB32,
    #[format(SOP2)]
    SOrB64,
    #[format(SOP2)]
    SXorB32,
    #[format(SOP2)]
    SXorB64,
    #[format(SOP2)]
    SAndn2B32,
    #[format(SOP2)]
    SAndn2B64,
    #[format(SOP2)]
    SOrn2B32,
    #[format(SOP2)]
    SOrn2B64,
    #[format(SOP2)]
    SXnorB32,
    #[format(SOP2)]
    SXnorB64,
    #[format(SOP2)]
    SLshlB32,
    #[format(SOP2)]
    SLshlB64,
    #[format(SOP2)]
    SLshrB32,
    #[format(SOP2)]
    SLshrB64,
    #[format(SOP2)]
    SAshrI32,
    #[format(SOP2)]
    SAshrI64,
    #[format(SOP2)]
    SBfmB32,
    #[format(SOP2)]
    SBfmB64,
    #[format(SOP2)]
    SMulI32,
    #[format(SOP2)]
    SBfeU32,
    #[format(SOP2)]
    SBfeI32,
    #[format(SOP2)]
    SBfeU64,
    #[format(SOP2)]
    SMulHiU32,
    #[format(SOP2)]
    SMulHiI32,
    #[format(SOP2)]
    SPackLlB32B16,

    /* SOP1 */
    #[format(SOP1)]
    SMovB32,
    #[format(SOP1)]
    SMovB64,
    #[format(SOP1)]
    SNotB32,
    #[format(SOP1)]
    SNotB64,
    #[format(SOP1)]
    SBrevB32,
    #[format(SOP1)]
    SBcnt1I32B32,
    #[format(SOP1)]
    SBcnt1I32B64,
    #[format(SOP1)]
    SFf1I32B32,
    #[format(SOP1)]
    SFf1I32B64,
    #[format(SOP1)]
    SFlbitI32B32,
    #[format(SOP1)]
    SFlbitI32,
    #[format(SOP1)]
    SSextI32I8,
    #[format(SOP1)]
    SSextI32I16,
    #[format(SOP1)]
    SAbsI32,
    #[format(SOP1)]
    SAndSaveexecB32,
    #[format(SOP1)]
    SAndSaveexecB64,

    /* SOPK */
    #[format(SOPK)]
    SMovkI32,

    /* SOPC */
    #[format(SOPC)]
    SCmpEqI32,
    #[format(SOPC)]
    SCmpLgI32,
    #[format(SOPC)]
    SCmpGtI32,
    #[format(SOPC)]
    SCmpGeI32,
    #[format(SOPC)]
    SCmpLtI32,
    #[format(SOPC)]
    SCmpLeI32,
    #[format(SOPC)]
    SCmpEqU32,
    #[format(SOPC)]
    SCmpLgU32,
    #[format(SOPC)]
    SCmpGtU32,
    #[format(SOPC)]
    SCmpGeU32,
    #[format(SOPC)]
    SCmpLtU32,
    #[format(SOPC)]
    SCmpLeU32,
    #[format(SOPC)]
    SCmpEqU64,
    #[format(SOPC)]
    SCmpLgU64,
    #[format(SOPC)]
    SBitcmp1B32,
    #[format(SOPC)]
    SBitcmp1B64,

    /* SOPP */
    #[format(SOPP)]
    SNop,
    #[format(SOPP)]
    SEndpgm,
    #[format(SOPP)]
    SBranch,
    #[format(SOPP)]
    SCbranchScc0,
    #[format(SOPP)]
    SCbranchExecz,
    #[format(SOPP)]
    SSendmsg,

    /* SMEM */
    #[format(SMEM)]
    SLoadDword,
    #[format(SMEM)]
    SLoadDwordx2,
    #[format(SMEM)]
    SLoadDwordx4,
    #[format(SMEM)]
    SLoadDwordx8,
    #[format(SMEM)]
    SLoadDwordx16,
    #[format(SMEM)]
    SBufferLoadDword,
    #[format(SMEM)]
    SBufferLoadDwordx2,
    #[format(SMEM)]
    SBufferLoadDwordx4,
    #[format(SMEM)]
    SBufferLoadDwordx8,
    #[format(SMEM)]
    SBufferLoadDwordx16,

    /* DS */
    #[format(DS)]
    DsReadU8,
    #[format(DS)]
    DsReadI8,
    #[format(DS)]
    DsReadU16,
    #[format(DS)]
    DsReadI16,
    #[format(DS)]
    DsReadU8D16,
    #[format(DS)]
    DsReadU16D16,
    #[format(DS)]
    DsReadB32,
    #[format(DS)]
    DsReadB64,
    #[format(DS)]
    DsRead2B32,
    #[format(DS)]
    DsRead2B64,
    #[format(DS)]
    DsReadB96,
    #[format(DS)]
    DsReadB128,
    #[format(DS)]
    DsWriteB8,
    #[format(DS)]
    DsWriteB16,
    #[format(DS)]
    DsWriteB32,
    #[format(DS)]
    DsWriteB64,
    #[format(DS)]
    DsWrite2B32,
    #[format(DS)]
    DsWrite2B64,
    #[format(DS)]
    DsWriteB96,
    #[format(DS)]
    DsWriteB128,
    #[format(DS)]
    DsAddU32,
    #[format(DS)]
    DsAddRtnU32,
    #[format(DS)]
    DsMinRtnI32,
    #[format(DS)]
    DsMaxRtnI32,
    #[format(DS)]
    DsMinRtnU32,
    #[format(DS)]
    DsMaxRtnU32,
    #[format(DS)]
    DsAndRtnB32,
    #[format(DS)]
    DsOrRtnB32,
    #[format(DS)]
    DsXorRtnB32,
    #[format(DS)]
    DsWrxchgRtnB32,
    #[format(DS)]
    DsCmpstRtnB32,
    #[format(DS)]
    DsSwizzleB32,
    #[format(DS)]
    DsBpermuteB32,

    /* MUBUF */
    #[format(MUBUF)]
    BufferLoadUbyte,
    #[format(MUBUF)]
    BufferLoadUshort,
    #[format(MUBUF)]
    BufferLoadDword,
    #[format(MUBUF)]
    BufferLoadDwordx2,
    #[format(MUBUF)]
    BufferLoadDwordx3,
    #[format(MUBUF)]
    BufferLoadDwordx4,
    #[format(MUBUF)]
    BufferStoreByte,
    #[format(MUBUF)]
    BufferStoreShort,
    #[format(MUBUF)]
    BufferStoreDword,
    #[format(MUBUF)]
    BufferStoreDwordx2,
    #[format(MUBUF)]
    BufferStoreDwordx3,
    #[format(MUBUF)]
    BufferStoreDwordx4,
    #[format(MUBUF)]
    BufferAtomicAdd,
    #[format(MUBUF)]
    BufferAtomicSmin,
    #[format(MUBUF)]
    BufferAtomicUmin,
    #[format(MUBUF)]
    BufferAtomicSmax,
    #[format(MUBUF)]
    BufferAtomicUmax,
    #[format(MUBUF)]
    BufferAtomicAnd,
    #[format(MUBUF)]
    BufferAtomicOr,
    #[format(MUBUF)]
    BufferAtomicXor,
    #[format(MUBUF)]
    BufferAtomicSwap,
    #[format(MUBUF)]
    BufferAtomicCmpswap,

    /* MTBUF */
    #[format(MTBUF)]
    TbufferLoadFormatX,
    #[format(MTBUF)]
    TbufferLoadFormatXy,
    #[format(MTBUF)]
    TbufferLoadFormatXyz,
    #[format(MTBUF)]
    TbufferLoadFormatXyzw,

    /* MIMG */
    #[format(MIMG)]
    ImageSample,
    #[format(MIMG)]
    ImageSampleL,
    #[format(MIMG)]
    ImageSampleB,
    #[format(MIMG)]
    ImageSampleLz,
    #[format(MIMG)]
    ImageSampleD,
    #[format(MIMG)]
    ImageSampleC,
    #[format(MIMG)]
    ImageSampleCL,
    #[format(MIMG)]
    ImageSampleCB,
    #[format(MIMG)]
    ImageSampleCLz,
    #[format(MIMG)]
    ImageSampleCD,
    #[format(MIMG)]
    ImageSampleO,
    #[format(MIMG)]
    ImageSampleLO,
    #[format(MIMG)]
    ImageSampleBO,
    #[format(MIMG)]
    ImageSampleLzO,
    #[format(MIMG)]
    ImageSampleDO,
    #[format(MIMG)]
    ImageSampleCO,
    #[format(MIMG)]
    ImageSampleCLO,
    #[format(MIMG)]
    ImageSampleCBO,
    #[format(MIMG)]
    ImageSampleCLzO,
    #[format(MIMG)]
    ImageSampleCDO,
    #[format(MIMG)]
    ImageGather4,
    #[format(MIMG)]
    ImageGather4L,
    #[format(MIMG)]
    ImageGather4B,
    #[format(MIMG)]
    ImageGather4Lz,
    #[format(MIMG)]
    ImageGather4C,
    #[format(MIMG)]
    ImageGather4CL,
    #[format(MIMG)]
    ImageGather4CB,
    #[format(MIMG)]
    ImageGather4CLz,
    #[format(MIMG)]
    ImageGather4O,
    #[format(MIMG)]
    ImageGather4LO,
    #[format(MIMG)]
    ImageGather4BO,
    #[format(MIMG)]
    ImageGather4LzO,
    #[format(MIMG)]
    ImageGather4CO,
    #[format(MIMG)]
    ImageGather4CLO,
    #[format(MIMG)]
    ImageGather4CBO,
    #[format(MIMG)]
    ImageGather4CLzO,
    #[format(MIMG)]
    ImageLoad,
    #[format(MIMG)]
    ImageLoadMip,
    #[format(MIMG)]
    ImageStore,
    #[format(MIMG)]
    ImageStoreMip,
    #[format(MIMG)]
    ImageGetResinfo,
    #[format(MIMG)]
    ImageGetLod,
    #[format(MIMG)]
    ImageAtomicAdd,
    #[format(MIMG)]
    ImageAtomicSmin,
    #[format(MIMG)]
    ImageAtomicUmin,
    #[format(MIMG)]
    ImageAtomicSmax,
    #[format(MIMG)]
    ImageAtomicUmax,
    #[format(MIMG)]
    ImageAtomicAnd,
    #[format(MIMG)]
    ImageAtomicOr,
    #[format(MIMG)]
    ImageAtomicXor,
    #[format(MIMG)]
    ImageAtomicSwap,
    #[format(MIMG)]
    ImageAtomicCmpswap,

    /* EXP */
    #[format(EXP)]
    Exp,

    /* FLAT, GLOBAL, SCRATCH */
    #[format(FLAT)]
    FlatLoadUbyte,
    #[format(FLAT)]
    FlatLoadUshort,
    #[format(FLAT)]
    FlatLoadDword,
    #[format(FLAT)]
    FlatLoadDwordx2,
    #[format(FLAT)]
    FlatLoadDwordx3,
    #[format(FLAT)]
    FlatLoadDwordx4,
    #[format(FLAT)]
    FlatStoreByte,
    #[format(FLAT)]
    FlatStoreShort,
    #[format(FLAT)]
    FlatStoreDword,
    #[format(FLAT)]
    FlatStoreDwordx2,
    #[format(FLAT)]
    FlatStoreDwordx3,
    #[format(FLAT)]
    FlatStoreDwordx4,
    #[format(FLAT)]
    FlatAtomicAdd,
    #[format(FLAT)]
    FlatAtomicSmin,
    #[format(FLAT)]
    FlatAtomicUmin,
    #[format(FLAT)]
    FlatAtomicSmax,
    #[format(FLAT)]
    FlatAtomicUmax,
    #[format(FLAT)]
    FlatAtomicAnd,
    #[format(FLAT)]
    FlatAtomicOr,
    #[format(FLAT)]
    FlatAtomicXor,
    #[format(FLAT)]
    FlatAtomicSwap,
    #[format(FLAT)]
    FlatAtomicCmpswap,
    #[format(GLOBAL)]
    GlobalLoadUbyte,
    #[format(GLOBAL)]
    GlobalLoadUshort,
    #[format(GLOBAL)]
    GlobalLoadDword,
    #[format(GLOBAL)]
    GlobalLoadDwordx2,
    #[format(GLOBAL)]
    GlobalLoadDwordx3,
    #[format(GLOBAL)]
    GlobalLoadDwordx4,
    #[format(GLOBAL)]
    GlobalStoreByte,
    #[format(GLOBAL)]
    GlobalStoreShort,
    #[format(GLOBAL)]
    GlobalStoreDword,
    #[format(GLOBAL)]
    GlobalStoreDwordx2,
    #[format(GLOBAL)]
    GlobalStoreDwordx3,
    #[format(GLOBAL)]
    GlobalStoreDwordx4,
    #[format(GLOBAL)]
    GlobalAtomicAdd,
    #[format(GLOBAL)]
    GlobalAtomicSmin,
    #[format(GLOBAL)]
    GlobalAtomicUmin,
    #[format(GLOBAL)]
    GlobalAtomicSmax,
    #[format(GLOBAL)]
    GlobalAtomicUmax,
    #[format(GLOBAL)]
    GlobalAtomicAnd,
    #[format(GLOBAL)]
    GlobalAtomicOr,
    #[format(GLOBAL)]
    GlobalAtomicXor,
    #[format(GLOBAL)]
    GlobalAtomicSwap,
    #[format(GLOBAL)]
    GlobalAtomicCmpswap,
    #[format(SCRATCH)]
    ScratchLoadUbyte,
    #[format(SCRATCH)]
    ScratchLoadUshort,
    #[format(SCRATCH)]
    ScratchLoadDword,
    #[format(SCRATCH)]
    ScratchLoadDwordx2,
    #[format(SCRATCH)]
    ScratchLoadDwordx3,
    #[format(SCRATCH)]
    ScratchLoadDwordx4,
    #[format(SCRATCH)]
    ScratchStoreByte,
    #[format(SCRATCH)]
    ScratchStoreShort,
    #[format(SCRATCH)]
    ScratchStoreDword,
    #[format(SCRATCH)]
    ScratchStoreDwordx2,
    #[format(SCRATCH)]
    ScratchStoreDwordx3,
    #[format(SCRATCH)]
    ScratchStoreDwordx4,

    /* VOP1 */
    #[format(VOP1)]
    VMovB32,
    #[format(VOP1)]
    VNotB32,
    #[format(VOP1)]
    VBfrevB32,
    #[format(VOP1)]
    VFfbhU32,
    #[format(VOP1)]
    VFfbhI32,
    #[format(VOP1)]
    VFfblB32,
    #[format(VOP1)]
    VReadfirstlaneB32,
    #[format(VOP1)]
    VCvtF32I32,
    #[format(VOP1)]
    VCvtF32U32,
    #[format(VOP1)]
    VCvtU32F32,
    #[format(VOP1)]
    VCvtI32F32,
    #[format(VOP1)]
    VCvtF16F32,
    #[format(VOP1)]
    VCvtF32F16,
    #[format(VOP1)]
    VCvtF32F64,
    #[format(VOP1)]
    VCvtF64F32,
    #[format(VOP1)]
    VCvtF64I32,
    #[format(VOP1)]
    VCvtF64U32,
    #[format(VOP1)]
    VCvtI32F64,
    #[format(VOP1)]
    VCvtU32F64,
    #[format(VOP1)]
    VCvtF16U16,
    #[format(VOP1)]
    VCvtF16I16,
    #[format(VOP1)]
    VCvtU16F16,
    #[format(VOP1)]
    VCvtI16F16,
    #[format(VOP1)]
    VCvtF32Ubyte0,
    #[format(VOP1)]
    VRcpF32,
    #[format(VOP1)]
    VRsqF32,
    #[format(VOP1)]
    VSqrtF32,
    #[format(VOP1)]
    VLogF32,
    #[format(VOP1)]
    VExpF32,
    #[format(VOP1)]
    VSinF32,
    #[format(VOP1)]
    VCosF32,
    #[format(VOP1)]
    VRcpF16,
    #[format(VOP1)]
    VRsqF16,
    #[format(VOP1)]
    VSqrtF16,
    #[format(VOP1)]
    VLogF16,
    #[format(VOP1)]
    VExpF16,
    #[format(VOP1)]
    VSinF16,
    #[format(VOP1)]
    VCosF16,
    #[format(VOP1)]
    VRcpF64,
    #[format(VOP1)]
    VRsqF64,
    #[format(VOP1)]
    VSqrtF64,
    #[format(VOP1)]
    VFloorF32,
    #[format(VOP1)]
    VCeilF32,
    #[format(VOP1)]
    VTruncF32,
    #[format(VOP1)]
    VRndneF32,
    #[format(VOP1)]
    VFractF32,
    #[format(VOP1)]
    VFloorF16,
    #[format(VOP1)]
    VCeilF16,
    #[format(VOP1)]
    VTruncF16,
    #[format(VOP1)]
    VRndneF16,
    #[format(VOP1)]
    VFractF16,
    #[format(VOP1)]
    VFloorF64,
    #[format(VOP1)]
    VCeilF64,
    #[format(VOP1)]
    VTruncF64,
    #[format(VOP1)]
    VRndneF64,
    #[format(VOP1)]
    VFractF64,

    /* VOP2 */
    #[format(VOP2)]
    VAddF32,
    #[format(VOP2)]
    VSubF32,
    #[format(VOP2)]
    VMulF32,
    #[format(VOP2)]
    VMinF32,
    #[format(VOP2)]
    VMaxF32,
    #[format(VOP2)]
    VAddF16,
    #[format(VOP2)]
    VSubF16,
    #[format(VOP2)]
    VMulF16,
    #[format(VOP2)]
    VMinF16,
    #[format(VOP2)]
    VMaxF16,
    #[format(VOP2)]
    VAddCoU32,
    #[format(VOP2)]
    VAddU32,
    #[format(VOP2)]
    VSubCoU32,
    #[format(VOP2)]
    VSubU32,
    #[format(VOP2)]
    VAddcCoU32,
    #[format(VOP2)]
    VSubbCoU32,
    #[format(VOP2)]
    VAddU16,
    #[format(VOP2)]
    VSubU16,
    #[format(VOP2)]
    VMulLoU16,
    #[format(VOP2)]
    VAndB32,
    #[format(VOP2)]
    VOrB32,
    #[format(VOP2)]
    VXorB32,
    #[format(VOP2)]
    VLshlrevB32,
    #[format(VOP2)]
    VLshrrevB32,
    #[format(VOP2)]
    VAshrrevI32,
    #[format(VOP2)]
    VLshlrevB16,
    #[format(VOP2)]
    VLshrrevB16,
    #[format(VOP2)]
    VAshrrevI16,
    #[format(VOP2)]
    VMinI32,
    #[format(VOP2)]
    VMaxI32,
    #[format(VOP2)]
    VMinU32,
    #[format(VOP2)]
    VMaxU32,
    #[format(VOP2)]
    VMinI16,
    #[format(VOP2)]
    VMaxI16,
    #[format(VOP2)]
    VMinU16,
    #[format(VOP2)]
    VMaxU16,
    #[format(VOP2)]
    VCndmaskB32,
    #[format(VOP2)]
    VMulU32U24,
    #[format(VOP2)]
    VMulI32I24,
    #[format(VOP2)]
    VLdexpF32,
    #[format(VOP2)]
    VCvtPkrtzF16F32,

    /* VOPC */
    #[format(VOPC)]
    VCmpLtF16,
    #[format(VOPC)]
    VCmpEqF16,
    #[format(VOPC)]
    VCmpGeF16,
    #[format(VOPC)]
    VCmpNeqF16,
    #[format(VOPC)]
    VCmpLtF32,
    #[format(VOPC)]
    VCmpEqF32,
    #[format(VOPC)]
    VCmpGeF32,
    #[format(VOPC)]
    VCmpNeqF32,
    #[format(VOPC)]
    VCmpLtF64,
    #[format(VOPC)]
    VCmpEqF64,
    #[format(VOPC)]
    VCmpGeF64,
    #[format(VOPC)]
    VCmpNeqF64,
    #[format(VOPC)]
    VCmpLtI16,
    #[format(VOPC)]
    VCmpEqI16,
    #[format(VOPC)]
    VCmpLgI16,
    #[format(VOPC)]
    VCmpGeI16,
    #[format(VOPC)]
    VCmpLtU16,
    #[format(VOPC)]
    VCmpGeU16,
    #[format(VOPC)]
    VCmpLtI32,
    #[format(VOPC)]
    VCmpEqI32,
    #[format(VOPC)]
    VCmpLgI32,
    #[format(VOPC)]
    VCmpGeI32,
    #[format(VOPC)]
    VCmpLtU32,
    #[format(VOPC)]
    VCmpGeU32,
    #[format(VOPC)]
    VCmpLtI64,
    #[format(VOPC)]
    VCmpEqI64,
    #[format(VOPC)]
    VCmpLgI64,
    #[format(VOPC)]
    VCmpGeI64,
    #[format(VOPC)]
    VCmpLtU64,
    #[format(VOPC)]
    VCmpGeU64,
    #[format(VOPC)]
    VCmpClassF16,
    #[format(VOPC)]
    VCmpClassF32,
    #[format(VOPC)]
    VCmpClassF64,

    /* VOP3 */
    #[format(VOP3)]
    VMadU32U24,
    #[format(VOP3)]
    VMadI32I24,
    #[format(VOP3)]
    VFmaF16,
    #[format(VOP3)]
    VFmaF32,
    #[format(VOP3)]
    VFmaF64,
    #[format(VOP3)]
    VMulLoU32,
    #[format(VOP3)]
    VMulHiU32,
    #[format(VOP3)]
    VMulHiI32,
    #[format(VOP3)]
    VAddF64,
    #[format(VOP3)]
    VMulF64,
    #[format(VOP3)]
    VMinF64,
    #[format(VOP3)]
    VMaxF64,
    #[format(VOP3)]
    VLshlB64,
    #[format(VOP3)]
    VLshrB64,
    #[format(VOP3)]
    VAshrI64,
    #[format(VOP3)]
    VLshlrevB64,
    #[format(VOP3)]
    VLshrrevB64,
    #[format(VOP3)]
    VAshrrevI64,
    #[format(VOP3)]
    VBfeU32,
    #[format(VOP3)]
    VBfeI32,
    #[format(VOP3)]
    VBfiB32,
    #[format(VOP3)]
    VBfmB32,
    #[format(VOP3)]
    VAlignbitB32,
    #[format(VOP3)]
    VCubeidF32,
    #[format(VOP3)]
    VCubescF32,
    #[format(VOP3)]
    VCubetcF32,
    #[format(VOP3)]
    VCubemaF32,
    #[format(VOP3)]
    VAdd3U32,
    #[format(VOP3)]
    VAlignbyteB32,
    #[format(VOP3)]
    VLshlAddU32,
    #[format(VOP3)]
    VMbcntLoU32B32,
    #[format(VOP3)]
    VMbcntHiU32B32,
    #[format(VOP3)]
    VBcntU32B32,
    #[format(VOP3)]
    VReadlaneB32,
    #[format(VOP3)]
    VWritelaneB32,
    #[format(VOP3)]
    VPermB32,

    /* VOP3P */
    #[format(VOP3P)]
    VPkAddF16,
    #[format(VOP3P)]
    VPkMulF16,
    #[format(VOP3P)]
    VPkFmaF16,
    #[format(VOP3P)]
    VPkMinF16,
    #[format(VOP3P)]
    VPkMaxF16,
    #[format(VOP3P)]
    VPkAddU16,
    #[format(VOP3P)]
    VPkSubU16,
    #[format(VOP3P)]
    VPkMulLoU16,
    #[format(VOP3P)]
    VPkLshlrevB16,
    #[format(VOP3P)]
    VPkLshrrevB16,
    #[format(VOP3P)]
    VPkAshrrevI16,
    #[format(VOP3P)]
    VPkMinI16,
    #[format(VOP3P)]
    VPkMaxI16,
    #[format(VOP3P)]
    VPkMinU16,
    #[format(VOP3P)]
    VPkMaxU16,

    /* VINTRP */
    #[format(VINTRP)]
    VInterpP1F32,
    #[format(VINTRP)]
    VInterpP2F32,
    #[format(VINTRP)]
    VInterpMovF32,
}

impl Opcode {
    pub fn is_phi(&self) -> bool {
        matches!(self, Opcode::PPhi | Opcode::PLinearPhi)
    }

    pub fn is_branch(&self) -> bool {
        self.format() == Format::PseudoBranch
    }

    /// Returns true if the scalar ALU opcode sets SCC
    pub fn writes_scc(&self) -> bool {
        match self.format() {
            Format::SOP2 => !matches!(
                self,
                Opcode::SCselectB32
                    | Opcode::SCselectB64
                    | Opcode::SMulI32
                    | Opcode::SBfmB32
                    | Opcode::SBfmB64
                    | Opcode::SMulHiU32
                    | Opcode::SMulHiI32
                    | Opcode::SPackLlB32B16
            ),
            Format::SOP1 => matches!(
                self,
                Opcode::SNotB32
                    | Opcode::SNotB64
                    | Opcode::SBcnt1I32B32
                    | Opcode::SBcnt1I32B64
                    | Opcode::SAbsI32
                    | Opcode::SAndSaveexecB32
                    | Opcode::SAndSaveexecB64
            ),
            Format::SOPC => true,
            _ => false,
        }
    }

    /// Returns true if swapping the first two operands doesn't change the
    /// result
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Opcode::VAddF32
                | Opcode::VMulF32
                | Opcode::VMinF32
                | Opcode::VMaxF32
                | Opcode::VAddF16
                | Opcode::VMulF16
                | Opcode::VMinF16
                | Opcode::VMaxF16
                | Opcode::VAddCoU32
                | Opcode::VAddU32
                | Opcode::VAddU16
                | Opcode::VMulLoU16
                | Opcode::VAndB32
                | Opcode::VOrB32
                | Opcode::VXorB32
                | Opcode::VMinI32
                | Opcode::VMaxI32
                | Opcode::VMinU32
                | Opcode::VMaxU32
                | Opcode::VMinI16
                | Opcode::VMaxI16
                | Opcode::VMinU16
                | Opcode::VMaxU16
                | Opcode::VMulU32U24
                | Opcode::VMulI32I24
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_names_follow_assembler_spelling() {
        assert_eq!(Opcode::SAddU32.name(), "s_add_u32");
        assert_eq!(Opcode::SAndn2B64.name(), "s_andn2_b64");
        assert_eq!(Opcode::VCvtF32I32.name(), "v_cvt_f32_i32");
        assert_eq!(Opcode::ImageSampleCLzO.name(), "image_sample_c_lz_o");
        assert_eq!(Opcode::BufferLoadDwordx4.name(), "buffer_load_dwordx4");
        assert_eq!(Opcode::VMbcntLoU32B32.name(), "v_mbcnt_lo_u32_b32");
        assert_eq!(Opcode::PCbranchZ.to_string(), "p_cbranch_z");
    }

    #[test]
    fn formats_classify_families() {
        assert!(Opcode::SAddU32.format().is_salu());
        assert!(Opcode::VAddF32.format().is_valu());
        assert!(Opcode::ImageSample.format().is_vmem());
        assert!(Opcode::GlobalLoadDword.format().is_flat_like());
        assert!(Opcode::PBranch.is_branch());
        assert!(Opcode::ALL.iter().filter(|op| op.is_phi()).count() == 2);
        assert!(Opcode::SAddU32.writes_scc());
        assert!(!Opcode::SCselectB64.writes_scc());
        assert!(!Opcode::SMovB64.writes_scc());
    }
}
