/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! The NIR input consumed by instruction selection
//!
//! This is a plain-data model of a NIR shader after optimization and
//! divergence analysis.  Every SSA def carries its bit size, component
//! count and divergence, and control flow is the structured tree of blocks,
//! ifs and loops NIR guarantees.

use crate::util::lowest_pow2_divisor;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ShaderStage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

/// Output slots understood by the export code
pub const VARYING_SLOT_POS: u32 = 0;
pub const VARYING_SLOT_PSIZ: u32 = 1;
pub const VARYING_SLOT_VAR0: u32 = 32;
pub const VARYING_SLOT_MAX: u32 = 64;

pub const FRAG_RESULT_DEPTH: u32 = 0;
pub const FRAG_RESULT_STENCIL: u32 = 1;
pub const FRAG_RESULT_SAMPLE_MASK: u32 = 2;
pub const FRAG_RESULT_DATA0: u32 = 4;

/// An SSA value
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Def {
    pub index: u32,
    pub bit_size: u8,
    pub num_components: u8,
    pub divergent: bool,
}

impl Def {
    pub fn bytes(&self) -> u32 {
        if self.bit_size == 1 {
            /* Booleans have no memory representation */
            0
        } else {
            u32::from(self.bit_size / 8) * u32::from(self.num_components)
        }
    }

    pub fn is_bool(&self) -> bool {
        self.bit_size == 1
    }
}

impl fmt::Display for Def {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index)
    }
}

/// An ALU source with a per-component swizzle
#[derive(Clone, Copy, Debug)]
pub struct AluSrc {
    pub src: Def,
    pub swizzle: [u8; 4],
}

impl AluSrc {
    pub fn new(src: Def) -> AluSrc {
        AluSrc {
            src: src,
            swizzle: [0, 1, 2, 3],
        }
    }

    /// Reads component `comp` of `src` in every channel
    pub fn comp(src: Def, comp: u8) -> AluSrc {
        AluSrc {
            src: src,
            swizzle: [comp; 4],
        }
    }

    pub fn is_identity(&self, num_components: u8) -> bool {
        (0..num_components).all(|i| self.swizzle[usize::from(i)] == i)
            && num_components == self.src.num_components
    }
}

impl From<Def> for AluSrc {
    fn from(d: Def) -> AluSrc {
        AluSrc::new(d)
    }
}

impl fmt::Display for AluSrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.src)?;
        if self.src.num_components > 1 || self.swizzle[0] != 0 {
            f.write_str(".")?;
            for c in &self.swizzle[..usize::from(self.src.num_components.max(1))] {
                write!(f, "{}", ['x', 'y', 'z', 'w'][usize::from(*c & 3)])?;
            }
        }
        Ok(())
    }
}

/// Writes a CamelCase identifier in NIR's snake_case spelling
fn write_snake_case(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                f.write_str("_")?;
            }
            write!(f, "{}", c.to_ascii_lowercase())?;
        } else {
            write!(f, "{}", c)?;
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AluOp {
    Mov,
    Vec2,
    Vec3,
    Vec4,

    Iadd,
    Isub,
    Imul,
    UmulHigh,
    ImulHigh,
    Ineg,
    Iabs,
    Imin,
    Imax,
    Umin,
    Umax,
    Iand,
    Ior,
    Ixor,
    Inot,
    Ishl,
    Ishr,
    Ushr,
    UaddCarry,
    UsubBorrow,
    BitCount,
    FindLsb,
    UfindMsb,
    BitfieldReverse,
    Ubfe,
    Ibfe,
    Bfm,

    Fadd,
    Fsub,
    Fmul,
    Ffma,
    Fneg,
    Fabs,
    Fsat,
    Fmin,
    Fmax,
    Frcp,
    Frsq,
    Fsqrt,
    Flog2,
    Fexp2,
    Fsin,
    Fcos,
    Ffloor,
    Fceil,
    Ftrunc,
    FroundEven,
    Ffract,
    Fddx,
    Fddy,

    Flt,
    Fge,
    Feq,
    Fneu,
    Ilt,
    Ige,
    Ieq,
    Ine,
    Ult,
    Uge,

    Bcsel,
    B2i32,
    B2f32,
    I2b1,

    I2f32,
    U2f32,
    F2i32,
    F2u32,
    I2f64,
    U2f64,
    F2f16,
    F2f32,
    F2f64,
    I2i8,
    I2i16,
    I2i32,
    I2i64,
    U2u8,
    U2u16,
    U2u32,
    U2u64,
    PackHalf2x16,
}

impl AluOp {
    pub fn num_inputs(&self) -> usize {
        match self {
            AluOp::Vec4 => 4,
            AluOp::Ffma
            | AluOp::Bcsel
            | AluOp::Vec3
            | AluOp::Ubfe
            | AluOp::Ibfe => 3,
            AluOp::Mov
            | AluOp::Ineg
            | AluOp::Iabs
            | AluOp::Inot
            | AluOp::BitCount
            | AluOp::FindLsb
            | AluOp::UfindMsb
            | AluOp::BitfieldReverse
            | AluOp::Fneg
            | AluOp::Fabs
            | AluOp::Fsat
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
            | AluOp::B2i32
            | AluOp::B2f32
            | AluOp::I2b1
            | AluOp::I2f32
            | AluOp::U2f32
            | AluOp::F2i32
            | AluOp::F2u32
            | AluOp::I2f64
            | AluOp::U2f64
            | AluOp::F2f16
            | AluOp::F2f32
            | AluOp::F2f64
            | AluOp::I2i8
            | AluOp::I2i16
            | AluOp::I2i32
            | AluOp::I2i64
            | AluOp::U2u8
            | AluOp::U2u16
            | AluOp::U2u32
            | AluOp::U2u64
            | AluOp::PackHalf2x16 => 1,
            _ => 2,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            AluOp::Flt
                | AluOp::Fge
                | AluOp::Feq
                | AluOp::Fneu
                | AluOp::Ilt
                | AluOp::Ige
                | AluOp::Ieq
                | AluOp::Ine
                | AluOp::Ult
                | AluOp::Uge
        )
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_snake_case(f, &format!("{:?}", self))
    }
}

#[derive(Clone, Debug)]
pub struct AluInstr {
    pub op: AluOp,
    pub def: Def,
    pub srcs: Vec<AluSrc>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IntrinsicOp {
    LoadUbo,
    LoadSsbo,
    StoreSsbo,
    SsboAtomic,
    LoadShared,
    StoreShared,
    SharedAtomic,
    LoadGlobal,
    StoreGlobal,
    GlobalAtomic,
    LoadScratch,
    StoreScratch,
    LoadPushConstant,
    VulkanResourceIndex,
    LoadVulkanDescriptor,

    ControlBarrier,
    MemoryBarrier,

    Discard,
    DiscardIf,
    Demote,
    DemoteIf,
    IsHelperInvocation,

    LoadInput,
    LoadBarycentricPixel,
    LoadInterpolatedInput,
    LoadFragCoord,
    StoreOutput,
    LoadVertexId,
    LoadInstanceId,
    LoadLocalInvocationId,
    LoadLocalInvocationIndex,
    LoadWorkgroupId,
    LoadSubgroupInvocation,

    Ballot,
    ReadFirstInvocation,
    ReadInvocation,
    VoteAny,
    VoteAll,
    Reduce,
    InclusiveScan,
    ExclusiveScan,
    QuadBroadcast,
    QuadSwapHorizontal,
    QuadSwapVertical,
    QuadSwapDiagonal,

    ImageLoad,
    ImageStore,
    ImageAtomic,
    ImageSize,

    /// `srcs[0]` counts the vertices emitted so far
    EmitVertex,
    EndPrimitive,
}

impl fmt::Display for IntrinsicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_snake_case(f, &format!("{:?}", self))
    }
}

/// Memory access qualifiers
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Access {
    pub coherent: bool,
    pub volatile: bool,
    pub can_reorder: bool,
    pub non_temporal: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Scope {
    #[default]
    None,
    Invocation,
    Subgroup,
    Workgroup,
    QueueFamily,
    Device,
}

/// Memory kinds a barrier orders
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MemModes {
    pub ssbo: bool,
    pub shared: bool,
    pub global: bool,
    pub image: bool,
    pub shader_out: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MemSemantics {
    pub acquire: bool,
    pub release: bool,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AtomicOp {
    Add,
    Imin,
    Umin,
    Imax,
    Umax,
    And,
    Or,
    Xor,
    Xchg,
    CmpXchg,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReductionOp {
    Iadd,
    Imul,
    Fadd,
    Fmul,
    Imin,
    Imax,
    Umin,
    Umax,
    Fmin,
    Fmax,
    Iand,
    Ior,
    Ixor,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum SamplerDim {
    Dim1D,
    #[default]
    Dim2D,
    Dim3D,
    Cube,
    Ms,
    Buf,
}

/// Descriptor kinds `load_vulkan_descriptor` can fetch
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum DescriptorType {
    #[default]
    Buffer,
    Image,
    Sampler,
}

/// Constant indices attached to an intrinsic
#[derive(Clone, Copy, Debug, Default)]
pub struct IntrinsicIndices {
    pub base: i32,
    pub range: u32,
    pub align_mul: u32,
    pub align_offset: u32,
    pub write_mask: u8,
    pub component: u8,
    pub desc_set: u32,
    pub binding: u32,
    pub desc_type: DescriptorType,
    pub access: Access,
    pub atomic_op: Option<AtomicOp>,
    pub semantics: MemSemantics,
    pub modes: MemModes,
    pub memory_scope: Scope,
    pub execution_scope: Scope,
    pub reduction_op: Option<ReductionOp>,
    pub cluster_size: u32,
    pub image_dim: SamplerDim,
    pub image_array: bool,
    pub stream_id: u8,
}

impl IntrinsicIndices {
    /// Alignment known for the access, in bytes
    pub fn align(&self) -> u32 {
        if self.align_mul == 0 {
            return 1;
        }
        if self.align_offset == 0 {
            self.align_mul
        } else {
            lowest_pow2_divisor(self.align_offset)
        }
    }
}

#[derive(Clone, Debug)]
pub struct IntrinsicInstr {
    pub op: IntrinsicOp,
    pub def: Option<Def>,
    pub srcs: Vec<Def>,
    pub idx: IntrinsicIndices,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TexOp {
    Tex,
    Txb,
    Txl,
    Txd,
    Txf,
    TxfMs,
    Txs,
    Tg4,
    Lod,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TexSrcType {
    Coord,
    Bias,
    Lod,
    Comparator,
    Offset,
    Ddx,
    Ddy,
    MsIndex,
    TextureHandle,
    SamplerHandle,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum TexDestType {
    #[default]
    Float,
    Int,
    Uint,
}

#[derive(Clone, Debug)]
pub struct TexInstr {
    pub op: TexOp,
    pub def: Def,
    pub sampler_dim: SamplerDim,
    pub is_array: bool,
    pub is_shadow: bool,
    pub dest_type: TexDestType,
    /// Gather component
    pub component: u8,
    /// The last component of the result is a residency code
    pub is_sparse: bool,
    pub srcs: Vec<(TexSrcType, Def)>,
}

impl TexInstr {
    pub fn src(&self, ty: TexSrcType) -> Option<Def> {
        self.srcs.iter().find(|(t, _)| *t == ty).map(|(_, d)| *d)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JumpKind {
    Break,
    Continue,
}

#[derive(Clone, Debug)]
pub enum Instr {
    Alu(AluInstr),
    Intrinsic(IntrinsicInstr),
    Tex(TexInstr),
    LoadConst { def: Def, values: Vec<u64> },
    Undef { def: Def },
    Jump(JumpKind),
    /// Sources are keyed by the index of the predecessor block
    Phi { def: Def, srcs: Vec<(u32, Def)> },
}

impl Instr {
    pub fn def(&self) -> Option<Def> {
        match self {
            Instr::Alu(alu) => Some(alu.def),
            Instr::Intrinsic(intrin) => intrin.def,
            Instr::Tex(tex) => Some(tex.def),
            Instr::LoadConst { def, .. }
            | Instr::Undef { def }
            | Instr::Phi { def, .. } => Some(*def),
            Instr::Jump(_) => None,
        }
    }
}

fn write_def(f: &mut fmt::Formatter<'_>, def: &Def) -> fmt::Result {
    write!(f, "{}{}x{} = ", def, if def.divergent { "(div)" } else { "" }, def.bit_size)
}

impl fmt::Display for AluInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_def(f, &self.def)?;
        write!(f, "{}", self.op)?;
        for (i, src) in self.srcs.iter().enumerate() {
            write!(f, "{} {}", if i > 0 { "," } else { "" }, src)?;
        }
        Ok(())
    }
}

impl fmt::Display for IntrinsicInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(def) = &self.def {
            write_def(f, def)?;
        }
        write!(f, "@{}", self.op)?;
        for (i, src) in self.srcs.iter().enumerate() {
            write!(f, "{} {}", if i > 0 { "," } else { "" }, src)?;
        }
        if self.idx.base != 0 {
            write!(f, " (base={})", self.idx.base)?;
        }
        Ok(())
    }
}

impl fmt::Display for TexInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_def(f, &self.def)?;
        write!(f, "tex {:?}", self.op)?;
        if self.is_sparse {
            f.write_str(" sparse")?;
        }
        for (ty, src) in &self.srcs {
            write!(f, " {} ({:?})", src, ty)?;
        }
        Ok(())
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Alu(alu) => return alu.fmt(f),
            Instr::Intrinsic(intrin) => return intrin.fmt(f),
            Instr::Tex(tex) => return tex.fmt(f),
            _ => (),
        }
        if let Some(def) = self.def() {
            write_def(f, &def)?;
        }
        match self {
            Instr::LoadConst { values, .. } => {
                f.write_str("load_const (")?;
                for (i, v) in values.iter().enumerate() {
                    write!(f, "{}{:#x}", if i > 0 { ", " } else { "" }, v)?;
                }
                f.write_str(")")
            }
            Instr::Undef { .. } => f.write_str("undefined"),
            Instr::Jump(JumpKind::Break) => f.write_str("break"),
            Instr::Jump(JumpKind::Continue) => f.write_str("continue"),
            Instr::Phi { srcs, .. } => {
                f.write_str("phi")?;
                for (i, (pred, src)) in srcs.iter().enumerate() {
                    write!(f, "{} b{}: {}", if i > 0 { "," } else { "" }, pred, src)?;
                }
                Ok(())
            }
            Instr::Alu(_) | Instr::Intrinsic(_) | Instr::Tex(_) => unreachable!(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub index: u32,
    pub instrs: Vec<Instr>,
}

impl Block {
    pub fn new(index: u32) -> Block {
        Block {
            index: index,
            instrs: Vec::new(),
        }
    }

    pub fn ends_in_jump(&self) -> bool {
        matches!(self.instrs.last(), Some(Instr::Jump(_)))
    }
}

#[derive(Clone, Debug)]
pub enum CfNode {
    Block(Block),
    If {
        condition: Def,
        then_list: Vec<CfNode>,
        else_list: Vec<CfNode>,
    },
    Loop {
        body: Vec<CfNode>,
    },
}

/// Float controls execution mode
#[derive(Clone, Copy, Debug, Default)]
pub struct FloatControls {
    pub denorm_flush_32: bool,
    pub denorm_flush_16_64: bool,
    pub rtz_32: bool,
    pub rtz_16_64: bool,
    pub signed_zero_inf_nan_preserve_32: bool,
    pub signed_zero_inf_nan_preserve_16_64: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GsInfo {
    pub vertices_out: u16,
    pub invocations: u8,
}

#[derive(Clone, Debug)]
pub struct ShaderInfo {
    pub stage: ShaderStage,
    /// Shared memory, in bytes
    pub shared_size: u32,
    /// Private memory per invocation, in bytes
    pub scratch_size: u32,
    pub float_controls: FloatControls,
    pub workgroup_size: [u16; 3],
    pub gs: GsInfo,
}

impl ShaderInfo {
    pub fn new(stage: ShaderStage) -> ShaderInfo {
        ShaderInfo {
            stage: stage,
            shared_size: 0,
            scratch_size: 0,
            float_controls: FloatControls::default(),
            workgroup_size: [1, 1, 1],
            gs: GsInfo::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Shader {
    pub info: ShaderInfo,
    pub body: Vec<CfNode>,
    pub num_defs: u32,
    pub num_blocks: u32,
}

fn visit_blocks<'a>(list: &'a [CfNode], f: &mut impl FnMut(&'a Block)) {
    for node in list {
        match node {
            CfNode::Block(b) => f(b),
            CfNode::If {
                then_list,
                else_list,
                ..
            } => {
                visit_blocks(then_list, f);
                visit_blocks(else_list, f);
            }
            CfNode::Loop { body } => visit_blocks(body, f),
        }
    }
}

impl Shader {
    /// Calls `f` on every block in source order
    pub fn for_each_block<'a>(&'a self, mut f: impl FnMut(&'a Block)) {
        visit_blocks(&self.body, &mut f);
    }

    pub fn for_each_instr<'a>(&'a self, mut f: impl FnMut(&'a Instr)) {
        self.for_each_block(|b| b.instrs.iter().for_each(&mut f));
    }
}

impl fmt::Display for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn print_list(
            f: &mut fmt::Formatter<'_>,
            list: &[CfNode],
            depth: usize,
        ) -> fmt::Result {
            let pad = "    ".repeat(depth);
            for node in list {
                match node {
                    CfNode::Block(b) => {
                        writeln!(f, "{}block b{}:", pad, b.index)?;
                        for i in &b.instrs {
                            writeln!(f, "{}    {}", pad, i)?;
                        }
                    }
                    CfNode::If {
                        condition,
                        then_list,
                        else_list,
                    } => {
                        writeln!(f, "{}if {} {{", pad, condition)?;
                        print_list(f, then_list, depth + 1)?;
                        writeln!(f, "{}}} else {{", pad)?;
                        print_list(f, else_list, depth + 1)?;
                        writeln!(f, "{}}}", pad)?;
                    }
                    CfNode::Loop { body } => {
                        writeln!(f, "{}loop {{", pad)?;
                        print_list(f, body, depth + 1)?;
                        writeln!(f, "{}}}", pad)?;
                    }
                }
            }
            Ok(())
        }
        writeln!(f, "shader: {:?}", self.info.stage)?;
        print_list(f, &self.body, 0)
    }
}

enum Frame {
    If {
        condition: Def,
        then_list: Option<Vec<CfNode>>,
    },
    Loop,
}

/// Builds structured NIR
///
/// Blocks are opened and closed implicitly so the result always has the
/// block/node alternation NIR guarantees: every list starts and ends with a
/// block, and ifs and loops are surrounded by blocks.
pub struct ShaderBuilder {
    info: ShaderInfo,
    next_def: u32,
    next_block: u32,
    cur: Option<Block>,
    lists: Vec<Vec<CfNode>>,
    frames: Vec<Frame>,
}

impl ShaderBuilder {
    pub fn new(stage: ShaderStage) -> ShaderBuilder {
        let mut b = ShaderBuilder {
            info: ShaderInfo::new(stage),
            next_def: 0,
            next_block: 0,
            cur: None,
            lists: vec![Vec::new()],
            frames: Vec::new(),
        };
        b.open_block();
        b
    }

    pub fn info_mut(&mut self) -> &mut ShaderInfo {
        &mut self.info
    }

    fn open_block(&mut self) {
        assert!(self.cur.is_none());
        self.cur = Some(Block::new(self.next_block));
        self.next_block += 1;
    }

    fn close_block(&mut self) {
        let block = self.cur.take().expect("No open block");
        self.lists.last_mut().unwrap().push(CfNode::Block(block));
    }

    /// Index of the block currently being filled
    pub fn block_index(&self) -> u32 {
        self.cur.as_ref().unwrap().index
    }

    pub fn push(&mut self, instr: Instr) {
        self.cur.as_mut().unwrap().instrs.push(instr);
    }

    pub fn new_def(&mut self, bit_size: u8, num_components: u8, divergent: bool) -> Def {
        let def = Def {
            index: self.next_def,
            bit_size: bit_size,
            num_components: num_components,
            divergent: divergent,
        };
        self.next_def += 1;
        def
    }

    pub fn alu_to(&mut self, def: Def, op: AluOp, srcs: &[AluSrc]) {
        assert!(srcs.len() == op.num_inputs());
        self.push(Instr::Alu(AluInstr {
            op: op,
            def: def,
            srcs: srcs.to_vec(),
        }));
    }

    /// Emits an ALU op whose result is divergent if any source is
    pub fn alu(&mut self, op: AluOp, bit_size: u8, num_components: u8, srcs: &[AluSrc]) -> Def {
        let divergent = srcs.iter().any(|s| s.src.divergent);
        let def = self.new_def(bit_size, num_components, divergent);
        self.alu_to(def, op, srcs);
        def
    }

    pub fn alu1(&mut self, op: AluOp, x: Def) -> Def {
        let bits = if op.is_comparison() { 1 } else { x.bit_size };
        self.alu(op, bits, x.num_components, &[x.into()])
    }

    pub fn alu2(&mut self, op: AluOp, x: Def, y: Def) -> Def {
        let bits = if op.is_comparison() { 1 } else { x.bit_size };
        self.alu(op, bits, x.num_components, &[x.into(), y.into()])
    }

    pub fn imm(&mut self, bit_size: u8, value: u64) -> Def {
        let def = self.new_def(bit_size, 1, false);
        self.push(Instr::LoadConst {
            def: def,
            values: vec![value],
        });
        def
    }

    pub fn imm32(&mut self, value: u32) -> Def {
        self.imm(32, value.into())
    }

    pub fn undef(&mut self, bit_size: u8, num_components: u8) -> Def {
        let def = self.new_def(bit_size, num_components, false);
        self.push(Instr::Undef { def: def });
        def
    }

    pub fn intrinsic(
        &mut self,
        op: IntrinsicOp,
        def: Option<(u8, u8, bool)>,
        srcs: &[Def],
        idx: IntrinsicIndices,
    ) -> Option<Def> {
        let def = def.map(|(bits, comps, div)| self.new_def(bits, comps, div));
        self.push(Instr::Intrinsic(IntrinsicInstr {
            op: op,
            def: def,
            srcs: srcs.to_vec(),
            idx: idx,
        }));
        def
    }

    pub fn tex(&mut self, tex: TexInstr) -> Def {
        let def = tex.def;
        self.push(Instr::Tex(tex));
        def
    }

    pub fn phi_to(&mut self, def: Def, srcs: &[(u32, Def)]) {
        self.push(Instr::Phi {
            def: def,
            srcs: srcs.to_vec(),
        });
    }

    pub fn jump(&mut self, kind: JumpKind) {
        self.push(Instr::Jump(kind));
    }

    pub fn push_if(&mut self, condition: Def) {
        assert!(condition.is_bool());
        self.close_block();
        self.frames.push(Frame::If {
            condition: condition,
            then_list: None,
        });
        self.lists.push(Vec::new());
        self.open_block();
    }

    pub fn push_else(&mut self) {
        self.close_block();
        let list = self.lists.pop().unwrap();
        match self.frames.last_mut() {
            Some(Frame::If { then_list, .. }) if then_list.is_none() => {
                *then_list = Some(list);
            }
            _ => panic!("push_else() without a matching push_if()"),
        }
        self.lists.push(Vec::new());
        self.open_block();
    }

    pub fn pop_if(&mut self) {
        self.close_block();
        let list = self.lists.pop().unwrap();
        let Some(Frame::If {
            condition,
            then_list,
        }) = self.frames.pop()
        else {
            panic!("pop_if() without a matching push_if()");
        };
        let (then_list, else_list) = match then_list {
            Some(then_list) => (then_list, list),
            None => {
                self.lists.push(Vec::new());
                self.open_block();
                self.close_block();
                (list, self.lists.pop().unwrap())
            }
        };
        self.lists.last_mut().unwrap().push(CfNode::If {
            condition: condition,
            then_list: then_list,
            else_list: else_list,
        });
        self.open_block();
    }

    pub fn push_loop(&mut self) {
        self.close_block();
        self.frames.push(Frame::Loop);
        self.lists.push(Vec::new());
        self.open_block();
    }

    pub fn pop_loop(&mut self) {
        self.close_block();
        let body = self.lists.pop().unwrap();
        assert!(matches!(self.frames.pop(), Some(Frame::Loop)));
        self.lists.last_mut().unwrap().push(CfNode::Loop { body: body });
        self.open_block();
    }

    pub fn finish(mut self) -> Shader {
        assert!(self.frames.is_empty(), "Unterminated control flow");
        self.close_block();
        Shader {
            info: self.info,
            body: self.lists.pop().unwrap(),
            num_defs: self.next_def,
            num_blocks: self.next_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_block_alternation() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let x = b.imm32(1);
        let c = b.alu2(AluOp::Ieq, x, x);
        b.push_if(c);
        b.pop_if();
        b.push_loop();
        b.jump(JumpKind::Break);
        b.pop_loop();
        let s = b.finish();

        assert!(matches!(s.body.first(), Some(CfNode::Block(_))));
        assert!(matches!(s.body.last(), Some(CfNode::Block(_))));
        assert_eq!(s.body.len(), 5);
        let CfNode::If { else_list, .. } = &s.body[1] else {
            panic!("Expected an if");
        };
        assert_eq!(else_list.len(), 1);

        let mut indices = Vec::new();
        s.for_each_block(|b| indices.push(b.index));
        assert_eq!(indices, (0..s.num_blocks).collect::<Vec<_>>());
    }

    #[test]
    fn printing() {
        let mut b = ShaderBuilder::new(ShaderStage::Compute);
        let x = b.imm32(7);
        b.alu2(AluOp::UmulHigh, x, x);
        let s = b.finish();
        let text = s.to_string();
        assert!(text.contains("%1x32 = umul_high %0, %0"), "{}", text);
    }

    #[test]
    fn alignment_from_indices() {
        let mut idx = IntrinsicIndices::default();
        assert_eq!(idx.align(), 1);
        idx.align_mul = 16;
        idx.align_offset = 4;
        assert_eq!(idx.align(), 4);
        idx.align_offset = 0;
        assert_eq!(idx.align(), 16);
    }
}
