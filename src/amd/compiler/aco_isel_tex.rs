/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Texture and image instructions
//!
//! Everything here ends up as one MIMG instruction with the operands
//! `[resource, sampler, vdata, vaddr]`.  The address is a single VGPR
//! vector laid out as offset, bias, comparator, derivatives, coordinates
//! and finally the LOD.

use crate::aco_builder::Builder;
use crate::aco_ir::*;
use crate::aco_isel_alu::emit_add32;
use crate::aco_isel_ctx::{isel_err, IselContext};
use crate::aco_isel_intrinsic::{
    access_sync, atomic_op, atomic_srcs, atomic_sync, dst_def, uniform_resource,
};
use crate::nir::{
    AtomicOp, Def, IntrinsicInstr, SamplerDim, TexDestType, TexInstr, TexOp, TexSrcType,
};

/* Image descriptor word 1 fields */
const IMG_DATA_FORMAT_SHIFT: u32 = 20;
const IMG_DATA_FORMAT_8_8_8_8: u32 = 10;
const IMG_NUM_FORMAT_SHIFT: u32 = 26;
const IMG_NUM_FORMAT_CLEAR: u32 = 0xc3ff_ffff;
const IMG_NUM_FORMAT_USCALED: u32 = 2;
const IMG_NUM_FORMAT_SSCALED: u32 = 3;
const IMG_NUM_FORMAT_UINT: u32 = 4;
const IMG_NUM_FORMAT_SINT: u32 = 5;

/* Variant bits of the sample and gather opcodes */
const TEX_B: u8 = 1 << 0;
const TEX_L: u8 = 1 << 1;
const TEX_C: u8 = 1 << 2;
const TEX_O: u8 = 1 << 3;
const TEX_D: u8 = 1 << 4;
const TEX_G: u8 = 1 << 5;
const TEX_LZ: u8 = 1 << 6;

#[rustfmt::skip]
const TEX_OPCODES: [(u8, Opcode); 36] = [
    (0,                         Opcode::ImageSample),
    (TEX_L,                     Opcode::ImageSampleL),
    (TEX_B,                     Opcode::ImageSampleB),
    (TEX_LZ,                    Opcode::ImageSampleLz),
    (TEX_D,                     Opcode::ImageSampleD),
    (TEX_C,                     Opcode::ImageSampleC),
    (TEX_C | TEX_L,             Opcode::ImageSampleCL),
    (TEX_C | TEX_B,             Opcode::ImageSampleCB),
    (TEX_C | TEX_LZ,            Opcode::ImageSampleCLz),
    (TEX_C | TEX_D,             Opcode::ImageSampleCD),
    (TEX_O,                     Opcode::ImageSampleO),
    (TEX_O | TEX_L,             Opcode::ImageSampleLO),
    (TEX_O | TEX_B,             Opcode::ImageSampleBO),
    (TEX_O | TEX_LZ,            Opcode::ImageSampleLzO),
    (TEX_O | TEX_D,             Opcode::ImageSampleDO),
    (TEX_O | TEX_C,             Opcode::ImageSampleCO),
    (TEX_O | TEX_C | TEX_L,     Opcode::ImageSampleCLO),
    (TEX_O | TEX_C | TEX_B,     Opcode::ImageSampleCBO),
    (TEX_O | TEX_C | TEX_LZ,    Opcode::ImageSampleCLzO),
    (TEX_O | TEX_C | TEX_D,     Opcode::ImageSampleCDO),
    (TEX_G,                     Opcode::ImageGather4),
    (TEX_G | TEX_L,             Opcode::ImageGather4L),
    (TEX_G | TEX_B,             Opcode::ImageGather4B),
    (TEX_G | TEX_LZ,            Opcode::ImageGather4Lz),
    (TEX_G | TEX_C,             Opcode::ImageGather4C),
    (TEX_G | TEX_C | TEX_L,     Opcode::ImageGather4CL),
    (TEX_G | TEX_C | TEX_B,     Opcode::ImageGather4CB),
    (TEX_G | TEX_C | TEX_LZ,    Opcode::ImageGather4CLz),
    (TEX_G | TEX_O,             Opcode::ImageGather4O),
    (TEX_G | TEX_O | TEX_L,     Opcode::ImageGather4LO),
    (TEX_G | TEX_O | TEX_B,     Opcode::ImageGather4BO),
    (TEX_G | TEX_O | TEX_LZ,    Opcode::ImageGather4LzO),
    (TEX_G | TEX_O | TEX_C,     Opcode::ImageGather4CO),
    (TEX_G | TEX_O | TEX_C | TEX_L,  Opcode::ImageGather4CLO),
    (TEX_G | TEX_O | TEX_C | TEX_B,  Opcode::ImageGather4CBO),
    (TEX_G | TEX_O | TEX_C | TEX_LZ, Opcode::ImageGather4CLzO),
];

fn tex_opcode(key: u8) -> Option<Opcode> {
    TEX_OPCODES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, op)| *op)
}

fn image_dim(ctx: &IselContext, dim: SamplerDim, is_array: bool) -> ImageDim {
    match (dim, is_array) {
        /* GFX9 handles 1D images as 2D ones */
        (SamplerDim::Dim1D, false) if ctx.program.chip_class == ChipClass::GFX9 => ImageDim::Dim2D,
        (SamplerDim::Dim1D, true) if ctx.program.chip_class == ChipClass::GFX9 => {
            ImageDim::Dim2DArray
        }
        (SamplerDim::Dim1D, false) => ImageDim::Dim1D,
        (SamplerDim::Dim1D, true) => ImageDim::Dim1DArray,
        (SamplerDim::Dim2D, false) => ImageDim::Dim2D,
        (SamplerDim::Dim2D, true) => ImageDim::Dim2DArray,
        (SamplerDim::Dim3D, _) => ImageDim::Dim3D,
        (SamplerDim::Cube, _) => ImageDim::Cube,
        (SamplerDim::Ms, false) => ImageDim::Dim2DMsaa,
        (SamplerDim::Ms, true) => ImageDim::Dim2DMsaaArray,
        (SamplerDim::Buf, _) => panic!("Buffer images have no MIMG dimension"),
    }
}

fn mimg_info(dim: ImageDim, dmask: u8) -> MimgInfo {
    MimgInfo {
        dmask: dmask,
        dim: dim,
        da: dim.is_array(),
        ..Default::default()
    }
}

fn components(ctx: &mut IselContext, def: &Def) -> Vec<Temp> {
    let t = ctx.get_ssa_temp(def);
    if def.num_components == 1 {
        vec![t]
    } else {
        ctx.emit_split_vector(t, def.num_components.into())
    }
}

fn to_v1(ctx: &mut IselContext, t: Temp) -> Temp {
    let v = ctx.as_vgpr(t);
    if v.reg_class() == RegClass::V1 {
        v
    } else {
        ctx.emit_extract_vector(v, 0, RegClass::V1)
    }
}

/// Joins the address components into the single vaddr vector
fn build_vaddr(ctx: &mut IselContext, parts: Vec<Temp>) -> Temp {
    let parts: Vec<Temp> = parts.into_iter().map(|t| to_v1(ctx, t)).collect();
    let rc = RegClass::new(RegType::VGPR, parts.len() as u32);
    ctx.create_vector_cached(rc, parts)
}

fn emit_mimg(
    ctx: &mut IselContext,
    op: Opcode,
    dst_rc: Option<RegClass>,
    rsrc: Temp,
    sampler: Option<Temp>,
    vdata: Option<Temp>,
    vaddr: Temp,
    info: MimgInfo,
) -> Option<Temp> {
    let ops = vec![
        rsrc.into(),
        sampler.map_or(Operand::undef(RegClass::S4), Operand::from),
        vdata.map_or(Operand::undef(RegClass::V1), Operand::from),
        vaddr.into(),
    ];
    ctx.mem(op, dst_rc, ops, info)
}

/// Packs signed 6-bit texel offsets into the bytes of one dword
fn pack_offsets(ctx: &mut IselContext, def: &Def) -> Temp {
    let consts = ctx.constants.get(&def.index).cloned();
    let mut packed = 0_u32;
    let mut dynamic: Option<Temp> = None;
    let comps = match &consts {
        Some(_) => Vec::new(),
        None => components(ctx, def),
    };

    for i in 0..u32::from(def.num_components) {
        if let Some(c) = &consts {
            packed |= ((c[i as usize] as u32) & 0x3f) << (8 * i);
            continue;
        }
        let comp = comps[i as usize];
        let shifted = if comp.reg_type() == RegType::SGPR {
            let masked = ctx.sop2(Opcode::SAndB32, RegClass::S1, comp, Operand::c32(0x3f));
            if i == 0 {
                masked
            } else {
                ctx.sop2(Opcode::SLshlB32, RegClass::S1, masked, Operand::c32(8 * i))
            }
        } else {
            let ops = vec![comp.into(), Operand::c32(0), Operand::c32(6)];
            let masked = ctx.vop3(Opcode::VBfeU32, RegClass::V1, ops);
            if i == 0 {
                masked
            } else {
                ctx.vop2(Opcode::VLshlrevB32, RegClass::V1, Operand::c32(8 * i), masked)
            }
        };
        dynamic = Some(match dynamic {
            None => shifted,
            Some(acc) => or32(ctx, acc, shifted.into()),
        });
    }

    match dynamic {
        None => ctx.copy(RegClass::V1, Operand::c32(packed)),
        Some(acc) if packed != 0 => or32(ctx, acc, Operand::c32(packed)),
        Some(acc) => acc,
    }
}

fn or32(ctx: &mut IselContext, a: Temp, b: Operand) -> Temp {
    if a.reg_type() == RegType::SGPR && b.reg_type() == RegType::SGPR {
        ctx.sop2(Opcode::SOrB32, RegClass::S1, a, b)
    } else if a.reg_type() == RegType::VGPR {
        ctx.vop2(Opcode::VOrB32, RegClass::V1, b, a)
    } else {
        let b = ctx.as_vgpr_op(b);
        ctx.vop2(Opcode::VOrB32, RegClass::V1, a, b)
    }
}

/// Derivative components `(ma, sc, tc)` picked by the face id
fn cube_select(ctx: &mut IselContext, ma: Temp, id: Temp, deriv: &[Temp]) -> [Temp; 3] {
    let (dx, dy, dz) = (
        to_v1(ctx, deriv[0]),
        to_v1(ctx, deriv[1]),
        to_v1(ctx, deriv[2]),
    );
    let ma_positive = ctx.vopc(Opcode::VCmpGeF32, ma, Operand::f32(0.0));
    let sgn_ma = ctx.cndmask(RegClass::V1, Operand::f32(-1.0), Operand::f32(1.0), ma_positive);
    let neg_sgn_ma = ctx.vop2(Opcode::VSubF32, RegClass::V1, Operand::f32(0.0), sgn_ma);

    let is_ma_z = ctx.vopc(Opcode::VCmpGeF32, id, Operand::f32(4.0));
    let ge_y = ctx.vopc(Opcode::VCmpGeF32, id, Operand::f32(2.0));
    let is_ma_y = ctx.lm_andn2(ge_y, is_ma_z);
    let is_not_ma_x = ctx.lm_or(is_ma_z, is_ma_y);

    let sel = ctx.cndmask(RegClass::V1, dz, dx, is_not_ma_x);
    let sgn = ctx.cndmask(RegClass::V1, neg_sgn_ma, sgn_ma, is_ma_z);
    let sgn = ctx.cndmask(RegClass::V1, sgn, Operand::f32(1.0), is_ma_y);
    let d_sc = ctx.vop2(Opcode::VMulF32, RegClass::V1, sgn, sel);

    let sel = ctx.cndmask(RegClass::V1, dy, dz, is_ma_y);
    let sgn = ctx.cndmask(RegClass::V1, Operand::f32(-1.0), sgn_ma, is_ma_y);
    let d_tc = ctx.vop2(Opcode::VMulF32, RegClass::V1, sgn, sel);

    let sel = ctx.cndmask(RegClass::V1, dx, dz, is_ma_z);
    let sel = ctx.cndmask(RegClass::V1, sel, dy, is_ma_y);
    let d_ma = ctx.vop2(Opcode::VMulF32, RegClass::V1, sgn_ma, sel);
    [d_ma, d_sc, d_tc]
}

/// Replaces a direction vector (and layer) by face coordinates in
/// `[0, 1]` and the face id, and projects the derivatives onto the face
fn prepare_cube_coords(
    ctx: &mut IselContext,
    coords: &mut Vec<Temp>,
    derivs: Option<(&mut Vec<Temp>, &mut Vec<Temp>)>,
    is_array: bool,
) {
    let xyz: Vec<Operand> = coords[..3].iter().map(|t| to_v1(ctx, *t).into()).collect();
    let ma = ctx.vop3(Opcode::VCubemaF32, RegClass::V1, xyz.clone());
    let sc = ctx.vop3(Opcode::VCubescF32, RegClass::V1, xyz.clone());
    let tc = ctx.vop3(Opcode::VCubetcF32, RegClass::V1, xyz.clone());
    let mut id = ctx.vop3(Opcode::VCubeidF32, RegClass::V1, xyz);

    /* v_cubema returns twice the major axis, so this halves as well */
    let invma = ctx.tmp(RegClass::V1);
    ctx.valu(Opcode::VRcpF32, vec![invma.into()], vec![ma.into()])
        .vop3_mut()
        .abs[0] = true;

    let sc = ctx.vop2(Opcode::VMulF32, RegClass::V1, sc, invma);
    let tc = ctx.vop2(Opcode::VMulF32, RegClass::V1, tc, invma);

    if let Some((ddx, ddy)) = derivs {
        for d in [ddx, ddy] {
            let [d_ma, d_sc, d_tc] = cube_select(ctx, ma, id, d);
            let d_ma = ctx.vop2(Opcode::VMulF32, RegClass::V1, d_ma, invma);
            let a = ctx.vop2(Opcode::VMulF32, RegClass::V1, d_sc, invma);
            let b = ctx.vop2(Opcode::VMulF32, RegClass::V1, d_ma, sc);
            let x = ctx.vop2(Opcode::VSubF32, RegClass::V1, a, b);
            let a = ctx.vop2(Opcode::VMulF32, RegClass::V1, d_tc, invma);
            let b = ctx.vop2(Opcode::VMulF32, RegClass::V1, d_ma, tc);
            let y = ctx.vop2(Opcode::VSubF32, RegClass::V1, a, b);
            *d = vec![x, y];
        }
    }

    let sc = ctx.vop2(Opcode::VAddF32, RegClass::V1, Operand::f32(0.5), sc);
    let tc = ctx.vop2(Opcode::VAddF32, RegClass::V1, Operand::f32(0.5), tc);

    if is_array {
        /* The face goes into the low bits of layer * 8 */
        let layer = to_v1(ctx, coords[3]);
        let ops = vec![layer.into(), Operand::f32(8.0), id.into()];
        id = ctx.vop3(Opcode::VFmaF32, RegClass::V1, ops);
    }
    *coords = vec![sc, tc, id];
}

fn src_is_zero(ctx: &IselContext, def: &Option<Def>) -> bool {
    match def {
        Some(d) => ctx.const_value(d) == Some(0),
        None => true,
    }
}

/// Texture size at LOD 0 for the integer gather workaround
fn query_size(ctx: &mut IselContext, rsrc: Temp, dim: ImageDim) -> Vec<Temp> {
    let lod = ctx.copy(RegClass::V1, Operand::c32(0));
    let rc = RegClass::V2;
    let size = emit_mimg(
        ctx,
        Opcode::ImageGetResinfo,
        Some(rc),
        rsrc,
        None,
        None,
        lod,
        mimg_info(dim, 0x3),
    );
    let size = size.unwrap_or_else(|| unreachable!());
    ctx.emit_split_vector(size, 2)
}

struct GatherWorkaround {
    /// SCC condition of the descriptor patch for cube maps
    patched: Option<Temp>,
    signed: bool,
}

/// GFX8 and older return garbage for integer gathers: shift the
/// coordinates by half a texel, and for cube maps sample 8_8_8_8 data as
/// scaled integers which are converted back afterwards.
fn integer_gather_workaround(
    ctx: &mut IselContext,
    tex: &TexInstr,
    rsrc: &mut Temp,
    coords: &mut [Temp],
    dim: ImageDim,
) -> GatherWorkaround {
    let size = query_size(ctx, *rsrc, dim);
    let signed = tex.dest_type == TexDestType::Int;
    let mut shifted = Vec::new();
    for i in 0..2 {
        let f = ctx.vop1(Opcode::VCvtF32I32, RegClass::V1, size[i]);
        let rcp = ctx.vop1(Opcode::VRcpF32, RegClass::V1, f);
        let half = ctx.vop2(Opcode::VMulF32, RegClass::V1, Operand::f32(-0.5), rcp);
        let c = to_v1(ctx, coords[i]);
        shifted.push(ctx.vop2(Opcode::VAddF32, RegClass::V1, half, c));
    }

    if tex.sampler_dim != SamplerDim::Cube {
        coords[0] = shifted[0];
        coords[1] = shifted[1];
        return GatherWorkaround {
            patched: None,
            signed: signed,
        };
    }

    let desc = ctx.emit_split_vector(*rsrc, 8);
    let bfe = Operand::c32(IMG_DATA_FORMAT_SHIFT | (6 << 16));
    let dfmt = ctx.sop2(Opcode::SBfeU32, RegClass::S1, desc[1], bfe);
    let is_8888 = ctx.sopc(
        Opcode::SCmpEqU32,
        dfmt,
        Operand::c32(IMG_DATA_FORMAT_8_8_8_8),
    );

    let (scaled, int) = if signed {
        (IMG_NUM_FORMAT_SSCALED, IMG_NUM_FORMAT_SINT)
    } else {
        (IMG_NUM_FORMAT_USCALED, IMG_NUM_FORMAT_UINT)
    };
    let nfmt = ctx.tmp(RegClass::S1);
    ctx.push_op(
        Opcode::SCselectB32,
        vec![nfmt.into()],
        vec![
            Operand::c32(scaled << IMG_NUM_FORMAT_SHIFT),
            Operand::c32(int << IMG_NUM_FORMAT_SHIFT),
            Operand::Fixed(is_8888, PhysReg::SCC),
        ],
    );
    let cond = ctx.bool_to_vector_condition(is_8888);
    let word1 = ctx.sop2(
        Opcode::SAndB32,
        RegClass::S1,
        desc[1],
        Operand::c32(IMG_NUM_FORMAT_CLEAR),
    );
    let word1 = ctx.sop2(Opcode::SOrB32, RegClass::S1, word1, nfmt);

    let mut words = desc.clone();
    words[1] = word1;
    *rsrc = ctx.create_vector_cached(RegClass::S8, words);

    for i in 0..2 {
        let c = to_v1(ctx, coords[i]);
        coords[i] = ctx.cndmask(RegClass::V1, c, shifted[i], cond);
    }
    GatherWorkaround {
        patched: Some(cond),
        signed: signed,
    }
}

/// Converts the components of a patched gather back to integers
fn fixup_gather_result(ctx: &mut IselContext, res: Temp, wa: &GatherWorkaround) -> Temp {
    let Some(cond) = wa.patched else {
        return res;
    };
    let cvt = if wa.signed {
        Opcode::VCvtI32F32
    } else {
        Opcode::VCvtU32F32
    };
    let n = res.size();
    let comps = ctx.emit_split_vector(res, n);
    let fixed: Vec<Temp> = comps
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            if i >= 4 {
                /* Residency code */
                return c;
            }
            let int = ctx.vop1(cvt, RegClass::V1, c);
            ctx.cndmask(RegClass::V1, c, int, cond)
        })
        .collect();
    ctx.create_vector_cached(res.reg_class(), fixed)
}

fn tex_resource(ctx: &mut IselContext, tex: &TexInstr, ty: TexSrcType) -> Option<Temp> {
    tex.src(ty).map(|d| uniform_resource(ctx, &d))
}

/// Number of coordinate components not counting the layer
fn num_dims(dim: SamplerDim) -> usize {
    match dim {
        SamplerDim::Dim1D | SamplerDim::Buf => 1,
        SamplerDim::Dim2D | SamplerDim::Ms => 2,
        SamplerDim::Dim3D | SamplerDim::Cube => 3,
    }
}

fn visit_txs(ctx: &mut IselContext, tex: &TexInstr, rsrc: Temp) {
    let lod = match tex.src(TexSrcType::Lod) {
        Some(d) => {
            let t = ctx.get_ssa_temp(&d);
            to_v1(ctx, t)
        }
        None => ctx.copy(RegClass::V1, Operand::c32(0)),
    };
    let dim = image_dim(ctx, tex.sampler_dim, tex.is_array);
    let n = u32::from(tex.def.num_components);
    let gfx9_1d_array = ctx.program.chip_class == ChipClass::GFX9
        && tex.sampler_dim == SamplerDim::Dim1D
        && tex.is_array;
    /* The layer count of 2D arrays is in z */
    let dmask = if gfx9_1d_array { 0x5 } else { (1 << n) - 1 };
    let rc = RegClass::new(RegType::VGPR, n);
    let size = emit_mimg(
        ctx,
        Opcode::ImageGetResinfo,
        Some(rc),
        rsrc,
        None,
        None,
        lod,
        mimg_info(dim, dmask),
    );
    let mut size = size.unwrap_or_else(|| unreachable!());

    if tex.sampler_dim == SamplerDim::Cube && tex.is_array {
        /* Cube arrays report faces, not layers */
        let mut comps = ctx.emit_split_vector(size, n);
        let ops = vec![comps[2].into(), Operand::c32(0x2aaa_aaab)];
        comps[2] = ctx.vop3(Opcode::VMulHiI32, RegClass::V1, ops);
        size = ctx.create_vector_cached(rc, comps);
    }
    ctx.bind_def(&tex.def, size);
}

pub fn visit_tex(ctx: &mut IselContext, tex: &TexInstr) {
    if tex.def.bit_size != 32 {
        isel_err!(tex, "Only 32-bit texture results are supported");
    }
    if tex.sampler_dim == SamplerDim::Buf {
        isel_err!(tex, "Buffer textures must be lowered to typed buffer loads");
    }
    let Some(mut rsrc) = tex_resource(ctx, tex, TexSrcType::TextureHandle) else {
        isel_err!(tex, "Texture instruction without a texture");
    };

    if tex.op == TexOp::Txs {
        visit_txs(ctx, tex, rsrc);
        return;
    }

    let dim = image_dim(ctx, tex.sampler_dim, tex.is_array);
    let sampled = !matches!(tex.op, TexOp::Txf | TexOp::TxfMs);
    let sampler = if sampled {
        match tex_resource(ctx, tex, TexSrcType::SamplerHandle) {
            Some(s) => Some(s),
            None => isel_err!(tex, "Sampling without a sampler"),
        }
    } else {
        None
    };

    let Some(coord_def) = tex.src(TexSrcType::Coord) else {
        isel_err!(tex, "Texture instruction without coordinates");
    };
    let mut coords = components(ctx, &coord_def);
    let dims = num_dims(tex.sampler_dim);

    let mut ddx = Vec::new();
    let mut ddy = Vec::new();
    if tex.op == TexOp::Txd {
        let (Some(x), Some(y)) = (tex.src(TexSrcType::Ddx), tex.src(TexSrcType::Ddy)) else {
            isel_err!(tex, "Explicit derivatives need both ddx and ddy");
        };
        ddx = components(ctx, &x);
        ddy = components(ctx, &y);
    }

    if tex.is_array && sampled && tex.sampler_dim != SamplerDim::Cube {
        let layer = to_v1(ctx, coords[dims]);
        coords[dims] = ctx.vop1(Opcode::VRndneF32, RegClass::V1, layer);
    }

    if tex.sampler_dim == SamplerDim::Cube && sampled {
        let derivs = (tex.op == TexOp::Txd).then_some((&mut ddx, &mut ddy));
        prepare_cube_coords(ctx, &mut coords, derivs, tex.is_array);
    }

    if tex.sampler_dim == SamplerDim::Dim1D && ctx.program.chip_class == ChipClass::GFX9 {
        let y = if sampled {
            Operand::f32(0.5)
        } else {
            Operand::c32(0)
        };
        let y = ctx.copy(RegClass::V1, y);
        coords.insert(1, y);
        if tex.op == TexOp::Txd {
            let zero = ctx.copy(RegClass::V1, Operand::c32(0));
            ddx.insert(1, zero);
            ddy.insert(1, zero);
        }
    }

    let mut key = 0;
    let mut offset = None;
    if let Some(off) = tex.src(TexSrcType::Offset) {
        if sampled {
            offset = Some(pack_offsets(ctx, &off));
            key |= TEX_O;
        } else {
            /* Fetches apply the offset to the integer coordinates */
            let offs = components(ctx, &off);
            for (c, o) in coords.iter_mut().zip(offs) {
                *c = emit_add32(ctx, *c, o.into());
            }
        }
    }

    let bias = tex.src(TexSrcType::Bias);
    if bias.is_some() {
        key |= TEX_B;
    }
    let compare = tex.src(TexSrcType::Comparator);
    if compare.is_some() {
        key |= TEX_C;
    }
    if tex.op == TexOp::Txd {
        key |= TEX_D;
    }

    let lod_def = tex.src(TexSrcType::Lod);
    let mut lod = None;
    if sampled && lod_def.is_some() {
        if src_is_zero(ctx, &lod_def) {
            key |= TEX_LZ;
        } else {
            key |= TEX_L;
            lod = lod_def;
        }
    } else if tex.op == TexOp::Txf && !src_is_zero(ctx, &lod_def) {
        lod = lod_def;
    }

    if tex.op == TexOp::TxfMs {
        let Some(sample) = tex.src(TexSrcType::MsIndex) else {
            isel_err!(tex, "Multisample fetch without a sample index");
        };
        let s = ctx.get_ssa_temp(&sample);
        coords.push(s);
    }

    let num_data = u32::from(tex.def.num_components) - u32::from(tex.is_sparse);
    let (op, dmask, num_res) = match tex.op {
        TexOp::Tex | TexOp::Txb | TexOp::Txl | TexOp::Txd => {
            let Some(op) = tex_opcode(key) else {
                isel_err!(tex, "No sample opcode for variant {:#x}", key);
            };
            (op, (1 << num_data) - 1, num_data)
        }
        TexOp::Tg4 => {
            let Some(op) = tex_opcode(key | TEX_G) else {
                isel_err!(tex, "No gather opcode for variant {:#x}", key);
            };
            let dmask = if tex.is_shadow { 1 } else { 1 << tex.component };
            (op, dmask, 4)
        }
        TexOp::Lod => (Opcode::ImageGetLod, 0x3, 2),
        TexOp::Txf | TexOp::TxfMs => {
            let op = if lod.is_some() {
                Opcode::ImageLoadMip
            } else {
                Opcode::ImageLoad
            };
            (op, (1 << num_data) - 1, num_data)
        }
        TexOp::Txs => unreachable!(),
    };

    if matches!(tex.op, TexOp::Tex | TexOp::Txb | TexOp::Lod)
        || (tex.op == TexOp::Tg4 && key & (TEX_L | TEX_LZ) == 0)
    {
        /* Implicit derivatives read the neighbours in the quad */
        ctx.program.config.needs_wqm = true;
    }

    let integer = tex.dest_type != TexDestType::Float;
    let gather_wa = if tex.op == TexOp::Tg4 && integer && ctx.options.has_integer_gather4_bug {
        Some(integer_gather_workaround(ctx, tex, &mut rsrc, &mut coords, dim))
    } else {
        None
    };

    let mut vaddr = Vec::new();
    vaddr.extend(offset);
    if let Some(b) = bias {
        vaddr.push(ctx.get_ssa_temp(&b));
    }
    if let Some(c) = compare {
        vaddr.push(ctx.get_ssa_temp(&c));
    }
    vaddr.extend(ddx);
    vaddr.extend(ddy);
    vaddr.extend(coords);
    if let Some(l) = lod {
        vaddr.push(ctx.get_ssa_temp(&l));
    }
    let vaddr = build_vaddr(ctx, vaddr);

    let mut info = mimg_info(dim, dmask);
    info.tfe = tex.is_sparse;
    let rc = RegClass::new(RegType::VGPR, num_res + u32::from(tex.is_sparse));
    let res = emit_mimg(ctx, op, Some(rc), rsrc, sampler, None, vaddr, info);
    let mut res = res.unwrap_or_else(|| unreachable!());
    if let Some(wa) = &gather_wa {
        res = fixup_gather_result(ctx, res, wa);
    }
    ctx.bind_def(&tex.def, res);
}

/// Address components of an image intrinsic: `[desc, coord, ...]`
fn image_coords(ctx: &mut IselContext, intrin: &IntrinsicInstr, sample: Option<&Def>) -> Vec<Temp> {
    let mut coords = components(ctx, &intrin.srcs[1]);
    let dims = num_dims(intrin.idx.image_dim);
    let mut n = dims + usize::from(intrin.idx.image_array);
    if intrin.idx.image_dim == SamplerDim::Cube {
        /* Cube faces are layers */
        n = 3 + usize::from(intrin.idx.image_array);
    }
    coords.truncate(n);
    if intrin.idx.image_dim == SamplerDim::Dim1D && ctx.program.chip_class == ChipClass::GFX9 {
        let zero = ctx.copy(RegClass::V1, Operand::c32(0));
        coords.insert(1, zero);
    }
    if intrin.idx.image_dim == SamplerDim::Ms {
        let Some(s) = sample else {
            isel_err!(intrin, "Multisample image access without a sample index");
        };
        let s = ctx.get_ssa_temp(s);
        coords.push(s);
    }
    coords
}

fn image_info(ctx: &IselContext, intrin: &IntrinsicInstr, dmask: u8) -> MimgInfo {
    if intrin.idx.image_dim == SamplerDim::Buf {
        isel_err!(intrin, "Buffer images must be lowered to typed buffer accesses");
    }
    let dim = image_dim(ctx, intrin.idx.image_dim, intrin.idx.image_array);
    let mut info = mimg_info(dim, dmask);
    info.sync = access_sync(intrin, Storage::IMAGE);
    info.glc = intrin.idx.access.coherent || intrin.idx.access.volatile;
    info.slc = intrin.idx.access.non_temporal;
    info
}

/// `image_load`: `[desc, coord, sample or lod]`
pub fn visit_image_load(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let rsrc = uniform_resource(ctx, &intrin.srcs[0]);
    let extra = intrin.srcs.get(2).copied();
    let is_ms = intrin.idx.image_dim == SamplerDim::Ms;
    let mut coords = image_coords(ctx, intrin, extra.as_ref());

    let lod = if is_ms { None } else { extra };
    let op = if src_is_zero(ctx, &lod) {
        Opcode::ImageLoad
    } else {
        let l = lod.unwrap_or_else(|| unreachable!());
        coords.push(ctx.get_ssa_temp(&l));
        Opcode::ImageLoadMip
    };

    let n = u32::from(def.num_components);
    let info = image_info(ctx, intrin, ((1 << n) - 1) as u8);
    let vaddr = build_vaddr(ctx, coords);
    let rc = RegClass::new(RegType::VGPR, n * u32::from(def.bit_size).max(32) / 32);
    let res = emit_mimg(ctx, op, Some(rc), rsrc, None, None, vaddr, info);
    ctx.bind_def(&def, res.unwrap_or_else(|| unreachable!()));
}

/// `image_store`: `[desc, coord, data, sample or lod]`
pub fn visit_image_store(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let rsrc = uniform_resource(ctx, &intrin.srcs[0]);
    let value = intrin.srcs[2];
    let extra = intrin.srcs.get(3).copied();
    let is_ms = intrin.idx.image_dim == SamplerDim::Ms;
    let mut coords = image_coords(ctx, intrin, extra.as_ref());

    let lod = if is_ms { None } else { extra };
    let op = if src_is_zero(ctx, &lod) {
        Opcode::ImageStore
    } else {
        let l = lod.unwrap_or_else(|| unreachable!());
        coords.push(ctx.get_ssa_temp(&l));
        Opcode::ImageStoreMip
    };

    let data = ctx.get_ssa_temp(&value);
    let data = ctx.as_vgpr(data);
    let n = u32::from(value.num_components);
    let info = image_info(ctx, intrin, ((1 << n) - 1) as u8);
    let vaddr = build_vaddr(ctx, coords);
    emit_mimg(ctx, op, None, rsrc, None, Some(data), vaddr, info);
}

fn image_atomic_opcode(op: AtomicOp) -> Opcode {
    match op {
        AtomicOp::Add => Opcode::ImageAtomicAdd,
        AtomicOp::Imin => Opcode::ImageAtomicSmin,
        AtomicOp::Umin => Opcode::ImageAtomicUmin,
        AtomicOp::Imax => Opcode::ImageAtomicSmax,
        AtomicOp::Umax => Opcode::ImageAtomicUmax,
        AtomicOp::And => Opcode::ImageAtomicAnd,
        AtomicOp::Or => Opcode::ImageAtomicOr,
        AtomicOp::Xor => Opcode::ImageAtomicXor,
        AtomicOp::Xchg => Opcode::ImageAtomicSwap,
        AtomicOp::CmpXchg => Opcode::ImageAtomicCmpswap,
    }
}

/// `image_atomic`: `[desc, coord, data]`, or `[desc, coord, compare,
/// data]` for compare-and-swap
pub fn visit_image_atomic(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let rsrc = uniform_resource(ctx, &intrin.srcs[0]);
    let coords = image_coords(ctx, intrin, None);
    let (data_def, cmp_def) = atomic_srcs(intrin, 2);

    let data = ctx.get_ssa_temp(&data_def);
    let data = to_v1(ctx, data);
    let (data, dmask) = match cmp_def {
        Some(c) => {
            let cmp = ctx.get_ssa_temp(&c);
            let cmp = to_v1(ctx, cmp);
            (ctx.create_vector_cached(RegClass::V2, vec![data, cmp]), 0x3)
        }
        None => (data, 0x1),
    };

    let mut info = image_info(ctx, intrin, dmask);
    info.sync = atomic_sync(Storage::IMAGE, SyncScope::Device);
    /* glc returns the previous value */
    info.glc = intrin.def.is_some();
    let vaddr = build_vaddr(ctx, coords);
    let op = image_atomic_opcode(atomic_op(intrin));
    let rc = intrin.def.map(|_| data.reg_class());
    let res = emit_mimg(ctx, op, rc, rsrc, None, Some(data), vaddr, info);

    if let (Some(def), Some(res)) = (intrin.def, res) {
        let old = ctx.emit_extract_vector(res, 0, RegClass::V1);
        ctx.bind_def(&def, old);
    }
}

/// `image_size`: `[desc, lod]`
pub fn visit_image_size(ctx: &mut IselContext, intrin: &IntrinsicInstr) {
    let def = dst_def(intrin);
    let rsrc = uniform_resource(ctx, &intrin.srcs[0]);
    let lod = match intrin.srcs.get(1) {
        Some(d) => {
            let t = ctx.get_ssa_temp(d);
            to_v1(ctx, t)
        }
        None => ctx.copy(RegClass::V1, Operand::c32(0)),
    };
    let n = u32::from(def.num_components);
    let gfx9_1d_array = ctx.program.chip_class == ChipClass::GFX9
        && intrin.idx.image_dim == SamplerDim::Dim1D
        && intrin.idx.image_array;
    let dmask = if gfx9_1d_array { 0x5 } else { (1 << n) - 1 };
    let mut info = image_info(ctx, intrin, dmask);
    info.sync = MemorySyncInfo::default();
    let rc = RegClass::new(RegType::VGPR, n);
    let size = emit_mimg(ctx, Opcode::ImageGetResinfo, Some(rc), rsrc, None, None, lod, info);
    let mut size = size.unwrap_or_else(|| unreachable!());

    if intrin.idx.image_dim == SamplerDim::Cube && intrin.idx.image_array {
        let mut comps = ctx.emit_split_vector(size, n);
        let ops = vec![comps[2].into(), Operand::c32(0x2aaa_aaab)];
        comps[2] = ctx.vop3(Opcode::VMulHiI32, RegClass::V1, ops);
        size = ctx.create_vector_cached(rc, comps);
    }
    ctx.bind_def(&def, size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aco_options::{CompilerOptions, ShaderConfig};
    use crate::nir::{ShaderInfo, ShaderStage};

    fn with_ctx(chip: ChipClass, f: impl FnOnce(&mut IselContext)) -> Program {
        let options = CompilerOptions::new(chip, 64).unwrap();
        let config = ShaderConfig::default();
        let info = ShaderInfo::new(ShaderStage::Fragment);
        let mut program = Program::new(chip, 64, HwStage::FS, vec![info.stage]);
        program.create_and_insert_block();
        let mut ctx = IselContext::new(&options, &config, program, &info);
        f(&mut ctx);
        ctx.program
    }

    fn def(ctx: &mut IselContext, index: u32, comps: u8, rc: RegClass) -> Def {
        let t = ctx.tmp(rc);
        ctx.ssa_temps.insert(index, t);
        Def {
            index: index,
            bit_size: 32,
            num_components: comps,
            divergent: rc.reg_type() == RegType::VGPR,
        }
    }

    fn tex(op: TexOp, d: Def, dim: SamplerDim, srcs: Vec<(TexSrcType, Def)>) -> TexInstr {
        TexInstr {
            op: op,
            def: d,
            sampler_dim: dim,
            is_array: false,
            is_shadow: false,
            dest_type: TexDestType::Float,
            component: 0,
            is_sparse: false,
            srcs: srcs,
        }
    }

    fn handles(ctx: &mut IselContext) -> Vec<(TexSrcType, Def)> {
        let t = def(ctx, 100, 1, RegClass::S8);
        let s = def(ctx, 101, 1, RegClass::S4);
        vec![(TexSrcType::TextureHandle, t), (TexSrcType::SamplerHandle, s)]
    }

    fn mimg(p: &Program) -> &Instr {
        p.instrs().find(|i| i.opcode.format() == Format::MIMG).unwrap()
    }

    #[test]
    fn opcode_table_is_unique() {
        for (i, (k, _)) in TEX_OPCODES.iter().enumerate() {
            assert!(TEX_OPCODES[i + 1..].iter().all(|(o, _)| o != k));
        }
        assert_eq!(tex_opcode(TEX_C | TEX_LZ | TEX_O), Some(Opcode::ImageSampleCLzO));
        assert_eq!(tex_opcode(TEX_G | TEX_D), None);
    }

    #[test]
    fn constant_zero_lod_selects_lz() {
        let p = with_ctx(ChipClass::GFX10, |ctx| {
            let mut srcs = handles(ctx);
            let coord = def(ctx, 0, 2, RegClass::V2);
            let lod = def(ctx, 1, 1, RegClass::S1);
            ctx.constants.insert(1, vec![0]);
            srcs.push((TexSrcType::Coord, coord));
            srcs.push((TexSrcType::Lod, lod));
            let d = def(ctx, 2, 4, RegClass::V4);
            visit_tex(ctx, &tex(TexOp::Txl, d, SamplerDim::Dim2D, srcs));
        });
        let i = mimg(&p);
        assert_eq!(i.opcode, Opcode::ImageSampleLz);
        /* Only the two coordinates remain in the address */
        assert_eq!(i.operands[3].size(), 2);
    }

    #[test]
    fn constant_offsets_are_folded() {
        let p = with_ctx(ChipClass::GFX10, |ctx| {
            let mut srcs = handles(ctx);
            let coord = def(ctx, 0, 2, RegClass::V2);
            let off = def(ctx, 1, 2, RegClass::S2);
            ctx.constants.insert(1, vec![1, (-1_i64) as u64]);
            srcs.push((TexSrcType::Coord, coord));
            srcs.push((TexSrcType::Offset, off));
            let d = def(ctx, 2, 4, RegClass::V4);
            visit_tex(ctx, &tex(TexOp::Tex, d, SamplerDim::Dim2D, srcs));
        });
        assert_eq!(mimg(&p).opcode, Opcode::ImageSampleO);
        assert!(p
            .instrs()
            .any(|i| i.opcode == Opcode::PParallelcopy
                && i.operands[0].constant_value() == Some(0x3f01)));
        assert!(!p.instrs().any(|i| i.opcode == Opcode::VBfeU32));
        assert!(p.config.needs_wqm);
    }

    #[test]
    fn cube_coords_use_face_ops() {
        let p = with_ctx(ChipClass::GFX10, |ctx| {
            let mut srcs = handles(ctx);
            let coord = def(ctx, 0, 3, RegClass::V3);
            srcs.push((TexSrcType::Coord, coord));
            let d = def(ctx, 2, 4, RegClass::V4);
            visit_tex(ctx, &tex(TexOp::Tex, d, SamplerDim::Cube, srcs));
        });
        for op in [
            Opcode::VCubeidF32,
            Opcode::VCubescF32,
            Opcode::VCubetcF32,
            Opcode::VCubemaF32,
        ] {
            assert!(p.instrs().any(|i| i.opcode == op));
        }
        let i = mimg(&p);
        assert_eq!(i.operands[3].size(), 3);
    }

    #[test]
    fn integer_cube_gather_patches_descriptor() {
        let p = with_ctx(ChipClass::GFX8, |ctx| {
            let mut srcs = handles(ctx);
            let coord = def(ctx, 0, 3, RegClass::V3);
            srcs.push((TexSrcType::Coord, coord));
            let d = def(ctx, 2, 4, RegClass::V4);
            let mut t = tex(TexOp::Tg4, d, SamplerDim::Cube, srcs);
            t.dest_type = TexDestType::Uint;
            t.component = 1;
            visit_tex(ctx, &t);
        });
        let ops: Vec<Opcode> = p.instrs().map(|i| i.opcode).collect();
        assert!(ops.contains(&Opcode::ImageGetResinfo));
        assert!(ops.contains(&Opcode::SCmpEqU32));
        assert!(ops.contains(&Opcode::SCselectB32));
        assert_eq!(ops.iter().filter(|o| **o == Opcode::VCvtU32F32).count(), 4);
        let gather = p
            .instrs()
            .find(|i| i.opcode == Opcode::ImageGather4)
            .unwrap();
        let FormatInfo::Mimg(info) = &gather.info else {
            panic!("Gather without MIMG info");
        };
        assert_eq!(info.dmask, 0x2);
    }

    #[test]
    fn cmpswap_packs_data_and_compare() {
        let p = with_ctx(ChipClass::GFX10, |ctx| {
            let desc = def(ctx, 0, 1, RegClass::S8);
            let coord = def(ctx, 1, 2, RegClass::V2);
            let cmp = def(ctx, 2, 1, RegClass::V1);
            let data = def(ctx, 3, 1, RegClass::V1);
            let d = def(ctx, 4, 1, RegClass::V1);
            let mut idx = crate::nir::IntrinsicIndices::default();
            idx.atomic_op = Some(AtomicOp::CmpXchg);
            let intrin = IntrinsicInstr {
                op: crate::nir::IntrinsicOp::ImageAtomic,
                def: Some(d),
                srcs: vec![desc, coord, cmp, data],
                idx: idx,
            };
            visit_image_atomic(ctx, &intrin);
        });
        let i = mimg(&p);
        assert_eq!(i.opcode, Opcode::ImageAtomicCmpswap);
        assert_eq!(i.operands[2].size(), 2);
        assert_eq!(i.definitions[0].reg_class(), RegClass::V2);
    }
}
