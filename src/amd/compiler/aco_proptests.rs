/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::aco_ir::*;
use crate::aco_isel_ctx::IselContext;
use crate::aco_isel_mem::{max_store_bytes, plan_load, split_buffer_store, MemKind, Skip};
use crate::nir::{ShaderInfo, ShaderStage};
use crate::{CompilerOptions, ShaderConfig};

use proptest::prelude::*;

fn chip_strategy() -> impl Strategy<Value = ChipClass> {
    prop_oneof![
        Just(ChipClass::GFX6),
        Just(ChipClass::GFX7),
        Just(ChipClass::GFX8),
        Just(ChipClass::GFX9),
        Just(ChipClass::GFX10),
        Just(ChipClass::GFX10_3),
    ]
}

fn alignment_strategy() -> impl Strategy<Value = (u32, u32)> {
    prop_oneof![Just(1u32), Just(2u32), Just(4u32), Just(8u32), Just(16u32)]
        .prop_flat_map(|mul| (Just(mul), 0..mul))
}

/// A vector class and how many parts it splits into
fn split_strategy() -> impl Strategy<Value = (RegClass, u32)> {
    let dwords = (any::<bool>(), 1u32..=2, 2u32..=4).prop_map(|(vgpr, comp, n)| {
        let ty = if vgpr { RegType::VGPR } else { RegType::SGPR };
        (RegClass::new(ty, comp * n), n)
    });
    let bytes = (1u32..=2, prop_oneof![Just(1u32), Just(2u32)])
        .prop_map(|(dwords, b)| (RegClass::new(RegType::VGPR, dwords), 4 * dwords / b));
    prop_oneof![dwords, bytes]
}

fn count(ctx: &IselContext, op: Opcode) -> usize {
    ctx.program.instrs().filter(|i| i.opcode == op).count()
}

proptest! {
    #[test]
    fn split_then_join_reuses_parts((rc, n) in split_strategy()) {
        let options = CompilerOptions::new(ChipClass::GFX10, 64).unwrap();
        let config = ShaderConfig::default();
        let info = ShaderInfo::new(ShaderStage::Compute);
        let program = Program::new(ChipClass::GFX10, 64, HwStage::CS, vec![ShaderStage::Compute]);
        let mut ctx = IselContext::new(&options, &config, program, &info);
        ctx.block = ctx.program.create_and_insert_block();

        let vec = ctx.tmp(rc);
        let parts = ctx.emit_split_vector(vec, n);
        prop_assert_eq!(parts.len(), n as usize);
        prop_assert_eq!(parts.iter().map(|t| t.bytes()).sum::<u32>(), rc.bytes());
        prop_assert!(parts.iter().all(|t| t.reg_type() == rc.reg_type()));
        prop_assert_eq!(count(&ctx, Opcode::PSplitVector), 1);

        /* Splitting again reuses the parts */
        prop_assert_eq!(&ctx.emit_split_vector(vec, n), &parts);

        let joined = ctx.create_vector_cached(rc, parts.clone());
        prop_assert_eq!(joined.reg_class(), rc);
        prop_assert_eq!(&ctx.emit_split_vector(joined, n), &parts);
        for (i, part) in parts.iter().enumerate() {
            prop_assert_eq!(ctx.emit_extract_vector(joined, i as u32, part.reg_class()), *part);
        }
        prop_assert_eq!(count(&ctx, Opcode::PSplitVector), 1);
        prop_assert_eq!(count(&ctx, Opcode::PCreateVector), 1);
    }

    #[test]
    fn load_pieces_cover_the_request(
        chip in chip_strategy(),
        kind in prop_oneof![Just(MemKind::Lds), Just(MemKind::Buffer), Just(MemKind::Global)],
        (align_mul, align_offset) in alignment_strategy(),
        bytes in 1u32..=16,
        const_offset in 0u32..60000,
    ) {
        let options = CompilerOptions::new(chip, 64).unwrap();
        let plan = plan_load(kind, &options, const_offset, align_mul, align_offset, bytes);

        let mut read = 0;
        for piece in &plan {
            let pos = i64::from(const_offset) + i64::from(read);
            match piece.skip {
                Skip::Const(s) => {
                    prop_assert_eq!(piece.start() + i64::from(s), pos);
                    prop_assert!(piece.keep <= piece.size - s);
                }
                Skip::Dynamic => {
                    prop_assert_eq!(piece.start(), pos);
                    prop_assert!(piece.keep <= piece.size - 3);
                }
            }
            prop_assert!(piece.keep > 0);
            read += piece.keep;
        }
        prop_assert_eq!(read, bytes);
    }

    #[test]
    fn store_chunks_write_exactly_the_mask(
        chip in chip_strategy(),
        lds in any::<bool>(),
        elem_bytes in prop_oneof![Just(1u32), Just(2u32), Just(4u32), Just(8u32)],
        num_elems in 1u32..=4,
        write_mask in 1u32..16,
        (align_mul, align_offset) in alignment_strategy(),
    ) {
        let options = CompilerOptions::new(chip, 64).unwrap();
        let kind = if lds { MemKind::Lds } else { MemKind::Buffer };
        let write_mask = write_mask & ((1 << num_elems) - 1);
        let total = elem_bytes * num_elems;
        let chunks = split_buffer_store(
            write_mask,
            elem_bytes,
            num_elems,
            align_mul,
            align_offset,
            |bytes, align| max_store_bytes(kind, &options, bytes, align),
        );

        let mut pos = 0;
        for chunk in &chunks {
            prop_assert_eq!(chunk.offset, pos);
            prop_assert!(chunk.bytes > 0);
            for byte in chunk.offset..chunk.offset + chunk.bytes {
                let written = write_mask & (1 << (byte / elem_bytes)) != 0;
                prop_assert_eq!(written, !chunk.skip);
            }
            pos += chunk.bytes;
        }
        prop_assert_eq!(pos, total);
    }
}
