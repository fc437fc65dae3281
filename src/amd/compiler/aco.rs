/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! NIR to ACO instruction selection for GFX6 through GFX10.3
//!
//! The output is a [`Program`] of blocks in ACO's pseudo-ISA with both the
//! logical and the linear CFG built, ready for register allocation.

pub mod aco_builder;
mod aco_from_nir;
pub mod aco_ir;
mod aco_isel_alu;
mod aco_isel_cf;
mod aco_isel_ctx;
mod aco_isel_export;
mod aco_isel_intrinsic;
mod aco_isel_mem;
mod aco_isel_rules;
mod aco_isel_setup;
mod aco_isel_tex;
pub mod aco_opcodes;
pub mod aco_options;
pub mod aco_validate;
pub mod nir;
mod util;

#[cfg(test)]
mod aco_proptests;
#[cfg(test)]
mod aco_tests;

pub use aco_from_nir::hw_stage;
pub use aco_ir::{ChipClass, HwStage, Program};
pub use aco_options::{
    CompileError, CompilerOptions, DebugFlags, Result, ShaderConfig,
};

use aco_from_nir::{select_gs_copy_shader, select_program};
use aco_validate::validate_ir;

fn finish(program: Program, options: &CompilerOptions) -> Result<Program> {
    if options.debug.print_ir {
        tracing::info!("ACO IR:\n{}", &program);
    } else {
        tracing::debug!("ACO IR:\n{}", &program);
    }

    if options.debug.validate_ir {
        validate_ir(&program).map_err(CompileError::Validation)?;
    }
    Ok(program)
}

/// Selects instructions for one hardware stage
///
/// `shaders` holds one NIR shader, or two consecutive stages to merge
/// into one program on GFX9 and later.
pub fn compile(
    shaders: &[&nir::Shader],
    options: &CompilerOptions,
    config: &ShaderConfig,
) -> Result<Program> {
    let program = select_program(shaders, options, config)?;
    finish(program, options)
}

/// Builds the copy shader which turns the GSVS ring contents of `gs` into
/// vertex exports
pub fn compile_gs_copy_shader(
    gs: &nir::Shader,
    options: &CompilerOptions,
    config: &ShaderConfig,
) -> Result<Program> {
    let program = select_gs_copy_shader(gs, options, config)?;
    finish(program, options)
}
