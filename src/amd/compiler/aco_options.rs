/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Compiler configuration: the target-capability descriptor, `ACO_DEBUG`
//! flags and the driver-provided layout descriptions.

use crate::aco_ir::ChipClass;
use crate::aco_validate::ValidationError;
use crate::nir::ShaderStage;

use std::env;
use thiserror::Error;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum DebugOptionError {
    #[error("unknown ACO_DEBUG option `{0}`")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("wave{wave_size} is not supported on {chip}")]
    UnsupportedWaveSize { chip: ChipClass, wave_size: u32 },
    #[error("cannot merge {0} shader stages into one program")]
    TooManyStages(usize),
    #[error("no hardware stage runs {0:?}")]
    InvalidStages(Vec<ShaderStage>),
    #[error("merged shaders require GFX9 or later, got {0}")]
    MergedStagesUnsupported(ChipClass),
    #[error("IR validation failed with {} error(s), first: {}", .0.len(), .0[0])]
    Validation(Vec<ValidationError>),
    #[error(transparent)]
    DebugOption(#[from] DebugOptionError),
}

pub type Result<T> = std::result::Result<T, CompileError>;

/// Flags parsed from `ACO_DEBUG`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DebugFlags {
    pub validate_ir: bool,
    pub perf_warn: bool,
    /// Disables code-quality heuristics such as commutative operand
    /// reordering
    pub no_opt: bool,
    pub print_ir: bool,
}

impl Default for DebugFlags {
    fn default() -> Self {
        DebugFlags {
            validate_ir: cfg!(debug_assertions),
            perf_warn: false,
            no_opt: false,
            print_ir: false,
        }
    }
}

impl DebugFlags {
    pub fn parse(s: &str) -> std::result::Result<DebugFlags, DebugOptionError> {
        let mut flags = DebugFlags::default();
        for tok in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match tok {
                "validateir" => flags.validate_ir = true,
                "novalidateir" => flags.validate_ir = false,
                "perfwarn" => flags.perf_warn = true,
                "noopt" => flags.no_opt = true,
                "printir" => flags.print_ir = true,
                _ => return Err(DebugOptionError::Unknown(tok.to_string())),
            }
        }
        Ok(flags)
    }

    pub fn from_env() -> std::result::Result<DebugFlags, DebugOptionError> {
        match env::var("ACO_DEBUG") {
            Ok(s) => DebugFlags::parse(&s),
            Err(_) => Ok(DebugFlags::default()),
        }
    }
}

/// What the target can do
///
/// `CompilerOptions::new()` derives every capability from the generation;
/// the fields stay public so tests and drivers can override them.
#[derive(Clone, Debug)]
pub struct CompilerOptions {
    pub chip_class: ChipClass,
    pub wave_size: u32,
    /// VOP3P packed 16-bit math
    pub has_packed_math_16bit: bool,
    /// 16-bit VOP2 integer and float opcodes
    pub has_16bit_vop2: bool,
    /// Memory instructions accept byte-aligned addresses for multi-byte
    /// accesses without splitting
    pub has_native_byte_aligned_mem: bool,
    /// ds_read_u8_d16 and friends
    pub has_d16_lds_loads: bool,
    pub has_scalar_cmp_u64: bool,
    pub has_scalar_mul_hi: bool,
    /// GLOBAL instructions, otherwise FLAT or MUBUF addr64
    pub has_global: bool,
    pub has_flat: bool,
    /// SCRATCH instructions, otherwise MUBUF with the scratch descriptor
    pub has_scratch_insts: bool,
    /// Integer-format gather4 returns garbage without a descriptor fixup
    pub has_integer_gather4_bug: bool,
    /// v_rcp/v_rsq/v_sqrt/v_log flush denormal inputs regardless of mode
    pub has_transcendental_denorm_bug: bool,
    pub has_dpp: bool,
    pub debug: DebugFlags,
}

impl CompilerOptions {
    pub fn new(chip_class: ChipClass, wave_size: u32) -> Result<CompilerOptions> {
        let wave_ok = match wave_size {
            64 => true,
            32 => chip_class >= ChipClass::GFX10,
            _ => false,
        };
        if !wave_ok {
            return Err(CompileError::UnsupportedWaveSize {
                chip: chip_class,
                wave_size: wave_size,
            });
        }

        Ok(CompilerOptions {
            chip_class: chip_class,
            wave_size: wave_size,
            has_packed_math_16bit: chip_class >= ChipClass::GFX9,
            has_16bit_vop2: chip_class >= ChipClass::GFX8,
            has_native_byte_aligned_mem: chip_class >= ChipClass::GFX9,
            has_d16_lds_loads: chip_class >= ChipClass::GFX9,
            has_scalar_cmp_u64: chip_class >= ChipClass::GFX8,
            has_scalar_mul_hi: chip_class >= ChipClass::GFX9,
            has_global: chip_class >= ChipClass::GFX9,
            has_flat: chip_class >= ChipClass::GFX7,
            has_scratch_insts: chip_class >= ChipClass::GFX9,
            has_integer_gather4_bug: chip_class <= ChipClass::GFX8,
            has_transcendental_denorm_bug: chip_class <= ChipClass::GFX8,
            has_dpp: chip_class >= ChipClass::GFX8,
            debug: DebugFlags::default(),
        })
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> CompilerOptions {
        self.debug = debug;
        self
    }
}

/// Byte placement of one binding inside its descriptor set
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BindingLayout {
    pub offset: u32,
    pub stride: u32,
}

#[derive(Clone, Debug, Default)]
pub struct SetLayout {
    pub bindings: Vec<BindingLayout>,
}

/// Descriptor set and push constant layout
#[derive(Clone, Debug, Default)]
pub struct ResourceLayout {
    pub sets: Vec<SetLayout>,
    pub push_constant_size: u32,
    /// High half of every 32-bit pointer passed in user SGPRs
    pub address32_hi: u32,
}

impl ResourceLayout {
    pub fn binding(&self, set: u32, binding: u32) -> Option<BindingLayout> {
        self.sets
            .get(set as usize)?
            .bindings
            .get(binding as usize)
            .copied()
    }

    pub fn num_sets(&self) -> u32 {
        self.sets.len() as u32
    }
}

/// One vertex attribute fetched through MTBUF
#[derive(Clone, Copy, Debug, Default)]
pub struct VertexInput {
    pub location: u32,
    pub binding: u32,
    pub offset: u32,
    pub stride: u32,
    pub dfmt: u8,
    pub nfmt: u8,
    pub num_channels: u8,
    pub per_instance: bool,
}

/// Color export encodings
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SpiFormat {
    #[default]
    Zero,
    R32,
    GR32,
    AR32,
    Fp16Abgr,
    Unorm16Abgr,
    Snorm16Abgr,
    Uint16Abgr,
    Sint16Abgr,
    ABGR32,
}

impl SpiFormat {
    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            SpiFormat::Fp16Abgr
                | SpiFormat::Unorm16Abgr
                | SpiFormat::Snorm16Abgr
                | SpiFormat::Uint16Abgr
                | SpiFormat::Sint16Abgr
        )
    }
}

/// One transform feedback output
#[derive(Clone, Copy, Debug)]
pub struct StreamoutOutput {
    pub location: u32,
    pub component_mask: u8,
    pub buffer: u8,
    pub offset: u32,
}

#[derive(Clone, Debug, Default)]
pub struct StreamoutConfig {
    pub outputs: Vec<StreamoutOutput>,
    pub strides: [u32; 4],
}

/// Driver-side information which is not part of the NIR
#[derive(Clone, Debug, Default)]
pub struct ShaderConfig {
    pub layout: ResourceLayout,
    pub vertex_inputs: Vec<VertexInput>,
    pub fs_spi_formats: [SpiFormat; 8],
    pub streamout: Option<StreamoutConfig>,
    /// Stage consuming the outputs of a vertex shader compiled on its own,
    /// `Geometry` makes it an ES, `TessCtrl` an LS
    pub next_stage: Option<ShaderStage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_debug_tokens() {
        let flags = DebugFlags::parse("novalidateir, perfwarn,noopt").unwrap();
        assert!(!flags.validate_ir);
        assert!(flags.perf_warn);
        assert!(flags.no_opt);
        assert!(!flags.print_ir);

        assert_eq!(
            DebugFlags::parse("validateir,bogus"),
            Err(DebugOptionError::Unknown("bogus".to_string()))
        );
        assert_eq!(DebugFlags::parse("").unwrap(), DebugFlags::default());
    }

    #[test]
    fn wave32_needs_gfx10() {
        assert!(CompilerOptions::new(ChipClass::GFX10, 32).is_ok());
        assert!(matches!(
            CompilerOptions::new(ChipClass::GFX9, 32),
            Err(CompileError::UnsupportedWaveSize { wave_size: 32, .. })
        ));
        assert!(CompilerOptions::new(ChipClass::GFX9, 48).is_err());
    }

    #[test]
    fn capabilities_follow_generation() {
        let gfx8 = CompilerOptions::new(ChipClass::GFX8, 64).unwrap();
        assert!(!gfx8.has_packed_math_16bit);
        assert!(gfx8.has_16bit_vop2);
        assert!(gfx8.has_integer_gather4_bug);
        let gfx10 = CompilerOptions::new(ChipClass::GFX10_3, 64).unwrap();
        assert!(gfx10.has_packed_math_16bit);
        assert!(!gfx10.has_transcendental_denorm_bug);
    }
}
