/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

extern crate aco_ir_proc;

pub use crate::aco_builder::{Builder, InstrBuilder};
pub use crate::aco_opcodes::{Format, Opcode};
use crate::nir::ShaderStage;

use aco_ir_proc::*;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use thiserror::Error;

/// GPU generations, ordered oldest to newest
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChipClass {
    GFX6,
    GFX7,
    GFX8,
    GFX9,
    GFX10,
    GFX10_3,
}

impl fmt::Display for ChipClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChipClass::GFX6 => "GFX6",
            ChipClass::GFX7 => "GFX7",
            ChipClass::GFX8 => "GFX8",
            ChipClass::GFX9 => "GFX9",
            ChipClass::GFX10 => "GFX10",
            ChipClass::GFX10_3 => "GFX10.3",
        };
        f.write_str(s)
    }
}

/// Storage kind of a register class
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RegType {
    /// Scalar registers, uniform across the wave
    SGPR = 0,

    /// Vector registers, one 32-bit value per lane
    VGPR = 1,
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegType::SGPR => f.write_str("sgpr"),
            RegType::VGPR => f.write_str("vgpr"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum RegisterClassError {
    #[error("sub-dword class of {bytes} bytes requested in scalar storage")]
    SubdwordScalar { bytes: u32 },
    #[error("register class of {bytes} bytes is out of range")]
    OutOfRange { bytes: u32 },
}

/// A register class: storage kind plus size
///
/// Packed as `[vgpr:1][lane_mask:1][subdword:1][size:5]` where size is in
/// dwords, or in bytes for sub-dword classes.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct RegClass {
    packed: u8,
}

impl RegClass {
    const VGPR_BIT: u8 = 1 << 7;
    const LANE_MASK_BIT: u8 = 1 << 6;
    const SUBDWORD_BIT: u8 = 1 << 5;
    const SIZE_MASK: u8 = 0x1f;

    pub const S1: RegClass = RegClass { packed: 1 };
    pub const S2: RegClass = RegClass { packed: 2 };
    pub const S3: RegClass = RegClass { packed: 3 };
    pub const S4: RegClass = RegClass { packed: 4 };
    pub const S8: RegClass = RegClass { packed: 8 };
    pub const S16: RegClass = RegClass { packed: 16 };
    pub const V1: RegClass = RegClass {
        packed: Self::VGPR_BIT | 1,
    };
    pub const V2: RegClass = RegClass {
        packed: Self::VGPR_BIT | 2,
    };
    pub const V3: RegClass = RegClass {
        packed: Self::VGPR_BIT | 3,
    };
    pub const V4: RegClass = RegClass {
        packed: Self::VGPR_BIT | 4,
    };
    pub const V1B: RegClass = RegClass {
        packed: Self::VGPR_BIT | Self::SUBDWORD_BIT | 1,
    };
    pub const V2B: RegClass = RegClass {
        packed: Self::VGPR_BIT | Self::SUBDWORD_BIT | 2,
    };
    pub const V3B: RegClass = RegClass {
        packed: Self::VGPR_BIT | Self::SUBDWORD_BIT | 3,
    };
    pub const V6B: RegClass = RegClass {
        packed: Self::VGPR_BIT | Self::SUBDWORD_BIT | 6,
    };

    /// Dword-granular class of `size` dwords
    pub fn new(ty: RegType, size: u32) -> RegClass {
        assert!(size > 0 && size <= u32::from(Self::SIZE_MASK));
        let mut packed = size as u8;
        if ty == RegType::VGPR {
            packed |= Self::VGPR_BIT;
        }
        RegClass { packed: packed }
    }

    /// Class holding `bytes` bytes of the given storage kind
    ///
    /// Sizes which are not a whole number of dwords need a sub-dword class
    /// and those only exist in vector storage.
    pub fn try_get(ty: RegType, bytes: u32) -> Result<RegClass, RegisterClassError> {
        if bytes == 0 {
            return Err(RegisterClassError::OutOfRange { bytes: bytes });
        }
        if bytes % 4 == 0 {
            let dwords = bytes / 4;
            if dwords > u32::from(Self::SIZE_MASK) {
                return Err(RegisterClassError::OutOfRange { bytes: bytes });
            }
            Ok(RegClass::new(ty, dwords))
        } else {
            RegClass::try_subdword(ty, bytes)
        }
    }

    /// Like `try_get()` but a scalar sub-dword request is a hard error
    pub fn get(ty: RegType, bytes: u32) -> RegClass {
        match RegClass::try_get(ty, bytes) {
            Ok(rc) => rc,
            Err(e) => panic!("RegisterClassError: {}", e),
        }
    }

    pub fn try_subdword(ty: RegType, bytes: u32) -> Result<RegClass, RegisterClassError> {
        if ty == RegType::SGPR {
            return Err(RegisterClassError::SubdwordScalar { bytes: bytes });
        }
        if bytes == 0 || bytes > u32::from(Self::SIZE_MASK) {
            return Err(RegisterClassError::OutOfRange { bytes: bytes });
        }
        Ok(RegClass {
            packed: Self::VGPR_BIT | Self::SUBDWORD_BIT | bytes as u8,
        })
    }

    /// The class of a per-lane boolean: one bit per lane of the wave
    pub fn lane_mask(wave_size: u32) -> RegClass {
        assert!(wave_size == 32 || wave_size == 64);
        RegClass {
            packed: Self::LANE_MASK_BIT | (wave_size / 32) as u8,
        }
    }

    pub fn reg_type(&self) -> RegType {
        if self.packed & Self::VGPR_BIT != 0 {
            RegType::VGPR
        } else {
            RegType::SGPR
        }
    }

    pub fn is_subdword(&self) -> bool {
        self.packed & Self::SUBDWORD_BIT != 0
    }

    pub fn is_lane_mask(&self) -> bool {
        self.packed & Self::LANE_MASK_BIT != 0
    }

    /// Linear values are live across the whole linear CFG, regardless of
    /// which lanes are active.
    pub fn is_linear(&self) -> bool {
        self.reg_type() == RegType::SGPR
    }

    pub fn bytes(&self) -> u32 {
        let size = u32::from(self.packed & Self::SIZE_MASK);
        if self.is_subdword() {
            size
        } else {
            size * 4
        }
    }

    /// Size in dwords, rounded up
    pub fn size(&self) -> u32 {
        (self.bytes() + 3) / 4
    }

    /// The same storage, viewed as a plain scalar/vector class
    pub fn without_lane_mask(&self) -> RegClass {
        RegClass {
            packed: self.packed & !Self::LANE_MASK_BIT,
        }
    }

    /// The vector class of the same byte size
    pub fn as_vgpr(&self) -> RegClass {
        RegClass::get(RegType::VGPR, self.bytes())
    }

    /// Sub-dword view of a vector class, used to address bytes of it
    pub fn as_subdword(&self) -> RegClass {
        assert!(self.reg_type() == RegType::VGPR);
        RegClass {
            packed: Self::VGPR_BIT | Self::SUBDWORD_BIT | self.bytes() as u8,
        }
    }
}

impl fmt::Display for RegClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_lane_mask() {
            write!(f, "lm{}", self.size() * 32)
        } else if self.is_subdword() {
            write!(f, "v{}b", self.bytes())
        } else {
            match self.reg_type() {
                RegType::SGPR => write!(f, "s{}", self.size()),
                RegType::VGPR => write!(f, "v{}", self.size()),
            }
        }
    }
}

impl fmt::Debug for RegClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An SSA value with a fixed register class
///
/// The id is the low 24 bits and the class is the top 8.  Id 0 is reserved
/// for "no value".
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Temp {
    packed: u32,
}

impl Temp {
    pub const ID_BITS: u32 = 24;

    pub fn new(id: u32, rc: RegClass) -> Temp {
        assert!(id < (1 << Self::ID_BITS));
        Temp {
            packed: id | (u32::from(rc.packed) << Self::ID_BITS),
        }
    }

    pub fn none(rc: RegClass) -> Temp {
        Temp::new(0, rc)
    }

    pub fn id(&self) -> u32 {
        self.packed & ((1 << Self::ID_BITS) - 1)
    }

    pub fn reg_class(&self) -> RegClass {
        RegClass {
            packed: (self.packed >> Self::ID_BITS) as u8,
        }
    }

    pub fn reg_type(&self) -> RegType {
        self.reg_class().reg_type()
    }

    pub fn size(&self) -> u32 {
        self.reg_class().size()
    }

    pub fn bytes(&self) -> u32 {
        self.reg_class().bytes()
    }

    pub fn is_linear(&self) -> bool {
        self.reg_class().is_linear()
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.id())
    }
}

impl fmt::Debug for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}:{}", self.id(), self.reg_class())
    }
}

/// A physical register
///
/// Only the handful of registers with architectural meaning are ever
/// referenced before register allocation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PhysReg(pub u16);

impl PhysReg {
    pub const VCC: PhysReg = PhysReg(106);
    pub const M0: PhysReg = PhysReg(124);
    pub const EXEC: PhysReg = PhysReg(126);
    pub const SCC: PhysReg = PhysReg(253);
    pub const VGPR_BASE: u16 = 256;

    pub fn sgpr(idx: u16) -> PhysReg {
        assert!(idx < Self::VCC.0);
        PhysReg(idx)
    }

    pub fn vgpr(idx: u16) -> PhysReg {
        PhysReg(Self::VGPR_BASE + idx)
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PhysReg::VCC => f.write_str("vcc"),
            PhysReg::M0 => f.write_str("m0"),
            PhysReg::EXEC => f.write_str("exec"),
            PhysReg::SCC => f.write_str("scc"),
            PhysReg(r) if r >= Self::VGPR_BASE => {
                write!(f, "v[{}]", r - Self::VGPR_BASE)
            }
            PhysReg(r) => write!(f, "s[{}]", r),
        }
    }
}

/// Encodable width of a literal constant
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConstWidth {
    W16,
    W24,
    W32,
    W64,
}

impl ConstWidth {
    pub fn bytes(&self) -> u32 {
        match self {
            ConstWidth::W16 => 2,
            ConstWidth::W24 => 3,
            ConstWidth::W32 => 4,
            ConstWidth::W64 => 8,
        }
    }
}

/// A use of a value by an instruction
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operand {
    Undef(RegClass),
    Temp(Temp),
    /// A temporary which must be placed in a specific register
    Fixed(Temp, PhysReg),
    /// A raw physical register read, such as exec
    Reg(PhysReg, RegClass),
    Const(u64, ConstWidth),
}

impl Operand {
    pub fn c16(v: u16) -> Operand {
        Operand::Const(v.into(), ConstWidth::W16)
    }

    pub fn c24(v: u32) -> Operand {
        assert!(v < (1 << 24));
        Operand::Const(v.into(), ConstWidth::W24)
    }

    pub fn c32(v: u32) -> Operand {
        Operand::Const(v.into(), ConstWidth::W32)
    }

    pub fn c64(v: u64) -> Operand {
        Operand::Const(v, ConstWidth::W64)
    }

    pub fn c32_or_c64(v: u32, is64: bool) -> Operand {
        if is64 {
            Operand::c64(v.into())
        } else {
            Operand::c32(v)
        }
    }

    pub fn f32(v: f32) -> Operand {
        Operand::c32(v.to_bits())
    }

    pub fn zero(bytes: u32) -> Operand {
        match bytes {
            2 => Operand::c16(0),
            8 => Operand::c64(0),
            _ => Operand::c32(0),
        }
    }

    pub fn undef(rc: RegClass) -> Operand {
        Operand::Undef(rc)
    }

    pub fn exec(lm: RegClass) -> Operand {
        Operand::Reg(PhysReg::EXEC, lm)
    }

    pub fn m0(t: Temp) -> Operand {
        Operand::Fixed(t, PhysReg::M0)
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Operand::Temp(_) | Operand::Fixed(..))
    }

    pub fn temp(&self) -> Option<Temp> {
        match self {
            Operand::Temp(t) | Operand::Fixed(t, _) => Some(*t),
            _ => None,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Operand::Undef(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Const(..))
    }

    pub fn constant_value(&self) -> Option<u64> {
        match self {
            Operand::Const(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn phys_reg(&self) -> Option<PhysReg> {
        match self {
            Operand::Fixed(_, r) | Operand::Reg(r, _) => Some(*r),
            _ => None,
        }
    }

    pub fn bytes(&self) -> u32 {
        match self {
            Operand::Const(_, w) => w.bytes(),
            _ => self.reg_class().bytes(),
        }
    }

    pub fn size(&self) -> u32 {
        (self.bytes() + 3) / 4
    }

    /// Constants are treated as scalar sources
    pub fn reg_class(&self) -> RegClass {
        match self {
            Operand::Undef(rc) | Operand::Reg(_, rc) => *rc,
            Operand::Temp(t) | Operand::Fixed(t, _) => t.reg_class(),
            Operand::Const(_, w) => {
                if w.bytes() > 4 {
                    RegClass::S2
                } else {
                    RegClass::S1
                }
            }
        }
    }

    pub fn reg_type(&self) -> RegType {
        self.reg_class().reg_type()
    }

    /// Returns true if the constant can be encoded without a literal dword
    pub fn is_inline_constant(&self) -> bool {
        let Operand::Const(v, w) = *self else {
            return false;
        };
        match w {
            ConstWidth::W16 => {
                let i = v as u16 as i16;
                (-16..=64).contains(&i)
                    || [0x3800, 0xb800, 0x3c00, 0xbc00, 0x4000, 0xc000, 0x4400, 0xc400]
                        .contains(&(v as u16))
            }
            ConstWidth::W24 => false,
            ConstWidth::W32 => {
                let i = v as u32 as i32;
                (-16..=64).contains(&i)
                    || [0.5_f32, -0.5, 1.0, -1.0, 2.0, -2.0, 4.0, -4.0]
                        .iter()
                        .any(|f| f.to_bits() == v as u32)
            }
            ConstWidth::W64 => {
                let i = v as i64;
                (-16..=64).contains(&i)
                    || [0.5_f64, -0.5, 1.0, -1.0, 2.0, -2.0, 4.0, -4.0]
                        .iter()
                        .any(|f| f.to_bits() == v)
            }
        }
    }

    pub fn is_literal(&self) -> bool {
        self.is_constant() && !self.is_inline_constant()
    }
}

impl From<Temp> for Operand {
    fn from(t: Temp) -> Operand {
        Operand::Temp(t)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Undef(rc) => write!(f, "undef:{}", rc),
            Operand::Temp(t) => write!(f, "{}", t),
            Operand::Fixed(t, r) => write!(f, "{}:{}", t, r),
            Operand::Reg(r, _) => write!(f, "{}", r),
            Operand::Const(v, ConstWidth::W64) => write!(f, "{:#x}", v),
            Operand::Const(v, _) => {
                if *v < 64 {
                    write!(f, "{}", v)
                } else {
                    write!(f, "{:#x}", v)
                }
            }
        }
    }
}

/// A value produced by an instruction
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Definition {
    temp: Temp,
    fixed: Option<PhysReg>,
}

impl Definition {
    pub fn new(temp: Temp) -> Definition {
        Definition {
            temp: temp,
            fixed: None,
        }
    }

    pub fn fixed(temp: Temp, reg: PhysReg) -> Definition {
        Definition {
            temp: temp,
            fixed: Some(reg),
        }
    }

    /// A write to a physical register which produces no SSA value
    pub fn reg(reg: PhysReg, rc: RegClass) -> Definition {
        Definition {
            temp: Temp::none(rc),
            fixed: Some(reg),
        }
    }

    pub fn is_temp(&self) -> bool {
        self.temp.id() != 0
    }

    pub fn temp(&self) -> Temp {
        self.temp
    }

    pub fn reg_class(&self) -> RegClass {
        self.temp.reg_class()
    }

    pub fn phys_reg(&self) -> Option<PhysReg> {
        self.fixed
    }
}

impl From<Temp> for Definition {
    fn from(t: Temp) -> Definition {
        Definition::new(t)
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.reg_class())?;
        if self.is_temp() {
            write!(f, "{}", self.temp)?;
            if let Some(r) = self.fixed {
                write!(f, ":{}", r)?;
            }
        } else if let Some(r) = self.fixed {
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

macro_rules! impl_flag_ops {
    ($ty: ident) => {
        impl BitOr for $ty {
            type Output = $ty;

            fn bitor(self, rhs: $ty) -> $ty {
                $ty(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $ty {
            fn bitor_assign(&mut self, rhs: $ty) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $ty {
            type Output = $ty;

            fn bitand(self, rhs: $ty) -> $ty {
                $ty(self.0 & rhs.0)
            }
        }

        impl Not for $ty {
            type Output = $ty;

            fn not(self) -> $ty {
                $ty(!self.0)
            }
        }

        impl $ty {
            pub fn contains(&self, other: $ty) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn intersects(&self, other: $ty) -> bool {
                self.0 & other.0 != 0
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

/// Which kinds of memory an instruction may touch
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Storage(pub u8);

impl Storage {
    pub const NONE: Storage = Storage(0);
    pub const BUFFER: Storage = Storage(1 << 0);
    pub const ATOMIC_COUNTER: Storage = Storage(1 << 1);
    pub const IMAGE: Storage = Storage(1 << 2);
    pub const SHARED: Storage = Storage(1 << 3);
    pub const VMEM_OUTPUT: Storage = Storage(1 << 4);
    pub const SCRATCH: Storage = Storage(1 << 5);
}

impl_flag_ops!(Storage);

/// Ordering semantics attached to a memory access
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Semantics(pub u8);

impl Semantics {
    pub const NONE: Semantics = Semantics(0);
    pub const ACQUIRE: Semantics = Semantics(1 << 0);
    pub const RELEASE: Semantics = Semantics(1 << 1);
    pub const ACQREL: Semantics = Semantics(0b11);
    pub const VOLATILE: Semantics = Semantics(1 << 2);
    /// Only visible to the current invocation
    pub const PRIVATE: Semantics = Semantics(1 << 3);
    /// The access can be moved freely relative to other accesses
    pub const CAN_REORDER: Semantics = Semantics(1 << 4);
    pub const ATOMIC: Semantics = Semantics(1 << 5);
    /// Read-modify-write atomic
    pub const RMW: Semantics = Semantics(1 << 6);
    pub const COHERENT: Semantics = Semantics(1 << 7);
}

impl_flag_ops!(Semantics);

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SyncScope {
    #[default]
    Invocation,
    Subgroup,
    Workgroup,
    QueueFamily,
    Device,
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncScope::Invocation => "invocation",
            SyncScope::Subgroup => "subgroup",
            SyncScope::Workgroup => "workgroup",
            SyncScope::QueueFamily => "queuefamily",
            SyncScope::Device => "device",
        };
        f.write_str(s)
    }
}

/// The ordering contract of a memory instruction or barrier
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct MemorySyncInfo {
    pub storage: Storage,
    pub semantics: Semantics,
    pub scope: SyncScope,
}

impl MemorySyncInfo {
    pub fn new(storage: Storage, semantics: Semantics, scope: SyncScope) -> Self {
        MemorySyncInfo {
            storage: storage,
            semantics: semantics,
            scope: scope,
        }
    }

    pub fn storage(storage: Storage) -> Self {
        MemorySyncInfo::new(storage, Semantics::NONE, SyncScope::Invocation)
    }

    pub fn can_reorder(&self) -> bool {
        if self.semantics.intersects(Semantics::ACQREL | Semantics::VOLATILE) {
            return false;
        }
        self.storage.is_empty() || self.semantics.contains(Semantics::CAN_REORDER)
    }
}

impl fmt::Display for MemorySyncInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const STORAGE_NAMES: [&str; 6] = [
            "buffer",
            "atomic_counter",
            "image",
            "shared",
            "vmem_output",
            "scratch",
        ];
        const SEMANTIC_NAMES: [&str; 8] = [
            "acquire",
            "release",
            "volatile",
            "private",
            "reorder",
            "atomic",
            "rmw",
            "coherent",
        ];
        if !self.storage.is_empty() {
            f.write_str(" storage:")?;
            let names: Vec<&str> = (0..STORAGE_NAMES.len())
                .filter(|i| self.storage.0 & (1 << i) != 0)
                .map(|i| STORAGE_NAMES[i])
                .collect();
            f.write_str(&names.join(","))?;
        }
        if !self.semantics.is_empty() {
            f.write_str(" semantics:")?;
            let names: Vec<&str> = (0..SEMANTIC_NAMES.len())
                .filter(|i| self.semantics.0 & (1 << i) != 0)
                .map(|i| SEMANTIC_NAMES[i])
                .collect();
            f.write_str(&names.join(","))?;
        }
        if self.scope != SyncScope::Invocation {
            write!(f, " scope:{}", self.scope)?;
        }
        Ok(())
    }
}

fn write_flag(f: &mut fmt::Formatter<'_>, set: bool, name: &str) -> fmt::Result {
    if set {
        write!(f, " {}", name)
    } else {
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SopkInfo {
    pub imm: u16,
}

impl fmt::Display for SopkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " imm:{}", self.imm)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SoppInfo {
    pub imm: u32,
    pub block: Option<u32>,
}

impl fmt::Display for SoppInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.imm != 0 {
            write!(f, " imm:{}", self.imm)?;
        }
        if let Some(b) = self.block {
            write!(f, " block:BB{}", b)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SmemInfo {
    pub sync: MemorySyncInfo,
    pub glc: bool,
    pub dlc: bool,
    pub nv: bool,
}

impl fmt::Display for SmemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flag(f, self.glc, "glc")?;
        write_flag(f, self.dlc, "dlc")?;
        write_flag(f, self.nv, "nv")?;
        write!(f, "{}", self.sync)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DsInfo {
    pub sync: MemorySyncInfo,
    pub offset0: u16,
    pub offset1: u8,
    pub gds: bool,
}

impl fmt::Display for DsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset0 != 0 {
            write!(f, " offset0:{}", self.offset0)?;
        }
        if self.offset1 != 0 {
            write!(f, " offset1:{}", self.offset1)?;
        }
        write_flag(f, self.gds, "gds")?;
        write!(f, "{}", self.sync)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MubufInfo {
    pub sync: MemorySyncInfo,
    pub offset: u16,
    pub offen: bool,
    pub idxen: bool,
    pub addr64: bool,
    pub glc: bool,
    pub dlc: bool,
    pub slc: bool,
    pub swizzled: bool,
}

impl fmt::Display for MubufInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset != 0 {
            write!(f, " offset:{}", self.offset)?;
        }
        write_flag(f, self.offen, "offen")?;
        write_flag(f, self.idxen, "idxen")?;
        write_flag(f, self.addr64, "addr64")?;
        write_flag(f, self.glc, "glc")?;
        write_flag(f, self.dlc, "dlc")?;
        write_flag(f, self.slc, "slc")?;
        write_flag(f, self.swizzled, "swizzled")?;
        write!(f, "{}", self.sync)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MtbufInfo {
    pub sync: MemorySyncInfo,
    pub offset: u16,
    pub offen: bool,
    pub idxen: bool,
    pub dfmt: u8,
    pub nfmt: u8,
    pub glc: bool,
    pub slc: bool,
}

impl fmt::Display for MtbufInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " dfmt:{} nfmt:{}", self.dfmt, self.nfmt)?;
        if self.offset != 0 {
            write!(f, " offset:{}", self.offset)?;
        }
        write_flag(f, self.offen, "offen")?;
        write_flag(f, self.idxen, "idxen")?;
        write_flag(f, self.glc, "glc")?;
        write_flag(f, self.slc, "slc")?;
        write!(f, "{}", self.sync)
    }
}

/// Image dimensionality as encoded by MIMG
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ImageDim {
    #[default]
    Dim1D,
    Dim2D,
    Dim3D,
    Cube,
    Dim1DArray,
    Dim2DArray,
    Dim2DMsaa,
    Dim2DMsaaArray,
}

impl ImageDim {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            ImageDim::Dim1DArray
                | ImageDim::Dim2DArray
                | ImageDim::Dim2DMsaaArray
                | ImageDim::Cube
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct MimgInfo {
    pub sync: MemorySyncInfo,
    pub dmask: u8,
    pub dim: ImageDim,
    pub unrm: bool,
    pub glc: bool,
    pub dlc: bool,
    pub slc: bool,
    pub tfe: bool,
    pub da: bool,
    pub a16: bool,
    pub d16: bool,
}

impl fmt::Display for MimgInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " dmask:{:#x} dim:{:?}", self.dmask, self.dim)?;
        write_flag(f, self.unrm, "unrm")?;
        write_flag(f, self.glc, "glc")?;
        write_flag(f, self.dlc, "dlc")?;
        write_flag(f, self.slc, "slc")?;
        write_flag(f, self.tfe, "tfe")?;
        write_flag(f, self.da, "da")?;
        write_flag(f, self.a16, "a16")?;
        write_flag(f, self.d16, "d16")?;
        write!(f, "{}", self.sync)
    }
}

pub const EXP_MRT0: u8 = 0;
pub const EXP_MRTZ: u8 = 8;
pub const EXP_NULL: u8 = 9;
pub const EXP_POS0: u8 = 12;
pub const EXP_PARAM0: u8 = 32;

#[derive(Clone, Debug, Default)]
pub struct ExportInfo {
    pub enabled_mask: u8,
    pub dest: u8,
    pub compressed: bool,
    pub done: bool,
    pub valid_mask: bool,
}

impl fmt::Display for ExportInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dest {
            EXP_MRTZ => f.write_str(" mrtz")?,
            EXP_NULL => f.write_str(" null")?,
            d if d < EXP_MRTZ => write!(f, " mrt{}", d - EXP_MRT0)?,
            d if d >= EXP_PARAM0 => write!(f, " param{}", d - EXP_PARAM0)?,
            d => write!(f, " pos{}", d - EXP_POS0)?,
        }
        write!(f, " en:{:#x}", self.enabled_mask)?;
        write_flag(f, self.compressed, "compr")?;
        write_flag(f, self.done, "done")?;
        write_flag(f, self.valid_mask, "vm")
    }
}

/// Modifiers shared by FLAT, GLOBAL and SCRATCH
#[derive(Clone, Debug, Default)]
pub struct FlatInfo {
    pub sync: MemorySyncInfo,
    pub offset: i16,
    pub glc: bool,
    pub dlc: bool,
    pub slc: bool,
    pub nv: bool,
}

impl fmt::Display for FlatInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset != 0 {
            write!(f, " offset:{}", self.offset)?;
        }
        write_flag(f, self.glc, "glc")?;
        write_flag(f, self.dlc, "dlc")?;
        write_flag(f, self.slc, "slc")?;
        write_flag(f, self.nv, "nv")?;
        write!(f, "{}", self.sync)
    }
}

/// Targets of a pseudo branch
///
/// `target[0]` is the taken target, `target[1]` the not-taken one for
/// conditional branches.
#[derive(Clone, Debug, Default)]
pub struct BranchInfo {
    pub target: [u32; 2],
}

impl fmt::Display for BranchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " BB{}", self.target[0])?;
        if self.target[1] != 0 {
            write!(f, ", BB{}", self.target[1])?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct BarrierInfo {
    pub sync: MemorySyncInfo,
    pub exec_scope: SyncScope,
}

impl fmt::Display for BarrierInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sync)?;
        if self.exec_scope != SyncScope::Invocation {
            write!(f, " exec_scope:{}", self.exec_scope)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReduceOp {
    IAdd32,
    IMul32,
    FAdd32,
    FMul32,
    IMin32,
    IMax32,
    UMin32,
    UMax32,
    FMin32,
    FMax32,
    IAnd32,
    IOr32,
    IXor32,
}

#[derive(Clone, Debug)]
pub struct ReductionInfo {
    pub reduce_op: ReduceOp,
    pub cluster_size: u32,
}

impl fmt::Display for ReductionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " op:{:?} cluster_size:{}", self.reduce_op, self.cluster_size)
    }
}

/// VOP3 modifiers, also marks a VOP1/VOP2/VOPC opcode as VOP3-encoded
#[derive(Clone, Debug, Default)]
pub struct Vop3Info {
    pub abs: [bool; 3],
    pub neg: [bool; 3],
    pub opsel: u8,
    pub clamp: bool,
    pub omod: u8,
}

impl fmt::Display for Vop3Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..3 {
            write_flag(f, self.abs[i], &format!("abs{}", i))?;
            write_flag(f, self.neg[i], &format!("neg{}", i))?;
        }
        if self.opsel != 0 {
            write!(f, " opsel:{:#x}", self.opsel)?;
        }
        write_flag(f, self.clamp, "clamp")?;
        if self.omod != 0 {
            write!(f, " omod:{}", self.omod)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Vop3pInfo {
    pub neg_lo: [bool; 3],
    pub neg_hi: [bool; 3],
    pub opsel_lo: u8,
    pub opsel_hi: u8,
    pub clamp: bool,
}

impl Default for Vop3pInfo {
    fn default() -> Self {
        /* Both halves read their matching half of each source */
        Vop3pInfo {
            neg_lo: [false; 3],
            neg_hi: [false; 3],
            opsel_lo: 0,
            opsel_hi: 0x7,
            clamp: false,
        }
    }
}

impl fmt::Display for Vop3pInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.opsel_lo != 0 {
            write!(f, " opsel_lo:{:#x}", self.opsel_lo)?;
        }
        if self.opsel_hi != 0x7 {
            write!(f, " opsel_hi:{:#x}", self.opsel_hi)?;
        }
        for i in 0..3 {
            write_flag(f, self.neg_lo[i], &format!("neg_lo{}", i))?;
            write_flag(f, self.neg_hi[i], &format!("neg_hi{}", i))?;
        }
        write_flag(f, self.clamp, "clamp")
    }
}

#[derive(Clone, Debug)]
pub struct DppInfo {
    pub dpp_ctrl: u16,
    pub row_mask: u8,
    pub bank_mask: u8,
    pub bound_ctrl: bool,
}

impl DppInfo {
    pub fn quad_perm(lanes: [u8; 4]) -> DppInfo {
        let ctrl = lanes
            .iter()
            .enumerate()
            .fold(0_u16, |acc, (i, l)| acc | (u16::from(*l & 3) << (2 * i)));
        DppInfo {
            dpp_ctrl: ctrl,
            row_mask: 0xf,
            bank_mask: 0xf,
            bound_ctrl: true,
        }
    }
}

impl fmt::Display for DppInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " dpp_ctrl:{:#x} row_mask:{:#x} bank_mask:{:#x}",
            self.dpp_ctrl, self.row_mask, self.bank_mask
        )?;
        write_flag(f, self.bound_ctrl, "bound_ctrl:1")
    }
}

#[derive(Clone, Debug, Default)]
pub struct InterpInfo {
    pub attribute: u8,
    pub component: u8,
}

impl fmt::Display for InterpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " attr{}.{}", self.attribute, ['x', 'y', 'z', 'w'][usize::from(self.component & 3)])
    }
}

/// Format-specific modifier fields of an instruction
#[derive(Clone, Debug, Display, FromVariants)]
pub enum FormatInfo {
    None,
    Sopk(SopkInfo),
    Sopp(SoppInfo),
    Smem(SmemInfo),
    Ds(DsInfo),
    Mubuf(MubufInfo),
    Mtbuf(MtbufInfo),
    Mimg(MimgInfo),
    Export(ExportInfo),
    Flat(FlatInfo),
    Branch(BranchInfo),
    Barrier(BarrierInfo),
    Reduction(ReductionInfo),
    Vop3(Vop3Info),
    Vop3p(Vop3pInfo),
    Dpp(DppInfo),
    Interp(InterpInfo),
}

pub struct Instr {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub definitions: Vec<Definition>,
    pub info: FormatInfo,
}

impl Instr {
    pub fn new(
        opcode: Opcode,
        operands: Vec<Operand>,
        definitions: Vec<Definition>,
    ) -> Instr {
        Instr {
            opcode: opcode,
            operands: operands,
            definitions: definitions,
            info: FormatInfo::None,
        }
    }

    pub fn new_boxed(
        opcode: Opcode,
        operands: Vec<Operand>,
        definitions: Vec<Definition>,
    ) -> Box<Instr> {
        Box::new(Instr::new(opcode, operands, definitions))
    }

    pub fn with_info(mut self: Box<Self>, info: impl Into<FormatInfo>) -> Box<Instr> {
        self.info = info.into();
        self
    }

    /// The effective encoding, taking VOP3 promotion into account
    pub fn format(&self) -> Format {
        let base = self.opcode.format();
        match (&self.info, base) {
            (FormatInfo::Vop3(_), Format::VOP1 | Format::VOP2 | Format::VOPC) => {
                Format::VOP3
            }
            _ => base,
        }
    }

    pub fn is_vop3(&self) -> bool {
        self.format() == Format::VOP3
    }

    pub fn is_phi(&self) -> bool {
        self.opcode.is_phi()
    }

    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    pub fn branch_target(&self) -> Option<&BranchInfo> {
        match &self.info {
            FormatInfo::Branch(b) => Some(b),
            _ => None,
        }
    }

    pub fn sync_info(&self) -> Option<MemorySyncInfo> {
        match &self.info {
            FormatInfo::Smem(i) => Some(i.sync),
            FormatInfo::Ds(i) => Some(i.sync),
            FormatInfo::Mubuf(i) => Some(i.sync),
            FormatInfo::Mtbuf(i) => Some(i.sync),
            FormatInfo::Mimg(i) => Some(i.sync),
            FormatInfo::Flat(i) => Some(i.sync),
            FormatInfo::Barrier(i) => Some(i.sync),
            _ => None,
        }
    }

    pub fn vop3_mut(&mut self) -> &mut Vop3Info {
        if !matches!(self.info, FormatInfo::Vop3(_)) {
            self.info = Vop3Info::default().into();
        }
        match &mut self.info {
            FormatInfo::Vop3(v) => v,
            _ => unreachable!(),
        }
    }

    pub fn writes_exec(&self) -> bool {
        self.definitions
            .iter()
            .any(|d| d.phys_reg() == Some(PhysReg::EXEC))
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.definitions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", d)?;
        }
        if !self.definitions.is_empty() {
            f.write_str(" = ")?;
        }
        write!(f, "{}", self.opcode)?;
        if self.is_vop3() {
            f.write_str("_e64")?;
        }
        for (i, o) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {}", o)?;
        }
        write!(f, "{}", self.info)
    }
}

/// Block kind flags
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct BlockKind(pub u16);

impl BlockKind {
    pub const UNIFORM: BlockKind = BlockKind(1 << 0);
    pub const TOP_LEVEL: BlockKind = BlockKind(1 << 1);
    pub const LOOP_PREHEADER: BlockKind = BlockKind(1 << 2);
    pub const LOOP_HEADER: BlockKind = BlockKind(1 << 3);
    pub const LOOP_EXIT: BlockKind = BlockKind(1 << 4);
    pub const CONTINUE: BlockKind = BlockKind(1 << 5);
    pub const BREAK: BlockKind = BlockKind(1 << 6);
    pub const CONTINUE_OR_BREAK: BlockKind = BlockKind(1 << 7);
    pub const DISCARD: BlockKind = BlockKind(1 << 8);
    pub const BRANCH: BlockKind = BlockKind(1 << 9);
    pub const MERGE: BlockKind = BlockKind(1 << 10);
    pub const INVERT: BlockKind = BlockKind(1 << 11);
    pub const USES_DISCARD_IF: BlockKind = BlockKind(1 << 12);
    pub const USES_DEMOTE: BlockKind = BlockKind(1 << 13);
    pub const EXPORT_END: BlockKind = BlockKind(1 << 14);

    const NAMES: [&'static str; 15] = [
        "uniform",
        "top-level",
        "loop-preheader",
        "loop-header",
        "loop-exit",
        "continue",
        "break",
        "continue-or-break",
        "discard",
        "branch",
        "merge",
        "invert",
        "discard-if",
        "demote",
        "export-end",
    ];
}

impl_flag_ops!(BlockKind);

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = (0..Self::NAMES.len())
            .filter(|i| self.0 & (1 << i) != 0)
            .map(|i| Self::NAMES[i])
            .collect();
        f.write_str(&names.join(", "))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RoundMode {
    #[default]
    NearestEven,
    TowardZero,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum DenormMode {
    /// Denormal inputs and outputs are flushed to zero
    Flush,
    #[default]
    Keep,
}

/// The floating-point mode a block executes under
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct FloatMode {
    pub round32: RoundMode,
    pub round16_64: RoundMode,
    pub denorm32: DenormMode,
    pub denorm16_64: DenormMode,
    pub preserve_signed_zero_inf_nan32: bool,
    pub preserve_signed_zero_inf_nan16_64: bool,
}

impl fmt::Display for FloatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round32:{:?} round16_64:{:?} denorm32:{:?} denorm16_64:{:?}",
            self.round32, self.round16_64, self.denorm32, self.denorm16_64
        )
    }
}

pub struct Block {
    pub index: u32,
    pub kind: BlockKind,
    pub loop_nest_depth: u32,
    pub fp_mode: FloatMode,
    pub instrs: Vec<Box<Instr>>,
    pub logical_preds: Vec<u32>,
    pub linear_preds: Vec<u32>,
    pub logical_succs: Vec<u32>,
    pub linear_succs: Vec<u32>,
}

impl Block {
    pub fn new(index: u32) -> Block {
        Block {
            index: index,
            kind: BlockKind::default(),
            loop_nest_depth: 0,
            fp_mode: FloatMode::default(),
            instrs: Vec::new(),
            logical_preds: Vec::new(),
            linear_preds: Vec::new(),
            logical_succs: Vec::new(),
            linear_succs: Vec::new(),
        }
    }

    pub fn branch(&self) -> Option<&Instr> {
        let last = self.instrs.last()?;
        if last.is_branch() {
            Some(last)
        } else {
            None
        }
    }

    pub fn phis(&self) -> impl Iterator<Item = &Instr> {
        self.instrs
            .iter()
            .take_while(|i| i.is_phi())
            .map(|i| i.as_ref())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BB{}", self.index)?;
        writeln!(f, "  /* logical preds: {:?}, linear preds: {:?} */",
            self.logical_preds, self.linear_preds)?;
        writeln!(f, "  /* kind: {} */", self.kind)?;
        for i in &self.instrs {
            writeln!(f, "    {}", i)?;
        }
        Ok(())
    }
}

/// Hardware stage the program runs as
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HwStage {
    VS,
    ES,
    GS,
    LS,
    HS,
    FS,
    CS,
}

/// Per-program results consumed by the driver and later passes
#[derive(Clone, Debug, Default)]
pub struct ProgramConfig {
    /// Shared memory, in bytes, rounded up to the allocation granule
    pub lds_size: u32,
    /// Private memory per lane, in bytes
    pub scratch_size: u32,
    pub float_mode: FloatMode,
    /// The exec mask must be exact at every point (no speculation across
    /// discards or helper-lane changes)
    pub needs_exact: bool,
    /// Derivatives or quad operations need whole quads active
    pub needs_wqm: bool,
    pub needs_vcc: bool,
}

pub struct Program {
    pub chip_class: ChipClass,
    pub wave_size: u32,
    pub lane_mask: RegClass,
    pub hw_stage: HwStage,
    pub sw_stages: Vec<ShaderStage>,
    pub blocks: Vec<Block>,
    pub config: ProgramConfig,
    temp_rc: Vec<RegClass>,
}

impl Program {
    pub fn new(
        chip_class: ChipClass,
        wave_size: u32,
        hw_stage: HwStage,
        sw_stages: Vec<ShaderStage>,
    ) -> Program {
        Program {
            chip_class: chip_class,
            wave_size: wave_size,
            lane_mask: RegClass::lane_mask(wave_size),
            hw_stage: hw_stage,
            sw_stages: sw_stages,
            blocks: Vec::new(),
            config: ProgramConfig::default(),
            /* Id 0 is never handed out */
            temp_rc: vec![RegClass::S1],
        }
    }

    pub fn allocate_tmp(&mut self, rc: RegClass) -> Temp {
        let id = u32::try_from(self.temp_rc.len()).unwrap();
        self.temp_rc.push(rc);
        Temp::new(id, rc)
    }

    pub fn peek_allocation_id(&self) -> u32 {
        u32::try_from(self.temp_rc.len()).unwrap()
    }

    pub fn temp_reg_class(&self, id: u32) -> RegClass {
        self.temp_rc[id as usize]
    }

    pub fn create_and_insert_block(&mut self) -> u32 {
        let idx = u32::try_from(self.blocks.len()).unwrap();
        let mut block = Block::new(idx);
        block.fp_mode = self.config.float_mode;
        self.blocks.push(block);
        idx
    }

    pub fn block(&self, idx: u32) -> &Block {
        &self.blocks[idx as usize]
    }

    pub fn block_mut(&mut self, idx: u32) -> &mut Block {
        &mut self.blocks[idx as usize]
    }

    pub fn add_logical_edge(&mut self, pred: u32, succ: u32) {
        self.block_mut(pred).logical_succs.push(succ);
        self.block_mut(succ).logical_preds.push(pred);
    }

    pub fn add_linear_edge(&mut self, pred: u32, succ: u32) {
        self.block_mut(pred).linear_succs.push(succ);
        self.block_mut(succ).linear_preds.push(pred);
    }

    pub fn add_edge(&mut self, pred: u32, succ: u32) {
        self.add_logical_edge(pred, succ);
        self.add_linear_edge(pred, succ);
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instr> {
        self.blocks
            .iter()
            .flat_map(|b| b.instrs.iter().map(|i| i.as_ref()))
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ACO shader stage: {:?} ({:?}), {} wave{}",
            self.hw_stage, self.sw_stages, self.chip_class, self.wave_size
        )?;
        writeln!(
            f,
            "config: lds_size:{} scratch_size:{} needs_exact:{} {}",
            self.config.lds_size,
            self.config.scratch_size,
            self.config.needs_exact,
            self.config.float_mode
        )?;
        for b in &self.blocks {
            write!(f, "{}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_subdword_is_rejected() {
        assert_eq!(
            RegClass::try_get(RegType::SGPR, 2),
            Err(RegisterClassError::SubdwordScalar { bytes: 2 })
        );
        assert_eq!(RegClass::try_get(RegType::VGPR, 2), Ok(RegClass::V2B));
        assert_eq!(RegClass::try_get(RegType::SGPR, 8), Ok(RegClass::S2));
        assert!(RegClass::try_get(RegType::VGPR, 0).is_err());
    }

    #[test]
    #[should_panic(expected = "RegisterClassError")]
    fn scalar_subdword_get_panics() {
        RegClass::get(RegType::SGPR, 6);
    }

    #[test]
    fn reg_class_sizes() {
        assert_eq!(RegClass::V6B.size(), 2);
        assert_eq!(RegClass::V6B.bytes(), 6);
        assert_eq!(RegClass::S4.bytes(), 16);
        let lm = RegClass::lane_mask(64);
        assert!(lm.is_lane_mask() && lm.is_linear());
        assert_eq!(lm.size(), 2);
        assert_ne!(lm, RegClass::S2);
        assert_eq!(lm.without_lane_mask(), RegClass::S2);
        assert_eq!(RegClass::lane_mask(32).to_string(), "lm32");
        assert_eq!(RegClass::V2B.to_string(), "v2b");
    }

    #[test]
    fn temps_pack_id_and_class() {
        let t = Temp::new(1234, RegClass::V3);
        assert_eq!(t.id(), 1234);
        assert_eq!(t.reg_class(), RegClass::V3);
        assert_eq!(t.bytes(), 12);
    }

    #[test]
    fn inline_constants() {
        assert!(Operand::c32(64).is_inline_constant());
        assert!(Operand::c32(-16_i32 as u32).is_inline_constant());
        assert!(Operand::f32(0.5).is_inline_constant());
        assert!(Operand::c32(65).is_literal());
        assert!(Operand::c16(0x3c00).is_inline_constant());
        assert!(!Operand::Undef(RegClass::S1).is_literal());
    }

    #[test]
    fn instruction_printing() {
        let mut p = Program::new(ChipClass::GFX9, 64, HwStage::CS, Vec::new());
        let a = p.allocate_tmp(RegClass::S1);
        let b = p.allocate_tmp(RegClass::S1);
        let d = p.allocate_tmp(RegClass::S1);
        let scc = p.allocate_tmp(RegClass::S1);
        let i = Instr::new(
            Opcode::SAddU32,
            vec![a.into(), b.into()],
            vec![d.into(), Definition::fixed(scc, PhysReg::SCC)],
        );
        assert_eq!(i.to_string(), "s1: %3, s1: %4:scc = s_add_u32 %1, %2");
    }
}
