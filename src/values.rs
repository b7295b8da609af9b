use crate::types::ValType;
use core::fmt;

/// A value crossing the host/guest boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float.
    ///
    /// The raw bits are stored; use `f32::from_bits` to get the float.
    F32(u32),
    /// A 64-bit float.
    ///
    /// The raw bits are stored; use `f64::from_bits` to get the float.
    F64(u64),
    /// A 128-bit vector.
    V128(u128),
}

impl Val {
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::V128(_) => ValType::V128,
        }
    }

    /// The zero value of a type; locals start out this way.
    pub fn default_for(ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0),
            ValType::F64 => Val::F64(0),
            ValType::V128 => Val::V128(0),
            ValType::Any => panic!("`any` has no runtime values"),
        }
    }

    pub(crate) fn as_vmval(&self) -> VMVal {
        match self {
            Val::I32(v) => VMVal::i32(*v),
            Val::I64(v) => VMVal::i64(*v),
            Val::F32(bits) => VMVal::f32(*bits),
            Val::F64(bits) => VMVal::f64(*bits),
            Val::V128(v) => VMVal::v128(*v),
        }
    }

    pub(crate) fn from_vmval(raw: VMVal, ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(raw.get_i32()),
            ValType::I64 => Val::I64(raw.get_i64()),
            ValType::F32 => Val::F32(raw.get_f32_bits()),
            ValType::F64 => Val::F64(raw.get_f64_bits()),
            ValType::V128 => Val::V128(raw.get_v128()),
            ValType::Any => unreachable!("`any` has no runtime values"),
        }
    }

    crate::enum_accessors! {
        e
        (I32(i32) is_i32 i32 unwrap_i32 *e)
        (I64(i64) is_i64 i64 unwrap_i64 *e)
        (F32(f32) is_f32 f32 unwrap_f32 f32::from_bits(*e))
        (F64(f64) is_f64 f64 unwrap_f64 f64::from_bits(*e))
        (V128(u128) is_v128 v128 unwrap_v128 *e)
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(val: i32) -> Val {
        Val::I32(val)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(val: i64) -> Val {
        Val::I64(val)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(val: f32) -> Val {
        Val::F32(val.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(val: f64) -> Val {
        Val::F64(val.to_bits())
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "{v}"),
            Val::I64(v) => write!(f, "{v}"),
            Val::F32(bits) => write!(f, "{:?}", f32::from_bits(*bits)),
            Val::F64(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Val::V128(v) => write!(f, "0x{v:032x}"),
        }
    }
}

/// Untyped 16-byte value slot used by the execution engine. The static type
/// discipline of validated code makes the accessors safe to pair up.
///
/// Public only because the typed host-function traits mention it; it is not
/// part of the supported API surface.
#[doc(hidden)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VMVal {
    bits: u128,
}

impl VMVal {
    #[inline]
    pub fn zero() -> Self {
        Self { bits: 0 }
    }

    #[inline]
    pub fn i32(v: i32) -> Self {
        Self {
            bits: u128::from(v as u32),
        }
    }

    #[inline]
    pub fn i64(v: i64) -> Self {
        Self {
            bits: u128::from(v as u64),
        }
    }

    #[inline]
    pub fn f32(bits: u32) -> Self {
        Self {
            bits: u128::from(bits),
        }
    }

    #[inline]
    pub fn f64(bits: u64) -> Self {
        Self {
            bits: u128::from(bits),
        }
    }

    #[inline]
    pub fn v128(v: u128) -> Self {
        Self { bits: v }
    }

    #[inline]
    pub fn get_i32(self) -> i32 {
        self.bits as u32 as i32
    }

    #[inline]
    pub fn get_u32(self) -> u32 {
        self.bits as u32
    }

    #[inline]
    pub fn get_i64(self) -> i64 {
        self.bits as u64 as i64
    }

    #[inline]
    pub fn get_u64(self) -> u64 {
        self.bits as u64
    }

    #[inline]
    pub fn get_f32_bits(self) -> u32 {
        self.bits as u32
    }

    #[inline]
    pub fn get_f64_bits(self) -> u64 {
        self.bits as u64
    }

    #[inline]
    pub fn get_f32(self) -> f32 {
        f32::from_bits(self.get_f32_bits())
    }

    #[inline]
    pub fn get_f64(self) -> f64 {
        f64::from_bits(self.get_f64_bits())
    }

    #[inline]
    pub fn get_v128(self) -> u128 {
        self.bits
    }
}

impl fmt::Debug for VMVal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VMVal(0x{:032x})", self.bits)
    }
}
