//! Scalar operator execution: constants, comparisons, integer and float
//! arithmetic, and the conversion matrix. Trap-free operators funnel through
//! tiny monomorphised helpers; the trapping ones (division, checked
//! truncation) are spelled out.

use super::{Executor, Unwind};
use crate::translate::Operator;
use crate::trap::TrapKind;
use crate::values::VMVal;

// Truncate a float to an integer, trapping on NaN and on out-of-range per
// the non-saturating conversion semantics.
macro_rules! trunc {
    ($self:ident, $get:ident, $min:expr, $max:expr, $cvt:expr) => {{
        let x = $self.pop().$get();
        if x.is_nan() {
            return Err($self.trap(TrapKind::InvalidFloatConversion, "NaN cannot be converted"));
        }
        let t = x.trunc();
        if !(t >= $min && t < $max) {
            return Err($self.trap(TrapKind::IntegerOverflow, "float value out of integer range"));
        }
        $self.push($cvt(t));
    }};
}

impl Executor<'_> {
    #[allow(clippy::too_many_lines)]
    pub(super) fn numeric_or_simd(&mut self, op: &Operator) -> Result<(), Unwind> {
        use Operator as O;

        match op {
            O::I32Const { value } => self.push(VMVal::i32(*value)),
            O::I64Const { value } => self.push(VMVal::i64(*value)),
            O::F32Const { value } => self.push(VMVal::f32(value.0)),
            O::F64Const { value } => self.push(VMVal::f64(value.0)),
            O::V128Const { value } => self.push(VMVal::v128(value.0)),

            // ---- i32 comparisons --------------------------------------
            O::I32Eqz {} => {
                let a = self.pop().get_i32();
                self.push_bool(a == 0);
            }
            O::I32Eq {} => self.cmp_i32(|a, b| a == b),
            O::I32Ne {} => self.cmp_i32(|a, b| a != b),
            O::I32LtS {} => self.cmp_i32(|a, b| a < b),
            O::I32LtU {} => self.cmp_u32(|a, b| a < b),
            O::I32GtS {} => self.cmp_i32(|a, b| a > b),
            O::I32GtU {} => self.cmp_u32(|a, b| a > b),
            O::I32LeS {} => self.cmp_i32(|a, b| a <= b),
            O::I32LeU {} => self.cmp_u32(|a, b| a <= b),
            O::I32GeS {} => self.cmp_i32(|a, b| a >= b),
            O::I32GeU {} => self.cmp_u32(|a, b| a >= b),

            // ---- i64 comparisons --------------------------------------
            O::I64Eqz {} => {
                let a = self.pop().get_i64();
                self.push_bool(a == 0);
            }
            O::I64Eq {} => self.cmp_i64(|a, b| a == b),
            O::I64Ne {} => self.cmp_i64(|a, b| a != b),
            O::I64LtS {} => self.cmp_i64(|a, b| a < b),
            O::I64LtU {} => self.cmp_u64(|a, b| a < b),
            O::I64GtS {} => self.cmp_i64(|a, b| a > b),
            O::I64GtU {} => self.cmp_u64(|a, b| a > b),
            O::I64LeS {} => self.cmp_i64(|a, b| a <= b),
            O::I64LeU {} => self.cmp_u64(|a, b| a <= b),
            O::I64GeS {} => self.cmp_i64(|a, b| a >= b),
            O::I64GeU {} => self.cmp_u64(|a, b| a >= b),

            // ---- float comparisons ------------------------------------
            O::F32Eq {} => self.cmp_f32(|a, b| a == b),
            O::F32Ne {} => self.cmp_f32(|a, b| a != b),
            O::F32Lt {} => self.cmp_f32(|a, b| a < b),
            O::F32Gt {} => self.cmp_f32(|a, b| a > b),
            O::F32Le {} => self.cmp_f32(|a, b| a <= b),
            O::F32Ge {} => self.cmp_f32(|a, b| a >= b),
            O::F64Eq {} => self.cmp_f64(|a, b| a == b),
            O::F64Ne {} => self.cmp_f64(|a, b| a != b),
            O::F64Lt {} => self.cmp_f64(|a, b| a < b),
            O::F64Gt {} => self.cmp_f64(|a, b| a > b),
            O::F64Le {} => self.cmp_f64(|a, b| a <= b),
            O::F64Ge {} => self.cmp_f64(|a, b| a >= b),

            // ---- i32 arithmetic ---------------------------------------
            O::I32Clz {} => self.unop_i32(|a| a.leading_zeros() as i32),
            O::I32Ctz {} => self.unop_i32(|a| a.trailing_zeros() as i32),
            O::I32Popcnt {} => self.unop_i32(|a| a.count_ones() as i32),
            O::I32Add {} => self.binop_i32(i32::wrapping_add),
            O::I32Sub {} => self.binop_i32(i32::wrapping_sub),
            O::I32Mul {} => self.binop_i32(i32::wrapping_mul),
            O::I32DivS {} => {
                let b = self.pop().get_i32();
                let a = self.pop().get_i32();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                if a == i32::MIN && b == -1 {
                    return Err(self.trap(TrapKind::IntegerOverflow, "i32.div_s overflow"));
                }
                self.push(VMVal::i32(a.wrapping_div(b)));
            }
            O::I32DivU {} => {
                let b = self.pop().get_u32();
                let a = self.pop().get_u32();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                self.push(VMVal::i32((a / b) as i32));
            }
            O::I32RemS {} => {
                let b = self.pop().get_i32();
                let a = self.pop().get_i32();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                self.push(VMVal::i32(a.wrapping_rem(b)));
            }
            O::I32RemU {} => {
                let b = self.pop().get_u32();
                let a = self.pop().get_u32();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                self.push(VMVal::i32((a % b) as i32));
            }
            O::I32And {} => self.binop_i32(|a, b| a & b),
            O::I32Or {} => self.binop_i32(|a, b| a | b),
            O::I32Xor {} => self.binop_i32(|a, b| a ^ b),
            O::I32Shl {} => self.binop_i32(|a, b| a.wrapping_shl(b as u32)),
            O::I32ShrS {} => self.binop_i32(|a, b| a.wrapping_shr(b as u32)),
            O::I32ShrU {} => self.binop_u32(|a, b| a.wrapping_shr(b)),
            O::I32Rotl {} => self.binop_i32(|a, b| a.rotate_left(b as u32 % 32)),
            O::I32Rotr {} => self.binop_i32(|a, b| a.rotate_right(b as u32 % 32)),

            // ---- i64 arithmetic ---------------------------------------
            O::I64Clz {} => self.unop_i64(|a| i64::from(a.leading_zeros())),
            O::I64Ctz {} => self.unop_i64(|a| i64::from(a.trailing_zeros())),
            O::I64Popcnt {} => self.unop_i64(|a| i64::from(a.count_ones())),
            O::I64Add {} => self.binop_i64(i64::wrapping_add),
            O::I64Sub {} => self.binop_i64(i64::wrapping_sub),
            O::I64Mul {} => self.binop_i64(i64::wrapping_mul),
            O::I64DivS {} => {
                let b = self.pop().get_i64();
                let a = self.pop().get_i64();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                if a == i64::MIN && b == -1 {
                    return Err(self.trap(TrapKind::IntegerOverflow, "i64.div_s overflow"));
                }
                self.push(VMVal::i64(a.wrapping_div(b)));
            }
            O::I64DivU {} => {
                let b = self.pop().get_u64();
                let a = self.pop().get_u64();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                self.push(VMVal::i64((a / b) as i64));
            }
            O::I64RemS {} => {
                let b = self.pop().get_i64();
                let a = self.pop().get_i64();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                self.push(VMVal::i64(a.wrapping_rem(b)));
            }
            O::I64RemU {} => {
                let b = self.pop().get_u64();
                let a = self.pop().get_u64();
                if b == 0 {
                    return Err(self.trap(TrapKind::IntegerDivideByZero, ""));
                }
                self.push(VMVal::i64((a % b) as i64));
            }
            O::I64And {} => self.binop_i64(|a, b| a & b),
            O::I64Or {} => self.binop_i64(|a, b| a | b),
            O::I64Xor {} => self.binop_i64(|a, b| a ^ b),
            O::I64Shl {} => self.binop_i64(|a, b| a.wrapping_shl(b as u32)),
            O::I64ShrS {} => self.binop_i64(|a, b| a.wrapping_shr(b as u32)),
            O::I64ShrU {} => self.binop_u64(|a, b| a.wrapping_shr(b as u32)),
            O::I64Rotl {} => self.binop_i64(|a, b| a.rotate_left(b as u32 % 64)),
            O::I64Rotr {} => self.binop_i64(|a, b| a.rotate_right(b as u32 % 64)),

            // ---- f32 arithmetic ---------------------------------------
            O::F32Abs {} => self.unop_f32(f32::abs),
            O::F32Neg {} => self.unop_f32(|a| -a),
            O::F32Ceil {} => self.unop_f32(f32::ceil),
            O::F32Floor {} => self.unop_f32(f32::floor),
            O::F32Trunc {} => self.unop_f32(f32::trunc),
            O::F32Nearest {} => self.unop_f32(f32::round_ties_even),
            O::F32Sqrt {} => self.unop_f32(f32::sqrt),
            O::F32Add {} => self.binop_f32(|a, b| a + b),
            O::F32Sub {} => self.binop_f32(|a, b| a - b),
            O::F32Mul {} => self.binop_f32(|a, b| a * b),
            O::F32Div {} => self.binop_f32(|a, b| a / b),
            O::F32Min {} => self.binop_f32(wasm_fmin32),
            O::F32Max {} => self.binop_f32(wasm_fmax32),
            O::F32Copysign {} => self.binop_f32(f32::copysign),

            // ---- f64 arithmetic ---------------------------------------
            O::F64Abs {} => self.unop_f64(f64::abs),
            O::F64Neg {} => self.unop_f64(|a| -a),
            O::F64Ceil {} => self.unop_f64(f64::ceil),
            O::F64Floor {} => self.unop_f64(f64::floor),
            O::F64Trunc {} => self.unop_f64(f64::trunc),
            O::F64Nearest {} => self.unop_f64(f64::round_ties_even),
            O::F64Sqrt {} => self.unop_f64(f64::sqrt),
            O::F64Add {} => self.binop_f64(|a, b| a + b),
            O::F64Sub {} => self.binop_f64(|a, b| a - b),
            O::F64Mul {} => self.binop_f64(|a, b| a * b),
            O::F64Div {} => self.binop_f64(|a, b| a / b),
            O::F64Min {} => self.binop_f64(wasm_fmin64),
            O::F64Max {} => self.binop_f64(wasm_fmax64),
            O::F64Copysign {} => self.binop_f64(f64::copysign),

            // ---- conversions ------------------------------------------
            O::I32WrapI64 {} => {
                let a = self.pop().get_i64();
                self.push(VMVal::i32(a as i32));
            }
            O::I32TruncF32S {} => {
                trunc!(self, get_f32, -2_147_483_648.0_f32, 2_147_483_648.0_f32, |t| {
                    VMVal::i32(t as i32)
                });
            }
            O::I32TruncF32U {} => {
                trunc!(self, get_f32, 0.0_f32, 4_294_967_296.0_f32, |t| {
                    VMVal::i32(t as u32 as i32)
                });
            }
            O::I32TruncF64S {} => {
                trunc!(self, get_f64, -2_147_483_648.0_f64, 2_147_483_648.0_f64, |t| {
                    VMVal::i32(t as i32)
                });
            }
            O::I32TruncF64U {} => {
                trunc!(self, get_f64, 0.0_f64, 4_294_967_296.0_f64, |t| {
                    VMVal::i32(t as u32 as i32)
                });
            }
            O::I64ExtendI32S {} => {
                let a = self.pop().get_i32();
                self.push(VMVal::i64(i64::from(a)));
            }
            O::I64ExtendI32U {} => {
                let a = self.pop().get_u32();
                self.push(VMVal::i64(i64::from(a)));
            }
            O::I64TruncF32S {} => {
                trunc!(
                    self,
                    get_f32,
                    -9_223_372_036_854_775_808.0_f32,
                    9_223_372_036_854_775_808.0_f32,
                    |t| VMVal::i64(t as i64)
                );
            }
            O::I64TruncF32U {} => {
                trunc!(self, get_f32, 0.0_f32, 18_446_744_073_709_551_616.0_f32, |t| {
                    VMVal::i64(t as u64 as i64)
                });
            }
            O::I64TruncF64S {} => {
                trunc!(
                    self,
                    get_f64,
                    -9_223_372_036_854_775_808.0_f64,
                    9_223_372_036_854_775_808.0_f64,
                    |t| VMVal::i64(t as i64)
                );
            }
            O::I64TruncF64U {} => {
                trunc!(self, get_f64, 0.0_f64, 18_446_744_073_709_551_616.0_f64, |t| {
                    VMVal::i64(t as u64 as i64)
                });
            }
            O::F32ConvertI32S {} => {
                let a = self.pop().get_i32();
                self.push(VMVal::f32((a as f32).to_bits()));
            }
            O::F32ConvertI32U {} => {
                let a = self.pop().get_u32();
                self.push(VMVal::f32((a as f32).to_bits()));
            }
            O::F32ConvertI64S {} => {
                let a = self.pop().get_i64();
                self.push(VMVal::f32((a as f32).to_bits()));
            }
            O::F32ConvertI64U {} => {
                let a = self.pop().get_u64();
                self.push(VMVal::f32((a as f32).to_bits()));
            }
            O::F32DemoteF64 {} => {
                let a = self.pop().get_f64();
                self.push(VMVal::f32((a as f32).to_bits()));
            }
            O::F64ConvertI32S {} => {
                let a = self.pop().get_i32();
                self.push(VMVal::f64(f64::from(a).to_bits()));
            }
            O::F64ConvertI32U {} => {
                let a = self.pop().get_u32();
                self.push(VMVal::f64(f64::from(a).to_bits()));
            }
            O::F64ConvertI64S {} => {
                let a = self.pop().get_i64();
                self.push(VMVal::f64((a as f64).to_bits()));
            }
            O::F64ConvertI64U {} => {
                let a = self.pop().get_u64();
                self.push(VMVal::f64((a as f64).to_bits()));
            }
            O::F64PromoteF32 {} => {
                let a = self.pop().get_f32();
                self.push(VMVal::f64(f64::from(a).to_bits()));
            }
            O::I32ReinterpretF32 {} => {
                let a = self.pop().get_f32_bits();
                self.push(VMVal::i32(a as i32));
            }
            O::I64ReinterpretF64 {} => {
                let a = self.pop().get_f64_bits();
                self.push(VMVal::i64(a as i64));
            }
            O::F32ReinterpretI32 {} => {
                let a = self.pop().get_u32();
                self.push(VMVal::f32(a));
            }
            O::F64ReinterpretI64 {} => {
                let a = self.pop().get_u64();
                self.push(VMVal::f64(a));
            }

            // ---- sign extension ---------------------------------------
            O::I32Extend8S {} => self.unop_i32(|a| i32::from(a as i8)),
            O::I32Extend16S {} => self.unop_i32(|a| i32::from(a as i16)),
            O::I64Extend8S {} => self.unop_i64(|a| i64::from(a as i8)),
            O::I64Extend16S {} => self.unop_i64(|a| i64::from(a as i16)),
            O::I64Extend32S {} => self.unop_i64(|a| i64::from(a as i32)),

            // ---- saturating truncation --------------------------------
            // Rust's `as` casts saturate and map NaN to zero, which is
            // exactly the non-trapping conversion semantics.
            O::I32TruncSatF32S {} => {
                let a = self.pop().get_f32();
                self.push(VMVal::i32(a as i32));
            }
            O::I32TruncSatF32U {} => {
                let a = self.pop().get_f32();
                self.push(VMVal::i32(a as u32 as i32));
            }
            O::I32TruncSatF64S {} => {
                let a = self.pop().get_f64();
                self.push(VMVal::i32(a as i32));
            }
            O::I32TruncSatF64U {} => {
                let a = self.pop().get_f64();
                self.push(VMVal::i32(a as u32 as i32));
            }
            O::I64TruncSatF32S {} => {
                let a = self.pop().get_f32();
                self.push(VMVal::i64(a as i64));
            }
            O::I64TruncSatF32U {} => {
                let a = self.pop().get_f32();
                self.push(VMVal::i64(a as u64 as i64));
            }
            O::I64TruncSatF64S {} => {
                let a = self.pop().get_f64();
                self.push(VMVal::i64(a as i64));
            }
            O::I64TruncSatF64U {} => {
                let a = self.pop().get_f64();
                self.push(VMVal::i64(a as u64 as i64));
            }

            op => return self.simd_op(op),
        }
        Ok(())
    }

    fn push_bool(&mut self, value: bool) {
        self.push(VMVal::i32(i32::from(value)));
    }

    fn cmp_i32(&mut self, f: impl FnOnce(i32, i32) -> bool) {
        let b = self.pop().get_i32();
        let a = self.pop().get_i32();
        self.push_bool(f(a, b));
    }

    fn cmp_u32(&mut self, f: impl FnOnce(u32, u32) -> bool) {
        let b = self.pop().get_u32();
        let a = self.pop().get_u32();
        self.push_bool(f(a, b));
    }

    fn cmp_i64(&mut self, f: impl FnOnce(i64, i64) -> bool) {
        let b = self.pop().get_i64();
        let a = self.pop().get_i64();
        self.push_bool(f(a, b));
    }

    fn cmp_u64(&mut self, f: impl FnOnce(u64, u64) -> bool) {
        let b = self.pop().get_u64();
        let a = self.pop().get_u64();
        self.push_bool(f(a, b));
    }

    fn cmp_f32(&mut self, f: impl FnOnce(f32, f32) -> bool) {
        let b = self.pop().get_f32();
        let a = self.pop().get_f32();
        self.push_bool(f(a, b));
    }

    fn cmp_f64(&mut self, f: impl FnOnce(f64, f64) -> bool) {
        let b = self.pop().get_f64();
        let a = self.pop().get_f64();
        self.push_bool(f(a, b));
    }

    fn unop_i32(&mut self, f: impl FnOnce(i32) -> i32) {
        let a = self.pop().get_i32();
        self.push(VMVal::i32(f(a)));
    }

    fn binop_i32(&mut self, f: impl FnOnce(i32, i32) -> i32) {
        let b = self.pop().get_i32();
        let a = self.pop().get_i32();
        self.push(VMVal::i32(f(a, b)));
    }

    fn binop_u32(&mut self, f: impl FnOnce(u32, u32) -> u32) {
        let b = self.pop().get_u32();
        let a = self.pop().get_u32();
        self.push(VMVal::i32(f(a, b) as i32));
    }

    fn unop_i64(&mut self, f: impl FnOnce(i64) -> i64) {
        let a = self.pop().get_i64();
        self.push(VMVal::i64(f(a)));
    }

    fn binop_i64(&mut self, f: impl FnOnce(i64, i64) -> i64) {
        let b = self.pop().get_i64();
        let a = self.pop().get_i64();
        self.push(VMVal::i64(f(a, b)));
    }

    fn binop_u64(&mut self, f: impl FnOnce(u64, u64) -> u64) {
        let b = self.pop().get_u64();
        let a = self.pop().get_u64();
        self.push(VMVal::i64(f(a, b) as i64));
    }

    fn unop_f32(&mut self, f: impl FnOnce(f32) -> f32) {
        let a = self.pop().get_f32();
        self.push(VMVal::f32(f(a).to_bits()));
    }

    fn binop_f32(&mut self, f: impl FnOnce(f32, f32) -> f32) {
        let b = self.pop().get_f32();
        let a = self.pop().get_f32();
        self.push(VMVal::f32(f(a, b).to_bits()));
    }

    fn unop_f64(&mut self, f: impl FnOnce(f64) -> f64) {
        let a = self.pop().get_f64();
        self.push(VMVal::f64(f(a).to_bits()));
    }

    fn binop_f64(&mut self, f: impl FnOnce(f64, f64) -> f64) {
        let b = self.pop().get_f64();
        let a = self.pop().get_f64();
        self.push(VMVal::f64(f(a, b).to_bits()));
    }
}

// Float min/max per the wasm semantics: NaN if either operand is NaN, and
// the negative zero is the smaller of the two zeros.
pub(super) fn wasm_fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

pub(super) fn wasm_fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

pub(super) fn wasm_fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

pub(super) fn wasm_fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}
