//! Lane-wise execution of the v128 operator set. A `v128` travels as a
//! little-endian `u128`; each shape view is a plain array conversion.

use super::numeric::{wasm_fmax32, wasm_fmax64, wasm_fmin32, wasm_fmin64};
use super::{Executor, Unwind};
use crate::translate::Operator;
use crate::values::VMVal;
use core::array;

fn i8x16(v: u128) -> [i8; 16] {
    v.to_le_bytes().map(|b| b as i8)
}

fn from_i8x16(lanes: [i8; 16]) -> u128 {
    u128::from_le_bytes(lanes.map(|x| x as u8))
}

fn i16x8(v: u128) -> [i16; 8] {
    let bytes = v.to_le_bytes();
    array::from_fn(|i| i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]))
}

fn from_i16x8(lanes: [i16; 8]) -> u128 {
    let mut bytes = [0_u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[2 * i..2 * i + 2].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(bytes)
}

fn i32x4(v: u128) -> [i32; 4] {
    let bytes = v.to_le_bytes();
    array::from_fn(|i| {
        i32::from_le_bytes(bytes[4 * i..4 * i + 4].try_into().expect("lane width"))
    })
}

fn from_i32x4(lanes: [i32; 4]) -> u128 {
    let mut bytes = [0_u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[4 * i..4 * i + 4].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(bytes)
}

fn i64x2(v: u128) -> [i64; 2] {
    let bytes = v.to_le_bytes();
    array::from_fn(|i| {
        i64::from_le_bytes(bytes[8 * i..8 * i + 8].try_into().expect("lane width"))
    })
}

fn from_i64x2(lanes: [i64; 2]) -> u128 {
    let mut bytes = [0_u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[8 * i..8 * i + 8].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(bytes)
}

fn f32x4(v: u128) -> [f32; 4] {
    i32x4(v).map(|bits| f32::from_bits(bits as u32))
}

fn from_f32x4(lanes: [f32; 4]) -> u128 {
    from_i32x4(lanes.map(|x| x.to_bits() as i32))
}

fn f64x2(v: u128) -> [f64; 2] {
    i64x2(v).map(|bits| f64::from_bits(bits as u64))
}

fn from_f64x2(lanes: [f64; 2]) -> u128 {
    from_i64x2(lanes.map(|x| x.to_bits() as i64))
}

fn map2<T: Copy, const N: usize>(a: [T; N], b: [T; N], f: impl Fn(T, T) -> T) -> [T; N] {
    array::from_fn(|i| f(a[i], b[i]))
}

fn sel<T>(cond: bool, t: T, f: T) -> T {
    if cond {
        t
    } else {
        f
    }
}

impl Executor<'_> {
    fn pop_v(&mut self) -> u128 {
        self.pop().get_v128()
    }

    fn push_v(&mut self, v: u128) {
        self.push(VMVal::v128(v));
    }

    fn v_binop(&mut self, f: impl FnOnce(u128, u128) -> u128) {
        let b = self.pop_v();
        let a = self.pop_v();
        self.push_v(f(a, b));
    }

    fn v_unop(&mut self, f: impl FnOnce(u128) -> u128) {
        let a = self.pop_v();
        self.push_v(f(a));
    }

    fn v_shift(&mut self, f: impl FnOnce(u128, u32) -> u128) {
        let count = self.pop().get_u32();
        let a = self.pop_v();
        self.push_v(f(a, count));
    }

    fn v_test(&mut self, f: impl FnOnce(u128) -> bool) {
        let a = self.pop_v();
        self.push(VMVal::i32(i32::from(f(a))));
    }

    fn v_mask(&mut self, f: impl FnOnce(u128) -> i32) {
        let a = self.pop_v();
        self.push(VMVal::i32(f(a)));
    }

    #[allow(clippy::too_many_lines)]
    pub(super) fn simd_op(&mut self, op: &Operator) -> Result<(), Unwind> {
        use Operator as O;

        match op {
            O::I8x16Shuffle { lanes } => {
                let b = self.pop_v().to_le_bytes();
                let a = self.pop_v().to_le_bytes();
                let lanes = lanes.0;
                let out: [u8; 16] = array::from_fn(|i| {
                    let lane = lanes[i] as usize;
                    if lane < 16 {
                        a[lane]
                    } else {
                        b[lane - 16]
                    }
                });
                self.push_v(u128::from_le_bytes(out));
            }
            O::I8x16Swizzle {} => {
                let selector = self.pop_v().to_le_bytes();
                let a = self.pop_v().to_le_bytes();
                let out: [u8; 16] = array::from_fn(|i| {
                    let lane = selector[i] as usize;
                    if lane < 16 {
                        a[lane]
                    } else {
                        0
                    }
                });
                self.push_v(u128::from_le_bytes(out));
            }

            O::I8x16Splat {} => {
                let x = self.pop().get_i32() as i8;
                self.push_v(from_i8x16([x; 16]));
            }
            O::I16x8Splat {} => {
                let x = self.pop().get_i32() as i16;
                self.push_v(from_i16x8([x; 8]));
            }
            O::I32x4Splat {} => {
                let x = self.pop().get_i32();
                self.push_v(from_i32x4([x; 4]));
            }
            O::I64x2Splat {} => {
                let x = self.pop().get_i64();
                self.push_v(from_i64x2([x; 2]));
            }
            O::F32x4Splat {} => {
                let x = self.pop().get_f32();
                self.push_v(from_f32x4([x; 4]));
            }
            O::F64x2Splat {} => {
                let x = self.pop().get_f64();
                self.push_v(from_f64x2([x; 2]));
            }

            O::I8x16ExtractLaneS { lane } => {
                let v = i8x16(self.pop_v());
                self.push(VMVal::i32(i32::from(v[lane.0 as usize])));
            }
            O::I8x16ExtractLaneU { lane } => {
                let v = i8x16(self.pop_v());
                self.push(VMVal::i32(i32::from(v[lane.0 as usize] as u8)));
            }
            O::I8x16ReplaceLane { lane } => {
                let x = self.pop().get_i32() as i8;
                let mut v = i8x16(self.pop_v());
                v[lane.0 as usize] = x;
                self.push_v(from_i8x16(v));
            }
            O::I16x8ExtractLaneS { lane } => {
                let v = i16x8(self.pop_v());
                self.push(VMVal::i32(i32::from(v[lane.0 as usize])));
            }
            O::I16x8ExtractLaneU { lane } => {
                let v = i16x8(self.pop_v());
                self.push(VMVal::i32(i32::from(v[lane.0 as usize] as u16)));
            }
            O::I16x8ReplaceLane { lane } => {
                let x = self.pop().get_i32() as i16;
                let mut v = i16x8(self.pop_v());
                v[lane.0 as usize] = x;
                self.push_v(from_i16x8(v));
            }
            O::I32x4ExtractLane { lane } => {
                let v = i32x4(self.pop_v());
                self.push(VMVal::i32(v[lane.0 as usize]));
            }
            O::I32x4ReplaceLane { lane } => {
                let x = self.pop().get_i32();
                let mut v = i32x4(self.pop_v());
                v[lane.0 as usize] = x;
                self.push_v(from_i32x4(v));
            }
            O::I64x2ExtractLane { lane } => {
                let v = i64x2(self.pop_v());
                self.push(VMVal::i64(v[lane.0 as usize]));
            }
            O::I64x2ReplaceLane { lane } => {
                let x = self.pop().get_i64();
                let mut v = i64x2(self.pop_v());
                v[lane.0 as usize] = x;
                self.push_v(from_i64x2(v));
            }
            O::F32x4ExtractLane { lane } => {
                let v = f32x4(self.pop_v());
                self.push(VMVal::f32(v[lane.0 as usize].to_bits()));
            }
            O::F32x4ReplaceLane { lane } => {
                let x = self.pop().get_f32();
                let mut v = f32x4(self.pop_v());
                v[lane.0 as usize] = x;
                self.push_v(from_f32x4(v));
            }
            O::F64x2ExtractLane { lane } => {
                let v = f64x2(self.pop_v());
                self.push(VMVal::f64(v[lane.0 as usize].to_bits()));
            }
            O::F64x2ReplaceLane { lane } => {
                let x = self.pop().get_f64();
                let mut v = f64x2(self.pop_v());
                v[lane.0 as usize] = x;
                self.push_v(from_f64x2(v));
            }

            // ---- comparisons (lanes become all-ones / all-zeros) ------
            O::I8x16Eq {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x == y, -1, 0)))
            }),
            O::I8x16Ne {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x != y, -1, 0)))
            }),
            O::I8x16LtS {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x < y, -1, 0)))
            }),
            O::I8x16LtU {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel((x as u8) < y as u8, -1, 0)))
            }),
            O::I8x16GtS {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x > y, -1, 0)))
            }),
            O::I8x16GtU {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x as u8 > y as u8, -1, 0)))
            }),
            O::I8x16LeS {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x <= y, -1, 0)))
            }),
            O::I8x16LeU {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x as u8 <= y as u8, -1, 0)))
            }),
            O::I8x16GeS {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x >= y, -1, 0)))
            }),
            O::I8x16GeU {} => self.v_binop(|a, b| {
                from_i8x16(map2(i8x16(a), i8x16(b), |x, y| sel(x as u8 >= y as u8, -1, 0)))
            }),
            O::I16x8Eq {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| sel(x == y, -1, 0)))
            }),
            O::I16x8Ne {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| sel(x != y, -1, 0)))
            }),
            O::I16x8LtS {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| sel(x < y, -1, 0)))
            }),
            O::I16x8LtU {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| {
                    sel((x as u16) < y as u16, -1, 0)
                }))
            }),
            O::I16x8GtS {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| sel(x > y, -1, 0)))
            }),
            O::I16x8GtU {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| sel(x as u16 > y as u16, -1, 0)))
            }),
            O::I16x8LeS {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| sel(x <= y, -1, 0)))
            }),
            O::I16x8LeU {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| {
                    sel(x as u16 <= y as u16, -1, 0)
                }))
            }),
            O::I16x8GeS {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| sel(x >= y, -1, 0)))
            }),
            O::I16x8GeU {} => self.v_binop(|a, b| {
                from_i16x8(map2(i16x8(a), i16x8(b), |x, y| {
                    sel(x as u16 >= y as u16, -1, 0)
                }))
            }),
            O::I32x4Eq {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| sel(x == y, -1, 0)))
            }),
            O::I32x4Ne {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| sel(x != y, -1, 0)))
            }),
            O::I32x4LtS {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| sel(x < y, -1, 0)))
            }),
            O::I32x4LtU {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| {
                    sel((x as u32) < y as u32, -1, 0)
                }))
            }),
            O::I32x4GtS {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| sel(x > y, -1, 0)))
            }),
            O::I32x4GtU {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| sel(x as u32 > y as u32, -1, 0)))
            }),
            O::I32x4LeS {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| sel(x <= y, -1, 0)))
            }),
            O::I32x4LeU {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| {
                    sel(x as u32 <= y as u32, -1, 0)
                }))
            }),
            O::I32x4GeS {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| sel(x >= y, -1, 0)))
            }),
            O::I32x4GeU {} => self.v_binop(|a, b| {
                from_i32x4(map2(i32x4(a), i32x4(b), |x, y| {
                    sel(x as u32 >= y as u32, -1, 0)
                }))
            }),
            O::I64x2Eq {} => self.v_binop(|a, b| {
                from_i64x2(map2(i64x2(a), i64x2(b), |x, y| sel(x == y, -1, 0)))
            }),
            O::I64x2Ne {} => self.v_binop(|a, b| {
                from_i64x2(map2(i64x2(a), i64x2(b), |x, y| sel(x != y, -1, 0)))
            }),
            O::I64x2LtS {} => self.v_binop(|a, b| {
                from_i64x2(map2(i64x2(a), i64x2(b), |x, y| sel(x < y, -1, 0)))
            }),
            O::I64x2GtS {} => self.v_binop(|a, b| {
                from_i64x2(map2(i64x2(a), i64x2(b), |x, y| sel(x > y, -1, 0)))
            }),
            O::I64x2LeS {} => self.v_binop(|a, b| {
                from_i64x2(map2(i64x2(a), i64x2(b), |x, y| sel(x <= y, -1, 0)))
            }),
            O::I64x2GeS {} => self.v_binop(|a, b| {
                from_i64x2(map2(i64x2(a), i64x2(b), |x, y| sel(x >= y, -1, 0)))
            }),
            O::F32x4Eq {} => self.v_binop(|a, b| from_f32_cmp(a, b, |x, y| x == y)),
            O::F32x4Ne {} => self.v_binop(|a, b| from_f32_cmp(a, b, |x, y| x != y)),
            O::F32x4Lt {} => self.v_binop(|a, b| from_f32_cmp(a, b, |x, y| x < y)),
            O::F32x4Gt {} => self.v_binop(|a, b| from_f32_cmp(a, b, |x, y| x > y)),
            O::F32x4Le {} => self.v_binop(|a, b| from_f32_cmp(a, b, |x, y| x <= y)),
            O::F32x4Ge {} => self.v_binop(|a, b| from_f32_cmp(a, b, |x, y| x >= y)),
            O::F64x2Eq {} => self.v_binop(|a, b| from_f64_cmp(a, b, |x, y| x == y)),
            O::F64x2Ne {} => self.v_binop(|a, b| from_f64_cmp(a, b, |x, y| x != y)),
            O::F64x2Lt {} => self.v_binop(|a, b| from_f64_cmp(a, b, |x, y| x < y)),
            O::F64x2Gt {} => self.v_binop(|a, b| from_f64_cmp(a, b, |x, y| x > y)),
            O::F64x2Le {} => self.v_binop(|a, b| from_f64_cmp(a, b, |x, y| x <= y)),
            O::F64x2Ge {} => self.v_binop(|a, b| from_f64_cmp(a, b, |x, y| x >= y)),

            // ---- bitwise ----------------------------------------------
            O::V128Not {} => self.v_unop(|a| !a),
            O::V128And {} => self.v_binop(|a, b| a & b),
            O::V128AndNot {} => self.v_binop(|a, b| a & !b),
            O::V128Or {} => self.v_binop(|a, b| a | b),
            O::V128Xor {} => self.v_binop(|a, b| a ^ b),
            O::V128Bitselect {} => {
                let mask = self.pop_v();
                let b = self.pop_v();
                let a = self.pop_v();
                self.push_v((a & mask) | (b & !mask));
            }
            O::V128AnyTrue {} => self.v_test(|a| a != 0),

            // ---- integer lanes ----------------------------------------
            O::I8x16Abs {} => self.v_unop(|a| from_i8x16(i8x16(a).map(i8::wrapping_abs))),
            O::I8x16Neg {} => self.v_unop(|a| from_i8x16(i8x16(a).map(i8::wrapping_neg))),
            O::I8x16AllTrue {} => self.v_test(|a| i8x16(a).iter().all(|x| *x != 0)),
            O::I8x16Bitmask {} => self.v_mask(|a| {
                i8x16(a)
                    .iter()
                    .enumerate()
                    .fold(0, |acc, (i, x)| acc | (i32::from(*x < 0) << i))
            }),
            O::I8x16Shl {} => self.v_shift(|a, k| {
                from_i8x16(i8x16(a).map(|x| ((x as u8) << (k % 8)) as i8))
            }),
            O::I8x16ShrS {} => self.v_shift(|a, k| from_i8x16(i8x16(a).map(|x| x >> (k % 8)))),
            O::I8x16ShrU {} => self.v_shift(|a, k| {
                from_i8x16(i8x16(a).map(|x| ((x as u8) >> (k % 8)) as i8))
            }),
            O::I8x16Add {} => {
                self.v_binop(|a, b| from_i8x16(map2(i8x16(a), i8x16(b), i8::wrapping_add)));
            }
            O::I8x16Sub {} => {
                self.v_binop(|a, b| from_i8x16(map2(i8x16(a), i8x16(b), i8::wrapping_sub)));
            }

            O::I16x8Abs {} => self.v_unop(|a| from_i16x8(i16x8(a).map(i16::wrapping_abs))),
            O::I16x8Neg {} => self.v_unop(|a| from_i16x8(i16x8(a).map(i16::wrapping_neg))),
            O::I16x8AllTrue {} => self.v_test(|a| i16x8(a).iter().all(|x| *x != 0)),
            O::I16x8Bitmask {} => self.v_mask(|a| {
                i16x8(a)
                    .iter()
                    .enumerate()
                    .fold(0, |acc, (i, x)| acc | (i32::from(*x < 0) << i))
            }),
            O::I16x8Shl {} => self.v_shift(|a, k| {
                from_i16x8(i16x8(a).map(|x| ((x as u16) << (k % 16)) as i16))
            }),
            O::I16x8ShrS {} => self.v_shift(|a, k| from_i16x8(i16x8(a).map(|x| x >> (k % 16)))),
            O::I16x8ShrU {} => self.v_shift(|a, k| {
                from_i16x8(i16x8(a).map(|x| ((x as u16) >> (k % 16)) as i16))
            }),
            O::I16x8Add {} => {
                self.v_binop(|a, b| from_i16x8(map2(i16x8(a), i16x8(b), i16::wrapping_add)));
            }
            O::I16x8Sub {} => {
                self.v_binop(|a, b| from_i16x8(map2(i16x8(a), i16x8(b), i16::wrapping_sub)));
            }
            O::I16x8Mul {} => {
                self.v_binop(|a, b| from_i16x8(map2(i16x8(a), i16x8(b), i16::wrapping_mul)));
            }

            O::I32x4Abs {} => self.v_unop(|a| from_i32x4(i32x4(a).map(i32::wrapping_abs))),
            O::I32x4Neg {} => self.v_unop(|a| from_i32x4(i32x4(a).map(i32::wrapping_neg))),
            O::I32x4AllTrue {} => self.v_test(|a| i32x4(a).iter().all(|x| *x != 0)),
            O::I32x4Bitmask {} => self.v_mask(|a| {
                i32x4(a)
                    .iter()
                    .enumerate()
                    .fold(0, |acc, (i, x)| acc | (i32::from(*x < 0) << i))
            }),
            O::I32x4Shl {} => self.v_shift(|a, k| {
                from_i32x4(i32x4(a).map(|x| x.wrapping_shl(k % 32)))
            }),
            O::I32x4ShrS {} => self.v_shift(|a, k| {
                from_i32x4(i32x4(a).map(|x| x.wrapping_shr(k % 32)))
            }),
            O::I32x4ShrU {} => self.v_shift(|a, k| {
                from_i32x4(i32x4(a).map(|x| ((x as u32).wrapping_shr(k % 32)) as i32))
            }),
            O::I32x4Add {} => {
                self.v_binop(|a, b| from_i32x4(map2(i32x4(a), i32x4(b), i32::wrapping_add)));
            }
            O::I32x4Sub {} => {
                self.v_binop(|a, b| from_i32x4(map2(i32x4(a), i32x4(b), i32::wrapping_sub)));
            }
            O::I32x4Mul {} => {
                self.v_binop(|a, b| from_i32x4(map2(i32x4(a), i32x4(b), i32::wrapping_mul)));
            }

            O::I64x2Abs {} => self.v_unop(|a| from_i64x2(i64x2(a).map(i64::wrapping_abs))),
            O::I64x2Neg {} => self.v_unop(|a| from_i64x2(i64x2(a).map(i64::wrapping_neg))),
            O::I64x2AllTrue {} => self.v_test(|a| i64x2(a).iter().all(|x| *x != 0)),
            O::I64x2Bitmask {} => self.v_mask(|a| {
                i64x2(a)
                    .iter()
                    .enumerate()
                    .fold(0, |acc, (i, x)| acc | (i32::from(*x < 0) << i))
            }),
            O::I64x2Shl {} => self.v_shift(|a, k| {
                from_i64x2(i64x2(a).map(|x| x.wrapping_shl(k % 64)))
            }),
            O::I64x2ShrS {} => self.v_shift(|a, k| {
                from_i64x2(i64x2(a).map(|x| x.wrapping_shr(k % 64)))
            }),
            O::I64x2ShrU {} => self.v_shift(|a, k| {
                from_i64x2(i64x2(a).map(|x| ((x as u64).wrapping_shr(k % 64)) as i64))
            }),
            O::I64x2Add {} => {
                self.v_binop(|a, b| from_i64x2(map2(i64x2(a), i64x2(b), i64::wrapping_add)));
            }
            O::I64x2Sub {} => {
                self.v_binop(|a, b| from_i64x2(map2(i64x2(a), i64x2(b), i64::wrapping_sub)));
            }
            O::I64x2Mul {} => {
                self.v_binop(|a, b| from_i64x2(map2(i64x2(a), i64x2(b), i64::wrapping_mul)));
            }

            // ---- float lanes ------------------------------------------
            O::F32x4Abs {} => self.v_unop(|a| from_f32x4(f32x4(a).map(f32::abs))),
            O::F32x4Neg {} => self.v_unop(|a| from_f32x4(f32x4(a).map(|x| -x))),
            O::F32x4Sqrt {} => self.v_unop(|a| from_f32x4(f32x4(a).map(f32::sqrt))),
            O::F32x4Add {} => {
                self.v_binop(|a, b| from_f32x4(map2(f32x4(a), f32x4(b), |x, y| x + y)));
            }
            O::F32x4Sub {} => {
                self.v_binop(|a, b| from_f32x4(map2(f32x4(a), f32x4(b), |x, y| x - y)));
            }
            O::F32x4Mul {} => {
                self.v_binop(|a, b| from_f32x4(map2(f32x4(a), f32x4(b), |x, y| x * y)));
            }
            O::F32x4Div {} => {
                self.v_binop(|a, b| from_f32x4(map2(f32x4(a), f32x4(b), |x, y| x / y)));
            }
            O::F32x4Min {} => {
                self.v_binop(|a, b| from_f32x4(map2(f32x4(a), f32x4(b), wasm_fmin32)));
            }
            O::F32x4Max {} => {
                self.v_binop(|a, b| from_f32x4(map2(f32x4(a), f32x4(b), wasm_fmax32)));
            }
            O::F64x2Abs {} => self.v_unop(|a| from_f64x2(f64x2(a).map(f64::abs))),
            O::F64x2Neg {} => self.v_unop(|a| from_f64x2(f64x2(a).map(|x| -x))),
            O::F64x2Sqrt {} => self.v_unop(|a| from_f64x2(f64x2(a).map(f64::sqrt))),
            O::F64x2Add {} => {
                self.v_binop(|a, b| from_f64x2(map2(f64x2(a), f64x2(b), |x, y| x + y)));
            }
            O::F64x2Sub {} => {
                self.v_binop(|a, b| from_f64x2(map2(f64x2(a), f64x2(b), |x, y| x - y)));
            }
            O::F64x2Mul {} => {
                self.v_binop(|a, b| from_f64x2(map2(f64x2(a), f64x2(b), |x, y| x * y)));
            }
            O::F64x2Div {} => {
                self.v_binop(|a, b| from_f64x2(map2(f64x2(a), f64x2(b), |x, y| x / y)));
            }
            O::F64x2Min {} => {
                self.v_binop(|a, b| from_f64x2(map2(f64x2(a), f64x2(b), wasm_fmin64)));
            }
            O::F64x2Max {} => {
                self.v_binop(|a, b| from_f64x2(map2(f64x2(a), f64x2(b), wasm_fmax64)));
            }

            // ---- conversions ------------------------------------------
            O::I32x4TruncSatF32x4S {} => {
                self.v_unop(|a| from_i32x4(f32x4(a).map(|x| x as i32)));
            }
            O::I32x4TruncSatF32x4U {} => {
                self.v_unop(|a| from_i32x4(f32x4(a).map(|x| x as u32 as i32)));
            }
            O::F32x4ConvertI32x4S {} => {
                self.v_unop(|a| from_f32x4(i32x4(a).map(|x| x as f32)));
            }
            O::F32x4ConvertI32x4U {} => {
                self.v_unop(|a| from_f32x4(i32x4(a).map(|x| (x as u32) as f32)));
            }

            other => unreachable!("`{}` is handled elsewhere", other.name()),
        }
        Ok(())
    }
}

fn from_f32_cmp(a: u128, b: u128, f: impl Fn(f32, f32) -> bool) -> u128 {
    from_i32x4(map2_cmp(f32x4(a), f32x4(b), f))
}

fn from_f64_cmp(a: u128, b: u128, f: impl Fn(f64, f64) -> bool) -> u128 {
    from_i64x2(map2_cmp64(f64x2(a), f64x2(b), f))
}

fn map2_cmp(a: [f32; 4], b: [f32; 4], f: impl Fn(f32, f32) -> bool) -> [i32; 4] {
    array::from_fn(|i| if f(a[i], b[i]) { -1 } else { 0 })
}

fn map2_cmp64(a: [f64; 2], b: [f64; 2], f: impl Fn(f64, f64) -> bool) -> [i64; 2] {
    array::from_fn(|i| if f(a[i], b[i]) { -1 } else { 0 })
}
