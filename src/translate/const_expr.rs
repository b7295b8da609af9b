use crate::errors::Error;
use crate::indices::{FuncIndex, GlobalIndex};
use crate::translate::operators::{HeapType, Ieee32, Ieee64, Operator, OperatorsReader, V128Imm};
use crate::translate::reader::BinaryReader;
use crate::translate::FeatureSpec;
use crate::types::ValType;
use alloc::format;
use alloc::vec::Vec;
use smallvec::SmallVec;

/// A constant initializer expression, evaluated at instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr {
    ops: SmallVec<[ConstOp; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    V128Const(u128),
    GlobalGet(GlobalIndex),
    RefNull,
    RefFunc(FuncIndex),
}

impl ConstExpr {
    pub(crate) fn new(op: ConstOp) -> Self {
        let mut ops = SmallVec::new();
        ops.push(op);
        Self { ops }
    }

    /// Decodes the operator tail of an initializer up to and including its
    /// terminating `end`. Only constant operators are structurally legal
    /// here; the shape restriction (exactly one operator, `global.get` only
    /// of an imported immutable global) is the validator's job.
    pub(crate) fn decode(
        reader: &mut BinaryReader<'_>,
        features: &FeatureSpec,
    ) -> crate::Result<Self> {
        let mut ops = SmallVec::new();
        let mut decoder = OperatorsReader::new(reader, features);
        loop {
            let (op, offset) = decoder.read()?;
            let op = match op {
                Operator::End {} => break,
                Operator::I32Const { value } => ConstOp::I32Const(value),
                Operator::I64Const { value } => ConstOp::I64Const(value),
                Operator::F32Const { value } => ConstOp::F32Const(value.0),
                Operator::F64Const { value } => ConstOp::F64Const(value.0),
                Operator::V128Const { value } => ConstOp::V128Const(value.0),
                Operator::GlobalGet { global } => ConstOp::GlobalGet(global),
                Operator::RefNull { .. } => ConstOp::RefNull,
                Operator::RefFunc { func } => ConstOp::RefFunc(func),
                op => {
                    return Err(Error::malformed(
                        offset,
                        format!("`{}` is not a constant operator", op.name()),
                    ))
                }
            };
            ops.push(op);
        }
        Ok(Self { ops })
    }

    pub fn ops(&self) -> &[ConstOp] {
        &self.ops
    }

    /// The type this expression evaluates to, resolving `global.get` through
    /// the provided lookup.
    pub(crate) fn result_type(&self, global_type: impl Fn(GlobalIndex) -> ValType) -> ValType {
        match self.ops.last() {
            Some(ConstOp::I32Const(_)) => ValType::I32,
            Some(ConstOp::I64Const(_)) => ValType::I64,
            Some(ConstOp::F32Const(_)) => ValType::F32,
            Some(ConstOp::F64Const(_)) => ValType::F64,
            Some(ConstOp::V128Const(_)) => ValType::V128,
            Some(ConstOp::GlobalGet(index)) => global_type(*index),
            // Reference results only ever initialize anyfunc slots.
            Some(ConstOp::RefNull | ConstOp::RefFunc(_)) | None => ValType::Any,
        }
    }

    /// The function this expression references, if it is a `ref.func`.
    pub(crate) fn referenced_func(&self) -> Option<FuncIndex> {
        match self.ops.as_slice() {
            [ConstOp::RefFunc(func)] => Some(*func),
            _ => None,
        }
    }

    pub(crate) fn encode(&self, sink: &mut Vec<u8>) {
        for op in &self.ops {
            op.to_operator().encode(sink);
        }
        Operator::End {}.encode(sink);
    }
}

impl ConstOp {
    pub(crate) fn to_operator(self) -> Operator {
        match self {
            ConstOp::I32Const(value) => Operator::I32Const { value },
            ConstOp::I64Const(value) => Operator::I64Const { value },
            ConstOp::F32Const(bits) => Operator::F32Const { value: Ieee32(bits) },
            ConstOp::F64Const(bits) => Operator::F64Const { value: Ieee64(bits) },
            ConstOp::V128Const(bits) => Operator::V128Const {
                value: V128Imm(bits),
            },
            ConstOp::GlobalGet(global) => Operator::GlobalGet { global },
            ConstOp::RefNull => Operator::RefNull { ty: HeapType::Func },
            ConstOp::RefFunc(func) => Operator::RefFunc { func },
        }
    }
}
