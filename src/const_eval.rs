use crate::compartment::Compartment;
use crate::errors::Error;
use crate::global::Global;
use crate::indices::GlobalIndex;
use crate::translate::{ConstExpr, ConstOp};
use crate::values::VMVal;
use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

/// Evaluates constant initializer expressions at instantiation time.
///
/// `global.get` resolves against the globals already bound into the instance
/// being built, which at that point are exactly the imported ones.
#[derive(Debug, Default)]
pub struct ConstExprEvaluator {
    stack: SmallVec<[VMVal; 2]>,
}

impl ConstExprEvaluator {
    pub(crate) fn eval(
        &mut self,
        compartment: &Compartment,
        globals: &PrimaryMap<GlobalIndex, Global>,
        expr: &ConstExpr,
    ) -> crate::Result<VMVal> {
        for op in expr.ops() {
            match op {
                ConstOp::I32Const(value) => self.stack.push(VMVal::i32(*value)),
                ConstOp::I64Const(value) => self.stack.push(VMVal::i64(*value)),
                ConstOp::F32Const(bits) => self.stack.push(VMVal::f32(*bits)),
                ConstOp::F64Const(bits) => self.stack.push(VMVal::f64(*bits)),
                ConstOp::V128Const(value) => self.stack.push(VMVal::v128(*value)),
                ConstOp::GlobalGet(index) => {
                    let global = globals
                        .get(*index)
                        .ok_or(Error::Internal("initializer references unbound global"))?;
                    self.stack.push(compartment[global.0].value);
                }
                // Reference constants only occur in element segments, which
                // are resolved without this evaluator.
                ConstOp::RefNull | ConstOp::RefFunc(_) => {
                    return Err(Error::Internal("reference constant in value initializer"))
                }
            }
        }

        debug_assert_eq!(self.stack.len(), 1);
        self.stack
            .pop()
            .ok_or(Error::Internal("empty initializer expression"))
    }
}
