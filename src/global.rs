use crate::compartment::{Compartment, Stored};
use crate::errors::Error;
use crate::types::GlobalType;
use crate::values::{VMVal, Val};
use alloc::format;

#[derive(Debug)]
pub(crate) struct GlobalData {
    pub ty: GlobalType,
    pub value: VMVal,
}

/// A global cell owned by a [`Compartment`].
#[derive(Debug, Clone, Copy)]
pub struct Global(pub(crate) Stored<GlobalData>);

impl Global {
    pub fn new(compartment: &mut Compartment, ty: GlobalType, value: Val) -> crate::Result<Global> {
        if value.ty() != ty.content {
            return Err(Error::validation(format!(
                "global initial value has type {}, expected {}",
                value.ty(),
                ty.content
            )));
        }
        Ok(Global(compartment.push_global(GlobalData {
            ty,
            value: value.as_vmval(),
        })))
    }

    pub fn ty(&self, compartment: &Compartment) -> GlobalType {
        compartment[self.0].ty
    }

    pub fn get(&self, compartment: &Compartment) -> Val {
        let data = &compartment[self.0];
        Val::from_vmval(data.value, data.ty.content)
    }

    pub fn set(&self, compartment: &mut Compartment, value: Val) -> crate::Result<()> {
        let data = &mut compartment[self.0];
        if !data.ty.mutable {
            return Err(Error::validation("cannot set an immutable global"));
        }
        if value.ty() != data.ty.content {
            return Err(Error::validation(format!(
                "value has type {}, global holds {}",
                value.ty(),
                data.ty.content
            )));
        }
        data.value = value.as_vmval();
        Ok(())
    }
}
