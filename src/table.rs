use crate::compartment::{Compartment, Stored};
use crate::errors::Error;
use crate::func::Func;
use crate::trap::{Trap, TrapKind};
use crate::types::TableType;
use crate::TABLE_MAX;
use alloc::vec;
use alloc::vec::Vec;

/// The storage of one `anyfunc` table: a vector of nullable function
/// references, each slot carrying its signature through the referenced
/// function.
#[derive(Debug)]
pub(crate) struct TableData {
    ty: TableType,
    pub(crate) elements: Vec<Option<Func>>,
}

impl TableData {
    pub fn new(ty: TableType) -> crate::Result<Self> {
        let min = usize::try_from(ty.limits.min).map_err(|_| Error::OutOfMemory)?;
        if min > TABLE_MAX {
            return Err(Error::OutOfMemory);
        }
        Ok(Self {
            ty,
            elements: vec![None; min],
        })
    }

    pub fn ty(&self) -> TableType {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }
}

/// An indirect-call table owned by a [`Compartment`].
#[derive(Debug, Clone, Copy)]
pub struct Table(pub(crate) Stored<TableData>);

impl Table {
    pub fn new(compartment: &mut Compartment, ty: TableType) -> crate::Result<Table> {
        Ok(Table(compartment.push_table(TableData::new(ty)?)))
    }

    pub fn ty(&self, compartment: &Compartment) -> TableType {
        compartment[self.0].ty()
    }

    pub fn size(&self, compartment: &Compartment) -> u64 {
        compartment[self.0].len() as u64
    }

    /// Reads slot `index`; `Some(None)` is an in-bounds null slot.
    pub fn get(&self, compartment: &Compartment, index: u64) -> Option<Option<Func>> {
        let index = usize::try_from(index).ok()?;
        compartment[self.0].elements.get(index).copied()
    }

    pub fn set(
        &self,
        compartment: &mut Compartment,
        index: u64,
        func: Option<Func>,
    ) -> crate::Result<()> {
        let data = &mut compartment[self.0];
        let slot = usize::try_from(index)
            .ok()
            .and_then(|index| data.elements.get_mut(index))
            .ok_or_else(|| {
                Error::Trap(Trap::new(TrapKind::AccessViolation, "out of bounds table access"))
            })?;
        *slot = func;
        Ok(())
    }
}
