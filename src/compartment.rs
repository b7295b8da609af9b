use crate::func::FuncData;
use crate::global::GlobalData;
use crate::instance::InstanceData;
use crate::memory::MemoryData;
use crate::table::TableData;
use crate::tag::TagData;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A typed index into one of a compartment's object vectors.
pub(crate) struct Stored<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Stored<T> {
    fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Stored<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Stored<T> {}
impl<T> PartialEq for Stored<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<T> Eq for Stored<T> {}
impl<T> fmt::Debug for Stored<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Stored({})", self.index)
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub(crate) usize);

/// Requesting termination from another thread while guest code runs inside
/// the compartment. The guest traps at its next branch or call boundary.
#[derive(Debug, Clone)]
pub struct TerminationSignal(Arc<AtomicBool>);

impl TerminationSignal {
    pub fn terminate(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// The ownership root for all runtime objects: instances, functions, tables,
/// memories, globals and exception tags live here and die with it.
///
/// Compartments also bound the trap domain: traps unwind to the host caller
/// of this compartment and never cross into another one. Distinct
/// compartments are fully isolated and may run in parallel; objects are
/// reached through `&mut Compartment`, so the exclusivity of non-shared
/// objects is enforced by ownership rather than by a runtime detector.
#[derive(Default)]
pub struct Compartment {
    pub(crate) instances: Vec<InstanceData>,
    pub(crate) funcs: Vec<FuncData>,
    pub(crate) tables: Vec<TableData>,
    pub(crate) memories: Vec<MemoryData>,
    pub(crate) globals: Vec<GlobalData>,
    pub(crate) tags: Vec<TagData>,
    terminated: Arc<AtomicBool>,
    /// Guest frames currently live across all nested entries.
    pub(crate) call_depth: usize,
}

impl Compartment {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle other threads can use to cancel guest code running here.
    pub fn termination_signal(&self) -> TerminationSignal {
        TerminationSignal(self.terminated.clone())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }

    pub(crate) fn push_func(&mut self, data: FuncData) -> Stored<FuncData> {
        self.funcs.push(data);
        Stored::new(self.funcs.len() - 1)
    }

    pub(crate) fn push_table(&mut self, data: TableData) -> Stored<TableData> {
        self.tables.push(data);
        Stored::new(self.tables.len() - 1)
    }

    pub(crate) fn push_memory(&mut self, data: MemoryData) -> Stored<MemoryData> {
        self.memories.push(data);
        Stored::new(self.memories.len() - 1)
    }

    pub(crate) fn push_global(&mut self, data: GlobalData) -> Stored<GlobalData> {
        self.globals.push(data);
        Stored::new(self.globals.len() - 1)
    }

    pub(crate) fn push_tag(&mut self, data: TagData) -> Stored<TagData> {
        self.tags.push(data);
        Stored::new(self.tags.len() - 1)
    }

    pub(crate) fn push_instance(&mut self, data: InstanceData) -> InstanceHandle {
        self.instances.push(data);
        InstanceHandle(self.instances.len() - 1)
    }

    /// The handle the next [`push_instance`](Self::push_instance) returns;
    /// instantiation creates function objects that point back at their
    /// instance before the instance itself exists.
    pub(crate) fn next_instance_handle(&self) -> InstanceHandle {
        InstanceHandle(self.instances.len())
    }

    pub(crate) fn instance_data(&self, handle: InstanceHandle) -> &InstanceData {
        &self.instances[handle.0]
    }

    pub(crate) fn instance_data_mut(&mut self, handle: InstanceHandle) -> &mut InstanceData {
        &mut self.instances[handle.0]
    }

    /// Instantiation is all-or-nothing: a failure rolls every vector back to
    /// the sizes captured before it started.
    pub(crate) fn marks(&self) -> Marks {
        Marks {
            instances: self.instances.len(),
            funcs: self.funcs.len(),
            tables: self.tables.len(),
            memories: self.memories.len(),
            globals: self.globals.len(),
            tags: self.tags.len(),
        }
    }

    pub(crate) fn rollback(&mut self, marks: &Marks) {
        self.instances.truncate(marks.instances);
        self.funcs.truncate(marks.funcs);
        self.tables.truncate(marks.tables);
        self.memories.truncate(marks.memories);
        self.globals.truncate(marks.globals);
        self.tags.truncate(marks.tags);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Marks {
    instances: usize,
    funcs: usize,
    tables: usize,
    memories: usize,
    globals: usize,
    tags: usize,
}

macro_rules! impl_compartment_index {
    ($($field:ident: $ty:ty),* $(,)?) => {$(
        impl Index<Stored<$ty>> for Compartment {
            type Output = $ty;
            #[inline]
            fn index(&self, stored: Stored<$ty>) -> &$ty {
                &self.$field[stored.index]
            }
        }
        impl IndexMut<Stored<$ty>> for Compartment {
            #[inline]
            fn index_mut(&mut self, stored: Stored<$ty>) -> &mut $ty {
                &mut self.$field[stored.index]
            }
        }
    )*};
}

impl_compartment_index! {
    funcs: FuncData,
    tables: TableData,
    memories: MemoryData,
    globals: GlobalData,
    tags: TagData,
}
