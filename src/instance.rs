use crate::compartment::{Compartment, InstanceHandle};
use crate::const_eval::ConstExprEvaluator;
use crate::errors::Error;
use crate::func::{Func, FuncData, FuncKind};
use crate::global::{Global, GlobalData};
use crate::indices::{
    DataIndex, DefinedFuncIndex, ElemIndex, EntityIndex, FuncIndex, GlobalIndex, MemoryIndex,
    TableIndex, TagIndex,
};
use crate::linker::Extern;
use crate::memory::Memory;
use crate::module::Module;
use crate::table::Table;
use crate::tag::Tag;
use crate::trap::{Trap, TrapKind};
use crate::translate::{DataKind, ElementKind};
use alloc::format;
use alloc::string::String;
use cranelift_entity::PrimaryMap;
use hashbrown::HashSet;

/// The concrete objects backing one instantiated module: every index space
/// resolved to compartment handles, imported slots first.
#[derive(Debug)]
pub(crate) struct InstanceData {
    pub module: Module,
    pub funcs: PrimaryMap<FuncIndex, Func>,
    pub tables: PrimaryMap<TableIndex, Table>,
    pub memories: PrimaryMap<MemoryIndex, Memory>,
    pub globals: PrimaryMap<GlobalIndex, Global>,
    pub tags: PrimaryMap<TagIndex, Tag>,
    pub dropped_elements: HashSet<ElemIndex>,
    pub dropped_data: HashSet<DataIndex>,
}

/// An instantiated module bound to its [`Compartment`] for life.
#[derive(Debug, Clone, Copy)]
pub struct Instance(pub(crate) InstanceHandle);

impl Instance {
    /// Runs the instantiation protocol. Either a ready instance comes back
    /// or the compartment is left exactly as it was.
    pub(crate) fn new_internal(
        compartment: &mut Compartment,
        module: &Module,
        imports: &[Extern],
    ) -> crate::Result<Instance> {
        let marks = compartment.marks();
        match Self::build(compartment, module, imports) {
            Ok(instance) => Ok(instance),
            Err(err) => {
                tracing::debug!("instantiation failed, rolling back: {err}");
                compartment.rollback(&marks);
                Err(err)
            }
        }
    }

    fn build(
        compartment: &mut Compartment,
        module: &Module,
        imports: &[Extern],
    ) -> crate::Result<Instance> {
        let translated = module.translated();
        let handle = compartment.next_instance_handle();

        let mut funcs = PrimaryMap::with_capacity(translated.functions.len());
        let mut tables = PrimaryMap::with_capacity(translated.tables.len());
        let mut memories = PrimaryMap::with_capacity(translated.memories.len());
        let mut globals = PrimaryMap::with_capacity(translated.globals.len());
        let mut tags = PrimaryMap::with_capacity(translated.tags.len());

        // Imports were resolved by the linker; check each against its
        // declared type and bind it into the matching index space.
        if imports.len() != translated.imports.len() {
            return Err(Error::Link(format!(
                "expected {} imports, got {}",
                translated.imports.len(),
                imports.len()
            )));
        }
        for (import, provided) in translated.imports.iter().zip(imports) {
            let declared = translated.type_of(import.index);
            let actual = provided.ty(compartment);
            if !actual.satisfies(&declared) {
                return Err(Error::Link(format!(
                    "incompatible import type for {}::{}: {} provided where {} expected",
                    import.module,
                    import.name,
                    actual.desc(),
                    declared.desc(),
                )));
            }
            match provided {
                Extern::Func(func) => {
                    funcs.push(*func);
                }
                Extern::Table(table) => {
                    tables.push(*table);
                }
                Extern::Memory(memory) => {
                    memories.push(*memory);
                }
                Extern::Global(global) => {
                    globals.push(*global);
                }
                Extern::Tag(tag) => {
                    tags.push(*tag);
                }
            }
        }

        // Defined functions; these carry the forward handle of the instance
        // being built.
        for index in 0..translated.num_defined_functions() {
            let def_index = DefinedFuncIndex::from_u32(index);
            let ty = translated.func_type_of(translated.func_index(def_index));
            funcs.push(Func(compartment.push_func(FuncData {
                ty,
                kind: FuncKind::Wasm {
                    instance: handle,
                    def_index,
                },
            })));
        }

        // Defined tables and memories.
        for (index, ty) in translated.tables.iter() {
            if !translated.is_imported_table(index) {
                tables.push(Table::new(compartment, *ty)?);
            }
        }
        for (index, ty) in translated.memories.iter() {
            if !translated.is_imported_memory(index) {
                memories.push(Memory::new(compartment, *ty)?);
            }
        }

        // Defined globals become visible only after all imports are bound;
        // their initializers may read imported globals.
        let mut const_eval = ConstExprEvaluator::default();
        for (def_index, init) in translated.global_initializers.iter() {
            let ty = translated.globals[translated.global_index(def_index)];
            let value = const_eval.eval(compartment, &globals, init)?;
            globals.push(Global(compartment.push_global(GlobalData { ty, value })));
        }

        // Fresh tag identities per instance.
        for (index, _) in translated.tags.iter() {
            if !translated.is_imported_tag(index) {
                let ty = translated.tag_type_of(index);
                tags.push(Tag::new(compartment, ty));
            }
        }

        // Active segments: check every bound first, then copy, so a failing
        // segment cannot leave partial writes behind in imported objects.
        let mut element_copies = alloc::vec::Vec::new();
        for (elem_index, segment) in translated.element_segments.iter() {
            let ElementKind::Active { table, offset } = &segment.kind else {
                continue;
            };
            let offset = const_eval.eval(compartment, &globals, offset)?.get_u32() as usize;
            let table_handle = tables[*table];
            let table_len = compartment[table_handle.0].len();
            if offset
                .checked_add(segment.elements.len())
                .is_none_or(|end| end > table_len)
            {
                return Err(Error::Trap(Trap::new(
                    TrapKind::AccessViolation,
                    format!(
                        "element segment {} does not fit table {}",
                        elem_index.as_u32(),
                        table.as_u32()
                    ),
                )));
            }
            element_copies.push((table_handle, offset, &segment.elements));
        }
        let mut data_copies = alloc::vec::Vec::new();
        for (data_index, segment) in translated.data_segments.iter() {
            let DataKind::Active { memory, offset } = &segment.kind else {
                continue;
            };
            let offset = const_eval.eval(compartment, &globals, offset)?.get_u32() as usize;
            let memory_handle = memories[*memory];
            let memory_len = compartment[memory_handle.0].byte_size();
            if offset
                .checked_add(segment.bytes.len())
                .is_none_or(|end| end > memory_len)
            {
                return Err(Error::Trap(Trap::new(
                    TrapKind::AccessViolation,
                    format!(
                        "data segment {} does not fit memory {}",
                        data_index.as_u32(),
                        memory.as_u32()
                    ),
                )));
            }
            data_copies.push((memory_handle, offset, &segment.bytes));
        }
        for (table_handle, offset, elements) in element_copies {
            for (i, element) in elements.iter().enumerate() {
                compartment[table_handle.0].elements[offset + i] = element.map(|func| funcs[func]);
            }
        }
        for (memory_handle, offset, bytes) in data_copies {
            let copied = compartment[memory_handle.0].write(offset, bytes);
            debug_assert!(copied, "bounds were checked before any copy");
        }

        // Active and declared segments behave as dropped from here on.
        let mut dropped_elements = HashSet::new();
        for (elem_index, segment) in translated.element_segments.iter() {
            if !matches!(segment.kind, ElementKind::Passive) {
                dropped_elements.insert(elem_index);
            }
        }
        let mut dropped_data = HashSet::new();
        for (data_index, segment) in translated.data_segments.iter() {
            if !matches!(segment.kind, DataKind::Passive) {
                dropped_data.insert(data_index);
            }
        }

        let pushed = compartment.push_instance(InstanceData {
            module: module.clone(),
            funcs,
            tables,
            memories,
            globals,
            tags,
            dropped_elements,
            dropped_data,
        });
        debug_assert_eq!(pushed, handle);

        // The start function runs with exports published; a trap here fails
        // the whole instantiation.
        if let Some(start) = translated.start {
            let func = compartment.instance_data(handle).funcs[start];
            crate::interp::invoke(compartment, func, &[])?;
        }

        tracing::debug!(
            "instantiated module{} with {} functions",
            translated
                .names
                .module
                .as_deref()
                .map(|name| format!(" `{name}`"))
                .unwrap_or_default(),
            translated.functions.len()
        );
        Ok(Instance(handle))
    }

    pub fn module<'a>(&self, compartment: &'a Compartment) -> &'a Module {
        &compartment.instance_data(self.0).module
    }

    /// Looks up an export by name.
    pub fn get_export(&self, compartment: &Compartment, name: &str) -> Option<Extern> {
        let data = compartment.instance_data(self.0);
        let index = data.module.get_export(name)?;
        Some(self.resolve(data, index))
    }

    fn resolve(&self, data: &InstanceData, index: EntityIndex) -> Extern {
        match index {
            EntityIndex::Function(i) => Extern::Func(data.funcs[i]),
            EntityIndex::Table(i) => Extern::Table(data.tables[i]),
            EntityIndex::Memory(i) => Extern::Memory(data.memories[i]),
            EntityIndex::Global(i) => Extern::Global(data.globals[i]),
            EntityIndex::Tag(i) => Extern::Tag(data.tags[i]),
        }
    }

    /// All exports in declaration order.
    pub fn exports(&self, compartment: &Compartment) -> alloc::vec::Vec<(String, Extern)> {
        let data = compartment.instance_data(self.0);
        data.module
            .translated()
            .exports
            .iter()
            .map(|export| (export.name.clone(), self.resolve(data, export.index)))
            .collect()
    }

    pub fn get_func(&self, compartment: &Compartment, name: &str) -> Option<Func> {
        match self.get_export(compartment, name)? {
            Extern::Func(func) => Some(func),
            _ => None,
        }
    }

    pub fn get_memory(&self, compartment: &Compartment, name: &str) -> Option<Memory> {
        match self.get_export(compartment, name)? {
            Extern::Memory(memory) => Some(memory),
            _ => None,
        }
    }

    pub fn get_table(&self, compartment: &Compartment, name: &str) -> Option<Table> {
        match self.get_export(compartment, name)? {
            Extern::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn get_global(&self, compartment: &Compartment, name: &str) -> Option<Global> {
        match self.get_export(compartment, name)? {
            Extern::Global(global) => Some(global),
            _ => None,
        }
    }

    pub fn get_tag(&self, compartment: &Compartment, name: &str) -> Option<Tag> {
        match self.get_export(compartment, name)? {
            Extern::Tag(tag) => Some(tag),
            _ => None,
        }
    }
}
