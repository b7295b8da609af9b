//! The module intermediate representation and the binary frontend around it:
//! decoding, validation and re-encoding.
//!
//! Function bodies survive decoding as raw byte slices; the validator decodes
//! them lazily, one function at a time, and hands the compiler the operator
//! stream it checked.

mod const_expr;
pub(crate) mod encode;
mod module_parser;
pub(crate) mod operators;
pub(crate) mod reader;
pub(crate) mod validator;

use crate::indices::{
    DataIndex, DefinedFuncIndex, DefinedGlobalIndex, DefinedMemoryIndex, DefinedTableIndex,
    DefinedTagIndex, ElemIndex, EntityIndex, FuncIndex, GlobalIndex, LocalIndex, MemoryIndex,
    TableIndex, TagIndex, TypeIndex,
};
use crate::types::{EntityType, FuncType, GlobalType, MemoryType, TableType, TagType};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;

pub use const_expr::{ConstExpr, ConstOp};
pub use module_parser::ModuleParser;
pub use operators::{BlockType, BrTableImm, MemArg, Operator};
pub use validator::{validate_module, FuncValidator};

/// The feature flags a module is decoded and validated under.
///
/// An opcode or construct whose gating feature is off decodes as an unknown
/// opcode, it does not validate as an ill-typed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    pub threads: bool,
    pub simd: bool,
    pub exceptions: bool,
    pub reference_types: bool,
    pub multi_value: bool,
    pub multi_memory: bool,
    pub bulk_memory: bool,
    pub sign_extension: bool,
    pub saturating_float_to_int: bool,
    pub tail_calls: bool,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            threads: false,
            simd: false,
            exceptions: false,
            reference_types: true,
            multi_value: true,
            multi_memory: false,
            bulk_memory: true,
            sign_extension: true,
            saturating_float_to_int: true,
            tail_calls: false,
        }
    }
}

#[allow(clippy::struct_excessive_bools)]
impl FeatureSpec {
    /// Everything this engine implements.
    pub fn all() -> Self {
        Self {
            threads: true,
            simd: true,
            exceptions: true,
            reference_types: true,
            multi_value: true,
            multi_memory: true,
            bulk_memory: true,
            sign_extension: true,
            saturating_float_to_int: true,
            tail_calls: true,
        }
    }

    // Accessors so the operator table can gate uniformly; `mvp` is the
    // always-on baseline.
    pub(crate) fn mvp(&self) -> bool {
        true
    }
    pub(crate) fn threads(&self) -> bool {
        self.threads
    }
    pub(crate) fn simd(&self) -> bool {
        self.simd
    }
    pub(crate) fn exceptions(&self) -> bool {
        self.exceptions
    }
    pub(crate) fn reference_types(&self) -> bool {
        self.reference_types
    }
    pub(crate) fn bulk_memory(&self) -> bool {
        self.bulk_memory
    }
    pub(crate) fn sign_extension(&self) -> bool {
        self.sign_extension
    }
    pub(crate) fn saturating_float_to_int(&self) -> bool {
        self.saturating_float_to_int
    }
    pub(crate) fn tail_calls(&self) -> bool {
        self.tail_calls
    }
}

/// A fully decoded module: every index space, segment and custom section,
/// with function bodies still in their raw encoding.
#[derive(Debug, Default)]
pub struct TranslatedModule {
    /// The (interned) signatures of the type section.
    pub types: PrimaryMap<TypeIndex, &'static FuncType>,

    /// All functions, imported ones first.
    pub functions: PrimaryMap<FuncIndex, TypeIndex>,
    pub tables: PrimaryMap<TableIndex, TableType>,
    pub memories: PrimaryMap<MemoryIndex, MemoryType>,
    pub globals: PrimaryMap<GlobalIndex, GlobalType>,
    /// Exception tags; each refers to a signature whose results are empty.
    pub tags: PrimaryMap<TagIndex, TypeIndex>,

    pub global_initializers: PrimaryMap<DefinedGlobalIndex, ConstExpr>,
    pub element_segments: PrimaryMap<ElemIndex, ElementSegment>,
    pub data_segments: PrimaryMap<DataIndex, DataSegment>,
    /// The declared data segment count, when a data-count section is present.
    pub data_count: Option<u32>,

    pub start: Option<FuncIndex>,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,

    /// Custom sections in file order; `name` is additionally parsed into
    /// [`Names`], `linking` is disassembled by the printer.
    pub user_sections: Vec<UserSection>,
    pub names: Names,

    pub function_bodies: PrimaryMap<DefinedFuncIndex, FunctionBody>,

    pub features: FeatureSpec,

    pub num_imported_functions: u32,
    pub num_imported_tables: u32,
    pub num_imported_memories: u32,
    pub num_imported_globals: u32,
    pub num_imported_tags: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    /// The slot this import occupies in its index space.
    pub index: EntityIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub index: EntityIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub kind: ElementKind,
    /// `anyfunc` items; `None` is a null reference.
    pub elements: Box<[Option<FuncIndex>]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Active {
        table: TableIndex,
        offset: ConstExpr,
    },
    Passive,
    Declared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub kind: DataKind,
    pub bytes: Box<[u8]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataKind {
    Active {
        memory: MemoryIndex,
        offset: ConstExpr,
    },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserSection {
    pub name: String,
    pub bytes: Box<[u8]>,
}

/// A function body as stored by the decoder: the local declarations plus
/// operator stream, together with its absolute file offset for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub bytes: Box<[u8]>,
    pub offset: usize,
}

/// Debug names from the `name` custom section.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Names {
    pub module: Option<String>,
    pub funcs: HashMap<FuncIndex, String>,
    pub locals: HashMap<FuncIndex, HashMap<LocalIndex, String>>,
}

impl TranslatedModule {
    #[inline]
    pub fn func_index(&self, index: DefinedFuncIndex) -> FuncIndex {
        FuncIndex::from_u32(self.num_imported_functions + index.as_u32())
    }

    #[inline]
    pub fn defined_func_index(&self, index: FuncIndex) -> Option<DefinedFuncIndex> {
        if self.is_imported_func(index) {
            None
        } else {
            Some(DefinedFuncIndex::from_u32(
                index.as_u32() - self.num_imported_functions,
            ))
        }
    }

    #[inline]
    pub fn is_imported_func(&self, index: FuncIndex) -> bool {
        index.as_u32() < self.num_imported_functions
    }

    #[inline]
    pub fn table_index(&self, index: DefinedTableIndex) -> TableIndex {
        TableIndex::from_u32(self.num_imported_tables + index.as_u32())
    }

    #[inline]
    pub fn defined_table_index(&self, index: TableIndex) -> Option<DefinedTableIndex> {
        if self.is_imported_table(index) {
            None
        } else {
            Some(DefinedTableIndex::from_u32(
                index.as_u32() - self.num_imported_tables,
            ))
        }
    }

    #[inline]
    pub fn is_imported_table(&self, index: TableIndex) -> bool {
        index.as_u32() < self.num_imported_tables
    }

    #[inline]
    pub fn memory_index(&self, index: DefinedMemoryIndex) -> MemoryIndex {
        MemoryIndex::from_u32(self.num_imported_memories + index.as_u32())
    }

    #[inline]
    pub fn defined_memory_index(&self, index: MemoryIndex) -> Option<DefinedMemoryIndex> {
        if self.is_imported_memory(index) {
            None
        } else {
            Some(DefinedMemoryIndex::from_u32(
                index.as_u32() - self.num_imported_memories,
            ))
        }
    }

    #[inline]
    pub fn is_imported_memory(&self, index: MemoryIndex) -> bool {
        index.as_u32() < self.num_imported_memories
    }

    #[inline]
    pub fn global_index(&self, index: DefinedGlobalIndex) -> GlobalIndex {
        GlobalIndex::from_u32(self.num_imported_globals + index.as_u32())
    }

    #[inline]
    pub fn defined_global_index(&self, index: GlobalIndex) -> Option<DefinedGlobalIndex> {
        if self.is_imported_global(index) {
            None
        } else {
            Some(DefinedGlobalIndex::from_u32(
                index.as_u32() - self.num_imported_globals,
            ))
        }
    }

    #[inline]
    pub fn is_imported_global(&self, index: GlobalIndex) -> bool {
        index.as_u32() < self.num_imported_globals
    }

    #[inline]
    pub fn tag_index(&self, index: DefinedTagIndex) -> TagIndex {
        TagIndex::from_u32(self.num_imported_tags + index.as_u32())
    }

    #[inline]
    pub fn defined_tag_index(&self, index: TagIndex) -> Option<DefinedTagIndex> {
        if self.is_imported_tag(index) {
            None
        } else {
            Some(DefinedTagIndex::from_u32(
                index.as_u32() - self.num_imported_tags,
            ))
        }
    }

    #[inline]
    pub fn is_imported_tag(&self, index: TagIndex) -> bool {
        index.as_u32() < self.num_imported_tags
    }

    pub fn num_defined_functions(&self) -> u32 {
        u32::try_from(self.functions.len()).unwrap() - self.num_imported_functions
    }
    pub fn num_defined_tables(&self) -> u32 {
        u32::try_from(self.tables.len()).unwrap() - self.num_imported_tables
    }
    pub fn num_defined_memories(&self) -> u32 {
        u32::try_from(self.memories.len()).unwrap() - self.num_imported_memories
    }
    pub fn num_defined_globals(&self) -> u32 {
        u32::try_from(self.globals.len()).unwrap() - self.num_imported_globals
    }
    pub fn num_defined_tags(&self) -> u32 {
        u32::try_from(self.tags.len()).unwrap() - self.num_imported_tags
    }

    /// The signature of a function, by its index in the function space.
    pub fn func_type_of(&self, index: FuncIndex) -> &'static FuncType {
        self.types[self.functions[index]]
    }

    pub fn tag_type_of(&self, index: TagIndex) -> TagType {
        TagType {
            params: self.types[self.tags[index]].params,
        }
    }

    /// The declared type of any object in the module's index spaces.
    pub fn type_of(&self, index: EntityIndex) -> EntityType {
        match index {
            EntityIndex::Function(i) => EntityType::Function(self.func_type_of(i)),
            EntityIndex::Table(i) => EntityType::Table(self.tables[i]),
            EntityIndex::Memory(i) => EntityType::Memory(self.memories[i]),
            EntityIndex::Global(i) => EntityType::Global(self.globals[i]),
            EntityIndex::Tag(i) => EntityType::Tag(self.tag_type_of(i)),
        }
    }

    pub fn get_export(&self, name: &str) -> Option<EntityIndex> {
        self.exports
            .iter()
            .find(|export| export.name == name)
            .map(|export| export.index)
    }

    /// The name of a function, from the `name` section when present.
    pub fn func_name(&self, index: FuncIndex) -> Option<&str> {
        self.names.funcs.get(&index).map(String::as_str)
    }
}
