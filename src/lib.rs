//! A standalone WebAssembly execution core.
//!
//! The pipeline turns a binary module into a validated, typed intermediate
//! representation and from there into an instantiated module whose code runs
//! inside a sandboxed linear-memory environment:
//!
//! bytes -> [`Module::from_bytes`] (decode + validate + lower) -> [`Linker::instantiate`]
//! -> [`Instance`] -> [`Func::call`]
//!
//! A text printer ([`Module::to_wat`]) renders the intermediate representation
//! back to S-expression form as a side branch.

extern crate alloc;

mod compartment;
mod compile;
mod const_eval;
mod errors;
mod func;
mod global;
mod indices;
mod instance;
mod interp;
mod linker;
mod memory;
mod mmap;
mod module;
mod parking;
mod print;
mod table;
mod tag;
mod translate;
mod trap;
mod type_registry;
mod types;
mod utils;
mod values;

pub use compartment::{Compartment, TerminationSignal};
pub use const_eval::ConstExprEvaluator;
pub use errors::Error;
pub use func::{Func, IntoFunc, WasmResults, WasmTy};
pub use global::Global;
pub use indices::{EntityIndex, FuncIndex, SharedTypeIndex, TupleIndex};
pub use instance::Instance;
pub use linker::{Extern, Linker};
pub use memory::{Memory, SharedMemory};
pub use module::Module;
pub use table::Table;
pub use tag::Tag;
pub use translate::FeatureSpec;
pub use trap::{Trap, TrapFrame, TrapKind};
pub use type_registry::registry;
pub use types::{
    EntityType, FuncType, GlobalType, Limits, MemoryType, TableType, TagType, TypeTuple, ValType,
};
pub use values::Val;

pub type Result<T> = core::result::Result<T, Error>;

/// WebAssembly page sizes are defined to be 64KiB.
pub const WASM_PAGE_SIZE: u32 = 0x10000;

/// The number of pages we can have before we run out of byte index space.
pub const WASM32_MAX_PAGES: u64 = 1 << 16;
/// Maximum size, in bytes, of 32-bit memories (4G).
pub const WASM32_MAX_SIZE: u64 = 1 << 32;

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// Guard region reserved past the end of every linear memory so that
        /// no base+index+offset combination a 32-bit access can produce
        /// escapes the reservation.
        pub const DEFAULT_OFFSET_GUARD_SIZE: u64 = 0x2_0000_0000;
    } else {
        /// On 32-bit hosts we cannot afford large reservations; accesses are
        /// bounds-checked explicitly either way.
        pub const DEFAULT_OFFSET_GUARD_SIZE: u64 = 0x1_0000;
    }
}

/// The absolute maximum size of a table in elements.
pub const TABLE_MAX: usize = 1 << 20;
/// Maximum depth of the interpreter call stack, in frames.
pub const MAX_CALL_DEPTH: usize = 1024;
/// Maximum depth of the interpreter operand stack, in values.
pub const MAX_VALUE_STACK: usize = 256 * 1024;

pub fn host_page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe {
        usize::try_from(libc::sysconf(libc::_SC_PAGESIZE)).expect("host page size out of range")
    }
}
