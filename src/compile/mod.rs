//! Lowering of validated function bodies into executable form.
//!
//! The lowering is an operator sequence plus a side table that resolves every
//! structured or branching operator to an absolute target: the instruction to
//! jump to, the operand-stack height to unwind to, how many values to carry,
//! and how deep the active exception-handler and caught-exception stacks are
//! at the target. Those pre-resolved slots are the interpreter's analog of
//! relocations; indices into the instance (functions, tables, memories,
//! globals, tags) stay symbolic and are resolved at execution time.
//!
//! Lowering happens in the same pass as type checking, because only the
//! validator knows the operand-stack height at every program point.

use crate::indices::{DefinedFuncIndex, TagIndex};
use crate::translate::validator::FuncValidator;
use crate::translate::{Operator, TranslatedModule};
use crate::types::{FuncType, ValType};
use alloc::boxed::Box;
use alloc::vec::Vec;
use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;

/// Where a taken branch lands and what it does to the frame's stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BranchTarget {
    /// Absolute index of the next operator to execute.
    pub pc: u32,
    /// Operand height (relative to the frame base) to unwind to, not
    /// counting the carried values.
    pub height: u32,
    /// Number of topmost operands the branch carries to the target.
    pub preserve: u32,
    /// Active exception handlers at the target.
    pub handler_depth: u32,
    /// Caught exceptions at the target.
    pub catch_depth: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BranchInfo {
    Jump(BranchTarget),
    /// `br_table`: per-index targets with the default appended last.
    Table { targets: Box<[BranchTarget]> },
}

/// Catch clauses of one `try`, keyed in [`SideTable`] by the pc of the `try`
/// operator itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct HandlerEntry {
    /// Operand height to unwind to before pushing the exception arguments.
    pub height: u32,
    /// Caught-exception depth at entry of the `try`.
    pub catch_depth: u32,
    /// Tagged catch clauses, first match wins. The pc is the first operator
    /// of the catch body.
    pub catches: Vec<(TagIndex, u32)>,
    pub catch_all: Option<u32>,
    /// `try..delegate`: forward the exception to the handlers active at this
    /// depth instead of handling it here.
    pub delegate: Option<u32>,
}

/// The pre-resolved control metadata of one lowered function.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SideTable {
    branches: HashMap<u32, BranchInfo>,
    handlers: HashMap<u32, HandlerEntry>,
    /// `rethrow` pc -> absolute index into the frame's caught stack.
    rethrows: HashMap<u32, u32>,
}

impl SideTable {
    pub(crate) fn branch(&self, pc: u32) -> &BranchInfo {
        &self.branches[&pc]
    }

    pub(crate) fn try_branch(&self, pc: u32) -> Option<&BranchInfo> {
        self.branches.get(&pc)
    }

    pub(crate) fn handler(&self, try_pc: u32) -> &HandlerEntry {
        &self.handlers[&try_pc]
    }

    pub(crate) fn rethrow(&self, pc: u32) -> u32 {
        self.rethrows[&pc]
    }
}

/// Builder driven by the validator while it walks the operator stream.
#[derive(Debug, Default)]
pub(crate) struct SideTableBuilder {
    table: SideTable,
}

impl SideTableBuilder {
    pub(crate) fn jump(&mut self, pc: u32, target: BranchTarget) {
        self.table.branches.insert(pc, BranchInfo::Jump(target));
    }

    pub(crate) fn jump_table(&mut self, pc: u32, targets: Box<[BranchTarget]>) {
        self.table.branches.insert(pc, BranchInfo::Table { targets });
    }

    pub(crate) fn handler(&mut self, try_pc: u32, entry: HandlerEntry) {
        self.table.handlers.insert(try_pc, entry);
    }

    pub(crate) fn handler_mut(&mut self, try_pc: u32) -> &mut HandlerEntry {
        self.table
            .handlers
            .get_mut(&try_pc)
            .expect("handler entry registered at `try`")
    }

    pub(crate) fn rethrow(&mut self, pc: u32, caught_index: u32) {
        self.table.rethrows.insert(pc, caught_index);
    }

    /// Patches the pc of an earlier forward branch once its target is known.
    pub(crate) fn patch(&mut self, pc: u32, table_slot: Option<u32>, target_pc: u32) {
        match self.table.branches.get_mut(&pc) {
            Some(BranchInfo::Jump(target)) => target.pc = target_pc,
            Some(BranchInfo::Table { targets }) => {
                targets[table_slot.expect("table slot for br_table fixup") as usize].pc = target_pc;
            }
            None => unreachable!("fixup for unknown branch at {pc}"),
        }
    }

    pub(crate) fn finish(self) -> SideTable {
        self.table
    }
}

/// One function lowered to directly executable form.
#[derive(Debug)]
pub struct CompiledFunction {
    pub(crate) ty: &'static FuncType,
    /// Declared locals, params excluded. Zero-initialized on entry.
    pub(crate) locals: Box<[ValType]>,
    pub(crate) ops: Box<[Operator]>,
    pub(crate) side: SideTable,
}

/// Per-function compile jobs for a whole module.
///
/// Functions share only read-only module metadata, so this could fan out
/// across threads; output is deterministic either way and we run in index
/// order.
pub(crate) struct CompileInputs<'m> {
    module: &'m TranslatedModule,
}

impl<'m> CompileInputs<'m> {
    pub(crate) fn from_module(module: &'m TranslatedModule) -> Self {
        Self { module }
    }

    pub(crate) fn compile(
        self,
    ) -> crate::Result<PrimaryMap<DefinedFuncIndex, CompiledFunction>> {
        let mut functions = PrimaryMap::with_capacity(self.module.function_bodies.len());
        for (def_index, body) in self.module.function_bodies.iter() {
            let func_index = self.module.func_index(def_index);
            tracing::trace!(
                "compiling function {} ({} bytes)",
                func_index.as_u32(),
                body.bytes.len()
            );
            let compiled = FuncValidator::new(self.module, func_index)
                .validate_and_lower(body)
                .map_err(|err| err.in_func(func_index))?;
            functions.push(compiled);
        }
        Ok(functions)
    }
}
