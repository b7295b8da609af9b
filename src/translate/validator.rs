//! Module- and function-level validation.
//!
//! Function bodies are checked with the standard two-stack discipline: an
//! operand stack of value types (with `any` standing in for polymorphic slots
//! after an unconditional transfer) and a control stack of frames. The same
//! walk computes the branch side table the interpreter executes against, so
//! every function is decoded exactly once.

use crate::compile::{BranchTarget, CompiledFunction, HandlerEntry, SideTableBuilder};
use crate::errors::Error;
use crate::indices::{EntityIndex, FuncIndex};
use crate::translate::operators::{read_val_type, BlockType, MemArg, Operator, OperatorsReader};
use crate::translate::reader::BinaryReader;
use crate::translate::{
    ConstExpr, ConstOp, DataKind, ElementKind, FunctionBody, TranslatedModule,
};
use crate::types::{TypeTuple, ValType};
use crate::WASM32_MAX_PAGES;
use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;
use hashbrown::HashSet;

const MAX_LOCALS: usize = 50_000;

/// Validates everything about a module except its function bodies: index
/// ranges, limits, initializer discipline, export uniqueness, feature-gated
/// object counts.
pub fn validate_module(module: &TranslatedModule) -> crate::Result<()> {
    for (_, type_index) in module.functions.iter() {
        if module.types.get(*type_index).is_none() {
            return Err(Error::validation(format!(
                "unknown type {}",
                type_index.as_u32()
            )));
        }
    }

    for (tag, type_index) in module.tags.iter() {
        let Some(ty) = module.types.get(*type_index) else {
            return Err(Error::validation(format!(
                "unknown type {} for tag {}",
                type_index.as_u32(),
                tag.as_u32()
            )));
        };
        if !ty.results.is_empty() {
            return Err(Error::validation("tag signatures must not have results"));
        }
    }

    for (index, table) in module.tables.iter() {
        if table.limits.is_bounded() && table.limits.min > table.limits.max {
            return Err(Error::validation(format!(
                "table {} size minimum is greater than maximum",
                index.as_u32()
            )));
        }
        if table.shared && !table.limits.is_bounded() {
            return Err(Error::validation("shared tables must be bounded"));
        }
    }
    if module.tables.len() > 1 && !module.features.reference_types {
        return Err(Error::validation(
            "multiple tables require the reference-types feature",
        ));
    }

    for (index, memory) in module.memories.iter() {
        let limits = memory.limits;
        if limits.min > WASM32_MAX_PAGES
            || (limits.is_bounded() && limits.max > WASM32_MAX_PAGES)
        {
            return Err(Error::validation(format!(
                "memory {} exceeds the 32-bit page limit",
                index.as_u32()
            )));
        }
        if limits.is_bounded() && limits.min > limits.max {
            return Err(Error::validation(format!(
                "memory {} size minimum is greater than maximum",
                index.as_u32()
            )));
        }
        if memory.shared {
            if !module.features.threads {
                return Err(Error::validation(
                    "shared memories require the threads feature",
                ));
            }
            if !limits.is_bounded() {
                return Err(Error::validation("shared memories must be bounded"));
            }
        }
    }
    if module.memories.len() > 1 && !module.features.multi_memory {
        return Err(Error::validation(
            "multiple memories require the multi-memory feature",
        ));
    }

    for (def_index, init) in module.global_initializers.iter() {
        let global_index = module.global_index(def_index);
        let ty = module.globals[global_index];
        check_const_expr(module, init, ty.content)?;
    }

    if let Some(start) = module.start {
        let Some(&type_index) = module.functions.get(start) else {
            return Err(Error::validation(format!(
                "unknown start function {}",
                start.as_u32()
            )));
        };
        let ty = module.types[type_index];
        if !ty.params.is_empty() || !ty.results.is_empty() {
            return Err(Error::validation(
                "start function must have an empty signature",
            ));
        }
    }

    let mut export_names = HashSet::new();
    for export in &module.exports {
        if !export_names.insert(export.name.as_str()) {
            return Err(Error::validation(format!(
                "duplicate export name `{}`",
                export.name
            )));
        }
        if !entity_exists(module, export.index) {
            return Err(Error::validation(format!(
                "export `{}` references an unknown object",
                export.name
            )));
        }
    }

    for (_, segment) in module.element_segments.iter() {
        for element in segment.elements.iter().flatten() {
            if module.functions.get(*element).is_none() {
                return Err(Error::validation(format!(
                    "element segment references unknown function {}",
                    element.as_u32()
                )));
            }
        }
        if let ElementKind::Active { table, offset } = &segment.kind {
            if module.tables.get(*table).is_none() {
                return Err(Error::validation(format!(
                    "element segment targets unknown table {}",
                    table.as_u32()
                )));
            }
            check_const_expr(module, offset, ValType::I32)?;
        }
    }

    for (_, segment) in module.data_segments.iter() {
        if let DataKind::Active { memory, offset } = &segment.kind {
            if module.memories.get(*memory).is_none() {
                return Err(Error::validation(format!(
                    "data segment targets unknown memory {}",
                    memory.as_u32()
                )));
            }
            check_const_expr(module, offset, ValType::I32)?;
        }
    }

    Ok(())
}

fn entity_exists(module: &TranslatedModule, index: EntityIndex) -> bool {
    match index {
        EntityIndex::Function(i) => module.functions.get(i).is_some(),
        EntityIndex::Table(i) => module.tables.get(i).is_some(),
        EntityIndex::Memory(i) => module.memories.get(i).is_some(),
        EntityIndex::Global(i) => module.globals.get(i).is_some(),
        EntityIndex::Tag(i) => module.tags.get(i).is_some(),
    }
}

/// Initializer expressions are a single constant operator: a `*.const`, or
/// `global.get` of an imported immutable global.
fn check_const_expr(
    module: &TranslatedModule,
    expr: &ConstExpr,
    expected: ValType,
) -> crate::Result<()> {
    let [op] = expr.ops() else {
        return Err(Error::validation(
            "initializer must be a single constant operator",
        ));
    };
    let actual = match op {
        ConstOp::I32Const(_) => ValType::I32,
        ConstOp::I64Const(_) => ValType::I64,
        ConstOp::F32Const(_) => ValType::F32,
        ConstOp::F64Const(_) => ValType::F64,
        ConstOp::V128Const(_) => ValType::V128,
        ConstOp::GlobalGet(index) => {
            let Some(ty) = module.globals.get(*index) else {
                return Err(Error::validation(format!(
                    "initializer references unknown global {}",
                    index.as_u32()
                )));
            };
            if !module.is_imported_global(*index) {
                return Err(Error::validation(
                    "initializer may only reference imported globals",
                ));
            }
            if ty.mutable {
                return Err(Error::validation(
                    "initializer may not reference a mutable global",
                ));
            }
            ty.content
        }
        ConstOp::RefNull | ConstOp::RefFunc(_) => {
            return Err(Error::validation(
                "reference constants are only legal in element segments",
            ))
        }
    };
    if actual != expected {
        return Err(Error::validation(format!(
            "initializer type mismatch: expected {expected}, found {actual}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
    Try,
    Catch,
    CatchAll,
}

#[derive(Debug)]
struct ControlFrame {
    kind: FrameKind,
    params: &'static TypeTuple,
    results: &'static TypeTuple,
    /// Operand height at entry, params excluded.
    height: usize,
    unreachable: bool,
    /// pc of the opening operator.
    pc: u32,
    entry_handler_depth: u32,
    entry_catch_depth: u32,
    /// Forward branches waiting for this frame's end pc: (branch pc, slot in
    /// a `br_table` target list).
    fixups: Vec<(u32, Option<u32>)>,
}

impl ControlFrame {
    fn label(&self) -> &'static TypeTuple {
        if self.kind == FrameKind::Loop {
            self.params
        } else {
            self.results
        }
    }
}

/// Type-checks one function body and lowers it in the same pass.
pub struct FuncValidator<'m> {
    module: &'m TranslatedModule,
    ty: &'static crate::types::FuncType,
    locals: Vec<ValType>,
    num_params: usize,
    stack: Vec<ValType>,
    frames: Vec<ControlFrame>,
    ops: Vec<Operator>,
    side: SideTableBuilder,
    handler_depth: u32,
    catch_depth: u32,
}

impl<'m> FuncValidator<'m> {
    pub fn new(module: &'m TranslatedModule, func: FuncIndex) -> Self {
        let ty = module.func_type_of(func);
        let mut locals = Vec::with_capacity(ty.params.len());
        locals.extend_from_slice(ty.params);
        Self {
            module,
            ty,
            num_params: locals.len(),
            locals,
            stack: Vec::new(),
            frames: Vec::new(),
            ops: Vec::new(),
            side: SideTableBuilder::default(),
            handler_depth: 0,
            catch_depth: 0,
        }
    }

    pub fn validate_and_lower(mut self, body: &FunctionBody) -> crate::Result<CompiledFunction> {
        let mut reader = BinaryReader::new_with_offset(&body.bytes, body.offset);

        let group_count = reader.read_u32_leb()?;
        for _ in 0..group_count {
            let count = reader.read_u32_leb()? as usize;
            let ty = read_val_type(&mut reader)?;
            if self.locals.len() + count > MAX_LOCALS {
                return Err(Error::validation_at(reader.pos(), "too many locals"));
            }
            self.locals.extend(core::iter::repeat(ty).take(count));
        }
        let declared: Box<[ValType]> = self.locals[self.num_params..].into();

        let registry = crate::registry();
        self.frames.push(ControlFrame {
            kind: FrameKind::Function,
            params: registry.tuple(&[]),
            results: self.ty.results,
            height: 0,
            unreachable: false,
            pc: 0,
            entry_handler_depth: 0,
            entry_catch_depth: 0,
            fixups: Vec::new(),
        });

        let features = self.module.features;
        let mut decoder = OperatorsReader::new(&mut reader, &features);
        loop {
            if self.frames.is_empty() {
                if !decoder.is_empty() {
                    return Err(Error::validation_at(
                        decoder.pos(),
                        "operators after end of function",
                    ));
                }
                break;
            }
            if decoder.is_empty() {
                return Err(Error::validation_at(decoder.pos(), "function body truncated"));
            }
            let (op, offset) = decoder.read()?;
            self.op(op, offset)?;
        }

        Ok(CompiledFunction {
            ty: self.ty,
            locals: declared,
            ops: self.ops.into_boxed_slice(),
            side: self.side.finish(),
        })
    }

    // ---- operand stack -------------------------------------------------

    fn push(&mut self, ty: ValType) {
        self.stack.push(ty);
    }

    fn push_tuple(&mut self, tys: &TypeTuple) {
        self.stack.extend_from_slice(tys);
    }

    fn pop_any(&mut self, offset: usize) -> crate::Result<ValType> {
        let frame = self.frames.last().expect("control frame");
        if self.stack.len() == frame.height {
            if frame.unreachable {
                return Ok(ValType::Any);
            }
            return Err(Error::validation_at(
                offset,
                "type mismatch: operand stack is empty",
            ));
        }
        Ok(self.stack.pop().expect("operand"))
    }

    fn pop(&mut self, expected: ValType, offset: usize) -> crate::Result<ValType> {
        let actual = self.pop_any(offset)?;
        if !actual.matches(expected) {
            return Err(Error::validation_at(
                offset,
                format!("type mismatch: expected {expected}, found {actual}"),
            ));
        }
        Ok(actual)
    }

    fn pop_tuple(&mut self, tys: &TypeTuple, offset: usize) -> crate::Result<()> {
        for ty in tys.iter().rev() {
            self.pop(*ty, offset)?;
        }
        Ok(())
    }

    fn sig(&mut self, params: &[ValType], results: &[ValType], offset: usize) -> crate::Result<()> {
        for ty in params.iter().rev() {
            self.pop(*ty, offset)?;
        }
        for ty in results {
            self.push(*ty);
        }
        Ok(())
    }

    fn set_unreachable(&mut self) {
        let frame = self.frames.last_mut().expect("control frame");
        self.stack.truncate(frame.height);
        frame.unreachable = true;
    }

    // ---- control helpers -----------------------------------------------

    fn block_types(
        &self,
        ty: &BlockType,
        offset: usize,
    ) -> crate::Result<(&'static TypeTuple, &'static TypeTuple)> {
        let registry = crate::registry();
        match ty {
            BlockType::Empty => {
                let empty = registry.tuple(&[]);
                Ok((empty, empty))
            }
            BlockType::Value(ty) => Ok((registry.tuple(&[]), registry.tuple(&[*ty]))),
            BlockType::Func(index) => {
                let Some(ty) = self.module.types.get(*index) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown type {}", index.as_u32()),
                    ));
                };
                if !self.module.features.multi_value
                    && (!ty.params.is_empty() || ty.results.len() > 1)
                {
                    return Err(Error::validation_at(
                        offset,
                        "block signatures require the multi-value feature",
                    ));
                }
                Ok((ty.params, ty.results))
            }
        }
    }

    fn frame_at_depth(&self, depth: u32, offset: usize) -> crate::Result<usize> {
        (self.frames.len().checked_sub(1 + depth as usize)).ok_or_else(|| {
            Error::validation_at(offset, format!("branch depth {depth} out of range"))
        })
    }

    fn push_frame(&mut self, kind: FrameKind, pc: u32, params: &'static TypeTuple, results: &'static TypeTuple) {
        self.frames.push(ControlFrame {
            kind,
            params,
            results,
            height: self.stack.len(),
            unreachable: false,
            pc,
            entry_handler_depth: self.handler_depth,
            entry_catch_depth: self.catch_depth,
            fixups: Vec::new(),
        });
        self.push_tuple(params);
    }

    /// A branch target for the frame at `idx`; loops resolve immediately,
    /// everything else is patched at the frame's `end`.
    fn branch_target(&mut self, branch_pc: u32, idx: usize, table_slot: Option<u32>) -> BranchTarget {
        let frame = &self.frames[idx];
        let label_len = u32::try_from(frame.label().len()).unwrap();
        let target = BranchTarget {
            pc: if frame.kind == FrameKind::Loop {
                frame.pc + 1
            } else {
                u32::MAX // patched at `end`
            },
            height: u32::try_from(frame.height).unwrap(),
            preserve: label_len,
            handler_depth: frame.entry_handler_depth,
            catch_depth: frame.entry_catch_depth,
        };
        if frame.kind != FrameKind::Loop {
            self.frames[idx].fixups.push((branch_pc, table_slot));
        }
        target
    }

    /// Pops a region's result tuple and checks nothing else is left on the
    /// stack (polymorphically satisfied after an unconditional transfer).
    fn close_region(&mut self, results: &'static TypeTuple, offset: usize) -> crate::Result<()> {
        self.pop_tuple(results, offset)?;
        let frame = self.frames.last().expect("control frame");
        if !frame.unreachable && self.stack.len() != frame.height {
            return Err(Error::validation_at(
                offset,
                "type mismatch: values remaining on stack at end of block",
            ));
        }
        let height = frame.height;
        self.stack.truncate(height);
        Ok(())
    }

    // ---- the operator walk ---------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn op(&mut self, op: Operator, offset: usize) -> crate::Result<()> {
        use Operator as O;
        use ValType::{F32, F64, I32, I64, V128};

        let pc = u32::try_from(self.ops.len()).unwrap();
        match &op {
            // ---- control ----------------------------------------------
            O::Unreachable {} => self.set_unreachable(),
            O::Nop {} => {}

            O::Block { ty } => {
                let (params, results) = self.block_types(ty, offset)?;
                self.pop_tuple(params, offset)?;
                self.push_frame(FrameKind::Block, pc, params, results);
            }
            O::Loop { ty } => {
                let (params, results) = self.block_types(ty, offset)?;
                self.pop_tuple(params, offset)?;
                self.push_frame(FrameKind::Loop, pc, params, results);
            }
            O::If { ty } => {
                self.pop(I32, offset)?;
                let (params, results) = self.block_types(ty, offset)?;
                self.pop_tuple(params, offset)?;
                self.push_frame(FrameKind::If, pc, params, results);
                let frame = self.frames.last().expect("control frame");
                // The false edge; its pc is patched at `else`/`end`.
                let target = BranchTarget {
                    pc: u32::MAX,
                    height: u32::try_from(frame.height).unwrap(),
                    preserve: u32::try_from(params.len()).unwrap(),
                    handler_depth: frame.entry_handler_depth,
                    catch_depth: frame.entry_catch_depth,
                };
                self.side.jump(pc, target);
            }
            O::Else {} => {
                let frame = self.frames.last().expect("control frame");
                if frame.kind != FrameKind::If {
                    return Err(Error::validation_at(offset, "`else` outside of `if`"));
                }
                let results = frame.results;
                self.close_region(results, offset)?;

                let frame = self.frames.last_mut().expect("control frame");
                frame.kind = FrameKind::Else;
                frame.unreachable = false;
                let if_pc = frame.pc;
                let params = frame.params;
                let target = BranchTarget {
                    pc: u32::MAX,
                    height: u32::try_from(frame.height).unwrap(),
                    preserve: u32::try_from(results.len()).unwrap(),
                    handler_depth: frame.entry_handler_depth,
                    catch_depth: frame.entry_catch_depth,
                };
                frame.fixups.push((pc, None));
                // Fallthrough from the then-branch jumps past `end`.
                self.side.jump(pc, target);
                // The false edge of the `if` lands right after us.
                self.side.patch(if_pc, None, pc + 1);
                self.push_tuple(params);
            }

            O::Try { ty } => {
                if !self.module.features.exceptions {
                    return Err(Error::validation_at(offset, "`try` requires exception handling"));
                }
                let (params, results) = self.block_types(ty, offset)?;
                self.pop_tuple(params, offset)?;
                self.push_frame(FrameKind::Try, pc, params, results);
                let frame = self.frames.last().expect("control frame");
                self.side.handler(
                    pc,
                    HandlerEntry {
                        height: u32::try_from(frame.height).unwrap(),
                        catch_depth: frame.entry_catch_depth,
                        ..HandlerEntry::default()
                    },
                );
                self.handler_depth += 1;
            }
            O::Catch { tag } => {
                let frame = self.frames.last().expect("control frame");
                if !matches!(frame.kind, FrameKind::Try | FrameKind::Catch) {
                    return Err(Error::validation_at(offset, "`catch` outside of `try`"));
                }
                let Some(&tag_ty) = self.module.tags.get(*tag) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown tag {}", tag.as_u32()),
                    ));
                };
                let results = frame.results;
                self.close_region(results, offset)?;

                let frame = self.frames.last_mut().expect("control frame");
                let try_pc = frame.pc;
                frame.kind = FrameKind::Catch;
                frame.unreachable = false;
                let target = BranchTarget {
                    pc: u32::MAX,
                    height: u32::try_from(frame.height).unwrap(),
                    preserve: u32::try_from(results.len()).unwrap(),
                    handler_depth: frame.entry_handler_depth,
                    catch_depth: frame.entry_catch_depth,
                };
                frame.fixups.push((pc, None));
                self.handler_depth = frame.entry_handler_depth;
                self.catch_depth = frame.entry_catch_depth + 1;
                self.side.jump(pc, target);
                self.side.handler_mut(try_pc).catches.push((*tag, pc + 1));
                let params = self.module.types[tag_ty].params;
                self.push_tuple(params);
            }
            O::CatchAll {} => {
                let frame = self.frames.last().expect("control frame");
                if !matches!(frame.kind, FrameKind::Try | FrameKind::Catch) {
                    return Err(Error::validation_at(offset, "`catch_all` outside of `try`"));
                }
                let results = frame.results;
                self.close_region(results, offset)?;

                let frame = self.frames.last_mut().expect("control frame");
                let try_pc = frame.pc;
                frame.kind = FrameKind::CatchAll;
                frame.unreachable = false;
                let target = BranchTarget {
                    pc: u32::MAX,
                    height: u32::try_from(frame.height).unwrap(),
                    preserve: u32::try_from(results.len()).unwrap(),
                    handler_depth: frame.entry_handler_depth,
                    catch_depth: frame.entry_catch_depth,
                };
                frame.fixups.push((pc, None));
                self.handler_depth = frame.entry_handler_depth;
                self.catch_depth = frame.entry_catch_depth + 1;
                self.side.jump(pc, target);
                let handler = self.side.handler_mut(try_pc);
                if handler.catch_all.is_some() {
                    return Err(Error::validation_at(offset, "duplicate `catch_all`"));
                }
                handler.catch_all = Some(pc + 1);
            }
            O::Delegate { depth } => {
                let frame = self.frames.last().expect("control frame");
                if frame.kind != FrameKind::Try {
                    return Err(Error::validation_at(offset, "`delegate` outside of `try`"));
                }
                let results = frame.results;
                self.close_region(results, offset)?;

                let frame = self.frames.pop().expect("control frame");
                let handler = self.side.handler_mut(frame.pc);
                if !handler.catches.is_empty() || handler.catch_all.is_some() {
                    return Err(Error::validation_at(
                        offset,
                        "`delegate` cannot follow catch clauses",
                    ));
                }
                let target_idx = self.frame_at_depth(*depth, offset)?;
                let target = &self.frames[target_idx];
                let limit = target.entry_handler_depth
                    + u32::from(target.kind == FrameKind::Try);
                self.side.handler_mut(frame.pc).delegate = Some(limit);
                self.handler_depth = frame.entry_handler_depth;
                self.catch_depth = frame.entry_catch_depth;
                for (branch_pc, slot) in &frame.fixups {
                    self.side.patch(*branch_pc, *slot, pc + 1);
                }
                self.side.jump(
                    pc,
                    BranchTarget {
                        pc: pc + 1,
                        height: u32::try_from(frame.height).unwrap(),
                        preserve: u32::try_from(results.len()).unwrap(),
                        handler_depth: frame.entry_handler_depth,
                        catch_depth: frame.entry_catch_depth,
                    },
                );
                self.push_tuple(results);
            }
            O::Throw { tag } => {
                let Some(&tag_ty) = self.module.tags.get(*tag) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown tag {}", tag.as_u32()),
                    ));
                };
                let params = self.module.types[tag_ty].params;
                self.pop_tuple(params, offset)?;
                self.set_unreachable();
            }
            O::Rethrow { depth } => {
                let idx = self.frame_at_depth(*depth, offset)?;
                let frame = &self.frames[idx];
                if !matches!(frame.kind, FrameKind::Catch | FrameKind::CatchAll) {
                    return Err(Error::validation_at(
                        offset,
                        "`rethrow` target is not a catch block",
                    ));
                }
                self.side.rethrow(pc, frame.entry_catch_depth);
                self.set_unreachable();
            }

            O::End {} => {
                let frame = self.frames.last().expect("control frame");
                let results = frame.results;
                if frame.kind == FrameKind::If && frame.params != frame.results {
                    return Err(Error::validation_at(
                        offset,
                        "`if` without `else` must leave its parameters unchanged",
                    ));
                }
                self.close_region(results, offset)?;

                let frame = self.frames.pop().expect("control frame");
                if frame.kind == FrameKind::If {
                    self.side.patch(frame.pc, None, pc + 1);
                }
                if matches!(
                    frame.kind,
                    FrameKind::Try | FrameKind::Catch | FrameKind::CatchAll
                ) {
                    self.handler_depth = frame.entry_handler_depth;
                    self.catch_depth = frame.entry_catch_depth;
                    self.side.jump(
                        pc,
                        BranchTarget {
                            pc: pc + 1,
                            height: u32::try_from(frame.height).unwrap(),
                            preserve: u32::try_from(results.len()).unwrap(),
                            handler_depth: frame.entry_handler_depth,
                            catch_depth: frame.entry_catch_depth,
                        },
                    );
                }
                for (branch_pc, slot) in &frame.fixups {
                    self.side.patch(*branch_pc, *slot, pc + 1);
                }
                if !self.frames.is_empty() {
                    self.push_tuple(results);
                }
            }

            O::Br { depth } => {
                let idx = self.frame_at_depth(*depth, offset)?;
                let label = self.frames[idx].label();
                self.pop_tuple(label, offset)?;
                let target = self.branch_target(pc, idx, None);
                self.side.jump(pc, target);
                self.set_unreachable();
            }
            O::BrIf { depth } => {
                self.pop(I32, offset)?;
                let idx = self.frame_at_depth(*depth, offset)?;
                let label = self.frames[idx].label();
                self.pop_tuple(label, offset)?;
                let target = self.branch_target(pc, idx, None);
                self.side.jump(pc, target);
                self.push_tuple(label);
            }
            O::BrTable { imm } => {
                self.pop(I32, offset)?;
                let default_idx = self.frame_at_depth(imm.default, offset)?;
                let default_label = self.frames[default_idx].label();
                for depth in imm.targets.iter() {
                    let idx = self.frame_at_depth(*depth, offset)?;
                    if self.frames[idx].label() != default_label {
                        return Err(Error::validation_at(
                            offset,
                            "br_table targets have mismatched label types",
                        ));
                    }
                }
                self.pop_tuple(default_label, offset)?;

                let mut targets = Vec::with_capacity(imm.targets.len() + 1);
                let depths: Vec<u32> = imm.targets.iter().copied().collect();
                for (slot, depth) in depths.iter().enumerate() {
                    let idx = self.frame_at_depth(*depth, offset)?;
                    targets.push(self.branch_target(pc, idx, Some(u32::try_from(slot).unwrap())));
                }
                let default_slot = u32::try_from(depths.len()).unwrap();
                targets.push(self.branch_target(pc, default_idx, Some(default_slot)));
                self.side.jump_table(pc, targets.into());
                self.set_unreachable();
            }
            O::Return {} => {
                let results = self.ty.results;
                self.pop_tuple(results, offset)?;
                self.set_unreachable();
            }

            O::Call { func } => {
                let Some(&type_index) = self.module.functions.get(*func) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown function {}", func.as_u32()),
                    ));
                };
                let ty = self.module.types[type_index];
                self.pop_tuple(ty.params, offset)?;
                self.push_tuple(ty.results);
            }
            O::CallIndirect { ty, table } => {
                if self.module.tables.get(*table).is_none() {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown table {}", table.as_u32()),
                    ));
                }
                let Some(&sig) = self.module.types.get(*ty) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown type {}", ty.as_u32()),
                    ));
                };
                self.pop(I32, offset)?;
                self.pop_tuple(sig.params, offset)?;
                self.push_tuple(sig.results);
            }
            O::ReturnCall { func } => {
                let Some(&type_index) = self.module.functions.get(*func) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown function {}", func.as_u32()),
                    ));
                };
                let ty = self.module.types[type_index];
                if ty.results != self.ty.results {
                    return Err(Error::validation_at(
                        offset,
                        "tail callee result types must match the caller",
                    ));
                }
                self.pop_tuple(ty.params, offset)?;
                self.set_unreachable();
            }
            O::ReturnCallIndirect { ty, table } => {
                if self.module.tables.get(*table).is_none() {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown table {}", table.as_u32()),
                    ));
                }
                let Some(&sig) = self.module.types.get(*ty) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown type {}", ty.as_u32()),
                    ));
                };
                if sig.results != self.ty.results {
                    return Err(Error::validation_at(
                        offset,
                        "tail callee result types must match the caller",
                    ));
                }
                self.pop(I32, offset)?;
                self.pop_tuple(sig.params, offset)?;
                self.set_unreachable();
            }

            // ---- parametric -------------------------------------------
            O::Drop {} => {
                self.pop_any(offset)?;
            }
            O::Select {} => {
                self.pop(I32, offset)?;
                let a = self.pop_any(offset)?;
                let b = self.pop_any(offset)?;
                if !a.matches(b) {
                    return Err(Error::validation_at(
                        offset,
                        format!("type mismatch in select: {a} vs {b}"),
                    ));
                }
                self.push(if a == ValType::Any { b } else { a });
            }

            // ---- variables --------------------------------------------
            O::LocalGet { local } => {
                let ty = self.local_type(local.as_u32(), offset)?;
                self.push(ty);
            }
            O::LocalSet { local } => {
                let ty = self.local_type(local.as_u32(), offset)?;
                self.pop(ty, offset)?;
            }
            O::LocalTee { local } => {
                let ty = self.local_type(local.as_u32(), offset)?;
                self.pop(ty, offset)?;
                self.push(ty);
            }
            O::GlobalGet { global } => {
                let Some(ty) = self.module.globals.get(*global) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown global {}", global.as_u32()),
                    ));
                };
                self.push(ty.content);
            }
            O::GlobalSet { global } => {
                let Some(ty) = self.module.globals.get(*global) else {
                    return Err(Error::validation_at(
                        offset,
                        format!("unknown global {}", global.as_u32()),
                    ));
                };
                if !ty.mutable {
                    return Err(Error::validation_at(offset, "cannot set an immutable global"));
                }
                self.pop(ty.content, offset)?;
            }

            // ---- memory ------------------------------------------------
            O::I32Load { arg } => self.load(arg, 2, I32, offset)?,
            O::I64Load { arg } => self.load(arg, 3, I64, offset)?,
            O::F32Load { arg } => self.load(arg, 2, F32, offset)?,
            O::F64Load { arg } => self.load(arg, 3, F64, offset)?,
            O::I32Load8S { arg } | O::I32Load8U { arg } => self.load(arg, 0, I32, offset)?,
            O::I32Load16S { arg } | O::I32Load16U { arg } => self.load(arg, 1, I32, offset)?,
            O::I64Load8S { arg } | O::I64Load8U { arg } => self.load(arg, 0, I64, offset)?,
            O::I64Load16S { arg } | O::I64Load16U { arg } => self.load(arg, 1, I64, offset)?,
            O::I64Load32S { arg } | O::I64Load32U { arg } => self.load(arg, 2, I64, offset)?,
            O::I32Store { arg } => self.store(arg, 2, I32, offset)?,
            O::I64Store { arg } => self.store(arg, 3, I64, offset)?,
            O::F32Store { arg } => self.store(arg, 2, F32, offset)?,
            O::F64Store { arg } => self.store(arg, 3, F64, offset)?,
            O::I32Store8 { arg } => self.store(arg, 0, I32, offset)?,
            O::I32Store16 { arg } => self.store(arg, 1, I32, offset)?,
            O::I64Store8 { arg } => self.store(arg, 0, I64, offset)?,
            O::I64Store16 { arg } => self.store(arg, 1, I64, offset)?,
            O::I64Store32 { arg } => self.store(arg, 2, I64, offset)?,
            O::MemorySize { memory } => {
                self.check_memory(memory.as_u32(), offset)?;
                self.push(I32);
            }
            O::MemoryGrow { memory } => {
                self.check_memory(memory.as_u32(), offset)?;
                self.sig(&[I32], &[I32], offset)?;
            }

            // ---- constants --------------------------------------------
            O::I32Const { .. } => self.push(I32),
            O::I64Const { .. } => self.push(I64),
            O::F32Const { .. } => self.push(F32),
            O::F64Const { .. } => self.push(F64),
            O::V128Const { .. } => self.push(V128),

            // ---- i32/i64 numerics -------------------------------------
            O::I32Eqz {} => self.sig(&[I32], &[I32], offset)?,
            O::I32Eq {} | O::I32Ne {} | O::I32LtS {} | O::I32LtU {} | O::I32GtS {}
            | O::I32GtU {} | O::I32LeS {} | O::I32LeU {} | O::I32GeS {} | O::I32GeU {}
            | O::I32Add {} | O::I32Sub {} | O::I32Mul {} | O::I32DivS {} | O::I32DivU {}
            | O::I32RemS {} | O::I32RemU {} | O::I32And {} | O::I32Or {} | O::I32Xor {}
            | O::I32Shl {} | O::I32ShrS {} | O::I32ShrU {} | O::I32Rotl {} | O::I32Rotr {} => {
                self.sig(&[I32, I32], &[I32], offset)?;
            }
            O::I32Clz {} | O::I32Ctz {} | O::I32Popcnt {} | O::I32Extend8S {}
            | O::I32Extend16S {} => self.sig(&[I32], &[I32], offset)?,

            O::I64Eqz {} => self.sig(&[I64], &[I32], offset)?,
            O::I64Eq {} | O::I64Ne {} | O::I64LtS {} | O::I64LtU {} | O::I64GtS {}
            | O::I64GtU {} | O::I64LeS {} | O::I64LeU {} | O::I64GeS {} | O::I64GeU {} => {
                self.sig(&[I64, I64], &[I32], offset)?;
            }
            O::I64Add {} | O::I64Sub {} | O::I64Mul {} | O::I64DivS {} | O::I64DivU {}
            | O::I64RemS {} | O::I64RemU {} | O::I64And {} | O::I64Or {} | O::I64Xor {}
            | O::I64Shl {} | O::I64ShrS {} | O::I64ShrU {} | O::I64Rotl {} | O::I64Rotr {} => {
                self.sig(&[I64, I64], &[I64], offset)?;
            }
            O::I64Clz {} | O::I64Ctz {} | O::I64Popcnt {} | O::I64Extend8S {}
            | O::I64Extend16S {} | O::I64Extend32S {} => self.sig(&[I64], &[I64], offset)?,

            // ---- float numerics ---------------------------------------
            O::F32Eq {} | O::F32Ne {} | O::F32Lt {} | O::F32Gt {} | O::F32Le {} | O::F32Ge {} => {
                self.sig(&[F32, F32], &[I32], offset)?;
            }
            O::F64Eq {} | O::F64Ne {} | O::F64Lt {} | O::F64Gt {} | O::F64Le {} | O::F64Ge {} => {
                self.sig(&[F64, F64], &[I32], offset)?;
            }
            O::F32Abs {} | O::F32Neg {} | O::F32Ceil {} | O::F32Floor {} | O::F32Trunc {}
            | O::F32Nearest {} | O::F32Sqrt {} => self.sig(&[F32], &[F32], offset)?,
            O::F32Add {} | O::F32Sub {} | O::F32Mul {} | O::F32Div {} | O::F32Min {}
            | O::F32Max {} | O::F32Copysign {} => self.sig(&[F32, F32], &[F32], offset)?,
            O::F64Abs {} | O::F64Neg {} | O::F64Ceil {} | O::F64Floor {} | O::F64Trunc {}
            | O::F64Nearest {} | O::F64Sqrt {} => self.sig(&[F64], &[F64], offset)?,
            O::F64Add {} | O::F64Sub {} | O::F64Mul {} | O::F64Div {} | O::F64Min {}
            | O::F64Max {} | O::F64Copysign {} => self.sig(&[F64, F64], &[F64], offset)?,

            // ---- conversions ------------------------------------------
            O::I32WrapI64 {} => self.sig(&[I64], &[I32], offset)?,
            O::I32TruncF32S {} | O::I32TruncF32U {} | O::I32TruncSatF32S {}
            | O::I32TruncSatF32U {} | O::I32ReinterpretF32 {} => {
                self.sig(&[F32], &[I32], offset)?;
            }
            O::I32TruncF64S {} | O::I32TruncF64U {} | O::I32TruncSatF64S {}
            | O::I32TruncSatF64U {} => self.sig(&[F64], &[I32], offset)?,
            O::I64ExtendI32S {} | O::I64ExtendI32U {} => self.sig(&[I32], &[I64], offset)?,
            O::I64TruncF32S {} | O::I64TruncF32U {} | O::I64TruncSatF32S {}
            | O::I64TruncSatF32U {} => self.sig(&[F32], &[I64], offset)?,
            O::I64TruncF64S {} | O::I64TruncF64U {} | O::I64TruncSatF64S {}
            | O::I64TruncSatF64U {} | O::I64ReinterpretF64 {} => {
                self.sig(&[F64], &[I64], offset)?;
            }
            O::F32ConvertI32S {} | O::F32ConvertI32U {} | O::F32ReinterpretI32 {} => {
                self.sig(&[I32], &[F32], offset)?;
            }
            O::F32ConvertI64S {} | O::F32ConvertI64U {} => self.sig(&[I64], &[F32], offset)?,
            O::F32DemoteF64 {} => self.sig(&[F64], &[F32], offset)?,
            O::F64ConvertI32S {} | O::F64ConvertI32U {} => self.sig(&[I32], &[F64], offset)?,
            O::F64ConvertI64S {} | O::F64ConvertI64U {} | O::F64ReinterpretI64 {} => {
                self.sig(&[I64], &[F64], offset)?;
            }
            O::F64PromoteF32 {} => self.sig(&[F32], &[F64], offset)?,

            // ---- references -------------------------------------------
            // Reference values never flow on the operand stack here; they
            // exist only in constant expressions and element segments.
            O::RefNull { .. } | O::RefIsNull {} | O::RefFunc { .. } => {
                return Err(Error::validation_at(
                    offset,
                    "reference operators are only legal in constant expressions",
                ));
            }

            // ---- bulk memory ------------------------------------------
            O::MemoryInit { data, memory } => {
                self.check_memory(memory.as_u32(), offset)?;
                self.check_data(data.as_u32(), offset)?;
                self.sig(&[I32, I32, I32], &[], offset)?;
            }
            O::DataDrop { data } => self.check_data(data.as_u32(), offset)?,
            O::MemoryCopy { dst, src } => {
                self.check_memory(dst.as_u32(), offset)?;
                self.check_memory(src.as_u32(), offset)?;
                self.sig(&[I32, I32, I32], &[], offset)?;
            }
            O::MemoryFill { memory } => {
                self.check_memory(memory.as_u32(), offset)?;
                self.sig(&[I32, I32, I32], &[], offset)?;
            }
            O::TableInit { elem, table } => {
                self.check_table(table.as_u32(), offset)?;
                self.check_elem(elem.as_u32(), offset)?;
                self.sig(&[I32, I32, I32], &[], offset)?;
            }
            O::ElemDrop { elem } => self.check_elem(elem.as_u32(), offset)?,
            O::TableCopy { dst, src } => {
                self.check_table(dst.as_u32(), offset)?;
                self.check_table(src.as_u32(), offset)?;
                self.sig(&[I32, I32, I32], &[], offset)?;
            }

            // ---- atomics ----------------------------------------------
            O::MemoryAtomicNotify { arg } => {
                self.atomic_memarg(arg, 2, offset)?;
                self.sig(&[I32, I32], &[I32], offset)?;
            }
            O::MemoryAtomicWait32 { arg } => {
                self.atomic_memarg(arg, 2, offset)?;
                self.sig(&[I32, I32, I64], &[I32], offset)?;
            }
            O::MemoryAtomicWait64 { arg } => {
                self.atomic_memarg(arg, 3, offset)?;
                self.sig(&[I32, I64, I64], &[I32], offset)?;
            }
            O::AtomicFence { .. } => {}

            O::I32AtomicLoad { arg } => self.atomic_load(arg, 2, I32, offset)?,
            O::I64AtomicLoad { arg } => self.atomic_load(arg, 3, I64, offset)?,
            O::I32AtomicLoad8U { arg } => self.atomic_load(arg, 0, I32, offset)?,
            O::I32AtomicLoad16U { arg } => self.atomic_load(arg, 1, I32, offset)?,
            O::I64AtomicLoad8U { arg } => self.atomic_load(arg, 0, I64, offset)?,
            O::I64AtomicLoad16U { arg } => self.atomic_load(arg, 1, I64, offset)?,
            O::I64AtomicLoad32U { arg } => self.atomic_load(arg, 2, I64, offset)?,
            O::I32AtomicStore { arg } => self.atomic_store(arg, 2, I32, offset)?,
            O::I64AtomicStore { arg } => self.atomic_store(arg, 3, I64, offset)?,
            O::I32AtomicStore8 { arg } => self.atomic_store(arg, 0, I32, offset)?,
            O::I32AtomicStore16 { arg } => self.atomic_store(arg, 1, I32, offset)?,
            O::I64AtomicStore8 { arg } => self.atomic_store(arg, 0, I64, offset)?,
            O::I64AtomicStore16 { arg } => self.atomic_store(arg, 1, I64, offset)?,
            O::I64AtomicStore32 { arg } => self.atomic_store(arg, 2, I64, offset)?,

            O::I32AtomicRmwAdd { arg } | O::I32AtomicRmwSub { arg } | O::I32AtomicRmwAnd { arg }
            | O::I32AtomicRmwOr { arg } | O::I32AtomicRmwXor { arg }
            | O::I32AtomicRmwXchg { arg } => self.atomic_rmw(arg, 2, I32, offset)?,
            O::I64AtomicRmwAdd { arg } | O::I64AtomicRmwSub { arg } | O::I64AtomicRmwAnd { arg }
            | O::I64AtomicRmwOr { arg } | O::I64AtomicRmwXor { arg }
            | O::I64AtomicRmwXchg { arg } => self.atomic_rmw(arg, 3, I64, offset)?,
            O::I32AtomicRmw8AddU { arg } | O::I32AtomicRmw8SubU { arg }
            | O::I32AtomicRmw8AndU { arg } | O::I32AtomicRmw8OrU { arg }
            | O::I32AtomicRmw8XorU { arg } | O::I32AtomicRmw8XchgU { arg } => {
                self.atomic_rmw(arg, 0, I32, offset)?;
            }
            O::I32AtomicRmw16AddU { arg } | O::I32AtomicRmw16SubU { arg }
            | O::I32AtomicRmw16AndU { arg } | O::I32AtomicRmw16OrU { arg }
            | O::I32AtomicRmw16XorU { arg } | O::I32AtomicRmw16XchgU { arg } => {
                self.atomic_rmw(arg, 1, I32, offset)?;
            }
            O::I64AtomicRmw8AddU { arg } | O::I64AtomicRmw8SubU { arg }
            | O::I64AtomicRmw8AndU { arg } | O::I64AtomicRmw8OrU { arg }
            | O::I64AtomicRmw8XorU { arg } | O::I64AtomicRmw8XchgU { arg } => {
                self.atomic_rmw(arg, 0, I64, offset)?;
            }
            O::I64AtomicRmw16AddU { arg } | O::I64AtomicRmw16SubU { arg }
            | O::I64AtomicRmw16AndU { arg } | O::I64AtomicRmw16OrU { arg }
            | O::I64AtomicRmw16XorU { arg } | O::I64AtomicRmw16XchgU { arg } => {
                self.atomic_rmw(arg, 1, I64, offset)?;
            }
            O::I64AtomicRmw32AddU { arg } | O::I64AtomicRmw32SubU { arg }
            | O::I64AtomicRmw32AndU { arg } | O::I64AtomicRmw32OrU { arg }
            | O::I64AtomicRmw32XorU { arg } | O::I64AtomicRmw32XchgU { arg } => {
                self.atomic_rmw(arg, 2, I64, offset)?;
            }
            O::I32AtomicRmwCmpxchg { arg } => self.atomic_cmpxchg(arg, 2, I32, offset)?,
            O::I64AtomicRmwCmpxchg { arg } => self.atomic_cmpxchg(arg, 3, I64, offset)?,
            O::I32AtomicRmw8CmpxchgU { arg } => self.atomic_cmpxchg(arg, 0, I32, offset)?,
            O::I32AtomicRmw16CmpxchgU { arg } => self.atomic_cmpxchg(arg, 1, I32, offset)?,
            O::I64AtomicRmw8CmpxchgU { arg } => self.atomic_cmpxchg(arg, 0, I64, offset)?,
            O::I64AtomicRmw16CmpxchgU { arg } => self.atomic_cmpxchg(arg, 1, I64, offset)?,
            O::I64AtomicRmw32CmpxchgU { arg } => self.atomic_cmpxchg(arg, 2, I64, offset)?,

            // ---- simd --------------------------------------------------
            O::V128Load { arg } => self.load(arg, 4, V128, offset)?,
            O::V128Store { arg } => self.store(arg, 4, V128, offset)?,
            O::I8x16Shuffle { lanes } => {
                if lanes.0.iter().any(|lane| *lane >= 32) {
                    return Err(Error::validation_at(offset, "shuffle lane index out of range"));
                }
                self.sig(&[V128, V128], &[V128], offset)?;
            }
            O::I8x16Splat {} | O::I16x8Splat {} | O::I32x4Splat {} => {
                self.sig(&[I32], &[V128], offset)?;
            }
            O::I64x2Splat {} => self.sig(&[I64], &[V128], offset)?,
            O::F32x4Splat {} => self.sig(&[F32], &[V128], offset)?,
            O::F64x2Splat {} => self.sig(&[F64], &[V128], offset)?,

            O::I8x16ExtractLaneS { lane } | O::I8x16ExtractLaneU { lane } => {
                self.check_lane(lane.0, 16, offset)?;
                self.sig(&[V128], &[I32], offset)?;
            }
            O::I8x16ReplaceLane { lane } => {
                self.check_lane(lane.0, 16, offset)?;
                self.sig(&[V128, I32], &[V128], offset)?;
            }
            O::I16x8ExtractLaneS { lane } | O::I16x8ExtractLaneU { lane } => {
                self.check_lane(lane.0, 8, offset)?;
                self.sig(&[V128], &[I32], offset)?;
            }
            O::I16x8ReplaceLane { lane } => {
                self.check_lane(lane.0, 8, offset)?;
                self.sig(&[V128, I32], &[V128], offset)?;
            }
            O::I32x4ExtractLane { lane } => {
                self.check_lane(lane.0, 4, offset)?;
                self.sig(&[V128], &[I32], offset)?;
            }
            O::I32x4ReplaceLane { lane } => {
                self.check_lane(lane.0, 4, offset)?;
                self.sig(&[V128, I32], &[V128], offset)?;
            }
            O::I64x2ExtractLane { lane } => {
                self.check_lane(lane.0, 2, offset)?;
                self.sig(&[V128], &[I64], offset)?;
            }
            O::I64x2ReplaceLane { lane } => {
                self.check_lane(lane.0, 2, offset)?;
                self.sig(&[V128, I64], &[V128], offset)?;
            }
            O::F32x4ExtractLane { lane } => {
                self.check_lane(lane.0, 4, offset)?;
                self.sig(&[V128], &[F32], offset)?;
            }
            O::F32x4ReplaceLane { lane } => {
                self.check_lane(lane.0, 4, offset)?;
                self.sig(&[V128, F32], &[V128], offset)?;
            }
            O::F64x2ExtractLane { lane } => {
                self.check_lane(lane.0, 2, offset)?;
                self.sig(&[V128], &[F64], offset)?;
            }
            O::F64x2ReplaceLane { lane } => {
                self.check_lane(lane.0, 2, offset)?;
                self.sig(&[V128, F64], &[V128], offset)?;
            }

            // Everything lane-wise with two vector operands.
            O::I8x16Swizzle {} | O::I8x16Eq {} | O::I8x16Ne {} | O::I8x16LtS {}
            | O::I8x16LtU {} | O::I8x16GtS {} | O::I8x16GtU {} | O::I8x16LeS {}
            | O::I8x16LeU {} | O::I8x16GeS {} | O::I8x16GeU {} | O::I16x8Eq {} | O::I16x8Ne {}
            | O::I16x8LtS {} | O::I16x8LtU {} | O::I16x8GtS {} | O::I16x8GtU {}
            | O::I16x8LeS {} | O::I16x8LeU {} | O::I16x8GeS {} | O::I16x8GeU {} | O::I32x4Eq {}
            | O::I32x4Ne {} | O::I32x4LtS {} | O::I32x4LtU {} | O::I32x4GtS {}
            | O::I32x4GtU {} | O::I32x4LeS {} | O::I32x4LeU {} | O::I32x4GeS {}
            | O::I32x4GeU {} | O::I64x2Eq {} | O::I64x2Ne {} | O::I64x2LtS {} | O::I64x2GtS {}
            | O::I64x2LeS {} | O::I64x2GeS {} | O::F32x4Eq {} | O::F32x4Ne {} | O::F32x4Lt {}
            | O::F32x4Gt {} | O::F32x4Le {} | O::F32x4Ge {} | O::F64x2Eq {} | O::F64x2Ne {}
            | O::F64x2Lt {} | O::F64x2Gt {} | O::F64x2Le {} | O::F64x2Ge {} | O::V128And {}
            | O::V128AndNot {} | O::V128Or {} | O::V128Xor {} | O::I8x16Add {} | O::I8x16Sub {}
            | O::I16x8Add {} | O::I16x8Sub {} | O::I16x8Mul {} | O::I32x4Add {}
            | O::I32x4Sub {} | O::I32x4Mul {} | O::I64x2Add {} | O::I64x2Sub {}
            | O::I64x2Mul {} | O::F32x4Add {} | O::F32x4Sub {} | O::F32x4Mul {}
            | O::F32x4Div {} | O::F32x4Min {} | O::F32x4Max {} | O::F64x2Add {}
            | O::F64x2Sub {} | O::F64x2Mul {} | O::F64x2Div {} | O::F64x2Min {}
            | O::F64x2Max {} => self.sig(&[V128, V128], &[V128], offset)?,

            // Lane-wise with one vector operand.
            O::V128Not {} | O::I8x16Abs {} | O::I8x16Neg {} | O::I16x8Abs {} | O::I16x8Neg {}
            | O::I32x4Abs {} | O::I32x4Neg {} | O::I64x2Abs {} | O::I64x2Neg {}
            | O::F32x4Abs {} | O::F32x4Neg {} | O::F32x4Sqrt {} | O::F64x2Abs {}
            | O::F64x2Neg {} | O::F64x2Sqrt {} | O::I32x4TruncSatF32x4S {}
            | O::I32x4TruncSatF32x4U {} | O::F32x4ConvertI32x4S {} | O::F32x4ConvertI32x4U {} => {
                self.sig(&[V128], &[V128], offset)?;
            }

            O::V128Bitselect {} => self.sig(&[V128, V128, V128], &[V128], offset)?,
            O::V128AnyTrue {} | O::I8x16AllTrue {} | O::I8x16Bitmask {} | O::I16x8AllTrue {}
            | O::I16x8Bitmask {} | O::I32x4AllTrue {} | O::I32x4Bitmask {} | O::I64x2AllTrue {}
            | O::I64x2Bitmask {} => self.sig(&[V128], &[I32], offset)?,
            O::I8x16Shl {} | O::I8x16ShrS {} | O::I8x16ShrU {} | O::I16x8Shl {}
            | O::I16x8ShrS {} | O::I16x8ShrU {} | O::I32x4Shl {} | O::I32x4ShrS {}
            | O::I32x4ShrU {} | O::I64x2Shl {} | O::I64x2ShrS {} | O::I64x2ShrU {} => {
                self.sig(&[V128, I32], &[V128], offset)?;
            }
        }

        self.ops.push(op);
        Ok(())
    }

    // ---- per-category helpers ------------------------------------------

    fn local_type(&self, index: u32, offset: usize) -> crate::Result<ValType> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::validation_at(offset, format!("unknown local {index}")))
    }

    fn check_memory(&self, index: u32, offset: usize) -> crate::Result<()> {
        if self
            .module
            .memories
            .get(crate::indices::MemoryIndex::from_u32(index))
            .is_none()
        {
            return Err(Error::validation_at(offset, format!("unknown memory {index}")));
        }
        Ok(())
    }

    fn check_table(&self, index: u32, offset: usize) -> crate::Result<()> {
        if self
            .module
            .tables
            .get(crate::indices::TableIndex::from_u32(index))
            .is_none()
        {
            return Err(Error::validation_at(offset, format!("unknown table {index}")));
        }
        Ok(())
    }

    fn check_data(&self, index: u32, offset: usize) -> crate::Result<()> {
        let count = self.module.data_count.ok_or_else(|| {
            Error::validation_at(offset, "data operations require a data count section")
        })?;
        if index >= count {
            return Err(Error::validation_at(
                offset,
                format!("unknown data segment {index}"),
            ));
        }
        Ok(())
    }

    fn check_elem(&self, index: u32, offset: usize) -> crate::Result<()> {
        if index as usize >= self.module.element_segments.len() {
            return Err(Error::validation_at(
                offset,
                format!("unknown element segment {index}"),
            ));
        }
        Ok(())
    }

    fn check_lane(&self, lane: u8, count: u8, offset: usize) -> crate::Result<()> {
        if lane >= count {
            return Err(Error::validation_at(
                offset,
                format!("lane index {lane} out of range for {count} lanes"),
            ));
        }
        Ok(())
    }

    fn memarg(&self, arg: &MemArg, natural: u32, offset: usize) -> crate::Result<()> {
        self.check_memory(arg.memory.as_u32(), offset)?;
        if arg.align_log2 > natural {
            return Err(Error::validation_at(
                offset,
                "alignment must not be larger than natural alignment",
            ));
        }
        Ok(())
    }

    fn atomic_memarg(&self, arg: &MemArg, natural: u32, offset: usize) -> crate::Result<()> {
        self.check_memory(arg.memory.as_u32(), offset)?;
        if arg.align_log2 != natural {
            return Err(Error::validation_at(
                offset,
                "atomic alignment must equal natural alignment",
            ));
        }
        Ok(())
    }

    fn load(
        &mut self,
        arg: &MemArg,
        natural: u32,
        ty: ValType,
        offset: usize,
    ) -> crate::Result<()> {
        self.memarg(arg, natural, offset)?;
        self.sig(&[ValType::I32], &[ty], offset)
    }

    fn store(
        &mut self,
        arg: &MemArg,
        natural: u32,
        ty: ValType,
        offset: usize,
    ) -> crate::Result<()> {
        self.memarg(arg, natural, offset)?;
        self.sig(&[ValType::I32, ty], &[], offset)
    }

    fn atomic_load(
        &mut self,
        arg: &MemArg,
        natural: u32,
        ty: ValType,
        offset: usize,
    ) -> crate::Result<()> {
        self.atomic_memarg(arg, natural, offset)?;
        self.sig(&[ValType::I32], &[ty], offset)
    }

    fn atomic_store(
        &mut self,
        arg: &MemArg,
        natural: u32,
        ty: ValType,
        offset: usize,
    ) -> crate::Result<()> {
        self.atomic_memarg(arg, natural, offset)?;
        self.sig(&[ValType::I32, ty], &[], offset)
    }

    fn atomic_rmw(
        &mut self,
        arg: &MemArg,
        natural: u32,
        ty: ValType,
        offset: usize,
    ) -> crate::Result<()> {
        self.atomic_memarg(arg, natural, offset)?;
        self.sig(&[ValType::I32, ty], &[ty], offset)
    }

    fn atomic_cmpxchg(
        &mut self,
        arg: &MemArg,
        natural: u32,
        ty: ValType,
        offset: usize,
    ) -> crate::Result<()> {
        self.atomic_memarg(arg, natural, offset)?;
        self.sig(&[ValType::I32, ty, ty], &[ty], offset)
    }
}
