//! The execution tier: a threaded interpreter over lowered function bodies.
//!
//! Control flow never recurses on the host stack; calls push explicit
//! frames and branches are applied from the pre-resolved side table, so
//! deeply nested guest control structure cannot overflow the host stack.
//! Every memory and table access is bounds-checked before it is performed;
//! the guard reservation behind each memory is a second line of defense,
//! not the first.

mod numeric;
mod simd;

use crate::compartment::{Compartment, InstanceHandle, Stored};
use crate::compile::{BranchInfo, BranchTarget};
use crate::errors::Error;
use crate::func::{Func, FuncKind};
use crate::indices::{DataIndex, DefinedFuncIndex, ElemIndex, FuncIndex, MemoryIndex, TableIndex};
use crate::memory::MemoryData;
use crate::module::Module;
use crate::table::TableData;
use crate::tag::Tag;
use crate::translate::{MemArg, Operator};
use crate::trap::{Trap, TrapFrame, TrapKind};
use crate::values::VMVal;
use crate::{MAX_CALL_DEPTH, MAX_VALUE_STACK};
use alloc::string::ToString;
use alloc::vec::Vec;
use core::sync::atomic::{
    fence, AtomicU16, AtomicU32, AtomicU64, AtomicU8,
    Ordering::SeqCst,
};
use core::time::Duration;
use smallvec::{smallvec, SmallVec};

/// A thrown exception in flight: the tag identity plus its arguments.
#[derive(Debug, Clone)]
pub(crate) struct WasmException {
    tag: Tag,
    args: SmallVec<[VMVal; 4]>,
}

pub(crate) enum Unwind {
    Trap(Trap),
    Exception(WasmException),
}

/// Calls a function with raw arguments, returning raw results.
///
/// This is the single entry point from host to guest; traps and uncaught
/// exceptions unwind every guest frame and surface here.
pub(crate) fn invoke(
    compartment: &mut Compartment,
    func: Func,
    args: &[VMVal],
) -> crate::Result<SmallVec<[VMVal; 4]>> {
    let data = &compartment[func.0];
    let result_count = data.ty.results.len();
    match &data.kind {
        FuncKind::Host(callback) => {
            let callback = callback.clone();
            let mut out: SmallVec<[VMVal; 4]> = smallvec![VMVal::zero(); result_count];
            callback(compartment, args, &mut out).map_err(Error::Trap)?;
            Ok(out)
        }
        FuncKind::Wasm { .. } => {
            let depth_before = compartment.call_depth;
            let mut executor = Executor {
                compartment,
                stack: Vec::with_capacity(64),
                frames: Vec::with_capacity(8),
            };
            executor.stack.extend_from_slice(args);
            let result = executor.call(func, false).and_then(|()| executor.run());
            let outcome = match result {
                Ok(()) => Ok(executor.stack.drain(..).collect()),
                Err(Unwind::Trap(trap)) => Err(Error::Trap(trap)),
                Err(Unwind::Exception(_)) => Err(Error::Trap(Trap::new(
                    TrapKind::UncaughtException,
                    "exception crossed the host boundary",
                ))),
            };
            executor.compartment.call_depth = depth_before;
            outcome
        }
    }
}

struct Frame {
    instance: InstanceHandle,
    module: Module,
    def_index: DefinedFuncIndex,
    func_index: FuncIndex,
    locals: Vec<VMVal>,
    pc: usize,
    /// Operand-stack base of this frame.
    base: usize,
    /// Active exception handlers: the pc of each live `try`.
    handlers: Vec<u32>,
    /// Exceptions caught by currently executing catch blocks.
    caught: Vec<WasmException>,
    result_count: usize,
}

struct Executor<'a> {
    compartment: &'a mut Compartment,
    stack: Vec<VMVal>,
    frames: Vec<Frame>,
}

impl Executor<'_> {
    fn run(&mut self) -> Result<(), Unwind> {
        loop {
            if self.frames.is_empty() {
                return Ok(());
            }
            let fetched = {
                let frame = self.frames.last_mut().expect("frame");
                let compiled = frame.module.compiled(frame.def_index);
                if frame.pc == compiled.ops.len() {
                    None
                } else {
                    let pc = frame.pc;
                    frame.pc += 1;
                    Some((compiled.ops[pc].clone(), u32::try_from(pc).unwrap()))
                }
            };
            match fetched {
                None => {
                    // Implicit return at the end of the body.
                    self.ret();
                }
                Some((op, pc)) => self.step(op, pc)?,
            }
        }
    }

    // ---- stack and frame plumbing --------------------------------------

    #[inline]
    fn push(&mut self, value: VMVal) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> VMVal {
        self.stack.pop().expect("validated operand stack")
    }

    fn trap(&self, kind: TrapKind, message: impl Into<alloc::string::String>) -> Unwind {
        Unwind::Trap(Trap::new(kind, message).with_stack(self.backtrace()))
    }

    fn backtrace(&self) -> Vec<TrapFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| TrapFrame {
                func_index: frame.func_index.as_u32(),
                func_name: frame
                    .module
                    .translated()
                    .func_name(frame.func_index)
                    .map(ToString::to_string),
            })
            .collect()
    }

    fn check_safepoint(&self) -> Result<(), Unwind> {
        if self.compartment.is_terminated() {
            return Err(self.trap(TrapKind::Terminated, ""));
        }
        Ok(())
    }

    fn apply_branch(&mut self, target: BranchTarget) -> Result<(), Unwind> {
        self.check_safepoint()?;
        let frame = self.frames.last_mut().expect("frame");
        let dst = frame.base + target.height as usize;
        let preserve = target.preserve as usize;
        let src = self.stack.len() - preserve;
        self.stack.copy_within(src.., dst);
        self.stack.truncate(dst + preserve);
        frame.handlers.truncate(target.handler_depth as usize);
        frame.caught.truncate(target.catch_depth as usize);
        frame.pc = target.pc as usize;
        Ok(())
    }

    fn jump_target(&self, pc: u32) -> BranchTarget {
        let frame = self.frames.last().expect("frame");
        match frame.module.compiled(frame.def_index).side.branch(pc) {
            BranchInfo::Jump(target) => *target,
            BranchInfo::Table { .. } => unreachable!("jump looked up a br_table"),
        }
    }

    /// Pops the current frame, sliding its results down to the frame base.
    /// Returns whether this was the outermost frame.
    fn ret(&mut self) -> bool {
        let frame = self.frames.pop().expect("frame");
        self.compartment.call_depth -= 1;
        let results_start = self.stack.len() - frame.result_count;
        self.stack.copy_within(results_start.., frame.base);
        self.stack.truncate(frame.base + frame.result_count);
        self.frames.is_empty()
    }

    fn call(&mut self, func: Func, tail: bool) -> Result<(), Unwind> {
        self.check_safepoint()?;
        let data = &self.compartment[func.0];
        let ty = data.ty;
        let param_count = ty.params.len();
        let result_count = ty.results.len();

        match &data.kind {
            FuncKind::Host(callback) => {
                let callback = callback.clone();
                let args_start = self.stack.len() - param_count;
                let args: SmallVec<[VMVal; 8]> = self.stack.drain(args_start..).collect();
                let mut out: SmallVec<[VMVal; 4]> = smallvec![VMVal::zero(); result_count];
                callback(self.compartment, &args, &mut out)
                    .map_err(|trap| Unwind::Trap(trap.with_stack(self.backtrace())))?;
                self.stack.extend(out);
                if tail {
                    self.ret();
                }
                Ok(())
            }
            FuncKind::Wasm { instance, def_index } => {
                if self.compartment.call_depth >= MAX_CALL_DEPTH
                    || self.stack.len() >= MAX_VALUE_STACK
                {
                    return Err(self.trap(TrapKind::StackOverflow, ""));
                }
                let instance = *instance;
                let def_index = *def_index;
                let module = self.compartment.instance_data(instance).module.clone();

                let args_start = self.stack.len() - param_count;
                let base = if tail {
                    let frame = self.frames.pop().expect("frame for tail call");
                    self.compartment.call_depth -= 1;
                    self.stack.copy_within(args_start.., frame.base);
                    self.stack.truncate(frame.base + param_count);
                    frame.base
                } else {
                    args_start
                };

                let declared = module.compiled(def_index).locals.len();
                let mut locals = Vec::with_capacity(param_count + declared);
                locals.extend(self.stack.drain(base..));
                locals.resize(param_count + declared, VMVal::zero());

                self.frames.push(Frame {
                    instance,
                    func_index: module.translated().func_index(def_index),
                    module,
                    def_index,
                    locals,
                    pc: 0,
                    base,
                    handlers: Vec::new(),
                    caught: Vec::new(),
                    result_count,
                });
                self.compartment.call_depth += 1;
                Ok(())
            }
        }
    }

    // ---- instance object resolution ------------------------------------

    fn memory(&self, index: MemoryIndex) -> Stored<MemoryData> {
        let frame = self.frames.last().expect("frame");
        self.compartment.instance_data(frame.instance).memories[index].0
    }

    fn table(&self, index: TableIndex) -> Stored<TableData> {
        let frame = self.frames.last().expect("frame");
        self.compartment.instance_data(frame.instance).tables[index].0
    }

    fn oob(&self) -> Unwind {
        self.trap(TrapKind::AccessViolation, "out of bounds memory access")
    }

    // ---- memory access --------------------------------------------------

    fn mem_load<const N: usize>(&mut self, arg: &MemArg) -> Result<[u8; N], Unwind> {
        let addr = self.pop().get_u32();
        let stored = self.memory(arg.memory);
        let memory = &self.compartment[stored];
        let ea = u64::from(addr) + arg.offset;
        if ea + N as u64 > memory.byte_size() as u64 {
            return Err(self.oob());
        }
        let mut buf = [0_u8; N];
        // SAFETY: the span was bounds-checked against the committed length.
        unsafe {
            core::ptr::copy_nonoverlapping(
                memory.base_ptr().add(ea as usize),
                buf.as_mut_ptr(),
                N,
            );
        }
        Ok(buf)
    }

    fn mem_store<const N: usize>(&mut self, arg: &MemArg, bytes: [u8; N]) -> Result<(), Unwind> {
        let addr = self.pop().get_u32();
        let stored = self.memory(arg.memory);
        let memory = &self.compartment[stored];
        let ea = u64::from(addr) + arg.offset;
        if ea + N as u64 > memory.byte_size() as u64 {
            return Err(self.oob());
        }
        // SAFETY: bounds-checked above; we have exclusive logical access.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), memory.base_ptr().add(ea as usize), N);
        }
        Ok(())
    }

    /// Computes and checks the effective address of an atomic access:
    /// bounds-checked and naturally aligned.
    fn atomic_ea(
        &self,
        arg: &MemArg,
        addr: u32,
        size: u64,
    ) -> Result<(Stored<MemoryData>, usize), Unwind> {
        let stored = self.memory(arg.memory);
        let memory = &self.compartment[stored];
        let ea = u64::from(addr) + arg.offset;
        if ea + size > memory.byte_size() as u64 {
            return Err(self.oob());
        }
        if ea % size != 0 {
            return Err(self.trap(TrapKind::AccessViolation, "misaligned atomic access"));
        }
        Ok((stored, ea as usize))
    }

    fn atomic_rmw(
        &mut self,
        arg: &MemArg,
        size: u64,
        wide: bool,
        op: AtomOp,
    ) -> Result<(), Unwind> {
        let operand = if wide {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        };
        let addr = self.pop().get_u32();
        let (stored, ea) = self.atomic_ea(arg, addr, size)?;
        let base = self.compartment[stored].base_ptr();

        macro_rules! rmw {
            ($atomic:ty, $prim:ty) => {{
                // SAFETY: in bounds and naturally aligned per atomic_ea.
                let atomic = unsafe { &*(base.add(ea).cast::<$atomic>()) };
                let value = operand as $prim;
                let old = match op {
                    AtomOp::Add => atomic.fetch_add(value, SeqCst),
                    AtomOp::Sub => atomic.fetch_sub(value, SeqCst),
                    AtomOp::And => atomic.fetch_and(value, SeqCst),
                    AtomOp::Or => atomic.fetch_or(value, SeqCst),
                    AtomOp::Xor => atomic.fetch_xor(value, SeqCst),
                    AtomOp::Xchg => atomic.swap(value, SeqCst),
                };
                old as u64
            }};
        }
        let old = match size {
            1 => rmw!(AtomicU8, u8),
            2 => rmw!(AtomicU16, u16),
            4 => rmw!(AtomicU32, u32),
            8 => rmw!(AtomicU64, u64),
            _ => unreachable!(),
        };
        self.push(if wide {
            VMVal::i64(old as i64)
        } else {
            VMVal::i32(old as u32 as i32)
        });
        Ok(())
    }

    fn atomic_cmpxchg(&mut self, arg: &MemArg, size: u64, wide: bool) -> Result<(), Unwind> {
        let (expected, replacement) = if wide {
            let replacement = self.pop().get_u64();
            let expected = self.pop().get_u64();
            (expected, replacement)
        } else {
            let replacement = u64::from(self.pop().get_u32());
            let expected = u64::from(self.pop().get_u32());
            (expected, replacement)
        };
        let addr = self.pop().get_u32();
        let (stored, ea) = self.atomic_ea(arg, addr, size)?;
        let base = self.compartment[stored].base_ptr();

        macro_rules! cmpxchg {
            ($atomic:ty, $prim:ty) => {{
                // SAFETY: in bounds and naturally aligned per atomic_ea.
                let atomic = unsafe { &*(base.add(ea).cast::<$atomic>()) };
                let old = match atomic.compare_exchange(
                    expected as $prim,
                    replacement as $prim,
                    SeqCst,
                    SeqCst,
                ) {
                    Ok(old) | Err(old) => old,
                };
                old as u64
            }};
        }
        let old = match size {
            1 => cmpxchg!(AtomicU8, u8),
            2 => cmpxchg!(AtomicU16, u16),
            4 => cmpxchg!(AtomicU32, u32),
            8 => cmpxchg!(AtomicU64, u64),
            _ => unreachable!(),
        };
        self.push(if wide {
            VMVal::i64(old as i64)
        } else {
            VMVal::i32(old as u32 as i32)
        });
        Ok(())
    }

    fn atomic_wait(&mut self, arg: &MemArg, wide: bool) -> Result<(), Unwind> {
        let timeout = self.pop().get_i64();
        let expected = if wide {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        };
        let addr = self.pop().get_u32();
        let size = if wide { 8 } else { 4 };
        let (stored, ea) = self.atomic_ea(arg, addr, size)?;

        let Some(shared) = self.compartment[stored].shared().cloned() else {
            return Err(self.trap(
                TrapKind::AccessViolation,
                "atomic wait on non-shared memory",
            ));
        };
        let base = self.compartment[stored].base_ptr();
        let timeout = u64::try_from(timeout).ok().map(Duration::from_nanos);

        let result = shared.parking().wait(
            ea as u64,
            || {
                // SAFETY: checked by atomic_ea; the reservation never moves.
                unsafe {
                    if wide {
                        (*base.add(ea).cast::<AtomicU64>()).load(SeqCst) == expected
                    } else {
                        (*base.add(ea).cast::<AtomicU32>()).load(SeqCst) == expected as u32
                    }
                }
            },
            timeout,
        );
        self.push(VMVal::i32(result.as_i32()));
        Ok(())
    }

    fn atomic_notify(&mut self, arg: &MemArg) -> Result<(), Unwind> {
        let count = self.pop().get_u32();
        let addr = self.pop().get_u32();
        let (stored, ea) = self.atomic_ea(arg, addr, 4)?;
        let woken = match self.compartment[stored].shared() {
            Some(shared) => shared.parking().notify(ea as u64, count),
            // Nobody can ever be parked on an unshared memory.
            None => 0,
        };
        self.push(VMVal::i32(woken as i32));
        Ok(())
    }

    // ---- exceptions -----------------------------------------------------

    fn throw(&mut self, exn: WasmException) -> Result<(), Unwind> {
        let mut exn = exn;
        loop {
            let Some(frame_idx) = self.frames.len().checked_sub(1) else {
                return Err(Unwind::Exception(exn));
            };
            let module = self.frames[frame_idx].module.clone();
            let def_index = self.frames[frame_idx].def_index;
            let instance = self.frames[frame_idx].instance;

            let mut i = self.frames[frame_idx].handlers.len();
            let mut caught_here = None;
            while i > 0 {
                i -= 1;
                let try_pc = self.frames[frame_idx].handlers[i];
                let entry = module.compiled(def_index).side.handler(try_pc).clone();
                if let Some(limit) = entry.delegate {
                    // A delegating try forwards to the handlers active at its
                    // target label.
                    i = i.min(limit as usize);
                    continue;
                }
                let tags = &self.compartment.instance_data(instance).tags;
                let target = entry
                    .catches
                    .iter()
                    .find(|(tag_index, _)| tags[*tag_index] == exn.tag)
                    .map(|(_, pc)| (*pc, true))
                    .or(entry.catch_all.map(|pc| (pc, false)));
                if let Some((pc, with_args)) = target {
                    caught_here = Some((i, entry, pc, with_args));
                    break;
                }
            }

            match caught_here {
                Some((index, entry, pc, with_args)) => {
                    let frame = &mut self.frames[frame_idx];
                    frame.handlers.truncate(index);
                    frame.caught.truncate(entry.catch_depth as usize);
                    let dst = frame.base + entry.height as usize;
                    self.stack.truncate(dst);
                    if with_args {
                        self.stack.extend(exn.args.iter().copied());
                    }
                    frame.caught.push(exn);
                    frame.pc = pc as usize;
                    return Ok(());
                }
                None => {
                    let frame = self.frames.pop().expect("frame");
                    self.compartment.call_depth -= 1;
                    self.stack.truncate(frame.base);
                }
            }
        }
    }

    // ---- the dispatch loop ---------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, op: Operator, pc: u32) -> Result<(), Unwind> {
        use Operator as O;

        match &op {
            O::Unreachable {} => return Err(self.trap(TrapKind::Unreachable, "")),
            O::Nop {} | O::Block { .. } | O::Loop { .. } | O::AtomicFence { .. } => {
                if matches!(op, O::AtomicFence { .. }) {
                    fence(SeqCst);
                }
            }

            O::If { .. } => {
                let cond = self.pop().get_i32();
                if cond == 0 {
                    let target = self.jump_target(pc);
                    self.apply_branch(target)?;
                }
            }
            // Fallthrough out of a then-branch, a protected try body or a
            // catch body: jump past `end`, unwinding handler/caught stacks.
            O::Else {} | O::Catch { .. } | O::CatchAll {} | O::Delegate { .. } => {
                let target = self.jump_target(pc);
                self.apply_branch(target)?;
            }
            O::End {} => {
                let frame = self.frames.last().expect("frame");
                if let Some(BranchInfo::Jump(target)) =
                    frame.module.compiled(frame.def_index).side.try_branch(pc)
                {
                    let target = *target;
                    self.apply_branch(target)?;
                }
            }

            O::Try { .. } => {
                self.frames.last_mut().expect("frame").handlers.push(pc);
            }
            O::Throw { tag } => {
                let frame = self.frames.last().expect("frame");
                let tag_handle = self.compartment.instance_data(frame.instance).tags[*tag];
                let param_count = self.compartment[tag_handle.0].ty.params.len();
                let start = self.stack.len() - param_count;
                let args: SmallVec<[VMVal; 4]> = self.stack.drain(start..).collect();
                self.throw(WasmException {
                    tag: tag_handle,
                    args,
                })?;
            }
            O::Rethrow { .. } => {
                let frame = self.frames.last().expect("frame");
                let index = frame.module.compiled(frame.def_index).side.rethrow(pc);
                let exn = frame.caught[index as usize].clone();
                self.throw(exn)?;
            }

            O::Br { .. } => {
                let target = self.jump_target(pc);
                self.apply_branch(target)?;
            }
            O::BrIf { .. } => {
                let cond = self.pop().get_i32();
                if cond != 0 {
                    let target = self.jump_target(pc);
                    self.apply_branch(target)?;
                }
            }
            O::BrTable { .. } => {
                let index = self.pop().get_u32() as usize;
                let frame = self.frames.last().expect("frame");
                let target = match frame.module.compiled(frame.def_index).side.branch(pc) {
                    BranchInfo::Table { targets } => {
                        let slot = index.min(targets.len() - 1);
                        targets[slot]
                    }
                    BranchInfo::Jump(_) => unreachable!("br_table looked up a jump"),
                };
                self.apply_branch(target)?;
            }
            O::Return {} => {
                self.ret();
            }

            O::Call { func } => {
                let frame = self.frames.last().expect("frame");
                let callee = self.compartment.instance_data(frame.instance).funcs[*func];
                self.call(callee, false)?;
            }
            O::ReturnCall { func } => {
                let frame = self.frames.last().expect("frame");
                let callee = self.compartment.instance_data(frame.instance).funcs[*func];
                self.call(callee, true)?;
            }
            O::CallIndirect { ty, table } => {
                let callee = self.indirect_callee(*ty, *table)?;
                self.call(callee, false)?;
            }
            O::ReturnCallIndirect { ty, table } => {
                let callee = self.indirect_callee(*ty, *table)?;
                self.call(callee, true)?;
            }

            O::Drop {} => {
                self.pop();
            }
            O::Select {} => {
                let cond = self.pop().get_i32();
                let b = self.pop();
                let a = self.pop();
                self.push(if cond != 0 { a } else { b });
            }

            O::LocalGet { local } => {
                let frame = self.frames.last().expect("frame");
                let value = frame.locals[local.as_u32() as usize];
                self.push(value);
            }
            O::LocalSet { local } => {
                let value = self.pop();
                let frame = self.frames.last_mut().expect("frame");
                frame.locals[local.as_u32() as usize] = value;
            }
            O::LocalTee { local } => {
                let value = *self.stack.last().expect("operand");
                let frame = self.frames.last_mut().expect("frame");
                frame.locals[local.as_u32() as usize] = value;
            }
            O::GlobalGet { global } => {
                let frame = self.frames.last().expect("frame");
                let handle = self.compartment.instance_data(frame.instance).globals[*global];
                let value = self.compartment[handle.0].value;
                self.push(value);
            }
            O::GlobalSet { global } => {
                let value = self.pop();
                let frame = self.frames.last().expect("frame");
                let handle = self.compartment.instance_data(frame.instance).globals[*global];
                self.compartment[handle.0].value = value;
            }

            // ---- loads/stores -----------------------------------------
            O::I32Load { arg } => {
                let bytes = self.mem_load::<4>(arg)?;
                self.push(VMVal::i32(i32::from_le_bytes(bytes)));
            }
            O::I64Load { arg } => {
                let bytes = self.mem_load::<8>(arg)?;
                self.push(VMVal::i64(i64::from_le_bytes(bytes)));
            }
            O::F32Load { arg } => {
                let bytes = self.mem_load::<4>(arg)?;
                self.push(VMVal::f32(u32::from_le_bytes(bytes)));
            }
            O::F64Load { arg } => {
                let bytes = self.mem_load::<8>(arg)?;
                self.push(VMVal::f64(u64::from_le_bytes(bytes)));
            }
            O::I32Load8S { arg } => {
                let bytes = self.mem_load::<1>(arg)?;
                self.push(VMVal::i32(i32::from(bytes[0] as i8)));
            }
            O::I32Load8U { arg } => {
                let bytes = self.mem_load::<1>(arg)?;
                self.push(VMVal::i32(i32::from(bytes[0])));
            }
            O::I32Load16S { arg } => {
                let bytes = self.mem_load::<2>(arg)?;
                self.push(VMVal::i32(i32::from(i16::from_le_bytes(bytes))));
            }
            O::I32Load16U { arg } => {
                let bytes = self.mem_load::<2>(arg)?;
                self.push(VMVal::i32(i32::from(u16::from_le_bytes(bytes))));
            }
            O::I64Load8S { arg } => {
                let bytes = self.mem_load::<1>(arg)?;
                self.push(VMVal::i64(i64::from(bytes[0] as i8)));
            }
            O::I64Load8U { arg } => {
                let bytes = self.mem_load::<1>(arg)?;
                self.push(VMVal::i64(i64::from(bytes[0])));
            }
            O::I64Load16S { arg } => {
                let bytes = self.mem_load::<2>(arg)?;
                self.push(VMVal::i64(i64::from(i16::from_le_bytes(bytes))));
            }
            O::I64Load16U { arg } => {
                let bytes = self.mem_load::<2>(arg)?;
                self.push(VMVal::i64(i64::from(u16::from_le_bytes(bytes))));
            }
            O::I64Load32S { arg } => {
                let bytes = self.mem_load::<4>(arg)?;
                self.push(VMVal::i64(i64::from(i32::from_le_bytes(bytes))));
            }
            O::I64Load32U { arg } => {
                let bytes = self.mem_load::<4>(arg)?;
                self.push(VMVal::i64(i64::from(u32::from_le_bytes(bytes))));
            }
            O::V128Load { arg } => {
                let bytes = self.mem_load::<16>(arg)?;
                self.push(VMVal::v128(u128::from_le_bytes(bytes)));
            }

            O::I32Store { arg } => {
                let value = self.pop().get_i32();
                self.mem_store(arg, value.to_le_bytes())?;
            }
            O::I64Store { arg } => {
                let value = self.pop().get_i64();
                self.mem_store(arg, value.to_le_bytes())?;
            }
            O::F32Store { arg } => {
                let value = self.pop().get_f32_bits();
                self.mem_store(arg, value.to_le_bytes())?;
            }
            O::F64Store { arg } => {
                let value = self.pop().get_f64_bits();
                self.mem_store(arg, value.to_le_bytes())?;
            }
            O::I32Store8 { arg } => {
                let value = self.pop().get_i32() as u8;
                self.mem_store(arg, [value])?;
            }
            O::I32Store16 { arg } => {
                let value = self.pop().get_i32() as u16;
                self.mem_store(arg, value.to_le_bytes())?;
            }
            O::I64Store8 { arg } => {
                let value = self.pop().get_i64() as u8;
                self.mem_store(arg, [value])?;
            }
            O::I64Store16 { arg } => {
                let value = self.pop().get_i64() as u16;
                self.mem_store(arg, value.to_le_bytes())?;
            }
            O::I64Store32 { arg } => {
                let value = self.pop().get_i64() as u32;
                self.mem_store(arg, value.to_le_bytes())?;
            }
            O::V128Store { arg } => {
                let value = self.pop().get_v128();
                self.mem_store(arg, value.to_le_bytes())?;
            }

            O::MemorySize { memory } => {
                let stored = self.memory(*memory);
                let pages = self.compartment[stored].size_pages();
                self.push(VMVal::i32(pages as i32));
            }
            O::MemoryGrow { memory } => {
                let delta = self.pop().get_u32();
                let stored = self.memory(*memory);
                let result = self.compartment[stored]
                    .grow_pages(u64::from(delta))
                    .map_or(-1, |old| old as i32);
                self.push(VMVal::i32(result));
            }

            // ---- bulk memory ------------------------------------------
            O::MemoryInit { data, memory } => self.memory_init(*data, *memory)?,
            O::DataDrop { data } => {
                let frame = self.frames.last().expect("frame");
                let instance = frame.instance;
                self.compartment
                    .instance_data_mut(instance)
                    .dropped_data
                    .insert(*data);
            }
            O::MemoryCopy { dst, src } => self.memory_copy(*dst, *src)?,
            O::MemoryFill { memory } => self.memory_fill(*memory)?,
            O::TableInit { elem, table } => self.table_init(*elem, *table)?,
            O::ElemDrop { elem } => {
                let frame = self.frames.last().expect("frame");
                let instance = frame.instance;
                self.compartment
                    .instance_data_mut(instance)
                    .dropped_elements
                    .insert(*elem);
            }
            O::TableCopy { dst, src } => self.table_copy(*dst, *src)?,

            // ---- atomics ----------------------------------------------
            O::MemoryAtomicNotify { arg } => self.atomic_notify(arg)?,
            O::MemoryAtomicWait32 { arg } => self.atomic_wait(arg, false)?,
            O::MemoryAtomicWait64 { arg } => self.atomic_wait(arg, true)?,

            O::I32AtomicLoad { arg } => self.atomic_load(arg, 4, false)?,
            O::I64AtomicLoad { arg } => self.atomic_load(arg, 8, true)?,
            O::I32AtomicLoad8U { arg } => self.atomic_load(arg, 1, false)?,
            O::I32AtomicLoad16U { arg } => self.atomic_load(arg, 2, false)?,
            O::I64AtomicLoad8U { arg } => self.atomic_load(arg, 1, true)?,
            O::I64AtomicLoad16U { arg } => self.atomic_load(arg, 2, true)?,
            O::I64AtomicLoad32U { arg } => self.atomic_load(arg, 4, true)?,
            O::I32AtomicStore { arg } => self.atomic_store(arg, 4, false)?,
            O::I64AtomicStore { arg } => self.atomic_store(arg, 8, true)?,
            O::I32AtomicStore8 { arg } => self.atomic_store(arg, 1, false)?,
            O::I32AtomicStore16 { arg } => self.atomic_store(arg, 2, false)?,
            O::I64AtomicStore8 { arg } => self.atomic_store(arg, 1, true)?,
            O::I64AtomicStore16 { arg } => self.atomic_store(arg, 2, true)?,
            O::I64AtomicStore32 { arg } => self.atomic_store(arg, 4, true)?,

            O::I32AtomicRmwAdd { arg } => self.atomic_rmw(arg, 4, false, AtomOp::Add)?,
            O::I64AtomicRmwAdd { arg } => self.atomic_rmw(arg, 8, true, AtomOp::Add)?,
            O::I32AtomicRmw8AddU { arg } => self.atomic_rmw(arg, 1, false, AtomOp::Add)?,
            O::I32AtomicRmw16AddU { arg } => self.atomic_rmw(arg, 2, false, AtomOp::Add)?,
            O::I64AtomicRmw8AddU { arg } => self.atomic_rmw(arg, 1, true, AtomOp::Add)?,
            O::I64AtomicRmw16AddU { arg } => self.atomic_rmw(arg, 2, true, AtomOp::Add)?,
            O::I64AtomicRmw32AddU { arg } => self.atomic_rmw(arg, 4, true, AtomOp::Add)?,
            O::I32AtomicRmwSub { arg } => self.atomic_rmw(arg, 4, false, AtomOp::Sub)?,
            O::I64AtomicRmwSub { arg } => self.atomic_rmw(arg, 8, true, AtomOp::Sub)?,
            O::I32AtomicRmw8SubU { arg } => self.atomic_rmw(arg, 1, false, AtomOp::Sub)?,
            O::I32AtomicRmw16SubU { arg } => self.atomic_rmw(arg, 2, false, AtomOp::Sub)?,
            O::I64AtomicRmw8SubU { arg } => self.atomic_rmw(arg, 1, true, AtomOp::Sub)?,
            O::I64AtomicRmw16SubU { arg } => self.atomic_rmw(arg, 2, true, AtomOp::Sub)?,
            O::I64AtomicRmw32SubU { arg } => self.atomic_rmw(arg, 4, true, AtomOp::Sub)?,
            O::I32AtomicRmwAnd { arg } => self.atomic_rmw(arg, 4, false, AtomOp::And)?,
            O::I64AtomicRmwAnd { arg } => self.atomic_rmw(arg, 8, true, AtomOp::And)?,
            O::I32AtomicRmw8AndU { arg } => self.atomic_rmw(arg, 1, false, AtomOp::And)?,
            O::I32AtomicRmw16AndU { arg } => self.atomic_rmw(arg, 2, false, AtomOp::And)?,
            O::I64AtomicRmw8AndU { arg } => self.atomic_rmw(arg, 1, true, AtomOp::And)?,
            O::I64AtomicRmw16AndU { arg } => self.atomic_rmw(arg, 2, true, AtomOp::And)?,
            O::I64AtomicRmw32AndU { arg } => self.atomic_rmw(arg, 4, true, AtomOp::And)?,
            O::I32AtomicRmwOr { arg } => self.atomic_rmw(arg, 4, false, AtomOp::Or)?,
            O::I64AtomicRmwOr { arg } => self.atomic_rmw(arg, 8, true, AtomOp::Or)?,
            O::I32AtomicRmw8OrU { arg } => self.atomic_rmw(arg, 1, false, AtomOp::Or)?,
            O::I32AtomicRmw16OrU { arg } => self.atomic_rmw(arg, 2, false, AtomOp::Or)?,
            O::I64AtomicRmw8OrU { arg } => self.atomic_rmw(arg, 1, true, AtomOp::Or)?,
            O::I64AtomicRmw16OrU { arg } => self.atomic_rmw(arg, 2, true, AtomOp::Or)?,
            O::I64AtomicRmw32OrU { arg } => self.atomic_rmw(arg, 4, true, AtomOp::Or)?,
            O::I32AtomicRmwXor { arg } => self.atomic_rmw(arg, 4, false, AtomOp::Xor)?,
            O::I64AtomicRmwXor { arg } => self.atomic_rmw(arg, 8, true, AtomOp::Xor)?,
            O::I32AtomicRmw8XorU { arg } => self.atomic_rmw(arg, 1, false, AtomOp::Xor)?,
            O::I32AtomicRmw16XorU { arg } => self.atomic_rmw(arg, 2, false, AtomOp::Xor)?,
            O::I64AtomicRmw8XorU { arg } => self.atomic_rmw(arg, 1, true, AtomOp::Xor)?,
            O::I64AtomicRmw16XorU { arg } => self.atomic_rmw(arg, 2, true, AtomOp::Xor)?,
            O::I64AtomicRmw32XorU { arg } => self.atomic_rmw(arg, 4, true, AtomOp::Xor)?,
            O::I32AtomicRmwXchg { arg } => self.atomic_rmw(arg, 4, false, AtomOp::Xchg)?,
            O::I64AtomicRmwXchg { arg } => self.atomic_rmw(arg, 8, true, AtomOp::Xchg)?,
            O::I32AtomicRmw8XchgU { arg } => self.atomic_rmw(arg, 1, false, AtomOp::Xchg)?,
            O::I32AtomicRmw16XchgU { arg } => self.atomic_rmw(arg, 2, false, AtomOp::Xchg)?,
            O::I64AtomicRmw8XchgU { arg } => self.atomic_rmw(arg, 1, true, AtomOp::Xchg)?,
            O::I64AtomicRmw16XchgU { arg } => self.atomic_rmw(arg, 2, true, AtomOp::Xchg)?,
            O::I64AtomicRmw32XchgU { arg } => self.atomic_rmw(arg, 4, true, AtomOp::Xchg)?,
            O::I32AtomicRmwCmpxchg { arg } => self.atomic_cmpxchg(arg, 4, false)?,
            O::I64AtomicRmwCmpxchg { arg } => self.atomic_cmpxchg(arg, 8, true)?,
            O::I32AtomicRmw8CmpxchgU { arg } => self.atomic_cmpxchg(arg, 1, false)?,
            O::I32AtomicRmw16CmpxchgU { arg } => self.atomic_cmpxchg(arg, 2, false)?,
            O::I64AtomicRmw8CmpxchgU { arg } => self.atomic_cmpxchg(arg, 1, true)?,
            O::I64AtomicRmw16CmpxchgU { arg } => self.atomic_cmpxchg(arg, 2, true)?,
            O::I64AtomicRmw32CmpxchgU { arg } => self.atomic_cmpxchg(arg, 4, true)?,

            // ---- everything numeric and simd --------------------------
            op => self.numeric_or_simd(op)?,
        }
        Ok(())
    }

    fn indirect_callee(
        &mut self,
        ty: crate::indices::TypeIndex,
        table: TableIndex,
    ) -> Result<Func, Unwind> {
        let index = self.pop().get_u32() as usize;
        let frame = self.frames.last().expect("frame");
        let expected = frame.module.translated().types[ty].index();
        let stored = self.table(table);
        let slot = self.compartment[stored].elements.get(index).copied();
        let func = match slot {
            None => {
                return Err(self.trap(
                    TrapKind::AccessViolation,
                    "out of bounds table access in call_indirect",
                ))
            }
            Some(None) => {
                return Err(self.trap(
                    TrapKind::InvalidIndirectCall,
                    "indirect call to a null table entry",
                ))
            }
            Some(Some(func)) => func,
        };
        if self.compartment[func.0].ty.index() != expected {
            return Err(self.trap(
                TrapKind::InvalidIndirectCall,
                "indirect call signature mismatch",
            ));
        }
        Ok(func)
    }

    fn atomic_load(&mut self, arg: &MemArg, size: u64, wide: bool) -> Result<(), Unwind> {
        let addr = self.pop().get_u32();
        let (stored, ea) = self.atomic_ea(arg, addr, size)?;
        let base = self.compartment[stored].base_ptr();
        // SAFETY: in bounds and naturally aligned per atomic_ea.
        let value = unsafe {
            match size {
                1 => u64::from((*base.add(ea).cast::<AtomicU8>()).load(SeqCst)),
                2 => u64::from((*base.add(ea).cast::<AtomicU16>()).load(SeqCst)),
                4 => u64::from((*base.add(ea).cast::<AtomicU32>()).load(SeqCst)),
                8 => (*base.add(ea).cast::<AtomicU64>()).load(SeqCst),
                _ => unreachable!(),
            }
        };
        self.push(if wide {
            VMVal::i64(value as i64)
        } else {
            VMVal::i32(value as u32 as i32)
        });
        Ok(())
    }

    fn atomic_store(&mut self, arg: &MemArg, size: u64, wide: bool) -> Result<(), Unwind> {
        let value = if wide {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        };
        let addr = self.pop().get_u32();
        let (stored, ea) = self.atomic_ea(arg, addr, size)?;
        let base = self.compartment[stored].base_ptr();
        // SAFETY: in bounds and naturally aligned per atomic_ea.
        unsafe {
            match size {
                1 => (*base.add(ea).cast::<AtomicU8>()).store(value as u8, SeqCst),
                2 => (*base.add(ea).cast::<AtomicU16>()).store(value as u16, SeqCst),
                4 => (*base.add(ea).cast::<AtomicU32>()).store(value as u32, SeqCst),
                8 => (*base.add(ea).cast::<AtomicU64>()).store(value, SeqCst),
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    // ---- bulk memory implementations -----------------------------------

    fn memory_init(&mut self, data: DataIndex, memory: MemoryIndex) -> Result<(), Unwind> {
        let count = self.pop().get_u32() as usize;
        let src = self.pop().get_u32() as usize;
        let dst = self.pop().get_u32() as usize;

        let frame = self.frames.last().expect("frame");
        let instance = frame.instance;
        let module = frame.module.clone();
        let dropped = self
            .compartment
            .instance_data(instance)
            .dropped_data
            .contains(&data);
        let bytes: &[u8] = if dropped {
            &[]
        } else {
            &module.translated().data_segments[data].bytes
        };

        if src.checked_add(count).is_none_or(|end| end > bytes.len()) {
            return Err(self.oob());
        }
        let stored = self.memory(memory);
        if !self.compartment[stored].write(dst, &bytes[src..src + count]) {
            return Err(self.oob());
        }
        Ok(())
    }

    fn memory_copy(&mut self, dst_mem: MemoryIndex, src_mem: MemoryIndex) -> Result<(), Unwind> {
        let count = self.pop().get_u32() as usize;
        let src = self.pop().get_u32() as usize;
        let dst = self.pop().get_u32() as usize;

        let dst_stored = self.memory(dst_mem);
        let src_stored = self.memory(src_mem);
        let dst_len = self.compartment[dst_stored].byte_size();
        let src_len = self.compartment[src_stored].byte_size();
        if src.checked_add(count).is_none_or(|end| end > src_len)
            || dst.checked_add(count).is_none_or(|end| end > dst_len)
        {
            return Err(self.oob());
        }
        let src_ptr = self.compartment[src_stored].base_ptr();
        let dst_ptr = self.compartment[dst_stored].base_ptr();
        // SAFETY: both spans bounds-checked; copy handles overlap.
        unsafe {
            core::ptr::copy(src_ptr.add(src), dst_ptr.add(dst), count);
        }
        Ok(())
    }

    fn memory_fill(&mut self, memory: MemoryIndex) -> Result<(), Unwind> {
        let count = self.pop().get_u32() as usize;
        let value = self.pop().get_i32() as u8;
        let dst = self.pop().get_u32() as usize;

        let stored = self.memory(memory);
        let len = self.compartment[stored].byte_size();
        if dst.checked_add(count).is_none_or(|end| end > len) {
            return Err(self.oob());
        }
        // SAFETY: bounds-checked above.
        unsafe {
            core::ptr::write_bytes(self.compartment[stored].base_ptr().add(dst), value, count);
        }
        Ok(())
    }

    fn table_init(&mut self, elem: ElemIndex, table: TableIndex) -> Result<(), Unwind> {
        let count = self.pop().get_u32() as usize;
        let src = self.pop().get_u32() as usize;
        let dst = self.pop().get_u32() as usize;

        let frame = self.frames.last().expect("frame");
        let instance = frame.instance;
        let module = frame.module.clone();
        let dropped = self
            .compartment
            .instance_data(instance)
            .dropped_elements
            .contains(&elem);
        let elements: &[Option<FuncIndex>] = if dropped {
            &[]
        } else {
            &module.translated().element_segments[elem].elements
        };

        if src.checked_add(count).is_none_or(|end| end > elements.len()) {
            return Err(self.oob());
        }
        let stored = self.table(table);
        if dst
            .checked_add(count)
            .is_none_or(|end| end > self.compartment[stored].elements.len())
        {
            return Err(self.trap(TrapKind::AccessViolation, "out of bounds table access"));
        }
        let resolved: Vec<Option<Func>> = elements[src..src + count]
            .iter()
            .map(|item| {
                item.map(|func| self.compartment.instance_data(instance).funcs[func])
            })
            .collect();
        self.compartment[stored].elements[dst..dst + count].copy_from_slice(&resolved);
        Ok(())
    }

    fn table_copy(&mut self, dst_table: TableIndex, src_table: TableIndex) -> Result<(), Unwind> {
        let count = self.pop().get_u32() as usize;
        let src = self.pop().get_u32() as usize;
        let dst = self.pop().get_u32() as usize;

        let dst_stored = self.table(dst_table);
        let src_stored = self.table(src_table);
        if src
            .checked_add(count)
            .is_none_or(|end| end > self.compartment[src_stored].elements.len())
            || dst
                .checked_add(count)
                .is_none_or(|end| end > self.compartment[dst_stored].elements.len())
        {
            return Err(self.trap(TrapKind::AccessViolation, "out of bounds table access"));
        }
        let snapshot: Vec<Option<Func>> =
            self.compartment[src_stored].elements[src..src + count].to_vec();
        self.compartment[dst_stored].elements[dst..dst + count].copy_from_slice(&snapshot);
        Ok(())
    }
}

pub(crate) enum AtomOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
}
