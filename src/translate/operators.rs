//! The closed operator set and its single source of truth.
//!
//! `for_each_operator!` lists every opcode once, together with its key (the
//! raw byte, or `prefix << 16 | subopcode` for the `0xFC`/`0xFD`/`0xFE`
//! prefixed spaces), its gating feature and its text name. The enum, the
//! binary decoder, the binary encoder and the operand traversal used by the
//! printer are all generated from that one table, so adding an opcode touches
//! one line.

use crate::errors::Error;
use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, LocalIndex, MemoryIndex, TableIndex, TagIndex,
    TypeIndex,
};
use crate::translate::reader::BinaryReader;
use crate::translate::FeatureSpec;
use crate::types::ValType;
use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;

/// The declared type of a structured control operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    /// A single result, no params. The only form the MVP allows.
    Value(ValType),
    /// An arbitrary function signature, gated on `multi_value`.
    Func(TypeIndex),
}

/// The memory operand of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align_log2: u32,
    pub offset: u64,
    pub memory: MemoryIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrTableImm {
    pub targets: Box<[u32]>,
    pub default: u32,
}

/// Raw bits of an `f32` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ieee32(pub u32);

/// Raw bits of an `f64` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ieee64(pub u64);

/// Raw bits of a `v128` literal, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V128Imm(pub u128);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneIdx(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleLanes(pub [u8; 16]);

/// `atomic.fence` carries one reserved byte that must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceFlags(pub u8);

/// Reference heap types. Tables are `anyfunc`-only, so this is closed over
/// function references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    Func,
}

pub(crate) fn val_type_byte(ty: ValType) -> u8 {
    match ty {
        ValType::I32 => 0x7f,
        ValType::I64 => 0x7e,
        ValType::F32 => 0x7d,
        ValType::F64 => 0x7c,
        ValType::V128 => 0x7b,
        ValType::Any => unreachable!("`any` is never serialized"),
    }
}

pub(crate) fn read_val_type(reader: &mut BinaryReader<'_>) -> crate::Result<ValType> {
    let pos = reader.pos();
    match reader.read_u8()? {
        0x7f => Ok(ValType::I32),
        0x7e => Ok(ValType::I64),
        0x7d => Ok(ValType::F32),
        0x7c => Ok(ValType::F64),
        0x7b => Ok(ValType::V128),
        byte => Err(Error::malformed(pos, format!("invalid value type 0x{byte:02x}"))),
    }
}

/// Visitor over the immediates of one operator, in encoding order. The
/// printer and any other generic consumer implement the operand kinds they
/// care about; everything defaults to a no-op.
#[allow(unused_variables)]
pub(crate) trait ImmVisitor {
    fn block_type(&mut self, ty: &BlockType) {}
    fn mem_arg(&mut self, arg: &MemArg) {}
    fn br_table(&mut self, imm: &BrTableImm) {}
    fn depth(&mut self, depth: u32) {}
    fn func(&mut self, index: FuncIndex) {}
    fn type_index(&mut self, index: TypeIndex) {}
    fn table(&mut self, index: TableIndex) {}
    fn memory(&mut self, index: MemoryIndex) {}
    fn global(&mut self, index: GlobalIndex) {}
    fn local(&mut self, index: LocalIndex) {}
    fn tag(&mut self, index: TagIndex) {}
    fn elem(&mut self, index: ElemIndex) {}
    fn data(&mut self, index: DataIndex) {}
    fn const_i32(&mut self, value: i32) {}
    fn const_i64(&mut self, value: i64) {}
    fn const_f32(&mut self, value: Ieee32) {}
    fn const_f64(&mut self, value: Ieee64) {}
    fn const_v128(&mut self, value: V128Imm) {}
    fn lane(&mut self, lane: LaneIdx) {}
    fn lanes(&mut self, lanes: &ShuffleLanes) {}
    fn fence(&mut self, flags: FenceFlags) {}
    fn heap_type(&mut self, ty: HeapType) {}
}

pub(crate) trait Operand {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self>
    where
        Self: Sized;
    fn encode(&self, sink: &mut Vec<u8>);
    fn visit(&self, v: &mut dyn ImmVisitor);
}

pub(crate) fn write_u32_leb(sink: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            sink.push(byte);
            return;
        }
        sink.push(byte | 0x80);
    }
}

pub(crate) fn write_u64_leb(sink: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            sink.push(byte);
            return;
        }
        sink.push(byte | 0x80);
    }
}

pub(crate) fn write_s64_leb(sink: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign_clear = byte & 0x40 == 0;
        if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
            sink.push(byte);
            return;
        }
        sink.push(byte | 0x80);
    }
}

pub(crate) fn write_s32_leb(sink: &mut Vec<u8>, value: i32) {
    write_s64_leb(sink, i64::from(value));
}

fn write_opcode(sink: &mut Vec<u8>, key: u32) {
    if key < 0x100 {
        sink.push(key as u8);
    } else {
        sink.push((key >> 16) as u8);
        write_u32_leb(sink, key & 0xffff);
    }
}

macro_rules! impl_index_operand {
    ($($ty:ident => $method:ident),* $(,)?) => {$(
        impl Operand for $ty {
            fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
                Ok($ty::from_u32(reader.read_u32_leb()?))
            }
            fn encode(&self, sink: &mut Vec<u8>) {
                write_u32_leb(sink, self.as_u32());
            }
            fn visit(&self, v: &mut dyn ImmVisitor) {
                v.$method(*self);
            }
        }
    )*};
}

impl_index_operand! {
    FuncIndex => func,
    TypeIndex => type_index,
    TableIndex => table,
    MemoryIndex => memory,
    GlobalIndex => global,
    LocalIndex => local,
    TagIndex => tag,
    ElemIndex => elem,
    DataIndex => data,
}

impl Operand for u32 {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        reader.read_u32_leb()
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        write_u32_leb(sink, *self);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.depth(*self);
    }
}

impl Operand for i32 {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        reader.read_s32_leb()
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        write_s32_leb(sink, *self);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.const_i32(*self);
    }
}

impl Operand for i64 {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        reader.read_s64_leb()
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        write_s64_leb(sink, *self);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.const_i64(*self);
    }
}

impl Operand for Ieee32 {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        Ok(Ieee32(reader.read_f32_bits()?))
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(&self.0.to_le_bytes());
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.const_f32(*self);
    }
}

impl Operand for Ieee64 {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        Ok(Ieee64(reader.read_f64_bits()?))
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(&self.0.to_le_bytes());
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.const_f64(*self);
    }
}

impl Operand for V128Imm {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        Ok(V128Imm(reader.read_v128()?))
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(&self.0.to_le_bytes());
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.const_v128(*self);
    }
}

impl Operand for LaneIdx {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        Ok(LaneIdx(reader.read_u8()?))
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.push(self.0);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.lane(*self);
    }
}

impl Operand for ShuffleLanes {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        let bytes = reader.read_bytes(16)?;
        Ok(ShuffleLanes(bytes.try_into().unwrap()))
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(&self.0);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.lanes(self);
    }
}

impl Operand for FenceFlags {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        let pos = reader.pos();
        let flags = reader.read_u8()?;
        if flags != 0 {
            return Err(Error::malformed(pos, "non-zero atomic.fence flags"));
        }
        Ok(FenceFlags(flags))
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.push(self.0);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.fence(*self);
    }
}

impl Operand for HeapType {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        let pos = reader.pos();
        match reader.read_u8()? {
            0x70 => Ok(HeapType::Func),
            byte => Err(Error::malformed(
                pos,
                format!("unsupported heap type 0x{byte:02x}"),
            )),
        }
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.push(0x70);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.heap_type(*self);
    }
}

impl Operand for BlockType {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        let pos = reader.pos();
        let value = reader.read_s33_leb()?;
        if value >= 0 {
            return Ok(BlockType::Func(TypeIndex::from_u32(
                u32::try_from(value).map_err(|_| {
                    Error::malformed(pos, "block type index out of range")
                })?,
            )));
        }
        match value {
            -64 => Ok(BlockType::Empty),
            -1 => Ok(BlockType::Value(ValType::I32)),
            -2 => Ok(BlockType::Value(ValType::I64)),
            -3 => Ok(BlockType::Value(ValType::F32)),
            -4 => Ok(BlockType::Value(ValType::F64)),
            -5 => Ok(BlockType::Value(ValType::V128)),
            _ => Err(Error::malformed(pos, format!("invalid block type {value}"))),
        }
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        match self {
            BlockType::Empty => sink.push(0x40),
            BlockType::Value(ty) => sink.push(val_type_byte(*ty)),
            BlockType::Func(index) => write_s64_leb(sink, i64::from(index.as_u32())),
        }
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.block_type(self);
    }
}

impl Operand for MemArg {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        let align = reader.read_u32_leb()?;
        // Bit 6 of the alignment hint signals an explicit memory index
        // (multi-memory); otherwise the operand targets memory zero.
        let (align_log2, memory) = if align & 0x40 != 0 {
            (align & !0x40, MemoryIndex::from_u32(reader.read_u32_leb()?))
        } else {
            (align, MemoryIndex::from_u32(0))
        };
        let offset = u64::from(reader.read_u32_leb()?);
        Ok(MemArg {
            align_log2,
            offset,
            memory,
        })
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        if self.memory.as_u32() != 0 {
            write_u32_leb(sink, self.align_log2 | 0x40);
            write_u32_leb(sink, self.memory.as_u32());
        } else {
            write_u32_leb(sink, self.align_log2);
        }
        write_u64_leb(sink, self.offset);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.mem_arg(self);
    }
}

impl Operand for BrTableImm {
    fn decode(reader: &mut BinaryReader<'_>) -> crate::Result<Self> {
        let count = reader.read_count("branch table target")?;
        let mut targets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            targets.push(reader.read_u32_leb()?);
        }
        let default = reader.read_u32_leb()?;
        Ok(BrTableImm {
            targets: targets.into(),
            default,
        })
    }
    fn encode(&self, sink: &mut Vec<u8>) {
        write_u32_leb(sink, u32::try_from(self.targets.len()).unwrap());
        for target in &self.targets {
            write_u32_leb(sink, *target);
        }
        write_u32_leb(sink, self.default);
    }
    fn visit(&self, v: &mut dyn ImmVisitor) {
        v.br_table(self);
    }
}

/// Every opcode this engine understands, exactly once:
/// `(key, gating feature, text name, variant { immediates })`.
macro_rules! for_each_operator {
    ($m:ident) => {
        $m! {
            (0x00, mvp, "unreachable", Unreachable {}),
            (0x01, mvp, "nop", Nop {}),
            (0x02, mvp, "block", Block { ty: BlockType }),
            (0x03, mvp, "loop", Loop { ty: BlockType }),
            (0x04, mvp, "if", If { ty: BlockType }),
            (0x05, mvp, "else", Else {}),
            (0x06, exceptions, "try", Try { ty: BlockType }),
            (0x07, exceptions, "catch", Catch { tag: TagIndex }),
            (0x08, exceptions, "throw", Throw { tag: TagIndex }),
            (0x09, exceptions, "rethrow", Rethrow { depth: u32 }),
            (0x0b, mvp, "end", End {}),
            (0x0c, mvp, "br", Br { depth: u32 }),
            (0x0d, mvp, "br_if", BrIf { depth: u32 }),
            (0x0e, mvp, "br_table", BrTable { imm: BrTableImm }),
            (0x0f, mvp, "return", Return {}),
            (0x10, mvp, "call", Call { func: FuncIndex }),
            (0x11, mvp, "call_indirect", CallIndirect { ty: TypeIndex, table: TableIndex }),
            (0x12, tail_calls, "return_call", ReturnCall { func: FuncIndex }),
            (0x13, tail_calls, "return_call_indirect", ReturnCallIndirect { ty: TypeIndex, table: TableIndex }),
            (0x18, exceptions, "delegate", Delegate { depth: u32 }),
            (0x19, exceptions, "catch_all", CatchAll {}),
            (0x1a, mvp, "drop", Drop {}),
            (0x1b, mvp, "select", Select {}),
            (0x20, mvp, "local.get", LocalGet { local: LocalIndex }),
            (0x21, mvp, "local.set", LocalSet { local: LocalIndex }),
            (0x22, mvp, "local.tee", LocalTee { local: LocalIndex }),
            (0x23, mvp, "global.get", GlobalGet { global: GlobalIndex }),
            (0x24, mvp, "global.set", GlobalSet { global: GlobalIndex }),
            (0x28, mvp, "i32.load", I32Load { arg: MemArg }),
            (0x29, mvp, "i64.load", I64Load { arg: MemArg }),
            (0x2a, mvp, "f32.load", F32Load { arg: MemArg }),
            (0x2b, mvp, "f64.load", F64Load { arg: MemArg }),
            (0x2c, mvp, "i32.load8_s", I32Load8S { arg: MemArg }),
            (0x2d, mvp, "i32.load8_u", I32Load8U { arg: MemArg }),
            (0x2e, mvp, "i32.load16_s", I32Load16S { arg: MemArg }),
            (0x2f, mvp, "i32.load16_u", I32Load16U { arg: MemArg }),
            (0x30, mvp, "i64.load8_s", I64Load8S { arg: MemArg }),
            (0x31, mvp, "i64.load8_u", I64Load8U { arg: MemArg }),
            (0x32, mvp, "i64.load16_s", I64Load16S { arg: MemArg }),
            (0x33, mvp, "i64.load16_u", I64Load16U { arg: MemArg }),
            (0x34, mvp, "i64.load32_s", I64Load32S { arg: MemArg }),
            (0x35, mvp, "i64.load32_u", I64Load32U { arg: MemArg }),
            (0x36, mvp, "i32.store", I32Store { arg: MemArg }),
            (0x37, mvp, "i64.store", I64Store { arg: MemArg }),
            (0x38, mvp, "f32.store", F32Store { arg: MemArg }),
            (0x39, mvp, "f64.store", F64Store { arg: MemArg }),
            (0x3a, mvp, "i32.store8", I32Store8 { arg: MemArg }),
            (0x3b, mvp, "i32.store16", I32Store16 { arg: MemArg }),
            (0x3c, mvp, "i64.store8", I64Store8 { arg: MemArg }),
            (0x3d, mvp, "i64.store16", I64Store16 { arg: MemArg }),
            (0x3e, mvp, "i64.store32", I64Store32 { arg: MemArg }),
            (0x3f, mvp, "memory.size", MemorySize { memory: MemoryIndex }),
            (0x40, mvp, "memory.grow", MemoryGrow { memory: MemoryIndex }),
            (0x41, mvp, "i32.const", I32Const { value: i32 }),
            (0x42, mvp, "i64.const", I64Const { value: i64 }),
            (0x43, mvp, "f32.const", F32Const { value: Ieee32 }),
            (0x44, mvp, "f64.const", F64Const { value: Ieee64 }),
            (0x45, mvp, "i32.eqz", I32Eqz {}),
            (0x46, mvp, "i32.eq", I32Eq {}),
            (0x47, mvp, "i32.ne", I32Ne {}),
            (0x48, mvp, "i32.lt_s", I32LtS {}),
            (0x49, mvp, "i32.lt_u", I32LtU {}),
            (0x4a, mvp, "i32.gt_s", I32GtS {}),
            (0x4b, mvp, "i32.gt_u", I32GtU {}),
            (0x4c, mvp, "i32.le_s", I32LeS {}),
            (0x4d, mvp, "i32.le_u", I32LeU {}),
            (0x4e, mvp, "i32.ge_s", I32GeS {}),
            (0x4f, mvp, "i32.ge_u", I32GeU {}),
            (0x50, mvp, "i64.eqz", I64Eqz {}),
            (0x51, mvp, "i64.eq", I64Eq {}),
            (0x52, mvp, "i64.ne", I64Ne {}),
            (0x53, mvp, "i64.lt_s", I64LtS {}),
            (0x54, mvp, "i64.lt_u", I64LtU {}),
            (0x55, mvp, "i64.gt_s", I64GtS {}),
            (0x56, mvp, "i64.gt_u", I64GtU {}),
            (0x57, mvp, "i64.le_s", I64LeS {}),
            (0x58, mvp, "i64.le_u", I64LeU {}),
            (0x59, mvp, "i64.ge_s", I64GeS {}),
            (0x5a, mvp, "i64.ge_u", I64GeU {}),
            (0x5b, mvp, "f32.eq", F32Eq {}),
            (0x5c, mvp, "f32.ne", F32Ne {}),
            (0x5d, mvp, "f32.lt", F32Lt {}),
            (0x5e, mvp, "f32.gt", F32Gt {}),
            (0x5f, mvp, "f32.le", F32Le {}),
            (0x60, mvp, "f32.ge", F32Ge {}),
            (0x61, mvp, "f64.eq", F64Eq {}),
            (0x62, mvp, "f64.ne", F64Ne {}),
            (0x63, mvp, "f64.lt", F64Lt {}),
            (0x64, mvp, "f64.gt", F64Gt {}),
            (0x65, mvp, "f64.le", F64Le {}),
            (0x66, mvp, "f64.ge", F64Ge {}),
            (0x67, mvp, "i32.clz", I32Clz {}),
            (0x68, mvp, "i32.ctz", I32Ctz {}),
            (0x69, mvp, "i32.popcnt", I32Popcnt {}),
            (0x6a, mvp, "i32.add", I32Add {}),
            (0x6b, mvp, "i32.sub", I32Sub {}),
            (0x6c, mvp, "i32.mul", I32Mul {}),
            (0x6d, mvp, "i32.div_s", I32DivS {}),
            (0x6e, mvp, "i32.div_u", I32DivU {}),
            (0x6f, mvp, "i32.rem_s", I32RemS {}),
            (0x70, mvp, "i32.rem_u", I32RemU {}),
            (0x71, mvp, "i32.and", I32And {}),
            (0x72, mvp, "i32.or", I32Or {}),
            (0x73, mvp, "i32.xor", I32Xor {}),
            (0x74, mvp, "i32.shl", I32Shl {}),
            (0x75, mvp, "i32.shr_s", I32ShrS {}),
            (0x76, mvp, "i32.shr_u", I32ShrU {}),
            (0x77, mvp, "i32.rotl", I32Rotl {}),
            (0x78, mvp, "i32.rotr", I32Rotr {}),
            (0x79, mvp, "i64.clz", I64Clz {}),
            (0x7a, mvp, "i64.ctz", I64Ctz {}),
            (0x7b, mvp, "i64.popcnt", I64Popcnt {}),
            (0x7c, mvp, "i64.add", I64Add {}),
            (0x7d, mvp, "i64.sub", I64Sub {}),
            (0x7e, mvp, "i64.mul", I64Mul {}),
            (0x7f, mvp, "i64.div_s", I64DivS {}),
            (0x80, mvp, "i64.div_u", I64DivU {}),
            (0x81, mvp, "i64.rem_s", I64RemS {}),
            (0x82, mvp, "i64.rem_u", I64RemU {}),
            (0x83, mvp, "i64.and", I64And {}),
            (0x84, mvp, "i64.or", I64Or {}),
            (0x85, mvp, "i64.xor", I64Xor {}),
            (0x86, mvp, "i64.shl", I64Shl {}),
            (0x87, mvp, "i64.shr_s", I64ShrS {}),
            (0x88, mvp, "i64.shr_u", I64ShrU {}),
            (0x89, mvp, "i64.rotl", I64Rotl {}),
            (0x8a, mvp, "i64.rotr", I64Rotr {}),
            (0x8b, mvp, "f32.abs", F32Abs {}),
            (0x8c, mvp, "f32.neg", F32Neg {}),
            (0x8d, mvp, "f32.ceil", F32Ceil {}),
            (0x8e, mvp, "f32.floor", F32Floor {}),
            (0x8f, mvp, "f32.trunc", F32Trunc {}),
            (0x90, mvp, "f32.nearest", F32Nearest {}),
            (0x91, mvp, "f32.sqrt", F32Sqrt {}),
            (0x92, mvp, "f32.add", F32Add {}),
            (0x93, mvp, "f32.sub", F32Sub {}),
            (0x94, mvp, "f32.mul", F32Mul {}),
            (0x95, mvp, "f32.div", F32Div {}),
            (0x96, mvp, "f32.min", F32Min {}),
            (0x97, mvp, "f32.max", F32Max {}),
            (0x98, mvp, "f32.copysign", F32Copysign {}),
            (0x99, mvp, "f64.abs", F64Abs {}),
            (0x9a, mvp, "f64.neg", F64Neg {}),
            (0x9b, mvp, "f64.ceil", F64Ceil {}),
            (0x9c, mvp, "f64.floor", F64Floor {}),
            (0x9d, mvp, "f64.trunc", F64Trunc {}),
            (0x9e, mvp, "f64.nearest", F64Nearest {}),
            (0x9f, mvp, "f64.sqrt", F64Sqrt {}),
            (0xa0, mvp, "f64.add", F64Add {}),
            (0xa1, mvp, "f64.sub", F64Sub {}),
            (0xa2, mvp, "f64.mul", F64Mul {}),
            (0xa3, mvp, "f64.div", F64Div {}),
            (0xa4, mvp, "f64.min", F64Min {}),
            (0xa5, mvp, "f64.max", F64Max {}),
            (0xa6, mvp, "f64.copysign", F64Copysign {}),
            (0xa7, mvp, "i32.wrap_i64", I32WrapI64 {}),
            (0xa8, mvp, "i32.trunc_f32_s", I32TruncF32S {}),
            (0xa9, mvp, "i32.trunc_f32_u", I32TruncF32U {}),
            (0xaa, mvp, "i32.trunc_f64_s", I32TruncF64S {}),
            (0xab, mvp, "i32.trunc_f64_u", I32TruncF64U {}),
            (0xac, mvp, "i64.extend_i32_s", I64ExtendI32S {}),
            (0xad, mvp, "i64.extend_i32_u", I64ExtendI32U {}),
            (0xae, mvp, "i64.trunc_f32_s", I64TruncF32S {}),
            (0xaf, mvp, "i64.trunc_f32_u", I64TruncF32U {}),
            (0xb0, mvp, "i64.trunc_f64_s", I64TruncF64S {}),
            (0xb1, mvp, "i64.trunc_f64_u", I64TruncF64U {}),
            (0xb2, mvp, "f32.convert_i32_s", F32ConvertI32S {}),
            (0xb3, mvp, "f32.convert_i32_u", F32ConvertI32U {}),
            (0xb4, mvp, "f32.convert_i64_s", F32ConvertI64S {}),
            (0xb5, mvp, "f32.convert_i64_u", F32ConvertI64U {}),
            (0xb6, mvp, "f32.demote_f64", F32DemoteF64 {}),
            (0xb7, mvp, "f64.convert_i32_s", F64ConvertI32S {}),
            (0xb8, mvp, "f64.convert_i32_u", F64ConvertI32U {}),
            (0xb9, mvp, "f64.convert_i64_s", F64ConvertI64S {}),
            (0xba, mvp, "f64.convert_i64_u", F64ConvertI64U {}),
            (0xbb, mvp, "f64.promote_f32", F64PromoteF32 {}),
            (0xbc, mvp, "i32.reinterpret_f32", I32ReinterpretF32 {}),
            (0xbd, mvp, "i64.reinterpret_f64", I64ReinterpretF64 {}),
            (0xbe, mvp, "f32.reinterpret_i32", F32ReinterpretI32 {}),
            (0xbf, mvp, "f64.reinterpret_i64", F64ReinterpretI64 {}),
            (0xc0, sign_extension, "i32.extend8_s", I32Extend8S {}),
            (0xc1, sign_extension, "i32.extend16_s", I32Extend16S {}),
            (0xc2, sign_extension, "i64.extend8_s", I64Extend8S {}),
            (0xc3, sign_extension, "i64.extend16_s", I64Extend16S {}),
            (0xc4, sign_extension, "i64.extend32_s", I64Extend32S {}),
            (0xd0, reference_types, "ref.null", RefNull { ty: HeapType }),
            (0xd1, reference_types, "ref.is_null", RefIsNull {}),
            (0xd2, reference_types, "ref.func", RefFunc { func: FuncIndex }),
            // 0xFC: saturating truncation + bulk memory.
            (0xFC0000, saturating_float_to_int, "i32.trunc_sat_f32_s", I32TruncSatF32S {}),
            (0xFC0001, saturating_float_to_int, "i32.trunc_sat_f32_u", I32TruncSatF32U {}),
            (0xFC0002, saturating_float_to_int, "i32.trunc_sat_f64_s", I32TruncSatF64S {}),
            (0xFC0003, saturating_float_to_int, "i32.trunc_sat_f64_u", I32TruncSatF64U {}),
            (0xFC0004, saturating_float_to_int, "i64.trunc_sat_f32_s", I64TruncSatF32S {}),
            (0xFC0005, saturating_float_to_int, "i64.trunc_sat_f32_u", I64TruncSatF32U {}),
            (0xFC0006, saturating_float_to_int, "i64.trunc_sat_f64_s", I64TruncSatF64S {}),
            (0xFC0007, saturating_float_to_int, "i64.trunc_sat_f64_u", I64TruncSatF64U {}),
            (0xFC0008, bulk_memory, "memory.init", MemoryInit { data: DataIndex, memory: MemoryIndex }),
            (0xFC0009, bulk_memory, "data.drop", DataDrop { data: DataIndex }),
            (0xFC000a, bulk_memory, "memory.copy", MemoryCopy { dst: MemoryIndex, src: MemoryIndex }),
            (0xFC000b, bulk_memory, "memory.fill", MemoryFill { memory: MemoryIndex }),
            (0xFC000c, bulk_memory, "table.init", TableInit { elem: ElemIndex, table: TableIndex }),
            (0xFC000d, bulk_memory, "elem.drop", ElemDrop { elem: ElemIndex }),
            (0xFC000e, bulk_memory, "table.copy", TableCopy { dst: TableIndex, src: TableIndex }),
            // 0xFE: threads.
            (0xFE0000, threads, "memory.atomic.notify", MemoryAtomicNotify { arg: MemArg }),
            (0xFE0001, threads, "memory.atomic.wait32", MemoryAtomicWait32 { arg: MemArg }),
            (0xFE0002, threads, "memory.atomic.wait64", MemoryAtomicWait64 { arg: MemArg }),
            (0xFE0003, threads, "atomic.fence", AtomicFence { flags: FenceFlags }),
            (0xFE0010, threads, "i32.atomic.load", I32AtomicLoad { arg: MemArg }),
            (0xFE0011, threads, "i64.atomic.load", I64AtomicLoad { arg: MemArg }),
            (0xFE0012, threads, "i32.atomic.load8_u", I32AtomicLoad8U { arg: MemArg }),
            (0xFE0013, threads, "i32.atomic.load16_u", I32AtomicLoad16U { arg: MemArg }),
            (0xFE0014, threads, "i64.atomic.load8_u", I64AtomicLoad8U { arg: MemArg }),
            (0xFE0015, threads, "i64.atomic.load16_u", I64AtomicLoad16U { arg: MemArg }),
            (0xFE0016, threads, "i64.atomic.load32_u", I64AtomicLoad32U { arg: MemArg }),
            (0xFE0017, threads, "i32.atomic.store", I32AtomicStore { arg: MemArg }),
            (0xFE0018, threads, "i64.atomic.store", I64AtomicStore { arg: MemArg }),
            (0xFE0019, threads, "i32.atomic.store8", I32AtomicStore8 { arg: MemArg }),
            (0xFE001a, threads, "i32.atomic.store16", I32AtomicStore16 { arg: MemArg }),
            (0xFE001b, threads, "i64.atomic.store8", I64AtomicStore8 { arg: MemArg }),
            (0xFE001c, threads, "i64.atomic.store16", I64AtomicStore16 { arg: MemArg }),
            (0xFE001d, threads, "i64.atomic.store32", I64AtomicStore32 { arg: MemArg }),
            (0xFE001e, threads, "i32.atomic.rmw.add", I32AtomicRmwAdd { arg: MemArg }),
            (0xFE001f, threads, "i64.atomic.rmw.add", I64AtomicRmwAdd { arg: MemArg }),
            (0xFE0020, threads, "i32.atomic.rmw8.add_u", I32AtomicRmw8AddU { arg: MemArg }),
            (0xFE0021, threads, "i32.atomic.rmw16.add_u", I32AtomicRmw16AddU { arg: MemArg }),
            (0xFE0022, threads, "i64.atomic.rmw8.add_u", I64AtomicRmw8AddU { arg: MemArg }),
            (0xFE0023, threads, "i64.atomic.rmw16.add_u", I64AtomicRmw16AddU { arg: MemArg }),
            (0xFE0024, threads, "i64.atomic.rmw32.add_u", I64AtomicRmw32AddU { arg: MemArg }),
            (0xFE0025, threads, "i32.atomic.rmw.sub", I32AtomicRmwSub { arg: MemArg }),
            (0xFE0026, threads, "i64.atomic.rmw.sub", I64AtomicRmwSub { arg: MemArg }),
            (0xFE0027, threads, "i32.atomic.rmw8.sub_u", I32AtomicRmw8SubU { arg: MemArg }),
            (0xFE0028, threads, "i32.atomic.rmw16.sub_u", I32AtomicRmw16SubU { arg: MemArg }),
            (0xFE0029, threads, "i64.atomic.rmw8.sub_u", I64AtomicRmw8SubU { arg: MemArg }),
            (0xFE002a, threads, "i64.atomic.rmw16.sub_u", I64AtomicRmw16SubU { arg: MemArg }),
            (0xFE002b, threads, "i64.atomic.rmw32.sub_u", I64AtomicRmw32SubU { arg: MemArg }),
            (0xFE002c, threads, "i32.atomic.rmw.and", I32AtomicRmwAnd { arg: MemArg }),
            (0xFE002d, threads, "i64.atomic.rmw.and", I64AtomicRmwAnd { arg: MemArg }),
            (0xFE002e, threads, "i32.atomic.rmw8.and_u", I32AtomicRmw8AndU { arg: MemArg }),
            (0xFE002f, threads, "i32.atomic.rmw16.and_u", I32AtomicRmw16AndU { arg: MemArg }),
            (0xFE0030, threads, "i64.atomic.rmw8.and_u", I64AtomicRmw8AndU { arg: MemArg }),
            (0xFE0031, threads, "i64.atomic.rmw16.and_u", I64AtomicRmw16AndU { arg: MemArg }),
            (0xFE0032, threads, "i64.atomic.rmw32.and_u", I64AtomicRmw32AndU { arg: MemArg }),
            (0xFE0033, threads, "i32.atomic.rmw.or", I32AtomicRmwOr { arg: MemArg }),
            (0xFE0034, threads, "i64.atomic.rmw.or", I64AtomicRmwOr { arg: MemArg }),
            (0xFE0035, threads, "i32.atomic.rmw8.or_u", I32AtomicRmw8OrU { arg: MemArg }),
            (0xFE0036, threads, "i32.atomic.rmw16.or_u", I32AtomicRmw16OrU { arg: MemArg }),
            (0xFE0037, threads, "i64.atomic.rmw8.or_u", I64AtomicRmw8OrU { arg: MemArg }),
            (0xFE0038, threads, "i64.atomic.rmw16.or_u", I64AtomicRmw16OrU { arg: MemArg }),
            (0xFE0039, threads, "i64.atomic.rmw32.or_u", I64AtomicRmw32OrU { arg: MemArg }),
            (0xFE003a, threads, "i32.atomic.rmw.xor", I32AtomicRmwXor { arg: MemArg }),
            (0xFE003b, threads, "i64.atomic.rmw.xor", I64AtomicRmwXor { arg: MemArg }),
            (0xFE003c, threads, "i32.atomic.rmw8.xor_u", I32AtomicRmw8XorU { arg: MemArg }),
            (0xFE003d, threads, "i32.atomic.rmw16.xor_u", I32AtomicRmw16XorU { arg: MemArg }),
            (0xFE003e, threads, "i64.atomic.rmw8.xor_u", I64AtomicRmw8XorU { arg: MemArg }),
            (0xFE003f, threads, "i64.atomic.rmw16.xor_u", I64AtomicRmw16XorU { arg: MemArg }),
            (0xFE0040, threads, "i64.atomic.rmw32.xor_u", I64AtomicRmw32XorU { arg: MemArg }),
            (0xFE0041, threads, "i32.atomic.rmw.xchg", I32AtomicRmwXchg { arg: MemArg }),
            (0xFE0042, threads, "i64.atomic.rmw.xchg", I64AtomicRmwXchg { arg: MemArg }),
            (0xFE0043, threads, "i32.atomic.rmw8.xchg_u", I32AtomicRmw8XchgU { arg: MemArg }),
            (0xFE0044, threads, "i32.atomic.rmw16.xchg_u", I32AtomicRmw16XchgU { arg: MemArg }),
            (0xFE0045, threads, "i64.atomic.rmw8.xchg_u", I64AtomicRmw8XchgU { arg: MemArg }),
            (0xFE0046, threads, "i64.atomic.rmw16.xchg_u", I64AtomicRmw16XchgU { arg: MemArg }),
            (0xFE0047, threads, "i64.atomic.rmw32.xchg_u", I64AtomicRmw32XchgU { arg: MemArg }),
            (0xFE0048, threads, "i32.atomic.rmw.cmpxchg", I32AtomicRmwCmpxchg { arg: MemArg }),
            (0xFE0049, threads, "i64.atomic.rmw.cmpxchg", I64AtomicRmwCmpxchg { arg: MemArg }),
            (0xFE004a, threads, "i32.atomic.rmw8.cmpxchg_u", I32AtomicRmw8CmpxchgU { arg: MemArg }),
            (0xFE004b, threads, "i32.atomic.rmw16.cmpxchg_u", I32AtomicRmw16CmpxchgU { arg: MemArg }),
            (0xFE004c, threads, "i64.atomic.rmw8.cmpxchg_u", I64AtomicRmw8CmpxchgU { arg: MemArg }),
            (0xFE004d, threads, "i64.atomic.rmw16.cmpxchg_u", I64AtomicRmw16CmpxchgU { arg: MemArg }),
            (0xFE004e, threads, "i64.atomic.rmw32.cmpxchg_u", I64AtomicRmw32CmpxchgU { arg: MemArg }),
            // 0xFD: simd.
            (0xFD0000, simd, "v128.load", V128Load { arg: MemArg }),
            (0xFD000b, simd, "v128.store", V128Store { arg: MemArg }),
            (0xFD000c, simd, "v128.const", V128Const { value: V128Imm }),
            (0xFD000d, simd, "i8x16.shuffle", I8x16Shuffle { lanes: ShuffleLanes }),
            (0xFD000e, simd, "i8x16.swizzle", I8x16Swizzle {}),
            (0xFD000f, simd, "i8x16.splat", I8x16Splat {}),
            (0xFD0010, simd, "i16x8.splat", I16x8Splat {}),
            (0xFD0011, simd, "i32x4.splat", I32x4Splat {}),
            (0xFD0012, simd, "i64x2.splat", I64x2Splat {}),
            (0xFD0013, simd, "f32x4.splat", F32x4Splat {}),
            (0xFD0014, simd, "f64x2.splat", F64x2Splat {}),
            (0xFD0015, simd, "i8x16.extract_lane_s", I8x16ExtractLaneS { lane: LaneIdx }),
            (0xFD0016, simd, "i8x16.extract_lane_u", I8x16ExtractLaneU { lane: LaneIdx }),
            (0xFD0017, simd, "i8x16.replace_lane", I8x16ReplaceLane { lane: LaneIdx }),
            (0xFD0018, simd, "i16x8.extract_lane_s", I16x8ExtractLaneS { lane: LaneIdx }),
            (0xFD0019, simd, "i16x8.extract_lane_u", I16x8ExtractLaneU { lane: LaneIdx }),
            (0xFD001a, simd, "i16x8.replace_lane", I16x8ReplaceLane { lane: LaneIdx }),
            (0xFD001b, simd, "i32x4.extract_lane", I32x4ExtractLane { lane: LaneIdx }),
            (0xFD001c, simd, "i32x4.replace_lane", I32x4ReplaceLane { lane: LaneIdx }),
            (0xFD001d, simd, "i64x2.extract_lane", I64x2ExtractLane { lane: LaneIdx }),
            (0xFD001e, simd, "i64x2.replace_lane", I64x2ReplaceLane { lane: LaneIdx }),
            (0xFD001f, simd, "f32x4.extract_lane", F32x4ExtractLane { lane: LaneIdx }),
            (0xFD0020, simd, "f32x4.replace_lane", F32x4ReplaceLane { lane: LaneIdx }),
            (0xFD0021, simd, "f64x2.extract_lane", F64x2ExtractLane { lane: LaneIdx }),
            (0xFD0022, simd, "f64x2.replace_lane", F64x2ReplaceLane { lane: LaneIdx }),
            (0xFD0023, simd, "i8x16.eq", I8x16Eq {}),
            (0xFD0024, simd, "i8x16.ne", I8x16Ne {}),
            (0xFD0025, simd, "i8x16.lt_s", I8x16LtS {}),
            (0xFD0026, simd, "i8x16.lt_u", I8x16LtU {}),
            (0xFD0027, simd, "i8x16.gt_s", I8x16GtS {}),
            (0xFD0028, simd, "i8x16.gt_u", I8x16GtU {}),
            (0xFD0029, simd, "i8x16.le_s", I8x16LeS {}),
            (0xFD002a, simd, "i8x16.le_u", I8x16LeU {}),
            (0xFD002b, simd, "i8x16.ge_s", I8x16GeS {}),
            (0xFD002c, simd, "i8x16.ge_u", I8x16GeU {}),
            (0xFD002d, simd, "i16x8.eq", I16x8Eq {}),
            (0xFD002e, simd, "i16x8.ne", I16x8Ne {}),
            (0xFD002f, simd, "i16x8.lt_s", I16x8LtS {}),
            (0xFD0030, simd, "i16x8.lt_u", I16x8LtU {}),
            (0xFD0031, simd, "i16x8.gt_s", I16x8GtS {}),
            (0xFD0032, simd, "i16x8.gt_u", I16x8GtU {}),
            (0xFD0033, simd, "i16x8.le_s", I16x8LeS {}),
            (0xFD0034, simd, "i16x8.le_u", I16x8LeU {}),
            (0xFD0035, simd, "i16x8.ge_s", I16x8GeS {}),
            (0xFD0036, simd, "i16x8.ge_u", I16x8GeU {}),
            (0xFD0037, simd, "i32x4.eq", I32x4Eq {}),
            (0xFD0038, simd, "i32x4.ne", I32x4Ne {}),
            (0xFD0039, simd, "i32x4.lt_s", I32x4LtS {}),
            (0xFD003a, simd, "i32x4.lt_u", I32x4LtU {}),
            (0xFD003b, simd, "i32x4.gt_s", I32x4GtS {}),
            (0xFD003c, simd, "i32x4.gt_u", I32x4GtU {}),
            (0xFD003d, simd, "i32x4.le_s", I32x4LeS {}),
            (0xFD003e, simd, "i32x4.le_u", I32x4LeU {}),
            (0xFD003f, simd, "i32x4.ge_s", I32x4GeS {}),
            (0xFD0040, simd, "i32x4.ge_u", I32x4GeU {}),
            (0xFD0041, simd, "f32x4.eq", F32x4Eq {}),
            (0xFD0042, simd, "f32x4.ne", F32x4Ne {}),
            (0xFD0043, simd, "f32x4.lt", F32x4Lt {}),
            (0xFD0044, simd, "f32x4.gt", F32x4Gt {}),
            (0xFD0045, simd, "f32x4.le", F32x4Le {}),
            (0xFD0046, simd, "f32x4.ge", F32x4Ge {}),
            (0xFD0047, simd, "f64x2.eq", F64x2Eq {}),
            (0xFD0048, simd, "f64x2.ne", F64x2Ne {}),
            (0xFD0049, simd, "f64x2.lt", F64x2Lt {}),
            (0xFD004a, simd, "f64x2.gt", F64x2Gt {}),
            (0xFD004b, simd, "f64x2.le", F64x2Le {}),
            (0xFD004c, simd, "f64x2.ge", F64x2Ge {}),
            (0xFD004d, simd, "v128.not", V128Not {}),
            (0xFD004e, simd, "v128.and", V128And {}),
            (0xFD004f, simd, "v128.andnot", V128AndNot {}),
            (0xFD0050, simd, "v128.or", V128Or {}),
            (0xFD0051, simd, "v128.xor", V128Xor {}),
            (0xFD0052, simd, "v128.bitselect", V128Bitselect {}),
            (0xFD0053, simd, "v128.any_true", V128AnyTrue {}),
            (0xFD0060, simd, "i8x16.abs", I8x16Abs {}),
            (0xFD0061, simd, "i8x16.neg", I8x16Neg {}),
            (0xFD0063, simd, "i8x16.all_true", I8x16AllTrue {}),
            (0xFD0064, simd, "i8x16.bitmask", I8x16Bitmask {}),
            (0xFD006b, simd, "i8x16.shl", I8x16Shl {}),
            (0xFD006c, simd, "i8x16.shr_s", I8x16ShrS {}),
            (0xFD006d, simd, "i8x16.shr_u", I8x16ShrU {}),
            (0xFD006e, simd, "i8x16.add", I8x16Add {}),
            (0xFD0071, simd, "i8x16.sub", I8x16Sub {}),
            (0xFD0080, simd, "i16x8.abs", I16x8Abs {}),
            (0xFD0081, simd, "i16x8.neg", I16x8Neg {}),
            (0xFD0083, simd, "i16x8.all_true", I16x8AllTrue {}),
            (0xFD0084, simd, "i16x8.bitmask", I16x8Bitmask {}),
            (0xFD008b, simd, "i16x8.shl", I16x8Shl {}),
            (0xFD008c, simd, "i16x8.shr_s", I16x8ShrS {}),
            (0xFD008d, simd, "i16x8.shr_u", I16x8ShrU {}),
            (0xFD008e, simd, "i16x8.add", I16x8Add {}),
            (0xFD0091, simd, "i16x8.sub", I16x8Sub {}),
            (0xFD0095, simd, "i16x8.mul", I16x8Mul {}),
            (0xFD00a0, simd, "i32x4.abs", I32x4Abs {}),
            (0xFD00a1, simd, "i32x4.neg", I32x4Neg {}),
            (0xFD00a3, simd, "i32x4.all_true", I32x4AllTrue {}),
            (0xFD00a4, simd, "i32x4.bitmask", I32x4Bitmask {}),
            (0xFD00ab, simd, "i32x4.shl", I32x4Shl {}),
            (0xFD00ac, simd, "i32x4.shr_s", I32x4ShrS {}),
            (0xFD00ad, simd, "i32x4.shr_u", I32x4ShrU {}),
            (0xFD00ae, simd, "i32x4.add", I32x4Add {}),
            (0xFD00b1, simd, "i32x4.sub", I32x4Sub {}),
            (0xFD00b5, simd, "i32x4.mul", I32x4Mul {}),
            (0xFD00c0, simd, "i64x2.abs", I64x2Abs {}),
            (0xFD00c1, simd, "i64x2.neg", I64x2Neg {}),
            (0xFD00c3, simd, "i64x2.all_true", I64x2AllTrue {}),
            (0xFD00c4, simd, "i64x2.bitmask", I64x2Bitmask {}),
            (0xFD00cb, simd, "i64x2.shl", I64x2Shl {}),
            (0xFD00cc, simd, "i64x2.shr_s", I64x2ShrS {}),
            (0xFD00cd, simd, "i64x2.shr_u", I64x2ShrU {}),
            (0xFD00ce, simd, "i64x2.add", I64x2Add {}),
            (0xFD00d1, simd, "i64x2.sub", I64x2Sub {}),
            (0xFD00d5, simd, "i64x2.mul", I64x2Mul {}),
            (0xFD00d6, simd, "i64x2.eq", I64x2Eq {}),
            (0xFD00d7, simd, "i64x2.ne", I64x2Ne {}),
            (0xFD00d8, simd, "i64x2.lt_s", I64x2LtS {}),
            (0xFD00d9, simd, "i64x2.gt_s", I64x2GtS {}),
            (0xFD00da, simd, "i64x2.le_s", I64x2LeS {}),
            (0xFD00db, simd, "i64x2.ge_s", I64x2GeS {}),
            (0xFD00e0, simd, "f32x4.abs", F32x4Abs {}),
            (0xFD00e1, simd, "f32x4.neg", F32x4Neg {}),
            (0xFD00e3, simd, "f32x4.sqrt", F32x4Sqrt {}),
            (0xFD00e4, simd, "f32x4.add", F32x4Add {}),
            (0xFD00e5, simd, "f32x4.sub", F32x4Sub {}),
            (0xFD00e6, simd, "f32x4.mul", F32x4Mul {}),
            (0xFD00e7, simd, "f32x4.div", F32x4Div {}),
            (0xFD00e8, simd, "f32x4.min", F32x4Min {}),
            (0xFD00e9, simd, "f32x4.max", F32x4Max {}),
            (0xFD00ec, simd, "f64x2.abs", F64x2Abs {}),
            (0xFD00ed, simd, "f64x2.neg", F64x2Neg {}),
            (0xFD00ef, simd, "f64x2.sqrt", F64x2Sqrt {}),
            (0xFD00f0, simd, "f64x2.add", F64x2Add {}),
            (0xFD00f1, simd, "f64x2.sub", F64x2Sub {}),
            (0xFD00f2, simd, "f64x2.mul", F64x2Mul {}),
            (0xFD00f3, simd, "f64x2.div", F64x2Div {}),
            (0xFD00f4, simd, "f64x2.min", F64x2Min {}),
            (0xFD00f5, simd, "f64x2.max", F64x2Max {}),
            (0xFD00f8, simd, "i32x4.trunc_sat_f32x4_s", I32x4TruncSatF32x4S {}),
            (0xFD00f9, simd, "i32x4.trunc_sat_f32x4_u", I32x4TruncSatF32x4U {}),
            (0xFD00fa, simd, "f32x4.convert_i32x4_s", F32x4ConvertI32x4S {}),
            (0xFD00fb, simd, "f32x4.convert_i32x4_u", F32x4ConvertI32x4U {}),
        }
    };
}
pub(crate) use for_each_operator;

macro_rules! define_operator {
    ($(($code:literal, $feat:ident, $name:literal, $op:ident { $($field:ident : $fty:ty),* $(,)? })),* $(,)?) => {
        /// One decoded operator with its immediates.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Operator {
            $( $op { $($field: $fty),* } ),*
        }

        impl Operator {
            /// The canonical text-format mnemonic.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$op { .. } => $name ),*
                }
            }

            /// Decodes a single operator, rejecting opcodes whose gating
            /// feature is disabled.
            pub(crate) fn decode(
                reader: &mut BinaryReader<'_>,
                features: &FeatureSpec,
            ) -> crate::Result<Self> {
                let pos = reader.pos();
                let byte = reader.read_u8()?;
                let key = match byte {
                    0xFC | 0xFD | 0xFE => (u32::from(byte) << 16) | reader.read_u32_leb()?,
                    byte => u32::from(byte),
                };
                match key {
                    $(
                        $code => {
                            if !features.$feat() {
                                return Err(Error::malformed(
                                    pos,
                                    concat!("unknown opcode (`", $name, "` requires a disabled feature)"),
                                ));
                            }
                            Ok(Self::$op { $($field: Operand::decode(reader)?),* })
                        }
                    )*
                    key => Err(Error::malformed(pos, format!("unknown opcode 0x{key:x}"))),
                }
            }

            /// Re-encodes the operator in the binary format.
            pub(crate) fn encode(&self, sink: &mut Vec<u8>) {
                match self {
                    $(
                        Self::$op { $($field),* } => {
                            write_opcode(sink, $code);
                            $( Operand::encode($field, sink); )*
                        }
                    )*
                }
            }

            /// Walks the operator's immediates in encoding order.
            pub(crate) fn visit_operands(&self, v: &mut dyn ImmVisitor) {
                match self {
                    $(
                        Self::$op { $($field),* } => {
                            $( Operand::visit($field, v); )*
                        }
                    )*
                }
            }
        }
    };
}
for_each_operator!(define_operator);

/// Streaming operator decoder over a function body or initializer tail.
pub(crate) struct OperatorsReader<'a, 'data> {
    reader: &'a mut BinaryReader<'data>,
    features: &'a FeatureSpec,
}

impl<'a, 'data> OperatorsReader<'a, 'data> {
    pub(crate) fn new(reader: &'a mut BinaryReader<'data>, features: &'a FeatureSpec) -> Self {
        Self { reader, features }
    }

    /// Returns the next operator and the offset it started at.
    pub(crate) fn read(&mut self) -> crate::Result<(Operator, usize)> {
        let offset = self.reader.pos();
        let op = Operator::decode(self.reader, self.features)?;
        Ok((op, offset))
    }

    pub(crate) fn pos(&self) -> usize {
        self.reader.pos()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_simple_body() {
        // local.get 0, local.get 1, i32.add, end
        let bytes = [0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b];
        let features = FeatureSpec::default();
        let mut reader = BinaryReader::new(&bytes);
        let mut ops = OperatorsReader::new(&mut reader, &features);
        assert_eq!(
            ops.read().unwrap().0,
            Operator::LocalGet {
                local: LocalIndex::from_u32(0)
            }
        );
        assert_eq!(
            ops.read().unwrap().0,
            Operator::LocalGet {
                local: LocalIndex::from_u32(1)
            }
        );
        assert_eq!(ops.read().unwrap().0, Operator::I32Add {});
        assert_eq!(ops.read().unwrap().0, Operator::End {});
        assert!(ops.is_empty());
    }

    #[test]
    fn encode_is_inverse_of_decode() {
        let features = FeatureSpec::all();
        let ops = [
            Operator::I32Const { value: -42 },
            Operator::I64Const { value: i64::MIN },
            Operator::Br { depth: 3 },
            Operator::CallIndirect {
                ty: TypeIndex::from_u32(7),
                table: TableIndex::from_u32(0),
            },
            Operator::I32Load {
                arg: MemArg {
                    align_log2: 2,
                    offset: 65532,
                    memory: MemoryIndex::from_u32(0),
                },
            },
            Operator::MemoryAtomicWait32 {
                arg: MemArg {
                    align_log2: 2,
                    offset: 0,
                    memory: MemoryIndex::from_u32(0),
                },
            },
            Operator::V128Const {
                value: V128Imm(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10),
            },
        ];
        let mut sink = Vec::new();
        for op in &ops {
            op.encode(&mut sink);
        }
        let mut reader = BinaryReader::new(&sink);
        let mut decoder = OperatorsReader::new(&mut reader, &features);
        for op in &ops {
            assert_eq!(&decoder.read().unwrap().0, op);
        }
        assert!(decoder.is_empty());
    }

    #[test]
    fn gated_opcode_is_malformed_when_feature_off() {
        let mut features = FeatureSpec::default();
        features.threads = false;
        // memory.atomic.notify
        let bytes = [0xfe, 0x00, 0x02, 0x00];
        let mut reader = BinaryReader::new(&bytes);
        let err = Operator::decode(&mut reader, &features).unwrap_err();
        assert!(matches!(err, Error::MalformedModule { offset: 0, .. }));
    }
}
