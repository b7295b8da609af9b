//! The inverse of the decoder: serializes a [`TranslatedModule`] back into
//! the binary format, reusing the operator table for initializer expressions
//! and re-emitting function bodies byte-for-byte.

use crate::indices::EntityIndex;
use crate::translate::operators::{val_type_byte, write_u32_leb, write_u64_leb};
use crate::translate::{
    DataKind, ElementKind, ElementSegment, TranslatedModule,
};
use crate::types::{Limits, MemoryType, TableType, ValType};
use alloc::vec;
use alloc::vec::Vec;

pub(crate) fn encode_module(module: &TranslatedModule) -> Vec<u8> {
    let mut out = vec![0x00, b'a', b's', b'm', 0x01, 0x00, 0x00, 0x00];

    if !module.types.is_empty() {
        section(&mut out, 1, |sink| {
            write_u32_leb(sink, u32::try_from(module.types.len()).unwrap());
            for (_, ty) in module.types.iter() {
                sink.push(0x60);
                write_val_types(sink, ty.params);
                write_val_types(sink, ty.results);
            }
        });
    }

    if !module.imports.is_empty() {
        section(&mut out, 2, |sink| {
            write_u32_leb(sink, u32::try_from(module.imports.len()).unwrap());
            for import in &module.imports {
                write_name(sink, &import.module);
                write_name(sink, &import.name);
                match import.index {
                    EntityIndex::Function(i) => {
                        sink.push(0x00);
                        write_u32_leb(sink, module.functions[i].as_u32());
                    }
                    EntityIndex::Table(i) => {
                        sink.push(0x01);
                        write_table_type(sink, &module.tables[i]);
                    }
                    EntityIndex::Memory(i) => {
                        sink.push(0x02);
                        write_memory_type(sink, &module.memories[i]);
                    }
                    EntityIndex::Global(i) => {
                        sink.push(0x03);
                        let ty = module.globals[i];
                        sink.push(val_type_byte(ty.content));
                        sink.push(u8::from(ty.mutable));
                    }
                    EntityIndex::Tag(i) => {
                        sink.push(0x04);
                        sink.push(0x00);
                        write_u32_leb(sink, module.tags[i].as_u32());
                    }
                }
            }
        });
    }

    if module.num_defined_functions() > 0 {
        section(&mut out, 3, |sink| {
            write_u32_leb(sink, module.num_defined_functions());
            for (index, ty) in module.functions.iter() {
                if !module.is_imported_func(index) {
                    write_u32_leb(sink, ty.as_u32());
                }
            }
        });
    }

    if module.num_defined_tables() > 0 {
        section(&mut out, 4, |sink| {
            write_u32_leb(sink, module.num_defined_tables());
            for (index, ty) in module.tables.iter() {
                if !module.is_imported_table(index) {
                    write_table_type(sink, ty);
                }
            }
        });
    }

    if module.num_defined_memories() > 0 {
        section(&mut out, 5, |sink| {
            write_u32_leb(sink, module.num_defined_memories());
            for (index, ty) in module.memories.iter() {
                if !module.is_imported_memory(index) {
                    write_memory_type(sink, ty);
                }
            }
        });
    }

    if module.num_defined_tags() > 0 {
        section(&mut out, 13, |sink| {
            write_u32_leb(sink, module.num_defined_tags());
            for (index, ty) in module.tags.iter() {
                if !module.is_imported_tag(index) {
                    sink.push(0x00);
                    write_u32_leb(sink, ty.as_u32());
                }
            }
        });
    }

    if module.num_defined_globals() > 0 {
        section(&mut out, 6, |sink| {
            write_u32_leb(sink, module.num_defined_globals());
            for (def_index, init) in module.global_initializers.iter() {
                let ty = module.globals[module.global_index(def_index)];
                sink.push(val_type_byte(ty.content));
                sink.push(u8::from(ty.mutable));
                init.encode(sink);
            }
        });
    }

    if !module.exports.is_empty() {
        section(&mut out, 7, |sink| {
            write_u32_leb(sink, u32::try_from(module.exports.len()).unwrap());
            for export in &module.exports {
                write_name(sink, &export.name);
                let (kind, raw) = match export.index {
                    EntityIndex::Function(i) => (0x00, i.as_u32()),
                    EntityIndex::Table(i) => (0x01, i.as_u32()),
                    EntityIndex::Memory(i) => (0x02, i.as_u32()),
                    EntityIndex::Global(i) => (0x03, i.as_u32()),
                    EntityIndex::Tag(i) => (0x04, i.as_u32()),
                };
                sink.push(kind);
                write_u32_leb(sink, raw);
            }
        });
    }

    if let Some(start) = module.start {
        section(&mut out, 8, |sink| {
            write_u32_leb(sink, start.as_u32());
        });
    }

    if !module.element_segments.is_empty() {
        section(&mut out, 9, |sink| {
            write_u32_leb(sink, u32::try_from(module.element_segments.len()).unwrap());
            for (_, segment) in module.element_segments.iter() {
                write_element_segment(sink, segment);
            }
        });
    }

    if let Some(count) = module.data_count {
        section(&mut out, 12, |sink| {
            write_u32_leb(sink, count);
        });
    }

    if !module.function_bodies.is_empty() {
        section(&mut out, 10, |sink| {
            write_u32_leb(sink, u32::try_from(module.function_bodies.len()).unwrap());
            for (_, body) in module.function_bodies.iter() {
                write_u32_leb(sink, u32::try_from(body.bytes.len()).unwrap());
                sink.extend_from_slice(&body.bytes);
            }
        });
    }

    if !module.data_segments.is_empty() {
        section(&mut out, 11, |sink| {
            write_u32_leb(sink, u32::try_from(module.data_segments.len()).unwrap());
            for (_, segment) in module.data_segments.iter() {
                match &segment.kind {
                    DataKind::Active { memory, offset } if memory.as_u32() == 0 => {
                        write_u32_leb(sink, 0);
                        offset.encode(sink);
                    }
                    DataKind::Active { memory, offset } => {
                        write_u32_leb(sink, 2);
                        write_u32_leb(sink, memory.as_u32());
                        offset.encode(sink);
                    }
                    DataKind::Passive => write_u32_leb(sink, 1),
                }
                write_u32_leb(sink, u32::try_from(segment.bytes.len()).unwrap());
                sink.extend_from_slice(&segment.bytes);
            }
        });
    }

    // User sections are preserved in the order they were encountered. Their
    // position relative to known sections is not recorded, so they are
    // re-emitted at the tail.
    for user in &module.user_sections {
        section(&mut out, 0, |sink| {
            write_name(sink, &user.name);
            sink.extend_from_slice(&user.bytes);
        });
    }

    out
}

fn section(out: &mut Vec<u8>, id: u8, f: impl FnOnce(&mut Vec<u8>)) {
    let mut body = Vec::new();
    f(&mut body);
    out.push(id);
    write_u32_leb(out, u32::try_from(body.len()).unwrap());
    out.extend_from_slice(&body);
}

fn write_name(sink: &mut Vec<u8>, name: &str) {
    write_u32_leb(sink, u32::try_from(name.len()).unwrap());
    sink.extend_from_slice(name.as_bytes());
}

fn write_val_types(sink: &mut Vec<u8>, types: &[ValType]) {
    write_u32_leb(sink, u32::try_from(types.len()).unwrap());
    for ty in types {
        sink.push(val_type_byte(*ty));
    }
}

fn write_limits(sink: &mut Vec<u8>, limits: &Limits, shared: bool) {
    let mut flags = 0_u8;
    if limits.is_bounded() {
        flags |= 0x01;
    }
    if shared {
        flags |= 0x02;
    }
    sink.push(flags);
    write_u64_leb(sink, limits.min);
    if limits.is_bounded() {
        write_u64_leb(sink, limits.max);
    }
}

fn write_table_type(sink: &mut Vec<u8>, ty: &TableType) {
    sink.push(0x70);
    write_limits(sink, &ty.limits, ty.shared);
}

fn write_memory_type(sink: &mut Vec<u8>, ty: &MemoryType) {
    write_limits(sink, &ty.limits, ty.shared);
}

fn write_element_segment(sink: &mut Vec<u8>, segment: &ElementSegment) {
    let has_null = segment.elements.iter().any(Option::is_none);
    let mut flags = match &segment.kind {
        ElementKind::Active { table, .. } if table.as_u32() == 0 => 0,
        ElementKind::Active { .. } => 2,
        ElementKind::Passive => 1,
        ElementKind::Declared => 3,
    };
    if has_null {
        flags |= 0b100;
    }
    write_u32_leb(sink, flags);

    if let ElementKind::Active { table, offset } = &segment.kind {
        if flags & 0b011 == 2 {
            write_u32_leb(sink, table.as_u32());
        }
        offset.encode(sink);
    }
    if flags & 0b011 != 0 {
        // Element kind byte for funcidx items, reftype for expression items.
        sink.push(if flags & 0b100 != 0 { 0x70 } else { 0x00 });
    }

    write_u32_leb(sink, u32::try_from(segment.elements.len()).unwrap());
    for element in segment.elements.iter() {
        if flags & 0b100 != 0 {
            match element {
                Some(func) => {
                    crate::translate::ConstExpr::new(crate::translate::ConstOp::RefFunc(*func))
                        .encode(sink);
                }
                None => {
                    crate::translate::ConstExpr::new(crate::translate::ConstOp::RefNull)
                        .encode(sink);
                }
            }
        } else {
            write_u32_leb(sink, element.expect("funcidx element").as_u32());
        }
    }
}
