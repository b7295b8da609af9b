//! Renders a module in the S-expression text form.
//!
//! Generation is decoupled from layout: the traversal emits lines plus
//! INDENT/DEDENT markers, and a second pass expands the markers into
//! newline-and-spaces. Function bodies are decoded from their raw bytes and
//! printed one operator per line, with a parallel control stack supplying
//! label names and `end ;; $label` comments.

use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, LocalIndex, MemoryIndex, TableIndex, TagIndex,
    TypeIndex,
};
use crate::translate::operators::{
    read_val_type, BlockType, BrTableImm, FenceFlags, HeapType, Ieee32, Ieee64, ImmVisitor,
    LaneIdx, MemArg, Operator, OperatorsReader, ShuffleLanes, V128Imm,
};
use crate::translate::reader::BinaryReader;
use crate::translate::{
    ConstExpr, ConstOp, DataKind, ElementKind, FunctionBody, TranslatedModule,
};
use crate::types::{GlobalType, Limits, TypeTuple};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::{HashMap, HashSet};

pub(crate) fn print_module(module: &TranslatedModule) -> String {
    Printer::new(module).print()
}

enum Item {
    Line(String),
    Indent,
    Dedent,
}

/// Hands out unique `$`-sigiled identifiers: the first free of `base`,
/// `base_0`, `base_1`, ... wins.
#[derive(Default)]
struct NameScope {
    used: HashSet<String>,
}

impl NameScope {
    fn claim(&mut self, base: &str) -> String {
        let base = sanitize(base);
        if self.used.insert(base.clone()) {
            return format!("${base}");
        }
        let mut counter = 0;
        loop {
            let candidate = format!("{base}_{counter}");
            if self.used.insert(candidate.clone()) {
                return format!("${candidate}");
            }
            counter += 1;
        }
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_.+-".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "id".to_string()
    } else {
        cleaned
    }
}

struct Printer<'m> {
    module: &'m TranslatedModule,
    items: Vec<Item>,
    func_names: HashMap<FuncIndex, String>,
    type_names: HashMap<TypeIndex, String>,
    global_names: HashMap<GlobalIndex, String>,
    tag_names: HashMap<TagIndex, String>,
}

impl<'m> Printer<'m> {
    fn new(module: &'m TranslatedModule) -> Self {
        let mut scope = NameScope::default();
        let mut func_names = HashMap::new();
        for (index, _) in module.functions.iter() {
            let name = match module.func_name(index) {
                Some(name) => scope.claim(name),
                None => scope.claim(&format!("f{}", index.as_u32())),
            };
            func_names.insert(index, name);
        }
        let mut type_names = HashMap::new();
        for (index, _) in module.types.iter() {
            type_names.insert(index, scope.claim(&format!("t{}", index.as_u32())));
        }
        let mut global_names = HashMap::new();
        for (index, _) in module.globals.iter() {
            global_names.insert(index, scope.claim(&format!("g{}", index.as_u32())));
        }
        let mut tag_names = HashMap::new();
        for (index, _) in module.tags.iter() {
            tag_names.insert(index, scope.claim(&format!("e{}", index.as_u32())));
        }
        Self {
            module,
            items: Vec::new(),
            func_names,
            type_names,
            global_names,
            tag_names,
        }
    }

    fn line(&mut self, text: impl Into<String>) {
        self.items.push(Item::Line(text.into()));
    }

    fn indent(&mut self) {
        self.items.push(Item::Indent);
    }

    fn dedent(&mut self) {
        self.items.push(Item::Dedent);
    }

    // The second pass: markers become indentation.
    fn finish(self) -> String {
        let mut out = String::new();
        let mut depth = 0_usize;
        for item in self.items {
            match item {
                Item::Indent => depth += 1,
                Item::Dedent => depth = depth.saturating_sub(1),
                Item::Line(line) => {
                    for _ in 0..depth {
                        out.push_str("  ");
                    }
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }
        out
    }

    fn print(mut self) -> String {
        let module = self.module;
        self.line("(module");
        self.indent();

        for (index, ty) in module.types.iter() {
            self.line(format!(
                "(type {} (func{}{}))",
                self.type_names[&index],
                tuple_text("param", ty.params),
                tuple_text("result", ty.results)
            ));
        }

        for import in &module.imports {
            let desc = self.import_desc(import.index);
            self.line(format!(
                "(import \"{}\" \"{}\" {desc})",
                escape_str(&import.module),
                escape_str(&import.name)
            ));
        }

        for (index, ty) in module.tables.iter() {
            if !module.is_imported_table(index) {
                self.line(format!("(table {} funcref)", limits_text(&ty.limits, ty.shared)));
            }
        }
        for (index, ty) in module.memories.iter() {
            if !module.is_imported_memory(index) {
                self.line(format!("(memory {})", limits_text(&ty.limits, ty.shared)));
            }
        }
        for (index, type_index) in module.tags.iter() {
            if !module.is_imported_tag(index) {
                let ty = module.types[*type_index];
                self.line(format!(
                    "(tag {}{})",
                    self.tag_names[&index],
                    tuple_text("param", ty.params)
                ));
            }
        }
        for (def_index, init) in module.global_initializers.iter() {
            let index = module.global_index(def_index);
            let ty = module.globals[index];
            self.line(format!(
                "(global {} {} {})",
                self.global_names[&index],
                global_type_text(&ty),
                self.const_expr_text(init)
            ));
        }

        for export in &module.exports {
            let target = match export.index {
                crate::indices::EntityIndex::Function(i) => {
                    format!("func {}", self.func_names[&i])
                }
                crate::indices::EntityIndex::Table(i) => format!("table {}", i.as_u32()),
                crate::indices::EntityIndex::Memory(i) => format!("memory {}", i.as_u32()),
                crate::indices::EntityIndex::Global(i) => {
                    format!("global {}", self.global_names[&i])
                }
                crate::indices::EntityIndex::Tag(i) => format!("tag {}", self.tag_names[&i]),
            };
            self.line(format!("(export \"{}\" ({target}))", escape_str(&export.name)));
        }

        if let Some(start) = module.start {
            self.line(format!("(start {})", self.func_names[&start]));
        }

        for (_, segment) in module.element_segments.iter() {
            self.line(self.elem_text(segment));
        }

        for (def_index, body) in module.function_bodies.iter() {
            let index = module.func_index(def_index);
            if let Err(err) = self.func(index, body) {
                // A body that failed to decode still prints as a diagnostic;
                // printing is best-effort over possibly unvalidated input.
                self.line(format!(";; (function {}: {err})", index.as_u32()));
            }
        }

        for (_, segment) in module.data_segments.iter() {
            let mut text = String::from("(data ");
            if let DataKind::Active { memory, offset } = &segment.kind {
                if memory.as_u32() != 0 {
                    text.push_str(&format!("(memory {}) ", memory.as_u32()));
                }
                text.push_str(&self.const_expr_text(offset));
                text.push(' ');
            }
            text.push('"');
            escape_bytes(&mut text, &segment.bytes);
            text.push_str("\")");
            self.line(text);
        }

        for section in &module.user_sections {
            if section.name == "linking" {
                self.linking_comments(&section.bytes);
            }
        }

        self.dedent();
        self.line(")");
        self.finish()
    }

    fn import_desc(&self, index: crate::indices::EntityIndex) -> String {
        use crate::indices::EntityIndex;
        match index {
            EntityIndex::Function(i) => {
                let ty = self.module.functions[i];
                format!("(func {} (type {}))", self.func_names[&i], self.type_names[&ty])
            }
            EntityIndex::Table(i) => {
                let ty = self.module.tables[i];
                format!("(table {} funcref)", limits_text(&ty.limits, ty.shared))
            }
            EntityIndex::Memory(i) => {
                let ty = self.module.memories[i];
                format!("(memory {})", limits_text(&ty.limits, ty.shared))
            }
            EntityIndex::Global(i) => {
                let ty = self.module.globals[i];
                format!("(global {} {})", self.global_names[&i], global_type_text(&ty))
            }
            EntityIndex::Tag(i) => {
                let ty = self.module.types[self.module.tags[i]];
                format!(
                    "(tag {}{})",
                    self.tag_names[&i],
                    tuple_text("param", ty.params)
                )
            }
        }
    }

    fn const_expr_text(&self, expr: &ConstExpr) -> String {
        match expr.ops() {
            [ConstOp::I32Const(v)] => format!("(i32.const {v})"),
            [ConstOp::I64Const(v)] => format!("(i64.const {v})"),
            [ConstOp::F32Const(bits)] => format!("(f32.const {})", fmt_f32(*bits)),
            [ConstOp::F64Const(bits)] => format!("(f64.const {})", fmt_f64(*bits)),
            [ConstOp::V128Const(v)] => format!("(v128.const i64x2 {} {})", *v as u64, (*v >> 64) as u64),
            [ConstOp::GlobalGet(index)] => format!("(global.get {})", self.global_names[index]),
            [ConstOp::RefNull] => "(ref.null func)".to_string(),
            [ConstOp::RefFunc(index)] => format!("(ref.func {})", self.func_names[index]),
            _ => ";; (non-canonical initializer)".to_string(),
        }
    }

    fn elem_text(&self, segment: &crate::translate::ElementSegment) -> String {
        let mut text = String::from("(elem ");
        match &segment.kind {
            ElementKind::Active { table, offset } => {
                if table.as_u32() != 0 {
                    text.push_str(&format!("(table {}) ", table.as_u32()));
                }
                text.push_str(&self.const_expr_text(offset));
                text.push(' ');
            }
            ElementKind::Passive => {}
            ElementKind::Declared => text.push_str("declare "),
        }
        if segment.elements.iter().any(Option::is_none) {
            text.push_str("funcref");
            for element in segment.elements.iter() {
                match element {
                    Some(func) => {
                        text.push_str(&format!(" (ref.func {})", self.func_names[func]));
                    }
                    None => text.push_str(" (ref.null func)"),
                }
            }
        } else {
            text.push_str("func");
            for element in segment.elements.iter().flatten() {
                text.push(' ');
                text.push_str(&self.func_names[element]);
            }
        }
        text.push(')');
        text
    }

    fn func(&mut self, index: FuncIndex, body: &FunctionBody) -> crate::Result<()> {
        let module = self.module;
        let type_index = module.functions[index];
        let ty = module.types[type_index];

        let mut locals_scope = NameScope::default();
        let mut local_names: Vec<String> = Vec::new();
        let named_locals = module.names.locals.get(&index);
        let mut claim_local = |slot: u32, default_base: &str| {
            let named = named_locals.and_then(|map| map.get(&LocalIndex::from_u32(slot)));
            match named {
                Some(name) => locals_scope.claim(name),
                None => locals_scope.claim(&format!("{default_base}{slot}")),
            }
        };

        let mut header = format!(
            "(func {} (type {})",
            self.func_names[&index], self.type_names[&type_index]
        );
        for (i, param) in ty.params.iter().enumerate() {
            let name = claim_local(u32::try_from(i).unwrap(), "p");
            header.push_str(&format!(" (param {name} {param})"));
            local_names.push(name);
        }
        header.push_str(&tuple_text("result", ty.results));
        self.line(header);
        self.indent();

        // Local declarations precede the operator stream.
        let mut reader = BinaryReader::new_with_offset(&body.bytes, body.offset);
        let group_count = reader.read_u32_leb()?;
        for _ in 0..group_count {
            let count = reader.read_u32_leb()?;
            let val_type = read_val_type(&mut reader)?;
            for _ in 0..count {
                let slot = u32::try_from(local_names.len()).unwrap();
                let name = claim_local(slot, "l");
                self.line(format!("(local {name} {val_type})"));
                local_names.push(name);
            }
        }

        let mut labels: Vec<Option<String>> = Vec::new();
        let mut label_counter = 0_u32;
        let mut claim_label = || {
            let name = format!("$L{label_counter}");
            label_counter += 1;
            name
        };

        let features = module.features;
        let mut ops = OperatorsReader::new(&mut reader, &features);
        while !ops.is_empty() {
            let (op, _) = ops.read()?;
            match &op {
                Operator::End {} => {
                    match labels.pop() {
                        Some(label) => {
                            self.dedent();
                            match label {
                                Some(label) => self.line(format!("end ;; {label}")),
                                None => self.line("end"),
                            }
                        }
                        // The end of the function body itself.
                        None => break,
                    }
                    continue;
                }
                Operator::Else {} | Operator::Catch { .. } | Operator::CatchAll {} => {
                    self.dedent();
                    let mut text = String::from(op.name());
                    self.operands(&mut text, &op, &labels, &local_names);
                    self.line(text);
                    self.indent();
                    continue;
                }
                Operator::Delegate { .. } => {
                    self.dedent();
                    labels.pop();
                    let mut text = String::from(op.name());
                    self.operands(&mut text, &op, &labels, &local_names);
                    self.line(text);
                    continue;
                }
                Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. }
                | Operator::Try { .. } => {
                    let label = claim_label();
                    let mut text = format!("{} {label}", op.name());
                    self.operands(&mut text, &op, &labels, &local_names);
                    self.line(text);
                    self.indent();
                    labels.push(Some(label));
                    continue;
                }
                _ => {}
            }
            let mut text = String::from(op.name());
            self.operands(&mut text, &op, &labels, &local_names);
            self.line(text);
        }

        self.dedent();
        self.line(")");
        Ok(())
    }

    fn operands(
        &self,
        out: &mut String,
        op: &Operator,
        labels: &[Option<String>],
        local_names: &[String],
    ) {
        let mut visitor = OperandPrinter {
            out,
            printer: self,
            labels,
            local_names,
        };
        op.visit_operands(&mut visitor);
    }

    // The `linking` section renders as a comment block; any decode failure
    // inside it degrades to a one-line diagnostic.
    fn linking_comments(&mut self, bytes: &[u8]) {
        match disassemble_linking(bytes) {
            Ok(lines) => {
                for line in lines {
                    self.line(format!(";; {line}"));
                }
            }
            Err(err) => self.line(format!(";; (linking section: {err})")),
        }
    }
}

struct OperandPrinter<'a, 'm> {
    out: &'a mut String,
    printer: &'a Printer<'m>,
    labels: &'a [Option<String>],
    local_names: &'a [String],
}

impl OperandPrinter<'_, '_> {
    fn push(&mut self, text: impl AsRef<str>) {
        self.out.push(' ');
        self.out.push_str(text.as_ref());
    }

    fn label(&mut self, depth: u32) {
        let index = self.labels.len().checked_sub(1 + depth as usize);
        match index.and_then(|i| self.labels[i].as_ref()) {
            Some(name) => {
                let name = name.clone();
                self.push(name);
            }
            None => self.push(depth.to_string()),
        }
    }
}

impl ImmVisitor for OperandPrinter<'_, '_> {
    fn block_type(&mut self, ty: &BlockType) {
        match ty {
            BlockType::Empty => {}
            BlockType::Value(ty) => self.push(format!("(result {ty})")),
            BlockType::Func(index) => {
                self.push(format!("(type {})", self.printer.type_names[index]));
            }
        }
    }

    fn mem_arg(&mut self, arg: &MemArg) {
        if arg.memory.as_u32() != 0 {
            self.push(format!("(memory {})", arg.memory.as_u32()));
        }
        if arg.offset != 0 {
            self.push(format!("offset={}", arg.offset));
        }
        if arg.align_log2 != 0 {
            self.push(format!("align={}", 1_u32 << arg.align_log2));
        }
    }

    fn br_table(&mut self, imm: &BrTableImm) {
        for depth in imm.targets.iter() {
            self.label(*depth);
        }
        self.label(imm.default);
    }

    fn depth(&mut self, depth: u32) {
        self.label(depth);
    }

    fn func(&mut self, index: FuncIndex) {
        self.push(self.printer.func_names[&index].clone());
    }

    fn type_index(&mut self, index: TypeIndex) {
        self.push(format!("(type {})", self.printer.type_names[&index]));
    }

    fn table(&mut self, index: TableIndex) {
        if index.as_u32() != 0 {
            self.push(index.as_u32().to_string());
        }
    }

    fn memory(&mut self, index: MemoryIndex) {
        if index.as_u32() != 0 {
            self.push(index.as_u32().to_string());
        }
    }

    fn global(&mut self, index: GlobalIndex) {
        self.push(self.printer.global_names[&index].clone());
    }

    fn local(&mut self, index: LocalIndex) {
        match self.local_names.get(index.as_u32() as usize) {
            Some(name) => {
                let name = name.clone();
                self.push(name);
            }
            None => self.push(index.as_u32().to_string()),
        }
    }

    fn tag(&mut self, index: TagIndex) {
        self.push(self.printer.tag_names[&index].clone());
    }

    fn elem(&mut self, index: ElemIndex) {
        self.push(index.as_u32().to_string());
    }

    fn data(&mut self, index: DataIndex) {
        self.push(index.as_u32().to_string());
    }

    fn const_i32(&mut self, value: i32) {
        self.push(value.to_string());
    }

    fn const_i64(&mut self, value: i64) {
        self.push(value.to_string());
    }

    fn const_f32(&mut self, value: Ieee32) {
        self.push(fmt_f32(value.0));
    }

    fn const_f64(&mut self, value: Ieee64) {
        self.push(fmt_f64(value.0));
    }

    fn const_v128(&mut self, value: V128Imm) {
        self.push(format!(
            "i64x2 {} {}",
            value.0 as u64,
            (value.0 >> 64) as u64
        ));
    }

    fn lane(&mut self, lane: LaneIdx) {
        self.push(lane.0.to_string());
    }

    fn lanes(&mut self, lanes: &ShuffleLanes) {
        for lane in lanes.0 {
            self.push(lane.to_string());
        }
    }

    fn fence(&mut self, _flags: FenceFlags) {}

    fn heap_type(&mut self, _ty: HeapType) {
        self.push("func");
    }
}

fn tuple_text(keyword: &str, tuple: &TypeTuple) -> String {
    if tuple.is_empty() {
        return String::new();
    }
    let mut out = format!(" ({keyword}");
    for ty in tuple.iter() {
        out.push_str(&format!(" {ty}"));
    }
    out.push(')');
    out
}

fn limits_text(limits: &Limits, shared: bool) -> String {
    let mut out = limits.min.to_string();
    if limits.is_bounded() {
        out.push_str(&format!(" {}", limits.max));
    }
    if shared {
        out.push_str(" shared");
    }
    out
}

fn global_type_text(ty: &GlobalType) -> String {
    if ty.mutable {
        format!("(mut {})", ty.content)
    } else {
        ty.content.to_string()
    }
}

fn fmt_f32(bits: u32) -> String {
    let value = f32::from_bits(bits);
    if value.is_nan() {
        format!("nan:0x{:x}", bits & 0x007f_ffff)
    } else if value.is_infinite() {
        if value.is_sign_negative() { "-inf" } else { "inf" }.to_string()
    } else {
        format!("{value:?}")
    }
}

fn fmt_f64(bits: u64) -> String {
    let value = f64::from_bits(bits);
    if value.is_nan() {
        format!("nan:0x{:x}", bits & 0x000f_ffff_ffff_ffff)
    } else if value.is_infinite() {
        if value.is_sign_negative() { "-inf" } else { "inf" }.to_string()
    } else {
        format!("{value:?}")
    }
}

fn escape_str(text: &str) -> String {
    let mut out = String::new();
    escape_bytes(&mut out, text.as_bytes());
    out
}

fn escape_bytes(out: &mut String, bytes: &[u8]) {
    for byte in bytes {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(*byte as char),
            byte => out.push_str(&format!("\\{byte:02x}")),
        }
    }
}

// ---- `linking` custom section -----------------------------------------

const WASM_SYM_UNDEFINED: u32 = 0x10;

fn disassemble_linking(bytes: &[u8]) -> crate::Result<Vec<String>> {
    let mut reader = BinaryReader::new(bytes);
    let mut lines = Vec::new();
    let version = reader.read_u32_leb()?;
    lines.push(format!("linking (version {version})"));

    while !reader.is_empty() {
        let id = reader.read_u8()?;
        let size = reader.read_u32_leb()? as usize;
        let mut sub = reader.sub_reader(size)?;
        match id {
            // segment info
            5 => {
                let count = sub.read_count("segment info")?;
                for i in 0..count {
                    let name = sub.read_name()?;
                    let alignment = sub.read_u32_leb()?;
                    let flags = sub.read_u32_leb()?;
                    lines.push(format!(
                        "  segment {i}: name=\"{name}\" align={alignment} flags=0x{flags:x}"
                    ));
                }
            }
            // init functions
            6 => {
                let count = sub.read_count("init func")?;
                for _ in 0..count {
                    let priority = sub.read_u32_leb()?;
                    let symbol = sub.read_u32_leb()?;
                    lines.push(format!("  init func: symbol={symbol} priority={priority}"));
                }
            }
            // comdat info
            7 => {
                let count = sub.read_count("comdat")?;
                for _ in 0..count {
                    let name = sub.read_name()?;
                    let flags = sub.read_u32_leb()?;
                    let entries = sub.read_count("comdat entry")?;
                    let mut line = format!("  comdat \"{name}\" flags=0x{flags:x}:");
                    for _ in 0..entries {
                        let kind = sub.read_u8()?;
                        let index = sub.read_u32_leb()?;
                        line.push_str(&format!(" ({kind} {index})"));
                    }
                    lines.push(line);
                }
            }
            // symbol table
            8 => {
                let count = sub.read_count("symbol")?;
                for i in 0..count {
                    lines.push(format!("  symbol {i}: {}", symbol_text(&mut sub)?));
                }
            }
            id => {
                lines.push(format!("  subsection {id} ({size} bytes)"));
                let remaining = sub.remaining();
                sub.read_bytes(remaining)?;
            }
        }
        sub.expect_empty("linking subsection")?;
    }
    Ok(lines)
}

fn symbol_text(sub: &mut BinaryReader<'_>) -> crate::Result<String> {
    let kind = sub.read_u8()?;
    let flags = sub.read_u32_leb()?;
    let text = match kind {
        // function / global / event / table symbols
        0 | 2 | 4 | 5 => {
            let kind_name = match kind {
                0 => "function",
                2 => "global",
                4 => "event",
                _ => "table",
            };
            let index = sub.read_u32_leb()?;
            if flags & WASM_SYM_UNDEFINED == 0 {
                let name = sub.read_name()?;
                format!("{kind_name} index={index} name=\"{name}\" flags=0x{flags:x}")
            } else {
                format!("{kind_name} index={index} (undefined) flags=0x{flags:x}")
            }
        }
        // data symbols
        1 => {
            let name = sub.read_name()?;
            if flags & WASM_SYM_UNDEFINED == 0 {
                let segment = sub.read_u32_leb()?;
                let offset = sub.read_u32_leb()?;
                let size = sub.read_u32_leb()?;
                format!(
                    "data name=\"{name}\" segment={segment} offset={offset} size={size} flags=0x{flags:x}"
                )
            } else {
                format!("data name=\"{name}\" (undefined) flags=0x{flags:x}")
            }
        }
        // section symbols
        3 => {
            let section = sub.read_u32_leb()?;
            format!("section index={section} flags=0x{flags:x}")
        }
        kind => format!("unknown kind {kind} flags=0x{flags:x}"),
    };
    Ok(text)
}
