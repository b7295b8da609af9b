use crate::errors::Error;
use crate::indices::{EntityIndex, FuncIndex, GlobalIndex, LocalIndex, MemoryIndex, TableIndex, TypeIndex};
use crate::translate::const_expr::ConstExpr;
use crate::translate::operators::read_val_type;
use crate::translate::reader::BinaryReader;
use crate::translate::{
    DataKind, DataSegment, ElementKind, ElementSegment, Export, FeatureSpec, FunctionBody, Import,
    TranslatedModule, UserSection,
};
use crate::types::{GlobalType, Limits, MemoryType, TableType, ValType};
use alloc::format;
use alloc::string::ToString;
use alloc::vec::Vec;
use hashbrown::HashMap;

/// Parses the binary format into a [`TranslatedModule`].
///
/// This pass checks structure only: magic and version, canonical section
/// order, section sizes, index encodings, string encodings. Nothing here
/// looks at operator types; function bodies are carried as raw bytes for the
/// validator.
pub struct ModuleParser {
    features: FeatureSpec,
}

// Non-custom sections must appear at most once, in this canonical order.
fn section_rank(id: u8) -> Option<u8> {
    Some(match id {
        1 => 1,   // type
        2 => 2,   // import
        3 => 3,   // function
        4 => 4,   // table
        5 => 5,   // memory
        13 => 6,  // tag
        6 => 7,   // global
        7 => 8,   // export
        8 => 9,   // start
        9 => 10,  // element
        12 => 11, // data count
        10 => 12, // code
        11 => 13, // data
        _ => return None,
    })
}

impl ModuleParser {
    pub fn new(features: FeatureSpec) -> Self {
        Self { features }
    }

    pub fn parse(&self, data: &[u8]) -> crate::Result<TranslatedModule> {
        let mut reader = BinaryReader::new(data);

        let magic = reader.read_bytes(4)?;
        if magic != b"\0asm" {
            return Err(Error::malformed(0, "bad magic number"));
        }
        let version = reader.read_bytes(4)?;
        if version != [0x01, 0x00, 0x00, 0x00] {
            return Err(Error::malformed(4, "unsupported binary version"));
        }

        let mut module = TranslatedModule {
            features: self.features,
            ..TranslatedModule::default()
        };

        let mut last_rank = 0_u8;
        while !reader.is_empty() {
            let section_offset = reader.pos();
            let id = reader.read_u8()?;
            let size = reader.read_u32_leb()? as usize;
            let mut body = reader.sub_reader(size)?;

            if let Some(rank) = section_rank(id) {
                if rank <= last_rank {
                    return Err(Error::malformed(
                        section_offset,
                        format!("section with id {id} out of order"),
                    ));
                }
                last_rank = rank;
            } else if id != 0 {
                return Err(Error::malformed(
                    section_offset,
                    format!("unknown section id {id}"),
                ));
            }

            match id {
                0 => self.read_custom_section(&mut module, &mut body)?,
                1 => self.read_type_section(&mut module, &mut body)?,
                2 => self.read_import_section(&mut module, &mut body)?,
                3 => self.read_function_section(&mut module, &mut body)?,
                4 => self.read_table_section(&mut module, &mut body)?,
                5 => self.read_memory_section(&mut module, &mut body)?,
                13 => self.read_tag_section(&mut module, &mut body)?,
                6 => self.read_global_section(&mut module, &mut body)?,
                7 => self.read_export_section(&mut module, &mut body)?,
                8 => {
                    module.start = Some(FuncIndex::from_u32(body.read_u32_leb()?));
                }
                9 => self.read_element_section(&mut module, &mut body)?,
                12 => {
                    module.data_count = Some(body.read_u32_leb()?);
                }
                10 => self.read_code_section(&mut module, &mut body)?,
                11 => self.read_data_section(&mut module, &mut body)?,
                _ => unreachable!(),
            }

            // A section body must be consumed exactly; leftover bytes mean
            // the declared size lied.
            body.expect_empty("section")?;
        }

        if module.function_bodies.len() != module.num_defined_functions() as usize {
            return Err(Error::malformed(
                data.len(),
                format!(
                    "function and code section lengths differ ({} declared, {} bodies)",
                    module.num_defined_functions(),
                    module.function_bodies.len()
                ),
            ));
        }
        if let Some(count) = module.data_count {
            if count as usize != module.data_segments.len() {
                return Err(Error::malformed(
                    data.len(),
                    "data count section disagrees with data section",
                ));
            }
        }

        Ok(module)
    }

    fn read_type_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("type")?;
        module.types.reserve_exact(count as usize);
        for _ in 0..count {
            let pos = body.pos();
            let form = body.read_u8()?;
            if form != 0x60 {
                return Err(Error::malformed(
                    pos,
                    format!("invalid function type form 0x{form:02x}"),
                ));
            }
            let params = self.read_val_types(body)?;
            let results = self.read_val_types(body)?;
            if results.len() > 1 && !self.features.multi_value {
                return Err(Error::malformed(
                    pos,
                    "multiple results require the multi-value feature",
                ));
            }
            module
                .types
                .push(crate::registry().func_type(&params, &results));
        }
        Ok(())
    }

    fn read_val_types(&self, body: &mut BinaryReader<'_>) -> crate::Result<Vec<ValType>> {
        let count = body.read_count("value type")?;
        let mut types = Vec::with_capacity(count as usize);
        for _ in 0..count {
            types.push(read_val_type(body)?);
        }
        Ok(types)
    }

    fn read_import_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("import")?;
        module.imports.reserve_exact(count as usize);
        for _ in 0..count {
            let import_module = body.read_name()?.to_string();
            let import_name = body.read_name()?.to_string();
            let pos = body.pos();
            let kind = body.read_u8()?;
            let index = match kind {
                0x00 => {
                    let ty = TypeIndex::from_u32(body.read_u32_leb()?);
                    module.num_imported_functions += 1;
                    EntityIndex::Function(module.functions.push(ty))
                }
                0x01 => {
                    let ty = self.read_table_type(body)?;
                    module.num_imported_tables += 1;
                    EntityIndex::Table(module.tables.push(ty))
                }
                0x02 => {
                    let ty = self.read_memory_type(body)?;
                    module.num_imported_memories += 1;
                    EntityIndex::Memory(module.memories.push(ty))
                }
                0x03 => {
                    let ty = self.read_global_type(body)?;
                    module.num_imported_globals += 1;
                    EntityIndex::Global(module.globals.push(ty))
                }
                0x04 => {
                    let ty = self.read_tag_type(body)?;
                    module.num_imported_tags += 1;
                    EntityIndex::Tag(module.tags.push(ty))
                }
                kind => {
                    return Err(Error::malformed(
                        pos,
                        format!("invalid import kind 0x{kind:02x}"),
                    ))
                }
            };
            module.imports.push(Import {
                module: import_module,
                name: import_name,
                index,
            });
        }
        Ok(())
    }

    fn read_limits(&self, body: &mut BinaryReader<'_>) -> crate::Result<(Limits, bool)> {
        let pos = body.pos();
        let flags = body.read_u8()?;
        if flags > 0x03 {
            return Err(Error::malformed(pos, format!("invalid limits flags 0x{flags:02x}")));
        }
        let shared = flags & 0x02 != 0;
        if shared && !self.features.threads {
            return Err(Error::malformed(
                pos,
                "shared limits require the threads feature",
            ));
        }
        let min = u64::from(body.read_u32_leb()?);
        let max = if flags & 0x01 != 0 {
            Some(u64::from(body.read_u32_leb()?))
        } else {
            if shared {
                return Err(Error::malformed(pos, "shared limits must declare a maximum"));
            }
            None
        };
        Ok((Limits::new(min, max), shared))
    }

    fn read_table_type(&self, body: &mut BinaryReader<'_>) -> crate::Result<TableType> {
        let pos = body.pos();
        let element = body.read_u8()?;
        if element != 0x70 {
            return Err(Error::malformed(
                pos,
                format!("invalid table element type 0x{element:02x}; only anyfunc is supported"),
            ));
        }
        let (limits, shared) = self.read_limits(body)?;
        Ok(TableType { shared, limits })
    }

    fn read_memory_type(&self, body: &mut BinaryReader<'_>) -> crate::Result<MemoryType> {
        let (limits, shared) = self.read_limits(body)?;
        Ok(MemoryType { shared, limits })
    }

    fn read_global_type(&self, body: &mut BinaryReader<'_>) -> crate::Result<GlobalType> {
        let content = read_val_type(body)?;
        let pos = body.pos();
        let mutable = match body.read_u8()? {
            0x00 => false,
            0x01 => true,
            byte => {
                return Err(Error::malformed(
                    pos,
                    format!("invalid global mutability 0x{byte:02x}"),
                ))
            }
        };
        Ok(GlobalType { content, mutable })
    }

    fn read_tag_type(&self, body: &mut BinaryReader<'_>) -> crate::Result<TypeIndex> {
        let pos = body.pos();
        if !self.features.exceptions {
            return Err(Error::malformed(
                pos,
                "tags require the exception-handling feature",
            ));
        }
        let attribute = body.read_u8()?;
        if attribute != 0x00 {
            return Err(Error::malformed(
                pos,
                format!("invalid tag attribute 0x{attribute:02x}"),
            ));
        }
        Ok(TypeIndex::from_u32(body.read_u32_leb()?))
    }

    fn read_function_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("function")?;
        module.functions.reserve_exact(count as usize);
        for _ in 0..count {
            let ty = TypeIndex::from_u32(body.read_u32_leb()?);
            module.functions.push(ty);
        }
        Ok(())
    }

    fn read_table_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("table")?;
        for _ in 0..count {
            let ty = self.read_table_type(body)?;
            module.tables.push(ty);
        }
        Ok(())
    }

    fn read_memory_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("memory")?;
        for _ in 0..count {
            let ty = self.read_memory_type(body)?;
            module.memories.push(ty);
        }
        Ok(())
    }

    fn read_tag_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("tag")?;
        for _ in 0..count {
            let ty = self.read_tag_type(body)?;
            module.tags.push(ty);
        }
        Ok(())
    }

    fn read_global_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("global")?;
        for _ in 0..count {
            let ty = self.read_global_type(body)?;
            let init = ConstExpr::decode(body, &self.features)?;
            module.globals.push(ty);
            module.global_initializers.push(init);
        }
        Ok(())
    }

    fn read_export_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("export")?;
        module.exports.reserve_exact(count as usize);
        for _ in 0..count {
            let name = body.read_name()?.to_string();
            let pos = body.pos();
            let kind = body.read_u8()?;
            let raw = body.read_u32_leb()?;
            let index = match kind {
                0x00 => EntityIndex::Function(FuncIndex::from_u32(raw)),
                0x01 => EntityIndex::Table(TableIndex::from_u32(raw)),
                0x02 => EntityIndex::Memory(MemoryIndex::from_u32(raw)),
                0x03 => EntityIndex::Global(GlobalIndex::from_u32(raw)),
                0x04 => EntityIndex::Tag(crate::indices::TagIndex::from_u32(raw)),
                kind => {
                    return Err(Error::malformed(
                        pos,
                        format!("invalid export kind 0x{kind:02x}"),
                    ))
                }
            };
            module.exports.push(Export { name, index });
        }
        Ok(())
    }

    fn read_element_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("element segment")?;
        for _ in 0..count {
            let pos = body.pos();
            let flags = body.read_u32_leb()?;
            if flags > 7 {
                return Err(Error::malformed(
                    pos,
                    format!("invalid element segment flags {flags}"),
                ));
            }
            if flags != 0 && !self.features.bulk_memory && !self.features.reference_types {
                return Err(Error::malformed(
                    pos,
                    "non-MVP element segments require bulk-memory or reference-types",
                ));
            }

            let kind = match flags & 0b011 {
                0 => ElementKind::Active {
                    table: TableIndex::from_u32(0),
                    offset: ConstExpr::decode(body, &self.features)?,
                },
                2 => ElementKind::Active {
                    table: TableIndex::from_u32(body.read_u32_leb()?),
                    offset: ConstExpr::decode(body, &self.features)?,
                },
                1 => ElementKind::Passive,
                3 => ElementKind::Declared,
                _ => unreachable!(),
            };

            // Flags 0 and 4 imply funcref implicitly; the others carry either
            // an element-kind byte (funcidx items) or a reftype (expr items).
            let uses_exprs = flags & 0b100 != 0;
            if flags & 0b011 != 0 {
                let pos = body.pos();
                let byte = body.read_u8()?;
                let expected = if uses_exprs { 0x70 } else { 0x00 };
                if byte != expected {
                    return Err(Error::malformed(
                        pos,
                        format!("invalid element segment kind 0x{byte:02x}"),
                    ));
                }
            }

            let item_count = body.read_count("element item")?;
            let mut elements = Vec::with_capacity(item_count as usize);
            for _ in 0..item_count {
                if uses_exprs {
                    let pos = body.pos();
                    let expr = ConstExpr::decode(body, &self.features)?;
                    let item = match expr.ops() {
                        [crate::translate::ConstOp::RefNull] => None,
                        [crate::translate::ConstOp::RefFunc(func)] => Some(*func),
                        _ => {
                            return Err(Error::malformed(
                                pos,
                                "unsupported element expression; only ref.null/ref.func",
                            ))
                        }
                    };
                    elements.push(item);
                } else {
                    elements.push(Some(FuncIndex::from_u32(body.read_u32_leb()?)));
                }
            }

            module.element_segments.push(ElementSegment {
                kind,
                elements: elements.into(),
            });
        }
        Ok(())
    }

    fn read_code_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("code entry")?;
        if count as usize != module.num_defined_functions() as usize {
            return Err(Error::malformed(
                body.pos(),
                format!(
                    "code entry count {count} does not match {} declared functions",
                    module.num_defined_functions()
                ),
            ));
        }
        module.function_bodies.reserve_exact(count as usize);
        for _ in 0..count {
            let size = body.read_u32_leb()? as usize;
            let offset = body.pos();
            let bytes = body.read_bytes(size)?;
            module.function_bodies.push(FunctionBody {
                bytes: bytes.into(),
                offset,
            });
        }
        Ok(())
    }

    fn read_data_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let count = body.read_count("data segment")?;
        for _ in 0..count {
            let pos = body.pos();
            let flags = body.read_u32_leb()?;
            let kind = match flags {
                0 => DataKind::Active {
                    memory: MemoryIndex::from_u32(0),
                    offset: ConstExpr::decode(body, &self.features)?,
                },
                1 => {
                    if !self.features.bulk_memory {
                        return Err(Error::malformed(
                            pos,
                            "passive data segments require the bulk-memory feature",
                        ));
                    }
                    DataKind::Passive
                }
                2 => DataKind::Active {
                    memory: MemoryIndex::from_u32(body.read_u32_leb()?),
                    offset: ConstExpr::decode(body, &self.features)?,
                },
                flags => {
                    return Err(Error::malformed(
                        pos,
                        format!("invalid data segment flags {flags}"),
                    ))
                }
            };
            let len = body.read_u32_leb()? as usize;
            let bytes = body.read_bytes(len)?;
            module.data_segments.push(DataSegment {
                kind,
                bytes: bytes.into(),
            });
        }
        Ok(())
    }

    fn read_custom_section(
        &self,
        module: &mut TranslatedModule,
        body: &mut BinaryReader<'_>,
    ) -> crate::Result<()> {
        let name = body.read_name()?.to_string();
        let offset = body.pos();
        let len = body.remaining();
        let bytes = body.read_bytes(len)?;
        if name == "name" {
            // A broken name section degrades to a diagnostic; it never fails
            // the decode.
            if let Err(err) = self.read_name_section(module, bytes, offset) {
                tracing::warn!("ignoring malformed name section: {err}");
                module.names = crate::translate::Names::default();
            }
        }
        module.user_sections.push(UserSection {
            name,
            bytes: bytes.into(),
        });
        Ok(())
    }

    fn read_name_section(
        &self,
        module: &mut TranslatedModule,
        bytes: &[u8],
        offset: usize,
    ) -> crate::Result<()> {
        let mut reader = BinaryReader::new_with_offset(bytes, offset);
        while !reader.is_empty() {
            let id = reader.read_u8()?;
            let size = reader.read_u32_leb()? as usize;
            let mut sub = reader.sub_reader(size)?;
            match id {
                0 => {
                    module.names.module = Some(sub.read_name()?.to_string());
                }
                1 => {
                    let count = sub.read_count("function name")?;
                    for _ in 0..count {
                        let func = FuncIndex::from_u32(sub.read_u32_leb()?);
                        let name = sub.read_name()?.to_string();
                        module.names.funcs.insert(func, name);
                    }
                }
                2 => {
                    let count = sub.read_count("local name map")?;
                    for _ in 0..count {
                        let func = FuncIndex::from_u32(sub.read_u32_leb()?);
                        let inner_count = sub.read_count("local name")?;
                        let mut locals = HashMap::new();
                        for _ in 0..inner_count {
                            let local = LocalIndex::from_u32(sub.read_u32_leb()?);
                            locals.insert(local, sub.read_name()?.to_string());
                        }
                        module.names.locals.insert(func, locals);
                    }
                }
                // Label, type, table, ... subsections carry nothing we
                // consume; the raw section is preserved regardless.
                _ => {}
            }
        }
        Ok(())
    }
}
