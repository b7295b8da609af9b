use crate::compile::{CompileInputs, CompiledFunction};
use crate::indices::{DefinedFuncIndex, EntityIndex, FuncIndex};
use crate::translate::{validate_module, FeatureSpec, ModuleParser, TranslatedModule};
use crate::types::EntityType;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use cranelift_entity::PrimaryMap;

/// A decoded, validated and lowered module, ready to instantiate any number
/// of times. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Module(Arc<ModuleInner>);

#[derive(Debug)]
struct ModuleInner {
    translated: TranslatedModule,
    functions: PrimaryMap<DefinedFuncIndex, CompiledFunction>,
}

impl Module {
    /// Decodes, validates and lowers a binary module.
    pub fn from_bytes(features: &FeatureSpec, bytes: &[u8]) -> crate::Result<Self> {
        tracing::debug!("decoding {} byte module", bytes.len());
        let translated = ModuleParser::new(*features).parse(bytes)?;
        validate_module(&translated)?;
        let functions = CompileInputs::from_module(&translated).compile()?;
        Ok(Self(Arc::new(ModuleInner {
            translated,
            functions,
        })))
    }

    /// Serializes back to the binary format. Function bodies are re-emitted
    /// byte-for-byte; custom sections keep their order.
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::translate::encode::encode_module(&self.0.translated)
    }

    /// Renders the module in the S-expression text form.
    pub fn to_wat(&self) -> String {
        crate::print::print_module(&self.0.translated)
    }

    /// The module name from the `name` section, when present.
    pub fn name(&self) -> Option<&str> {
        self.0.translated.names.module.as_deref()
    }

    pub fn imports(&self) -> impl ExactSizeIterator<Item = (&str, &str, EntityType)> {
        self.0.translated.imports.iter().map(|import| {
            (
                import.module.as_str(),
                import.name.as_str(),
                self.0.translated.type_of(import.index),
            )
        })
    }

    pub fn exports(&self) -> impl ExactSizeIterator<Item = (&str, EntityIndex)> + '_ {
        self.0
            .translated
            .exports
            .iter()
            .map(|export| (export.name.as_str(), export.index))
    }

    pub fn get_export(&self, name: &str) -> Option<EntityIndex> {
        self.0.translated.get_export(name)
    }

    pub fn func_name(&self, index: FuncIndex) -> Option<&str> {
        self.0.translated.func_name(index)
    }

    pub(crate) fn translated(&self) -> &TranslatedModule {
        &self.0.translated
    }

    pub(crate) fn compiled(&self, index: DefinedFuncIndex) -> &CompiledFunction {
        &self.0.functions[index]
    }
}
