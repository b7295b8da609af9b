use crate::compartment::Compartment;
use crate::errors::Error;
use crate::func::{Func, IntoFunc};
use crate::global::Global;
use crate::instance::Instance;
use crate::memory::Memory;
use crate::module::Module;
use crate::table::Table;
use crate::tag::Tag;
use crate::types::{EntityType, ValType};
use crate::values::Val;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;

/// Any object that can satisfy an import or be pulled out of an export.
#[derive(Debug, Clone, Copy)]
pub enum Extern {
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Tag(Tag),
}

impl Extern {
    pub fn ty(&self, compartment: &Compartment) -> EntityType {
        match self {
            Extern::Func(func) => EntityType::Function(func.ty(compartment)),
            Extern::Table(table) => EntityType::Table(table.ty(compartment)),
            Extern::Memory(memory) => EntityType::Memory(memory.ty(compartment)),
            Extern::Global(global) => EntityType::Global(global.ty(compartment)),
            Extern::Tag(tag) => EntityType::Tag(tag.ty(compartment)),
        }
    }
}

macro_rules! impl_extern_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {$(
        impl From<$ty> for Extern {
            fn from(value: $ty) -> Extern {
                Extern::$variant(value)
            }
        }
    )*};
}
impl_extern_from! {
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Tag(Tag),
}

/// Resolves imports by `(module, name)` pair.
///
/// A linker is a flat bag of definitions plus whole instances registered
/// under a module name, which makes it the thin chaining resolver the
/// instantiator needs: `resolve` consults the explicit definitions first and
/// the named instances second.
#[derive(Default)]
pub struct Linker {
    definitions: HashMap<(String, String), Extern>,
    instances: HashMap<String, Instance>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines one object under `module::name`. Redefinition is an error.
    pub fn define(
        &mut self,
        module: &str,
        name: &str,
        item: impl Into<Extern>,
    ) -> crate::Result<&mut Self> {
        let key = (module.to_string(), name.to_string());
        if self.definitions.contains_key(&key) {
            return Err(Error::Link(format!("{module}::{name} defined twice")));
        }
        self.definitions.insert(key, item.into());
        Ok(self)
    }

    /// Registers every export of `instance` under the given module name,
    /// resolved lazily at instantiation time.
    pub fn define_instance(
        &mut self,
        module: &str,
        instance: Instance,
    ) -> crate::Result<&mut Self> {
        if self.instances.contains_key(module) {
            return Err(Error::Link(format!("instance `{module}` defined twice")));
        }
        self.instances.insert(module.to_string(), instance);
        Ok(self)
    }

    /// Registers a typed host function under `module::name`.
    pub fn func_wrap<Params, Results>(
        &mut self,
        compartment: &mut Compartment,
        module: &str,
        name: &str,
        f: impl IntoFunc<Params, Results>,
    ) -> crate::Result<&mut Self> {
        let func = Func::wrap(compartment, f);
        self.define(module, name, func)
    }

    /// Registers a dynamic host function under `module::name`.
    pub fn func_new(
        &mut self,
        compartment: &mut Compartment,
        module: &str,
        name: &str,
        params: &[ValType],
        results: &[ValType],
        f: impl Fn(&mut Compartment, &[Val], &mut [Val]) -> crate::Result<()> + Send + Sync + 'static,
    ) -> crate::Result<&mut Self> {
        let func = Func::new(compartment, params, results, f);
        self.define(module, name, func)
    }

    /// The resolver the instantiator calls for each declared import.
    pub fn resolve(&self, compartment: &Compartment, module: &str, name: &str) -> Option<Extern> {
        if let Some(item) = self
            .definitions
            .get(&(module.to_string(), name.to_string()))
        {
            return Some(*item);
        }
        self.instances
            .get(module)
            .and_then(|instance| instance.get_export(compartment, name))
    }

    /// Resolves every import of `module` and runs the instantiation
    /// protocol. Either returns a ready [`Instance`] or leaves the
    /// compartment untouched.
    pub fn instantiate(
        &self,
        compartment: &mut Compartment,
        module: &Module,
    ) -> crate::Result<Instance> {
        let mut imports = Vec::with_capacity(module.translated().imports.len());
        for import in &module.translated().imports {
            let Some(item) = self.resolve(compartment, &import.module, &import.name) else {
                return Err(Error::Link(format!(
                    "unknown import: {}::{} has not been defined",
                    import.module, import.name
                )));
            };
            imports.push(item);
        }
        Instance::new_internal(compartment, module, &imports)
    }
}
