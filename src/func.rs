use crate::compartment::{Compartment, InstanceHandle, Stored};
use crate::errors::Error;
use crate::indices::DefinedFuncIndex;
use crate::trap::{Trap, TrapKind};
use crate::types::{FuncType, ValType};
use crate::values::{VMVal, Val};
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use smallvec::SmallVec;

/// The machine-facing shape of every host function: operands in, results
/// out, both in the guest's raw value representation. Thunks are built once
/// per signature at registration time, never by reflection at call time.
#[doc(hidden)]
pub type HostCallback =
    Arc<dyn Fn(&mut Compartment, &[VMVal], &mut [VMVal]) -> Result<(), Trap> + Send + Sync>;

#[doc(hidden)]
pub enum FuncKind {
    Wasm {
        instance: InstanceHandle,
        def_index: DefinedFuncIndex,
    },
    Host(HostCallback),
}

#[doc(hidden)]
pub struct FuncData {
    pub ty: &'static FuncType,
    pub kind: FuncKind,
}

impl fmt::Debug for FuncData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            FuncKind::Wasm { instance, def_index } => f
                .debug_struct("FuncData")
                .field("ty", &self.ty)
                .field("instance", &instance.0)
                .field("def_index", def_index)
                .finish(),
            FuncKind::Host(_) => f
                .debug_struct("FuncData")
                .field("ty", &self.ty)
                .field("kind", &"host")
                .finish(),
        }
    }
}

/// A callable function owned by a [`Compartment`]: either a compiled wasm
/// function of some instance or a registered host function.
#[derive(Debug, Clone, Copy)]
pub struct Func(pub(crate) Stored<FuncData>);

impl Func {
    /// Registers a host function from a dynamic closure over [`Val`]s.
    pub fn new(
        compartment: &mut Compartment,
        params: &[ValType],
        results: &[ValType],
        f: impl Fn(&mut Compartment, &[Val], &mut [Val]) -> crate::Result<()> + Send + Sync + 'static,
    ) -> Func {
        let ty = crate::registry().func_type(params, results);
        let callback: HostCallback = Arc::new(move |compartment, args, out| {
            let params: SmallVec<[Val; 8]> = args
                .iter()
                .zip(ty.params.iter())
                .map(|(raw, ty)| Val::from_vmval(*raw, *ty))
                .collect();
            let mut results: SmallVec<[Val; 4]> =
                ty.results.iter().map(|ty| Val::default_for(*ty)).collect();
            f(compartment, &params, &mut results).map_err(host_error_to_trap)?;
            for (slot, (value, expected)) in
                out.iter_mut().zip(results.iter().zip(ty.results.iter()))
            {
                if value.ty() != *expected {
                    return Err(Trap::new(
                        TrapKind::UncaughtException,
                        format!(
                            "host function produced {}, declared {expected}",
                            value.ty()
                        ),
                    ));
                }
                *slot = value.as_vmval();
            }
            Ok(())
        });
        Func(compartment.push_func(FuncData {
            ty,
            kind: FuncKind::Host(callback),
        }))
    }

    /// Registers a typed host function. The thunk is monomorphised for the
    /// closure's signature; no marshalling decisions happen per call.
    pub fn wrap<Params, Results>(
        compartment: &mut Compartment,
        f: impl IntoFunc<Params, Results>,
    ) -> Func {
        let data = f.into_func_data();
        Func(compartment.push_func(data))
    }

    pub fn ty(&self, compartment: &Compartment) -> &'static FuncType {
        compartment[self.0].ty
    }

    /// Calls the function, marshalling arguments and results.
    ///
    /// Guest faults surface as [`Error::Trap`]; an exception thrown by guest
    /// code that no guest frame catches surfaces as a trap of kind
    /// [`TrapKind::UncaughtException`].
    pub fn call(
        &self,
        compartment: &mut Compartment,
        params: &[Val],
        results: &mut [Val],
    ) -> crate::Result<()> {
        let ty = self.ty(compartment);
        if params.len() != ty.params.len() {
            return Err(Error::Link(format!(
                "expected {} arguments, got {}",
                ty.params.len(),
                params.len()
            )));
        }
        for (value, expected) in params.iter().zip(ty.params.iter()) {
            if value.ty() != *expected {
                return Err(Error::Link(format!(
                    "argument type mismatch: expected {expected}, got {}",
                    value.ty()
                )));
            }
        }
        if results.len() != ty.results.len() {
            return Err(Error::Link(format!(
                "expected room for {} results, got {}",
                ty.results.len(),
                results.len()
            )));
        }

        let args: SmallVec<[VMVal; 8]> = params.iter().map(Val::as_vmval).collect();
        let out = crate::interp::invoke(compartment, *self, &args)?;
        for (slot, (raw, ty)) in results.iter_mut().zip(out.iter().zip(ty.results.iter())) {
            *slot = Val::from_vmval(*raw, *ty);
        }
        Ok(())
    }
}

fn host_error_to_trap(err: Error) -> Trap {
    match err {
        Error::Trap(trap) => trap,
        other => Trap::new(TrapKind::UncaughtException, format!("host error: {other}")),
    }
}

/// A scalar that can cross the typed host-function boundary.
pub trait WasmTy: Copy + Send + Sync + 'static {
    #[doc(hidden)]
    fn val_type() -> ValType;
    #[doc(hidden)]
    fn from_vmval(raw: VMVal) -> Self;
    #[doc(hidden)]
    fn into_vmval(self) -> VMVal;
}

macro_rules! impl_wasm_ty {
    ($($ty:ty => $val:ident, $from:ident, $into:expr;)*) => {$(
        impl WasmTy for $ty {
            fn val_type() -> ValType {
                ValType::$val
            }
            fn from_vmval(raw: VMVal) -> Self {
                #[allow(clippy::cast_sign_loss)]
                {
                    raw.$from() as $ty
                }
            }
            fn into_vmval(self) -> VMVal {
                $into(self)
            }
        }
    )*};
}

impl_wasm_ty! {
    i32 => I32, get_i32, |v| VMVal::i32(v);
    u32 => I32, get_u32, |v| VMVal::i32(v as i32);
    i64 => I64, get_i64, |v| VMVal::i64(v);
    u64 => I64, get_u64, |v| VMVal::i64(v as i64);
}

impl WasmTy for f32 {
    fn val_type() -> ValType {
        ValType::F32
    }
    fn from_vmval(raw: VMVal) -> Self {
        raw.get_f32()
    }
    fn into_vmval(self) -> VMVal {
        VMVal::f32(self.to_bits())
    }
}

impl WasmTy for f64 {
    fn val_type() -> ValType {
        ValType::F64
    }
    fn from_vmval(raw: VMVal) -> Self {
        raw.get_f64()
    }
    fn into_vmval(self) -> VMVal {
        VMVal::f64(self.to_bits())
    }
}

/// What a typed host function may return: nothing, one scalar, or either
/// wrapped in `Result<_, Trap>` to raise a guest-visible trap.
pub trait WasmResults: Send + Sync + 'static {
    #[doc(hidden)]
    fn result_types() -> Vec<ValType>;
    #[doc(hidden)]
    fn store(self, out: &mut [VMVal]) -> Result<(), Trap>;
}

impl WasmResults for () {
    fn result_types() -> Vec<ValType> {
        Vec::new()
    }
    fn store(self, _out: &mut [VMVal]) -> Result<(), Trap> {
        Ok(())
    }
}

impl<T: WasmTy> WasmResults for T {
    fn result_types() -> Vec<ValType> {
        alloc::vec![T::val_type()]
    }
    fn store(self, out: &mut [VMVal]) -> Result<(), Trap> {
        out[0] = self.into_vmval();
        Ok(())
    }
}

impl<T: WasmResults> WasmResults for Result<T, Trap> {
    fn result_types() -> Vec<ValType> {
        T::result_types()
    }
    fn store(self, out: &mut [VMVal]) -> Result<(), Trap> {
        self?.store(out)
    }
}

/// Conversion of a plain closure into a registered host function; one impl
/// per arity, monomorphised over the scalar types.
pub trait IntoFunc<Params, Results>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_func_data(self) -> FuncData;
}

macro_rules! impl_into_func {
    ($($param:ident)*) => {
        #[allow(non_snake_case, unused_variables, unused_mut)]
        impl<F, R, $($param,)*> IntoFunc<($($param,)*), R> for F
        where
            F: Fn($($param),*) -> R + Send + Sync + 'static,
            R: WasmResults,
            $($param: WasmTy,)*
        {
            fn into_func_data(self) -> FuncData {
                let params = [$($param::val_type()),*];
                let results = R::result_types();
                let ty = crate::registry().func_type(&params, &results);
                let callback: HostCallback = Arc::new(move |_compartment, args, out| {
                    let mut iter = args.iter();
                    $(let $param = $param::from_vmval(*iter.next().expect("argument count"));)*
                    self($($param),*).store(out)
                });
                FuncData {
                    ty,
                    kind: FuncKind::Host(callback),
                }
            }
        }
    };
}

impl_into_func!();
impl_into_func!(A1);
impl_into_func!(A1 A2);
impl_into_func!(A1 A2 A3);
impl_into_func!(A1 A2 A3 A4);
impl_into_func!(A1 A2 A3 A4 A5);
