use crate::indices::{SharedTypeIndex, TupleIndex};
use crate::types::{FuncType, TypeTuple, ValType};
use alloc::boxed::Box;
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::RwLock;

/// The process-wide canonicalization pools for [`TypeTuple`] and
/// [`FuncType`].
///
/// The pools are append-only for the process lifetime; canonical entries are
/// leaked so their addresses (and the index handles derived from them) never
/// invalidate. The hot path is a read lock; insertion is rare and exclusive.
pub struct TypeRegistry {
    tuples: RwLock<TupleInterner>,
    funcs: RwLock<FuncInterner>,
}

#[derive(Default)]
struct TupleInterner {
    map: HashMap<Box<[ValType]>, &'static TypeTuple>,
    pool: Vec<&'static TypeTuple>,
}

#[derive(Default)]
struct FuncInterner {
    map: HashMap<(TupleIndex, TupleIndex), &'static FuncType>,
    pool: Vec<&'static FuncType>,
}

static REGISTRY: spin::Lazy<TypeRegistry> = spin::Lazy::new(|| TypeRegistry {
    tuples: RwLock::new(TupleInterner::default()),
    funcs: RwLock::new(FuncInterner::default()),
});

/// The process-wide type registry.
pub fn registry() -> &'static TypeRegistry {
    &REGISTRY
}

impl TypeRegistry {
    /// Interns a tuple of value types. Equal element sequences always return
    /// the identical canonical allocation.
    pub fn tuple(&self, elems: &[ValType]) -> &'static TypeTuple {
        debug_assert!(
            !elems.contains(&ValType::Any),
            "`any` is a validator artifact and must not be interned"
        );
        if let Some(tuple) = self.tuples.read().map.get(elems) {
            return tuple;
        }

        let mut interner = self.tuples.write();
        // Someone may have raced us between the read and the write lock.
        if let Some(tuple) = interner.map.get(elems) {
            return tuple;
        }
        let index = TupleIndex::from_u32(u32::try_from(interner.pool.len()).unwrap());
        let tuple: &'static TypeTuple = Box::leak(Box::new(TypeTuple {
            index,
            hash: content_hash(elems),
            elems: elems.into(),
        }));
        interner.map.insert(elems.into(), tuple);
        interner.pool.push(tuple);
        tuple
    }

    pub fn tuple_by_index(&self, index: TupleIndex) -> &'static TypeTuple {
        self.tuples.read().pool[index.as_u32() as usize]
    }

    /// Interns a function signature.
    pub fn func_type(&self, params: &[ValType], results: &[ValType]) -> &'static FuncType {
        let params = self.tuple(params);
        let results = self.tuple(results);
        self.func_type_from_tuples(params, results)
    }

    pub fn func_type_from_tuples(
        &self,
        params: &'static TypeTuple,
        results: &'static TypeTuple,
    ) -> &'static FuncType {
        let key = (params.index, results.index);
        if let Some(ty) = self.funcs.read().map.get(&key) {
            return ty;
        }

        let mut interner = self.funcs.write();
        if let Some(ty) = interner.map.get(&key) {
            return ty;
        }
        let index = SharedTypeIndex::from_u32(u32::try_from(interner.pool.len()).unwrap());
        let ty: &'static FuncType = Box::leak(Box::new(FuncType {
            index,
            params,
            results,
        }));
        interner.map.insert(key, ty);
        interner.pool.push(ty);
        ty
    }

    pub fn func_type_by_index(&self, index: SharedTypeIndex) -> &'static FuncType {
        self.funcs.read().pool[index.as_u32() as usize]
    }
}

// Content hash must be stable for the process lifetime, so roll a plain
// FNV-1a instead of the seeded map hasher.
fn content_hash(elems: &[ValType]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for ty in elems {
        hash ^= *ty as u64;
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash ^ elems.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_identity() {
        let a = registry().tuple(&[ValType::I32, ValType::F64]);
        let b = registry().tuple(&[ValType::I32, ValType::F64]);
        let c = registry().tuple(&[ValType::I32]);
        assert_eq!(a.index(), b.index());
        assert!(core::ptr::eq(a, b));
        assert_ne!(a.index(), c.index());
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn empty_tuple_is_legal() {
        let a = registry().tuple(&[]);
        let b = registry().tuple(&[]);
        assert!(core::ptr::eq(a, b));
        assert!(a.is_empty());
    }

    #[test]
    fn func_type_identity() {
        let a = registry().func_type(&[ValType::I32, ValType::I32], &[ValType::I32]);
        let b = registry().func_type(&[ValType::I32, ValType::I32], &[ValType::I32]);
        let c = registry().func_type(&[ValType::I32], &[ValType::I32]);
        assert!(core::ptr::eq(a, b));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(core::ptr::eq(a, registry().func_type_by_index(a.index())));
    }
}
