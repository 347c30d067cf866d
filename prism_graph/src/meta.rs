//! Meta access: the compiler's view of the host VM's types and fields.
//!
//! Simplification rules and the scheduler's alias analysis consult a
//! [`MetaAccess`] implementation. The trait is `Send + Sync` because one
//! provider is shared by every compilation running in parallel.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ir::operators::LocationIdentity;
use crate::ir::stamp::{ObjectStamp, Stamp};

// =============================================================================
// Identifiers
// =============================================================================

/// A resolved type in the host VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// A resolved instance field in the host VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaError {
    #[error("unknown type {0:?}")]
    UnknownType(TypeId),
    #[error("unknown field {0:?}")]
    UnknownField(FieldId),
}

pub type MetaResult<T> = Result<T, MetaError>;

// =============================================================================
// Descriptors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: Arc<str>,
    pub superclass: Option<TypeId>,
    /// No subclass can ever exist.
    pub is_final: bool,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Object(Option<TypeId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub id: FieldId,
    pub holder: TypeId,
    pub kind: FieldKind,
    /// Written once during construction, never afterwards.
    pub is_final: bool,
}

// =============================================================================
// Meta Access Trait
// =============================================================================

pub trait MetaAccess: Send + Sync + fmt::Debug {
    fn lookup_type(&self, ty: TypeId) -> MetaResult<TypeInfo>;

    fn lookup_field(&self, field: FieldId) -> MetaResult<FieldInfo>;

    /// Types whose direct superclass is `ty`.
    fn direct_subtypes(&self, ty: TypeId) -> MetaResult<Vec<TypeId>>;

    /// Reflexive, transitive subclass check.
    fn is_subtype(&self, sub: TypeId, sup: TypeId) -> MetaResult<bool> {
        let mut cursor = Some(sub);
        while let Some(ty) = cursor {
            if ty == sup {
                return Ok(true);
            }
            cursor = self.lookup_type(ty)?.superclass;
        }
        Ok(false)
    }

    /// `Some(ty)` if `ty` is concrete and currently has no subclasses.
    ///
    /// Unless the type is final the answer can be invalidated by class
    /// loading, so callers must record an assumption before relying on it.
    fn leaf_type(&self, ty: TypeId) -> MetaResult<Option<TypeId>> {
        let info = self.lookup_type(ty)?;
        if info.is_abstract {
            return Ok(None);
        }
        if info.is_final || self.direct_subtypes(ty)?.is_empty() {
            return Ok(Some(ty));
        }
        Ok(None)
    }

    /// Whether no write can ever change the contents of `location` after
    /// the object is published.
    fn is_immutable(&self, location: LocationIdentity) -> MetaResult<bool> {
        match location {
            LocationIdentity::Field(field) => Ok(self.lookup_field(field)?.is_final),
            LocationIdentity::Any | LocationIdentity::Named(_) => Ok(false),
        }
    }

    fn field_stamp(&self, field: FieldId) -> MetaResult<Stamp> {
        Ok(match self.lookup_field(field)?.kind {
            FieldKind::Int => Stamp::INT,
            FieldKind::Object(Some(ty)) => Stamp::Object(ObjectStamp::declared(ty)),
            FieldKind::Object(None) => Stamp::OBJECT,
        })
    }
}

// =============================================================================
// Meta Table
// =============================================================================

/// A thread-safe, in-memory [`MetaAccess`] populated by the embedder.
#[derive(Debug, Default)]
pub struct MetaTable {
    types: RwLock<FxHashMap<TypeId, TypeInfo>>,
    fields: RwLock<FxHashMap<FieldId, FieldInfo>>,
}

impl MetaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type; returns its id.
    pub fn define_type(
        &self,
        id: TypeId,
        name: &str,
        superclass: Option<TypeId>,
        is_final: bool,
    ) -> TypeId {
        self.types.write().insert(
            id,
            TypeInfo {
                id,
                name: Arc::from(name),
                superclass,
                is_final,
                is_abstract: false,
            },
        );
        id
    }

    pub fn mark_abstract(&self, id: TypeId) -> MetaResult<()> {
        let mut types = self.types.write();
        let info = types.get_mut(&id).ok_or(MetaError::UnknownType(id))?;
        info.is_abstract = true;
        Ok(())
    }

    pub fn define_field(&self, info: FieldInfo) -> FieldId {
        let id = info.id;
        self.fields.write().insert(id, info);
        id
    }

    pub fn type_count(&self) -> usize {
        self.types.read().len()
    }
}

impl MetaAccess for MetaTable {
    fn lookup_type(&self, ty: TypeId) -> MetaResult<TypeInfo> {
        self.types
            .read()
            .get(&ty)
            .cloned()
            .ok_or(MetaError::UnknownType(ty))
    }

    fn lookup_field(&self, field: FieldId) -> MetaResult<FieldInfo> {
        self.fields
            .read()
            .get(&field)
            .cloned()
            .ok_or(MetaError::UnknownField(field))
    }

    fn direct_subtypes(&self, ty: TypeId) -> MetaResult<Vec<TypeId>> {
        let types = self.types.read();
        if !types.contains_key(&ty) {
            return Err(MetaError::UnknownType(ty));
        }
        let mut subs: Vec<TypeId> = types
            .values()
            .filter(|info| info.superclass == Some(ty))
            .map(|info| info.id)
            .collect();
        subs.sort_unstable();
        Ok(subs)
    }
}

// =============================================================================
// Tests
// =============================================================================
