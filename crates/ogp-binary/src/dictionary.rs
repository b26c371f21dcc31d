//! Persisted type dictionary.
//!
//! The dictionary records every type description ever written to a
//! storage, keyed by type id. It is what legacy translation compares the
//! current handlers against, and what tools use to decode raw entities.

use std::collections::BTreeMap;
use std::path::Path;

use ogp_types::{PersistenceError, PersistenceResult, TypeId};
use serde::{Deserialize, Serialize};

use crate::member::TypeDescription;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDictionary {
    types: BTreeMap<TypeId, TypeDescription>,
}

impl TypeDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a description. Re-adding an identical one is a no-op; a
    /// different description under a known type id is a conflict.
    pub fn register(&mut self, description: TypeDescription) -> PersistenceResult<()> {
        match self.types.get(&description.type_id) {
            Some(existing) if *existing == description => Ok(()),
            Some(existing) => Err(PersistenceError::HandlerConflict {
                tid: description.type_id,
                reason: format!(
                    "dictionary already describes it as {} with {} members",
                    existing.type_name,
                    existing.members.len()
                ),
            }),
            None => {
                self.types.insert(description.type_id, description);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, tid: TypeId) -> Option<&TypeDescription> {
        self.types.get(&tid)
    }

    /// All descriptions recorded for a type name, oldest type id first.
    pub fn by_type_name<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a TypeDescription> + 'a {
        self.types.values().filter(move |d| d.type_name == type_name)
    }

    pub fn descriptions(&self) -> impl Iterator<Item = &TypeDescription> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn highest_type_id(&self) -> Option<TypeId> {
        self.types.keys().next_back().copied()
    }

    pub fn to_json(&self) -> PersistenceResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PersistenceError::Consistency(format!("type dictionary: {e}")))
    }

    pub fn from_json(json: &str) -> PersistenceResult<Self> {
        serde_json::from_str(json).map_err(|e| PersistenceError::Consistency(format!("type dictionary: {e}")))
    }

    pub fn load(path: &Path) -> PersistenceResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> PersistenceResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{PrimitiveType, TypeMember};

    fn point(tid: u64, members: Vec<TypeMember>) -> TypeDescription {
        TypeDescription::new(TypeId::new(tid), "Point", members)
    }

    #[test]
    fn register_is_idempotent_but_detects_conflicts() {
        let mut dict = TypeDictionary::new();
        let v1 = point(100, vec![TypeMember::primitive("x", PrimitiveType::I32)]);
        dict.register(v1.clone()).unwrap();
        dict.register(v1).unwrap();
        assert_eq!(dict.len(), 1);
        let clash = point(100, vec![TypeMember::primitive("x", PrimitiveType::I64)]);
        assert!(matches!(dict.register(clash), Err(PersistenceError::HandlerConflict { .. })));
    }

    #[test]
    fn versions_by_type_name() {
        let mut dict = TypeDictionary::new();
        dict.register(point(101, vec![TypeMember::primitive("x", PrimitiveType::I64)])).unwrap();
        dict.register(point(100, vec![TypeMember::primitive("x", PrimitiveType::I32)])).unwrap();
        let ids: Vec<_> = dict.by_type_name("Point").map(|d| d.type_id.value()).collect();
        assert_eq!(ids, vec![100, 101]);
        assert_eq!(dict.highest_type_id(), Some(TypeId::new(101)));
    }

    #[test]
    fn json_file_roundtrip() {
        let mut dict = TypeDictionary::new();
        dict.register(point(100, vec![TypeMember::reference("owner", "Owner")])).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.json");
        dict.save(&path).unwrap();
        assert_eq!(TypeDictionary::load(&path).unwrap(), dict);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(TypeDictionary::from_json("{\"types\": 5}").is_err());
    }
}
