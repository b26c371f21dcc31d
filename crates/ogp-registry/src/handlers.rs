//! Type handler lookup by type id and by Rust type.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ogp_binary::{
    ByteArrayHandler, ByteCodec, ObjectListHandler, ObjectMapHandler, SharedTypeHandler, StringHandler,
    TypeDescription, TypeDictionary, TypeHandler,
};
use ogp_types::{type_name_of, Instance, ObjectId, PersistenceError, PersistenceResult, TypeId};
use tracing::debug;

struct HandlerTables<C: ByteCodec> {
    by_type_id: HashMap<TypeId, SharedTypeHandler<C>>,
    by_instance_type: HashMap<std::any::TypeId, SharedTypeHandler<C>>,
}

/// Registry of current and legacy type handlers.
///
/// Current handlers are found by type id and by the Rust type they store;
/// legacy handlers only by type id, since nothing is ever stored with them.
pub struct TypeHandlerRegistry<C: ByteCodec> {
    tables: RwLock<HandlerTables<C>>,
}

fn same_handler<C: ByteCodec>(a: &SharedTypeHandler<C>, b: &SharedTypeHandler<C>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl<C: ByteCodec> TypeHandlerRegistry<C> {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HandlerTables {
                by_type_id: HashMap::new(),
                by_instance_type: HashMap::new(),
            }),
        }
    }

    /// A registry with the built-in value handlers.
    pub fn with_builtins() -> PersistenceResult<Self> {
        let registry = Self::new();
        registry.register(Arc::new(StringHandler::new()))?;
        registry.register(Arc::new(ByteArrayHandler::new()))?;
        registry.register(Arc::new(ObjectListHandler::new()))?;
        registry.register(Arc::new(ObjectMapHandler::new()))?;
        Ok(registry)
    }

    /// Register a current handler.
    pub fn register(&self, handler: SharedTypeHandler<C>) -> PersistenceResult<()> {
        let mut tables = self.tables.write().expect("handler registry lock poisoned");
        let tid = handler.type_id();
        let instance_type = handler.instance_type();
        if let Some(existing) = tables.by_type_id.get(&tid) {
            if same_handler(existing, &handler) {
                return Ok(());
            }
            return Err(PersistenceError::HandlerConflict {
                tid,
                reason: format!("already handled as {}", existing.type_name()),
            });
        }
        if let Some(existing) = tables.by_instance_type.get(&instance_type) {
            return Err(PersistenceError::HandlerConflict {
                tid,
                reason: format!("its Rust type is already handled by type id {}", existing.type_id()),
            });
        }
        debug!(%tid, type_name = handler.type_name(), "registered type handler");
        tables.by_instance_type.insert(instance_type, Arc::clone(&handler));
        tables.by_type_id.insert(tid, handler);
        Ok(())
    }

    /// Register a handler for a legacy type id.
    pub fn register_legacy(&self, handler: SharedTypeHandler<C>) -> PersistenceResult<()> {
        let mut tables = self.tables.write().expect("handler registry lock poisoned");
        let tid = handler.type_id();
        if let Some(existing) = tables.by_type_id.get(&tid) {
            if same_handler(existing, &handler) {
                return Ok(());
            }
            return Err(PersistenceError::HandlerConflict {
                tid,
                reason: format!("already handled as {}", existing.type_name()),
            });
        }
        debug!(%tid, type_name = handler.type_name(), "registered legacy type handler");
        tables.by_type_id.insert(tid, handler);
        Ok(())
    }

    pub fn lookup(&self, tid: TypeId) -> Option<SharedTypeHandler<C>> {
        self.tables
            .read()
            .expect("handler registry lock poisoned")
            .by_type_id
            .get(&tid)
            .cloned()
    }

    /// Handler for an entity read from a stream.
    pub fn handler_for(&self, tid: TypeId, oid: ObjectId) -> PersistenceResult<SharedTypeHandler<C>> {
        self.lookup(tid).ok_or(PersistenceError::UnhandledTypeId { tid, oid })
    }

    /// Handler for an instance about to be stored.
    pub fn handler_for_instance(&self, instance: &Instance) -> PersistenceResult<SharedTypeHandler<C>> {
        let instance_type = std::any::Any::type_id(&**instance);
        self.tables
            .read()
            .expect("handler registry lock poisoned")
            .by_instance_type
            .get(&instance_type)
            .cloned()
            .ok_or_else(|| PersistenceError::UnhandledType {
                type_name: type_name_of(instance),
            })
    }

    /// The current handler for a type name.
    pub fn current_handler_for_name(&self, type_name: &str) -> Option<SharedTypeHandler<C>> {
        self.tables
            .read()
            .expect("handler registry lock poisoned")
            .by_instance_type
            .values()
            .find(|h| h.type_name() == type_name)
            .cloned()
    }

    /// Descriptions of every registered type id, legacy ones included.
    pub fn descriptions(&self) -> Vec<TypeDescription> {
        let tables = self.tables.read().expect("handler registry lock poisoned");
        let mut descriptions: Vec<_> = tables.by_type_id.values().map(|h| h.description().clone()).collect();
        descriptions.sort_by_key(|d| d.type_id);
        descriptions
    }

    /// A dictionary of the current handlers' descriptions.
    pub fn type_dictionary(&self) -> PersistenceResult<TypeDictionary> {
        let tables = self.tables.read().expect("handler registry lock poisoned");
        let mut dictionary = TypeDictionary::new();
        for handler in tables.by_instance_type.values() {
            dictionary.register(handler.description().clone())?;
        }
        Ok(dictionary)
    }

    pub fn len(&self) -> usize {
        self.tables.read().expect("handler registry lock poisoned").by_type_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ByteCodec> Default for TypeHandlerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for registering a concrete handler value.
pub fn shared<C: ByteCodec, H: TypeHandler<C> + 'static>(handler: H) -> SharedTypeHandler<C> {
    Arc::new(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogp_binary::{Direct, STRING_TYPE_ID};

    #[test]
    fn builtins_are_found_both_ways() {
        let registry = TypeHandlerRegistry::<Direct>::with_builtins().unwrap();
        assert_eq!(registry.len(), 4);
        let handler = registry.handler_for(STRING_TYPE_ID, ObjectId::new(1)).unwrap();
        assert_eq!(handler.type_name(), "string");
        let value: Instance = Arc::new(String::from("x"));
        assert_eq!(registry.handler_for_instance(&value).unwrap().type_id(), STRING_TYPE_ID);
        assert!(registry.current_handler_for_name("object_list").is_some());
    }

    #[test]
    fn unknown_type_id_and_rust_type() {
        let registry = TypeHandlerRegistry::<Direct>::with_builtins().unwrap();
        assert!(matches!(
            registry.handler_for(TypeId::new(999), ObjectId::new(5)),
            Err(PersistenceError::UnhandledTypeId { .. })
        ));
        let value: Instance = Arc::new(3.5f64);
        assert!(matches!(
            registry.handler_for_instance(&value),
            Err(PersistenceError::UnhandledType { .. })
        ));
    }

    #[test]
    fn conflicting_registrations_are_rejected() {
        let registry = TypeHandlerRegistry::<Direct>::new();
        let handler = shared::<Direct, _>(StringHandler::new());
        registry.register(Arc::clone(&handler)).unwrap();
        registry.register(handler).unwrap();
        // A second handler for the same type id.
        assert!(registry.register(shared::<Direct, _>(StringHandler::new())).is_err());
        // A legacy handler may not shadow a current type id either.
        assert!(registry.register_legacy(shared::<Direct, _>(StringHandler::new())).is_err());
    }

    #[test]
    fn dictionary_lists_current_types() {
        let registry = TypeHandlerRegistry::<Direct>::with_builtins().unwrap();
        let dictionary = registry.type_dictionary().unwrap();
        assert_eq!(dictionary.len(), 4);
        assert!(dictionary.lookup(STRING_TYPE_ID).is_some());
        assert_eq!(registry.descriptions().len(), 4);
    }
}
