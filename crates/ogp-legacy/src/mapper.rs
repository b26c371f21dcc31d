//! Installs legacy handlers for a persisted type dictionary.

use ogp_binary::{ByteCodec, TypeDictionary};
use ogp_registry::TypeHandlerRegistry;
use ogp_types::PersistenceResult;
use tracing::{info, warn};

use crate::creator::LegacyTypeHandlerCreator;

#[derive(Clone, Default)]
pub struct LegacyTypeMapper {
    creator: LegacyTypeHandlerCreator,
}

impl LegacyTypeMapper {
    pub fn new(creator: LegacyTypeHandlerCreator) -> Self {
        Self { creator }
    }

    /// Register a legacy handler for every dictionary type id that is not
    /// handled yet but whose type name has a current handler. Returns the
    /// number of handlers installed.
    ///
    /// Dictionary types without any current handler are only logged: their
    /// entities fail with an unhandled type id if they are ever loaded.
    pub fn install<C: ByteCodec>(
        &self,
        dictionary: &TypeDictionary,
        registry: &TypeHandlerRegistry<C>,
    ) -> PersistenceResult<usize> {
        let mut installed = 0;
        for legacy in dictionary.descriptions() {
            if registry.lookup(legacy.type_id).is_some() {
                continue;
            }
            let Some(current) = registry.current_handler_for_name(&legacy.type_name) else {
                warn!(tid = %legacy.type_id, type_name = %legacy.type_name, "no current handler for legacy type");
                continue;
            };
            let handler = self.creator.create(legacy, &current)?;
            registry.register_legacy(handler)?;
            installed += 1;
        }
        info!(installed, known = dictionary.len(), "legacy type mapping installed");
        Ok(installed)
    }
}
