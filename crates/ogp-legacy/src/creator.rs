//! Picks the legacy handler kind for a pair of layouts.

use std::sync::Arc;

use ogp_binary::{ByteCodec, SharedTypeHandler, TypeDescription};
use ogp_types::{PersistenceError, PersistenceResult};
use tracing::debug;

use crate::handlers::{PassThroughHandler, ReflectiveHandler, ReroutingHandler};
use crate::layout::LayoutTranslation;
use crate::matcher::NameMemberMatcher;
use crate::translator::TranslatorProvider;

#[derive(Clone, Default)]
pub struct LegacyTypeHandlerCreator {
    matcher: NameMemberMatcher,
    provider: TranslatorProvider,
}

impl LegacyTypeHandlerCreator {
    pub fn new(matcher: NameMemberMatcher, provider: TranslatorProvider) -> Self {
        Self { matcher, provider }
    }

    pub fn matcher(&self) -> &NameMemberMatcher {
        &self.matcher
    }

    pub fn provider(&self) -> &TranslatorProvider {
        &self.provider
    }

    /// A handler for entities written with `legacy` that builds instances of
    /// the current handler's type.
    ///
    /// Compatible layouts get a pass-through handler. Otherwise handlers
    /// with member access get a reflective handler and the rest a rerouting
    /// one. Variable-length layouts are refused, as are members moving
    /// between a primitive and a reference when there is no member access.
    pub fn create<C: ByteCodec>(
        &self,
        legacy: &TypeDescription,
        current: &SharedTypeHandler<C>,
    ) -> PersistenceResult<SharedTypeHandler<C>> {
        if legacy.has_identical_structure(current.description()) {
            debug!(tid = %legacy.type_id, type_name = %legacy.type_name, "legacy type passes through");
            return Ok(Arc::new(PassThroughHandler::new(legacy.clone(), Arc::clone(current))));
        }
        if legacy.is_variable_length() || current.has_variable_persisted_length() {
            return Err(PersistenceError::UnsupportedLegacyType {
                tid: legacy.type_id,
                type_name: legacy.type_name.clone(),
                reason: "variable persisted length requires custom handler".to_string(),
            });
        }
        let translation = LayoutTranslation::new(legacy, current.description(), &self.matcher, &self.provider)?;
        if translation.is_identity() {
            debug!(tid = %legacy.type_id, type_name = %legacy.type_name, "legacy layout is compatible");
            return Ok(Arc::new(PassThroughHandler::new(legacy.clone(), Arc::clone(current))));
        }
        if current.member_access().is_none() && translation.crosses_boundary() {
            return Err(PersistenceError::UnsupportedLegacyType {
                tid: legacy.type_id,
                type_name: legacy.type_name.clone(),
                reason: format!(
                    "members cross a boxed/unboxed boundary and {} has no member access",
                    current.type_name()
                ),
            });
        }
        if current.member_access().is_some() {
            debug!(tid = %legacy.type_id, type_name = %legacy.type_name, "reflective legacy handler");
            Ok(Arc::new(ReflectiveHandler::new(translation, Arc::clone(current))?))
        } else {
            debug!(tid = %legacy.type_id, type_name = %legacy.type_name, "rerouting legacy handler");
            Ok(Arc::new(ReroutingHandler::new(translation, Arc::clone(current))))
        }
    }
}
