//! Loading entities written with older layouts of a type.
//!
//! A persisted [`TypeDictionary`](ogp_binary::TypeDictionary) records every
//! layout a storage has seen. [`LegacyTypeMapper`] compares it against the
//! current handlers and registers a legacy handler under each outdated type
//! id:
//!
//! - [`PassThroughHandler`] when the layouts are byte-compatible
//! - [`ReflectiveHandler`] when the current handler offers member access
//! - [`ReroutingHandler`] otherwise, translating each entity into the current
//!   layout before the current handler sees it

pub mod convert;
pub mod creator;
pub mod handlers;
pub mod layout;
pub mod mapper;
pub mod matcher;
pub mod translator;

pub use convert::convert;
pub use creator::LegacyTypeHandlerCreator;
pub use handlers::{PassThroughHandler, ReflectiveHandler, ReroutingHandler};
pub use layout::{LayoutTranslation, MemberTranslation};
pub use mapper::LegacyTypeMapper;
pub use matcher::{MemberRename, NameMemberMatcher};
pub use translator::{
    box_primitive, unbox_primitive, CustomTranslator, OrdinalRemap, TranslatedValue, TranslatorProvider, ValueTranslator,
};
