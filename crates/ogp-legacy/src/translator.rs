//! Value translators and the provider that picks them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ogp_binary::{
    Binary, ByteCodec, MemberKind, MemberValue, ObjectResolver, PrimitiveType, PrimitiveValue, TypeDescription,
    TypeMember,
};
use ogp_types::{type_name_of, Instance, ObjectId, PersistenceError, PersistenceResult};

use crate::convert::convert;

/// A member value in transit from the legacy layout to the current one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TranslatedValue {
    Primitive(PrimitiveValue),
    Reference(ObjectId),
}

impl TranslatedValue {
    /// Read the value of a fixed-length `member` at `offset`.
    pub fn read<C: ByteCodec>(data: &Binary<C>, offset: usize, member: &TypeMember) -> PersistenceResult<Self> {
        match &member.kind {
            MemberKind::Primitive { primitive } => Ok(Self::Primitive(PrimitiveValue::read(data, offset, *primitive)?)),
            MemberKind::Reference { .. } => Ok(Self::Reference(data.get_reference(offset)?)),
            _ => Err(PersistenceError::Consistency(format!(
                "member {} is not fixed length",
                member.name
            ))),
        }
    }

    /// The zero value of a fixed-length member.
    pub fn default_for(member: &TypeMember) -> Option<Self> {
        match &member.kind {
            MemberKind::Primitive { primitive } => Some(Self::Primitive(PrimitiveValue::default_for(*primitive))),
            MemberKind::Reference { .. } => Some(Self::Reference(ObjectId::NULL)),
            _ => None,
        }
    }

    /// Fail unless the value can be stored in `member`.
    pub fn ensure_fits(&self, member: &TypeMember) -> PersistenceResult<()> {
        let fits = match (self, &member.kind) {
            (Self::Primitive(value), MemberKind::Primitive { primitive }) => value.primitive_type() == *primitive,
            (Self::Reference(_), MemberKind::Reference { .. }) => true,
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(PersistenceError::Consistency(format!(
                "translated value {self:?} does not fit member {} ({})",
                member.name,
                member.type_name()
            )))
        }
    }

    /// The member value to set on an instance, references resolved.
    pub fn into_member(self, resolver: &dyn ObjectResolver) -> PersistenceResult<MemberValue> {
        match self {
            Self::Primitive(v) => Ok(MemberValue::Primitive(v)),
            Self::Reference(oid) => Ok(MemberValue::Reference(resolver.resolve(oid)?)),
        }
    }
}

/// A primitive as a standalone instance, the form a reference member holds.
pub fn box_primitive(value: PrimitiveValue) -> Instance {
    match value {
        PrimitiveValue::Bool(v) => Arc::new(v),
        PrimitiveValue::I8(v) => Arc::new(v),
        PrimitiveValue::I16(v) => Arc::new(v),
        PrimitiveValue::U16(v) => Arc::new(v),
        PrimitiveValue::I32(v) => Arc::new(v),
        PrimitiveValue::F32(v) => Arc::new(v),
        PrimitiveValue::I64(v) => Arc::new(v),
        PrimitiveValue::F64(v) => Arc::new(v),
    }
}

/// The primitive held by a boxed instance loaded as `oid`.
pub fn unbox_primitive(instance: &Instance, oid: ObjectId) -> PersistenceResult<PrimitiveValue> {
    let any = &**instance;
    let value = if let Some(v) = any.downcast_ref::<bool>() {
        PrimitiveValue::Bool(*v)
    } else if let Some(v) = any.downcast_ref::<i8>() {
        PrimitiveValue::I8(*v)
    } else if let Some(v) = any.downcast_ref::<i16>() {
        PrimitiveValue::I16(*v)
    } else if let Some(v) = any.downcast_ref::<u16>() {
        PrimitiveValue::U16(*v)
    } else if let Some(v) = any.downcast_ref::<i32>() {
        PrimitiveValue::I32(*v)
    } else if let Some(v) = any.downcast_ref::<f32>() {
        PrimitiveValue::F32(*v)
    } else if let Some(v) = any.downcast_ref::<i64>() {
        PrimitiveValue::I64(*v)
    } else if let Some(v) = any.downcast_ref::<f64>() {
        PrimitiveValue::F64(*v)
    } else {
        return Err(PersistenceError::TypeMismatch {
            oid,
            expected: "boxed primitive".to_string(),
            actual: type_name_of(instance),
        });
    };
    Ok(value)
}

/// The primitive type a reference member's type name boxes, if any.
fn boxed_type(type_name: &str) -> Option<PrimitiveType> {
    PrimitiveType::ALL.into_iter().find(|p| p.name() == type_name)
}

/// Maps legacy enum ordinals to current ones by constant name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrdinalRemap {
    type_name: String,
    /// Current ordinal per legacy ordinal; `None` for removed constants.
    table: Vec<Option<i32>>,
}

impl OrdinalRemap {
    pub fn new(type_name: impl Into<String>, legacy: &[String], current: &[String]) -> Self {
        let table = legacy
            .iter()
            .map(|name| current.iter().position(|c| c == name).map(|i| i as i32))
            .collect();
        Self {
            type_name: type_name.into(),
            table,
        }
    }

    /// Whether any constant moved or disappeared.
    pub fn is_identity(&self) -> bool {
        self.table
            .iter()
            .enumerate()
            .all(|(i, mapped)| *mapped == Some(i as i32))
    }

    pub fn remap(&self, ordinal: i32) -> PersistenceResult<i32> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.table.get(i).copied().flatten())
            .ok_or_else(|| PersistenceError::EnumConstantRemoved {
                type_name: self.type_name.clone(),
                ordinal,
            })
    }
}

/// A user-supplied translation for one member.
pub type CustomTranslator = Arc<dyn Fn(TranslatedValue) -> PersistenceResult<TranslatedValue> + Send + Sync>;

/// How one legacy member value becomes a current one.
#[derive(Clone)]
pub enum ValueTranslator {
    /// Same primitive type, or reference to reference.
    Identity,
    /// Primitive conversion to the given type.
    Convert(PrimitiveType),
    /// The legacy member has no current counterpart.
    Skip,
    /// Enum ordinal translated through constant names.
    EnumOrdinal(Arc<OrdinalRemap>),
    Custom(CustomTranslator),
    /// Reference to a boxed primitive, resolved and converted to the given
    /// type.
    Unbox(PrimitiveType),
    /// Primitive converted to the given type and boxed into a new instance.
    Wrap(PrimitiveType),
}

impl ValueTranslator {
    pub fn translate(&self, value: TranslatedValue) -> PersistenceResult<TranslatedValue> {
        match (self, value) {
            (Self::Identity | Self::Skip, value) => Ok(value),
            (Self::Convert(target), TranslatedValue::Primitive(v)) => Ok(TranslatedValue::Primitive(convert(v, *target))),
            (Self::EnumOrdinal(remap), TranslatedValue::Primitive(PrimitiveValue::I32(ordinal))) => {
                Ok(TranslatedValue::Primitive(PrimitiveValue::I32(remap.remap(ordinal)?)))
            }
            (Self::Custom(translate), value) => translate(value),
            (Self::Unbox(_) | Self::Wrap(_), value) => Err(PersistenceError::Consistency(format!(
                "{self:?} crosses a boxed/unboxed boundary and cannot translate {value:?} without member access"
            ))),
            (translator, value) => Err(PersistenceError::Consistency(format!(
                "{translator:?} cannot translate {value:?}"
            ))),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Whether the value moves between a primitive slot and a reference.
    /// Such values only exist as instances, never as entity bytes.
    pub fn crosses_boundary(&self) -> bool {
        matches!(self, Self::Unbox(_) | Self::Wrap(_))
    }

    /// Translate a boundary-crossing value into the member value to set.
    /// A null reference unboxes to the target's zero value.
    pub fn translate_member(
        &self,
        value: TranslatedValue,
        resolver: &dyn ObjectResolver,
    ) -> PersistenceResult<MemberValue> {
        match (self, value) {
            (Self::Unbox(target), TranslatedValue::Reference(oid)) => {
                let unboxed = match resolver.resolve(oid)? {
                    Some(instance) => convert(unbox_primitive(&instance, oid)?, *target),
                    None => PrimitiveValue::default_for(*target),
                };
                Ok(MemberValue::Primitive(unboxed))
            }
            (Self::Wrap(target), TranslatedValue::Primitive(v)) => {
                Ok(MemberValue::Reference(Some(box_primitive(convert(v, *target)))))
            }
            (translator, value) => translator.translate(value)?.into_member(resolver),
        }
    }
}

impl fmt::Debug for ValueTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Convert(target) => write!(f, "Convert({target})"),
            Self::Skip => f.write_str("Skip"),
            Self::EnumOrdinal(remap) => write!(f, "EnumOrdinal({})", remap.type_name),
            Self::Custom(_) => f.write_str("Custom"),
            Self::Unbox(target) => write!(f, "Unbox({target})"),
            Self::Wrap(target) => write!(f, "Wrap({target})"),
        }
    }
}

/// Picks a translator per legacy member. Custom translators are keyed by
/// type name and legacy member name.
#[derive(Clone, Default)]
pub struct TranslatorProvider {
    custom: HashMap<(String, String), CustomTranslator>,
}

impl TranslatorProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_custom(
        &mut self,
        type_name: impl Into<String>,
        member_name: impl Into<String>,
        translator: CustomTranslator,
    ) -> &mut Self {
        self.custom.insert((type_name.into(), member_name.into()), translator);
        self
    }

    pub fn custom_count(&self) -> usize {
        self.custom.len()
    }

    fn unsupported(legacy: &TypeDescription, reason: String) -> PersistenceError {
        PersistenceError::UnsupportedLegacyType {
            tid: legacy.type_id,
            type_name: legacy.type_name.clone(),
            reason,
        }
    }

    /// Translator from `legacy_member` of `legacy` to `current_member`.
    pub fn provide(
        &self,
        legacy: &TypeDescription,
        legacy_member: &TypeMember,
        current_member: Option<&TypeMember>,
    ) -> PersistenceResult<ValueTranslator> {
        for key in [legacy_member.qualified_name(), legacy_member.name.clone()] {
            if let Some(custom) = self.custom.get(&(legacy.type_name.clone(), key)) {
                return Ok(ValueTranslator::Custom(Arc::clone(custom)));
            }
        }
        let Some(current_member) = current_member else {
            return Ok(ValueTranslator::Skip);
        };
        match (&legacy_member.kind, &current_member.kind) {
            (MemberKind::Primitive { primitive: from }, MemberKind::Primitive { primitive: to }) => Ok(if from == to {
                ValueTranslator::Identity
            } else {
                ValueTranslator::Convert(*to)
            }),
            (MemberKind::Reference { .. }, MemberKind::Reference { .. }) => Ok(ValueTranslator::Identity),
            (MemberKind::Reference { .. }, MemberKind::Primitive { primitive: to }) => Ok(ValueTranslator::Unbox(*to)),
            (MemberKind::Primitive { primitive: from }, MemberKind::Reference { type_name }) => {
                Ok(ValueTranslator::Wrap(boxed_type(type_name).unwrap_or(*from)))
            }
            _ => Err(Self::unsupported(
                legacy,
                format!("member {} has variable persisted length", legacy_member.name),
            )),
        }
    }
}
