//! Member-by-member translation from a legacy layout to the current one.

use std::sync::Arc;

use ogp_binary::{
    Binary, ByteCodec, EntityBuffer, MemberValue, ObjectResolver, PrimitiveType, TypeDescription, ORDINAL_MEMBER,
};
use ogp_types::{PersistenceError, PersistenceResult};

use crate::matcher::NameMemberMatcher;
use crate::translator::{OrdinalRemap, TranslatedValue, TranslatorProvider, ValueTranslator};

/// How one legacy member is read and where its value goes.
#[derive(Clone, Debug)]
pub struct MemberTranslation {
    pub legacy_index: usize,
    pub legacy_offset: usize,
    /// Index and content offset of the current member, if any.
    pub target: Option<(usize, usize)>,
    pub translator: ValueTranslator,
}

/// Compiled translation between two fixed-length layouts of one type.
#[derive(Clone, Debug)]
pub struct LayoutTranslation {
    legacy: TypeDescription,
    current: TypeDescription,
    members: Vec<MemberTranslation>,
    legacy_content_length: usize,
    current_offsets: Vec<usize>,
    current_content_length: usize,
}

fn requires_custom_handler(legacy: &TypeDescription, which: &str) -> PersistenceError {
    PersistenceError::UnsupportedLegacyType {
        tid: legacy.type_id,
        type_name: legacy.type_name.clone(),
        reason: format!("{which} layout has variable persisted length and requires custom handler"),
    }
}

fn fixed_layout(desc: &TypeDescription) -> Option<(Vec<usize>, usize)> {
    Some((desc.member_offsets()?, desc.fixed_content_length()?))
}

fn is_ordinal(desc: &TypeDescription, index: usize) -> bool {
    index == 0
        && desc.is_enum()
        && desc.members[0].name == ORDINAL_MEMBER
        && desc.members[0].primitive_type() == Some(PrimitiveType::I32)
}

impl LayoutTranslation {
    pub fn new(
        legacy: &TypeDescription,
        current: &TypeDescription,
        matcher: &NameMemberMatcher,
        provider: &TranslatorProvider,
    ) -> PersistenceResult<Self> {
        let (legacy_offsets, legacy_content_length) =
            fixed_layout(legacy).ok_or_else(|| requires_custom_handler(legacy, "legacy"))?;
        let (current_offsets, current_content_length) =
            fixed_layout(current).ok_or_else(|| requires_custom_handler(legacy, "current"))?;

        let remap = match (&legacy.enum_constants, &current.enum_constants) {
            (Some(old), Some(new)) => {
                let remap = OrdinalRemap::new(legacy.type_name.clone(), old, new);
                (!remap.is_identity()).then(|| Arc::new(remap))
            }
            _ => None,
        };

        let matches = matcher.match_members(legacy, current)?;
        let mut members = Vec::with_capacity(legacy.members.len());
        for (legacy_index, (member, target)) in legacy.members.iter().zip(matches).enumerate() {
            let current_member = target.map(|index| &current.members[index]);
            let mut translator = provider.provide(legacy, member, current_member)?;
            if let (Some(remap), Some(index)) = (&remap, target) {
                if translator.is_identity() && is_ordinal(legacy, legacy_index) && is_ordinal(current, index) {
                    translator = ValueTranslator::EnumOrdinal(Arc::clone(remap));
                }
            }
            members.push(MemberTranslation {
                legacy_index,
                legacy_offset: legacy_offsets[legacy_index],
                target: target.map(|index| (index, current_offsets[index])),
                translator,
            });
        }

        Ok(Self {
            legacy: legacy.clone(),
            current: current.clone(),
            members,
            legacy_content_length,
            current_offsets,
            current_content_length,
        })
    }

    pub fn legacy(&self) -> &TypeDescription {
        &self.legacy
    }

    pub fn current(&self) -> &TypeDescription {
        &self.current
    }

    pub fn members(&self) -> &[MemberTranslation] {
        &self.members
    }

    pub fn current_content_length(&self) -> usize {
        self.current_content_length
    }

    /// Every member is copied unchanged to the same offset.
    pub fn is_identity(&self) -> bool {
        self.legacy_content_length == self.current_content_length
            && self.members.iter().all(|m| {
                m.translator.is_identity() && m.target.map(|(_, offset)| offset) == Some(m.legacy_offset)
            })
    }

    /// Translated values keyed by current member index. Skipped members are
    /// read but dropped.
    pub fn translated_values<C: ByteCodec>(&self, data: &Binary<C>) -> PersistenceResult<Vec<(usize, TranslatedValue)>> {
        data.validate_required_content_length(self.legacy_content_length)?;
        let mut values = Vec::with_capacity(self.members.len());
        for m in &self.members {
            let member = &self.legacy.members[m.legacy_index];
            let value = m.translator.translate(TranslatedValue::read(data, m.legacy_offset, member)?)?;
            if let Some((index, _)) = m.target {
                value.ensure_fits(&self.current.members[index])?;
                values.push((index, value));
            }
        }
        Ok(values)
    }

    /// Whether some member moves between a primitive and a reference, which
    /// only an instance can hold.
    pub fn crosses_boundary(&self) -> bool {
        self.members.iter().any(|m| m.translator.crosses_boundary())
    }

    /// Member values to set on an instance, keyed by current member index.
    /// References are resolved, boxed primitives unboxed and primitives
    /// bound for a reference member boxed.
    pub fn member_values<C: ByteCodec>(
        &self,
        data: &Binary<C>,
        resolver: &dyn ObjectResolver,
    ) -> PersistenceResult<Vec<(usize, MemberValue)>> {
        data.validate_required_content_length(self.legacy_content_length)?;
        let mut values = Vec::with_capacity(self.members.len());
        for m in &self.members {
            let member = &self.legacy.members[m.legacy_index];
            let read = TranslatedValue::read(data, m.legacy_offset, member)?;
            if m.translator.crosses_boundary() {
                if let Some((index, _)) = m.target {
                    values.push((index, m.translator.translate_member(read, resolver)?));
                }
                continue;
            }
            let value = m.translator.translate(read)?;
            if let Some((index, _)) = m.target {
                value.ensure_fits(&self.current.members[index])?;
                values.push((index, value.into_member(resolver)?));
            }
        }
        Ok(values)
    }

    /// A new entity in the current layout, with the current type id and the
    /// same object id. Current members without a legacy counterpart keep
    /// their zero default.
    pub fn translate_entity<C: ByteCodec>(&self, data: &Binary<C>) -> PersistenceResult<Binary<C>> {
        let values = self.translated_values(data)?;
        let mut buffer = EntityBuffer::<C>::new(self.current_content_length, self.current.type_id, data.object_id())?;
        {
            let mut writer = buffer.writer();
            for (index, value) in values {
                let offset = self.current_offsets[index];
                match value {
                    TranslatedValue::Primitive(v) => v.write(&mut writer, offset)?,
                    TranslatedValue::Reference(oid) => writer.put_reference(offset, oid)?,
                };
            }
        }
        buffer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogp_binary::{Direct, PrimitiveValue, Reversed, TypeMember};
    use ogp_types::{ObjectId, TypeId};

    fn legacy_point() -> TypeDescription {
        TypeDescription::new(
            TypeId::new(100),
            "Point",
            vec![
                TypeMember::primitive("x", PrimitiveType::I32),
                TypeMember::primitive("removed", PrimitiveType::I32),
                TypeMember::primitive("y", PrimitiveType::I32),
                TypeMember::reference("owner", "Owner"),
            ],
        )
    }

    fn current_point() -> TypeDescription {
        TypeDescription::new(
            TypeId::new(101),
            "Point",
            vec![
                TypeMember::primitive("x", PrimitiveType::I32),
                TypeMember::primitive("y", PrimitiveType::I64),
                TypeMember::reference("owner", "Owner"),
                TypeMember::primitive("added", PrimitiveType::F64),
            ],
        )
    }

    fn entity<C: ByteCodec>(desc: &TypeDescription, values: &[TranslatedValue]) -> Binary<C> {
        let offsets = desc.member_offsets().unwrap();
        let mut buffer =
            EntityBuffer::<C>::new(desc.fixed_content_length().unwrap(), desc.type_id, ObjectId::new(42)).unwrap();
        {
            let mut w = buffer.writer();
            for (value, offset) in values.iter().zip(offsets) {
                match value {
                    TranslatedValue::Primitive(v) => v.write(&mut w, offset).unwrap(),
                    TranslatedValue::Reference(oid) => w.put_reference(offset, *oid).unwrap(),
                };
            }
        }
        buffer.finish().unwrap()
    }

    fn translation(legacy: &TypeDescription, current: &TypeDescription) -> PersistenceResult<LayoutTranslation> {
        LayoutTranslation::new(legacy, current, &NameMemberMatcher::default(), &TranslatorProvider::new())
    }

    // ---- identical layouts ----

    #[test]
    fn identical_layout_copies_bytes_unchanged() {
        let legacy = legacy_point();
        let mut current = legacy.clone();
        current.type_id = TypeId::new(101);
        let t = translation(&legacy, &current).unwrap();
        assert!(t.is_identity());

        let values = [
            TranslatedValue::Primitive(PrimitiveValue::I32(1)),
            TranslatedValue::Primitive(PrimitiveValue::I32(2)),
            TranslatedValue::Primitive(PrimitiveValue::I32(3)),
            TranslatedValue::Reference(ObjectId::new(43)),
        ];
        let data = entity::<Reversed>(&legacy, &values);
        let out = t.translate_entity(&data).unwrap();
        assert_eq!(out.content(), data.content());
        assert_eq!(out.type_id(), TypeId::new(101));
        assert_eq!(out.object_id(), ObjectId::new(42));
    }

    // ---- changed layouts ----

    #[test]
    fn removed_member_shifts_target_offsets() {
        let t = translation(&legacy_point(), &current_point()).unwrap();
        assert!(!t.is_identity());
        let offsets: Vec<_> = t.members().iter().map(|m| (m.legacy_offset, m.target)).collect();
        assert_eq!(
            offsets,
            vec![(0, Some((0, 0))), (4, None), (8, Some((1, 4))), (12, Some((2, 12)))]
        );

        let data = entity::<Direct>(
            &legacy_point(),
            &[
                TranslatedValue::Primitive(PrimitiveValue::I32(-5)),
                TranslatedValue::Primitive(PrimitiveValue::I32(77)),
                TranslatedValue::Primitive(PrimitiveValue::I32(9)),
                TranslatedValue::Reference(ObjectId::new(43)),
            ],
        );
        let out = t.translate_entity(&data).unwrap();
        assert_eq!(out.content_length(), 4 + 8 + 8 + 8);
        assert_eq!(out.get_i32(0).unwrap(), -5);
        assert_eq!(out.get_i64(4).unwrap(), 9);
        assert_eq!(out.get_reference(12).unwrap(), ObjectId::new(43));
        assert_eq!(out.get_f64(20).unwrap(), 0.0);
    }

    #[test]
    fn short_legacy_content_is_rejected() {
        let t = translation(&legacy_point(), &current_point()).unwrap();
        let short = entity::<Direct>(
            &TypeDescription::new(TypeId::new(100), "Point", vec![TypeMember::primitive("x", PrimitiveType::I32)]),
            &[TranslatedValue::Primitive(PrimitiveValue::I32(1))],
        );
        assert!(t.translate_entity(&short).is_err());
    }

    #[test]
    fn variable_layouts_require_custom_handler() {
        let named = TypeDescription::new(TypeId::new(100), "Point", vec![TypeMember::chars("name")]);
        let err = translation(&named, &current_point()).unwrap_err();
        assert!(matches!(err, PersistenceError::UnsupportedLegacyType { ref reason, .. } if reason.contains("requires custom handler")));
        assert!(translation(&legacy_point(), &named).is_err());
    }

    // ---- boxed members ----

    struct Boxed(ObjectId, ogp_types::Instance);

    impl ObjectResolver for Boxed {
        fn lookup_object(&self, oid: ObjectId) -> Option<ogp_types::Instance> {
            (oid == self.0).then(|| std::sync::Arc::clone(&self.1))
        }
    }

    #[test]
    fn boxed_members_become_instance_values() {
        let legacy = TypeDescription::new(
            TypeId::new(100),
            "Counter",
            vec![
                TypeMember::reference("count", "i32"),
                TypeMember::primitive("limit", PrimitiveType::I16),
            ],
        );
        let current = TypeDescription::new(
            TypeId::new(101),
            "Counter",
            vec![
                TypeMember::primitive("count", PrimitiveType::I64),
                TypeMember::reference("limit", "i32"),
            ],
        );
        let t = translation(&legacy, &current).unwrap();
        assert!(t.crosses_boundary());
        assert!(!t.is_identity());

        let data = entity::<Direct>(
            &legacy,
            &[
                TranslatedValue::Reference(ObjectId::new(43)),
                TranslatedValue::Primitive(PrimitiveValue::I16(300)),
            ],
        );
        let values = t.member_values(&data, &Boxed(ObjectId::new(43), std::sync::Arc::new(12i32))).unwrap();
        assert_eq!(values.len(), 2);
        assert!(matches!(values[0], (0, MemberValue::Primitive(PrimitiveValue::I64(12)))));
        let (1, MemberValue::Reference(Some(limit))) = &values[1] else {
            panic!("limit should be boxed: {values:?}");
        };
        assert_eq!(limit.downcast_ref::<i32>(), Some(&300));

        // Entity bytes have no slot for a boxed instance.
        let err = t.translate_entity(&data).unwrap_err();
        assert!(err.to_string().contains("boxed/unboxed"), "{err}");
    }

    // ---- enums ----

    fn color(tid: u64, constants: &[&str]) -> TypeDescription {
        TypeDescription::new_enum(
            TypeId::new(tid),
            "Color",
            constants.iter().map(|c| c.to_string()).collect(),
            vec![],
        )
    }

    #[test]
    fn enum_ordinals_are_remapped() {
        let t = translation(&color(200, &["RED", "GREEN", "BLUE"]), &color(201, &["BLUE", "GREEN"])).unwrap();
        assert!(matches!(t.members()[0].translator, ValueTranslator::EnumOrdinal(_)));

        let blue = entity::<Direct>(t.legacy(), &[TranslatedValue::Primitive(PrimitiveValue::I32(2))]);
        assert_eq!(t.translate_entity(&blue).unwrap().get_i32(0).unwrap(), 0);

        let red = entity::<Direct>(t.legacy(), &[TranslatedValue::Primitive(PrimitiveValue::I32(0))]);
        assert!(matches!(
            t.translate_entity(&red),
            Err(PersistenceError::EnumConstantRemoved { ordinal: 0, .. })
        ));
    }

    #[test]
    fn appended_enum_constants_keep_identity() {
        let t = translation(&color(200, &["RED"]), &color(201, &["RED", "GREEN"])).unwrap();
        assert!(t.is_identity());
    }
}
