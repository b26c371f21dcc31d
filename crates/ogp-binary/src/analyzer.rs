//! Compiles member layouts into reference traversal programs.

use crate::member::{MemberKind, TypeDescription, TypeMember};
use crate::traversal::{crop_to_references, ReferenceTraverser};

/// Compile a member list into a program that covers every member.
///
/// Adjacent fixed-length members merge into one `Skip` or `References` run.
/// Nested element layouts are compiled uncropped: each element must be
/// consumed exactly.
pub fn analyze(members: &[TypeMember]) -> Vec<ReferenceTraverser> {
    let mut steps = Vec::new();
    for member in members {
        match &member.kind {
            MemberKind::Primitive { primitive } => push_skip(&mut steps, primitive.length()),
            MemberKind::Reference { .. } => push_references(&mut steps, 1),
            MemberKind::Bytes | MemberKind::Chars => steps.push(ReferenceTraverser::SkipVariableLength),
            MemberKind::Complex { members } => steps.push(analyze_complex(members)),
        }
    }
    steps
}

fn analyze_complex(members: &[TypeMember]) -> ReferenceTraverser {
    let element = analyze(members);
    if !element.iter().any(ReferenceTraverser::has_references) {
        return ReferenceTraverser::SkipVariableLength;
    }
    if let [ReferenceTraverser::References(k)] = element.as_slice() {
        return ReferenceTraverser::VariableLengthReferenceRange(*k);
    }
    ReferenceTraverser::InlinedComplex(element)
}

fn push_skip(steps: &mut Vec<ReferenceTraverser>, length: usize) {
    if let Some(ReferenceTraverser::Skip(n)) = steps.last_mut() {
        *n += length;
    } else {
        steps.push(ReferenceTraverser::Skip(length));
    }
}

fn push_references(steps: &mut Vec<ReferenceTraverser>, count: usize) {
    if let Some(ReferenceTraverser::References(k)) = steps.last_mut() {
        *k += count;
    } else {
        steps.push(ReferenceTraverser::References(count));
    }
}

/// The top-level program of a type: analyzed, then cropped after the last
/// reference-bearing step. Types without references get an empty program.
pub fn derive_reference_traversers(description: &TypeDescription) -> Vec<ReferenceTraverser> {
    crop_to_references(analyze(&description.members))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::PrimitiveType;
    use ogp_types::TypeId;

    fn described(members: Vec<TypeMember>) -> TypeDescription {
        TypeDescription::new(TypeId::new(100), "T", members)
    }

    #[test]
    fn adjacent_members_merge() {
        let desc = described(vec![
            TypeMember::primitive("a", PrimitiveType::I32),
            TypeMember::primitive("b", PrimitiveType::Bool),
            TypeMember::reference("x", "X"),
            TypeMember::reference("y", "Y"),
            TypeMember::primitive("c", PrimitiveType::F64),
        ]);
        assert_eq!(
            analyze(&desc.members),
            vec![
                ReferenceTraverser::Skip(5),
                ReferenceTraverser::References(2),
                ReferenceTraverser::Skip(8),
            ]
        );
        assert_eq!(
            derive_reference_traversers(&desc),
            vec![ReferenceTraverser::Skip(5), ReferenceTraverser::References(2)]
        );
    }

    #[test]
    fn reference_free_types_get_empty_program() {
        let desc = described(vec![
            TypeMember::chars("name"),
            TypeMember::primitive("age", PrimitiveType::I16),
        ]);
        assert!(derive_reference_traversers(&desc).is_empty());
    }

    #[test]
    fn pure_reference_elements_become_range() {
        let desc = described(vec![
            TypeMember::primitive("size", PrimitiveType::I64),
            TypeMember::complex("elements", vec![TypeMember::reference("element", "Object")]),
        ]);
        assert_eq!(
            derive_reference_traversers(&desc),
            vec![ReferenceTraverser::Skip(8), ReferenceTraverser::VariableLengthReferenceRange(1)]
        );
    }

    #[test]
    fn key_value_entries_are_a_two_slot_range() {
        let desc = described(vec![TypeMember::complex(
            "entries",
            vec![TypeMember::reference("key", "K"), TypeMember::reference("value", "V")],
        )]);
        assert_eq!(
            derive_reference_traversers(&desc),
            vec![ReferenceTraverser::VariableLengthReferenceRange(2)]
        );
    }

    #[test]
    fn mixed_elements_are_inlined_uncropped() {
        let desc = described(vec![TypeMember::complex(
            "entries",
            vec![
                TypeMember::reference("key", "K"),
                TypeMember::primitive("hash", PrimitiveType::I32),
            ],
        )]);
        assert_eq!(
            derive_reference_traversers(&desc),
            vec![ReferenceTraverser::InlinedComplex(vec![
                ReferenceTraverser::References(1),
                ReferenceTraverser::Skip(4),
            ])]
        );
    }

    #[test]
    fn reference_free_elements_are_skipped() {
        let desc = described(vec![
            TypeMember::complex("points", vec![TypeMember::primitive("x", PrimitiveType::F32)]),
            TypeMember::reference("owner", "Owner"),
        ]);
        assert_eq!(
            derive_reference_traversers(&desc),
            vec![ReferenceTraverser::SkipVariableLength, ReferenceTraverser::References(1)]
        );
    }
}
