//! Persisted member layouts and type descriptions.
//!
//! A [`TypeDescription`] is the binary shape of one type id: its members in
//! persisted order. Reference traversal programs, legacy translation and the
//! generic record handler are all derived from it.

use std::fmt;

use ogp_types::layout::{LIST_HEADER_LENGTH, REFERENCE_LENGTH};
use ogp_types::TypeId;
use serde::{Deserialize, Serialize};

/// Name of the ordinal member every enum description starts with.
pub const ORDINAL_MEMBER: &str = "ordinal";

/// Fixed-width primitive kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Bool,
    I8,
    I16,
    /// Unsigned 16-bit value, also used for UTF-16 code units.
    U16,
    I32,
    F32,
    I64,
    F64,
}

impl PrimitiveType {
    /// All primitive kinds, narrowest first.
    pub const ALL: [PrimitiveType; 8] = [
        Self::Bool,
        Self::I8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::F32,
        Self::I64,
        Self::F64,
    ];

    /// Persisted width in bytes.
    pub const fn length(&self) -> usize {
        match self {
            Self::Bool | Self::I8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::I64 => "i64",
            Self::F64 => "f64",
        }
    }

    pub const fn is_floating_point(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binary shape of one member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MemberKind {
    /// A fixed-width primitive value.
    Primitive { primitive: PrimitiveType },
    /// An 8-byte reference slot holding an object id.
    Reference { type_name: String },
    /// A list of raw bytes.
    Bytes,
    /// A list of UTF-8 encoded characters.
    Chars,
    /// A list of elements, each laid out as the nested members.
    Complex { members: Vec<TypeMember> },
}

/// One persisted member of a type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMember {
    pub name: String,
    /// Declaring type for members inherited from a super type, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    #[serde(flatten)]
    pub kind: MemberKind,
}

impl TypeMember {
    pub fn primitive(name: impl Into<String>, primitive: PrimitiveType) -> Self {
        Self::new(name, MemberKind::Primitive { primitive })
    }

    pub fn reference(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(
            name,
            MemberKind::Reference {
                type_name: type_name.into(),
            },
        )
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, MemberKind::Bytes)
    }

    pub fn chars(name: impl Into<String>) -> Self {
        Self::new(name, MemberKind::Chars)
    }

    pub fn complex(name: impl Into<String>, members: Vec<TypeMember>) -> Self {
        Self::new(name, MemberKind::Complex { members })
    }

    pub fn new(name: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            name: name.into(),
            qualifier: None,
            kind,
        }
    }

    /// Attach the declaring type name.
    pub fn qualified(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// `qualifier#name`, or the plain name.
    pub fn qualified_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}#{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Name of the member's value type as recorded in a type dictionary.
    pub fn type_name(&self) -> String {
        match &self.kind {
            MemberKind::Primitive { primitive } => primitive.name().to_string(),
            MemberKind::Reference { type_name } => type_name.clone(),
            MemberKind::Bytes => "[bytes]".to_string(),
            MemberKind::Chars => "[chars]".to_string(),
            MemberKind::Complex { .. } => "[complex]".to_string(),
        }
    }

    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        match self.kind {
            MemberKind::Primitive { primitive } => Some(primitive),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, MemberKind::Primitive { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, MemberKind::Reference { .. })
    }

    pub fn is_variable_length(&self) -> bool {
        matches!(
            self.kind,
            MemberKind::Bytes | MemberKind::Chars | MemberKind::Complex { .. }
        )
    }

    /// Whether the member holds references, directly or in nested elements.
    pub fn has_references(&self) -> bool {
        match &self.kind {
            MemberKind::Reference { .. } => true,
            MemberKind::Complex { members } => members.iter().any(TypeMember::has_references),
            _ => false,
        }
    }

    /// Persisted length if it is the same for every instance.
    pub fn fixed_length(&self) -> Option<usize> {
        match &self.kind {
            MemberKind::Primitive { primitive } => Some(primitive.length()),
            MemberKind::Reference { .. } => Some(REFERENCE_LENGTH),
            _ => None,
        }
    }

    /// Smallest number of bytes the member can occupy.
    pub fn minimum_length(&self) -> usize {
        self.fixed_length().unwrap_or(LIST_HEADER_LENGTH)
    }
}

/// The persisted binary shape of one type id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescription {
    pub type_id: TypeId,
    pub type_name: String,
    pub members: Vec<TypeMember>,
    /// Constant names in ordinal order, for enum types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_constants: Option<Vec<String>>,
}

impl TypeDescription {
    pub fn new(type_id: TypeId, type_name: impl Into<String>, members: Vec<TypeMember>) -> Self {
        Self {
            type_id,
            type_name: type_name.into(),
            members,
            enum_constants: None,
        }
    }

    /// An enum description: an `i32` ordinal member followed by `members`.
    pub fn new_enum(
        type_id: TypeId,
        type_name: impl Into<String>,
        constants: Vec<String>,
        members: Vec<TypeMember>,
    ) -> Self {
        let mut all = Vec::with_capacity(members.len() + 1);
        all.push(TypeMember::primitive(ORDINAL_MEMBER, PrimitiveType::I32));
        all.extend(members);
        Self {
            type_id,
            type_name: type_name.into(),
            members: all,
            enum_constants: Some(constants),
        }
    }

    pub fn is_enum(&self) -> bool {
        self.enum_constants.is_some()
    }

    pub fn has_references(&self) -> bool {
        self.members.iter().any(TypeMember::has_references)
    }

    pub fn is_variable_length(&self) -> bool {
        self.members.iter().any(TypeMember::is_variable_length)
    }

    /// Content length if every instance has the same persisted size.
    pub fn fixed_content_length(&self) -> Option<usize> {
        self.members.iter().map(TypeMember::fixed_length).sum()
    }

    /// Content offset of every member, or `None` for layouts with
    /// variable-length members (offsets after them are not constant).
    pub fn member_offsets(&self) -> Option<Vec<usize>> {
        let mut offset = 0;
        let mut offsets = Vec::with_capacity(self.members.len());
        for member in &self.members {
            offsets.push(offset);
            offset += member.fixed_length()?;
        }
        Some(offsets)
    }

    /// Index of the member with the given name.
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    /// Same members in the same order, same constants. Type id and name are
    /// not compared.
    pub fn has_identical_structure(&self, other: &TypeDescription) -> bool {
        self.members == other.members && self.enum_constants == other.enum_constants
    }
}
