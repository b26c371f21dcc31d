//! Byte layout of entities, lists and reference slots.
//!
//! ```text
//! entity: [8: total length][8: type id][8: object id][content ...]
//! list:   [8: total byte length][8: element count][elements ...]
//! ```
//!
//! Entity total length and list total byte length both include their own
//! header. "Content length" always excludes it. Storage-resident streams may
//! carry gap markers: a negative length field whose absolute value is the
//! number of bytes to skip, including the marker itself.
//!
//! All arithmetic here is checked; an overflow is reported as `None` and the
//! caller turns it into a layout violation.

/// Length of an entity header.
pub const ENTITY_HEADER_LENGTH: usize = 24;
/// Offset of the total length field in an entity header.
pub const OFFSET_ENTITY_LENGTH: usize = 0;
/// Offset of the type id field in an entity header.
pub const OFFSET_ENTITY_TYPE_ID: usize = 8;
/// Offset of the object id field in an entity header.
pub const OFFSET_ENTITY_OBJECT_ID: usize = 16;

/// Length of a list header.
pub const LIST_HEADER_LENGTH: usize = 16;
/// Offset of the total byte length field in a list header.
pub const OFFSET_LIST_BYTE_LENGTH: usize = 0;
/// Offset of the element count field in a list header.
pub const OFFSET_LIST_ELEMENT_COUNT: usize = 8;

/// Length of a reference slot.
pub const REFERENCE_LENGTH: usize = 8;
/// Length of a length field (entity length, gap marker, sized array capacity).
pub const LENGTH_FIELD_LENGTH: usize = 8;
/// Length of a key/value entry in an entry list: two references.
pub const KEY_VALUE_ENTRY_LENGTH: usize = 2 * REFERENCE_LENGTH;

/// Largest total length an entity header can carry; larger values would read
/// back as gap markers.
pub const MAX_ENTITY_LENGTH: u64 = i64::MAX as u64;

/// Total entity length for a content length.
pub fn entity_total_length(content_length: usize) -> Option<u64> {
    let total = (content_length as u64).checked_add(ENTITY_HEADER_LENGTH as u64)?;
    (total <= MAX_ENTITY_LENGTH).then_some(total)
}

/// Content length for a total entity length; `None` below the header length.
pub fn entity_content_length(total_length: u64) -> Option<u64> {
    total_length.checked_sub(ENTITY_HEADER_LENGTH as u64)
}

/// Content offset of an entity starting at `entity_offset`.
pub const fn entity_content_offset(entity_offset: usize) -> usize {
    entity_offset + ENTITY_HEADER_LENGTH
}

/// Header-inclusive byte length of a list of `count` elements.
pub fn list_total_length(count: u64, element_length: usize) -> Option<u64> {
    count
        .checked_mul(element_length as u64)?
        .checked_add(LIST_HEADER_LENGTH as u64)
}

/// Content length of a list given its header-inclusive byte length.
pub fn list_content_length(total_byte_length: u64) -> Option<u64> {
    total_byte_length.checked_sub(LIST_HEADER_LENGTH as u64)
}

/// Header-inclusive byte length of a reference list.
pub fn reference_list_total_length(count: u64) -> Option<u64> {
    list_total_length(count, REFERENCE_LENGTH)
}

/// Header-inclusive byte length of a key/value entry list.
pub fn key_value_list_total_length(count: u64) -> Option<u64> {
    list_total_length(count, KEY_VALUE_ENTRY_LENGTH)
}

/// Offset of element `index` in a list starting at `list_offset`.
pub fn list_element_offset(list_offset: usize, index: u64, element_length: usize) -> Option<usize> {
    let relative = usize::try_from(index.checked_mul(element_length as u64)?).ok()?;
    list_offset.checked_add(LIST_HEADER_LENGTH)?.checked_add(relative)
}

/// Interpretation of a raw length field read from a storage-resident stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthField {
    /// An entity of the given total length.
    Entity(u64),
    /// A gap of the given span, marker included.
    Gap(u64),
    /// Zero: never valid.
    Invalid,
}

impl LengthField {
    /// Classify a raw length field value.
    pub fn classify(raw: u64) -> Self {
        let signed = raw as i64;
        match signed {
            0 => Self::Invalid,
            n if n > 0 => Self::Entity(n as u64),
            n => Self::Gap(n.unsigned_abs()),
        }
    }

    /// Raw value of a gap marker spanning `span` bytes.
    pub fn gap_marker(span: u64) -> Option<u64> {
        let span = i64::try_from(span).ok()?;
        (span >= LENGTH_FIELD_LENGTH as i64).then(|| (-span) as u64)
    }
}

/// Validate a signed content length as it may come from computed sizes.
pub fn validate_content_length(content_length: i64) -> Option<usize> {
    if content_length < 0 {
        return None;
    }
    let length = usize::try_from(content_length).ok()?;
    entity_total_length(length).map(|_| length)
}
