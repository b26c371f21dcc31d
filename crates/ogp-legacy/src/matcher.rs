//! Matching legacy members to current members by name.

use std::collections::HashMap;

use ogp_binary::{TypeDescription, TypeMember};
use ogp_types::{PersistenceError, PersistenceResult};
use serde::{Deserialize, Serialize};

/// An explicit mapping of a legacy member onto a current member of the same
/// type. Member names may be plain or qualified (`qualifier#name`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRename {
    pub type_name: String,
    pub legacy: String,
    pub current: String,
}

impl MemberRename {
    pub fn new(type_name: impl Into<String>, legacy: impl Into<String>, current: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            legacy: legacy.into(),
            current: current.into(),
        }
    }
}

fn names_member(name: &str, member: &TypeMember) -> bool {
    member.name == name || member.qualified_name() == name
}

/// Matches members by rename override, then exact qualified name, then a
/// simple name that is unique among the current members.
#[derive(Clone, Debug, Default)]
pub struct NameMemberMatcher {
    renames: HashMap<String, Vec<MemberRename>>,
}

impl NameMemberMatcher {
    pub fn new(renames: impl IntoIterator<Item = MemberRename>) -> Self {
        let mut matcher = Self::default();
        for rename in renames {
            matcher.add_rename(rename);
        }
        matcher
    }

    pub fn add_rename(&mut self, rename: MemberRename) -> &mut Self {
        self.renames.entry(rename.type_name.clone()).or_default().push(rename);
        self
    }

    pub fn rename_count(&self) -> usize {
        self.renames.values().map(Vec::len).sum()
    }

    fn rename_for(&self, type_name: &str, member: &TypeMember) -> Option<&MemberRename> {
        self.renames
            .get(type_name)?
            .iter()
            .find(|rename| names_member(&rename.legacy, member))
    }

    /// Current member index per legacy member, `None` where the legacy member
    /// has no counterpart.
    pub fn match_members(
        &self,
        legacy: &TypeDescription,
        current: &TypeDescription,
    ) -> PersistenceResult<Vec<Option<usize>>> {
        let mut matched_by: Vec<Option<usize>> = vec![None; current.members.len()];
        let mut result = Vec::with_capacity(legacy.members.len());
        for (legacy_index, member) in legacy.members.iter().enumerate() {
            let target = match self.rename_for(&legacy.type_name, member) {
                Some(rename) => Some(
                    current
                        .members
                        .iter()
                        .position(|m| names_member(&rename.current, m))
                        .ok_or_else(|| {
                            PersistenceError::Consistency(format!(
                                "rename of {}.{} targets unknown member {}",
                                legacy.type_name, rename.legacy, rename.current
                            ))
                        })?,
                ),
                None => Self::match_by_name(member, current),
            };
            if let Some(index) = target {
                if let Some(previous) = matched_by[index].replace(legacy_index) {
                    return Err(PersistenceError::Consistency(format!(
                        "{}: current member {} is matched by legacy members {} and {}",
                        current.type_name,
                        current.members[index].name,
                        legacy.members[previous].name,
                        member.name
                    )));
                }
            }
            result.push(target);
        }
        Ok(result)
    }

    fn match_by_name(member: &TypeMember, current: &TypeDescription) -> Option<usize> {
        let qualified = member.qualified_name();
        if let Some(index) = current.members.iter().position(|m| m.qualified_name() == qualified) {
            return Some(index);
        }
        let mut candidates = current
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.name == member.name);
        match (candidates.next(), candidates.next()) {
            (Some((index, _)), None) => Some(index),
            _ => None,
        }
    }
}
