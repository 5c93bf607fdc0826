use std::collections::VecDeque;

use crate::error::Result;
use crate::traits::{Entity, EntityMap};
use crate::types::{names_match, Value};

/// Member → column renames applied when mapping rows onto an entity.
///
/// A member with an override only matches its override column, never a
/// column carrying its own name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldOverrides {
    pairs: Vec<(String, String)>,
}

impl FieldOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map entity member `member` to result column `column`.
    pub fn map(mut self, member: impl Into<String>, column: impl Into<String>) -> Self {
        self.pairs.push((member.into(), column.into()));
        self
    }

    /// Column the member reads from, if overridden.
    pub fn column_for(&self, member: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(m, _)| names_match(m, member))
            .map(|(_, c)| c.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Column-to-member assignment for one entity type and one column mapping.
pub(crate) struct MemberPlan<T: 'static> {
    map: &'static EntityMap<T>,
    columns: Vec<(String, Option<usize>)>,
}

impl<T: Entity> MemberPlan<T> {
    pub(crate) fn new(column_names: &[String], overrides: &FieldOverrides) -> Self {
        let map = T::entity_map();
        let member_names: Vec<&str> = map.member_names().collect();
        let columns = column_names
            .iter()
            .map(|column| {
                let member = member_names.iter().position(|member| {
                    match overrides.column_for(member) {
                        Some(target) => names_match(target, column),
                        None => names_match(member, column),
                    }
                });
                (column.clone(), member)
            })
            .collect();
        Self { map, columns }
    }

    /// Build one entity from a row laid out like the mapping this plan came from.
    pub(crate) fn apply(&self, row: Vec<Value>) -> Result<T> {
        let mut entity = T::default();
        for ((column, member), value) in self.columns.iter().zip(row) {
            if let Some(index) = member {
                self.map.assign(*index, &mut entity, value, column)?;
            }
        }
        Ok(entity)
    }
}

/// Lazy iterator materializing entities from a row queue.
/// Each pulled item dequeues one row.
pub struct Entities<'a, T: Entity> {
    rows: &'a mut VecDeque<Vec<Value>>,
    plan: MemberPlan<T>,
}

impl<'a, T: Entity> Entities<'a, T> {
    pub(crate) fn new(
        rows: &'a mut VecDeque<Vec<Value>>,
        column_names: &[String],
        overrides: &FieldOverrides,
    ) -> Self {
        Self {
            rows,
            plan: MemberPlan::new(column_names, overrides),
        }
    }
}

impl<T: Entity> Iterator for Entities<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.pop_front()?;
        Some(self.plan.apply(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.rows.len(), Some(self.rows.len()))
    }
}
