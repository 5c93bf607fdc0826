//! Turning a row cursor into buffered rows, records and entities.

mod mapping;
mod result;
mod typed;

pub use mapping::{ColumnMapping, ColumnSelection, ColumnSelector};
pub use result::{retrieve, retrieve_cancellable, QueryResult};
pub use typed::{Entities, FieldOverrides};

pub(crate) use result::fetch_row;
pub(crate) use typed::MemberPlan;
