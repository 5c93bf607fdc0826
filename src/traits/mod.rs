mod connection;
mod cursor;
mod entity;

pub use connection::{Connection, ConnectionFactory};
pub use cursor::RowCursor;
pub use entity::{Entity, EntityMap, EntityMapBuilder};
