mod command;
mod name;
mod parameter;
mod record;
mod value;

pub use command::{Command, CommandKind, TransactionHandle};
pub use parameter::{ParamType, Parameter, Parameters};
pub use record::Record;
pub use value::{FromValue, Value};

pub(crate) use name::{fold_name, names_match};
