mod command;

pub use command::CommandBuilder;
