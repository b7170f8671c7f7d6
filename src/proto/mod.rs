pub mod command;
pub mod exchange;
pub mod parser;
