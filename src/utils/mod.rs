pub mod command;
pub mod design;
pub mod file;
pub mod reference;
pub mod system;
