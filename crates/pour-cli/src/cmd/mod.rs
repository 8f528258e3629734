pub mod deps;
pub mod info;
pub mod install;
pub mod update;
