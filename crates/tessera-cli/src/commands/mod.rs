//! CLI subcommands.

pub(crate) mod console;
pub(crate) mod inspect;
pub(crate) mod restore;
pub(crate) mod run;
