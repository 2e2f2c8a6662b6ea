//! The module for the `algebraic` CLI commands.

mod check;
mod run;
mod verify;

pub use self::{check::*, run::*, verify::*};
