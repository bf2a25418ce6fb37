//! Helpers shared by the unit tests of every module and by the scenario tests.
pub mod common;
