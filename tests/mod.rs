extern crate assert_cli;
extern crate chrono;
extern crate hwmp_mesh;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

mod integration;
mod unit;
