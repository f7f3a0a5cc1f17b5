#![allow(
    clippy::cast_possible_truncation, // intentional: stack positions and register indices are < 8
    clippy::module_name_repetitions, // x87::X87Stack etc. read better than the alternatives
    clippy::missing_errors_doc // every fallible operation returns the crate `Error`
)]

pub mod error;
pub mod ia32;
pub mod ir;
pub mod mode;
pub mod x87;

/// Test harness module for writing unit and integration tests.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use error::{Error, Result};
pub use ir::{BlockId, Function, VReg};
pub use x87::{SimRegistry, X87Target, simulate_graph};
