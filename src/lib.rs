//! Conversation pipeline and HTTP surface for the Taskline task-management agent.

// Strict bans on unsafe or non-idiomatic practice
#![deny(unsafe_code)] // Unsafe code is forbidden
#![deny(missing_docs)] // Every public function, struct, enum or module must be documented
#![deny(dead_code)] // Unused code is forbidden
#![deny(non_camel_case_types)] // Types follow the CamelCase convention
// Additional options to let nothing through
#![deny(unused_imports)] // Unused imports are forbidden
#![deny(unused_must_use)] // Result and Option must be handled explicitly
#![deny(non_snake_case)] // Variable and function names must be snake_case
#![deny(non_upper_case_globals)] // Constants and globals must be UPPERCASE
#![deny(nonstandard_style)] // No nonstandard code style
#![forbid(unsafe_op_in_unsafe_fn)] // No unsafe even inside unsafe functions
// Clippy for strict discipline
#![deny(clippy::all)] // All standard Clippy lints
#![deny(clippy::unwrap_used)] // unwrap() is forbidden
#![deny(clippy::expect_used)] // expect() is forbidden
#![deny(clippy::panic)] // panic!() is forbidden
#![deny(clippy::print_stdout)] // println!() in production is forbidden
#![deny(clippy::todo)] // No TODO markers in code
#![deny(clippy::unimplemented)] // No unimplemented functions
#![deny(clippy::unwrap_in_result)] // No unwrap() inside Result-returning code
#![deny(clippy::redundant_clone)] // No needless clones
// Lints for safety and robustness
#![deny(overflowing_literals)] // No overflowing literals
// Tests use unwrap/panic for assertions
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unwrap_in_result
    )
)]

/// Agent engine seam and the Ollama implementation.
pub mod agent;
/// Conversation pipeline (validation, lifecycle, dispatch, storage, retention).
pub mod chat;
/// HTTP server and API routes.
pub mod server;
/// Entry helpers to start the Taskline agent.
pub mod start_taskline_agent;
