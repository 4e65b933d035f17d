//! # Binary-Level Test Suite
//!
//! Scenario tests that drive the library the way `main` wires it up: the
//! acquisition pipeline against canned feed responses, station pages rendered
//! through the terminal panel, and command line parsing.

mod pipeline_tests;
