//! macchiato is a teaching interpreter for a subset of JVM bytecode.
//!
//! The crate loads a single compiled class file, locates the static
//! `main([Ljava/lang/String;)V` entry method and interprets an
//! integer-and-int-array instruction subset until the entry method
//! returns.
pub mod bytecode;
pub mod heap;
pub mod jvm;
pub mod program;
pub mod runtime;
