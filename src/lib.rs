//! Core library for the cmcs-license-sync command line application.
//!
//! The library keeps the CMCS licence workbooks in step with the portal. IO
//! adapters for the workbooks live under [`cmcs::licenses::io`], record types
//! inside [`cmcs::licenses::model`], the merge rules in
//! [`cmcs::licenses::reconcile`], the portal client under
//! [`cmcs::licenses::remote`], and the run orchestration in
//! [`cmcs::licenses::sync`].

pub mod cmcs;

pub use cmcs::licenses::{ErrorKind, Result, ToolError, error, io, model, reconcile, remote, sync};
