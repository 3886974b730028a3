//! # rexec-requirements
//!
//! Parsing and fingerprinting of the requirement lists users submit when
//! asking for a remote execution worker.
//!
//! A requirement list is an ordered list of lines in the familiar
//! `name[extras] <op> version` shape. Exactly one line must pin the runtime
//! (`python==3.11`); every other line is an opaque user package that is only
//! checked for syntax, since resolving versions is the job of the installer
//! running inside the worker.
//!
//! ## Invariants
//!
//! - Parsing never touches the network or the filesystem
//! - A list without exactly one `==` runtime pin is rejected, never defaulted
//! - Fingerprints are independent of package order and duplicate lines

mod error;
mod fingerprint;
mod marker;
mod requirement;
mod spec;

pub use error::{ParseError, RequirementError};
pub use fingerprint::Fingerprint;
pub use requirement::{Operator, Requirement, Specifier};
pub use spec::{RequirementSpec, RUNTIME_NAME};
