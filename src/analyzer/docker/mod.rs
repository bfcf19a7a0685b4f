//! Dockerfile argument analysis.
//!
//! - `word` - shell word lexing of command lines into argument trees
//! - `dockerfile` - Dockerfile stages with their ARG/ENV assignments and
//!   `RUN` command trees
//! - `resolution` - best-effort resolution of arguments to strings
//! - `htpasswd` - inline-password `htpasswd` detection
//! - `secrets` - the check reporting build-time secret generation

pub mod dockerfile;
pub mod htpasswd;
pub mod resolution;
pub mod secrets;
pub mod word;

pub use dockerfile::{is_dockerfile, parse_dockerfile};
pub use resolution::{ArgumentResolution, ArgumentResolver, Scope};
pub use word::parse_command_line;
