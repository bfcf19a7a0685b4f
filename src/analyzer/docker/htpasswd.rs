//! Detection of `htpasswd` invocations that put a clear-text password on the
//! command line.
//!
//! `htpasswd -b [-c] file user password` and `htpasswd -bn user password`
//! read the password from the arguments, so it ends up in the image layer
//! history. Detection works on resolved arguments and counts positions:
//! the command name plus the positional (non-flag) arguments must match
//! the batch-mode arity.

use crate::analyzer::docker::resolution::ArgumentResolution;
use crate::analyzer::docker::word::OPERATORS;

const HTPASSWD: &str = "htpasswd";

/// Split a flat argument list into commands at `&&`, `||`, `;` and `|`.
///
/// Separators themselves are dropped, as are empty commands.
pub fn split_commands<T, F>(arguments: &[T], resolution: F) -> Vec<&[T]>
where
    F: Fn(&T) -> &ArgumentResolution,
{
    arguments
        .split(|arg| {
            resolution(arg)
                .value()
                .is_some_and(|v| OPERATORS.iter().any(|op| *op == v))
        })
        .filter(|command| !command.is_empty())
        .collect()
}

/// Whether one command is a batch-mode `htpasswd` call with an inline password.
///
/// Unresolved arguments after the command name count as positional: a
/// password taken from a variable is still on the command line.
pub fn is_sensitive_htpasswd(command: &[ArgumentResolution]) -> bool {
    let mut flag_b = false;
    let mut flag_n = false;
    // includes the command name
    let mut non_flags = 0;

    for (i, argument) in command.iter().enumerate() {
        let value = argument.value();
        if i == 0 {
            if value != Some(HTPASSWD) {
                return false;
            }
            non_flags += 1;
            continue;
        }
        match value {
            Some(v) if v.starts_with('-') => {
                flag_b |= v.contains('b');
                flag_n |= v.contains('n');
            }
            _ => non_flags += 1,
        }
    }

    flag_b && ((!flag_n && non_flags == 4) || (flag_n && non_flags == 3))
}
