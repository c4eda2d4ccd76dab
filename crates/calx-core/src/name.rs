//! Variable name rules.
//!
//! A name starts with an ASCII letter and continues with ASCII letters,
//! digits or underscores. Names double as identifiers inside formulas, so
//! anything else would not be addressable from code.

use crate::error::NameError;

/// Check a candidate variable name.
pub fn validate_name(candidate: &str) -> Result<(), NameError> {
    let mut chars = candidate.chars().enumerate();
    let Some((_, first)) = chars.next() else {
        return Err(NameError::Empty);
    };
    if !first.is_ascii_alphabetic() {
        return Err(NameError::InvalidFirst { ch: first });
    }
    for (index, ch) in chars {
        if !(ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(NameError::InvalidChar { ch, index });
        }
    }
    Ok(())
}

pub fn is_valid_name(candidate: &str) -> bool {
    validate_name(candidate).is_ok()
}
