//! Dependency extraction from formula strings.
//!
//! Formulas refer to other variables by name. Scanning a formula for
//! identifiers that match a known variable gives the dependency list the
//! scheduler waits on.
//!
//! Handles:
//! - Plain identifiers: `a`, `total_2`
//! - Ignores identifiers inside string literals
//! - Ignores property and method names after a `.` (e.g. `x.len`)

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn identifier_re() -> &'static Regex {
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    IDENT_RE.get_or_init(|| {
        Regex::new(r"(\.\s*)?\b([A-Za-z][A-Za-z0-9_]*)\b")
            .expect("identifier regex must compile")
    })
}

/// All identifiers in `script` outside string literals, in order of first use.
pub fn identifiers(script: &str) -> Vec<String> {
    let script = strip_string_literals(script);
    let mut seen = HashSet::new();
    let mut idents = Vec::new();

    for caps in identifier_re().captures_iter(&script) {
        if caps.get(1).is_some() {
            continue;
        }
        let ident = &caps[2];
        if seen.insert(ident.to_string()) {
            idents.push(ident.to_string());
        }
    }
    idents
}

/// Extract the names in `known` that `script` references.
///
/// `own_name` is never reported, so a formula that mentions its own name is
/// not given a self-dependency.
pub fn extract_dependencies<'a, I>(script: &str, known: I, own_name: Option<&str>) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let known: HashSet<&str> = known.into_iter().collect();
    identifiers(script)
        .into_iter()
        .filter(|ident| known.contains(ident.as_str()))
        .filter(|ident| Some(ident.as_str()) != own_name)
        .collect()
}

fn strip_string_literals(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in script.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(' ');
                continue;
            }
            if ch == '\\' {
                escaped = true;
                out.push(' ');
                continue;
            }
            if ch == '"' {
                in_string = false;
                out.push('"');
            } else {
                out.push(' ');
            }
        } else if ch == '"' {
            in_string = true;
            out.push('"');
        } else {
            out.push(ch);
        }
    }

    out
}
