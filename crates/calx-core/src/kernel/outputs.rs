use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::error::WorkerError;

/// Display marker shown in place of a failed variable's output.
pub const ERROR_MARKER: &str = "#ERR!";

/// Results of one kernel run, keyed by variable name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outputs {
    results: BTreeMap<String, Result<String, WorkerError>>,
}

impl Outputs {
    pub fn get(&self, name: &str) -> Option<&Result<String, WorkerError>> {
        self.results.get(name)
    }

    /// The display string for `name`, or [`ERROR_MARKER`] if it failed.
    pub fn display(&self, name: &str) -> Option<&str> {
        self.results.get(name).map(|result| match result {
            Ok(output) => output.as_str(),
            Err(_) => ERROR_MARKER,
        })
    }

    /// `name -> display string` for every variable.
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        self.results
            .keys()
            .filter_map(|name| Some((name.clone(), self.display(name)?.to_string())))
            .collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &WorkerError> {
        self.results.values().filter_map(|result| result.as_ref().err())
    }

    pub fn is_success(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Result<String, WorkerError>> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl FromIterator<(String, Result<String, WorkerError>)> for Outputs {
    fn from_iter<T: IntoIterator<Item = (String, Result<String, WorkerError>)>>(iter: T) -> Self {
        Outputs {
            results: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Outputs {
    type Item = (String, Result<String, WorkerError>);
    type IntoIter = btree_map::IntoIter<String, Result<String, WorkerError>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a Outputs {
    type Item = (&'a String, &'a Result<String, WorkerError>);
    type IntoIter = btree_map::Iter<'a, String, Result<String, WorkerError>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
