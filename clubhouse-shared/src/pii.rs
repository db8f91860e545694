use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps a contact target (email address, push token) so that it never
/// reaches log output in full. Serialization is untouched because API
/// responses still need the real value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T: AsRef<str>> Masked<T> {
    /// Short, non-identifying hint of the wrapped value, e.g. `j***@example.com`.
    pub fn hint(&self) -> String {
        redact(self.0.as_ref())
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Masked({})", self.hint())
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hint())
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

fn redact(value: &str) -> String {
    let Some(first) = value.chars().next() else {
        return String::new();
    };

    match value.split_once('@') {
        Some((_, domain)) => format!("{first}***@{domain}"),
        None if value.chars().count() > 8 => {
            let tail: String = value.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("{first}***{tail}")
        }
        None => "********".to_string(),
    }
}
