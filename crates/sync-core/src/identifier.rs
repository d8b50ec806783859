//! SQL identifier validation.
//!
//! Table, column and primary-key names are interpolated into statements as
//! bare (back-quoted) tokens, while values are always bound as parameters.
//! Restricting identifiers to `[A-Za-z0-9_]+` is therefore the only thing
//! standing between configuration or peer input and the SQL text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ReplicationError, Result};

/// Check that `identifier` only contains ASCII letters, digits and underscores.
pub fn validate(identifier: &str) -> Result<()> {
    if !identifier.is_empty()
        && identifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        Ok(())
    } else {
        Err(ReplicationError::InvalidIdentifier(identifier.to_string()))
    }
}

/// A validated table or column name.
///
/// The only way to obtain an `Identifier` is through [`Identifier::new`],
/// so any statement built from `Identifier`s is free of injected SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validate `name` and wrap it.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    /// Validate every name in `names`, preserving order.
    pub fn all<I, S>(names: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(Self::new).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Back-quoted form for interpolation into MySQL statements.
    pub fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = ReplicationError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = ReplicationError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
