use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// A non-blank string of at most `MAX` characters.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct BoundedName<const MAX: usize>(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Name must be between 1 and {max} characters long: {name:?}")]
pub struct InvalidNameError {
    pub max: usize,
    pub name: String,
}

impl<const MAX: usize> BoundedName<MAX> {
    pub fn new(name: String) -> Result<Self, InvalidNameError> {
        let len = name.chars().count();
        if (1..=MAX).contains(&len) && !name.trim().is_empty() {
            Ok(Self(name))
        } else {
            Err(InvalidNameError { max: MAX, name })
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> Display for BoundedName<MAX> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<'de, const MAX: usize> Deserialize<'de> for BoundedName<MAX> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        Self::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.name), &"a bounded name"))
    }
}
