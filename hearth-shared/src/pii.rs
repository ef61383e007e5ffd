use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Customer contact data (street address, phone) that must not show up in logs.
///
/// `Debug` and `Display` print a fixed mask. Serialization writes the real
/// value because read models and persistence need it.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
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
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_value_in_debug() {
        let address = Masked::new("12 Elm Street".to_string());
        assert_eq!(format!("{:?}", address), "********");
        assert_eq!(address.expose(), "12 Elm Street");
    }

    #[test]
    fn test_masked_serializes_real_value() {
        let address = Masked::new("12 Elm Street".to_string());
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"12 Elm Street\"");
    }
}
