//! Macros for defining validated name types.

/// Macro to define a validated string newtype.
///
/// This generates a newtype wrapper around `String` with:
/// - `new()` that runs the given validator
/// - `as_str()` borrowing the inner value
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations (deserialization validates)
/// - `Ord`, `Hash`, and other standard traits
///
/// The validator has the signature `fn(&'static str, &str) -> Result<(), IdError>`
/// where the first argument is the human readable name used in errors.
///
/// # Example
///
/// ```ignore
/// define_name!(AppId, "app ID", validate_app_id);
///
/// let app: AppId = "blog".parse()?;
/// assert_eq!(app.as_str(), "blog");
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $what:literal, $validate:path) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human readable name used in validation errors.
            pub const WHAT: &'static str = $what;

            /// Validates and wraps a value.
            pub fn new(value: impl Into<String>) -> Result<Self, $crate::IdError> {
                let value = value.into();
                $validate(Self::WHAT, &value)?;
                Ok(Self(value))
            }

            /// Returns the value as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the wrapper and returns the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }
    };
}
