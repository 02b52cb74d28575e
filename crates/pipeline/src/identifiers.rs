//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive, so a [`JobName`] cannot be passed where a
//! [`TemplateName`] is expected even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is blank.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — caller-supplied strings
// ---------------------------------------------------------------------------

string_id! {
    /// Human-chosen name of a drafting job (the case name).
    ///
    /// Used in log fields, progress messages and as the stem of output file names.
    JobName
}

string_id! {
    /// Name of a prompt template (e.g. `"03-evaluation"`), resolved by a
    /// [`crate::PromptTemplates`] implementation.
    TemplateName
}

impl TemplateName {
    /// Creates a name from a compile-time constant.
    ///
    /// Intended for the built-in template names; blank constants are a
    /// programming error caught in debug builds.
    pub fn from_static(name: &'static str) -> Self {
        debug_assert!(!name.trim().is_empty(), "template names must not be blank");
        Self(name.to_string())
    }
}

impl JobName {
    /// Returns a version of the name that is safe to use as a file-name stem.
    ///
    /// Every character outside `[A-Za-z0-9_-]` is replaced with `_`.
    pub fn file_stem(&self) -> String {
        self.0
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single pipeline run.
///
/// Generated fresh for every [`crate::PipelineState`]; propagated through spans
/// so all activity from a single run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random [`RunId`].
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
