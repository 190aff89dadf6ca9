//! Error taxonomy
//!
//! - [`PresentableError`]: user-facing conditions with a short title and a longer description
//! - [`ResolveError`]: expected conditions the caller recovers from (first-run setup, fallbacks)
//! - [`RecipeError`]: separates "this prefix cannot take the recipe" from "the mutation failed"
//! - [`SettingsError`]: rejected field-level settings updates
//!
//! Everything else travels as `anyhow::Error` with context attached.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::products::PrefixHint;

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// An error that can be shown to the user as-is
#[derive(Debug, Error)]
#[error("{title}: {description}")]
pub struct PresentableError {
    pub title: String,
    pub description: String,
    /// Short machine-oriented summary for logs and bug reports
    pub technical: Option<String>,
    #[source]
    cause: Option<BoxedCause>,
}

impl PresentableError {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            technical: None,
            cause: None,
        }
    }

    pub fn with_technical(mut self, technical: impl Into<String>) -> Self {
        self.technical = Some(technical.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Settings file could not be decoded or failed validation
    pub fn invalid_settings<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(
            "Invalid settings file",
            "The user settings file could not be decoded. This is most likely due to a \
             formatting error in the file itself. Did you make a mistake while editing it by hand?",
        )
        .with_cause(cause)
    }

    /// Configured Wine home is unusable
    pub fn runtime_home_invalid(home: &std::path::Path, reason: impl fmt::Display) -> Self {
        Self::new(
            "Wine home path is invalid",
            format!("Wine home '{}' is invalid! {reason}.", home.display()),
        )
    }

    /// No usable Wine installation anywhere on the system
    pub fn system_runtime_missing() -> Self {
        Self::new(
            "Wine is not installed",
            "No Wine installation was found on PATH or in /opt. Install Wine and try again.",
        )
    }

    /// A DXVK backup file is already present where a fresh one would be written
    pub fn backup_exists(target: &std::path::Path, backup: &std::path::Path) -> Self {
        Self::new(
            "Backup files already exist",
            format!(
                "Backup file exists for '{}' at '{}'. The backup file (the one with the .old \
                 extension) should not be there. Make sure the correct dll file is in place at '{}' \
                 and remove the old one, then report this with a sha512 hash of both files.",
                target.display(),
                backup.display(),
                target.display()
            ),
        )
        .with_technical("Invalid DXVK state")
    }
}

/// Expected lookup failures; callers take an alternative path
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("executable '{0}' could not be found")]
    ExecutableNotFound(String),

    #[error("no prefix matches the hints: {}", format_hints(.0))]
    NoPrefixForHints(Vec<PrefixHint>),

    #[error("no prefix with id '{0}'")]
    PrefixNotFound(String),

    #[error("no hardware profile available")]
    NoHardwareProfile,

    #[error("no Wine installation found on PATH or in /opt")]
    SystemRuntimeNotFound,

    #[error("directory '{name}' not found in {}", .parent.display())]
    DirectoryNotFound { name: String, parent: PathBuf },
}

fn format_hints(hints: &[PrefixHint]) -> String {
    hints
        .iter()
        .map(|hint| hint.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure mode of the hardware profiling collaborator
#[derive(Debug, Error)]
#[error("hardware profiling failed: {0}")]
pub struct HardwareProfilingError(pub String);

/// Failure while making a recipe
#[derive(Debug, Error)]
pub enum RecipeError {
    /// The prefix does not meet the recipe's requirements; nothing was mutated
    #[error("recipe '{recipe}' cannot be made in prefix '{prefix}'")]
    CannotMake { recipe: &'static str, prefix: String },

    #[error(transparent)]
    Presentable(#[from] PresentableError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Rejected settings update
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown prefix setting '{0}'")]
    UnknownKey(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("prefix setting '{0}' cannot be changed")]
    Immutable(&'static str),

    #[error("no prefix with id '{0}'")]
    NoSuchPrefix(String),

    #[error("a prefix with id '{0}' already exists")]
    DuplicateId(String),
}

/// Finds the first presentable error in an `anyhow` chain
pub fn find_presentable(err: &anyhow::Error) -> Option<&PresentableError> {
    err.chain().find_map(|cause| {
        cause.downcast_ref::<PresentableError>().or_else(|| match cause.downcast_ref::<RecipeError>() {
            Some(RecipeError::Presentable(inner)) => Some(inner),
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_presentable_found_through_context() {
        let err: anyhow::Error = Err::<(), _>(PresentableError::new("Title", "Description"))
            .context("while doing something")
            .unwrap_err();

        let presentable = find_presentable(&err).expect("presentable in chain");
        assert_eq!(presentable.title, "Title");
    }

    #[test]
    fn test_presentable_inside_recipe_error() {
        let err = anyhow::Error::new(RecipeError::from(PresentableError::new("A", "B")));
        assert!(find_presentable(&err).is_some());
    }

    #[test]
    fn test_cannot_make_is_distinct_from_failure() {
        let cannot = RecipeError::CannotMake { recipe: "install_dxvk", prefix: "p".into() };
        let failed = RecipeError::Failed(anyhow::anyhow!("boom"));
        assert!(matches!(cannot, RecipeError::CannotMake { .. }));
        assert!(matches!(failed, RecipeError::Failed(_)));
    }

    #[test]
    fn test_no_prefix_for_hints_lists_hints() {
        let err = ResolveError::NoPrefixForHints(vec![PrefixHint::Player, PrefixHint::App]);
        assert_eq!(err.to_string(), "no prefix matches the hints: roblox_player, roblox_app");
    }
}
