/// Result alias that carries the custom [`AmbientError`] type.
pub type Result<T> = std::result::Result<T, AmbientError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AmbientError {
    /// Free-form failure that does not belong to a more specific category.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Settings documents that could not be decoded.
    #[error("invalid settings document: {0}")]
    Json(#[from] serde_json::Error),
    /// A sample or frame that cannot be processed.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Effect ids must contain at least one non-whitespace character.
    #[error("effect id cannot be empty")]
    InvalidEffectId,
    /// No factory is registered under the requested id.
    #[error("effect '{0}' is not registered")]
    EffectNotRegistered(String),
    /// A capture device could not be started. Never retried by the core.
    #[error("{source_name} capture failed: {message}")]
    Capture {
        source_name: &'static str,
        message: String,
    },
    /// An effect instance failed while creating, showing or hiding its surfaces.
    #[error("effect '{effect}' failed to {operation}: {message}")]
    Render {
        effect: String,
        operation: &'static str,
        message: String,
    },
    /// The monitor source could not enumerate displays.
    #[error("monitor detection failed: {0}")]
    Monitor(String),
    /// A shared lock was poisoned by a panicking holder.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl AmbientError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Builds a [`AmbientError::Capture`] for the named source.
    pub fn capture(source_name: &'static str, message: impl Into<String>) -> Self {
        Self::Capture {
            source_name,
            message: message.into(),
        }
    }

    /// Wraps a failure raised by an effect so the caller can tell which
    /// instance and which lifecycle step went wrong.
    pub fn render(effect: impl Into<String>, operation: &'static str, cause: impl ToString) -> Self {
        Self::Render {
            effect: effect.into(),
            operation,
            message: cause.to_string(),
        }
    }

    /// Configuration errors are rejected before any state changes.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidEffectId | Self::EffectNotRegistered(_))
    }
}

impl From<&str> for AmbientError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AmbientError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_effect_names_the_id() {
        let err = AmbientError::EffectNotRegistered("nonexistent".to_string());
        let text = err.to_string();
        assert!(text.contains("nonexistent"));
        assert!(text.contains("not registered"));
        assert!(err.is_configuration());
    }

    #[test]
    fn render_errors_carry_subject_and_step() {
        let err = AmbientError::render("softglow", "show", "surface lost");
        assert_eq!(
            err.to_string(),
            "effect 'softglow' failed to show: surface lost"
        );
        assert!(!err.is_configuration());
    }
}
