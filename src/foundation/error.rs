/// Convenience result type used across overpaint.
pub type OverpaintResult<T> = Result<T, OverpaintError>;

/// Top-level error taxonomy used by compositor APIs.
#[derive(thiserror::Error, Debug)]
pub enum OverpaintError {
    /// Invalid options or caller-provided data.
    #[error("validation error: {0}")]
    Validation(String),

    /// A surface could not be created or addressed.
    #[error("surface error: {0}")]
    Surface(String),

    /// A visual failed while painting itself.
    #[error("draw error: {0}")]
    Draw(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OverpaintError {
    /// Build a [`OverpaintError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`OverpaintError::Surface`] value.
    pub fn surface(msg: impl Into<String>) -> Self {
        Self::Surface(msg.into())
    }

    /// Build a [`OverpaintError::Draw`] value.
    pub fn draw(msg: impl Into<String>) -> Self {
        Self::Draw(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
