use crate::errors::types::Error;
use std::fmt;

/// Where an error happened: the component and the operation it was running
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    /// Add details to the context
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in component '{}' during operation '{}'", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Extension trait for attaching an [`ErrorContext`] to errors and results
pub trait ErrorExt<T> {
    /// Add context to the error
    fn context(self, ctx: ErrorContext) -> std::result::Result<T, Error>;

    /// Add simple context with component and operation
    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> std::result::Result<T, Error>;
}

impl<T> ErrorExt<T> for std::result::Result<T, Error> {
    fn context(self, ctx: ErrorContext) -> std::result::Result<T, Error> {
        self.map_err(|err| match err {
            Error::Config(msg) => Error::Config(format!("{} [{}]", msg, ctx)),
            Error::Internal(msg) => Error::Internal(format!("{} [{}]", msg, ctx)),
            Error::Custom(msg) => Error::Custom(format!("{} [{}]", msg, ctx)),
            other => Error::Custom(format!("{} [{}]", other, ctx)),
        })
    }

    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> std::result::Result<T, Error> {
        self.context(ErrorContext::new(component, operation))
    }
}
