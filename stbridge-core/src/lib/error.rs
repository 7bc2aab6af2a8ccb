use std::fmt::{self, Display, Formatter};
use std::io;

/// A general-purpose front-end error with a human-readable message.
#[derive(Debug)]
pub struct FrontError {
    message: String,
}

pub type FrontResult<T> = Result<T, FrontError>;

impl FrontError {
    pub fn new(message: impl Into<String>) -> Self {
        FrontError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for FrontError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FrontError {}

impl From<io::Error> for FrontError {
    fn from(e: io::Error) -> Self {
        FrontError::new(format!("IO error: {}", e))
    }
}

/// Evaluate the given condition, and return an error with the given
/// formatted message if it is false.
macro_rules! assert_or_error {
    ($cond:expr, $($msg:tt)+) => {
        if !($cond) {
            return Err($crate::error::FrontError::new(format!($($msg)+)));
        }
    };
}
