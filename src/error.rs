/// Error types that can occur during network construction, inference and training
///
/// # Variants
///
/// - `InputValidationError` - indicates the input data provided does not meet the expected shape or validation rules
/// - `ConfigurationError` - indicates the network was configured incompletely or inconsistently before building
/// - `NotSupported` - indicates an operation was invoked on a layer variant that does not support it
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    InputValidationError(String),
    ConfigurationError(String),
    NotSupported(&'static str),
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::InputValidationError(msg) => {
                write!(f, "Input validation error: {}", msg)
            }
            NetworkError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            NetworkError::NotSupported(msg) => write!(f, "Operation not supported: {}", msg),
        }
    }
}

/// Implements the standard error trait for NetworkError
impl std::error::Error for NetworkError {}
