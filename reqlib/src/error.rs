//! Error handling for reqlib.

use std::fmt;

/// The main error type for reqlib operations.
///
/// Every variant is terminal for an invocation: the binary prints it once and
/// exits non-zero.
#[derive(Debug)]
pub enum Error {
    /// The configuration file does not exist.
    ConfigNotFound(String),
    /// The configuration file exists but is not a usable document.
    ConfigParse(String),
    /// The requested command is not defined in the configuration file.
    CommandNotFound { command: String, config_file: String },
    /// A command definition lacks a field it cannot run without.
    MissingRequiredField { command: String, field: String },
    /// The resolved definition cannot be turned into an HTTP request.
    InvalidRequest(String),
    /// Connection, DNS, TLS or timeout failure.
    Transport(String),
    /// The server answered with a non-success status.
    HttpStatus { status: u16, body: String },
    /// The response body is not JSON.
    ResponseParse(String),
    /// The extraction path matched nothing.
    ExtractionNotFound(String),
    /// The extraction path is not a valid JSONPath expression.
    ExtractionSyntax { path: String, message: String },
    /// IO error wrapper.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigNotFound(path) => write!(f, "Config file '{path}' not found"),
            Error::ConfigParse(msg) => write!(f, "Invalid config file: {msg}"),
            Error::CommandNotFound {
                command,
                config_file,
            } => write!(f, "Command '{command}' not found in {config_file}"),
            Error::MissingRequiredField { command, field } => {
                write!(f, "Command '{command}' is missing required '{field}' field")
            }
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
            Error::Transport(msg) => write!(f, "Network error: {msg}"),
            Error::HttpStatus { status, body } => {
                write!(f, "HTTP error! status: {status}\nResponse: {body}")
            }
            Error::ResponseParse(msg) => write!(f, "Failed to parse response body as JSON: {msg}"),
            Error::ExtractionNotFound(path) => {
                write!(f, "No value found at path '{path}' in response")
            }
            Error::ExtractionSyntax { path, message } => {
                write!(f, "JSONPath error in '{path}': {message}")
            }
            Error::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::ConfigParse(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// A Result type alias for reqlib operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_command_not_found_display() {
        let err = Error::CommandNotFound {
            command: "users".to_string(),
            config_file: "req.yaml".to_string(),
        };
        assert_eq!(format!("{err}"), "Command 'users' not found in req.yaml");
    }

    #[test]
    fn test_error_missing_field_display() {
        let err = Error::MissingRequiredField {
            command: "users".to_string(),
            field: "url".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Command 'users' is missing required 'url' field"
        );
    }

    #[test]
    fn test_error_http_status_display() {
        let err = Error::HttpStatus {
            status: 404,
            body: "not here".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("status: 404"));
        assert!(msg.contains("not here"));
    }

    #[test]
    fn test_error_extraction_not_found_display() {
        let err = Error::ExtractionNotFound("$.missing".to_string());
        assert_eq!(
            format!("{err}"),
            "No value found at path '$.missing' in response"
        );
    }

    #[test]
    fn test_error_io_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(format!("{err}").contains("IO error"));
    }

    #[test]
    fn test_error_source_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_source_other() {
        let err = Error::Transport("connection refused".to_string());
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_yaml() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("a: [b").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
