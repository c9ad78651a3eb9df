use std::fmt;

#[derive(Debug)]
pub enum RasterError {
    InvalidConfiguration(String),
    Asset(String),
    Font(String),
    Encode(String),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            RasterError::Asset(message) => write!(f, "asset error: {}", message),
            RasterError::Font(message) => write!(f, "font error: {}", message),
            RasterError::Encode(message) => write!(f, "encode error: {}", message),
            RasterError::Serialization(err) => write!(f, "serialization error: {}", err),
            RasterError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for RasterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RasterError::Serialization(err) => Some(err),
            RasterError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RasterError {
    fn from(value: std::io::Error) -> Self {
        RasterError::Io(value)
    }
}

impl From<serde_json::Error> for RasterError {
    fn from(value: serde_json::Error) -> Self {
        RasterError::Serialization(value)
    }
}
