use std::fmt::Display;

/// StrataDB errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// An I/O failure, tagged with the operation that failed
    /// (open, read, write, sync, unlink, mkdir).
    Io { op: &'static str, msg: String },
    /// Malformed on-disk data, tagged with the component that failed to
    /// decode. Fatal for the affected file.
    Decode { component: &'static str, msg: String },
    /// A key or value exceeding its size bound, rejected at the API
    /// boundary before any state change.
    Capacity(String),
    /// Invalid user input.
    InvalidInput(String),
}

impl Error {
    pub fn io(op: &'static str, err: impl Display) -> Self {
        Error::Io {
            op,
            msg: err.to_string(),
        }
    }

    pub fn decode(component: &'static str, err: impl Display) -> Self {
        Error::Decode {
            component,
            msg: err.to_string(),
        }
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io { op, msg } => write!(f, "io error during {op}: {msg}"),
            Error::Decode { component, msg } => write!(f, "decode error in {component}: {msg}"),
            Error::Capacity(msg) => write!(f, "capacity exceeded: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io("io", err)
    }
}

/// A StrataDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_tags() {
        let err = Error::io("open", "no such file");
        assert_eq!(err.to_string(), "io error during open: no such file");

        let err = Error::decode("footer", "short read");
        assert_eq!(err.to_string(), "decode error in footer: short read");
    }
}
