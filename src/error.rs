use std::{error, fmt, result};

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::{err_at, Error};
///
/// err_at!(InvalidFormat, msg: "bad magic {}", magic)
/// err_at!(IOError, fd.read(&mut buf))
/// err_at!(IOError, fd.read(&mut buf), "while reading {:?}", loc)
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the
/// `file!():line!()` of where the error happened, and a message.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Internal invariant broken, typically a bug in this library.
    Fatal(String, String),
    /// Error from the underlying file-system or OS call.
    IOError(String, String),
    /// Archive bytes are malformed or mutually inconsistent.
    InvalidFormat(String, String),
    /// Bad argument supplied by the caller.
    InvalidInput(String, String),
    /// Operation attempted on the wrong dirent variant, like asking
    /// item data from a redirect.
    InvalidType(String, String),
    /// Lookup by path, title or metadata-key found no match.
    NotFound(String, String),
    /// Numeric index exceeds the corresponding table size.
    OutOfRange(String, String),
    /// Creator rejected an entry, duplicate path, oversize string etc..
    InvalidEntry(String, String),
    /// A content provider disagreed with its declared size.
    Incoherent(String, String),
    /// Creator could not acquire a resource, like the temporary file.
    ResourceFail(String, String),
    /// Inter-thread communication failure.
    IPCFail(String, String),
    /// Thread spawn/join failure.
    ThreadFail(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, m) => write!(f, "{} Fatal: {}", p, m),
            IOError(p, m) => write!(f, "{} IOError: {}", p, m),
            InvalidFormat(p, m) => write!(f, "{} InvalidFormat: {}", p, m),
            InvalidInput(p, m) => write!(f, "{} InvalidInput: {}", p, m),
            InvalidType(p, m) => write!(f, "{} InvalidType: {}", p, m),
            NotFound(p, m) => write!(f, "{} NotFound: {}", p, m),
            OutOfRange(p, m) => write!(f, "{} OutOfRange: {}", p, m),
            InvalidEntry(p, m) => write!(f, "{} InvalidEntry: {}", p, m),
            Incoherent(p, m) => write!(f, "{} Incoherent: {}", p, m),
            ResourceFail(p, m) => write!(f, "{} ResourceFail: {}", p, m),
            IPCFail(p, m) => write!(f, "{} IPCFail: {}", p, m),
            ThreadFail(p, m) => write!(f, "{} ThreadFail: {}", p, m),
        }
    }
}

impl error::Error for Error {}

impl Error {
    /// Check whether this error is a `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_, _))
    }

    /// Check whether this error is an `OutOfRange` variant.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Error::OutOfRange(_, _))
    }
}
