use core::fmt;

/// The type of error that occurred while reading or writing an SMF file.
///
/// As a library consumer, detailed errors about what specific part of the MIDI
/// spec was violated are not very useful, so errors are broadly categorized
/// into 2 classes, and specific error info is provided as a non-normative
/// static string.
#[derive(Copy, Clone, Debug)]
pub enum ErrorKind {
    /// Fatal errors while reading the file. It is likely that the input is not
    /// a MIDI file at all, or is severely corrupted, and no data could be
    /// rescued.
    Invalid(&'static str),

    /// The file is corrupted, but in a way the reader knows how to plow
    /// through.
    ///
    /// This kind is only surfaced when the `strict` feature is enabled;
    /// otherwise the reader silently tolerates the corruption.
    Malformed(&'static str),
}

impl ErrorKind {
    /// The informative message on what exact part of the MIDI format was not
    /// respected.
    #[inline]
    pub fn message(&self) -> &'static str {
        match *self {
            ErrorKind::Invalid(msg) => msg,
            ErrorKind::Malformed(msg) => msg,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Invalid(msg) => write!(f, "invalid midi file: {}", msg),
            ErrorKind::Malformed(msg) => write!(f, "malformed midi file: {}", msg),
        }
    }
}

/// Represents an error while parsing or writing an SMF file.
///
/// Wraps an [`ErrorKind`]; in debug builds the chain of context errors is
/// preserved and printed by the `Debug` impl, in release builds only the
/// outermost kind is kept.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<Error>>,
}

impl Error {
    /// Create a new error from its kind.
    #[inline]
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    /// More information about the error itself.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The underlying cause for this error, if any was tracked.
    ///
    /// Chains are only tracked in debug builds; in release this is always
    /// `None`.
    #[inline]
    pub fn source(&self) -> Option<&Error> {
        self.source.as_deref()
    }

    pub(crate) fn chain_ctx(self, ctx: ErrorKind) -> Error {
        Error {
            kind: ctx,
            source: if cfg!(debug_assertions) {
                Some(Box::new(self))
            } else {
                None
            },
        }
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Error {
        Error::new(kind)
    }
}

impl From<quaver_core::InvalidData> for Error {
    #[inline]
    fn from(err: quaver_core::InvalidData) -> Error {
        Error::new(ErrorKind::Invalid(err.message()))
    }
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        let mut maybe_src = self.source();
        while let Some(src) = maybe_src {
            writeln!(f)?;
            write!(f, "  caused by: {}", src.kind())?;
            maybe_src = src.source();
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

macro_rules! err_invalid {
    ($msg:expr) => {
        $crate::ErrorKind::Invalid($msg)
    };
}
macro_rules! err_malformed {
    ($msg:expr) => {
        $crate::ErrorKind::Malformed($msg)
    };
}
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::Error::from($err))
    };
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            bail!($err)
        }
    };
}

pub(crate) trait ResultExt<T> {
    /// Chain a higher-level context error onto a failure.
    fn context(self, ctx: ErrorKind) -> StdResult<T, Error>;
}
impl<T> ResultExt<T> for StdResult<T, Error> {
    #[inline]
    fn context(self, ctx: ErrorKind) -> StdResult<T, Error> {
        self.map_err(|err| err.chain_ctx(ctx))
    }
}
impl<T> ResultExt<T> for StdResult<T, quaver_core::InvalidData> {
    #[inline]
    fn context(self, ctx: ErrorKind) -> StdResult<T, Error> {
        self.map_err(|err| Error::from(err).chain_ctx(ctx))
    }
}

/// The result type used by the SMF reader and writer.
pub type Result<T> = StdResult<T, Error>;
pub(crate) use core::result::Result as StdResult;
