use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::Location;

/// Why a Brotli stream was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bit reader ran out of input in the middle of a field.
    EndOfStream,
    /// A prefix code description violates the format: Kraft inequality,
    /// out-of-range or duplicate symbols, or an unterminated length run.
    InvalidPrefixCode,
    /// A copy distance is zero, negative after short-code resolution, or
    /// reaches beyond the sliding window / the output produced so far.
    InvalidDistance,
    /// A context map run overflows the map or names a missing tree.
    InvalidContextMap,
    /// A bit the format requires to be zero (or nonzero) was not.
    ReservedBitSet,
    /// The input ended cleanly but the last meta-block never arrived.
    TruncatedStream,
    /// An insert or copy run overshoots the meta-block length.
    InvalidCommand,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::EndOfStream => "end of stream",
            ErrorKind::InvalidPrefixCode => "invalid prefix code",
            ErrorKind::InvalidDistance => "invalid distance",
            ErrorKind::InvalidContextMap => "invalid context map",
            ErrorKind::ReservedBitSet => "reserved bit set",
            ErrorKind::TruncatedStream => "truncated stream",
            ErrorKind::InvalidCommand => "invalid command",
        }
    }
}

#[derive(Debug)]
pub struct BrotliError {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub location: &'static Location<'static>,
}

pub type Res<T> = Result<T, BrotliError>;

impl BrotliError {
    #[track_caller]
    pub(crate) fn new(kind: ErrorKind, message: String) -> Self {
        BrotliError {
            kind,
            message: Some(message),
            context: None,
            location: Location::caller(),
        }
    }
}

impl Error for BrotliError {}

impl Display for BrotliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind.as_str(), self.location)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?
        }
        Ok(())
    }
}

impl From<BrotliError> for std::io::Error {
    fn from(value: BrotliError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, value)
    }
}

/// Implemented by the structs that drive decoding so that errors raised
/// through them describe where in the stream the decoder was.
pub(crate) trait ErrorContext {
    fn describe(&self) -> Option<String> {
        None
    }

    #[track_caller]
    fn raise<T>(&self, kind: ErrorKind, msg: String) -> Res<T> {
        Err(BrotliError {
            kind,
            message: Some(msg),
            context: self.describe(),
            location: Location::caller(),
        })
    }

    #[track_caller]
    fn check(&self, v: bool, kind: ErrorKind, msg: &str) -> Res<()> {
        if v {
            Ok(())
        } else {
            self.raise(kind, msg.into())
        }
    }

    /// Attach this context to an error raised lower down.
    fn at<T>(&self, r: Res<T>) -> Res<T> {
        r.map_err(|mut e| {
            if e.context.is_none() {
                e.context = self.describe();
            }
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx;

    impl ErrorContext for Ctx {
        fn describe(&self) -> Option<String> {
            Some("bit 42".into())
        }
    }

    #[test_log::test]
    fn error_carries_kind_and_context() {
        let err = Ctx
            .raise::<()>(ErrorKind::InvalidDistance, "distance 9 > window 8".into())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidDistance);
        let text = err.to_string();
        assert!(text.contains("invalid distance"), "{}", text);
        assert!(text.contains("bit 42"), "{}", text);
        assert!(text.contains("distance 9 > window 8"), "{}", text);
    }

    #[test_log::test]
    fn check_passes_through_on_success() {
        assert!(Ctx.check(true, ErrorKind::ReservedBitSet, "reserved").is_ok());
        let err = Ctx
            .check(false, ErrorKind::ReservedBitSet, "reserved")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservedBitSet);
    }
}
