use core::fmt;

/// The error type for parsing of the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// An incoming packet could not be parsed because it was shorter than assumed.
    ///
    /// The packet may be shorter than the minimum length specified, or a length field claims more
    /// than the actual payload. For the compressed TCP headers, this also happens when the flags
    /// announce more variable-length fields than there are bytes.
    Truncated,

    /// An incoming packet had an incorrect checksum and was dropped.
    ///
    /// For compressed TCP headers the checksum is verified over the reconstructed header, so a
    /// desynchronized compression context shows up as this error as well.
    WrongChecksum,

    /// An incoming packet could not be recognized and was dropped.
    ///
    /// E.g. an IPv6 packet with an unexpected next header, or a compressed TCP segment whose
    /// context id does not belong to any socket.
    Unrecognized,

    /// An incoming packet was recognized but was self-contradictory.
    ///
    /// Examples: a TCP packet with a header length below 20 bytes; a compressed header that uses
    /// a field encoding which is not defined for that field.
    Malformed,

    /// Parsing depends on information derived from a non-implemented features.
    Unsupported,
}

/// The result type for the networking stack.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated     => write!(f, "truncated packet"),
            Error::WrongChecksum => write!(f, "checksum error"),
            Error::Unrecognized  => write!(f, "unrecognized packet"),
            Error::Unsupported   => write!(f, "unsupported option"),
            Error::Malformed     => write!(f, "malformed packet"),
        }
    }
}

impl std::error::Error for Error {}
