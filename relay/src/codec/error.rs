use std::fmt;

/// Reasons a record is rejected by the codec.
///
/// Every variant is permanent: the record is dropped and never resubmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Descriptor does not have the expected `$`-separated shape.
    MalformedDescriptor(String),
    /// Algorithm tag is not the supported one.
    UnsupportedAlgorithm(String),
    /// Version parameter is not the supported one.
    UnsupportedVersion(String),
    /// Cost parameter list could not be parsed.
    MalformedCostParams(String),
    /// A binary field failed to decode.
    InvalidEncoding { field: &'static str, detail: String },
    /// Key material is longer than the accepted bound.
    OversizedKey { len: usize },
    /// Key material is shorter than the fixed key width.
    KeyTooShort { len: usize },
    /// Account string is not a valid address.
    InvalidAccount(String),
}

impl ValidationError {
    /// Stable snake_case label for logs and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MalformedDescriptor(_) => "malformed_descriptor",
            ValidationError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            ValidationError::UnsupportedVersion(_) => "unsupported_version",
            ValidationError::MalformedCostParams(_) => "malformed_cost_params",
            ValidationError::InvalidEncoding { .. } => "invalid_encoding",
            ValidationError::OversizedKey { .. } => "oversized_key",
            ValidationError::KeyTooShort { .. } => "key_too_short",
            ValidationError::InvalidAccount(_) => "invalid_account",
        }
    }

    /// All reason labels, used to pre-register metric series.
    pub const REASONS: [&'static str; 8] = [
        "malformed_descriptor",
        "unsupported_algorithm",
        "unsupported_version",
        "malformed_cost_params",
        "invalid_encoding",
        "oversized_key",
        "key_too_short",
        "invalid_account",
    ];
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MalformedDescriptor(msg) => write!(f, "malformed descriptor: {msg}"),
            ValidationError::UnsupportedAlgorithm(tag) => {
                write!(f, "unsupported algorithm: {tag:?}")
            }
            ValidationError::UnsupportedVersion(v) => write!(f, "unsupported version: {v:?}"),
            ValidationError::MalformedCostParams(msg) => {
                write!(f, "malformed cost params: {msg}")
            }
            ValidationError::InvalidEncoding { field, detail } => {
                write!(f, "invalid {field} encoding: {detail}")
            }
            ValidationError::OversizedKey { len } => {
                write!(f, "key material too long: {len} bytes")
            }
            ValidationError::KeyTooShort { len } => {
                write!(f, "key material too short: {len} bytes")
            }
            ValidationError::InvalidAccount(msg) => write!(f, "invalid account: {msg}"),
        }
    }
}

impl std::error::Error for ValidationError {}
