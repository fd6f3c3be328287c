//! Strict parser for argon2id hash descriptors.
//!
//! The accepted shape is
//! `$argon2id$v=19$m=<u32>,t=<u8>,p=<u8>$<salt b64>$<digest b64>`.
//! Every field is checked; the parser never returns a partially filled
//! descriptor.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use super::ValidationError;

/// The only algorithm tag accepted.
pub const ALGORITHM_TAG: &str = "argon2id";

/// The only argon2 version accepted.
pub const SUPPORTED_VERSION: u8 = 19;

const FIELD_COUNT: usize = 5;

/// Standard alphabet, padding optional. Descriptors in the wild are
/// usually unpadded but some producers pad.
const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Argon2 cost parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CostParams {
    /// `m`, memory cost in KiB.
    pub memory: u32,
    /// `t`, number of passes.
    pub time: u8,
    /// `p`, degree of parallelism.
    pub parallelism: u8,
}

/// A fully validated descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedDescriptor {
    pub version: u8,
    pub cost: CostParams,
    pub salt: Vec<u8>,
    pub digest: Vec<u8>,
}

impl ParsedDescriptor {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let rest = input.strip_prefix('$').ok_or_else(|| {
            ValidationError::MalformedDescriptor("descriptor must start with '$'".into())
        })?;

        let fields: Vec<&str> = rest.split('$').collect();
        if fields.len() != FIELD_COUNT {
            return Err(ValidationError::MalformedDescriptor(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }

        let (tag, version, cost, salt, digest) =
            (fields[0], fields[1], fields[2], fields[3], fields[4]);

        if tag != ALGORITHM_TAG {
            return Err(ValidationError::UnsupportedAlgorithm(tag.to_string()));
        }

        let version = parse_version(version)?;
        let cost = parse_cost_params(cost)?;
        let salt = decode_b64("salt", salt)?;
        let digest = decode_b64("digest", digest)?;

        Ok(Self {
            version,
            cost,
            salt,
            digest,
        })
    }
}

fn parse_version(field: &str) -> Result<u8, ValidationError> {
    let value = field.strip_prefix("v=").ok_or_else(|| {
        ValidationError::MalformedDescriptor(format!("expected version field, found {field:?}"))
    })?;

    match value.parse::<u8>() {
        Ok(SUPPORTED_VERSION) => Ok(SUPPORTED_VERSION),
        _ => Err(ValidationError::UnsupportedVersion(value.to_string())),
    }
}

fn parse_cost_params(field: &str) -> Result<CostParams, ValidationError> {
    let mut memory = None;
    let mut time = None;
    let mut parallelism = None;

    for pair in field.split(',') {
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            ValidationError::MalformedCostParams(format!("expected key=value, found {pair:?}"))
        })?;

        let duplicate = match name {
            "m" => memory.replace(parse_number::<u32>(name, value)?).is_some(),
            "t" => time.replace(parse_number::<u8>(name, value)?).is_some(),
            "p" => parallelism.replace(parse_number::<u8>(name, value)?).is_some(),
            other => {
                return Err(ValidationError::MalformedCostParams(format!(
                    "unknown parameter {other:?}"
                )));
            }
        };
        if duplicate {
            return Err(ValidationError::MalformedCostParams(format!(
                "parameter {name:?} given twice"
            )));
        }
    }

    match (memory, time, parallelism) {
        (Some(memory), Some(time), Some(parallelism)) => Ok(CostParams {
            memory,
            time,
            parallelism,
        }),
        _ => Err(ValidationError::MalformedCostParams(format!(
            "expected m, t and p in {field:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ValidationError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ValidationError::MalformedCostParams(format!("{name}={value:?}: {e}")))
}

fn decode_b64(field: &'static str, value: &str) -> Result<Vec<u8>, ValidationError> {
    let bytes = LENIENT_B64
        .decode(value)
        .map_err(|e| ValidationError::InvalidEncoding {
            field,
            detail: e.to_string(),
        })?;

    if bytes.is_empty() {
        return Err(ValidationError::InvalidEncoding {
            field,
            detail: "empty".into(),
        });
    }
    Ok(bytes)
}
