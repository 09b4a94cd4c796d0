//! Transform dispatch: turns a config-level function signature into a
//! runnable [`Callable`], validating its parameters once at startup
//! into a validated, callable transform.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use super::functions;

/// One `{field_name: {function_name: params}}` entry straight out of YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct TransformSpec(HashMap<String, serde_yaml::Value>);

#[derive(Debug, Error)]
pub enum TransformConfigError {
    #[error("function signature must have exactly one key, got {0}")]
    NotExactlyOneKey(usize),
    #[error("unknown function name: {0}")]
    UnknownFunction(String),
    #[error("{function} expects an empty value, got {value:?} instead")]
    ExpectedEmpty { function: &'static str, value: String },
    #[error("{function} expects a positive integer value, got {value:?} instead")]
    ExpectedPositiveInt { function: &'static str, value: String },
    #[error("splitAndStore params invalid: {0}")]
    SplitAndStore(#[source] serde_yaml::Error),
}

impl TransformSpec {
    fn signature(&self) -> Result<(&str, &serde_yaml::Value), TransformConfigError> {
        if self.0.len() != 1 {
            return Err(TransformConfigError::NotExactlyOneKey(self.0.len()));
        }
        let (name, params) = self.0.iter().next().expect("checked len == 1 above");
        Ok((name.as_str(), params))
    }

    /// Validate this spec's parameters without keeping the result,
    /// surfacing config mistakes at load time rather than first use.
    pub fn validate(&self) -> Result<(), TransformConfigError> {
        self.build().map(|_| ())
    }

    /// Parse and validate this spec into a runnable [`Callable`].
    pub fn build(&self) -> Result<Callable, TransformConfigError> {
        let (name, params) = self.signature()?;
        match name {
            "ipToUint32" => {
                expect_empty("ipToUint32", params)?;
                Ok(Callable::IpToUint32)
            }
            "toArray" => {
                expect_empty("toArray", params)?;
                Ok(Callable::ToArray)
            }
            "limitMaxLength" => {
                let max_length = expect_positive_int("limitMaxLength", params)?;
                Ok(Callable::LimitMaxLength { max_length })
            }
            "splitAndStore" => {
                #[derive(Deserialize)]
                struct Params {
                    delimiter: String,
                    store_to: HashMap<String, usize>,
                }
                let parsed: Params = serde_yaml::from_value(params.clone())
                    .map_err(TransformConfigError::SplitAndStore)?;
                Ok(Callable::SplitAndStore {
                    delimiter: parsed.delimiter,
                    store_to: parsed.store_to,
                })
            }
            "calculateSHA1" => {
                #[derive(Deserialize, Default)]
                struct Params {
                    store_to: Option<String>,
                }
                let parsed: Params = if params.is_null() {
                    Params::default()
                } else {
                    serde_yaml::from_value(params.clone())
                        .map_err(TransformConfigError::SplitAndStore)?
                };
                Ok(Callable::CalculateSha1 {
                    store_to: parsed.store_to,
                })
            }
            other => Err(TransformConfigError::UnknownFunction(other.to_string())),
        }
    }
}

fn expect_empty(function: &'static str, value: &serde_yaml::Value) -> Result<(), TransformConfigError> {
    match value {
        serde_yaml::Value::Null => Ok(()),
        serde_yaml::Value::String(s) if s.is_empty() => Ok(()),
        other => Err(TransformConfigError::ExpectedEmpty {
            function,
            value: format!("{other:?}"),
        }),
    }
}

fn expect_positive_int(
    function: &'static str,
    value: &serde_yaml::Value,
) -> Result<i64, TransformConfigError> {
    match value.as_i64() {
        Some(n) if n > 0 => Ok(n),
        _ => Err(TransformConfigError::ExpectedPositiveInt {
            function,
            value: format!("{value:?}"),
        }),
    }
}

/// One value returned by a [`Callable`] invocation: bytes to splice
/// in, and which field to splice them into (the source field, if
/// `dst_field` is `None`).
pub struct PartialResult {
    pub value: Vec<u8>,
    pub dst_field: Option<String>,
}

/// A validated, runnable transform function.
#[derive(Debug, Clone)]
pub enum Callable {
    IpToUint32,
    LimitMaxLength { max_length: i64 },
    ToArray,
    SplitAndStore {
        delimiter: String,
        store_to: HashMap<String, usize>,
    },
    CalculateSha1 { store_to: Option<String> },
}

impl Callable {
    pub fn call(&self, value: &str) -> Vec<PartialResult> {
        match self {
            Callable::IpToUint32 => vec![PartialResult {
                value: functions::ip_to_uint32(value),
                dst_field: None,
            }],
            Callable::ToArray => vec![PartialResult {
                value: functions::to_array(value),
                dst_field: None,
            }],
            Callable::LimitMaxLength { max_length } => vec![PartialResult {
                value: functions::limit_max_length(value, *max_length),
                dst_field: None,
            }],
            Callable::SplitAndStore {
                delimiter,
                store_to,
            } => functions::split_and_store(value, delimiter, store_to)
                .into_iter()
                .map(|(field, bytes)| PartialResult {
                    value: bytes,
                    dst_field: Some(field),
                })
                .collect(),
            Callable::CalculateSha1 { store_to } => vec![PartialResult {
                value: functions::calculate_sha1(value),
                dst_field: store_to.clone(),
            }],
        }
    }
}

/// A `(source_field, Callable)` pair, the unit the Converters iterate over.
#[derive(Debug, Clone)]
pub struct Transformer {
    pub field_name_src: String,
    pub function: Callable,
}

/// Build the ordered transform list for one collected-log entry.
pub fn build_transformers(
    map: &HashMap<String, TransformSpec>,
) -> Result<Vec<Transformer>, TransformConfigError> {
    let mut transformers = Vec::with_capacity(map.len());
    for (field_name_src, spec) in map {
        transformers.push(Transformer {
            field_name_src: field_name_src.clone(),
            function: spec.build()?,
        });
    }
    Ok(transformers)
}
