//! Receivers: TCP line receiver and HTTP multipart/plain-text endpoint,
//! normalizing external input to `hostname\ttag\tpayload`.

pub mod http;
pub mod tcp;
