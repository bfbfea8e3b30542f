// handlers/mod.rs - built-in API versions
//
// Each version is a value implementing `server::ApiVersion`; `main.rs`
// registers it under a version name and the server composer roots its
// routes at `/<name>/...`.
pub mod v1;

pub use v1::V1;
