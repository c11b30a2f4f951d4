//! Test-only crate. See `tests/` for the cross-crate scenarios; the
//! shared harness lives in `tests/helpers/mod.rs`.
