//! Type validators.
//!
//! Every validator is a plain function (or an [`IdAllocator`] method) that either
//! returns the cast value or fails with the first violation it finds. Nothing here
//! touches storage directly: id-space facts arrive through [`IdAllocators`], which
//! snapshots them from the store once per operation.

pub mod id;
pub mod reference;
pub mod scalar;

pub use id::{IdAllocator, IdAllocators};
pub use reference::{is_reference_shape, validate_reference};
pub use scalar::{format_date, parse_date, validate_array_rules, validate_scalar};
