//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. In this
/// domain they carry normalization rules (a `LicenseNumber` is always trimmed
/// and upper-cased), so two values that print the same are the same value.
///
/// ```ignore
/// let a = LicenseNumber::parse(" 403r-00001 ")?;
/// let b = LicenseNumber::parse("403R-00001")?;
/// assert_eq!(a, b);
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
