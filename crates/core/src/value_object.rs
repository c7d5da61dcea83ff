//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. Line
/// items, shortfalls and low-stock alerts are value objects: two shortfalls
/// for the same product with the same counts are the same shortfall.
///
/// To "modify" a value object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
