//! Identity that outlives state changes.

/// Something tracked by its id rather than by its fields.
///
/// A `StockRecord` is the entity here: its product id stays fixed while its
/// quantity is decreased and restored, and two records with equal fields but
/// different ids are different products.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
