use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mesa_core::{DomainError, DomainResult, ProductId, ValueObject};

use crate::mutation::StockMutation;

/// One line of an order: which product, how many, and the unit price at the
/// moment the order was placed.
///
/// Validated once on construction and immutable afterward. The price is a
/// snapshot in minor currency units (e.g. cents); stock operations never
/// look at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LineItemInput")]
pub struct OrderLineItem {
    product_id: ProductId,
    quantity: i64,
    unit_price: u64,
}

impl OrderLineItem {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: u64) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity for product {product_id} must be positive (got {quantity})"
            )));
        }
        Ok(Self {
            product_id,
            quantity,
            unit_price,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    /// Line total in minor units, saturating on overflow.
    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity as u64)
    }
}

impl ValueObject for OrderLineItem {}

/// Untrusted line item as it arrives from an ordering endpoint or admin form.
///
/// Every field is optional so that missing identity is reported as a
/// validation error instead of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemInput {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub unit_price: Option<u64>,
}

impl TryFrom<LineItemInput> for OrderLineItem {
    type Error = DomainError;

    fn try_from(input: LineItemInput) -> Result<Self, Self::Error> {
        let product_id = input
            .product_id
            .ok_or_else(|| DomainError::validation("line item is missing product_id"))?;
        let quantity = input.quantity.ok_or_else(|| {
            DomainError::validation(format!("line item for product {product_id} is missing quantity"))
        })?;
        OrderLineItem::new(product_id, quantity, input.unit_price.unwrap_or(0))
    }
}

/// Requested quantity per product across a set of line items.
///
/// Several lines for the same product are summed, so they are checked and
/// applied as one request. Iteration is in ascending product order, which is
/// also the order stores lock rows in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demand {
    lines: usize,
    by_product: BTreeMap<ProductId, i64>,
}

impl Demand {
    pub fn from_lines(items: &[OrderLineItem]) -> DomainResult<Self> {
        let mut by_product: BTreeMap<ProductId, i64> = BTreeMap::new();
        for item in items {
            let total = by_product.entry(item.product_id()).or_insert(0);
            *total = total.checked_add(item.quantity()).ok_or_else(|| {
                DomainError::validation(format!(
                    "requested quantity for product {} overflows",
                    item.product_id()
                ))
            })?;
        }
        Ok(Self {
            lines: items.len(),
            by_product,
        })
    }

    /// Number of line items the demand was built from.
    pub fn line_count(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.by_product.is_empty()
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.by_product.keys().copied().collect()
    }

    pub fn requested(&self, product_id: &ProductId) -> Option<i64> {
        self.by_product.get(product_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.by_product.iter().map(|(id, qty)| (*id, *qty))
    }

    /// The quantities a recorded mutation actually moved, one entry per
    /// changed product. Restores credit this rather than the order lines, so
    /// products that were untracked or skipped at decrease time stay untouched.
    pub fn from_recorded(mutation: &StockMutation) -> Self {
        Self {
            lines: mutation.changes.len(),
            by_product: mutation
                .changes
                .iter()
                .map(|change| (change.product_id, change.requested))
                .collect(),
        }
    }
}
