//! Stock error taxonomy.

use thiserror::Error;

use mesa_core::{DomainError, OrderId, ProductId};

use crate::mutation::{Shortfall, SkipReason};

/// Failure of an availability check or a stock mutation.
///
/// Only `System` is worth retrying; every other variant is a deterministic
/// answer about the request itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// One or more products cannot cover the requested quantity. Carries every
    /// shortfall, not just the first.
    #[error("insufficient stock: {}", describe_shortfalls(.0))]
    InsufficientStock(Vec<Shortfall>),

    /// A referenced product is missing or inactive and the policy rejects it.
    #[error("product {product_id} cannot be resolved: {reason}")]
    ProductUnresolvable {
        product_id: ProductId,
        reason: SkipReason,
    },

    /// Malformed request, rejected before any transaction begins.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A restore was requested for an order whose stock was never decreased.
    #[error("no stock decrease recorded for order {order_id}")]
    NotDecreased { order_id: OrderId },

    /// The store was unreachable, timed out or failed to commit. Rolled back.
    #[error("system error: {0}")]
    System(String),
}

impl StockError {
    pub fn system(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::System(_))
    }

    pub fn shortfalls(&self) -> Option<&[Shortfall]> {
        match self {
            StockError::InsufficientStock(s) => Some(s),
            _ => None,
        }
    }

    /// Stable snake_case name of the error class, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StockError::InsufficientStock(_) => "insufficient_stock",
            StockError::ProductUnresolvable { .. } => "product_unresolvable",
            StockError::Validation(_) => "validation_error",
            StockError::NotDecreased { .. } => "not_decreased",
            StockError::System(_) => "system_error",
        }
    }
}

impl From<DomainError> for StockError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvalidId(msg)
            | DomainError::InvariantViolation(msg) => StockError::Validation(msg),
            DomainError::NotFound => StockError::Validation("not found".to_string()),
            DomainError::Conflict(msg) => StockError::System(msg),
        }
    }
}

pub(crate) fn describe_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_system_errors_are_retryable() {
        assert!(StockError::system("pool closed").is_retryable());
        assert!(!StockError::InsufficientStock(vec![]).is_retryable());
        assert!(!StockError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn insufficient_stock_message_lists_every_product() {
        let err = StockError::InsufficientStock(vec![
            Shortfall {
                product_id: ProductId::new(),
                name: "Tacos".into(),
                requested: 5,
                available: 4,
            },
            Shortfall {
                product_id: ProductId::new(),
                name: "Flan".into(),
                requested: 2,
                available: 0,
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("Tacos"));
        assert!(msg.contains("requested 5, available 4"));
        assert!(msg.contains("Flan"));
        assert_eq!(err.kind(), "insufficient_stock");
    }
}
