//! Value objects shared by the procurement aggregates.

use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Money {
    /// Amount in cents (e.g., 1000 = $10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from a dollar value.
    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars * 100,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * quantity as i64,
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// A line the buyer asks suppliers to quote on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Identifier unique within the owning aggregate.
    pub line_id: String,
    pub description: String,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(line_id: impl Into<String>, description: impl Into<String>, quantity: u32) -> Self {
        Self {
            line_id: line_id.into(),
            description: description.into(),
            quantity,
        }
    }
}

/// A priced line on a quote or invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub line_id: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl PricedLine {
    pub fn new(line_id: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        Self {
            line_id: line_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns quantity * unit_price.
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A line a supplier has been ordered to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_id: String,
    pub description: String,
    pub quantity_ordered: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(
        line_id: impl Into<String>,
        description: impl Into<String>,
        quantity_ordered: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            description: description.into(),
            quantity_ordered,
            unit_price,
        }
    }
}

/// Quantity of one vendor-order line carried by a fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentLine {
    pub line_id: String,
    pub quantity: u32,
}

impl FulfillmentLine {
    pub fn new(line_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            line_id: line_id.into(),
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
    }

    #[test]
    fn test_money_sum() {
        let total: Money = [Money::from_cents(100), Money::from_dollars(2)]
            .into_iter()
            .sum();
        assert_eq!(total.cents(), 300);
        assert!(total.is_positive());
        assert!(!Money::zero().is_positive());
    }

    #[test]
    fn test_priced_line_total() {
        let line = PricedLine::new("L1", 3, Money::from_cents(1000));
        assert_eq!(line.total_price().cents(), 3000);
    }
}
