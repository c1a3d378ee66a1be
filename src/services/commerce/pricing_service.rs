use crate::errors::ServiceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Turns cart lines into the amount the gateway charges.
///
/// All arithmetic stays in `Decimal`. Rounding to minor units happens once,
/// on the total, so the charged amount never drifts from the sum shown to
/// the buyer.
#[derive(Debug, Clone, Copy)]
pub struct PricingService {
    minor_unit_exponent: u32,
}

impl Default for PricingService {
    fn default() -> Self {
        Self::new(2)
    }
}

impl PricingService {
    pub fn new(minor_unit_exponent: u32) -> Self {
        Self {
            minor_unit_exponent,
        }
    }

    pub fn minor_unit_exponent(&self) -> u32 {
        self.minor_unit_exponent
    }

    /// Sale price when present, otherwise list price.
    pub fn effective_unit_price(price: Decimal, discounted_price: Option<Decimal>) -> Decimal {
        discounted_price.unwrap_or(price)
    }

    pub fn line_total(unit_price: Decimal, quantity: i32) -> Result<Decimal, ServiceError> {
        unit_price
            .checked_mul(Decimal::from(quantity))
            .ok_or_else(|| ServiceError::ValidationError("line total overflows".to_string()))
    }

    /// Σ unit price × quantity over `(unit_price, quantity)` pairs.
    pub fn subtotal<I>(lines: I) -> Result<Decimal, ServiceError>
    where
        I: IntoIterator<Item = (Decimal, i32)>,
    {
        lines
            .into_iter()
            .try_fold(Decimal::ZERO, |acc, (price, quantity)| {
                let line = Self::line_total(price, quantity)?;
                acc.checked_add(line)
                    .ok_or_else(|| ServiceError::ValidationError("cart total overflows".to_string()))
            })
    }

    /// Major units to the gateway's integer minor units, half-up.
    pub fn to_minor_units(&self, amount: Decimal) -> Result<i64, ServiceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ServiceError::ValidationError(format!(
                "amount must not be negative: {}",
                amount
            )));
        }

        let scale = Decimal::from(10i64.pow(self.minor_unit_exponent));
        amount
            .checked_mul(scale)
            .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|rounded| rounded.to_i64())
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "amount {} cannot be expressed in minor units",
                    amount
                ))
            })
    }

    /// Gateway minor units back to major units.
    pub fn from_minor_units(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.minor_unit_exponent)
    }
}
