use chrono::Timelike;
use hearth_core::{CoreError, OrderStatus};
use hearth_shared::money::{apply_rate, round2};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::service::{option_key, OptionKind, SelectedOption, ServiceDefinition};

/// Rates and fees used by the calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Platform's cut of the order total, `0 <= rate < 1`.
    pub commission_rate: Decimal,

    /// Flat fee added when the booking falls in the peak window.
    pub surge_fee: Decimal,

    /// First local hour of the peak window (inclusive).
    pub peak_start_hour: u32,

    /// Last local hour of the peak window (inclusive).
    pub peak_end_hour: u32,

    /// Fee rate while no provider is assigned.
    pub cancellation_fee_before_assignment: Decimal,

    /// Fee rate once a provider is assigned or has accepted.
    pub cancellation_fee_after_assignment: Decimal,

    /// Fee rate once work has started. 1.0 means no refund.
    pub cancellation_fee_after_start: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            commission_rate: Decimal::new(10, 2),
            surge_fee: Decimal::new(500, 2),
            peak_start_hour: 17,
            peak_end_hour: 21,
            cancellation_fee_before_assignment: Decimal::new(10, 2),
            cancellation_fee_after_assignment: Decimal::new(50, 2),
            cancellation_fee_after_start: Decimal::ONE,
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(PricingError::InvalidConfig("commission_rate must be in [0, 1)".into()));
        }
        if self.peak_start_hour > 23 || self.peak_end_hour > 23 {
            return Err(PricingError::InvalidConfig("peak hours must be in 0..=23".into()));
        }
        let tiers = [
            self.cancellation_fee_before_assignment,
            self.cancellation_fee_after_assignment,
            self.cancellation_fee_after_start,
        ];
        if tiers.iter().any(|r| *r < Decimal::ZERO || *r > Decimal::ONE) {
            return Err(PricingError::InvalidConfig("cancellation rates must be in [0, 1]".into()));
        }
        if tiers.windows(2).any(|w| w[0] > w[1]) {
            return Err(PricingError::InvalidConfig(
                "cancellation rates must not decrease across lifecycle stages".into(),
            ));
        }
        Ok(())
    }
}

/// Price, duration and normalized answers for one order line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemQuote {
    pub price: Decimal,
    pub duration_minutes: i32,
    pub options: BTreeMap<String, serde_json::Value>,
}

/// Customer-facing monetary breakdown of an order.
///
/// `total = subtotal + surge_fee + platform_commission - discount` and
/// `platform_commission = round2(total * commission_rate)` both hold exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub surge_fee: Decimal,
    pub platform_commission: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CancellationQuote {
    pub fee: Decimal,
    pub refund: Decimal,
    pub fee_rate: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("invalid option ID: {0}")]
    UnknownOption(u32),

    #[error("invalid choice ID {choice} for option {option}")]
    UnknownChoice { option: u32, choice: u32 },

    #[error("required option '{0}' not provided")]
    MissingRequiredOption(String),

    #[error("order cannot be cancelled in '{0}' status")]
    NotCancellable(OrderStatus),

    #[error("discount {discount} exceeds chargeable amount {chargeable}")]
    DiscountTooLarge { discount: Decimal, chargeable: Decimal },

    #[error("invalid pricing configuration: {0}")]
    InvalidConfig(String),
}

impl From<PricingError> for CoreError {
    fn from(err: PricingError) -> Self {
        CoreError::ValidationError(err.to_string())
    }
}

/// Pure pricing, fee and refund arithmetic.
#[derive(Debug, Clone)]
pub struct PricingCalculator {
    config: PricingConfig,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}

impl PricingCalculator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Base price/duration plus the modifiers of every selected choice.
    /// Free-text and quantity answers are stored as given.
    pub fn compute_item_price(
        &self,
        service: &ServiceDefinition,
        selected: &[SelectedOption],
    ) -> Result<ItemQuote, PricingError> {
        let mut price = service.base_price;
        let mut duration = service.base_duration_minutes;
        let mut options = BTreeMap::new();

        for selection in selected {
            let option = service
                .option(selection.option_id)
                .ok_or(PricingError::UnknownOption(selection.option_id))?;

            if let Some(choice_id) = selection.choice_id {
                let choice = option.choice(choice_id).ok_or(PricingError::UnknownChoice {
                    option: option.id,
                    choice: choice_id,
                })?;
                price += choice.price_modifier;
                duration += choice.duration_modifier_minutes;
                options.insert(option.key(), serde_json::Value::String(choice.label.clone()));
            } else if let Some(value) = &selection.value {
                if option.kind == OptionKind::Choice && !option.choices.is_empty() {
                    // A choice option answered with free text bypasses the
                    // modifiers; treat it as unanswered.
                    continue;
                }
                options.insert(option.key(), value.clone());
            }
        }

        if let Some(missing) = service
            .options
            .iter()
            .find(|o| o.is_required && !options.contains_key(&option_key(o.id)))
        {
            return Err(PricingError::MissingRequiredOption(missing.name.clone()));
        }

        Ok(ItemQuote { price: round2(price), duration_minutes: duration, options })
    }

    /// Flat surge when the booking's local hour is inside the peak window.
    // TODO: location-based surge zones once the provider directory exposes them.
    pub fn compute_surge_fee<T: Timelike>(&self, local_time: &T) -> Decimal {
        let hour = local_time.hour();
        let (start, end) = (self.config.peak_start_hour, self.config.peak_end_hour);
        let in_window = if start <= end {
            hour >= start && hour <= end
        } else {
            // Window wraps midnight, e.g. 22..=2.
            hour >= start || hour <= end
        };
        if in_window {
            round2(self.config.surge_fee)
        } else {
            Decimal::ZERO
        }
    }

    pub fn compute_platform_commission(&self, total: Decimal) -> Decimal {
        apply_rate(total, self.config.commission_rate)
    }

    pub fn compute_provider_payout(&self, total: Decimal) -> Decimal {
        round2(total) - self.compute_platform_commission(total)
    }

    /// Build the order breakdown so that the commission is exactly the
    /// rounded commission of the resulting total.
    pub fn compute_breakdown(
        &self,
        subtotal: Decimal,
        surge_fee: Decimal,
        discount: Decimal,
    ) -> Result<PriceBreakdown, PricingError> {
        let subtotal = round2(subtotal);
        let surge_fee = round2(surge_fee);
        let discount = round2(discount);
        let chargeable = subtotal + surge_fee;
        if discount < Decimal::ZERO || discount > chargeable {
            return Err(PricingError::DiscountTooLarge { discount, chargeable });
        }

        let base = chargeable - discount;
        let platform_commission = self.commission_on_top_of(base);

        Ok(PriceBreakdown {
            subtotal,
            surge_fee,
            platform_commission,
            discount,
            total: base + platform_commission,
        })
    }

    /// Smallest-step search for `c == round2((base + c) * rate)`.
    ///
    /// `round2((base + c) * rate) - c` moves by at most one cent per cent of
    /// `c`, so walking from the closed-form estimate always lands on a root.
    fn commission_on_top_of(&self, base: Decimal) -> Decimal {
        let rate = self.config.commission_rate;
        if rate <= Decimal::ZERO || base <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let cent = Decimal::new(1, 2);
        let mut commission = round2(base * rate / (Decimal::ONE - rate));
        loop {
            let implied = apply_rate(base + commission, rate);
            if implied == commission {
                return commission;
            }
            if implied > commission {
                commission += cent;
            } else {
                commission -= cent;
            }
        }
    }

    /// Fee and refund for cancelling in `status`. Terminal statuses are not
    /// cancellable and return an error instead of a fee.
    pub fn compute_cancellation_fee(
        &self,
        status: OrderStatus,
        total: Decimal,
    ) -> Result<CancellationQuote, PricingError> {
        let fee_rate = match status {
            OrderStatus::Pending | OrderStatus::SearchingProvider => {
                self.config.cancellation_fee_before_assignment
            }
            OrderStatus::Assigned | OrderStatus::Accepted => {
                self.config.cancellation_fee_after_assignment
            }
            OrderStatus::InProgress => self.config.cancellation_fee_after_start,
            OrderStatus::Completed
            | OrderStatus::Cancelled
            | OrderStatus::Expired
            | OrderStatus::NoProviderAvailable => {
                return Err(PricingError::NotCancellable(status));
            }
        };

        let total = round2(total);
        let fee = apply_rate(total, fee_rate);
        Ok(CancellationQuote { fee, refund: total - fee, fee_rate })
    }

    /// Fee/refund split when an admin names the refund explicitly.
    pub fn split_explicit_refund(
        &self,
        total: Decimal,
        refund: Decimal,
    ) -> Result<CancellationQuote, CoreError> {
        let total = round2(total);
        let refund = round2(refund);
        if refund < Decimal::ZERO {
            return Err(CoreError::validation("Refund amount cannot be negative"));
        }
        if refund > total {
            return Err(CoreError::validation("Refund amount cannot exceed order total"));
        }
        let fee = total - refund;
        let fee_rate = if total.is_zero() { Decimal::ZERO } else { fee / total };
        Ok(CancellationQuote { fee, refund, fee_rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{OptionChoice, ServiceOption};
    use chrono::NaiveTime;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn deep_clean() -> ServiceDefinition {
        ServiceDefinition {
            id: Uuid::new_v4(),
            title: "Deep Cleaning".to_string(),
            category_slug: "cleaning".to_string(),
            base_price: dec!(40.00),
            base_duration_minutes: 120,
            is_active: true,
            options: vec![
                ServiceOption {
                    id: 1,
                    name: "Bedrooms".to_string(),
                    kind: OptionKind::Choice,
                    is_required: true,
                    choices: vec![
                        OptionChoice {
                            id: 10,
                            label: "1 bedroom".to_string(),
                            price_modifier: dec!(0),
                            duration_modifier_minutes: 0,
                        },
                        OptionChoice {
                            id: 11,
                            label: "3 bedrooms".to_string(),
                            price_modifier: dec!(25.50),
                            duration_modifier_minutes: 60,
                        },
                    ],
                },
                ServiceOption {
                    id: 2,
                    name: "Gate code".to_string(),
                    kind: OptionKind::Text,
                    is_required: false,
                    choices: vec![],
                },
            ],
        }
    }

    fn pick(option_id: u32, choice_id: u32) -> SelectedOption {
        SelectedOption { option_id, choice_id: Some(choice_id), value: None }
    }

    #[test]
    fn test_item_price_applies_choice_modifiers() {
        let calc = PricingCalculator::default();
        let quote = calc
            .compute_item_price(
                &deep_clean(),
                &[
                    pick(1, 11),
                    SelectedOption { option_id: 2, choice_id: None, value: Some(serde_json::json!("4411")) },
                ],
            )
            .unwrap();

        assert_eq!(quote.price, dec!(65.50));
        assert_eq!(quote.duration_minutes, 180);
        assert_eq!(quote.options["option_1"], serde_json::json!("3 bedrooms"));
        assert_eq!(quote.options["option_2"], serde_json::json!("4411"));
    }

    #[test]
    fn test_item_price_rejects_unknown_ids_and_missing_required() {
        let calc = PricingCalculator::default();
        let service = deep_clean();

        assert!(matches!(
            calc.compute_item_price(&service, &[pick(9, 10)]),
            Err(PricingError::UnknownOption(9))
        ));
        assert!(matches!(
            calc.compute_item_price(&service, &[pick(1, 99)]),
            Err(PricingError::UnknownChoice { option: 1, choice: 99 })
        ));
        assert!(matches!(
            calc.compute_item_price(&service, &[]),
            Err(PricingError::MissingRequiredOption(name)) if name == "Bedrooms"
        ));
    }

    #[test]
    fn test_surge_fee_peak_window() {
        let calc = PricingCalculator::default();
        let at = |h| NaiveTime::from_hms_opt(h, 30, 0).unwrap();
        assert_eq!(calc.compute_surge_fee(&at(16)), dec!(0));
        assert_eq!(calc.compute_surge_fee(&at(17)), dec!(5.00));
        assert_eq!(calc.compute_surge_fee(&at(21)), dec!(5.00));
        assert_eq!(calc.compute_surge_fee(&at(22)), dec!(0));
    }

    #[test]
    fn test_commission_and_payout_for_hundred() {
        let calc = PricingCalculator::default();
        assert_eq!(calc.compute_platform_commission(dec!(100)), dec!(10.00));
        assert_eq!(calc.compute_provider_payout(dec!(100)), dec!(90.00));
    }

    #[test]
    fn test_breakdown_invariants_hold_exactly() {
        let calc = PricingCalculator::default();
        for (subtotal, surge) in [
            (dec!(90), dec!(0)),
            (dec!(10), dec!(0)),
            (dec!(65.50), dec!(5)),
            (dec!(0.07), dec!(0)),
            (dec!(1234.56), dec!(5)),
            (dec!(33.33), dec!(0)),
        ] {
            let b = calc.compute_breakdown(subtotal, surge, dec!(0)).unwrap();
            assert_eq!(b.total, b.subtotal + b.surge_fee + b.platform_commission - b.discount);
            assert_eq!(b.platform_commission, calc.compute_platform_commission(b.total));
            assert_eq!(b.total, round2(b.total));
        }

        let b = calc.compute_breakdown(dec!(90), dec!(0), dec!(0)).unwrap();
        assert_eq!(b.total, dec!(100.00));
        assert_eq!(b.platform_commission, dec!(10.00));
    }

    #[test]
    fn test_breakdown_rejects_oversized_discount() {
        let calc = PricingCalculator::default();
        assert!(calc.compute_breakdown(dec!(10), dec!(0), dec!(11)).is_err());
    }

    #[test]
    fn test_cancellation_tiers() {
        let calc = PricingCalculator::default();

        let assigned = calc.compute_cancellation_fee(OrderStatus::Assigned, dec!(50)).unwrap();
        assert_eq!(assigned.fee, dec!(25.00));
        assert_eq!(assigned.refund, dec!(25.00));

        let pending = calc.compute_cancellation_fee(OrderStatus::Pending, dec!(50)).unwrap();
        let started = calc.compute_cancellation_fee(OrderStatus::InProgress, dec!(50)).unwrap();
        assert!(pending.fee <= assigned.fee);
        assert!(assigned.fee <= started.fee);
        assert_eq!(started.fee, dec!(50));
        assert_eq!(started.refund, dec!(0));

        for status in [OrderStatus::Completed, OrderStatus::Cancelled] {
            assert!(matches!(
                calc.compute_cancellation_fee(status, dec!(50)),
                Err(PricingError::NotCancellable(_))
            ));
        }
    }

    #[test]
    fn test_explicit_refund_split() {
        let calc = PricingCalculator::default();
        let quote = calc.split_explicit_refund(dec!(80), dec!(60)).unwrap();
        assert_eq!(quote.fee, dec!(20));
        assert!(calc.split_explicit_refund(dec!(80), dec!(80.01)).is_err());
        assert!(calc.split_explicit_refund(dec!(80), dec!(-1)).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(PricingConfig::default().validate().is_ok());
        let bad = PricingConfig {
            cancellation_fee_after_assignment: dec!(0.05),
            ..PricingConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
