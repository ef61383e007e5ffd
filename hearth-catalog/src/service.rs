use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a service option is answered by the customer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    /// Pick one of `choices`; the choice carries price/duration modifiers.
    Choice,
    /// Free text, stored as given.
    Text,
    /// A count, stored as given.
    Quantity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionChoice {
    pub id: u32,
    pub label: String,
    pub price_modifier: Decimal,
    pub duration_modifier_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceOption {
    pub id: u32,
    pub name: String,
    pub kind: OptionKind,
    pub is_required: bool,
    #[serde(default)]
    pub choices: Vec<OptionChoice>,
}

impl ServiceOption {
    pub fn choice(&self, choice_id: u32) -> Option<&OptionChoice> {
        self.choices.iter().find(|c| c.id == choice_id)
    }

    /// Key used in an order item's normalized options map.
    pub fn key(&self) -> String {
        option_key(self.id)
    }
}

pub fn option_key(option_id: u32) -> String {
    format!("option_{}", option_id)
}

/// Read-only snapshot of a bookable service as the catalog exposes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDefinition {
    pub id: Uuid,
    pub title: String,
    pub category_slug: String,
    pub base_price: Decimal,
    pub base_duration_minutes: i32,
    pub is_active: bool,
    #[serde(default)]
    pub options: Vec<ServiceOption>,
}

impl ServiceDefinition {
    pub fn option(&self, option_id: u32) -> Option<&ServiceOption> {
        self.options.iter().find(|o| o.id == option_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddOn {
    pub id: Uuid,
    pub title: String,
    pub category_slug: String,
    pub price: Decimal,
    pub duration_minutes: i32,
    pub is_active: bool,
}

/// A customer's answer to one service option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedOption {
    pub option_id: u32,
    #[serde(default)]
    pub choice_id: Option<u32>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}
