//! Order Model
//!
//! Upstream services disagree on field names (`student_name` vs `studentName`,
//! `items` vs `books`, ...) and on whether ids and amounts are strings or
//! numbers. [`OrderPayload`] accepts all of them; [`Order`] is what is left
//! after picking the first usable value of each field.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const UNKNOWN_STUDENT: &str = "Unknown";
pub const DEFAULT_ITEM_NAME: &str = "Item";

/// A JSON scalar that may arrive as a string or a number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    /// Non-empty textual form
    pub fn text(&self) -> Option<String> {
        let s = match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s.trim().to_string(),
            Scalar::Bool(_) => return None,
        };
        (!s.is_empty()).then_some(s)
    }

    /// Monetary value; strings may carry a leading `$`
    pub fn decimal(&self) -> Option<Decimal> {
        match self {
            Scalar::Int(n) => Some(Decimal::from(*n)),
            Scalar::Float(f) => Decimal::from_str(&f.to_string()).ok(),
            Scalar::Text(s) => {
                let s = s.trim();
                Decimal::from_str(s.strip_prefix('$').unwrap_or(s).trim()).ok()
            }
            Scalar::Bool(_) => None,
        }
    }

    /// Positive whole quantity
    pub fn quantity(&self) -> Option<u32> {
        let n = match self {
            Scalar::Int(n) => *n,
            Scalar::Float(f) if f.fract() == 0.0 => *f as i64,
            Scalar::Text(s) => s.trim().parse::<i64>().ok()?,
            _ => return None,
        };
        u32::try_from(n).ok().filter(|q| *q > 0)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

fn first_text(candidates: &[&Option<Scalar>]) -> Option<String> {
    candidates.iter().find_map(|c| c.as_ref().and_then(Scalar::text))
}

/// Order item as sent upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderItemPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_title: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Scalar>,
}

/// Order as sent upstream (snake_case and camelCase variants both accepted)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<Scalar>,
    #[serde(default, rename = "studentName", skip_serializing_if = "Option::is_none")]
    pub student_name_camel: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Scalar>,
    #[serde(default, rename = "orderId", skip_serializing_if = "Option::is_none")]
    pub order_id_camel: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItemPayload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub books: Option<Vec<OrderItemPayload>>,
}

/// Order item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    /// Unit price in currency unit
    pub price: Option<Decimal>,
}

impl OrderItem {
    pub fn new(name: impl Into<String>, quantity: u32, price: Option<Decimal>) -> Self {
        Self {
            name: name.into(),
            quantity,
            price,
        }
    }

    /// price × quantity, zero when unpriced, `None` on overflow
    pub fn line_total(&self) -> Option<Decimal> {
        self.price
            .unwrap_or_default()
            .checked_mul(Decimal::from(self.quantity))
    }
}

/// Order (normalized)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub student_name: String,
    pub grade: String,
    pub order_id: String,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Sum of line totals, `None` when it does not fit in a `Decimal`
    pub fn total(&self) -> Option<Decimal> {
        self.items
            .iter()
            .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.line_total()?))
    }
}

impl Default for Order {
    fn default() -> Self {
        Self {
            student_name: UNKNOWN_STUDENT.to_string(),
            grade: String::new(),
            order_id: String::new(),
            items: Vec::new(),
        }
    }
}

impl From<OrderItemPayload> for OrderItem {
    fn from(p: OrderItemPayload) -> Self {
        let name = first_text(&[&p.title, &p.name, &p.book_title])
            .unwrap_or_else(|| DEFAULT_ITEM_NAME.to_string());
        let quantity = [&p.quantity, &p.qty]
            .into_iter()
            .find_map(|q| q.as_ref().and_then(Scalar::quantity))
            .unwrap_or(1);
        let price = p.price.as_ref().and_then(Scalar::decimal);
        Self {
            name,
            quantity,
            price,
        }
    }
}

impl From<OrderPayload> for Order {
    fn from(p: OrderPayload) -> Self {
        let student_name = first_text(&[&p.student_name, &p.student_name_camel])
            .unwrap_or_else(|| UNKNOWN_STUDENT.to_string());
        let grade = first_text(&[&p.grade]).unwrap_or_default();
        let order_id = first_text(&[&p.order_id, &p.order_id_camel]).unwrap_or_default();
        // An explicit (even empty) `items` list wins over `books`
        let items = p
            .items
            .or(p.books)
            .unwrap_or_default()
            .into_iter()
            .map(OrderItem::from)
            .collect();

        Self {
            student_name,
            grade,
            order_id,
            items,
        }
    }
}
