//! Invoice data model returned by the pipeline.
//!
//! Absence is represented, not omitted: every string field defaults to the
//! [`NOT_AVAILABLE`] sentinel and every amount to `0.0`, so a partially
//! filled model reply still deserialises into a complete record.
//!
//! Amounts are parsed leniently. Models routinely answer `"1,200.50"`,
//! `"Rs. 500"` or `"NOT_AVAILABLE"` where a number is expected; all are
//! accepted. Strings that are not a plain number once the currency marker
//! is dropped are rejected rather than guessed at.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Placeholder for a field the extraction could not find.
pub const NOT_AVAILABLE: &str = "NOT_AVAILABLE";

/// Reply token meaning "this page is not an invoice".
pub const NO_INVOICE: &str = "NO_INVOICE";

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_slno() -> u32 {
    1
}

fn is_sentinel(s: &str) -> bool {
    s == NOT_AVAILABLE
}

/// A single line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// 1-based line number on the invoice.
    #[serde(default = "default_slno", deserialize_with = "lenient_slno")]
    pub slno: u32,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub quantity: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub price: String,
    #[serde(default = "default_currency", deserialize_with = "lenient_currency")]
    pub currency: String,
}

impl Default for Item {
    fn default() -> Self {
        Self {
            slno: default_slno(),
            description: not_available(),
            quantity: not_available(),
            price: not_available(),
            currency: default_currency(),
        }
    }
}

impl Item {
    /// True when description, quantity and price were all not found.
    pub fn is_empty(&self) -> bool {
        is_sentinel(&self.description) && is_sentinel(&self.quantity) && is_sentinel(&self.price)
    }
}

/// Seller or buyer identification block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDetails {
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub gst_no: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub pan_no: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub address: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub phone_number: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub email: String,
}

impl Default for CompanyDetails {
    fn default() -> Self {
        Self {
            name: not_available(),
            gst_no: not_available(),
            pan_no: not_available(),
            address: not_available(),
            phone_number: not_available(),
            email: not_available(),
        }
    }
}

impl CompanyDetails {
    pub fn is_empty(&self) -> bool {
        [
            &self.name,
            &self.gst_no,
            &self.pan_no,
            &self.address,
            &self.phone_number,
            &self.email,
        ]
        .iter()
        .all(|f| is_sentinel(f))
    }
}

/// GST components. Serialised with their conventional upper-case keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxComponents {
    #[serde(rename = "CGST", default, deserialize_with = "lenient_amount")]
    pub cgst: f64,
    #[serde(rename = "SGST", default, deserialize_with = "lenient_amount")]
    pub sgst: f64,
    #[serde(rename = "IGST", default, deserialize_with = "lenient_amount")]
    pub igst: f64,
}

impl TaxComponents {
    pub fn is_empty(&self) -> bool {
        self.cgst == 0.0 && self.sgst == 0.0 && self.igst == 0.0
    }
}

/// Invoice details extracted from one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub invoice_number: String,
    #[serde(default = "not_available", deserialize_with = "lenient_text")]
    pub invoice_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub seller_details: CompanyDetails,
    #[serde(default, deserialize_with = "null_as_default")]
    pub buyer_details: CompanyDetails,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Item>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tax: TaxComponents,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_charge: f64,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_discount: f64,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_amount: f64,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount_paid: f64,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount_due: f64,
    /// 1-based page the invoice was read from. Stamped by the pipeline.
    #[serde(default, deserialize_with = "lenient_page_no")]
    pub page_no: usize,
}

impl Default for Invoice {
    fn default() -> Self {
        Self {
            invoice_number: not_available(),
            invoice_date: not_available(),
            seller_details: CompanyDetails::default(),
            buyer_details: CompanyDetails::default(),
            items: Vec::new(),
            total_tax: TaxComponents::default(),
            total_charge: 0.0,
            total_discount: 0.0,
            total_amount: 0.0,
            amount_paid: 0.0,
            amount_due: 0.0,
            page_no: 0,
        }
    }
}

impl Invoice {
    /// True when nothing at all was found on the page.
    pub fn is_empty(&self) -> bool {
        is_sentinel(&self.invoice_number)
            && is_sentinel(&self.invoice_date)
            && self.seller_details.is_empty()
            && self.buyer_details.is_empty()
            && self.items.iter().all(Item::is_empty)
            && self.total_tax.is_empty()
            && self.total_charge == 0.0
            && self.total_discount == 0.0
            && self.total_amount == 0.0
            && self.amount_paid == 0.0
            && self.amount_due == 0.0
    }

    /// Consume and return the invoice attributed to `page_no`.
    pub fn on_page(mut self, page_no: usize) -> Self {
        self.page_no = page_no;
        self
    }
}

/// Invoices found in one document, in ascending page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    #[serde(default)]
    pub details: Vec<Invoice>,
}

impl InvoiceData {
    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }
}

// ── Lenient deserialisers ────────────────────────────────────────────────

fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

fn scalar_to_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(scalar_to_text(value).unwrap_or_else(not_available))
}

fn lenient_currency<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(scalar_to_text(value).unwrap_or_else(default_currency))
}

fn lenient_slno<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    let n = match &value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('.').parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n >= 1 && n <= u32::MAX as u64 => Ok(n as u32),
        _ => Err(serde::de::Error::custom(format!(
            "slno must be a positive integer, got {value}"
        ))),
    }
}

/// The pipeline overwrites `page_no`, so anything unparsable becomes 0.
fn lenient_page_no<'de, D: Deserializer<'de>>(de: D) -> Result<usize, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0) as usize,
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_amount<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    match value {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("amount out of range")),
        serde_json::Value::String(s) => parse_amount(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("not an amount: {s:?}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected an amount, got {other}"
        ))),
    }
}

/// Leading currency marker a model may copy from the page.
static RE_CURRENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:rs\.?|inr|₹|\$)\s*").unwrap());

/// Digits with optional thousands separators and fraction.
static RE_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[0-9][0-9,]*(?:\.[0-9]+)?$").unwrap());

/// Parse a model-formatted amount: `"1,200.50"`, `"Rs. 500"`, `"₹ 300"`,
/// `"1,200.00/-"`, `"NOT_AVAILABLE"`.
///
/// Anything left after dropping the currency marker and the `/-` suffix
/// must be a plain number; `None` otherwise.
fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || is_sentinel(s) {
        return Some(0.0);
    }
    let s = RE_CURRENCY.replace(s, "");
    let s = s.trim().trim_end_matches("/-").trim_end();
    if !RE_AMOUNT.is_match(s) {
        return None;
    }
    s.replace(',', "").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_use_sentinel() {
        let inv = Invoice::default();
        assert_eq!(inv.invoice_number, NOT_AVAILABLE);
        assert_eq!(inv.seller_details.email, NOT_AVAILABLE);
        assert!(inv.is_empty());
    }

    #[test]
    fn missing_fields_are_filled() {
        let inv: Invoice = serde_json::from_value(json!({
            "invoice_number": "INV-42",
            "items": [{"slno": 1, "description": "FREIGHT CHARGE"}]
        }))
        .unwrap();
        assert_eq!(inv.invoice_number, "INV-42");
        assert_eq!(inv.invoice_date, NOT_AVAILABLE);
        assert_eq!(inv.items[0].price, NOT_AVAILABLE);
        assert_eq!(inv.items[0].currency, "INR");
        assert!(!inv.is_empty());
    }

    #[test]
    fn amounts_accept_strings_and_sentinel() {
        let inv: Invoice = serde_json::from_value(json!({
            "total_amount": "8,89,397.00",
            "amount_paid": "NOT_AVAILABLE",
            "amount_due": null,
            "total_tax": {"CGST": "12.5", "SGST": 12.5}
        }))
        .unwrap();
        assert_eq!(inv.total_amount, 889397.0);
        assert_eq!(inv.amount_paid, 0.0);
        assert_eq!(inv.amount_due, 0.0);
        assert_eq!(inv.total_tax.cgst, 12.5);
        assert_eq!(inv.total_tax.igst, 0.0);
    }

    #[test]
    fn garbage_amount_is_rejected() {
        let res: Result<Invoice, _> = serde_json::from_value(json!({"total_amount": "lots"}));
        assert!(res.is_err());
    }

    #[test]
    fn currency_marked_amounts_keep_their_value() {
        for (raw, expected) in [
            ("Rs. 500", 500.0),
            ("Rs. 1,200", 1200.0),
            ("₹ 300", 300.0),
            ("₹1,00,000", 100000.0),
            ("INR 75.50", 75.5),
            ("$ 19.99", 19.99),
            ("rs 40", 40.0),
            ("1,200.00/-", 1200.0),
            ("Rs. 1,200.00/-", 1200.0),
            ("-250.00", -250.0),
        ] {
            assert_eq!(parse_amount(raw), Some(expected), "{raw}");
        }
    }

    #[test]
    fn malformed_amounts_are_rejected() {
        for raw in ["12.5.3", "500 approx", "Rs.", "1-2", "Rs. 1,200.50 + GST", "."] {
            assert_eq!(parse_amount(raw), None, "{raw}");
        }
        let res: Result<Invoice, _> =
            serde_json::from_value(json!({"total_amount": "Rs. 12.5.3"}));
        assert!(res.is_err());
    }

    #[test]
    fn slno_must_be_positive() {
        let res: Result<Item, _> = serde_json::from_value(json!({"slno": 0}));
        assert!(res.is_err());
        let item: Item = serde_json::from_value(json!({"slno": "3"})).unwrap();
        assert_eq!(item.slno, 3);
    }

    #[test]
    fn empty_item_rules() {
        let mut item = Item::default();
        assert!(item.is_empty());
        item.price = "10.00".into();
        assert!(!item.is_empty());
    }

    #[test]
    fn invoice_with_only_empty_items_is_empty() {
        let inv = Invoice {
            items: vec![Item::default(), Item::default()],
            ..Invoice::default()
        };
        assert!(inv.is_empty());
    }

    #[test]
    fn tax_keys_serialise_upper_case() {
        let v = serde_json::to_value(TaxComponents {
            cgst: 1.0,
            sgst: 2.0,
            igst: 3.0,
        })
        .unwrap();
        assert_eq!(v["CGST"], 1.0);
        assert_eq!(v["IGST"], 3.0);
    }

    #[test]
    fn page_no_accepts_strings() {
        let inv: Invoice = serde_json::from_value(json!({"page_no": "2"})).unwrap();
        assert_eq!(inv.page_no, 2);
        let inv: Invoice = serde_json::from_value(json!({"page_no": "two"})).unwrap();
        assert_eq!(inv.page_no, 0);
    }

    #[test]
    fn on_page_stamps_page_number() {
        let inv = Invoice::default().on_page(7);
        assert_eq!(inv.page_no, 7);
    }
}
