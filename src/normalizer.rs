use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::TxnType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    pub raw: String,
    pub normalized: String,
}

pub fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse runs of the same symbol ("--", "**", "..") to a single character.
pub fn collapse_repeated_symbols(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev: Option<char> = None;
    for c in value.chars() {
        let is_symbol = !(c.is_alphanumeric() || c == '_' || c.is_whitespace());
        if is_symbol && prev == Some(c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Decompose and drop combining diacritical marks (U+0300..=U+036F).
pub fn strip_diacritics(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .collect()
}

pub fn clean_description(raw: &str) -> String {
    let upper = normalize_whitespace(raw).to_uppercase();
    normalize_whitespace(&collapse_repeated_symbols(&upper))
}

fn merchant_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^COMPRA TARJ\.?\s+(.+)$",
            r"^ADEUDO RECIBO\s+(.+)$",
            r"^TRANSFERENCIA\s+(?:A/DE|A|DE)\s+(.+)$",
            r"^NOMINA DE\s+(.+)$",
            r"^PRESTAMOS?\s+(.+)$",
            r"^GAS\s+(.+)$",
            r"^TELEFONOS?\s+(.+)$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static merchant pattern"))
        .collect()
    })
}

fn boilerplate_prefixes() -> &'static [Regex] {
    static PREFIXES: OnceLock<Vec<Regex>> = OnceLock::new();
    PREFIXES.get_or_init(|| {
        [
            // masked card or account number
            r"(?i)^[0-9X*]{6,}\s+",
            r"(?i)^N\.\s*",
            r"(?i)^PAGO DE\s+",
            r"(?i)^RECIBO\s+",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static boilerplate pattern"))
        .collect()
    })
}

fn cleanup_merchant_candidate(value: &str) -> String {
    let mut cleaned = normalize_whitespace(value);
    for prefix in boilerplate_prefixes() {
        cleaned = prefix.replace(&cleaned, "").into_owned();
    }
    cleaned
}

/// Pull the counterparty out of a cleaned description using the bank's
/// fixed prefixes. Returns `None` when no prefix matches.
pub fn extract_merchant(description_clean: &str) -> Option<Merchant> {
    let cleaned = normalize_whitespace(description_clean);
    for pattern in merchant_patterns() {
        let Some(captured) = pattern.captures(&cleaned).and_then(|c| c.get(1)) else {
            continue;
        };
        let candidate = cleanup_merchant_candidate(captured.as_str());
        let merchant = normalize_whitespace(&collapse_repeated_symbols(&candidate.to_uppercase()));
        if merchant.is_empty() {
            continue;
        }
        return Some(Merchant {
            raw: merchant.clone(),
            normalized: merchant,
        });
    }
    None
}

const FEE_KEYWORDS: &[&str] = &["COMISION"];
const INTEREST_KEYWORDS: &[&str] = &["INTERESES"];
const TAX_KEYWORDS: &[&str] = &[
    "TGSS",
    "HACIENDA",
    "SEGURIDAD SOCIAL",
    "SEGUROS SOCIALES",
    "IMPUEST",
];
const TRANSFER_KEYWORDS: &[&str] = &["TRANSFERENCIA"];

pub fn infer_txn_type(description_clean: &str, amount: f64) -> TxnType {
    let text = strip_diacritics(description_clean).to_uppercase();
    let has_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if has_any(FEE_KEYWORDS) {
        TxnType::Fee
    } else if has_any(INTEREST_KEYWORDS) {
        TxnType::Interest
    } else if has_any(TAX_KEYWORDS) {
        TxnType::Tax
    } else if has_any(TRANSFER_KEYWORDS) {
        TxnType::Transfer
    } else if amount > 0.0 {
        TxnType::Income
    } else if amount < 0.0 {
        TxnType::Expense
    } else {
        TxnType::Unknown
    }
}
