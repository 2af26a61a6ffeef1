//! Index extraction from retrieved page content
//!
//! Pure functions, no I/O. The selector is a CSS selector such as
//! `td#price-value`; the first matching element wins.

use crate::types::IndexSample;
use scraper::{Html, Selector};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// Selector did not resolve to any element
    #[error("Structure error: selector '{selector}' matched nothing")]
    Structure { selector: String },

    /// Located text is not a number
    #[error("Parse error: '{text}' is not numeric")]
    Parse { text: String },

    /// Selector string itself is malformed
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Raw page body plus where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    pub url: String,
    pub body: String,
    /// Name of the client identity used for the request
    pub identity: String,
}

impl RawContent {
    pub fn new(url: impl Into<String>, body: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            identity: identity.into(),
        }
    }
}

/// Text content of the first element matching `selector`, trimmed
pub fn locate(html: &str, selector: &str) -> Result<String, ExtractError> {
    let parsed = Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })?;

    let document = Html::parse_document(html);
    let element = document
        .select(&parsed)
        .next()
        .ok_or_else(|| ExtractError::Structure {
            selector: selector.to_string(),
        })?;

    Ok(element.text().collect::<String>().trim().to_string())
}

/// Parse display text such as `"1,234.56"` into a finite number
pub fn parse_index_text(text: &str) -> Result<f64, ExtractError> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    let value: f64 = cleaned.parse().map_err(|_| ExtractError::Parse {
        text: text.to_string(),
    })?;

    // "inf" and "NaN" parse as f64 but are not index values
    if !value.is_finite() {
        return Err(ExtractError::Parse {
            text: text.to_string(),
        });
    }

    Ok(value)
}

/// Locate and parse the index value in `raw`
pub fn extract(raw: &RawContent, selector: &str) -> Result<IndexSample, ExtractError> {
    let text = locate(&raw.body, selector)?;
    let value = parse_index_text(&text)?;

    tracing::debug!(raw_text = %text, value, "Index extracted");

    Ok(IndexSample::new(value, text, format!("{} [{}]", raw.url, selector)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <table>
            <tr><td class="label">Index</td><td id="price-value"> 3,012.45 </td></tr>
            <tr><td id="broken">n/a</td></tr>
          </table>
        </body></html>
    "#;

    fn raw(body: &str) -> RawContent {
        RawContent::new("https://example.com/index", body, "test")
    }

    #[test]
    fn test_extracts_value_with_thousands_separator() {
        let sample = extract(&raw(PAGE), "td#price-value").unwrap();
        assert_eq!(sample.raw_value, 3012.45);
        assert_eq!(sample.raw_text, "3,012.45");
        assert!(sample.source.contains("td#price-value"));
    }

    #[test]
    fn test_missing_element_is_structure_error() {
        let err = extract(&raw(PAGE), "td#does-not-exist").unwrap_err();
        assert!(matches!(err, ExtractError::Structure { .. }));
    }

    #[test]
    fn test_non_numeric_text_is_parse_error() {
        let err = extract(&raw(PAGE), "td#broken").unwrap_err();
        assert_eq!(err, ExtractError::Parse { text: "n/a".to_string() });
    }

    #[test]
    fn test_malformed_selector() {
        let err = locate(PAGE, "td[").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidSelector { .. }));
    }

    #[test]
    fn test_parse_index_text_variants() {
        assert_eq!(parse_index_text("1500").unwrap(), 1500.0);
        assert_eq!(parse_index_text(" 1 500 ").unwrap(), 1500.0);
        assert_eq!(parse_index_text("1,234,567.5").unwrap(), 1_234_567.5);
        assert_eq!(parse_index_text("-12.5").unwrap(), -12.5);
        assert_eq!(parse_index_text("1\u{a0}500").unwrap(), 1500.0);
        assert!(parse_index_text("").is_err());
        assert!(parse_index_text("NaN").is_err());
        assert!(parse_index_text("inf").is_err());
        assert!(parse_index_text("12pts").is_err());
    }
}
