//! Hidden-field and challenge-image extraction from carrier form pages.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::TrackError;

/// Ordered hidden-field values captured from a form page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMap {
    entries: Vec<(String, String)>,
}

impl TokenMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a carrier's challenge image is found on its form page.
#[derive(Debug, Clone, Copy)]
pub enum ImageLocator {
    /// CSS selector for the `<img>` element; its `src` is used.
    Selector(&'static str),
    /// Regex over the raw HTML; the first capture group is the image URL.
    SrcPattern(&'static str),
}

pub(crate) fn selector(css: &str) -> Result<Selector, TrackError> {
    Selector::parse(css).map_err(|e| TrackError::decode(format!("invalid selector `{}`: {}", css, e)))
}

/// Text content of `element` with each text node trimmed and concatenated.
pub(crate) fn stripped_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

/// Text content of `element` with trimmed, non-empty text nodes joined by `separator`.
pub(crate) fn joined_text(element: ElementRef<'_>, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn field_value(document: &Html, name: &str) -> Result<Option<String>, TrackError> {
    let by_id = selector(&format!(r#"input[id="{}"]"#, name))?;
    let by_name = selector(&format!(r#"input[name="{}"]"#, name))?;
    Ok(document
        .select(&by_id)
        .chain(document.select(&by_name))
        .find_map(|input| input.value().attr("value"))
        .map(str::to_string))
}

/// Collects hidden form values by id or name.
///
/// A required token that is absent or empty is an error; optional tokens are
/// skipped when absent or empty.
pub fn extract_tokens(
    html: &str,
    required: &[&str],
    optional: &[&str],
) -> Result<TokenMap, TrackError> {
    let document = Html::parse_document(html);
    let mut tokens = TokenMap::default();

    for name in required {
        match field_value(&document, name)? {
            Some(value) if !value.is_empty() => tokens.insert(*name, value),
            _ => return Err(TrackError::MissingRequiredToken(name.to_string())),
        }
    }

    for name in optional {
        if let Some(value) = field_value(&document, name)? {
            if !value.is_empty() {
                tokens.insert(*name, value);
            }
        }
    }

    Ok(tokens)
}

/// Locates the challenge image and resolves it against `page_url`.
pub fn find_challenge_image_url(
    html: &str,
    page_url: &str,
    locator: &ImageLocator,
) -> Result<Option<Url>, TrackError> {
    let src = match locator {
        ImageLocator::Selector(css) => {
            let document = Html::parse_document(html);
            let image = selector(css)?;
            document
                .select(&image)
                .find_map(|img| img.value().attr("src"))
                .map(str::to_string)
        }
        ImageLocator::SrcPattern(pattern) => {
            let pattern = Regex::new(pattern)
                .map_err(|e| TrackError::decode(format!("invalid image pattern: {}", e)))?;
            pattern
                .captures(html)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        }
    };

    let Some(src) = src.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };

    let base = Url::parse(page_url)
        .map_err(|e| TrackError::decode(format!("invalid page url {}: {}", page_url, e)))?;
    Ok(base.join(src.trim()).ok())
}

/// Reads the named inputs out of an intermediate stub page.
///
/// Every field must be present; a present field with no value is kept as empty.
pub fn extract_continuation_fields(
    html: &str,
    names: &[&str],
) -> Result<TokenMap, TrackError> {
    let document = Html::parse_document(html);
    let mut fields = TokenMap::default();
    let mut missing = Vec::new();

    for name in names {
        let input = selector(&format!(r#"input[name="{}"]"#, name))?;
        match document.select(&input).next() {
            Some(element) => fields.insert(*name, element.value().attr("value").unwrap_or_default()),
            None => missing.push(name.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(fields)
    } else {
        Err(TrackError::MissingContinuationFields(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM_PAGE: &str = r#"
        <html><body><form>
          <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA4" />
          <input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="CA0B0334" />
          <input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="" />
          <img id="imgCode" name="imgCode" src="../Search/code.aspx?r=42" />
          <img src="ValidateImage.aspx?ts=1734567890" />
        </form></body></html>
    "#;

    #[test]
    fn extracts_required_and_present_optional_tokens() {
        let tokens = extract_tokens(
            FORM_PAGE,
            &["__VIEWSTATE"],
            &["__VIEWSTATEGENERATOR", "__EVENTVALIDATION"],
        )
        .unwrap();
        assert_eq!(tokens.get("__VIEWSTATE"), Some("dDwtMTA4"));
        assert_eq!(tokens.get("__VIEWSTATEGENERATOR"), Some("CA0B0334"));
        assert_eq!(tokens.get("__EVENTVALIDATION"), None);
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn missing_required_token_is_an_error() {
        let err = extract_tokens("<html><body></body></html>", &["__VIEWSTATE"], &[]).unwrap_err();
        assert!(matches!(err, TrackError::MissingRequiredToken(name) if name == "__VIEWSTATE"));
    }

    #[test]
    fn empty_required_token_is_an_error() {
        let html = r#"<input id="__VIEWSTATE" value="" />"#;
        assert!(extract_tokens(html, &["__VIEWSTATE"], &[]).is_err());
    }

    #[test]
    fn locates_image_by_selector() {
        let url = find_challenge_image_url(
            FORM_PAGE,
            "https://www.hct.com.tw/Search/SearchGoods_n.aspx",
            &ImageLocator::Selector(r#"img[name="imgCode"], img#imgCode"#),
        )
        .unwrap()
        .unwrap();
        assert_eq!(url.as_str(), "https://www.hct.com.tw/Search/code.aspx?r=42");
    }

    #[test]
    fn locates_image_by_src_pattern() {
        let url = find_challenge_image_url(
            FORM_PAGE,
            "https://eservice.7-11.com.tw/e-tracking/search.aspx",
            &ImageLocator::SrcPattern(r#"src="(ValidateImage\.aspx\?ts=[0-9]+)""#),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://eservice.7-11.com.tw/e-tracking/ValidateImage.aspx?ts=1734567890"
        );
    }

    #[test]
    fn absent_image_is_none() {
        let url = find_challenge_image_url(
            "<html></html>",
            "https://example.com/",
            &ImageLocator::Selector("img#imgCode"),
        )
        .unwrap();
        assert!(url.is_none());
    }

    #[test]
    fn continuation_fields_require_every_name() {
        let stub = r#"<form><input name="no" value="ENC123" /><input name="chk" value="" /></form>"#;
        let fields = extract_continuation_fields(stub, &["no", "chk"]).unwrap();
        assert_eq!(fields.get("no"), Some("ENC123"));
        assert_eq!(fields.get("chk"), Some(""));

        let err = extract_continuation_fields("<form></form>", &["no", "chk"]).unwrap_err();
        assert!(matches!(err, TrackError::MissingContinuationFields(names) if names == ["no", "chk"]));
    }
}
