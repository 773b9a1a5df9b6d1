//! Portal page parsing helpers.
//!
//! Extracts the login form (submission target + hidden fields) from the
//! rollcall page and locates the `Refresh` style redirects the portal uses
//! instead of 3xx responses.

use http::HeaderMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use super::types::{HiddenFields, LoginForm};

/// Outcomes when the login form cannot be turned into a submission target.
#[derive(Debug, Error)]
pub enum FormParseError {
    #[error("invalid form action {action:?}: {source}")]
    InvalidAction {
        action: String,
        source: url::ParseError,
    },
}

static FORM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static INPUT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("input").unwrap());
static META_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[http-equiv][content]").unwrap());

static REFRESH_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#"^\s*\d+(?:\.\d*)?\s*[;,]?\s*url\s*=\s*(?P<target>.+?)\s*$"#)
        .case_insensitive(true)
        .build()
        .unwrap()
});

static GOTO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"goto=([^&]+)").unwrap());

/// Extract the first form's action and every hidden input of the document.
///
/// A missing or blank `action` falls back to `page_url`. Hidden fields are
/// collected regardless of attribute order; a repeated name keeps the later
/// value.
pub fn extract_login_form(html: &str, page_url: &Url) -> Result<LoginForm, FormParseError> {
    let document = Html::parse_document(html);

    let action = document
        .select(&FORM_SELECTOR)
        .next()
        .and_then(|form| form.value().attr("action"))
        .map(str::trim)
        .filter(|action| !action.is_empty());

    let action = match action {
        Some(raw) => page_url.join(raw).map_err(|source| FormParseError::InvalidAction {
            action: raw.to_string(),
            source,
        })?,
        None => page_url.clone(),
    };

    let mut hidden_fields = HiddenFields::new();
    for input in document.select(&INPUT_SELECTOR) {
        let element = input.value();
        let is_hidden = element
            .attr("type")
            .map(|kind| kind.trim().eq_ignore_ascii_case("hidden"))
            .unwrap_or(false);
        if !is_hidden {
            continue;
        }

        if let Some(name) = element.attr("name").filter(|name| !name.is_empty()) {
            hidden_fields.insert(name, element.attr("value").unwrap_or_default());
        }
    }

    Ok(LoginForm {
        action,
        hidden_fields,
    })
}

/// Parse a `Refresh` value such as `0;URL="/mooc/index.php"` into an absolute URL.
pub fn parse_refresh_target(value: &str, base: &Url) -> Option<Url> {
    let captures = REFRESH_RE.captures(value)?;
    let target = captures
        .name("target")?
        .as_str()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();

    if target.is_empty() {
        return None;
    }

    base.join(target).ok()
}

/// Redirect target announced by the `Refresh` response header.
pub fn refresh_header_target(headers: &HeaderMap, base: &Url) -> Option<Url> {
    headers
        .get("refresh")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_refresh_target(value, base))
}

/// Redirect target announced by `<meta http-equiv="refresh">` in the body.
pub fn meta_refresh_target(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    document
        .select(&META_SELECTOR)
        .filter(|meta| {
            meta.value()
                .attr("http-equiv")
                .map(|equiv| equiv.trim().eq_ignore_ascii_case("refresh"))
                .unwrap_or(false)
        })
        .find_map(|meta| {
            meta.value()
                .attr("content")
                .and_then(|content| parse_refresh_target(content, base))
        })
}

/// Build origin header value from URL (`scheme://host[:port]`).
pub fn origin_from_url(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
    if let Some(port) = url.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    origin
}

/// Rollcall `goto` token carried by a scanned QR code.
///
/// Full URLs yield their decoded `goto` query parameter; anything else is
/// searched for a raw `goto=` pair. An empty token counts as absent.
pub fn goto_from_scan(scanned: &str) -> Option<String> {
    let scanned = scanned.trim();
    let token = match Url::parse(scanned) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "goto")
            .map(|(_, value)| value.into_owned()),
        Err(_) => GOTO_RE
            .captures(scanned)
            .map(|caps| caps[1].to_string()),
    };
    token.filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn page() -> Url {
        Url::parse("https://host/a/b.php").unwrap()
    }

    #[test]
    fn resolves_relative_action_against_page() {
        let html = r#"<form method="post" action="/mooc/x.php"></form>"#;
        let form = extract_login_form(html, &page()).unwrap();
        assert_eq!(form.action.as_str(), "https://host/mooc/x.php");
    }

    #[test]
    fn missing_action_defaults_to_page_url() {
        let html = r#"<form method="post"><input type="hidden" name="a" value="1"></form>"#;
        let form = extract_login_form(html, &page()).unwrap();
        assert_eq!(form.action, page());

        let blank = extract_login_form(r#"<form action="  "></form>"#, &page()).unwrap();
        assert_eq!(blank.action, page());
    }

    #[test]
    fn only_first_form_supplies_action() {
        let html = r#"
            <form action="login.php"></form>
            <form action="/search.php"></form>
        "#;
        let form = extract_login_form(html, &page()).unwrap();
        assert_eq!(form.action.as_str(), "https://host/a/login.php");
    }

    #[test]
    fn later_hidden_field_wins_across_attribute_orders() {
        let html = r#"
            <form action="/mooc/login.php">
              <input type="hidden" name="login_key" value="FIRST">
              <input type="text" name="username" value="">
              <input name="reurl" type="HIDDEN" value="/mooc/teach/rollcall/start.php">
              <input name="login_key" value="SECOND" type="hidden">
            </form>
        "#;
        let form = extract_login_form(html, &page()).unwrap();

        assert_eq!(form.login_key(), Some("SECOND"));
        let names: Vec<_> = form.hidden_fields.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["login_key", "reurl"]);
    }

    #[test]
    fn tolerates_malformed_markup_and_entities() {
        let html = "<html><body><form action='/mooc/login.php?a=1&amp;b=2'>\
                    <input type=hidden name=login_key value=XYZ123>\
                    <input type='hidden' name='empty'>\
                    <div><p>unclosed";
        let form = extract_login_form(html, &page()).unwrap();

        assert_eq!(form.action.as_str(), "https://host/mooc/login.php?a=1&b=2");
        assert_eq!(form.login_key(), Some("XYZ123"));
        assert_eq!(form.hidden_fields.get("empty"), Some(""));
    }

    #[test]
    fn no_hidden_fields_is_not_an_error() {
        let form = extract_login_form("<p>nothing here</p>", &page()).unwrap();
        assert!(form.hidden_fields.is_empty());
        assert!(form.login_key().is_none());
    }

    #[test]
    fn rejects_unresolvable_action() {
        let err = extract_login_form(r#"<form action="http://[::1"></form>"#, &page()).unwrap_err();
        assert!(matches!(err, FormParseError::InvalidAction { .. }));
    }

    #[test]
    fn parses_refresh_variants() {
        let base = page();
        let cases = [
            (r#"0;URL="/mooc/index.php""#, "https://host/mooc/index.php"),
            ("0; url=/mooc/index.php", "https://host/mooc/index.php"),
            ("3;URL='next.php?goto=abc~~'", "https://host/a/next.php?goto=abc~~"),
            ("0;URL=https://other.test/x", "https://other.test/x"),
        ];

        for (raw, expected) in cases {
            let target = parse_refresh_target(raw, &base).unwrap();
            assert_eq!(target.as_str(), expected, "{raw}");
        }

        assert!(parse_refresh_target("5", &base).is_none());
        assert!(parse_refresh_target("0;URL=\"\"", &base).is_none());
    }

    #[test]
    fn reads_refresh_header() {
        let mut headers = HeaderMap::new();
        headers.insert("refresh", HeaderValue::from_static("0;URL=\"/mooc/teach/rollcall/start.php\""));
        let target = refresh_header_target(&headers, &page()).unwrap();
        assert_eq!(target.as_str(), "https://host/mooc/teach/rollcall/start.php");

        assert!(refresh_header_target(&HeaderMap::new(), &page()).is_none());
    }

    #[test]
    fn reads_meta_refresh() {
        let html = r#"<head><meta http-equiv="Refresh" content="0; URL=/mooc/done.php"></head>"#;
        let target = meta_refresh_target(html, &page()).unwrap();
        assert_eq!(target.as_str(), "https://host/mooc/done.php");

        let unrelated = r#"<meta http-equiv="content-type" content="text/html; charset=utf-8">"#;
        assert!(meta_refresh_target(unrelated, &page()).is_none());
    }

    #[test]
    fn origin_keeps_explicit_port() {
        let url = Url::parse("http://localhost:8080/mooc/login.php").unwrap();
        assert_eq!(origin_from_url(&url), "http://localhost:8080");
    }

    #[test]
    fn reads_goto_from_scanned_url() {
        let scanned = "https://elearning.nkust.edu.tw/mooc/teach/rollcall/start.php?goto=MeFqUN8k_xw~~&lang=zh";
        assert_eq!(goto_from_scan(scanned).as_deref(), Some("MeFqUN8k_xw~~"));
        assert_eq!(
            goto_from_scan("https://host/start.php?goto=a%2Bb").as_deref(),
            Some("a+b")
        );
    }

    #[test]
    fn reads_goto_from_partial_scan() {
        assert_eq!(
            goto_from_scan("start.php?goto=MeFqUN8k&x=1").as_deref(),
            Some("MeFqUN8k")
        );
        assert_eq!(goto_from_scan("  goto=abc  ").as_deref(), Some("abc"));
    }

    #[test]
    fn scan_without_goto_is_none() {
        assert!(goto_from_scan("https://host/start.php?id=1").is_none());
        assert!(goto_from_scan("https://host/start.php?goto=").is_none());
        assert!(goto_from_scan("plain text").is_none());
        assert!(goto_from_scan("").is_none());
    }
}
