//! Tracking Injector - routes links and opens through the tracking endpoints

use cadence_common::types::{EnrollmentId, StepId};
use cadence_common::{Error, Result};
use regex::{Captures, Regex};
use reqwest::Url;
use std::borrow::Cow;
use std::sync::LazyLock;

static ANCHOR_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<a\b[^>]*?\shref\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static CHAR_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|(amp|lt|gt|quot|apos));")
        .expect("valid regex")
});

static BODY_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</body\s*>").expect("valid regex"));

pub const CLICK_PATH: &str = "/api/track/click";
pub const OPEN_PATH: &str = "/api/track/open";
pub const UNSUBSCRIBE_PATH: &str = "/api/unsubscribe";

/// Rewrites outbound HTML for click/open tracking and appends the unsubscribe footer
#[derive(Debug, Clone)]
pub struct TrackingInjector {
    base: Url,
}

impl TrackingInjector {
    /// Create an injector for the public base URL the endpoints are served from
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid tracking base URL {}: {}", base_url, e)))?;
        Ok(Self { base })
    }

    /// Rewrite links, then add the open pixel and unsubscribe footer
    pub fn inject(&self, html: &str, enrollment_id: EnrollmentId, step_id: StepId) -> String {
        let rewritten = self.rewrite_links(html, enrollment_id, step_id);

        let pixel = format!(
            r#"<img src="{}" width="1" height="1" alt="" style="display:none;border:0;width:1px;height:1px;" />"#,
            self.open_url(enrollment_id, step_id)
        );
        let footer = format!(
            r#"<div style="margin-top:24px;font-size:12px;color:#888888;">If you'd rather not hear from us, <a href="{}">unsubscribe</a>.</div>"#,
            self.unsubscribe_url(enrollment_id)
        );

        let with_pixel = insert_before_body_close(&rewritten, &pixel);
        insert_before_body_close(&with_pixel, &footer)
    }

    /// Click-tracking redirect for `target`
    pub fn click_url(&self, enrollment_id: EnrollmentId, step_id: StepId, target: &str) -> String {
        self.endpoint(
            CLICK_PATH,
            &[
                ("eid", &enrollment_id.to_string()),
                ("sid", &step_id.to_string()),
                ("url", target),
            ],
        )
    }

    /// Open-tracking pixel URL
    pub fn open_url(&self, enrollment_id: EnrollmentId, step_id: StepId) -> String {
        self.endpoint(
            OPEN_PATH,
            &[
                ("eid", &enrollment_id.to_string()),
                ("sid", &step_id.to_string()),
            ],
        )
    }

    /// Unsubscribe URL, also used for the List-Unsubscribe header
    pub fn unsubscribe_url(&self, enrollment_id: EnrollmentId) -> String {
        self.endpoint(UNSUBSCRIBE_PATH, &[("eid", &enrollment_id.to_string())])
    }

    fn rewrite_links(&self, html: &str, enrollment_id: EnrollmentId, step_id: StepId) -> String {
        ANCHOR_HREF_RE
            .replace_all(html, |caps: &Captures| {
                let (href, quote) = match (caps.get(2), caps.get(3)) {
                    (Some(m), _) => (m.as_str(), '"'),
                    (None, Some(m)) => (m.as_str(), '\''),
                    (None, None) => return caps[0].to_string(),
                };

                let href = decode_char_refs(href);
                if !is_trackable(&href) {
                    return caps[0].to_string();
                }

                format!(
                    "{}{quote}{}{quote}",
                    &caps[1],
                    self.click_url(enrollment_id, step_id, &href)
                )
            })
            .into_owned()
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", prefix, path));
        url.set_query(None);
        url.set_fragment(None);
        url.query_pairs_mut().extend_pairs(params.iter().copied());
        url.to_string()
    }
}

/// Decode numeric and basic named character references in an attribute value
fn decode_char_refs(value: &str) -> Cow<'_, str> {
    CHAR_REF_RE.replace_all(value, |caps: &Captures| {
        let code = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(dec), _, _) => dec.as_str().parse::<u32>().ok(),
            (_, Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, _, Some(name)) => match name.as_str() {
                "amp" => Some('&' as u32),
                "lt" => Some('<' as u32),
                "gt" => Some('>' as u32),
                "quot" => Some('"' as u32),
                _ => Some('\'' as u32),
            },
            _ => None,
        };
        match code.and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    })
}

fn is_trackable(href: &str) -> bool {
    let href = href.trim();
    if href.is_empty() {
        return false;
    }
    let lower = href.to_ascii_lowercase();
    !lower.contains("unsubscribe") && !lower.starts_with("mailto:")
}

/// Insert `fragment` before the last `</body>`, or append it
fn insert_before_body_close(html: &str, fragment: &str) -> String {
    match BODY_CLOSE_RE.find_iter(html).last() {
        Some(close) => {
            let mut out = String::with_capacity(html.len() + fragment.len());
            out.push_str(&html[..close.start()]);
            out.push_str(fragment);
            out.push_str(&html[close.start()..]);
            out
        }
        None => format!("{}{}", html, fragment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn injector() -> TrackingInjector {
        TrackingInjector::new("https://crm.example.com").unwrap()
    }

    #[test]
    fn test_unsubscribe_links_are_not_rewritten() {
        let eid = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let html = r#"<a href="https://x.com/unsub?eid=1">Unsubscribe</a> <a href="https://x.com/page">Page</a>"#;

        let out = injector().rewrite_links(html, eid, sid);

        assert!(out.contains(r#"<a href="https://x.com/unsub?eid=1">Unsubscribe</a>"#));
        assert!(!out.contains(r#"href="https://x.com/page""#));
        let expected = format!(
            "https://crm.example.com/api/track/click?eid={}&sid={}&url=https%3A%2F%2Fx.com%2Fpage",
            eid, sid
        );
        assert!(out.contains(&expected), "{}", out);
    }

    #[test]
    fn test_mailto_and_single_quotes() {
        let eid = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let html = r#"<a href="mailto:sales@acme.io">Mail</a><A class="btn" HREF='https://acme.io/demo'>Demo</A>"#;

        let out = injector().rewrite_links(html, eid, sid);

        assert!(out.contains(r#"href="mailto:sales@acme.io""#));
        assert!(out.contains("HREF='https://crm.example.com/api/track/click?"));
    }

    #[test]
    fn test_character_references_are_decoded_before_redirect() {
        let eid = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let html = r#"<a href="https://x.com/p?a=1&amp;b=2&#38;c=&#x33;">Pricing</a>"#;

        let out = injector().rewrite_links(html, eid, sid);

        let expected = format!(
            "https://crm.example.com/api/track/click?eid={}&sid={}&url=https%3A%2F%2Fx.com%2Fp%3Fa%3D1%26b%3D2%26c%3D3",
            eid, sid
        );
        assert!(out.contains(&expected), "{}", out);
        assert!(!out.contains("amp%3B"), "{}", out);
    }

    #[test]
    fn test_entity_encoded_unsubscribe_is_left_alone() {
        let html = r#"<a href="https://x.com/&#117;nsubscribe">Leave</a>"#;

        let out = injector().rewrite_links(html, Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(out, html);
    }

    #[test]
    fn test_data_href_is_not_a_link() {
        let eid = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let html = r#"<a data-href="https://x.com/tip">Tip</a><a data-href="https://x.com/other" href="https://x.com/real">Real</a>"#;

        let out = injector().rewrite_links(html, eid, sid);

        assert!(out.contains(r#"<a data-href="https://x.com/tip">Tip</a>"#), "{}", out);
        assert!(out.contains(r#"data-href="https://x.com/other""#), "{}", out);
        assert!(!out.contains(r#"href="https://x.com/real""#), "{}", out);
        assert!(out.contains("url=https%3A%2F%2Fx.com%2Freal"), "{}", out);
        assert_eq!(out.matches("/api/track/click").count(), 1);
    }

    #[test]
    fn test_pixel_and_footer_before_last_body_close() {
        let eid = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let html = "<html><BODY><p>Hello</p></Body></html>";

        let out = injector().inject(html, eid, sid);

        let pixel_at = out.find("/api/track/open?").unwrap();
        let footer_at = out.find("/api/unsubscribe?eid=").unwrap();
        let close_at = out.find("</Body>").unwrap();
        assert!(pixel_at < footer_at);
        assert!(footer_at < close_at);
        assert!(out.ends_with("</Body></html>"));
    }

    #[test]
    fn test_fragment_without_body_gets_appended() {
        let eid = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let out = injector().inject("<p>Hi</p>", eid, sid);

        assert!(out.starts_with("<p>Hi</p><img "));
        assert!(out.ends_with("</div>"));
        // the footer link survives untouched
        assert!(out.contains(&format!(
            r#"<a href="https://crm.example.com/api/unsubscribe?eid={}">unsubscribe</a>"#,
            eid
        )));
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let injector = TrackingInjector::new("https://example.com/crm/").unwrap();
        let eid = Uuid::nil();
        assert_eq!(
            injector.unsubscribe_url(eid),
            format!("https://example.com/crm/api/unsubscribe?eid={}", eid)
        );
    }
}
