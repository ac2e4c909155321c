use handlebars::Handlebars;
use serde_json::json;

use super::routes::{REMOTE_SIGN_OUT_PATH, SIGN_OUT_PATH};
use crate::error::Error;
use crate::types::Session;

const STATUS: &str = "status";
const SIGNING_OUT: &str = "signing_out";
const SIGNED_OUT: &str = "signed_out";

/// HTML pages, registered once at startup. Output is HTML-escaped.
pub(super) struct Pages {
    registry: Handlebars<'static>,
}

impl Pages {
    pub(super) fn new() -> Result<Self, Error> {
        let mut registry = Handlebars::new();
        for (name, template) in [
            (STATUS, include_str!("../../templates/status.hbs")),
            (SIGNING_OUT, include_str!("../../templates/signing_out.hbs")),
            (SIGNED_OUT, include_str!("../../templates/signed_out.hbs")),
        ] {
            registry
                .register_template_string(name, template)
                .map_err(|e| Error::Render(format!("template {name}: {e}")))?;
        }
        Ok(Self { registry })
    }

    /// Identity, claims in session order, the access token or the
    /// acquisition error, and the sign-out links.
    pub(super) fn status(&self, session: &Session, token: Result<&str, String>) -> Result<String, Error> {
        let claims: Vec<_> = session
            .claims
            .iter()
            .map(|c| json!({ "type": c.claim_type, "value": c.value }))
            .collect();
        let (access_token, token_error) = match token {
            Ok(t) => (Some(t), None),
            Err(e) => (None, Some(e)),
        };

        self.render(
            STATUS,
            &json!({
                "name": session.name,
                "claims": claims,
                "access_token": access_token,
                "token_error": token_error,
                "sign_out_path": SIGN_OUT_PATH,
                "remote_sign_out_path": REMOTE_SIGN_OUT_PATH,
            }),
        )
    }

    pub(super) fn signing_out(&self, name: Option<&str>) -> Result<String, Error> {
        self.render(SIGNING_OUT, &json!({ "name": name }))
    }

    pub(super) fn signed_out(&self) -> Result<String, Error> {
        self.render(SIGNED_OUT, &json!({}))
    }

    fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, Error> {
        self.registry
            .render(name, data)
            .map_err(|e| Error::Render(format!("{name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Claim;

    fn session() -> Session {
        Session::from_claims(vec![Claim::new("name", "Alice"), Claim::new("oid", "123")]).unwrap()
    }

    #[test]
    fn status_lists_claims_in_order() {
        let html = Pages::new().unwrap().status(&session(), Ok("at-1")).unwrap();

        let first = html.find("<tr><td>name</td><td>Alice</td></tr>").unwrap();
        let second = html.find("<tr><td>oid</td><td>123</td></tr>").unwrap();
        assert!(first < second);
        assert!(html.contains("access_token: at-1"));
        assert!(html.contains("href=\"/signout\""));
        assert!(html.contains("href=\"/signout-remote\""));
    }

    #[test]
    fn status_shows_token_error_inline() {
        let html = Pages::new()
            .unwrap()
            .status(&session(), Err("Interaction required".into()))
            .unwrap();

        assert!(html.contains("AcquireToken error: Interaction required"));
        assert!(!html.contains("access_token:"));
        assert!(html.contains("<td>Alice</td>"));
    }

    #[test]
    fn claim_values_are_escaped() {
        let session =
            Session::from_claims(vec![Claim::new("name", "<script>"), Claim::new("oid", "1")]).unwrap();
        let html = Pages::new().unwrap().status(&session, Ok("t")).unwrap();

        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn signing_out_names_user() {
        let pages = Pages::new().unwrap();

        assert!(pages.signing_out(Some("Alice")).unwrap().contains("Signing out Alice"));
        assert!(pages.signing_out(None).unwrap().contains("href=\"/\""));
    }

    #[test]
    fn signed_out_is_static() {
        let pages = Pages::new().unwrap();
        assert_eq!(pages.signed_out().unwrap(), pages.signed_out().unwrap());
        assert!(pages.signed_out().unwrap().contains("You have been signed out."));
    }
}
