//! Login page scraping: turn an HTML page plus credentials into a form submission.
//!
//! The IdP page contract is positional: the first `<form>` on the page is the login
//! form and must hold the username, password and submit controls. Everything about
//! the page structure lives here so the retry logic never sees HTML.

use crate::credentials::Credentials;
use crate::error::{JanusError, Result};
use reqwest::{Method, Url};
use scraper::{ElementRef, Html, Selector};

/// Names of the login form controls.
#[derive(Debug, Clone)]
pub struct LoginFields {
    pub username: String,
    pub password: String,
    pub submit: String,
}

impl Default for LoginFields {
    fn default() -> Self {
        Self {
            username: "username".to_string(),
            password: "password".to_string(),
            submit: "submit".to_string(),
        }
    }
}

/// A form ready to be sent: where, how, and the encoded controls in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub method: Method,
    pub action: Url,
    pub fields: Vec<(String, String)>,
}

/// Input names that mark a SAML HTTP-POST binding hand-off page.
const SAML_POST_FIELDS: [&str; 2] = ["SAMLResponse", "SAMLRequest"];

fn selector(css: &'static str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| JanusError::LoginForm(format!("selector {css:?}: {e:?}")))
}

/// Fill the first form of `html` with the credentials and click its submit control.
pub fn build_login_submission(
    html: &str,
    page_url: &Url,
    fields: &LoginFields,
    credentials: &Credentials,
) -> Result<FormSubmission> {
    let doc = Html::parse_document(html);
    let form_sel = selector("form")?;
    let form = doc
        .select(&form_sel)
        .next()
        .ok_or_else(|| JanusError::LoginForm(format!("no form on login page {page_url}")))?;

    let mut controls = successful_controls(form, Some(&fields.submit))?;
    for (name, value) in [
        (&fields.username, &credentials.username),
        (&fields.password, &credentials.password),
    ] {
        let slot = controls
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| JanusError::LoginForm(format!("form has no input named {name:?}")))?;
        slot.1 = value.clone();
    }
    if !has_submit_control(form, &fields.submit)? {
        return Err(JanusError::LoginForm(format!(
            "form has no submit control named {:?}",
            fields.submit
        )));
    }

    Ok(FormSubmission {
        method: form_method(form),
        action: form_action(form, page_url)?,
        fields: controls,
    })
}

/// The SAML POST-binding form a browser would auto-submit via JavaScript, if the page is one.
pub fn find_auto_submit(html: &str, page_url: &Url) -> Result<Option<FormSubmission>> {
    let doc = Html::parse_document(html);
    let form_sel = selector("form")?;
    for form in doc.select(&form_sel) {
        let controls = successful_controls(form, None)?;
        if controls
            .iter()
            .any(|(name, _)| SAML_POST_FIELDS.contains(&name.as_str()))
        {
            return Ok(Some(FormSubmission {
                method: form_method(form),
                action: form_action(form, page_url)?,
                fields: controls,
            }));
        }
    }
    Ok(None)
}

fn form_method(form: ElementRef<'_>) -> Method {
    match form.value().attr("method") {
        Some(m) if m.trim().eq_ignore_ascii_case("post") => Method::POST,
        _ => Method::GET,
    }
}

fn form_action(form: ElementRef<'_>, page_url: &Url) -> Result<Url> {
    match form.value().attr("action").map(str::trim) {
        None | Some("") => Ok(page_url.clone()),
        Some(action) => page_url
            .join(action)
            .map_err(|e| JanusError::invalid_url(action, e)),
    }
}

fn has_submit_control(form: ElementRef<'_>, submit: &str) -> Result<bool> {
    let sel = selector("input, button")?;
    Ok(form
        .select(&sel)
        .any(|el| el.value().attr("name") == Some(submit)))
}

/// Controls a browser would send, in document order. `clicked` names the submit
/// control that triggered the submission; other submit buttons are left out.
fn successful_controls(
    form: ElementRef<'_>,
    clicked: Option<&str>,
) -> Result<Vec<(String, String)>> {
    let controls_sel = selector("input, button, textarea, select")?;
    let option_sel = selector("option")?;
    let mut out = Vec::new();
    for el in form.select(&controls_sel) {
        let attrs = el.value();
        let Some(name) = attrs.attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if attrs.attr("disabled").is_some() {
            continue;
        }
        let value = attrs.attr("value").unwrap_or("");
        match attrs.name() {
            "input" => {
                let kind = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "checkbox" | "radio" => {
                        if attrs.attr("checked").is_some() {
                            let v = attrs.attr("value").unwrap_or("on");
                            out.push((name.to_string(), v.to_string()));
                        }
                    }
                    "submit" | "image" => {
                        if clicked == Some(name) {
                            out.push((name.to_string(), value.to_string()));
                        }
                    }
                    "button" | "reset" | "file" => {}
                    _ => out.push((name.to_string(), value.to_string())),
                }
            }
            "button" => {
                let kind = attrs.attr("type").unwrap_or("submit").to_ascii_lowercase();
                if kind == "submit" && clicked == Some(name) {
                    out.push((name.to_string(), value.to_string()));
                }
            }
            "textarea" => out.push((name.to_string(), el.text().collect())),
            "select" => {
                let mut options = el.select(&option_sel);
                let chosen = el
                    .select(&option_sel)
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| options.next());
                if let Some(opt) = chosen {
                    let v = opt
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| opt.text().collect::<String>().trim().to_string());
                    out.push((name.to_string(), v));
                }
            }
            _ => {}
        }
    }
    Ok(out)
}
