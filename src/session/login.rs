//! Login form discovery.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Paths tried in order when looking for a login form.
pub const LOGIN_PATHS: &[&str] = &[
    "/account/login",
    "/customer/account/login",
    "/login",
    "/user/login",
    "/signin",
    "/anmelden",
    "/my-account",
];

/// Page re-fetched after each attempt to check for a logout affordance.
pub const ACCOUNT_PATH: &str = "/account";

static LOGOUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)log\s*-?\s*out|sign\s*-?\s*out|abmelden|ausloggen").expect("static regex")
});

static FORM: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("form").ok());
static INPUT: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("input").ok());

/// A login form ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: Url,
    pub email_field: String,
    pub password_field: String,
    /// Hidden inputs (CSRF tokens and the like), copied verbatim.
    pub hidden: Vec<(String, String)>,
}

impl LoginForm {
    /// Form-encoded body for the POST.
    pub fn fields(&self, identity: &str, secret: &str) -> Vec<(String, String)> {
        let mut fields = self.hidden.clone();
        fields.push((self.email_field.clone(), identity.to_string()));
        fields.push((self.password_field.clone(), secret.to_string()));
        fields
    }
}

/// Finds the first form holding both an email-like and a password-like input.
pub fn find_login_form(html: &str, page_url: &Url) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let (forms, inputs) = (FORM.as_ref()?, INPUT.as_ref()?);

    document.select(forms).find_map(|form| {
        let inputs: Vec<ElementRef<'_>> = form.select(inputs).collect();
        let password_field = inputs.iter().find_map(|input| {
            let (name, kind) = name_and_type(*input)?;
            (kind == "password" || name.to_lowercase().contains("pass")).then_some(name)
        })?;
        let email_field = inputs.iter().find_map(|input| {
            let (name, kind) = name_and_type(*input)?;
            if matches!(kind.as_str(), "password" | "hidden" | "submit" | "checkbox") {
                return None;
            }
            let lower = name.to_lowercase();
            let email_like = kind == "email"
                || ["email", "mail", "user", "login"]
                    .iter()
                    .any(|needle| lower.contains(needle));
            (email_like && name != password_field).then_some(name)
        })?;

        let hidden = inputs
            .iter()
            .filter_map(|input| {
                let (name, kind) = name_and_type(*input)?;
                (kind == "hidden").then(|| {
                    let value = input.value().attr("value").unwrap_or_default();
                    (name, value.to_string())
                })
            })
            .collect();

        let action = match form.value().attr("action").map(str::trim) {
            Some(action) if !action.is_empty() => page_url.join(action).ok()?,
            _ => page_url.clone(),
        };

        Some(LoginForm {
            action,
            email_field,
            password_field,
            hidden,
        })
    })
}

/// True when the page offers a way to log out, the only observable login state.
pub fn shows_logout(html: &str) -> bool {
    LOGOUT.is_match(html)
}

fn name_and_type(input: ElementRef<'_>) -> Option<(String, String)> {
    let name = input.value().attr("name")?.trim();
    if name.is_empty() {
        return None;
    }
    let kind = input
        .value()
        .attr("type")
        .unwrap_or("text")
        .trim()
        .to_lowercase();
    Some((name.to_string(), kind))
}
