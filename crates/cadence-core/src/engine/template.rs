//! Template Renderer - Handles personalization of step content

use cadence_storage::models::ContactWithAccount;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("valid regex"));

/// Per-contact values available to `{{identifier}}` placeholders
pub type TemplateVariables = HashMap<String, String>;

/// Template renderer for personalizing step subject and body
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Replace every `{{identifier}}` with its variable.
    ///
    /// Identifiers without a variable stay in the output verbatim so a broken
    /// template is visible to whoever reads the mail.
    pub fn render(&self, template: &str, variables: &TemplateVariables) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Build the variable map for a contact and its account.
///
/// Missing or blank fields are left out of the map.
pub fn build_variables(recipient: &ContactWithAccount) -> TemplateVariables {
    let mut vars = TemplateVariables::new();
    let contact = &recipient.contact;

    insert_present(&mut vars, "firstName", contact.first_name.as_deref());
    insert_present(&mut vars, "lastName", contact.last_name.as_deref());

    let full_name = format!(
        "{} {}",
        contact.first_name.as_deref().unwrap_or(""),
        contact.last_name.as_deref().unwrap_or("")
    );
    insert_present(&mut vars, "fullName", Some(full_name.trim()));

    insert_present(&mut vars, "email", contact.email.as_deref());
    insert_present(&mut vars, "title", contact.title.as_deref());
    insert_present(&mut vars, "phone", contact.phone.as_deref());

    if let Some(account) = &recipient.account {
        insert_present(&mut vars, "company", Some(account.name.as_str()));
        insert_present(&mut vars, "industry", account.industry.as_deref());
        insert_present(&mut vars, "website", account.website.as_deref());
    }

    vars
}

fn insert_present(vars: &mut TemplateVariables, key: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        vars.insert(key.to_string(), value.to_string());
    }
}
