//! Message templates and `{{placeholder}}` rendering.
//!
//! Rendering never fails: a placeholder with no matching variable is left
//! in the output as written, so a missing optional field does not block a
//! send.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::outreach::Channel;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type MessageTemplateId = TypedId<MessageTemplate>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MessageTemplate {
    #[serde(rename = "_id")]
    pub id: MessageTemplateId,
    pub name: String,
    pub channel: Channel,
    pub service_type: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl TypedIdMarker for MessageTemplate {
    fn tag() -> &'static str {
        "TPL"
    }
}

/// A subject/body pair ready to be turned into jobs.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateContent {
    pub subject: Option<String>,
    pub body: String,
}

impl From<MessageTemplate> for TemplateContent {
    fn from(template: MessageTemplate) -> TemplateContent {
        TemplateContent {
            subject: template.subject,
            body: template.body,
        }
    }
}

impl TemplateContent {
    /// Used for a launch when no stored template applies.
    pub fn default_launch(channel: Channel) -> TemplateContent {
        match channel {
            Channel::Email => TemplateContent {
                subject: Some("Exploring opportunities near {{baseLocation}}".to_owned()),
                body: "<p>Hi {{firstName}},</p>\
                       <p>We will be working near {{baseLocation}} soon and wanted to reach out \
                       to {{organization}} about performance and workshop opportunities.</p>\
                       <p>Would you be open to a short conversation?</p>"
                    .to_owned(),
            },
            Channel::Sms => TemplateContent {
                subject: None,
                body: "Hi {{firstName}}, we will be near {{baseLocation}} soon. \
                       Interested in talking about performance opportunities?"
                    .to_owned(),
            },
        }
    }

    /// Used for a follow-up when neither a numbered nor a generic
    /// follow-up template is stored.
    pub fn default_follow_up() -> TemplateContent {
        TemplateContent {
            subject: Some("Following up".to_owned()),
            body: "Hi {{firstName}}, following up on my previous message. \
                   Still interested in discussing opportunities?"
                .to_owned(),
        }
    }
}

/// Name of the stored template for follow-up `number`.
pub fn follow_up_template_name(number: u32) -> String {
    format!("follow-up-{}", number)
}

pub const GENERIC_FOLLOW_UP_TEMPLATE: &str = "follow-up-generic";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VariableCheck {
    pub valid: bool,
    pub missing: Vec<String>,
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{(\w+)\}\}").unwrap();
}

/// Fills each `{{name}}` from `variables`. Names with no value are left
/// in place.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |captures: &Captures| match variables.get(&captures[1]) {
            Some(value) => value.clone(),
            None => captures[0].to_owned(),
        })
        .into_owned()
}

/// Placeholder names in order of appearance, repeats included.
pub fn extract_template_variables(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|captures| captures[1].to_owned())
        .collect()
}

pub fn validate_template_variables(
    template: &str,
    variables: &HashMap<String, String>,
) -> VariableCheck {
    let missing: Vec<String> = extract_template_variables(template)
        .into_iter()
        .filter(|name| !variables.contains_key(name))
        .collect();

    VariableCheck {
        valid: missing.is_empty(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unresolved_placeholders_are_kept() {
        let rendered = render_template(
            "Hi {{firstName}} from {{organization}}",
            &vars(&[("firstName", "Ana")]),
        );

        assert_eq!(rendered, "Hi Ana from {{organization}}");
    }

    #[test]
    fn repeated_placeholders_all_render() {
        let rendered = render_template(
            "{{firstName}}, yes {{firstName}}!",
            &vars(&[("firstName", "Ana")]),
        );

        assert_eq!(rendered, "Ana, yes Ana!");
    }

    #[test]
    fn stray_braces_pass_through() {
        let rendered = render_template(
            "{{ not one }} {{}} {{firstName} {{firstName}}",
            &vars(&[("firstName", "Ana")]),
        );

        assert_eq!(rendered, "{{ not one }} {{}} {{firstName} Ana");
    }

    #[test]
    fn extracts_names_in_order() {
        assert_eq!(
            extract_template_variables("Hello {{firstName}} from {{organization}}"),
            vec!["firstName".to_string(), "organization".to_string()]
        );
    }

    #[test]
    fn validation_lists_missing_variables() {
        let check = validate_template_variables(
            "Hello {{firstName}} from {{organization}}",
            &vars(&[("firstName", "Ana")]),
        );

        assert!(!check.valid);
        assert_eq!(check.missing, vec!["organization".to_string()]);
    }
}
