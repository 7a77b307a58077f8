use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;

/// One markdown → Slack mrkdwn substitution.
struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

lazy_static! {
    // Applied in this order: headings are rewritten before their `[label](url)`
    // links so the heading rules still see a leading `#`.
    static ref RULES: Vec<Rule> = vec![
        // # Title -> bold, newspaper icon
        Rule {
            pattern: Regex::new(r"(?m)^# (.+)$").unwrap(),
            replacement: "*:newspaper: $1*",
        },
        // ## Title -> bold, page icon
        Rule {
            pattern: Regex::new(r"(?m)^## (.+)$").unwrap(),
            replacement: "*:page_facing_up: $1*",
        },
        Rule {
            pattern: Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap(),
            replacement: "<$2|$1>",
        },
        Rule {
            pattern: Regex::new(r"(?m)^[ \t]*[-*][ \t]+").unwrap(),
            replacement: "• ",
        },
        Rule {
            pattern: Regex::new(r"\n{3,}").unwrap(),
            replacement: "\n\n",
        },
    ];
}

/// Rewrite a markdown digest into Slack mrkdwn.
pub fn format_for_slack(markdown: &str) -> String {
    let mut content = markdown.to_string();
    for rule in RULES.iter() {
        content = rule
            .pattern
            .replace_all(&content, rule.replacement)
            .into_owned();
    }
    content.trim().to_string()
}

/// First line of every delivered digest.
pub fn banner(scope: &str, at: NaiveDateTime) -> String {
    format!(
        ":rocket: *{} Summary* - {}\n\n",
        scope,
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Banner followed by the Slack-formatted digest.
pub fn compose_message(markdown: &str, scope: &str, at: NaiveDateTime) -> String {
    let mut message = banner(scope, at);
    message.push_str(&format_for_slack(markdown));
    message
}

/// Short one-line failure notice posted instead of a digest.
pub fn error_notice(message: &str) -> String {
    format!(":warning: *arXiv Paper Processor Error*\n{}", message)
}
