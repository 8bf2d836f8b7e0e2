//! Token listing and rule description

use super::output;
use super::session::{Session, SessionConfig};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::path::PathBuf;

/// Configuration for tokens command
pub struct TokensConfig {
    pub session: SessionConfig,
    /// Only tokens containing this text
    pub find: Option<String>,
    /// Only tokens carrying this tag
    pub tag: Option<String>,
    /// List tags instead of tokens
    pub tags: bool,
    pub output_format: Option<String>,
    pub output_file: Option<PathBuf>,
}

/// List registered tokens or tags
pub fn tokens(config: TokensConfig) -> Result<()> {
    let session = Session::open(&config.session)?;
    let registry = session.service.registry();
    let partial = config.find.as_deref().unwrap_or("");

    let rows: Vec<Value> = if config.tags {
        registry
            .find_tags(partial)
            .into_iter()
            .map(|tag| {
                let tokens = registry.tokens_with_tag(&tag);
                json!({"tag": tag, "tokens": tokens.len()})
            })
            .collect()
    } else {
        let found = registry.find_tokens(partial);
        let found = match &config.tag {
            Some(tag) => {
                let tagged = registry.tokens_with_tag(tag);
                found.intersection(&tagged).cloned().collect()
            }
            None => found,
        };
        found
            .into_iter()
            .map(|token| {
                let tags: Vec<String> = registry.token_tags(&token).into_iter().collect();
                let datatype = registry.default_datatype(&token).ok().flatten();
                json!({"token": token, "datatype": datatype, "tags": tags})
            })
            .collect()
    };

    let format = output::OutputFormat::parse(config.output_format.as_deref().unwrap_or("table"));
    output::print_output(&Value::Array(rows), format, config.output_file.as_deref())
}

/// Configuration for rule command
pub struct RuleConfig {
    pub session: SessionConfig,
    pub token: String,
    pub output_format: Option<String>,
    pub output_file: Option<PathBuf>,
}

/// Describe the rule behind a token
pub fn describe(config: RuleConfig) -> Result<()> {
    let session = Session::open(&config.session)?;
    let value = describe_rule(&session, &config.token)?;
    let format = output::OutputFormat::parse(config.output_format.as_deref().unwrap_or("pretty"));
    output::print_output(&value, format, config.output_file.as_deref())
}

fn describe_rule(session: &Session, token: &str) -> Result<Value> {
    let rule = session
        .service
        .get_rule(token)
        .with_context(|| format!("Cannot describe '{token}'"))?;
    let tags: Vec<String> = session
        .service
        .registry()
        .token_tags(token)
        .into_iter()
        .collect();

    Ok(json!({
        "token": token,
        "rule": format!("{rule:?}"),
        "datatype": rule.default_datatype(),
        "parameters": rule.parameters(),
        "dependencies": rule.dependencies(),
        "ttlSeconds": rule.ttl().map(|t| t.num_seconds()),
        "tags": tags,
    }))
}
