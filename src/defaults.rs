//! Built-in rule registry
//!
//! The Hentai-Foundry rule set ships as the seed configuration: it is
//! written into storage whenever the classes or parsers namespaces are
//! empty at startup.

use crate::classifier::{StringMatcher, UrlClass, UrlKind};
use crate::parser::{OpKind, Operation, OutputType, Parser};

/// The built-in URL classes.
pub fn default_classes() -> Vec<UrlClass> {
    vec![
        UrlClass {
            name: "Hentai-Foundry Post".to_string(),
            kind: UrlKind::Post,
            priority: 0,
            domain: "hentai-foundry.com".to_string(),
            path: vec![
                StringMatcher::exact("pictures"),
                StringMatcher::exact("user"),
                StringMatcher::regex("[A-Za-z0-9_-]+"),
                StringMatcher::regex("digits"),
                StringMatcher::regex("any").with_default(""),
            ],
            query: vec![],
            allow_http: false,
            match_subdomain: true,
            allow_subdomain: true,
        },
        UrlClass {
            name: "Hentai-Foundry Gallery".to_string(),
            kind: UrlKind::List,
            priority: 0,
            domain: "hentai-foundry.com".to_string(),
            path: vec![
                StringMatcher::exact("pictures"),
                StringMatcher::exact("user"),
                StringMatcher::regex("[A-Za-z0-9_-]+"),
            ],
            query: vec![],
            allow_http: false,
            match_subdomain: true,
            allow_subdomain: true,
        },
        UrlClass {
            name: "Hentai-Foundry Profile".to_string(),
            kind: UrlKind::List,
            priority: 0,
            domain: "hentai-foundry.com".to_string(),
            path: vec![
                StringMatcher::exact("user"),
                StringMatcher::regex("[A-Za-z0-9_-]+"),
                StringMatcher::exact("profile"),
            ],
            query: vec![],
            allow_http: false,
            match_subdomain: true,
            allow_subdomain: true,
        },
    ]
}

/// The built-in parsers.
pub fn default_parsers() -> Vec<Parser> {
    vec![
        Parser {
            name: "hf consent".to_string(),
            output: OutputType::Follow,
            operations: vec![
                Operation::new(OpKind::Xpath, "//a[@id='frontPage_link']/@href"),
                Operation::new(OpKind::Suffix, "&size=728"),
            ],
            urls: vec![
                "http://www.hentai-foundry.com/pictures/user/Calm/801362/Patreon-70".to_string(),
                "http://hentai-foundry.com/user/Calm/profile".to_string(),
                "http://www.hentai-foundry.com/pictures/user/Calm".to_string(),
            ],
        },
        Parser {
            name: "hf next".to_string(),
            output: OutputType::Next,
            operations: vec![Operation::new(
                OpKind::Xpath,
                r#"//*[@id="yw2"]/li[contains(@class, 'next')]/a/@href"#,
            )],
            urls: vec!["http://www.hentai-foundry.com/pictures/user/Calm".to_string()],
        },
        Parser {
            name: "hf post".to_string(),
            output: OutputType::Follow,
            operations: vec![Operation::new(
                OpKind::Xpath,
                r#"//div[@id="yw0"]//a[contains(@class, 'thumbLink')]/@href"#,
            )],
            urls: vec![
                "http://hentai-foundry.com/user/Calm/profile".to_string(),
                "http://www.hentai-foundry.com/pictures/user/Calm".to_string(),
            ],
        },
        Parser {
            name: "hf content @src".to_string(),
            output: OutputType::Content,
            operations: vec![Operation::new(
                OpKind::Xpath,
                r#"//*[@id="picBox"]//img/@src"#,
            )],
            urls: vec![
                "http://www.hentai-foundry.com/pictures/user/Calm/801362/Patreon-70".to_string(),
            ],
        },
        Parser {
            name: "hf content @onclick".to_string(),
            output: OutputType::Content,
            operations: vec![
                Operation::new(OpKind::Xpath, r#"//*[@id="picBox"]//img/@onclick"#),
                Operation::new(OpKind::Regex, r#"//pictures.hentai-foundry[^"']+"#),
            ],
            urls: vec![
                "http://www.hentai-foundry.com/pictures/user/Calm/801362/Patreon-70".to_string(),
            ],
        },
        Parser {
            name: "hf content tags".to_string(),
            output: OutputType::Tag,
            operations: vec![Operation::new(OpKind::Xpath, r#"//a[@rel="tag"]"#)],
            urls: vec![
                "http://www.hentai-foundry.com/pictures/user/Calm/801362/Patreon-70".to_string(),
            ],
        },
        Parser {
            name: "hf content creator".to_string(),
            output: OutputType::Tag,
            operations: vec![
                Operation::new(OpKind::Xpath, r#"//*[@id="picBox"]//a"#),
                Operation::new(OpKind::Prefix, "creator:"),
            ],
            urls: vec![
                "http://www.hentai-foundry.com/pictures/user/Calm/801362/Patreon-70".to_string(),
            ],
        },
    ]
}
