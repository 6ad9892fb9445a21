//! HTML fragment parser of the memory host.
//!
//! Covers what server-rendered fragments need: elements with quoted,
//! unquoted and bare attributes, void and self-closing elements, text with
//! the common entities, comments and doctypes (both dropped).

use ariadne::{Config, Label, Report, ReportKind, Source};
use chumsky::prelude::*;

use crate::error::Error;

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Markup {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<Markup>,
    },
    Text(String),
    Comment,
}

pub(super) const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

type ParseError<'src> = Rich<'src, char>;

pub(super) fn parse(html: &str) -> Result<Vec<Markup>, Error> {
    fragment().parse(html).into_result().map_err(|errors| report(errors, html))
}

fn fragment<'src>() -> impl Parser<'src, &'src str, Vec<Markup>, extra::Err<ParseError<'src>>> {
    let tag_name = any()
        .filter(|character: &char| {
            character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | ':')
        })
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|name: &str| name.to_ascii_lowercase());

    let attribute_name = none_of(" \t\r\n\"'=<>/")
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|name: &str| name.to_ascii_lowercase());

    let double_quoted = just('"')
        .ignore_then(none_of('"').repeated().to_slice())
        .then_ignore(just('"'));
    let single_quoted = just('\'')
        .ignore_then(none_of('\'').repeated().to_slice())
        .then_ignore(just('\''));
    let unquoted = none_of(" \t\r\n\"'=<>`").repeated().at_least(1).to_slice();
    let attribute_value = choice((double_quoted, single_quoted, unquoted)).map(decode_entities);

    let attribute = attribute_name
        .then(just('=').padded().ignore_then(attribute_value).or_not())
        .map(|(name, value)| (name, value.unwrap_or_default()));
    let attributes = attribute.padded().repeated().collect::<Vec<_>>();

    // `<!-- ... -->` and `<!DOCTYPE ...>`
    let comment = choice((
        just("<!--")
            .then(any().and_is(just("-->").not()).repeated())
            .then(just("-->"))
            .ignored(),
        just("<!")
            .then(none_of('>').repeated())
            .then(just('>'))
            .ignored(),
    ))
    .to(Markup::Comment);

    let text = none_of('<')
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|text: &str| Markup::Text(decode_entities(text)));

    recursive(|node| {
        let open = just('<')
            .ignore_then(tag_name.clone())
            .then(attributes)
            .then_ignore(text::whitespace());

        let self_closing = open
            .clone()
            .then_ignore(just("/>"))
            .map(|(tag, attributes)| Markup::Element {
                tag,
                attributes,
                children: Vec::new(),
            });

        let void = open
            .clone()
            .then_ignore(just('>'))
            .filter(|(tag, _): &(String, Vec<(String, String)>)| {
                VOID_ELEMENTS.contains(&tag.as_str())
            })
            .map(|(tag, attributes)| Markup::Element {
                tag,
                attributes,
                children: Vec::new(),
            });

        let close = just("</")
            .ignore_then(tag_name)
            .then_ignore(text::whitespace())
            .then_ignore(just('>'));

        let element = open
            .then_ignore(just('>'))
            .then(node.repeated().collect::<Vec<_>>())
            .then(close)
            .try_map(|(((tag, attributes), children), closing), span| {
                if tag == closing {
                    Ok(Markup::Element {
                        tag,
                        attributes,
                        children,
                    })
                } else {
                    Err(ParseError::custom(
                        span,
                        format!("Closing tag </{closing}> does not match <{tag}>"),
                    ))
                }
            });

        choice((comment, self_closing, void, element, text))
    })
    .repeated()
    .collect::<Vec<_>>()
    .then_ignore(end())
}

pub(super) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_owned();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

pub(super) fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(super) fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn report(errors: Vec<ParseError<'_>>, html: &str) -> Error {
    let filename = "fragment.html";
    let mut report = String::new();
    for error in errors {
        let mut bytes = Vec::new();
        let written = Report::build(ReportKind::Error, (filename, error.span().into_range()))
            .with_config(Config::default().with_color(false))
            .with_message(error.to_string())
            .with_label(
                Label::new((filename, error.span().into_range()))
                    .with_message(error.reason().to_string()),
            )
            .finish()
            .write((filename, Source::from(html)), &mut bytes);
        match written {
            Ok(()) => report.push_str(&String::from_utf8_lossy(&bytes)),
            Err(_) => report.push_str(&error.to_string()),
        }
    }
    Error::Markup { report }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, attributes: &[(&str, &str)], children: Vec<Markup>) -> Markup {
        Markup::Element {
            tag: tag.to_owned(),
            attributes: attributes
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            children,
        }
    }

    #[test]
    fn parses_nested_elements_and_attributes() {
        let parsed = parse(
            r#"<div id="app" data-component='Modal' hidden><p class=lead>Hi &amp; bye</p><br><img src="a.png"/></div>"#,
        )
        .expect("valid markup");

        assert_eq!(
            parsed,
            vec![element(
                "div",
                &[("id", "app"), ("data-component", "Modal"), ("hidden", "")],
                vec![
                    element("p", &[("class", "lead")], vec![Markup::Text("Hi & bye".into())]),
                    element("br", &[], vec![]),
                    element("img", &[("src", "a.png")], vec![]),
                ],
            )]
        );
    }

    #[test]
    fn keeps_json_attribute_values() {
        let parsed = parse(r#"<i data-component-props='{"title": "x", "n": [1, 2]}'></i>"#)
            .expect("valid markup");
        assert_eq!(
            parsed,
            vec![element(
                "i",
                &[("data-component-props", r#"{"title": "x", "n": [1, 2]}"#)],
                vec![],
            )]
        );
    }

    #[test]
    fn comments_and_doctype_are_recognised() {
        let parsed = parse("<!DOCTYPE html><!-- note --><span>a</span>").expect("valid markup");
        assert_eq!(
            parsed,
            vec![
                Markup::Comment,
                Markup::Comment,
                element("span", &[], vec![Markup::Text("a".into())]),
            ]
        );
    }

    #[test]
    fn mismatched_closing_tag_is_reported() {
        let error = parse("<div><span></div></span>").err().expect("invalid markup");
        let Error::Markup { report } = error else {
            panic!("expected a markup error, got {error:?}");
        };
        assert!(report.contains("fragment.html"));
    }
}
