use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser as CmarkParser, Tag, TagEnd};
use serde_json::{Map, Value as Json};

use crate::document::{
    Content, Document, OPTIONS_SECTION, QuestOption, State, TextRun, TextStyle,
};
use crate::parser::error::{ParseError, ParseErrorKind};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse markdown source into a [`Document`].
pub fn parse_document(source: &str, file_id: usize) -> Result<Document, Vec<ParseError>> {
    let parser = CmarkParser::new_ext(source, Options::ENABLE_STRIKETHROUGH);
    let events: Vec<(Event<'_>, Range<usize>)> = parser.into_offset_iter().collect();

    let mut state = ParseState::new(source, file_id);
    state.process_events(&events);
    state.finalize()
}

// ---------------------------------------------------------------------------
// Parse state
// ---------------------------------------------------------------------------

struct ParseState<'a> {
    source: &'a str,
    file_id: usize,
    /// Section currently being filled. `None` before the first heading.
    current: Option<SectionBuilder>,
    states: Vec<State>,
    /// Code found in options sections, in source order.
    config_code: Vec<(String, Range<usize>)>,
    errors: Vec<ParseError>,
}

struct SectionBuilder {
    name: String,
    span_start: usize,
    body: Vec<Content>,
    options: Vec<OptionBuilder>,
}

impl SectionBuilder {
    fn is_config(&self) -> bool {
        self.name == OPTIONS_SECTION
    }
}

struct OptionBuilder {
    collected: Collected,
    span: Range<usize>,
}

/// Flattened content of one or more markdown blocks.
#[derive(Default)]
struct Collected {
    contents: Vec<Content>,
    links: Vec<String>,
    /// The last content is a text run that may still grow.
    open_run: bool,
}

impl Collected {
    fn push_text(&mut self, text: &str, range: &Range<usize>, style: TextStyle, source: &str) {
        if self.open_run {
            if let Some(Content::Text(run)) = self.contents.last_mut() {
                if run.style == style {
                    run.text.push_str(text);
                    run.span.end = range.end;
                    run.raw = slice(source, &run.span);
                    return;
                }
            }
        }
        self.contents.push(Content::Text(TextRun {
            text: text.to_string(),
            raw: slice(source, range),
            style,
            ends_paragraph: false,
            span: range.clone(),
        }));
        self.open_run = true;
    }

    fn push(&mut self, content: Content) {
        self.seal();
        self.contents.push(content);
    }

    fn seal(&mut self) {
        self.open_run = false;
    }

    /// Flag the paragraph's final run, if the paragraph ends in text.
    fn end_paragraph(&mut self, started_at: usize) {
        if self.contents.len() <= started_at {
            return;
        }
        if let Some(Content::Text(run)) = self.contents.last_mut() {
            run.ends_paragraph = true;
        }
    }
}

impl<'a> ParseState<'a> {
    fn new(source: &'a str, file_id: usize) -> Self {
        ParseState {
            source,
            file_id,
            current: None,
            states: Vec::new(),
            config_code: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn process_events(&mut self, events: &[(Event<'_>, Range<usize>)]) {
        let mut i = 0;

        while i < events.len() {
            let (ref ev, ref range) = events[i];

            match ev {
                Event::Start(Tag::Heading { .. }) => {
                    i += 1;
                    let name = normalize_section_name(&collect_heading_text(events, &mut i));
                    self.close_section(range.start);
                    tracing::debug!(section = %name, "section");
                    self.current = Some(SectionBuilder {
                        name,
                        span_start: range.start,
                        body: Vec::new(),
                        options: Vec::new(),
                    });
                }

                // An unordered list turns the rest of a state into options
                Event::Start(Tag::List(None)) if self.takes_options() => {
                    i += 1;
                    self.collect_options(events, &mut i);
                }

                _ => {
                    let mut collected = Collected::default();
                    self.collect_block(events, &mut i, &mut collected);
                    self.route(collected, range);
                }
            }
        }
    }

    fn takes_options(&self) -> bool {
        self.current.as_ref().is_some_and(|s| !s.is_config())
    }

    /// Read list items until the list closes, one option per item.
    fn collect_options(&mut self, events: &[(Event<'_>, Range<usize>)], i: &mut usize) {
        while *i < events.len() {
            let (ref ev, ref range) = events[*i];
            match ev {
                Event::End(TagEnd::List(false)) => {
                    *i += 1;
                    break;
                }
                Event::Start(Tag::Item) => {
                    let mut collected = Collected::default();
                    self.collect_block(events, i, &mut collected);
                    if let Some(section) = self.current.as_mut() {
                        section.options.push(OptionBuilder {
                            collected,
                            span: range.clone(),
                        });
                    }
                }
                _ => {
                    *i += 1;
                }
            }
        }
    }

    /// Collect one block (a start tag through its matching end, or a single
    /// leaf event), flattening inline structure into content runs.
    fn collect_block(
        &self,
        events: &[(Event<'_>, Range<usize>)],
        i: &mut usize,
        out: &mut Collected,
    ) {
        let mut depth = 0usize;
        let mut styles: Vec<TextStyle> = Vec::new();
        let mut paragraphs: Vec<usize> = Vec::new();

        while let Some((ev, range)) = events.get(*i) {
            *i += 1;
            let style = styles.last().copied().unwrap_or_default();

            match ev {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().map(str::to_string)
                        }
                        CodeBlockKind::Indented => None,
                    };
                    let code = collect_text_until(events, i, |e| matches!(e, TagEnd::CodeBlock));
                    out.push(Content::Fence {
                        language,
                        code,
                        span: range.clone(),
                    });
                }
                Event::Start(tag) => {
                    depth += 1;
                    out.seal();
                    match tag {
                        Tag::Emphasis => styles.push(TextStyle::Emphasis),
                        Tag::Strong => styles.push(TextStyle::Strong),
                        Tag::Link { dest_url, .. } => out.links.push(dest_url.to_string()),
                        Tag::Paragraph | Tag::Item => paragraphs.push(out.contents.len()),
                        _ => {}
                    }
                }
                Event::End(tag_end) => {
                    depth = depth.saturating_sub(1);
                    out.seal();
                    match tag_end {
                        TagEnd::Emphasis | TagEnd::Strong => {
                            styles.pop();
                        }
                        TagEnd::Paragraph | TagEnd::Item => {
                            if let Some(started_at) = paragraphs.pop() {
                                out.end_paragraph(started_at);
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(s) => out.push_text(s, range, style, self.source),
                Event::SoftBreak | Event::HardBreak => out.push_text("\n", range, style, self.source),
                Event::Code(s) => out.push(Content::Code {
                    code: s.to_string(),
                    span: range.clone(),
                }),
                _ => out.seal(),
            }

            if depth == 0 {
                break;
            }
        }
    }

    /// Hand a collected block to the body, or to the latest option once options began.
    fn route(&mut self, collected: Collected, range: &Range<usize>) {
        let Some(section) = self.current.as_mut() else {
            if !collected.contents.is_empty() {
                tracing::debug!(at = range.start, "ignoring content before the first heading");
            }
            return;
        };

        match section.options.last_mut() {
            Some(option) => {
                option.collected.contents.extend(collected.contents);
                option.collected.links.extend(collected.links);
                option.collected.seal();
            }
            None => section.body.extend(collected.contents),
        }
    }

    fn close_section(&mut self, span_end: usize) {
        let Some(section) = self.current.take() else {
            return;
        };

        if section.is_config() {
            for content in section.body {
                match content {
                    Content::Fence { language, .. } if language.as_deref() == Some("comment") => {}
                    Content::Code { code, span } | Content::Fence { code, span, .. } => {
                        self.config_code.push((code, span));
                    }
                    Content::Text(_) => {}
                }
            }
            return;
        }

        let options = section
            .options
            .into_iter()
            .map(|builder| partition_option(builder.collected, builder.span))
            .collect();

        self.states.push(State {
            name: section.name,
            body: section.body,
            options,
            span: section.span_start..span_end,
        });
    }

    /// Shallow-merge every options-section object, later keys winning.
    fn merge_config(&mut self) -> Map<String, Json> {
        let mut merged = Map::new();
        for (code, span) in std::mem::take(&mut self.config_code) {
            match serde_json::from_str::<Json>(&code) {
                Ok(Json::Object(object)) => merged.extend(object),
                Ok(_) => self
                    .errors
                    .push(ParseError::new(ParseErrorKind::NotAnObject, span, self.file_id)),
                Err(err) => self.errors.push(ParseError::invalid_json(&err, span, self.file_id)),
            }
        }
        merged
    }

    fn finalize(mut self) -> Result<Document, Vec<ParseError>> {
        self.close_section(self.source.len());
        let options = self.merge_config();

        if self.errors.is_empty() {
            Ok(Document {
                options,
                states: self.states,
            })
        } else {
            Err(self.errors)
        }
    }
}

// ---------------------------------------------------------------------------
// Option partition
// ---------------------------------------------------------------------------

/// Split a list item into title, link, directives, preconditions and effects.
///
/// The first link anywhere in the item is the destination. The first non-blank
/// text run is the title. Code before the title is a precondition, or a
/// directive list when it starts with `@`. Everything non-blank after the
/// title is an effect.
fn partition_option(collected: Collected, span: Range<usize>) -> QuestOption {
    let mut option = QuestOption {
        text: None,
        link: collected.links.into_iter().next(),
        preconditions: Vec::new(),
        effects: Vec::new(),
        directives: Vec::new(),
        span,
    };

    for content in collected.contents {
        if option.text.is_some() {
            if !content.is_blank_text() {
                option.effects.push(content);
            }
            continue;
        }
        match content {
            Content::Text(run) => {
                let title = run.text.trim();
                if !title.is_empty() {
                    option.text = Some(title.to_string());
                }
            }
            Content::Code { ref code, .. } if code.starts_with('@') => {
                option
                    .directives
                    .extend(code.split_whitespace().map(str::to_string));
            }
            other => option.preconditions.push(other),
        }
    }

    option
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Collect heading text and code (all Text/Code events until End(Heading)).
fn collect_heading_text(events: &[(Event<'_>, Range<usize>)], i: &mut usize) -> String {
    let mut name = String::new();
    while *i < events.len() {
        let (ref ev, _) = events[*i];
        *i += 1;
        match ev {
            Event::End(TagEnd::Heading(_)) => break,
            Event::Text(s) | Event::Code(s) => name.push_str(s),
            Event::SoftBreak | Event::HardBreak => name.push(' '),
            _ => {}
        }
    }
    name
}

/// Strip leading/trailing whitespace, collapse interior whitespace.
fn normalize_section_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect all text content until a matching End tag.
fn collect_text_until(
    events: &[(Event<'_>, Range<usize>)],
    i: &mut usize,
    is_end: impl Fn(&TagEnd) -> bool,
) -> String {
    let mut text = String::new();
    while *i < events.len() {
        let (ref ev, _) = events[*i];
        *i += 1;
        match ev {
            Event::End(tag_end) if is_end(tag_end) => break,
            Event::Text(s) => text.push_str(s),
            _ => {}
        }
    }
    text
}

fn slice(source: &str, range: &Range<usize>) -> String {
    source.get(range.clone()).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Document {
        parse_document(source, 0).expect("parse failed")
    }

    fn texts(contents: &[Content]) -> Vec<String> {
        contents.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn headings_start_states_in_order() {
        let doc = parse("# Dock\n\nWaves.\n\n## The   Cellar\n\nDark.\n");
        let names: Vec<&str> = doc.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Dock", "The Cellar"]);
        assert_eq!(texts(&doc.states[0].body), vec!["Waves."]);
    }

    #[test]
    fn paragraph_final_run_is_flagged() {
        let doc = parse("# A\n\nHello *brave* world\n");
        let body = &doc.states[0].body;
        assert_eq!(texts(body), vec!["Hello ", "*brave*", " world"]);
        let flags: Vec<bool> = body
            .iter()
            .map(|c| matches!(c, Content::Text(r) if r.ends_paragraph))
            .collect();
        assert_eq!(flags, vec![false, false, true]);
    }

    #[test]
    fn soft_breaks_join_runs() {
        let doc = parse("# A\n\nfirst line\nsecond line\n");
        match &doc.states[0].body[..] {
            [Content::Text(run)] => {
                assert_eq!(run.text, "first line\nsecond line");
                assert_eq!(run.raw, "first line\nsecond line");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn list_items_become_options() {
        let doc = parse(
            "# A\n\nHello\n\n- `@once` `\"gold\" getContext` [Go north](#North) and `1 2 +`\n- Wait\n\n# North\n",
        );
        let state = &doc.states[0];
        assert_eq!(state.options.len(), 2);

        let first = &state.options[0];
        assert_eq!(first.text.as_deref(), Some("Go north"));
        assert_eq!(first.link.as_deref(), Some("#North"));
        assert_eq!(first.directives, vec!["@once"]);
        assert_eq!(texts(&first.preconditions), vec!["`\"gold\" getContext`"]);
        assert_eq!(texts(&first.effects), vec![" and ", "`1 2 +`"]);

        let second = &state.options[1];
        assert_eq!(second.text.as_deref(), Some("Wait"));
        assert_eq!(second.link, None);
        assert!(second.effects.is_empty());
    }

    #[test]
    fn content_after_options_joins_the_last_option() {
        let doc = parse("# A\n\n- [Leave](#B)\n\nYou walk away.\n\n# B\n");
        let option = &doc.states[0].options[0];
        assert_eq!(texts(&option.effects), vec!["You walk away."]);
    }

    #[test]
    fn options_section_is_merged_json() {
        let doc = parse(
            "# QUESTMARK-OPTIONS-HEADER\n\n```json\n{\"initial-state\": \"B\", \"x\": 1}\n```\n\n`{\"x\": 2}`\n\n# B\n",
        );
        assert_eq!(doc.states.len(), 1);
        assert_eq!(doc.options.get("initial-state"), Some(&Json::from("B")));
        assert_eq!(doc.options.get("x"), Some(&Json::from(2)));
    }

    #[test]
    fn bad_options_json_is_reported() {
        let errors = parse_document("# QUESTMARK-OPTIONS-HEADER\n\n`{nope`\n", 3).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].file_id, 3);
        assert!(matches!(errors[0].kind, ParseErrorKind::InvalidJson { .. }));
        assert!(!errors[0].to_diagnostic().notes.is_empty());
    }

    #[test]
    fn non_object_options_are_reported() {
        let errors = parse_document("# QUESTMARK-OPTIONS-HEADER\n\n`[1, 2]`\n", 0).unwrap_err();
        assert_eq!(errors[0].kind, ParseErrorKind::NotAnObject);
        assert!(errors[0].to_string().starts_with("options section entries must be JSON objects"));
    }

    #[test]
    fn fences_keep_their_language() {
        let doc = parse("# A\n\n```comment\nignored\n```\n\n```\n1 emit\n```\n");
        match &doc.states[0].body[..] {
            [Content::Fence { language: l1, .. }, Content::Fence { language: l2, code, .. }] => {
                assert_eq!(l1.as_deref(), Some("comment"));
                assert_eq!(l2, &None);
                assert_eq!(code, "1 emit\n");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn text_before_the_first_heading_is_ignored() {
        let doc = parse("preamble\n\n# A\n\nbody\n");
        assert_eq!(doc.states.len(), 1);
        assert_eq!(texts(&doc.states[0].body), vec!["body"]);
    }
}
