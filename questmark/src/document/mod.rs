pub mod config;

use std::fmt;
use std::ops::Range;

use serde_json::{Map, Value as Json};

/// Name of the reserved section whose code is read as JSON configuration.
pub const OPTIONS_SECTION: &str = "QUESTMARK-OPTIONS-HEADER";

/// The `@once` directive: an option that disappears after it has been chosen.
pub const ONCE_DIRECTIVE: &str = "@once";

/// A parsed questmark document: global options plus its states, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Shallow merge of every JSON object in the options section.
    pub options: Map<String, Json>,
    pub states: Vec<State>,
}

impl Document {
    pub fn empty() -> Self {
        Document {
            options: Map::new(),
            states: Vec::new(),
        }
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }
}

/// A named section: narrative body followed by the choices offered at its end.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Heading text, whitespace-normalized. Also the state's label.
    pub name: String,
    pub body: Vec<Content>,
    pub options: Vec<QuestOption>,
    /// Byte span of the whole section.
    pub span: Range<usize>,
}

/// One selectable choice, built from an unordered-list item.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestOption {
    /// Title shown to the player.
    pub text: Option<String>,
    /// Link destination as written, e.g. `#Cellar`.
    pub link: Option<String>,
    /// Code that must leave a value > 0 for the option to be offered.
    pub preconditions: Vec<Content>,
    /// Content run or emitted when the option is chosen.
    pub effects: Vec<Content>,
    /// Annotations such as `@once`.
    pub directives: Vec<String>,
    pub span: Range<usize>,
}

impl QuestOption {
    pub fn has_directive(&self, directive: &str) -> bool {
        self.directives.iter().any(|d| d == directive)
    }
}

/// Narrative content, flattened to what the compiler cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(TextRun),
    /// Inline code span: compiled.
    Code { code: String, span: Range<usize> },
    /// Fenced or indented code block: compiled unless its language is `comment`.
    Fence {
        language: Option<String>,
        code: String,
        span: Range<usize>,
    },
}

impl Content {
    pub fn span(&self) -> &Range<usize> {
        match self {
            Content::Text(run) => &run.span,
            Content::Code { span, .. } | Content::Fence { span, .. } => span,
        }
    }

    pub fn is_blank_text(&self) -> bool {
        matches!(self, Content::Text(run) if run.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextStyle {
    #[default]
    Plain,
    Emphasis,
    Strong,
}

/// A run of text sharing one style.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    /// Text as the markdown parser delivered it; line breaks become `\n`.
    pub text: String,
    /// The run's source slice, escapes and original spacing intact.
    pub raw: String,
    pub style: TextStyle,
    /// Last run of its paragraph or list item.
    pub ends_paragraph: bool,
    pub span: Range<usize>,
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(run) => match run.style {
                TextStyle::Plain => write!(f, "{}", run.text),
                TextStyle::Emphasis => write!(f, "*{}*", run.text),
                TextStyle::Strong => write!(f, "**{}**", run.text),
            },
            Content::Code { code, .. } => write!(f, "`{}`", code),
            Content::Fence { language, code, .. } => {
                writeln!(f, "```{}", language.as_deref().unwrap_or(""))?;
                write!(f, "{}", code)?;
                write!(f, "```")
            }
        }
    }
}

impl fmt::Display for QuestOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-")?;
        for directive in &self.directives {
            write!(f, " `{}`", directive)?;
        }
        for precondition in &self.preconditions {
            write!(f, " {}", precondition)?;
        }
        match (&self.text, &self.link) {
            (Some(text), Some(link)) => write!(f, " [{}]({})", text, link)?,
            (Some(text), None) => write!(f, " {}", text)?,
            (None, Some(link)) => write!(f, " []({})", link)?,
            (None, None) => {}
        }
        if !self.effects.is_empty() {
            write!(f, " ->")?;
            for effect in &self.effects {
                write!(f, " {}", effect)?;
            }
        }
        Ok(())
    }
}
