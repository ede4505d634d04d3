pub mod error;

use std::ops::Range;

pub use error::{CompileError, Warning};

use crate::document::config::{Config, NoLinkBehaviour, Seed, Whitespace};
use crate::document::{Content, Document, ONCE_DIRECTIVE, QuestOption, State, TextRun, TextStyle};
use crate::instruction::Instruction;
use crate::program::{LabelMap, Program};
use crate::tokenizer;

/// Suffix of the label placed between a state's body and its options.
pub const OPTIONS_LABEL_SUFFIX: &str = "__options";

/// Prefix of the context keys that remember chosen `@once` options.
pub const ONCE_FLAG_PREFIX: &str = "__once__";

/// Label that re-offers `state`'s options without replaying its body.
pub fn options_label(state: &str) -> String {
    format!("{}{}", state, OPTIONS_LABEL_SUFFIX)
}

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub program: Program,
    pub warnings: Vec<Warning>,
}

/// Compile a parsed document into one linked program.
pub fn compile(document: &Document) -> Result<Compiled, CompileError> {
    Compiler::new(document)?.compile()
}

/// Single-use code generator for one document.
pub struct Compiler<'d> {
    document: &'d Document,
    config: Config,
    instructions: Vec<Instruction>,
    labels: LabelMap,
    /// Label references checked once every label is known.
    references: Vec<(String, Option<Range<usize>>)>,
    warnings: Vec<Warning>,
    next_once: usize,
}

impl<'d> Compiler<'d> {
    pub fn new(document: &'d Document) -> Result<Self, CompileError> {
        let config = Config::from_options(&document.options).map_err(|err| {
            CompileError::InvalidConfig {
                message: err.to_string(),
            }
        })?;

        let mut compiler = Compiler {
            document,
            config,
            instructions: Vec::new(),
            labels: LabelMap::new(),
            references: Vec::new(),
            warnings: Vec::new(),
            next_once: 0,
        };
        if let Whitespace::Unknown(mode) = &compiler.config.options.whitespace {
            let message = format!("unknown whitespace mode `{}`, normalizing", mode);
            compiler.warn(message, None);
        }
        Ok(compiler)
    }

    pub fn compile(mut self) -> Result<Compiled, CompileError> {
        self.compile_preamble();
        let document = self.document;
        for state in &document.states {
            self.compile_state(state)?;
        }
        // Safety net for flow that falls off the last state.
        self.invoke("exit");

        for (label, span) in std::mem::take(&mut self.references) {
            if !self.labels.contains_key(&label) {
                return Err(CompileError::UndefinedLabel { label, span });
            }
        }

        let program = Program::new(self.instructions, self.labels)?;
        tracing::debug!(
            instructions = program.len(),
            labels = program.labels().len(),
            warnings = self.warnings.len(),
            "compiled document"
        );
        Ok(Compiled {
            program,
            warnings: self.warnings,
        })
    }

    // -----------------------------------------------------------------------
    // Document and states
    // -----------------------------------------------------------------------

    fn compile_preamble(&mut self) {
        let initial_context = self.config.initial_context.clone();
        for (name, seed) in initial_context {
            match seed {
                Seed::Number(n) => self.emit(Instruction::PushNumber(n)),
                Seed::Text(s) => self.emit(Instruction::PushString(s)),
            }
            self.emit(Instruction::PushString(name));
            self.invoke("setContext");
        }

        if let Some(state) = self.config.initial_state.clone() {
            self.references.push((state.clone(), None));
            self.emit(Instruction::PushString(state));
            self.invoke("goto");
        }
    }

    fn compile_state(&mut self, state: &State) -> Result<(), CompileError> {
        tracing::debug!(state = %state.name, offset = self.instructions.len(), "compiling state");
        self.define_label(state.name.clone(), Some(state.span.clone()))?;

        for content in &state.body {
            self.compile_content(content)?;
        }

        self.define_label(options_label(&state.name), Some(state.span.clone()))?;
        for option in &state.options {
            self.compile_option(state, option)?;
        }

        self.invoke("getResponse");
        self.invoke("goto");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Options
    // -----------------------------------------------------------------------

    fn compile_option(&mut self, state: &State, option: &QuestOption) -> Result<(), CompileError> {
        for directive in &option.directives {
            if directive != ONCE_DIRECTIVE {
                let message = format!("unknown directive `{}` ignored", directive);
                self.warn(message, Some(option.span.clone()));
            }
        }

        let once_flag = if option.has_directive(ONCE_DIRECTIVE) {
            let flag = format!("{}{}", ONCE_FLAG_PREFIX, self.next_once);
            self.next_once += 1;
            self.emit(Instruction::PushString(flag.clone()));
            self.invoke("hasContext");
            self.invoke("jz");
            self.emit(Instruction::OpenBlock);
            Some(flag)
        } else {
            None
        };

        let guarded = !option.preconditions.is_empty();
        if guarded {
            for precondition in &option.preconditions {
                match precondition {
                    Content::Code { code, span } => self.splice_fragment(code, span)?,
                    other => {
                        return Err(CompileError::NonCodePrecondition {
                            span: other.span().clone(),
                        });
                    }
                }
            }
            self.invoke("jgz");
            self.emit(Instruction::OpenBlock);
        }

        match &option.text {
            Some(text) => {
                if text.contains('`') {
                    self.warn(
                        "option text contains a backtick; inline code in option titles is not supported",
                        Some(option.span.clone()),
                    );
                }
                self.emit(Instruction::PushString(text.clone()));
            }
            None => {
                self.warn("option has no text; offering it with an empty title", Some(option.span.clone()));
                self.emit(Instruction::PushString(String::new()));
            }
        }

        // `ppc` pushes its own offset; four instructions later the effect body begins.
        self.invoke("ppc");
        self.emit(Instruction::PushNumber(4.0));
        self.invoke("+");
        self.emit(Instruction::OpenBlock);

        if let Some(flag) = &once_flag {
            self.emit(Instruction::PushNumber(1.0));
            self.emit(Instruction::PushString(flag.clone()));
            self.invoke("setContext");
        }
        for effect in &option.effects {
            self.compile_content(effect)?;
        }
        match &option.link {
            Some(link) => {
                let target = link.strip_prefix('#').unwrap_or(link).to_string();
                self.references.push((target.clone(), Some(option.span.clone())));
                self.emit(Instruction::PushString(target));
                self.invoke("goto");
            }
            None => match self.config.options.no_link_behaviour {
                NoLinkBehaviour::LoopbackToOptions => {
                    self.emit(Instruction::PushString(options_label(&state.name)));
                    self.invoke("goto");
                }
                NoLinkBehaviour::Exit => self.invoke("exit"),
            },
        }
        self.emit(Instruction::CloseBlock);
        self.invoke("response");

        if guarded {
            self.emit(Instruction::CloseBlock);
        }
        if once_flag.is_some() {
            self.emit(Instruction::CloseBlock);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    fn compile_content(&mut self, content: &Content) -> Result<(), CompileError> {
        match content {
            Content::Text(run) => {
                let text = self.text_value(run);
                self.emit(Instruction::PushString(text));
                self.invoke("emit");
            }
            Content::Code { code, span } => self.splice_fragment(code, span)?,
            Content::Fence { language, .. } if language.as_deref() == Some("comment") => {}
            Content::Fence { code, span, .. } => self.splice_fragment(code, span)?,
        }
        Ok(())
    }

    /// Compile a code fragment in place, rebasing its labels onto the program.
    fn splice_fragment(&mut self, code: &str, span: &Range<usize>) -> Result<(), CompileError> {
        let fragment = tokenizer::compile_fragment(code).map_err(|source| CompileError::Lex {
            source,
            span: span.clone(),
        })?;

        let base = self.instructions.len();
        for (name, offset) in fragment.labels {
            self.define_label_at(name, base + offset, Some(span.clone()))?;
        }
        self.instructions.extend(fragment.instructions);
        Ok(())
    }

    fn text_value(&self, run: &TextRun) -> String {
        let text = if self.config.retains_whitespace() {
            unescape_markdown(&run.raw)
        } else {
            run.text.clone()
        };
        let mut text = match run.style {
            TextStyle::Plain => text,
            TextStyle::Emphasis => format!("*{}*", text),
            TextStyle::Strong => format!("**{}**", text),
        };
        if run.ends_paragraph {
            text.push_str("\n\n");
        }
        text
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn invoke(&mut self, name: &str) {
        self.emit(Instruction::invoke(name));
    }

    fn define_label(&mut self, name: String, span: Option<Range<usize>>) -> Result<(), CompileError> {
        let offset = self.instructions.len();
        self.define_label_at(name, offset, span)
    }

    fn define_label_at(
        &mut self,
        name: String,
        offset: usize,
        span: Option<Range<usize>>,
    ) -> Result<(), CompileError> {
        if self.labels.contains_key(&name) {
            return Err(CompileError::DuplicateLabel { label: name, span });
        }
        self.labels.insert(name, offset);
        Ok(())
    }

    fn warn(&mut self, message: impl Into<String>, span: Option<Range<usize>>) {
        let warning = Warning::new(message, span);
        tracing::warn!(message = %warning.message, "compiler warning");
        self.warnings.push(warning);
    }
}

/// Undo the markdown escapes that survive in raw source slices.
fn unescape_markdown(raw: &str) -> String {
    const ESCAPES: [(&str, &str); 7] = [
        ("\\*", "*"),
        ("\\[", "["),
        ("\\]", "]"),
        ("\\#", "#"),
        ("\\`", "`"),
        ("\\(", "("),
        ("\\)", ")"),
    ];
    ESCAPES
        .iter()
        .fold(raw.to_string(), |text, (from, to)| text.replace(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_handles_every_control_character() {
        assert_eq!(unescape_markdown(r"\*a\* \[b\] \#c \`d\` \(e\)"), "*a* [b] #c `d` (e)");
        assert_eq!(unescape_markdown(r"plain \n"), r"plain \n");
    }

    #[test]
    fn options_label_appends_suffix() {
        assert_eq!(options_label("Dock"), "Dock__options");
    }
}
