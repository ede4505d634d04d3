//! `.test.md` story tests: TOML front matter between `---` lines, then the story.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use questmark::{Warning, compile_source};
use questvm::{
    Choice, Context, ResolveError, RuntimeError, Session, SessionOutcome, Transcript, Value, Vm,
    quest_natives,
};

const TEST_SUFFIX: &str = ".test.md";

#[derive(Debug, Deserialize)]
pub struct ExpectedWarning {
    /// Must occur in the warning message.
    pub contains: String,
    /// 1-based line the warning's span starts on.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    pub description: Option<String>,
    /// Choice ids answered in order, one per suspension. Running out cancels the story.
    pub choices: Vec<usize>,
    pub seed: u64,
    /// Compared against everything the story emitted, both sides trimmed.
    pub expect_output: Option<String>,
    /// Keys that must hold these values at the end. Other keys are not checked.
    pub expect_context: Option<BTreeMap<String, toml::Value>>,
    /// Substring of the runtime error the story must stop with.
    pub expect_error: Option<String>,
    /// The story must fail to parse, compile or load.
    pub expect_compile_error: bool,
    /// The story must end on a choice that was never resolved.
    pub expect_aborted: bool,
    /// When present (even empty), the compiler warnings must match one to one.
    pub expect_warnings: Option<Vec<ExpectedWarning>>,
}

/// Split a test file into its parsed front matter and the story body.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.split_inclusive('\n');

    let opening = lines.next().unwrap_or_default();
    if opening.trim_end() != "---" {
        return Err("file must start with a `---` line".into());
    }

    let mut offset = opening.len();
    for line in lines {
        if line.trim_end() == "---" {
            let front_matter = &content[opening.len()..offset];
            let story = &content[offset + line.len()..];
            let config = toml::from_str(front_matter).map_err(|e| format!("front matter: {}", e))?;
            return Ok((config, story));
        }
        offset += line.len();
    }
    Err("front matter is never closed by a `---` line".into())
}

/// Answers with the scripted ids in order, then cancels.
fn scripted(
    ids: Vec<usize>,
) -> impl FnMut(Vec<Choice>) -> std::future::Ready<Result<usize, ResolveError>> + Send {
    let mut script = VecDeque::from(ids);
    move |_choices| std::future::ready(script.pop_front().ok_or(ResolveError::Cancelled))
}

/// Run one test file. Returns its description, if any, and the first mismatch found.
async fn run_story_test(path: &Path) -> (Option<String>, Result<(), String>) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => return (None, Err(format!("cannot read file: {}", e))),
    };
    match parse_test_file(&content) {
        Ok((config, story)) => {
            let verdict = check_story(&config, story).await;
            (config.description, verdict)
        }
        Err(e) => (None, Err(e)),
    }
}

async fn check_story(config: &TestConfig, source: &str) -> Result<(), String> {
    let loaded = load(source);
    if config.expect_compile_error {
        return match loaded {
            Err(_) => Ok(()),
            Ok(_) => Err("story loaded, but a compile error was expected".into()),
        };
    }
    let (vm, warnings) = loaded.map_err(|e| format!("story failed to load: {}", e))?;

    if let Some(expected) = &config.expect_warnings {
        check_warnings(source, &warnings, expected)?;
    }

    let transcript = Transcript::new();
    let vm = vm.with_sink(transcript.clone()).with_seed(config.seed);
    let mut session = Session::new(vm, scripted(config.choices.clone()));
    check_ending(config, session.play().await)?;

    if let Some(expected) = &config.expect_output {
        let (expected, actual) = (expected.trim(), transcript.text());
        if expected != actual.trim() {
            return Err(format!(
                "output differs\n  expected: {:?}\n  actual:   {:?}",
                expected,
                actual.trim()
            ));
        }
    }
    if let Some(expected) = &config.expect_context {
        check_context(expected, session.vm().context())?;
    }
    Ok(())
}

fn load(source: &str) -> Result<(Vm, Vec<Warning>), String> {
    let compiled = compile_source(source, 0).map_err(|e| {
        let messages: Vec<String> = e.to_diagnostics(0).into_iter().map(|d| d.message).collect();
        messages.join("; ")
    })?;
    let vm = Vm::new(Arc::new(compiled.program), Arc::new(quest_natives()))
        .map_err(|e| e.to_string())?;
    Ok((vm, compiled.warnings))
}

fn check_ending(
    config: &TestConfig,
    played: Result<SessionOutcome, RuntimeError>,
) -> Result<(), String> {
    match (played, &config.expect_error) {
        (Err(err), Some(needle)) if err.to_string().contains(needle.as_str()) => Ok(()),
        (Err(err), Some(needle)) => Err(format!("runtime error `{}` does not mention \"{}\"", err, needle)),
        (Err(err), None) => Err(format!("unexpected runtime error: {}", err)),
        (Ok(_), Some(needle)) => Err(format!("expected a runtime error mentioning \"{}\", got none", needle)),
        (Ok(SessionOutcome::Completed), None) if config.expect_aborted => {
            Err("story completed, but was expected to abort".into())
        }
        (Ok(SessionOutcome::Aborted(why)), None) if !config.expect_aborted => {
            Err(format!("story aborted: {}", why))
        }
        (Ok(_), None) => Ok(()),
    }
}

fn check_context(expected: &BTreeMap<String, toml::Value>, context: &Context) -> Result<(), String> {
    for (key, want) in expected {
        let want = match want {
            toml::Value::Integer(n) => Value::Number(*n as f64),
            toml::Value::Float(f) => Value::Number(*f),
            toml::Value::Boolean(b) => Value::flag(*b),
            toml::Value::String(s) => Value::from(s.as_str()),
            other => return Err(format!("context `{}`: cannot compare against {}", key, other)),
        };
        match context.get(key) {
            Some(found) if *found == want => {}
            Some(found) => return Err(format!("context `{}` is {:?}, expected {:?}", key, found, want)),
            None => return Err(format!("context `{}` is unset, expected {:?}", key, want)),
        }
    }
    Ok(())
}

fn check_warnings(source: &str, actual: &[Warning], expected: &[ExpectedWarning]) -> Result<(), String> {
    if actual.len() != expected.len() {
        let listed = if actual.is_empty() {
            "    (none)".to_string()
        } else {
            let lines: Vec<String> = actual.iter().map(|w| format!("    {}", w.message)).collect();
            lines.join("\n")
        };
        return Err(format!(
            "{} warning(s) expected, {} reported:\n{}",
            expected.len(),
            actual.len(),
            listed
        ));
    }

    for (n, (warning, want)) in actual.iter().zip(expected).enumerate() {
        let n = n + 1;
        if !warning.message.contains(&want.contains) {
            return Err(format!(
                "warning {}: \"{}\" does not mention \"{}\"",
                n, warning.message, want.contains
            ));
        }
        let Some(line) = want.line else { continue };
        match warning.span.as_ref().map(|span| line_of(source, span.start)) {
            Some(found) if found == line => {}
            Some(found) => return Err(format!("warning {}: reported on line {}, expected line {}", n, found, line)),
            None => return Err(format!("warning {}: has no location, expected line {}", n, line)),
        }
    }
    Ok(())
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Test files keyed by their folder relative to the scanned root; `""` is the root itself.
struct Catalog {
    categories: BTreeMap<String, Vec<PathBuf>>,
}

impl Catalog {
    fn scan(path: &Path) -> Self {
        let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        if path.is_file() {
            categories.insert(String::new(), vec![path.to_path_buf()]);
            return Catalog { categories };
        }

        let mut dirs = vec![path.to_path_buf()];
        while let Some(dir) = dirs.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let file = entry.path();
                if file.is_dir() {
                    dirs.push(file);
                } else if file.to_string_lossy().ends_with(TEST_SUFFIX) {
                    categories.entry(category_of(path, &file)).or_default().push(file);
                }
            }
        }
        for files in categories.values_mut() {
            files.sort();
        }
        Catalog { categories }
    }

    /// Requested categories, each with its subfolders. Unknown names are reported and skipped.
    fn select(&self, requested: &[String]) -> BTreeMap<&str, &[PathBuf]> {
        let mut chosen = BTreeMap::new();
        for (category, files) in &self.categories {
            let wanted = requested.is_empty()
                || requested.iter().any(|r| is_within(category, r.trim_matches('/')));
            if wanted {
                chosen.insert(category.as_str(), files.as_slice());
            }
        }

        for name in requested {
            let name = name.trim_matches('/');
            if !self.categories.keys().any(|c| is_within(c, name)) {
                let known: Vec<&str> = self.categories.keys().map(|c| display_name(c)).collect();
                eprintln!("warning: no category '{}' (known: {})", name, known.join(", "));
            }
        }
        chosen
    }
}

fn category_of(root: &Path, file: &Path) -> String {
    let Some(relative) = file.parent().and_then(|dir| dir.strip_prefix(root).ok()) else {
        return String::new();
    };
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

fn is_within(category: &str, name: &str) -> bool {
    category == name
        || category
            .strip_prefix(name)
            .is_some_and(|rest| !name.is_empty() && rest.starts_with('/'))
}

fn display_name(category: &str) -> &str {
    if category.is_empty() { "(root)" } else { category }
}

pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }
    let catalog = Catalog::scan(path);
    if catalog.categories.is_empty() {
        eprintln!("no {} files under {}", TEST_SUFFIX, path.display());
        return;
    }
    eprintln!("categories:");
    for (category, files) in &catalog.categories {
        eprintln!("  {:<24} {} test(s)", display_name(category), files.len());
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

struct Report {
    no_color: bool,
    passed: usize,
    failures: Vec<(PathBuf, String)>,
}

impl Report {
    fn paint(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            format!("\x1b[{}m{}\x1b[0m", ansi, text)
        }
    }

    fn record(&mut self, path: &Path, description: Option<String>, verdict: Result<(), String>) {
        let name = description.unwrap_or_else(|| {
            let file = path.file_name().map(|f| f.to_string_lossy()).unwrap_or_default();
            file.trim_end_matches(TEST_SUFFIX).to_string()
        });
        match verdict {
            Ok(()) => {
                self.passed += 1;
                eprintln!("  {}  {}", self.paint("PASS", "32"), name);
            }
            Err(reason) => {
                eprintln!("  {}  {}", self.paint("FAIL", "31"), name);
                self.failures.push((path.to_path_buf(), reason));
            }
        }
    }

    fn finish(self) -> i32 {
        if !self.failures.is_empty() {
            eprintln!();
            eprintln!("failures:");
            for (path, reason) in &self.failures {
                eprintln!();
                eprintln!("  --- {} ---", path.display());
                reason.lines().for_each(|line| eprintln!("  {}", line));
            }
        }

        eprintln!();
        let failed = self.failures.len();
        if failed == 0 {
            eprintln!("test result: {}. {} passed", self.paint("ok", "32"), self.passed);
            0
        } else {
            eprintln!(
                "test result: {}. {} passed, {} failed (of {})",
                self.paint("FAILED", "31"),
                self.passed,
                failed,
                self.passed + failed
            );
            1
        }
    }
}

/// Run every test under `path` (or `path` itself), optionally limited to some
/// categories. Returns the process exit code.
pub async fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    let catalog = Catalog::scan(path);
    if catalog.categories.is_empty() {
        eprintln!("no {} files under {}", TEST_SUFFIX, path.display());
        return 1;
    }
    let selected = catalog.select(if path.is_file() { &[] } else { categories });
    if selected.is_empty() {
        eprintln!("no matching categories");
        return 1;
    }

    let mut report = Report {
        no_color,
        passed: 0,
        failures: Vec::new(),
    };
    for (category, files) in selected {
        if !path.is_file() {
            eprintln!();
            eprintln!("{}", report.paint(display_name(category), "1"));
        }
        for file in files {
            let (description, verdict) = run_story_test(file).await;
            report.record(file, description, verdict);
        }
    }
    report.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COIN: &str = "\
# Hall

A coin glints.

- `@once` Take it `\"coins\" hasContext \"coins\" setContext`
- [Leave](#Out)

# Out

Outside.
";

    fn write_test(dir: &Path, relative: &str, front_matter: &str, body: &str) -> PathBuf {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, format!("---\n{}\n---\n{}", front_matter, body)).unwrap();
        path
    }

    async fn verdict(front_matter: &str, body: &str) -> Result<(), String> {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(dir.path(), "story.test.md", front_matter, body);
        run_story_test(&path).await.1
    }

    #[test]
    fn front_matter_is_split_from_the_story() {
        let (config, story) =
            parse_test_file("---\ndescription = \"coin\"\nchoices = [0, 1]\n---\n# Hall\n").unwrap();
        assert_eq!(config.description.as_deref(), Some("coin"));
        assert_eq!(config.choices, vec![0, 1]);
        assert_eq!(config.seed, 0);
        assert_eq!(story, "# Hall\n");
    }

    #[test]
    fn malformed_front_matter_is_reported() {
        assert!(parse_test_file("# Hall\n").is_err());
        assert!(parse_test_file("---\nchoices = []\n# Hall\n").is_err());
        assert!(parse_test_file("---\nchoices = \"x\"\n---\n").is_err());
        assert!(parse_test_file("---\nexpect_outptu = \"typo\"\n---\n").is_err());
    }

    #[tokio::test]
    async fn scripted_story_passes() {
        let front_matter = "choices = [0, 0]\nexpect_output = \"A coin glints.\\n\\nOutside.\"\n\
                            expect_context = { coins = 0, __once__0 = 1 }";
        assert_eq!(verdict(front_matter, COIN).await, Ok(()));
    }

    #[tokio::test]
    async fn output_mismatch_fails() {
        let result = verdict("choices = [1]\nexpect_output = \"Inside.\"", COIN).await;
        assert!(matches!(result, Err(reason) if reason.contains("output differs")));
    }

    #[tokio::test]
    async fn running_out_of_choices_aborts() {
        assert!(verdict("choices = [0]", COIN).await.is_err());
        assert_eq!(verdict("choices = [0]\nexpect_aborted = true", COIN).await, Ok(()));
        assert!(verdict("choices = [1]\nexpect_aborted = true", COIN).await.is_err());
    }

    #[tokio::test]
    async fn compile_and_runtime_errors() {
        let undefined_link = "# A\n\n- [Go](#Nowhere)\n";
        assert_eq!(verdict("expect_compile_error = true", undefined_link).await, Ok(()));
        assert!(verdict("", undefined_link).await.is_err());
        assert_eq!(verdict("expect_compile_error = true", "# A\n\n`frobnicate`\n").await, Ok(()));
        assert_eq!(
            verdict("expect_error = \"nowhere\"", "# A\n\n`\"nowhere\" goto`\n").await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn warnings_are_checked_by_line() {
        let body = "# A\n\n- Untitled `1`\n- `@twice` Again\n";
        let expectation = "choices = [0]\nexpect_aborted = true\n\
                           [[expect_warnings]]\ncontains = \"@twice\"\nline = 4";
        assert_eq!(verdict(expectation, body).await, Ok(()));

        let wrong_line = expectation.replace("line = 4", "line = 3");
        let result = verdict(&wrong_line, body).await;
        assert!(matches!(result, Err(reason) if reason.contains("line 4")));
    }

    #[tokio::test]
    async fn categories_follow_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        write_test(dir.path(), "top.test.md", "", "# A\n");
        write_test(dir.path(), "shop/buy.test.md", "", "# A\n");
        write_test(dir.path(), "shop/sell/haggle.test.md", "", "# A\n");
        write_test(dir.path(), "shopping/list.test.md", "", "# A\n");
        std::fs::write(dir.path().join("notes.md"), "# not a test\n").unwrap();

        let catalog = Catalog::scan(dir.path());
        assert_eq!(
            catalog.categories.keys().collect::<Vec<_>>(),
            vec!["", "shop", "shop/sell", "shopping"]
        );

        let selected = catalog.select(&["shop/".to_string()]);
        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), vec!["shop", "shop/sell"]);

        assert_eq!(run_tests(dir.path(), true, &[]).await, 0);
    }
}
