use std::future::Future;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use questvm::{Choice, ChoiceResolver, ResolveError};

/// Prompts on stderr and reads the answer from stdin. End of input cancels.
pub struct StdinChoices {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinChoices {
    pub fn new() -> Self {
        StdinChoices {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl ChoiceResolver for StdinChoices {
    fn choose_from(
        &mut self,
        choices: Vec<Choice>,
    ) -> impl Future<Output = Result<usize, ResolveError>> + Send {
        async move {
            eprintln!();
            for (n, choice) in choices.iter().enumerate() {
                eprintln!("  {}) {}", n + 1, choice.title);
            }

            loop {
                eprint!("> ");
                let line = self
                    .lines
                    .next_line()
                    .await
                    .map_err(|e| ResolveError::Failed(e.to_string()))?;
                let Some(line) = line else {
                    return Err(ResolveError::Cancelled);
                };
                match parse_selection(&line, &choices) {
                    Some(id) => return Ok(id),
                    None => eprintln!("pick a number between 1 and {}", choices.len()),
                }
            }
        }
    }
}

/// A 1-based list position, or a title typed out (case-insensitive).
fn parse_selection(input: &str, choices: &[Choice]) -> Option<usize> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        return choices.get(n.checked_sub(1)?).map(|c| c.id);
    }
    choices
        .iter()
        .find(|c| !input.is_empty() && c.title.eq_ignore_ascii_case(input))
        .map(|c| c.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices() -> Vec<Choice> {
        vec![
            Choice { id: 0, title: "Knock".into() },
            Choice { id: 1, title: "Shout".into() },
        ]
    }

    #[test]
    fn numbers_are_one_based() {
        assert_eq!(parse_selection("1", &choices()), Some(0));
        assert_eq!(parse_selection(" 2\n", &choices()), Some(1));
        assert_eq!(parse_selection("0", &choices()), None);
        assert_eq!(parse_selection("3", &choices()), None);
    }

    #[test]
    fn titles_match_without_case() {
        assert_eq!(parse_selection("shout", &choices()), Some(1));
        assert_eq!(parse_selection("", &choices()), None);
        assert_eq!(parse_selection("run", &choices()), None);
    }
}
