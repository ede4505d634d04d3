use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use questmark::{Program, compile_source};
use questvm::{
    Choice, ResolveError, Session, SessionOutcome, Transcript, Value, Vm, quest_natives,
};

const STORY: &str = "\
# Gate

The gate is shut.

- [Knock](#Inside)
- Shout `\"shouted\" hasContext \"shouted\" setContext`

# Inside

Welcome.
";

fn program() -> Arc<Program> {
    Arc::new(compile_source(STORY, 0).expect("compile failed").program)
}

fn vm(transcript: &Transcript) -> Vm {
    Vm::new(program(), Arc::new(quest_natives()))
        .expect("load failed")
        .with_sink(transcript.clone())
}

/// Answers with the given ids in order, then cancels.
fn scripted(
    ids: Vec<usize>,
) -> impl FnMut(Vec<Choice>) -> std::future::Ready<Result<usize, ResolveError>> + Send {
    let mut script = VecDeque::from(ids);
    move |_choices| std::future::ready(script.pop_front().ok_or(ResolveError::Cancelled))
}

#[tokio::test]
async fn plays_to_completion() {
    let transcript = Transcript::new();
    let mut session = Session::new(vm(&transcript), scripted(vec![1, 0]));

    assert_eq!(session.play().await.unwrap(), SessionOutcome::Completed);
    assert_eq!(transcript.text(), "The gate is shut.\n\nWelcome.\n\n");
    assert_eq!(session.vm().context().get("shouted"), Some(&Value::Number(0.0)));
    assert!(session.vm().is_exited());
}

#[tokio::test]
async fn resolver_sees_the_offered_choices() {
    let transcript = Transcript::new();
    let mut seen: Vec<Vec<String>> = Vec::new();
    let seen_ref = &mut seen;
    let resolver = move |choices: Vec<Choice>| {
        seen_ref.push(choices.into_iter().map(|c| c.title).collect());
        std::future::ready(Ok::<usize, ResolveError>(0))
    };
    let mut session = Session::new(vm(&transcript), resolver);

    assert_eq!(session.play().await.unwrap(), SessionOutcome::Completed);
    drop(session);
    assert_eq!(seen, vec![vec!["Knock".to_string(), "Shout".to_string()]]);
}

#[tokio::test]
async fn resolver_failure_aborts_and_terminates() {
    let transcript = Transcript::new();
    let resolver =
        |_choices: Vec<Choice>| std::future::ready(Err::<usize, _>(ResolveError::Failed("ui closed".into())));
    let mut session = Session::new(vm(&transcript), resolver);

    assert_eq!(
        session.play().await.unwrap(),
        SessionOutcome::Aborted(ResolveError::Failed("ui closed".into()))
    );
    assert!(session.vm().is_exited());
    assert!(!session.vm().is_paused());
    assert!(session.vm().choices().is_empty());
}

#[tokio::test]
async fn running_out_of_answers_cancels_quietly() {
    let transcript = Transcript::new();
    let mut session = Session::new(vm(&transcript), scripted(vec![1]));

    let outcome = session.play().await.unwrap();
    assert_eq!(outcome, SessionOutcome::Aborted(ResolveError::Cancelled));
    assert!(session.vm().is_exited());
    assert!(ResolveError::Cancelled.is_cancellation());
    assert!(!ResolveError::Failed("ui closed".into()).is_cancellation());
    assert!(!ResolveError::UnknownChoice { id: 9 }.is_cancellation());
}

#[tokio::test]
async fn unknown_choice_aborts_and_terminates() {
    let transcript = Transcript::new();
    let mut session = Session::new(vm(&transcript), scripted(vec![9]));

    assert_eq!(
        session.play().await.unwrap(),
        SessionOutcome::Aborted(ResolveError::UnknownChoice { id: 9 })
    );
    assert!(session.vm().is_exited());
}

#[tokio::test]
async fn cancelling_a_pending_choice_terminates() {
    let transcript = Transcript::new();
    let resolver =
        |_choices: Vec<Choice>| std::future::pending::<Result<usize, ResolveError>>();
    let mut session = Session::new(vm(&transcript), resolver);

    let result = tokio::time::timeout(Duration::from_millis(20), session.play()).await;
    assert!(result.is_err());
    assert!(session.vm().is_exited());
    assert_eq!(transcript.text(), "The gate is shut.\n\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sessions_sharing_a_program_run_concurrently() {
    let shared = program();
    let natives = Arc::new(quest_natives());

    let tasks: Vec<_> = [vec![0], vec![1, 1, 0]]
        .into_iter()
        .map(|ids| {
            let transcript = Transcript::new();
            let vm = Vm::new(Arc::clone(&shared), Arc::clone(&natives))
                .unwrap()
                .with_sink(transcript.clone());
            let mut script = VecDeque::from(ids);
            let resolver = move |_choices: Vec<Choice>| {
                let next = script.pop_front();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    next.ok_or(ResolveError::Cancelled)
                }
            };
            tokio::spawn(async move {
                let mut session = Session::new(vm, resolver);
                let outcome = session.play().await.unwrap();
                (outcome, session.into_vm(), transcript.text())
            })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    let (outcome, vm, text) = &results[0];
    assert_eq!(outcome, &SessionOutcome::Completed);
    assert_eq!(vm.context().get("shouted"), None);
    assert_eq!(text, "The gate is shut.\n\nWelcome.\n\n");

    let (outcome, vm, _) = &results[1];
    assert_eq!(outcome, &SessionOutcome::Completed);
    assert_eq!(vm.context().get("shouted"), Some(&Value::Number(1.0)));
}
