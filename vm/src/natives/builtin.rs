use rand::Rng;

use super::{Machine, NativeRegistry};
use crate::error::RuntimeError;
use crate::value::Value;

/// The first operand popped is the left-hand side: `a b -` computes `b - a`.
pub(super) fn register(registry: &mut NativeRegistry) {
    registry.register("+", |m| arithmetic(m, |lhs, rhs| lhs + rhs));
    registry.register("-", |m| arithmetic(m, |lhs, rhs| lhs - rhs));
    registry.register("*", |m| arithmetic(m, |lhs, rhs| lhs * rhs));
    registry.register("gt", |m| compare(m, |lhs, rhs| lhs > rhs));
    registry.register("lt", |m| compare(m, |lhs, rhs| lhs < rhs));
    registry.register("eq", |m| compare(m, |lhs, rhs| lhs == rhs));
    registry.register("randInt", rand_int);
    registry.register("charCode", char_code);
    registry.register("concat", |m| {
        let first = m.pop_string()?;
        let second = m.pop_string()?;
        m.push(first + &second);
        Ok(())
    });
    registry.register("rconcat", |m| {
        let first = m.pop_string()?;
        let second = m.pop_string()?;
        m.push(second + &first);
        Ok(())
    });
    registry.register("getContext", get_context);
    registry.register("setContext", |m| {
        let key = m.pop_string()?;
        let value = m.pop()?;
        m.context_mut().insert(key, value);
        Ok(())
    });
    registry.register("hasContext", |m| {
        let key = m.pop_string()?;
        let present = m.context().contains_key(&key);
        m.push(Value::flag(present));
        Ok(())
    });
    registry.register("jz", |m| branch(m, |value| value == 0.0));
    registry.register("jgz", |m| branch(m, |value| value > 0.0));
    registry.register("goto", goto);
    registry.register("exit", |m| {
        m.exit();
        Ok(())
    });
    registry.register("ppc", |m| {
        let pc = m.pc();
        m.push(pc);
        Ok(())
    });
}

fn arithmetic(m: &mut Machine<'_>, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
    let lhs = m.pop_number()?;
    let rhs = m.pop_number()?;
    m.push(op(lhs, rhs));
    Ok(())
}

fn compare(m: &mut Machine<'_>, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
    let lhs = m.pop_number()?;
    let rhs = m.pop_number()?;
    m.push(Value::flag(op(lhs, rhs)));
    Ok(())
}

/// Integer in `[0, max)`.
fn rand_int(m: &mut Machine<'_>) -> Result<(), RuntimeError> {
    let max = m.pop_number()?;
    if !max.is_finite() || max <= 0.0 {
        return Err(m.out_of_range(max));
    }
    let value = m.rng().gen_range(0.0..max).floor();
    m.push(value);
    Ok(())
}

fn char_code(m: &mut Machine<'_>) -> Result<(), RuntimeError> {
    let code = m.pop_number()?;
    let c = (code >= 0.0 && code.fract() == 0.0 && code <= u32::MAX as f64)
        .then(|| char::from_u32(code as u32))
        .flatten()
        .ok_or_else(|| m.out_of_range(code))?;
    m.push(c.to_string());
    Ok(())
}

fn get_context(m: &mut Machine<'_>) -> Result<(), RuntimeError> {
    let key = m.pop_string()?;
    let value = m
        .context()
        .get(&key)
        .cloned()
        .ok_or(RuntimeError::MissingContextKey { key })?;
    m.push(value);
    Ok(())
}

/// Enter the following block when `enter` holds for the popped number,
/// otherwise continue after it.
fn branch(m: &mut Machine<'_>, enter: impl Fn(f64) -> bool) -> Result<(), RuntimeError> {
    let value = m.pop_number()?;
    let (open, close) = m.next_block()?;
    if enter(value) {
        m.jump(open + 1);
    } else {
        m.jump(close + 1);
    }
    Ok(())
}

/// Jump to a label, or to an absolute offset such as a resolved choice.
fn goto(m: &mut Machine<'_>) -> Result<(), RuntimeError> {
    match m.pop()? {
        Value::String(label) => m.goto_label(&label),
        Value::Number(offset) => {
            if offset < 0.0 || offset.fract() != 0.0 || offset > m.program().len() as f64 {
                return Err(m.out_of_range(offset));
            }
            tracing::debug!(offset, "goto offset");
            m.jump(offset as usize);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use questmark::{Instruction, LabelMap, Program};

    use crate::error::RuntimeError;
    use crate::natives::NativeRegistry;
    use crate::value::Value;
    use crate::vm::Vm;

    fn vm(instructions: Vec<Instruction>, labels: LabelMap) -> Vm {
        let program = Program::new(instructions, labels).unwrap();
        Vm::new(Arc::new(program), Arc::new(NativeRegistry::builtin())).unwrap()
    }

    fn run(code: &str) -> Result<Vec<Value>, RuntimeError> {
        let fragment = questmark::tokenizer::compile_fragment(code).unwrap();
        let mut vm = vm(fragment.instructions, fragment.labels);
        vm.run()?;
        Ok(vm.stack().to_vec())
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn first_popped_is_left_hand_side() {
        assert_eq!(run("10 3 -").unwrap(), vec![num(-7.0)]);
        assert_eq!(run("2 3 +").unwrap(), vec![num(5.0)]);
        assert_eq!(run("4 6 *").unwrap(), vec![num(24.0)]);
        assert_eq!(run("1 2 gt").unwrap(), vec![num(1.0)]);
        assert_eq!(run("1 2 lt").unwrap(), vec![num(0.0)]);
        assert_eq!(run("7 7 eq").unwrap(), vec![num(1.0)]);
    }

    #[test]
    fn concat_and_rconcat() {
        assert_eq!(run("\"a\" \"b\" concat").unwrap(), vec![Value::from("ba")]);
        assert_eq!(run("\"a\" \"b\" rconcat").unwrap(), vec![Value::from("ab")]);
    }

    #[test]
    fn char_code_builds_labels() {
        assert_eq!(
            run("\"HELLO_\" 1 65 + charCode rconcat").unwrap(),
            vec![Value::from("HELLO_B")]
        );
        assert!(matches!(run("1 0 - charCode"), Err(RuntimeError::OutOfRange { .. })));
    }

    #[test]
    fn rand_int_stays_in_range() {
        let mut vm = vm(
            vec![Instruction::PushNumber(3.0), Instruction::invoke("randInt")],
            LabelMap::new(),
        )
        .with_seed(7);
        vm.run().unwrap();
        let value = vm.stack()[0].as_number().unwrap();
        assert!((0.0..3.0).contains(&value));
        assert_eq!(value, value.floor());

        assert!(matches!(run("0 randInt"), Err(RuntimeError::OutOfRange { .. })));
    }

    #[test]
    fn context_round_trip() {
        assert_eq!(
            run("5 \"k\" setContext \"k\" hasContext \"k\" getContext \"z\" hasContext").unwrap(),
            vec![num(1.0), num(5.0), num(0.0)]
        );
        assert_eq!(
            run("\"nope\" getContext"),
            Err(RuntimeError::MissingContextKey { key: "nope".into() })
        );
    }

    #[test]
    fn type_errors_name_the_operand() {
        assert_eq!(
            run("\"x\" 1 +"),
            Err(RuntimeError::Type {
                native: "+".into(),
                operand: 2,
                expected: "number",
                found: "string",
            })
        );
        assert!(matches!(
            run("+"),
            Err(RuntimeError::Type { operand: 1, found: "an empty stack", .. })
        ));
    }

    #[test]
    fn branches_enter_or_skip_their_block() {
        assert_eq!(run("0 jz { 1 } 2").unwrap(), vec![num(1.0), num(2.0)]);
        assert_eq!(run("3 jz { 1 } 2").unwrap(), vec![num(2.0)]);
        assert_eq!(run("3 jgz { 1 { 9 } } 2").unwrap(), vec![num(1.0), num(2.0)]);
        assert_eq!(run("0 jgz { 1 } 2").unwrap(), vec![num(2.0)]);
        assert!(matches!(
            run("0 jz 1 { }"),
            Err(RuntimeError::UnguardedBranch { at: 1, .. })
        ));
    }

    #[test]
    fn open_block_reached_in_sequence_is_skipped() {
        assert_eq!(run("1 { 2 } 3").unwrap(), vec![num(1.0), num(3.0)]);
    }

    #[test]
    fn ppc_pushes_its_own_offset() {
        assert_eq!(run("7 7 ppc").unwrap(), vec![num(7.0), num(7.0), num(2.0)]);
    }

    #[test]
    fn goto_accepts_labels_and_offsets() {
        assert_eq!(run("\"skip\" goto 1 #skip 2").unwrap(), vec![num(2.0)]);
        assert_eq!(run("4 goto 1 exit 2").unwrap(), vec![num(2.0)]);
        assert_eq!(
            run("\"missing\" goto"),
            Err(RuntimeError::UndefinedLabel { label: "missing".into() })
        );
        assert!(matches!(run("99 goto"), Err(RuntimeError::OutOfRange { .. })));
    }
}
