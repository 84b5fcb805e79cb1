// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Verification harness - the Python program a sandbox actually runs.
//
// The candidate source is compiled under the file name `solution.py` so
// tracebacks point at it, then each assertion runs in the same namespace.
// A failed assertion is reported on stderr behind ASSERTION_MARKER. One that
// raised anything else gets its traceback and an ASSERTION_ERROR_MARKER line.
// Exit status is 0 only when the module loaded and every assertion held.

use crate::domain::execution::{
    ExecutorRequest, ASSERTION_ERROR_MARKER, ASSERTION_MARKER, SOLUTION_FILE,
};

const HARNESS_PRELUDE: &str = "import ast, sys, traceback";

const HARNESS_BODY: &str = r#"
ns = {"__name__": "solution"}
try:
    exec(compile(SOURCE, FILENAME, "exec"), ns)
except BaseException:
    traceback.print_exc()
    sys.stderr.flush()
    sys.exit(1)

def describe(src):
    try:
        node = ast.parse(src).body[0]
    except Exception:
        return ""
    if not isinstance(node, ast.Assert) or not isinstance(node.test, ast.Compare):
        return ""
    cmp = node.test
    if len(cmp.ops) != 1:
        return ""
    try:
        left = eval(compile(ast.Expression(cmp.left), "<left>", "eval"), ns)
        right = eval(compile(ast.Expression(cmp.comparators[0]), "<right>", "eval"), ns)
    except Exception:
        return ""
    return "left=%r right=%r" % (left, right)

failed = 0
for i, src in enumerate(ASSERTIONS):
    try:
        exec(compile(src, "<assertion %d>" % i, "exec"), ns)
    except AssertionError as e:
        failed += 1
        detail = str(e) or describe(src)
        sys.stderr.write("%s [%d] %s%s\n" % (MARKER, i, src, (": " + detail) if detail else ""))
    except BaseException as e:
        failed += 1
        traceback.print_exc()
        sys.stderr.write("%s [%d] %s: raised %s\n" % (ERROR_MARKER, i, src, type(e).__name__))

sys.stderr.flush()
sys.exit(1 if failed else 0)
"#;

fn py_literal(value: &impl serde::Serialize) -> String {
    // JSON strings and arrays of strings are valid Python literals
    serde_json::to_string(value).unwrap_or_else(|_| "None".to_string())
}

/// Render the harness script for one request. User text only ever lands
/// inside a literal, never in a position that is substituted again.
pub fn render(request: &ExecutorRequest) -> String {
    format!(
        "{}\n\nSOURCE = {}\nASSERTIONS = {}\nMARKER = {}\nERROR_MARKER = {}\nFILENAME = {}\n{}",
        HARNESS_PRELUDE,
        py_literal(&request.source),
        py_literal(&request.assertions),
        py_literal(&ASSERTION_MARKER),
        py_literal(&ASSERTION_ERROR_MARKER),
        py_literal(&SOLUTION_FILE),
        HARNESS_BODY
    )
}

/// Command line that runs the rendered harness inside the sandbox image.
pub fn command(request: &ExecutorRequest) -> Vec<String> {
    vec!["python3".to_string(), "-u".to_string(), "-c".to_string(), render(request)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(source: &str, assertions: &[&str]) -> ExecutorRequest {
        ExecutorRequest {
            source: source.to_string(),
            assertions: assertions.iter().map(|a| a.to_string()).collect(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_source_and_assertions_are_embedded_as_literals() {
        let script = render(&request(
            "def f(s):\n    return \"\"\"x\"\"\" + s\n",
            &["assert f('a') == 'xa'"],
        ));

        assert!(script.contains(r#"SOURCE = "def f(s):\n    return \"\"\"x\"\"\" + s\n""#));
        assert!(script.contains(r#"ASSERTIONS = ["assert f('a') == 'xa'"]"#));
        assert!(script.contains(r#"MARKER = "ASSERTION FAILED""#));
        assert!(script.contains(r#"ERROR_MARKER = "ASSERTION ERRORED""#));
        assert!(script.contains(r#"FILENAME = "solution.py""#));
        assert!(script.contains(r#"compile(SOURCE, FILENAME, "exec")"#));
    }

    #[test]
    fn test_hostile_source_stays_inside_its_literal() {
        let script = render(&request("\"\nimport os\nos.system('x')\n", &[]));
        assert!(script.contains(r#"SOURCE = "\"\nimport os\nos.system('x')\n""#));
        assert!(script.contains("ASSERTIONS = []"));
    }

    #[test]
    fn test_raising_assertion_uses_its_own_marker() {
        let script = render(&request("def f():\n    return x\n", &["assert f() == 1"]));
        let raised = script
            .lines()
            .skip_while(|l| !l.trim_start().starts_with("except BaseException as e:"))
            .take(4)
            .collect::<Vec<_>>()
            .join("\n");
        assert!(raised.contains("traceback.print_exc()"));
        assert!(raised.contains("ERROR_MARKER, i, src, type(e).__name__"));
        assert!(!raised.contains("(MARKER,"));
    }

    #[test]
    fn test_command_runs_unbuffered_python() {
        let cmd = command(&request("pass", &[]));
        assert_eq!(&cmd[..3], &["python3", "-u", "-c"]);
        assert!(cmd[3].starts_with("import ast, sys, traceback"));
    }
}
