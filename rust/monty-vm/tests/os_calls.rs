//! The host-mediated OS surface: Path methods and environment access.

use monty_vm::{
    HostException, HostValue, Monty, MontyError, OsFunction, Outcome, OsHandler, RunOptions,
    StartOptions, StatResult, S_IFREG,
};
use std::collections::HashMap;

fn run(source: &str) -> HostValue {
    Monty::new(source)
        .unwrap()
        .run(RunOptions::default())
        .expect("script should run")
}

fn int(n: i64) -> HostValue {
    HostValue::Int(n)
}

fn s(text: &str) -> HostValue {
    HostValue::Str(text.to_string())
}

// ─── Unmediated OS calls ───

#[test]
fn os_call_without_handler_raises_not_implemented() {
    let m = Monty::new("from pathlib import Path\nPath('/f').exists()").unwrap();
    let err = m.run(RunOptions::default()).unwrap_err();
    assert_eq!(err.exception_kind(), Some("NotImplementedError"));
    assert_eq!(
        err.to_string(),
        "NotImplementedError: OS function 'Path.exists' not implemented"
    );
}

#[test]
fn unmediated_os_call_is_catchable() {
    let code = "
from pathlib import Path

try:
    Path('/f').exists()
except NotImplementedError:
    r = 'mediation required'
r
";
    assert_eq!(run(code), s("mediation required"));
}

// ─── Mediated via start/resume ───

#[test]
fn path_exists_suspends_with_os_tag() {
    let m = Monty::new("from pathlib import Path\nPath('/etc/hosts').exists()").unwrap();
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert!(snapshot.is_os_function());
    assert_eq!(snapshot.function_name(), "Path.exists");
    assert_eq!(snapshot.args(), &[HostValue::Path("/etc/hosts".to_string())]);
    let complete = snapshot
        .resume(Outcome::Return(HostValue::Bool(true)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::Bool(true));
}

#[test]
fn path_write_text_passes_data() {
    let m = Monty::new("from pathlib import Path\nPath('/tmp/out').write_text('hello')").unwrap();
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "Path.write_text");
    assert_eq!(
        snapshot.args(),
        &[HostValue::Path("/tmp/out".to_string()), s("hello")]
    );
    let complete = snapshot
        .resume(Outcome::Return(int(5)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(5));
}

#[test]
fn path_mkdir_passes_kwargs() {
    let m =
        Monty::new("from pathlib import Path\nPath('/a/b').mkdir(parents=True, exist_ok=True)")
            .unwrap();
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "Path.mkdir");
    assert_eq!(
        snapshot.kwargs(),
        &[
            ("parents".to_string(), HostValue::Bool(true)),
            ("exist_ok".to_string(), HostValue::Bool(true)),
        ]
    );
}

#[test]
fn os_exception_outcome_raises_in_script() {
    let code = "
from pathlib import Path

try:
    Path('/missing').read_text()
except FileNotFoundError as e:
    r = 'missing: ' + str(e)
r
";
    let m = Monty::new(code).unwrap();
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "Path.read_text");
    let complete = snapshot
        .resume(Outcome::Exception(HostException::new(
            "FileNotFoundError",
            "No such file: /missing",
        )))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &s("missing: No such file: /missing"));
}

#[test]
fn stat_result_fields_are_accessible() {
    let code = "
from pathlib import Path

st = Path('/f').stat()
[st.st_size, st.st_mode, st[6]]
";
    let m = Monty::new(code).unwrap();
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "Path.stat");
    let stat = StatResult::file_stat(1024, 0o644, 99.0);
    let complete = snapshot
        .resume(Outcome::Return(HostValue::Stat(stat)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(
        complete.output(),
        &HostValue::List(vec![int(1024), int(S_IFREG | 0o644), int(1024)])
    );
}

#[test]
fn os_getenv_suspends() {
    let m = Monty::new("import os\nos.getenv('HOME', '/default')").unwrap();
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert!(snapshot.is_os_function());
    assert_eq!(snapshot.function_name(), "os.getenv");
    assert_eq!(snapshot.args(), &[s("HOME"), s("/default")]);
    let complete = snapshot
        .resume(Outcome::Return(s("/home/user")))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &s("/home/user"));
}

#[test]
fn os_environ_attribute_suspends() {
    let m = Monty::new("import os\nos.environ['HOME']").unwrap();
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "os.environ");
    assert!(snapshot.args().is_empty());
    let env = HostValue::Dict(vec![(s("HOME"), s("/home/user"))]);
    let complete = snapshot
        .resume(Outcome::Return(env))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &s("/home/user"));
}

#[test]
fn iterdir_returns_paths() {
    let code = "
from pathlib import Path

[p.name for p in Path('/d').iterdir()]
";
    let m = Monty::new(code).unwrap();
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "Path.iterdir");
    let listing = HostValue::List(vec![
        HostValue::Path("/d/a.txt".to_string()),
        HostValue::Path("/d/sub".to_string()),
    ]);
    let complete = snapshot
        .resume(Outcome::Return(listing))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::List(vec![s("a.txt"), s("sub")]));
}

// ─── Pure path operations (no suspension) ───

#[test]
fn lexical_path_operations_run_locally() {
    let code = "
from pathlib import Path

p = Path('/data') / 'reports' / 'q1.csv'
[str(p), p.name, p.stem, p.suffix, str(p.parent)]
";
    assert_eq!(
        run(code),
        HostValue::List(vec![
            s("/data/reports/q1.csv"),
            s("q1.csv"),
            s("q1"),
            s(".csv"),
            s("/data/reports"),
        ])
    );
}

#[test]
fn path_parts_and_joinpath() {
    let code = "
from pathlib import Path

p = Path('/a/b').joinpath('c')
[p.parts, str(p.with_suffix('.txt'))]
";
    assert_eq!(
        run(code),
        HostValue::List(vec![
            HostValue::Tuple(vec![s("/"), s("a"), s("b"), s("c")]),
            s("/a/b/c.txt"),
        ])
    );
}

#[test]
fn absolute_segment_replaces_base() {
    let code = "
from pathlib import Path

str(Path('/a/b') / '/etc')
";
    assert_eq!(run(code), s("/etc"));
}

#[test]
fn paths_convert_to_host_paths() {
    let code = "
from pathlib import Path

Path('/x/y')
";
    assert_eq!(run(code), HostValue::Path("/x/y".to_string()));
}

// ─── Synchronous run with an OS handler ───

/// A minimal in-memory filesystem handler.
struct MemOs {
    files: HashMap<String, Vec<u8>>,
    env: HashMap<String, String>,
}

impl MemOs {
    fn new() -> MemOs {
        let mut files = HashMap::new();
        files.insert("/data/report.txt".to_string(), b"42 items".to_vec());
        let mut env = HashMap::new();
        env.insert("MODE".to_string(), "test".to_string());
        MemOs { files, env }
    }

    fn path_arg(args: &[HostValue]) -> String {
        match args.first() {
            Some(HostValue::Path(p)) => p.clone(),
            other => panic!("expected a path argument, got {other:?}"),
        }
    }
}

impl OsHandler for MemOs {
    fn call(
        &mut self,
        function: OsFunction,
        args: &[HostValue],
        _kwargs: &[(String, HostValue)],
    ) -> Result<HostValue, HostException> {
        match function {
            OsFunction::PathExists => {
                Ok(HostValue::Bool(self.files.contains_key(&Self::path_arg(args))))
            }
            OsFunction::PathReadText => {
                let path = Self::path_arg(args);
                match self.files.get(&path) {
                    Some(data) => Ok(HostValue::Str(String::from_utf8_lossy(data).to_string())),
                    None => Err(HostException::new(
                        "FileNotFoundError",
                        format!("No such file: {path}"),
                    )),
                }
            }
            OsFunction::PathWriteText => {
                let path = Self::path_arg(args);
                let Some(HostValue::Str(data)) = args.get(1) else {
                    return Err(HostException::new("TypeError", "expected text data"));
                };
                self.files.insert(path, data.clone().into_bytes());
                Ok(HostValue::Int(data.len() as i64))
            }
            OsFunction::Getenv => match args.first() {
                Some(HostValue::Str(key)) => Ok(self
                    .env
                    .get(key)
                    .map(|v| HostValue::Str(v.clone()))
                    .unwrap_or_else(|| args.get(1).cloned().unwrap_or(HostValue::None))),
                _ => Err(HostException::new("TypeError", "expected a key")),
            },
            other => Err(HostException::new(
                "NotImplementedError",
                format!("OS function '{}' not implemented", other.name()),
            )),
        }
    }
}

#[test]
fn run_drives_os_calls_through_the_handler() {
    let code = "
from pathlib import Path
import os

text = Path('/data/report.txt').read_text()
Path('/data/copy.txt').write_text(text)
[text, Path('/data/copy.txt').exists(), os.getenv('MODE'), os.getenv('MISSING', 'fallback')]
";
    let m = Monty::new(code).unwrap();
    let mut handler = MemOs::new();
    let out = m
        .run(RunOptions { os: Some(&mut handler), ..Default::default() })
        .unwrap();
    assert_eq!(
        out,
        HostValue::List(vec![
            s("42 items"),
            HostValue::Bool(true),
            s("test"),
            s("fallback"),
        ])
    );
    assert_eq!(handler.files.get("/data/copy.txt").unwrap(), b"42 items");
}

#[test]
fn handler_errors_surface_when_uncaught() {
    let m = Monty::new("from pathlib import Path\nPath('/nope').read_text()").unwrap();
    let mut handler = MemOs::new();
    let err = m
        .run(RunOptions { os: Some(&mut handler), ..Default::default() })
        .unwrap_err();
    assert_eq!(err.exception_kind(), Some("FileNotFoundError"));
    assert!(matches!(err, MontyError::Runtime { .. }));
}
