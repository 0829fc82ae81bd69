//! Monty front-end: lexer, parser, and bytecode compiler.
//!
//! The output of [`compile`] is an immutable [`Program`] consumed by the
//! `monty-vm` execution engine. The front-end accepts a Python-subset
//! grammar: expressions, functions and closures, classes restricted to
//! annotated fields plus methods (the `dataclass` decorator), control flow,
//! `try`/`except`/`finally`, comprehensions, f-strings, and `await`.

pub mod ast;
pub mod code;
mod codegen;
mod error;
mod parser;
mod scope;
pub mod token;

pub use code::{
    BinOp, ClassDesc, CmpOp, CodeId, CodeObject, Const, ConstId, Instr, ParamDesc, Program,
    StringId, UnOp,
};
pub use error::SyntaxError;

/// Compile source text into a [`Program`].
///
/// # Arguments
/// * `source` - script source text
/// * `script_name` - file name used in tracebacks and `repr`
/// * `input_names` - declared input variables, bound as globals at start
/// * `external_functions` - declared host-implemented function names
/// * `type_check_stubs` - opaque text stored for an external type checker
pub fn compile(
    source: &str,
    script_name: &str,
    input_names: &[String],
    external_functions: &[String],
    type_check_stubs: Option<String>,
) -> Result<Program, SyntaxError> {
    let attach = |e: SyntaxError| e.attach_source(script_name, source);
    let tokens = token::lex(source).map_err(attach)?;
    let stmts = parser::parse(tokens).map_err(attach)?;
    codegen::compile_module(
        &stmts,
        source,
        script_name,
        input_names,
        external_functions,
        type_check_stubs,
    )
    .map_err(attach)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_simple_program() {
        let program = compile("1 + 2 * 3", "main.py", &[], &[], None).unwrap();
        assert_eq!(program.script_name, "main.py");
        assert_eq!(program.codes.len(), 1);
    }

    #[test]
    fn compile_reports_syntax_error_position() {
        let err = compile("x = (1\ny = 2", "main.py", &[], &[], None).unwrap_err();
        assert_eq!(err.script_name, "main.py");
    }

    #[test]
    fn compile_records_declarations() {
        let program = compile(
            "process(x)",
            "main.py",
            &["x".to_string()],
            &["process".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(program.input_names, vec!["x".to_string()]);
        assert_eq!(program.external_functions, vec!["process".to_string()]);
    }

    #[test]
    fn line_count_summary() {
        let program = compile("x = 1\ny = 2\nx + y\n", "main.py", &[], &[], None).unwrap();
        assert_eq!(program.line_count(), 3);
    }
}
