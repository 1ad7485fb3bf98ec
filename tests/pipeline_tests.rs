use pug_compiler::ast::Node;
use pug_compiler::expr::{AcceptAll, NoFolding};
use pug_compiler::{CompileOptions, LocalsMode, Pipeline, compile, compile_with};

fn bare() -> CompileOptions {
    CompileOptions {
        compile_debug: false,
        locals: LocalsMode::Bare,
        ..CompileOptions::default()
    }
}

#[test]
fn test_default_compile_wraps_locals_and_debug() {
    let result = compile("p= greeting").unwrap();

    assert!(result.code.starts_with("function template(locals) {"));
    assert!(result.code.contains("var pug_debug_filename, pug_debug_line;try {"));
    assert!(result.code.contains("var locals_for_with = (locals || {});(function (greeting) {"));
    assert!(result.code.ends_with(";return pug_html;}"));
}

#[test]
fn test_folding_can_be_disabled() {
    let folded = compile_with("p= 'x'", &bare()).unwrap();
    assert!(!folded.code.contains("pug_interp = 'x'"));

    let pipeline = Pipeline::new().with_evaluator(NoFolding);
    let result = pipeline.compile("p= 'x'", &bare()).unwrap();
    assert!(result.code.contains("pug.escape(null == (pug_interp = 'x') ? \"\" : pug_interp)"));
}

#[test]
fn test_validation_can_be_disabled() {
    assert_eq!(compile_with("p= a +", &bare()).unwrap_err().code(), "SYNTAX_ERROR");

    let pipeline = Pipeline::new().with_validator(AcceptAll);
    let result = pipeline.compile("p= a +", &bare()).unwrap();
    assert!(result.code.contains("pug_interp = a +"));
}

#[test]
fn test_inline_runtime_reports_helpers() {
    let options = CompileOptions {
        inline_runtime_functions: true,
        ..bare()
    };
    let result = compile_with("a(href=url)= label", &options).unwrap();

    assert_eq!(result.runtime_functions, vec!["attr", "escape"]);
    assert!(result.code.contains("function pug_attr("));
    assert!(result.code.contains("function pug_escape("));
    assert!(!result.code.contains("pug.attr("));
}

#[test]
fn test_lex_serializes_tokens() {
    let tokens = Pipeline::new().lex("p hi", None).unwrap();
    let json = serde_json::to_value(&tokens).unwrap();

    assert_eq!(json[0]["type"], "tag");
    assert_eq!(json[0]["val"], "p");
    assert_eq!(json[0]["line"], 1);
    assert_eq!(json[0]["column"], 1);
    assert_eq!(tokens.last().map(|t| t.name()), Some("eos"));
}

#[test]
fn test_parse_serializes_tree() {
    let ast = Pipeline::new().parse("ul\n  li a\n  li b", Some("list.pug")).unwrap();
    let json = serde_json::to_value(Node::Block(ast.root)).unwrap();

    assert_eq!(json["type"], "Block");
    assert_eq!(json["nodes"][0]["type"], "Tag");
    assert_eq!(json["nodes"][0]["name"], "ul");
    assert_eq!(json["nodes"][0]["block"]["nodes"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_errors_render_with_context() {
    let source = "div\n  p(class='a'\n";
    let options = CompileOptions {
        filename: Some("page.pug".to_string()),
        ..bare()
    };
    let err = compile_with(source, &options).unwrap_err();
    let rendered = err.render(source);

    assert_eq!(err.code(), "NO_END_BRACKET");
    assert!(rendered.contains("page.pug:2:"));
    assert!(rendered.contains("error[NO_END_BRACKET]"));
    assert!(rendered.contains("p(class='a'"));
}

#[test]
fn test_pipeline_is_reusable() {
    let pipeline = Pipeline::new();
    let first = pipeline.compile("each x in xs\n  p= x", &bare()).unwrap();
    let second = pipeline.compile("each x in xs\n  p= x", &bare()).unwrap();

    assert_eq!(first.code, second.code);
    assert!(first.code.contains("pug_index0"));
}
