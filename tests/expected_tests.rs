//! Compiles every template under `tests/cases` and `tests/errors` and checks
//! it against the file next to it.
//!
//! - `name.expected.snippets`: each line must appear in the generated code,
//!   or must not appear when prefixed with `!`
//! - `name.expected.code`: the error code compilation must fail with
//!
//! Run with: cargo test --test expected_tests

use libtest_mimic::{Arguments, Failed, Trial};
use pug_compiler::{CompileOptions, LocalsMode, Pipeline};
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    let args = Arguments::from_args();
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests");

    let mut trials = Vec::new();
    for path in collect(&root, "cases/**/*.pug") {
        trials.push(Trial::test(test_name(&root, &path), move || check_output(&path)));
    }
    for path in collect(&root, "errors/*.pug") {
        trials.push(Trial::test(test_name(&root, &path), move || check_error(&path)));
    }

    libtest_mimic::run(&args, trials).exit();
}

fn collect(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let pattern = root.join(pattern);
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .expect("valid glob pattern")
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    files
}

/// "tests/cases/basic/hello.pug" -> "cases/basic/hello"
fn test_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.with_extension("").to_string_lossy().replace('\\', "/")
}

fn options(path: &Path) -> CompileOptions {
    CompileOptions {
        filename: path.file_name().map(|name| name.to_string_lossy().into_owned()),
        compile_debug: false,
        locals: LocalsMode::Bare,
        ..CompileOptions::default()
    }
}

/// Undo the script-safe escapes so fixtures can use plain markup.
fn readable(code: &str) -> String {
    code.replace("\\u003C", "<")
        .replace("\\u003E", ">")
        .replace("\\u002F", "/")
}

fn check_output(path: &Path) -> Result<(), Failed> {
    let source = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let expected_path = path.with_extension("expected.snippets");
    let expected = fs::read_to_string(&expected_path)
        .map_err(|_| format!("Missing expected file: {}", expected_path.display()))?;

    let result = Pipeline::new()
        .compile(&source, &options(path))
        .map_err(|e| format!("Compile error for {}:\n{}", path.display(), e.render(&source)))?;
    let code = readable(&result.code);

    let mut failures = Vec::new();
    for line in expected.lines().filter(|line| !line.trim().is_empty()) {
        match line.strip_prefix('!') {
            Some(absent) if code.contains(absent) => failures.push(format!("unexpected: {}", absent)),
            Some(_) => {}
            None if !code.contains(line) => failures.push(format!("missing: {}", line)),
            None => {}
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(format!("{}\n--- actual ---\n{}", failures.join("\n"), code).into())
    }
}

fn check_error(path: &Path) -> Result<(), Failed> {
    let source = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let expected_path = path.with_extension("expected.code");
    let expected = fs::read_to_string(&expected_path)
        .map_err(|_| format!("Missing expected file: {}", expected_path.display()))?;

    match Pipeline::new().compile(&source, &options(path)) {
        Ok(_) => Err(format!("Expected {} but compilation succeeded", expected.trim()).into()),
        Err(e) if e.code() == expected.trim() => {
            let rendered = e.render(&source);
            if rendered.contains(e.code()) {
                Ok(())
            } else {
                Err(format!("Rendered error does not name its code:\n{}", rendered).into())
            }
        }
        Err(e) => Err(format!(
            "Error mismatch\n--- expected ---\n{}\n--- actual ---\n{}",
            expected.trim(),
            e.render(&source)
        )
        .into()),
    }
}
