use clap::{Parser, Subcommand, ValueEnum};
use pug_compiler::ast::Node;
use pug_compiler::{CompileError, CompileOptions, LocalsMode, Pipeline, Pretty};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "pug")]
#[command(about = "Pug - compile indentation-based templates to JavaScript render functions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile .pug files to JavaScript
    Compile {
        /// Path to .pug file or directory
        #[arg(required_unless_present = "stdin")]
        file: Option<PathBuf>,

        /// Read from stdin
        #[arg(long)]
        stdin: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        options: OptionArgs,
    },
    /// Print the token stream as JSON
    Lex {
        #[arg(required_unless_present = "stdin")]
        file: Option<PathBuf>,

        #[arg(long)]
        stdin: bool,
    },
    /// Print the syntax tree as JSON
    Parse {
        #[arg(required_unless_present = "stdin")]
        file: Option<PathBuf>,

        #[arg(long)]
        stdin: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LocalsArg {
    With,
    #[value(name = "self")]
    SelfObject,
    Bare,
}

impl From<LocalsArg> for LocalsMode {
    fn from(arg: LocalsArg) -> Self {
        match arg {
            LocalsArg::With => LocalsMode::With,
            LocalsArg::SelfObject => LocalsMode::SelfObject,
            LocalsArg::Bare => LocalsMode::Bare,
        }
    }
}

/// Flags layered over the `--config` file.
#[derive(clap::Args)]
struct OptionArgs {
    /// JSON file with compile options
    #[arg(long)]
    config: Option<PathBuf>,

    /// Doctype to assume before the first `html` tag
    #[arg(long)]
    doctype: Option<String>,

    /// Pretty-print the HTML, optionally with a custom indent
    #[arg(long, num_args = 0..=1, default_missing_value = "  ")]
    pretty: Option<String>,

    /// Omit source position tracking from the output
    #[arg(long)]
    no_debug: bool,

    /// Bundle the runtime helpers into the output
    #[arg(long)]
    inline_runtime: bool,

    /// Name of the generated function
    #[arg(long)]
    name: Option<String>,

    /// How template code reaches its locals
    #[arg(long, value_enum)]
    locals: Option<LocalsArg>,
}

impl OptionArgs {
    fn resolve(&self) -> Result<CompileOptions, String> {
        let mut options = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
                serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))?
            }
            None => CompileOptions::default(),
        };
        if let Some(doctype) = &self.doctype {
            options.doctype = Some(doctype.clone());
        }
        if let Some(pretty) = &self.pretty {
            options.pretty = Pretty::Indent(pretty.clone());
        }
        if self.no_debug {
            options.compile_debug = false;
        }
        if self.inline_runtime {
            options.inline_runtime_functions = true;
        }
        if let Some(name) = &self.name {
            options.template_name = name.clone();
        }
        if let Some(locals) = self.locals {
            options.locals = locals.into();
        }
        Ok(options)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let pipeline = Pipeline::new();

    match cli.command {
        Commands::Compile { file, stdin, json, options } => {
            let options = options.resolve().unwrap_or_else(|e| fail(&e));
            if stdin {
                compile_stdin(&pipeline, options, json);
            } else if let Some(path) = file {
                compile_path(&pipeline, &path, &options);
            } else {
                fail("provide a file/directory or use --stdin");
            }
        }
        Commands::Lex { file, stdin } => {
            let (source, filename) = read_input(file.as_deref(), stdin);
            let tokens = pipeline
                .lex(&source, filename.as_deref())
                .unwrap_or_else(|e| report(&e, &source));
            print_json(&tokens);
        }
        Commands::Parse { file, stdin } => {
            let (source, filename) = read_input(file.as_deref(), stdin);
            let ast = pipeline
                .parse(&source, filename.as_deref())
                .unwrap_or_else(|e| report(&e, &source));
            print_json(&Node::Block(ast.root));
        }
    }
}

fn read_input(file: Option<&Path>, stdin: bool) -> (String, Option<String>) {
    if stdin {
        let mut source = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut source) {
            fail(&format!("failed to read stdin: {}", e));
        }
        return (source, None);
    }
    let Some(path) = file else {
        fail("provide a file or use --stdin");
    };
    match fs::read_to_string(path) {
        Ok(source) => (source, Some(path.display().to_string())),
        Err(e) => fail(&format!("{}: {}", path.display(), e)),
    }
}

fn compile_stdin(pipeline: &Pipeline, options: CompileOptions, json_output: bool) {
    let (source, _) = read_input(None, true);
    let result = pipeline
        .compile(&source, &options)
        .unwrap_or_else(|e| report(&e, &source));

    if json_output {
        print_json(&result);
    } else {
        print!("{}", result.code);
    }
}

fn compile_path(pipeline: &Pipeline, path: &Path, options: &CompileOptions) {
    if path.is_file() {
        if path.extension().is_none_or(|ext| ext != "pug") {
            fail(&format!("{} is not a .pug file", path.display()));
        }
        let start = Instant::now();
        if !compile_file(pipeline, path, options) {
            process::exit(1);
        }
        print_summary(1, start.elapsed());
    } else if path.is_dir() {
        compile_directory(pipeline, path, options);
    } else {
        fail(&format!("{} does not exist", path.display()));
    }
}

fn compile_directory(pipeline: &Pipeline, dir: &Path, options: &CompileOptions) {
    let start = Instant::now();
    let mut file_count = 0;
    let mut failed = 0;

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "pug"))
    {
        if compile_file(pipeline, entry.path(), options) {
            file_count += 1;
        } else {
            failed += 1;
        }
    }

    if file_count + failed == 0 {
        fail(&format!("No .pug files found in {}", dir.display()));
    }

    print_summary(file_count, start.elapsed());
    if failed > 0 {
        process::exit(1);
    }
}

/// Compile one file to a sibling `.js`, reporting any error.
fn compile_file(pipeline: &Pipeline, path: &Path, options: &CompileOptions) -> bool {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}: {}", path.display(), e);
            return false;
        }
    };

    let options = CompileOptions {
        filename: Some(path.display().to_string()),
        ..options.clone()
    };
    match pipeline.compile(&source, &options) {
        Ok(result) => {
            let output = path.with_extension("js");
            if let Err(e) = fs::write(&output, &result.code) {
                eprintln!("Error: {}: {}", output.display(), e);
                return false;
            }
            print_generated(&output.display().to_string());
            true
        }
        Err(e) => {
            eprint!("{}", render(&e, &source));
            false
        }
    }
}

fn render(error: &CompileError, source: &str) -> String {
    if io::stderr().is_terminal() {
        error.render_color(source)
    } else {
        error.render(source)
    }
}

fn report(error: &CompileError, source: &str) -> ! {
    eprint!("{}", render(error, source));
    process::exit(1);
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(&format!("failed to serialize output: {}", e)),
    }
}

fn print_generated(path: &str) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("  \x1b[32m✓\x1b[0m {}", path);
    } else {
        eprintln!("  ✓ {}", path);
    }
}

fn print_summary(count: usize, elapsed: std::time::Duration) {
    let is_tty = io::stderr().is_terminal();
    let time_str = format_duration(elapsed);
    let files_word = if count == 1 { "file" } else { "files" };

    if is_tty {
        eprintln!("\n\x1b[1m✨ Compiled {} {} in {}\x1b[0m", count, files_word, time_str);
    } else {
        eprintln!("\n✨ Compiled {} {} in {}", count, files_word, time_str);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
