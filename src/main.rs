use clap::{ArgAction, Parser as ClapParser, Subcommand};
use stagecraft::cli::{
    self, CliError, CompileCommandOptions, CompileResult, OutputFormat, RunOptions,
};
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "stagecraft")]
#[command(about = "stagecraft - compile typed query expressions into aggregation pipelines")]
#[command(version)]
struct Cli {
    /// Log compilation steps (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query and print the command document
    Compile {
        /// The query to compile
        query: String,

        /// Collection named in the command document
        #[arg(short, long, default_value = "documents", env = "STAGECRAFT_COLLECTION")]
        collection: String,

        /// Bind a query parameter (name=json), repeatable
        #[arg(long = "param", value_name = "NAME=JSON")]
        params: Vec<String>,

        /// Define a named constant (Type.Member=int), repeatable
        #[arg(long = "constant", value_name = "TYPE.MEMBER=INT")]
        constants: Vec<String>,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,

        /// Print shell notation instead of JSON
        #[arg(long)]
        shell: bool,

        /// Merge adjacent $match, $skip and $limit stages
        #[arg(long)]
        optimize: bool,

        /// Only validate syntax, don't translate
        #[arg(long)]
        syntax_only: bool,
    },

    /// Compile a query and run it over JSON documents
    Run {
        /// The query to run
        query: String,

        /// JSON input (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<String>,

        /// Bind a query parameter (name=json), repeatable
        #[arg(long = "param", value_name = "NAME=JSON")]
        params: Vec<String>,

        /// Define a named constant (Type.Member=int), repeatable
        #[arg(long = "constant", value_name = "TYPE.MEMBER=INT")]
        constants: Vec<String>,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },
}

fn install_tracing_subscriber(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "stagecraft=debug",
        _ => "stagecraft=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    install_tracing_subscriber(cli.verbose);

    let result = match cli.command {
        Commands::Compile {
            query,
            collection,
            params,
            constants,
            pretty,
            shell,
            optimize,
            syntax_only,
        } => {
            let options = CompileCommandOptions {
                query,
                collection,
                params,
                constants,
                optimize,
                syntax_only,
            };
            let format = if shell { OutputFormat::Shell } else { OutputFormat::Json };
            run_compile(&options, format, pretty)
        }
        Commands::Run {
            query,
            input,
            params,
            constants,
            pretty,
        } => run_run(query, input, params, constants, pretty),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run_compile(options: &CompileCommandOptions, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match cli::execute_compile(options)? {
        CompileResult::SyntaxValid => println!("Syntax is valid"),
        CompileResult::Success(command) => println!("{}", cli::format_output(&command, format, pretty)),
    }
    Ok(())
}

fn run_run(
    query: String,
    input: Option<String>,
    params: Vec<String>,
    constants: Vec<String>,
    pretty: bool,
) -> Result<(), CliError> {
    let input = match input {
        Some(s) => Some(s),
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Some(buffer)
        }
        None => None,
    };

    let options = RunOptions {
        query,
        input,
        params,
        constants,
    };

    let output = cli::execute_run(&options)?;
    println!("{}", cli::format_output(&output, OutputFormat::Json, pretty));
    Ok(())
}
