//! `segany-bridge`: one segmentation invocation per process
//!
//! Stdout carries only the final status line; all logging goes to stderr.

use crate::backends::MockModelLoader;
use crate::dispatcher::{
    exit_code_for, DispatcherConfig, SegmentationDispatcher, DONE_STATUS, EXIT_FAILURE, EXIT_SUCCESS, FAILED_STATUS,
};
use crate::error::SegmentError;
use crate::inference::ModelLoader;
use crate::protocol::SegmentCommand;
use crate::tracing_config::{TracingConfig, TracingFormat};
use clap::{Parser, ValueEnum};

/// Segment Anything bridge process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "segany-bridge")]
pub struct BridgeCli {
    /// <modelType|auto> <checkpointPath> [<imagePath> <mode> <maskCardinality> <outputStem> [<format>] [mode arguments...]]
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required_unless_present = "list_providers"
    )]
    pub args: Vec<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Inference runtime
    #[arg(long, value_enum, default_value_t = Runtime::Onnx)]
    pub runtime: Runtime,

    /// Keep the model on the CPU even when an accelerator is available
    #[arg(long)]
    pub cpu: bool,

    /// Intra-op threads for ONNX Runtime (0 = runtime default)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Show execution provider availability and exit
    #[arg(long)]
    pub list_providers: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum Runtime {
    /// ONNX Runtime sessions built from exported encoder/decoder graphs
    Onnx,
    /// Deterministic synthetic model, no files needed
    Mock,
}

fn loader_for(cli: &BridgeCli) -> Result<Box<dyn ModelLoader>, SegmentError> {
    match cli.runtime {
        Runtime::Mock => Ok(Box::new(MockModelLoader::new())),
        #[cfg(feature = "onnx")]
        Runtime::Onnx => Ok(Box::new(
            crate::backends::OnnxModelLoader::new().with_intra_threads(cli.threads),
        )),
        #[cfg(not(feature = "onnx"))]
        Runtime::Onnx => Err(SegmentError::model_load(
            "ONNX runtime not compiled in, rebuild with --features onnx or pass --runtime mock",
        )),
    }
}

fn show_providers() {
    println!("Execution providers:");
    #[cfg(feature = "onnx")]
    for (name, available, description) in crate::backends::OnnxModelLoader::list_providers() {
        let status = if available { "available" } else { "not available" };
        println!("  {name}: {status} - {description}");
    }
    #[cfg(not(feature = "onnx"))]
    println!("  (ONNX runtime not compiled in)");
}

/// Report a failure and map it to the process exit code
fn report(error: &SegmentError) -> i32 {
    if error.is_operation_only() {
        eprintln!("{error}");
        println!("{DONE_STATUS}");
        return EXIT_SUCCESS;
    }
    crate::tracing_config::events::error_with_context(error, "segmentation bridge");
    eprintln!("Error: {error}");
    println!("{FAILED_STATUS} {error}");
    exit_code_for(error)
}

/// Run the bridge and return the process exit code
#[must_use]
pub fn main() -> i32 {
    let cli = BridgeCli::parse();

    if let Err(e) = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(TracingFormat::Compact)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
    {
        eprintln!("Failed to initialize tracing: {e}");
    }

    if cli.list_providers {
        show_providers();
        return EXIT_SUCCESS;
    }

    let command = match SegmentCommand::parse(&cli.args) {
        Ok(command) => command,
        Err(e) => return report(&e),
    };

    let loader = match loader_for(&cli) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Error: {e}");
            println!("{FAILED_STATUS} {e}");
            return EXIT_FAILURE;
        },
    };

    let config = DispatcherConfig::builder().use_accelerator(!cli.cpu).build();
    let mut dispatcher = SegmentationDispatcher::with_config(loader, config);

    match dispatcher.run(&command) {
        Ok(outcome) => {
            println!("{}", outcome.status_line());
            EXIT_SUCCESS
        },
        Err(e) => report(&e),
    }
}
