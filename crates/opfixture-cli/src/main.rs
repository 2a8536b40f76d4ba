//! opfixture CLI - list the fixture catalog, run operators on their samples,
//! run the fake and gradient checks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opfixture_check::{CheckConfig, run_checks};
use opfixture_core::{DataType, Device, Value};
use opfixture_operators::{OpInfo, SampleConfig, call_sample, custom_op_db, fixture_registry};

#[derive(Parser)]
#[command(name = "opfixture")]
#[command(about = "Custom operator fixtures with fake and autograd checks", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the catalog entries and their flags
    List,
    /// Print an operator's signature
    Schema {
        /// Operator name (e.g., "numpy_sort" or "_opfixture::numpy_sort")
        #[arg(value_name = "OP")]
        op: String,
    },
    /// Run an operator on its sample inputs and print the outputs
    Run {
        /// Operator or catalog entry name
        #[arg(value_name = "OP")]
        op: String,

        /// Sample dtype (e.g., "float32", "int64", "bool")
        #[arg(long, default_value = "float32")]
        dtype: String,

        /// Device tag: cpu, cuda or cuda:N
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Seed for the sample generator
        #[arg(long, default_value = "0")]
        seed: u64,
    },
    /// Run fake and gradient checks over the catalog
    Check {
        /// Only check this operator
        #[arg(long, value_name = "OP")]
        op: Option<String>,

        /// Only check these dtypes (can be repeated)
        #[arg(long = "dtype")]
        dtypes: Vec<String>,

        /// Device tag: cpu, cuda or cuda:N
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Seed for the sample generators
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Skip gradient checks
        #[arg(long)]
        skip_grad: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::List => cmd_list(),
        Commands::Schema { op } => cmd_schema(&op)?,
        Commands::Run {
            op,
            dtype,
            device,
            seed,
        } => {
            cmd_run(&op, &dtype, &device, seed)?;
        }
        Commands::Check {
            op,
            dtypes,
            device,
            seed,
            skip_grad,
        } => {
            cmd_check(op.as_deref(), &dtypes, &device, seed, skip_grad)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

fn parse_dtype(name: &str) -> Result<DataType> {
    DataType::parse(name).with_context(|| format!("Unknown dtype '{}'", name))
}

fn parse_device(name: &str) -> Result<Device> {
    Device::parse(name).with_context(|| {
        format!(
            "Invalid device '{}'. Expected cpu, cuda or cuda:N",
            name
        )
    })
}

/// Find a catalog entry by display name, qualified or bare operator name.
fn find_entry<'a>(db: &'a [OpInfo], name: &str) -> Result<&'a OpInfo> {
    db.iter()
        .find(|info| {
            let op = info.op.schema().name;
            info.name == name || op.name == name || op.to_string() == name
        })
        .with_context(|| format!("No catalog entry named '{}'", name))
}

/// Print the catalog as a table.
fn cmd_list() {
    let db = custom_op_db();
    println!(
        "{:<32} {:<36} {:<9} {:<8} {}",
        "NAME", "OP", "AUTOGRAD", "BATCHED", "GRADCHECK OUTPUTS"
    );
    for info in &db {
        let gradcheck_outputs = match info.gradcheck_outputs {
            Some(outputs) => format!("{:?}", outputs),
            None => "all".to_string(),
        };
        println!(
            "{:<32} {:<36} {:<9} {:<8} {}",
            info.name,
            info.op.name(),
            info.supports_autograd,
            info.check_batched_grad,
            gradcheck_outputs
        );
    }
    println!();

    if let Some(info) = db.first() {
        let dtypes: Vec<&str> = info.dtypes.iter().map(DataType::name).collect();
        println!("All entries support dtypes: {}", dtypes.join(", "));
    }
}

/// Print an operator's signature.
fn cmd_schema(name: &str) -> Result<()> {
    let registry = fixture_registry();
    let op = registry
        .get(name)
        .with_context(|| format!("Operator '{}' is not registered", name))?;
    println!("{}", op.schema());
    Ok(())
}

/// Run an operator on its samples and print the output metadata.
fn cmd_run(name: &str, dtype: &str, device: &str, seed: u64) -> Result<()> {
    let db = custom_op_db();
    let info = find_entry(&db, name)?;
    let config = SampleConfig {
        dtype: parse_dtype(dtype)?,
        device: parse_device(device)?,
        requires_grad: false,
        seed,
    };

    let samples = info
        .samples(&config)
        .with_context(|| format!("Failed to generate samples for {}", info.name))?;
    println!("{} ({} samples)", info.op.schema(), samples.len());

    for (index, sample) in samples.iter().enumerate() {
        let args: Vec<String> = sample.arguments().iter().map(|arg| arg.meta().to_string()).collect();
        println!("\nSample {}: ({})", index, args.join(", "));
        match call_sample(info, sample) {
            Ok(outputs) => print_outputs(&outputs),
            Err(err) if err.is_unsupported() => println!("  unsupported: {}", err),
            Err(err) => {
                return Err(err).with_context(|| format!("{} failed on sample {}", info.name, index));
            }
        }
    }

    Ok(())
}

fn print_outputs(outputs: &[Value]) {
    for (index, output) in outputs.iter().enumerate() {
        println!("  output {}: {}", index, output.meta());
    }
}

/// Run the check harness and print the report.
fn cmd_check(
    op: Option<&str>,
    dtypes: &[String],
    device: &str,
    seed: u64,
    skip_grad: bool,
) -> Result<()> {
    let db = custom_op_db();
    let selected: Vec<OpInfo> = match op {
        Some(name) => vec![find_entry(&db, name)?.clone()],
        None => db.clone(),
    };

    let dtypes = if dtypes.is_empty() {
        None
    } else {
        Some(
            dtypes
                .iter()
                .map(|name| parse_dtype(name))
                .collect::<Result<Vec<_>>>()?,
        )
    };
    let config = CheckConfig {
        seed,
        device: parse_device(device)?,
        dtypes,
        check_grad: !skip_grad,
        ..Default::default()
    };

    let report = run_checks(&selected, &config);
    println!("{}", report);

    if !report.is_success() {
        anyhow::bail!("{} check(s) failed", report.failed());
    }
    Ok(())
}
