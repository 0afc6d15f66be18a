//! Egresos CLI - reshape discharge spreadsheets and load them into SQLite
//!
//! # Main Commands
//!
//! ```bash
//! egresos transform egresos_enero.xlsx          # Reshape and export (CSV by default)
//! egresos load transformed/egresos_transformado.csv
//! egresos history                               # List registered loads
//! egresos delete egresos_transformado.csv --yes # Remove a load and its file
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! egresos parse egresos_enero.xlsx              # Dump the raw sheet as JSON
//! egresos fingerprint transformed/egresos_transformado.csv
//! ```

use clap::{Parser, Subcommand};
use egresos::{
    delete_upload, fingerprint_file, load_file, read_source, transform_and_export, Config,
    DeleteOutcome, DuplicatePolicy, LoadOptions, OutputFormat, Provisioning, SqliteStore,
    TransformOptions, UploadRegistry,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "egresos")]
#[command(
    about = "Reshape hospital discharge spreadsheets and load them without duplicates",
    long_about = None
)]
struct Cli {
    /// SQLite database (path or sqlite:// URL)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Upload registry file
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a source file and output its rows as JSON
    Parse {
        /// Source file (.xlsx, .xls, .xlsm, .ods or .csv)
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Reshape a source file into one row per diagnosis and export it
    Transform {
        /// Source file (.xlsx, .xls, .xlsm, .ods or .csv)
        input: PathBuf,

        /// Output format: csv or xlsx (default: from --output, else csv)
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Output file (default: <transformed dir>/egresos_transformado.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a transformed file into the database and register it
    Load {
        /// Transformed CSV or XLSX file
        file: PathBuf,

        /// What to do when some rows are already stored
        #[arg(long)]
        policy: Option<DuplicatePolicy>,

        /// Drop and recreate the table before inserting
        #[arg(long)]
        recreate: bool,
    },

    /// Delete the stored rows, file and registry entry of a load
    Delete {
        /// Registered file name
        filename: String,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// List registered loads
    History,

    /// Print the content fingerprint of a transformed file
    Fingerprint {
        /// Transformed CSV or XLSX file
        file: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(database) = cli.database {
        config.database_url = database;
    }
    if let Some(registry) = cli.registry {
        config.registry_path = registry;
    }

    let result = match cli.command {
        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),

        Commands::Transform {
            input,
            format,
            output,
        } => cmd_transform(&config, &input, format, output.as_deref()),

        Commands::Load {
            file,
            policy,
            recreate,
        } => {
            let options = LoadOptions {
                policy: policy.unwrap_or(config.duplicate_policy),
                provisioning: if recreate {
                    Provisioning::Recreate
                } else {
                    config.provisioning
                },
            };
            cmd_load(&config, &file, &options)
        }

        Commands::Delete { filename, yes } => cmd_delete(&config, &filename, yes),

        Commands::History => cmd_history(&config),

        Commands::Fingerprint { file } => cmd_fingerprint(&file),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing: {}", input.display());

    let table = read_source(input)?;
    eprintln!("   Columns: {}", table.headers.join(", "));
    eprintln!("✅ Parsed {} rows", table.rows.len());

    let json = serde_json::to_string_pretty(&table.to_json_records())?;
    write_output(&json, output)?;

    Ok(())
}

fn cmd_transform(
    config: &Config,
    input: &Path,
    format: Option<OutputFormat>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Processing: {}", input.display());

    let format = format
        .or_else(|| output.and_then(OutputFormat::from_path))
        .unwrap_or_default();

    let mut options = TransformOptions {
        format,
        output_dir: config.transformed_dir.clone(),
        file_name: None,
    };
    if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            options.output_dir = parent.to_path_buf();
        }
        options.file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    }

    let outcome = transform_and_export(input, &options)?;

    eprintln!("\n⚙️  Encounters: {}", outcome.stats.source_rows);
    eprintln!("   Diagnosis rows: {}", outcome.stats.output_rows);
    if outcome.stats.unparsed_dates > 0 {
        eprintln!("   ⚠️  Unparsed dates: {}", outcome.stats.unparsed_dates);
    }
    eprintln!("   💾 Saved to: {}", outcome.output_path.display());
    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_load(
    config: &Config,
    file: &Path,
    options: &LoadOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = SqliteStore::connect(&config.database_url)?;
    let mut registry = UploadRegistry::load(&config.registry_path)?;

    let report = load_file(&mut store, file, &mut registry, options)?;
    registry.save()?;

    eprintln!("\n📊 {}", report.summary());
    eprintln!("   Fingerprint: {}", report.fingerprint.short());
    Ok(())
}

fn cmd_delete(
    config: &Config,
    filename: &str,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = UploadRegistry::load(&config.registry_path)?;
    let entry = registry.require(filename)?;

    if !yes {
        eprintln!(
            "⚠️  This deletes every stored record for {} and the file {}.",
            entry.period(),
            filename
        );
        eprintln!("   Run again with --yes to confirm.");
        return Ok(());
    }

    let mut store = SqliteStore::connect(&config.database_url)?;
    let report = delete_upload(&mut store, &mut registry, filename, &config.transformed_dir)?;
    registry.save()?;

    match report.outcome {
        DeleteOutcome::Deleted { rows } => {
            eprintln!("🗑️  Deleted {} records for {}", rows, report.period)
        }
        DeleteOutcome::NothingMatched => {
            eprintln!("🗑️  No stored records for {}", report.period)
        }
    }
    if report.file_removed {
        eprintln!("   File removed: {}", filename);
    }
    Ok(())
}

fn cmd_history(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let registry = UploadRegistry::load(&config.registry_path)?;

    if registry.is_empty() {
        eprintln!("📋 No loads registered yet.");
        eprintln!("   Use 'egresos load <file>' to add one.");
        return Ok(());
    }

    eprintln!("📋 Registered loads ({}):\n", registry.len());
    for (name, entry) in registry.iter() {
        println!("  📄 {}", name);
        println!("     Period: {}", entry.period());
        println!("     Rows: {}", entry.rows);
        println!("     Fingerprint: {}", entry.fingerprint.short());
        println!("     Loaded: {}", entry.loaded_at);
        println!();
    }
    Ok(())
}

fn cmd_fingerprint(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", fingerprint_file(file)?);
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
