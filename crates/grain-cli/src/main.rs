use clap::Parser;
use grain_algo::{
    CoclusteringBuilder, CoclusteringHandler, CoclusteringOutcome, CoclusteringSpec,
    EngineParams, OptimizerParams,
};
use grain_core::{
    CancellationToken, Diagnostics, GrainError, HierarchicalDataGrid, MemoryBudget,
};
use grain_io::{read_data_file, read_dictionary_file, AnytimeReportSaver, ReaderOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

mod cli;
use cli::Cli;

/// Set by the SIGINT handler; bridged onto the engine's token.
static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPT_REQUESTED.store(true, Ordering::Relaxed);
}

/// Forward Ctrl-C to the cooperative cancellation token.
fn install_interrupt_bridge(token: CancellationToken) {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_sigint as libc::sighandler_t);
    }
    std::thread::spawn(move || loop {
        if INTERRUPT_REQUESTED.load(Ordering::Relaxed) {
            token.request();
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    });
}

/// Writes each anytime improvement as an indexed intermediate report.
struct IntermediateSaver<'a> {
    saver: &'a mut AnytimeReportSaver,
}

impl CoclusteringHandler for IntermediateSaver<'_> {
    fn handle_improvement(&mut self, report: &HierarchicalDataGrid, is_last: bool) {
        // The final report is written by the caller from the returned
        // outcome; intermediates only track strict improvements.
        if is_last {
            return;
        }
        match self.saver.save_intermediate(report) {
            Ok(path) => info!(path = %path.display(), "intermediate report saved"),
            Err(error) => tracing::warn!(%error, "intermediate report not saved"),
        }
    }
}

fn write_error_log(path: Option<&Path>, diagnostics: &Diagnostics) {
    if let Some(path) = path {
        let content = diagnostics.render();
        if let Err(error) = std::fs::write(path, content) {
            eprintln!("error: cannot write error log {}: {}", path.display(), error);
        }
    }
}

fn fail(cli: &Cli, diagnostics: &mut Diagnostics, error: &GrainError) -> i32 {
    diagnostics.add_error("run", error.to_string());
    eprintln!("error: {}", error);
    write_error_log(cli.error_log.as_deref(), diagnostics);
    1
}

fn run(cli: &Cli) -> i32 {
    let mut diagnostics = Diagnostics::new();

    let separator = match cli.separator() {
        Ok(separator) => separator,
        Err(message) => {
            return fail(cli, &mut diagnostics, &GrainError::Spec(message));
        }
    };

    // Schema.
    let dictionaries = match read_dictionary_file(Path::new(cli.dictionary_file())) {
        Ok(dictionaries) => dictionaries,
        Err(error) => return fail(cli, &mut diagnostics, &error),
    };
    let Some(dictionary) = dictionaries.dictionary(cli.dictionary_name()) else {
        return fail(
            cli,
            &mut diagnostics,
            &GrainError::Spec(format!(
                "dictionary `{}` is not declared in {}",
                cli.dictionary_name(),
                cli.dictionary_file()
            )),
        );
    };

    // Data.
    let token = CancellationToken::new();
    install_interrupt_bridge(token.clone());
    let options = ReaderOptions {
        separator,
        frequency_attribute: cli.frequency.clone(),
    };
    let outcome = match read_data_file(&cli.input, dictionary, &options, &mut diagnostics, &token)
    {
        Ok(outcome) => outcome,
        Err(error) => return fail(cli, &mut diagnostics, &error),
    };
    println!(
        "Read {} records ({} skipped) from {}",
        outcome.rows_read,
        outcome.rows_skipped,
        cli.input.display()
    );

    // Engine.
    let spec = match (&cli.identifier, &cli.inner) {
        (Some(identifier), inner) => CoclusteringSpec::InstancesVariables {
            identifier: identifier.clone(),
            inner: if inner.is_empty() {
                outcome
                    .table
                    .attributes()
                    .iter()
                    .map(|attribute| attribute.name.clone())
                    .filter(|name| name != identifier)
                    .collect()
            } else {
                inner.clone()
            },
        },
        (None, _) => CoclusteringSpec::Variables {
            attributes: if cli.variables.is_empty() {
                outcome
                    .table
                    .attributes()
                    .iter()
                    .map(|attribute| attribute.name.clone())
                    .collect()
            } else {
                cli.variables.clone()
            },
        },
    };
    let params = EngineParams {
        memory: cli
            .memory
            .map(MemoryBudget::from_megabytes)
            .unwrap_or_default(),
        optimizer: OptimizerParams {
            time_budget: cli.time.map(Duration::from_secs),
            ..Default::default()
        },
        frequency_attribute_name: cli.frequency.clone(),
        short_description: String::new(),
    };

    let mut saver = AnytimeReportSaver::new(cli.output.clone(), !cli.no_json);
    let mut handler = IntermediateSaver { saver: &mut saver };
    let mut builder = CoclusteringBuilder::new(params, token);
    let result = builder.compute(&outcome.table, &spec, &mut handler);
    diagnostics.extend(builder.diagnostics.clone());

    let code = match result {
        Ok(CoclusteringOutcome::Informative(report)) => match saver.save_final(&report) {
            Ok(path) => {
                println!(
                    "Coclustering report written to {} (level {:.6}, {} cells)",
                    path.display(),
                    report.level(),
                    report.cells.len()
                );
                0
            }
            Err(error) => fail(cli, &mut diagnostics, &error),
        },
        Ok(CoclusteringOutcome::NotInformative) => {
            // An empty report: costs at zero, no dimension kept.
            let empty = HierarchicalDataGrid {
                short_description: String::new(),
                null_cost: 0.0,
                cost: 0.0,
                initial_attribute_number: 0,
                frequency_attribute_name: cli.frequency.clone(),
                identifier_attribute_name: cli.identifier.clone(),
                attributes: Vec::new(),
                cells: Vec::new(),
                total_frequency: outcome.table.total_frequency(),
            };
            match saver.save_final(&empty) {
                Ok(path) => {
                    println!(
                        "Coclustering is not informative; empty report written to {}",
                        path.display()
                    );
                    0
                }
                Err(error) => fail(cli, &mut diagnostics, &error),
            }
        }
        Err(error) => fail(cli, &mut diagnostics, &error),
    };
    if code == 0 {
        write_error_log(cli.error_log.as_deref(), &diagnostics);
    }
    code
}

fn main() {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    std::process::exit(run(&cli));
}
