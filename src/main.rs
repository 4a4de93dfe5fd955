//! ofml CLI: drive the OFML runtime core from the command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use ofml_core::config::RuntimeConfig;
use ofml_core::consistency::ErrorLog;
use ofml_core::hierarchy::{ElementCreation, InstanceSnapshot, RemoveOutcome};
use ofml_core::runtime::Runtime;
use ofml_core::showroom;
use ofml_core::value::Value;

#[derive(Parser)]
#[command(name = "ofml", version, about = "OFML object model runtime")]
struct Cli {
    /// Runtime config file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the showroom program and walk through element and property edits.
    Demo {
        /// Print the steps and the final instance tree as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective runtime configuration as TOML.
    Config,
}

#[derive(Serialize)]
struct Step {
    action: String,
    outcome: String,
}

#[derive(Serialize)]
struct DemoReport {
    steps: Vec<Step>,
    tree: InstanceSnapshot,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Demo { json } => {
            let mut rt = Runtime::new(config);
            let report = run_demo(&mut rt)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            } else {
                for step in &report.steps {
                    println!("{:<40} {}", step.action, step.outcome);
                }
                println!();
                print_tree(&report.tree, 0);
                println!();
                println!("{}", rt.info());
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn run_demo(rt: &mut Runtime) -> Result<DemoReport> {
    let room = showroom::build_demo(rt)?;
    let mut steps = Vec::new();
    let mut step = |action: &str, outcome: String| {
        steps.push(Step {
            action: action.to_string(),
            outcome,
        });
    };

    let creation = |c: &ElementCreation, rt: &Runtime| match c {
        ElementCreation::Accepted(id) => format!("accepted as {}", rt.describe(*id)),
        ElementCreation::Demoted { instance, failure } => {
            format!("{} kept as plain child ({failure})", rt.describe(*instance))
        }
        ElementCreation::Rejected(failure) => format!("rejected ({failure})"),
    };

    let added = rt.add_element(room.cabinet, "Shelf", &[Value::str("SHF-01")])?;
    step("add Shelf to cabinet", creation(&added, &*rt));
    let refused = rt.add_element(room.cabinet, "Cabinet", &[])?;
    step("add Cabinet to cabinet", creation(&refused, &*rt));

    let changed = rt.set_prop_value(room.cabinet, "width", Value::Float(1.0))?;
    step("set width = 1.0", format!("changed: {changed}"));
    let changed = rt.set_prop_value(room.cabinet, "doors", Value::Bool(true))?;
    step("set doors = true", format!("changed: {changed}"));
    let changed = rt.set_prop_value(room.cabinet, "width", Value::Float(1.6))?;
    step(
        "set width = 1.6",
        format!(
            "changed: {changed}, width now {}",
            rt.get_prop_value(room.cabinet, "width")?
        ),
    );
    if let Err(err) = rt.set_prop_value(room.cabinet, "color", Value::sym("red")) {
        step("set color = @red", format!("error: {err}"));
    }

    for shelf in rt.elements(room.cabinet)? {
        let name = rt.describe(shelf);
        let outcome = match rt.remove(shelf)? {
            RemoveOutcome::Removed { destroyed } => format!("removed {} instance(s)", destroyed.len()),
            RemoveOutcome::Vetoed(failure) => format!("vetoed ({failure})"),
        };
        step(&format!("remove {name}"), outcome);
    }

    let mut log = ErrorLog::new();
    let found = rt.check_consistency(room.env, &mut log)?;
    step("check consistency", format!("{found} problem(s)"));
    if let Some(bounds) = rt.local_bounds(room.cabinet)? {
        let [w, h, d] = bounds.size();
        step("cabinet bounds", format!("{w:.2} x {h:.2} x {d:.2}"));
    }

    let tree = rt.snapshot(room.env)?;
    Ok(DemoReport { steps, tree })
}

fn print_tree(node: &InstanceSnapshot, depth: usize) {
    let marker = if node.element { " [element]" } else { "" };
    println!("{:indent$}{} : {}{marker}", "", node.name, node.type_name, indent = depth * 2);
    for (key, value) in &node.properties {
        println!("{:indent$}  {key} = {value}", "", indent = depth * 2);
    }
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}
