use std::fs;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use colored::Colorize;
use itertools::Itertools;
use miette::IntoDiagnostic;
use qm_lang::{Session, UnitValue};

#[derive(Parser, Debug, Default)]
#[command(name = "qm")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(after_help = "# Examples:\n\n\
    ## To evaluate a script and print every quantity:\n\
    qm model.qm\n\n\
    ## To drive an input and advance the simulation:\n\
    qm --set speed 12 --steps 10 model.qm\n\n\
    ## To list unresolved references:\n\
    qm --todos model.qm")]
#[command(
    about = "qm evaluates quantity scripts: declarative models with units, history and reactive inputs.",
    long_about = None
)]
pub struct Cli {
    /// Number of simulation steps to advance before printing
    #[arg(short, long, default_value_t = 0)]
    steps: u64,

    /// Set an input quantity before stepping (repeatable)
    #[arg(long, value_names = ["NAME", "VALUE"], num_args = 2, action = ArgAction::Append)]
    set: Vec<String>,

    /// Print only the named quantities
    #[arg(short, long)]
    quantity: Option<Vec<String>>,

    /// List unresolved todo placeholders instead of values
    #[arg(long, default_value_t = false)]
    todos: bool,

    /// Show each quantity's dependencies alongside its value
    #[arg(long, default_value_t = false)]
    deps: bool,

    /// Print collected plot samples after stepping
    #[arg(long, default_value_t = false)]
    plot: bool,

    file: PathBuf,
}

impl Cli {
    pub fn run(&self) -> miette::Result<()> {
        let script = fs::read_to_string(&self.file).into_diagnostic()?;
        let mut session = Session::new();
        session.analyse_script(&script)?;

        for (name, value) in self.set.iter().tuples() {
            session.set_value(name, parse_value(value))?;
        }
        for _ in 0..self.steps {
            session.step()?;
        }

        if self.todos {
            for todo in session.todos() {
                println!("{}", todo.as_str().yellow());
            }
            return Ok(());
        }

        let names: Vec<String> = match &self.quantity {
            Some(names) => names.clone(),
            None => session
                .defined()
                .iter()
                .map(|name| name.as_str())
                .collect(),
        };
        for name in names {
            let quantity = session
                .quantities()
                .get(qm_lang::Ident::new(&name))
                .cloned();
            if let Some(q) = &quantity {
                if q.is_function() {
                    let params = q.parameters.iter().map(|p| p.as_str()).join(", ");
                    println!("{}({})", name.cyan(), params.dimmed());
                    continue;
                }
            }
            let value = session.get_value(&name)?;
            if self.deps {
                let deps = quantity
                    .map(|q| q.dependencies.iter().map(|d| d.as_str()).sorted().join(", "))
                    .unwrap_or_default();
                println!("{} = {}  {}", name.cyan(), value, format!("[{deps}]").dimmed());
            } else {
                println!("{} = {}", name.cyan(), value);
            }
        }

        if self.plot {
            for sample in session.plot_samples() {
                println!(
                    "{} {}",
                    format!("t={}", sample.time).dimmed(),
                    sample.values.iter().map(|v| v.to_string()).join(" ")
                );
            }
        }
        Ok(())
    }
}

fn parse_value(text: &str) -> UnitValue {
    match text {
        "true" => UnitValue::bool(true),
        "false" => UnitValue::bool(false),
        _ => match text.parse::<f64>() {
            Ok(value) => UnitValue::number(value),
            Err(_) => UnitValue::string(text),
        },
    }
}

#[cfg(test)]
mod tests {
    use qm_test::defer;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::number("42", UnitValue::number(42.0))]
    #[case::boolean("true", UnitValue::bool(true))]
    #[case::text("fast", UnitValue::string("fast"))]
    fn test_parse_value(#[case] text: &str, #[case] expected: UnitValue) {
        assert_eq!(parse_value(text), expected);
    }

    #[test]
    fn test_run_simple_script() {
        let (_, path) = qm_test::create_file(
            "qm_cli_run_simple.qm",
            "mass = 25 ; kg\naccel = 9.81 ; m/s2\nforce = mass * accel\n",
        );
        defer! {
            std::fs::remove_file(&path).ok();
        }
        let cli = Cli {
            file: path.clone(),
            ..Cli::default()
        };
        assert!(cli.run().is_ok());
    }

    #[test]
    fn test_run_with_steps_and_set() {
        let (_, path) = qm_test::create_file(
            "qm_cli_run_steps.qm",
            "speed = slider(0, 100, 10)\ndistance = distance @ 1 + speed\n",
        );
        defer! {
            std::fs::remove_file(&path).ok();
        }
        let cli = Cli {
            steps: 3,
            set: vec!["speed".into(), "20".into(), "distance".into(), "0".into()],
            ..Cli::default()
        };
        let cli = Cli { file: path.clone(), ..cli };
        assert!(cli.run().is_ok());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let cli = Cli {
            file: PathBuf::from("/nonexistent/definitely_missing.qm"),
            ..Cli::default()
        };
        assert!(cli.run().is_err());
    }
}
