use std::path::PathBuf;

use clap::Parser;

use siderite::{input, results, solver, viewer, SideriteError};

#[derive(Parser)]
#[command(name = "siderite", version, about = "Static analysis of frame and shell structures")]
struct Args {
    /// The model input json
    input: String,

    /// Geometry files, claimed in order by shell parts without inline geometry
    geometry: Vec<String>,

    /// Directory for results databases and csv exports
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Plot each solved step with the external python viewer
    #[arg(long)]
    show: bool,

    /// The plotter script used with --show
    #[arg(long, default_value = "scripts/plot.py")]
    plotter: String,
}

fn run(args: &Args) -> Result<(), SideriteError> {
    let input_file = input::load_input_file(&args.input)?;
    let (model, problems) = input::build(&input_file, &args.geometry)?;

    print!("{}", model.summary());

    for problem in &problems {
        let mut database = results::ProblemResults::new(&model.name, &problem.name);

        for step in &problem.steps {
            println!(
                "info: running step '{}' of problem '{}'",
                step.name, problem.name
            );
            let loads = step.combined_loads(&model);
            let solution = solver::run(&model, &loads)?;
            let step_results =
                results::StepResults::from_solution(&step.name, &solution, &step.outputs);

            if step_results.displacements.is_some() {
                let nodes_output = args
                    .out
                    .join(format!("{}_{}_nodes.csv", problem.name, step.name))
                    .display()
                    .to_string();
                let elements_output = args
                    .out
                    .join(format!("{}_{}_elements.csv", problem.name, step.name))
                    .display()
                    .to_string();
                results::csv_output(&model, &step_results, &nodes_output, &elements_output)?;

                if args.show {
                    viewer::pyplot(&nodes_output, &elements_output, &args.plotter)?;
                }
            } else if args.show {
                println!(
                    "warning: step '{}' did not record displacements; skipping plot",
                    step.name
                );
            }

            database.steps.push(step_results);
        }

        database.save(&args.out.join(format!("{}.json", problem.name)))?;
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = run(&args) {
        println!("{err}");
        std::process::exit(1);
    }
}
