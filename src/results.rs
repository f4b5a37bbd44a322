use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::SideriteError,
    model::{Element, Model},
    problem::FieldRequest,
    solver::StepSolution,
};

/// Field results recorded for one step, filtered by the step's output
/// requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResults {
    pub step: String,
    pub displacements: Option<Vec<[f64; 3]>>,
    pub reactions: Option<Vec<[f64; 3]>>,
    pub element_stresses: Option<Vec<f64>>,
}

impl StepResults {
    /// Extracts the requested fields from a raw solution
    ///
    /// # Arguments
    /// * `step` - The step name
    /// * `solution` - The raw backend output
    /// * `outputs` - The field outputs the step requested
    pub fn from_solution(
        step: &str,
        solution: &StepSolution,
        outputs: &[FieldRequest],
    ) -> StepResults {
        StepResults {
            step: step.to_owned(),
            displacements: outputs
                .contains(&FieldRequest::Displacement)
                .then(|| solution.displacements.clone()),
            reactions: outputs
                .contains(&FieldRequest::Reaction)
                .then(|| solution.reactions.clone()),
            element_stresses: outputs
                .contains(&FieldRequest::Stress)
                .then(|| solution.element_stresses.clone()),
        }
    }

    /// Displacement at a global node, when recorded
    pub fn displacement_at(&self, node: usize) -> Option<[f64; 3]> {
        self.displacements.as_ref()?.get(node).copied()
    }

    /// The node with the largest displacement magnitude along `axis`
    ///
    /// # Returns
    /// The node index and the signed component
    pub fn max_displacement(&self, axis: usize) -> Option<(usize, f64)> {
        self.displacements
            .as_ref()?
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a[axis].abs().total_cmp(&b[axis].abs()))
            .map(|(i, u)| (i, u[axis]))
    }

    /// The node with the smallest signed component along `axis`
    ///
    /// # Returns
    /// The node index and the signed component
    pub fn min_displacement(&self, axis: usize) -> Option<(usize, f64)> {
        self.displacements
            .as_ref()?
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a[axis].total_cmp(&b[axis]))
            .map(|(i, u)| (i, u[axis]))
    }

    /// Sum of reactions along `axis`; balances the applied load
    pub fn total_reaction(&self, axis: usize) -> Option<f64> {
        Some(self.reactions.as_ref()?.iter().map(|r| r[axis]).sum())
    }

    /// The element carrying the largest stress magnitude
    pub fn max_stress(&self) -> Option<(usize, f64)> {
        self.element_stresses
            .as_ref()?
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .map(|(i, s)| (i, *s))
    }
}

/// Persisted results database for one problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemResults {
    pub model: String,
    pub problem: String,
    pub steps: Vec<StepResults>,
}

impl ProblemResults {
    pub fn new(model: &str, problem: &str) -> ProblemResults {
        ProblemResults {
            model: model.to_owned(),
            problem: problem.to_owned(),
            steps: Vec::new(),
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepResults> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// Writes the results database as json
    ///
    /// # Arguments
    /// * `path` - The output file path
    pub fn save(&self, path: &Path) -> Result<(), SideriteError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|err| SideriteError::Results(format!("Failed to serialize results: {err}")))?;
        std::fs::write(path, contents).map_err(|err| {
            SideriteError::Results(format!("Failed to write {}: {err}", path.display()))
        })?;

        println!("info: wrote results database to {}", path.display());
        Ok(())
    }

    /// Loads a results database written by [`ProblemResults::save`]
    pub fn load(path: &Path) -> Result<ProblemResults, SideriteError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            SideriteError::Results(format!("Unable to open {}: {err}", path.display()))
        })?;
        serde_json::from_str(&contents)
            .map_err(|err| SideriteError::Results(format!("Malformed results database: {err}")))
    }
}

/// Writes step results to two CSV files for the external viewer
///
/// # Arguments
/// * `model` - The solved model
/// * `results` - Step results; displacements must have been recorded
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(
    model: &Model,
    results: &StepResults,
    nodes_output: &str,
    elements_output: &str,
) -> Result<(), SideriteError> {
    let displacements = results.displacements.as_ref().ok_or_else(|| {
        SideriteError::Results(format!(
            "Step '{}' did not record displacements; request the U output",
            results.step
        ))
    })?;

    let mut nodes_file = std::fs::File::create(nodes_output).map_err(|err| {
        SideriteError::Results(format!("Failed to create {nodes_output}: {err}"))
    })?;
    let mut elements_file = std::fs::File::create(elements_output).map_err(|err| {
        SideriteError::Results(format!("Failed to create {elements_output}: {err}"))
    })?;

    let write = |file: &mut std::fs::File, line: String| -> Result<(), SideriteError> {
        file.write_all(line.as_bytes())
            .map_err(|err| SideriteError::Results(format!("Failed to write csv: {err}")))
    };

    // Write nodes
    write(&mut nodes_file, "x,y,z,ux,uy,uz\n".to_owned())?;
    for (node, u) in model.global_nodes().iter().zip(displacements) {
        write(
            &mut nodes_file,
            format!(
                "{},{},{},{},{},{}\n",
                node.x, node.y, node.z, u[0], u[1], u[2]
            ),
        )?;
    }

    // Write elements
    write(&mut elements_file, "kind,n0,n1,n2,stress\n".to_owned())?;
    let offsets = model.part_offsets();
    let mut element_cursor = 0;
    for (part, offset) in model.parts.iter().zip(offsets) {
        for element in &part.elements {
            let stress = results
                .element_stresses
                .as_ref()
                .map(|s| s[element_cursor].to_string())
                .unwrap_or_default();
            element_cursor += 1;

            let line = match element {
                Element::Bar { nodes, .. } => format!(
                    "bar,{},{},,{}\n",
                    offset + nodes[0],
                    offset + nodes[1],
                    stress
                ),
                Element::Tri { nodes, .. } => format!(
                    "tri,{},{},{},{}\n",
                    offset + nodes[0],
                    offset + nodes[1],
                    offset + nodes[2],
                    stress
                ),
            };
            write(&mut elements_file, line)?;
        }
    }

    println!(
        "info: wrote output to {} and {}",
        nodes_output, elements_output
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_solution() -> StepSolution {
        StepSolution {
            displacements: vec![[0.0, 0.0, 0.0], [1.0e-3, 0.0, -2.0e-3]],
            reactions: vec![[500.0, 0.0, 250.0], [0.0, 0.0, 0.0]],
            element_stresses: vec![-3.0e6, 1.0e6],
        }
    }

    #[test]
    fn records_only_requested_fields() {
        let solution = sample_solution();
        let results = StepResults::from_solution(
            "step",
            &solution,
            &[FieldRequest::Displacement, FieldRequest::Stress],
        );

        assert!(results.displacements.is_some());
        assert!(results.reactions.is_none());
        assert!(results.element_stresses.is_some());
    }

    #[test]
    fn queries_report_extremes() {
        let solution = sample_solution();
        let results = StepResults::from_solution(
            "step",
            &solution,
            &[
                FieldRequest::Displacement,
                FieldRequest::Reaction,
                FieldRequest::Stress,
            ],
        );

        let (node, uz) = results.max_displacement(2).unwrap();
        assert_eq!(node, 1);
        assert_relative_eq!(uz, -2.0e-3);

        let (node, min_uz) = results.min_displacement(2).unwrap();
        assert_eq!(node, 1);
        assert_relative_eq!(min_uz, -2.0e-3);
        // axis 0 holds no negative components; the smallest is zero
        assert_relative_eq!(results.min_displacement(0).unwrap().1, 0.0);

        let (element, stress) = results.max_stress().unwrap();
        assert_eq!(element, 0);
        assert_relative_eq!(stress, -3.0e6);

        assert_relative_eq!(results.total_reaction(0).unwrap(), 500.0);
        assert_relative_eq!(results.total_reaction(2).unwrap(), 250.0);

        assert_eq!(results.displacement_at(1).unwrap()[0], 1.0e-3);
        assert!(results.displacement_at(7).is_none());
    }

    #[test]
    fn database_round_trips_through_json() {
        let solution = sample_solution();
        let mut database = ProblemResults::new("model", "problem");
        database.steps.push(StepResults::from_solution(
            "step_1",
            &solution,
            &[FieldRequest::Displacement],
        ));

        let path = std::env::temp_dir().join("siderite_results_test.json");
        database.save(&path).unwrap();
        let loaded = ProblemResults::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.problem, "problem");
        let step = loaded.step("step_1").unwrap();
        assert_relative_eq!(step.displacement_at(1).unwrap()[2], -2.0e-3);
        assert!(step.reactions.is_none());
    }
}
