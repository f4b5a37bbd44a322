use std::collections::HashMap;

use serde::Deserialize;

use crate::error::SideriteError;
use crate::mesher::{self, ShellGeometry, Vertex};
use crate::model::{
    Axis, BoundaryRegion, ElasticIsotropic, Element, Model, Node, Part, PartKind, Section,
    Support, SupportKind,
};
use crate::problem::{
    FieldRequest, Gravity, LoadCombination, PointLoad, Problem, StaticStep,
};
use crate::units::Quantity;

/// The deserialized input file: a model definition plus its problems
#[derive(Debug, Deserialize)]
pub struct InputFile {
    pub name: String,
    pub materials: Vec<MaterialInput>,
    pub parts: Vec<PartInput>,
    #[serde(default)]
    pub supports: Vec<SupportInput>,
    #[serde(default)]
    pub problems: Vec<ProblemInput>,
}

#[derive(Debug, Deserialize)]
pub struct MaterialInput {
    pub name: String,
    pub youngs_modulus: Quantity,
    pub poisson_ratio: f64,
    #[serde(default)]
    pub density: Option<Quantity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionInput {
    Rectangular {
        material: String,
        w: Quantity,
        h: Quantity,
    },
    Circular {
        material: String,
        r: Quantity,
    },
    Shell {
        material: String,
        t: Quantity,
    },
}

impl SectionInput {
    fn build(&self) -> Section {
        match self {
            SectionInput::Rectangular { material, w, h } => Section::Rectangular {
                material: material.clone(),
                w: w.value(),
                h: h.value(),
            },
            SectionInput::Circular { material, r } => Section::Circular {
                material: material.clone(),
                r: r.value(),
            },
            SectionInput::Shell { material, t } => Section::Shell {
                material: material.clone(),
                t: t.value(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BarInput {
    pub nodes: [usize; 2],
    #[serde(default)]
    pub section: usize,
}

/// Inline or file-based shell geometry
#[derive(Debug, Default, Deserialize)]
pub struct GeometryInput {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub outer: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub holes: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartInput {
    Frame {
        name: String,
        nodes: Vec<[Quantity; 3]>,
        sections: Vec<SectionInput>,
        elements: Vec<BarInput>,
        #[serde(default)]
        subdivide: Option<usize>,
    },
    Shell {
        name: String,
        section: SectionInput,
        #[serde(default)]
        geometry: Option<GeometryInput>,
        #[serde(default)]
        target_length: Option<Quantity>,
        #[serde(default)]
        characteristic_length_min: Option<Quantity>,
        #[serde(default)]
        characteristic_length_max: Option<Quantity>,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct RegionInput {
    #[serde(default)]
    pub x_min: Option<Quantity>,
    #[serde(default)]
    pub x_max: Option<Quantity>,
    #[serde(default)]
    pub y_min: Option<Quantity>,
    #[serde(default)]
    pub y_max: Option<Quantity>,
    #[serde(default)]
    pub z_min: Option<Quantity>,
    #[serde(default)]
    pub z_max: Option<Quantity>,
}

impl RegionInput {
    fn build(&self) -> BoundaryRegion {
        let mut region = BoundaryRegion::default();
        if let Some(v) = self.x_min {
            region.x_min = v.value();
        }
        if let Some(v) = self.x_max {
            region.x_max = v.value();
        }
        if let Some(v) = self.y_min {
            region.y_min = v.value();
        }
        if let Some(v) = self.y_max {
            region.y_max = v.value();
        }
        if let Some(v) = self.z_min {
            region.z_min = v.value();
        }
        if let Some(v) = self.z_max {
            region.z_max = v.value();
        }
        region
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisInput {
    X,
    Y,
    Z,
}

impl From<AxisInput> for Axis {
    fn from(value: AxisInput) -> Axis {
        match value {
            AxisInput::X => Axis::X,
            AxisInput::Y => Axis::Y,
            AxisInput::Z => Axis::Z,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupportKindInput {
    Fix,
    Pin,
    Roller {
        free_axis: AxisInput,
    },
    Prescribed {
        #[serde(default)]
        ux: Option<f64>,
        #[serde(default)]
        uy: Option<f64>,
        #[serde(default)]
        uz: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
pub struct SupportInput {
    pub name: String,
    #[serde(default)]
    pub region: RegionInput,
    #[serde(flatten)]
    pub kind: SupportKindInput,
}

fn default_live_case() -> String {
    "LL".to_owned()
}

fn default_dead_case() -> String {
    "DL".to_owned()
}

fn default_gravity() -> f64 {
    9.81
}

#[derive(Debug, Deserialize)]
pub struct LoadInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub region: RegionInput,
    #[serde(default)]
    pub fx: Option<Quantity>,
    #[serde(default)]
    pub fy: Option<Quantity>,
    #[serde(default)]
    pub fz: Option<Quantity>,
    #[serde(default = "default_live_case")]
    pub load_case: String,
}

#[derive(Debug, Deserialize)]
pub struct GravityInput {
    #[serde(default = "default_gravity")]
    pub g: f64,
    #[serde(default = "default_dead_case")]
    pub load_case: String,
}

/// Either a named combination ("ULS"/"SLS") or an explicit factor map
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CombinationInput {
    Named(String),
    Factors {
        name: String,
        factors: HashMap<String, f64>,
    },
}

impl CombinationInput {
    fn build(&self) -> Result<LoadCombination, SideriteError> {
        match self {
            CombinationInput::Named(name) => match name.to_uppercase().as_str() {
                "ULS" => Ok(LoadCombination::uls()),
                "SLS" => Ok(LoadCombination::sls()),
                other => Err(SideriteError::Input(format!(
                    "Unknown load combination '{other}'; expected ULS, SLS, or a factor map"
                ))),
            },
            CombinationInput::Factors { name, factors } => Ok(LoadCombination {
                name: name.clone(),
                factors: factors.clone(),
            }),
        }
    }
}

fn default_combination() -> CombinationInput {
    CombinationInput::Named("SLS".to_owned())
}

fn default_outputs() -> Vec<String> {
    vec!["U".to_owned()]
}

#[derive(Debug, Deserialize)]
pub struct StepInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub loads: Vec<LoadInput>,
    #[serde(default)]
    pub gravity: Option<GravityInput>,
    #[serde(default = "default_combination")]
    pub combination: CombinationInput,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProblemInput {
    pub name: String,
    pub steps: Vec<StepInput>,
}

/// Parses the input json into an [`InputFile`]
///
/// # Arguments
/// * `input_file` - The path to the input file
pub fn load_input_file(input_file: &str) -> Result<InputFile, SideriteError> {
    let file_string = std::fs::read_to_string(input_file).map_err(|_| {
        SideriteError::Input(format!("Unable to open input file {}", input_file))
    })?;

    serde_json::from_str(&file_string)
        .map_err(|err| SideriteError::Input(format!("Error in input file json: {err}")))
}

/// Resolves characteristic length bounds from either explicit bounds or a
/// single target length
fn characteristic_lengths(
    name: &str,
    target: Option<Quantity>,
    cl_min: Option<Quantity>,
    cl_max: Option<Quantity>,
) -> Result<(f64, f64), SideriteError> {
    match (target, cl_min, cl_max) {
        (Some(target), None, None) => {
            let t = target.value();
            Ok((0.7 * t, 1.3 * t))
        }
        (None, Some(min), Some(max)) => {
            if min.value() > max.value() {
                return Err(SideriteError::Input(format!(
                    "Shell part '{name}' has characteristic_length_min greater than max"
                )));
            }
            Ok((min.value(), max.value()))
        }
        (None, None, None) => Err(SideriteError::Input(format!(
            "Shell part '{name}' needs target_length or characteristic length bounds"
        ))),
        _ => Err(SideriteError::Input(format!(
            "Shell part '{name}' mixes target_length with explicit bounds"
        ))),
    }
}

/// Builds the shell geometry for a part, pulling from inline outlines, a
/// geometry file, or the next unclaimed command line geometry file
fn resolve_geometry(
    name: &str,
    geometry: &Option<GeometryInput>,
    cli_files: &mut std::slice::Iter<String>,
    min_spacing: f64,
) -> Result<ShellGeometry, SideriteError> {
    if let Some(input) = geometry {
        if let Some(outer) = &input.outer {
            let mut shell = ShellGeometry::new(
                outer
                    .iter()
                    .map(|p| Vertex { x: p[0], y: p[1] })
                    .collect(),
            );
            for hole in &input.holes {
                shell.add_hole(hole.iter().map(|p| Vertex { x: p[0], y: p[1] }).collect());
            }
            return Ok(shell);
        }
        if let Some(file) = &input.file {
            return mesher::load_geometry(file, min_spacing);
        }
    }

    match cli_files.next() {
        Some(file) => mesher::load_geometry(file, min_spacing),
        None => Err(SideriteError::Input(format!(
            "Shell part '{name}' has no geometry; supply one inline or on the command line"
        ))),
    }
}

/// Builds the model and problems from a parsed input file
///
/// # Arguments
/// * `input` - The parsed input file
/// * `geometry_files` - Geometry files from the command line, claimed in
///   order by shell parts without their own geometry
///
/// # Returns
/// The assembled model and its problems, in that order
pub fn build(
    input: &InputFile,
    geometry_files: &[String],
) -> Result<(Model, Vec<Problem>), SideriteError> {
    let mut model = Model::new(&input.name);

    for material in &input.materials {
        model.add_material(ElasticIsotropic::new(
            &material.name,
            material.youngs_modulus.value(),
            material.poisson_ratio,
            material.density.map(|d| d.value()),
        )?)?;
    }

    let mut cli_files = geometry_files.iter();

    for part in &input.parts {
        let built = match part {
            PartInput::Frame {
                name,
                nodes,
                sections,
                elements,
                subdivide,
            } => {
                let mut built = Part {
                    name: name.clone(),
                    kind: PartKind::Frame,
                    nodes: nodes
                        .iter()
                        .map(|n| Node::new(n[0].value(), n[1].value(), n[2].value()))
                        .collect(),
                    elements: elements
                        .iter()
                        .map(|e| Element::Bar {
                            nodes: e.nodes,
                            section: e.section,
                        })
                        .collect(),
                    sections: sections.iter().map(SectionInput::build).collect(),
                };
                if let Some(segments) = subdivide {
                    built.subdivide(*segments)?;
                }
                built
            }
            PartInput::Shell {
                name,
                section,
                geometry,
                target_length,
                characteristic_length_min,
                characteristic_length_max,
            } => {
                let (cl_min, cl_max) = characteristic_lengths(
                    name,
                    *target_length,
                    *characteristic_length_min,
                    *characteristic_length_max,
                )?;
                let shell = resolve_geometry(name, geometry, &mut cli_files, cl_min)?;
                mesher::run(name, &shell, section.build(), cl_min, cl_max)?
            }
        };
        model.add_part(built)?;
    }

    if let Some(unclaimed) = cli_files.next() {
        println!("warning [input]: geometry file {unclaimed} was not claimed by any part");
    }

    for support in &input.supports {
        let kind = match &support.kind {
            SupportKindInput::Fix => SupportKind::Fix,
            SupportKindInput::Pin => SupportKind::Pin,
            SupportKindInput::Roller { free_axis } => SupportKind::Roller {
                free_axis: (*free_axis).into(),
            },
            SupportKindInput::Prescribed { ux, uy, uz } => SupportKind::Prescribed {
                ux: *ux,
                uy: *uy,
                uz: *uz,
            },
        };
        model.add_support(Support {
            name: support.name.clone(),
            region: support.region.build(),
            kind,
        })?;
    }

    let mut problems = Vec::with_capacity(input.problems.len());
    for problem in &input.problems {
        let mut steps = Vec::with_capacity(problem.steps.len());
        for (i, step) in problem.steps.iter().enumerate() {
            let name = step
                .name
                .clone()
                .unwrap_or_else(|| format!("step_{}", i + 1));

            let loads = step
                .loads
                .iter()
                .enumerate()
                .map(|(j, load)| PointLoad {
                    name: load
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{}_load_{}", name, j + 1)),
                    region: load.region.build(),
                    fx: load.fx.map(|q| q.value()).unwrap_or(0.0),
                    fy: load.fy.map(|q| q.value()).unwrap_or(0.0),
                    fz: load.fz.map(|q| q.value()).unwrap_or(0.0),
                    load_case: load.load_case.clone(),
                })
                .collect();

            let outputs = step
                .outputs
                .iter()
                .map(|code| FieldRequest::from_code(code))
                .collect::<Result<Vec<_>, _>>()?;

            steps.push(StaticStep {
                name,
                loads,
                gravity: step.gravity.as_ref().map(|g| Gravity {
                    g: g.g,
                    load_case: g.load_case.clone(),
                }),
                combination: step.combination.build()?,
                outputs,
            });
        }
        problems.push(Problem {
            name: problem.name.clone(),
            steps,
        });
    }

    Ok((model, problems))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PORTAL_JSON: &str = r#"{
        "name": "portal",
        "materials": [
            {
                "name": "concrete",
                "youngs_modulus": "30 GPa",
                "poisson_ratio": 0.2,
                "density": "2400 kg/m**3"
            }
        ],
        "parts": [
            {
                "kind": "frame",
                "name": "frame",
                "nodes": [
                    [0, 0, 0],
                    [0, 0, 3],
                    [5, 0, 3],
                    [5, 0, 0]
                ],
                "sections": [
                    { "type": "rectangular", "material": "concrete", "w": "20 cm", "h": "30 cm" },
                    { "type": "rectangular", "material": "concrete", "w": "20 cm", "h": "50 cm" }
                ],
                "elements": [
                    { "nodes": [0, 1] },
                    { "nodes": [3, 2] },
                    { "nodes": [1, 2], "section": 1 }
                ]
            }
        ],
        "supports": [
            { "name": "feet", "type": "pin", "region": { "z_max": 0.1 } }
        ],
        "problems": [
            {
                "name": "simple_portal_Fx",
                "steps": [
                    {
                        "loads": [
                            { "region": { "x_max": 0.1, "z_min": 2.9 }, "fx": "1 kN", "load_case": "LL" }
                        ],
                        "combination": "ULS",
                        "outputs": ["U", "RF"]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn builds_portal_model_from_json() {
        let input: InputFile = serde_json::from_str(PORTAL_JSON).unwrap();
        let (model, problems) = build(&input, &[]).unwrap();

        assert_eq!(model.name, "portal");
        assert_eq!(model.node_count(), 4);
        assert_eq!(model.element_count(), 3);
        assert_relative_eq!(model.materials[0].youngs_modulus, 30.0e9);
        assert_relative_eq!(model.parts[0].sections[0].area().unwrap(), 0.06);
        assert_eq!(model.supports.len(), 1);
        assert_eq!(model.supports[0].kind, SupportKind::Pin);

        assert_eq!(problems.len(), 1);
        let step = &problems[0].steps[0];
        assert_eq!(step.name, "step_1");
        assert_eq!(step.combination.name, "ULS");
        assert_relative_eq!(step.loads[0].fx, 1_000.0);
        assert_eq!(
            step.outputs,
            vec![FieldRequest::Displacement, FieldRequest::Reaction]
        );
    }

    #[test]
    fn frame_subdivision_is_applied_on_build() {
        let json = r#"{
            "name": "column",
            "materials": [
                { "name": "steel", "youngs_modulus": "210 GPa", "poisson_ratio": 0.3 }
            ],
            "parts": [
                {
                    "kind": "frame",
                    "name": "column",
                    "nodes": [[0, 0, 0], [0, 0, 3]],
                    "sections": [
                        { "type": "circular", "material": "steel", "r": "10 cm" }
                    ],
                    "elements": [ { "nodes": [0, 1] } ],
                    "subdivide": 3
                }
            ]
        }"#;
        let input: InputFile = serde_json::from_str(json).unwrap();
        let (model, _) = build(&input, &[]).unwrap();

        assert_eq!(model.parts[0].elements.len(), 3);
        assert_eq!(model.parts[0].nodes.len(), 4);
    }

    #[test]
    fn shell_part_without_geometry_is_rejected() {
        let json = r#"{
            "name": "plate",
            "materials": [
                { "name": "steel", "youngs_modulus": "210 GPa", "poisson_ratio": 0.3 }
            ],
            "parts": [
                {
                    "kind": "shell",
                    "name": "plate",
                    "section": { "type": "shell", "material": "steel", "t": "30 mm" },
                    "target_length": 0.05
                }
            ]
        }"#;
        let input: InputFile = serde_json::from_str(json).unwrap();
        assert!(build(&input, &[]).is_err());
    }

    #[test]
    fn unknown_combination_is_rejected() {
        let combination = CombinationInput::Named("ALS".to_owned());
        assert!(combination.build().is_err());

        let sls = CombinationInput::Named("sls".to_owned());
        assert_eq!(sls.build().unwrap(), LoadCombination::sls());
    }

    #[test]
    fn characteristic_lengths_from_target() {
        let (min, max) =
            characteristic_lengths("p", Some(Quantity(0.1)), None, None).unwrap();
        assert_relative_eq!(min, 0.07);
        assert_relative_eq!(max, 0.13);

        assert!(characteristic_lengths("p", None, None, None).is_err());
        assert!(
            characteristic_lengths("p", Some(Quantity(0.1)), Some(Quantity(0.05)), None).is_err()
        );
    }
}
