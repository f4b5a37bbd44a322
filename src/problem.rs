use std::collections::HashMap;

use crate::error::SideriteError;
use crate::model::{BoundaryRegion, Element, Model, Part};

/// A nodal load applied to every node its region selects
#[derive(Debug, Clone)]
pub struct PointLoad {
    pub name: String,
    pub region: BoundaryRegion,
    pub fx: f64,
    pub fy: f64,
    pub fz: f64,
    pub load_case: String,
}

/// Self-weight derived from element volume and material density
#[derive(Debug, Clone)]
pub struct Gravity {
    /// Gravitational acceleration, applied along -z
    pub g: f64,
    pub load_case: String,
}

/// A named scaling rule combining load cases
#[derive(Debug, Clone, PartialEq)]
pub struct LoadCombination {
    pub name: String,
    pub factors: HashMap<String, f64>,
}

impl LoadCombination {
    /// Serviceability limit state: all cases at factor 1.0
    pub fn sls() -> LoadCombination {
        LoadCombination {
            name: "SLS".to_owned(),
            factors: HashMap::from([("DL".to_owned(), 1.0), ("LL".to_owned(), 1.0)]),
        }
    }

    /// Ultimate limit state: dead 1.35, live 1.5
    pub fn uls() -> LoadCombination {
        LoadCombination {
            name: "ULS".to_owned(),
            factors: HashMap::from([("DL".to_owned(), 1.35), ("LL".to_owned(), 1.5)]),
        }
    }

    /// Factor for a load case; cases outside the combination contribute nothing
    pub fn factor(&self, load_case: &str) -> f64 {
        self.factors.get(load_case).copied().unwrap_or(0.0)
    }
}

/// A result quantity recorded during analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRequest {
    Displacement,
    Reaction,
    Stress,
}

impl FieldRequest {
    /// Parses the short field codes used in the input file
    ///
    /// # Arguments
    /// * `code` - "U", "RF", or "S"
    pub fn from_code(code: &str) -> Result<FieldRequest, SideriteError> {
        match code {
            "U" => Ok(FieldRequest::Displacement),
            "RF" => Ok(FieldRequest::Reaction),
            "S" => Ok(FieldRequest::Stress),
            other => Err(SideriteError::Input(format!(
                "Unrecognized field output code '{other}'; expected U, RF, or S"
            ))),
        }
    }
}

/// A load case and analysis configuration applied to a model
#[derive(Debug, Clone)]
pub struct StaticStep {
    pub name: String,
    pub loads: Vec<PointLoad>,
    pub gravity: Option<Gravity>,
    pub combination: LoadCombination,
    pub outputs: Vec<FieldRequest>,
}

impl StaticStep {
    /// Assembles the combined nodal load vector for this step
    ///
    /// Point loads are scaled by their case factor and applied to every node
    /// inside their region; gravity is lumped equally to element nodes.
    ///
    /// # Arguments
    /// * `model` - The model the loads act on
    ///
    /// # Returns
    /// Per-node [fx, fy, fz] in global node order
    pub fn combined_loads(&self, model: &Model) -> Vec<[f64; 3]> {
        let mut nodal: Vec<[f64; 3]> = vec![[0.0; 3]; model.node_count()];

        for load in &self.loads {
            let factor = self.combination.factor(&load.load_case);
            if factor == 0.0 {
                println!(
                    "warning [problem]: load '{}' (case {}) is outside combination {}",
                    load.name, load.load_case, self.combination.name
                );
                continue;
            }
            for node in model.select_nodes(&load.region, &load.name) {
                nodal[node][0] += load.fx * factor;
                nodal[node][1] += load.fy * factor;
                nodal[node][2] += load.fz * factor;
            }
        }

        if let Some(gravity) = &self.gravity {
            let factor = self.combination.factor(&gravity.load_case);
            if factor == 0.0 {
                println!(
                    "warning [problem]: gravity (case {}) is outside combination {}",
                    gravity.load_case, self.combination.name
                );
            } else {
                let offsets = model.part_offsets();
                for (part, offset) in model.parts.iter().zip(offsets) {
                    for element in &part.elements {
                        let density = model
                            .material(part.sections[element.section()].material())
                            .and_then(|m| m.density);
                        let Some(density) = density else {
                            continue;
                        };
                        let weight = element_volume(part, element) * density * gravity.g * factor;
                        let share = weight / element.nodes().len() as f64;
                        for &node in element.nodes() {
                            nodal[offset + node][2] -= share;
                        }
                    }
                }
            }
        }

        nodal
    }
}

/// Volume of an element from its section and geometry
fn element_volume(part: &Part, element: &Element) -> f64 {
    let section = &part.sections[element.section()];
    match element {
        Element::Bar { nodes, .. } => {
            let a = part.nodes[nodes[0]];
            let b = part.nodes[nodes[1]];
            let length = f64::sqrt(
                f64::powi(b.x - a.x, 2) + f64::powi(b.y - a.y, 2) + f64::powi(b.z - a.z, 2),
            );
            length * section.area().unwrap_or(0.0)
        }
        Element::Tri { nodes, .. } => {
            let a = part.nodes[nodes[0]];
            let b = part.nodes[nodes[1]];
            let c = part.nodes[nodes[2]];
            let ab = [b.x - a.x, b.y - a.y, b.z - a.z];
            let ac = [c.x - a.x, c.y - a.y, c.z - a.z];
            let cross = [
                ab[1] * ac[2] - ab[2] * ac[1],
                ab[2] * ac[0] - ab[0] * ac[2],
                ab[0] * ac[1] - ab[1] * ac[0],
            ];
            let area = 0.5
                * f64::sqrt(
                    f64::powi(cross[0], 2) + f64::powi(cross[1], 2) + f64::powi(cross[2], 2),
                );
            area * section.thickness().unwrap_or(0.0)
        }
    }
}

/// A load case and analysis configuration container
#[derive(Debug, Clone)]
pub struct Problem {
    pub name: String,
    pub steps: Vec<StaticStep>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElasticIsotropic, Node, PartKind, Section};
    use approx::assert_relative_eq;

    fn single_bar_model() -> Model {
        let mut model = Model::new("test");
        model
            .add_material(ElasticIsotropic::new("steel", 210.0e9, 0.3, Some(7800.0)).unwrap())
            .unwrap();
        model
            .add_part(Part {
                name: "bar".to_owned(),
                kind: PartKind::Frame,
                nodes: vec![Node::new(0.0, 0.0, 0.0), Node::new(2.0, 0.0, 0.0)],
                elements: vec![Element::Bar {
                    nodes: [0, 1],
                    section: 0,
                }],
                sections: vec![Section::Rectangular {
                    material: "steel".to_owned(),
                    w: 0.1,
                    h: 0.1,
                }],
            })
            .unwrap();
        model
    }

    #[test]
    fn uls_factors() {
        let uls = LoadCombination::uls();
        assert_relative_eq!(uls.factor("DL"), 1.35);
        assert_relative_eq!(uls.factor("LL"), 1.5);
        assert_relative_eq!(uls.factor("WIND"), 0.0);
    }

    #[test]
    fn point_loads_are_scaled_by_combination() {
        let model = single_bar_model();
        let step = StaticStep {
            name: "step".to_owned(),
            loads: vec![PointLoad {
                name: "tip".to_owned(),
                region: BoundaryRegion {
                    x_min: 1.5,
                    ..BoundaryRegion::default()
                },
                fx: 0.0,
                fy: 0.0,
                fz: -1_000.0,
                load_case: "LL".to_owned(),
            }],
            gravity: None,
            combination: LoadCombination::uls(),
            outputs: vec![FieldRequest::Displacement],
        };

        let loads = step.combined_loads(&model);
        assert_relative_eq!(loads[0][2], 0.0);
        assert_relative_eq!(loads[1][2], -1_500.0);
    }

    #[test]
    fn gravity_is_lumped_to_element_nodes() {
        let model = single_bar_model();
        let step = StaticStep {
            name: "step".to_owned(),
            loads: vec![],
            gravity: Some(Gravity {
                g: 9.81,
                load_case: "DL".to_owned(),
            }),
            combination: LoadCombination::sls(),
            outputs: vec![FieldRequest::Displacement],
        };

        // volume = 2.0 * 0.01 = 0.02 m^3, weight = 0.02 * 7800 * 9.81
        let weight = 0.02 * 7800.0 * 9.81;
        let loads = step.combined_loads(&model);
        assert_relative_eq!(loads[0][2], -weight / 2.0, epsilon = 1e-9);
        assert_relative_eq!(loads[1][2], -weight / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn gravity_outside_combination_contributes_nothing() {
        let model = single_bar_model();
        let step = StaticStep {
            name: "step".to_owned(),
            loads: vec![],
            gravity: Some(Gravity {
                g: 9.81,
                load_case: "SNOW".to_owned(),
            }),
            combination: LoadCombination::sls(),
            outputs: vec![FieldRequest::Displacement],
        };

        let loads = step.combined_loads(&model);
        assert_relative_eq!(loads[0][2], 0.0);
        assert_relative_eq!(loads[1][2], 0.0);
    }

    #[test]
    fn field_codes_parse() {
        assert_eq!(
            FieldRequest::from_code("U").unwrap(),
            FieldRequest::Displacement
        );
        assert_eq!(
            FieldRequest::from_code("RF").unwrap(),
            FieldRequest::Reaction
        );
        assert_eq!(FieldRequest::from_code("S").unwrap(), FieldRequest::Stress);
        assert!(FieldRequest::from_code("ACC").is_err());
    }
}
