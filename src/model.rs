use std::fmt::Write;

use crate::error::SideriteError;

/// A point in the model, expressed in base units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Node {
    pub fn new(x: f64, y: f64, z: f64) -> Node {
        Node { x, y, z }
    }
}

/// An isotropic linear-elastic material
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticIsotropic {
    pub name: String,
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub density: Option<f64>,
}

impl ElasticIsotropic {
    /// Creates a new material, validating the physical constants
    ///
    /// # Arguments
    /// * `name` - The material name, referenced by sections
    /// * `youngs_modulus` - Young's modulus in Pa
    /// * `poisson_ratio` - Poisson's ratio, in (-1, 0.5)
    /// * `density` - Optional mass density in kg/m**3
    ///
    /// # Returns
    /// The validated material
    pub fn new(
        name: &str,
        youngs_modulus: f64,
        poisson_ratio: f64,
        density: Option<f64>,
    ) -> Result<ElasticIsotropic, SideriteError> {
        if youngs_modulus <= 0.0 {
            return Err(SideriteError::Input(format!(
                "Material '{name}' has non-positive Young's modulus"
            )));
        }
        if poisson_ratio <= -1.0 || poisson_ratio >= 0.5 {
            return Err(SideriteError::Input(format!(
                "Material '{name}' has Poisson's ratio outside (-1, 0.5)"
            )));
        }
        if let Some(density) = density {
            if density <= 0.0 {
                return Err(SideriteError::Input(format!(
                    "Material '{name}' has non-positive density"
                )));
            }
        }

        Ok(ElasticIsotropic {
            name: name.to_owned(),
            youngs_modulus,
            poisson_ratio,
            density,
        })
    }
}

/// A cross section assigned to elements. Line sections carry an area; shell
/// sections carry a thickness.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Rectangular { material: String, w: f64, h: f64 },
    Circular { material: String, r: f64 },
    Shell { material: String, t: f64 },
}

impl Section {
    pub fn material(&self) -> &str {
        match self {
            Section::Rectangular { material, .. } => material,
            Section::Circular { material, .. } => material,
            Section::Shell { material, .. } => material,
        }
    }

    /// Cross-sectional area for line sections
    pub fn area(&self) -> Option<f64> {
        match self {
            Section::Rectangular { w, h, .. } => Some(w * h),
            Section::Circular { r, .. } => Some(std::f64::consts::PI * r * r),
            Section::Shell { .. } => None,
        }
    }

    /// Thickness for shell sections
    pub fn thickness(&self) -> Option<f64> {
        match self {
            Section::Shell { t, .. } => Some(*t),
            _ => None,
        }
    }
}

/// A discretized element within a part. Node indices are local to the part;
/// `section` indexes into the part's section list.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Bar { nodes: [usize; 2], section: usize },
    Tri { nodes: [usize; 3], section: usize },
}

impl Element {
    pub fn nodes(&self) -> &[usize] {
        match self {
            Element::Bar { nodes, .. } => nodes,
            Element::Tri { nodes, .. } => nodes,
        }
    }

    pub fn section(&self) -> usize {
        match self {
            Element::Bar { section, .. } => *section,
            Element::Tri { section, .. } => *section,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartKind {
    Frame,
    Shell,
}

/// A discretized body: nodes plus elements plus the sections they reference
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub kind: PartKind,
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
    pub sections: Vec<Section>,
}

impl Part {
    /// Splits every bar of a frame part into `segments` equal pieces,
    /// inserting the intermediate nodes. Shared end nodes are preserved.
    ///
    /// # Arguments
    /// * `segments` - The number of pieces per original bar
    pub fn subdivide(&mut self, segments: usize) -> Result<(), SideriteError> {
        if self.kind != PartKind::Frame {
            return Err(SideriteError::Input(format!(
                "Part '{}' is not a frame part; only frame parts subdivide",
                self.name
            )));
        }
        if segments < 2 {
            return Ok(());
        }

        let mut new_elements: Vec<Element> = Vec::new();

        for element in &self.elements {
            let (ends, section) = match element {
                Element::Bar { nodes, section } => (*nodes, *section),
                Element::Tri { .. } => {
                    return Err(SideriteError::Input(format!(
                        "Frame part '{}' contains a non-bar element",
                        self.name
                    )))
                }
            };

            let start = self.nodes[ends[0]];
            let end = self.nodes[ends[1]];

            let mut previous = ends[0];
            for i in 1..segments {
                let t = i as f64 / segments as f64;
                let intermediate = Node::new(
                    start.x + (end.x - start.x) * t,
                    start.y + (end.y - start.y) * t,
                    start.z + (end.z - start.z) * t,
                );
                self.nodes.push(intermediate);
                let current = self.nodes.len() - 1;

                new_elements.push(Element::Bar {
                    nodes: [previous, current],
                    section,
                });
                previous = current;
            }
            new_elements.push(Element::Bar {
                nodes: [previous, ends[1]],
                section,
            });
        }

        self.elements = new_elements;
        Ok(())
    }
}

/// An axis-aligned box that selects nodes for supports and loads. Unset
/// bounds span the whole axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryRegion {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl Default for BoundaryRegion {
    fn default() -> BoundaryRegion {
        BoundaryRegion {
            x_min: f64::MIN,
            x_max: f64::MAX,
            y_min: f64::MIN,
            y_max: f64::MAX,
            z_min: f64::MIN,
            z_max: f64::MAX,
        }
    }
}

impl BoundaryRegion {
    pub fn validate(&self, name: &str) -> Result<(), SideriteError> {
        if self.x_min > self.x_max {
            return Err(SideriteError::Input(format!(
                "Region '{name}' has x_min greater than x_max"
            )));
        }
        if self.y_min > self.y_max {
            return Err(SideriteError::Input(format!(
                "Region '{name}' has y_min greater than y_max"
            )));
        }
        if self.z_min > self.z_max {
            return Err(SideriteError::Input(format!(
                "Region '{name}' has z_min greater than z_max"
            )));
        }
        Ok(())
    }

    pub fn contains(&self, node: &Node) -> bool {
        node.x >= self.x_min
            && node.x <= self.x_max
            && node.y >= self.y_min
            && node.y <= self.y_max
            && node.z >= self.z_min
            && node.z <= self.z_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// The restraint applied at the nodes a support selects
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupportKind {
    /// All translations fixed
    Fix,
    /// All translations fixed; kept distinct for frame inputs
    Pin,
    /// All translations fixed except the named axis
    Roller { free_axis: Axis },
    /// Explicit displacement targets per axis
    Prescribed {
        ux: Option<f64>,
        uy: Option<f64>,
        uz: Option<f64>,
    },
}

impl SupportKind {
    /// Prescribed displacement per axis, `None` where the dof is free
    pub fn targets(&self) -> [Option<f64>; 3] {
        match self {
            SupportKind::Fix | SupportKind::Pin => [Some(0.0); 3],
            SupportKind::Roller { free_axis } => {
                let mut targets = [Some(0.0); 3];
                targets[*free_axis as usize] = None;
                targets
            }
            SupportKind::Prescribed { ux, uy, uz } => [*ux, *uy, *uz],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Support {
    pub name: String,
    pub region: BoundaryRegion,
    pub kind: SupportKind,
}

/// The structural definition: materials, parts, and supports
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub name: String,
    pub materials: Vec<ElasticIsotropic>,
    pub parts: Vec<Part>,
    pub supports: Vec<Support>,
}

impl Model {
    pub fn new(name: &str) -> Model {
        Model {
            name: name.to_owned(),
            materials: Vec::new(),
            parts: Vec::new(),
            supports: Vec::new(),
        }
    }

    /// Registers a material, rejecting duplicate names
    pub fn add_material(&mut self, material: ElasticIsotropic) -> Result<(), SideriteError> {
        if self.materials.iter().any(|m| m.name == material.name) {
            return Err(SideriteError::Input(format!(
                "Duplicate material name '{}'",
                material.name
            )));
        }
        self.materials.push(material);
        Ok(())
    }

    pub fn material(&self, name: &str) -> Option<&ElasticIsotropic> {
        self.materials.iter().find(|m| m.name == name)
    }

    /// Adds a part after validating its node indices and material references
    pub fn add_part(&mut self, part: Part) -> Result<(), SideriteError> {
        if self.parts.iter().any(|p| p.name == part.name) {
            return Err(SideriteError::Input(format!(
                "Duplicate part name '{}'",
                part.name
            )));
        }
        for section in &part.sections {
            if self.material(section.material()).is_none() {
                return Err(SideriteError::Input(format!(
                    "Part '{}' references unknown material '{}'",
                    part.name,
                    section.material()
                )));
            }
        }
        for element in &part.elements {
            for &node in element.nodes() {
                if node >= part.nodes.len() {
                    return Err(SideriteError::Input(format!(
                        "Part '{}' has an element referencing node {} out of range",
                        part.name, node
                    )));
                }
            }
            if element.section() >= part.sections.len() {
                return Err(SideriteError::Input(format!(
                    "Part '{}' has an element referencing section {} out of range",
                    part.name,
                    element.section()
                )));
            }
        }
        self.parts.push(part);
        Ok(())
    }

    pub fn add_support(&mut self, support: Support) -> Result<(), SideriteError> {
        support.region.validate(&support.name)?;
        self.supports.push(support);
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.parts.iter().map(|p| p.nodes.len()).sum()
    }

    pub fn element_count(&self) -> usize {
        self.parts.iter().map(|p| p.elements.len()).sum()
    }

    /// Offset of each part's first node within the global numbering
    pub fn part_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.parts.len());
        let mut cursor = 0;
        for part in &self.parts {
            offsets.push(cursor);
            cursor += part.nodes.len();
        }
        offsets
    }

    /// All nodes in global order
    pub fn global_nodes(&self) -> Vec<Node> {
        self.parts
            .iter()
            .flat_map(|p| p.nodes.iter().copied())
            .collect()
    }

    /// Global indices of the nodes inside `region`
    ///
    /// # Arguments
    /// * `region` - The selection box
    /// * `label` - The rule name, used in the empty-selection warning
    pub fn select_nodes(&self, region: &BoundaryRegion, label: &str) -> Vec<usize> {
        let mut selected = Vec::new();
        let mut cursor = 0;
        for part in &self.parts {
            for node in &part.nodes {
                if region.contains(node) {
                    selected.push(cursor);
                }
                cursor += 1;
            }
        }
        if selected.is_empty() {
            println!("warning [model]: rule '{label}' selects no nodes");
        }
        selected
    }

    /// Renders a text summary of the model contents
    pub fn summary(&self) -> String {
        let mut output = String::new();

        writeln!(&mut output, "Model '{}'", self.name).unwrap();
        writeln!(
            &mut output,
            "  parts: {} ({} nodes, {} elements)",
            self.parts.len(),
            self.node_count(),
            self.element_count()
        )
        .unwrap();
        for part in &self.parts {
            let kind = match part.kind {
                PartKind::Frame => "frame",
                PartKind::Shell => "shell",
            };
            writeln!(
                &mut output,
                "    {} [{}]: {} nodes, {} elements",
                part.name,
                kind,
                part.nodes.len(),
                part.elements.len()
            )
            .unwrap();
        }
        writeln!(&mut output, "  materials: {}", self.materials.len()).unwrap();
        for material in &self.materials {
            writeln!(
                &mut output,
                "    {}: E={:.3e} Pa, v={}",
                material.name, material.youngs_modulus, material.poisson_ratio
            )
            .unwrap();
        }
        writeln!(&mut output, "  supports: {}", self.supports.len()).unwrap();
        for support in &self.supports {
            writeln!(&mut output, "    {}: {:?}", support.name, support.kind).unwrap();
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn steel() -> ElasticIsotropic {
        ElasticIsotropic::new("steel", 210.0e9, 0.3, Some(7800.0)).unwrap()
    }

    fn bar_part(name: &str) -> Part {
        Part {
            name: name.to_owned(),
            kind: PartKind::Frame,
            nodes: vec![Node::new(0.0, 0.0, 0.0), Node::new(1.0, 0.0, 0.0)],
            elements: vec![Element::Bar {
                nodes: [0, 1],
                section: 0,
            }],
            sections: vec![Section::Circular {
                material: "steel".to_owned(),
                r: 0.01,
            }],
        }
    }

    #[test]
    fn material_constants_are_validated() {
        assert!(ElasticIsotropic::new("bad", -1.0, 0.3, None).is_err());
        assert!(ElasticIsotropic::new("bad", 210.0e9, 0.5, None).is_err());
        assert!(ElasticIsotropic::new("bad", 210.0e9, 0.3, Some(0.0)).is_err());
        assert!(ElasticIsotropic::new("ok", 210.0e9, 0.3, None).is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut model = Model::new("test");
        model.add_material(steel()).unwrap();
        assert!(model.add_material(steel()).is_err());

        model.add_part(bar_part("a")).unwrap();
        assert!(model.add_part(bar_part("a")).is_err());
    }

    #[test]
    fn unknown_material_reference_is_rejected() {
        let mut model = Model::new("test");
        model.add_material(steel()).unwrap();
        let mut part = bar_part("a");
        part.sections = vec![Section::Circular {
            material: "timber".to_owned(),
            r: 0.01,
        }];
        assert!(model.add_part(part).is_err());
    }

    #[test]
    fn section_areas() {
        let rect = Section::Rectangular {
            material: "steel".to_owned(),
            w: 0.2,
            h: 0.3,
        };
        assert_relative_eq!(rect.area().unwrap(), 0.06);

        let shell = Section::Shell {
            material: "steel".to_owned(),
            t: 0.03,
        };
        assert!(shell.area().is_none());
        assert_relative_eq!(shell.thickness().unwrap(), 0.03);
    }

    #[test]
    fn region_selects_global_node_indices() {
        let mut model = Model::new("test");
        model.add_material(steel()).unwrap();
        model.add_part(bar_part("a")).unwrap();
        model.add_part(bar_part("b")).unwrap();

        let region = BoundaryRegion {
            x_max: 0.5,
            ..BoundaryRegion::default()
        };
        // first node of each part sits at x=0
        assert_eq!(model.select_nodes(&region, "test"), vec![0, 2]);
    }

    #[test]
    fn invalid_region_is_rejected() {
        let region = BoundaryRegion {
            x_min: 1.0,
            x_max: 0.0,
            ..BoundaryRegion::default()
        };
        assert!(region.validate("bad").is_err());
    }

    #[test]
    fn subdivision_preserves_geometry() {
        let mut part = bar_part("a");
        part.subdivide(4).unwrap();

        assert_eq!(part.elements.len(), 4);
        assert_eq!(part.nodes.len(), 5);
        // intermediate nodes are evenly spaced along the bar
        assert_relative_eq!(part.nodes[2].x, 0.25);
        assert_relative_eq!(part.nodes[3].x, 0.5);
        assert_relative_eq!(part.nodes[4].x, 0.75);
    }

    #[test]
    fn roller_frees_one_axis() {
        let kind = SupportKind::Roller { free_axis: Axis::Z };
        assert_eq!(kind.targets(), [Some(0.0), Some(0.0), None]);
    }
}
