use std::fmt::Write as _;
use std::path::Path;

use crate::error::SideriteError;
use crate::model::{Element, Node, Part, PartKind, Section};

/// A planar outline vertex used to describe shell geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

/// A surface description: one outer outline plus any number of hole outlines
#[derive(Debug, Clone)]
pub struct ShellGeometry {
    /// `outlines[0]` is the outer boundary; the rest are holes
    pub outlines: Vec<Vec<Vertex>>,
}

impl ShellGeometry {
    pub fn new(outer: Vec<Vertex>) -> ShellGeometry {
        ShellGeometry {
            outlines: vec![outer],
        }
    }

    pub fn add_hole(&mut self, outline: Vec<Vertex>) {
        self.outlines.push(outline);
    }
}

enum MeshParseState {
    Nodes,
    Elements,
    Entities,
    Limbo,
}

/// Resolves the id of an svg shape, falling back to its parent group
fn svg_shape_id<'a>(shape: &'a roxmltree::Node) -> Option<&'a str> {
    if let Some(id) = shape.attribute("id") {
        return Some(id);
    }
    shape.parent().and_then(|parent| parent.attribute("id"))
}

/// Reads the points attribute of a polyline/polygon into vertices, skipping
/// duplicates and points closer together than `min_spacing`
fn svg_points(
    shape: &roxmltree::Node,
    min_spacing: f64,
    skipped: &mut usize,
) -> Result<Vec<Vertex>, SideriteError> {
    let raw = shape.attribute("points").ok_or_else(|| {
        SideriteError::Input(format!(
            "Error in svg file. No points in element {:?}",
            shape.id()
        ))
    })?;

    let mut coords: Vec<f64> = Vec::new();
    for token in raw.split([' ', ',']).filter(|t| !t.is_empty()) {
        let value: f64 = token.parse().map_err(|_| {
            SideriteError::Input(format!("Non-float value '{token}' in svg points"))
        })?;
        coords.push(value);
    }
    if coords.len() % 2 != 0 {
        return Err(SideriteError::Input(
            "Odd number of coordinates in svg points".to_owned(),
        ));
    }

    let mut vertices: Vec<Vertex> = Vec::new();
    for pair in coords.chunks(2) {
        // svg y points down
        let vertex = Vertex {
            x: pair[0],
            y: -pair[1],
        };

        if vertices.contains(&vertex) {
            println!("warning [mesh]: duplicate point at {:?}", vertex);
            continue;
        }
        if let Some(last) = vertices.last() {
            let distance =
                f64::sqrt(f64::powi(last.x - vertex.x, 2) + f64::powi(last.y - vertex.y, 2));
            if distance < min_spacing {
                *skipped += 1;
                continue;
            }
        }
        vertices.push(vertex);
    }

    Ok(vertices)
}

/// Reads an svg rect into its four corner vertices
fn svg_rect(shape: &roxmltree::Node) -> Result<Vec<Vertex>, SideriteError> {
    let read = |attr: &str, required: bool| -> Result<f64, SideriteError> {
        match shape.attribute(attr) {
            Some(value) => value.parse().map_err(|_| {
                SideriteError::Input(format!("Non-float {attr} in svg rect {:?}", shape.id()))
            }),
            None if required => Err(SideriteError::Input(format!(
                "Error in svg file. No {attr} definition in rectangle {:?}",
                shape.id()
            ))),
            None => {
                println!(
                    "warning [mesh]: missing {attr} in rectangle {:?}. Assuming zero.",
                    shape.id()
                );
                Ok(0.0)
            }
        }
    };

    let x = read("x", false)?;
    let y = read("y", false)?;
    let width = read("width", true)?;
    let height = read("height", true)?;

    Ok(vec![
        Vertex { x, y: -y },
        Vertex {
            x: x + width,
            y: -y,
        },
        Vertex {
            x: x + width,
            y: -y - height,
        },
        Vertex {
            x,
            y: -y - height,
        },
    ])
}

/// Parses an svg file into a shell geometry
///
/// Shapes whose id starts with OUTER form the outer boundary; shapes whose id
/// starts with INNER become holes. Everything else is skipped with a warning.
///
/// # Arguments
/// * `svg_file` - The path to the input svg file
/// * `min_spacing` - Outline vertices closer than this are dropped
///
/// # Returns
/// The parsed shell geometry
pub fn parse_svg(svg_file: &str, min_spacing: f64) -> Result<ShellGeometry, SideriteError> {
    let contents = std::fs::read_to_string(svg_file).map_err(|_| {
        SideriteError::Input(format!("Unable to open svg file {}", svg_file))
    })?;

    let doc = roxmltree::Document::parse(&contents)
        .map_err(|err| SideriteError::Input(format!("Malformed svg file: {err}")))?;

    let mut outer: Vec<Vertex> = Vec::new();
    let mut holes: Vec<Vec<Vertex>> = Vec::new();
    let mut skipped: usize = 0;

    for shape in doc.descendants() {
        let vertices = match shape.tag_name().name() {
            "polyline" | "polygon" => svg_points(&shape, min_spacing, &mut skipped)?,
            "rect" => svg_rect(&shape)?,
            _ => continue,
        };

        let Some(id) = svg_shape_id(&shape) else {
            return Err(SideriteError::Input(
                "Error in svg file. Missing id field on geometry".to_owned(),
            ));
        };

        if id.trim().starts_with("INNER") {
            holes.push(vertices);
        } else if id.trim().starts_with("OUTER") {
            if outer.is_empty() {
                outer = vertices;
            } else {
                return Err(SideriteError::Input(
                    "Multiple OUTER geometries in SVG".to_owned(),
                ));
            }
        } else {
            println!("warning [mesh]: skipping svg geometry with id {id}. Only supports OUTER and INNER");
        }
    }

    if skipped > 0 {
        println!("warning [mesh]: skipped {} vertices", skipped);
    }

    if outer.is_empty() {
        return Err(SideriteError::Input("No OUTER geometry".to_owned()));
    }

    let mut geometry = ShellGeometry::new(outer);
    for hole in holes {
        geometry.add_hole(hole);
    }
    Ok(geometry)
}

/// Builds a .geo file from the shell outlines
///
/// # Arguments
/// * `geometry` - The shell geometry to mesh
/// * `output_file` - The output .geo file
/// * `cl_min` / `cl_max` - Characteristic length bounds for gmsh
fn build_geo(
    geometry: &ShellGeometry,
    output_file: &str,
    cl_min: f64,
    cl_max: f64,
) -> Result<(), SideriteError> {
    let outlines = &geometry.outlines;
    let mut geo = String::new();

    // Points, numbered continuously across outlines
    let mut offsets: Vec<usize> = Vec::with_capacity(outlines.len());
    let mut cursor: usize = 0;
    for (i, outline) in outlines.iter().enumerate() {
        offsets.push(cursor);
        writeln!(&mut geo, "// Points for outline {i}").unwrap();
        for (j, vertex) in outline.iter().enumerate() {
            writeln!(
                &mut geo,
                "Point({}) = {{ {}, {}, 0, 1.0 }};",
                cursor + j,
                vertex.x,
                vertex.y
            )
            .unwrap();
        }
        cursor += outline.len();
    }

    // Lines closing each outline
    for (i, outline) in outlines.iter().enumerate() {
        let offset = offsets[i];
        writeln!(&mut geo, "\n// Line loop for outline {i}").unwrap();
        for j in 0..outline.len() {
            let next = (j + 1) % outline.len();
            writeln!(
                &mut geo,
                "Line({}) = {{ {}, {} }};",
                offset + j,
                offset + j,
                offset + next
            )
            .unwrap();
        }

        let ids: Vec<String> = (0..outline.len()).map(|j| (offset + j).to_string()).collect();
        writeln!(&mut geo, "Line Loop({}) = {{ {} }};", i + 1, ids.join(", ")).unwrap();
    }

    // Surface: outer loop first, holes subtracted after
    let loops: Vec<String> = (0..outlines.len()).map(|i| (i + 1).to_string()).collect();
    writeln!(&mut geo, "\nPlane Surface(1) = {{ {} }};", loops.join(", ")).unwrap();

    writeln!(
        &mut geo,
        "\n// Mesh settings\n\
         Mesh.ElementOrder = 1;\n\
         Mesh.Algorithm = 1;\n\
         Mesh.CharacteristicLengthMin = {cl_min};\n\
         Mesh.CharacteristicLengthMax = {cl_max};\n\
         Mesh 2;"
    )
    .unwrap();

    std::fs::write(output_file, geo)
        .map_err(|err| SideriteError::Mesher(format!("Failed to write .geo file: {err}")))?;

    Ok(())
}

/// Runs gmsh on the generated .geo file
///
/// # Arguments
/// * `geometry` - The shell geometry to mesh
/// * `output` - The output filepath of the .msh file
/// * `cl_min` / `cl_max` - Characteristic length bounds for gmsh
fn compute_mesh(
    geometry: &ShellGeometry,
    output: &str,
    cl_min: f64,
    cl_max: f64,
) -> Result<(), SideriteError> {
    let geo_filepath = "geom.geo";

    println!(
        "info: building .geo for Gmsh with {:.3} < CL < {:.3}",
        cl_min, cl_max
    );
    build_geo(geometry, geo_filepath, cl_min, cl_max)?;

    println!("info: running gmsh...");
    let output_result = std::process::Command::new("gmsh")
        .arg(geo_filepath)
        .arg("-2")
        .arg("-o")
        .arg(output)
        .output()
        .map_err(|err| SideriteError::Mesher(format!("Gmsh failed to launch: {err}")))?;

    if !output_result.status.success() {
        return Err(SideriteError::Mesher(format!(
            "Gmsh exited with {}: {}",
            output_result.status,
            String::from_utf8_lossy(&output_result.stderr)
        )));
    }

    if let Err(err) = std::fs::remove_file(geo_filepath) {
        println!("warning [mesh]: failed to delete .geo file: {err}");
    }

    Ok(())
}

/// Parses a .msh file into nodes and triangle elements
///
/// # Arguments
/// * `mesh_file` - The path to the mesh file
///
/// # Returns
/// A tuple with the parsed nodes and elements, in that order
fn parse_mesh(mesh_file: &str) -> Result<(Vec<Node>, Vec<Element>), SideriteError> {
    let mesh_contents = std::fs::read_to_string(mesh_file).map_err(|err| {
        SideriteError::Mesher(format!("Unable to open auto-generated mesh file: {err}"))
    })?;

    let parse_ints = |line: &str| -> Result<Vec<usize>, SideriteError> {
        line.trim()
            .split(' ')
            .map(|i| {
                i.parse().map_err(|_| {
                    SideriteError::Mesher(format!("Unexpected non-int '{i}' in mesh data"))
                })
            })
            .collect()
    };

    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut lines = mesh_contents.split('\n');

    let mut nodes_unordered: Vec<Node> = Vec::new();
    let mut node_indexes: Vec<usize> = Vec::new();
    let mut elements: Vec<Element> = Vec::new();

    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }

        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                if line.starts_with("$Entities") {
                    parser_state = MeshParseState::Entities;
                } else if line.starts_with("$Node") {
                    parser_state = MeshParseState::Nodes;
                } else if line.starts_with("$Elements") {
                    parser_state = MeshParseState::Elements;
                }
                continue;
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block = parse_ints(line)?;
                let num_nodes_local = *block.get(3).ok_or_else(|| {
                    SideriteError::Mesher("Malformed node block header in mesh".to_owned())
                })?;

                let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                for _ in 0..num_nodes_local {
                    let tag_line = lines.next().ok_or_else(|| {
                        SideriteError::Mesher("Truncated node block in mesh".to_owned())
                    })?;
                    let tag = *parse_ints(tag_line)?.first().ok_or_else(|| {
                        SideriteError::Mesher("Empty node tag line in mesh".to_owned())
                    })?;
                    node_tags.push(tag);
                }

                for tag in node_tags {
                    let coord_line = lines.next().ok_or_else(|| {
                        SideriteError::Mesher("Truncated node block in mesh".to_owned())
                    })?;
                    let coords: Vec<f64> = coord_line
                        .trim()
                        .split(' ')
                        .map(|c| {
                            c.parse().map_err(|_| {
                                SideriteError::Mesher(format!(
                                    "Non-float coordinate '{c}' in mesh"
                                ))
                            })
                        })
                        .collect::<Result<_, _>>()?;
                    if coords.len() < 3 {
                        return Err(SideriteError::Mesher(
                            "Short coordinate line in mesh".to_owned(),
                        ));
                    }

                    nodes_unordered.push(Node::new(coords[0], coords[1], coords[2]));
                    node_indexes.push(tag - 1);
                }
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block = parse_ints(line)?;
                if block.len() < 4 {
                    return Err(SideriteError::Mesher(
                        "Malformed element block header in mesh".to_owned(),
                    ));
                }
                let entity_dim = block[0];
                let num_elements = block[3];

                for _ in 0..num_elements {
                    let element_line = lines.next().ok_or_else(|| {
                        SideriteError::Mesher("Truncated element block in mesh".to_owned())
                    })?;
                    let metadata = parse_ints(element_line)?;

                    // only surface triangles become elements
                    if entity_dim != 2 {
                        continue;
                    }
                    if metadata.len() < 4 {
                        return Err(SideriteError::Mesher(
                            "Short element line in mesh".to_owned(),
                        ));
                    }

                    elements.push(Element::Tri {
                        nodes: [metadata[1] - 1, metadata[2] - 1, metadata[3] - 1],
                        section: 0,
                    });
                }
            }
            MeshParseState::Entities => continue,
        }
    }

    // Order nodes by their gmsh tag
    let mut nodes: Vec<Node> = vec![Node::new(0.0, 0.0, 0.0); nodes_unordered.len()];
    for (idx, node) in std::iter::zip(node_indexes, nodes_unordered) {
        if idx >= nodes.len() {
            return Err(SideriteError::Mesher(format!(
                "Node tag {} exceeds node count in mesh",
                idx + 1
            )));
        }
        nodes[idx] = node;
    }

    println!(
        "info: loaded {} nodes and {} elements",
        nodes.len(),
        elements.len()
    );

    if let Err(err) = std::fs::remove_file(mesh_file) {
        println!("warning [mesh]: failed to delete .msh file: {err}");
    }

    Ok((nodes, elements))
}

/// Runs the mesher: delegates to gmsh and returns the discretized shell part
///
/// # Arguments
/// * `name` - The name of the resulting part
/// * `geometry` - The surface to mesh
/// * `section` - The shell section applied to every triangle
/// * `cl_min` / `cl_max` - Characteristic length bounds for gmsh
///
/// # Returns
/// A shell part with triangle elements
pub fn run(
    name: &str,
    geometry: &ShellGeometry,
    section: Section,
    cl_min: f64,
    cl_max: f64,
) -> Result<Part, SideriteError> {
    if section.thickness().is_none() {
        return Err(SideriteError::Input(format!(
            "Shell part '{name}' requires a shell section"
        )));
    }

    let mesh_filepath = "geom.msh";
    compute_mesh(geometry, mesh_filepath, cl_min, cl_max)?;
    let (nodes, elements) = parse_mesh(mesh_filepath)?;

    Ok(Part {
        name: name.to_owned(),
        kind: PartKind::Shell,
        nodes,
        elements,
        sections: vec![section],
    })
}

/// Loads shell geometry from a file path, dispatching on the extension
///
/// # Arguments
/// * `path` - The geometry file, currently .svg
/// * `min_spacing` - Outline vertices closer than this are dropped
pub fn load_geometry(path: &str, min_spacing: f64) -> Result<ShellGeometry, SideriteError> {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("svg") => parse_svg(path, min_spacing),
        _ => Err(SideriteError::Input(format!(
            "Unrecognized geometry filetype {path}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_file_closes_every_outline() {
        let mut geometry = ShellGeometry::new(vec![
            Vertex { x: 0.0, y: 0.0 },
            Vertex { x: 1.0, y: 0.0 },
            Vertex { x: 1.0, y: 1.0 },
            Vertex { x: 0.0, y: 1.0 },
        ]);
        geometry.add_hole(vec![
            Vertex { x: 0.4, y: 0.4 },
            Vertex { x: 0.6, y: 0.4 },
            Vertex { x: 0.5, y: 0.6 },
        ]);

        let path = std::env::temp_dir().join("siderite_geo_test.geo");
        let path = path.to_str().unwrap();
        build_geo(&geometry, path, 0.05, 0.1).unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        std::fs::remove_file(path).unwrap();

        // 7 points, 7 lines, 2 loops, 1 surface
        assert_eq!(contents.matches("Point(").count(), 7);
        assert_eq!(contents.matches("Line(").count(), 7);
        assert!(contents.contains("Line Loop(1)"));
        assert!(contents.contains("Line Loop(2)"));
        assert!(contents.contains("Plane Surface(1) = { 1, 2 };"));
        // last line of the hole closes back onto its first point
        assert!(contents.contains("Line(6) = { 6, 4 };"));
        assert!(contents.contains("Mesh.CharacteristicLengthMin = 0.05"));
    }

    #[test]
    fn msh_parsing_orders_nodes_by_tag() {
        let msh = "\
$MeshFormat
4.1 0 8
$EndMeshFormat
$Entities
1 0 1 0
$EndEntities
$Nodes
1 3 1 3
2 1 0 3
2
3
1
0 0 0
1 0 0
0 1 0
$EndNodes
$Elements
1 1 1 1
2 1 3 1
1 3 2 1
$EndElements
";
        let path = std::env::temp_dir().join("siderite_msh_test.msh");
        std::fs::write(&path, msh).unwrap();
        let (nodes, elements) = parse_mesh(path.to_str().unwrap()).unwrap();

        assert_eq!(nodes.len(), 3);
        // tag 3 carried coordinates (1, 0, 0)
        assert_eq!(nodes[2], Node::new(1.0, 0.0, 0.0));
        assert_eq!(nodes[0], Node::new(0.0, 1.0, 0.0));

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].nodes(), &[2, 1, 0]);
    }

    #[test]
    fn malformed_mesh_is_an_error() {
        // node block header is missing its count field
        let msh = "\
$Nodes
1 3 1 3
2 1 0
$EndNodes
";
        let path = std::env::temp_dir().join("siderite_msh_bad_header.msh");
        std::fs::write(&path, msh).unwrap();
        let result = parse_mesh(path.to_str().unwrap());
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());

        // coordinate line is short
        let msh = "\
$Nodes
1 1 1 1
2 1 0 1
1
0 0
$EndNodes
";
        let path = std::env::temp_dir().join("siderite_msh_bad_coords.msh");
        std::fs::write(&path, msh).unwrap();
        let result = parse_mesh(path.to_str().unwrap());
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());
    }

    #[test]
    fn svg_outer_and_inner_outlines() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg">
  <polygon id="OUTER" points="0,0 100,0 100,50 0,50"/>
  <rect id="INNER_1" x="40" y="20" width="20" height="10"/>
</svg>"##;
        let path = std::env::temp_dir().join("siderite_svg_test.svg");
        std::fs::write(&path, svg).unwrap();
        let geometry = parse_svg(path.to_str().unwrap(), 0.0).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(geometry.outlines.len(), 2);
        assert_eq!(geometry.outlines[0].len(), 4);
        // svg y axis is inverted on load
        assert_eq!(geometry.outlines[0][2], Vertex { x: 100.0, y: -50.0 });
        assert_eq!(geometry.outlines[1][0], Vertex { x: 40.0, y: -20.0 });
    }

    #[test]
    fn svg_without_outer_is_rejected() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg">
  <polygon id="INNER" points="0,0 1,0 1,1"/>
</svg>"##;
        let path = std::env::temp_dir().join("siderite_svg_noouter.svg");
        std::fs::write(&path, svg).unwrap();
        let result = parse_svg(path.to_str().unwrap(), 0.0);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
