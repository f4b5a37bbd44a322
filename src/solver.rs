use indicatif::ProgressBar;
use nalgebra::{matrix, DMatrix, DVector, SMatrix};
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        ArgminFloat, Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

use crate::{
    error::SideriteError,
    model::{Element, Model, Node, PartKind},
};

pub const DOF: usize = 3;
pub const MAX_CG_ITER: u64 = 1e7 as u64;
pub const TARGET_CG_COST: f64 = 1e-4;
/// Reduced systems at or below this dof count are solved by dense LU
pub const DENSE_SOLVE_LIMIT: usize = 500;

/// Raw field results for one solved step
#[derive(Debug, Clone)]
pub struct StepSolution {
    /// Displacement per global node
    pub displacements: Vec<[f64; 3]>,
    /// Recovered reaction per global node; zero away from supports
    pub reactions: Vec<[f64; 3]>,
    /// Scalar stress per element, in global element order
    pub element_stresses: Vec<f64>,
}

/// Runs multiplication for the conjugate gradient solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let mut out = vec![0.0; x.len()];
        for (row, col, value) in self.a.triplet_iter() {
            out[row] += value * x[col];
        }
        Ok(out)
    }
}

/// Observer bar for the argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new() -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            final_mag: TARGET_CG_COST.log10().floor(),
        }
    }

    fn argmin_float_to_f64<F: ArgminFloat>(&self, value: F) -> Option<f64> {
        // ArgminFloat exposes no direct conversion; go through Debug
        match format!("{:?}", value).parse() {
            Ok(n) => Some(n),
            Err(_) => None,
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = match self.argmin_float_to_f64(state.get_cost()) {
            Some(c) => c,
            None => return Ok(()), // skip if we can't parse
        };
        let cost_mag = cost.log10().floor();
        let progress = (1000. / f64::sqrt(cost_mag - self.final_mag)) as u64;
        self.bar.set_position(progress);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square positive definite sparse matrix
/// * `b` - A vector of the solutions to the system
///
/// # Returns
/// A DVector that represents `x` from the system
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
) -> Result<DVector<f64>, SideriteError> {
    let b_flat: Vec<f64> = b.iter().copied().collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    let operator = ConjugateGradientOperator { a };
    let observer = ConjugateGradientObserverBar::new();

    let res = match Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(MAX_CG_ITER)
                .target_cost(TARGET_CG_COST)
        })
        .add_observer(observer, ObserverMode::NewBest)
        .run()
    {
        Ok(r) => r,
        Err(err) => {
            return Err(SideriteError::Solver(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    // Executor::run also returns Ok when max_iters runs out
    let best_cost = res.state().get_best_cost();
    if !(best_cost <= TARGET_CG_COST) {
        return Err(SideriteError::Solver(format!(
            "Conjugate Gradient did not converge: residual cost {best_cost:.3e} above target {TARGET_CG_COST:.1e}"
        )));
    }

    let best_param = match &res.state().best_param {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(SideriteError::Solver(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    Ok(best_param)
}

/// Calculates the signed area of a membrane triangle from its in-plane
/// coordinates
fn triangle_area(v0: &Node, v1: &Node, v2: &Node) -> f64 {
    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Calculates the strain-displacement matrix of a membrane triangle
///
/// # Arguments
/// * `v0`, `v1`, `v2` - The corner nodes
/// * `area` - The signed triangle area
///
/// # Returns
/// A 3x6 strain-displacement matrix
fn strain_displacement_matrix(
    v0: &Node,
    v1: &Node,
    v2: &Node,
    area: f64,
) -> SMatrix<f64, 3, 6> {
    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut b: SMatrix<f64, 3, 6> = matrix![
        beta_1, 0., beta_2, 0., beta_3, 0.;
        0., gamma_1, 0., gamma_2, 0., gamma_3;
        gamma_1, beta_1, gamma_2, beta_2, gamma_3, beta_3;
    ];

    b /= 2.0 * area;

    b
}

/// Calculates the plane-stress constitutive matrix
///
/// # Arguments
/// * `poisson_ratio` - The material's Poisson ratio
/// * `youngs_modulus` - The material's modulus of elasticity
///
/// # Returns
/// A 3x3 stress-strain matrix
fn stress_strain_matrix(poisson_ratio: f64, youngs_modulus: f64) -> SMatrix<f64, 3, 3> {
    let mut d: SMatrix<f64, 3, 3> = matrix![
        1.0, poisson_ratio, 0.0;
        poisson_ratio, 1.0, 0.0;
        0.0, 0.0, (1.0 - poisson_ratio)/2.0;
    ];

    d *= youngs_modulus / (1.0 - f64::powi(poisson_ratio, 2));

    d
}

/// Per-element data resolved against the model: node dofs, material, section
struct ElementContext {
    global_nodes: Vec<usize>,
    youngs_modulus: f64,
    poisson_ratio: f64,
    area: Option<f64>,
    thickness: Option<f64>,
}

/// Collects every element with its resolved material and global node indices
fn element_contexts(model: &Model) -> Result<Vec<(Element, ElementContext)>, SideriteError> {
    let offsets = model.part_offsets();
    let mut contexts = Vec::with_capacity(model.element_count());

    for (part, offset) in model.parts.iter().zip(offsets) {
        for element in &part.elements {
            let section = &part.sections[element.section()];
            let material = model.material(section.material()).ok_or_else(|| {
                SideriteError::Solver(format!(
                    "Part '{}' references unknown material '{}'",
                    part.name,
                    section.material()
                ))
            })?;

            contexts.push((
                element.clone(),
                ElementContext {
                    global_nodes: element.nodes().iter().map(|n| offset + n).collect(),
                    youngs_modulus: material.youngs_modulus,
                    poisson_ratio: material.poisson_ratio,
                    area: section.area(),
                    thickness: section.thickness(),
                },
            ));
        }
    }

    Ok(contexts)
}

/// Axial stiffness contribution of a bar, spread over its 6 dofs
fn assemble_bar(
    coo: &mut CooMatrix<f64>,
    nodes: &[Node],
    ctx: &ElementContext,
) -> Result<(), SideriteError> {
    let a = &nodes[ctx.global_nodes[0]];
    let b = &nodes[ctx.global_nodes[1]];

    let delta = [b.x - a.x, b.y - a.y, b.z - a.z];
    let length = f64::sqrt(
        f64::powi(delta[0], 2) + f64::powi(delta[1], 2) + f64::powi(delta[2], 2),
    );
    if length == 0.0 {
        return Err(SideriteError::Solver(
            "Bar element has zero length".to_owned(),
        ));
    }
    let area = ctx.area.ok_or_else(|| {
        SideriteError::Solver("Bar element is missing a line section".to_owned())
    })?;

    let direction = [delta[0] / length, delta[1] / length, delta[2] / length];
    let ea_over_l = ctx.youngs_modulus * area / length;

    let uu = [
        direction[0],
        direction[1],
        direction[2],
        -direction[0],
        -direction[1],
        -direction[2],
    ];
    let dofs = [
        ctx.global_nodes[0] * DOF,
        ctx.global_nodes[0] * DOF + 1,
        ctx.global_nodes[0] * DOF + 2,
        ctx.global_nodes[1] * DOF,
        ctx.global_nodes[1] * DOF + 1,
        ctx.global_nodes[1] * DOF + 2,
    ];

    for i in 0..6 {
        for j in 0..6 {
            coo.push(dofs[i], dofs[j], ea_over_l * uu[i] * uu[j]);
        }
    }

    Ok(())
}

/// Plane-stress membrane stiffness of a triangle, spread over its in-plane
/// dofs. The out-of-plane dofs carry no stiffness and are restrained
/// separately.
fn assemble_tri(
    coo: &mut CooMatrix<f64>,
    nodes: &[Node],
    ctx: &ElementContext,
) -> Result<(), SideriteError> {
    let v0 = &nodes[ctx.global_nodes[0]];
    let v1 = &nodes[ctx.global_nodes[1]];
    let v2 = &nodes[ctx.global_nodes[2]];

    let area = triangle_area(v0, v1, v2);
    if area == 0.0 {
        return Err(SideriteError::Solver(
            "Membrane triangle has zero area".to_owned(),
        ));
    }
    let thickness = ctx.thickness.ok_or_else(|| {
        SideriteError::Solver("Membrane triangle is missing a shell section".to_owned())
    })?;

    let d = stress_strain_matrix(ctx.poisson_ratio, ctx.youngs_modulus);
    let b = strain_displacement_matrix(v0, v1, v2, area);
    let stiffness: SMatrix<f64, 6, 6> = (b.transpose() * d) * b * area * thickness;

    let dofs = [
        ctx.global_nodes[0] * DOF,
        ctx.global_nodes[0] * DOF + 1,
        ctx.global_nodes[1] * DOF,
        ctx.global_nodes[1] * DOF + 1,
        ctx.global_nodes[2] * DOF,
        ctx.global_nodes[2] * DOF + 1,
    ];

    for i in 0..6 {
        for j in 0..6 {
            coo.push(dofs[i], dofs[j], stiffness[(i, j)]);
        }
    }

    Ok(())
}

/// Builds the total stiffness matrix in sparse form
///
/// # Arguments
/// * `nodes` - The global node list
/// * `contexts` - Resolved element contexts
///
/// # Returns
/// The global stiffness matrix in CSR form
fn build_total_stiffness_matrix(
    nodes: &[Node],
    contexts: &[(Element, ElementContext)],
) -> Result<CsrMatrix<f64>, SideriteError> {
    let ndof = nodes.len() * DOF;
    let mut coo: CooMatrix<f64> = CooMatrix::new(ndof, ndof);

    println!("info: building element stiffness matrices...");
    let bar = ProgressBar::new(contexts.len() as u64);
    for (element, ctx) in contexts {
        bar.inc(1);
        match element {
            Element::Bar { .. } => assemble_bar(&mut coo, nodes, ctx)?,
            Element::Tri { .. } => assemble_tri(&mut coo, nodes, ctx)?,
        }
    }
    bar.finish();
    println!(
        "info: successfully built {} element stiffness matrices",
        contexts.len()
    );

    Ok(CsrMatrix::from(&coo))
}

/// Per-dof prescribed displacements, resolved from supports. Shell-part
/// nodes get their out-of-plane translation restrained automatically.
fn prescribed_displacements(model: &Model) -> Vec<Option<f64>> {
    let mut prescribed: Vec<Option<f64>> = vec![None; model.node_count() * DOF];

    let offsets = model.part_offsets();
    for (part, offset) in model.parts.iter().zip(offsets) {
        if part.kind == PartKind::Shell {
            for i in 0..part.nodes.len() {
                prescribed[(offset + i) * DOF + 2] = Some(0.0);
            }
        }
    }

    for support in &model.supports {
        let targets = support.kind.targets();
        for node in model.select_nodes(&support.region, &support.name) {
            for axis in 0..DOF {
                if let Some(target) = targets[axis] {
                    prescribed[node * DOF + axis] = Some(target);
                }
            }
        }
    }

    prescribed
}

/// Count of loaded dofs that are also displacement-prescribed
fn constrained_load_conflicts(loads: &[f64], prescribed: &[Option<f64>]) -> usize {
    loads
        .iter()
        .zip(prescribed)
        .filter(|(load, target)| **load != 0.0 && target.is_some())
        .count()
}

/// Solves the reduced system for the unknown displacements
///
/// # Arguments
/// * `stiffness` - The global stiffness matrix
/// * `loads` - The full applied load vector
/// * `prescribed` - Per-dof prescribed displacements
///
/// # Returns
/// The full displacement vector with prescribed values in place
fn solve_displacements(
    stiffness: &CsrMatrix<f64>,
    loads: &[f64],
    prescribed: &[Option<f64>],
) -> Result<DVector<f64>, SideriteError> {
    let ndof = prescribed.len();

    // map free dofs to reduced indices
    let mut free_index: Vec<Option<usize>> = vec![None; ndof];
    let mut free_count = 0;
    for (dof, value) in prescribed.iter().enumerate() {
        if value.is_none() {
            free_index[dof] = Some(free_count);
            free_count += 1;
        }
    }

    let mut displacements = DVector::zeros(ndof);
    for (dof, value) in prescribed.iter().enumerate() {
        if let Some(value) = value {
            displacements[dof] = *value;
        }
    }
    if free_count == 0 {
        return Ok(displacements);
    }

    println!("info: setting up system ({free_count} free of {ndof} dofs)...");

    let mut reduced: CooMatrix<f64> = CooMatrix::new(free_count, free_count);
    let mut rhs: DVector<f64> = DVector::zeros(free_count);

    for (dof, value) in prescribed.iter().enumerate() {
        if value.is_none() {
            rhs[free_index[dof].unwrap()] = loads[dof];
        }
    }

    for (row, col, value) in stiffness.triplet_iter() {
        match (free_index[row], free_index[col]) {
            (Some(r), Some(c)) => reduced.push(r, c, *value),
            (Some(r), None) => {
                // move the known-displacement contribution to the rhs
                if let Some(u) = prescribed[col] {
                    rhs[r] -= value * u;
                }
            }
            _ => {}
        }
    }

    println!("info: solving...");
    let start = std::time::Instant::now();

    let solution = if free_count <= DENSE_SOLVE_LIMIT {
        let mut dense: DMatrix<f64> = DMatrix::zeros(free_count, free_count);
        for (r, c, v) in reduced.triplet_iter() {
            dense[(r, c)] += v;
        }
        dense.lu().solve(&rhs).ok_or_else(|| {
            SideriteError::Solver(
                "Stiffness matrix is singular; check supports and connectivity".to_owned(),
            )
        })?
    } else {
        let csr = CsrMatrix::from(&reduced);
        run_conjugate_gradient(&csr, &rhs)?
    };

    let elapsed = start.elapsed().as_secs_f32();
    println!("info: solved system in {:.3} seconds", elapsed);

    for (dof, index) in free_index.iter().enumerate() {
        if let Some(index) = index {
            displacements[dof] = solution[*index];
        }
    }

    Ok(displacements)
}

/// Recovers reactions at prescribed dofs from K*u - f
fn recover_reactions(
    stiffness: &CsrMatrix<f64>,
    displacements: &DVector<f64>,
    loads: &[f64],
    prescribed: &[Option<f64>],
) -> Vec<f64> {
    let mut internal = vec![0.0; prescribed.len()];
    for (row, col, value) in stiffness.triplet_iter() {
        internal[row] += value * displacements[col];
    }

    internal
        .iter()
        .enumerate()
        .map(|(dof, force)| {
            if prescribed[dof].is_some() {
                force - loads[dof]
            } else {
                0.0
            }
        })
        .collect()
}

/// Calculates the scalar stress in every element
fn compute_stresses(
    nodes: &[Node],
    contexts: &[(Element, ElementContext)],
    displacements: &DVector<f64>,
) -> Vec<f64> {
    let mut stresses = Vec::with_capacity(contexts.len());

    for (element, ctx) in contexts {
        let stress = match element {
            Element::Bar { .. } => {
                let a = &nodes[ctx.global_nodes[0]];
                let b = &nodes[ctx.global_nodes[1]];
                let delta = [b.x - a.x, b.y - a.y, b.z - a.z];
                let length = f64::sqrt(
                    f64::powi(delta[0], 2) + f64::powi(delta[1], 2) + f64::powi(delta[2], 2),
                );
                let direction = [delta[0] / length, delta[1] / length, delta[2] / length];

                let i = ctx.global_nodes[0] * DOF;
                let j = ctx.global_nodes[1] * DOF;
                let relative = [
                    displacements[j] - displacements[i],
                    displacements[j + 1] - displacements[i + 1],
                    displacements[j + 2] - displacements[i + 2],
                ];
                let axial = direction[0] * relative[0]
                    + direction[1] * relative[1]
                    + direction[2] * relative[2];

                // axial stress = E * strain
                ctx.youngs_modulus * axial / length
            }
            Element::Tri { .. } => {
                let v0 = &nodes[ctx.global_nodes[0]];
                let v1 = &nodes[ctx.global_nodes[1]];
                let v2 = &nodes[ctx.global_nodes[2]];
                let area = triangle_area(v0, v1, v2);

                let mut u: SMatrix<f64, 6, 1> = SMatrix::zeros();
                for (local, &node) in ctx.global_nodes.iter().enumerate() {
                    u[2 * local] = displacements[node * DOF];
                    u[2 * local + 1] = displacements[node * DOF + 1];
                }

                let stress = stress_strain_matrix(ctx.poisson_ratio, ctx.youngs_modulus)
                    * strain_displacement_matrix(v0, v1, v2, area)
                    * u;

                f64::sqrt(f64::powi(stress[0], 2) + f64::powi(stress[1], 2))
            }
        };
        stresses.push(stress);
    }

    stresses
}

/// Runs the native backend on one combined load vector
///
/// # Arguments
/// * `model` - The model to analyse
/// * `nodal_loads` - Combined per-node loads from the step
///
/// # Returns
/// The raw field results for the step
pub fn run(model: &Model, nodal_loads: &[[f64; 3]]) -> Result<StepSolution, SideriteError> {
    if nodal_loads.len() != model.node_count() {
        return Err(SideriteError::Solver(format!(
            "Load vector covers {} nodes but the model has {}",
            nodal_loads.len(),
            model.node_count()
        )));
    }

    let nodes = model.global_nodes();
    let contexts = element_contexts(model)?;

    let stiffness = build_total_stiffness_matrix(&nodes, &contexts)?;
    let prescribed = prescribed_displacements(model);

    let mut loads = vec![0.0; nodes.len() * DOF];
    for (i, load) in nodal_loads.iter().enumerate() {
        loads[i * DOF] = load[0];
        loads[i * DOF + 1] = load[1];
        loads[i * DOF + 2] = load[2];
    }

    let conflicts = constrained_load_conflicts(&loads, &prescribed);
    if conflicts > 0 {
        println!(
            "warning [solver]: {conflicts} loaded dofs are displacement-prescribed; those loads transfer to reactions"
        );
    }

    let displacements = solve_displacements(&stiffness, &loads, &prescribed)?;
    let reaction_vector = recover_reactions(&stiffness, &displacements, &loads, &prescribed);
    let element_stresses = compute_stresses(&nodes, &contexts, &displacements);

    let displacements_per_node: Vec<[f64; 3]> = (0..nodes.len())
        .map(|i| {
            [
                displacements[i * DOF],
                displacements[i * DOF + 1],
                displacements[i * DOF + 2],
            ]
        })
        .collect();
    let reactions_per_node: Vec<[f64; 3]> = (0..nodes.len())
        .map(|i| {
            [
                reaction_vector[i * DOF],
                reaction_vector[i * DOF + 1],
                reaction_vector[i * DOF + 2],
            ]
        })
        .collect();

    println!("info: solve complete");

    Ok(StepSolution {
        displacements: displacements_per_node,
        reactions: reactions_per_node,
        element_stresses,
    })
}
