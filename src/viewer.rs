use crate::error::SideriteError;

/// Hands the exported CSV pair to the external plotter
///
/// The plotter renders interactively; no output is consumed here.
///
/// # Arguments
/// * `nodes_csv` - The nodes csv written by the results store
/// * `elements_csv` - The elements csv written by the results store
/// * `plotter_path` - The plotter script to invoke
pub fn pyplot(
    nodes_csv: &str,
    elements_csv: &str,
    plotter_path: &str,
) -> Result<(), SideriteError> {
    println!("info: plotting in python...");
    let output = std::process::Command::new("python")
        .arg(plotter_path)
        .arg(nodes_csv)
        .arg(elements_csv)
        .output()
        .map_err(|err| SideriteError::Viewer(format!("Plotter failed to launch: {err}")))?;

    if !output.status.success() {
        return Err(SideriteError::Viewer(format!(
            "Plotter exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}
