use std::fmt::Display;

#[derive(Debug)]
pub enum SideriteError {
    Input(String),
    Mesher(String),
    Solver(String),
    Results(String),
    Viewer(String),
}

impl Display for SideriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            SideriteError::Input(v) => ("Input", v),
            SideriteError::Mesher(v) => ("Mesher", v),
            SideriteError::Solver(v) => ("Solver", v),
            SideriteError::Results(v) => ("Results", v),
            SideriteError::Viewer(v) => ("Viewer", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl std::error::Error for SideriteError {}
