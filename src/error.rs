use thiserror::Error;

/// Reasons why an optimizer gave up without converging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConvergenceFailure {
    /// The norm of a Jacobian column became `NaN` or `$\pm\infty$`.
    #[error("unable to perform Q.R decomposition on the {rows}x{cols} jacobian matrix")]
    UnableToPerformQr { rows: usize, cols: usize },
    /// Actual and predicted reduction of the cost are both below the machine epsilon.
    #[error("too small cost relative tolerance: no further reduction in the sum of squares is possible")]
    TooSmallCostRelativeTolerance,
    /// The trust region shrank below the machine epsilon relative to the parameters.
    #[error("too small parameters relative tolerance: no further improvement in the approximate solution is possible")]
    TooSmallParametersRelativeTolerance,
    /// The residuals are orthogonal to the Jacobian columns up to the machine epsilon.
    #[error("too small orthogonality tolerance: solution is orthogonal to the jacobian")]
    TooSmallOrthogonalityTolerance,
    /// The normal equations of a Gauss-Newton step are singular.
    #[error("unable to solve: singular problem")]
    SingularProblem,
    /// The cost at an evaluated point is `NaN` or `$\pm\infty$`.
    #[error("the cost is not finite")]
    NonFiniteCost,
}

/// Errors returned by the optimizers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizerError {
    /// Shapes of target, weights, residuals or Jacobian disagree.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// A matrix required to be invertible is not, relative to the threshold.
    #[error("matrix is singular")]
    SingularMatrix,
    /// The optimizer cannot make further numerical progress.
    #[error(transparent)]
    Convergence(#[from] ConvergenceFailure),
    /// The evaluation budget is exhausted.
    #[error("maximal count ({max}) exceeded: evaluations")]
    TooManyEvaluations { max: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// No sign change of the line search function could be found.
    #[error("unable to bracket optimum in line search")]
    BracketNotFound,
    /// More observations than parameters are required.
    #[error("{observations} observations are not enough to estimate {parameters} parameters")]
    NotEnoughObservations {
        observations: usize,
        parameters: usize,
    },
}
