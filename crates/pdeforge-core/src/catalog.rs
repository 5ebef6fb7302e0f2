//! Built-in problem catalog.
//!
//! Each entry fixes an equation family, default parameters, the tensor
//! contract and a parameterized description. Descriptions use `{name}` for
//! parameters and `{{`/`}}` for literal LaTeX braces.

use std::collections::BTreeMap;

use crate::domain::{uniform_grid, AcceptanceTargets, ForgeError, ProblemSpec, ShapeContract};

const ADVECTION: &str = r"The PDE is the 1D advection equation

\[
\begin{{cases}}
\partial_t u(t, x) + \beta \partial_x u(t, x) = 0, & x \in (0,1),\ t \in (0,2] \\
u(0, x) = u_0(x), & x \in (0,1)
\end{{cases}}
\]

where $\beta$ is the constant advection speed. Boundary conditions are periodic.

Given $u_0$ discretized as [batch_size, N], predict $u(t, \cdot)$ at every requested time $t_1, \ldots, t_T$. The solution has shape [batch_size, T+1, N] and its first frame is the initial condition. Internal time steps smaller than the output spacing are allowed and usually needed for stability.

Tailor the solver to $\beta = {beta}$.";

const BURGERS: &str = r"The PDE is the viscous Burgers equation

\[
\begin{{cases}}
\partial_t u(x, t) + \partial_x \left( \frac{{u^2(x, t)}}{{2}} \right) = \nu \partial_{{xx}} u(x, t), & x \in (0,1),\ t \in (0,2] \\
u(x, 0) = u_0(x), & x \in (0,1)
\end{{cases}}
\]

where $\nu$ is the viscosity. Boundary conditions are periodic.

Given $u_0$ discretized as [batch_size, N], predict $u(\cdot, t)$ at every requested time $t_1, \ldots, t_T$. The solution has shape [batch_size, T+1, N] and its first frame is the initial condition. Internal time steps smaller than the output spacing are allowed and usually needed for stability.

Tailor the solver to $\nu = {nu}$.";

const REACTION_DIFFUSION_1D: &str = r"The PDE is the 1D diffusion-reaction equation

\[
\begin{{cases}}
\partial_t u(t, x) - \nu \partial_{{xx}} u(t, x) - \rho u (1 - u) = 0, & x \in (0,1),\ t \in (0,T] \\
u(0, x) = u_0(x), & x \in (0,1)
\end{{cases}}
\]

where $\nu$ is the diffusion coefficient and $\rho$ the reaction rate. Boundary conditions are periodic.

Given $u_0$ discretized as [batch_size, N], predict $u(\cdot, t)$ at every requested time $t_1, \ldots, t_T$. The solution has shape [batch_size, T+1, N] and its first frame is the initial condition. Internal time steps smaller than the output spacing are allowed and usually needed for stability.

Tailor the solver to $\nu = {nu}, \rho = {rho}$. The reaction and diffusion terms have different structure; exploiting that (for example by operator splitting) is encouraged.";

const COMPRESSIBLE_NS_1D: &str = r"The PDE system is the 1D compressible Navier-Stokes equations

\[
\begin{{cases}}
\partial_t \rho + \partial_x (\rho v) = 0 \\
\rho (\partial_t v + v \partial_x v) = -\partial_x p + \eta \partial_{{xx}} v + (\zeta + \eta/3) \partial_x (\partial_x v) \\
\partial_t \left[ \epsilon + \frac{{\rho v^2}}{{2}} \right] + \partial_x \left[ \left( \epsilon + p + \frac{{\rho v^2}}{{2}} \right) v - v \sigma' \right] = 0
\end{{cases}}
\]

with density $\rho$, velocity $v$, pressure $p$, internal energy $\epsilon = p / (\Gamma - 1)$, $\Gamma = 5/3$, viscous stress $\sigma' = (\zeta + \frac{{4}}{{3}} \eta) \partial_x v$, and shear/bulk viscosities $\eta, \zeta$. The domain is $[-1, 1]$ with periodic boundaries.

Given initial velocity, density and pressure, each discretized as [batch_size, N], predict all three at every requested time $t_1, \ldots, t_T$. Each output has shape [batch_size, T+1, N] and its first frame is the initial condition. Internal time steps smaller than the output spacing are allowed and usually needed for stability.

Tailor the solver to $\eta = \zeta = {eta}$.";

const FENTON_KARMA_2D: &str = r"The PDE system is a 2D reaction-diffusion model of cardiac tissue (Bueno-Orovio-Cherry-Fenton type) for the normalized transmembrane potential $u$ and gating variables $v, w$:

\[
\begin{{cases}}
\partial_t u = D \nabla^2 u - \frac{{I_{{fi}}(u, v) + I_{{so}}(u) + I_{{si}}(u, w)}}{{C_m}} \\
\partial_t v = \frac{{1 - v}}{{\tau_{{mv}}(u)}} \text{{ if }} u < V_c, \quad \frac{{-v}}{{\tau_{{pv}}}} \text{{ otherwise}} \\
\partial_t w = \frac{{1 - w}}{{\tau_{{mw}}}} \text{{ if }} u < V_c, \quad \frac{{-w}}{{\tau_{{pw}}}} \text{{ otherwise}}
\end{{cases}}
\]

with ionic currents
- $I_{{fi}}(u, v) = -v H(u - V_c) (u - V_c) (1 - u) / \tau_d$
- $I_{{so}}(u) = u (1 - H(u - V_c)) / \tau_0 + H(u - V_c) / \tau_r$
- $I_{{si}}(u, w) = -w (1 + \tanh(k (u - V_{{csi}}))) / (2 \tau_{{si}})$

where $H$ is the Heaviside step. The domain is $[-10, 10]^2$ with no-flux (Neumann) boundaries.

Given $u(0), v(0), w(0)$, each discretized as [batch_size, N, N], predict all three at every requested time $t_1, \ldots, t_T$. Each output has shape [batch_size, T+1, N, N] and its first frame is the initial condition. Internal time steps smaller than the output spacing are allowed and usually needed for stability.

Fixed constants: $D = 0.001$, $C_m = 1.0$, $\tau_{{pv}} = 7.99$, $\tau_{{v1}} = 9.8$, $\tau_{{v2}} = 312.5$, $\tau_{{pw}} = 870.0$, $\tau_{{mw}} = 41.0$, $\tau_0 = 12.5$, $\tau_r = 33.83$, $\tau_{{si}} = 29.0$, $k = 10.0$, $V_{{csi}} = 0.861$, $V_c = 0.13$, $V_v = 0.04$.

Tailor the solver to $\tau_d = {tau_d}$.";

/// Ids of every built-in problem.
pub const BUILTIN_IDS: &[&str] = &["advection", "burgers", "reacdiff1d", "cns1d", "fk2d"];

/// Look up a built-in problem by id.
pub fn builtin(id: &str) -> Result<ProblemSpec, ForgeError> {
    let spec = match id {
        "advection" => entry(
            "advection",
            ADVECTION,
            &[("beta", 0.1)],
            one_dimensional(&["u0"], &["u"]),
            2.0,
            201,
        ),
        "burgers" => entry(
            "burgers",
            BURGERS,
            &[("nu", 0.01)],
            one_dimensional(&["u0"], &["u"]),
            2.0,
            201,
        ),
        "reacdiff1d" => entry(
            "reaction_diffusion_1d",
            REACTION_DIFFUSION_1D,
            &[("nu", 0.5), ("rho", 1.0)],
            one_dimensional(&["u0"], &["u"]),
            1.0,
            101,
        ),
        "cns1d" => entry(
            "compressible_navier_stokes_1d",
            COMPRESSIBLE_NS_1D,
            &[("eta", 0.1)],
            one_dimensional(&["Vx0", "density0", "pressure0"], &["Vx", "density", "pressure"]),
            1.0,
            101,
        ),
        "fk2d" => entry(
            "bueno_orovio_cherry_fenton_2d",
            FENTON_KARMA_2D,
            &[("tau_d", 0.25)],
            ShapeContract {
                batch_size: 4,
                spatial_rank: 2,
                resolution: 128,
                input_fields: fields(&["u0", "v0", "w0"]),
                output_fields: fields(&["u", "v", "w"]),
            },
            100.0,
            101,
        ),
        other => return Err(ForgeError::UnknownProblem(other.to_string())),
    };
    Ok(ProblemSpec { id: id.to_string(), ..spec })
}

/// Every built-in problem, in catalog order.
pub fn all() -> Vec<ProblemSpec> {
    BUILTIN_IDS
        .iter()
        .filter_map(|id| builtin(id).ok())
        .collect()
}

fn entry(
    equation: &str,
    description: &str,
    parameters: &[(&str, f64)],
    shape: ShapeContract,
    t_end: f64,
    frames: usize,
) -> ProblemSpec {
    ProblemSpec {
        id: String::new(),
        equation: equation.to_string(),
        parameters: parameters
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<BTreeMap<_, _>>(),
        shape,
        t_coordinate: uniform_grid(t_end, frames),
        targets: AcceptanceTargets::default(),
        description: description.to_string(),
        solver_template: None,
        language: "python".to_string(),
    }
}

fn one_dimensional(inputs: &[&str], outputs: &[&str]) -> ShapeContract {
    ShapeContract {
        batch_size: 100,
        spatial_rank: 1,
        resolution: 1024,
        input_fields: fields(inputs),
        output_fields: fields(outputs),
    }
}

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_validates() {
        for spec in all() {
            spec.validate()
                .unwrap_or_else(|e| panic!("{} failed validation: {e}", spec.id));
        }
        assert_eq!(all().len(), BUILTIN_IDS.len());
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(matches!(
            builtin("heat3d"),
            Err(ForgeError::UnknownProblem(id)) if id == "heat3d"
        ));
    }

    #[test]
    fn test_description_renders_parameters_and_braces() {
        let spec = builtin("burgers").unwrap();
        let text = spec.rendered_description();
        assert!(text.contains(r"Tailor the solver to $\nu = 0.01$."));
        assert!(text.contains(r"\partial_{xx}"));
        assert!(!text.contains("{nu}"));
    }

    #[test]
    fn test_multi_field_template_signature() {
        let spec = builtin("cns1d").unwrap();
        let template = spec.solver_template();
        assert!(template.contains(
            "def solver(Vx0_batch, density0_batch, pressure0_batch, t_coordinate, eta):"
        ));
    }

    #[test]
    fn test_fk2d_is_two_dimensional() {
        let spec = builtin("fk2d").unwrap();
        assert_eq!(spec.shape.input_shape(128), vec![4, 128, 128]);
        assert!(spec.rendered_description().contains(r"$\tau_d = 0.25$"));
    }
}
