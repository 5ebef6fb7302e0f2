//! Request templates, one per template kind.
//!
//! Placeholders are `{name}`; see [`render_placeholders`](super::render::render_placeholders).

pub const SYSTEM_PROMPT: &str = "You are a research engineer specializing in numerical methods and scientific computing.
Your goal is to write PDE solvers that are accurate, stable and fast, improving on earlier attempts using the feedback you are given.
Follow the requirements exactly. Comment the code where the reasoning is not obvious.
Always present code inside a fenced Markdown code block.";

pub const INITIAL: &str = "Your task is to solve a partial differential equation (PDE) in batch mode.

{description}

{spec_block}

Complete the following skeleton:

```{language}
{solver_template}
```

Requirements:
1. Implement `solver` without changing its signature. Auxiliary functions are welcome.
2. The code will be executed and scored automatically; it must run correctly and efficiently.
3. Print brief progress information; it is fed back to you for later improvement. Do not print excessively.
4. Prefer simple algorithms that are easy to get right.

Answer with:
1. A short implementation plan.
2. The implementation (no main function):

```{language}
[your implementation]
```";

pub const EXECUTION_REPAIR: &str = "Your previous solver failed to run.

{description}

{spec_block}

The code that failed:

```{language}
{source}
```

Error: {error_message}

Captured output:
{output}

Think step by step about the root cause, explain it, and fix it. Keep the `solver` signature unchanged.

Answer with:
[your debugging rationale]

```{language}
[your corrected implementation]
```";

pub const STABILITY_REPAIR: &str = "Your previous solver ran, but its output contains NaN or infinite values.

{description}

{spec_block}

The code that blew up:

```{language}
{source}
```

Captured output:
{output}

Think step by step about which computation is numerically unstable. Check stability limits (CFL-type conditions), consider smaller internal time steps, and consider more stable schemes. Keep the `solver` signature unchanged.

Answer with:
[your debugging rationale]

```{language}
[your corrected implementation]
```";

pub const IMPROVEMENT: &str = "Your task is to improve a PDE solver working in batch mode.

{description}

{spec_block}

The solver skeleton is:

```{language}
{solver_template}
```

Earlier attempts, oldest first:

{samples}

Goals: reach nRMSE at or below {accuracy_threshold} and run within {runtime_budget} seconds, as fast as possible.
If the nRMSE is far above the target or not finite, the implementation is likely buggy: debug it or try a different approach.
If the runtime is far above the budget, prioritize efficiency.
The convergence order is the empirical order with respect to spatial resolution; aim for at least {min_convergence_order}.

Answer with:
1. A summary of the earlier attempts: what worked, what looks buggy, what can improve.
2. Your rationale for the new implementation.
3. The implementation (no main function):

```{language}
[your implementation]
```";

pub const CODE_SAMPLE: &str = "Attempt {number} ({outcome}):
```{language}
{source}
```
nRMSE: {error} | runtime: {runtime} | convergence order: {convergence}
Output: {output}";

pub const OMITTED_NOTE: &str = "({count} older attempts omitted)";
