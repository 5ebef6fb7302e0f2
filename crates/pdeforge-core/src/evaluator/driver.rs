//! Built-in Python harness that runs a candidate against the run contract.
//!
//! The harness reads `inputs/manifest.json`, imports the candidate file,
//! calls `solver(*inputs, t_coordinate, **parameters)` and writes every
//! returned array to `outputs/` with an output manifest.

/// File name the harness is written to inside each working directory.
pub const DRIVER_FILE: &str = "pdeforge_driver.py";

pub const DEFAULT_DRIVER: &str = r#"import importlib.util
import json
import os
import sys
import time

import numpy as np


def load_tensor(directory, entry):
    path = os.path.join(directory, entry["file"])
    if entry.get("encoding", "f64le") == "text":
        with open(path) as handle:
            values = np.array(handle.read().split(), dtype=np.float64)
    else:
        values = np.fromfile(path, dtype="<f8")
    return values.reshape(entry["shape"])


def save_tensor(directory, name, array):
    array = np.ascontiguousarray(np.asarray(array, dtype=np.float64))
    file_name = name + ".f64"
    array.astype("<f8").tofile(os.path.join(directory, file_name))
    return {"name": name, "shape": list(array.shape), "file": file_name, "encoding": "f64le"}


def main():
    candidate_path, workdir = sys.argv[1], sys.argv[2]
    input_dir = os.path.join(workdir, "inputs")
    with open(os.path.join(input_dir, "manifest.json")) as handle:
        manifest = json.load(handle)

    inputs = [load_tensor(input_dir, entry) for entry in manifest["inputs"]]
    t_coordinate = np.asarray(manifest["t_coordinate"], dtype=np.float64)

    module_spec = importlib.util.spec_from_file_location("candidate_solver", candidate_path)
    module = importlib.util.module_from_spec(module_spec)
    module_spec.loader.exec_module(module)

    started = time.time()
    result = module.solver(*inputs, t_coordinate, **manifest["parameters"])
    print(f"[pdeforge] solver returned after {time.time() - started:.3f}s", flush=True)

    if not isinstance(result, (tuple, list)):
        result = (result,)
    names = manifest["output_fields"]
    if len(result) != len(names):
        sys.exit(f"solver returned {len(result)} arrays, expected {len(names)} ({', '.join(names)})")

    output_dir = os.path.join(workdir, "outputs")
    os.makedirs(output_dir, exist_ok=True)
    entries = [save_tensor(output_dir, name, array) for name, array in zip(names, result)]
    with open(os.path.join(output_dir, "manifest.json"), "w") as handle:
        json.dump({"outputs": entries}, handle)


if __name__ == "__main__":
    main()
"#;

/// File name for candidate source written in `language`.
pub fn candidate_file_name(language: &str) -> String {
    let ext = match language.to_ascii_lowercase().as_str() {
        "python" | "py" => "py",
        "julia" | "jl" => "jl",
        "rust" | "rs" => "rs",
        "c++" | "cpp" => "cpp",
        "c" => "c",
        "sh" | "bash" | "shell" => "sh",
        _ => "txt",
    };
    format!("solver.{ext}")
}
