use std::env;
use std::path::PathBuf;
use std::process::Command;

const KERNELS: [(&str, &str); 4] = [
    ("src/backend/cuda/kernels/elementwise.cu", "elementwise.ptx"),
    ("src/backend/cuda/kernels/conv.cu", "conv.ptx"),
    ("src/backend/cuda/kernels/pooling.cu", "pooling.ptx"),
    ("src/backend/cuda/kernels/activation.cu", "activation.ptx"),
];

fn find_nvcc() -> PathBuf {
    if let Ok(path) = which::which("nvcc") {
        return path;
    }
    if let Ok(cuda_path) = env::var("CUDA_PATH") {
        return PathBuf::from(cuda_path).join("bin").join("nvcc");
    }
    ["/usr/local/cuda/bin/nvcc", "/opt/cuda/bin/nvcc"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .unwrap_or_else(|| {
            panic!("nvcc not found. Ensure the CUDA Toolkit is installed and nvcc is in PATH, or set CUDA_PATH.")
        })
}

fn main() {
    if env::var("CARGO_FEATURE_CPU_OPENBLAS").is_ok() {
        println!("cargo:rustc-link-lib=openblas");
        println!("cargo:rerun-if-env-changed=OPENBLAS_PATH");
    }

    if env::var("CARGO_FEATURE_CUDA").is_err() {
        return;
    }

    if let Ok(lib_dir) = env::var("CUBLAS_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", lib_dir);
    }
    if env::var("CUBLAS_STATIC").is_ok() {
        println!("cargo:rustc-link-lib=static=cublas");
    } else {
        println!("cargo:rustc-link-lib=dylib=cublas");
    }
    println!("cargo:rerun-if-env-changed=CUBLAS_LIB_DIR");
    println!("cargo:rerun-if-env-changed=CUBLAS_STATIC");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    let nvcc_path = find_nvcc();
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_else(|e| panic!("OUT_DIR not set: {}", e)));

    for (src_path, ptx_filename) in KERNELS {
        let ptx_path = out_dir.join(ptx_filename);
        let status = Command::new(&nvcc_path)
            .arg("--ptx")
            .arg("-O3")
            // .arg("-gencode").arg("arch=compute_75,code=sm_75")
            .arg("-o")
            .arg(&ptx_path)
            .arg(src_path)
            .status()
            .unwrap_or_else(|e| panic!("Failed to execute nvcc for {}: {}", src_path, e));

        if !status.success() {
            panic!("nvcc failed to compile {}", src_path);
        }
        println!("cargo:rerun-if-changed={}", src_path);
    }
}
