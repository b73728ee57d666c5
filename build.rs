#[cfg(feature = "rdmacm")]
use std::env;
#[cfg(feature = "rdmacm")]
use std::path::Path;

/// Probe `librdmacm` and `libibverbs` through `pkg-config`.
///
/// Both libraries are shipped by `rdma-core` (and MLNX_OFED v5.x), which
/// register them to `pkg-config`. Returns the include directories to hand
/// to `bindgen`.
#[cfg(feature = "rdmacm")]
fn link_rdma_core() -> Result<Vec<String>, pkg_config::Error> {
    let mut include_dirs = Vec::new();
    for lib in ["librdmacm", "libibverbs"] {
        let lib = pkg_config::Config::new().statik(false).probe(lib)?;
        include_dirs.extend(
            lib.include_paths
                .iter()
                .filter_map(|p| p.to_str().map(str::to_owned)),
        );
    }
    Ok(include_dirs)
}

/// Build flow:
///
/// 1. Without the `rdmacm` feature, nothing is linked: the crate only carries
///    the in-process loopback fabric.
/// 2. With it, link to `librdmacm`/`libibverbs` and generate the bindings.
fn main() {
    // Refuse to compile on non-64-bit platforms.
    if cfg!(not(target_pointer_width = "64")) {
        panic!("`rdma-client` currently only supports 64-bit platforms");
    }
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "rdmacm")]
    {
        println!("cargo:rerun-if-changed=src/bindings/cm.h");
        println!("cargo:rerun-if-env-changed=RDMA_CORE_INCLUDE_DIR");

        let include_dirs = match link_rdma_core() {
            Ok(dirs) => dirs,
            Err(_) => {
                // `rdma-core` installed to the default prefix without `.pc` files.
                println!("cargo:rustc-link-lib=rdmacm");
                println!("cargo:rustc-link-lib=ibverbs");
                env::var("RDMA_CORE_INCLUDE_DIR").map(|d| vec![d]).unwrap_or_default()
            }
        };
        gen_cm_bindings(include_dirs);
    }
}

#[cfg(feature = "rdmacm")]
fn gen_cm_bindings(include_dirs: Vec<String>) {
    let include_args = include_dirs.iter().map(|p| format!("-I{}", p));
    let bindings = bindgen::builder()
        .clang_args(include_args)
        .header("src/bindings/cm.h")
        .allowlist_function("rdma_getaddrinfo")
        .allowlist_function("rdma_freeaddrinfo")
        .allowlist_function("rdma_create_ep")
        .allowlist_function("rdma_destroy_ep")
        .allowlist_function("rdma_connect")
        .allowlist_function("rdma_disconnect")
        .allowlist_function("ibv_reg_mr")
        .allowlist_function("ibv_dereg_mr")
        .allowlist_type("rdma_addrinfo")
        .allowlist_type("rdma_cm_id")
        .allowlist_type("rdma_port_space")
        .allowlist_type("ibv_qp_init_attr")
        .allowlist_type("ibv_wc")
        .allowlist_type("ibv_sge")
        .allowlist_type("ibv_recv_wr")
        .allowlist_type("ibv_send_wr")
        .allowlist_type("ibv_access_flags")
        .opaque_type("pthread_.*")
        .bitfield_enum("ibv_access_flags")
        .bitfield_enum("ibv_send_flags")
        .bitfield_enum("ibv_wc_flags")
        .constified_enum_module("rdma_port_space")
        .constified_enum_module("ibv_qp_type")
        .constified_enum_module("ibv_wc_status")
        .constified_enum_module("ibv_wc_opcode")
        .constified_enum_module("ibv_wr_opcode")
        .derive_copy(true)
        .derive_debug(false)
        .derive_default(true)
        .generate_comments(false)
        .layout_tests(false)
        .prepend_enum_name(false)
        .size_t_is_usize(true)
        .generate()
        .expect("failed to generate rdmacm bindings");

    let out_dir = env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo");
    let dest = Path::new(&out_dir).join("cm_bindings.rs");
    bindings
        .write_to_file(dest)
        .expect("failed to write rdmacm bindings");
}
