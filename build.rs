fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Emit link flags for the system libfuse3 when it can be found. The
    // dispatch table and the path cache have no native dependency, so a
    // missing library only affects programs that actually enter the host
    // loop through `Fuse::run`.
    let _ = pkg_config::Config::new()
        .atleast_version("3.2")
        .probe("fuse3");
}
